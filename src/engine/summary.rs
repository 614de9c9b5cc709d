//! Execution summary rendering: the per-pipeline result table and the
//! ASCII timeline strip.

use std::time::Instant;

use crate::engine::state::ExecutionOutputs;
use crate::graph::PhaseKind;

/// Number of time slices the timeline is divided into. A few extra
/// columns absorb phases squeezed against the right edge.
const TIMELINE_SLICES: usize = 80;
const TIMELINE_SLACK: usize = 4;

/// Render the result table: one row per pipeline, one column per phase,
/// each cell `count (elapsed ms)`. Skipped or failed phases render empty
/// cells.
pub(crate) fn render_table(outputs: &ExecutionOutputs) -> String {
    let headers = ["pipeline", "input", "process", "post-process", "output"];

    let mut rows: Vec<[String; 5]> = Vec::new();
    for (name, results) in outputs.iter() {
        let mut row = [
            name.to_string(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
        ];
        for kind in PhaseKind::ALL {
            if let Some(result) = results.get(kind) {
                row[kind.index() + 1] =
                    format!("{} ({} ms)", result.outputs().len(), result.elapsed_ms());
            }
        }
        rows.push(row);
    }

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    let render_row = |cells: [&str; 5]| {
        let mut line = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                line.push_str("  ");
            }
            line.push_str(&format!("{cell:<width$}", width = widths[i]));
        }
        line.trim_end().to_string()
    };

    out.push_str(&render_row(headers));
    out.push('\n');
    out.push_str(&"-".repeat(widths.iter().sum::<usize>() + 2 * (headers.len() - 1)));
    for row in &rows {
        out.push('\n');
        out.push_str(&render_row([
            row[0].as_str(),
            row[1].as_str(),
            row[2].as_str(),
            row[3].as_str(),
            row[4].as_str(),
        ]));
    }
    out
}

/// Render the timeline strip: one row per pipeline, phases marked with
/// their letter (I/P/T/O) at their start slice and `-` while they run.
/// Best-effort diagnostic output; returns `None` when nothing completed.
pub(crate) fn render_timeline(outputs: &ExecutionOutputs) -> Option<String> {
    let mut min_start: Option<Instant> = None;
    let mut max_end: Option<Instant> = None;
    for (_, results) in outputs.iter() {
        for result in results.iter() {
            let start = result.start_instant();
            let end = result.end_instant();
            min_start = Some(min_start.map_or(start, |m| m.min(start)));
            max_end = Some(max_end.map_or(end, |m| m.max(end)));
        }
    }
    let (min_start, max_end) = (min_start?, max_end?);
    let total = max_end.duration_since(min_start).as_secs_f64();
    let width = TIMELINE_SLICES + TIMELINE_SLACK;
    let slice_of = |instant: Instant| -> usize {
        if total <= f64::EPSILON {
            return 0;
        }
        let offset = instant.duration_since(min_start).as_secs_f64();
        (((offset / total) * TIMELINE_SLICES as f64) as usize).min(width - 1)
    };

    let name_width = outputs
        .iter()
        .map(|(name, _)| name.len())
        .max()
        .unwrap_or(0);

    let mut lines = Vec::new();
    for (name, results) in outputs.iter() {
        let mut row = vec![' '; width];
        for result in results.iter() {
            let start = slice_of(result.start_instant());
            let end = slice_of(result.end_instant());
            for cell in row.iter_mut().take(end + 1).skip(start + 1) {
                *cell = '-';
            }
            row[start] = result.kind().letter();
        }
        let strip: String = row.into_iter().collect();
        lines.push(format!(
            "{name:>name_width$} |{}|",
            strip.trim_end_matches(' ')
        ));
    }
    Some(lines.join("\n"))
}
