//! Text summary builder for CLI output.
//!
//! This module formats a session snapshot into human-readable lines for text mode.

use crate::model::{ChartType, ExportPhase, SessionSnapshot, Step};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Step indicator: done steps are checked, the current one is marked, later ones are blank.
fn step_line(current: Step) -> String {
    (0..Step::COUNT)
        .filter_map(Step::from_index)
        .map(|s| {
            let mark = if s == current {
                '>'
            } else if s < current {
                'x'
            } else {
                ' '
            };
            format!("[{mark}] {}. {}", s.index() + 1, s.label())
        })
        .collect::<Vec<_>>()
        .join("   ")
}

/// Build a text summary of the wizard, the charts and the export state.
pub(crate) fn build_text_summary(snap: &SessionSnapshot) -> TextSummary {
    let mut lines = vec![step_line(snap.current_step)];

    match &snap.data_file {
        Some(f) => lines.push(format!(
            "Data file: {} ({:.2} MB, {})",
            f.name,
            f.bytes as f64 / 1024.0 / 1024.0,
            f.mime
        )),
        None => lines.push("Data file: -".to_string()),
    }

    match snap.current_step {
        Step::Upload => {}
        Step::SelectType => {
            for t in ChartType::ALL {
                let mark = if snap.selected_type == Some(t) { '*' } else { ' ' };
                lines.push(format!(
                    "  {mark} {:<8} {:<13} {}",
                    t.tag(),
                    t.display_name(),
                    t.description()
                ));
            }
        }
        Step::PreviewExport => {
            if !snap.charts.is_empty() {
                lines.push("Your charts:".to_string());
            }
            for c in &snap.charts {
                let mark = if snap.active_chart.as_ref() == Some(&c.id) { '*' } else { ' ' };
                lines.push(format!("  {mark} {} [{}] id={}", c.title, c.chart_type, c.id));
            }
        }
    }

    let export = &snap.export;
    let status = match export.phase {
        ExportPhase::Idle => "Export: idle".to_string(),
        ExportPhase::Running => "Export: generating…".to_string(),
        ExportPhase::Succeeded => format!(
            "Export: done, {}",
            export.download_handle.as_deref().unwrap_or("-")
        ),
        ExportPhase::Failed => format!(
            "Export: failed, {}",
            export.error_message.as_deref().unwrap_or("unknown error")
        ),
    };
    if snap.current_step == Step::PreviewExport || export.phase != ExportPhase::Idle {
        lines.push(status);
    }

    TextSummary { lines }
}
