use std::collections::HashMap;

use ephemera_domain::{LayerName, OutputSet, Scenario};
use ephemera_runner::{LayerStatus, RunReport};

/// Render a run report as human-readable text.
pub fn render_report(report: &RunReport) -> String {
    let mut out = format!(
        "Scenario: {} (suffix {}) — {}\n",
        report.scenario, report.suffix, report.outcome
    );

    for layer in &report.layers {
        let (mark, status) = match layer.status {
            LayerStatus::NotApplied => (" ", "not applied"),
            LayerStatus::Applied => ("+", "applied"),
            LayerStatus::ApplyFailed => ("!", "apply failed"),
            LayerStatus::Destroyed => ("-", "applied, destroyed"),
            LayerStatus::DestroyFailed => ("!", "applied, destroy FAILED"),
        };
        out.push_str(&format!("  {} {}: {}\n", mark, layer.layer, status));
    }

    if !report.errors.is_empty() {
        out.push_str(&format!("\n{} error(s):\n", report.errors.len()));
        for e in &report.errors {
            out.push_str(&format!("  ! {}\n", e));
        }
    }

    out
}

/// Render per-layer outputs in stack order.
pub fn render_outputs(scenario: &Scenario, outputs: &HashMap<LayerName, OutputSet>) -> String {
    let mut out = String::new();
    for layer in &scenario.layers {
        out.push_str(&format!("Layer: {}\n", layer.name));
        if let Some(set) = outputs.get(&layer.name) {
            for (key, value) in set.iter() {
                out.push_str(&format!("  {} = {}\n", key, value));
            }
        }
    }
    out
}
