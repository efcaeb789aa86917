// flowsieve/src/eval/report.rs
//
// Markdown (stdout) and JSON output for training and evaluation reports.

use std::path::{Path, PathBuf};

use super::{ConfusionMatrix, EvalResult, TrainingReport};

pub const REPORT_FILE: &str = "training_report.json";

/// Per-family table, winner first line marked with `*`.
pub fn print_markdown(report: &TrainingReport) {
    println!("# flowsieve Training Report");
    println!();
    println!(
        "**Best model**: {}  **CV mean**: {:.4}  **Trained**: {}",
        report.best_model,
        report.best_score,
        report.trained_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
    println!("| Model                | Accuracy | CV mean | ±2σ    |");
    println!("|----------------------|----------|---------|--------|");
    for s in &report.scores {
        let mark = if s.model == report.best_model { "*" } else { " " };
        println!(
            "|{}{:20} | {:.4}   | {:.4}  | {:.4} |",
            mark, s.model.name(), s.accuracy, s.cv_mean, 2.0 * s.cv_std
        );
    }
    println!();
    println!("## Held-out results ({})\n", report.best_model);
    print_confusion(&report.held_out);
}

pub fn print_eval(result: &EvalResult) {
    println!("# flowsieve Evaluation Report");
    println!();
    println!(
        "**Model**: {}  **Rows**: {}  **Skipped**: {}",
        result.model, result.n_rows, result.n_skipped
    );
    println!();
    print_confusion(&result.confusion);
}

pub fn print_confusion(m: &ConfusionMatrix) {
    println!("Accuracy {:.4}  macro-F1 {:.4}\n", m.accuracy(), m.macro_f1());

    print!("| {:13} |", "true \\ pred");
    for c in &m.classes {
        print!(" {:>13} |", c);
    }
    println!();
    print!("|{}|", "-".repeat(15));
    for _ in &m.classes {
        print!("{}|", "-".repeat(15));
    }
    println!();
    for (i, row) in m.counts.iter().enumerate() {
        print!("| {:13} |", m.classes[i]);
        for n in row {
            print!(" {:>13} |", n);
        }
        println!();
    }

    println!("\n| Class         | P     | R     | F1    | Support |");
    println!("|---------------|-------|-------|-------|---------|");
    for (class, c) in m.per_class() {
        println!(
            "| {:13} | {:.3} | {:.3} | {:.3} | {:7} |",
            class, c.precision(), c.recall(), c.f1(), c.support
        );
    }
}

fn class_rows(m: &ConfusionMatrix) -> Vec<serde_json::Value> {
    m.per_class()
        .iter()
        .map(|(class, c)| {
            serde_json::json!({
                "class":     class,
                "precision": c.precision(),
                "recall":    c.recall(),
                "f1":        c.f1(),
                "support":   c.support,
            })
        })
        .collect()
}

/// Report plus derived per-class metrics.
pub fn to_json(report: &TrainingReport) -> serde_json::Value {
    serde_json::json!({
        "best_model": report.best_model,
        "best_score": report.best_score,
        "trained_at": report.trained_at,
        "scores":     report.scores,
        "held_out": {
            "accuracy":  report.held_out.accuracy(),
            "macro_f1":  report.held_out.macro_f1(),
            "confusion": report.held_out,
            "per_class": class_rows(&report.held_out),
        },
    })
}

/// Write `training_report.json` into `dir`; returns the file path.
pub fn write_json(report: &TrainingReport, dir: &Path) -> std::io::Result<PathBuf> {
    let path = dir.join(REPORT_FILE);
    let body = serde_json::to_string_pretty(&to_json(report)).map_err(std::io::Error::other)?;
    std::fs::write(&path, body)?;
    Ok(path)
}
