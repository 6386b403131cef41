use std::fmt::Write;

use crate::grads::GradNormReport;

#[derive(Clone, Debug)]
pub struct GradNormLogger {
    enable_stdout: bool,
}

impl GradNormLogger {
    pub fn new(enable_stdout: bool) -> Self {
        Self { enable_stdout }
    }

    /// Prints one line per report, or routes it through `log` when stdout is
    /// disabled. Empty reports are not logged.
    pub fn log(&self, step: usize, report: &GradNormReport) {
        if report.is_empty() {
            return;
        }
        let line = format_report(step, report);
        if self.enable_stdout {
            println!("{line}");
        } else {
            log::info!("{line}");
        }
    }
}

pub fn format_report(step: usize, report: &GradNormReport) -> String {
    let mut line = format!("grad_norm step={}", step);
    for (label, value) in report.iter() {
        let _ = write!(line, " {}={:.4}", label, value);
    }
    line
}
