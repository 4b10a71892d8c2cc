//! Terminal output for the demo binary, colored via `console`.

use console::Style;

use pageforge::model::{ItemStatus, Job, JobItem, JobStatus};
use pageforge::quality::QualityReport;

pub struct Reporter {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Default for Reporter {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print the settled job and its items, one line per item.
    pub fn print_job_summary(&self, job: &Job, items: &[JobItem], refund: Option<u32>) {
        println!();
        let status = match job.status {
            JobStatus::Completed => self.green.apply_to(job.status.to_string()),
            JobStatus::Failed | JobStatus::Cancelled => self.red.apply_to(job.status.to_string()),
            _ => self.yellow.apply_to(job.status.to_string()),
        };
        println!("job {}: {status}", job.id);
        println!(
            "  items: {} completed, {} failed of {}",
            job.completed_items, job.failed_items, job.total_items
        );
        if let Some(error) = &job.error {
            println!("  {} {error}", self.red.apply_to("error:"));
        }

        for item in items {
            match item.status {
                ItemStatus::Completed => {
                    let key = item.artifact_key.as_deref().unwrap_or("?");
                    println!("  {} {}", self.green.apply_to("✓"), self.dim.apply_to(key));
                }
                ItemStatus::Failed => {
                    let error = item.error.as_deref().unwrap_or("unknown");
                    println!("  {} {error}", self.red.apply_to("✗"));
                }
                _ => {
                    println!("  {} item {} still {:?}", self.yellow.apply_to("…"), item.id, item.status);
                }
            }
        }

        if let Some(refund) = refund {
            println!("  refund: {refund} credits");
        }
    }

    /// Print a quality gate report for one image.
    pub fn print_quality_report(&self, report: &QualityReport) {
        if report.passed {
            println!("{} score {}", self.green.apply_to("PASS"), report.score);
        } else {
            println!("{} score {}", self.red.apply_to("FAIL"), report.score);
            for check in &report.failed_checks {
                println!("  {} {check}", self.red.apply_to("✗"));
            }
        }
    }
}
