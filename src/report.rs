//! Loss accounting: how many sequences each stage kept.

use colored::*;
use serde::Serialize;

use std::fmt;
use std::path::Path;

use crate::errors::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageCount {
    pub stage: String,
    pub input: usize,
    pub output: usize,
}

impl StageCount {
    pub fn new(stage: impl Into<String>, input: usize, output: usize) -> Self {
        Self {
            stage: stage.into(),
            input,
            output,
        }
    }

    /// Share of the input that was kept, in percent. An empty input keeps everything.
    pub fn percent(&self) -> f64 {
        if self.input == 0 {
            100.0
        } else {
            self.output as f64 * 100.0 / self.input as f64
        }
    }
}

/// Stage counts of one unit of work (usually a pool), in pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LossReport {
    pub unit: String,
    pub stages: Vec<StageCount>,
}

impl LossReport {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            stages: Vec::new(),
        }
    }

    pub fn push(&mut self, count: StageCount) {
        log::info!(
            "{}: {} kept {} of {} ({:.1}%)",
            self.unit,
            count.stage,
            count.output,
            count.input,
            count.percent()
        );
        self.stages.push(count);
    }

    pub fn stage(&self, stage: &str) -> Option<&StageCount> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn write_yaml(&self, file: impl AsRef<Path>) -> Result<()> {
        let file = file.as_ref();
        let yaml = serde_yaml::to_string(self).map_err(|e| Error::file_io(file.display(), e))?;
        std::fs::write(file, yaml).map_err(|e| Error::file_io(file.display(), e))
    }
}

impl fmt::Display for LossReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.unit.bold())?;
        for s in &self.stages {
            let percent = format!("{:6.2}%", s.percent());
            let percent = if s.percent() < 50.0 {
                percent.red()
            } else {
                percent.green()
            };
            writeln!(
                f,
                "  {:<24} {:>10} -> {:>10} {}",
                s.stage.cyan(),
                s.input,
                s.output,
                percent
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_retained() {
        assert_eq!(StageCount::new("n_filter", 200, 150).percent(), 75.0);
        assert_eq!(StageCount::new("trim", 0, 0).percent(), 100.0);
    }

    #[test]
    fn yaml_report() {
        let mut report = LossReport::new("run1_pool1");
        report.push(StageCount::new("classify_pairs", 10, 10));
        report.push(StageCount::new("good_barcodes", 10, 7));

        let yaml = serde_yaml::to_string(&report).unwrap();
        assert!(yaml.contains("unit: run1_pool1"));
        assert!(yaml.contains("stage: good_barcodes"));
        assert_eq!(report.stage("good_barcodes").unwrap().output, 7);

        colored::control::set_override(false);
        let text = report.to_string();
        assert!(text.contains("70.00%"));
    }
}
