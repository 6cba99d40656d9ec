//! Running external assemblers and clustering programs.

use serde::Deserialize;

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::errors::*;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A command line template. Arguments may contain `{name}` placeholders.
///
/// ```yaml
/// program: pandaseq
/// args: ["-f", "{fwd}", "-r", "{rev}", "-w", "{assembled}", "-u", "{unassembled}"]
/// timeout_secs: 3600
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExternalTool {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl ExternalTool {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Substitute placeholders. An unknown placeholder is a configuration error.
    pub fn expand(&self, vars: &[(&str, &str)]) -> Result<Vec<String>> {
        self.args
            .iter()
            .map(|arg| {
                let mut out = String::with_capacity(arg.len());
                let mut rest = arg.as_str();

                while let Some(start) = rest.find('{') {
                    out.push_str(&rest[..start]);
                    let end = rest[start..].find('}').ok_or_else(|| {
                        Error::config(format!("unclosed placeholder in argument \"{}\"", arg))
                    })? + start;
                    let name = &rest[start + 1..end];
                    let value = vars
                        .iter()
                        .find(|(k, _)| *k == name)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| {
                            Error::config(format!(
                                "unknown placeholder {{{}}} for {}",
                                name, self.program
                            ))
                        })?;
                    out.push_str(value);
                    rest = &rest[end + 1..];
                }

                out.push_str(rest);
                Ok(out)
            })
            .collect()
    }

    /// Run the program and wait for it, killing it once the timeout passes.
    pub fn run(&self, vars: &[(&str, &str)]) -> Result<()> {
        let args = self.expand(vars)?;
        let tool_err = |reason: String| Error::ExternalTool {
            tool: self.program.clone(),
            reason,
        };

        log::info!("running {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| tool_err(format!("could not start: {e}")))?;

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().map_err(|e| tool_err(e.to_string()))? {
                break status;
            }

            if let Some(timeout) = self.timeout() {
                if start.elapsed() >= timeout {
                    // the process may exit between the check and the kill
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::ExternalToolTimeout {
                        tool: self.program.clone(),
                        timeout,
                    });
                }
            }

            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(tool_err(format!("exited with {status}")));
        }

        log::debug!("{} finished in {:.1?}", self.program, start.elapsed());
        Ok(())
    }

    /// Run and check that every expected output exists and is not empty.
    pub fn run_expecting(&self, vars: &[(&str, &str)], outputs: &[&Path]) -> Result<()> {
        self.run(vars)?;

        for output in outputs {
            let len = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
            if len == 0 {
                return Err(Error::ExternalTool {
                    tool: self.program.clone(),
                    reason: format!("expected output \"{}\" is missing or empty", output.display()),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders() {
        let tool = ExternalTool::new("x", &["-i", "{in}", "--out={out}.fa", "{{in}"]);
        let args = tool.expand(&[("in", "a.fq"), ("out", "b")]);
        assert!(args.is_err());

        let tool = ExternalTool::new("x", &["-i", "{in}", "--out={out}.fa"]);
        let args = tool.expand(&[("in", "a.fq"), ("out", "b")]).unwrap();
        assert_eq!(args, vec!["-i", "a.fq", "--out=b.fa"]);

        let tool = ExternalTool::new("x", &["{missing}"]);
        assert!(tool.expand(&[]).unwrap_err().is_configuration());
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_and_timeout() {
        ExternalTool::new("true", &[]).run(&[]).unwrap();

        assert!(matches!(
            ExternalTool::new("false", &[]).run(&[]),
            Err(Error::ExternalTool { .. })
        ));
        assert!(matches!(
            ExternalTool::new("amplitag-no-such-program", &[]).run(&[]),
            Err(Error::ExternalTool { .. })
        ));

        let slow = ExternalTool::new("sleep", &["{secs}"]).with_timeout(Duration::from_secs(1));
        let start = Instant::now();
        assert!(matches!(
            slow.run(&[("secs", "30")]),
            Err(Error::ExternalToolTimeout { .. })
        ));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn empty_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let out_str = out.display().to_string();

        let touch = ExternalTool::new("touch", &["{out}"]);
        assert!(touch.run_expecting(&[("out", out_str.as_str())], &[out.as_path()]).is_err());

        std::fs::write(&out, "x").unwrap();
        touch.run_expecting(&[("out", out_str.as_str())], &[out.as_path()]).unwrap();
    }
}
