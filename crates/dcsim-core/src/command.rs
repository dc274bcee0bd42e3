//! External command collaborator
//!
//! Runs a configured program once per phase with `--dates d1,d2,...`
//! appended and reads a raw result set as JSON from its stdout.

use crate::config::CommandSpec;
use crate::error::CollaboratorError;
use crate::runner::PhaseOrchestrator;
use crate::types::{RawPhaseResults, TraceDate};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Bytes of stderr kept in [`CollaboratorError::Exited`]
const STDERR_TAIL: usize = 2048;

/// Phase orchestrator backed by a child process
#[derive(Debug, Clone)]
pub struct CommandOrchestrator {
    spec: CommandSpec,
}

impl CommandOrchestrator {
    /// Create from a command spec
    #[inline]
    #[must_use]
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    /// Underlying command spec
    #[inline]
    #[must_use]
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn command(&self, dates: &[TraceDate]) -> Command {
        let joined = dates
            .iter()
            .map(TraceDate::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .arg("--dates")
            .arg(joined)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.spec.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

#[async_trait]
impl PhaseOrchestrator for CommandOrchestrator {
    async fn run(&self, dates: &[TraceDate]) -> Result<RawPhaseResults, CollaboratorError> {
        let program = self.spec.program.clone();
        tracing::debug!(%program, args = ?self.spec.args, dates = dates.len(), "spawning collaborator");

        let child = self
            .command(dates)
            .spawn()
            .map_err(|source| CollaboratorError::Spawn {
                program: program.clone(),
                source,
            })?;

        let output = match self.spec.timeout_secs {
            Some(secs) => {
                tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output())
                    .await
                    .map_err(|_| CollaboratorError::Timeout {
                        program: program.clone(),
                        secs,
                    })?
            }
            None => child.wait_with_output().await,
        }
        .map_err(|source| CollaboratorError::Io {
            program: program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(CollaboratorError::Exited {
                program,
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| CollaboratorError::MalformedOutput {
            program,
            message: e.to_string(),
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
