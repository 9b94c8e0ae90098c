//! External merge and diff programs.

use std::io::Write;
use std::process::Stdio;

use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::errors::WorkAreaError;

pub const LABEL_LOCAL: &str = "edited by you";
pub const LABEL_ORIGINAL: &str = "before edited";
pub const LABEL_REMOTE: &str = "edited by others";

fn temp_text(prefix: &str, text: &str) -> Result<NamedTempFile, WorkAreaError> {
    let mut file = tempfile::Builder::new().prefix(prefix).tempfile()?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(file)
}

fn spawn_error(program: &str, e: std::io::Error) -> WorkAreaError {
    if e.kind() == std::io::ErrorKind::NotFound {
        WorkAreaError::ToolNotFound(program.to_string())
    } else {
        WorkAreaError::Io(e)
    }
}

/// Result of a three-way merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merged {
    pub text: String,
    /// The text contains conflict markers.
    pub conflict: bool,
}

/// `diff3 -mE` over (local, original, remote).
#[derive(Debug, Clone)]
pub struct Diff3MergeTool {
    program: String,
}

impl Diff3MergeTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    #[instrument(skip_all, fields(program = %self.program))]
    pub async fn merge(&self, local: &str, original: &str, remote: &str) -> Result<Merged, WorkAreaError> {
        let local_file = temp_text("formsync.local", local)?;
        let original_file = temp_text("formsync.original", original)?;
        let remote_file = temp_text("formsync.remote", remote)?;

        let output = Command::new(&self.program)
            .arg("-mE")
            .args(["-L", LABEL_LOCAL, "-L", LABEL_ORIGINAL, "-L", LABEL_REMOTE])
            .arg(local_file.path())
            .arg(original_file.path())
            .arg(remote_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| spawn_error(&self.program, e))?;

        let conflict = match output.status.code() {
            Some(0) => false,
            Some(1) => true,
            code => {
                let exit_code = code.unwrap_or(-1);
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!(exit_code, %stderr, "merge tool failed");
                return Err(WorkAreaError::MergeToolFailure { exit_code, stderr });
            }
        };
        debug!(conflict, "merge finished");
        Ok(Merged { text: String::from_utf8_lossy(&output.stdout).into_owned(), conflict })
    }
}

/// `diff -u` between two labelled texts.
#[derive(Debug, Clone)]
pub struct DiffTool {
    program: String,
}

impl DiffTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }

    /// Unified diff from `old` to `new`; empty when they are identical.
    #[instrument(skip(self, old, new))]
    pub async fn unified(
        &self,
        old_label: &str,
        old: &str,
        new_label: &str,
        new: &str,
    ) -> Result<String, WorkAreaError> {
        let old_file = temp_text("formsync.other", old)?;
        let new_file = temp_text("formsync.local", new)?;

        let output = Command::new(&self.program)
            .arg("-u")
            .arg(format!("--label={}", old_label))
            .arg(old_file.path())
            .arg(format!("--label={}", new_label))
            .arg(new_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| spawn_error(&self.program, e))?;

        match output.status.code() {
            Some(0) | Some(1) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            code => Err(WorkAreaError::DiffToolFailure { exit_code: code.unwrap_or(-1) }),
        }
    }
}
