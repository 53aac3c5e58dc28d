//! Locating and driving the external processors.
//!
//! Every engine in the pipeline that is not implemented in-process is a
//! command-line tool (asciidoctor, xsltproc, saxon, fop, xmllint). They are
//! located once at Init, so a missing processor aborts the run before any
//! document is touched, and then invoked with input on stdin and output
//! collected from stdout.

use crate::error::BuildError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Captured result of one tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ToolOutput {
    /// Short failure description: the last non-empty stderr lines, or the exit code.
    pub fn failure_detail(&self) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            return match self.code {
                Some(code) => format!("exited with status {code}"),
                None => "terminated by signal".to_string(),
            };
        }
        let tail = lines.len().saturating_sub(8);
        lines[tail..].join("\n")
    }
}

/// Find `tool`, preferring an explicitly configured path over `PATH`.
pub fn locate(tool: &str, explicit: Option<&Path>) -> Result<PathBuf, BuildError> {
    if let Some(path) = explicit {
        if path.is_file() {
            debug!("Using configured {}: {}", tool, path.display());
            return Ok(path.to_path_buf());
        }
        return Err(BuildError::engine(
            tool,
            format!("configured executable '{}' does not exist", path.display()),
        ));
    }
    let found = which::which(tool).map_err(|e| {
        BuildError::engine(tool, format!("'{tool}' was not found on PATH ({e})"))
    })?;
    debug!("Found {} at {}", tool, found.display());
    Ok(found)
}

/// Run `cmd`, feeding `stdin` and collecting both output streams.
///
/// Stdin is written from a scoped thread so a tool that streams output
/// before it has consumed all of its input cannot deadlock on a full pipe.
pub fn run(mut cmd: Command, stdin: &[u8]) -> std::io::Result<ToolOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let pipe = child.stdin.take();

    let output = std::thread::scope(|scope| {
        if let Some(mut pipe) = pipe {
            scope.spawn(move || {
                // A tool that exits early closes the pipe; its exit status
                // carries the real error.
                let _ = pipe.write_all(stdin);
            });
        }
        child.wait_with_output()
    })?;

    Ok(ToolOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// First line of `<tool> <flag>` output, used to log engine versions.
pub fn probe_version(exe: &Path, flag: &str) -> std::io::Result<Option<String>> {
    let out = Command::new(exe)
        .arg(flag)
        .stdin(Stdio::null())
        .output()?;
    if !out.status.success() {
        return Ok(None);
    }
    // Some tools (xsltproc, xmllint) print their version on stderr.
    let text = if out.stdout.is_empty() {
        out.stderr
    } else {
        out.stdout
    };
    Ok(String::from_utf8_lossy(&text)
        .lines()
        .next()
        .map(|l| l.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_rejects_missing_explicit_path() {
        let err = locate("fop", Some(Path::new("/definitely/not/here/fop"))).unwrap_err();
        assert!(matches!(err, BuildError::EngineInit { ref engine, .. } if engine == "fop"));
    }

    #[test]
    fn locate_reports_unknown_tool() {
        let err = locate("docbook-build-no-such-tool", None).unwrap_err();
        assert!(err.to_string().contains("not found on PATH"));
    }

    #[test]
    fn failure_detail_prefers_stderr_tail() {
        let out = ToolOutput {
            success: false,
            code: Some(5),
            stdout: Vec::new(),
            stderr: "warning\n\nerror: boom\n".into(),
        };
        assert_eq!(out.failure_detail(), "warning\nerror: boom");
    }

    #[test]
    fn failure_detail_falls_back_to_status() {
        let out = ToolOutput {
            success: false,
            code: Some(3),
            stdout: Vec::new(),
            stderr: String::new(),
        };
        assert_eq!(out.failure_detail(), "exited with status 3");
    }

    #[cfg(unix)]
    #[test]
    fn run_pipes_stdin_through() {
        let cmd = Command::new("cat");
        let out = run(cmd, b"<article/>").unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, b"<article/>");
    }
}
