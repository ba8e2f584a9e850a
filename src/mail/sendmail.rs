//! Delivery through a local `sendmail`-compatible binary.
//!
//! The message is piped to `<program> -t -i`, so recipients come from the
//! rendered headers and a lone `.` line does not end the message early.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use super::{AlertMessage, MailError, MailTransport};

/// Default location of the sendmail binary.
pub const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";

/// Pipes messages to a sendmail-compatible program.
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    program: PathBuf,
}

impl SendmailTransport {
    /// Transport invoking `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SendmailTransport {
    fn default() -> Self {
        Self::new(DEFAULT_SENDMAIL)
    }
}

impl MailTransport for SendmailTransport {
    fn send(&self, message: &AlertMessage) -> Result<(), MailError> {
        if message.recipient.trim().is_empty() {
            return Err(MailError::Invalid("empty recipient".to_owned()));
        }

        let mut child = Command::new(&self.program)
            .args(["-t", "-i"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MailError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let rendered = message.to_rfc5322();
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(rendered.as_bytes()) {
                drop(stdin);
                // Reap the child so it does not linger as a zombie.
                if let Err(kill_err) = child.kill() {
                    debug!(error = %kill_err, "mail transport already exited");
                }
                if let Err(wait_err) = child.wait() {
                    warn!(error = %wait_err, "failed to reap mail transport");
                }
                return Err(MailError::Write(e));
            }
            // Dropping stdin closes the pipe so the program sees EOF.
        }

        let output = child.wait_with_output().map_err(MailError::Write)?;
        if !output.status.success() {
            return Err(MailError::Rejected {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        debug!(program = %self.program.display(), "alert handed to sendmail");
        Ok(())
    }
}
