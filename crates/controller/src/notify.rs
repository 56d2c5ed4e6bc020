//! Fatal-error reporting hook.
//!
//! Mail transport is someone else's problem: the controller execs a
//! configured external command once per fatal termination and hands it
//! everything it needs. Contract:
//!
//! ```text
//! <command> --to <recipient> --subject <subject> [attachment path...]
//! ```
//!
//! The report body arrives on stdin; the credential (if configured) in the
//! `NOTIFY_CREDENTIAL` env var. A non-zero exit from the hook is an error to
//! the caller, who can only log it — there is nobody left to tell.

use anyhow::{ensure, Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{error, warn};

use crate::config::NotifySection;

/// Name of the env var the hook receives its credential in.
const CREDENTIAL_ENV: &str = "NOTIFY_CREDENTIAL";

pub trait Notifier {
    fn send_report(&self, subject: &str, body: &str, attachments: &[&Path]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Command hook
// ---------------------------------------------------------------------------

pub struct CommandNotifier {
    command: String,
    recipient: String,
    credential: Option<String>,
}

impl CommandNotifier {
    pub fn from_config(cfg: &NotifySection) -> Self {
        let credential = cfg.credential_env.as_ref().and_then(|var| {
            let value = std::env::var(var).ok();
            if value.is_none() {
                warn!("credential env var '{var}' is not set — hook runs without it");
            }
            value
        });
        Self {
            command: cfg.command.clone(),
            recipient: cfg.recipient.clone(),
            credential,
        }
    }
}

impl Notifier for CommandNotifier {
    fn send_report(&self, subject: &str, body: &str, attachments: &[&Path]) -> Result<()> {
        let mut cmd = Command::new(&self.command);
        cmd.arg("--to")
            .arg(&self.recipient)
            .arg("--subject")
            .arg(subject);
        for path in attachments {
            cmd.arg(path);
        }
        if let Some(credential) = &self.credential {
            cmd.env(CREDENTIAL_ENV, credential);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn notify command: {}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A hook may exit before reading the body; that alone is not a
            // delivery failure.
            if let Err(e) = stdin.write_all(body.as_bytes()) {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e).context("failed to write report body to notify command");
                }
            }
        }

        let status = child.wait().context("failed to wait for notify command")?;
        ensure!(status.success(), "notify command exited with {status}");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Log-only fallback (no [notify] section configured)
// ---------------------------------------------------------------------------

pub struct LogOnlyNotifier;

impl Notifier for LogOnlyNotifier {
    fn send_report(&self, subject: &str, body: &str, _attachments: &[&Path]) -> Result<()> {
        error!("no notifier configured — {subject}: {body}");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// Records every report instead of delivering it.
#[cfg(test)]
pub(crate) struct RecordingNotifier {
    pub(crate) reports: std::sync::Mutex<Vec<(String, String)>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub(crate) fn new() -> Self {
        Self {
            reports: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn send_report(&self, subject: &str, body: &str, _attachments: &[&Path]) -> Result<()> {
        self.reports
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn notifier(command: &str) -> CommandNotifier {
        CommandNotifier {
            command: command.to_string(),
            recipient: "grower@example.com".to_string(),
            credential: None,
        }
    }

    #[test]
    fn command_notifier_passes_args_and_body() {
        let dir = std::env::temp_dir();
        let pid = std::process::id();
        let script = dir.join(format!("growbox-notify-{pid}.sh"));
        let out = dir.join(format!("growbox-notify-{pid}.out"));

        fs::write(
            &script,
            format!(
                "#!/bin/sh\nprintf '%s ' \"$@\" > {out}\ncat >> {out}\n",
                out = out.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let n = notifier(&script.display().to_string());
        n.send_report("it broke", "the gory details", &[Path::new("/tmp/growbox.log")])
            .unwrap();

        let captured = fs::read_to_string(&out).unwrap();
        assert!(captured.contains("--to grower@example.com"), "{captured}");
        assert!(captured.contains("--subject it broke"), "{captured}");
        assert!(captured.contains("/tmp/growbox.log"), "{captured}");
        assert!(captured.contains("the gory details"), "{captured}");

        let _ = fs::remove_file(&script);
        let _ = fs::remove_file(&out);
    }

    #[test]
    fn failing_hook_is_an_error() {
        let n = notifier("false");
        assert!(n.send_report("subject", "body", &[]).is_err());
    }

    #[test]
    fn missing_hook_is_an_error() {
        let n = notifier("/nonexistent/growbox-mailer");
        let err = n.send_report("subject", "body", &[]).unwrap_err();
        assert!(err.to_string().contains("failed to spawn"), "{err}");
    }

    #[test]
    fn log_only_notifier_always_succeeds() {
        LogOnlyNotifier
            .send_report("subject", "body", &[Path::new("/tmp/x")])
            .unwrap();
    }
}
