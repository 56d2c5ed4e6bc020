//! Watchdog that keeps the growbox controller running.
//!
//! Launches the controller as a child process and waits. A clean exit
//! (status 0 — an operator-requested shutdown) stops the watchdog too; a
//! crash is relaunched after a short delay, up to a bounded number of
//! restarts. The two processes share nothing but the exit status — the
//! controller owns its own error reporting, so retry exhaustion here is
//! only logged.
//!
//! Configured entirely from the environment, e.g.:
//!
//! ```text
//! CONTROLLER_BIN=/usr/local/bin/growbox-controller \
//! MAX_RETRIES=10 RESTART_DELAY_S=5 growbox-supervisor
//! ```

use anyhow::{Context, Result};
use std::env;
use std::future::Future;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_MAX_RETRIES: u32 = 10;
const DEFAULT_RESTART_DELAY_S: u64 = 5;

// ---------------------------------------------------------------------------
// Restart policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    /// Clean exit: the controller meant to stop, so do we.
    Stop,
    /// Crash with retry budget left.
    Relaunch,
    /// Crash with the budget spent.
    GiveUp,
}

fn next_action(clean_exit: bool, restarts: u32, max_retries: u32) -> Verdict {
    if clean_exit {
        Verdict::Stop
    } else if restarts < max_retries {
        Verdict::Relaunch
    } else {
        Verdict::GiveUp
    }
}

/// Drive `launch` until it exits cleanly or the retry budget is spent.
/// `launch` resolves to `true` for a clean exit; an `Err` (the child could
/// not be started at all) aborts immediately — relaunching cannot fix a
/// missing binary. Returns the number of restarts performed.
async fn supervise<F, Fut>(
    mut launch: F,
    max_retries: u32,
    restart_delay: Duration,
) -> Result<u32>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let mut restarts: u32 = 0;
    loop {
        let clean_exit = launch(restarts).await?;
        match next_action(clean_exit, restarts, max_retries) {
            Verdict::Stop => {
                info!(restarts, "controller exited cleanly — supervisor done");
                return Ok(restarts);
            }
            Verdict::Relaunch => {
                restarts += 1;
                warn!(restarts, max_retries, "controller crashed — relaunching");
                sleep(restart_delay).await;
            }
            Verdict::GiveUp => {
                error!(max_retries, "retry budget exhausted — giving up");
                return Ok(restarts);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let bin = env::var("CONTROLLER_BIN").unwrap_or_else(|_| "growbox-controller".to_string());
    let args: Vec<String> = env::var("CONTROLLER_ARGS")
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    let max_retries: u32 = env::var("MAX_RETRIES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_MAX_RETRIES);
    let restart_delay = Duration::from_secs(
        env::var("RESTART_DELAY_S")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RESTART_DELAY_S),
    );

    supervise(
        |attempt| {
            let bin = bin.clone();
            let args = args.clone();
            async move {
                info!(%bin, attempt, "launching controller");
                let status = Command::new(&bin)
                    .args(&args)
                    .status()
                    .await
                    .with_context(|| format!("failed to launch {bin}"))?;
                if !status.success() {
                    warn!(%status, "controller terminated");
                }
                Ok(status.success())
            }
        },
        max_retries,
        restart_delay,
    )
    .await?;

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    // -- Verdict table -------------------------------------------------------

    #[test]
    fn clean_exit_always_stops() {
        assert_eq!(next_action(true, 0, 10), Verdict::Stop);
        assert_eq!(next_action(true, 10, 10), Verdict::Stop);
    }

    #[test]
    fn crash_relaunches_while_budget_remains() {
        assert_eq!(next_action(false, 0, 10), Verdict::Relaunch);
        assert_eq!(next_action(false, 9, 10), Verdict::Relaunch);
    }

    #[test]
    fn crash_gives_up_when_budget_is_spent() {
        assert_eq!(next_action(false, 10, 10), Verdict::GiveUp);
    }

    #[test]
    fn zero_budget_never_relaunches() {
        assert_eq!(next_action(false, 0, 0), Verdict::GiveUp);
    }

    // -- Supervise loop ------------------------------------------------------

    #[tokio::test]
    async fn always_crashing_child_is_relaunched_exactly_max_retries_times() {
        let launches = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&launches);

        let restarts = supervise(
            move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(false) // crash
                }
            },
            3,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(restarts, 3);
        // Initial launch plus the three relaunches.
        assert_eq!(launches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn clean_child_is_launched_once() {
        let launches = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&launches);

        let restarts = supervise(
            move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(true) // clean exit
                }
            },
            10,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(restarts, 0);
        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn crash_then_clean_stops_after_recovery() {
        let restarts = supervise(
            |attempt| async move { Ok(attempt >= 1) },
            10,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(restarts, 1);
    }

    #[tokio::test]
    async fn launch_error_aborts_immediately() {
        let launches = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&launches);

        let result = supervise(
            move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("no such binary")
                }
            },
            10,
            Duration::ZERO,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }

    // -- Real child processes ------------------------------------------------

    #[tokio::test]
    async fn real_crashing_process_exhausts_the_budget() {
        let restarts = supervise(
            |_| async {
                let status = Command::new("false").status().await?;
                Ok(status.success())
            },
            2,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(restarts, 2);
    }

    #[tokio::test]
    async fn real_clean_process_stops_the_supervisor() {
        let restarts = supervise(
            |_| async {
                let status = Command::new("true").status().await?;
                Ok(status.success())
            },
            2,
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert_eq!(restarts, 0);
    }
}
