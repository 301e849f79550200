//! Session manager: keeps an interactive session alive across disconnects.
//!
//! One attempt at a time. Each attempt refreshes the display, starts the
//! forwarder (if any rules apply), runs the session in the foreground and
//! stops the forwarder once the session exits. A cancellation observed
//! before an attempt, around its exit or during the retry delay ends the
//! loop.

use std::time::Duration;

use csd_core::{
    CancellationToken, ForwardRule, OutputMode, ProcessError, ProcessHandle, Target, TargetError,
    exit_code, resolve_target,
};
use thiserror::Error;

use crate::{
    display::SessionDisplay,
    forwarder::{DEFAULT_GRACE, ForwarderSupervisor},
    launcher::SessionLauncher,
};

/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// How long a failed exit waits for a signal that raced with it.
const CANCEL_SETTLE: Duration = Duration::from_millis(50);

/// Session manager error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    NoTarget(#[from] TargetError),
    #[error("failed to start session: {0}")]
    Launch(#[source] ProcessError),
    #[error("max retries ({max_retries}) reached, giving up")]
    RetriesExhausted {
        max_retries: u32,
        attempts: Vec<AttemptRecord>,
    },
    #[error("session exited with status {exit_code}")]
    AttemptFailed {
        exit_code: i32,
        attempts: Vec<AttemptRecord>,
    },
}

/// Retry behaviour after an abnormal session exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Whether to retry at all.
    pub enabled: bool,
    /// Wait between attempts.
    pub delay: Duration,
    /// Retries allowed after the first attempt; `None` is unlimited.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    /// Single attempt; its failure is final.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            delay: DEFAULT_RETRY_DELAY,
            max_retries: None,
        }
    }

    /// Retry forever with `delay` between attempts.
    #[must_use]
    pub const fn unlimited(delay: Duration) -> Self {
        Self {
            enabled: true,
            delay,
            max_retries: None,
        }
    }

    /// Limit retries; `0` means unlimited.
    #[must_use]
    pub const fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = if max == 0 { None } else { Some(max) };
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Clean,
    UserCancelled,
    Failed { exit_code: i32 },
}

/// One connection try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub index: u32,
    pub forwarder_pid: Option<u32>,
    pub outcome: AttemptOutcome,
}

/// How the whole session ended, when it ended well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Clean,
    UserCancelled,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub end: SessionEnd,
    pub attempts: Vec<AttemptRecord>,
}

/// Classify an exited attempt.
///
/// Cancellation wins over the exit status: an interrupted session usually
/// exits nonzero.
#[must_use]
pub const fn classify(success: bool, cancelled: bool, exit_code: i32) -> AttemptOutcome {
    if cancelled {
        AttemptOutcome::UserCancelled
    } else if success {
        AttemptOutcome::Clean
    } else {
        AttemptOutcome::Failed { exit_code }
    }
}

/// Runs the retry loop for one target.
pub struct SessionManager<L, D>
where
    L: SessionLauncher,
    D: SessionDisplay,
{
    launcher: L,
    display: D,
    retry: RetryPolicy,
    forward_rules: Vec<ForwardRule>,
    forwarder_grace: Duration,
}

impl<L, D> SessionManager<L, D>
where
    L: SessionLauncher,
    D: SessionDisplay,
{
    #[must_use]
    pub const fn new(launcher: L, display: D) -> Self {
        Self {
            launcher,
            display,
            retry: RetryPolicy::disabled(),
            forward_rules: Vec::new(),
            forwarder_grace: DEFAULT_GRACE,
        }
    }

    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Endpoints the forwarder maintains during each attempt.
    #[must_use]
    pub fn forward_rules(mut self, rules: Vec<ForwardRule>) -> Self {
        self.forward_rules = rules;
        self
    }

    #[must_use]
    pub const fn forwarder_grace(mut self, grace: Duration) -> Self {
        self.forwarder_grace = grace;
        self
    }

    pub const fn display(&self) -> &D {
        &self.display
    }

    /// Pick the target name: `explicit` first, then the remembered one.
    ///
    /// # Errors
    /// Returns [`SessionError::NoTarget`] if neither is set.
    pub fn resolve(
        explicit: Option<&str>,
        remembered: Option<&str>,
    ) -> Result<String, SessionError> {
        Ok(resolve_target(explicit, remembered)?)
    }

    /// Run attempts until one ends cleanly, the user cancels, or retries
    /// run out.
    ///
    /// # Errors
    /// Returns [`SessionError::Launch`] if the session command cannot be
    /// started, [`SessionError::RetriesExhausted`] at the retry bound, or
    /// [`SessionError::AttemptFailed`] when retry is disabled.
    pub async fn run(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<SessionReport, SessionError> {
        let mut attempts = Vec::new();
        let mut retries: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                tracing::info!(attempts = attempts.len(), "Cancelled before connecting");
                return Ok(SessionReport {
                    end: SessionEnd::UserCancelled,
                    attempts,
                });
            }

            let record = self.attempt(retries + 1, target, cancel).await?;
            let outcome = record.outcome;
            attempts.push(record);

            let exit_code = match outcome {
                AttemptOutcome::Clean => {
                    tracing::info!("Session ended normally");
                    return Ok(SessionReport {
                        end: SessionEnd::Clean,
                        attempts,
                    });
                }
                AttemptOutcome::UserCancelled => {
                    tracing::info!("Disconnected");
                    return Ok(SessionReport {
                        end: SessionEnd::UserCancelled,
                        attempts,
                    });
                }
                AttemptOutcome::Failed { exit_code } => exit_code,
            };

            if !self.retry.enabled {
                return Err(SessionError::AttemptFailed { exit_code, attempts });
            }
            if let Some(max_retries) = self.retry.max_retries.filter(|max| retries >= *max) {
                return Err(SessionError::RetriesExhausted { max_retries, attempts });
            }
            retries += 1;

            tracing::info!(
                exit_code,
                attempt = retries + 1,
                max_attempts = ?self.retry.max_retries.map(|max| max + 1),
                "Connection lost, reconnecting in {}s",
                self.retry.delay.as_secs()
            );
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Reconnection cancelled");
                    return Ok(SessionReport {
                        end: SessionEnd::UserCancelled,
                        attempts,
                    });
                }
                () = tokio::time::sleep(self.retry.delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        index: u32,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<AttemptRecord, SessionError> {
        self.display.refresh(target);

        let forwarder = self.start_forwarder(target);
        let forwarder_pid = forwarder.as_ref().and_then(ForwarderSupervisor::pid);

        let spec = self.launcher.session_command(target);
        tracing::debug!(index, command = %spec, "Starting session attempt");
        let status = match ProcessHandle::start(&spec, OutputMode::Passthrough) {
            Ok(mut session) => session.wait().await,
            Err(e) => Err(e),
        };

        if let Some(forwarder) = forwarder {
            forwarder.stop().await;
        }
        let status = status.map_err(SessionError::Launch)?;

        let cancelled = cancel.is_cancelled()
            || (!status.success()
                && tokio::time::timeout(CANCEL_SETTLE, cancel.cancelled())
                    .await
                    .is_ok());
        let outcome = classify(status.success(), cancelled, exit_code(status));
        tracing::debug!(index, ?outcome, "Session attempt finished");

        Ok(AttemptRecord {
            index,
            forwarder_pid,
            outcome,
        })
    }

    fn start_forwarder(&self, target: &Target) -> Option<ForwarderSupervisor> {
        if self.forward_rules.is_empty() {
            return None;
        }
        let spec = self.launcher.forwarder_command(target, &self.forward_rules)?;
        match ForwarderSupervisor::start(&spec, self.forwarder_grace) {
            Ok(forwarder) => {
                let ports: Vec<String> =
                    self.forward_rules.iter().map(ToString::to_string).collect();
                tracing::info!(ports = %ports.join(", "), "Forwarding ports");
                Some(forwarder)
            }
            Err(e) => {
                tracing::warn!("Failed to start port forwarding: {e}");
                None
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Mutex;

    use csd_core::CommandSpec;
    use nix::{
        sys::signal::{Signal, kill},
        unistd::Pid,
    };
    use pretty_assertions::assert_eq;

    use super::*;

    /// Runs `sh -c <script>` as the session and `sleep 30` as the forwarder.
    struct ScriptLauncher {
        script: String,
    }

    impl ScriptLauncher {
        fn new(script: &str) -> Self {
            Self {
                script: script.to_string(),
            }
        }
    }

    impl SessionLauncher for ScriptLauncher {
        fn session_command(&self, _target: &Target) -> CommandSpec {
            CommandSpec::new("sh").args(["-c", self.script.as_str()])
        }

        fn forwarder_command(
            &self,
            _target: &Target,
            _rules: &[ForwardRule],
        ) -> Option<CommandSpec> {
            Some(CommandSpec::new("sleep").arg("30"))
        }
    }

    #[derive(Default)]
    struct RecordingDisplay {
        refreshed: Mutex<Vec<String>>,
    }

    impl SessionDisplay for RecordingDisplay {
        fn refresh(&self, target: &Target) {
            self.refreshed.lock().unwrap().push(target.name.clone());
        }
    }

    fn manager(script: &str) -> SessionManager<ScriptLauncher, RecordingDisplay> {
        SessionManager::new(ScriptLauncher::new(script), RecordingDisplay::default())
    }

    fn is_alive(pid: u32) -> bool {
        kill(Pid::from_raw(i32::try_from(pid).unwrap()), None::<Signal>).is_ok()
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(true, false, 0), AttemptOutcome::Clean);
        assert_eq!(classify(false, false, 255), AttemptOutcome::Failed { exit_code: 255 });
        assert_eq!(classify(false, true, 130), AttemptOutcome::UserCancelled);
        assert_eq!(classify(true, true, 0), AttemptOutcome::UserCancelled);
    }

    #[test]
    fn test_retry_policy_zero_is_unlimited() {
        let policy = RetryPolicy::unlimited(Duration::from_secs(1)).max_retries(0);
        assert_eq!(policy.max_retries, None);
        assert_eq!(RetryPolicy::unlimited(Duration::ZERO).max_retries(2).max_retries, Some(2));
    }

    #[test]
    fn test_resolve() {
        type Manager = SessionManager<ScriptLauncher, RecordingDisplay>;
        assert_eq!(Manager::resolve(Some("cs-1"), Some("cs-0")).unwrap(), "cs-1");
        assert!(matches!(Manager::resolve(None, None), Err(SessionError::NoTarget(_))));
    }

    #[tokio::test]
    async fn test_clean_exit_does_not_retry() {
        let manager = manager("exit 0").retry(RetryPolicy::unlimited(Duration::from_millis(10)));
        let report = manager
            .run(&Target::named("cs-1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.end, SessionEnd::Clean);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(*manager.display().refreshed.lock().unwrap(), ["cs-1"]);
    }

    #[tokio::test]
    async fn test_failures_retry_up_to_bound() {
        let policy = RetryPolicy::unlimited(Duration::from_millis(10)).max_retries(2);
        let manager = manager("exit 1").retry(policy);
        let err = manager
            .run(&Target::named("cs-1"), &CancellationToken::new())
            .await
            .unwrap_err();

        let SessionError::RetriesExhausted { max_retries, attempts } = err else {
            panic!("expected retries to run out");
        };
        assert_eq!(max_retries, 2);
        assert_eq!(attempts.len(), 3);
        assert_eq!(
            attempts.iter().map(|a| a.index).collect::<Vec<_>>(),
            [1, 2, 3]
        );
        assert!(
            attempts
                .iter()
                .all(|a| a.outcome == AttemptOutcome::Failed { exit_code: 1 })
        );
        assert_eq!(manager.display().refreshed.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_retry_disabled_fails_once() {
        let manager = manager("exit 5");
        let err = manager
            .run(&Target::named("cs-1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::AttemptFailed { exit_code: 5, ref attempts } if attempts.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_wait_stops_loop() {
        let manager = manager("exit 1").retry(RetryPolicy::unlimited(Duration::from_secs(30)));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });

        let target = Target::named("cs-1");
        let run = manager.run(&target, &token);
        let report = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("cancellation preempts the retry delay")
            .unwrap();
        assert_eq!(report.end, SessionEnd::UserCancelled);
        assert_eq!(report.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_first_attempt_launches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("launched");
        let manager = manager(&format!("touch '{}'; exit 0", marker.display()))
            .retry(RetryPolicy::unlimited(Duration::from_millis(10)))
            .forward_rules(vec![ForwardRule::same(3000)]);
        let token = CancellationToken::new();
        token.cancel();

        let report = manager.run(&Target::named("cs-1"), &token).await.unwrap();
        assert_eq!(report.end, SessionEnd::UserCancelled);
        assert!(report.attempts.is_empty());
        assert!(!marker.exists());
        assert!(manager.display().refreshed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_session_wins_over_failed_exit() {
        let manager = manager("sleep 1; exit 130");
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });

        let report = manager.run(&Target::named("cs-1"), &token).await.unwrap();
        assert_eq!(report.end, SessionEnd::UserCancelled);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::UserCancelled);
    }

    #[tokio::test]
    async fn test_cancel_just_after_failed_exit_counts_as_user_cancel() {
        // Retry disabled: a missed cancel would surface as AttemptFailed.
        let dir = tempfile::tempdir().unwrap();
        let exiting = dir.path().join("exiting");
        let manager = manager(&format!("sleep 0.2; touch '{}'; exit 130", exiting.display()));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            while !exiting.exists() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let report = manager.run(&Target::named("cs-1"), &token).await.unwrap();
        assert_eq!(report.end, SessionEnd::UserCancelled);
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.attempts[0].outcome, AttemptOutcome::UserCancelled);
    }

    #[tokio::test]
    async fn test_forwarder_gone_after_each_attempt() {
        let manager = manager("exit 1")
            .retry(RetryPolicy::unlimited(Duration::from_millis(10)).max_retries(1))
            .forward_rules(vec![ForwardRule::same(3000)])
            .forwarder_grace(Duration::from_secs(1));
        let err = manager
            .run(&Target::named("cs-1"), &CancellationToken::new())
            .await
            .unwrap_err();

        let SessionError::RetriesExhausted { attempts, .. } = err else {
            panic!("expected retries to run out");
        };
        assert_eq!(attempts.len(), 2);
        let pids: Vec<u32> = attempts.iter().filter_map(|a| a.forwarder_pid).collect();
        assert_eq!(pids.len(), 2);
        assert_ne!(pids[0], pids[1]);
        assert!(pids.iter().all(|pid| !is_alive(*pid)));
    }

    #[tokio::test]
    async fn test_no_forwarder_without_rules() {
        let manager = manager("exit 0");
        let report = manager
            .run(&Target::named("cs-1"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.attempts[0].forwarder_pid, None);
    }

    #[tokio::test]
    async fn test_launch_failure_is_terminal() {
        struct Missing;
        impl SessionLauncher for Missing {
            fn session_command(&self, _target: &Target) -> CommandSpec {
                CommandSpec::new("csd-test-no-such-session")
            }

            fn forwarder_command(
                &self,
                _target: &Target,
                _rules: &[ForwardRule],
            ) -> Option<CommandSpec> {
                None
            }
        }

        let manager = SessionManager::new(Missing, crate::display::NoDisplay)
            .retry(RetryPolicy::unlimited(Duration::from_millis(10)));
        let err = manager
            .run(&Target::named("cs-1"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Launch(ProcessError::Spawn { .. })));
    }
}
