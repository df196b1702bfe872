//! One plugin-issued command and its one-shot result.
//!
//! An envelope is created on the plugin side (usually the pipe bridge's
//! worker thread), shared through an `Arc` with the dispatch thread, and
//! resolved there exactly once.  Anyone holding the `Arc` may block on
//! [`CommandEnvelope::wait_resolved`] until that happens.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::error;

/// Resolution state of a [`CommandEnvelope`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CommandOutcome {
    #[default]
    Unresolved,
    Failed(String),
    Succeeded(String),
}

impl CommandOutcome {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, CommandOutcome::Unresolved)
    }
}

/// A named command with ordered arguments and a result that resolves once.
#[derive(Debug)]
pub struct CommandEnvelope {
    name: String,
    args: Vec<String>,
    outcome: Mutex<CommandOutcome>,
    resolved: Condvar,
}

impl CommandEnvelope {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            outcome: Mutex::new(CommandOutcome::Unresolved),
            resolved: Condvar::new(),
        }
    }

    /// Builds an envelope from a token list: the first token is the command
    /// name and the rest are its arguments.  An empty list yields an
    /// envelope with an empty name.
    pub fn create<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tokens = tokens.into_iter().map(Into::into);
        let name = tokens.next().unwrap_or_default();
        Self::new(name, tokens.collect())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Resolves as failed.  Returns `false` if the envelope was already resolved.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.resolve(CommandOutcome::Failed(message.into()))
    }

    /// Resolves as succeeded.  Returns `false` if the envelope was already resolved.
    pub fn respond(&self, message: impl Into<String>) -> bool {
        self.resolve(CommandOutcome::Succeeded(message.into()))
    }

    /// Snapshot of the current resolution state.
    pub fn outcome(&self) -> CommandOutcome {
        self.lock().clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.lock().is_resolved()
    }

    /// Blocks until the envelope resolves or `timeout` elapses.
    ///
    /// Returns the outcome, or `None` on timeout.  A timeout too large to
    /// represent as a deadline waits without one.
    pub fn wait_resolved(&self, timeout: Duration) -> Option<CommandOutcome> {
        let deadline = Instant::now().checked_add(timeout);
        let mut outcome = self.lock();
        while !outcome.is_resolved() {
            outcome = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return None;
                    }
                    self.resolved
                        .wait_timeout(outcome, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .resolved
                    .wait(outcome)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
        Some(outcome.clone())
    }

    fn resolve(&self, next: CommandOutcome) -> bool {
        let mut outcome = self.lock();
        if outcome.is_resolved() {
            error!(
                "command '{}' already resolved as {:?}; discarding {:?}",
                self.name, *outcome, next
            );
            return false;
        }
        *outcome = next;
        drop(outcome);
        self.resolved.notify_all();
        true
    }

    fn lock(&self) -> MutexGuard<'_, CommandOutcome> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_create_splits_name_and_args() {
        let envelope = CommandEnvelope::create(["moveXY", "10", "20"]);

        assert_eq!(envelope.name(), "moveXY");
        assert_eq!(envelope.args(), ["10", "20"]);
        assert_eq!(envelope.outcome(), CommandOutcome::Unresolved);
    }

    #[test]
    fn test_create_from_empty_tokens_has_empty_name() {
        let envelope = CommandEnvelope::create(Vec::<String>::new());

        assert_eq!(envelope.name(), "");
        assert!(envelope.args().is_empty());
    }

    #[test]
    fn test_first_resolution_wins() {
        // Arrange
        let envelope = CommandEnvelope::create(["switchToScreen", "laptop"]);

        // Act
        let first = envelope.fail("screen not found: laptop");
        let second = envelope.respond("late success");

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(
            envelope.outcome(),
            CommandOutcome::Failed("screen not found: laptop".to_string())
        );
    }

    #[test]
    fn test_respond_then_fail_keeps_success() {
        let envelope = CommandEnvelope::create(["version"]);

        assert!(envelope.respond(""));
        assert!(!envelope.fail("too late"));
        assert_eq!(envelope.outcome(), CommandOutcome::Succeeded(String::new()));
    }

    #[test]
    fn test_wait_resolved_times_out_when_nobody_resolves() {
        let envelope = CommandEnvelope::create(["noop"]);

        let outcome = envelope.wait_resolved(Duration::from_millis(20));

        assert_eq!(outcome, None);
        assert!(!envelope.is_resolved());
    }

    #[test]
    fn test_wait_resolved_wakes_on_resolution_from_another_thread() {
        // Arrange
        let envelope = Arc::new(CommandEnvelope::create(["switchToScreen", "desk"]));
        let resolver = Arc::clone(&envelope);

        // Act
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            resolver.respond("ok");
        });
        let outcome = envelope.wait_resolved(Duration::from_secs(5));
        handle.join().unwrap();

        // Assert
        assert_eq!(outcome, Some(CommandOutcome::Succeeded("ok".to_string())));
    }

    #[test]
    fn test_wait_resolved_returns_immediately_when_already_resolved() {
        let envelope = CommandEnvelope::create(["x"]);
        envelope.fail("nope");

        let outcome = envelope.wait_resolved(Duration::ZERO);

        assert_eq!(outcome, Some(CommandOutcome::Failed("nope".to_string())));
    }

    #[test]
    fn test_wait_resolved_with_unbounded_timeout_waits_for_resolution() {
        // Arrange
        let envelope = Arc::new(CommandEnvelope::create(["moveXY", "1", "1"]));
        let resolver = Arc::clone(&envelope);

        // Act
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            resolver.respond("1 1");
        });
        let outcome = envelope.wait_resolved(Duration::MAX);
        handle.join().unwrap();

        // Assert
        assert_eq!(outcome, Some(CommandOutcome::Succeeded("1 1".to_string())));
    }
}
