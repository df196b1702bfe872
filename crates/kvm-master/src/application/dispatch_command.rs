//! DispatchCommandUseCase: executes plugin commands on the dispatch thread.
//!
//! Plugins never touch server state directly.  A plugin-side component
//! (usually the pipe bridge) wraps the tokens it received in a
//! [`CommandEnvelope`] and calls [`CommandSubmitter::submit`], which only
//! enqueues a [`ServerEvent`].  The dispatch thread drains that queue in
//! [`CommandDispatcher::run`] and is the only code that mutates the screen
//! registry and the active screen.
//!
//! ```text
//! bridge worker ──submit──► mpsc queue ──► dispatch thread
//!                                           └─ CommandDispatcher::dispatch
//!                                                ├─ ScreenController
//!                                                └─ PluginFeedback::screen_switched
//! ```
//!
//! # Architecture
//!
//! The use case depends only on the [`ScreenController`] trait; the real
//! screen/session layer and the test doubles are injected at construction.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use kvm_core::domain::clipboard_registry::ClipboardRegistry;
use kvm_core::domain::command::CommandEnvelope;
use kvm_core::domain::feedback::{panic_message, PluginFeedback};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::manage_screens::{ScreenRegistry, ScreenState};

/// Built-in command that activates a named screen.
pub const CMD_SWITCH_TO_SCREEN: &str = "switchToScreen";
/// Built-in command that moves the pointer on the active screen.
pub const CMD_MOVE_XY: &str = "moveXY";
/// Built-in command that logs every live clipboard.
pub const CMD_DUMP_CLIPBOARDS: &str = "dump_clipboards";

/// Failure message used when the dispatch loop is gone.
pub const LOOP_NOT_RUNNING: &str = "server event loop is not running";

/// Error type for plugin command execution.
///
/// Every variant becomes the message of a failed envelope resolution.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command : {0}")]
    UnknownCommand(String),
    #[error("wrong argument count for {command}: expected {expected}, got {got}")]
    WrongArgumentCount {
        command: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid argument for {command}: '{value}' is not a 32-bit integer")]
    InvalidArgument { command: &'static str, value: String },
    #[error("screen not found: {0}")]
    ScreenNotFound(String),
    #[error("screen controller error: {0}")]
    Controller(String),
}

/// Screen/session operations the dispatcher delegates to.
///
/// Infrastructure implementations talk to the session layer; test
/// implementations record calls.
#[cfg_attr(test, mockall::automock)]
pub trait ScreenController: Send + Sync {
    /// Makes `screen` the screen that receives input.
    fn jump_to_screen(&self, screen: &ScreenState) -> Result<(), String>;

    /// Moves the pointer to absolute `(x, y)` on `screen`.
    fn move_pointer(&self, screen: &ScreenState, x: i32, y: i32) -> Result<(), String>;
}

/// Events drained by the dispatch thread.
#[derive(Debug)]
pub enum ServerEvent {
    /// A plugin command to execute.
    PluginCommand(Arc<CommandEnvelope>),
    /// Stops [`CommandDispatcher::run`].
    Shutdown,
}

/// Thread-safe handle for enqueueing work on the dispatch thread.
///
/// Cloning is cheap; every clone feeds the same queue.
#[derive(Debug, Clone)]
pub struct CommandSubmitter {
    sender: Sender<ServerEvent>,
}

impl CommandSubmitter {
    pub fn new(sender: Sender<ServerEvent>) -> Self {
        Self { sender }
    }

    /// Creates a submitter together with the receiver the dispatch loop drains.
    pub fn channel() -> (Self, Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }

    /// Enqueues `envelope` for execution and returns immediately.
    ///
    /// If the dispatch loop has stopped the envelope is resolved as failed
    /// and `false` is returned.
    pub fn submit(&self, envelope: Arc<CommandEnvelope>) -> bool {
        debug!("submitting plugin command '{}'", envelope.name());
        match self.sender.send(ServerEvent::PluginCommand(envelope)) {
            Ok(()) => true,
            Err(mpsc::SendError(event)) => {
                error!("cannot submit plugin command: {LOOP_NOT_RUNNING}");
                if let ServerEvent::PluginCommand(envelope) = event {
                    envelope.fail(LOOP_NOT_RUNNING);
                }
                false
            }
        }
    }

    /// Asks the dispatch loop to stop.  Returns `false` if it already has.
    pub fn shutdown(&self) -> bool {
        self.sender.send(ServerEvent::Shutdown).is_ok()
    }
}

/// Executes plugin commands against the master's screen state.
///
/// The dispatcher binds to the first thread that dispatches or runs it.
/// Using it from any other thread afterwards panics.
pub struct CommandDispatcher {
    screens: ScreenRegistry,
    active_screen: String,
    controller: Arc<dyn ScreenController>,
    feedback: Arc<PluginFeedback>,
    clipboards: Arc<ClipboardRegistry>,
    owner: Option<ThreadId>,
}

impl CommandDispatcher {
    /// Creates a dispatcher whose active screen is the master's own screen.
    pub fn new(
        screens: ScreenRegistry,
        controller: Arc<dyn ScreenController>,
        feedback: Arc<PluginFeedback>,
        clipboards: Arc<ClipboardRegistry>,
    ) -> Self {
        let active_screen = screens.master_name().to_string();
        Self {
            screens,
            active_screen,
            controller,
            feedback,
            clipboards,
            owner: None,
        }
    }

    /// Name of the screen that currently receives input.
    pub fn active_screen(&self) -> &str {
        &self.active_screen
    }

    /// Executes `envelope` and resolves it.
    ///
    /// Command errors and panics raised by built-ins or the controller are
    /// converted into a failed resolution; they never unwind past this call.
    pub fn dispatch(&mut self, envelope: &CommandEnvelope) {
        self.bind_to_current_thread();
        debug!(
            "dispatching plugin command '{}' {:?}",
            envelope.name(),
            envelope.args()
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(envelope.name(), envelope.args())
        }));

        match result {
            Ok(Ok(message)) => {
                envelope.respond(message);
            }
            Ok(Err(e)) => {
                warn!("plugin command '{}' failed: {e}", envelope.name());
                envelope.fail(e.to_string());
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("plugin command '{}' panicked: {message}", envelope.name());
                envelope.fail(message);
            }
        }
    }

    /// Drains `events` on the calling thread until `Shutdown` arrives or
    /// every submitter has been dropped.  Returns the number of commands run.
    pub fn run(mut self, events: Receiver<ServerEvent>) -> usize {
        self.bind_to_current_thread();
        info!("dispatch loop started");
        let mut executed = 0;
        for event in events {
            match event {
                ServerEvent::PluginCommand(envelope) => {
                    self.dispatch(&envelope);
                    executed += 1;
                }
                ServerEvent::Shutdown => break,
            }
        }
        info!("dispatch loop stopped after {executed} commands");
        executed
    }

    fn bind_to_current_thread(&mut self) {
        let current = thread::current().id();
        match self.owner {
            None => self.owner = Some(current),
            Some(owner) => assert_eq!(
                owner, current,
                "CommandDispatcher used outside its dispatch thread"
            ),
        }
    }

    fn execute(&mut self, name: &str, args: &[String]) -> Result<String, CommandError> {
        match name {
            CMD_SWITCH_TO_SCREEN => {
                expect_args(CMD_SWITCH_TO_SCREEN, args, 1)?;
                self.switch_to_screen(&args[0])
            }
            CMD_MOVE_XY => {
                expect_args(CMD_MOVE_XY, args, 2)?;
                let x = parse_coordinate(CMD_MOVE_XY, &args[0])?;
                let y = parse_coordinate(CMD_MOVE_XY, &args[1])?;
                self.move_xy(x, y)
            }
            CMD_DUMP_CLIPBOARDS => Ok(self.dump_clipboards()),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }

    fn switch_to_screen(&mut self, name: &str) -> Result<String, CommandError> {
        let screen = self
            .screens
            .get(name)
            .ok_or_else(|| CommandError::ScreenNotFound(name.to_string()))?;
        self.controller
            .jump_to_screen(screen)
            .map_err(CommandError::Controller)?;

        info!("active screen: {} -> {name}", self.active_screen);
        self.active_screen = name.to_string();
        self.feedback.screen_switched().invoke(&self.active_screen);
        Ok(self.active_screen.clone())
    }

    fn move_xy(&mut self, x: i32, y: i32) -> Result<String, CommandError> {
        let screen = self
            .screens
            .get(&self.active_screen)
            .ok_or_else(|| CommandError::ScreenNotFound(self.active_screen.clone()))?;
        self.controller
            .move_pointer(screen, x, y)
            .map_err(CommandError::Controller)?;
        Ok(format!("{x} {y}"))
    }

    fn dump_clipboards(&self) -> String {
        let entries = self.clipboards.dump();
        info!("dumping {} live clipboards", entries.len());
        for entry in &entries {
            info!("{entry}");
        }
        entries.len().to_string()
    }
}

/// Name of the thread started by [`spawn_dispatch_thread`].
pub const DISPATCH_THREAD_NAME: &str = "kvm-dispatch";

/// Runs `dispatcher` over `events` on a dedicated, named thread.
///
/// Command faults are resolved inside [`CommandDispatcher::dispatch`], so a
/// panic that escapes `run` is a contract violation.  The process is
/// aborted rather than left running without a dispatch loop.
///
/// # Errors
///
/// Returns the OS error if the thread cannot be spawned.
pub fn spawn_dispatch_thread(
    dispatcher: CommandDispatcher,
    events: Receiver<ServerEvent>,
) -> io::Result<JoinHandle<usize>> {
    thread::Builder::new()
        .name(DISPATCH_THREAD_NAME.to_string())
        .spawn(move || {
            match panic::catch_unwind(AssertUnwindSafe(move || dispatcher.run(events))) {
                Ok(executed) => executed,
                Err(payload) => {
                    error!(
                        "dispatch loop contract violation: {}; aborting",
                        panic_message(payload.as_ref())
                    );
                    process::abort();
                }
            }
        })
}

fn expect_args(command: &'static str, args: &[String], expected: usize) -> Result<(), CommandError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(CommandError::WrongArgumentCount {
            command,
            expected,
            got: args.len(),
        })
    }
}

fn parse_coordinate(command: &'static str, value: &str) -> Result<i32, CommandError> {
    value.parse::<i32>().map_err(|_| CommandError::InvalidArgument {
        command,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvm_core::domain::clipboard::{Clipboard, ClipboardFormat, MemoryClipboard};
    use kvm_core::domain::command::CommandOutcome;
    use std::sync::Mutex;
    use std::time::Duration;

    fn make_dispatcher(controller: MockScreenController) -> (CommandDispatcher, Arc<PluginFeedback>) {
        let mut screens = ScreenRegistry::new(ScreenState::local("master", 1920, 1080));
        screens.upsert(ScreenState::remote("laptop", 1440, 900));
        let feedback = Arc::new(PluginFeedback::new());
        let dispatcher = CommandDispatcher::new(
            screens,
            Arc::new(controller),
            Arc::clone(&feedback),
            Arc::new(ClipboardRegistry::new()),
        );
        (dispatcher, feedback)
    }

    /// A controller that must not be called at all.
    fn untouched() -> MockScreenController {
        let mut controller = MockScreenController::new();
        controller.expect_jump_to_screen().never();
        controller.expect_move_pointer().never();
        controller
    }

    fn expect_move(controller: &mut MockScreenController, screen: &'static str, x: i32, y: i32) {
        controller
            .expect_move_pointer()
            .withf(move |s, mx, my| s.name == screen && *mx == x && *my == y)
            .times(1)
            .returning(|_, _, _| Ok(()));
    }

    fn expect_jump(controller: &mut MockScreenController, screen: &'static str) {
        controller
            .expect_jump_to_screen()
            .withf(move |s| s.name == screen)
            .times(1)
            .returning(|_| Ok(()));
    }

    fn run(dispatcher: &mut CommandDispatcher, tokens: &[&str]) -> CommandOutcome {
        let envelope = CommandEnvelope::create(tokens.iter().copied());
        dispatcher.dispatch(&envelope);
        envelope.outcome()
    }

    // ── Built-ins ─────────────────────────────────────────────────────────────

    #[test]
    fn test_initial_active_screen_is_master() {
        let (dispatcher, _) = make_dispatcher(untouched());
        assert_eq!(dispatcher.active_screen(), "master");
    }

    #[test]
    fn test_move_xy_moves_pointer_on_active_screen() {
        // Arrange
        let mut controller = MockScreenController::new();
        expect_move(&mut controller, "master", 10, 20);
        let (mut dispatcher, _) = make_dispatcher(controller);

        // Act
        let outcome = run(&mut dispatcher, &["moveXY", "10", "20"]);

        // Assert
        assert_eq!(outcome, CommandOutcome::Succeeded("10 20".to_string()));
    }

    #[test]
    fn test_move_xy_accepts_negative_coordinates() {
        let mut controller = MockScreenController::new();
        expect_move(&mut controller, "master", -5, i32::MAX);
        let (mut dispatcher, _) = make_dispatcher(controller);

        let outcome = run(&mut dispatcher, &["moveXY", "-5", "2147483647"]);

        assert!(matches!(outcome, CommandOutcome::Succeeded(_)));
    }

    #[test]
    fn test_move_xy_wrong_argument_count() {
        let (mut dispatcher, _) = make_dispatcher(untouched());

        let outcome = run(&mut dispatcher, &["moveXY", "10"]);

        let expected = CommandError::WrongArgumentCount {
            command: CMD_MOVE_XY,
            expected: 2,
            got: 1,
        };
        assert_eq!(outcome, CommandOutcome::Failed(expected.to_string()));
    }

    #[test]
    fn test_move_xy_invalid_argument() {
        let (mut dispatcher, _) = make_dispatcher(untouched());

        let outcome = run(&mut dispatcher, &["moveXY", "ten", "20"]);

        let expected = CommandError::InvalidArgument {
            command: CMD_MOVE_XY,
            value: "ten".to_string(),
        };
        assert_eq!(outcome, CommandOutcome::Failed(expected.to_string()));
    }

    #[test]
    fn test_move_xy_out_of_range_is_invalid() {
        let (mut dispatcher, _) = make_dispatcher(untouched());

        let outcome = run(&mut dispatcher, &["moveXY", "0", "2147483648"]);

        assert!(matches!(outcome, CommandOutcome::Failed(msg) if msg.contains("2147483648")));
    }

    #[test]
    fn test_switch_to_unknown_screen_fails() {
        let (mut dispatcher, _) = make_dispatcher(untouched());

        let outcome = run(&mut dispatcher, &["switchToScreen", "doesNotExist"]);

        assert_eq!(
            outcome,
            CommandOutcome::Failed("screen not found: doesNotExist".to_string())
        );
        assert_eq!(dispatcher.active_screen(), "master");
    }

    #[test]
    fn test_switch_to_screen_activates_and_publishes_feedback() {
        // Arrange
        let mut controller = MockScreenController::new();
        expect_jump(&mut controller, "laptop");
        let (mut dispatcher, feedback) = make_dispatcher(controller);
        let published = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&published);
        feedback.screen_switched().add(move |name| {
            sink.lock().unwrap().push(name.clone());
            Ok(())
        });

        // Act
        let outcome = run(&mut dispatcher, &["switchToScreen", "laptop"]);

        // Assert
        assert_eq!(outcome, CommandOutcome::Succeeded("laptop".to_string()));
        assert_eq!(dispatcher.active_screen(), "laptop");
        assert_eq!(*published.lock().unwrap(), vec!["laptop"]);
    }

    #[test]
    fn test_move_after_switch_targets_new_screen() {
        let mut controller = MockScreenController::new();
        expect_jump(&mut controller, "laptop");
        expect_move(&mut controller, "laptop", 1, 2);
        let (mut dispatcher, _) = make_dispatcher(controller);

        run(&mut dispatcher, &["switchToScreen", "laptop"]);
        let outcome = run(&mut dispatcher, &["moveXY", "1", "2"]);

        assert_eq!(outcome, CommandOutcome::Succeeded("1 2".to_string()));
    }

    #[test]
    fn test_controller_error_fails_envelope_and_keeps_active_screen() {
        // Arrange
        let mut controller = MockScreenController::new();
        controller
            .expect_jump_to_screen()
            .withf(|screen| screen.name == "laptop")
            .times(1)
            .returning(|_| Err("session lost".to_string()));
        controller.expect_move_pointer().never();
        let (mut dispatcher, feedback) = make_dispatcher(controller);
        let published = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&published);
        feedback.screen_switched().add(move |_| {
            *sink.lock().unwrap() += 1;
            Ok(())
        });

        // Act
        let outcome = run(&mut dispatcher, &["switchToScreen", "laptop"]);

        // Assert
        assert_eq!(
            outcome,
            CommandOutcome::Failed("screen controller error: session lost".to_string())
        );
        assert_eq!(dispatcher.active_screen(), "master");
        assert_eq!(*published.lock().unwrap(), 0);
    }

    #[test]
    fn test_panic_in_controller_becomes_failure() {
        // Arrange
        let mut controller = MockScreenController::new();
        controller
            .expect_move_pointer()
            .times(1)
            .returning(|_, _, _| panic!("pointer device vanished"));
        expect_jump(&mut controller, "laptop");
        let (mut dispatcher, _) = make_dispatcher(controller);

        // Act
        let outcome = run(&mut dispatcher, &["moveXY", "1", "1"]);

        // Assert
        assert_eq!(
            outcome,
            CommandOutcome::Failed("pointer device vanished".to_string())
        );
        // The dispatcher keeps working afterwards.
        let next = run(&mut dispatcher, &["switchToScreen", "laptop"]);
        assert!(matches!(next, CommandOutcome::Succeeded(_)));
    }

    #[test]
    fn test_unknown_command_fails_with_name() {
        let (mut dispatcher, _) = make_dispatcher(untouched());

        let outcome = run(&mut dispatcher, &["selfDestruct", "now"]);

        assert_eq!(
            outcome,
            CommandOutcome::Failed("unknown command : selfDestruct".to_string())
        );
    }

    #[test]
    fn test_empty_envelope_is_unknown_command() {
        let (mut dispatcher, _) = make_dispatcher(untouched());

        let outcome = run(&mut dispatcher, &[]);

        assert_eq!(outcome, CommandOutcome::Failed("unknown command : ".to_string()));
    }

    #[test]
    fn test_dump_clipboards_reports_live_count() {
        // Arrange
        let clipboards = Arc::new(ClipboardRegistry::new());
        let mut first = MemoryClipboard::registered(&clipboards);
        first.open(1);
        first.empty();
        first.add(ClipboardFormat::Text, b"secret".to_vec()).unwrap();
        first.close();
        let _second = MemoryClipboard::registered(&clipboards);
        let mut dispatcher = CommandDispatcher::new(
            ScreenRegistry::new(ScreenState::local("master", 800, 600)),
            Arc::new(untouched()),
            Arc::new(PluginFeedback::new()),
            clipboards,
        );

        // Act
        let outcome = run(&mut dispatcher, &["dump_clipboards"]);

        // Assert
        assert_eq!(outcome, CommandOutcome::Succeeded("2".to_string()));
    }

    #[test]
    fn test_already_resolved_envelope_is_not_overwritten() {
        let mut controller = MockScreenController::new();
        expect_move(&mut controller, "master", 1, 1);
        let (mut dispatcher, _) = make_dispatcher(controller);
        let envelope = CommandEnvelope::create(["moveXY", "1", "1"]);
        envelope.fail("cancelled by plugin");

        dispatcher.dispatch(&envelope);

        assert_eq!(
            envelope.outcome(),
            CommandOutcome::Failed("cancelled by plugin".to_string())
        );
    }

    // ── Threading ─────────────────────────────────────────────────────────────

    #[test]
    fn test_dispatch_from_another_thread_panics() {
        let (mut dispatcher, _) = make_dispatcher(untouched());
        run(&mut dispatcher, &["dump_clipboards"]);

        let result = thread::spawn(move || {
            let envelope = CommandEnvelope::create(["dump_clipboards"]);
            dispatcher.dispatch(&envelope);
        })
        .join();

        assert!(result.is_err());
    }

    #[test]
    fn test_run_drains_queue_until_shutdown() {
        // Arrange
        let mut controller = MockScreenController::new();
        expect_jump(&mut controller, "laptop");
        expect_move(&mut controller, "laptop", 3, 4);
        let (dispatcher, _) = make_dispatcher(controller);
        let (submitter, events) = CommandSubmitter::channel();
        let first = Arc::new(CommandEnvelope::create(["switchToScreen", "laptop"]));
        let second = Arc::new(CommandEnvelope::create(["moveXY", "3", "4"]));

        // Act
        let worker = spawn_dispatch_thread(dispatcher, events).unwrap();
        assert!(submitter.submit(Arc::clone(&first)));
        assert!(submitter.submit(Arc::clone(&second)));
        let second_outcome = second.wait_resolved(Duration::from_secs(5));
        assert!(submitter.shutdown());
        let executed = worker.join().unwrap();

        // Assert
        assert_eq!(executed, 2);
        assert!(matches!(first.outcome(), CommandOutcome::Succeeded(_)));
        assert_eq!(second_outcome, Some(CommandOutcome::Succeeded("3 4".to_string())));
    }

    #[test]
    fn test_dispatch_thread_carries_its_name() {
        let (dispatcher, _) = make_dispatcher(untouched());
        let (submitter, events) = CommandSubmitter::channel();

        let worker = spawn_dispatch_thread(dispatcher, events).unwrap();

        assert_eq!(worker.thread().name(), Some(DISPATCH_THREAD_NAME));
        submitter.shutdown();
        assert_eq!(worker.join().unwrap(), 0);
    }

    #[test]
    fn test_submit_after_loop_stopped_fails_envelope() {
        let (submitter, events) = CommandSubmitter::channel();
        drop(events);
        let envelope = Arc::new(CommandEnvelope::create(["moveXY", "1", "1"]));

        let queued = submitter.submit(Arc::clone(&envelope));

        assert!(!queued);
        assert_eq!(
            envelope.outcome(),
            CommandOutcome::Failed(LOOP_NOT_RUNNING.to_string())
        );
    }
}
