//! Named-pipe plugin bridge.
//!
//! Lets an external process drive the master by writing text commands into
//! a FIFO, and tells it about screen switches through a second FIFO of its
//! choosing.
//!
//! # Lifecycle (for beginners)
//!
//! ```text
//! init()        ──►  Created
//! init_event()  ──►  Initialized   (input FIFO open, worker spawned, feedback subscribed)
//! worker starts ──►  Running       (poll + read + parse + submit)
//! cleanup()     ──►  CleaningUp ──► Stopped
//! ```
//!
//! # Threads
//!
//! The `kvm-pipe-bridge` worker is the only reader of the input FIFO.  It
//! turns each line into a [`CommandEnvelope`] and hands it to the
//! [`CommandSubmitter`]; it never executes commands itself.  Notifications
//! are written from the dispatch thread by the `screenSwitched` callback.
//! The output FIFO is shared between the two behind a mutex.
//!
//! The worker waits on `poll(2)` for at most `poll_interval` per iteration,
//! so `cleanup` returns within roughly one interval.  A read may end in the
//! middle of a line; the unterminated tail waits for the next read.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kvm_core::domain::command::CommandEnvelope;
use kvm_core::domain::feedback::{CallbackResult, PluginFeedback, SubscriptionHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::dispatch_command::CommandSubmitter;

pub mod line_protocol;
pub mod named_pipe;

use line_protocol::{LineAssembler, PipeCommand};
use named_pipe::{NamedPipe, PipeError};

/// Name reported by the `version` metadata query.
pub const PLUGIN_NAME: &str = "kvm-pipe-control";
/// Version reported by the `version` metadata query.
pub const PLUGIN_VERSION: &str = "1.0.0";
/// Well-known input FIFO path.
pub const DEFAULT_INPUT_PIPE: &str = "/tmp/KvmPipeControl";
/// Upper bound on one worker wait, and so on shutdown latency.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Worker thread name.
pub const WORKER_THREAD_NAME: &str = "kvm-pipe-bridge";

const READ_BUF_SIZE: usize = 1024;

/// Returns `"<name> <version>"`.  Usable before any bridge exists.
pub fn plugin_version() -> String {
    format!("{PLUGIN_NAME} {PLUGIN_VERSION}")
}

/// Runtime settings for [`PluginBridge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub input_pipe: PathBuf,
    pub poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            input_pipe: PathBuf::from(DEFAULT_INPUT_PIPE),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Lifecycle state of a [`PluginBridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    Initialized,
    Running,
    CleaningUp,
    Stopped,
}

/// Error type for bridge start-up.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("plugin pipe error: {0}")]
    Pipe(#[from] PipeError),
    #[error("failed to spawn {WORKER_THREAD_NAME} thread: {0}")]
    Spawn(#[source] io::Error),
}

/// The plugin host side of the named-pipe control protocol.
pub struct PluginBridge {
    config: BridgeConfig,
    state: Arc<Mutex<BridgeState>>,
    running: Arc<AtomicBool>,
    output: Arc<Mutex<NamedPipe>>,
    worker: Option<JoinHandle<()>>,
    subscription: Option<(Arc<PluginFeedback>, SubscriptionHandle)>,
}

impl PluginBridge {
    /// Binds the bridge to its input FIFO path.  Nothing is opened yet.
    pub fn init(config: BridgeConfig) -> Self {
        info!(
            "plugin bridge {} bound to {}",
            plugin_version(),
            config.input_pipe.display()
        );
        Self {
            config,
            state: Arc::new(Mutex::new(BridgeState::Created)),
            running: Arc::new(AtomicBool::new(false)),
            output: Arc::new(Mutex::new(NamedPipe::new())),
            worker: None,
            subscription: None,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> BridgeState {
        *lock(&self.state)
    }

    /// Opens the input FIFO, starts the worker and subscribes to screen switches.
    ///
    /// # Panics
    ///
    /// Panics unless the bridge is in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] if the FIFO cannot be opened or the worker
    /// cannot be spawned; the bridge then stays `Created`.
    pub fn init_event(
        &mut self,
        submitter: CommandSubmitter,
        feedback: Arc<PluginFeedback>,
    ) -> Result<(), BridgeError> {
        let state = self.state();
        assert_eq!(
            state,
            BridgeState::Created,
            "init_event called on a plugin bridge in state {state:?}"
        );

        let mut input = NamedPipe::new();
        input.open(&self.config.input_pipe)?;

        self.running.store(true, Ordering::Release);
        *lock(&self.state) = BridgeState::Initialized;

        let worker = PipeWorker {
            input,
            submitter,
            output: Arc::clone(&self.output),
            running: Arc::clone(&self.running),
            state: Arc::clone(&self.state),
            poll_interval: self.config.poll_interval,
            lines: LineAssembler::new(),
        };
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                *lock(&self.state) = BridgeState::Created;
                BridgeError::Spawn(e)
            })?;
        self.worker = Some(handle);

        let output = Arc::clone(&self.output);
        let subscription = feedback
            .screen_switched()
            .add(move |screen: &String| notify_screen_switched(&output, screen));
        self.subscription = Some((feedback, subscription));

        info!("plugin bridge initialised");
        Ok(())
    }

    /// Answers a synchronous metadata query.
    ///
    /// `version` works in any state.  Any other command before
    /// [`init_event`](Self::init_event) is a contract violation and panics;
    /// afterwards unrecognised queries return `None`.
    pub fn invoke(&self, command: &str, args: &[String]) -> Option<String> {
        if command == "version" {
            return Some(plugin_version());
        }
        let state = self.state();
        assert_ne!(
            state,
            BridgeState::Created,
            "plugin bridge invoked with '{command}' before init_event"
        );
        debug!("unrecognised plugin metadata query '{command}' {args:?}");
        None
    }

    /// Unsubscribes, stops and joins the worker, and closes both FIFOs.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn cleanup(&mut self) {
        match self.state() {
            BridgeState::Stopped | BridgeState::CleaningUp => return,
            BridgeState::Created => {
                *lock(&self.state) = BridgeState::Stopped;
                return;
            }
            BridgeState::Initialized | BridgeState::Running => {}
        }
        *lock(&self.state) = BridgeState::CleaningUp;

        if let Some((feedback, handle)) = self.subscription.take() {
            feedback.screen_switched().remove(handle);
        }
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("{WORKER_THREAD_NAME} thread panicked");
            }
        }
        lock(&self.output).close();

        *lock(&self.state) = BridgeState::Stopped;
        info!("plugin bridge stopped");
    }
}

impl Drop for PluginBridge {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Feedback callback: writes a notification line if the output FIFO is open.
fn notify_screen_switched(output: &Mutex<NamedPipe>, screen: &str) -> CallbackResult {
    let mut pipe = lock(output);
    if !pipe.is_open() {
        debug!("no notify pipe open; dropping switchedToScreen {screen}");
        return Ok(());
    }
    let line = format!("switchedToScreen {screen}\n");
    let written = pipe.write_str(&line)?;
    if written < line.len() {
        warn!(
            "notify pipe full; wrote {written} of {} bytes for switchedToScreen {screen}",
            line.len()
        );
    }
    Ok(())
}

/// State moved onto the worker thread.
struct PipeWorker {
    input: NamedPipe,
    submitter: CommandSubmitter,
    output: Arc<Mutex<NamedPipe>>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<BridgeState>>,
    poll_interval: Duration,
    lines: LineAssembler,
}

impl PipeWorker {
    fn run(mut self) {
        {
            let mut state = lock(&self.state);
            if *state == BridgeState::Initialized {
                *state = BridgeState::Running;
            }
        }
        if let Some(path) = self.input.path() {
            info!("plugin bridge listening on {}", path.display());
        }

        let mut buf = [0u8; READ_BUF_SIZE];
        while self.running.load(Ordering::Acquire) {
            match self.input.read_ready(&mut buf, self.poll_interval) {
                Ok(0) => {}
                Ok(n) => {
                    for command in self.lines.push(&buf[..n]) {
                        self.handle_command(command);
                    }
                }
                Err(e) => {
                    error!("plugin pipe read failed: {e}");
                    thread::sleep(self.poll_interval);
                }
            }
        }

        self.input.close();
        info!("{WORKER_THREAD_NAME} exiting");
    }

    fn handle_command(&self, command: PipeCommand) {
        match command {
            PipeCommand::OpenNotifyPipe(path) => match lock(&self.output).open(&path) {
                Ok(()) => info!("notify pipe opened at {}", path.display()),
                Err(e) => error!("cannot open notify pipe: {e}"),
            },
            PipeCommand::Submit(tokens) => {
                debug!("pipe command {tokens:?}");
                self.submitter
                    .submit(Arc::new(CommandEnvelope::create(tokens)));
            }
        }
    }
}
