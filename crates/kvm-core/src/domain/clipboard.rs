//! In-memory, multi-format clipboard model.
//!
//! Every peer in a sharing session keeps one clipboard per selection.  The
//! contents travel between peers through the codec in
//! [`crate::protocol::clipboard_codec`]; this module defines what is being
//! moved.
//!
//! # The open / empty / add / close bracket (for beginners)
//!
//! A clipboard is never read or written directly.  Callers first *open* it
//! at a logical time, and everything happens inside that bracket:
//!
//! ```text
//! open(t) ──► empty() ──► add(Text, ..) ──► add(Html, ..) ──► close()
//!             (claims ownership, latches t)
//! ```
//!
//! - `has` / `get` only answer while the clipboard is open.
//! - `add` is only accepted after `empty()` claimed ownership.
//! - A clipboard can only be opened once at a time.
//!
//! The bracket mirrors how platform clipboards work (you must own the
//! clipboard to write it) so peer implementations can be swapped behind the
//! [`Clipboard`] trait.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tracing::debug;

use crate::domain::clipboard_registry::{
    describe_contents, ClipboardDump, ClipboardId, ClipboardRegistry,
};

/// Logical clipboard timestamp in milliseconds from an arbitrary epoch.
///
/// Wraps around to 0 after roughly 49.7 days.
pub type ClipboardTime = u32;

/// Number of clipboard formats known to this build.
pub const FORMAT_COUNT: usize = 3;

/// The clipboard formats understood by every peer.
///
/// The numeric value is the `formatId` used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum ClipboardFormat {
    /// UTF-8 text, newlines are LF.
    Text = 0,
    /// Raw 24/32bpp pixel buffer without a file header.
    Bitmap = 1,
    /// UTF-8 HTML fragment, newlines are LF.
    Html = 2,
}

impl ClipboardFormat {
    /// All formats in ascending wire-id order.
    pub const ALL: [ClipboardFormat; FORMAT_COUNT] =
        [ClipboardFormat::Text, ClipboardFormat::Bitmap, ClipboardFormat::Html];

    /// Short label used in diagnostic dumps.
    pub fn label(self) -> &'static str {
        match self {
            ClipboardFormat::Text => "Text",
            ClipboardFormat::Bitmap => "Bitmap",
            ClipboardFormat::Html => "HTML",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u32> for ClipboardFormat {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ClipboardFormat::Text),
            1 => Ok(ClipboardFormat::Bitmap),
            2 => Ok(ClipboardFormat::Html),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ClipboardFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Errors returned when the open/empty/add bracket is violated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClipboardError {
    /// The clipboard must be opened first.
    #[error("clipboard is not open")]
    NotOpen,

    /// `empty()` must claim ownership in this bracket before `add()`.
    #[error("clipboard is not owned; call empty() first")]
    NotOwner,
}

/// Capability interface implemented by every clipboard variant.
///
/// Implementations hold no shared base state; the codec and the copy helper
/// work purely through these methods.
pub trait Clipboard {
    /// Opens the clipboard at `time`.  Returns `false` if it is already open.
    fn open(&mut self, time: ClipboardTime) -> bool;

    /// Closes the clipboard.  Closing an already-closed clipboard is a no-op.
    fn close(&mut self);

    /// Clears every format and claims ownership for the current bracket.
    ///
    /// Returns `false` when the clipboard is not open.
    fn empty(&mut self) -> bool;

    /// Stores `data` for `format`, replacing any previous value.
    fn add(&mut self, format: ClipboardFormat, data: Vec<u8>) -> Result<(), ClipboardError>;

    /// Returns `true` if `format` is present.  Always `false` while closed.
    fn has(&self, format: ClipboardFormat) -> bool;

    /// Returns a copy of the data for `format`, or `None` when absent or closed.
    fn get(&self, format: ClipboardFormat) -> Option<Vec<u8>>;

    /// Returns the time latched by the most recent successful `empty()`.
    fn time(&self) -> ClipboardTime;
}

// ── Memory clipboard ──────────────────────────────────────────────────────────

/// Mutable state behind a [`MemoryClipboard`].
#[derive(Debug, Default)]
pub(crate) struct ClipboardState {
    open: bool,
    time: ClipboardTime,
    owner: bool,
    time_owned: ClipboardTime,
    data: [Option<Vec<u8>>; FORMAT_COUNT],
}

impl ClipboardState {
    fn dump_line(&self) -> String {
        format!(
            " open:{} time:{} owner:{} timeOwned:{} {}",
            self.open,
            self.time,
            self.owner,
            self.time_owned,
            describe_contents(&self.data)
        )
    }
}

impl ClipboardDump for Mutex<ClipboardState> {
    fn kind(&self) -> &'static str {
        "MemoryClipboard"
    }

    fn dump_internals(&self) -> String {
        self.lock().unwrap_or_else(PoisonError::into_inner).dump_line()
    }
}

/// A clipboard that keeps its data in memory.
///
/// The state lives behind an `Arc<Mutex<_>>` so the diagnostic
/// [`ClipboardRegistry`] can hold a `Weak` reference to it.  When the
/// clipboard is dropped its registry slot is tombstoned first.
///
/// # Examples
///
/// ```rust
/// use kvm_core::domain::clipboard::{Clipboard, ClipboardFormat, MemoryClipboard};
///
/// let mut clipboard = MemoryClipboard::new();
/// assert!(clipboard.open(10));
/// assert!(clipboard.empty());
/// clipboard.add(ClipboardFormat::Text, b"hello".to_vec()).unwrap();
/// assert_eq!(clipboard.get(ClipboardFormat::Text), Some(b"hello".to_vec()));
/// clipboard.close();
/// assert_eq!(clipboard.time(), 10);
/// ```
pub struct MemoryClipboard {
    state: Arc<Mutex<ClipboardState>>,
    registration: Option<(ClipboardId, Arc<ClipboardRegistry>)>,
}

impl MemoryClipboard {
    /// Creates an unregistered clipboard: closed, owned, no formats, time 0.
    pub fn new() -> Self {
        let mut clipboard = Self {
            state: Arc::new(Mutex::new(ClipboardState::default())),
            registration: None,
        };
        clipboard.open(0);
        clipboard.empty();
        clipboard.close();
        clipboard
    }

    /// Creates a clipboard and records it in `registry` for diagnostic dumps.
    pub fn registered(registry: &Arc<ClipboardRegistry>) -> Self {
        let mut clipboard = Self::new();
        let weak: Weak<dyn ClipboardDump> = Arc::downgrade(&clipboard.state) as Weak<dyn ClipboardDump>;
        let id = registry.register(weak);
        clipboard.registration = Some((id, Arc::clone(registry)));
        clipboard
    }

    /// Returns the registry id, if this clipboard is registered.
    pub fn registry_id(&self) -> Option<ClipboardId> {
        self.registration.as_ref().map(|(id, _)| *id)
    }

    /// Returns `true` while an open bracket is in progress.
    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    fn lock(&self) -> MutexGuard<'_, ClipboardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryClipboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryClipboard")
            .field("id", &self.registry_id())
            .field("state", &self.lock().dump_line())
            .finish()
    }
}

impl Drop for MemoryClipboard {
    fn drop(&mut self) {
        if let Some((id, registry)) = self.registration.take() {
            registry.release(id);
        }
    }
}

impl Clipboard for MemoryClipboard {
    fn open(&mut self, time: ClipboardTime) -> bool {
        let mut state = self.lock();
        if state.open {
            debug!("clipboard open({time}) refused: already open");
            return false;
        }
        state.open = true;
        state.time = time;
        state.owner = false;
        true
    }

    fn close(&mut self) {
        let mut state = self.lock();
        if !state.open {
            debug!("clipboard close() on a closed clipboard ignored");
            return;
        }
        state.open = false;
    }

    fn empty(&mut self) -> bool {
        let mut state = self.lock();
        if !state.open {
            return false;
        }
        state.data = Default::default();
        state.time_owned = state.time;
        state.owner = true;
        true
    }

    fn add(&mut self, format: ClipboardFormat, data: Vec<u8>) -> Result<(), ClipboardError> {
        let mut state = self.lock();
        if !state.open {
            return Err(ClipboardError::NotOpen);
        }
        if !state.owner {
            return Err(ClipboardError::NotOwner);
        }
        state.data[format.index()] = Some(data);
        Ok(())
    }

    fn has(&self, format: ClipboardFormat) -> bool {
        let state = self.lock();
        state.open && state.data[format.index()].is_some()
    }

    fn get(&self, format: ClipboardFormat) -> Option<Vec<u8>> {
        let state = self.lock();
        if !state.open {
            return None;
        }
        state.data[format.index()].clone()
    }

    fn time(&self) -> ClipboardTime {
        self.lock().time_owned
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
