//! Diagnostic registry of live clipboards.
//!
//! The registry exists so an operator can ask the master to "dump every
//! clipboard" while tracking down a sync problem.  It never owns a
//! clipboard: each slot holds a `Weak` reference, and the slot index is a
//! stable [`ClipboardId`] issued at construction.
//!
//! # Arena + tombstone
//!
//! ```text
//! slots: [ tombstone | Some(weak #1) | tombstone (#2 dropped) | Some(weak #3) ]
//!            id 0          id 1               id 2                 id 3
//! ```
//!
//! Ids are never reused and slots are never compacted, so an id seen in one
//! dump always refers to the same clipboard.  Enumeration upgrades each
//! `Weak` under the slot lock and formats outside it; a clipboard dropped
//! concurrently is either skipped or kept alive until its line is written.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::domain::clipboard::{ClipboardFormat, FORMAT_COUNT};

/// Maximum number of content bytes shown per format in a dump.
pub const PREVIEW_LEN: usize = 20;

/// Stable identifier of a registered clipboard.  The first id issued is 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipboardId(pub usize);

impl fmt::Display for ClipboardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that can describe its internals for a diagnostic dump.
pub trait ClipboardDump: Send + Sync {
    /// Name of the concrete clipboard variant.
    fn kind(&self) -> &'static str;

    /// One-line description of flags, times, and a redacted content preview.
    fn dump_internals(&self) -> String;
}

/// One line of a registry dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardDumpEntry {
    pub id: ClipboardId,
    pub kind: &'static str,
    pub internals: String,
}

impl fmt::Display for ClipboardDumpEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " {} ({}) : {}", self.id, self.kind, self.internals)
    }
}

/// Process-wide table of non-owning clipboard references.
///
/// Create one per process (the master keeps it in an `Arc` next to the
/// dispatcher) and hand it to [`crate::domain::clipboard::MemoryClipboard::registered`].
pub struct ClipboardRegistry {
    slots: Mutex<Vec<Option<Weak<dyn ClipboardDump>>>>,
}

impl ClipboardRegistry {
    /// Creates an empty registry.  Slot 0 is a permanent tombstone.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![None]),
        }
    }

    /// Records `clipboard` and returns its new id.
    pub fn register(&self, clipboard: Weak<dyn ClipboardDump>) -> ClipboardId {
        let mut slots = self.slots();
        let id = ClipboardId(slots.len());
        slots.push(Some(clipboard));
        id
    }

    /// Tombstones the slot for `id`.  Unknown ids are ignored.
    pub fn release(&self, id: ClipboardId) {
        if let Some(slot) = self.slots().get_mut(id.0) {
            *slot = None;
        }
    }

    /// Number of registered clipboards that are still alive.
    pub fn live_count(&self) -> usize {
        self.slots()
            .iter()
            .flatten()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Number of ids issued so far, including released ones.
    pub fn issued_count(&self) -> usize {
        self.slots().len() - 1
    }

    /// Describes every live clipboard in id order.
    pub fn dump(&self) -> Vec<ClipboardDumpEntry> {
        let live: Vec<(ClipboardId, Arc<dyn ClipboardDump>)> = self
            .slots()
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let strong = slot.as_ref()?.upgrade()?;
                Some((ClipboardId(index), strong))
            })
            .collect();

        live.into_iter()
            .map(|(id, clipboard)| ClipboardDumpEntry {
                id,
                kind: clipboard.kind(),
                internals: clipboard.dump_internals(),
            })
            .collect()
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Option<Weak<dyn ClipboardDump>>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ClipboardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ── Dump formatting ───────────────────────────────────────────────────────────

/// Formats the present formats as `{{Text:"..."},{Bitmap},}`.
///
/// Bitmap contents are never shown.
pub fn describe_contents(data: &[Option<Vec<u8>>; FORMAT_COUNT]) -> String {
    let mut out = String::from("{");
    for format in ClipboardFormat::ALL {
        let Some(bytes) = &data[format as usize] else {
            continue;
        };
        out.push('{');
        out.push_str(format.label());
        if format != ClipboardFormat::Bitmap {
            out.push(':');
            out.push_str(&escape_preview(bytes, PREVIEW_LEN));
        }
        out.push_str("},");
    }
    out.push('}');
    out
}

/// Quotes and escapes at most `max` bytes of `bytes`; `max == 0` means all.
///
/// Appends `...` inside the quotes when the input was truncated.
pub fn escape_preview(bytes: &[u8], max: usize) -> String {
    let shown = if max == 0 { bytes.len() } else { bytes.len().min(max) };
    let mut out = String::with_capacity(shown + 2);
    out.push('"');
    for &b in &bytes[..shown] {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'"' => out.push_str("\\\""),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\x{b:02x}")),
        }
    }
    if bytes.len() > shown {
        out.push_str("...");
    }
    out.push('"');
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
