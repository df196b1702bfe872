//! Binary codec that moves clipboard contents between peer clipboards.
//!
//! Wire format:
//! ```text
//! [format_count:4] { [format_id:4][length:4][payload:length] } * format_count
//! ```
//! All integers are unsigned 32-bit big-endian with no padding.  Formats are
//! written in ascending id order (Text=0, Bitmap=1, HTML=2).
//!
//! # Forward compatibility
//!
//! A peer built with more clipboard formats may send ids this build does not
//! know.  Their payload bytes are consumed and discarded so the following
//! triples stay aligned.
//!
//! # Truncated input
//!
//! The whole frame is validated before the target clipboard is touched.  A
//! frame whose count, triple header, or payload runs past the end of the
//! buffer is rejected with [`ClipboardCodecError::Truncated`] and the
//! clipboard keeps its previous contents.

use thiserror::Error;
use tracing::debug;

use crate::domain::clipboard::{Clipboard, ClipboardFormat, ClipboardTime};

/// Time used when `marshall` opens the source clipboard.
pub const MARSHALL_TIME: ClipboardTime = 0;

/// Errors that can occur while decoding a clipboard frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClipboardCodecError {
    /// The buffer ended before a declared field or payload.
    #[error("truncated clipboard frame: {context} needs {needed} bytes, {available} available")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    /// A declared payload length overflows the frame offset.
    #[error("clipboard payload length {0} overflows the frame offset")]
    LengthOverflow(usize),
}

/// One `(format_id, payload)` triple read from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatEntry<'a> {
    pub format_id: u32,
    pub payload: &'a [u8],
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Serialises every present format of `clipboard`.
///
/// Opens the clipboard at [`MARSHALL_TIME`] and closes it before returning.
/// If the clipboard cannot be opened (it is already open) the result is an
/// empty buffer.  Payloads longer than `u32::MAX` bytes are skipped.
///
/// # Examples
///
/// ```rust
/// use kvm_core::domain::clipboard::{Clipboard, ClipboardFormat, MemoryClipboard};
/// use kvm_core::protocol::clipboard_codec::marshall;
///
/// let mut clipboard = MemoryClipboard::new();
/// clipboard.open(0);
/// clipboard.empty();
/// clipboard.add(ClipboardFormat::Text, b"hi".to_vec()).unwrap();
/// clipboard.close();
///
/// assert_eq!(marshall(&mut clipboard), [0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 2, b'h', b'i']);
/// ```
pub fn marshall(clipboard: &mut dyn Clipboard) -> Vec<u8> {
    if !clipboard.open(MARSHALL_TIME) {
        debug!("marshall: clipboard already open, nothing written");
        return Vec::new();
    }

    let present: Vec<(ClipboardFormat, Vec<u8>)> = ClipboardFormat::ALL
        .into_iter()
        .filter_map(|format| clipboard.get(format).map(|data| (format, data)))
        .filter(|(format, data)| {
            let fits = u32::try_from(data.len()).is_ok();
            if !fits {
                debug!("marshall: {format} payload of {} bytes skipped", data.len());
            }
            fits
        })
        .collect();
    clipboard.close();

    let size = 4 + present.iter().map(|(_, data)| 8 + data.len()).sum::<usize>();
    let mut buf = Vec::with_capacity(size);
    write_u32(&mut buf, present.len() as u32);
    for (format, data) in &present {
        write_u32(&mut buf, *format as u32);
        write_u32(&mut buf, data.len() as u32);
        buf.extend_from_slice(data);
    }
    buf
}

/// Replaces the contents of `clipboard` with the formats encoded in `bytes`.
///
/// Returns `Ok(true)` when the clipboard was updated and `Ok(false)` when it
/// could not be opened (a silent no-op; the clipboard is left untouched).
///
/// # Errors
///
/// Returns [`ClipboardCodecError::Truncated`] if the frame is shorter than it
/// declares.  The clipboard is not opened in that case.
pub fn unmarshall(
    clipboard: &mut dyn Clipboard,
    bytes: &[u8],
    time: ClipboardTime,
) -> Result<bool, ClipboardCodecError> {
    let entries = decode_frame(bytes)?;

    if !clipboard.open(time) {
        debug!("unmarshall: clipboard already open, frame ignored");
        return Ok(false);
    }
    clipboard.empty();
    for entry in entries {
        match ClipboardFormat::try_from(entry.format_id) {
            Ok(format) => {
                // The clipboard is open and owned, so add cannot be refused.
                if let Err(e) = clipboard.add(format, entry.payload.to_vec()) {
                    debug!("unmarshall: {format} not stored: {e}");
                }
            }
            Err(()) => debug!(
                "unmarshall: skipped unknown format id {} ({} bytes)",
                entry.format_id,
                entry.payload.len()
            ),
        }
    }
    clipboard.close();
    Ok(true)
}

/// Copies every present format from `src` into `dst` at `src.time()`.
///
/// See [`copy_at`].
pub fn copy(dst: &mut dyn Clipboard, src: &mut dyn Clipboard) -> bool {
    let time = src.time();
    copy_at(dst, src, time)
}

/// Copies every present format from `src` into `dst`, opening both at `time`.
///
/// The copy only runs if both clipboards open and `dst.empty()` succeeds.
/// Whatever was opened is closed again before returning.  Returns whether
/// the copy executed.
///
/// The result is identical to `unmarshall(dst, &marshall(src), time)`.
pub fn copy_at(dst: &mut dyn Clipboard, src: &mut dyn Clipboard, time: ClipboardTime) -> bool {
    if !src.open(time) {
        return false;
    }

    let mut copied = false;
    if dst.open(time) {
        if dst.empty() {
            for format in ClipboardFormat::ALL {
                if let Some(data) = src.get(format) {
                    if let Err(e) = dst.add(format, data) {
                        debug!("copy: {format} not stored: {e}");
                    }
                }
            }
            copied = true;
        }
        dst.close();
    }
    src.close();
    copied
}

/// Parses and validates a complete frame without touching any clipboard.
///
/// Trailing bytes after the last declared triple are ignored.
///
/// # Errors
///
/// Returns [`ClipboardCodecError::Truncated`] if any declared field or
/// payload runs past the end of `bytes`.
pub fn decode_frame(bytes: &[u8]) -> Result<Vec<FormatEntry<'_>>, ClipboardCodecError> {
    let count = read_u32(bytes, 0, "format count")?;
    let mut off = 4;
    // Every triple is at least 8 bytes, which bounds the pre-allocation.
    let mut entries = Vec::with_capacity((count as usize).min(bytes.len() / 8));

    for _ in 0..count {
        let format_id = read_u32(bytes, off, "format id")?;
        let length = read_u32(bytes, off + 4, "payload length")? as usize;
        off += 8;
        let end = off.checked_add(length).ok_or(ClipboardCodecError::LengthOverflow(length))?;
        if bytes.len() < end {
            return Err(ClipboardCodecError::Truncated {
                context: "payload",
                needed: end,
                available: bytes.len(),
            });
        }
        entries.push(FormatEntry {
            format_id,
            payload: &bytes[off..end],
        });
        off = end;
    }

    if off < bytes.len() {
        debug!("clipboard frame has {} trailing bytes, ignored", bytes.len() - off);
    }
    Ok(entries)
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn read_u32(buf: &[u8], offset: usize, context: &'static str) -> Result<u32, ClipboardCodecError> {
    if buf.len() < offset + 4 {
        return Err(ClipboardCodecError::Truncated {
            context,
            needed: offset + 4,
            available: buf.len(),
        });
    }
    Ok(u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
