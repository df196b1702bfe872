//! Protocol module containing the clipboard wire codec.

pub mod clipboard_codec;

pub use clipboard_codec::{copy, copy_at, decode_frame, marshall, unmarshall, ClipboardCodecError};
