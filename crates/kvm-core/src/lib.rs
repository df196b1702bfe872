//! # kvm-core
//!
//! Shared library for KVM-Over-IP containing the clipboard model and its
//! wire codec, plus the plugin command and feedback types the master uses
//! to talk to external plugins.
//!
//! It has zero dependencies on OS APIs, UI frameworks, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! KVM-Over-IP is a software KVM switch: one keyboard and mouse attached to
//! the "master" drive several screens, and clipboard contents follow the
//! user from screen to screen.  External plugins may steer the master.
//!
//! This crate (`kvm-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How clipboard contents travel between peers.  A
//!   clipboard is marshalled into a compact big-endian frame
//!   (`count`, then `id, length, bytes` per format) and unmarshalled on the
//!   other end.
//!
//! - **`domain`** – Pure business logic with no OS dependencies: the
//!   `Clipboard` trait and `MemoryClipboard`, the diagnostic clipboard
//!   registry, plugin `CommandEnvelope`s and typed `FeedbackChannel`s.

// Rust looks for each module in a subdirectory with the same name
// (e.g., src/protocol/mod.rs).
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `kvm_core::MemoryClipboard` instead of `kvm_core::domain::clipboard::MemoryClipboard`.
pub use domain::clipboard::{Clipboard, ClipboardError, ClipboardFormat, MemoryClipboard};
pub use domain::clipboard_registry::{ClipboardId, ClipboardRegistry};
pub use domain::command::{CommandEnvelope, CommandOutcome};
pub use domain::feedback::{FeedbackChannel, PluginFeedback, SubscriptionHandle};
pub use protocol::clipboard_codec::{copy, copy_at, marshall, unmarshall, ClipboardCodecError};
