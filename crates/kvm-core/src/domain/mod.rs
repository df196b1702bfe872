//! Domain entities for KVM-Over-IP.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain** (or "entities" layer).  Domain code:
//!
//! - Contains the core business rules of the application.
//! - Has **no** imports from OS APIs, network libraries, database drivers, or UI
//!   frameworks.
//! - Can be compiled and tested on any platform without any external setup.
//!
//! Code in outer layers (infrastructure, application) depends on the domain,
//! but the domain never depends on them.  Here that means a clipboard knows
//! nothing about pipes, and a feedback channel knows nothing about who is
//! listening.

/// In-memory clipboard and the capability trait every clipboard implements.
///
/// See [`clipboard::MemoryClipboard`] for the main type.
pub mod clipboard;
pub mod clipboard_registry;
/// Plugin-issued commands and their one-shot results.
pub mod command;
/// Typed feedback channels published to plugins.
pub mod feedback;
