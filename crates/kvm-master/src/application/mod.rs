//! Application layer use cases for the master application.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules) and the infrastructure (OS/pipes/storage).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a user goal (e.g., "a plugin
//!   asked to switch to the laptop screen").
//! - **Depend on abstractions** (traits) rather than concrete implementations,
//!   so the infrastructure can be swapped without changing this code.
//! - **Contain no OS calls and no file system access**.
//!
//! # Sub-modules
//!
//! - **`dispatch_command`** – Executes plugin commands on the single dispatch
//!   thread and publishes the resulting feedback.
//!
//! - **`manage_screens`** – Maintains the in-memory registry of all known
//!   screens, keyed by the names plugins use.

pub mod dispatch_command;
pub mod manage_screens;
