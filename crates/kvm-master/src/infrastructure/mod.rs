//! Infrastructure layer for the master application.
//!
//! Contains OS-facing adapters: the named-pipe plugin bridge, screen/session
//! control, and file-system storage.
//!
//! **Dependency rule**: this layer may depend on `application` and `kvm_core`,
//! but MUST NOT be imported by the `application` or domain layers.

pub mod plugin_bridge;
pub mod screen_control;
pub mod storage;
