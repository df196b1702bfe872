//! Mock screen controller for unit and integration testing.
//!
//! Records every request so tests can assert on what the dispatcher asked
//! for, without a display or a client session.

use std::sync::Mutex;

use super::ScreenController;
use crate::application::manage_screens::ScreenState;

/// One request received by [`MockScreenController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenCall {
    Jump(String),
    Move(String, i32, i32),
}

/// A [`ScreenController`] that records calls and can inject failures.
#[derive(Debug, Default)]
pub struct MockScreenController {
    calls: Mutex<Vec<ScreenCall>>,
    failure: Mutex<Option<String>>,
}

impl MockScreenController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following call fail with `message`; `None` clears it.
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.lock().expect("lock poisoned") = message.map(str::to_string);
    }

    /// Returns all recorded calls in order.
    pub fn calls(&self) -> Vec<ScreenCall> {
        self.calls.lock().expect("lock poisoned").clone()
    }

    fn record(&self, call: ScreenCall) -> Result<(), String> {
        if let Some(message) = self.failure.lock().expect("lock poisoned").clone() {
            return Err(message);
        }
        self.calls.lock().expect("lock poisoned").push(call);
        Ok(())
    }
}

impl ScreenController for MockScreenController {
    fn jump_to_screen(&self, screen: &ScreenState) -> Result<(), String> {
        self.record(ScreenCall::Jump(screen.name.clone()))
    }

    fn move_pointer(&self, screen: &ScreenState, x: i32, y: i32) -> Result<(), String> {
        self.record(ScreenCall::Move(screen.name.clone(), x, y))
    }
}
