//! Screen/session adapters used by the command dispatcher.
//!
//! The master does not own a session layer of its own yet, so the shipped
//! [`LoggingScreenController`] only records where input would go and logs
//! it.  A platform session backend implements the same
//! [`ScreenController`] trait and is injected in its place.
//!
//! # Testability
//!
//! [`mock::MockScreenController`] records every call and can be told to
//! fail, so dispatcher tests never need a real display.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::application::dispatch_command::ScreenController;
use crate::application::manage_screens::ScreenState;

pub mod mock;

/// Last position handed to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PointerPosition {
    pub screen: String,
    pub x: i32,
    pub y: i32,
}

/// A [`ScreenController`] that logs each request and remembers the result.
#[derive(Debug, Default)]
pub struct LoggingScreenController {
    pointer: Mutex<PointerPosition>,
}

impl LoggingScreenController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The screen and coordinates of the most recent request.
    pub fn pointer(&self) -> PointerPosition {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, PointerPosition> {
        self.pointer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ScreenController for LoggingScreenController {
    fn jump_to_screen(&self, screen: &ScreenState) -> Result<(), String> {
        // Entering a screen puts the pointer at its centre.
        let (x, y) = ((screen.width / 2) as i32, (screen.height / 2) as i32);
        info!(
            "jump to {:?} screen {} ({}x{}, id {}) at {x},{y}",
            screen.kind, screen.name, screen.width, screen.height, screen.id
        );
        *self.lock() = PointerPosition {
            screen: screen.name.clone(),
            x,
            y,
        };
        Ok(())
    }

    fn move_pointer(&self, screen: &ScreenState, x: i32, y: i32) -> Result<(), String> {
        info!("move pointer on {} to {x},{y}", screen.name);
        *self.lock() = PointerPosition {
            screen: screen.name.clone(),
            x,
            y,
        };
        Ok(())
    }
}
