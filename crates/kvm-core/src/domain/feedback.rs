//! Typed publish/subscribe channels that tell plugins what the server did.
//!
//! # How feedback flows (for beginners)
//!
//! The server never calls plugin code directly.  Instead it *publishes* an
//! occurrence on a named channel, and every plugin that *subscribed* to that
//! channel has its callback run with the value:
//!
//! ```text
//! dispatch thread                       plugin bridge
//! ───────────────                       ─────────────
//! screen_switched().invoke("laptop") ─► callback("laptop")
//!                                         └─ writes "switchedToScreen laptop\n"
//! ```
//!
//! Callbacks run synchronously on the publisher's thread.  A slow callback
//! therefore stalls the publisher; subscribers must hand heavy work off.
//!
//! # Fault isolation
//!
//! A callback that returns an error or panics is logged with the channel
//! name and skipped.  The remaining callbacks still run and the publisher
//! never sees the fault.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

/// Result type returned by feedback callbacks.
pub type CallbackResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback<T> = Arc<dyn Fn(&T) -> CallbackResult + Send + Sync>;

/// Handle returned by [`FeedbackChannel::add`]; pass it to `remove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// The numeric subscription id.  Ids increase per channel and are never reused.
    pub fn id(self) -> u64 {
        self.0
    }
}

/// A named, ordered list of subscriber callbacks for values of type `T`.
pub struct FeedbackChannel<T> {
    name: String,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(SubscriptionHandle, Callback<T>)>>,
}

impl<T> FeedbackChannel<T> {
    /// Creates an empty channel.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// The channel name used in log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes `callback` and returns its handle.
    pub fn add<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(&T) -> CallbackResult + Send + Sync + 'static,
    {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks().push((handle, Arc::new(callback)));
        debug!("feedback channel {}: subscription {} added", self.name, handle.0);
        handle
    }

    /// Unsubscribes `handle`.  Unknown or already-removed handles are ignored.
    pub fn remove(&self, handle: SubscriptionHandle) {
        let mut callbacks = self.callbacks();
        let before = callbacks.len();
        callbacks.retain(|(h, _)| *h != handle);
        if callbacks.len() != before {
            debug!("feedback channel {}: subscription {} removed", self.name, handle.0);
        }
    }

    /// Number of current subscriptions.
    pub fn len(&self) -> usize {
        self.callbacks().len()
    }

    /// Returns `true` when nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every current callback with `value` in subscription order.
    ///
    /// Callbacks run outside the channel lock, so a callback may add or
    /// remove subscriptions.  Returns the number of callbacks that faulted.
    pub fn invoke(&self, value: &T) -> usize {
        let snapshot: Vec<(SubscriptionHandle, Callback<T>)> = self.callbacks().clone();

        snapshot.iter().fold(0, |faults, (handle, callback)| {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(Ok(())) => faults,
                Ok(Err(e)) => {
                    warn!(
                        "plugin feedback invoke channel {} subscription {} failed: {e}",
                        self.name, handle.0
                    );
                    faults + 1
                }
                Err(payload) => {
                    warn!(
                        "plugin feedback invoke channel {} subscription {} panicked: {}",
                        self.name,
                        handle.0,
                        panic_message(payload.as_ref())
                    );
                    faults + 1
                }
            }
        })
    }

    fn callbacks(&self) -> MutexGuard<'_, Vec<(SubscriptionHandle, Callback<T>)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Extracts the message from a panic payload, if it is a string.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Feedback hub ──────────────────────────────────────────────────────────────

/// Every feedback point the server publishes to plugins.
///
/// Each occurrence kind gets its own named channel; payload types are never
/// widened to carry a second kind.
pub struct PluginFeedback {
    screen_switched: FeedbackChannel<String>,
}

impl PluginFeedback {
    /// Creates the hub with all channels empty.
    pub fn new() -> Self {
        Self {
            screen_switched: FeedbackChannel::new("screenSwitched"),
        }
    }

    /// Published with the screen name after the active screen changes.
    pub fn screen_switched(&self) -> &FeedbackChannel<String> {
        &self.screen_switched
    }
}

impl Default for PluginFeedback {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str, &String) + Clone) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let record = move |tag: &str, value: &String| {
            sink.lock().unwrap().push(format!("{tag}:{value}"));
        };
        (log, record)
    }

    #[test]
    fn test_invoke_calls_callbacks_in_subscription_order() {
        // Arrange
        let channel = FeedbackChannel::<String>::new("test");
        let (log, record) = recorder();
        for tag in ["a", "b", "c"] {
            let record = record.clone();
            channel.add(move |v| {
                record(tag, v);
                Ok(())
            });
        }

        // Act
        channel.invoke(&"x".to_string());

        // Assert
        assert_eq!(*log.lock().unwrap(), vec!["a:x", "b:x", "c:x"]);
    }

    #[test]
    fn test_ids_increase_and_are_not_reused_after_remove() {
        // Arrange
        let channel = FeedbackChannel::<String>::new("test");
        let first = channel.add(|_| Ok(()));
        let second = channel.add(|_| Ok(()));

        // Act
        channel.remove(second);
        let third = channel.add(|_| Ok(()));

        // Assert
        assert!(first.id() < second.id());
        assert!(second.id() < third.id());
    }

    #[test]
    fn test_remove_skips_only_that_callback() {
        // Arrange
        let channel = FeedbackChannel::<String>::new("test");
        let (log, record) = recorder();
        let r1 = record.clone();
        channel.add(move |v| {
            r1("a", v);
            Ok(())
        });
        let r2 = record.clone();
        let middle = channel.add(move |v| {
            r2("b", v);
            Ok(())
        });
        channel.add(move |v| {
            record("c", v);
            Ok(())
        });

        // Act
        channel.remove(middle);
        channel.invoke(&"y".to_string());

        // Assert
        assert_eq!(*log.lock().unwrap(), vec!["a:y", "c:y"]);
    }

    #[test]
    fn test_remove_twice_is_noop() {
        let channel = FeedbackChannel::<String>::new("test");
        let handle = channel.add(|_| Ok(()));
        channel.add(|_| Ok(()));

        channel.remove(handle);
        channel.remove(handle);

        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn test_failing_callback_does_not_stop_the_rest() {
        // Arrange
        let channel = FeedbackChannel::<String>::new("test");
        let (log, record) = recorder();
        channel.add(|_| Err("subscriber is broken".into()));
        channel.add(move |v| {
            record("after", v);
            Ok(())
        });

        // Act
        let faults = channel.invoke(&"z".to_string());

        // Assert
        assert_eq!(faults, 1);
        assert_eq!(*log.lock().unwrap(), vec!["after:z"]);
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        // Arrange
        let channel = FeedbackChannel::<String>::new("test");
        let (log, record) = recorder();
        channel.add(|_| panic!("subscriber exploded"));
        channel.add(move |v| {
            record("after", v);
            Ok(())
        });

        // Act
        let faults = channel.invoke(&"p".to_string());

        // Assert
        assert_eq!(faults, 1);
        assert_eq!(*log.lock().unwrap(), vec!["after:p"]);
    }

    #[test]
    fn test_callback_may_unsubscribe_itself_during_invoke() {
        // Arrange
        let channel = Arc::new(FeedbackChannel::<String>::new("test"));
        let handle_slot = Arc::new(Mutex::new(None::<SubscriptionHandle>));
        let weak = Arc::downgrade(&channel);
        let slot = Arc::clone(&handle_slot);
        let handle = channel.add(move |_| {
            if let (Some(ch), Some(h)) = (weak.upgrade(), *slot.lock().unwrap()) {
                ch.remove(h);
            }
            Ok(())
        });
        *handle_slot.lock().unwrap() = Some(handle);

        // Act
        channel.invoke(&"once".to_string());

        // Assert
        assert!(channel.is_empty());
    }

    #[test]
    fn test_plugin_feedback_screen_switched_channel_is_named() {
        let feedback = PluginFeedback::new();
        assert_eq!(feedback.screen_switched().name(), "screenSwitched");
        assert!(feedback.screen_switched().is_empty());
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
    }
}
