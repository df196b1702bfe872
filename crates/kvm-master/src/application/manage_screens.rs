//! ScreenRegistry: the master's table of known screens, keyed by name.
//!
//! Plugins address screens by the names the operator configured
//! (`switchToScreen laptop`), so the registry is keyed by name rather than
//! by id.  Every entry still carries a UUID so log lines and future
//! persistence can refer to a screen independently of renames.
//!
//! The master's own screen is always present and cannot be replaced by a
//! remote entry of the same name.

use std::collections::BTreeMap;

use uuid::Uuid;

/// Where a screen lives relative to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenKind {
    /// The master's own screen.
    Local,
    /// A screen reached through a client session.
    Remote,
}

/// Runtime state for a screen known to the master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenState {
    pub id: Uuid,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub kind: ScreenKind,
}

impl ScreenState {
    /// Creates a remote screen with a fresh id.
    pub fn remote(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            width,
            height,
            kind: ScreenKind::Remote,
        }
    }

    /// Creates the master's own screen with a fresh id.
    pub fn local(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            kind: ScreenKind::Local,
            ..Self::remote(name, width, height)
        }
    }
}

/// In-memory registry of every screen the master knows about.
///
/// Owned by the dispatch thread; it is never shared, so no lock is needed.
#[derive(Debug)]
pub struct ScreenRegistry {
    master_name: String,
    screens: BTreeMap<String, ScreenState>,
}

impl ScreenRegistry {
    /// Creates a registry containing only the master's own screen.
    pub fn new(master: ScreenState) -> Self {
        let master_name = master.name.clone();
        let mut screens = BTreeMap::new();
        screens.insert(master_name.clone(), master);
        Self {
            master_name,
            screens,
        }
    }

    /// Name of the master's own screen.
    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    /// Registers or updates a screen.
    ///
    /// The master's own entry stays `Local` even when replaced.
    pub fn upsert(&mut self, mut state: ScreenState) {
        if state.name == self.master_name {
            state.kind = ScreenKind::Local;
        }
        self.screens.insert(state.name.clone(), state);
    }

    /// Returns the state for the screen named `name`.
    pub fn get(&self, name: &str) -> Option<&ScreenState> {
        self.screens.get(name)
    }

    /// Number of screens, the master included.  Never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.screens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_registry() -> ScreenRegistry {
        ScreenRegistry::new(ScreenState::local("master", 1920, 1080))
    }

    #[test]
    fn test_registry_starts_with_master_screen() {
        let registry = make_registry();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.master_name(), "master");
        assert_eq!(
            registry.get("master").unwrap().kind,
            ScreenKind::Local
        );
    }

    #[test]
    fn test_upsert_adds_screen() {
        let mut registry = make_registry();
        registry.upsert(ScreenState::remote("laptop", 1440, 900));
        assert!(registry.get("laptop").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_upsert_updates_existing_screen_by_name() {
        let mut registry = make_registry();
        registry.upsert(ScreenState::remote("laptop", 1440, 900));

        registry.upsert(ScreenState::remote("laptop", 2560, 1600));

        let state = registry.get("laptop").unwrap();
        assert_eq!(state.width, 2560);
        assert_eq!(state.kind, ScreenKind::Remote);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_upsert_master_keeps_local_kind() {
        let mut registry = make_registry();
        registry.upsert(ScreenState::remote("master", 3840, 2160));
        let master = registry.get("master").unwrap();
        assert_eq!(master.width, 3840);
        assert_eq!(master.kind, ScreenKind::Local);
    }
}
