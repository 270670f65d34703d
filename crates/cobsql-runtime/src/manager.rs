//! Named connection handles.
//!
//! A program may hold several connections at once, addressed by name;
//! statements without an `AT` clause go to the default connection. This
//! is a plain handle table, not a pool.

use std::collections::HashMap;

use crate::iface::DbInterface;

/// Name used when the program never names its connection.
pub const DEFAULT_CONNECTION: &str = "*";

#[derive(Default)]
pub struct ConnectionManager {
    connections: HashMap<String, Box<dyn DbInterface>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: Option<&str>) -> String {
        name.filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_CONNECTION)
            .to_uppercase()
    }

    /// Register a connected driver under `name`. A name already in use
    /// is rejected.
    pub fn add(&mut self, name: Option<&str>, dbi: Box<dyn DbInterface>) -> bool {
        let key = Self::key(name);
        if self.connections.contains_key(&key) {
            return false;
        }
        self.connections.insert(key, dbi);
        true
    }

    pub fn get(&mut self, name: Option<&str>) -> Option<&mut Box<dyn DbInterface>> {
        self.connections.get_mut(&Self::key(name))
    }

    pub fn exists(&self, name: Option<&str>) -> bool {
        self.connections.contains_key(&Self::key(name))
    }

    /// Detach and return the named connection; the caller decides
    /// whether to terminate it.
    pub fn remove(&mut self, name: Option<&str>) -> Option<Box<dyn DbInterface>> {
        self.connections.remove(&Self::key(name))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgsql::PgsqlDriver;

    #[test]
    fn default_and_named_connections() {
        let mut mgr = ConnectionManager::new();
        assert!(mgr.add(None, Box::new(PgsqlDriver::new())));
        assert!(mgr.add(Some("CONN2"), Box::new(PgsqlDriver::new())));
        assert_eq!(mgr.len(), 2);

        assert!(mgr.get(None).is_some());
        assert!(mgr.get(Some("conn2")).is_some(), "names are case-folded");
        assert!(mgr.get(Some("other")).is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut mgr = ConnectionManager::new();
        assert!(mgr.add(Some("A"), Box::new(PgsqlDriver::new())));
        assert!(!mgr.add(Some("a"), Box::new(PgsqlDriver::new())));
    }

    #[test]
    fn remove_detaches_the_handle() {
        let mut mgr = ConnectionManager::new();
        mgr.add(Some("A"), Box::new(PgsqlDriver::new()));
        assert!(mgr.remove(Some("A")).is_some());
        assert!(mgr.is_empty());
        assert!(mgr.remove(Some("A")).is_none());
    }
}
