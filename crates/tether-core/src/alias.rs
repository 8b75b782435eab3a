//! Peer identity aliases.
//!
//! Maps each stable peer identity to a random, non-zero 64-bit handle used
//! locally to address its session. Handles are never transmitted.

use std::collections::HashMap;

/// Bidirectional identity ↔ handle table.
#[derive(Debug, Default)]
pub struct PeerAliases {
    by_identity: HashMap<String, u64>,
    by_handle: HashMap<u64, String>,
}

impl PeerAliases {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity`, returning its handle.
    ///
    /// Idempotent: an identity that is already registered keeps its handle.
    pub fn add(&mut self, identity: &str) -> u64 {
        if let Some(handle) = self.by_identity.get(identity) {
            return *handle;
        }

        let handle = loop {
            let candidate: u64 = rand::random();
            if candidate != 0 && !self.by_handle.contains_key(&candidate) {
                break candidate;
            }
        };

        self.by_identity.insert(identity.to_owned(), handle);
        self.by_handle.insert(handle, identity.to_owned());
        handle
    }

    /// Remove a handle and its identity. Returns the identity if it existed.
    pub fn remove(&mut self, handle: u64) -> Option<String> {
        let identity = self.by_handle.remove(&handle)?;
        self.by_identity.remove(&identity);
        Some(identity)
    }

    /// Identity registered under `handle`.
    pub fn identity(&self, handle: u64) -> Option<&str> {
        self.by_handle.get(&handle).map(String::as_str)
    }

    /// Handle registered for `identity`.
    pub fn handle(&self, identity: &str) -> Option<u64> {
        self.by_identity.get(identity).copied()
    }

    /// All registered handles, in no particular order.
    pub fn handles(&self) -> impl Iterator<Item = u64> + '_ {
        self.by_handle.keys().copied()
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    /// Whether no peer is registered.
    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}
