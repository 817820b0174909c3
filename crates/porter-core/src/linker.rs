//! The association map between source messages and the mirror messages
//! produced from them. Process-local; rebuilt empty on restart (provenance
//! of old mirrors is then only recoverable through the subtext decoder).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::domain::MessageRef;

/// Edges whose `last_touched` is at least this old are expired: structurally
/// visible, skipped by propagation, removed lazily on the next link.
/// Keep in sync with the subtext grammar change-log in `subtext.rs`.
pub const EDGE_EXPIRY_HOURS: i64 = 24;

/// A directed edge from one source message to its mirrors.
#[derive(Clone, Debug)]
pub struct LinkEdge {
    pub mirrors: Vec<MessageRef>,
    pub created_at: DateTime<Utc>,
    pub last_touched: DateTime<Utc>,
    /// A frozen edge is never auto-updated or auto-removed by propagation;
    /// only explicit unlink (or source deletion) clears it.
    pub frozen: bool,
}

/// The only mutable shared state in the consistency layer. Constructed once
/// at startup and passed to every handler; it contains no locking of its
/// own, so the owner is responsible for serializing access.
#[derive(Default)]
pub struct MessageLinker {
    edges: HashMap<MessageRef, LinkEdge>,
}

impl MessageLinker {
    pub fn new() -> Self {
        Self::default()
    }

    fn expiry_threshold() -> DateTime<Utc> {
        Utc::now() - Duration::hours(EDGE_EXPIRY_HOURS)
    }

    /// Create or replace the edge for `source`. At most one edge exists per
    /// source, and each mirror belongs to exactly one edge. Expired edges
    /// anywhere in the map are swept out here, lazily.
    pub fn link(&mut self, source: MessageRef, mirrors: Vec<MessageRef>) {
        self.sweep_expired();
        let now = Utc::now();
        self.edges.insert(
            source,
            LinkEdge {
                mirrors,
                created_at: now,
                last_touched: now,
                frozen: false,
            },
        );
    }

    fn sweep_expired(&mut self) {
        let threshold = Self::expiry_threshold();
        self.edges
            .retain(|_, edge| edge.frozen || edge.last_touched >= threshold);
    }

    pub fn get(&self, source: MessageRef) -> Option<&LinkEdge> {
        self.edges.get(&source)
    }

    pub fn mirrors(&self, source: MessageRef) -> Vec<MessageRef> {
        self.edges
            .get(&source)
            .map(|e| e.mirrors.clone())
            .unwrap_or_default()
    }

    /// Disable propagation for this edge until it is unlinked.
    pub fn freeze(&mut self, source: MessageRef) -> bool {
        match self.edges.get_mut(&source) {
            Some(edge) => {
                edge.frozen = true;
                true
            }
            None => false,
        }
    }

    pub fn is_frozen(&self, source: MessageRef) -> bool {
        self.edges.get(&source).map(|e| e.frozen).unwrap_or(false)
    }

    pub fn is_expired(&self, source: MessageRef) -> bool {
        self.edges
            .get(&source)
            .map(|e| e.last_touched < Self::expiry_threshold())
            .unwrap_or(false)
    }

    /// Refresh `last_touched` after successful propagation.
    pub fn touch(&mut self, source: MessageRef) {
        if let Some(edge) = self.edges.get_mut(&source) {
            edge.last_touched = Utc::now();
        }
    }

    pub fn unlink(&mut self, source: MessageRef) -> Option<LinkEdge> {
        self.edges.remove(&source)
    }

    /// Reverse lookup: the source a mirror belongs to.
    pub fn source_of(&self, mirror: MessageRef) -> Option<MessageRef> {
        self.edges
            .iter()
            .find(|(_, edge)| edge.mirrors.contains(&mirror))
            .map(|(source, _)| *source)
    }

    /// Unlink the edge owning `mirror`, if any. Never raises; freezing and
    /// expiry do not protect an edge whose mirror is already gone.
    pub fn unlink_mirror(&mut self, mirror: MessageRef) {
        if let Some(source) = self.source_of(mirror) {
            self.edges.remove(&source);
        }
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, source: MessageRef, age: Duration) {
        if let Some(edge) = self.edges.get_mut(&source) {
            edge.last_touched = Utc::now() - age;
        }
    }
}
