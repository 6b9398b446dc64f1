//! Queued edge operations
//!
//! Relation changes made on a persisted instance are not written immediately; they are
//! queued on the owning instance and drained by the next flush. Each operation is keyed
//! by its edge (endpoints, relation, direction), and queueing a second operation for the
//! same edge replaces the first, so re-applying a flush never duplicates work.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use super::instance::Instance;
use crate::value::PropertyMap;

/// Process-unique identity of a live instance, independent of its store identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey(u64);

impl InstanceKey {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        InstanceKey(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeAction {
    Link,
    Unlink,
    /// Delete every edge of the relation leaving the owner
    Clear,
}

/// Which way the queued edge points relative to the queue owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeDirection {
    /// owner -> peer
    Forward,
    /// peer -> owner (mirror of a bidirectional relation)
    Inverse,
    /// owner -> any target; keys a `Clear`
    Outgoing,
}

/// Identity of an edge operation for de-duplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EdgeKey {
    pub source: InstanceKey,
    pub target: InstanceKey,
    pub relation: String,
    pub direction: EdgeDirection,
}

/// One deferred edge create or delete
#[derive(Debug, Clone)]
pub struct PendingOperation {
    seq: u64,
    key: EdgeKey,
    action: EdgeAction,
    peer: Instance,
    properties: Option<PropertyMap>,
}

impl PendingOperation {
    pub fn key(&self) -> &EdgeKey {
        &self.key
    }

    pub fn action(&self) -> EdgeAction {
        self.action
    }

    pub fn relation(&self) -> &str {
        &self.key.relation
    }

    /// The endpoint other than the queue owner
    pub fn peer(&self) -> &Instance {
        &self.peer
    }

    pub fn properties(&self) -> Option<&PropertyMap> {
        self.properties.as_ref()
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    /// `(source, target)` of the edge given the instance owning the queue
    ///
    /// A `Clear` has no single target; both ends are the owner.
    pub fn endpoints<'a>(&'a self, owner: &'a Instance) -> (&'a Instance, &'a Instance) {
        match self.key.direction {
            EdgeDirection::Forward => (owner, &self.peer),
            EdgeDirection::Inverse => (&self.peer, owner),
            EdgeDirection::Outgoing => (owner, owner),
        }
    }
}

/// Per-instance queue of deferred edge operations
#[derive(Debug, Default)]
pub(crate) struct OperationQueue {
    operations: Vec<PendingOperation>,
    next_seq: u64,
}

impl OperationQueue {
    /// Queue an operation, replacing any earlier one for the same edge
    pub(crate) fn push(
        &mut self,
        key: EdgeKey,
        action: EdgeAction,
        peer: Instance,
        properties: Option<PropertyMap>,
    ) {
        self.operations.retain(|op| op.key != key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.operations.push(PendingOperation {
            seq,
            key,
            action,
            peer,
            properties,
        });
    }

    /// Action currently queued for an edge, if any
    pub(crate) fn action_for(&self, key: &EdgeKey) -> Option<EdgeAction> {
        self.operations.iter().find(|op| &op.key == key).map(|op| op.action)
    }

    /// Drop the operation queued for an edge without replacing it
    pub(crate) fn discard(&mut self, key: &EdgeKey) {
        self.operations.retain(|op| &op.key != key);
    }

    pub(crate) fn snapshot(&self) -> Vec<PendingOperation> {
        self.operations.clone()
    }

    /// Remove the operations a successful flush has written
    ///
    /// Operations queued while the flush ran carry newer sequence numbers and stay.
    pub(crate) fn retire(&mut self, flushed: &HashSet<u64>) {
        self.operations.retain(|op| !flushed.contains(&op.seq));
    }

    pub(crate) fn clear(&mut self) {
        self.operations.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.operations.len()
    }
}
