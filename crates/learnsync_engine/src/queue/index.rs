//! In-memory queue index shared by every store implementation.

use crate::error::{SyncError, SyncResult};
use learnsync_protocol::{SyncOperation, Timestamp};
use std::collections::{BTreeMap, HashMap};

/// Primary index by id plus a secondary ordering index.
#[derive(Debug, Default)]
pub(crate) struct QueueIndex {
    /// id -> (insertion sequence, operation)
    by_id: HashMap<String, (u64, SyncOperation)>,
    /// (timestamp, insertion sequence) -> id
    order: BTreeMap<(Timestamp, u64), String>,
    next_seq: u64,
}

impl QueueIndex {
    pub(crate) fn check_absent(&self, id: &str) -> SyncResult<()> {
        if self.by_id.contains_key(id) {
            return Err(SyncError::DuplicateOperation(id.to_string()));
        }
        Ok(())
    }

    pub(crate) fn check_present(&self, id: &str) -> SyncResult<()> {
        if !self.by_id.contains_key(id) {
            return Err(SyncError::OperationNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Inserts or replaces. A replaced operation keeps its insertion sequence.
    pub(crate) fn insert(&mut self, operation: SyncOperation) {
        let seq = match self.by_id.get(&operation.id) {
            Some((seq, previous)) => {
                let seq = *seq;
                self.order.remove(&(previous.timestamp, seq));
                seq
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
        };

        self.order
            .insert((operation.timestamp, seq), operation.id.clone());
        self.by_id.insert(operation.id.clone(), (seq, operation));
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        match self.by_id.remove(id) {
            Some((seq, operation)) => {
                self.order.remove(&(operation.timestamp, seq));
                true
            }
            None => false,
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<&SyncOperation> {
        self.by_id.get(id).map(|(_, op)| op)
    }

    pub(crate) fn ordered(&self) -> Vec<SyncOperation> {
        self.order
            .values()
            .filter_map(|id| self.get(id).cloned())
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.by_id.clear();
        self.order.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
