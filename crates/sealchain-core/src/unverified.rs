//! Queue for blocks that arrived ahead of their dependencies.
//!
//! Keyed by the missing [`Subject`]. Blocks stay queued until the subject
//! verifies; a block whose dependency never arrives simply never verifies,
//! which is the specified behavior for dependants of dropped blocks.

use std::collections::HashMap;

use sealchain_proto::Block;

use crate::error::Subject;

/// Pending blocks by missing dependency.
#[derive(Debug, Default)]
pub struct UnverifiedStore {
    queued: HashMap<Subject, Vec<Block>>,
}

impl UnverifiedStore {
    /// Queue a block behind its missing subject, FIFO per subject.
    pub fn enqueue(&mut self, subject: Subject, block: Block) {
        self.queued.entry(subject).or_default().push(block);
    }

    /// Remove and return every block waiting on a subject.
    pub fn take(&mut self, subject: &Subject) -> Vec<Block> {
        self.queued.remove(subject).unwrap_or_default()
    }

    /// Total number of queued blocks.
    pub fn len(&self) -> usize {
        self.queued.values().map(Vec::len).sum()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }
}
