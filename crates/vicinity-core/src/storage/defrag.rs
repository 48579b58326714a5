//! Defragmentation of the vector list files.
//!
//! A sweep walks the index file in order. Every live entry has its data
//! bytes copied down to the next free position in the data file and its
//! slot collapsed over preceding tombstones; tombstoned slots are skipped.
//! A sweep never increases total file usage and never reorders live
//! entries.
//!
//! The batched variant processes [`DEFRAG_BATCH`] entries per call and
//! keeps its cursor in [`DefragState`], so foreground traffic can proceed
//! between batches. Entries appended mid-sweep are picked up by later
//! batches; slots tombstoned behind the cursor stay gap bytes until the
//! next sweep.

use super::entry::tombstone_id;
use super::list::ListInner;

/// Entries compacted per `defrag_batch` call.
pub(crate) const DEFRAG_BATCH: usize = 100;

/// Cursor state of an in-progress batched sweep.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct DefragState {
    /// A sweep is in progress.
    pub active: bool,
    /// Next slot to examine.
    pub read_slot: usize,
    /// Next slot to write a compacted entry to.
    pub write_slot: usize,
    /// Next free data-file offset in the compacted prefix.
    pub data_write: usize,
}

impl ListInner {
    /// Runs a full sweep to completion. Caller holds the writer lock.
    pub(super) fn defrag_run_to_completion(&mut self) {
        self.defrag = DefragState {
            active: true,
            ..DefragState::default()
        };
        while !self.defrag_advance(usize::MAX) {}
    }

    /// Runs one batch of an (possibly new) sweep. Returns true when the
    /// sweep completed with this call.
    pub(super) fn defrag_step_batch(&mut self) -> bool {
        if !self.defrag.active {
            self.defrag = DefragState {
                active: true,
                ..DefragState::default()
            };
        }
        self.defrag_advance(DEFRAG_BATCH)
    }

    /// Processes up to `budget` entries; returns true when the sweep is
    /// done and the file bookkeeping has been folded back.
    fn defrag_advance(&mut self, budget: usize) -> bool {
        let mut state = self.defrag;
        let mut processed = 0;

        // `self.entries` is re-read every iteration: appends that happened
        // between batches extend the sweep.
        while processed < budget && state.read_slot < self.entries {
            let entry = self.entry_at(state.read_slot);
            state.read_slot += 1;
            processed += 1;

            if !entry.is_live() {
                continue;
            }

            let offset = entry.offset as usize;
            let length = entry.length as usize;
            if offset != state.data_write {
                // Live data only ever moves down; source and destination
                // never overlap the wrong way for copy_within.
                self.data_mmap
                    .copy_within(offset..offset + length, state.data_write);
            }

            let mut compacted = entry;
            compacted.offset = state.data_write as u64;
            self.write_entry(state.write_slot, &compacted);

            // Tombstone the source slot of a moved entry so readers between
            // batches never see the same record twice.
            let source_slot = state.read_slot - 1;
            if source_slot != state.write_slot {
                let mut stale = entry;
                stale.id = tombstone_id();
                self.write_entry(source_slot, &stale);
            }

            state.write_slot += 1;
            state.data_write += length;
        }

        if state.read_slot < self.entries {
            self.defrag = state;
            return false;
        }

        // Sweep complete: clear the collapsed tail and fold the cursors in.
        for slot in state.write_slot..self.entries {
            self.zero_entry(slot);
        }
        self.entries = state.write_slot;
        self.data_cursor = state.data_write;
        self.defrag = DefragState::default();
        true
    }
}
