// Copyright 2015-2020 Eirene developers.
// This file is part of Eirene.

// Eirene is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Eirene is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Eirene.  If not, see <http://www.gnu.org/licenses/>.

//! State batch processor: accumulates transactions against a
//! [`StateHandle`] and flushes them through [`StateTransition`] once
//! the configured batch size is reached, so repeated small mutations
//! collapse into fewer expensive commits.

use eirene_types::{Error, Hash, Header, StateHandle, StateTransition, Transaction};
use parking_lot::Mutex;

struct Inner {
    pending: Vec<Transaction>,
    batch_size: usize,
}

/// Buffers transactions and flushes them in batches through a
/// [`StateTransition`] collaborator. `batch_size` is adjustable at
/// runtime, so the auto-tuner can act on it directly.
pub struct BatchProcessor {
    inner: Mutex<Inner>,
}

impl BatchProcessor {
    pub fn new(batch_size: usize) -> Self {
        BatchProcessor {
            inner: Mutex::new(Inner {
                pending: Vec::new(),
                batch_size: batch_size.max(1),
            }),
        }
    }

    /// Clears any pending transactions without flushing them. Called
    /// at the start of a new block.
    pub fn reset(&self) {
        self.inner.lock().pending.clear();
    }

    pub fn set_batch_size(&self, batch_size: usize) {
        self.inner.lock().batch_size = batch_size.max(1);
    }

    pub fn batch_size(&self) -> usize {
        self.inner.lock().batch_size
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Adds `tx` to the pending batch, flushing automatically once the
    /// batch reaches `batch_size`. Returns the post-state root if a
    /// flush occurred as a result of this call.
    pub fn add_transaction(
        &self,
        tx: Transaction,
        header: &Header,
        transition: &dyn StateTransition,
        state: &mut dyn StateHandle,
    ) -> Result<Option<Hash>, Error> {
        let should_flush = {
            let mut inner = self.inner.lock();
            inner.pending.push(tx);
            inner.pending.len() >= inner.batch_size
        };
        if should_flush {
            Ok(Some(self.flush(header, transition, state)?))
        } else {
            Ok(None)
        }
    }

    /// Runs every pending transaction through `transition` and clears
    /// the batch, returning the resulting state root. A no-op flush
    /// (nothing pending) returns the handle's current root unchanged.
    pub fn flush(
        &self,
        header: &Header,
        transition: &dyn StateTransition,
        state: &mut dyn StateHandle,
    ) -> Result<Hash, Error> {
        let batch = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.pending)
        };
        if batch.is_empty() {
            return Ok(state.root());
        }
        log::debug!(target: "batch", "flushing {} transactions at block {}", batch.len(), header.number);
        transition.apply(header, &batch, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eirene_types::Address;

    struct FakeState {
        root: Hash,
    }
    impl StateHandle for FakeState {
        fn root(&self) -> Hash {
            self.root
        }
        fn fork(&self) -> Box<dyn StateHandle> {
            Box::new(FakeState { root: self.root })
        }
    }

    /// Counts transactions it has seen and derives a new root from the
    /// running total, so tests can assert on `applied()` instead of
    /// reaching back into the opaque `StateHandle`.
    struct CountingTransition {
        applied: std::sync::atomic::AtomicUsize,
    }
    impl CountingTransition {
        fn new() -> Self {
            CountingTransition { applied: std::sync::atomic::AtomicUsize::new(0) }
        }
        fn applied(&self) -> usize {
            self.applied.load(std::sync::atomic::Ordering::Acquire)
        }
    }
    impl StateTransition for CountingTransition {
        fn apply(&self, _header: &Header, txs: &[Transaction], state: &mut dyn StateHandle) -> Result<Hash, Error> {
            let total = self.applied.fetch_add(txs.len(), std::sync::atomic::Ordering::AcqRel) + txs.len();
            let _ = state.root();
            Ok(keccak_hash::keccak(total.to_be_bytes()))
        }
    }

    fn tx(nonce: u64) -> Transaction {
        Transaction {
            hash: Hash::zero(),
            sender: Address::from_low_u64_be(1),
            nonce,
            to: None,
            data: Vec::new(),
        }
    }

    #[test]
    fn flush_is_a_no_op_on_an_empty_batch() {
        let processor = BatchProcessor::new(10);
        let mut state = FakeState { root: Hash::zero() };
        let transition = CountingTransition::new();
        let header = Header::default();
        let root = processor.flush(&header, &transition, &mut state).unwrap();
        assert_eq!(root, Hash::zero());
        assert_eq!(transition.applied(), 0);
    }

    #[test]
    fn add_transaction_flushes_automatically_at_batch_size() {
        let processor = BatchProcessor::new(3);
        let mut state = FakeState { root: Hash::zero() };
        let transition = CountingTransition::new();
        let header = Header::default();

        assert!(processor.add_transaction(tx(0), &header, &transition, &mut state).unwrap().is_none());
        assert!(processor.add_transaction(tx(1), &header, &transition, &mut state).unwrap().is_none());
        assert_eq!(processor.pending_len(), 2);

        let flushed = processor.add_transaction(tx(2), &header, &transition, &mut state).unwrap();
        assert!(flushed.is_some());
        assert_eq!(processor.pending_len(), 0);
        assert_eq!(transition.applied(), 3);
    }

    #[test]
    fn reset_discards_pending_transactions_without_flushing() {
        let processor = BatchProcessor::new(10);
        let mut state = FakeState { root: Hash::zero() };
        let transition = CountingTransition::new();
        let header = Header::default();

        processor.add_transaction(tx(0), &header, &transition, &mut state).unwrap();
        assert_eq!(processor.pending_len(), 1);
        processor.reset();
        assert_eq!(processor.pending_len(), 0);
        assert_eq!(transition.applied(), 0);
    }

    #[test]
    fn batch_size_is_adjustable_at_runtime() {
        let processor = BatchProcessor::new(10);
        processor.set_batch_size(1);
        assert_eq!(processor.batch_size(), 1);

        let mut state = FakeState { root: Hash::zero() };
        let transition = CountingTransition::new();
        let header = Header::default();
        let flushed = processor.add_transaction(tx(0), &header, &transition, &mut state).unwrap();
        assert!(flushed.is_some());
    }
}
