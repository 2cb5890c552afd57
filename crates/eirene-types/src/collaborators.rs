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

//! Narrow interfaces to the systems this core treats as opaque
//! external collaborators: the state-transition engine, the
//! persistent key-value store, reward accounting, and governance.
//! None of these traits carry a default implementation; wiring a
//! concrete one in is the host's job.

use crate::header::Header;
use crate::primitives::{Address, BigUint, Hash};
use crate::Error;

/// A single atomic write batch, built up then committed in one call.
pub trait WriteBatch {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
    fn commit(self: Box<Self>) -> Result<(), Error>;
}

/// The persistent key-value store. The engine only ever performs
/// point reads and atomic batched writes through this trait.
pub trait KVStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), Error>;
    fn delete(&self, key: &[u8]) -> Result<(), Error>;
    fn batch(&self) -> Box<dyn WriteBatch + '_>;
}

/// A single transaction as seen by the dependency analyzer and the
/// state-transition collaborator. Only the fields the consensus core
/// needs to reason about are modeled; everything else (calldata
/// semantics, gas accounting) lives on the other side of this boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub hash: Hash,
    pub sender: Address,
    pub nonce: u64,
    pub to: Option<Address>,
    pub data: Vec<u8>,
}

/// Opaque state handle threaded through `StateTransition` and the
/// state batch processor. The core never inspects its contents.
pub trait StateHandle: Send {
    fn root(&self) -> Hash;

    /// An independent view of the same state, safe to execute against
    /// concurrently with other forks of the same parent. The analyzer
    /// guarantees transactions handed to sibling forks touch disjoint
    /// state keys, so forks never need reconciling with each other.
    fn fork(&self) -> Box<dyn StateHandle>;
}

/// `(header, txs, state) -> post-state root`. Everything between the
/// inputs and that root — VM semantics, gas, receipts — lives behind
/// this boundary.
pub trait StateTransition: Send + Sync {
    fn apply(
        &self,
        header: &Header,
        txs: &[Transaction],
        state: &mut dyn StateHandle,
    ) -> Result<Hash, Error>;
}

/// Block reward distribution. The formula is the host's policy: the
/// core calls `distribute` once per finalized block and does not
/// interpret the result.
pub trait Rewards: Send + Sync {
    fn distribute(&self, header: &Header, proposer: Address, total_fees: BigUint) -> Result<(), Error>;
}

/// Governance proposal processing, invoked once per finalized block.
pub trait Governance: Send + Sync {
    fn process_proposals(&self, height: u64) -> Result<(), Error>;
}
