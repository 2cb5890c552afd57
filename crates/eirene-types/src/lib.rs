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

//! Shared primitive types for the eirene proof-of-stake consensus
//! core: addresses, hashes, the block header shape, BFT evidence and
//! votes, the error taxonomy, and the narrow traits through which the
//! core talks to its external collaborators (state transition,
//! key-value store, rewards, governance).

pub mod collaborators;
pub mod error;
pub mod evidence;
pub mod header;
pub mod primitives;
pub mod vote;

pub use collaborators::{Governance, KVStore, Rewards, StateHandle, StateTransition, Transaction, WriteBatch};
pub use error::{Error, HeaderInvalidKind, Result};
pub use evidence::{Evidence, EvidenceKind};
pub use header::{Header, PostForkFields};
pub use primitives::{
    Address, BigUint, Hash, ADDRESS_LENGTH, DIFF_INTURN, DIFF_NOTURN, NONCE_AUTH_VOTE,
    NONCE_DROP_VOTE, SIGNATURE_LENGTH, VANITY_LENGTH,
};
pub use vote::{Vote, VoteOption, VoteSubject};
