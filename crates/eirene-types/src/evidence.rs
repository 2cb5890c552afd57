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

//! Byzantine-fault evidence: a content-addressed record of a provable
//! Byzantine action, subject to verification and slashing.

use serde::{Deserialize, Serialize};

use crate::primitives::{Address, Hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceKind {
    DoubleSign,
    Downtime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub kind: EvidenceKind,
    pub validator: Address,
    pub height: u64,
    pub block_hash: Hash,
    pub timestamp: u64,
    pub payload: Vec<u8>,
    pub reporter: Address,
    pub verified: bool,
    pub slashed: bool,
}

impl Evidence {
    pub fn new(
        kind: EvidenceKind,
        validator: Address,
        height: u64,
        block_hash: Hash,
        timestamp: u64,
        payload: Vec<u8>,
        reporter: Address,
    ) -> Self {
        Evidence {
            kind,
            validator,
            height,
            block_hash,
            timestamp,
            payload,
            reporter,
            verified: false,
            slashed: false,
        }
    }

    /// Evidence is content-addressed by `hash(payload)`.
    pub fn content_hash(&self) -> Hash {
        keccak_hash::keccak(&self.payload)
    }

    pub fn expired_at(&self, current_block: u64, evidence_expiry_blocks: u64) -> bool {
        self.height + evidence_expiry_blocks < current_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Evidence {
        Evidence::new(
            EvidenceKind::DoubleSign,
            Address::from_low_u64_be(1),
            100,
            Hash::zero(),
            1234,
            vec![1, 2, 3],
            Address::from_low_u64_be(2),
        )
    }

    #[test]
    fn content_hash_is_deterministic() {
        let a = sample();
        let b = sample();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn different_payloads_hash_differently() {
        let mut a = sample();
        a.payload = vec![9, 9, 9];
        assert_ne!(a.content_hash(), sample().content_hash());
    }

    #[test]
    fn expiry_is_inclusive_of_the_boundary() {
        let e = sample();
        assert!(!e.expired_at(100 + 50, 50));
        assert!(e.expired_at(100 + 51, 50));
    }

    #[test]
    fn evidence_round_trips_through_json() {
        let e = sample();
        let bytes = serde_json::to_vec(&e).unwrap();
        let back: Evidence = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, e);
    }
}
