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

//! Block header shape and the positional `extra`-data discipline: the
//! `extra` field is never decoded through a tagged/self-describing
//! format, only by fixed offsets from either end.

use ethereum_types::Bloom;
use rlp::{Encodable, RlpStream};

use crate::primitives::{Address, Hash, ADDRESS_LENGTH, SIGNATURE_LENGTH, VANITY_LENGTH};
use crate::{BigUint, Error, HeaderInvalidKind};

/// Optional fields that only appear on headers produced after the
/// corresponding fork has activated. Absent means "not yet forked";
/// present fields are appended to the seal hash pre-image in a fixed
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostForkFields {
    pub base_fee: Option<BigUint>,
    pub withdrawals_hash: Option<Hash>,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_root: Option<Hash>,
}

/// Block header. Field names follow the external shape exactly;
/// `uncle_hash`/`logs_bloom` exist purely so the seal hash can be
/// computed byte-for-byte against the documented RLP field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub parent_hash: Hash,
    pub uncle_hash: Hash,
    pub number: u64,
    pub time: u64,
    pub coinbase: Address,
    pub state_root: Hash,
    pub tx_hash: Hash,
    pub receipt_hash: Hash,
    pub logs_bloom: Bloom,
    pub difficulty: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub extra: Vec<u8>,
    pub mix_digest: Hash,
    pub nonce: [u8; 8],
    pub post_fork: PostForkFields,
}

impl Header {
    /// Returns the 32-byte vanity prefix, or `None` if `extra` is too short.
    pub fn vanity(&self) -> Option<&[u8]> {
        self.extra.get(..VANITY_LENGTH)
    }

    /// Returns the 65-byte signature suffix, or `None` if `extra` is too short.
    pub fn signature(&self) -> Option<[u8; SIGNATURE_LENGTH]> {
        if self.extra.len() < VANITY_LENGTH + SIGNATURE_LENGTH {
            return None;
        }
        let mut sig = [0u8; SIGNATURE_LENGTH];
        sig.copy_from_slice(&self.extra[self.extra.len() - SIGNATURE_LENGTH..]);
        Some(sig)
    }

    /// Returns `extra` with the trailing signature removed — the slice
    /// that gets hashed to produce the seal hash.
    pub fn extra_without_signature(&self) -> &[u8] {
        let len = self.extra.len();
        if len < SIGNATURE_LENGTH {
            &self.extra[..]
        } else {
            &self.extra[..len - SIGNATURE_LENGTH]
        }
    }

    /// On a checkpoint header, the inline validator list between the
    /// vanity prefix and the signature suffix. `(total_len - 97) / 20`
    /// recovers the validator count per the encoding discipline.
    pub fn checkpoint_validators(&self) -> Result<Vec<Address>, Error> {
        let len = self.extra.len();
        if len < VANITY_LENGTH + SIGNATURE_LENGTH {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::MissingSignature));
        }
        let body_len = len - VANITY_LENGTH - SIGNATURE_LENGTH;
        if body_len % ADDRESS_LENGTH != 0 {
            return Err(Error::HeaderInvalid(
                HeaderInvalidKind::InvalidCheckpointSigners,
            ));
        }
        let body = &self.extra[VANITY_LENGTH..VANITY_LENGTH + body_len];
        Ok(body
            .chunks_exact(ADDRESS_LENGTH)
            .map(Address::from_slice)
            .collect())
    }

    /// Builds the `extra` field for a checkpoint header: vanity,
    /// sorted validator list, and a zeroed placeholder for the
    /// signature (to be spliced in during `seal`).
    pub fn encode_checkpoint_extra(vanity: &[u8; VANITY_LENGTH], validators: &[Address]) -> Vec<u8> {
        let mut out = Vec::with_capacity(VANITY_LENGTH + validators.len() * ADDRESS_LENGTH + SIGNATURE_LENGTH);
        out.extend_from_slice(vanity);
        let mut sorted = validators.to_vec();
        sorted.sort();
        for v in &sorted {
            out.extend_from_slice(v.as_bytes());
        }
        out.extend_from_slice(&[0u8; SIGNATURE_LENGTH]);
        out
    }

    /// Whether this header carries a vote (non-checkpoint, nonce is one
    /// of the two vote markers).
    pub fn vote_nonce(&self) -> Option<bool> {
        use crate::primitives::{NONCE_AUTH_VOTE, NONCE_DROP_VOTE};
        if self.nonce == NONCE_AUTH_VOTE {
            Some(true)
        } else if self.nonce == NONCE_DROP_VOTE {
            Some(false)
        } else {
            None
        }
    }
}

impl Encodable for Header {
    fn rlp_append(&self, s: &mut RlpStream) {
        let has_post_fork = self.post_fork.base_fee.is_some()
            || self.post_fork.withdrawals_hash.is_some()
            || self.post_fork.blob_gas_used.is_some()
            || self.post_fork.excess_blob_gas.is_some()
            || self.post_fork.parent_beacon_root.is_some();

        let mut field_count = 15;
        if has_post_fork {
            field_count += 5;
        }
        s.begin_list(field_count);
        s.append(&self.parent_hash);
        s.append(&self.uncle_hash);
        s.append(&self.coinbase);
        s.append(&self.state_root);
        s.append(&self.tx_hash);
        s.append(&self.receipt_hash);
        s.append(&self.logs_bloom);
        s.append(&self.difficulty);
        s.append(&self.number);
        s.append(&self.gas_limit);
        s.append(&self.gas_used);
        s.append(&self.time);
        s.append(&self.extra_without_signature().to_vec());
        s.append(&self.mix_digest);
        s.append(&self.nonce.to_vec());
        if has_post_fork {
            s.append(&self.post_fork.base_fee.unwrap_or_default());
            s.append(&self.post_fork.withdrawals_hash.unwrap_or_default());
            s.append(&self.post_fork.blob_gas_used.unwrap_or_default());
            s.append(&self.post_fork.excess_blob_gas.unwrap_or_default());
            s.append(&self.post_fork.parent_beacon_root.unwrap_or_default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_extra(extra: Vec<u8>) -> Header {
        Header {
            extra,
            ..Header::default()
        }
    }

    #[test]
    fn vanity_and_signature_round_trip() {
        let mut extra = vec![0xab; VANITY_LENGTH];
        extra.extend_from_slice(&[0xcd; SIGNATURE_LENGTH]);
        let h = header_with_extra(extra);
        assert_eq!(h.vanity().unwrap(), &[0xab; VANITY_LENGTH][..]);
        assert_eq!(h.signature().unwrap(), [0xcd; SIGNATURE_LENGTH]);
        assert_eq!(h.extra_without_signature().len(), VANITY_LENGTH);
    }

    #[test]
    fn short_extra_has_no_signature() {
        let h = header_with_extra(vec![0u8; VANITY_LENGTH]);
        assert!(h.signature().is_none());
    }

    #[test]
    fn checkpoint_validator_list_round_trips() {
        let mut validators = vec![Address::from_low_u64_be(3), Address::from_low_u64_be(1), Address::from_low_u64_be(2)];
        let extra = Header::encode_checkpoint_extra(&[0u8; VANITY_LENGTH], &validators);
        let h = header_with_extra(extra);
        let recovered = h.checkpoint_validators().unwrap();
        validators.sort();
        assert_eq!(recovered, validators);
    }

    #[test]
    fn checkpoint_validator_list_rejects_misaligned_body() {
        let mut extra = vec![0u8; VANITY_LENGTH];
        extra.extend_from_slice(&[1u8; 7]); // not a multiple of ADDRESS_LENGTH
        extra.extend_from_slice(&[0u8; SIGNATURE_LENGTH]);
        let h = header_with_extra(extra);
        assert!(matches!(
            h.checkpoint_validators(),
            Err(Error::HeaderInvalid(HeaderInvalidKind::InvalidCheckpointSigners))
        ));
    }

    #[test]
    fn vote_nonce_reads_the_two_markers() {
        let mut h = Header::default();
        h.nonce = crate::primitives::NONCE_AUTH_VOTE;
        assert_eq!(h.vote_nonce(), Some(true));
        h.nonce = crate::primitives::NONCE_DROP_VOTE;
        assert_eq!(h.vote_nonce(), Some(false));
        h.nonce = [1, 2, 3, 4, 5, 6, 7, 8];
        assert_eq!(h.vote_nonce(), None);
    }

    #[test]
    fn rlp_encoding_is_stable_for_identical_headers() {
        let h1 = header_with_extra(vec![1u8; VANITY_LENGTH + SIGNATURE_LENGTH]);
        let h2 = h1.clone();
        assert_eq!(rlp::encode(&h1), rlp::encode(&h2));
    }
}
