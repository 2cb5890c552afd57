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

//! BFT layer: block-commitment vote tallying against a 2/3 threshold,
//! Byzantine evidence intake and verification, and slashing execution
//! against a live [`Snapshot`]. One mutex guards the vote and
//! evidence maps; the snapshot keeps its own reader-writer lock and
//! is always acquired first.

use std::collections::HashMap;

use eirene_types::{
    Address, BigUint, Error, Evidence, EvidenceKind, Hash, Header, Vote, VoteOption, VoteSubject,
};
use parking_lot::{Mutex, RwLock};
use rlp::RlpStream;

use crate::config::SlashingConfig;
use crate::seal::{self, SealSignature};
use crate::snapshot::Snapshot;

struct BftState {
    /// blockHash -> voter -> full vote record.
    votes: HashMap<Hash, HashMap<Address, Vote>>,
    /// blockHash -> yea tally. Never decremented, so a reached
    /// consensus stays reached even after the voter map is pruned.
    vote_count: HashMap<Hash, usize>,
    /// Content hash -> evidence.
    evidence: HashMap<Hash, Evidence>,
    /// Validators with at least one executed slashing, by count.
    faulty_nodes: HashMap<Address, u64>,
}

/// Tracks in-flight block votes and the evidence pool, executing
/// slashing directly against a shared snapshot once evidence has been
/// verified.
pub struct BftLayer {
    snapshot: std::sync::Arc<RwLock<Snapshot>>,
    consensus_threshold: f64,
    slashing: SlashingConfig,
    inner: Mutex<BftState>,
}

impl BftLayer {
    pub fn new(
        snapshot: std::sync::Arc<RwLock<Snapshot>>,
        consensus_threshold: f64,
        slashing: SlashingConfig,
    ) -> Self {
        BftLayer {
            snapshot,
            consensus_threshold: consensus_threshold.clamp(0.0, 1.0),
            slashing,
            inner: Mutex::new(BftState {
                votes: HashMap::new(),
                vote_count: HashMap::new(),
                evidence: HashMap::new(),
                faulty_nodes: HashMap::new(),
            }),
        }
    }

    /// Records a commitment vote for `block_hash`. Returns `false`
    /// (without recording anything) for non-validators and for voters
    /// that already voted on this block.
    pub fn submit_vote(&self, block_hash: Hash, validator: Address, yea: bool) -> bool {
        let snap = self.snapshot.read();
        if !snap.validators.contains_key(&validator) {
            return false;
        }
        let weight = snap.stakes.get(&validator).cloned().unwrap_or_default();
        let height = snap.number;
        drop(snap);

        let mut inner = self.inner.lock();
        let voters = inner.votes.entry(block_hash).or_default();
        if voters.contains_key(&validator) {
            return false;
        }
        voters.insert(
            validator,
            Vote {
                subject: VoteSubject::Block(block_hash),
                voter: validator,
                option: if yea { VoteOption::Yes } else { VoteOption::No },
                weight,
                timestamp: height,
            },
        );
        if yea {
            *inner.vote_count.entry(block_hash).or_insert(0) += 1;
        }
        true
    }

    /// Whether `block_hash` has accumulated yea votes from at least
    /// `ceil(|validators| * consensus_threshold)` distinct validators.
    pub fn has_consensus(&self, block_hash: &Hash) -> bool {
        let validator_count = self.snapshot.read().validators.len();
        if validator_count == 0 {
            return false;
        }
        let required = (validator_count as f64 * self.consensus_threshold).ceil() as usize;
        let inner = self.inner.lock();
        inner.vote_count.get(block_hash).copied().unwrap_or(0) >= required.max(1)
    }

    /// Drops the per-voter records for `block_hash` (vote-collection
    /// timeout). The yea tally is retained so an already-reached
    /// consensus remains observable.
    pub fn expire_votes(&self, block_hash: &Hash) {
        self.inner.lock().votes.remove(block_hash);
    }

    /// Adds `evidence` to the pool, keyed by its content hash.
    /// Idempotent: resubmitting equivalent evidence leaves the pool
    /// unchanged and returns the same hash.
    pub fn submit_evidence(&self, evidence: Evidence) -> Hash {
        let hash = evidence.content_hash();
        let mut inner = self.inner.lock();
        inner.evidence.entry(hash).or_insert_with(|| {
            log::info!(
                target: "bft",
                "evidence {:?} against {:?} at height {} accepted",
                evidence.kind, evidence.validator, evidence.height
            );
            evidence
        });
        hash
    }

    /// Checks the evidence payload against what it claims to prove and
    /// marks it verified on success. A failed verification leaves the
    /// evidence unverified, which blocks [`BftLayer::execute_slashing`].
    pub fn verify_evidence(&self, hash: &Hash) -> bool {
        let snap = self.snapshot.read();
        let mut inner = self.inner.lock();
        let evidence = match inner.evidence.get_mut(hash) {
            Some(e) => e,
            None => return false,
        };
        if evidence.verified {
            return true;
        }
        let ok = match evidence.kind {
            EvidenceKind::DoubleSign => verify_double_sign_payload(evidence),
            EvidenceKind::Downtime => {
                snap.validators.contains_key(&evidence.validator)
                    && verify_downtime_payload(evidence)
            }
        };
        if ok {
            evidence.verified = true;
        } else {
            log::warn!(
                target: "bft",
                "evidence {:?} against {:?} failed verification",
                evidence.kind, evidence.validator
            );
        }
        ok
    }

    /// Slashes and jails the offending validator for verified
    /// evidence. Idempotent: the second call for the same evidence is
    /// a no-op returning `false`, as is any call for unverified
    /// evidence.
    pub fn execute_slashing(&self, hash: &Hash) -> bool {
        let mut snap = self.snapshot.write();
        let current_block = snap.number;
        let mut inner = self.inner.lock();
        let evidence = match inner.evidence.get_mut(hash) {
            Some(e) => e,
            None => return false,
        };
        if !evidence.verified || evidence.slashed {
            return false;
        }
        evidence.slashed = true;
        let (ratio, jail_period) = match evidence.kind {
            EvidenceKind::DoubleSign => (
                self.slashing.double_sign_ratio,
                self.slashing.double_sign_jail_period,
            ),
            EvidenceKind::Downtime => (
                self.slashing.downtime_ratio,
                self.slashing.downtime_jail_period,
            ),
        };
        let validator = evidence.validator;
        let kind = evidence.kind;
        *inner.faulty_nodes.entry(validator).or_insert(0) += 1;
        drop(inner);

        let slashed = snap.slash(&validator, ratio);
        snap.jail(validator, current_block + jail_period);
        log::warn!(
            target: "bft",
            "slashed validator {:?} by {:?} ({:?}) and jailed until block {}",
            validator, slashed, kind, current_block + jail_period
        );
        true
    }

    /// Builds, submits, and returns the hash of double-sign evidence
    /// from two sealed headers at the same height. The headers must
    /// recover to the same signer and differ in content.
    pub fn report_double_sign(
        &self,
        first: &Header,
        second: &Header,
        reporter: Address,
        timestamp: u64,
    ) -> Result<Hash, Error> {
        if first.number != second.number {
            return Err(Error::InvalidParameter(
                "double-sign headers are at different heights".into(),
            ));
        }
        if seal::block_hash(first) == seal::block_hash(second) {
            return Err(Error::InvalidParameter(
                "double-sign headers are identical".into(),
            ));
        }
        let signer = seal::recover_signer(first)?;
        if signer != seal::recover_signer(second)? {
            return Err(Error::InvalidParameter(
                "double-sign headers have different signers".into(),
            ));
        }
        let payload = double_sign_payload(first, second)?;
        let evidence = Evidence::new(
            EvidenceKind::DoubleSign,
            signer,
            first.number,
            seal::block_hash(first),
            timestamp,
            payload,
            reporter,
        );
        Ok(self.submit_evidence(evidence))
    }

    /// Builds and submits downtime evidence covering the inclusive
    /// height range `[from, to]`.
    pub fn report_downtime(
        &self,
        validator: Address,
        from: u64,
        to: u64,
        reporter: Address,
        timestamp: u64,
    ) -> Result<Hash, Error> {
        if from > to {
            return Err(Error::InvalidParameter("empty downtime range".into()));
        }
        let mut stream = RlpStream::new_list(3);
        stream.append(&validator);
        stream.append(&from);
        stream.append(&to);
        let evidence = Evidence::new(
            EvidenceKind::Downtime,
            validator,
            to,
            Hash::zero(),
            timestamp,
            stream.out(),
            reporter,
        );
        Ok(self.submit_evidence(evidence))
    }

    /// Drops evidence older than `evidence_expiry_blocks` relative to
    /// `current_block`, whether or not it was ever verified, returning
    /// how many records were removed.
    pub fn cleanup_expired_evidence(&self, current_block: u64, evidence_expiry_blocks: u64) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.evidence.len();
        inner
            .evidence
            .retain(|_, e| !e.expired_at(current_block, evidence_expiry_blocks));
        before - inner.evidence.len()
    }

    /// Validators with executed slashings, with their offense counts.
    pub fn faulty_validators(&self) -> Vec<(Address, u64)> {
        let inner = self.inner.lock();
        let mut out: Vec<(Address, u64)> = inner.faulty_nodes.iter().map(|(a, c)| (*a, *c)).collect();
        out.sort();
        out
    }

    pub fn evidence_count(&self) -> usize {
        self.inner.lock().evidence.len()
    }

    pub fn evidence(&self, hash: &Hash) -> Option<Evidence> {
        self.inner.lock().evidence.get(hash).cloned()
    }
}

/// `[seal_hash_a, sig_a, seal_hash_b, sig_b]`, RLP-encoded, so the
/// double-sign proof can be re-checked without the original headers.
fn double_sign_payload(first: &Header, second: &Header) -> Result<Vec<u8>, Error> {
    let sig_of = |h: &Header| {
        h.signature()
            .ok_or(Error::HeaderInvalid(eirene_types::HeaderInvalidKind::MissingSignature))
    };
    let mut stream = RlpStream::new_list(4);
    stream.append(&seal::seal_hash(first));
    stream.append(&sig_of(first)?.to_vec());
    stream.append(&seal::seal_hash(second));
    stream.append(&sig_of(second)?.to_vec());
    Ok(stream.out())
}

fn verify_double_sign_payload(evidence: &Evidence) -> bool {
    let rlp = rlp::Rlp::new(&evidence.payload);
    let decode = || -> Result<(Hash, Vec<u8>, Hash, Vec<u8>), rlp::DecoderError> {
        Ok((rlp.val_at(0)?, rlp.val_at(1)?, rlp.val_at(2)?, rlp.val_at(3)?))
    };
    let (hash_a, sig_a, hash_b, sig_b) = match decode() {
        Ok(parts) => parts,
        Err(_) => return false,
    };
    if hash_a == hash_b {
        return false;
    }
    let as_sig = |bytes: Vec<u8>| -> Option<SealSignature> {
        let mut sig = [0u8; eirene_types::SIGNATURE_LENGTH];
        if bytes.len() != sig.len() {
            return None;
        }
        sig.copy_from_slice(&bytes);
        Some(sig)
    };
    let (Some(sig_a), Some(sig_b)) = (as_sig(sig_a), as_sig(sig_b)) else {
        return false;
    };
    let recovered = |hash, sig: &SealSignature| seal::recover_address(hash, sig).ok();
    recovered(hash_a, &sig_a) == Some(evidence.validator)
        && recovered(hash_b, &sig_b) == Some(evidence.validator)
}

fn verify_downtime_payload(evidence: &Evidence) -> bool {
    let rlp = rlp::Rlp::new(&evidence.payload);
    let decode = || -> Result<(Address, u64, u64), rlp::DecoderError> {
        Ok((rlp.val_at(0)?, rlp.val_at(1)?, rlp.val_at(2)?))
    };
    match decode() {
        Ok((validator, from, to)) => {
            validator == evidence.validator && from <= to && to <= evidence.height
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eirene_types::{SIGNATURE_LENGTH, VANITY_LENGTH};
    use secp256k1::SecretKey;
    use std::collections::HashMap as Map;
    use std::sync::Arc;

    fn key(byte: u8) -> (SecretKey, Address) {
        let sk = SecretKey::from_slice(&[byte; 32]).unwrap();
        let secp = secp256k1::Secp256k1::new();
        let pubkey = secp256k1::PublicKey::from_secret_key(&secp, &sk);
        let uncompressed = pubkey.serialize_uncompressed();
        let hash = keccak_hash::keccak(&uncompressed[1..]);
        (sk, Address::from_slice(&hash.as_bytes()[12..]))
    }

    fn snapshot_with(validators: &[(Address, u64)]) -> Arc<RwLock<Snapshot>> {
        let addrs: Vec<Address> = validators.iter().map(|(a, _)| *a).collect();
        let g = Header {
            extra: Header::encode_checkpoint_extra(&[0u8; VANITY_LENGTH], &addrs),
            ..Header::default()
        };
        let mut snap = Snapshot::genesis(&g, &Map::new()).unwrap();
        for (addr, stake) in validators {
            snap.stakes.insert(*addr, BigUint::from(*stake));
        }
        Arc::new(RwLock::new(snap))
    }

    fn layer(validators: &[(Address, u64)]) -> (BftLayer, Arc<RwLock<Snapshot>>) {
        let snap = snapshot_with(validators);
        let bft = BftLayer::new(Arc::clone(&snap), 2.0 / 3.0, SlashingConfig::default());
        (bft, snap)
    }

    fn addr(byte: u64) -> Address {
        Address::from_low_u64_be(byte)
    }

    fn sealed_header(number: u64, time: u64, sk: &SecretKey) -> Header {
        let mut header = Header {
            number,
            time,
            extra: vec![0u8; VANITY_LENGTH + SIGNATURE_LENGTH],
            ..Header::default()
        };
        let sig = seal::sign_header(&header, sk).unwrap();
        seal::splice_signature(&mut header, &sig).unwrap();
        header
    }

    #[test]
    fn consensus_requires_two_thirds_of_validators() {
        let (bft, _) = layer(&[(addr(1), 10), (addr(2), 10), (addr(3), 10)]);
        let block = Hash::from_low_u64_be(7);

        assert!(bft.submit_vote(block, addr(1), true));
        assert!(!bft.has_consensus(&block)); // 1/3 < ceil(3 * 2/3) = 2
        assert!(bft.submit_vote(block, addr(2), true));
        assert!(bft.has_consensus(&block));
    }

    #[test]
    fn non_validators_and_duplicate_voters_are_rejected() {
        let (bft, _) = layer(&[(addr(1), 10)]);
        let block = Hash::from_low_u64_be(7);

        assert!(!bft.submit_vote(block, addr(99), true));
        assert!(bft.submit_vote(block, addr(1), true));
        assert!(!bft.submit_vote(block, addr(1), true));
    }

    #[test]
    fn nay_votes_do_not_advance_the_tally() {
        let (bft, _) = layer(&[(addr(1), 10), (addr(2), 10)]);
        let block = Hash::from_low_u64_be(7);

        assert!(bft.submit_vote(block, addr(1), false));
        assert!(bft.submit_vote(block, addr(2), false));
        assert!(!bft.has_consensus(&block));
    }

    #[test]
    fn reached_consensus_is_monotone_even_after_vote_expiry() {
        let (bft, _) = layer(&[(addr(1), 10), (addr(2), 10), (addr(3), 10)]);
        let block = Hash::from_low_u64_be(7);
        bft.submit_vote(block, addr(1), true);
        bft.submit_vote(block, addr(2), true);
        assert!(bft.has_consensus(&block));

        bft.expire_votes(&block);
        assert!(bft.has_consensus(&block));
    }

    #[test]
    fn double_sign_report_verifies_and_slashes_once() {
        let _ = env_logger::try_init();
        let (sk, validator) = key(1);
        let snap = snapshot_with(&[(validator, 0)]);
        snap.write().stakes.insert(validator, BigUint::from(1000u64));
        snap.write().number = 100;
        let bft = BftLayer::new(Arc::clone(&snap), 2.0 / 3.0, SlashingConfig::default());

        // Two distinct sealed headers at the same height.
        let first = sealed_header(10, 40, &sk);
        let second = sealed_header(10, 44, &sk);
        let hash = bft
            .report_double_sign(&first, &second, addr(9), 1234)
            .unwrap();

        assert!(bft.verify_evidence(&hash));
        assert!(bft.execute_slashing(&hash));
        assert_eq!(
            *snap.read().stakes.get(&validator).unwrap(),
            BigUint::from(950u64) // 5% of 1000 slashed
        );
        assert!(snap.read().is_jailed_at(&validator, 100 + 86_399));
        assert_eq!(bft.faulty_validators(), vec![(validator, 1)]);

        // Slashing the same evidence again must not touch stake.
        assert!(!bft.execute_slashing(&hash));
        assert_eq!(*snap.read().stakes.get(&validator).unwrap(), BigUint::from(950u64));
    }

    #[test]
    fn unverified_evidence_blocks_slashing() {
        let (sk, validator) = key(1);
        let snap = snapshot_with(&[(validator, 0)]);
        snap.write().stakes.insert(validator, BigUint::from(1000u64));
        let bft = BftLayer::new(Arc::clone(&snap), 2.0 / 3.0, SlashingConfig::default());

        let header = sealed_header(10, 40, &sk);
        // Same header twice is rejected outright.
        assert!(bft.report_double_sign(&header, &header, addr(9), 0).is_err());

        // Hand-crafted evidence with a garbage payload survives
        // submission but fails verification, so slashing stays gated.
        let bogus = Evidence::new(
            EvidenceKind::DoubleSign,
            validator,
            10,
            Hash::zero(),
            0,
            vec![1, 2, 3],
            addr(9),
        );
        let hash = bft.submit_evidence(bogus);
        assert!(!bft.verify_evidence(&hash));
        assert!(!bft.execute_slashing(&hash));
        assert_eq!(*snap.read().stakes.get(&validator).unwrap(), BigUint::from(1000u64));
    }

    #[test]
    fn resubmitted_evidence_changes_nothing() {
        let (bft, _) = layer(&[(addr(1), 10)]);
        let e = Evidence::new(
            EvidenceKind::Downtime,
            addr(1),
            10,
            Hash::zero(),
            0,
            vec![9],
            addr(2),
        );
        let h1 = bft.submit_evidence(e.clone());
        let h2 = bft.submit_evidence(e);
        assert_eq!(h1, h2);
        assert_eq!(bft.evidence_count(), 1);
    }

    #[test]
    fn downtime_report_round_trips_through_verification() {
        let (bft, snap) = layer(&[(addr(1), 10)]);
        snap.write().number = 600;
        let hash = bft.report_downtime(addr(1), 100, 150, addr(2), 0).unwrap();
        assert!(bft.verify_evidence(&hash));
        assert!(bft.execute_slashing(&hash));
        assert!(snap.read().is_jailed_at(&addr(1), 700));
    }

    #[test]
    fn cleanup_drops_only_expired_evidence() {
        let (bft, _) = layer(&[(addr(1), 10)]);
        bft.report_downtime(addr(1), 5, 10, addr(2), 0).unwrap();
        bft.report_downtime(addr(1), 9_990, 10_000, addr(2), 0).unwrap();

        let removed = bft.cleanup_expired_evidence(10_100, 100);
        assert_eq!(removed, 1);
        assert_eq!(bft.evidence_count(), 1);
    }
}
