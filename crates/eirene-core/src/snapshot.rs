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

//! Validator snapshot store: an epoch-checkpointed, replayable,
//! persistent view of the validator set, their stakes, delegations,
//! performance, and slashing points. Lookups go LRU first, then the
//! key-value store, then recursive rebuild from the nearest resolvable
//! ancestor.

use std::collections::{BTreeMap, HashMap};

use eirene_types::{
    Address, BigUint, Error, Hash, Header, HeaderInvalidKind, KVStore, ADDRESS_LENGTH,
    SIGNATURE_LENGTH, VANITY_LENGTH,
};
use lru_cache::LruCache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::seal::{block_hash, SignerRecovery};

/// A validator's delegated stake from one delegator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub amount: BigUint,
    pub since: u64,
}

/// Rolling performance counters for one validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub blocks_proposed: u64,
    pub blocks_missed: u64,
    pub uptime: f64,
    pub last_active: u64,
}

impl Default for Performance {
    fn default() -> Self {
        Performance {
            blocks_proposed: 0,
            blocks_missed: 0,
            uptime: 1.0,
            last_active: 0,
        }
    }
}

impl Performance {
    fn refresh_uptime(&mut self) {
        let observed = self.blocks_proposed + self.blocks_missed;
        if observed > 0 {
            self.uptime = self.blocks_proposed as f64 / observed as f64;
        }
    }
}

/// An in-flight authorize/kick ballot for one candidate address,
/// accumulated over an epoch and consumed at the epoch boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    /// `voter -> authorize?` (true proposes adding, false proposes kicking).
    pub votes: BTreeMap<Address, bool>,
}

impl Tally {
    fn counts(&self) -> (usize, usize) {
        let yes = self.votes.values().filter(|v| **v).count();
        let no = self.votes.values().filter(|v| !**v).count();
        (yes, no)
    }
}

/// The complete, deterministic view of consensus state at a given
/// height: validators, recents, stakes, delegations, performance,
/// slashing. Pure data; `apply` is the only way to advance it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub number: u64,
    pub hash: Hash,
    /// Address -> turn-order weight (a tie-break; selection
    /// probability is driven by stake).
    pub validators: BTreeMap<Address, u64>,
    /// blockNumber -> signer, bounded to the recent-signer window.
    pub recents: BTreeMap<u64, Address>,
    pub stakes: BTreeMap<Address, BigUint>,
    pub delegations: BTreeMap<Address, BTreeMap<Address, Delegation>>,
    pub performance: BTreeMap<Address, Performance>,
    pub slashing_points: BTreeMap<Address, u64>,
    /// Address of a jailed validator -> height at which it may rejoin.
    pub jailed_until: BTreeMap<Address, u64>,
    /// candidate address -> accumulated ballot for this epoch.
    pub tally: BTreeMap<Address, Tally>,
}

impl Snapshot {
    /// The recent-signer window: `floor(|validators|/2) + 1`.
    pub fn recent_window(&self) -> usize {
        self.validators.len() / 2 + 1
    }

    /// Builds the genesis snapshot from the genesis header's
    /// checkpoint-style extra-data validator list.
    pub fn genesis(header: &Header, initial_stakes: &HashMap<Address, BigUint>) -> Result<Snapshot, Error> {
        if header.number != 0 {
            return Err(Error::InvalidParameter("genesis header must be number 0".into()));
        }
        let validator_addrs = header.checkpoint_validators()?;
        let mut validators = BTreeMap::new();
        let mut stakes = BTreeMap::new();
        let mut performance = BTreeMap::new();
        for addr in &validator_addrs {
            validators.insert(*addr, 1u64);
            let stake = initial_stakes.get(addr).cloned().unwrap_or_default();
            stakes.insert(*addr, stake);
            performance.insert(*addr, Performance::default());
        }
        Ok(Snapshot {
            number: 0,
            hash: block_hash(header),
            validators,
            recents: BTreeMap::new(),
            stakes,
            delegations: BTreeMap::new(),
            performance,
            slashing_points: BTreeMap::new(),
            jailed_until: BTreeMap::new(),
            tally: BTreeMap::new(),
        })
    }

    /// `validators_sorted[number mod |validators|] == address`.
    pub fn inturn(&self, number: u64, address: &Address) -> bool {
        if self.validators.is_empty() {
            return false;
        }
        let sorted = self.sorted_validators();
        let idx = (number as usize) % sorted.len();
        &sorted[idx] == address
    }

    /// Validators sorted canonically (by address), the order `inturn`
    /// and checkpoint extra-data encoding both rely on.
    pub fn sorted_validators(&self) -> Vec<Address> {
        let mut addrs: Vec<Address> = self.validators.keys().cloned().collect();
        addrs.sort();
        addrs
    }

    /// Stake-weighted proposer selection for height `number`, distinct
    /// from `inturn`'s fair round-robin.
    pub fn proposer_for(&self, number: u64) -> Option<Address> {
        let mut sorted = self.sorted_validators();
        sorted.retain(|a| !self.is_jailed_at(a, number));
        if sorted.is_empty() {
            return None;
        }
        let total: BigUint = sorted
            .iter()
            .map(|a| self.stakes.get(a).cloned().unwrap_or_default())
            .fold(BigUint::zero(), |acc, s| acc + s);
        if total.is_zero() {
            let idx = (number as usize) % sorted.len();
            return Some(sorted[idx]);
        }
        let seed = keccak_hash::keccak(number.to_be_bytes());
        let seed_value = BigUint::from_big_endian(seed.as_bytes()) % total;
        let mut acc = BigUint::zero();
        for addr in &sorted {
            acc = acc + self.stakes.get(addr).cloned().unwrap_or_default();
            if seed_value < acc {
                return Some(*addr);
            }
        }
        sorted.last().cloned()
    }

    pub fn is_jailed_at(&self, addr: &Address, number: u64) -> bool {
        self.jailed_until.get(addr).map(|until| number < *until).unwrap_or(false)
    }

    /// Pure state transition: produces the next snapshot from `header`.
    pub fn apply(&self, header: &Header, recovery: &SignerRecovery, config: &Config) -> Result<Snapshot, Error> {
        if header.number != self.number + 1 {
            return Err(Error::InvalidParameter(format!(
                "expected header number {}, got {}",
                self.number + 1,
                header.number
            )));
        }

        let signer = recovery.recover(header)?;
        if !self.validators.contains_key(&signer) {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::UnauthorizedSigner(signer)));
        }
        if self.is_jailed_at(&signer, header.number) {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::UnauthorizedSigner(signer)));
        }
        if self.recents.values().any(|a| *a == signer) {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::RecentlySigned(signer)));
        }

        let mut next = self.clone();
        next.number = header.number;
        next.hash = block_hash(header);

        next.recents.insert(header.number, signer);
        let window = next.recent_window();
        while next.recents.len() > window {
            let oldest = match next.recents.keys().next().copied() {
                Some(number) => number,
                None => break,
            };
            next.recents.remove(&oldest);
        }

        let is_checkpoint = header.number % config.epoch == 0;
        if !is_checkpoint {
            if let Some(authorize) = header.vote_nonce() {
                if header.extra.len() >= VANITY_LENGTH + ADDRESS_LENGTH + SIGNATURE_LENGTH {
                    let candidate = Address::from_slice(
                        &header.extra[VANITY_LENGTH..VANITY_LENGTH + ADDRESS_LENGTH],
                    );
                    // A validator may not vote twice on the same candidate within an epoch.
                    next.tally
                        .entry(candidate)
                        .or_insert_with(Tally::default)
                        .votes
                        .insert(signer, authorize);
                }
            }
        }

        let perf = next.performance.entry(signer).or_insert_with(Performance::default);
        perf.blocks_proposed += 1;
        perf.last_active = header.number;
        perf.refresh_uptime();

        // An out-of-turn seal means the round-robin proposer sat this
        // height out; charge the miss to its record.
        if header.difficulty == eirene_types::DIFF_NOTURN {
            let sorted = self.sorted_validators();
            let expected = sorted[(header.number as usize) % sorted.len()];
            if expected != signer {
                let missed = next
                    .performance
                    .entry(expected)
                    .or_insert_with(Performance::default);
                missed.blocks_missed += 1;
                missed.refresh_uptime();
            }
        }

        if is_checkpoint {
            next.apply_epoch_tally();
            next.reweight(config);
            next.unjail_expired(header.number);
        }

        Ok(next)
    }

    /// Consumes the accumulated tally at an epoch boundary: strict
    /// majority of the *current* validator set authorizes an add or a
    /// kick.
    fn apply_epoch_tally(&mut self) {
        let majority = self.validators.len() / 2 + 1;
        let mut to_add = Vec::new();
        let mut to_kick = Vec::new();
        for (candidate, tally) in self.tally.iter() {
            let (yes, no) = tally.counts();
            if self.validators.contains_key(candidate) {
                if no >= majority {
                    to_kick.push(*candidate);
                }
            } else if yes >= majority {
                to_add.push(*candidate);
            }
        }
        for addr in to_add {
            self.validators.insert(addr, 1);
            self.performance.entry(addr).or_insert_with(Performance::default);
            self.stakes.entry(addr).or_insert_with(BigUint::zero);
        }
        for addr in to_kick {
            self.validators.remove(&addr);
        }
        self.tally.clear();
    }

    /// Reweighting policy: `weight := 1 + floor(stake / unit)`,
    /// adjusted by uptime and discounted by slashing points. Weight is
    /// a turn-order tie-break only; selection probability is driven by
    /// stake directly.
    fn reweight(&mut self, config: &Config) {
        let unit = if config.min_stake.is_zero() {
            BigUint::from(1u64)
        } else {
            config.min_stake
        };
        let addrs: Vec<Address> = self.validators.keys().cloned().collect();
        for addr in addrs {
            let stake = self.stakes.get(&addr).cloned().unwrap_or_default();
            let mut weight = 1u64 + (stake / unit).low_u64();
            let uptime = self
                .performance
                .get(&addr)
                .map(|p| p.uptime)
                .unwrap_or(1.0);
            if uptime >= 0.99 {
                weight += 2;
            } else if uptime >= 0.95 {
                weight += 1;
            }
            if uptime < 0.8 {
                weight = (weight / 2).max(1);
            }
            let points = self.slashing_points.get(&addr).cloned().unwrap_or(0);
            let discount = points.min(weight.saturating_sub(1));
            weight -= discount;
            self.validators.insert(addr, weight.max(1));
        }
    }

    /// Deducts `ratio` of `validator`'s stake and returns the amount
    /// slashed. Called by the BFT layer's slashing execution, outside
    /// the header-driven `apply` path.
    pub fn slash(&mut self, validator: &Address, ratio: f64) -> BigUint {
        let stake = self.stakes.get(validator).cloned().unwrap_or_default();
        if stake.is_zero() || ratio <= 0.0 {
            return BigUint::zero();
        }
        let ratio_parts = (ratio.clamp(0.0, 1.0) * 1_000_000.0).round() as u64;
        let amount = stake * BigUint::from(ratio_parts) / BigUint::from(1_000_000u64);
        let remaining = stake.saturating_sub(amount);
        self.stakes.insert(*validator, remaining);
        *self.slashing_points.entry(*validator).or_insert(0) += 1;
        amount
    }

    /// Jails `validator` until `until_block`, removing it from turn
    /// selection but leaving its stake and history intact.
    pub fn jail(&mut self, validator: Address, until_block: u64) {
        self.jailed_until.insert(validator, until_block);
    }

    /// Records a delegation of `amount` from `delegator` to
    /// `validator`, crediting the validator's total stake so that
    /// delegated amounts plus self-stake always equal the tracked
    /// stake. A repeat delegation from the same delegator tops up the
    /// existing record and keeps its original `since` height.
    pub fn delegate(&mut self, validator: Address, delegator: Address, amount: BigUint, since: u64) {
        let entry = self
            .delegations
            .entry(validator)
            .or_insert_with(BTreeMap::new)
            .entry(delegator)
            .or_insert_with(|| Delegation { amount: BigUint::zero(), since });
        entry.amount = entry.amount + amount;
        let stake = self.stakes.entry(validator).or_insert_with(BigUint::zero);
        *stake = *stake + amount;
    }

    /// Withdraws `delegator`'s entire delegation from `validator`,
    /// returning the released amount.
    pub fn undelegate(&mut self, validator: &Address, delegator: &Address) -> BigUint {
        let Some(delegators) = self.delegations.get_mut(validator) else {
            return BigUint::zero();
        };
        let Some(removed) = delegators.remove(delegator) else {
            return BigUint::zero();
        };
        if delegators.is_empty() {
            self.delegations.remove(validator);
        }
        let stake = self.stakes.entry(*validator).or_insert_with(BigUint::zero);
        *stake = stake.saturating_sub(removed.amount);
        removed.amount
    }

    /// The validator's own stake: total tracked stake minus everything
    /// delegated to it.
    pub fn self_stake(&self, validator: &Address) -> BigUint {
        let total = self.stakes.get(validator).cloned().unwrap_or_default();
        let delegated = self
            .delegations
            .get(validator)
            .map(|d| {
                d.values()
                    .fold(BigUint::zero(), |acc, del| acc + del.amount)
            })
            .unwrap_or_default();
        total.saturating_sub(delegated)
    }

    /// Drops jail entries that have expired as of `current_block`.
    pub fn unjail_expired(&mut self, current_block: u64) {
        self.jailed_until.retain(|_, until| *until > current_block);
    }
}

fn snapshot_key(hash: &Hash) -> Vec<u8> {
    let mut key = b"eirene-".to_vec();
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Looks up a header by its content hash, either among a set of
/// not-yet-committed ancestors (`parents`) or the canonical chain.
pub trait ChainReader {
    fn header_by_hash(&self, hash: &Hash) -> Option<Header>;
}

fn find_header(chain: &dyn ChainReader, parents: &[Header], number: u64, hash: Hash) -> Result<Header, Error> {
    if let Some(h) = parents.iter().find(|h| h.number == number && block_hash(h) == hash) {
        return Ok(h.clone());
    }
    chain
        .header_by_hash(&hash)
        .filter(|h| h.number == number)
        .ok_or(Error::UnknownAncestor)
}

/// Persistent, replayable, LRU-cached store of snapshots. One
/// reader-writer lock guards the LRU, independently from any one
/// `load_or_build` call, which otherwise only touches pure `Snapshot`
/// values.
pub struct SnapshotStore {
    store: Box<dyn KVStore>,
    cache: RwLock<LruCache<Hash, Snapshot>>,
    config: Config,
    recovery: SignerRecovery,
}

const SNAPSHOT_CACHE_CAPACITY: usize = 128;

impl SnapshotStore {
    pub fn new(store: Box<dyn KVStore>, config: Config) -> Self {
        SnapshotStore {
            store,
            cache: RwLock::new(LruCache::new(SNAPSHOT_CACHE_CAPACITY)),
            config,
            recovery: SignerRecovery::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the snapshot at `(number, hash)`, building it by
    /// recursive replay from the nearest prior checkpoint if it isn't
    /// already cached or persisted.
    pub fn load_or_build(
        &self,
        chain: &dyn ChainReader,
        number: u64,
        hash: Hash,
        parents: &[Header],
    ) -> Result<Snapshot, Error> {
        if let Some(snap) = self.cache.write().get_mut(&hash) {
            return Ok(snap.clone());
        }
        if let Some(bytes) = self.store.get(&snapshot_key(&hash))? {
            let snap: Snapshot = serde_json::from_slice(&bytes)
                .map_err(|e| Error::InternalError(format!("corrupt snapshot: {}", e)))?;
            self.cache.write().insert(hash, snap.clone());
            return Ok(snap);
        }

        let header = find_header(chain, parents, number, hash)?;

        if number == 0 {
            let snap = Snapshot::genesis(&header, &HashMap::new())?;
            self.cache.write().insert(hash, snap.clone());
            self.persist(&snap)?;
            return Ok(snap);
        }

        let parent_snap = self.load_or_build(chain, number - 1, header.parent_hash, parents)?;
        let snap = parent_snap.apply(&header, &self.recovery, &self.config)?;

        if number % self.config.checkpoint_interval == 0 {
            self.persist(&snap)?;
        }
        self.cache.write().insert(hash, snap.clone());
        Ok(snap)
    }

    /// Serializes `snap` under its `"eirene-" || hash` key. Persistence
    /// failures are logged and swallowed; the in-memory snapshot stays
    /// authoritative for a later retry.
    pub fn persist(&self, snap: &Snapshot) -> Result<(), Error> {
        let bytes = serde_json::to_vec(snap)
            .map_err(|e| Error::InternalError(format!("failed to serialize snapshot: {}", e)))?;
        if let Err(e) = self.store.put(&snapshot_key(&snap.hash), &bytes) {
            log::warn!(target: "snapshot", "failed to persist snapshot at {}: {}", snap.number, e);
        }
        Ok(())
    }
}
