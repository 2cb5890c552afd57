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

//! Consensus engine: header verification, preparation, sealing, and
//! finalization, tying together the snapshot store, seal codec,
//! worker pool, dependency analyzer, batch processor, block-time
//! controller, and BFT layer, with the profiler sampling each
//! pipeline stage and the auto-tuner nudging the exposed knobs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use eirene_types::{
    Address, BigUint, Error, Governance, Hash, Header, HeaderInvalidKind, KVStore, Rewards,
    StateHandle, StateTransition, Transaction, DIFF_INTURN, DIFF_NOTURN, NONCE_AUTH_VOTE,
    NONCE_DROP_VOTE, ADDRESS_LENGTH, SIGNATURE_LENGTH, VANITY_LENGTH,
};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use secp256k1::SecretKey;

use crate::batch::BatchProcessor;
use crate::bft::BftLayer;
use crate::blocktime::BlockTimeController;
use crate::config::{Config, PeriodBounds, SlashingConfig};
use crate::deps::partition_lenient;
use crate::pool::WorkerPool;
use crate::profiler::{Profiler, Stage};
use crate::seal::{self, SignerRecovery};
use crate::snapshot::{ChainReader, Performance, Snapshot, SnapshotStore};
use crate::tuner::{AutoTuner, Parameter};

/// Base unit of the out-of-turn sealing delay; the delay grows with
/// the signer's position in the sorted validator order.
const WIGGLE_MS: u64 = 500;

/// Engine-held identity for blocks this node proposes.
struct Signer {
    secret_key: SecretKey,
    address: Address,
}

/// Signer identity plus the operator's pending authorize/kick
/// proposals, guarded together by the engine's one `RwLock`.
struct Inner {
    signer: Option<Signer>,
    proposals: HashMap<Address, bool>,
}

/// The external collaborators wired in by `set_chain_context`.
#[derive(Clone)]
struct Collaborators {
    transition: Arc<dyn StateTransition>,
    rewards: Arc<dyn Rewards>,
    governance: Arc<dyn Governance>,
}

/// One-line operational summary, shaped for a status RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub head_number: u64,
    pub validator_count: usize,
    pub evidence_count: usize,
    pub target_period: u64,
    pub workers: usize,
    pub queue_depth: usize,
}

/// A validator's standing at the head snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorStatus {
    pub weight: u64,
    pub stake: BigUint,
    pub jailed_until: Option<u64>,
    pub performance: Performance,
}

/// Ties the consensus collaborators together behind the block
/// lifecycle operations. Lifecycle: `new` -> `set_chain_context` ->
/// `start` -> (verify/prepare/seal/finalize) -> `close`. Instantiable;
/// nothing engine-wide is a singleton.
pub struct Engine {
    config: Config,
    bounds: PeriodBounds,
    snapshots: SnapshotStore,
    recovery: SignerRecovery,
    pool: Arc<WorkerPool>,
    bft: BftLayer,
    blocktime: BlockTimeController,
    profiler: Profiler,
    tuner: AutoTuner,
    batch: BatchProcessor,
    head: Arc<RwLock<Snapshot>>,
    inner: RwLock<Inner>,
    collaborators: RwLock<Option<Collaborators>>,
}

impl Engine {
    pub fn new(config: Config, slashing: SlashingConfig, db: Box<dyn KVStore>) -> Self {
        let bounds = PeriodBounds::default();
        let pool = Arc::new(WorkerPool::new(
            config.worker_min,
            config.worker_max,
            config.queue_size,
        ));
        let head = Arc::new(RwLock::new(Snapshot::default()));
        let bft = BftLayer::new(Arc::clone(&head), config.consensus_threshold, slashing);
        let blocktime =
            BlockTimeController::new(config.period, bounds, config.adjustment_factor);
        let tuner = AutoTuner::new();
        tuner.register(
            "worker_pool_size",
            Parameter::new(
                config.worker_min as f64,
                config.worker_min as f64,
                config.worker_max as f64,
                1.0,
                1.0,
            ),
        );
        tuner.register(
            "batch_size",
            Parameter::new(config.batch_size as f64, 10.0, 1_000.0, 10.0, 1.0),
        );
        tuner.register(
            "cache_size",
            Parameter::new(config.cache_size as f64, 128.0, 8_192.0, 128.0, 0.5),
        );
        tuner.register(
            "block_time_target",
            Parameter::new(config.period as f64, bounds.min as f64, bounds.max as f64, 1.0, 1.0),
        );
        Engine {
            snapshots: SnapshotStore::new(db, config.clone()),
            recovery: SignerRecovery::new(),
            batch: BatchProcessor::new(config.batch_size),
            config,
            bounds,
            pool,
            bft,
            blocktime,
            profiler: Profiler::new(0.8, 3),
            tuner,
            head,
            inner: RwLock::new(Inner {
                signer: None,
                proposals: HashMap::new(),
            }),
            collaborators: RwLock::new(None),
        }
    }

    /// Bootstraps the head snapshot from the genesis header and wires
    /// in the external collaborators.
    pub fn set_chain_context(
        &self,
        genesis: &Header,
        initial_stakes: &HashMap<Address, BigUint>,
        transition: Arc<dyn StateTransition>,
        rewards: Arc<dyn Rewards>,
        governance: Arc<dyn Governance>,
    ) -> Result<(), Error> {
        let snap = Snapshot::genesis(genesis, initial_stakes)?;
        *self.head.write() = snap;
        *self.collaborators.write() = Some(Collaborators {
            transition,
            rewards,
            governance,
        });
        Ok(())
    }

    /// Starts the background machinery (currently the pool's scaling
    /// loop). Idempotent.
    pub fn start(&self) {
        self.pool.start();
    }

    /// Stops accepting work and joins the worker pool. Idempotent.
    pub fn close(&self) {
        self.pool.stop();
    }

    pub fn set_signer(&self, secret_key: SecretKey, address: Address) {
        self.inner.write().signer = Some(Signer {
            secret_key,
            address,
        });
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The address this engine proposes blocks as, if any.
    pub fn author(&self) -> Option<Address> {
        self.inner.read().signer.as_ref().map(|s| s.address)
    }

    pub fn seal_hash(&self, header: &Header) -> Hash {
        seal::seal_hash(header)
    }

    /// Queues a proposal to authorize (`true`) or kick (`false`)
    /// `candidate`; `prepare` folds pending proposals into the headers
    /// this node seals until they are discarded or become moot.
    pub fn propose(&self, candidate: Address, authorize: bool) {
        self.inner.write().proposals.insert(candidate, authorize);
    }

    /// Withdraws a pending proposal.
    pub fn discard(&self, candidate: &Address) {
        self.inner.write().proposals.remove(candidate);
    }

    pub fn proposals(&self) -> HashMap<Address, bool> {
        self.inner.read().proposals.clone()
    }

    /// Verifies one header against its resolved parent snapshot.
    pub fn verify_header(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), Error> {
        let started = Instant::now();
        let result = self.verify_header_inner(chain, header, parents);
        self.profiler.record(Stage::Verify, started.elapsed());
        result
    }

    fn verify_header_inner(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
    ) -> Result<(), Error> {
        let parent = find_parent(chain, parents, header)?;
        if header.number != parent.number + 1 {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::UnknownBlock));
        }
        if header.time < parent.time + self.bounds.min {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::InvalidTimestamp));
        }
        if header.difficulty != DIFF_INTURN && header.difficulty != DIFF_NOTURN {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::InvalidDifficulty(
                header.difficulty,
            )));
        }
        if !header.uncle_hash.is_zero() {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::InvalidUncleHash));
        }
        if header.nonce != [0u8; 8] && header.nonce != NONCE_AUTH_VOTE && header.nonce != NONCE_DROP_VOTE {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::InvalidNonce));
        }
        if !header.mix_digest.is_zero() {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::InvalidMixDigest));
        }
        if header.extra.len() < VANITY_LENGTH + SIGNATURE_LENGTH {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::MissingVanity));
        }

        let is_checkpoint = header.number % self.config.epoch == 0;
        if is_checkpoint {
            if header.coinbase != Address::zero() {
                return Err(Error::HeaderInvalid(
                    HeaderInvalidKind::InvalidCheckpointBeneficiary,
                ));
            }
            if header.nonce != [0u8; 8] {
                return Err(Error::HeaderInvalid(HeaderInvalidKind::InvalidNonce));
            }
            header.checkpoint_validators()?;
        }

        let signer = self.recovery.recover(header)?;
        let snap = self.snapshots.load_or_build(
            chain,
            parent.number,
            seal::block_hash(&parent),
            parents,
        )?;
        if !snap.validators.contains_key(&signer) {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::UnauthorizedSigner(signer)));
        }
        if snap.recents.values().any(|a| *a == signer) {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::RecentlySigned(signer)));
        }
        Ok(())
    }

    /// Verifies a batch of headers, publishing one result per header
    /// onto `results` in order. Returns once every header has been
    /// verified or `abort` fires.
    pub fn verify_headers(
        &self,
        chain: &dyn ChainReader,
        headers: &[Header],
        results: Sender<(usize, Result<(), Error>)>,
        abort: Receiver<()>,
    ) {
        for (i, header) in headers.iter().enumerate() {
            if abort.try_recv().is_ok() {
                return;
            }
            let parents = &headers[..i];
            let outcome = self.verify_header(chain, header, parents);
            if results.send((i, outcome)).is_err() {
                return;
            }
        }
    }

    /// The `difficulty` marker for a block at `parent + 1` sealed by
    /// `signer`: 2 when the fair round-robin points at the signer, 1
    /// otherwise.
    pub fn calc_difficulty(
        &self,
        chain: &dyn ChainReader,
        parent: &Header,
        parents: &[Header],
        signer: &Address,
    ) -> Result<u64, Error> {
        let snap = self.snapshots.load_or_build(
            chain,
            parent.number,
            seal::block_hash(parent),
            parents,
        )?;
        Ok(if snap.inturn(parent.number + 1, signer) {
            DIFF_INTURN
        } else {
            DIFF_NOTURN
        })
    }

    /// Stamps an about-to-be-proposed header with the fields this
    /// engine, as proposer, is responsible for: timestamp from the
    /// block-time controller, the turn-order difficulty marker, and
    /// either the checkpoint validator list or a pending
    /// authorize/kick proposal in `extra`.
    pub fn prepare(
        &self,
        chain: &dyn ChainReader,
        header: &mut Header,
        parents: &[Header],
    ) -> Result<(), Error> {
        let parent = find_parent(chain, parents, header)?;
        let signer_address = self
            .author()
            .ok_or(Error::NotImplemented("no signer configured"))?;

        let snap = self.snapshots.load_or_build(
            chain,
            parent.number,
            seal::block_hash(&parent),
            parents,
        )?;

        header.time = parent.time + self.blocktime.target_period().max(self.bounds.min);
        header.difficulty = if snap.inturn(header.number, &signer_address) {
            DIFF_INTURN
        } else {
            DIFF_NOTURN
        };
        header.mix_digest = Hash::zero();
        header.nonce = [0u8; 8];

        let is_checkpoint = header.number % self.config.epoch == 0;
        if is_checkpoint {
            header.coinbase = Address::zero();
            header.extra =
                Header::encode_checkpoint_extra(&[0u8; VANITY_LENGTH], &snap.sorted_validators());
            return Ok(());
        }

        header.coinbase = signer_address;
        // Fold one pending proposal, chosen at random among those still
        // meaningful against the current validator set, into this header.
        let inner = self.inner.read();
        let candidates: Vec<(Address, bool)> = inner
            .proposals
            .iter()
            .filter(|&(candidate, authorize)| snap.validators.contains_key(candidate) != *authorize)
            .map(|(c, a)| (*c, *a))
            .collect();
        drop(inner);

        match candidates.choose(&mut rand::thread_rng()) {
            Some((candidate, authorize)) => {
                let mut extra =
                    Vec::with_capacity(VANITY_LENGTH + ADDRESS_LENGTH + SIGNATURE_LENGTH);
                extra.extend_from_slice(&[0u8; VANITY_LENGTH]);
                extra.extend_from_slice(candidate.as_bytes());
                extra.extend_from_slice(&[0u8; SIGNATURE_LENGTH]);
                header.extra = extra;
                header.nonce = if *authorize { NONCE_AUTH_VOTE } else { NONCE_DROP_VOTE };
            }
            None => {
                header.extra = vec![0u8; VANITY_LENGTH + SIGNATURE_LENGTH];
            }
        }
        Ok(())
    }

    /// Signs `header` in place. An out-of-turn proposer first waits a
    /// randomized delay proportional to its position in the sorted
    /// validator order, so the in-turn proposer usually wins the race;
    /// `stop` preempts the delay and aborts sealing.
    pub fn seal(
        &self,
        chain: &dyn ChainReader,
        header: &mut Header,
        parents: &[Header],
        stop: &Receiver<()>,
    ) -> Result<(), Error> {
        let parent = find_parent(chain, parents, header)?;
        let snap = self.snapshots.load_or_build(
            chain,
            parent.number,
            seal::block_hash(&parent),
            parents,
        )?;

        let inner = self.inner.read();
        let signer = inner
            .signer
            .as_ref()
            .ok_or(Error::NotImplemented("no signer configured"))?;
        if !snap.validators.contains_key(&signer.address) {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::UnauthorizedSigner(
                signer.address,
            )));
        }
        if snap.recents.values().any(|a| *a == signer.address) {
            return Err(Error::HeaderInvalid(HeaderInvalidKind::RecentlySigned(
                signer.address,
            )));
        }
        let secret_key = signer.secret_key;
        let address = signer.address;
        drop(inner);

        if header.difficulty == DIFF_NOTURN {
            let sorted = snap.sorted_validators();
            let position = sorted.iter().position(|a| *a == address).unwrap_or(0) as u64;
            let delay_ms = rand::thread_rng().gen_range(0, (position + 1) * WIGGLE_MS);
            log::trace!(
                target: "engine",
                "out-of-turn at block {}; delaying seal by {}ms",
                header.number, delay_ms
            );
            match stop.recv_timeout(Duration::from_millis(delay_ms)) {
                Ok(_) => return Err(Error::InternalError("seal aborted by stop signal".into())),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {}
            }
        }

        let signature = seal::sign_header(header, &secret_key)?;
        seal::splice_signature(header, &signature)?;
        Ok(())
    }

    /// Stake-weighted proposer selection, distinct from the round-robin
    /// `calc_difficulty` tie-break.
    pub fn proposer_for(
        &self,
        chain: &dyn ChainReader,
        number: u64,
        parent: &Header,
        parents: &[Header],
    ) -> Result<Option<Address>, Error> {
        let snap = self.snapshots.load_or_build(
            chain,
            parent.number,
            seal::block_hash(parent),
            parents,
        )?;
        Ok(snap.proposer_for(number))
    }

    /// Processes a sealed block's transactions and side effects,
    /// returning the post-state root: partitions the transactions into
    /// parallel levels, pre-executes each level across the worker pool
    /// on forked state views, commits through the batch processor,
    /// distributes rewards, runs governance, advances the head
    /// snapshot, and persists it on epoch boundaries.
    pub fn finalize(
        &self,
        chain: &dyn ChainReader,
        header: &Header,
        parents: &[Header],
        txs: &[Transaction],
        state: &mut dyn StateHandle,
        total_fees: BigUint,
    ) -> Result<Hash, Error> {
        let signer = self.recovery.recover(header)?;
        let root = self.execute_block(header, txs, state)?;
        self.distribute_and_govern(header, signer, total_fees)?;

        let parent = find_parent(chain, parents, header)?;
        let parent_snap = self.snapshots.load_or_build(
            chain,
            parent.number,
            seal::block_hash(&parent),
            parents,
        )?;
        let next = parent_snap.apply(header, &self.recovery, &self.config)?;
        if header.number % self.config.epoch == 0 {
            let started = Instant::now();
            self.snapshots.persist(&next)?;
            self.profiler.record(Stage::SnapshotPersist, started.elapsed());
            log::info!(
                target: "engine",
                "epoch boundary at block {}: snapshot persisted, validators reweighted",
                header.number
            );
        }
        *self.head.write() = next;
        Ok(root)
    }

    /// The proposer-side twin of `finalize`: same transaction
    /// pipeline, but the header is not yet sealed, so signer-recovery
    /// and head-snapshot advancement are deferred to the import path.
    pub fn finalize_and_assemble(
        &self,
        header: &Header,
        txs: &[Transaction],
        state: &mut dyn StateHandle,
        total_fees: BigUint,
    ) -> Result<Hash, Error> {
        let signer = self
            .author()
            .ok_or(Error::NotImplemented("no signer configured"))?;
        let root = self.execute_block(header, txs, state)?;
        self.distribute_and_govern(header, signer, total_fees)?;
        Ok(root)
    }

    fn collaborators(&self) -> Result<Collaborators, Error> {
        self.collaborators
            .read()
            .clone()
            .ok_or(Error::NotImplemented("chain context not set"))
    }

    fn execute_block(
        &self,
        header: &Header,
        txs: &[Transaction],
        state: &mut dyn StateHandle,
    ) -> Result<Hash, Error> {
        let collaborators = self.collaborators()?;
        let transition = collaborators.transition;

        let started = Instant::now();
        let levels = partition_lenient(txs);
        self.profiler.record(Stage::Dependency, started.elapsed());

        self.batch.reset();
        let exec_started = Instant::now();
        for level in &levels {
            self.prefetch_level(header, txs, level, state, &transition)?;
            for &idx in level {
                self.batch
                    .add_transaction(txs[idx].clone(), header, &*transition, state)?;
            }
        }
        self.profiler.record(Stage::BatchExecution, exec_started.elapsed());

        let flush_started = Instant::now();
        let root = self.batch.flush(header, &*transition, state)?;
        self.profiler.record(Stage::StateTransition, flush_started.elapsed());
        Ok(root)
    }

    /// Pre-executes one level's transactions in parallel across the
    /// pool, each chunk against its own forked state view. The
    /// analyzer guarantees the chunks touch disjoint keys, so the
    /// forks need no reconciling; the canonical commit still happens
    /// through the batch processor, against state the pre-execution
    /// has just warmed. Chunks the pool turns away run inline.
    fn prefetch_level(
        &self,
        header: &Header,
        txs: &[Transaction],
        level: &[usize],
        state: &dyn StateHandle,
        transition: &Arc<dyn StateTransition>,
    ) -> Result<(), Error> {
        if level.len() < 2 || self.pool.is_stopped() {
            return Ok(());
        }
        let chunk_count = self.pool.worker_count().max(1).min(level.len());
        let chunk_size = (level.len() + chunk_count - 1) / chunk_count;
        let (done_tx, done_rx) = crossbeam_channel::bounded(chunk_count);

        let mut dispatched = 0usize;
        for chunk in level.chunks(chunk_size) {
            let chunk_txs: Vec<Transaction> = chunk.iter().map(|&i| txs[i].clone()).collect();
            let mut view = state.fork();
            let task_transition = Arc::clone(transition);
            let task_header = header.clone();
            let done = done_tx.clone();
            dispatched += 1;
            let submitted = self.pool.submit(Box::new(move || {
                let result = task_transition
                    .apply(&task_header, &chunk_txs, &mut *view)
                    .map(|_| ());
                let _ = done.send(result);
            }));
            if submitted.is_err() {
                // Backpressure: no retry, run the chunk inline instead.
                let chunk_txs: Vec<Transaction> = chunk.iter().map(|&i| txs[i].clone()).collect();
                let mut view = state.fork();
                let result = transition.apply(header, &chunk_txs, &mut *view).map(|_| ());
                let _ = done_tx.send(result);
            }
        }
        drop(done_tx);

        for _ in 0..dispatched {
            match done_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(Error::InternalError(
                        "pre-execution worker panicked".into(),
                    ))
                }
            }
        }
        Ok(())
    }

    fn distribute_and_govern(
        &self,
        header: &Header,
        proposer: Address,
        total_fees: BigUint,
    ) -> Result<(), Error> {
        let collaborators = self.collaborators()?;
        collaborators.rewards.distribute(header, proposer, total_fees)?;
        collaborators.governance.process_proposals(header.number)?;
        Ok(())
    }

    /// One auto-tuning step: fold the profiler's view of the pipeline
    /// into a scalar score, let the tuner move a knob, and push the
    /// adjustable knobs back into their owners.
    pub fn run_tuning_cycle(&self) {
        let occupancy =
            self.pool.queue_depth() as f64 / self.config.queue_size.max(1) as f64;
        self.profiler.observe_queue_occupancy(occupancy);
        let bottleneck_ms = self
            .profiler
            .bottleneck()
            .and_then(|s| self.profiler.mean_duration(s))
            .map(|d| d.as_secs_f64() * 1_000.0)
            .unwrap_or(0.0);
        let score = -bottleneck_ms - occupancy * 100.0;
        self.tuner.tick(score);

        if let Some(batch_size) = self.tuner.value("batch_size") {
            self.batch.set_batch_size(batch_size.round() as usize);
        }
        if let Some(target) = self.tuner.value("block_time_target") {
            self.blocktime.set_target_period(target.round() as u64);
        }
    }

    // Accessors for the snapshot/status RPC surface and for the
    // background tickers the host drives.

    pub fn snapshot_at(
        &self,
        chain: &dyn ChainReader,
        number: u64,
        hash: Hash,
        parents: &[Header],
    ) -> Result<Snapshot, Error> {
        self.snapshots.load_or_build(chain, number, hash, parents)
    }

    pub fn head_snapshot(&self) -> Snapshot {
        self.head.read().clone()
    }

    pub fn validators(&self) -> Vec<Address> {
        self.head.read().sorted_validators()
    }

    pub fn validator_status(&self, addr: &Address) -> Option<ValidatorStatus> {
        let head = self.head.read();
        let weight = *head.validators.get(addr)?;
        Some(ValidatorStatus {
            weight,
            stake: head.stakes.get(addr).cloned().unwrap_or_default(),
            jailed_until: head.jailed_until.get(addr).copied(),
            performance: head.performance.get(addr).cloned().unwrap_or_default(),
        })
    }

    pub fn validator_stats(&self) -> BTreeMap<Address, Performance> {
        self.head.read().performance.clone()
    }

    pub fn status(&self) -> EngineStatus {
        let head = self.head.read();
        EngineStatus {
            head_number: head.number,
            validator_count: head.validators.len(),
            evidence_count: self.bft.evidence_count(),
            target_period: self.blocktime.target_period(),
            workers: self.pool.worker_count(),
            queue_depth: self.pool.queue_depth(),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn bft(&self) -> &BftLayer {
        &self.bft
    }

    pub fn blocktime(&self) -> &BlockTimeController {
        &self.blocktime
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn tuner(&self) -> &AutoTuner {
        &self.tuner
    }
}

/// Total difficulty of a chain segment, the fork-choice quantity: the
/// segment with the higher sum wins, so equal-length chains resolve in
/// favor of the one with more in-turn blocks.
pub fn accumulated_difficulty(headers: &[Header]) -> u64 {
    headers.iter().map(|h| h.difficulty).sum()
}

fn find_parent(
    chain: &dyn ChainReader,
    parents: &[Header],
    header: &Header,
) -> Result<Header, Error> {
    if let Some(h) = parents
        .iter()
        .rev()
        .find(|h| seal::block_hash(h) == header.parent_hash)
    {
        return Ok(h.clone());
    }
    chain
        .header_by_hash(&header.parent_hash)
        .ok_or(Error::UnknownAncestor)
}
