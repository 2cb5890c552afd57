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

//! Proof-of-stake consensus core: validator snapshots, the seal
//! codec, an adaptive worker pool, a transaction dependency analyzer,
//! a state batch processor, a block-time controller, a BFT layer, the
//! consensus engine that integrates them, an auto-tuner, bounded
//! caches, and profiler hooks.

pub mod batch;
pub mod bft;
pub mod blocktime;
pub mod cache;
pub mod config;
pub mod deps;
pub mod engine;
pub mod pool;
pub mod profiler;
pub mod seal;
pub mod snapshot;
pub mod tuner;

pub use batch::BatchProcessor;
pub use bft::BftLayer;
pub use blocktime::{BlockTimeController, Signals, Thresholds};
pub use cache::{BoundedCache, BufferedStore, CacheStats, EvictionCallback};
pub use config::{Config, PeriodBounds, SlashingConfig};
pub use deps::{partition, partition_lenient, Level};
pub use engine::{accumulated_difficulty, Engine, EngineStatus, ValidatorStatus};
pub use pool::WorkerPool;
pub use profiler::{Profiler, Stage};
pub use seal::{
    block_hash, recover_address, recover_signer, seal_hash, sign_header, splice_signature,
    SealSignature, SignerRecovery,
};
pub use snapshot::{ChainReader, Delegation, Performance, Snapshot, SnapshotStore, Tally};
pub use tuner::{AutoTuner, Parameter};
