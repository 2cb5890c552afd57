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

//! Error taxonomy shared by every component of the consensus core.
//!
//! Mirrors `engines::EngineError` in shape: a flat enum of plain
//! variants rather than a macro-generated chain, with `Display`
//! hand-implemented. Every fallible boundary in `eirene-core` returns
//! `Result<T, Error>`.

use std::fmt;

use crate::Address;

/// The eight header-verification sub-kinds named in the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderInvalidKind {
    UnknownBlock,
    MissingVanity,
    MissingSignature,
    ExtraSigners,
    InvalidCheckpointSigners,
    InvalidCheckpointBeneficiary,
    InvalidMixDigest,
    InvalidUncleHash,
    InvalidNonce,
    InvalidTimestamp,
    InvalidDifficulty(u64),
    RecentlySigned(Address),
    UnauthorizedSigner(Address),
}

impl fmt::Display for HeaderInvalidKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HeaderInvalidKind::UnknownBlock => write!(f, "unknown block"),
            HeaderInvalidKind::MissingVanity => write!(f, "extra-data missing 32-byte vanity"),
            HeaderInvalidKind::MissingSignature => write!(f, "extra-data missing 65-byte signature"),
            HeaderInvalidKind::ExtraSigners => write!(f, "extra-data has unexpected length"),
            HeaderInvalidKind::InvalidCheckpointSigners => {
                write!(f, "checkpoint validator list is malformed")
            }
            HeaderInvalidKind::InvalidCheckpointBeneficiary => {
                write!(f, "checkpoint coinbase must be zero")
            }
            HeaderInvalidKind::InvalidMixDigest => write!(f, "mix digest must be zero"),
            HeaderInvalidKind::InvalidUncleHash => write!(f, "uncle hash must be empty"),
            HeaderInvalidKind::InvalidNonce => write!(f, "nonce must be zero"),
            HeaderInvalidKind::InvalidTimestamp => {
                write!(f, "timestamp is below the parent's plus the minimum period")
            }
            HeaderInvalidKind::InvalidDifficulty(d) => {
                write!(f, "difficulty {} is neither in-turn nor out-of-turn", d)
            }
            HeaderInvalidKind::RecentlySigned(addr) => {
                write!(f, "signer {:?} is within the recent-signer window", addr)
            }
            HeaderInvalidKind::UnauthorizedSigner(addr) => {
                write!(f, "signer {:?} is not an authorized validator", addr)
            }
        }
    }
}

/// Top-level error kind. Never exposed to callers as a stringly-typed
/// message; every variant is a concrete, matchable outcome.
#[derive(Debug)]
pub enum Error {
    /// Header failed verification; fatal for that header, never retried internally.
    HeaderInvalid(HeaderInvalidKind),
    /// The parent snapshot could not be resolved; caller may retry after sync.
    UnknownAncestor,
    /// The worker pool's task queue is at capacity.
    QueueFull,
    /// The worker pool has been stopped and is no longer accepting submissions.
    WorkerPoolStopped,
    /// The dependency analyzer's over-approximation admitted a cycle; the
    /// offending transaction was pushed into a terminal level.
    TxDependencyCycle,
    /// A caller supplied an out-of-range or otherwise invalid parameter.
    InvalidParameter(String),
    /// A programming error surfaced at runtime (including a caught worker panic).
    InternalError(String),
    /// A collaborator interface is a placeholder with no real implementation wired in.
    NotImplemented(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::HeaderInvalid(kind) => write!(f, "header invalid: {}", kind),
            Error::UnknownAncestor => write!(f, "unknown ancestor"),
            Error::QueueFull => write!(f, "worker pool queue is full"),
            Error::WorkerPoolStopped => write!(f, "worker pool is stopped"),
            Error::TxDependencyCycle => write!(f, "transaction dependency cycle detected"),
            Error::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
            Error::InternalError(msg) => write!(f, "internal error: {}", msg),
            Error::NotImplemented(what) => write!(f, "not implemented: {}", what),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
