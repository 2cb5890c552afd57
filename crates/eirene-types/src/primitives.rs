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

//! Core scalar types. `Address` and `Hash` are thin aliases over
//! `ethereum_types::{H160, H256}`; `BigUint` is the 256-bit unsigned
//! integer this ecosystem already uses for stake and balance
//! arithmetic.

pub use ethereum_types::{Address, H256 as Hash, U256 as BigUint};

/// Length, in bytes, of the vanity prefix reserved in header `extra`.
pub const VANITY_LENGTH: usize = 32;
/// Length, in bytes, of the secp256k1 signature suffix in header `extra`.
pub const SIGNATURE_LENGTH: usize = 65;
/// Length, in bytes, of one packed validator address in a checkpoint's
/// inline validator list.
pub const ADDRESS_LENGTH: usize = 20;

/// The two nonce markers used to encode authorize/kick votes in a
/// non-checkpoint header, following the Clique lineage this engine
/// descends from.
pub const NONCE_AUTH_VOTE: [u8; 8] = [0xff; 8];
pub const NONCE_DROP_VOTE: [u8; 8] = [0x00; 8];

/// `difficulty` value used on in-turn (fair round-robin) blocks.
pub const DIFF_INTURN: u64 = 2;
/// `difficulty` value used on out-of-turn blocks.
pub const DIFF_NOTURN: u64 = 1;
