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

//! Seal / hash codec: canonical header encoding and signer recovery.
//! The seal hash strips the trailing signature from `extra` before
//! hashing, so signing and recovery agree on the same pre-image, and
//! post-fork header fields join the encoding only once present.

use eirene_types::{Address, Error, Hash, HeaderInvalidKind, Header, SIGNATURE_LENGTH, VANITY_LENGTH};
use parking_lot::Mutex;
use lru_cache::LruCache;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1, SecretKey};

const RECOVERY_CACHE_CAPACITY: usize = 4_096;

/// Keccak-256 of the header's canonical RLP encoding with the 65-byte
/// signature suffix stripped from `extra`. `Header`'s `Encodable` impl
/// already performs the stripping.
pub fn seal_hash(header: &Header) -> Hash {
    keccak_hash::keccak(rlp::encode(header))
}

/// The block's full content hash, used as the snapshot-store and
/// chain-walk key. Unlike [`seal_hash`], this includes the signature:
/// it identifies a fully-sealed block rather than the pre-image a
/// proposer signs.
pub fn block_hash(header: &Header) -> Hash {
    let mut preimage = seal_hash(header).as_bytes().to_vec();
    preimage.extend_from_slice(&header.extra);
    keccak_hash::keccak(preimage)
}

/// A 65-byte recoverable secp256k1 signature: `r (32) || s (32) || v (1, in {0,1})`.
pub type SealSignature = [u8; SIGNATURE_LENGTH];

/// Signs the header's seal hash with `secret_key`, returning the raw
/// 65-byte signature ready to be spliced into `extra`'s tail.
pub fn sign_header(header: &Header, secret_key: &SecretKey) -> Result<SealSignature, Error> {
    let secp = Secp256k1::signing_only();
    let msg = Message::from_slice(seal_hash(header).as_bytes())
        .map_err(|e| Error::InternalError(format!("invalid message for signing: {}", e)))?;
    let sig = secp.sign_ecdsa_recoverable(&msg, secret_key);
    let (recovery_id, compact) = sig.serialize_compact();
    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..64].copy_from_slice(&compact);
    out[64] = recovery_id.to_i32() as u8;
    Ok(out)
}

/// Splices `signature` into the tail of `header.extra`, replacing
/// whatever 65 bytes were previously there (a zeroed placeholder on a
/// freshly-`prepare`d header).
pub fn splice_signature(header: &mut Header, signature: &SealSignature) -> Result<(), Error> {
    let len = header.extra.len();
    if len < VANITY_LENGTH + SIGNATURE_LENGTH {
        return Err(Error::HeaderInvalid(HeaderInvalidKind::MissingVanity));
    }
    header.extra[len - SIGNATURE_LENGTH..].copy_from_slice(signature);
    Ok(())
}

fn address_from_pubkey(pubkey: &secp256k1::PublicKey) -> Address {
    let uncompressed = pubkey.serialize_uncompressed();
    // Drop the leading 0x04 type byte before hashing, per the external
    // interfaces section.
    let hash = keccak_hash::keccak(&uncompressed[1..]);
    Address::from_slice(&hash.as_bytes()[12..])
}

/// Recovers the secp256k1 signer of `header`. Memoizes
/// `headerHash -> Address` in a small LRU, keyed by the seal hash and
/// signature together (the two inputs `recover_signer` is pure over).
pub struct SignerRecovery {
    cache: Mutex<LruCache<(Hash, SealSignature), Address>>,
}

impl SignerRecovery {
    pub fn new() -> Self {
        SignerRecovery::with_capacity(RECOVERY_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        SignerRecovery {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn recover(&self, header: &Header) -> Result<Address, Error> {
        let signature = header
            .signature()
            .ok_or(Error::HeaderInvalid(HeaderInvalidKind::MissingSignature))?;
        let hash = seal_hash(header);
        let key = (hash, signature);

        if let Some(addr) = self.cache.lock().get_mut(&key) {
            return Ok(*addr);
        }

        let addr = recover_address(hash, &signature)?;
        self.cache.lock().insert(key, addr);
        Ok(addr)
    }
}

impl Default for SignerRecovery {
    fn default() -> Self {
        SignerRecovery::new()
    }
}

/// Recovers the signing address from a bare `(hash, signature)` pair,
/// for callers that hold a detached signature rather than a full
/// header (evidence verification, most notably).
pub fn recover_address(hash: Hash, signature: &SealSignature) -> Result<Address, Error> {
    let secp = Secp256k1::verification_only();
    let msg = Message::from_slice(hash.as_bytes())
        .map_err(|e| Error::InternalError(format!("invalid message for recovery: {}", e)))?;
    let recovery_id = RecoveryId::from_i32(signature[64] as i32)
        .map_err(|_| Error::HeaderInvalid(HeaderInvalidKind::MissingSignature))?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|_| Error::HeaderInvalid(HeaderInvalidKind::MissingSignature))?;
    let pubkey = secp
        .recover_ecdsa(&msg, &recoverable)
        .map_err(|_| Error::HeaderInvalid(HeaderInvalidKind::MissingSignature))?;
    Ok(address_from_pubkey(&pubkey))
}

/// Free-function form, for call sites that don't want to own a
/// [`SignerRecovery`] cache (e.g. one-shot tests).
pub fn recover_signer(header: &Header) -> Result<Address, Error> {
    recover_address(seal_hash(header), &header
        .signature()
        .ok_or(Error::HeaderInvalid(HeaderInvalidKind::MissingSignature))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eirene_types::VANITY_LENGTH;

    fn secret_key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    fn base_header() -> Header {
        let mut extra = vec![0u8; VANITY_LENGTH + SIGNATURE_LENGTH];
        extra[0] = 0xaa;
        Header {
            number: 42,
            extra,
            ..Header::default()
        }
    }

    #[test]
    fn seal_round_trip_recovers_the_signer() {
        let secp = Secp256k1::new();
        let sk = secret_key(7);
        let pubkey = secp256k1::PublicKey::from_secret_key(&secp, &sk);
        let expected = address_from_pubkey(&pubkey);

        let mut header = base_header();
        let sig = sign_header(&header, &sk).unwrap();
        splice_signature(&mut header, &sig).unwrap();

        let recovered = recover_signer(&header).unwrap();
        assert_eq!(recovered, expected);
    }

    #[test]
    fn different_headers_recover_different_signers_with_different_keys() {
        let mut h1 = base_header();
        let mut h2 = base_header();
        h2.number = 43;

        let sk1 = secret_key(1);
        let sk2 = secret_key(2);

        let sig1 = sign_header(&h1, &sk1).unwrap();
        splice_signature(&mut h1, &sig1).unwrap();
        let sig2 = sign_header(&h2, &sk2).unwrap();
        splice_signature(&mut h2, &sig2).unwrap();

        assert_ne!(recover_signer(&h1).unwrap(), recover_signer(&h2).unwrap());
    }

    #[test]
    fn recovery_cache_returns_consistent_results() {
        let cache = SignerRecovery::new();
        let sk = secret_key(3);
        let mut header = base_header();
        let sig = sign_header(&header, &sk).unwrap();
        splice_signature(&mut header, &sig).unwrap();

        let a = cache.recover(&header).unwrap();
        let b = cache.recover(&header).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_signature_is_rejected() {
        let header = Header {
            extra: vec![0u8; VANITY_LENGTH],
            ..Header::default()
        };
        assert!(matches!(
            recover_signer(&header),
            Err(Error::HeaderInvalid(HeaderInvalidKind::MissingSignature))
        ));
    }
}
