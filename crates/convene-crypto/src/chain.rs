//! Proof-of-knowledge hash chains
//!
//! # Plain chain
//!
//! ```text
//! chain[0] = SHA-256(secret)
//! chain[i] = SHA-256(chain[i-1])
//! ```
//!
//! Only `chain[rounds-1]` (the terminal) is published. Revealing the link
//! `k` steps before the terminal proves possession of the secret without
//! revealing it, and an observer can be shown at most `rounds - 1` further
//! links before the chain is exhausted.
//!
//! # Keyed chain
//!
//! Pseudonyms for participant ids are bound to a meeting secret:
//!
//! ```text
//! p[0] = HMAC-SHA256(key, value)
//! p[i] = HMAC-SHA256(key, p[i-1])
//! ```

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Number of rounds used for meeting secrets and pseudonyms.
pub const DEFAULT_CHAIN_ROUNDS: usize = 100;

/// SHA-256 output.
pub type Hash256 = [u8; 32];

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> Hash256 {
    Sha256::digest(data).into()
}

/// A fully materialized hash chain.
///
/// # Invariants
///
/// - `links` is non-empty
/// - `links[i] == sha256(links[i-1])` for every `i > 0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashChain {
    links: Vec<Hash256>,
}

impl HashChain {
    /// Number of links (rounds).
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Always false; a chain has at least one link.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Link at `index`, counted from `SHA-256(secret)`.
    pub fn link(&self, index: usize) -> Option<&Hash256> {
        self.links.get(index)
    }

    /// The published terminal value.
    pub fn terminal(&self) -> &Hash256 {
        // Invariant: constructed with at least one round.
        &self.links[self.links.len() - 1]
    }

    /// Hex encoding of the terminal, as published (`hashed_meeting_secret`).
    pub fn terminal_hex(&self) -> String {
        hex::encode(self.terminal())
    }

    /// The link that reaches the terminal after exactly `steps_from_end`
    /// hashes. `reveal(0)` is the terminal itself.
    pub fn reveal(&self, steps_from_end: usize) -> Option<&Hash256> {
        let index = self.links.len().checked_sub(steps_from_end)?.checked_sub(1)?;
        self.links.get(index)
    }
}

/// Generate a chain of `rounds` links seeded by `secret`.
///
/// # Errors
///
/// - `InvalidRounds` if `rounds` is zero
pub fn generate_chain(secret: &[u8], rounds: usize) -> Result<HashChain, CryptoError> {
    if rounds == 0 {
        return Err(CryptoError::InvalidRounds { rounds });
    }

    let mut links = Vec::with_capacity(rounds);
    links.push(sha256(secret));
    for i in 1..rounds {
        let next = sha256(&links[i - 1]);
        links.push(next);
    }

    debug_assert_eq!(links.len(), rounds);
    Ok(HashChain { links })
}

/// Check that hashing `revealed` exactly `steps_from_end` times reproduces
/// `public_terminal`.
pub fn verify_reveal(revealed: &Hash256, public_terminal: &Hash256, steps_from_end: usize) -> bool {
    let mut current = *revealed;
    for _ in 0..steps_from_end {
        current = sha256(&current);
    }
    current == *public_terminal
}

/// Keyed pseudonym chain of `rounds` HMAC-SHA256 applications.
///
/// # Errors
///
/// - `InvalidRounds` if `rounds` is zero
pub fn keyed_chain(value: &[u8], key: &[u8], rounds: usize) -> Result<Hash256, CryptoError> {
    if rounds == 0 {
        return Err(CryptoError::InvalidRounds { rounds });
    }

    let mut current = hmac_sha256(key, value);
    for _ in 1..rounds {
        current = hmac_sha256(key, &current);
    }
    Ok(current)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Hash256 {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(data);
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_has_requested_length() {
        let chain = generate_chain(b"secret", DEFAULT_CHAIN_ROUNDS).unwrap();
        assert_eq!(chain.len(), DEFAULT_CHAIN_ROUNDS);
        assert!(!chain.is_empty());
    }

    #[test]
    fn first_link_is_hash_of_secret() {
        let chain = generate_chain(b"secret", 3).unwrap();
        assert_eq!(chain.link(0), Some(&sha256(b"secret")));
    }

    #[test]
    fn terminal_is_stable() {
        let a = generate_chain(b"M1", DEFAULT_CHAIN_ROUNDS).unwrap();
        let b = generate_chain(b"M1", DEFAULT_CHAIN_ROUNDS).unwrap();

        assert_eq!(a.terminal(), b.terminal());
        assert_eq!(a.link(99), Some(a.terminal()));
    }

    #[test]
    fn rehashing_link_98_gives_link_99() {
        let chain = generate_chain(b"M1", DEFAULT_CHAIN_ROUNDS).unwrap();
        let link_98 = chain.link(98).unwrap();

        assert_eq!(&sha256(link_98), chain.link(99).unwrap());
    }

    #[test]
    fn zero_rounds_rejected() {
        assert_eq!(generate_chain(b"x", 0), Err(CryptoError::InvalidRounds { rounds: 0 }));
        assert_eq!(keyed_chain(b"x", b"k", 0), Err(CryptoError::InvalidRounds { rounds: 0 }));
    }

    #[test]
    fn single_round_chain_terminal_is_hash_of_secret() {
        let chain = generate_chain(b"x", 1).unwrap();
        assert_eq!(chain.terminal(), &sha256(b"x"));
    }

    #[test]
    fn reveal_verifies_against_terminal() {
        let chain = generate_chain(b"M1", DEFAULT_CHAIN_ROUNDS).unwrap();

        for steps in [0, 1, 10, 99] {
            let revealed = chain.reveal(steps).unwrap();
            assert!(verify_reveal(revealed, chain.terminal(), steps), "steps {steps}");
        }
    }

    #[test]
    fn reveal_beyond_chain_is_none() {
        let chain = generate_chain(b"M1", 10).unwrap();
        assert!(chain.reveal(9).is_some());
        assert!(chain.reveal(10).is_none());
    }

    #[test]
    fn reveal_with_huge_step_count_is_none() {
        let chain = generate_chain(b"M1", 10).unwrap();
        assert!(chain.reveal(usize::MAX).is_none());
        assert!(chain.reveal(usize::MAX - 1).is_none());
    }

    #[test]
    fn wrong_step_count_fails_verification() {
        let chain = generate_chain(b"M1", DEFAULT_CHAIN_ROUNDS).unwrap();
        let revealed = chain.reveal(5).unwrap();

        assert!(!verify_reveal(revealed, chain.terminal(), 4));
        assert!(!verify_reveal(revealed, chain.terminal(), 6));
    }

    #[test]
    fn secret_hashed_rounds_minus_one_more_times_reaches_terminal() {
        let chain = generate_chain(b"M1", DEFAULT_CHAIN_ROUNDS).unwrap();
        let first = sha256(b"M1");

        assert!(verify_reveal(&first, chain.terminal(), DEFAULT_CHAIN_ROUNDS - 1));
    }

    #[test]
    fn keyed_chain_depends_on_key() {
        let a = keyed_chain(b"u1", b"key-a", DEFAULT_CHAIN_ROUNDS).unwrap();
        let b = keyed_chain(b"u1", b"key-b", DEFAULT_CHAIN_ROUNDS).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn keyed_chain_depends_on_value() {
        let a = keyed_chain(b"u1", b"key", DEFAULT_CHAIN_ROUNDS).unwrap();
        let b = keyed_chain(b"u2", b"key", DEFAULT_CHAIN_ROUNDS).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn keyed_chain_is_deterministic() {
        let a = keyed_chain(b"u1", b"key", DEFAULT_CHAIN_ROUNDS).unwrap();
        let b = keyed_chain(b"u1", b"key", DEFAULT_CHAIN_ROUNDS).unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn keyed_chain_differs_from_plain_chain() {
        let keyed = keyed_chain(b"u1", b"", DEFAULT_CHAIN_ROUNDS).unwrap();
        let plain = generate_chain(b"u1", DEFAULT_CHAIN_ROUNDS).unwrap();

        assert_ne!(&keyed, plain.terminal());
    }
}
