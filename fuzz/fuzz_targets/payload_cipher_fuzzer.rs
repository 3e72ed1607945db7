//! Fuzz target for sealed payload handling
//!
//! # Strategy
//!
//! - Raw blobs: arbitrary bytes fed to `decrypt_bytes` under an arbitrary key
//! - Tampering: a genuine blob with one byte flipped
//! - Plaintext decoding: arbitrary bytes fed to the meeting payload decoder
//!
//! # Invariants
//!
//! - Blobs shorter than nonce plus tag are rejected as malformed
//! - A flipped byte anywhere in a genuine blob fails authentication
//! - NEVER panic on malformed input

#![no_main]

use arbitrary::Arbitrary;
use convene_core::MeetingEncryptedPayload;
use convene_crypto::{
    CryptoError, NONCE_SIZE, SymmetricKey, TAG_SIZE, decrypt_bytes, encrypt,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum CipherInput {
    RawBlob { key: [u8; 32], bytes: Vec<u8> },
    Tampered { key: [u8; 32], nonce: [u8; NONCE_SIZE], plaintext: Vec<u8>, position: usize, mask: u8 },
    Plaintext { bytes: Vec<u8> },
}

fuzz_target!(|input: CipherInput| {
    match input {
        CipherInput::RawBlob { key, bytes } => {
            let result = decrypt_bytes(&SymmetricKey::from_bytes(key), &bytes);
            if bytes.len() < NONCE_SIZE + TAG_SIZE {
                assert!(matches!(result, Err(CryptoError::MalformedCiphertext { .. })));
            }
        }

        CipherInput::Tampered { key, nonce, plaintext, position, mask } => {
            let key = SymmetricKey::from_bytes(key);
            let mut bytes = encrypt(&key, &plaintext, nonce).to_bytes();
            assert_eq!(decrypt_bytes(&key, &bytes).ok(), Some(plaintext));

            if mask != 0 {
                let at = position % bytes.len();
                bytes[at] ^= mask;
                assert_eq!(decrypt_bytes(&key, &bytes), Err(CryptoError::AuthenticationFailure));
            }
        }

        CipherInput::Plaintext { bytes } => {
            let _ = MeetingEncryptedPayload::decode(&bytes);
        }
    }
});
