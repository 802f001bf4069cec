// MIT License - Copyright (c) 2026 Peter Wright

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use tracing::debug;

/// Cipher block size. Payloads are zero-padded up to this boundary on the
/// wire when the session is encrypted.
pub const BLOCK_SIZE: usize = 16;

/// Session key size.
pub const KEY_SIZE: usize = 16;

/// Panel session encryption engine.
///
/// The module speaks AES-128-ECB over the payload bytes of each frame when
/// the communicator was built in encrypted mode. The key rolls during the
/// logon sequence: it starts as the configured panel password and is
/// replaced with the first 16 bytes the panel returns in the connect
/// response. Plaintext sessions bypass this type entirely.
///
/// The engine is owned by the communicator task; all key replacement and
/// encode/decode calls happen on that single I/O path, so no internal lock
/// is needed.
pub struct EncryptionHandler {
    key: [u8; KEY_SIZE],
    cipher: Aes128,
}

impl EncryptionHandler {
    /// Create an engine keyed from the configured panel password.
    pub fn new(password: &str) -> Self {
        let key = Self::key_from_password(password);
        Self {
            key,
            cipher: Aes128::new(GenericArray::from_slice(&key)),
        }
    }

    /// Derive the initial session key: password bytes, zero-padded or
    /// truncated to the key size.
    pub fn key_from_password(password: &str) -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        let bytes = password.as_bytes();
        let n = bytes.len().min(KEY_SIZE);
        key[..n].copy_from_slice(&bytes[..n]);
        key
    }

    /// Replace the active session key. Called once at Start-phase send time
    /// (password key) and again with the panel-supplied bytes from the
    /// connect response.
    pub fn update_key(&mut self, new_key: &[u8]) {
        let mut key = [0u8; KEY_SIZE];
        let n = new_key.len().min(KEY_SIZE);
        key[..n].copy_from_slice(&new_key[..n]);
        self.key = key;
        self.cipher = Aes128::new(GenericArray::from_slice(&self.key));
        debug!("Session key replaced");
    }

    /// The active key bytes.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Encrypt a payload, zero-padding it up to the block boundary.
    /// Pure function of the current key and input.
    pub fn encrypt(&self, payload: &[u8]) -> Vec<u8> {
        let padded_len = payload.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let mut out = vec![0u8; padded_len];
        out[..payload.len()].copy_from_slice(payload);
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        out
    }

    /// Decrypt a payload. Trailing bytes that do not fill a whole block are
    /// passed through untouched; the module aligns encrypted payloads to the
    /// block boundary, so a ragged tail only appears on garbled input.
    pub fn decrypt(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = payload.to_vec();
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        out
    }
}
