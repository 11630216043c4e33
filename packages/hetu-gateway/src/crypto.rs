//! Handshake cryptography: X25519 key agreement, HKDF-SHA256 key
//! derivation, ChaCha20-Poly1305 frame sealing, zlib compression (§4.4/§6).

use std::io::{Read, Write};

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::error::GatewayError;

const SESSION_KEY_INFO: &[u8] = b"hetu-session-key-v1";

/// Cipher suites a client may request in `hello`. Only one is defined
/// today; the id is carried on the wire so a future suite can be added
/// without breaking the frame shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherSuite {
    ChaCha20Poly1305,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionSuite {
    None,
    Zlib,
}

/// Plaintext frame the client sends immediately after the WebSocket
/// upgrade (§4.4 "the first post-upgrade frame is a plaintext hello").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    pub public_key: [u8; 32],
    pub ciphers: Vec<CipherSuite>,
    pub compressions: Vec<CompressionSuite>,
}

/// Plaintext reply: the server's ephemeral public key and chosen suites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHello {
    pub public_key: [u8; 32],
    pub cipher: CipherSuite,
    pub compression: CompressionSuite,
}

/// Per-connection symmetric state once the handshake completes: one
/// nonce counter per direction, incremented per frame, never reused
/// (§4.4 "all subsequent frames are encrypted" with authenticated
/// framing).
pub struct SessionCrypto {
    cipher: ChaCha20Poly1305,
    compression: CompressionSuite,
    send_nonce: u64,
    recv_nonce: u64,
}

impl SessionCrypto {
    /// Seals one plaintext payload: compress, then encrypt, matching
    /// §6's "length-prefixed compressed, then encrypted" ordering.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let payload = match self.compression {
            CompressionSuite::None => plaintext.to_vec(),
            CompressionSuite::Zlib => compress(plaintext)?,
        };
        let nonce = nonce_for(self.send_nonce);
        self.send_nonce += 1;
        self.cipher
            .encrypt(&nonce, payload.as_ref())
            .map_err(|_| GatewayError::Handshake("frame encryption failed".into()))
    }

    /// Opens one ciphertext frame: decrypt, then decompress.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let nonce = nonce_for(self.recv_nonce);
        self.recv_nonce += 1;
        let payload = self
            .cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| GatewayError::Handshake("frame decryption failed or replayed".into()))?;
        match self.compression {
            CompressionSuite::None => Ok(payload),
            CompressionSuite::Zlib => decompress(&payload),
        }
    }

    /// Splits into independent encrypt/decrypt halves so a connection's
    /// reader and writer tasks can each own one without sharing a lock —
    /// the nonce counters are direction-local, and `ChaCha20Poly1305`'s
    /// `encrypt`/`decrypt` only need `&self`.
    pub fn split(self) -> (Encryptor, Decryptor) {
        (
            Encryptor {
                cipher: self.cipher.clone(),
                compression: self.compression,
                nonce: self.send_nonce,
            },
            Decryptor {
                cipher: self.cipher,
                compression: self.compression,
                nonce: self.recv_nonce,
            },
        )
    }
}

pub struct Encryptor {
    cipher: ChaCha20Poly1305,
    compression: CompressionSuite,
    nonce: u64,
}

impl Encryptor {
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let payload = match self.compression {
            CompressionSuite::None => plaintext.to_vec(),
            CompressionSuite::Zlib => compress(plaintext)?,
        };
        let nonce = nonce_for(self.nonce);
        self.nonce += 1;
        self.cipher
            .encrypt(&nonce, payload.as_ref())
            .map_err(|_| GatewayError::Handshake("frame encryption failed".into()))
    }
}

pub struct Decryptor {
    cipher: ChaCha20Poly1305,
    compression: CompressionSuite,
    nonce: u64,
}

impl Decryptor {
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, GatewayError> {
        let nonce = nonce_for(self.nonce);
        self.nonce += 1;
        let payload = self
            .cipher
            .decrypt(&nonce, ciphertext)
            .map_err(|_| GatewayError::Handshake("frame decryption failed or replayed".into()))?;
        match self.compression {
            CompressionSuite::None => Ok(payload),
            CompressionSuite::Zlib => decompress(&payload),
        }
    }
}

fn nonce_for(counter: u64) -> Nonce {
    let mut bytes = [0u8; 12];
    bytes[4..].copy_from_slice(&counter.to_be_bytes());
    *Nonce::from_slice(&bytes)
}

fn compress(data: &[u8]) -> Result<Vec<u8>, GatewayError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| GatewayError::Codec(format!("zlib compress: {e}")))
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, GatewayError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| GatewayError::Codec(format!("zlib decompress: {e}")))?;
    Ok(out)
}

fn derive_session_key(shared_secret: &[u8; 32]) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut okm = [0u8; 32];
    hk.expand(SESSION_KEY_INFO, &mut okm)
        .expect("32 bytes is a valid HKDF-SHA256 output length");
    okm
}

/// Server side of the handshake: given the client's `hello`, generates an
/// ephemeral keypair, derives the session key, and returns the reply plus
/// the ready-to-use [`SessionCrypto`].
pub fn respond_to_hello(hello: &ClientHello) -> Result<(ServerHello, SessionCrypto), GatewayError> {
    let cipher = hello
        .ciphers
        .iter()
        .find(|c| **c == CipherSuite::ChaCha20Poly1305)
        .copied()
        .ok_or_else(|| GatewayError::Handshake("no mutually supported cipher suite".into()))?;
    let compression = if hello.compressions.contains(&CompressionSuite::Zlib) {
        CompressionSuite::Zlib
    } else {
        CompressionSuite::None
    };

    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let their_public = PublicKey::from(hello.public_key);
    let shared = secret.diffie_hellman(&their_public);
    let key = derive_session_key(shared.as_bytes());

    let crypto = SessionCrypto {
        cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        compression,
        send_nonce: 0,
        recv_nonce: 0,
    };
    let reply = ServerHello {
        public_key: public.to_bytes(),
        cipher,
        compression,
    };
    Ok((reply, crypto))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_secret_and_hello() -> (EphemeralSecret, ClientHello) {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let hello = ClientHello {
            public_key: public.to_bytes(),
            ciphers: vec![CipherSuite::ChaCha20Poly1305],
            compressions: vec![CompressionSuite::Zlib],
        };
        (secret, hello)
    }

    #[test]
    fn handshake_round_trip_byte_identical() {
        let (client_secret, hello) = client_secret_and_hello();
        let (server_hello, mut server_crypto) = respond_to_hello(&hello).unwrap();

        let server_public = PublicKey::from(server_hello.public_key);
        let shared = client_secret.diffie_hellman(&server_public);
        let key = derive_session_key(shared.as_bytes());
        let mut client_crypto = SessionCrypto {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            compression: server_hello.compression,
            send_nonce: 0,
            recv_nonce: 0,
        };

        let plaintext = b"sys(login, 1)".to_vec();
        let sealed = client_crypto.seal(&plaintext).unwrap();
        let opened = server_crypto.open(&sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn rejects_unsupported_cipher() {
        let (_secret, mut hello) = client_secret_and_hello();
        hello.ciphers.clear();
        let err = respond_to_hello(&hello).unwrap_err();
        assert!(matches!(err, GatewayError::Handshake(_)));
    }

    #[test]
    fn replayed_frame_is_rejected() {
        let (client_secret, hello) = client_secret_and_hello();
        let (server_hello, mut server_crypto) = respond_to_hello(&hello).unwrap();
        let server_public = PublicKey::from(server_hello.public_key);
        let shared = client_secret.diffie_hellman(&server_public);
        let key = derive_session_key(shared.as_bytes());
        let mut client_crypto = SessionCrypto {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            compression: server_hello.compression,
            send_nonce: 0,
            recv_nonce: 0,
        };

        let first = client_crypto.seal(b"one").unwrap();
        server_crypto.open(&first).unwrap();
        // Replaying the same ciphertext reuses a nonce the server already
        // advanced past; the second call uses the next nonce and fails.
        assert!(server_crypto.open(&first).is_err());
    }
}
