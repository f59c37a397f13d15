//! WireGuard 密钥工具：X25519 密钥对生成、公钥推导与格式校验。

use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::common::ControlError;

/// Base64 encoded key pair as written into `.conf` files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key: String,
    pub public_key: String,
}

pub fn generate_keypair() -> KeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    let enc = base64::engine::general_purpose::STANDARD;
    KeyPair {
        private_key: enc.encode(secret.to_bytes()),
        public_key: enc.encode(public.as_bytes()),
    }
}

/// Random 32 byte preshared key, same encoding as `wg genpsk`.
pub fn generate_preshared_key() -> String {
    let mut psk = [0u8; 32];
    OsRng.fill_bytes(&mut psk);
    base64::engine::general_purpose::STANDARD.encode(psk)
}

pub fn public_key_from_private(private_key: &str) -> Result<String, ControlError> {
    let secret = StaticSecret::from(parse_key(private_key)?);
    let public = PublicKey::from(&secret);
    Ok(base64::engine::general_purpose::STANDARD.encode(public.as_bytes()))
}

pub fn parse_key(s: &str) -> Result<[u8; 32], ControlError> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(s.trim())
        .map_err(|e| ControlError::Parse(format!("invalid base64 key: {}", e)))?;
    let key: [u8; 32] = decoded
        .as_slice()
        .try_into()
        .map_err(|_| ControlError::Parse(format!("key must be 32 bytes, got {}", decoded.len())))?;
    Ok(key)
}

pub fn is_valid_key(s: &str) -> bool {
    parse_key(s).is_ok()
}
