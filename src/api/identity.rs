//! MAG device identity and fallback token material
//!
//! Portals expect the box to present a serial, two device ids and a
//! signature, all derived from the MAC. Derivation is pure and
//! deterministic so the same account always looks like the same box.

use md5::Md5;
use rand::Rng;
use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Length of the serial number field sent as `sn`
const SERIAL_LEN: usize = 13;

/// Length of locally generated fallback tokens
const TOKEN_LEN: usize = 32;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Hardware identity presented to the portal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub mac: String,
    pub serial: String,
    pub device_id: String,
    pub device_id2: String,
    pub signature: String,
}

impl DeviceIdentity {
    /// Derive the identity for a MAC address (case-insensitive input)
    pub fn derive(mac: &str) -> Self {
        let mac = mac.trim().to_uppercase();

        let md5 = hex::encode_upper(Md5::digest(mac.as_bytes()));
        let serial = md5[..SERIAL_LEN].to_string();

        let device_id = hex::encode_upper(Sha256::digest(mac.as_bytes()));
        let device_id2 = device_id.clone();

        let source = format!("{}{}{}{}", mac, serial, device_id, device_id2);
        let signature = hex::encode_upper(Sha256::digest(source.as_bytes()));

        Self {
            mac,
            serial,
            device_id,
            device_id2,
            signature,
        }
    }
}

/// Derives the `prehash` sent with a locally generated handshake token
///
/// The expected formula is not documented; portals that validate a
/// stricter value may need another implementation.
pub trait PrehashStrategy: Send + Sync {
    fn prehash(&self, token: &str, identity: &DeviceIdentity) -> String;
}

/// `sha1(token)` in lowercase hex, ignoring the MAC
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenSha1Prehash;

impl PrehashStrategy for TokenSha1Prehash {
    fn prehash(&self, token: &str, _identity: &DeviceIdentity) -> String {
        hex::encode(Sha1::digest(token.as_bytes()))
    }
}

/// Random 32-char uppercase alphanumeric token for the handshake fallback
pub fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}
