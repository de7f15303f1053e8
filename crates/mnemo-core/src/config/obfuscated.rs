//! Reversible scrambling of stored passwords.
//!
//! The key is embedded in the binary, so anyone with the config file and a
//! copy of mnemo can recover the password. This only keeps credentials from
//! being readable at a glance; it is not encryption.
//!
//! Use as `#[serde(with = "crate::config::obfuscated")]` on `String` fields.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serializer};

use crate::error::{Error, Result};

const KEY: &[u8] = b"mnemo/credential-store/v1";

fn xor(data: &[u8]) -> Vec<u8> {
    data.iter()
        .zip(KEY.iter().cycle())
        .map(|(byte, key)| byte ^ key)
        .collect()
}

pub fn encode(plain: &str) -> String {
    STANDARD.encode(xor(plain.as_bytes()))
}

pub fn decode(encoded: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|error| Error::InvalidInput(format!("stored password is not valid base64: {error}")))?;
    String::from_utf8(xor(&bytes))
        .map_err(|_| Error::InvalidInput("stored password is not valid UTF-8".to_string()))
}

pub fn serialize<S: Serializer>(value: &str, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&encode(value))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    let raw = String::deserialize(deserializer)?;
    decode(&raw).map_err(serde::de::Error::custom)
}
