//! Conversions between domain types and what SQLite can store.

use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Serialize};
use uuid::Uuid;

#[inline]
pub fn uuid_to_str(id: Uuid) -> String {
    id.to_string()
}

#[inline]
pub fn str_to_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| anyhow!("Invalid UUID '{}': {}", s, e))
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| anyhow!("JSON encode error: {}", e))
}

pub fn from_json<T: DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| anyhow!("JSON parse error: {}", e))
}

/// SQLite integers are signed; sizes past `i64::MAX` are clamped.
#[inline]
pub fn u64_to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[inline]
pub fn i64_to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

#[inline]
pub fn i64_to_u32(v: i64) -> u32 {
    u32::try_from(v).unwrap_or(0)
}
