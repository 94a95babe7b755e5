//! Store-generated document identifier.

use super::error::{RepoError, Result};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

lazy_static! {
    /// Five random bytes fixed for the lifetime of the process.
    static ref PROCESS_UNIQUE: [u8; 5] = {
        let bytes = Uuid::new_v4().into_bytes();
        [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]]
    };
}

static COUNTER: AtomicU32 = AtomicU32::new(0);

const COUNTER_MASK: u32 = 0x00FF_FFFF;

/// Unique identifier for a stored document.
///
/// Layout (12 bytes):
/// - 4 bytes: big-endian seconds since the Unix epoch
/// - 5 bytes: process-unique random value
/// - 3 bytes: big-endian counter
///
/// The creation time of a document is recovered from its identifier.
/// Identifiers generated by one process
/// compare in generation order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generates a new identifier stamped with the current time.
    pub fn new() -> Self {
        let secs = Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
        Self::with_timestamp(secs)
    }

    /// Generates a new identifier stamped with the given Unix seconds.
    pub fn with_timestamp(secs: u32) -> Self {
        let counter = COUNTER.fetch_add(1, Ordering::SeqCst) & COUNTER_MASK;
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&*PROCESS_UNIQUE);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Creation instant embedded in the identifier (second precision).
    pub fn timestamp(&self) -> DateTime<Utc> {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        DateTime::from_timestamp(secs as i64, 0).unwrap_or_default()
    }

    pub fn to_hex(&self) -> String {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(24);
        for byte in self.0 {
            out.push(DIGITS[(byte >> 4) as usize] as char);
            out.push(DIGITS[(byte & 0x0f) as usize] as char);
        }
        out
    }

    pub fn parse_str(s: &str) -> Result<Self> {
        // from_str_radix alone would accept a sign prefix such as "+f".
        if s.len() != 24 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RepoError::invalid_query(format!(
                "'{}' is not a valid 24-character hex object id",
                s
            )));
        }

        let mut bytes = [0u8; 12];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let pair = std::str::from_utf8(chunk)
                .map_err(|_| RepoError::invalid_query(format!("invalid object id '{}'", s)))?;
            bytes[i] = u8::from_str_radix(pair, 16)
                .map_err(|_| RepoError::invalid_query(format!("invalid object id '{}'", s)))?;
        }
        Ok(Self(bytes))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

struct ObjectIdVisitor;

impl Visitor<'_> for ObjectIdVisitor {
    type Value = ObjectId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 24-character hex string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<ObjectId, E> {
        ObjectId::parse_str(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_str(ObjectIdVisitor)
    }
}
