use std::io::Read;
use std::io::Write;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Deserialize;
use serde::Serialize;

use crate::QueryData;
use crate::QueryKey;
use crate::Result;
use crate::SerializationError;

/// What a dedup leader publishes on the shared data path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupPayload {
    /// Leadership term, bumped on every promotion. Orders payloads ahead of
    /// `generation`.
    pub epoch: u64,
    /// Publish counter, strictly increasing across leaders
    pub generation: u64,
    /// Instance name of the publishing leader
    pub leader: String,
    pub data: QueryData,
}

impl DedupPayload {
    /// Fencing order: `(epoch, generation)`
    pub fn fence(&self) -> (u64, u64) {
        (self.epoch, self.generation)
    }

    /// bincode, then zlib
    pub fn encode(&self) -> Result<Vec<u8>> {
        let raw = bincode::serialize(self)?;
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2), Compression::default());
        encoder.write_all(&raw).map_err(SerializationError::from)?;
        Ok(encoder.finish().map_err(SerializationError::from)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut raw = Vec::new();
        ZlibDecoder::new(bytes)
            .read_to_end(&mut raw)
            .map_err(SerializationError::from)?;
        Ok(bincode::deserialize(&raw)?)
    }
}

/// Store-safe path segment for a query key.
///
/// Every byte outside `[A-Za-z0-9._-]` becomes `%XX`, so distinct keys never
/// collide and no key can inject extra path levels.
pub(crate) fn escape_key(key: &QueryKey) -> String {
    let raw = key.to_string();
    let mut escaped = String::with_capacity(raw.len());
    for b in raw.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => escaped.push(b as char),
            _ => escaped.push_str(&format!("%{b:02X}")),
        }
    }
    escaped
}
