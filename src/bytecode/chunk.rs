//! Serialized prototype trees.
//!
//! A chunk file is `MAGIC`, one format-version byte, and the postcard
//! encoding of the main [`Prototype`].

use std::path::Path;

use super::Prototype;
use crate::error::{ErrorKind, Result, error};

pub const MAGIC: &[u8; 4] = b"\x1bLOT";
pub const VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub main: Prototype,
}

impl Chunk {
    pub fn new(main: Prototype) -> Self {
        Self { main }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = postcard::to_allocvec(&self.main)
            .map_err(|e| error(ErrorKind::Chunk, format!("failed to encode chunk: {e}")))?;
        let mut bytes = Vec::with_capacity(MAGIC.len() + 1 + payload.len());
        bytes.extend_from_slice(MAGIC);
        bytes.push(VERSION);
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let Some(rest) = bytes.strip_prefix(MAGIC) else {
            return Err(error(ErrorKind::Chunk, "not a chunk file (bad signature)"));
        };
        let Some((&version, payload)) = rest.split_first() else {
            return Err(error(ErrorKind::Chunk, "truncated chunk header"));
        };
        if version != VERSION {
            return Err(error(
                ErrorKind::Chunk,
                format!("chunk format version {version} is not supported (expected {VERSION})"),
            ));
        }
        let main = postcard::from_bytes(payload)
            .map_err(|e| error(ErrorKind::Chunk, format!("failed to decode chunk: {e}")))?;
        Ok(Self { main })
    }

    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            error(
                ErrorKind::Chunk,
                format!("cannot read {}: {e}", path.display()),
            )
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| {
            error(
                ErrorKind::Chunk,
                format!("cannot write {}: {e}", path.display()),
            )
        })
    }
}
