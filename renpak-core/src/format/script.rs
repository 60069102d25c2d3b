//! Compiled script containers (`.rpyc`).
//!
//! A container starts with `RENPY RPC2`, then a table of
//! `(slot, offset, length)` u32 triples ended by slot 0. Each slot points at a
//! zlib stream holding one pickle. The MD5 of the `.rpy` source is appended
//! after the last chunk. Containers without the signature are the legacy
//! format: the whole file is one zlib stream.

use bytes::Bytes;
use md5::{Digest, Md5};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::cursor::ByteCursor;
use crate::error::{Error, Result};

pub const SIGNATURE: &[u8] = b"RENPY RPC2";
pub const DIGEST_LEN: usize = 16;

#[derive(FromPrimitive, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Slot {
    Legacy = -1,
    End = 0,
    BeforeStaticTransforms = 1,
    AfterStaticTransforms = 2,
}

#[derive(Debug, Clone)]
pub struct ScriptChunk {
    pub slot: Slot,
    pub offset: u32,
    pub len: u32,
    /// Inflated pickle data.
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct ScriptContainer {
    pub chunks: Vec<ScriptChunk>,
    /// MD5 of the source script, absent in legacy containers.
    pub digest: Option<[u8; DIGEST_LEN]>,
}

impl ScriptContainer {
    pub fn is_legacy(&self) -> bool {
        self.chunks.iter().any(|c| c.slot == Slot::Legacy)
    }

    pub fn chunk(&self, slot: Slot) -> Option<&ScriptChunk> {
        self.chunks.iter().find(|c| c.slot == slot)
    }

    /// Checks the stored digest against a candidate `.rpy` source.
    ///
    /// A mismatch only logs a warning; a stale digest does not make the
    /// compiled data unreadable.
    pub fn verify_source_digest(&self, source: &[u8]) -> bool {
        let Some(stored) = self.digest else {
            log::warn!("legacy script container carries no source digest");
            return false;
        };
        let actual = Md5::digest(source);
        let matches = actual.as_slice() == stored.as_slice();
        if !matches {
            log::warn!(
                "source digest mismatch: container has {}, source hashes to {}",
                hex::encode(stored),
                hex::encode(actual)
            );
        }
        matches
    }
}

pub fn load_script(data: impl Into<Bytes>) -> Result<ScriptContainer> {
    let mut cur = ByteCursor::new(data);

    if !cur.matches_magic(SIGNATURE) {
        log::warn!("no RPC2 signature, reading as a legacy container; output may be incomplete");
        let raw = cur.read_rest();
        let inflated = super::inflate(&raw)?;
        return Ok(ScriptContainer {
            chunks: vec![ScriptChunk {
                slot: Slot::Legacy,
                offset: 0,
                len: raw.len() as u32,
                data: inflated.into(),
            }],
            digest: None,
        });
    }
    cur.expect_magic(SIGNATURE)?;

    let mut table = Vec::new();
    loop {
        let entry_offset = cur.position();
        let id = cur.read_u32()?;
        let offset = cur.read_u32()?;
        let len = cur.read_u32()?;
        if id == 0 {
            break;
        }
        let slot = Slot::from_u32(id)
            .filter(|s| *s != Slot::Legacy)
            .ok_or_else(|| Error::FormatMismatch {
                offset: entry_offset,
                expected: "slot 1 or 2".into(),
                actual: format!("slot {id}"),
            })?;
        table.push((slot, offset, len));
    }
    log::debug!("script slot table: {:?}", table);

    let mut chunks = Vec::with_capacity(table.len());
    let mut data_end = cur.position();
    for (slot, offset, len) in table {
        cur.seek(offset as usize)?;
        let raw = cur.read_bytes(len as usize)?;
        data_end = data_end.max(cur.position());
        let inflated = super::inflate(&raw)?;
        log::debug!("slot {:?}: {} bytes inflated to {}", slot, len, inflated.len());
        chunks.push(ScriptChunk {
            slot,
            offset,
            len,
            data: inflated.into(),
        });
    }

    let digest = (cur.len() >= data_end + DIGEST_LEN)
        .then(|| {
            let mut digest = [0u8; DIGEST_LEN];
            digest.copy_from_slice(&cur.buffer()[cur.len() - DIGEST_LEN..]);
            digest
        });

    Ok(ScriptContainer { chunks, digest })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::test_util::{pickle, rpyc, zlib, Py};

    #[test]
    fn reads_slot_table() {
        let before = pickle(&Py::str("before"));
        let after = pickle(&Py::str("after"));
        let data = rpyc(&[(1, before.clone()), (2, after.clone())], [0xAB; 16]);
        let container = load_script(data).unwrap();

        assert!(!container.is_legacy());
        assert_eq!(container.chunks.len(), 2);
        let first = container.chunk(Slot::BeforeStaticTransforms).unwrap();
        assert_eq!(first.data.as_ref(), before.as_slice());
        assert_eq!(first.offset, 10 + 3 * 12);
        let second = container.chunk(Slot::AfterStaticTransforms).unwrap();
        assert_eq!(second.data.as_ref(), after.as_slice());
        assert_eq!(container.digest, Some([0xAB; 16]));
    }

    #[test]
    fn missing_signature_means_legacy() {
        let body = pickle(&Py::Int(5));
        let container = load_script(zlib(&body)).unwrap();
        assert!(container.is_legacy());
        assert_eq!(container.chunks.len(), 1);
        assert_eq!(container.chunks[0].slot, Slot::Legacy);
        assert_eq!(container.chunks[0].data.as_ref(), body.as_slice());
        assert!(container.digest.is_none());
    }

    #[test]
    fn unknown_slot_is_rejected() {
        let data = rpyc(&[(7, pickle(&Py::None))], [0; 16]);
        assert!(matches!(
            load_script(data),
            Err(Error::FormatMismatch { offset: 10, .. })
        ));
    }

    #[test]
    fn truncated_table() {
        let mut data = SIGNATURE.to_vec();
        data.extend(1u32.to_le_bytes());
        assert!(matches!(
            load_script(data),
            Err(Error::BufferUnderrun { .. })
        ));
    }

    #[test]
    fn source_digest_is_advisory() {
        let source = b"label start:\n    \"Hello\"\n";
        let mut digest = [0u8; 16];
        digest.copy_from_slice(&Md5::digest(source));
        let container = load_script(rpyc(&[(1, pickle(&Py::None))], digest)).unwrap();
        assert!(container.verify_source_digest(source));
        assert!(!container.verify_source_digest(b"label other:\n"));
    }
}
