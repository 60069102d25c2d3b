//! RPA-3.0 archives.
//!
//! Layout: a 34 byte ascii header, the file bodies, then a zlib compressed
//! pickle index at the offset named by the header. The index maps each path to
//! a list of `(offset, length, prefix)` parts whose offset and length are XORed
//! with the header key.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use num_traits::ToPrimitive;

use super::cursor::{ByteCursor, TextEncoding};
use super::pickle::{self, Value};
use super::vfs::{ArchiveFile, ByteSource, Directory, FileSource, MemorySource, Section};
use crate::error::{Error, Result};

pub const HEADER_LEN: usize = 34;
pub const SIGNATURE: &str = "RPA-3.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub index_offset: u64,
    pub key: u32,
}

impl ArchiveHeader {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut cur = ByteCursor::new(Bytes::copy_from_slice(raw));
        let line = cur.read_text(HEADER_LEN, TextEncoding::Ascii)?;

        let Some(line) = line.strip_suffix('\n') else {
            return Err(Error::mismatch(
                HEADER_LEN - 1,
                b"\n",
                &raw[HEADER_LEN - 1..HEADER_LEN],
            ));
        };

        let tokens: Vec<&str> = line.split(' ').collect();
        let [signature, offset, key] = tokens.as_slice() else {
            return Err(Error::FormatMismatch {
                offset: 0,
                expected: "3 space separated header fields".into(),
                actual: format!("{} fields", tokens.len()),
            });
        };

        if *signature != SIGNATURE {
            return Err(Error::mismatch(0, SIGNATURE.as_bytes(), signature.as_bytes()));
        }

        let hex_field = |field: &str, at: usize| {
            u64::from_str_radix(field, 16).map_err(|_| Error::FormatMismatch {
                offset: at,
                expected: "hexadecimal digits".into(),
                actual: field.to_string(),
            })
        };
        let index_offset = hex_field(*offset, signature.len() + 1)?;
        let key_at = signature.len() + offset.len() + 2;
        let key = u32::try_from(hex_field(*key, key_at)?).map_err(|_| Error::FormatMismatch {
            offset: key_at,
            expected: "32-bit key".into(),
            actual: key.to_string(),
        })?;

        Ok(Self { index_offset, key })
    }
}

/// Reads an archive held in memory.
pub fn read_archive(data: impl Into<Bytes>) -> Result<Directory> {
    let data = data.into();
    let header = ArchiveHeader::parse(&data)?;
    let mut cur = ByteCursor::new(data.clone());
    cur.seek(header.index_offset as usize)?;
    let index = cur.read_rest();
    build_directory(Arc::new(MemorySource::new(data)), header, &index)
}

/// Opens an archive on disk, reading only the header and the index eagerly.
pub fn open_archive(path: impl AsRef<Path>) -> Result<Directory> {
    let source = FileSource::open(path)?;
    let header = ArchiveHeader::parse(&source.read_range(0, HEADER_LEN as u64)?)?;
    let index_len = source
        .len()
        .checked_sub(header.index_offset)
        .ok_or(Error::BufferUnderrun {
            offset: header.index_offset as usize,
            wanted: 0,
            len: source.len() as usize,
        })?;
    let index = source.read_range(header.index_offset, index_len)?;
    build_directory(Arc::new(source), header, &index)
}

fn build_directory(
    source: Arc<dyn ByteSource>,
    header: ArchiveHeader,
    compressed_index: &[u8],
) -> Result<Directory> {
    log::debug!(
        "archive header: index at 0x{:X}, key 0x{:08X}",
        header.index_offset,
        header.key
    );
    let index = super::inflate(compressed_index)?;
    log::debug!(
        "archive index: {} bytes compressed, {} bytes inflated",
        compressed_index.len(),
        index.len()
    );

    let root = pickle::load(index)?;
    let entries = root
        .as_dict()
        .ok_or_else(|| Error::unexpected("index dict", &root))?
        .borrow();

    let key = u64::from(header.key);
    let mut dir = Directory::new();
    for (path, parts) in entries.iter() {
        let parts = parts
            .to_vec()
            .ok_or_else(|| Error::unexpected("list of index parts", parts))?;
        let sections = parts
            .iter()
            .map(|part| decode_part(part, key))
            .collect::<Result<Vec<_>>>()?;
        dir.insert_file(path, ArchiveFile::new(source.clone(), sections)?)?;
    }
    log::debug!("archive index: {} entries", entries.len());
    Ok(dir)
}

fn decode_part(part: &Value, key: u64) -> Result<Section> {
    let fields = part
        .to_vec()
        .filter(|f| f.len() >= 2)
        .ok_or_else(|| Error::unexpected("(offset, length, prefix) part", part))?;
    // the third field is reserved and always empty
    Ok(Section {
        offset: index_number(&fields[0])? ^ key,
        len: index_number(&fields[1])? ^ key,
    })
}

fn index_number(v: &Value) -> Result<u64> {
    v.as_bigint()
        .and_then(|n| n.to_u64())
        .ok_or_else(|| Error::unexpected("non-negative integer", v))
}
