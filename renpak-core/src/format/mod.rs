use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::error::Result;

pub mod archive;
pub mod cursor;
pub mod pickle;
pub mod script;
pub mod vfs;

#[cfg(test)]
pub(crate) mod test_util;

/// Inflates one complete zlib stream.
pub(crate) fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
