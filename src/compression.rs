//! Gzip helpers for byte payloads

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use std::io::{self, Read, Write};

/// Gzip `data` at the default level
pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    compress_with(data, Compression::default())
}

/// Gzip `data` at an explicit level (0 = store, 9 = smallest)
pub fn compress_with(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), level);
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflate a gzip stream produced by [`compress`] or any gzip writer
///
/// Concatenated members are decoded back to back.
pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
