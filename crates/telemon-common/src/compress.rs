//! Gzip framing helpers.
//!
//! [`compress_with`] and [`decompress_with`] own the encoder/decoder for the
//! duration of the callback, so the gzip trailer is always written (or
//! validated) and errors from both the callback and finalisation surface to
//! the caller.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Value of `Content-Encoding` / `Accept-Encoding` for gzip bodies.
pub const GZIP: &str = "gzip";

/// Encodes `item` through a gzip stream wrapped around `writer` and returns
/// the writer once the stream is finished.
pub fn compress_with<T, W, E, F>(item: &T, writer: W, level: Compression, encode: F) -> Result<W, E>
where
    T: ?Sized,
    W: Write,
    E: From<io::Error>,
    F: FnOnce(&T, &mut GzEncoder<W>) -> Result<(), E>,
{
    let mut encoder = GzEncoder::new(writer, level);
    encode(item, &mut encoder)?;
    Ok(encoder.finish()?)
}

/// Decodes a value from a gzip stream read from `reader`.
///
/// The stream is drained to its end after `decode` returns so a truncated or
/// corrupt trailer is reported rather than ignored.
pub fn decompress_with<T, R, E, F>(reader: R, decode: F) -> Result<T, E>
where
    R: Read,
    E: From<io::Error>,
    F: FnOnce(&mut GzDecoder<R>) -> Result<T, E>,
{
    let mut decoder = GzDecoder::new(reader);
    let item = decode(&mut decoder)?;
    io::copy(&mut decoder, &mut io::sink())?;
    Ok(item)
}

/// Compresses a byte slice at the fastest level.
pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    compress_with(data, Vec::new(), Compression::fast(), |data, enc| {
        enc.write_all(data)
    })
}

/// Decompresses a complete gzip byte slice.
pub fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    decompress_with(data, |dec| {
        let mut out = Vec::new();
        dec.read_to_end(&mut out)?;
        Ok(out)
    })
}
