//! Streaming gzip decompression of the downloaded dump

use crate::refresh::error::{RefreshError, RefreshResult};
use flate2::read::MultiGzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Default read size for one decompression step (10 MiB)
pub const DEFAULT_BUFFER_BYTES: usize = 10 * 1024 * 1024;

/// Inflate `src` into `dest` using a buffer of `buffer_bytes`.
///
/// Blocking. Returns the number of plaintext bytes written. A failed run
/// leaves no `dest` behind.
pub fn decompress(src: &Path, dest: &Path, buffer_bytes: usize) -> RefreshResult<u64> {
    let result = inflate(src, dest, buffer_bytes.max(1));
    match &result {
        Ok(bytes) => tracing::info!(bytes, "dump decompressed"),
        Err(e) => {
            tracing::error!(error = %e, src = ?src, "dump decompression failed");
            let _ = fs::remove_file(dest);
        }
    }
    result
}

fn inflate(src: &Path, dest: &Path, buffer_bytes: usize) -> RefreshResult<u64> {
    let input = BufReader::new(File::open(src)?);
    let mut decoder = MultiGzDecoder::new(input);
    let mut out = BufWriter::new(File::create(dest)?);

    let mut buf = vec![0u8; buffer_bytes];
    let mut written = 0u64;

    loop {
        let n = decoder
            .read(&mut buf)
            .map_err(|e| RefreshError::Decompress(e.to_string()))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        written += n as u64;
    }

    out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(written)
}
