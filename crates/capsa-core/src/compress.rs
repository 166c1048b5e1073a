//! Compression policy: gzip a file's plaintext iff its length is at
//! least 150 bytes and the gzipped result is strictly smaller; otherwise
//! store plaintext and mark `compressed = false`.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

const MIN_COMPRESSIBLE_LEN: usize = 150;

/// Returns `(bytes_to_encrypt, compressed)`.
pub fn maybe_compress(plaintext: &[u8]) -> (Vec<u8>, bool) {
    if plaintext.len() < MIN_COMPRESSIBLE_LEN {
        return (plaintext.to_vec(), false);
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(plaintext).is_err() {
        return (plaintext.to_vec(), false);
    }
    let Ok(compressed) = encoder.finish() else {
        return (plaintext.to_vec(), false);
    };

    if compressed.len() < plaintext.len() {
        (compressed, true)
    } else {
        (plaintext.to_vec(), false)
    }
}

/// Inverse of the gzip half of [`maybe_compress`].
pub fn gunzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    use flate2::read::GzDecoder;
    use std::io::Read;
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_plaintext_is_never_compressed() {
        let short = vec![b'a'; 149];
        let (bytes, compressed) = maybe_compress(&short);
        assert!(!compressed);
        assert_eq!(bytes, short);
    }

    #[test]
    fn repetitive_long_plaintext_is_compressed() {
        let long = vec![b'a'; 10_000];
        let (bytes, compressed) = maybe_compress(&long);
        assert!(compressed);
        assert!(bytes.len() < long.len());
        assert_eq!(gunzip(&bytes).unwrap(), long);
    }

    #[test]
    fn incompressible_long_plaintext_falls_back_to_plaintext() {
        // Pseudo-random bytes at this length typically won't shrink under gzip.
        let mut data = vec![0u8; 200];
        for (i, b) in data.iter_mut().enumerate() {
            *b = ((i * 2654435761u32 as usize) % 256) as u8;
        }
        let (bytes, compressed) = maybe_compress(&data);
        if compressed {
            assert!(bytes.len() < data.len());
        } else {
            assert_eq!(bytes, data);
        }
    }
}
