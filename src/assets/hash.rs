//! Content hashing for cache-busting.
//!
//! XXH64 (seed 0) over the full content, the 8-byte digest taken
//! little-endian and written as lowercase unpadded base32. The result is 13
//! characters from `[a-z2-7]`, safe to drop into a query string as is.

use std::io::{self, Read};

use data_encoding::BASE32_NOPAD;
use xxhash_rust::xxh64::{Xxh64, xxh64};

const SEED: u64 = 0;
const CHUNK: usize = 8 * 1024;

/// Hashes everything `reader` yields, a chunk at a time.
pub fn content_hash<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Xxh64::new(SEED);
    let mut buf = [0u8; CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(encode(hasher.digest()))
}

/// One-shot form of [`content_hash`]; both agree on the same bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    encode(xxh64(data, SEED))
}

fn encode(digest: u64) -> String {
    BASE32_NOPAD.encode(&digest.to_le_bytes()).to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn hash_is_short_and_url_safe() {
        let hash = hash_bytes(b"test");
        assert_eq!(hash.len(), 13);
        assert!(hash.chars().all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)));
    }

    #[rstest]
    #[case::empty(0)]
    #[case::small(5)]
    #[case::one_chunk(CHUNK)]
    #[case::several_chunks(3 * CHUNK + 17)]
    fn streaming_matches_one_shot(#[case] len: usize) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        assert_eq!(content_hash(data.as_slice()).unwrap(), hash_bytes(&data));
    }

    #[test]
    fn one_byte_changes_the_hash() {
        assert_eq!(hash_bytes(b"body { color: red }"), hash_bytes(b"body { color: red }"));
        assert_ne!(hash_bytes(b"body { color: red }"), hash_bytes(b"body { color: rod }"));
    }
}
