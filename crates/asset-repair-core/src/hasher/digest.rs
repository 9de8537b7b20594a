use super::pool::BufferPool;
use crate::control::CancelToken;
use crate::error::Error;
use md5::{Digest as _, Md5};
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use twox_hash::XxHash64;

pub const XXH64_LENGTH: usize = 8;
pub const MD5_LENGTH: usize = 16;

/// Hash algorithm picked from the length of the expected digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    Xxh64,
    Md5,
}

impl DigestKind {
    pub fn for_expected(expected: &[u8]) -> Option<Self> {
        match expected.len() {
            XXH64_LENGTH => Some(DigestKind::Xxh64),
            MD5_LENGTH => Some(DigestKind::Md5),
            _ => None,
        }
    }
}

enum StreamHasher {
    Xxh64(XxHash64),
    Md5(Md5),
}

impl StreamHasher {
    fn new(kind: DigestKind) -> Self {
        match kind {
            DigestKind::Xxh64 => StreamHasher::Xxh64(XxHash64::with_seed(0)),
            DigestKind::Md5 => StreamHasher::Md5(Md5::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            StreamHasher::Xxh64(hasher) => hasher.write(data),
            StreamHasher::Md5(hasher) => hasher.update(data),
        }
    }

    fn finish(self) -> Vec<u8> {
        match self {
            // Big-endian so the bytes read the same as the hex in manifests
            StreamHasher::Xxh64(hasher) => hasher.finish().to_be_bytes().to_vec(),
            StreamHasher::Md5(hasher) => hasher.finalize().to_vec(),
        }
    }
}

/// Stream a file through the selected hash using a pooled read buffer.
///
/// The cancel token is polled between reads; a cancelled hash finishes the
/// read in flight and returns `Error::Cancelled`. `on_read` receives the
/// byte count of every chunk for per-file progress.
pub fn hash_file(
    path: &Path,
    kind: DigestKind,
    pool: &BufferPool,
    cancel: &CancelToken,
    mut on_read: impl FnMut(u64),
) -> Result<Vec<u8>, Error> {
    let mut file = File::open(path)?;
    let mut buffer = pool.acquire();
    let mut hasher = StreamHasher::new(kind);

    loop {
        cancel.check()?;
        let n = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..n]);
        on_read(n as u64);
    }

    Ok(hasher.finish())
}

/// Hash an in-memory slice.
pub fn hash_data(kind: DigestKind, data: &[u8]) -> Vec<u8> {
    let mut hasher = StreamHasher::new(kind);
    hasher.update(data);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_kind_from_length() {
        assert_eq!(DigestKind::for_expected(&[0; 8]), Some(DigestKind::Xxh64));
        assert_eq!(DigestKind::for_expected(&[0; 16]), Some(DigestKind::Md5));
        assert_eq!(DigestKind::for_expected(&[0; 20]), None);
        assert_eq!(DigestKind::for_expected(&[]), None);
    }

    #[test]
    fn test_md5_known_value() {
        let digest = hash_data(DigestKind::Md5, b"hello\n");
        assert_eq!(hex::encode(digest), "b1946ac92492d2347c6235b4d2611184");
    }

    #[test]
    fn test_xxh64_empty_known_value() {
        let digest = hash_data(DigestKind::Xxh64, b"");
        assert_eq!(hex::encode(digest), "ef46db3751d8e999");
    }

    #[test]
    fn test_hash_file_matches_in_memory_hash() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("blob.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        let pool = BufferPool::new(4096);
        let mut read_total = 0u64;
        for kind in [DigestKind::Md5, DigestKind::Xxh64] {
            read_total = 0;
            let from_file =
                hash_file(&path, kind, &pool, &CancelToken::new(), |n| read_total += n).unwrap();
            assert_eq!(from_file, hash_data(kind, &data));
        }
        assert_eq!(read_total, data.len() as u64);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_hash_file_cancelled_returns_buffer() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("blob.bin");
        fs::write(&path, vec![7u8; 10_000]).unwrap();

        let pool = BufferPool::new(1024);
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = hash_file(&path, DigestKind::Md5, &pool, &cancel, |_| {});
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_hash_file_missing_is_io_error() {
        let tmp = tempdir().unwrap();
        let pool = BufferPool::new(1024);
        let result = hash_file(
            &tmp.path().join("nope"),
            DigestKind::Md5,
            &pool,
            &CancelToken::new(),
            |_| {},
        );
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(pool.available(), 0);
    }
}
