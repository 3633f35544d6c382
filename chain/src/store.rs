//! Persistent storage backend for header chains.
//!
//! Each chain owns exactly one append-only file of 80-byte header records.
//! [`HeaderFile::write`] is the single mutating primitive; every
//! higher-level mutation (append, chunk save, fork swap) is expressed as
//! one or more calls to it.
use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use ares_common::block::{BlockHash, Height, HEADER_SIZE};

/// Name of the canonical best-chain headers file.
pub const BEST_CHAIN_FILE: &str = "blockchain_headers";

/// Name of the directory holding fork header files, under the headers
/// directory.
pub const FORKS_DIR: &str = "forks";

/// An error originating in the on-disk header store.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The headers directory is gone. Fatal: it existed at startup.
    #[error("headers directory {0} does not exist")]
    HeadersDirMissing(PathBuf),

    /// The chain's backing file is gone while its directory is intact.
    #[error("cannot find headers file at {0}")]
    FileMissing(PathBuf),

    /// A record that should have been a full header came up short.
    #[error("expected to read a full {HEADER_SIZE}-byte header, got {0} bytes")]
    ShortRead(usize),
}

/// Deterministic file name for a fork chain, so independent processes
/// recognize the same fork.
pub fn fork_file_name(forkpoint: Height, prev_hash: &BlockHash, first_hash: &BlockHash) -> String {
    let prev = prev_hash.to_string();
    let first = first_hash.to_string();

    format!(
        "fork2_{}_{}_{}",
        forkpoint,
        prev.trim_start_matches('0'),
        first.trim_start_matches('0')
    )
}

/// Parse a fork file name back into `(forkpoint, prev_hash, first_hash)`.
pub fn parse_fork_file_name(name: &str) -> Option<(Height, BlockHash, BlockHash)> {
    let mut parts = name.splitn(4, '_');
    if parts.next()? != "fork2" {
        return None;
    }
    let forkpoint = parts.next()?.parse().ok()?;
    let prev = format!("{:0>64}", parts.next()?).parse().ok()?;
    let first = format!("{:0>64}", parts.next()?).parse().ok()?;

    Some((forkpoint, prev, first))
}

/// A single header file backing one chain.
#[derive(Debug)]
pub struct HeaderFile {
    path: PathBuf,
    headers_dir: PathBuf,
    size: u64,
}

impl HeaderFile {
    /// Open a header file, creating it if it does not exist yet.
    pub fn open(headers_dir: &Path, path: PathBuf) -> Result<Self, Error> {
        if !headers_dir.exists() {
            return Err(Error::HeadersDirMissing(headers_dir.to_path_buf()));
        }
        if !path.exists() {
            fs::File::create(&path)?;
        }
        let mut file = Self {
            path,
            headers_dir: headers_dir.to_path_buf(),
            size: 0,
        };
        file.update_size()?;

        Ok(file)
    }

    /// The file's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of headers in the file.
    pub fn len(&self) -> u64 {
        self.size
    }

    /// Whether the file holds no headers.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn assert_available(&self) -> Result<(), Error> {
        if self.path.exists() {
            Ok(())
        } else if !self.headers_dir.exists() {
            Err(Error::HeadersDirMissing(self.headers_dir.clone()))
        } else {
            Err(Error::FileMissing(self.path.clone()))
        }
    }

    /// Write `data` at `offset`, optionally truncating a divergent tail
    /// first. Flushes and fsyncs, then recomputes the cached size.
    pub fn write(&mut self, data: &[u8], offset: u64, truncate: bool) -> Result<(), Error> {
        self.assert_available()?;

        let mut file = fs::OpenOptions::new().read(true).write(true).open(&self.path)?;
        if truncate && offset != self.size * HEADER_SIZE as u64 {
            file.set_len(offset)?;
        }
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        file.sync_data()?;
        drop(file);

        self.update_size()
    }

    /// Read the raw record at `index` (0 is the chain's forkpoint).
    /// All-zero (unwritten) slots read as `None`; a partially-present
    /// record is corruption, not a silent truncation.
    pub fn read_record(&self, index: u64) -> Result<Option<[u8; HEADER_SIZE]>, Error> {
        self.assert_available()?;

        let mut file = fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(index * HEADER_SIZE as u64))?;

        let mut buf = [0u8; HEADER_SIZE];
        let mut n = 0;
        while n < HEADER_SIZE {
            let read = file.read(&mut buf[n..])?;
            if read == 0 {
                return Err(Error::ShortRead(n));
            }
            n += read;
        }
        if buf.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        Ok(Some(buf))
    }

    /// Read up to `len` raw bytes starting at `offset`.
    pub fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        self.assert_available()?;

        let mut file = fs::File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = vec![0u8; len];
        let mut n = 0;
        while n < len {
            let read = file.read(&mut buf[n..])?;
            if read == 0 {
                break;
            }
            n += read;
        }
        buf.truncate(n);

        Ok(buf)
    }

    /// Read the entire file contents.
    pub fn read_all(&self) -> Result<Vec<u8>, Error> {
        self.assert_available()?;
        Ok(fs::read(&self.path)?)
    }

    /// Recompute the cached size from the file metadata.
    pub fn update_size(&mut self) -> Result<(), Error> {
        self.size = if self.path.exists() {
            fs::metadata(&self.path)?.len() / HEADER_SIZE as u64
        } else {
            0
        };
        Ok(())
    }

    /// Move the file to a new path, replacing any file already there.
    pub fn rename(&mut self, to: PathBuf) -> Result<(), Error> {
        fs::rename(&self.path, &to)?;
        self.path = to;
        Ok(())
    }

    /// Delete the file, consuming the store.
    pub fn delete(self) -> Result<(), Error> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    use quickcheck_macros::quickcheck;

    fn store(dir: &Path) -> HeaderFile {
        HeaderFile::open(dir, dir.join(BEST_CHAIN_FILE)).unwrap()
    }

    #[test]
    fn test_write_read_record() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store(tmp.path());

        assert_eq!(store.len(), 0);

        let record = [0x2a; HEADER_SIZE];
        store.write(&record, 0, true).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.read_record(0).unwrap(), Some(record));
    }

    #[test]
    fn test_zero_record_reads_as_none() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store(tmp.path());

        store.write(&[0; HEADER_SIZE * 2], 0, true).unwrap();
        let mut record = [0u8; HEADER_SIZE];
        record[0] = 1;
        store.write(&record, HEADER_SIZE as u64 * 2, false).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.read_record(0).unwrap(), None);
        assert_eq!(store.read_record(1).unwrap(), None);
        assert_eq!(store.read_record(2).unwrap(), Some(record));
    }

    #[test]
    fn test_short_read_is_corruption() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store(tmp.path());

        store.write(&[1; HEADER_SIZE], 0, true).unwrap();
        store.write(&[2; 32], HEADER_SIZE as u64, false).unwrap();

        assert_eq!(store.read_record(0).unwrap(), Some([1; HEADER_SIZE]));
        assert!(matches!(store.read_record(1), Err(Error::ShortRead(32))));
    }

    #[test]
    fn test_truncating_rewrite() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = store(tmp.path());

        store.write(&[1; HEADER_SIZE * 4], 0, true).unwrap();
        assert_eq!(store.len(), 4);

        // Overwrite a divergent tail starting at record 2.
        store.write(&[2; HEADER_SIZE], HEADER_SIZE as u64 * 2, true).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.read_record(1).unwrap(), Some([1; HEADER_SIZE]));
        assert_eq!(store.read_record(2).unwrap(), Some([2; HEADER_SIZE]));
    }

    #[test]
    fn test_missing_headers_dir_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("headers");

        assert!(matches!(
            HeaderFile::open(&dir, dir.join(BEST_CHAIN_FILE)),
            Err(Error::HeadersDirMissing(_))
        ));
    }

    #[test]
    fn test_fork_file_name_round_trip() {
        let prev = BlockHash::from_str(
            "000000000000000000051b6cc6da0a618606b9a7e41832c1de1e9b222cdb769e",
        )
        .unwrap();
        let first = BlockHash::from_str(
            "0000000000000000000a1b78fdafc3b7d2c9a2d567259c8c1b0ee70f7e1d249a",
        )
        .unwrap();

        let name = fork_file_name(101, &prev, &first);
        assert!(name.starts_with("fork2_101_"));
        assert_eq!(parse_fork_file_name(&name), Some((101, prev, first)));

        assert_eq!(parse_fork_file_name("blockchain_headers"), None);
        assert_eq!(parse_fork_file_name("fork2_x_aa_bb"), None);
    }

    #[quickcheck]
    fn prop_fork_file_name_round_trip(forkpoint: u64, prev: u8, first: u8) -> bool {
        let prev = BlockHash::from_bytes([prev; 32]);
        let first = BlockHash::from_bytes([first; 32]);
        let name = fork_file_name(forkpoint, &prev, &first);

        parse_fork_file_name(&name) == Some((forkpoint, prev, first))
    }
}
