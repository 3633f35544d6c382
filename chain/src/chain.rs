//! A single header chain backed by one file.
use ares_common::block::{BlockHash, Header, Height};

use crate::error::Error;
use crate::store::HeaderFile;

/// Stable key of a chain in the registry's arena.
///
/// Keys are never reused within one registry lifetime, so a stale key
/// resolves to `None` rather than to an unrelated chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainKey(pub(crate) usize);

/// One header chain: the canonical best chain, or a fork of it.
///
/// A chain owns the headers from its forkpoint upward. Headers below the
/// forkpoint are reached through the parent chain.
#[derive(Debug)]
pub struct Chain {
    /// Height of the first header this chain owns.
    pub forkpoint: Height,
    /// Hash of the first header this chain owns.
    pub forkpoint_hash: BlockHash,
    /// Hash the first header links to. `None` for the root chain.
    pub prev_hash: Option<BlockHash>,
    /// The chain this one forked off. `None` for the root chain.
    pub parent: Option<ChainKey>,
    /// Backing header file.
    pub file: HeaderFile,
}

impl Chain {
    /// Identifier of this chain, the hex id of its first header.
    pub fn id(&self) -> String {
        self.forkpoint_hash.to_string()
    }

    /// Height of the chain tip. One below the forkpoint when empty.
    pub fn height(&self) -> i64 {
        self.forkpoint as i64 + self.file.len() as i64 - 1
    }

    /// Number of headers this chain owns.
    pub fn size(&self) -> u64 {
        self.file.len()
    }

    /// Whether `height` falls in the range this chain owns.
    pub fn owns(&self, height: Height) -> bool {
        height >= self.forkpoint && (height as i64) <= self.height()
    }

    /// Read a header this chain owns. `None` for unwritten slots.
    pub fn read_own_header(&self, height: Height) -> Result<Option<Header>, Error> {
        debug_assert!(height >= self.forkpoint);

        let index = height - self.forkpoint;
        if index >= self.file.len() {
            return Ok(None);
        }
        match self.file.read_record(index)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Header::decode(&bytes)?)),
        }
    }

}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::Path;

    use ares_common::block::HEADER_SIZE;

    use crate::store::{HeaderFile, BEST_CHAIN_FILE};

    fn chain(dir: &Path, forkpoint: Height) -> Chain {
        Chain {
            forkpoint,
            forkpoint_hash: BlockHash::from_bytes([1; 32]),
            prev_hash: None,
            parent: None,
            file: HeaderFile::open(dir, dir.join(BEST_CHAIN_FILE)).unwrap(),
        }
    }

    #[test]
    fn test_empty_chain_height() {
        let tmp = tempfile::tempdir().unwrap();
        let chain = chain(tmp.path(), 0);

        assert_eq!(chain.height(), -1);
        assert_eq!(chain.size(), 0);
        assert!(!chain.owns(0));
    }

    #[test]
    fn test_height_tracks_forkpoint() {
        let tmp = tempfile::tempdir().unwrap();
        let mut chain = chain(tmp.path(), 100);

        chain.file.write(&[0x2a; HEADER_SIZE * 3], 0, true).unwrap();

        assert_eq!(chain.height(), 102);
        assert!(chain.owns(100));
        assert!(chain.owns(102));
        assert!(!chain.owns(99));
        assert!(!chain.owns(103));
    }

    #[test]
    fn test_read_own_header() {
        let tmp = tempfile::tempdir().unwrap();
        let mut chain = chain(tmp.path(), 100);

        let header = Header {
            version: 2,
            prev_blockhash: BlockHash::from_bytes([3; 32]),
            merkle_root: BlockHash::from_bytes([4; 32]),
            time: 1_600_000_000,
            bits: 0x1e0fffff,
            nonce: 77,
        };
        chain.file.write(&[0; HEADER_SIZE], 0, true).unwrap();
        chain.file.write(&header.encode(), HEADER_SIZE as u64, false).unwrap();

        assert_eq!(chain.read_own_header(100).unwrap(), None);
        assert_eq!(chain.read_own_header(101).unwrap(), Some(header));
        assert_eq!(chain.read_own_header(102).unwrap(), None);
    }
}
