//! The set of all known candidate chains, chain selection and reorgs.
//!
//! The registry owns every [`Chain`] in an arena addressed by stable
//! integer keys. All mutation goes through `&mut self`, so callers needing
//! concurrency wrap the registry in a single mutex. Cumulative work is
//! memoized per retarget boundary in a hash-addressed cache, safe to share
//! across chains that agree on a prefix.
use std::collections::HashMap;
use std::fs;
use std::mem;
use std::path::{Path, PathBuf};

use ares_common::block::{
    Bits, BlockHash, BlockTime, Header, Height, Work, CHUNK_SIZE, HEADER_SIZE,
};
use ares_common::network::{Checkpoint, Params};

use crate::chain::{Chain, ChainKey};
use crate::difficulty::{self, ChunkWindow, HeaderSource, WithWindow, DGW_PAST_BLOCKS};
use crate::error::Error;
use crate::store::{
    self, fork_file_name, parse_fork_file_name, HeaderFile, BEST_CHAIN_FILE, FORKS_DIR,
};

/// How old the tip timestamp may be before the chain is considered stale.
pub const STALE_DELAY: BlockTime = 8 * 60 * 60;

/// All known candidate header chains of one network.
pub struct Registry {
    params: Params,
    headers_dir: PathBuf,
    arena: Vec<Chain>,
    best: ChainKey,
    // Block hash at a retarget boundary to cumulative work up to and
    // including that block.
    chainwork_cache: HashMap<BlockHash, Work>,
}

/// Headers of one chain, as seen through the registry's parent walk.
struct ChainView<'a> {
    registry: &'a Registry,
    key: ChainKey,
}

impl HeaderSource for ChainView<'_> {
    fn header_at(&self, height: Height) -> Result<Option<Header>, Error> {
        self.registry.read_header(self.key, height as i64)
    }
}

impl Registry {
    /// Initialize the registry from a headers directory: open the canonical
    /// best-chain file, then scan the forks directory and reconstruct every
    /// fork that still passes its consistency checks. Forks that fail are
    /// deleted outright, not retried.
    pub fn load(headers_dir: &Path, params: Params) -> Result<Self, Error> {
        fs::create_dir_all(headers_dir).map_err(store::Error::Io)?;
        let forks_dir = headers_dir.join(FORKS_DIR);
        fs::create_dir_all(&forks_dir).map_err(store::Error::Io)?;

        let file = HeaderFile::open(headers_dir, headers_dir.join(BEST_CHAIN_FILE))?;
        let best = Chain {
            forkpoint: 0,
            forkpoint_hash: params.genesis_hash,
            prev_hash: None,
            parent: None,
            file,
        };
        let mut registry = Registry {
            params,
            headers_dir: headers_dir.to_path_buf(),
            arena: vec![best],
            best: ChainKey(0),
            chainwork_cache: HashMap::from([(BlockHash::ZERO, Work::zero())]),
        };
        registry.check_best_chain()?;
        registry.scan_forks(&forks_dir)?;

        Ok(registry)
    }

    /// Key of the canonical best chain, the one rooted at genesis.
    pub fn best(&self) -> ChainKey {
        self.best
    }

    /// Look up a chain by key.
    pub fn chain(&self, key: ChainKey) -> Option<&Chain> {
        self.arena.get(key.0)
    }

    /// All known chains, keyed.
    pub fn chains(&self) -> impl Iterator<Item = (ChainKey, &Chain)> {
        self.arena
            .iter()
            .enumerate()
            .map(|(i, chain)| (ChainKey(i), chain))
    }

    /// The network parameters this registry validates against.
    pub fn params(&self) -> &Params {
        &self.params
    }

    fn chain_ref(&self, key: ChainKey) -> &Chain {
        self.arena.get(key.0).expect("chain key is live")
    }

    fn chain_mut(&mut self, key: ChainKey) -> &mut Chain {
        self.arena.get_mut(key.0).expect("chain key is live")
    }

    fn pair_mut(&mut self, a: ChainKey, b: ChainKey) -> (&mut Chain, &mut Chain) {
        assert_ne!(a.0, b.0);

        if a.0 < b.0 {
            let (lo, hi) = self.arena.split_at_mut(b.0);
            (&mut lo[a.0], &mut hi[0])
        } else {
            let (lo, hi) = self.arena.split_at_mut(a.0);
            (&mut hi[0], &mut lo[b.0])
        }
    }

    /// Read the header at `height` on the branch ending in `key`, walking
    /// down to parent chains for heights below the forkpoint.
    pub fn read_header(&self, key: ChainKey, height: i64) -> Result<Option<Header>, Error> {
        if height < 0 {
            return Ok(None);
        }
        let mut key = key;
        loop {
            let chain = self.chain_ref(key);
            if (height as u64) < chain.forkpoint {
                match chain.parent {
                    Some(parent) => key = parent,
                    None => return Ok(None),
                }
            } else if height > chain.height() {
                return Ok(None);
            } else {
                return chain.read_own_header(height as u64);
            }
        }
    }

    /// The block hash at `height` on the branch ending in `key`.
    ///
    /// Height `-1` is the virtual block below genesis and hashes to all
    /// zeroes. Checkpointed chunk boundaries are answered from the
    /// checkpoint table without touching the file.
    pub fn get_hash(&self, key: ChainKey, height: i64) -> Result<BlockHash, Error> {
        let within_checkpoints = height >= 0
            && height <= self.params.max_checkpoint()
            && (height + 1) % CHUNK_SIZE as i64 == 0;

        if height == -1 {
            Ok(BlockHash::ZERO)
        } else if height == 0 {
            Ok(self.params.genesis_hash)
        } else if within_checkpoints {
            let index = (height / CHUNK_SIZE as i64) as usize;
            Ok(self.params.checkpoints[index].hash)
        } else {
            match self.read_header(key, height)? {
                Some(header) => Ok(header.block_hash()),
                None => Err(Error::MissingHeader(height as u64)),
            }
        }
    }

    /// Whether the branch ending in `key` has `hash` at `height`.
    pub fn check_hash(&self, key: ChainKey, height: i64, hash: &BlockHash) -> bool {
        match self.get_hash(key, height) {
            Ok(known) => known == *hash,
            Err(_) => false,
        }
    }

    /// The compact target required at `height` on the branch ending in `key`.
    pub fn required_bits(&self, key: ChainKey, height: Height) -> Result<Bits, Error> {
        let source = ChainView {
            registry: self,
            key,
        };
        difficulty::required_bits(height, &source, &self.params)
    }

    /// The latest header of the branch ending in `key`.
    pub fn header_at_tip(&self, key: ChainKey) -> Result<Option<Header>, Error> {
        let height = self.chain_ref(key).height();
        self.read_header(key, height)
    }

    /// Whether the tip is older than [`STALE_DELAY`] as of `now`. A chain
    /// with no tip at all counts as stale.
    pub fn is_tip_stale(&self, key: ChainKey, now: BlockTime) -> Result<bool, Error> {
        match self.header_at_tip(key)? {
            None => Ok(true),
            Some(header) => Ok((header.time as u64 + STALE_DELAY as u64) < now as u64),
        }
    }

    /// Verify every header of a chunk against the branch ending in `key`,
    /// without persisting anything. Returns the verified headers so they
    /// can be consulted while the chunk is still pending.
    ///
    /// A single bad header rejects the whole chunk.
    pub fn verify_chunk(
        &self,
        key: ChainKey,
        index: u64,
        data: &[u8],
    ) -> Result<ChunkWindow, Error> {
        if data.is_empty() {
            return Err(Error::InvalidHeader(
                ares_common::block::DecodeError::Empty,
            ));
        }
        if data.len() % HEADER_SIZE != 0 {
            return Err(Error::InvalidHeader(
                ares_common::block::DecodeError::Length(data.len()),
            ));
        }
        let count = (data.len() / HEADER_SIZE) as u64;
        let start = index * CHUNK_SIZE;
        let mut prev_hash = self.get_hash(key, start as i64 - 1)?;
        let mut window = ChunkWindow::default();

        for i in 0..count {
            let height = start + i;
            let header = Header::decode(&data[(i as usize) * HEADER_SIZE..][..HEADER_SIZE])?;
            let expected = match self.get_hash(key, height as i64) {
                Ok(hash) => Some(hash),
                Err(Error::MissingHeader(_)) => None,
                Err(e) => return Err(e),
            };
            let required = {
                let base = ChainView {
                    registry: self,
                    key,
                };
                let source = WithWindow {
                    base: &base,
                    window: &window,
                };
                difficulty::required_bits(height, &source, &self.params)?
            };
            difficulty::verify_header(
                &header,
                height,
                &prev_hash,
                required,
                expected.as_ref(),
                &self.params,
            )?;
            prev_hash = header.block_hash();
            window.push(height, header);
        }
        Ok(window)
    }

    /// Persist a verified chunk. Chunks inside the checkpoint region are
    /// the responsibility of the best chain, even when called on a fork.
    pub fn save_chunk(&mut self, key: ChainKey, index: u64, chunk: &[u8]) -> Result<(), Error> {
        let within_checkpoints = (index as usize) < self.params.checkpoints.len();
        let key = if within_checkpoints && self.chain_ref(key).parent.is_some() {
            self.best
        } else {
            key
        };
        let chain = self.chain_mut(key);
        let mut offset = (index as i64 * CHUNK_SIZE as i64 - chain.forkpoint as i64)
            * HEADER_SIZE as i64;
        let mut data = chunk;
        // If the chunk reaches below our forkpoint, only save the part
        // above it. The part below is the parent's responsibility.
        if offset < 0 {
            let skip = ((-offset) as usize).min(data.len());
            data = &data[skip..];
            offset = 0;
        }
        chain.file.write(data, offset as u64, !within_checkpoints)?;
        self.swap_with_parent(key)
    }

    /// Verify a chunk, then persist it. Bad data rejects the chunk with
    /// `Ok(false)` and leaves no partial state; storage failures propagate.
    pub fn connect_chunk(&mut self, key: ChainKey, index: u64, data: &[u8]) -> Result<bool, Error> {
        match self.verify_chunk(key, index, data) {
            Ok(_) => {}
            Err(Error::Storage(e)) => return Err(Error::Storage(e)),
            Err(e) => {
                log::info!("verifying chunk {} failed: {}", index, e);
                return Ok(false);
            }
        }
        self.save_chunk(key, index, data)?;
        Ok(true)
    }

    /// Append a single verified header at the chain tip.
    pub fn save_header(&mut self, key: ChainKey, height: Height, header: &Header) -> Result<(), Error> {
        let chain = self.chain_mut(key);
        // Headers are only appended at the tip.
        assert_eq!(height, chain.forkpoint + chain.size(), "header is not at the chain tip");

        let offset = (height - chain.forkpoint) * HEADER_SIZE as u64;
        chain.file.write(&header.encode(), offset, true)?;
        self.swap_with_parent(key)
    }

    /// Whether `header` at `height` connects to the branch ending in `key`:
    /// its previous hash matches ours at `height - 1`, the chain tip is at
    /// `height - 1` (unless `check_height` is off), and the header verifies
    /// under the difficulty rule in effect.
    ///
    /// Returns `Ok(false)` when the header merely does not connect; storage
    /// failures propagate as errors.
    pub fn can_connect(
        &self,
        key: ChainKey,
        height: Height,
        header: &Header,
        check_height: bool,
    ) -> Result<bool, Error> {
        let chain = self.chain_ref(key);
        if check_height && chain.height() != height as i64 - 1 {
            return Ok(false);
        }
        if height == 0 {
            return Ok(header.block_hash() == self.params.genesis_hash);
        }
        let prev_hash = match self.get_hash(key, height as i64 - 1) {
            Ok(hash) => hash,
            Err(Error::Storage(e)) => return Err(Error::Storage(e)),
            Err(_) => return Ok(false),
        };
        let required = match self.required_bits(key, height) {
            Ok(bits) => bits,
            Err(Error::Storage(e)) => return Err(Error::Storage(e)),
            Err(_) => return Ok(false),
        };
        match difficulty::verify_header(header, height, &prev_hash, required, None, &self.params) {
            Ok(()) => Ok(true),
            Err(Error::Storage(e)) => Err(Error::Storage(e)),
            Err(_) => Ok(false),
        }
    }

    /// The chain whose tip directly links up with `header`, if any.
    pub fn find_connecting(&self, height: Height, header: &Header) -> Result<Option<ChainKey>, Error> {
        for key in (0..self.arena.len()).map(ChainKey) {
            if self.can_connect(key, height, header, true)? {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    /// All chains containing `hash` at `height`, best first.
    pub fn chains_containing(
        &mut self,
        height: i64,
        hash: &BlockHash,
    ) -> Result<Vec<ChainKey>, Error> {
        let keys: Vec<ChainKey> = (0..self.arena.len())
            .map(ChainKey)
            .filter(|&key| self.check_hash(key, height, hash))
            .collect();
        let mut ranked = Vec::with_capacity(keys.len());
        for key in keys {
            ranked.push((key, self.chainwork(key)?));
        }
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(ranked.into_iter().map(|(key, _)| key).collect())
    }

    /// Fork off the branch ending in `parent` with `header` as the first
    /// header of the new chain.
    pub fn fork(&mut self, parent: ChainKey, height: Height, header: &Header) -> Result<ChainKey, Error> {
        if height as i64 <= self.params.max_checkpoint() {
            return Err(Error::ForkBelowCheckpoint(height));
        }
        if !self.can_connect(parent, height, header, false)? {
            return Err(Error::ChainLinkage {
                height,
                expected: self.get_hash(parent, height as i64 - 1).unwrap_or_default(),
                got: header.prev_blockhash,
            });
        }
        let prev_hash = self.get_hash(parent, height as i64 - 1)?;
        let forkpoint_hash = header.block_hash();
        let path = self
            .headers_dir
            .join(FORKS_DIR)
            .join(fork_file_name(height, &prev_hash, &forkpoint_hash));
        let mut file = HeaderFile::open(&self.headers_dir, path)?;
        file.write(&header.encode(), 0, true)?;

        let key = ChainKey(self.arena.len());
        self.arena.push(Chain {
            forkpoint: height,
            forkpoint_hash,
            prev_hash: Some(prev_hash),
            parent: Some(parent),
            file,
        });
        log::info!("forked chain {} at height {}", self.chain_ref(key).id(), height);
        self.swap_with_parent(key)?;

        Ok(key)
    }

    /// Cumulative work of the branch ending in `key`, up to its tip.
    pub fn chainwork(&mut self, key: ChainKey) -> Result<Work, Error> {
        let height = self.chain_ref(key).height().max(0);
        self.chainwork_at(key, height)
    }

    /// Cumulative work of the branch ending in `key`, up to `height`:
    /// `2016 * work(boundary target)` per completed retarget period, plus
    /// the partial current period. Memoized per boundary hash.
    pub fn chainwork_at(&mut self, key: ChainKey, height: i64) -> Result<Work, Error> {
        let height = height.max(0);
        if self.params.testnet {
            // Difficulty works differently on test networks; implementing
            // it properly is out of scope.
            return Ok(Work::from(height as u64));
        }
        let last_retarget = height / CHUNK_SIZE as i64 * CHUNK_SIZE as i64 - 1;
        let mut cached_height = last_retarget;
        loop {
            // The cache is seeded with the virtual block at height -1, so
            // this walk always terminates.
            debug_assert!(cached_height >= -1);
            let hash = self.get_hash(key, cached_height)?;
            if self.chainwork_cache.contains_key(&hash) {
                break;
            }
            cached_height -= CHUNK_SIZE as i64;
        }
        let mut total = self.chainwork_cache[&self.get_hash(key, cached_height)?];
        while cached_height < last_retarget {
            cached_height += CHUNK_SIZE as i64;
            let work = self.work_of_header_at(key, cached_height as u64)?;
            total = total + work * Work::from(CHUNK_SIZE);
            let hash = self.get_hash(key, cached_height)?;
            self.chainwork_cache.insert(hash, total);
        }
        let work = self.work_of_header_at(key, height as u64)?;
        total = total + work * Work::from(height as u64 % CHUNK_SIZE + 1);

        Ok(total)
    }

    fn work_of_header_at(&self, key: ChainKey, height: Height) -> Result<Work, Error> {
        let header = self
            .read_header(key, height as i64)?
            .ok_or(Error::MissingHeader(height))?;
        let target = difficulty::target_of_bits(height, header.bits, &self.params)?;

        Ok(difficulty::work(target))
    }

    /// Promote the branch ending in `key` over its parent for as long as
    /// its cumulative work exceeds the parent's. Promoting one fork can
    /// cascade, so this loops, bounded by the chain count. After each
    /// swap, former siblings of the old parent that now connect to the
    /// promoted chain are re-parented onto it.
    pub fn swap_with_parent(&mut self, key: ChainKey) -> Result<(), Error> {
        let mut count = 0;
        loop {
            let old_parent = match self.chain_ref(key).parent {
                Some(parent) => parent,
                None => break,
            };
            if !self.swap_step(key)? {
                break;
            }
            count += 1;
            if count > self.arena.len() {
                return Err(Error::ChainworkInconsistency(count));
            }
            if self.chain_ref(key).parent.is_none() {
                self.best = key;
            }
            let siblings: Vec<ChainKey> = self
                .chains()
                .filter(|&(k, chain)| k != key && chain.parent == Some(old_parent))
                .map(|(k, _)| k)
                .collect();
            for sibling in siblings {
                let (forkpoint, prev_hash) = {
                    let chain = self.chain_ref(sibling);
                    (chain.forkpoint, chain.prev_hash)
                };
                if let Some(prev_hash) = prev_hash {
                    if self.check_hash(key, forkpoint as i64 - 1, &prev_hash) {
                        self.chain_mut(sibling).parent = Some(key);
                    }
                }
            }
        }
        Ok(())
    }

    /// Swap one chain with its parent if it became stronger. The chain
    /// objects keep containing the same headers, but their ids change and
    /// so do their backing files.
    fn swap_step(&mut self, key: ChainKey) -> Result<bool, Error> {
        let (parent_key, forkpoint, height) = {
            let chain = self.chain_ref(key);
            match chain.parent {
                None => return Ok(false),
                Some(parent) => (parent, chain.forkpoint, chain.height()),
            }
        };
        // The retargeting rule changes the economics of a reorg past the
        // exponential transition; chains there are never swapped.
        if height >= self.params.asert_anchor_height as i64 {
            log::warn!("preventing chain swap in the exponential era at height {}", height);
            return Ok(false);
        }
        if self.chain_ref(parent_key).height() < forkpoint as i64 {
            return Ok(false);
        }
        if self.chainwork(parent_key)? >= self.chainwork(key)? {
            return Ok(false);
        }
        let parent_forkpoint = self.chain_ref(parent_key).forkpoint;
        assert!(forkpoint > parent_forkpoint, "forkpoint of the parent chain must be lower");
        log::info!("swapping chain at forkpoint {} with its parent at {}", forkpoint, parent_forkpoint);

        let forks_dir = self.headers_dir.join(FORKS_DIR);
        let (child, parent) = self.pair_mut(key, parent_key);
        let branch_size = (parent.height() - forkpoint as i64 + 1) as u64;
        let offset = (forkpoint - parent.forkpoint) * HEADER_SIZE as u64;

        let child_data = child.file.read_all()?;
        let parent_data = parent
            .file
            .read_bytes(offset, (branch_size as usize) * HEADER_SIZE)?;
        if parent_data.len() < HEADER_SIZE {
            return Err(Error::Storage(store::Error::ShortRead(parent_data.len())));
        }
        let demoted_first = Header::decode(&parent_data[..HEADER_SIZE])?;

        // The child takes the parent's file; the parent's demoted branch
        // moves into the child's old file, under a new fork name.
        child.file.write(&parent_data, 0, true)?;
        parent.file.write(&child_data, offset, true)?;
        mem::swap(&mut child.file, &mut parent.file);

        child.parent = parent.parent.take();
        parent.parent = Some(key);
        mem::swap(&mut child.forkpoint, &mut parent.forkpoint);
        mem::swap(&mut child.prev_hash, &mut parent.prev_hash);
        child.forkpoint_hash = parent.forkpoint_hash;
        parent.forkpoint_hash = demoted_first.block_hash();

        let prev_hash = parent.prev_hash.expect("a demoted parent has a previous hash");
        let path = forks_dir.join(fork_file_name(parent.forkpoint, &prev_hash, &parent.forkpoint_hash));
        parent.file.rename(path)?;

        Ok(true)
    }

    /// Build the bootstrap checkpoint list for the branch ending in `key`:
    /// for each completed chunk, the hash of its last header, the target in
    /// effect there, and the trailing headers seeding the moving-average
    /// window, newest first.
    pub fn checkpoint_list(&self, key: ChainKey) -> Result<Vec<Checkpoint>, Error> {
        let chunks = (self.chain_ref(key).height().max(0) as u64) / CHUNK_SIZE;
        let mut list = Vec::with_capacity(chunks as usize);

        for index in 0..chunks {
            let end = (index + 1) * CHUNK_SIZE - 1;
            let header = self
                .read_header(key, end as i64)?
                .ok_or(Error::MissingHeader(end))?;
            let target = difficulty::target_of_bits(end, header.bits, &self.params)?;

            let mut headers = Vec::with_capacity(DGW_PAST_BLOCKS as usize + 1);
            for height in (end - DGW_PAST_BLOCKS..=end).rev() {
                let h = self
                    .read_header(key, height as i64)?
                    .ok_or(Error::MissingHeader(height))?;
                headers.push((height, h.encode().to_vec()));
            }
            list.push(Checkpoint {
                hash: header.block_hash(),
                target,
                headers,
            });
        }
        Ok(list)
    }

    /// Pre-populate the best-chain file for the checkpoint region: write
    /// each checkpoint's trailing headers at their absolute offsets,
    /// leaving the rest as unwritten (sparse) zero records.
    pub fn init_best_chain_file(&mut self) -> Result<(), Error> {
        let required = self.params.checkpoints.len() as u64 * CHUNK_SIZE;
        let checkpoints = self.params.checkpoints.clone();
        let best = self.best;
        let chain = self.chain_mut(best);
        if chain.file.len() >= required {
            return Ok(());
        }
        for checkpoint in &checkpoints {
            for (height, raw) in &checkpoint.headers {
                chain.file.write(raw, height * HEADER_SIZE as u64, false)?;
            }
        }
        Ok(())
    }

    /// The best chain must still connect above the last checkpoint;
    /// otherwise its stored headers are discarded and re-synced.
    fn check_best_chain(&mut self) -> Result<(), Error> {
        let max_checkpoint = self.params.max_checkpoint();
        if self.chain_ref(self.best).height() <= max_checkpoint {
            return Ok(());
        }
        let height = (max_checkpoint + 1) as u64;
        let connects = match self.read_header(self.best, height as i64)? {
            None => false,
            Some(header) => self.can_connect(self.best, height, &header, false)?,
        };
        if !connects {
            log::info!("deleting best chain: cannot connect the header above the last checkpoint");
            let best = self.best;
            self.chain_mut(best).file.write(&[], 0, true)?;
        }
        Ok(())
    }

    fn scan_forks(&mut self, forks_dir: &Path) -> Result<(), Error> {
        let mut names = Vec::new();
        for entry in fs::read_dir(forks_dir).map_err(store::Error::Io)? {
            let entry = entry.map_err(store::Error::Io)?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if !name.starts_with("fork2_") || name.contains('.') {
                continue;
            }
            names.push(name);
        }
        // Sorting by forkpoint guarantees parents are instantiated first.
        names.sort_by_key(|name| {
            parse_fork_file_name(name)
                .map(|(forkpoint, _, _)| forkpoint)
                .unwrap_or(0)
        });
        for name in names {
            self.instantiate_fork(forks_dir, &name)?;
        }
        Ok(())
    }

    fn instantiate_fork(&mut self, forks_dir: &Path, name: &str) -> Result<(), Error> {
        let (forkpoint, prev_hash, first_hash) = match parse_fork_file_name(name) {
            Some(parts) => parts,
            None => {
                log::info!("deleting chain {}: unrecognized fork file name", name);
                fs::remove_file(forks_dir.join(name)).map_err(store::Error::Io)?;
                return Ok(());
            }
        };
        if (forkpoint as i64) <= self.params.max_checkpoint() {
            log::info!("deleting chain {}: fork below the last checkpoint", name);
            fs::remove_file(forks_dir.join(name)).map_err(store::Error::Io)?;
            return Ok(());
        }
        let parent = self
            .chains()
            .map(|(key, _)| key)
            .find(|&key| self.check_hash(key, forkpoint as i64 - 1, &prev_hash));
        let parent = match parent {
            Some(parent) => parent,
            None => {
                log::info!("deleting chain {}: cannot find parent chain", name);
                fs::remove_file(forks_dir.join(name)).map_err(store::Error::Io)?;
                return Ok(());
            }
        };
        let file = HeaderFile::open(&self.headers_dir, forks_dir.join(name))?;
        let chain = Chain {
            forkpoint,
            forkpoint_hash: first_hash,
            prev_hash: Some(prev_hash),
            parent: Some(parent),
            file,
        };
        let header = match chain.read_own_header(forkpoint)? {
            Some(header) => header,
            None => {
                log::info!("deleting chain {}: empty fork file", name);
                chain.file.delete()?;
                return Ok(());
            }
        };
        if header.block_hash() != first_hash {
            log::info!("deleting chain {}: incorrect first hash", name);
            chain.file.delete()?;
            return Ok(());
        }
        if !self.can_connect(parent, forkpoint, &header, false)? {
            log::info!("deleting chain {}: cannot connect to parent", name);
            chain.file.delete()?;
            return Ok(());
        }
        self.arena.push(chain);
        Ok(())
    }
}
