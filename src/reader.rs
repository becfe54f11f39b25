//! Reading MMDB files
//!
//! [`MmdbReader`] validates the layout of a database buffer and exposes two
//! views of it: point lookups and a walk over every network that resolves to
//! data. The walk is lazy ([`NetworkIter`]) or parallel over subtrees
//! ([`MmdbReader::par_networks`]).

use crate::config::PROGRESS_INTERVAL;
use crate::data_section::{DataDecoder, DataValue};
use crate::error::{CompactError, Result};
use crate::mmdb::{Metadata, MmdbHeader, RecordTarget, SearchTree};
use crate::network::{Entry, Network};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// A record found by [`MmdbReader::lookup`]
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    /// The record
    pub data: DataValue,
    /// Prefix length of the matching network, in the family of the query
    pub prefix_len: u8,
}

/// Read-only view of an MMDB database
///
/// `S` is any byte container: `Vec<u8>`, `&[u8]` or a `memmap2::Mmap`.
pub struct MmdbReader<S> {
    data: S,
    header: MmdbHeader,
    metadata: Metadata,
}

impl<S: AsRef<[u8]>> MmdbReader<S> {
    /// Parse the metadata and validate the file layout
    pub fn from_source(data: S) -> Result<Self> {
        let (header, metadata) = MmdbHeader::from_file(data.as_ref())?;
        log::debug!(
            "Opened MMDB: {} nodes, {}-bit records, IPv{}, {} byte data section",
            header.node_count,
            header.record_size.bits(),
            header.ip_version.number(),
            header.data_section_len()
        );
        Ok(Self {
            data,
            header,
            metadata,
        })
    }

    /// Decoded metadata block
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// File layout
    pub fn header(&self) -> &MmdbHeader {
        &self.header
    }

    /// Raw bytes of the database
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn tree(&self) -> SearchTree<'_> {
        SearchTree::new(self.data.as_ref(), &self.header)
    }

    fn decoder(&self) -> DataDecoder<'_> {
        let data = self.data.as_ref();
        DataDecoder::with_origin(
            &data[self.header.data_section_start..self.header.data_section_end],
            self.header.data_section_start,
        )
    }

    /// Decode the record at `offset` within the data section
    pub fn decode_record(&self, offset: usize) -> Result<DataValue> {
        self.decoder().decode(offset)
    }

    /// Longest-prefix lookup of a single address
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<Lookup>> {
        match self.tree().lookup(ip)? {
            Some(hit) => Ok(Some(Lookup {
                data: self.decode_record(hit.data_offset)?,
                prefix_len: hit.prefix_len,
            })),
            None => Ok(None),
        }
    }

    /// Lazily walk every network that resolves to data, in address order
    pub fn networks(&self) -> Result<NetworkIter<'_>> {
        NetworkIter::new(self.tree(), self.decoder())
    }

    /// Walk the tree on the rayon pool
    ///
    /// The tree is expanded sequentially down to `split_depth`; each subtree
    /// found there is walked by a worker. Only entries accepted by `keep`
    /// are returned, concatenated in address order. Returns the number of
    /// networks visited alongside the kept entries.
    pub fn par_networks<F>(&self, split_depth: u8, keep: F) -> Result<(u64, Vec<Entry>)>
    where
        S: Sync,
        F: Fn(&Entry) -> bool + Sync,
    {
        let tree = self.tree();
        let decoder = self.decoder();

        let mut frontier = NetworkIter::new(tree, decoder)?;
        frontier.split_depth = Some(split_depth.min(frontier.width));

        let progress = Progress::new(PROGRESS_INTERVAL);
        let mut chunks = Vec::new();
        let mut pending = Vec::new();
        let mut visited = 0u64;
        while let Some(item) = frontier.next_item() {
            match item? {
                WalkItem::Entry(entry) => {
                    visited += 1;
                    progress.tick();
                    if keep(&entry) {
                        pending.push(entry);
                    }
                }
                WalkItem::Subtree(frame) => {
                    if !pending.is_empty() {
                        chunks.push(Chunk::Done(std::mem::take(&mut pending)));
                    }
                    chunks.push(Chunk::Subtree(frame));
                }
            }
        }
        if !pending.is_empty() {
            chunks.push(Chunk::Done(pending));
        }

        log::debug!(
            "Parallel walk: {} chunks at depth {}",
            chunks.len(),
            split_depth
        );

        let ipv4_start = frontier.ipv4_start;
        let results: Vec<(u64, Vec<Entry>)> = chunks
            .into_par_iter()
            .map(|chunk| -> Result<(u64, Vec<Entry>)> {
                match chunk {
                    Chunk::Done(entries) => Ok((0, entries)),
                    Chunk::Subtree(frame) => {
                        let mut iter = NetworkIter::from_frame(tree, decoder, frame, ipv4_start);
                        let mut count = 0u64;
                        let mut kept = Vec::new();
                        for entry in &mut iter {
                            let entry = entry?;
                            count += 1;
                            progress.tick();
                            if keep(&entry) {
                                kept.push(entry);
                            }
                        }
                        Ok((count, kept))
                    }
                }
            })
            .collect::<Result<_>>()?;

        let mut entries = Vec::new();
        for (count, chunk) in results {
            visited += count;
            entries.extend(chunk);
        }
        Ok((visited, entries))
    }
}

/// Visited-network counter shared by walk workers
///
/// Logs a progress line every `interval` networks.
pub(crate) struct Progress {
    seen: AtomicU64,
    interval: u64,
}

impl Progress {
    pub(crate) fn new(interval: u64) -> Self {
        Self {
            seen: AtomicU64::new(0),
            interval: interval.max(1),
        }
    }

    /// Count one network; true when a progress line was logged
    pub(crate) fn tick(&self) -> bool {
        let seen = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % self.interval == 0 {
            log::info!("  processed {} networks...", seen);
            true
        } else {
            false
        }
    }
}

enum Chunk {
    Done(Vec<Entry>),
    Subtree(Frame),
}

/// Pending child record and the network it covers (top-aligned bits)
#[derive(Debug, Clone, Copy)]
struct Frame {
    target: RecordTarget,
    base: u128,
    depth: u8,
}

enum WalkItem {
    Entry(Entry),
    Subtree(Frame),
}

/// Lazy walk over the networks of a search tree
///
/// Yields entries in ascending address order. Inner pointers into the
/// IPv4 subtree from anywhere but `::/96` (the `::ffff:0:0/96` and
/// `2002::/16` aliases) are skipped so every address is reported once.
/// After the first error the iterator is exhausted.
pub struct NetworkIter<'a> {
    tree: SearchTree<'a>,
    decoder: DataDecoder<'a>,
    stack: Vec<Frame>,
    /// Address bits the tree branches on (32 or 128)
    width: u8,
    ipv4_start: Option<u32>,
    /// Stop descending at this depth and hand the subtree back
    split_depth: Option<u8>,
    cache: FxHashMap<usize, DataValue>,
}

impl<'a> NetworkIter<'a> {
    fn new(tree: SearchTree<'a>, decoder: DataDecoder<'a>) -> Result<Self> {
        let ipv4_start = tree.ipv4_start_node()?;
        let root = Frame {
            target: if tree.is_empty() {
                RecordTarget::Empty
            } else {
                RecordTarget::Node(0)
            },
            base: 0,
            depth: 0,
        };
        Ok(Self::from_frame(tree, decoder, root, ipv4_start))
    }

    fn from_frame(
        tree: SearchTree<'a>,
        decoder: DataDecoder<'a>,
        frame: Frame,
        ipv4_start: Option<u32>,
    ) -> Self {
        Self {
            tree,
            decoder,
            stack: vec![frame],
            width: tree.header().ip_version.bit_count(),
            ipv4_start,
            split_depth: None,
            cache: FxHashMap::default(),
        }
    }

    fn record(&mut self, offset: usize) -> Result<DataValue> {
        if let Some(value) = self.cache.get(&offset) {
            return Ok(value.clone());
        }
        let value = self.decoder.decode(offset)?;
        self.cache.insert(offset, value.clone());
        Ok(value)
    }

    /// Translate top-aligned tree bits into the 128-bit network space
    fn network(&self, base: u128, depth: u8) -> Result<Network> {
        let shift = 128 - self.width;
        Network::new(base >> shift, depth + shift)
    }

    fn is_alias(&self, node: u32, base: u128, depth: u8) -> bool {
        self.width == 128
            && self.ipv4_start == Some(node)
            && !(base == 0 && depth == crate::network::IPV4_SUBTREE_PREFIX)
    }

    fn next_item(&mut self) -> Option<Result<WalkItem>> {
        while let Some(frame) = self.stack.pop() {
            match frame.target {
                RecordTarget::Empty => continue,
                RecordTarget::Data(offset) => {
                    let item = self.network(frame.base, frame.depth).and_then(|network| {
                        Ok(WalkItem::Entry(Entry::new(network, self.record(offset)?)))
                    });
                    if item.is_err() {
                        self.stack.clear();
                    }
                    return Some(item);
                }
                RecordTarget::Node(node) => {
                    if self.is_alias(node, frame.base, frame.depth) {
                        log::debug!(
                            "Skipping aliased subtree at {}/{}",
                            std::net::Ipv6Addr::from(frame.base),
                            frame.depth
                        );
                        continue;
                    }
                    if frame.depth >= self.width {
                        self.stack.clear();
                        return Some(Err(CompactError::malformed(
                            self.tree.header().tree_size,
                            format!(
                                "node {} sits below the {}-bit address depth",
                                node, self.width
                            ),
                        )));
                    }
                    if self.split_depth == Some(frame.depth) {
                        return Some(Ok(WalkItem::Subtree(frame)));
                    }

                    let (left, right) = match self.tree.children(node) {
                        Ok(children) => children,
                        Err(e) => {
                            self.stack.clear();
                            return Some(Err(e));
                        }
                    };
                    let depth = frame.depth + 1;
                    let right_base = frame.base | (1u128 << (128 - depth as u32));
                    // Right first so the left half is popped (and emitted) first
                    self.stack.push(Frame {
                        target: right,
                        base: right_base,
                        depth,
                    });
                    self.stack.push(Frame {
                        target: left,
                        base: frame.base,
                        depth,
                    });
                }
            }
        }
        None
    }
}

impl Iterator for NetworkIter<'_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            return match self.next_item()? {
                Ok(WalkItem::Entry(entry)) => Some(Ok(entry)),
                // Only produced when a split depth is set
                Ok(WalkItem::Subtree(_)) => continue,
                Err(e) => Some(Err(e)),
            };
        }
    }
}
