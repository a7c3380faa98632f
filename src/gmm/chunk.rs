//! Chunk records and the append-only registry that holds them.
//!
//! Chunks are never removed or merged before shutdown. Their position in the
//! registry is their creation order, which is also the first-fit scan order.

use crate::error::{GmmError, GmmResult};
use crate::hal::{PageList, PhysAddr};
use crate::utils::{checked_align_up, is_aligned};
use std::ptr::NonNull;
use std::sync::Arc;

/// Stable handle to a chunk: its index in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    /// Manager-owned pages in any physical order.
    Scattered,
    /// Manager-owned, physically consecutive pages (cursor, overlay, bridge).
    Contiguous,
    /// Pages owned by another subsystem.
    Imported,
}

impl ChunkKind {
    #[must_use]
    pub const fn is_owned(self) -> bool {
        !matches!(self, Self::Imported)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkState {
    Free,
    InUse,
}

/// What sits behind a chunk's aperture range.
#[derive(Debug)]
pub(crate) enum Backing {
    /// No pages. Freed bridge and import chunks wait here for reuse.
    Detached,
    /// Pages obtained from the platform allocator; returned on release.
    Owned(PageList),
    /// Page list describing caller memory (contiguous bridge). The list is
    /// ours, the pages are not.
    Synthesized(PageList),
    /// Caller's page array, shared but never freed by the manager.
    Borrowed { pages: Arc<[PhysAddr]>, count: usize },
}

impl Backing {
    pub(crate) fn pages(&self) -> &[PhysAddr] {
        match self {
            Self::Detached => &[],
            Self::Owned(list) | Self::Synthesized(list) => list.as_slice(),
            Self::Borrowed { pages, count } => &pages[..*count],
        }
    }
}

/// One reservation of aperture space.
#[derive(Debug)]
pub(crate) struct Chunk {
    pub(crate) offset: u64,
    size: u64,
    pub(crate) kind: ChunkKind,
    pub(crate) state: ChunkState,
    pub(crate) backing: Backing,
    /// Aperture entries installed for `backing`.
    pub(crate) bound: bool,
    /// First physical page, recorded for contiguous chunks.
    pub(crate) phys: Option<PhysAddr>,
    pub(crate) mapping: Option<NonNull<u8>>,
    pub(crate) mapped_pages: usize,
    pub(crate) ref_count: u32,
}

impl Chunk {
    pub(crate) const fn new(offset: u64, size: u64, kind: ChunkKind) -> Self {
        Self {
            offset,
            size,
            kind,
            state: ChunkState::InUse,
            backing: Backing::Detached,
            bound: false,
            phys: None,
            mapping: None,
            mapped_pages: 0,
            ref_count: 0,
        }
    }

    pub(crate) const fn size(&self) -> u64 {
        self.size
    }

    pub(crate) const fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub(crate) const fn is_free(&self) -> bool {
        matches!(self.state, ChunkState::Free)
    }

    pub(crate) fn pages(&self) -> &[PhysAddr] {
        self.backing.pages()
    }

    pub(crate) const fn contains(&self, addr: u64) -> bool {
        addr >= self.offset && addr < self.end()
    }
}

/// Registry of every chunk created since init.
#[derive(Debug)]
pub(crate) struct ChunkRegistry {
    chunks: Vec<Chunk>,
    base: u64,
    limit: u64,
}

impl ChunkRegistry {
    /// `limit` is exclusive.
    pub(crate) const fn new(base: u64, limit: u64) -> Self {
        Self {
            chunks: Vec::new(),
            base,
            limit,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub(crate) fn get(&self, id: ChunkId) -> &Chunk {
        &self.chunks[id.0]
    }

    pub(crate) fn get_mut(&mut self, id: ChunkId) -> &mut Chunk {
        &mut self.chunks[id.0]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// End of the most recently created chunk, or the aperture base.
    pub(crate) fn tail(&self) -> u64 {
        self.chunks.last().map_or(self.base, Chunk::end)
    }

    /// First free chunk, in creation order, of `kind` that holds `size`
    /// bytes at an offset aligned to `align`.
    pub(crate) fn first_fit(&self, kind: ChunkKind, size: u64, align: u64) -> Option<ChunkId> {
        self.chunks
            .iter()
            .position(|c| {
                c.is_free() && c.kind == kind && c.size >= size && is_aligned(c.offset, align)
            })
            .map(ChunkId)
    }

    /// Offset a new chunk of `size` bytes would get: the tail rounded up
    /// to `align`.
    ///
    /// # Errors
    /// `OutOfMemory` when the chunk would cross the end of the aperture.
    pub(crate) fn next_offset(&self, size: u64, align: u64) -> GmmResult<u64> {
        let offset = checked_align_up(self.tail(), align).ok_or(GmmError::OutOfMemory)?;
        match offset.checked_add(size) {
            Some(end) if end <= self.limit => Ok(offset),
            _ => Err(GmmError::OutOfMemory),
        }
    }

    /// Appends a chunk. The caller must have obtained `chunk.offset` from
    /// `next_offset`.
    pub(crate) fn append(&mut self, chunk: Chunk) -> ChunkId {
        debug_assert!(chunk.offset >= self.tail());
        self.chunks.push(chunk);
        ChunkId(self.chunks.len() - 1)
    }

    pub(crate) fn find_by_offset(&self, offset: u64) -> Option<ChunkId> {
        self.chunks
            .iter()
            .position(|c| c.offset == offset)
            .map(ChunkId)
    }

    pub(crate) fn find_containing(&self, addr: u64) -> Option<ChunkId> {
        self.chunks.iter().position(|c| c.contains(addr)).map(ChunkId)
    }

    pub(crate) fn find_by_mapping(&self, addr: NonNull<u8>) -> Option<ChunkId> {
        self.chunks
            .iter()
            .position(|c| c.mapping == Some(addr))
            .map(ChunkId)
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, Chunk> {
        self.chunks.drain(..)
    }
}
