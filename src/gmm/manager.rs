#![allow(clippy::cast_possible_truncation)]

use super::chunk::{Backing, Chunk, ChunkId, ChunkKind, ChunkRegistry, ChunkState};
use super::config::GmmConfig;
use super::region::{Region, RegionFlags, RegionPlacement, RegionType};
use super::surface::{AllocKind, DISPLAY_ALIGN, Surface, SurfaceFlags, SurfaceGeometry};
use crate::error::{GmmError, GmmResult};
use crate::hal::format::PixelFormat;
use crate::hal::{PAGE_SIZE, PageList, PhysAddr, Platform};
use crate::utils::is_aligned;
use std::mem;

/// Diagnostic snapshot of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub offset: u64,
    pub size: u64,
    pub kind: ChunkKind,
    pub state: ChunkState,
    pub bound: bool,
    /// Physical base, for contiguous chunks.
    pub phys: Option<PhysAddr>,
    pub ref_count: u32,
}

impl ChunkInfo {
    fn of(chunk: &Chunk) -> Self {
        Self {
            offset: chunk.offset,
            size: chunk.size(),
            kind: chunk.kind,
            state: chunk.state,
            bound: chunk.bound,
            phys: chunk.phys,
            ref_count: chunk.ref_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GmmStats {
    /// Chunks created since init. Never decreases before shutdown.
    pub chunks: usize,
    pub chunks_in_use: usize,
    /// Aperture consumed by the bump pointer, including alignment gaps.
    pub bytes_reserved: u64,
    pub bytes_in_use: u64,
    pub live_mappings: usize,
    pub imports_in_use: usize,
}

/// The Graphics Memory Manager.
///
/// Hands out aperture ranges for surfaces, regions, imported page arrays and
/// contiguous capture buffers. Ranges are bump-allocated and recycled first-fit;
/// nothing is ever coalesced or moved.
///
/// The manager does no locking. The embedding driver serializes calls.
#[derive(Debug)]
pub struct GraphicsMemoryManager<P: Platform> {
    pub(super) platform: P,
    pub(super) config: GmmConfig,
    pub(super) registry: ChunkRegistry,
}

impl<P: Platform> GraphicsMemoryManager<P> {
    /// Initialize the manager over `config`'s aperture window.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the window is empty or not page aligned.
    pub fn new(platform: P, config: GmmConfig) -> GmmResult<Self> {
        if config.aperture_size == 0 {
            return Err(GmmError::InvalidArgument("empty aperture"));
        }
        if !is_aligned(config.aperture_base, PAGE_SIZE) {
            return Err(GmmError::InvalidArgument("unaligned aperture base"));
        }

        log::info!(
            "GMM: managing aperture 0x{:x}..0x{:x}",
            config.aperture_base,
            config.aperture_limit()
        );

        Ok(Self {
            platform,
            registry: ChunkRegistry::new(config.aperture_base, config.aperture_limit()),
            config,
        })
    }

    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    #[must_use]
    pub const fn config(&self) -> &GmmConfig {
        &self.config
    }

    // ===========================================================================================
    // Core Allocation
    // ===========================================================================================

    /// Allocate a pixel surface.
    ///
    /// Display-capable surfaces land on a 256 KiB boundary, everything else on a page.
    /// Cursor and overlay surfaces, and [`AllocKind::Contiguous`] requests, get
    /// physically contiguous backing.
    ///
    /// # Errors
    /// `OutOfMemory` when neither a free chunk nor fresh pages/aperture are available,
    /// `InvalidArgument` for geometry that cannot be represented.
    pub fn alloc_surface(
        &mut self,
        format: PixelFormat,
        width: u32,
        height: u32,
        pitch_hint: u32,
        alloc_kind: AllocKind,
        flags: SurfaceFlags,
    ) -> GmmResult<Surface> {
        let geometry = SurfaceGeometry::compute(format, width, height, pitch_hint)?;

        let kind = if alloc_kind == AllocKind::Contiguous || flags.needs_contiguous() {
            ChunkKind::Contiguous
        } else {
            ChunkKind::Scattered
        };
        let align = if flags.is_display_capable() {
            DISPLAY_ALIGN
        } else {
            PAGE_SIZE
        };

        let id = self.alloc_owned(geometry.size, align, kind)?;
        let offset = self.registry.get(id).offset;

        log::debug!(
            "GMM: surface {format:?} {width}x{height} pitch {} size 0x{:x} at 0x{offset:x}",
            geometry.pitch,
            geometry.size
        );

        Ok(Surface {
            offset,
            pitch: geometry.pitch,
            size: geometry.size,
        })
    }

    /// Allocate a non-pixel region according to its type's placement policy.
    ///
    /// # Errors
    /// `InvalidArgument` if `size` exceeds a fixed-size region, otherwise as
    /// [`Self::alloc_surface`].
    pub fn alloc_region(
        &mut self,
        size: u64,
        region: RegionType,
        flags: RegionFlags,
    ) -> GmmResult<Region> {
        let placement = RegionPlacement::resolve(size, region, flags)?;
        let kind = if placement.contiguous {
            ChunkKind::Contiguous
        } else {
            ChunkKind::Scattered
        };

        let id = self.alloc_owned(placement.size, placement.align, kind)?;
        let offset = self.registry.get(id).offset;

        log::debug!(
            "GMM: region {region:?} size 0x{:x} at 0x{offset:x}",
            placement.size
        );

        Ok(Region {
            offset,
            size: placement.size,
        })
    }

    /// Shared reuse-or-bump path for surfaces and regions.
    fn alloc_owned(&mut self, size: u64, align: u64, kind: ChunkKind) -> GmmResult<ChunkId> {
        if let Some(id) = self.registry.first_fit(kind, size, align) {
            let chunk = self.registry.get(id);
            let (offset, capacity) = (chunk.offset, chunk.size());

            // Bridge chunks come back without pages.
            if matches!(chunk.backing, Backing::Detached) {
                let pages = self.bind_new_pages(offset, capacity, kind)?;
                let chunk = self.registry.get_mut(id);
                chunk.phys = Self::recorded_phys(kind, &pages);
                chunk.backing = Backing::Owned(pages);
                chunk.bound = true;
            }

            self.registry.get_mut(id).state = ChunkState::InUse;
            log::debug!("GMM: reusing chunk 0x{offset:x} (0x{capacity:x} bytes) for 0x{size:x}");
            return Ok(id);
        }

        let offset = self.registry.next_offset(size, align)?;
        let pages = self.bind_new_pages(offset, size, kind)?;

        let mut chunk = Chunk::new(offset, size, kind);
        chunk.phys = Self::recorded_phys(kind, &pages);
        chunk.backing = Backing::Owned(pages);
        chunk.bound = true;

        Ok(self.registry.append(chunk))
    }

    /// Obtain pages for `size` bytes and install them at `offset`.
    fn bind_new_pages(&mut self, offset: u64, size: u64, kind: ChunkKind) -> GmmResult<PageList> {
        let count = (size / PAGE_SIZE) as usize;
        let pages = self.request_pages(count, kind == ChunkKind::Contiguous)?;

        if let Err(e) = self.platform.gtt_insert(pages.as_slice(), offset) {
            log::error!("GMM: failed to bind {count} pages at 0x{offset:x}: {e}");
            self.platform.free_pages(pages);
            return Err(e);
        }
        Ok(pages)
    }

    /// Page allocation with a single flush-and-retry under pressure.
    fn request_pages(&mut self, count: usize, contiguous: bool) -> GmmResult<PageList> {
        match self.platform.allocate_pages(count, contiguous) {
            Err(GmmError::OutOfMemory) if self.config.flush_on_pressure => {
                log::warn!("GMM: no memory for {count} pages, flushing caches");
                let flushed = self.platform.flush_all();

                self.platform
                    .allocate_pages(count, contiguous)
                    .map_err(|e| {
                        log::error!("GMM: {count} page allocation failed after flush ({flushed}): {e}");
                        GmmError::OutOfMemory
                    })
            }
            other => other,
        }
    }

    fn recorded_phys(kind: ChunkKind, pages: &PageList) -> Option<PhysAddr> {
        match kind {
            ChunkKind::Contiguous => pages.first_physical_page(),
            ChunkKind::Scattered | ChunkKind::Imported => None,
        }
    }

    /// Return a surface or region to the free pool.
    ///
    /// The chunk keeps its pages and aperture entries for the next first-fit hit.
    ///
    /// # Errors
    /// `NotFound` for an unknown offset, `DoubleFree` if already free,
    /// `ImportMisuse` for imported or bridged memory. None of these change state.
    pub fn free(&mut self, offset: u64) -> GmmResult<()> {
        let Some(id) = self.registry.find_by_offset(offset) else {
            log::warn!("GMM: free of unknown offset 0x{offset:x}");
            return Err(GmmError::NotFound(offset));
        };

        let chunk = self.registry.get_mut(id);
        if chunk.is_free() {
            log::warn!("GMM: double free of 0x{offset:x}");
            return Err(GmmError::DoubleFree(offset));
        }
        if matches!(
            chunk.backing,
            Backing::Borrowed { .. } | Backing::Synthesized(_)
        ) {
            log::warn!("GMM: free() on borrowed memory at 0x{offset:x}");
            return Err(GmmError::ImportMisuse(offset));
        }

        chunk.state = ChunkState::Free;
        log::debug!("GMM: freed 0x{offset:x} (0x{:x} bytes)", chunk.size());
        Ok(())
    }

    // ===========================================================================================
    // Queries
    // ===========================================================================================

    /// Translate an aperture offset, anywhere inside a bound chunk, to a
    /// physical address.
    ///
    /// Freed surfaces and regions keep their pages bound until reuse or
    /// shutdown, so they still translate.
    ///
    /// # Errors
    /// `NotFound` if no bound chunk covers `offset`.
    pub fn virt_to_phys(&self, offset: u64) -> GmmResult<PhysAddr> {
        let id = self
            .registry
            .find_containing(offset)
            .ok_or(GmmError::NotFound(offset))?;
        let chunk = self.registry.get(id);
        if !chunk.bound {
            return Err(GmmError::NotFound(offset));
        }

        let rel = offset - chunk.offset;
        chunk
            .pages()
            .get((rel / PAGE_SIZE) as usize)
            .map(|page| page.add(rel % PAGE_SIZE))
            .ok_or(GmmError::NotFound(offset))
    }

    /// Pages currently backing the chunk at `offset`. Empty for a detached chunk.
    ///
    /// # Errors
    /// `NotFound` for an unknown offset.
    pub fn get_page_list(&self, offset: u64) -> GmmResult<&[PhysAddr]> {
        self.registry
            .find_by_offset(offset)
            .map(|id| self.registry.get(id).pages())
            .ok_or(GmmError::NotFound(offset))
    }

    /// Snapshot of every chunk in creation order.
    #[must_use]
    pub fn enumerate_surfaces(&self) -> Vec<ChunkInfo> {
        self.registry.iter().map(ChunkInfo::of).collect()
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn stats(&self) -> GmmStats {
        let mut stats = GmmStats {
            chunks: self.registry.len(),
            bytes_reserved: self.registry.tail() - self.config.aperture_base,
            ..GmmStats::default()
        };

        for chunk in self.registry.iter() {
            if chunk.mapping.is_some() {
                stats.live_mappings += 1;
            }
            if !chunk.is_free() {
                stats.chunks_in_use += 1;
                stats.bytes_in_use += chunk.size();
                if !chunk.kind.is_owned() {
                    stats.imports_in_use += 1;
                }
            }
        }
        stats
    }

    // ===========================================================================================
    // Lifecycle
    // ===========================================================================================

    /// Tear down every chunk: drop CPU mappings, remove aperture entries and
    /// return owned pages. Imported and bridged memory is left to its owner.
    pub fn shutdown(&mut self) {
        let mut chunks = 0;
        let mut pages_returned = 0;

        for mut chunk in self.registry.drain() {
            if let Backing::Owned(list) = &chunk.backing {
                pages_returned += list.len();
            }
            release_backing(&mut self.platform, &mut chunk);
            chunks += 1;
        }

        log::info!("GMM: shutdown released {chunks} chunks, {pages_returned} owned pages");
    }
}

impl<P: Platform> Drop for GraphicsMemoryManager<P> {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            self.shutdown();
        }
    }
}

// ===============================================================================================
// Chunk teardown helpers
// ===============================================================================================

/// Destroy the CPU mapping regardless of its reference count.
pub(super) fn drop_mapping<P: Platform>(platform: &mut P, chunk: &mut Chunk) {
    if let Some(addr) = chunk.mapping.take() {
        if chunk.ref_count > 0 {
            log::warn!(
                "GMM: tearing down mapping of 0x{:x} with {} references",
                chunk.offset,
                chunk.ref_count
            );
        }
        platform.unmap_pages(addr, chunk.mapped_pages);
    }
    chunk.ref_count = 0;
    chunk.mapped_pages = 0;
}

/// Remove aperture entries. Must run before the pages go away.
pub(super) fn unbind<P: Platform>(platform: &mut P, chunk: &mut Chunk) {
    if chunk.bound {
        platform.gtt_remove(chunk.pages(), chunk.offset);
        chunk.bound = false;
    }
}

/// Unmap, unbind and detach. Only owned pages go back to the allocator.
pub(super) fn release_backing<P: Platform>(platform: &mut P, chunk: &mut Chunk) {
    drop_mapping(platform, chunk);
    unbind(platform, chunk);
    chunk.phys = None;

    if let Backing::Owned(list) = mem::replace(&mut chunk.backing, Backing::Detached) {
        platform.free_pages(list);
    }
}
