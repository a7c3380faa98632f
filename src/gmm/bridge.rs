//! Aperture mappings of caller-owned contiguous memory, such as capture
//! buffers, that bypass the page allocator.

use super::chunk::{Backing, Chunk, ChunkKind, ChunkState};
use super::manager::{GraphicsMemoryManager, release_backing};
use super::surface::DISPLAY_ALIGN;
use crate::error::{GmmError, GmmResult};
use crate::hal::{PAGE_SIZE, PageList, PhysAddr, Platform};
use crate::utils::{checked_align_up, is_aligned};

impl<P: Platform> GraphicsMemoryManager<P> {
    /// Map `size` bytes of physically contiguous memory at `phys` into the
    /// aperture. The memory stays owned by the caller.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty or unaligned range, `OutOfMemory` if the
    /// aperture is exhausted.
    pub fn map_to_graphics(&mut self, phys: PhysAddr, size: u64) -> GmmResult<u64> {
        if size == 0 || !is_aligned(phys.as_u64(), PAGE_SIZE) {
            return Err(GmmError::InvalidArgument("bad contiguous range"));
        }
        let size = checked_align_up(size, PAGE_SIZE)
            .filter(|&size| phys.as_u64().checked_add(size).is_some())
            .ok_or(GmmError::InvalidArgument("contiguous range overflow"))?;
        #[allow(clippy::cast_possible_truncation)]
        let pages = PageList::from_contiguous(phys, (size / PAGE_SIZE) as usize);

        if let Some(id) = self
            .registry
            .first_fit(ChunkKind::Contiguous, size, DISPLAY_ALIGN)
        {
            let chunk = self.registry.get_mut(id);
            // A freed cursor or overlay surface still holds its own pages.
            release_backing(&mut self.platform, chunk);
            self.platform.gtt_insert(pages.as_slice(), chunk.offset)?;

            chunk.phys = Some(phys);
            chunk.backing = Backing::Synthesized(pages);
            chunk.bound = true;
            chunk.state = ChunkState::InUse;
            log::debug!(
                "GMM: bridged {phys:?} (0x{size:x} bytes) into reused 0x{:x}",
                chunk.offset
            );
            return Ok(chunk.offset);
        }

        let offset = self.registry.next_offset(size, DISPLAY_ALIGN)?;
        self.platform.gtt_insert(pages.as_slice(), offset)?;

        let mut chunk = Chunk::new(offset, size, ChunkKind::Contiguous);
        chunk.phys = Some(phys);
        chunk.backing = Backing::Synthesized(pages);
        chunk.bound = true;
        self.registry.append(chunk);

        log::debug!("GMM: bridged {phys:?} (0x{size:x} bytes) at 0x{offset:x}");
        Ok(offset)
    }

    /// Undo [`Self::map_to_graphics`]. The chunk is kept for contiguous reuse;
    /// the caller's memory is not touched.
    ///
    /// # Errors
    /// `NotFound` unless a live bridge mapping of at least `size` bytes starts
    /// at `offset`.
    pub fn unmap_from_graphics(&mut self, offset: u64, size: u64) -> GmmResult<()> {
        let Some(id) = self.registry.find_by_offset(offset) else {
            log::warn!("GMM: unmap_from_graphics of unknown offset 0x{offset:x}");
            return Err(GmmError::NotFound(offset));
        };

        let chunk = self.registry.get_mut(id);
        let is_bridge = chunk.state == ChunkState::InUse
            && matches!(chunk.backing, Backing::Synthesized(_))
            && chunk.size() >= size;
        if !is_bridge {
            log::warn!("GMM: no bridge mapping of 0x{size:x} bytes at 0x{offset:x}");
            return Err(GmmError::NotFound(offset));
        }

        release_backing(&mut self.platform, chunk);
        chunk.state = ChunkState::Free;

        log::debug!("GMM: unbridged 0x{offset:x}");
        Ok(())
    }
}
