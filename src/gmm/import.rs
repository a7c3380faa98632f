//! Adoption of page arrays owned by other subsystems.
//!
//! Imported chunks form their own free pool. They are always 256 KiB aligned,
//! keep their original capacity across reuse and never hand their pages to
//! the page allocator.

use super::chunk::{Backing, Chunk, ChunkKind, ChunkState};
use super::manager::{GraphicsMemoryManager, drop_mapping, unbind};
use super::surface::DISPLAY_ALIGN;
use crate::error::{GmmError, GmmResult};
use crate::hal::{PAGE_SIZE, PhysAddr, Platform};
use std::sync::Arc;

impl<P: Platform> GraphicsMemoryManager<P> {
    /// Make the first `page_count` entries of `pages` visible in the aperture.
    ///
    /// The manager keeps a reference to `pages` until [`Self::release_import`];
    /// it never copies or frees them.
    ///
    /// # Errors
    /// `InvalidArgument` if `page_count` is zero or exceeds `pages`,
    /// `OutOfMemory` if the aperture is exhausted.
    pub fn import_pages(&mut self, pages: Arc<[PhysAddr]>, page_count: usize) -> GmmResult<u64> {
        if page_count == 0 || page_count > pages.len() {
            return Err(GmmError::InvalidArgument("bad import page count"));
        }
        let size = page_count as u64 * PAGE_SIZE;

        if let Some(id) = self.registry.first_fit(ChunkKind::Imported, size, DISPLAY_ALIGN) {
            let chunk = self.registry.get_mut(id);
            self.platform.gtt_insert(&pages[..page_count], chunk.offset)?;

            chunk.backing = Backing::Borrowed {
                pages,
                count: page_count,
            };
            chunk.bound = true;
            chunk.state = ChunkState::InUse;
            log::debug!(
                "GMM: import of {page_count} pages reuses 0x{:x} (0x{:x} bytes)",
                chunk.offset,
                chunk.size()
            );
            return Ok(chunk.offset);
        }

        let offset = self.registry.next_offset(size, DISPLAY_ALIGN)?;
        self.platform.gtt_insert(&pages[..page_count], offset)?;

        let mut chunk = Chunk::new(offset, size, ChunkKind::Imported);
        chunk.backing = Backing::Borrowed {
            pages,
            count: page_count,
        };
        chunk.bound = true;
        self.registry.append(chunk);

        log::debug!("GMM: imported {page_count} pages at 0x{offset:x}");
        Ok(offset)
    }

    /// Unbind an import and drop the manager's reference to its pages.
    ///
    /// The chunk stays in the imported free pool at its full capacity.
    ///
    /// # Errors
    /// `ImportMisuse` if `offset` was never imported, `DoubleFree` if the
    /// import was already released.
    pub fn release_import(&mut self, offset: u64) -> GmmResult<()> {
        let chunk = match self.registry.find_by_offset(offset) {
            Some(id) if self.registry.get(id).kind == ChunkKind::Imported => {
                self.registry.get_mut(id)
            }
            _ => {
                log::warn!("GMM: release_import of non-imported offset 0x{offset:x}");
                return Err(GmmError::ImportMisuse(offset));
            }
        };
        if chunk.is_free() {
            log::warn!("GMM: import at 0x{offset:x} already released");
            return Err(GmmError::DoubleFree(offset));
        }

        drop_mapping(&mut self.platform, chunk);
        unbind(&mut self.platform, chunk);
        chunk.backing = Backing::Detached;
        chunk.state = ChunkState::Free;

        log::debug!("GMM: released import at 0x{offset:x}");
        Ok(())
    }
}
