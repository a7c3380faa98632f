//! Reference-counted CPU views of chunks.
//!
//! A chunk's mapping is created on the first `map` and shared by every later
//! one. It is destroyed when the last `unmap` drops the count to zero. The
//! count only gates the mapping; the chunk itself lives on.

use super::manager::GraphicsMemoryManager;
use crate::error::{GmmError, GmmResult};
use crate::hal::Platform;
use std::ptr::NonNull;

impl<P: Platform> GraphicsMemoryManager<P> {
    /// Return a CPU pointer to the chunk at `offset`, creating an uncached
    /// mapping on first use.
    ///
    /// # Errors
    /// `NotFound` for an unknown offset, `InvalidArgument` if the chunk has no
    /// bound pages, `OutOfMemory` if the platform's mapping table is full.
    pub fn map(&mut self, offset: u64) -> GmmResult<NonNull<u8>> {
        let Some(id) = self.registry.find_by_offset(offset) else {
            log::warn!("GMM: map of unknown offset 0x{offset:x}");
            return Err(GmmError::NotFound(offset));
        };

        let chunk = self.registry.get_mut(id);
        if let Some(addr) = chunk.mapping {
            chunk.ref_count += 1;
            return Ok(addr);
        }
        if !chunk.bound {
            return Err(GmmError::InvalidArgument("chunk has no bound pages"));
        }

        let addr = self.platform.map_pages(chunk.pages()).inspect_err(|e| {
            log::error!("GMM: CPU mapping of 0x{offset:x} failed: {e}");
        })?;

        chunk.mapping = Some(addr);
        chunk.mapped_pages = chunk.pages().len();
        chunk.ref_count = 1;
        log::debug!("GMM: mapped 0x{offset:x} at {addr:p}");
        Ok(addr)
    }

    /// Drop one reference to the mapping at `addr`.
    ///
    /// # Errors
    /// `NotFound` if `addr` is not a live mapping, which includes an `unmap`
    /// after the count already reached zero. State is left untouched.
    pub fn unmap(&mut self, addr: NonNull<u8>) -> GmmResult<()> {
        let Some(id) = self.registry.find_by_mapping(addr) else {
            log::warn!("GMM: surplus unmap of {addr:p}");
            return Err(GmmError::NotFound(addr.as_ptr() as u64));
        };

        let chunk = self.registry.get_mut(id);
        chunk.ref_count = chunk.ref_count.saturating_sub(1);
        if chunk.ref_count == 0 {
            chunk.mapping = None;
            self.platform.unmap_pages(addr, chunk.mapped_pages);
            chunk.mapped_pages = 0;
            log::debug!("GMM: unmapped 0x{:x}", chunk.offset);
        }
        Ok(())
    }
}
