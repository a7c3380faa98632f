//! Collaborator contracts consumed by the graphics memory manager.
//!
//! The manager never touches hardware directly. Page allocation, aperture
//! (GTT) translation entries and CPU mappings all go through the traits below,
//! so the same allocator runs against a real device or the host-memory
//! [`host::HostPlatform`].

pub mod format;
pub mod host;

use crate::error::GmmResult;
use std::fmt;
use std::ptr::NonNull;

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// A physical (bus) address of a page as seen by the GTT.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PhysAddr(pub u64);

impl PhysAddr {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The result must fit in 64 bits; overflow panics in debug builds.
    #[must_use]
    pub const fn add(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr(0x{:x})", self.0)
    }
}

/// An ordered list of page addresses backing one aperture range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageList {
    pages: Vec<PhysAddr>,
    contiguous: bool,
}

impl PageList {
    #[must_use]
    pub const fn new(pages: Vec<PhysAddr>, contiguous: bool) -> Self {
        Self { pages, contiguous }
    }

    /// Describes `count` consecutive pages starting at `base`.
    ///
    /// The range must not run past the end of the address space.
    #[must_use]
    pub fn from_contiguous(base: PhysAddr, count: usize) -> Self {
        let pages = (0..count as u64)
            .map(|i| base.add(i * PAGE_SIZE))
            .collect();
        Self {
            pages,
            contiguous: true,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[must_use]
    pub const fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    #[must_use]
    pub fn as_slice(&self) -> &[PhysAddr] {
        &self.pages
    }

    /// Physical address of the first page, used to program cursor and
    /// status-page registers that bypass the GTT.
    #[must_use]
    pub fn first_physical_page(&self) -> Option<PhysAddr> {
        self.pages.first().copied()
    }
}

/// Source of backing pages.
pub trait PageAllocator {
    /// Allocate `count` pages. With `contiguous` set the pages must be
    /// physically consecutive.
    ///
    /// # Errors
    /// Returns `GmmError::OutOfMemory` when the request cannot be satisfied.
    fn allocate_pages(&mut self, count: usize, contiguous: bool) -> GmmResult<PageList>;

    /// Return pages previously obtained from `allocate_pages`.
    fn free_pages(&mut self, pages: PageList);

    /// Ask other caches to give memory back. Invoked at most once per
    /// allocation, after the first `allocate_pages` failure.
    fn flush_all(&mut self) -> bool {
        false
    }
}

/// Writer for the hardware aperture translation table.
pub trait GttWriter {
    /// Install translation entries for `pages` starting at aperture `offset`.
    ///
    /// # Errors
    /// Fails if the range falls outside the aperture.
    fn gtt_insert(&mut self, pages: &[PhysAddr], offset: u64) -> GmmResult<()>;

    /// Remove the entries installed for `pages` at `offset`.
    fn gtt_remove(&mut self, pages: &[PhysAddr], offset: u64);
}

/// Creates uncached CPU views of page arrays.
pub trait CpuMapper {
    /// Map `pages` into one linear CPU range. The pages need not be
    /// physically contiguous.
    ///
    /// # Errors
    /// Returns `GmmError::OutOfMemory` when the mapping table is exhausted.
    fn map_pages(&mut self, pages: &[PhysAddr]) -> GmmResult<NonNull<u8>>;

    /// Destroy a mapping created by `map_pages`.
    fn unmap_pages(&mut self, addr: NonNull<u8>, page_count: usize);
}

/// Everything the manager needs from the device.
pub trait Platform: PageAllocator + GttWriter + CpuMapper {}

impl<T: PageAllocator + GttWriter + CpuMapper> Platform for T {}
