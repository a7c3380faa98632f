#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

//! Host-memory platform.
//!
//! "Physical" RAM is a `memfd`, so any page can be mapped more than once and
//! every view observes the same bytes. The GTT is a software translation table
//! and CPU mappings are stitched together page by page with `MAP_FIXED`, which
//! gives scattered pages a linear CPU view the same way a kernel `vmap` would.

use super::{CpuMapper, GttWriter, PAGE_SIZE, PageAllocator, PageList, PhysAddr};
use crate::error::{GmmError, GmmResult};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::{self, NonNull};

/// Frame `n` of host RAM lives at `HOST_RAM_BASE + n * PAGE_SIZE`.
pub const HOST_RAM_BASE: u64 = 0x1_0000_0000;

/// Sizing of the simulated device.
#[derive(Debug, Clone, Copy)]
pub struct HostConfig {
    pub ram_pages: usize,
    pub gtt_entries: usize,
    pub max_mappings: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ram_pages: 4096,    // 16MB
            gtt_entries: 65536, // 256MB aperture
            max_mappings: 64,
        }
    }
}

impl HostConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_ram_pages(mut self, pages: usize) -> Self {
        self.ram_pages = pages;
        self
    }

    #[must_use]
    pub const fn with_gtt_entries(mut self, entries: usize) -> Self {
        self.gtt_entries = entries;
        self
    }

    #[must_use]
    pub const fn with_max_mappings(mut self, mappings: usize) -> Self {
        self.max_mappings = mappings;
        self
    }
}

#[derive(Debug)]
pub struct HostPlatform {
    ram: OwnedFd,
    config: HostConfig,
    // true = frame handed out
    frames: Vec<bool>,
    free_frames: usize,
    // Aperture page index -> physical page
    gtt: BTreeMap<u64, PhysAddr>,
    // CPU address -> page count
    mappings: HashMap<usize, usize>,
    flush_calls: usize,
}

impl HostPlatform {
    /// Creates the backing `memfd` and sizes it to `config.ram_pages`.
    ///
    /// # Errors
    /// Returns an I/O error if the memfd cannot be created or resized.
    pub fn open(config: HostConfig) -> GmmResult<Self> {
        let fd = unsafe { libc::memfd_create(c"gmm-host-ram".as_ptr(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let ram = unsafe { OwnedFd::from_raw_fd(fd) };

        let len = config.ram_pages as u64 * PAGE_SIZE;
        if unsafe { libc::ftruncate(ram.as_raw_fd(), len as libc::off_t) } < 0 {
            return Err(io::Error::last_os_error().into());
        }

        log::info!(
            "host platform: {} KiB RAM, {} GTT entries, {} mapping slots",
            len / 1024,
            config.gtt_entries,
            config.max_mappings
        );

        Ok(Self {
            ram,
            config,
            frames: vec![false; config.ram_pages],
            free_frames: config.ram_pages,
            gtt: BTreeMap::new(),
            mappings: HashMap::new(),
            flush_calls: 0,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &HostConfig {
        &self.config
    }

    #[must_use]
    pub const fn free_page_count(&self) -> usize {
        self.free_frames
    }

    #[must_use]
    pub fn gtt_entry(&self, offset: u64) -> Option<PhysAddr> {
        self.gtt.get(&(offset / PAGE_SIZE)).copied()
    }

    #[must_use]
    pub fn gtt_entry_count(&self) -> usize {
        self.gtt.len()
    }

    #[must_use]
    pub fn live_mappings(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub const fn flush_calls(&self) -> usize {
        self.flush_calls
    }

    /// Reads host RAM directly, bypassing any CPU mapping.
    ///
    /// # Errors
    /// Fails if the range is outside host RAM or the read is short.
    pub fn read_phys(&self, addr: PhysAddr, buf: &mut [u8]) -> GmmResult<()> {
        let off = self.ram_offset(addr, buf.len())?;
        let ret = unsafe {
            libc::pread(
                self.ram.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                off as libc::off_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if ret as usize != buf.len() {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(())
    }

    /// Writes host RAM directly, bypassing any CPU mapping.
    ///
    /// # Errors
    /// Fails if the range is outside host RAM or the write is short.
    pub fn write_phys(&mut self, addr: PhysAddr, buf: &[u8]) -> GmmResult<()> {
        let off = self.ram_offset(addr, buf.len())?;
        let ret = unsafe {
            libc::pwrite(
                self.ram.as_raw_fd(),
                buf.as_ptr().cast(),
                buf.len(),
                off as libc::off_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error().into());
        }
        if ret as usize != buf.len() {
            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
        }
        Ok(())
    }

    fn ram_offset(&self, addr: PhysAddr, len: usize) -> GmmResult<u64> {
        let ram_len = self.config.ram_pages as u64 * PAGE_SIZE;
        let off = addr
            .as_u64()
            .checked_sub(HOST_RAM_BASE)
            .ok_or(GmmError::InvalidArgument("address below host RAM"))?;
        if off.checked_add(len as u64).is_none_or(|end| end > ram_len) {
            return Err(GmmError::InvalidArgument("address beyond host RAM"));
        }
        Ok(off)
    }

    fn frame_of(&self, addr: PhysAddr) -> Option<usize> {
        let off = addr.as_u64().checked_sub(HOST_RAM_BASE)?;
        if off % PAGE_SIZE != 0 {
            return None;
        }
        let frame = (off / PAGE_SIZE) as usize;
        (frame < self.frames.len()).then_some(frame)
    }

    const fn frame_addr(frame: usize) -> PhysAddr {
        PhysAddr(HOST_RAM_BASE + frame as u64 * PAGE_SIZE)
    }

    fn find_free_run(&self, count: usize) -> Option<usize> {
        let mut run_start = 0;
        let mut run_len = 0;

        for (frame, &used) in self.frames.iter().enumerate() {
            if used {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = frame;
            }
            run_len += 1;
            if run_len == count {
                return Some(run_start);
            }
        }
        None
    }
}

impl PageAllocator for HostPlatform {
    fn allocate_pages(&mut self, count: usize, contiguous: bool) -> GmmResult<PageList> {
        if count == 0 {
            return Err(GmmError::InvalidArgument("zero-page allocation"));
        }
        if count > self.free_frames {
            return Err(GmmError::OutOfMemory);
        }

        let frames: Vec<usize> = if contiguous {
            let start = self.find_free_run(count).ok_or(GmmError::OutOfMemory)?;
            (start..start + count).collect()
        } else {
            self.frames
                .iter()
                .enumerate()
                .filter(|&(_, &used)| !used)
                .map(|(frame, _)| frame)
                .take(count)
                .collect()
        };

        for &frame in &frames {
            self.frames[frame] = true;
        }
        self.free_frames -= frames.len();

        let pages = frames.into_iter().map(Self::frame_addr).collect();
        Ok(PageList::new(pages, contiguous))
    }

    fn free_pages(&mut self, pages: PageList) {
        for &page in pages.as_slice() {
            match self.frame_of(page) {
                Some(frame) if self.frames[frame] => {
                    self.frames[frame] = false;
                    self.free_frames += 1;
                }
                _ => log::warn!("host platform: freeing unowned page {page:?}"),
            }
        }
    }

    fn flush_all(&mut self) -> bool {
        // Nothing else holds host RAM, so there is never anything to evict.
        self.flush_calls += 1;
        false
    }
}

impl GttWriter for HostPlatform {
    fn gtt_insert(&mut self, pages: &[PhysAddr], offset: u64) -> GmmResult<()> {
        if offset % PAGE_SIZE != 0 {
            return Err(GmmError::InvalidArgument("unaligned GTT offset"));
        }
        let first = offset / PAGE_SIZE;
        if first + pages.len() as u64 > self.config.gtt_entries as u64 {
            return Err(GmmError::InvalidArgument("GTT range outside aperture"));
        }

        for (i, &page) in pages.iter().enumerate() {
            self.gtt.insert(first + i as u64, page);
        }
        Ok(())
    }

    fn gtt_remove(&mut self, pages: &[PhysAddr], offset: u64) {
        let first = offset / PAGE_SIZE;
        for i in 0..pages.len() as u64 {
            self.gtt.remove(&(first + i));
        }
    }
}

impl CpuMapper for HostPlatform {
    fn map_pages(&mut self, pages: &[PhysAddr]) -> GmmResult<NonNull<u8>> {
        if pages.is_empty() {
            return Err(GmmError::InvalidArgument("empty page array"));
        }
        if self.mappings.len() >= self.config.max_mappings {
            return Err(GmmError::OutOfMemory);
        }

        let frames = pages
            .iter()
            .map(|&p| self.frame_of(p))
            .collect::<Option<Vec<_>>>()
            .ok_or(GmmError::InvalidArgument("page outside host RAM"))?;

        let page_len = PAGE_SIZE as usize;
        let len = frames.len() * page_len;

        // Reserve a window, then replace it page by page.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }

        for (i, &frame) in frames.iter().enumerate() {
            let ret = unsafe {
                libc::mmap(
                    base.cast::<u8>().add(i * page_len).cast(),
                    page_len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED | libc::MAP_FIXED,
                    self.ram.as_raw_fd(),
                    (frame * page_len) as libc::off_t,
                )
            };

            if ret == libc::MAP_FAILED {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::munmap(base, len);
                }
                return Err(err.into());
            }
        }

        self.mappings.insert(base as usize, frames.len());
        NonNull::new(base.cast::<u8>()).ok_or(GmmError::OutOfMemory)
    }

    fn unmap_pages(&mut self, addr: NonNull<u8>, page_count: usize) {
        match self.mappings.remove(&(addr.as_ptr() as usize)) {
            Some(count) => {
                if count != page_count {
                    log::warn!(
                        "host platform: unmap of {page_count} pages at {addr:p}, mapped {count}"
                    );
                }
                unsafe {
                    libc::munmap(addr.as_ptr().cast(), count * PAGE_SIZE as usize);
                }
            }
            None => log::warn!("host platform: unmap of unknown mapping {addr:p}"),
        }
    }
}

impl Drop for HostPlatform {
    fn drop(&mut self) {
        for (&addr, &count) in &self.mappings {
            unsafe {
                libc::munmap(addr as *mut libc::c_void, count * PAGE_SIZE as usize);
            }
        }
    }
}
