#![allow(dead_code)]

use gmm_rs::hal::{CpuMapper, GttWriter, PAGE_SIZE, PageAllocator, PageList, PhysAddr};
use gmm_rs::{GmmError, GmmResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ptr::NonNull;

pub const MOCK_RAM_BASE: u64 = 0x8000_0000;

/// Recording platform with failure injection.
#[derive(Debug, Default)]
pub struct MockPlatform {
    next_frame: u64,
    /// Pages handed out and not yet returned.
    pub outstanding: BTreeSet<PhysAddr>,
    /// Aperture page index -> page.
    pub gtt: BTreeMap<u64, PhysAddr>,
    /// Fail this many upcoming `allocate_pages` calls.
    pub fail_allocs: usize,
    pub alloc_calls: usize,
    pub flush_calls: usize,
    pub freed: Vec<PhysAddr>,
    /// Zero means unlimited.
    pub max_mappings: usize,
    mappings: HashMap<usize, Box<[u8]>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_mappings(&self) -> usize {
        self.mappings.len()
    }

    pub fn gtt_entry(&self, offset: u64) -> Option<PhysAddr> {
        self.gtt.get(&(offset / PAGE_SIZE)).copied()
    }

    fn take_frame(&mut self) -> PhysAddr {
        let page = PhysAddr(MOCK_RAM_BASE + self.next_frame * PAGE_SIZE);
        self.next_frame += 1;
        page
    }
}

impl PageAllocator for MockPlatform {
    fn allocate_pages(&mut self, count: usize, contiguous: bool) -> GmmResult<PageList> {
        self.alloc_calls += 1;
        if self.fail_allocs > 0 {
            self.fail_allocs -= 1;
            return Err(GmmError::OutOfMemory);
        }

        let mut pages = Vec::with_capacity(count);
        for _ in 0..count {
            pages.push(self.take_frame());
            if !contiguous {
                // Leave a hole so scattered lists are visibly scattered.
                self.take_frame();
            }
        }
        self.outstanding.extend(pages.iter().copied());
        Ok(PageList::new(pages, contiguous))
    }

    fn free_pages(&mut self, pages: PageList) {
        for &page in pages.as_slice() {
            assert!(self.outstanding.remove(&page), "freeing foreign page {page:?}");
            self.freed.push(page);
        }
    }

    fn flush_all(&mut self) -> bool {
        self.flush_calls += 1;
        true
    }
}

impl GttWriter for MockPlatform {
    fn gtt_insert(&mut self, pages: &[PhysAddr], offset: u64) -> GmmResult<()> {
        let first = offset / PAGE_SIZE;
        for (i, &page) in pages.iter().enumerate() {
            let prev = self.gtt.insert(first + i as u64, page);
            assert!(prev.is_none(), "GTT entry 0x{:x} installed twice", offset + i as u64 * PAGE_SIZE);
        }
        Ok(())
    }

    fn gtt_remove(&mut self, pages: &[PhysAddr], offset: u64) {
        let first = offset / PAGE_SIZE;
        for (i, &page) in pages.iter().enumerate() {
            assert_eq!(self.gtt.remove(&(first + i as u64)), Some(page));
        }
    }
}

impl CpuMapper for MockPlatform {
    fn map_pages(&mut self, pages: &[PhysAddr]) -> GmmResult<NonNull<u8>> {
        if self.max_mappings != 0 && self.mappings.len() >= self.max_mappings {
            return Err(GmmError::OutOfMemory);
        }
        let mut buf = vec![0u8; pages.len() * PAGE_SIZE as usize].into_boxed_slice();
        let addr = NonNull::new(buf.as_mut_ptr()).ok_or(GmmError::OutOfMemory)?;
        self.mappings.insert(addr.as_ptr() as usize, buf);
        Ok(addr)
    }

    fn unmap_pages(&mut self, addr: NonNull<u8>, page_count: usize) {
        let buf = self
            .mappings
            .remove(&(addr.as_ptr() as usize))
            .expect("unmap of unknown mapping");
        assert_eq!(buf.len(), page_count * PAGE_SIZE as usize);
    }
}
