mod common;

use common::MockPlatform;
use gmm_rs::gmm::{
    AllocKind, ChunkKind, ChunkState, GmmStats, RegionFlags, RegionType, SurfaceFlags,
};
use gmm_rs::hal::format::PixelFormat;
use gmm_rs::hal::{PAGE_SIZE, PhysAddr};
use gmm_rs::{GmmConfig, GmmError, GraphicsMemoryManager};
use std::sync::Arc;

const DISPLAY_ALIGN: u64 = 256 * 1024;

fn manager() -> GraphicsMemoryManager<MockPlatform> {
    GraphicsMemoryManager::new(MockPlatform::new(), GmmConfig::default()).unwrap()
}

fn foreign_pages(base: u64, count: u64) -> Arc<[PhysAddr]> {
    (0..count).map(|i| PhysAddr(base + i * PAGE_SIZE)).collect()
}

/// 64x64 ARGB: 256-byte pitch, 16 KiB.
fn small_display(gmm: &mut GraphicsMemoryManager<MockPlatform>) -> u64 {
    gmm.alloc_surface(PixelFormat::Argb8888, 64, 64, 0, AllocKind::Normal, SurfaceFlags::DISPLAY)
        .unwrap()
        .offset
}

// ===============================================================================================
// Surfaces
// ===============================================================================================

#[test]
fn surface_offsets_follow_display_alignment() {
    let mut gmm = manager();

    let texture = gmm
        .alloc_surface(PixelFormat::Rgb565, 10, 10, 0, AllocKind::Normal, SurfaceFlags::TEXTURE)
        .unwrap();
    assert_eq!(texture.offset, 0);
    assert_eq!(texture.size, PAGE_SIZE);

    let scanout = gmm
        .alloc_surface(PixelFormat::Argb8888, 100, 37, 0, AllocKind::Normal, SurfaceFlags::DISPLAY)
        .unwrap();
    assert_eq!(scanout.offset % DISPLAY_ALIGN, 0);
    assert_eq!(scanout.offset, DISPLAY_ALIGN);
    assert_eq!(scanout.pitch, 448);
    assert_eq!(scanout.size, 20480);

    let render = gmm
        .alloc_surface(PixelFormat::Xrgb8888, 16, 16, 0, AllocKind::Normal, SurfaceFlags::RENDER)
        .unwrap();
    assert_eq!(render.offset % PAGE_SIZE, 0);
    assert_eq!(render.offset, DISPLAY_ALIGN + 20480);
}

#[test]
fn planar_video_surface_includes_chroma() {
    let mut gmm = manager();
    let s = gmm
        .alloc_surface(PixelFormat::Nv12, 720, 480, 0, AllocKind::Normal, SurfaceFlags::VIDEO)
        .unwrap();
    assert_eq!(s.pitch, 768);
    assert_eq!(s.size, 768 * 720);
}

#[test]
fn overflowing_surface_geometry_is_invalid() {
    let mut gmm = manager();
    let err = gmm.alloc_surface(
        PixelFormat::Nv12,
        16,
        u32::MAX,
        u32::MAX,
        AllocKind::Normal,
        SurfaceFlags::VIDEO,
    );
    assert!(matches!(err, Err(GmmError::InvalidArgument(_))));
    assert_eq!(gmm.chunk_count(), 0);
    assert_eq!(gmm.platform().alloc_calls, 0);
}

#[test]
fn cursor_surfaces_get_contiguous_pages() {
    let mut gmm = manager();
    let cursor = gmm
        .alloc_surface(PixelFormat::Argb8888, 64, 64, 0, AllocKind::Normal, SurfaceFlags::CURSOR)
        .unwrap();
    assert_eq!(cursor.offset % DISPLAY_ALIGN, 0);

    let pages = gmm.get_page_list(cursor.offset).unwrap().to_vec();
    assert_eq!(pages.len(), 4);
    for pair in pages.windows(2) {
        assert_eq!(pair[1].as_u64() - pair[0].as_u64(), PAGE_SIZE);
    }
    assert_eq!(gmm.virt_to_phys(cursor.offset).unwrap(), pages[0]);
    assert_eq!(gmm.enumerate_surfaces()[0].kind, ChunkKind::Contiguous);
    assert_eq!(gmm.enumerate_surfaces()[0].phys, Some(pages[0]));

    let forced = gmm
        .alloc_surface(PixelFormat::Rgb565, 8, 8, 0, AllocKind::Contiguous, SurfaceFlags::RENDER)
        .unwrap();
    assert_eq!(
        gmm.enumerate_surfaces()[1].kind,
        ChunkKind::Contiguous,
        "contiguous alloc kind at 0x{:x}",
        forced.offset
    );
}

#[test]
fn freed_surface_is_reused_first_fit_without_shrinking() {
    let mut gmm = manager();
    let a = small_display(&mut gmm);
    let b = small_display(&mut gmm);
    assert_eq!(b, DISPLAY_ALIGN);

    gmm.free(b).unwrap();
    let again = gmm
        .alloc_surface(PixelFormat::Argb8888, 32, 32, 0, AllocKind::Normal, SurfaceFlags::DISPLAY)
        .unwrap();
    assert_eq!(again.offset, b);
    assert_eq!(again.size, PAGE_SIZE);
    assert_eq!(gmm.chunk_count(), 2);
    assert_eq!(gmm.enumerate_surfaces()[1].size, 16384);

    // With both free, the earlier chunk wins.
    gmm.free(a).unwrap();
    gmm.free(b).unwrap();
    assert_eq!(small_display(&mut gmm), a);
}

#[test]
fn reuse_requires_matching_kind_and_alignment() {
    let mut gmm = manager();
    let texture = gmm
        .alloc_surface(PixelFormat::Argb8888, 64, 64, 0, AllocKind::Normal, SurfaceFlags::TEXTURE)
        .unwrap();
    let texture2 = gmm
        .alloc_surface(PixelFormat::Argb8888, 64, 64, 0, AllocKind::Normal, SurfaceFlags::TEXTURE)
        .unwrap();
    assert_eq!(texture2.offset, 16384);
    gmm.free(texture2.offset).unwrap();

    // Free scattered chunk at a 4 KiB boundary: useless for scanout and cursors.
    let scanout = small_display(&mut gmm);
    assert_eq!(scanout % DISPLAY_ALIGN, 0);
    assert_ne!(scanout, texture2.offset);

    gmm.free(texture.offset).unwrap();
    let cursor = gmm
        .alloc_surface(PixelFormat::Argb8888, 16, 16, 0, AllocKind::Normal, SurfaceFlags::CURSOR)
        .unwrap();
    assert_ne!(cursor.offset, texture.offset);
    assert_eq!(gmm.chunk_count(), 4);
}

#[test]
fn double_free_is_reported_and_harmless() {
    let mut gmm = manager();
    let offset = small_display(&mut gmm);

    gmm.free(offset).unwrap();
    assert!(matches!(gmm.free(offset), Err(GmmError::DoubleFree(o)) if o == offset));
    assert_eq!(gmm.chunk_count(), 1);
    assert_eq!(gmm.enumerate_surfaces()[0].state, ChunkState::Free);
}

#[test]
fn free_of_unknown_offset_is_not_found() {
    let mut gmm = manager();
    small_display(&mut gmm);

    assert!(matches!(gmm.free(0x1234_5000), Err(GmmError::NotFound(_))));
    assert_eq!(gmm.chunk_count(), 1);
}

#[test]
fn flush_is_tried_once_under_memory_pressure() {
    let mut gmm = manager();

    gmm.platform_mut().fail_allocs = 1;
    small_display(&mut gmm);
    assert_eq!(gmm.platform().flush_calls, 1);
    assert_eq!(gmm.platform().alloc_calls, 2);

    gmm.platform_mut().fail_allocs = 2;
    let err = gmm
        .alloc_surface(PixelFormat::Argb8888, 8, 8, 0, AllocKind::Normal, SurfaceFlags::RENDER)
        .unwrap_err();
    assert!(matches!(err, GmmError::OutOfMemory));
    assert_eq!(gmm.platform().flush_calls, 2);
    assert_eq!(gmm.platform().alloc_calls, 4);
    assert_eq!(gmm.chunk_count(), 1);
}

#[test]
fn flush_can_be_disabled() {
    let config = GmmConfig::new().with_flush_on_pressure(false);
    let mut gmm = GraphicsMemoryManager::new(MockPlatform::new(), config).unwrap();

    gmm.platform_mut().fail_allocs = 1;
    let err = gmm
        .alloc_surface(PixelFormat::Argb8888, 8, 8, 0, AllocKind::Normal, SurfaceFlags::RENDER)
        .unwrap_err();
    assert!(matches!(err, GmmError::OutOfMemory));
    assert_eq!(gmm.platform().flush_calls, 0);
}

#[test]
fn aperture_exhaustion_fails_before_taking_pages() {
    let config = GmmConfig::new().with_aperture_size(2 * DISPLAY_ALIGN);
    let mut gmm = GraphicsMemoryManager::new(MockPlatform::new(), config).unwrap();

    small_display(&mut gmm);
    small_display(&mut gmm);
    let calls = gmm.platform().alloc_calls;

    let err = gmm
        .alloc_surface(PixelFormat::Argb8888, 64, 64, 0, AllocKind::Normal, SurfaceFlags::DISPLAY)
        .unwrap_err();
    assert!(matches!(err, GmmError::OutOfMemory));
    assert_eq!(gmm.platform().alloc_calls, calls);
}

#[test]
fn invalid_aperture_configs_are_rejected() {
    let empty = GmmConfig::new().with_aperture_size(0);
    assert!(matches!(
        GraphicsMemoryManager::new(MockPlatform::new(), empty),
        Err(GmmError::InvalidArgument(_))
    ));

    let unaligned = GmmConfig::new().with_aperture_base(0x800);
    assert!(matches!(
        GraphicsMemoryManager::new(MockPlatform::new(), unaligned),
        Err(GmmError::InvalidArgument(_))
    ));
}

#[test]
fn aperture_base_offsets_all_allocations() {
    let config = GmmConfig::new().with_aperture_base(0x1000_0000);
    let mut gmm = GraphicsMemoryManager::new(MockPlatform::new(), config).unwrap();
    assert_eq!(small_display(&mut gmm), 0x1000_0000);
    assert_eq!(gmm.stats().bytes_reserved, 16384);
}

// ===============================================================================================
// Regions
// ===============================================================================================

#[test]
fn hw_status_region_is_one_page() {
    let mut gmm = manager();
    let region = gmm
        .alloc_region(4096, RegionType::HwStatus, RegionFlags::empty())
        .unwrap();
    assert_eq!(region.size, 4096);
    assert_eq!(region.offset % 4096, 0);
    assert_eq!(gmm.get_page_list(region.offset).unwrap().len(), 1);
    assert_eq!(gmm.enumerate_surfaces()[0].kind, ChunkKind::Contiguous);
}

#[test]
fn ring_and_context_regions_use_mmap_alignment() {
    let mut gmm = manager();
    gmm.alloc_region(4096, RegionType::HwStatus, RegionFlags::empty())
        .unwrap();

    let ring = gmm
        .alloc_region(0, RegionType::Ring, RegionFlags::empty())
        .unwrap();
    assert_eq!(ring.size, PAGE_SIZE);
    assert_eq!(ring.offset, 64 * 1024);

    let ctx = gmm
        .alloc_region(5000, RegionType::Context, RegionFlags::empty())
        .unwrap();
    assert_eq!(ctx.size, 8192);
    assert_eq!(ctx.offset, 128 * 1024);

    assert!(matches!(
        gmm.alloc_region(8192, RegionType::OverlayRegisters, RegionFlags::empty()),
        Err(GmmError::InvalidArgument(_))
    ));
}

#[test]
fn regions_are_released_with_free_and_reused() {
    let mut gmm = manager();
    let ring = gmm
        .alloc_region(16384, RegionType::Ring, RegionFlags::empty())
        .unwrap();
    gmm.free(ring.offset).unwrap();

    let dma = gmm
        .alloc_region(8192, RegionType::Dma, RegionFlags::empty())
        .unwrap();
    assert_eq!(dma.offset, ring.offset);
    assert_eq!(dma.size, 8192);
    assert_eq!(gmm.enumerate_surfaces()[0].size, 16384);
}

// ===============================================================================================
// Queries
// ===============================================================================================

#[test]
fn virt_to_phys_walks_scattered_pages() {
    let mut gmm = manager();
    let s = gmm
        .alloc_surface(PixelFormat::Argb8888, 64, 48, 0, AllocKind::Normal, SurfaceFlags::TEXTURE)
        .unwrap();
    let pages = gmm.get_page_list(s.offset).unwrap().to_vec();
    assert_eq!(pages.len(), 3);
    assert_ne!(pages[1].as_u64() - pages[0].as_u64(), PAGE_SIZE);

    assert_eq!(
        gmm.virt_to_phys(s.offset + PAGE_SIZE + 0x10).unwrap(),
        pages[1].add(0x10)
    );
    assert!(matches!(
        gmm.virt_to_phys(s.offset + s.size),
        Err(GmmError::NotFound(_))
    ));
    assert!(matches!(gmm.get_page_list(0x40_0000), Err(GmmError::NotFound(_))));

    // A freed surface stays bound for reuse and keeps translating.
    gmm.free(s.offset).unwrap();
    assert_eq!(gmm.virt_to_phys(s.offset).unwrap(), pages[0]);
}

#[test]
fn stats_track_usage() {
    let mut gmm = manager();
    let a = small_display(&mut gmm);
    small_display(&mut gmm);
    gmm.import_pages(foreign_pages(0x9000_0000, 2), 2).unwrap();
    gmm.free(a).unwrap();
    gmm.map(DISPLAY_ALIGN).unwrap();

    assert_eq!(
        gmm.stats(),
        GmmStats {
            chunks: 3,
            chunks_in_use: 2,
            bytes_reserved: 2 * DISPLAY_ALIGN + 8192,
            bytes_in_use: 16384 + 8192,
            live_mappings: 1,
            imports_in_use: 1,
        }
    );
}

// ===============================================================================================
// Mapping Cache
// ===============================================================================================

#[test]
fn mappings_are_reference_counted() {
    let mut gmm = manager();
    let offset = small_display(&mut gmm);

    let first = gmm.map(offset).unwrap();
    let second = gmm.map(offset).unwrap();
    assert_eq!(first, second);
    assert_eq!(gmm.enumerate_surfaces()[0].ref_count, 2);
    assert_eq!(gmm.platform().live_mappings(), 1);

    gmm.unmap(first).unwrap();
    assert_eq!(gmm.platform().live_mappings(), 1);
    gmm.unmap(first).unwrap();
    assert_eq!(gmm.platform().live_mappings(), 0);

    assert!(matches!(gmm.unmap(first), Err(GmmError::NotFound(_))));
    assert_eq!(gmm.enumerate_surfaces()[0].ref_count, 0);

    // The chunk survives and can be mapped again.
    gmm.map(offset).unwrap();
    assert_eq!(gmm.enumerate_surfaces()[0].ref_count, 1);
}

#[test]
fn mapping_table_exhaustion_is_reported() {
    let mut gmm = manager();
    gmm.platform_mut().max_mappings = 1;
    let a = small_display(&mut gmm);
    let b = small_display(&mut gmm);

    gmm.map(a).unwrap();
    assert!(matches!(gmm.map(b), Err(GmmError::OutOfMemory)));
    assert_eq!(gmm.enumerate_surfaces()[1].ref_count, 0);
    // Existing mappings keep working.
    gmm.map(a).unwrap();
    assert_eq!(gmm.enumerate_surfaces()[0].ref_count, 2);
}

#[test]
fn map_of_unknown_offset_fails() {
    let mut gmm = manager();
    assert!(matches!(gmm.map(0x5000), Err(GmmError::NotFound(0x5000))));
}

// ===============================================================================================
// Import Adapter
// ===============================================================================================

#[test]
fn released_import_is_reused_at_full_capacity() {
    let mut gmm = manager();
    small_display(&mut gmm);

    let first = gmm.import_pages(foreign_pages(0x9000_0000, 4), 4).unwrap();
    assert_eq!(first % DISPLAY_ALIGN, 0);
    gmm.release_import(first).unwrap();
    assert_eq!(gmm.platform().gtt.len(), 4);

    let second = gmm.import_pages(foreign_pages(0xA000_0000, 2), 2).unwrap();
    assert_eq!(second, first);
    assert_eq!(gmm.enumerate_surfaces()[1].size, 4 * PAGE_SIZE);
    assert_eq!(gmm.platform().gtt_entry(second), Some(PhysAddr(0xA000_0000)));
    assert_eq!(gmm.platform().gtt_entry(second + 2 * PAGE_SIZE), None);

    // Too large for the retained chunk: a new one is appended.
    let third = gmm.import_pages(foreign_pages(0xB000_0000, 8), 8).unwrap();
    assert_ne!(third, first);
    assert_eq!(gmm.chunk_count(), 3);
}

#[test]
fn owned_and_imported_free_pools_stay_apart() {
    let mut gmm = manager();

    let import = gmm.import_pages(foreign_pages(0x9000_0000, 4), 4).unwrap();
    gmm.release_import(import).unwrap();
    let surface = small_display(&mut gmm);
    assert_ne!(surface, import);

    gmm.free(surface).unwrap();
    let import2 = gmm.import_pages(foreign_pages(0x9000_0000, 4), 4).unwrap();
    assert_eq!(import2, import);
    let import3 = gmm.import_pages(foreign_pages(0x9000_0000, 1), 1).unwrap();
    assert_ne!(import3, surface);
}

#[test]
fn import_misuse_is_rejected() {
    let mut gmm = manager();
    let surface = small_display(&mut gmm);
    let import = gmm.import_pages(foreign_pages(0x9000_0000, 2), 2).unwrap();

    assert!(matches!(gmm.free(import), Err(GmmError::ImportMisuse(o)) if o == import));
    assert!(matches!(gmm.release_import(surface), Err(GmmError::ImportMisuse(_))));
    assert!(matches!(gmm.release_import(0x7700_0000), Err(GmmError::ImportMisuse(_))));

    gmm.release_import(import).unwrap();
    assert!(matches!(gmm.release_import(import), Err(GmmError::DoubleFree(_))));
    assert!(matches!(
        gmm.import_pages(foreign_pages(0x9000_0000, 2), 3),
        Err(GmmError::InvalidArgument(_))
    ));
}

#[test]
fn imported_pages_are_borrowed_not_freed() {
    let pages = foreign_pages(0x9000_0000, 2);
    {
        let mut gmm = manager();
        let offset = gmm.import_pages(Arc::clone(&pages), 2).unwrap();
        assert_eq!(Arc::strong_count(&pages), 2);
        gmm.map(offset).unwrap();

        gmm.release_import(offset).unwrap();
        assert_eq!(Arc::strong_count(&pages), 1);
        assert_eq!(gmm.platform().live_mappings(), 0);
        assert!(gmm.platform().freed.is_empty());

        gmm.import_pages(Arc::clone(&pages), 2).unwrap();
    }
    // Dropping the manager shuts it down and lets go of the array.
    assert_eq!(Arc::strong_count(&pages), 1);
}

// ===============================================================================================
// Contiguous Bridge
// ===============================================================================================

#[test]
fn bridge_round_trip_leaves_reusable_chunk() {
    let mut gmm = manager();
    let capture = PhysAddr(0xC000_0000);

    let offset = gmm.map_to_graphics(capture, 4096).unwrap();
    assert_eq!(offset % DISPLAY_ALIGN, 0);
    assert_eq!(gmm.platform().gtt_entry(offset), Some(capture));
    assert_eq!(gmm.virt_to_phys(offset + 0x20).unwrap(), capture.add(0x20));

    gmm.unmap_from_graphics(offset, 4096).unwrap();
    assert!(gmm.platform().gtt.is_empty());
    assert!(gmm.platform().freed.is_empty());
    assert_eq!(gmm.enumerate_surfaces()[0].kind, ChunkKind::Contiguous);
    assert_eq!(gmm.enumerate_surfaces()[0].state, ChunkState::Free);
    assert_eq!(gmm.enumerate_surfaces()[0].phys, None);

    let again = gmm.map_to_graphics(PhysAddr(0xD000_0000), 2048).unwrap();
    assert_eq!(again, offset);
    assert_eq!(gmm.chunk_count(), 1);
}

#[test]
fn bridge_lookup_misses_are_not_found() {
    let mut gmm = manager();
    let offset = gmm.map_to_graphics(PhysAddr(0xC000_0000), 4096).unwrap();
    let surface = small_display(&mut gmm);

    assert!(matches!(
        gmm.unmap_from_graphics(offset, 8192),
        Err(GmmError::NotFound(_))
    ));
    assert!(matches!(
        gmm.unmap_from_graphics(surface, 4096),
        Err(GmmError::NotFound(_))
    ));
    assert!(matches!(
        gmm.unmap_from_graphics(0x4200_0000, 4096),
        Err(GmmError::NotFound(_))
    ));
    assert!(matches!(gmm.free(offset), Err(GmmError::ImportMisuse(_))));

    gmm.unmap_from_graphics(offset, 4096).unwrap();
    assert!(matches!(
        gmm.unmap_from_graphics(offset, 4096),
        Err(GmmError::NotFound(_))
    ));
    assert!(matches!(
        gmm.map_to_graphics(PhysAddr(0xC000_0100), 4096),
        Err(GmmError::InvalidArgument(_))
    ));
}

#[test]
fn bridge_rejects_ranges_past_the_address_space() {
    let mut gmm = manager();
    assert!(matches!(
        gmm.map_to_graphics(PhysAddr(0xFFFF_FFFF_FFFF_F000), 8192),
        Err(GmmError::InvalidArgument(_))
    ));
    assert!(matches!(
        gmm.map_to_graphics(PhysAddr(0xFFFF_FFFF_FFFF_E000), u64::MAX - 0x1000),
        Err(GmmError::InvalidArgument(_))
    ));
    assert_eq!(gmm.chunk_count(), 0);
    assert!(gmm.platform().gtt.is_empty());
}

#[test]
fn bridge_and_cursor_share_the_contiguous_pool() {
    let mut gmm = manager();
    let cursor = gmm
        .alloc_surface(PixelFormat::Argb8888, 64, 64, 0, AllocKind::Normal, SurfaceFlags::CURSOR)
        .unwrap();
    gmm.free(cursor.offset).unwrap();

    // The bridge takes over the freed cursor chunk and returns its pages.
    let capture = PhysAddr(0xC000_0000);
    let offset = gmm.map_to_graphics(capture, 8192).unwrap();
    assert_eq!(offset, cursor.offset);
    assert_eq!(gmm.platform().freed.len(), 4);
    assert!(gmm.platform().outstanding.is_empty());
    assert_eq!(gmm.platform().gtt.len(), 2);

    // And a later cursor gets the chunk back with fresh pages.
    gmm.unmap_from_graphics(offset, 8192).unwrap();
    let cursor2 = gmm
        .alloc_surface(PixelFormat::Argb8888, 64, 64, 0, AllocKind::Normal, SurfaceFlags::CURSOR)
        .unwrap();
    assert_eq!(cursor2.offset, cursor.offset);
    assert_eq!(gmm.platform().outstanding.len(), 4);
    assert_eq!(gmm.platform().gtt.len(), 4);
    assert_ne!(gmm.virt_to_phys(cursor2.offset).unwrap(), capture);
}

// ===============================================================================================
// Shutdown
// ===============================================================================================

#[test]
fn shutdown_releases_only_owned_memory() {
    let mut gmm = manager();
    let surface = small_display(&mut gmm);
    gmm.alloc_surface(PixelFormat::Argb8888, 64, 64, 0, AllocKind::Normal, SurfaceFlags::CURSOR)
        .unwrap();
    gmm.alloc_region(4096, RegionType::HwStatus, RegionFlags::empty())
        .unwrap();
    let freed_region = gmm
        .alloc_region(8192, RegionType::Ring, RegionFlags::empty())
        .unwrap();
    gmm.free(freed_region.offset).unwrap();

    let imported = foreign_pages(0x9000_0000, 2);
    gmm.import_pages(Arc::clone(&imported), 2).unwrap();
    let capture = PhysAddr(0xC000_0000);
    gmm.map_to_graphics(capture, 4096).unwrap();
    gmm.map(surface).unwrap();

    gmm.shutdown();

    let platform = gmm.platform();
    assert!(platform.outstanding.is_empty());
    assert!(platform.gtt.is_empty());
    assert_eq!(platform.live_mappings(), 0);
    assert_eq!(platform.freed.len(), 4 + 4 + 1 + 2);
    assert!(!platform.freed.contains(&capture));
    assert!(imported.iter().all(|p| !platform.freed.contains(p)));
    assert_eq!(gmm.chunk_count(), 0);
    assert_eq!(Arc::strong_count(&imported), 1);
}
