use gmm_rs::gmm::{AllocKind, RegionFlags, RegionType, SurfaceFlags};
use gmm_rs::hal::format::PixelFormat;
use gmm_rs::hal::host::{HostConfig, HostPlatform};
use gmm_rs::hal::{PAGE_SIZE, PageAllocator};
use gmm_rs::{GmmConfig, GraphicsMemoryManager};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("============================================================");
    println!("             GMM Host Platform - Aperture Report            ");
    println!("============================================================");

    // 1. Bring up the host platform and the manager
    println!("[+] Opening host platform...");
    let host = HostPlatform::open(HostConfig::new().with_ram_pages(2048))?;
    let mut gmm = GraphicsMemoryManager::new(host, GmmConfig::default())?;

    // 2. Display pipeline surfaces
    println!("[+] Allocating display surfaces...");
    let fb = gmm.alloc_surface(
        PixelFormat::Xrgb8888,
        640,
        480,
        0,
        AllocKind::Normal,
        SurfaceFlags::DISPLAY,
    )?;
    println!(
        "    Framebuffer: offset 0x{:08x} pitch {} size 0x{:x}",
        fb.offset, fb.pitch, fb.size
    );

    let cursor = gmm.alloc_surface(
        PixelFormat::Argb8888,
        64,
        64,
        0,
        AllocKind::Normal,
        SurfaceFlags::CURSOR,
    )?;
    println!(
        "    Cursor:      offset 0x{:08x} phys {:?}",
        cursor.offset,
        gmm.virt_to_phys(cursor.offset)?
    );

    // 3. Engine regions
    println!("[+] Allocating engine regions...");
    let hws = gmm.alloc_region(PAGE_SIZE, RegionType::HwStatus, RegionFlags::empty())?;
    let ring = gmm.alloc_region(32 * 1024, RegionType::Ring, RegionFlags::empty())?;
    println!("    HW status:   offset 0x{:08x}", hws.offset);
    println!("    Ring:        offset 0x{:08x} size 0x{:x}", ring.offset, ring.size);

    // 4. Import and bridge
    println!("[+] Importing foreign pages and bridging a capture buffer...");
    let foreign = gmm.platform_mut().allocate_pages(8, false)?;
    let import = gmm.import_pages(foreign.as_slice().into(), foreign.len())?;
    println!("    Import:      offset 0x{import:08x} ({} pages)", foreign.len());

    let capture = gmm.platform_mut().allocate_pages(16, true)?;
    if let Some(base) = capture.first_physical_page() {
        let bridged = gmm.map_to_graphics(base, 16 * PAGE_SIZE)?;
        println!("    Capture:     offset 0x{bridged:08x} -> {base:?}");
    }

    // 5. Report
    println!("[+] Chunk registry:");
    for (i, chunk) in gmm.enumerate_surfaces().iter().enumerate() {
        println!(
            "    #{i:<2} 0x{:08x} +0x{:06x} {:<10} {:?} refs={}",
            chunk.offset,
            chunk.size,
            format!("{:?}", chunk.kind),
            chunk.state,
            chunk.ref_count
        );
    }
    let stats = gmm.stats();
    println!(
        "    {} chunks, {} in use, 0x{:x} bytes reserved, 0x{:x} bytes in use",
        stats.chunks, stats.chunks_in_use, stats.bytes_reserved, stats.bytes_in_use
    );

    // 6. Tear down; borrowed pages go back to their owner afterwards
    gmm.shutdown();
    gmm.platform_mut().free_pages(foreign);
    gmm.platform_mut().free_pages(capture);
    println!(
        "[+] Shutdown complete, {} host pages free",
        gmm.platform().free_page_count()
    );

    Ok(())
}
