//! The Graphics Memory Manager: chunk-based allocation of the GPU aperture.
//!
//! ```text
//!  alloc_surface / alloc_region ──► core allocator ──┐
//!  import_pages / release_import ─► import adapter ──┼──► chunk registry
//!  map_to_graphics / unmap_from ──► contiguous bridge┘        │
//!  map / unmap ───────────────────► mapping cache ────────────┘
//! ```
//!
//! All paths share one append-only registry. New chunks are bump-allocated
//! after the last one; freed chunks are reused first-fit in creation order.

mod bridge;
mod chunk;
pub mod config;
mod import;
pub mod manager;
mod mapping;
pub mod region;
pub mod surface;

pub use chunk::{ChunkKind, ChunkState};
pub use config::GmmConfig;
pub use manager::{ChunkInfo, GmmStats, GraphicsMemoryManager};
pub use region::{Region, RegionFlags, RegionType};
pub use surface::{AllocKind, Surface, SurfaceFlags};
