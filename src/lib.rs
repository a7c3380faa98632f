//! Graphics memory management for GTT-based integrated GPUs.
//!
//! [`gmm`] maps pixel surfaces, command regions, imported page arrays and
//! contiguous capture buffers into the GPU aperture. [`hal`] holds the
//! collaborator traits it drives and a host-memory platform.

pub mod error;
pub mod gmm;
pub mod hal;
pub mod utils;

pub use error::{GmmError, GmmResult};
pub use gmm::{GmmConfig, GraphicsMemoryManager};
