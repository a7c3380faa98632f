//! Surface flags, allocation kinds and pitch/size geometry.

use crate::error::{GmmError, GmmResult};
use crate::hal::PAGE_SIZE;
use crate::hal::format::{FormatClass, PixelFormat};
use crate::utils::{align_up, checked_align_up};

/// Alignment for anything the display engine scans out, and for imports.
pub const DISPLAY_ALIGN: u64 = 256 * 1024;
/// Row pitch granularity.
pub const PITCH_ALIGN: u64 = 64;

bitflags::bitflags! {
    /// Intended uses of a surface.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SurfaceFlags: u32 {
        const DISPLAY = 1 << 0;
        const CURSOR = 1 << 1;
        const OVERLAY = 1 << 2;
        const RENDER = 1 << 3;
        const TEXTURE = 1 << 4;
        const VIDEO = 1 << 5;
    }
}

impl SurfaceFlags {
    /// Scanned out by a display plane, so it needs [`DISPLAY_ALIGN`].
    #[must_use]
    pub const fn is_display_capable(self) -> bool {
        self.intersects(Self::DISPLAY.union(Self::CURSOR).union(Self::OVERLAY))
    }

    /// Cursor and overlay planes fetch by physical address.
    #[must_use]
    pub const fn needs_contiguous(self) -> bool {
        self.intersects(Self::CURSOR.union(Self::OVERLAY))
    }
}

/// Backing policy requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocKind {
    /// Contiguity decided by the surface flags.
    #[default]
    Normal,
    /// Always physically contiguous.
    Contiguous,
}

impl TryFrom<u32> for AllocKind {
    type Error = GmmError;

    fn try_from(raw: u32) -> GmmResult<Self> {
        match raw {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Contiguous),
            _ => Err(GmmError::InvalidArgument("unknown allocation kind")),
        }
    }
}

/// A successfully allocated surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub offset: u64,
    pub pitch: u32,
    /// `pitch * rows` rounded up to a whole page, never down.
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SurfaceGeometry {
    pub(crate) pitch: u32,
    pub(crate) size: u64,
}

impl SurfaceGeometry {
    pub(crate) fn compute(
        format: PixelFormat,
        width: u32,
        height: u32,
        pitch_hint: u32,
    ) -> GmmResult<Self> {
        let width = u64::from(width.max(1));
        let height = u64::from(height.max(1));

        let row_bytes = u64::from(format.bits_per_pixel()) * width / 8;
        let pitch = align_up(row_bytes, PITCH_ALIGN).max(u64::from(pitch_hint));
        let pitch = u32::try_from(pitch).map_err(|_| GmmError::InvalidArgument("pitch overflow"))?;

        let rows = match format.class() {
            FormatClass::YuvPlanar => height + height / 2,
            FormatClass::Rgb | FormatClass::YuvPacked => height,
        };

        let size = u64::from(pitch)
            .checked_mul(rows)
            .and_then(|bytes| checked_align_up(bytes, PAGE_SIZE))
            .ok_or(GmmError::InvalidArgument("surface size overflow"))?;

        Ok(Self { pitch, size })
    }
}
