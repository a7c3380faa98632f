//! Non-pixel allocations and their placement policies.

use crate::error::{GmmError, GmmResult};
use crate::hal::PAGE_SIZE;
use crate::utils::checked_align_up;

/// Granularity the CPU mmap path expects for ring and DMA buffers.
pub const MMAP_ALIGN: u64 = 64 * 1024;
/// Logical context images must start on this boundary.
pub const CONTEXT_ALIGN: u64 = 2 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionType {
    /// Hardware status page written back by the command streamer.
    HwStatus = 0,
    Ring = 1,
    Dma = 2,
    /// Logical context image.
    Context = 3,
    /// Overlay register page, fetched by physical address.
    OverlayRegisters = 4,
}

impl TryFrom<u32> for RegionType {
    type Error = GmmError;

    fn try_from(raw: u32) -> GmmResult<Self> {
        match raw {
            0 => Ok(Self::HwStatus),
            1 => Ok(Self::Ring),
            2 => Ok(Self::Dma),
            3 => Ok(Self::Context),
            4 => Ok(Self::OverlayRegisters),
            _ => Err(GmmError::InvalidArgument("unknown region type")),
        }
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RegionFlags: u32 {
        /// Force physically contiguous backing.
        const CONTIGUOUS = 1 << 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSize {
    /// The region is always exactly this large.
    Fixed(u64),
    /// Requests are raised to at least this size.
    Minimum(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionPolicy {
    pub align: u64,
    pub contiguous: bool,
    pub size: RegionSize,
}

const fn max_align(a: u64, b: u64) -> u64 {
    if a > b { a } else { b }
}

// Indexed by `RegionType` discriminant.
static REGION_POLICIES: [(RegionType, RegionPolicy); 5] = [
    (
        RegionType::HwStatus,
        RegionPolicy {
            align: PAGE_SIZE,
            contiguous: true,
            size: RegionSize::Fixed(PAGE_SIZE),
        },
    ),
    (
        RegionType::Ring,
        RegionPolicy {
            align: MMAP_ALIGN,
            contiguous: false,
            size: RegionSize::Minimum(PAGE_SIZE),
        },
    ),
    (
        RegionType::Dma,
        RegionPolicy {
            align: MMAP_ALIGN,
            contiguous: false,
            size: RegionSize::Minimum(PAGE_SIZE),
        },
    ),
    (
        RegionType::Context,
        RegionPolicy {
            align: max_align(CONTEXT_ALIGN, MMAP_ALIGN),
            contiguous: false,
            size: RegionSize::Minimum(PAGE_SIZE),
        },
    ),
    (
        RegionType::OverlayRegisters,
        RegionPolicy {
            align: PAGE_SIZE,
            contiguous: true,
            size: RegionSize::Fixed(PAGE_SIZE),
        },
    ),
];

impl RegionType {
    #[must_use]
    pub fn policy(self) -> &'static RegionPolicy {
        &REGION_POLICIES[self as usize].1
    }
}

/// A successfully allocated region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub offset: u64,
    pub size: u64,
}

/// Where and how a region request lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegionPlacement {
    pub(crate) size: u64,
    pub(crate) align: u64,
    pub(crate) contiguous: bool,
}

impl RegionPlacement {
    pub(crate) fn resolve(size: u64, region: RegionType, flags: RegionFlags) -> GmmResult<Self> {
        let policy = region.policy();

        let size = match policy.size {
            RegionSize::Fixed(fixed) if size > fixed => {
                return Err(GmmError::InvalidArgument("region larger than its fixed size"));
            }
            RegionSize::Fixed(fixed) => fixed,
            RegionSize::Minimum(min) => size.max(min),
        };
        let size = checked_align_up(size, PAGE_SIZE)
            .ok_or(GmmError::InvalidArgument("region size overflow"))?;

        Ok(Self {
            size,
            align: policy.align,
            contiguous: policy.contiguous || flags.contains(RegionFlags::CONTIGUOUS),
        })
    }
}
