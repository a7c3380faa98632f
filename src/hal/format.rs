//! Pixel formats understood by the surface allocator.

const fn fourcc_code(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

pub const DRM_FORMAT_C8: u32 = fourcc_code(b'C', b'8', b' ', b' ');
pub const DRM_FORMAT_RGB565: u32 = fourcc_code(b'R', b'G', b'1', b'6');
pub const DRM_FORMAT_XRGB1555: u32 = fourcc_code(b'X', b'R', b'1', b'5');
pub const DRM_FORMAT_ARGB1555: u32 = fourcc_code(b'A', b'R', b'1', b'5');
pub const DRM_FORMAT_XRGB8888: u32 = fourcc_code(b'X', b'R', b'2', b'4');
pub const DRM_FORMAT_ARGB8888: u32 = fourcc_code(b'A', b'R', b'2', b'4');
pub const DRM_FORMAT_XBGR8888: u32 = fourcc_code(b'X', b'B', b'2', b'4');
pub const DRM_FORMAT_ABGR8888: u32 = fourcc_code(b'A', b'B', b'2', b'4');
pub const DRM_FORMAT_ARGB2101010: u32 = fourcc_code(b'A', b'R', b'3', b'0');
pub const DRM_FORMAT_YUYV: u32 = fourcc_code(b'Y', b'U', b'Y', b'V');
pub const DRM_FORMAT_UYVY: u32 = fourcc_code(b'U', b'Y', b'V', b'Y');
pub const DRM_FORMAT_NV12: u32 = fourcc_code(b'N', b'V', b'1', b'2');
pub const DRM_FORMAT_YVU420: u32 = fourcc_code(b'Y', b'V', b'1', b'2');
pub const DRM_FORMAT_YUV420: u32 = fourcc_code(b'Y', b'U', b'1', b'2');

/// Memory layout family of a pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    Rgb,
    /// Full-resolution luma plane followed by half-height chroma.
    YuvPlanar,
    /// Interleaved 4:2:2 samples.
    YuvPacked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    C8,
    Rgb565,
    Xrgb1555,
    Argb1555,
    Xrgb8888,
    Argb8888,
    Xbgr8888,
    Abgr8888,
    Argb2101010,
    Yuyv,
    Uyvy,
    Nv12,
    Yv12,
    I420,
}

impl PixelFormat {
    /// Bits per pixel. For planar YUV this is the luma plane only.
    #[must_use]
    pub const fn bits_per_pixel(self) -> u32 {
        match self {
            Self::C8 | Self::Nv12 | Self::Yv12 | Self::I420 => 8,
            Self::Rgb565 | Self::Xrgb1555 | Self::Argb1555 | Self::Yuyv | Self::Uyvy => 16,
            Self::Xrgb8888 | Self::Argb8888 | Self::Xbgr8888 | Self::Abgr8888 | Self::Argb2101010 => {
                32
            }
        }
    }

    #[must_use]
    pub const fn class(self) -> FormatClass {
        match self {
            Self::Yuyv | Self::Uyvy => FormatClass::YuvPacked,
            Self::Nv12 | Self::Yv12 | Self::I420 => FormatClass::YuvPlanar,
            _ => FormatClass::Rgb,
        }
    }

    #[must_use]
    pub const fn fourcc(self) -> u32 {
        match self {
            Self::C8 => DRM_FORMAT_C8,
            Self::Rgb565 => DRM_FORMAT_RGB565,
            Self::Xrgb1555 => DRM_FORMAT_XRGB1555,
            Self::Argb1555 => DRM_FORMAT_ARGB1555,
            Self::Xrgb8888 => DRM_FORMAT_XRGB8888,
            Self::Argb8888 => DRM_FORMAT_ARGB8888,
            Self::Xbgr8888 => DRM_FORMAT_XBGR8888,
            Self::Abgr8888 => DRM_FORMAT_ABGR8888,
            Self::Argb2101010 => DRM_FORMAT_ARGB2101010,
            Self::Yuyv => DRM_FORMAT_YUYV,
            Self::Uyvy => DRM_FORMAT_UYVY,
            Self::Nv12 => DRM_FORMAT_NV12,
            Self::Yv12 => DRM_FORMAT_YVU420,
            Self::I420 => DRM_FORMAT_YUV420,
        }
    }

    #[must_use]
    pub const fn from_fourcc(code: u32) -> Option<Self> {
        let format = match code {
            DRM_FORMAT_C8 => Self::C8,
            DRM_FORMAT_RGB565 => Self::Rgb565,
            DRM_FORMAT_XRGB1555 => Self::Xrgb1555,
            DRM_FORMAT_ARGB1555 => Self::Argb1555,
            DRM_FORMAT_XRGB8888 => Self::Xrgb8888,
            DRM_FORMAT_ARGB8888 => Self::Argb8888,
            DRM_FORMAT_XBGR8888 => Self::Xbgr8888,
            DRM_FORMAT_ABGR8888 => Self::Abgr8888,
            DRM_FORMAT_ARGB2101010 => Self::Argb2101010,
            DRM_FORMAT_YUYV => Self::Yuyv,
            DRM_FORMAT_UYVY => Self::Uyvy,
            DRM_FORMAT_NV12 => Self::Nv12,
            DRM_FORMAT_YVU420 => Self::Yv12,
            DRM_FORMAT_YUV420 => Self::I420,
            _ => return None,
        };
        Some(format)
    }
}

#[must_use]
pub const fn bits_per_pixel(format: PixelFormat) -> u32 {
    format.bits_per_pixel()
}

#[must_use]
pub const fn format_class(format: PixelFormat) -> FormatClass {
    format.class()
}
