/// Manager-wide settings, fixed at init.
#[derive(Debug, Clone, Copy)]
pub struct GmmConfig {
    /// First aperture offset handed out.
    pub aperture_base: u64,
    /// Bytes of aperture the manager may bump-allocate into.
    pub aperture_size: u64,
    /// Call `flush_all` and retry once when page allocation fails.
    pub flush_on_pressure: bool,
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self {
            aperture_base: 0,
            aperture_size: 256 * 1024 * 1024,
            flush_on_pressure: true,
        }
    }
}

impl GmmConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_aperture_base(mut self, base: u64) -> Self {
        self.aperture_base = base;
        self
    }

    #[must_use]
    pub const fn with_aperture_size(mut self, size: u64) -> Self {
        self.aperture_size = size;
        self
    }

    #[must_use]
    pub const fn with_flush_on_pressure(mut self, enabled: bool) -> Self {
        self.flush_on_pressure = enabled;
        self
    }

    /// Exclusive end of the managed aperture range.
    #[must_use]
    pub const fn aperture_limit(&self) -> u64 {
        self.aperture_base.saturating_add(self.aperture_size)
    }
}
