//! Compile-time configuration and the emulated kernel's tunables.

use crate::log::LogLevel;

/// Maximum kernel log level. Messages above this verbosity are dropped
/// before they reach the `log` facade.
pub const MAX_LOG_LEVEL: LogLevel = LogLevel::Debug;

/// Bits of a device number used for the minor.
pub const MINOR_BITS: u32 = 20;

/// Largest minor number representable in a device number.
pub const MINOR_MASK: u32 = (1 << MINOR_BITS) - 1;

/// Dynamic major numbers are handed out downwards from here.
pub const DYNAMIC_MAJOR_END: u32 = 254;

/// Lowest dynamic major number.
pub const DYNAMIC_MAJOR_START: u32 = 234;

/// Runtime tunables for an emulated [`Kernel`](crate::Kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Minors available under one dynamically allocated major.
    pub minors_per_major: u32,
}

impl KernelConfig {
    /// Returns a config with the given per-major minor capacity.
    ///
    /// The capacity is clamped to what a device number can encode.
    #[must_use]
    pub const fn with_minor_capacity(minors: u32) -> Self {
        let capped = if minors > MINOR_MASK + 1 {
            MINOR_MASK + 1
        } else {
            minors
        };
        Self {
            minors_per_major: capped,
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::with_minor_capacity(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_capacity_is_clamped() {
        let cfg = KernelConfig::with_minor_capacity(u32::MAX);
        assert_eq!(cfg.minors_per_major, MINOR_MASK + 1);
    }

    #[test]
    fn dynamic_range_is_ordered() {
        assert!(DYNAMIC_MAJOR_START <= DYNAMIC_MAJOR_END);
    }
}
