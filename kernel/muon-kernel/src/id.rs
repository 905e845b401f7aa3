//! Type-safe identifiers for kernel resources.
//!
//! These newtypes keep device numbers and class identities from being mixed
//! with plain integers.

use core::fmt;

use crate::config::{MINOR_BITS, MINOR_MASK};

/// Character device number: a `(major, minor)` pair packed into 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DevNum(u32);

impl DevNum {
    /// Packs a major and minor into a device number.
    ///
    /// Bits of `minor` beyond [`MINOR_BITS`] are discarded.
    pub const fn new(major: u32, minor: u32) -> Self {
        Self((major << MINOR_BITS) | (minor & MINOR_MASK))
    }

    /// Returns the major number.
    pub const fn major(self) -> u32 {
        self.0 >> MINOR_BITS
    }

    /// Returns the minor number.
    pub const fn minor(self) -> u32 {
        self.0 & MINOR_MASK
    }
}

impl fmt::Display for DevNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

/// Identity of a device class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClassId(u32);

impl ClassId {
    /// Creates a new `ClassId`.
    pub const fn new(val: u32) -> Self {
        Self(val)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
