//! Driver error types.

use core::fmt;

/// Errors returned by kernel services and by driver probe functions.
///
/// These play the role of negative errno values: a driver passes the error
/// a service gave it back to the bus unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// The device is not present or does not respond.
    NoDevice,
    /// The resource is owned by someone else.
    Busy,
    /// A mapping or allocation could not be satisfied.
    NoMemory,
    /// No free identifiers remain in the namespace.
    NoSpace,
    /// An entry with the same name or number already exists.
    Exists,
    /// The named entry does not exist.
    NotFound,
    /// An argument was out of range or inconsistent.
    InvalidArgument,
    /// A user buffer could not be accessed.
    Fault,
}

impl DriverError {
    /// Returns the conventional errno name for this error.
    #[must_use]
    pub const fn errno_name(self) -> &'static str {
        match self {
            Self::NoDevice => "ENODEV",
            Self::Busy => "EBUSY",
            Self::NoMemory => "ENOMEM",
            Self::NoSpace => "ENOSPC",
            Self::Exists => "EEXIST",
            Self::NotFound => "ENOENT",
            Self::InvalidArgument => "EINVAL",
            Self::Fault => "EFAULT",
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NoDevice => "no such device",
            Self::Busy => "resource busy",
            Self::NoMemory => "out of memory or address space",
            Self::NoSpace => "no identifiers left",
            Self::Exists => "already exists",
            Self::NotFound => "not found",
            Self::InvalidArgument => "invalid argument",
            Self::Fault => "bad address",
        };
        write!(f, "{msg} ({})", self.errno_name())
    }
}
