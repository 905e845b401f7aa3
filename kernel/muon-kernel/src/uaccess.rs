//! User-space buffer access for file operations.
//!
//! [`UserSliceMut`] stands in for a user buffer passed to `read`. It carries
//! the length the caller asked for and the extent that is actually mapped;
//! copying more than the mapped extent, or into an unmapped buffer, raises a
//! [`TransferFault`] instead of touching memory.

use core::fmt;

/// A copy to or from user memory hit an unmapped or too-short buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFault {
    /// Bytes the copy needed.
    pub wanted: usize,
    /// Bytes that were writable.
    pub mapped: usize,
}

impl fmt::Display for TransferFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bad user address: copy of {} bytes into {} mapped bytes",
            self.wanted, self.mapped
        )
    }
}

/// A writable user buffer.
#[derive(Debug)]
pub struct UserSliceMut<'a> {
    mapped: Option<&'a mut [u8]>,
    requested: usize,
}

impl<'a> UserSliceMut<'a> {
    /// Wraps a mapped buffer; the requested length is the buffer length.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let requested = buf.len();
        Self {
            mapped: Some(buf),
            requested,
        }
    }

    /// Wraps a mapped buffer with an independent requested length.
    pub fn with_requested_len(buf: &'a mut [u8], requested: usize) -> Self {
        Self {
            mapped: Some(buf),
            requested,
        }
    }

    /// A buffer of `requested` bytes that is not mapped at all.
    pub fn unmapped(requested: usize) -> Self {
        Self {
            mapped: None,
            requested,
        }
    }

    /// Returns the length the caller asked for.
    pub fn requested_len(&self) -> usize {
        self.requested
    }

    /// Returns the number of writable bytes.
    pub fn mapped_len(&self) -> usize {
        self.mapped.as_ref().map_or(0, |buf| buf.len())
    }

    /// Copies `src` to the start of the user buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TransferFault`] without writing anything if the buffer is
    /// unmapped or shorter than `src`.
    pub fn copy_to_user(&mut self, src: &[u8]) -> Result<(), TransferFault> {
        let fault = TransferFault {
            wanted: src.len(),
            mapped: self.mapped_len(),
        };
        match self.mapped.as_deref_mut() {
            Some(dst) if dst.len() >= src.len() => {
                dst[..src.len()].copy_from_slice(src);
                Ok(())
            }
            _ => Err(fault),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_into_mapped_buffer() {
        let mut buf = [0u8; 8];
        let mut user = UserSliceMut::new(&mut buf);
        assert_eq!(user.requested_len(), 8);
        user.copy_to_user(&[1, 2, 3, 4]).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn requested_len_is_independent_of_mapping() {
        let mut buf = [0u8; 8];
        let mut user = UserSliceMut::with_requested_len(&mut buf, 1);
        assert_eq!(user.requested_len(), 1);
        assert_eq!(user.mapped_len(), 8);
        user.copy_to_user(&[9; 4]).unwrap();
        assert_eq!(&buf[..4], &[9; 4]);
    }

    #[test]
    fn short_buffer_faults_without_writing() {
        let mut buf = [7u8; 2];
        let mut user = UserSliceMut::new(&mut buf);
        let fault = user.copy_to_user(&[0; 4]).unwrap_err();
        assert_eq!(fault, TransferFault { wanted: 4, mapped: 2 });
        assert_eq!(buf, [7, 7]);
    }

    #[test]
    fn unmapped_buffer_faults() {
        let mut user = UserSliceMut::unmapped(64);
        assert_eq!(user.mapped_len(), 0);
        assert!(user.copy_to_user(&[0; 4]).is_err());
    }
}
