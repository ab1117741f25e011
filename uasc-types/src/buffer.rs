//! Bounded byte buffers used by the transport layers. A buffer is either
//! fixed (one allocation, capped at creation) or growable up to a configured
//! maximum, growing in multiples of its initial size.

use std::io::{Read, Write};

use crate::{encoding::Error, status_code::StatusCode};

/// A bounded byte buffer with independent read/write position and logical
/// length. Writes advance both position and length, reads advance position
/// only.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    data: Vec<u8>,
    initial_size: usize,
    maximum_size: usize,
    position: usize,
    length: usize,
}

impl Buffer {
    /// Create a fixed-size buffer. It will never allocate beyond `size`.
    pub fn fixed(size: usize) -> Buffer {
        Buffer {
            data: vec![0u8; size],
            initial_size: size,
            maximum_size: size,
            position: 0,
            length: 0,
        }
    }

    /// Create a growable buffer starting at `initial_size` bytes and growing
    /// in `initial_size` increments up to `maximum_size`.
    pub fn growable(initial_size: usize, maximum_size: usize) -> Buffer {
        debug_assert!(initial_size <= maximum_size);
        Buffer {
            data: vec![0u8; initial_size],
            initial_size,
            maximum_size,
            position: 0,
            length: 0,
        }
    }

    /// Current read/write position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Logical length of the data held.
    pub fn len(&self) -> usize {
        self.length
    }

    /// `true` when no data is held.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Currently allocated capacity.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The configured upper bound.
    pub fn maximum_size(&self) -> usize {
        self.maximum_size
    }

    /// Set the position. Fails when the position would exceed the length.
    pub fn set_position(&mut self, position: usize) -> Result<(), Error> {
        if position > self.length {
            return Err(Error::new(
                StatusCode::BadInvalidState,
                format!("position {} exceeds length {}", position, self.length),
            ));
        }
        self.position = position;
        Ok(())
    }

    /// Set the logical length. Fails beyond current capacity. Shrinking zeroes
    /// the dropped region so stale data never leaks into later reads.
    pub fn set_len(&mut self, length: usize) -> Result<(), Error> {
        if length > self.data.len() {
            return Err(Error::new(
                StatusCode::BadInvalidState,
                format!("length {} exceeds capacity {}", length, self.data.len()),
            ));
        }
        if length < self.length {
            self.data[length..self.length].fill(0);
        }
        self.length = length;
        if self.position > length {
            self.position = length;
        }
        Ok(())
    }

    /// Grow the allocation so that `required` bytes fit, using the first
    /// multiple of the initial size that contains the requested length, or
    /// the maximum size if that is greater.
    fn ensure_capacity(&mut self, required: usize) -> Result<(), Error> {
        if required <= self.data.len() {
            return Ok(());
        }
        if required > self.maximum_size {
            return Err(Error::new(
                StatusCode::BadEncodingLimitsExceeded,
                format!(
                    "required size {} would overflow maximum buffer size {}",
                    required, self.maximum_size
                ),
            ));
        }
        let mut target = self.data.len().max(self.initial_size);
        while target < required {
            target += self.initial_size;
        }
        self.data.resize(target.min(self.maximum_size), 0);
        Ok(())
    }

    /// Write `bytes` at the current position, growing if allowed.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let end = self.position + bytes.len();
        self.ensure_capacity(end)?;
        self.data[self.position..end].copy_from_slice(bytes);
        self.position = end;
        if end > self.length {
            self.length = end;
        }
        Ok(())
    }

    /// Read up to `buf.len()` bytes from the current position, returning the
    /// number of bytes read.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let available = self.length - self.position;
        let n = available.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        n
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.length - self.position
    }

    /// The full data slice up to the logical length.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// The unread portion of the data.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.position..self.length]
    }

    /// Replace this buffer's content with the content of `other`. Fails when
    /// `other` holds more than this buffer may ever hold.
    pub fn copy_from(&mut self, other: &Buffer) -> Result<(), Error> {
        self.reset();
        self.ensure_capacity(other.length)?;
        self.data[..other.length].copy_from_slice(&other.data[..other.length]);
        self.length = other.length;
        self.position = 0;
        Ok(())
    }

    /// Clear the content and rewind. Zeroes the previously used region.
    pub fn reset(&mut self) {
        self.data[..self.length].fill(0);
        self.position = 0;
        self.length = 0;
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        Buffer::write(self, buf).map_err(std::io::Error::from)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for Buffer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(Buffer::read(self, buf))
    }
}

#[cfg(test)]
mod tests {
    use super::Buffer;
    use crate::status_code::StatusCode;

    #[test]
    fn fixed_rejects_overflow() {
        let mut b = Buffer::fixed(4);
        b.write(&[1, 2, 3, 4]).unwrap();
        let err = b.write(&[5]).unwrap_err();
        assert_eq!(err.status(), StatusCode::BadEncodingLimitsExceeded);
    }

    #[test]
    fn growable_grows_in_initial_size_steps() {
        let mut b = Buffer::growable(8, 32);
        b.write(&[0u8; 10]).unwrap();
        // First multiple of 8 containing 10 bytes is 16
        assert_eq!(b.capacity(), 16);
        b.write(&[0u8; 20]).unwrap();
        assert_eq!(b.capacity(), 32);
        assert!(b.write(&[0u8; 8]).is_err());
    }

    #[test]
    fn shrink_zeroes_dropped_region() {
        let mut b = Buffer::growable(8, 8);
        b.write(&[0xAA; 8]).unwrap();
        b.set_len(4).unwrap();
        b.set_len(8).unwrap();
        assert_eq!(&b.as_slice()[4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn position_capped_by_length() {
        let mut b = Buffer::growable(8, 8);
        b.write(&[1, 2, 3]).unwrap();
        assert!(b.set_position(3).is_ok());
        assert!(b.set_position(4).is_err());
        b.set_position(1).unwrap();
        let mut out = [0u8; 8];
        assert_eq!(b.read(&mut out), 2);
        assert_eq!(&out[..2], &[2, 3]);
    }

    #[test]
    fn copy_and_reset() {
        let mut a = Buffer::growable(4, 16);
        a.write(&[9, 8, 7]).unwrap();
        let mut b = Buffer::growable(4, 16);
        b.copy_from(&a).unwrap();
        assert_eq!(b.as_slice(), &[9, 8, 7]);
        b.reset();
        assert!(b.is_empty());
        assert_eq!(b.position(), 0);
    }
}
