//! Low-level byte stream parser for AVM2 bytecode decoding.
//!
//! This module provides the [`crate::utils::parser::Parser`] type, a cursor-based binary data
//! parser for the operand encodings used by ABC method bodies. All reads are bounds-checked and
//! fail with [`crate::Error::OutOfBounds`] instead of panicking on truncated input.
//!
//! # Encodings
//!
//! - **u8** - a single unsigned byte
//! - **u30** - a variable-length unsigned integer, 7 bits per byte, little-endian, at most 5 bytes
//! - **s24** - a 3-byte little-endian two's complement signed integer, used for branch offsets
//!
//! # Examples
//!
//! ```rust
//! use abcscope::Parser;
//!
//! let data = [0x80, 0x01, 0xFD, 0xFF, 0xFF];
//! let mut parser = Parser::new(&data);
//!
//! assert_eq!(parser.read_u30()?, 128);
//! assert_eq!(parser.read_s24()?, -3);
//! assert!(!parser.has_more_data());
//! # Ok::<(), abcscope::Error>(())
//! ```

use crate::Result;

/// Largest value representable by the `u30` encoding.
pub const U30_MAX: u32 = (1 << 30) - 1;

/// A cursor over a byte slice that decodes AVM2 operand encodings.
///
/// `Parser` keeps a position into the borrowed data and advances it with every read.
/// The decoder uses one parser per method body.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new `Parser` from a byte slice.
    ///
    /// # Arguments
    /// * `data` - The byte slice to read from
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move the current position to the specified index.
    ///
    /// Seeking to exactly the end of the buffer is allowed.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is beyond the data length.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Read a single unsigned byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the end of the data was reached.
    pub fn read_u8(&mut self) -> Result<u8> {
        let Some(&byte) = self.data.get(self.position) else {
            return Err(out_of_bounds_error!());
        };

        self.position += 1;
        Ok(byte)
    }

    /// Read a variable-length `u30` value.
    ///
    /// Each byte contributes its low 7 bits, least significant group first; the high
    /// bit signals that another byte follows. At most five bytes are consumed. Bits
    /// beyond the 30th are discarded, matching how the virtual machine reads them.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the stream ends inside the value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use abcscope::Parser;
    ///
    /// let mut parser = Parser::new(&[0x7F]);
    /// assert_eq!(parser.read_u30()?, 127);
    ///
    /// let mut parser = Parser::new(&[0xFF, 0xFF, 0xFF, 0xFF, 0x03]);
    /// assert_eq!(parser.read_u30()?, (1 << 30) - 1);
    /// # Ok::<(), abcscope::Error>(())
    /// ```
    pub fn read_u30(&mut self) -> Result<u32> {
        let mut value = 0u32;

        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7F).wrapping_shl(shift);
            if byte & 0x80 == 0 {
                break;
            }
        }

        Ok(value & U30_MAX)
    }

    /// Read a 24-bit little-endian signed value.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than three bytes remain.
    pub fn read_s24(&mut self) -> Result<i32> {
        let b0 = u32::from(self.read_u8()?);
        let b1 = u32::from(self.read_u8()?);
        let b2 = u32::from(self.read_u8()?);

        let raw = b0 | (b1 << 8) | (b2 << 16);
        // Sign-extend from bit 23
        Ok(((raw << 8) as i32) >> 8)
    }
}

/// Append a `u30` value in its variable-length form.
///
/// # Arguments
/// * `out` - Buffer to append to
/// * `value` - Value to encode; only the low 30 bits are significant
pub fn write_u30(out: &mut Vec<u8>, value: u32) {
    let mut value = value & U30_MAX;
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Append a signed 24-bit value in little-endian order.
///
/// The caller is responsible for range checking; see [`fits_s24`].
pub fn write_s24(out: &mut Vec<u8>, value: i32) {
    let bytes = value.to_le_bytes();
    out.extend_from_slice(&bytes[..3]);
}

/// Overwrite three bytes at `position` with a signed 24-bit value.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the field does not fit into `buffer`.
pub fn patch_s24(buffer: &mut [u8], position: usize, value: i32) -> Result<()> {
    let Some(field) = buffer.get_mut(position..position + 3) else {
        return Err(out_of_bounds_error!());
    };

    field.copy_from_slice(&value.to_le_bytes()[..3]);
    Ok(())
}

/// Returns `true` if `value` is representable as a signed 24-bit integer.
#[must_use]
pub const fn fits_s24(value: i64) -> bool {
    value >= -(1 << 23) && value < (1 << 23)
}

/// Number of bytes [`write_u30`] produces for `value`.
#[must_use]
pub const fn u30_len(value: u32) -> usize {
    let value = value & U30_MAX;
    if value < (1 << 7) {
        1
    } else if value < (1 << 14) {
        2
    } else if value < (1 << 21) {
        3
    } else if value < (1 << 28) {
        4
    } else {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_read_u30() {
        let test_cases = vec![
            (vec![0x00], 0),
            (vec![0x7F], 0x7F),
            (vec![0x80, 0x01], 0x80),
            (vec![0xFF, 0x7F], 0x3FFF),
            (vec![0x80, 0x80, 0x01], 0x4000),
            (vec![0xFF, 0xFF, 0xFF, 0xFF, 0x03], U30_MAX),
        ];

        for (input, expected) in test_cases {
            let mut parser = Parser::new(&input);
            assert_eq!(parser.read_u30().unwrap(), expected);
            assert!(!parser.has_more_data());
        }
    }

    #[test]
    fn test_read_u30_truncated() {
        let mut parser = Parser::new(&[0x80, 0x80]);
        assert!(matches!(
            parser.read_u30(),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_read_s24() {
        let mut parser = Parser::new(&[0x05, 0x00, 0x00, 0xFB, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F]);
        assert_eq!(parser.read_s24().unwrap(), 5);
        assert_eq!(parser.read_s24().unwrap(), -5);
        assert_eq!(parser.read_s24().unwrap(), (1 << 23) - 1);
    }

    #[test]
    fn test_write_u30_matches_reader() {
        for value in [0, 1, 127, 128, 300, 16_384, 2_097_151, 2_097_152, U30_MAX] {
            let mut buffer = Vec::new();
            write_u30(&mut buffer, value);
            assert_eq!(buffer.len(), u30_len(value));

            let mut parser = Parser::new(&buffer);
            assert_eq!(parser.read_u30().unwrap(), value);
        }
    }

    #[test]
    fn test_patch_s24() {
        let mut buffer = vec![0x10, 0, 0, 0];
        patch_s24(&mut buffer, 1, -2).unwrap();
        assert_eq!(buffer, vec![0x10, 0xFE, 0xFF, 0xFF]);
        assert!(patch_s24(&mut buffer, 2, 1).is_err());
    }

    #[test]
    fn test_fits_s24() {
        assert!(fits_s24(0));
        assert!(fits_s24(-(1 << 23)));
        assert!(fits_s24((1 << 23) - 1));
        assert!(!fits_s24(1 << 23));
        assert!(!fits_s24(-(1 << 23) - 1));
    }

    #[test]
    fn test_seek() {
        let data = [1, 2, 3];
        let mut parser = Parser::new(&data);
        parser.seek(3).unwrap();
        assert!(!parser.has_more_data());
        assert!(parser.seek(4).is_err());
    }
}
