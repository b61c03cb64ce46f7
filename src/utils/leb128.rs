//! LEB128 variable-length integer encoding.
//!
//! All metadata tables attached to compiled code (mapping tables, vmap
//! tables, stack maps) store their integers in this form.

use crate::Result;

/// Appends `value` as unsigned LEB128.
pub fn write_unsigned(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Appends `value` as signed LEB128.
pub fn write_signed(out: &mut Vec<u8>, mut value: i32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let sign_clear = byte & 0x40 == 0;
        if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Number of bytes [`write_unsigned`] produces for `value`.
#[must_use]
pub fn unsigned_size(value: u32) -> usize {
    let bits = 32 - (value | 1).leading_zeros() as usize;
    bits.div_ceil(7)
}

/// Reads an unsigned LEB128 value at `offset`, advancing it.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] when the encoding is truncated or
/// longer than five bytes.
pub fn read_unsigned(data: &[u8], offset: &mut usize) -> Result<u32> {
    let mut result = 0u32;
    for shift in (0..35).step_by(7) {
        let Some(&byte) = data.get(*offset) else {
            return Err(malformed_error!("Truncated LEB128 value at {}", offset));
        };
        *offset += 1;
        result |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(malformed_error!("LEB128 value exceeds 32 bits"))
}

/// Reads a signed LEB128 value at `offset`, advancing it.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] when the encoding is truncated or
/// longer than five bytes.
pub fn read_signed(data: &[u8], offset: &mut usize) -> Result<i32> {
    let mut result = 0i32;
    let mut shift = 0;
    loop {
        let Some(&byte) = data.get(*offset) else {
            return Err(malformed_error!("Truncated LEB128 value at {}", offset));
        };
        *offset += 1;
        result |= i32::from(byte & 0x7f).wrapping_shl(shift);
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 32 && byte & 0x40 != 0 {
                result |= -1i32 << shift;
            }
            return Ok(result);
        }
        if shift >= 35 {
            return Err(malformed_error!("LEB128 value exceeds 32 bits"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_encodings() {
        let mut out = Vec::new();
        write_unsigned(&mut out, 624_485);
        assert_eq!(out, vec![0xe5, 0x8e, 0x26]);

        out.clear();
        write_signed(&mut out, -123_456);
        assert_eq!(out, vec![0xc0, 0xbb, 0x78]);

        out.clear();
        write_signed(&mut out, 63);
        write_signed(&mut out, 64);
        assert_eq!(out, vec![0x3f, 0xc0, 0x00]);
    }

    #[test]
    fn sizes_match_encoder() {
        for value in [0, 1, 127, 128, 16_383, 16_384, u32::MAX] {
            let mut out = Vec::new();
            write_unsigned(&mut out, value);
            assert_eq!(out.len(), unsigned_size(value), "value {value}");
        }
    }

    #[test]
    fn reads_back_mixed_stream() -> Result<()> {
        let mut out = Vec::new();
        write_unsigned(&mut out, 300);
        write_signed(&mut out, -2);
        write_signed(&mut out, i32::MIN);

        let mut offset = 0;
        assert_eq!(read_unsigned(&out, &mut offset)?, 300);
        assert_eq!(read_signed(&out, &mut offset)?, -2);
        assert_eq!(read_signed(&out, &mut offset)?, i32::MIN);
        assert_eq!(offset, out.len());
        Ok(())
    }

    #[test]
    fn truncated_input_is_malformed() {
        let mut offset = 0;
        assert!(read_unsigned(&[0x80], &mut offset).is_err());
    }
}
