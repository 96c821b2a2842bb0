//! Register word encoding
//!
//! 32-bit floats travel as two big-endian words, most-significant word first.
//! Booleans are single bits inside a shared 16-bit register.

use crate::error::{CurtailError, Result};

/// Bit position within a 16-bit register (0-15, where 0 is LSB)
pub type BitPosition = u8;

/// Highest valid bit position in a register
pub const MAX_BIT_POSITION: BitPosition = 15;

/// Encode an f32 as `[high_word, low_word]`
pub fn encode_f32(value: f32) -> [u16; 2] {
    let bytes = value.to_be_bytes();
    [
        u16::from_be_bytes([bytes[0], bytes[1]]),
        u16::from_be_bytes([bytes[2], bytes[3]]),
    ]
}

/// Decode an f32 from exactly two words
pub fn decode_f32(words: &[u16]) -> Result<f32> {
    match words {
        [high, low] => {
            let h = high.to_be_bytes();
            let l = low.to_be_bytes();
            Ok(f32::from_be_bytes([h[0], h[1], l[0], l[1]]))
        },
        _ => Err(CurtailError::incomplete(format!(
            "float32 needs 2 words, got {}",
            words.len()
        ))),
    }
}

fn check_bit(bit_position: BitPosition) -> Result<u16> {
    if bit_position > MAX_BIT_POSITION {
        return Err(CurtailError::illegal_value(format!(
            "Bit position {} is out of range (0-15)",
            bit_position
        )));
    }
    Ok(1u16 << bit_position)
}

/// Extract a specific bit from a 16-bit register value
pub fn extract_bit(register_value: u16, bit_position: BitPosition) -> Result<bool> {
    let mask = check_bit(bit_position)?;
    Ok((register_value & mask) != 0)
}

/// Return `register_value` with one bit set or cleared; all other bits are preserved
pub fn set_bit(register_value: u16, bit_position: BitPosition, bit_value: bool) -> Result<u16> {
    let mask = check_bit(bit_position)?;
    Ok(if bit_value {
        register_value | mask
    } else {
        register_value & !mask
    })
}
