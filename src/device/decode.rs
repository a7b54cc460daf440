use crate::device::types::{ConnectionState, Reading};
use crate::error::DecodeError;

/**
 * Accumulate bytes as a little endian unsigned integer.
 */
fn accumulate_le(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .enumerate()
        .fold(0u32, |acc, (i, byte)| acc | (u32::from(*byte) << (8 * i)))
}

/**
 * Decode one notification payload into a reading.
 *
 * The sensor packs the temperature in hundredths of a degree Celsius into
 * the first two bytes (little endian, unsigned) and the relative humidity
 * percentage into the third byte. Trailing bytes are ignored.
 */
pub fn decode_reading(value: &[u8]) -> Result<Reading, DecodeError> {
    if value.len() < 3 {
        return Err(DecodeError::TooShort { len: value.len() });
    }

    let temperature = accumulate_le(&value[..2]) as f32 / 100.0;
    let humidity = f32::from(value[2]);

    Ok(Reading {
        temperature_celsius: temperature,
        humidity_percent: humidity,
        state: ConnectionState::Connected,
    })
}
