//! The discovery probe's wire format: a single 4-byte integer payload
//! carrying a TCP callback port.
//!
//! The original C implementation sent this in host endianness, which meant
//! two peers of different endianness could not interoperate (see the design
//! notes). This port standardizes on network byte order.

/// Errors decoding a discovery probe datagram.
///
/// The only failure mode is a datagram of the wrong size, never a bad value,
/// since every bit pattern in a correctly-sized payload is a valid port (or
/// at worst a nonsensical one the caller will simply fail to connect to).
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The datagram was not exactly 4 bytes.
    #[error("discovery datagram had {0} bytes, expected 4")]
    WrongLength(usize),
}

/// Encode a callback port into a discovery probe payload.
#[must_use]
pub fn encode_probe(callback_port: u16) -> [u8; 4] {
    u32::from(callback_port).to_be_bytes()
}

/// Decode a discovery probe payload into the callback port it carries.
///
/// # Errors
///
/// Returns [`Error::WrongLength`] if `payload` is not exactly 4 bytes.
pub fn decode_probe(payload: &[u8]) -> Result<u16, Error> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| Error::WrongLength(payload.len()))?;
    let port = u32::from_be_bytes(bytes);
    Ok(port as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_port() {
        let probe = encode_probe(7002);
        assert_eq!(decode_probe(&probe).unwrap(), 7002);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(decode_probe(&[1, 2, 3]), Err(Error::WrongLength(3)));
        assert_eq!(decode_probe(&[1, 2, 3, 4, 5]), Err(Error::WrongLength(5)));
    }
}
