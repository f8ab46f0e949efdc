//! Byte/text codec for serial payloads.
//!
//! The JSON transport carries serial bytes as standard base64 text. Encoding
//! is byte-for-byte; decoding reverses it exactly. There is no checksum, so
//! corrupted input either fails to decode or yields different bytes.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;

use crate::error::Result;

// ============================================================================
// Codec
// ============================================================================

/// Encodes raw serial bytes for a `write` command.
#[inline]
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    Base64Standard.encode(bytes)
}

/// Decodes the payload of a `data` event.
///
/// # Errors
///
/// Returns [`Error::Base64`](crate::Error::Base64) if `text` is not valid base64.
#[inline]
pub fn decode(text: &str) -> Result<Vec<u8>> {
    Ok(Base64Standard.decode(text)?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_encode_known_value() {
        assert_eq!(encode(b"AT\r\n"), "QVQNCg==");
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn test_decode_known_value() {
        assert_eq!(decode("QVQNCg==").unwrap(), b"AT\r\n");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode("not base64!"), Err(crate::Error::Base64(_))));
    }

    proptest! {
        #[test]
        fn prop_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
            prop_assert_eq!(decode(&encode(&bytes)).unwrap(), bytes);
        }
    }
}
