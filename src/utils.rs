use crate::error::{error_codes, ChannelError};

/// Generate random bytes of the specified length
///
/// Fails with a `KeyGenerationError` if the operating system entropy source
/// is unavailable. There is no fallback to a weaker generator.
pub fn random_bytes(length: usize) -> Result<Vec<u8>, ChannelError> {
    let mut bytes = vec![0u8; length];
    getrandom::getrandom(&mut bytes).map_err(|e| {
        ChannelError::key_generation(
            "random_bytes",
            &format!("entropy source unavailable: {}", e),
            error_codes::ENTROPY_STARVATION,
        )
    })?;
    Ok(bytes)
}

/// Generate a fresh 32-byte handshake random
pub fn random_array_32() -> Result<[u8; 32], ChannelError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).map_err(|e| {
        ChannelError::key_generation(
            "random_array_32",
            &format!("entropy source unavailable: {}", e),
            error_codes::ENTROPY_STARVATION,
        )
    })?;
    Ok(bytes)
}

/// Constant-time comparison of two byte slices to avoid timing attacks
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}

/// Convert bytes to a hexadecimal string
pub fn to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Convert a hexadecimal string to bytes
pub fn from_hex(s: &str) -> Result<Vec<u8>, ChannelError> {
    hex::decode(s).map_err(|e| ChannelError::SerializationError(format!("invalid hex: {}", e)))
}

/// Decode standard padded base64, rejecting non-canonical encodings.
///
/// Text transports carry every binary field base64-encoded; a decoder that
/// accepts non-canonical forms would let two distinct encodings map to one
/// message, so the decoded bytes are re-encoded and compared.
pub fn decode_base64_strict(input: &str) -> Result<Vec<u8>, ChannelError> {
    let decoded = base64::decode(input)
        .map_err(|e| ChannelError::SerializationError(format!("invalid base64: {}", e)))?;
    if base64::encode(&decoded) != input {
        return Err(ChannelError::SerializationError(
            "non-canonical base64 encoding".to_string(),
        ));
    }
    Ok(decoded)
}

/// Encode bytes as standard padded base64
pub fn encode_base64(input: &[u8]) -> String {
    base64::encode(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes() {
        let bytes1 = random_bytes(32).unwrap();
        let bytes2 = random_bytes(32).unwrap();

        assert_eq!(bytes1.len(), 32);
        assert_eq!(bytes2.len(), 32);
        assert_ne!(bytes1, bytes2);
    }

    #[test]
    fn test_constant_time_eq() {
        let a = [1, 2, 3, 4];
        let b = [1, 2, 3, 4];
        let c = [1, 2, 3, 5];
        let d = [1, 2, 3];

        assert!(constant_time_eq(&a, &b));
        assert!(!constant_time_eq(&a, &c));
        assert!(!constant_time_eq(&a, &d));
    }

    #[test]
    fn test_hex_round_trip() {
        let data = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
        let encoded = to_hex(&data);
        assert_eq!(encoded, "0123456789abcdef");
        assert_eq!(from_hex(&encoded).unwrap(), data);
    }

    #[test]
    fn test_base64_round_trip() {
        let data = b"handshake payload";
        let encoded = encode_base64(data);
        let decoded = decode_base64_strict(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_base64_rejects_non_canonical() {
        // "QQ==" decodes to "A"; "QR==" decodes to the same byte with
        // non-zero trailing bits and must be rejected.
        assert!(decode_base64_strict("QQ==").is_ok());
        assert!(decode_base64_strict("QR==").is_err());
        assert!(decode_base64_strict("not base64!").is_err());
    }
}
