#[cfg(test)]
mod tests {
    use crate::encoding::{get_bytes16, put_bytes16, Decode, EncodingError};

    #[test]
    fn test_decode_from_empty_buffer() {
        assert!(matches!(
            u8::decode_from(&[]),
            Err(EncodingError::UnexpectedEof { needed: 1, .. })
        ));
        assert!(matches!(
            u64::decode_from(&[1, 2, 3]),
            Err(EncodingError::UnexpectedEof { needed: 8, .. })
        ));
    }

    #[test]
    fn test_decode_truncated_u32() {
        let err = u32::decode_from(&[0xAA, 0xBB]).unwrap_err();
        match err {
            EncodingError::UnexpectedEof { needed, available } => {
                assert_eq!(needed, 4);
                assert_eq!(available, 2);
            }
            other => panic!("expected UnexpectedEof, got {other:?}"),
        }
    }

    #[test]
    fn test_bytes16_truncated_payload() {
        // Length prefix claims 10 bytes but only 3 follow.
        let buf = [10u8, 0, b'a', b'b', b'c'];
        assert!(matches!(
            get_bytes16(&buf),
            Err(EncodingError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_bytes16_rejects_oversized_input() {
        let huge = vec![0u8; u16::MAX as usize + 1];
        let mut buf = Vec::new();
        assert!(matches!(
            put_bytes16(&mut buf, &huge),
            Err(EncodingError::LengthOverflow(_))
        ));
    }

    #[test]
    fn test_bytes16_max_size_accepted() {
        let max = vec![0xABu8; u16::MAX as usize];
        let mut buf = Vec::new();
        put_bytes16(&mut buf, &max).unwrap();
        let (decoded, consumed) = get_bytes16(&buf).unwrap();
        assert_eq!(decoded.len(), u16::MAX as usize);
        assert_eq!(consumed, buf.len());
    }
}
