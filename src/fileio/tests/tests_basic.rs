#[cfg(test)]
mod tests {
    use crate::fileio::{read_state_file, write_state_file, FileIoError, FileObject};
    use tempfile::TempDir;

    #[test]
    fn test_create_and_read_back() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.bin");

        let file = FileObject::create_and_write(&path, b"hello world").unwrap();
        assert_eq!(file.size(), 11);
        assert_eq!(file.read(0, 5).unwrap(), b"hello");
        assert_eq!(file.read(6, 5).unwrap(), b"world");
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.bin");

        let _file = FileObject::create_and_write(&path, b"abc").unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_read_past_eof_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.bin");
        let file = FileObject::create_and_write(&path, b"abcd").unwrap();

        assert!(matches!(
            file.read(2, 10),
            Err(FileIoError::OutOfRange { .. })
        ));
        assert!(matches!(
            file.read(100, 1),
            Err(FileIoError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_read_fixed_width_integers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ints.bin");

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xAABBCCDDu32.to_le_bytes());
        bytes.extend_from_slice(&0x1122334455667788u64.to_le_bytes());

        let file = FileObject::create_and_write(&path, &bytes).unwrap();
        assert_eq!(file.read_u32(0).unwrap(), 0xAABBCCDD);
        assert_eq!(file.read_u64(4).unwrap(), 0x1122334455667788);
    }

    #[test]
    fn test_delete_removes_backing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("gone.bin");

        let file = FileObject::create_and_write(&path, b"x").unwrap();
        file.delete().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_state_file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state");

        assert!(read_state_file(&path, 3).unwrap().is_none());

        write_state_file(&path, &[7, 42, u64::MAX]).unwrap();
        let words = read_state_file(&path, 3).unwrap().unwrap();
        assert_eq!(words, vec![7, 42, u64::MAX]);

        // Overwrite moves every word forward atomically.
        write_state_file(&path, &[8, 43, 0]).unwrap();
        let words = read_state_file(&path, 3).unwrap().unwrap();
        assert_eq!(words, vec![8, 43, 0]);
    }

    #[test]
    fn test_state_file_truncated_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state");
        std::fs::write(&path, [0u8; 10]).unwrap();

        assert!(matches!(
            read_state_file(&path, 3),
            Err(FileIoError::Truncated { expected: 24, .. })
        ));
    }
}
