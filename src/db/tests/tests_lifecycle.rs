#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::config::StoreConfig;
    use crate::db::{Db, DbError};
    use crate::iterators::StorageIterator;

    fn test_config() -> StoreConfig {
        StoreConfig {
            per_mem_limit: 1 << 20,
            total_mem_limit: 64 << 20,
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_open_put_get_close() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), test_config()).unwrap();

        db.put(b"hello".to_vec(), b"world".to_vec()).unwrap();
        assert_eq!(db.get(b"hello").unwrap().unwrap(), b"world");

        db.close().unwrap();
        // Close is idempotent; operations afterwards are rejected.
        db.close().unwrap();
        assert!(matches!(db.get(b"hello"), Err(DbError::Closed)));
        assert!(matches!(
            db.put(b"x".to_vec(), b"y".to_vec()),
            Err(DbError::Closed)
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let tmp = TempDir::new().unwrap();
        let config = StoreConfig {
            block_size: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(
            Db::open(tmp.path(), config),
            Err(DbError::Config(_))
        ));
    }

    #[test]
    fn test_batch_operations() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), test_config()).unwrap();

        db.put_batch(vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ])
        .unwrap();

        assert_eq!(
            db.get_batch(&[b"a".to_vec(), b"b".to_vec(), b"zz".to_vec()])
                .unwrap(),
            vec![Some(b"1".to_vec()), Some(b"2".to_vec()), None]
        );

        db.remove_batch(vec![b"a".to_vec(), b"c".to_vec()]).unwrap();
        assert!(db.get(b"a").unwrap().is_none());
        assert_eq!(db.get(b"b").unwrap().unwrap(), b"2");
        assert!(db.get(b"c").unwrap().is_none());
    }

    #[test]
    fn test_iter_and_prefix() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), test_config()).unwrap();

        db.put(b"user:1".to_vec(), b"alice".to_vec()).unwrap();
        db.put(b"user:2".to_vec(), b"bob".to_vec()).unwrap();
        db.put(b"order:1".to_vec(), b"book".to_vec()).unwrap();

        let mut iter = db.iter().unwrap();
        let mut all = Vec::new();
        while iter.is_valid() {
            all.push(iter.key().to_vec());
            iter.next().unwrap();
        }
        assert_eq!(
            all,
            vec![b"order:1".to_vec(), b"user:1".to_vec(), b"user:2".to_vec()]
        );

        let mut iter = db.iter_prefix(b"user:").unwrap();
        let mut users = Vec::new();
        while iter.is_valid() {
            users.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.next().unwrap();
        }
        assert_eq!(
            users,
            vec![
                (b"user:1".to_vec(), b"alice".to_vec()),
                (b"user:2".to_vec(), b"bob".to_vec()),
            ]
        );

        assert!(!db.iter_prefix(b"nothing:").unwrap().is_valid());
    }

    #[test]
    fn test_clear_then_reuse() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), test_config()).unwrap();

        db.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        db.flush_all().unwrap();
        db.clear().unwrap();

        assert!(db.get(b"k").unwrap().is_none());
        db.put(b"k2".to_vec(), b"v2".to_vec()).unwrap();
        assert_eq!(db.get(b"k2").unwrap().unwrap(), b"v2");
    }

    #[test]
    fn test_cleared_store_stays_empty_after_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let db = Db::open(tmp.path(), test_config()).unwrap();
            db.put(b"ghost".to_vec(), b"v".to_vec()).unwrap();
            db.clear().unwrap();
            db.close().unwrap();
        }

        let db = Db::open(tmp.path(), test_config()).unwrap();
        assert!(
            db.get(b"ghost").unwrap().is_none(),
            "cleared data resurrected through the WAL"
        );
    }

    #[test]
    fn test_stats_snapshot() {
        let tmp = TempDir::new().unwrap();
        let db = Db::open(tmp.path(), test_config()).unwrap();

        db.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        let stats = db.stats().unwrap();
        assert!(stats.memtable_bytes > 0);

        db.flush_all().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.memtable_bytes, 0);
        assert_eq!(stats.level_sst_counts.iter().sum::<usize>(), 1);
    }
}
