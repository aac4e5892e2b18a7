#[cfg(test)]
mod tests {
    use std::cmp::Ordering;
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::cache::BlockCache;
    use crate::iterators::StorageIterator;
    use crate::sstable::iterator::KeyPredicate;
    use crate::sstable::{sst_path, SsTable, SsTableBuilder, SstIterator};

    fn build_numbered(tmp: &TempDir, count: u32) -> Arc<SsTable> {
        let cache = Arc::new(BlockCache::new(64, 2));
        let mut builder = SsTableBuilder::with_bloom(128, None);
        for i in 0..count {
            builder
                .add(
                    format!("key{i:03}").as_bytes(),
                    format!("value{i}").as_bytes(),
                    i as u64 + 1,
                )
                .unwrap();
        }
        Arc::new(
            builder
                .build(1, 0, sst_path(tmp.path(), 1, 0), cache)
                .unwrap(),
        )
    }

    fn drain_keys(mut iter: SstIterator) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        while iter.is_valid() {
            keys.push(iter.key().to_vec());
            iter.next().unwrap();
        }
        keys
    }

    #[test]
    fn test_full_scan_in_order() {
        let tmp = TempDir::new().unwrap();
        let table = build_numbered(&tmp, 50);
        assert!(table.num_blocks() > 1);

        let keys = drain_keys(SstIterator::new(Arc::clone(&table), 0).unwrap());
        assert_eq!(keys.len(), 50);
        assert_eq!(keys[0], b"key000");
        assert_eq!(keys[49], b"key049");
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_scan_respects_snapshot() {
        let tmp = TempDir::new().unwrap();
        let table = build_numbered(&tmp, 50);

        // Entries carry ids 1..=50; snapshot 10 sees only the first ten.
        let keys = drain_keys(SstIterator::new(table, 10).unwrap());
        assert_eq!(keys.len(), 10);
        assert_eq!(keys[9], b"key009");
    }

    #[test]
    fn test_seek_starts_mid_table() {
        let tmp = TempDir::new().unwrap();
        let table = build_numbered(&tmp, 50);

        let keys = drain_keys(SstIterator::new_seek(Arc::clone(&table), b"key030", 0).unwrap());
        assert_eq!(keys.len(), 20);
        assert_eq!(keys[0], b"key030");

        // Seek between keys lands on the next one.
        let keys = drain_keys(SstIterator::new_seek(Arc::clone(&table), b"key0305", 0).unwrap());
        assert_eq!(keys[0], b"key031");

        // Seek past the end is exhausted immediately.
        let iter = SstIterator::new_seek(table, b"zzz", 0).unwrap();
        assert!(!iter.is_valid());
    }

    #[test]
    fn test_predicate_range_scan() {
        let tmp = TempDir::new().unwrap();
        let table = build_numbered(&tmp, 100);

        let pred: KeyPredicate = Arc::new(|key: &[u8]| {
            if key < b"key020".as_slice() {
                Ordering::Less
            } else if key >= b"key060".as_slice() {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        });

        let iter = SstIterator::new_predicate(table, pred, 0).unwrap().unwrap();
        let keys = drain_keys(iter);
        assert_eq!(keys.len(), 40);
        assert_eq!(keys.first().unwrap(), b"key020");
        assert_eq!(keys.last().unwrap(), b"key059");
    }

    #[test]
    fn test_predicate_without_matches() {
        let tmp = TempDir::new().unwrap();
        let table = build_numbered(&tmp, 10);

        let pred: KeyPredicate = Arc::new(|key: &[u8]| {
            if key < b"zzz".as_slice() {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        });
        assert!(SstIterator::new_predicate(table, pred, 0).unwrap().is_none());
    }

    #[test]
    fn test_scan_skips_older_versions() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(BlockCache::new(64, 2));
        let mut builder = SsTableBuilder::with_bloom(256, None);
        builder.add(b"a", b"newest", 9).unwrap();
        builder.add(b"a", b"older", 5).unwrap();
        builder.add(b"a", b"oldest", 2).unwrap();
        builder.add(b"b", b"only", 3).unwrap();
        let table = Arc::new(
            builder
                .build(1, 0, sst_path(tmp.path(), 1, 0), cache)
                .unwrap(),
        );

        let mut iter = SstIterator::new(table, 0).unwrap();
        let mut got = Vec::new();
        while iter.is_valid() {
            got.push((iter.key().to_vec(), iter.value().to_vec()));
            iter.next().unwrap();
        }
        assert_eq!(
            got,
            vec![
                (b"a".to_vec(), b"newest".to_vec()),
                (b"b".to_vec(), b"only".to_vec()),
            ]
        );
    }
}
