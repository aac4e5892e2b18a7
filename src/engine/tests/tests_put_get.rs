#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::engine::tests::helpers::{memtable_only_config, tiny_config};
    use crate::engine::Engine;

    #[test]
    fn test_put_get_remove_round_trip() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"k".to_vec(), b"v1".to_vec(), 1).unwrap();
        assert_eq!(engine.get(b"k", 0).unwrap().unwrap(), b"v1");

        engine.put(b"k".to_vec(), b"v2".to_vec(), 2).unwrap();
        assert_eq!(engine.get(b"k", 0).unwrap().unwrap(), b"v2");

        engine.remove(b"k".to_vec(), 3).unwrap();
        assert!(engine.get(b"k", 0).unwrap().is_none());

        assert!(engine.get(b"absent", 0).unwrap().is_none());
    }

    #[test]
    fn test_snapshot_reads() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"k".to_vec(), b"v1".to_vec(), 10).unwrap();
        engine.put(b"k".to_vec(), b"v2".to_vec(), 20).unwrap();
        engine.remove(b"k".to_vec(), 30).unwrap();

        assert!(engine.get(b"k", 5).unwrap().is_none());
        assert_eq!(engine.get(b"k", 10).unwrap().unwrap(), b"v1");
        assert_eq!(engine.get(b"k", 19).unwrap().unwrap(), b"v1");
        assert_eq!(engine.get(b"k", 20).unwrap().unwrap(), b"v2");
        assert!(engine.get(b"k", 30).unwrap().is_none(), "tombstone visible");
        assert!(engine.get(b"k", 0).unwrap().is_none());
    }

    #[test]
    fn test_batch_operations() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine
            .put_batch(
                vec![
                    (b"a".to_vec(), b"1".to_vec()),
                    (b"b".to_vec(), b"2".to_vec()),
                    (b"c".to_vec(), b"3".to_vec()),
                ],
                1,
            )
            .unwrap();

        let got = engine
            .get_batch(&[b"a".to_vec(), b"missing".to_vec(), b"c".to_vec()], 0)
            .unwrap();
        assert_eq!(
            got,
            vec![Some(b"1".to_vec()), None, Some(b"3".to_vec())]
        );

        engine
            .remove_batch(vec![b"a".to_vec(), b"b".to_vec()], 2)
            .unwrap();
        assert!(engine.get(b"a", 0).unwrap().is_none());
        assert!(engine.get(b"b", 0).unwrap().is_none());
        assert_eq!(engine.get(b"c", 0).unwrap().unwrap(), b"3");
    }

    #[test]
    fn test_get_through_sst_layers() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), tiny_config()).unwrap();

        for i in 0..100u32 {
            engine
                .put(
                    format!("key{i:03}").into_bytes(),
                    format!("value{i}").into_bytes(),
                    i as u64 + 1,
                )
                .unwrap();
        }
        engine.flush_all().unwrap();

        let stats = engine.stats().unwrap();
        assert!(stats.level_sst_counts.iter().sum::<usize>() > 0);

        for i in 0..100u32 {
            assert_eq!(
                engine.get(format!("key{i:03}").as_bytes(), 0).unwrap().unwrap(),
                format!("value{i}").into_bytes(),
                "key{i:03} lost across flush"
            );
        }
    }

    #[test]
    fn test_tombstone_in_memtable_shadows_sst_value() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), memtable_only_config()).unwrap();

        engine.put(b"k".to_vec(), b"durable".to_vec(), 1).unwrap();
        engine.flush_all().unwrap();
        assert_eq!(engine.get(b"k", 0).unwrap().unwrap(), b"durable");

        // Tombstone only in the memtable; the SST still holds the value.
        engine.remove(b"k".to_vec(), 2).unwrap();
        assert!(engine.get(b"k", 0).unwrap().is_none());
    }

    #[test]
    fn test_clear_empties_everything() {
        let tmp = TempDir::new().unwrap();
        let engine = Engine::open(tmp.path(), tiny_config()).unwrap();

        for i in 0..50u32 {
            engine
                .put(format!("key{i}").into_bytes(), b"v".to_vec(), i as u64 + 1)
                .unwrap();
        }
        engine.flush_all().unwrap();
        engine.clear().unwrap();

        assert!(engine.get(b"key0", 0).unwrap().is_none());
        let stats = engine.stats().unwrap();
        assert_eq!(stats.memtable_bytes, 0);
        assert_eq!(stats.level_sst_counts.iter().sum::<usize>(), 0);

        // No SST files remain on disk.
        let sst_files = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("sst_"))
            .count();
        assert_eq!(sst_files, 0);
    }
}
