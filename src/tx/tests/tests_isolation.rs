#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::tx::tests::helpers::fixture;
    use crate::tx::{IsolationLevel, TxState};

    #[test]
    fn test_own_writes_visible_before_commit() {
        let fx = fixture();
        let mut tx = fx
            .manager
            .begin(
                Arc::clone(&fx.engine),
                Arc::clone(&fx.wal),
                IsolationLevel::RepeatableRead,
            )
            .unwrap();

        tx.put(b"k".to_vec(), b"mine".to_vec()).unwrap();
        assert_eq!(tx.get(b"k").unwrap().unwrap(), b"mine");

        tx.remove(b"k".to_vec()).unwrap();
        assert!(tx.get(b"k").unwrap().is_none());
    }

    #[test]
    fn test_buffered_writes_invisible_until_commit() {
        let fx = fixture();
        let mut tx = fx
            .manager
            .begin(
                Arc::clone(&fx.engine),
                Arc::clone(&fx.wal),
                IsolationLevel::ReadCommitted,
            )
            .unwrap();

        tx.put(b"k".to_vec(), b"buffered".to_vec()).unwrap();
        assert!(
            fx.engine.get(b"k", 0).unwrap().is_none(),
            "buffered write leaked into the engine"
        );

        assert!(tx.commit().unwrap());
        assert_eq!(fx.engine.get(b"k", 0).unwrap().unwrap(), b"buffered");
    }

    #[test]
    fn test_read_uncommitted_writes_through() {
        let fx = fixture();
        let mut tx = fx
            .manager
            .begin(
                Arc::clone(&fx.engine),
                Arc::clone(&fx.wal),
                IsolationLevel::ReadUncommitted,
            )
            .unwrap();

        tx.put(b"k".to_vec(), b"dirty".to_vec()).unwrap();
        assert_eq!(
            fx.engine.get(b"k", 0).unwrap().unwrap(),
            b"dirty",
            "read-uncommitted writes hit the engine immediately"
        );

        assert!(tx.commit().unwrap());
        assert_eq!(fx.engine.get(b"k", 0).unwrap().unwrap(), b"dirty");
    }

    #[test]
    fn test_read_uncommitted_abort_restores_prior_state() {
        let fx = fixture();
        fx.engine.put(b"kept".to_vec(), b"orig".to_vec(), 1).unwrap();

        let mut tx = fx
            .manager
            .begin(
                Arc::clone(&fx.engine),
                Arc::clone(&fx.wal),
                IsolationLevel::ReadUncommitted,
            )
            .unwrap();
        tx.put(b"kept".to_vec(), b"dirty".to_vec()).unwrap();
        tx.put(b"fresh".to_vec(), b"dirty".to_vec()).unwrap();
        tx.remove(b"kept".to_vec()).unwrap();

        tx.abort().unwrap();
        assert_eq!(tx.state(), TxState::Aborted);

        assert_eq!(
            fx.engine.get(b"kept", 0).unwrap().unwrap(),
            b"orig",
            "overwritten key restored"
        );
        assert!(
            fx.engine.get(b"fresh", 0).unwrap().is_none(),
            "newly created key removed"
        );
    }

    #[test]
    fn test_repeatable_read_pins_first_answer() {
        let fx = fixture();
        let mut tx = fx
            .manager
            .begin(
                Arc::clone(&fx.engine),
                Arc::clone(&fx.wal),
                IsolationLevel::RepeatableRead,
            )
            .unwrap();

        // First read misses.
        assert!(tx.get(b"k").unwrap().is_none());

        // Another transaction commits the key.
        let mut other = fx
            .manager
            .begin(
                Arc::clone(&fx.engine),
                Arc::clone(&fx.wal),
                IsolationLevel::RepeatableRead,
            )
            .unwrap();
        other.put(b"k".to_vec(), b"v2".to_vec()).unwrap();
        assert!(other.commit().unwrap());

        // The pinned transaction still sees its first answer.
        assert!(tx.get(b"k").unwrap().is_none());
    }

    #[test]
    fn test_serializable_behaves_like_repeatable_read() {
        let fx = fixture();
        let mut tx = fx
            .manager
            .begin(
                Arc::clone(&fx.engine),
                Arc::clone(&fx.wal),
                IsolationLevel::Serializable,
            )
            .unwrap();
        assert!(tx.get(b"k").unwrap().is_none());

        let mut other = fx
            .manager
            .begin(
                Arc::clone(&fx.engine),
                Arc::clone(&fx.wal),
                IsolationLevel::Serializable,
            )
            .unwrap();
        other.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert!(other.commit().unwrap());

        assert!(tx.get(b"k").unwrap().is_none());
        tx.put(b"k".to_vec(), b"mine".to_vec()).unwrap();
        assert!(!tx.commit().unwrap(), "write conflict must abort");
    }

    #[test]
    fn test_operations_rejected_after_commit() {
        let fx = fixture();
        let mut tx = fx
            .manager
            .begin(
                Arc::clone(&fx.engine),
                Arc::clone(&fx.wal),
                IsolationLevel::ReadCommitted,
            )
            .unwrap();
        tx.put(b"k".to_vec(), b"v".to_vec()).unwrap();
        assert!(tx.commit().unwrap());

        assert!(tx.put(b"k2".to_vec(), b"v".to_vec()).is_err());
        assert!(tx.get(b"k").is_err());
        assert!(tx.commit().is_err());
    }

    #[test]
    fn test_active_set_tracking() {
        let fx = fixture();
        assert_eq!(fx.manager.active_count(), 0);

        let mut tx = fx
            .manager
            .begin(
                Arc::clone(&fx.engine),
                Arc::clone(&fx.wal),
                IsolationLevel::ReadCommitted,
            )
            .unwrap();
        assert_eq!(fx.manager.active_count(), 1);

        assert!(tx.commit().unwrap());
        assert_eq!(fx.manager.active_count(), 0);
        assert_eq!(fx.manager.max_finished(), tx.txn_id());
    }
}
