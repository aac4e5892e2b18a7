use std::sync::Arc;

use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use crate::config::StoreConfig;
use crate::engine::Engine;
use crate::tx::TxManager;
use crate::wal::Wal;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A full transaction fixture: engine + WAL + manager over one temp dir.
pub struct TxFixture {
    pub _tmp: TempDir,
    pub engine: Arc<Engine>,
    pub wal: Arc<Wal>,
    pub manager: Arc<TxManager>,
}

pub fn fixture() -> TxFixture {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let config = StoreConfig {
        per_mem_limit: 1 << 20,
        total_mem_limit: 64 << 20,
        ..StoreConfig::default()
    };
    let engine = Arc::new(Engine::open(tmp.path(), config).unwrap());
    let wal = Arc::new(Wal::open(tmp.path(), 1 << 20).unwrap());
    let manager = Arc::new(TxManager::open(tmp.path()).unwrap());
    TxFixture {
        _tmp: tmp,
        engine,
        wal,
        manager,
    }
}
