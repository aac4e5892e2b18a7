//! Full compaction: merge a level into the one below it.
//!
//! Level 0 tables overlap, so L0 → L1 merges a heap over every L0 table
//! (newest table winning each key) with a concat cursor over L1. Deeper
//! levels are key-disjoint on both sides, so Lx → Lx+1 merges two concat
//! cursors. The upper (newer) level always takes the left side of the
//! merge and wins ties.
//!
//! Compaction deduplicates keys to their newest version but **never**
//! drops tombstones, at any level — a deletion must keep shadowing older
//! versions that may still exist deeper down or reappear through
//! recovery.
//!
//! The caller holds the level-map lock exclusively for the whole pass,
//! so readers observe the old and the new table sets atomically.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{info, warn};

use crate::iterators::{ConcatIterator, HeapIterator, SearchItem, StorageIterator, TwoMergeIterator};
use crate::sstable::{sst_path, SsTable, SsTableBuilder, SstIterator};

use super::{Engine, EngineError, LevelState};

impl Engine {
    /// Compacts `level` into `level + 1`, first making room below if the
    /// next level is itself at the ratio threshold.
    pub(crate) fn full_compact(
        &self,
        state: &mut LevelState,
        level: usize,
    ) -> Result<(), EngineError> {
        let next_level = level + 1;
        if state.ids(next_level).len() >= self.config.level_ratio {
            self.full_compact(state, next_level)?;
        }

        if state.ids(level).is_empty() {
            return Ok(());
        }

        if level == 0 {
            self.compact_l0(state)
        } else {
            self.compact_disjoint(state, level)
        }
    }

    /// L0 → L1: the only merge that must reconcile overlapping tables.
    fn compact_l0(&self, state: &mut LevelState) -> Result<(), EngineError> {
        let upper_ids: Vec<u64> = state.ids(0).iter().copied().collect();
        let lower_ids: Vec<u64> = state.ids(1).iter().copied().collect();

        // Heap over every L0 entry; -(sst_id) tags make the newest table
        // win each key.
        let mut items: Vec<SearchItem> = Vec::new();
        for &sst_id in &upper_ids {
            let table = state.table(sst_id)?;
            let mut iter = SstIterator::new(Arc::clone(table), 0)?;
            while iter.is_valid() {
                items.push(SearchItem {
                    key: iter.key().to_vec(),
                    value: iter.value().to_vec(),
                    txn_id: iter.txn_id(),
                    idx: -(sst_id as i64),
                    level: 0,
                });
                iter.next()?;
            }
        }
        let upper = HeapIterator::new(items, 0);
        let lower = self.concat_over(state, &lower_ids)?;

        let mut merged = TwoMergeIterator::new(upper, lower)?;
        let new_tables = self.rewrite_run(&mut merged, 1, state)?;

        self.swap_levels(state, 0, &upper_ids, 1, &lower_ids, new_tables);
        Ok(())
    }

    /// Lx → Lx+1 for x ≥ 1: both sides are key-disjoint runs.
    fn compact_disjoint(&self, state: &mut LevelState, level: usize) -> Result<(), EngineError> {
        let upper_ids: Vec<u64> = state.ids(level).iter().copied().collect();
        let lower_ids: Vec<u64> = state.ids(level + 1).iter().copied().collect();

        let upper = self.concat_over(state, &upper_ids)?;
        let lower = self.concat_over(state, &lower_ids)?;

        let mut merged = TwoMergeIterator::new(upper, lower)?;
        let new_tables = self.rewrite_run(&mut merged, level + 1, state)?;

        self.swap_levels(state, level, &upper_ids, level + 1, &lower_ids, new_tables);
        Ok(())
    }

    fn concat_over(
        &self,
        state: &LevelState,
        ids: &[u64],
    ) -> Result<ConcatIterator, EngineError> {
        let mut tables = Vec::with_capacity(ids.len());
        for &sst_id in ids {
            tables.push(Arc::clone(state.table(sst_id)?));
        }
        Ok(ConcatIterator::new(tables, 0)?)
    }

    /// Streams a merged cursor into new tables at `target_level`, sealing
    /// an output SST whenever the staged bytes reach the level's target
    /// size (`per_mem_limit × level_ratio^level`).
    fn rewrite_run(
        &self,
        merged: &mut impl StorageIterator,
        target_level: usize,
        state: &mut LevelState,
    ) -> Result<Vec<Arc<SsTable>>, EngineError> {
        let target_size = self.sst_size_for(target_level);
        let mut out = Vec::new();
        let mut builder = SsTableBuilder::new(&self.config);

        while merged.is_valid() {
            builder.add(merged.key(), merged.value(), merged.txn_id())?;
            merged.next()?;

            if builder.estimated_size() >= target_size {
                let full = std::mem::replace(&mut builder, SsTableBuilder::new(&self.config));
                out.push(self.build_one(full, target_level, state)?);
            }
        }
        if !builder.is_empty() {
            out.push(self.build_one(builder, target_level, state)?);
        }
        Ok(out)
    }

    fn build_one(
        &self,
        builder: SsTableBuilder,
        target_level: usize,
        state: &mut LevelState,
    ) -> Result<Arc<SsTable>, EngineError> {
        let sst_id = state.next_sst_id;
        state.next_sst_id += 1;
        let path = sst_path(&self.data_dir, sst_id, target_level);
        let table = builder.build(sst_id, target_level, path, Arc::clone(&self.cache))?;
        Ok(Arc::new(table))
    }

    /// Retires both input runs and publishes the output run, keeping the
    /// target level sorted by first key.
    fn swap_levels(
        &self,
        state: &mut LevelState,
        upper_level: usize,
        upper_ids: &[u64],
        lower_level: usize,
        lower_ids: &[u64],
        new_tables: Vec<Arc<SsTable>>,
    ) {
        for &sst_id in upper_ids.iter().chain(lower_ids) {
            if let Some(table) = state.ssts.remove(&sst_id) {
                if let Err(e) = table.del_sst() {
                    warn!(sst_id, error = %e, "failed to delete compacted SST");
                }
            }
        }
        state.level_sst_ids.insert(upper_level, VecDeque::new());

        // The merged stream was key-ordered, so the new run already is.
        let new_ids: VecDeque<u64> = new_tables.iter().map(|table| table.sst_id()).collect();
        info!(
            from_level = upper_level,
            to_level = lower_level,
            retired = upper_ids.len() + lower_ids.len(),
            produced = new_ids.len(),
            "compaction complete"
        );
        for table in new_tables {
            state.ssts.insert(table.sst_id(), table);
        }
        state.level_sst_ids.insert(lower_level, new_ids);
        state.cur_max_level = state.cur_max_level.max(lower_level);
    }

    fn sst_size_for(&self, level: usize) -> usize {
        self.config
            .per_mem_limit
            .saturating_mul(self.config.level_ratio.saturating_pow(level as u32))
    }
}
