// ============================================================
// Layer 4 — Shard-Backed Dataset
// ============================================================
// Exposes one split of the encoding cache as a Burn Dataset.
//
// Item i is shard pair i in numeric index order, loaded from
// disk on every access (no in-memory cache). A classification
// item is a whole cached batch; a captioning item is one clip.
//
// Burn's Dataset::get can only say "nothing here", so a pair
// that fails to load is logged with its cause and reported as
// None; the epoch loader turns that into a hard error.
//
// Reference: Burn Book §4 (Datasets)

use anyhow::Result;
use burn::data::dataset::Dataset;
use std::{marker::PhantomData, path::PathBuf};

use crate::data::shard::{ShardPair, ShardRecord, ShardStore};
use crate::domain::model_type::Split;

pub struct ShardDataset<R> {
    store:   ShardStore,
    split:   Split,
    pairs:   Vec<ShardPair>,
    _record: PhantomData<fn() -> R>,
}

impl<R: ShardRecord> ShardDataset<R> {
    /// Discover the pairs of `split` under `root`. Fails on count or
    /// index mismatches between x and y files.
    pub fn new(root: impl Into<PathBuf>, split: Split) -> Result<Self> {
        let store = ShardStore::open(root);
        let pairs = store.pairs(split)?;
        tracing::info!(
            "Found {} {} shard pairs in '{}'",
            pairs.len(),
            split,
            store.dir().display()
        );
        Ok(Self { store, split, pairs, _record: PhantomData })
    }

    /// Load item `index`, keeping the error.
    pub fn load(&self, index: usize) -> Result<R> {
        let pair = self.pairs.get(index).ok_or_else(|| {
            anyhow::anyhow!("{} shard index {index} out of range ({})", self.split, self.pairs.len())
        })?;
        self.store.read(pair)
    }
}

impl<R: ShardRecord> Dataset<R> for ShardDataset<R> {
    fn get(&self, index: usize) -> Option<R> {
        if index >= self.pairs.len() {
            return None;
        }
        match self.load(index) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::error!("Failed to load {} shard {}: {:#}", self.split, index, err);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.pairs.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::shard::ShardRole;
    use crate::domain::clip::ClsSample;
    use crate::domain::tensor::HostTensor;
    use std::fs;

    fn write_batches(store: &ShardStore, split: Split, sizes: &[usize]) {
        for (i, &rows) in sizes.iter().enumerate() {
            let sample = ClsSample::new(
                HostTensor::f32(vec![rows, 2], vec![i as f32; rows * 2]).unwrap(),
                HostTensor::f32(vec![rows, 3], vec![1.0; rows * 3]).unwrap(),
            )
            .unwrap();
            store.write(split, i, sample).unwrap();
        }
    }

    #[test]
    fn test_len_matches_file_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path());
        write_batches(&store, Split::Train, &[16, 16, 2]);
        write_batches(&store, Split::Val, &[8]);

        let train = ShardDataset::<ClsSample>::new(dir.path(), Split::Train).unwrap();
        let val = ShardDataset::<ClsSample>::new(dir.path(), Split::Val).unwrap();
        assert_eq!(train.len(), 3);
        assert_eq!(val.len(), 1);

        let sizes: Vec<usize> = (0..3).map(|i| train.get(i).unwrap().len()).collect();
        assert_eq!(sizes, vec![16, 16, 2]);
    }

    #[test]
    fn test_items_follow_numeric_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path());
        write_batches(&store, Split::Train, &[1; 11]);

        let ds = ShardDataset::<ClsSample>::new(dir.path(), Split::Train).unwrap();
        let firsts: Vec<f32> = (0..ds.len())
            .map(|i| ds.get(i).unwrap().x.as_f32().unwrap()[0])
            .collect();
        assert_eq!(firsts, (0..11).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_mismatched_counts_refuse_construction() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path());
        write_batches(&store, Split::Train, &[4, 4]);
        fs::remove_file(store.path_of(Split::Train, ShardRole::X, 0)).unwrap();

        assert!(ShardDataset::<ClsSample>::new(dir.path(), Split::Train).is_err());
    }

    #[test]
    fn test_unreadable_item_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path());
        write_batches(&store, Split::Train, &[4]);
        let ds = ShardDataset::<ClsSample>::new(dir.path(), Split::Train).unwrap();

        fs::write(store.path_of(Split::Train, ShardRole::Y, 0), b"junk").unwrap();
        assert!(ds.get(0).is_none());
        assert!(ds.get(5).is_none());
    }
}
