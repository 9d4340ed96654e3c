// ============================================================
// Layer 4 — Epoch Loader
// ============================================================
// Turns a Burn Dataset into an ordered stream of item batches.
//
//   dataset ──► index order ──► chunks of batch_size
//                  │                    │
//        (seeded shuffle per epoch)     ▼
//                              producer thread
//                    fetches each chunk's items in parallel
//                    on a rayon pool (order preserved)
//                                       │
//                       bounded channel (prefetch_factor)
//                                       │
//                                       ▼
//                              consumer: for batch in iter
//
// Items are returned untouched; turning them into tensors is
// the collate step's job. Batch boundaries follow the index
// order exactly (34 clips at batch 16 → 16, 16, 2), and an
// item whose get returns None fails the epoch.
//
// Reference: Burn Book §4 (Datasets and Dataloaders)
//            rayon documentation (ThreadPoolBuilder)

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::{
    sync::{mpsc, Arc},
    thread,
};

use crate::domain::error::PipelineError;

// ─── Configuration ────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size:      usize,
    /// Per-run shuffle seed; None keeps dataset order.
    pub shuffle_seed:    Option<u64>,
    pub drop_last:       bool,
    /// Threads fetching items; 0 fetches on the producer thread.
    pub num_workers:     usize,
    /// Batches buffered ahead of the consumer (at least 1).
    pub prefetch_factor: usize,
}

impl LoaderConfig {
    /// Dataset order, keep the last partial batch.
    pub fn ordered(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle_seed:    None,
            drop_last:       false,
            num_workers:     0,
            prefetch_factor: 2,
        }
    }

    pub fn shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn prefetch_factor(mut self, pf: usize) -> Self {
        self.prefetch_factor = pf;
        self
    }
}

// ─── EpochLoader ──────────────────────────────────────────────────────────────
pub struct EpochLoader<I> {
    dataset: Arc<dyn Dataset<I>>,
    config:  LoaderConfig,
    pool:    Option<Arc<rayon::ThreadPool>>,
}

impl<I: Send + 'static> EpochLoader<I> {
    pub fn new(dataset: Arc<dyn Dataset<I>>, config: LoaderConfig) -> Result<Self> {
        anyhow::ensure!(config.batch_size > 0, "batch size must be positive");

        let pool = if config.num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_workers)
                .thread_name(|i| format!("loader-{i}"))
                .build()
                .context("Cannot start loader worker pool")?;
            Some(Arc::new(pool))
        } else {
            None
        };

        Ok(Self { dataset, config, pool })
    }

    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    pub fn num_batches(&self) -> usize {
        let len = self.dataset.len();
        if self.config.drop_last {
            len / self.config.batch_size
        } else {
            len.div_ceil(self.config.batch_size)
        }
    }

    /// Index order of one epoch. Reshuffled per epoch from the seed, so two
    /// loaders with the same seed agree epoch by epoch.
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(seed) = self.config.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            order.shuffle(&mut rng);
        }
        order
    }

    fn epoch_chunks(&self, epoch: usize) -> Vec<Vec<usize>> {
        let batch_size = self.config.batch_size;
        self.epoch_order(epoch)
            .chunks(batch_size)
            .filter(|chunk| !self.config.drop_last || chunk.len() == batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Start producing the batches of `epoch`.
    pub fn iter(&self, epoch: usize) -> BatchIter<I> {
        let chunks = self.epoch_chunks(epoch);
        let (tx, rx) = mpsc::sync_channel(self.config.prefetch_factor.max(1));
        let dataset = Arc::clone(&self.dataset);
        let pool = self.pool.clone();

        let worker = thread::spawn(move || {
            for indices in chunks {
                let batch = fetch_batch(dataset.as_ref(), &indices, pool.as_deref());
                let failed = batch.is_err();
                // consumer gone: stop quietly
                if tx.send(batch).is_err() || failed {
                    break;
                }
            }
        });

        BatchIter { rx: Some(rx), worker: Some(worker) }
    }
}

fn fetch_batch<I: Send>(
    dataset: &dyn Dataset<I>,
    indices: &[usize],
    pool:    Option<&rayon::ThreadPool>,
) -> Result<Vec<I>> {
    let len = dataset.len();
    let fetch = |&index: &usize| dataset.get(index).ok_or(PipelineError::MissingItem { index, len });

    let items: Result<Vec<I>, PipelineError> = match pool {
        Some(pool) => pool.install(|| indices.par_iter().map(fetch).collect()),
        None => indices.iter().map(fetch).collect(),
    };
    Ok(items?)
}

/// Batches of one epoch, in order. Stops after the first error.
pub struct BatchIter<I> {
    rx:     Option<mpsc::Receiver<Result<Vec<I>>>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl<I> Iterator for BatchIter<I> {
    type Item = Result<Vec<I>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl<I> Drop for BatchIter<I> {
    fn drop(&mut self) {
        // closing the channel first unblocks a producer waiting on send
        self.rx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataset::InMemDataset;

    fn numbers(n: usize) -> Arc<dyn Dataset<usize>> {
        Arc::new(InMemDataset::new((0..n).collect::<Vec<_>>()))
    }

    /// Dataset whose item 3 cannot be loaded.
    struct Holey;

    impl Dataset<usize> for Holey {
        fn get(&self, index: usize) -> Option<usize> {
            (index != 3).then_some(index)
        }

        fn len(&self) -> usize {
            6
        }
    }

    #[test]
    fn test_ordered_batches_keep_partial_tail() {
        let loader = EpochLoader::new(numbers(34), LoaderConfig::ordered(16)).unwrap();
        let sizes: Vec<usize> = loader.iter(0).map(|b| b.unwrap().len()).collect();
        assert_eq!(sizes, vec![16, 16, 2]);
        assert_eq!(loader.num_batches(), 3);
    }

    #[test]
    fn test_parallel_fetch_preserves_order() {
        let config = LoaderConfig::ordered(5).num_workers(4).prefetch_factor(1);
        let loader = EpochLoader::new(numbers(23), config).unwrap();
        let flat: Vec<usize> = loader.iter(0).flat_map(|b| b.unwrap()).collect();
        assert_eq!(flat, (0..23).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_gives_same_shuffle() {
        let a = EpochLoader::new(numbers(50), LoaderConfig::ordered(8).shuffle(42)).unwrap();
        let b = EpochLoader::new(numbers(50), LoaderConfig::ordered(8).shuffle(42).num_workers(3)).unwrap();

        let seen_a: Vec<usize> = a.iter(1).flat_map(|batch| batch.unwrap()).collect();
        let seen_b: Vec<usize> = b.iter(1).flat_map(|batch| batch.unwrap()).collect();
        assert_eq!(seen_a, seen_b);
        assert_eq!(seen_a, a.epoch_order(1));
        assert_ne!(a.epoch_order(0), a.epoch_order(1));
        assert_ne!(a.epoch_order(0), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_different_seed_gives_different_shuffle() {
        let a = EpochLoader::new(numbers(50), LoaderConfig::ordered(8).shuffle(1)).unwrap();
        let b = EpochLoader::new(numbers(50), LoaderConfig::ordered(8).shuffle(2)).unwrap();
        assert_ne!(a.epoch_order(0), b.epoch_order(0));
    }

    #[test]
    fn test_drop_last() {
        let loader = EpochLoader::new(numbers(34), LoaderConfig::ordered(16).drop_last(true)).unwrap();
        assert_eq!(loader.num_batches(), 2);
        assert_eq!(loader.iter(0).count(), 2);
    }

    #[test]
    fn test_missing_item_fails_the_epoch() {
        let loader = EpochLoader::new(Arc::new(Holey), LoaderConfig::ordered(2).num_workers(2)).unwrap();
        let results: Vec<Result<Vec<usize>>> = loader.iter(0).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingItem { index: 3, len: 6 })
        ));
    }

    #[test]
    fn test_dropping_iterator_early_does_not_hang() {
        let loader = EpochLoader::new(numbers(100), LoaderConfig::ordered(1).prefetch_factor(1)).unwrap();
        let mut iter = loader.iter(0);
        assert_eq!(iter.next().unwrap().unwrap(), vec![0]);
        drop(iter);
    }
}
