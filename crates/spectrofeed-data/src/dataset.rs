// BatchDataset: indexed batches over a record store, with epoch control

use std::path::Path;

use log::{debug, info};
use ndarray::Array1;

use spectrofeed_core::{Error, Result};

use crate::assembler::{batch_count, Batch, BatchAssembler};
use crate::config::BatchConfig;
use crate::label::{AscLabel, LabelSet};
use crate::registry::KeyRegistry;
use crate::safetensors_store::SafetensorsStore;
use crate::stats::{compute_stats, NormStats};
use crate::store::RecordStore;

/// Whether epochs reshuffle the record order. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochMode {
    Sequential,
    Shuffled,
}

/// Serves fixed-shape, normalized batches of a record store by index.
///
/// A training loop asks for [`len`](BatchDataset::len), requests batches
/// `0..len()` through [`get_item`](BatchDataset::get_item), and calls
/// [`on_epoch_end`](BatchDataset::on_epoch_end) between epochs.
///
/// Normalization statistics must be available before the first batch:
/// compute them on the training split with
/// [`compute_norm`](BatchDataset::compute_norm), then hand them to
/// evaluation splits with [`get_norm`](BatchDataset::get_norm) /
/// [`set_norm`](BatchDataset::set_norm). Evaluation splits never compute
/// their own.
pub struct BatchDataset<S = SafetensorsStore, L = AscLabel>
where
    S: RecordStore,
    L: LabelSet,
{
    store: S,
    config: BatchConfig,
    registry: KeyRegistry,
    assembler: BatchAssembler<L>,
    stats: Option<NormStats>,
    mode: EpochMode,
    epoch: usize,
}

impl<L: LabelSet> BatchDataset<SafetensorsStore, L> {
    /// Open a safetensors record store at `path` and wrap it.
    pub fn open(path: impl AsRef<Path>, config: BatchConfig) -> Result<Self> {
        Self::new(SafetensorsStore::open(path)?, config)
    }
}

impl<S: RecordStore, L: LabelSet> BatchDataset<S, L> {
    /// Enumerate the store's keys and set up batching.
    ///
    /// With shuffling enabled the initial order is already shuffled.
    pub fn new(store: S, config: BatchConfig) -> Result<Self> {
        config.validate()?;

        let keys = store.keys()?;
        let mut registry = KeyRegistry::new(keys, config.seed);
        let mode = if config.shuffle {
            registry.shuffle();
            EpochMode::Shuffled
        } else {
            EpochMode::Sequential
        };

        let assembler = BatchAssembler::new(
            config.batch_size,
            config.rows(),
            config.max_frames(),
            config.n_channels,
        );

        info!(
            "dataset over {} ({} records, batch size {}, {:?})",
            store.name(),
            registry.size(),
            config.batch_size,
            mode
        );

        Ok(Self {
            store,
            config,
            registry,
            assembler,
            stats: None,
            mode,
            epoch: 0,
        })
    }

    /// The number of batches per epoch: `ceil(num_samples / batch_size)`.
    pub fn len(&self) -> usize {
        batch_count(self.registry.size(), self.config.batch_size)
    }

    /// Whether there are no batches at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of records.
    pub fn num_samples(&self) -> usize {
        self.registry.size()
    }

    /// Width of a one-hot label row.
    pub fn num_classes(&self) -> usize {
        L::NUM_CLASSES
    }

    /// Record keys in the current epoch order.
    pub fn keys(&self) -> &[String] {
        self.registry.keys()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn mode(&self) -> EpochMode {
        self.mode
    }

    /// Number of completed epochs.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Assemble batch `index` (0-based) from the current key order.
    pub fn get_item(&self, index: usize) -> Result<Batch> {
        let len = self.len();
        if index >= len {
            return Err(Error::BatchIndexOutOfRange { index, len });
        }
        let stats = self.stats.as_ref().ok_or(Error::NormalizationUnset)?;

        let bs = self.config.batch_size;
        let keys = self.registry.slice(index * bs..(index + 1) * bs);
        self.assembler.assemble(&self.store, keys, stats)
    }

    /// End-of-epoch hook: reshuffle when the dataset is in shuffled mode.
    pub fn on_epoch_end(&mut self) {
        self.epoch += 1;
        if self.mode == EpochMode::Shuffled {
            self.registry.shuffle();
        }
        debug!("epoch {} finished", self.epoch);
    }

    /// Compute normalization statistics over every record and keep them.
    pub fn compute_norm(&mut self) -> Result<()> {
        let stats = compute_stats(
            &self.store,
            self.registry.keys(),
            self.config.rows(),
            self.config.estimator,
        )?;
        self.stats = Some(stats);
        Ok(())
    }

    /// The current `(mean, std)` pair.
    pub fn get_norm(&self) -> Result<(Array1<f32>, Array1<f32>)> {
        self.stats
            .as_ref()
            .map(|s| (s.mean().clone(), s.std().clone()))
            .ok_or(Error::NormalizationUnset)
    }

    /// Adopt statistics computed elsewhere (typically on the training split).
    pub fn set_norm(&mut self, mean: Array1<f32>, std: Array1<f32>) -> Result<()> {
        self.set_norm_stats(NormStats::new(mean, std)?)
    }

    /// Current statistics, if any.
    pub fn norm_stats(&self) -> Option<&NormStats> {
        self.stats.as_ref()
    }

    /// Adopt a whole [`NormStats`]; its row count must match the feature dimension.
    pub fn set_norm_stats(&mut self, stats: NormStats) -> Result<()> {
        if stats.rows() != self.config.rows() {
            return Err(Error::NormLength {
                which: "mean",
                expected: self.config.rows(),
                got: stats.rows(),
            });
        }
        self.stats = Some(stats);
        Ok(())
    }

    /// Iterate over batches `0..len()` of the current epoch order.
    pub fn iter_epoch(&self) -> EpochIter<'_, S, L> {
        EpochIter {
            dataset: self,
            batch_idx: 0,
        }
    }
}

/// Iterator that yields one batch at a time.
pub struct EpochIter<'d, S: RecordStore, L: LabelSet> {
    dataset: &'d BatchDataset<S, L>,
    batch_idx: usize,
}

impl<'d, S: RecordStore, L: LabelSet> Iterator for EpochIter<'d, S, L> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch_idx >= self.dataset.len() {
            return None;
        }
        let batch = self.dataset.get_item(self.batch_idx);
        self.batch_idx += 1;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.dataset.len().saturating_sub(self.batch_idx);
        (remaining, Some(remaining))
    }
}

impl<'d, S: RecordStore, L: LabelSet> ExactSizeIterator for EpochIter<'d, S, L> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Record};
    use ndarray::Array2;

    fn store(n: usize, rows: usize, frames: usize) -> MemoryStore {
        MemoryStore::from_records(
            "unit",
            (0..n).map(|i| {
                let m = Array2::from_elem((rows, frames), i as f32);
                (format!("r{i:03}"), Record::new(m, (i % 5) as i64))
            }),
        )
    }

    fn plain(bs: usize, rows: usize, frames: usize) -> BatchConfig {
        BatchConfig::default()
            .batch_size(bs)
            .dim(rows, frames)
            .shuffle(false)
    }

    #[test]
    fn len_uses_ceiling_division() {
        let ds: BatchDataset<_> = BatchDataset::new(store(100, 2, 3), plain(64, 2, 3)).unwrap();
        assert_eq!(ds.len(), 2);
        let ds: BatchDataset<_> = BatchDataset::new(store(64, 2, 3), plain(64, 2, 3)).unwrap();
        assert_eq!(ds.len(), 1);
        let ds: BatchDataset<_> = BatchDataset::new(store(0, 2, 3), plain(64, 2, 3)).unwrap();
        assert_eq!(ds.len(), 0);
        assert!(ds.is_empty());
    }

    #[test]
    fn batch_before_norm_is_an_error() {
        let ds: BatchDataset<_> = BatchDataset::new(store(3, 2, 3), plain(2, 2, 3)).unwrap();
        assert!(matches!(
            ds.get_item(0).unwrap_err(),
            Error::NormalizationUnset
        ));
        assert!(matches!(
            ds.get_norm().unwrap_err(),
            Error::NormalizationUnset
        ));
    }

    #[test]
    fn out_of_range_index() {
        let mut ds: BatchDataset<_> = BatchDataset::new(store(3, 2, 3), plain(2, 2, 3)).unwrap();
        ds.compute_norm().unwrap();
        assert!(ds.get_item(1).is_ok());
        assert!(matches!(
            ds.get_item(2).unwrap_err(),
            Error::BatchIndexOutOfRange { index: 2, len: 2 }
        ));
    }

    #[test]
    fn sequential_mode_never_reorders() {
        let mut ds: BatchDataset<_> = BatchDataset::new(store(10, 1, 1), plain(4, 1, 1)).unwrap();
        let before = ds.keys().to_vec();
        ds.on_epoch_end();
        ds.on_epoch_end();
        assert_eq!(ds.keys(), before.as_slice());
        assert_eq!(ds.epoch(), 2);
        assert_eq!(ds.mode(), EpochMode::Sequential);
    }

    #[test]
    fn shuffled_mode_reorders_on_epoch_end() {
        let config = plain(8, 1, 1).shuffle(true).seed(17);
        let mut ds: BatchDataset<_> = BatchDataset::new(store(100, 1, 1), config).unwrap();
        let before = ds.keys().to_vec();
        ds.on_epoch_end();
        assert_ne!(ds.keys(), before.as_slice());

        let mut a = before.clone();
        let mut b = ds.keys().to_vec();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn set_norm_rejects_wrong_length() {
        let mut ds: BatchDataset<_> = BatchDataset::new(store(2, 3, 2), plain(2, 3, 2)).unwrap();
        let err = ds
            .set_norm(Array1::zeros(2), Array1::ones(2))
            .unwrap_err();
        assert!(matches!(err, Error::NormLength { expected: 3, got: 2, .. }));
    }

    #[test]
    fn iter_epoch_yields_len_batches() {
        let mut ds: BatchDataset<_> = BatchDataset::new(store(7, 2, 2), plain(3, 2, 2)).unwrap();
        ds.compute_norm().unwrap();
        let iter = ds.iter_epoch();
        assert_eq!(iter.len(), 3);
        let batches: Vec<Batch> = iter.collect::<Result<_>>().unwrap();
        let valid: Vec<usize> = batches.iter().map(|b| b.valid).collect();
        assert_eq!(valid, vec![3, 3, 1]);
    }
}
