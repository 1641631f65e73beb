// Batch assembly: fetch, normalize, truncate/pad and stack records
//
// Every batch has the same shape:
//
//   features  [batch_size, F, T_max, channels]   f32, zero-filled
//   labels    [batch_size, num_classes]          f32 one-hot
//
// Record i of the key slice lands at sample slot i, left-aligned on the time
// axis. Records longer than T_max keep their first T_max frames; shorter ones
// leave the remaining frames at zero. A partial last batch leaves its trailing
// slots as zero features and all-zero label rows; `Batch::valid` says how
// many leading slots are real.

use std::marker::PhantomData;

use log::debug;
use ndarray::{s, Array2, Array4, Axis};

use spectrofeed_core::{bail, Error, Result, Shape};

use crate::label::LabelSet;
use crate::stats::NormStats;
use crate::store::RecordStore;

/// Number of batches needed to cover `total` records: `ceil(total / batch_size)`.
pub fn batch_count(total: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    total.div_ceil(batch_size)
}

/// One fixed-shape batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Normalized features, `[batch_size, F, T_max, channels]`.
    pub features: Array4<f32>,
    /// One-hot labels, `[batch_size, num_classes]`.
    pub labels: Array2<f32>,
    /// Number of leading slots that hold real records.
    pub valid: usize,
    /// Keys of the real records, in slot order.
    pub keys: Vec<String>,
}

impl Batch {
    /// Leading dimension (always the configured batch size).
    pub fn batch_size(&self) -> usize {
        self.features.len_of(Axis(0))
    }

    /// Whether some trailing slots are padding.
    pub fn is_partial(&self) -> bool {
        self.valid < self.batch_size()
    }

    /// `true` for real slots, `false` for padding slots.
    pub fn mask(&self) -> Vec<bool> {
        (0..self.batch_size()).map(|i| i < self.valid).collect()
    }

    /// Shape of the feature tensor.
    pub fn feature_shape(&self) -> Shape {
        Shape::from(self.features.shape())
    }
}

/// Builds [`Batch`]es of a fixed shape from a record store.
#[derive(Debug, Clone)]
pub struct BatchAssembler<L: LabelSet> {
    batch_size: usize,
    rows: usize,
    max_frames: usize,
    channels: usize,
    _labels: PhantomData<L>,
}

impl<L: LabelSet> BatchAssembler<L> {
    pub fn new(batch_size: usize, rows: usize, max_frames: usize, channels: usize) -> Self {
        Self {
            batch_size,
            rows,
            max_frames,
            channels,
            _labels: PhantomData,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Assemble one batch from up to `batch_size` keys.
    pub fn assemble<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        keys: &[String],
        stats: &NormStats,
    ) -> Result<Batch> {
        if keys.len() > self.batch_size {
            bail!(
                "{} keys do not fit in a batch of {}",
                keys.len(),
                self.batch_size
            );
        }
        if stats.rows() != self.rows {
            return Err(Error::NormLength {
                which: "mean",
                expected: self.rows,
                got: stats.rows(),
            });
        }

        let mut features =
            Array4::<f32>::zeros((self.batch_size, self.rows, self.max_frames, self.channels));
        let mut labels = Array2::<f32>::zeros((self.batch_size, L::NUM_CLASSES));

        for (slot, key) in keys.iter().enumerate() {
            let matrix = store.feature(key)?;
            let label = L::decode(key, store.label(key)?)?;

            if matrix.nrows() != self.rows {
                return Err(Error::FeatureRows {
                    key: key.clone(),
                    expected: self.rows,
                    got: matrix.nrows(),
                });
            }

            let frames = matrix.ncols().min(self.max_frames);
            if matrix.ncols() > self.max_frames {
                debug!(
                    "record {key}: truncating {} frames to {}",
                    matrix.ncols(),
                    self.max_frames
                );
            }

            let mut window = matrix.slice(s![.., ..frames]).to_owned();
            stats.apply(&mut window)?;

            let mut sample = features.slice_mut(s![slot, .., ..frames, ..]);
            for mut channel in sample.axis_iter_mut(Axis(2)) {
                channel.assign(&window);
            }

            label.write_one_hot(labels.row_mut(slot));
        }

        Ok(Batch {
            features,
            labels,
            valid: keys.len(),
            keys: keys.to_vec(),
        })
    }
}
