// Normalization statistics: per-feature-row mean and standard deviation
//
// Statistics are accumulated in f64 over every column of every record, in a
// single pass, then reduced to f32 for storage and use:
//
//   mean = sum / n
//   var  = sq_sum / n - mean^2
//   std  = sqrt(max(var, 0) + 1e-8)
//
// The epsilon floor keeps std strictly positive, so normalizing never divides
// by zero and cancellation in `var` never produces a NaN root.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::info;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use serde::{Deserialize, Serialize};

use spectrofeed_core::{encode_le, Error, Result, WithDType};

use crate::store::RecordStore;

/// Variance floor added before the square root.
pub const STD_EPSILON: f64 = 1.0e-8;

/// How the streaming pass accumulates the two moments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimator {
    /// Running sum and sum of squares.
    #[default]
    TwoMoment,
    /// Per-record mean/M2 merged pairwise (Chan et al.); robust to large offsets.
    Welford,
}

/// Per-row normalization statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct NormStats {
    mean: Array1<f32>,
    std: Array1<f32>,
}

impl NormStats {
    /// Build statistics from explicit vectors.
    ///
    /// Both vectors must have the same length, every value must be finite and
    /// every std must be positive.
    pub fn new(mean: Array1<f32>, std: Array1<f32>) -> Result<Self> {
        if mean.len() != std.len() {
            return Err(Error::NormLength {
                which: "std",
                expected: mean.len(),
                got: std.len(),
            });
        }
        if let Some((row, &value)) = mean.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(Error::InvalidNorm {
                which: "mean",
                row,
                value,
            });
        }
        if let Some((row, &value)) = std
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v <= 0.0)
        {
            return Err(Error::InvalidNorm {
                which: "std",
                row,
                value,
            });
        }
        Ok(Self { mean, std })
    }

    /// Mean 0, std 1 for every row: normalizing leaves values unchanged.
    pub fn identity(rows: usize) -> Self {
        Self {
            mean: Array1::zeros(rows),
            std: Array1::ones(rows),
        }
    }

    pub fn mean(&self) -> &Array1<f32> {
        &self.mean
    }

    pub fn std(&self) -> &Array1<f32> {
        &self.std
    }

    /// Number of feature rows these statistics cover.
    pub fn rows(&self) -> usize {
        self.mean.len()
    }

    /// Consume into `(mean, std)`.
    pub fn into_parts(self) -> (Array1<f32>, Array1<f32>) {
        (self.mean, self.std)
    }

    /// Normalize `matrix` in place: `(x - mean[r]) / std[r]` for every row `r`.
    pub fn apply(&self, matrix: &mut Array2<f32>) -> Result<()> {
        if matrix.nrows() != self.rows() {
            return Err(Error::NormLength {
                which: "mean",
                expected: matrix.nrows(),
                got: self.rows(),
            });
        }
        for (mut row, (&m, &s)) in matrix
            .axis_iter_mut(Axis(0))
            .zip(self.mean.iter().zip(self.std.iter()))
        {
            row.mapv_inplace(|x| (x - m) / s);
        }
        Ok(())
    }

    /// Save as a safetensors file holding F32 tensors `mean` and `std`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mean = encode_le(&self.mean.to_vec());
        let std = encode_le(&self.std.to_vec());
        let tensors = vec![
            f32_view("mean", self.rows(), &mean)?,
            f32_view("std", self.rows(), &std)?,
        ];

        let mut metadata = HashMap::new();
        metadata.insert("format".to_string(), "spectrofeed-norm".to_string());
        safetensors::serialize_to_file(tensors, &Some(metadata), path)
            .map_err(|e| Error::Store(format!("{}: {e:?}", path.display())))
    }

    /// Load statistics written by [`NormStats::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let buffer = fs::read(path)?;
        let tensors = SafeTensors::deserialize(&buffer)
            .map_err(|e| Error::Store(format!("{}: {e:?}", path.display())))?;

        let read = |name: &str| -> Result<Array1<f32>> {
            let view = tensors
                .tensor(name)
                .map_err(|e| Error::Store(format!("{}: {name}: {e:?}", path.display())))?;
            if view.dtype() != Dtype::F32 {
                return Err(Error::UnsupportedDType {
                    name: name.to_string(),
                    dtype: format!("{:?}", view.dtype()),
                });
            }
            Ok(view.data().chunks_exact(4).map(f32::from_le).collect())
        };

        Self::new(read("mean")?, read("std")?)
    }
}

fn f32_view<'a>(name: &str, len: usize, bytes: &'a [u8]) -> Result<(String, TensorView<'a>)> {
    TensorView::new(Dtype::F32, vec![len], bytes)
        .map(|v| (name.to_string(), v))
        .map_err(|e| Error::Store(format!("{name}: {e:?}")))
}

// Accumulators

/// One streaming pass over feature matrices.
trait Accumulate {
    /// Fold in one `[F, T]` matrix.
    fn push(&mut self, matrix: ArrayView2<'_, f32>);
    /// Total columns folded in so far.
    fn count(&self) -> u64;
    /// Per-row mean and (population) variance.
    fn moments(&self) -> (Array1<f64>, Array1<f64>);
}

struct TwoMoment {
    sum: Array1<f64>,
    sq_sum: Array1<f64>,
    count: u64,
}

impl TwoMoment {
    fn new(rows: usize) -> Self {
        Self {
            sum: Array1::zeros(rows),
            sq_sum: Array1::zeros(rows),
            count: 0,
        }
    }
}

impl Accumulate for TwoMoment {
    fn push(&mut self, matrix: ArrayView2<'_, f32>) {
        for (r, row) in matrix.axis_iter(Axis(0)).enumerate() {
            for &x in row {
                let x = x.to_f64();
                self.sum[r] += x;
                self.sq_sum[r] += x * x;
            }
        }
        self.count += matrix.ncols() as u64;
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn moments(&self) -> (Array1<f64>, Array1<f64>) {
        let n = self.count as f64;
        let mean = &self.sum / n;
        let var = &self.sq_sum / n - &mean * &mean;
        (mean, var)
    }
}

struct Welford {
    mean: Array1<f64>,
    m2: Array1<f64>,
    count: u64,
}

impl Welford {
    fn new(rows: usize) -> Self {
        Self {
            mean: Array1::zeros(rows),
            m2: Array1::zeros(rows),
            count: 0,
        }
    }
}

impl Accumulate for Welford {
    fn push(&mut self, matrix: ArrayView2<'_, f32>) {
        let n_b = matrix.ncols() as u64;
        if n_b == 0 {
            return;
        }
        let n_a = self.count as f64;
        let n_bf = n_b as f64;
        let n = n_a + n_bf;

        for (r, row) in matrix.axis_iter(Axis(0)).enumerate() {
            let mean_b = row.iter().map(|&x| x.to_f64()).sum::<f64>() / n_bf;
            let m2_b = row
                .iter()
                .map(|&x| {
                    let d = x.to_f64() - mean_b;
                    d * d
                })
                .sum::<f64>();

            let delta = mean_b - self.mean[r];
            self.mean[r] += delta * n_bf / n;
            self.m2[r] += m2_b + delta * delta * n_a * n_bf / n;
        }
        self.count += n_b;
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn moments(&self) -> (Array1<f64>, Array1<f64>) {
        (self.mean.clone(), &self.m2 / self.count as f64)
    }
}

/// Compute statistics over the records named by `keys`, reading each once.
///
/// Every record must have exactly `rows` feature rows. Fails with
/// [`Error::EmptyDataset`] when there are no keys or no columns at all.
pub fn compute_stats<S: RecordStore + ?Sized>(
    store: &S,
    keys: &[String],
    rows: usize,
    estimator: Estimator,
) -> Result<NormStats> {
    if keys.is_empty() {
        return Err(Error::EmptyDataset);
    }

    let mut acc: Box<dyn Accumulate> = match estimator {
        Estimator::TwoMoment => Box::new(TwoMoment::new(rows)),
        Estimator::Welford => Box::new(Welford::new(rows)),
    };

    for key in keys {
        let matrix = store.feature(key)?;
        if matrix.nrows() != rows {
            return Err(Error::FeatureRows {
                key: key.clone(),
                expected: rows,
                got: matrix.nrows(),
            });
        }
        acc.push(matrix.view());
    }

    if acc.count() == 0 {
        return Err(Error::EmptyDataset);
    }

    let (mean, var) = acc.moments();
    // Non-finite input must surface as NaN here so `NormStats::new` rejects it.
    let std = var.mapv(|v| {
        if v.is_finite() {
            (v.max(0.0) + STD_EPSILON).sqrt()
        } else {
            f64::NAN
        }
    });
    let stats = NormStats::new(mean.mapv(|v| v as f32), std.mapv(|v| v as f32))?;

    info!(
        "computed normalization statistics over {} records ({} columns, {:?})",
        keys.len(),
        acc.count(),
        estimator
    );

    Ok(stats)
}
