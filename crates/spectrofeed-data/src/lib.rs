//! # spectrofeed-data
//!
//! Record stores, normalization and fixed-shape batching for classification
//! training loops.
//!
//! This crate provides:
//! - [`RecordStore`] trait: read-only key-value store of labeled feature matrices
//! - [`MemoryStore`] / [`SafetensorsStore`]: in-memory and file-backed stores
//! - [`NormStats`]: per-row mean/std, computed in one streaming pass
//! - [`BatchDataset`]: indexed, normalized, truncated/padded batches with
//!   optional per-epoch reshuffling
//! - [`AscLabel`] / [`LabelSet`]: closed label mapping for one-hot targets
//
//   Typical use: compute statistics on the training split, copy them onto
//   the validation split, then iterate.
//
//     let mut train = BatchDataset::<_, AscLabel>::open("train.safetensors", config.clone())?;
//     train.compute_norm()?;
//     let mut valid = BatchDataset::<_, AscLabel>::open("valid.safetensors", config.shuffle(false))?;
//     let (mean, std) = train.get_norm()?;
//     valid.set_norm(mean, std)?;

pub mod assembler;
pub mod config;
pub mod dataset;
pub mod label;
pub mod registry;
pub mod safetensors_store;
pub mod stats;
pub mod store;

pub use assembler::{batch_count, Batch, BatchAssembler};
pub use config::BatchConfig;
pub use dataset::{BatchDataset, EpochIter, EpochMode};
pub use label::{AscLabel, LabelSet};
pub use registry::KeyRegistry;
pub use safetensors_store::{write_records, SafetensorsStore};
pub use stats::{compute_stats, Estimator, NormStats, STD_EPSILON};
pub use store::{MemoryStore, Record, RecordStore};
