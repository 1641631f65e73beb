//! # spectrofeed-core
//!
//! Shared primitives for spectrofeed.
//!
//! This crate provides:
//! - [`Error`] / [`Result`]: the single error type used across the workspace
//! - [`Shape`]: dimension sizes of stored arrays and assembled batches
//! - [`DType`] / [`WithDType`]: element types a record store may hold

pub mod dtype;
pub mod error;
pub mod shape;

pub use dtype::{decode_le_as_f64, encode_le, DType, WithDType};
pub use error::{Error, Result};
pub use shape::Shape;
