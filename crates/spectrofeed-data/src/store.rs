// RecordStore trait: unified interface for any backing store

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::Array2;

use spectrofeed_core::{Error, Result};

/// A single record: a feature matrix and its raw integer label.
///
/// The matrix has one row per feature band (F) and one column per frame
/// (T_k, which varies between records).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Feature matrix, shape `[F, T_k]`.
    pub feature: Array2<f32>,
    /// Raw class label, checked against a `LabelSet` at batch time.
    pub label: i64,
}

impl Record {
    pub fn new(feature: Array2<f32>, label: i64) -> Self {
        Self { feature, label }
    }

    /// Number of feature rows (F).
    pub fn rows(&self) -> usize {
        self.feature.nrows()
    }

    /// Number of frames (T_k).
    pub fn frames(&self) -> usize {
        self.feature.ncols()
    }
}

/// A read-only key-value store of named records.
///
/// Each key names a record group holding a `feature` matrix and a `label`
/// scalar. Implementations are owned by a single dataset instance; two
/// datasets over the same file each open their own store.
pub trait RecordStore: Send {
    /// Every record key, once each, in the store's enumeration order.
    fn keys(&self) -> Result<Vec<String>>;

    /// Read the feature matrix of record `key`.
    fn feature(&self, key: &str) -> Result<Array2<f32>>;

    /// Read the raw label of record `key`.
    fn label(&self, key: &str) -> Result<i64>;

    /// Read both members of record `key`.
    fn record(&self, key: &str) -> Result<Record> {
        Ok(Record::new(self.feature(key)?, self.label(key)?))
    }

    /// Optional human-readable name.
    fn name(&self) -> &str {
        "store"
    }
}

impl<S: RecordStore + ?Sized> RecordStore for Box<S> {
    fn keys(&self) -> Result<Vec<String>> {
        (**self).keys()
    }

    fn feature(&self, key: &str) -> Result<Array2<f32>> {
        (**self).feature(key)
    }

    fn label(&self, key: &str) -> Result<i64> {
        (**self).label(key)
    }

    fn record(&self, key: &str) -> Result<Record> {
        (**self).record(key)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// MemoryStore: in-memory records keyed by name

/// A simple in-memory store backed by a sorted map.
///
/// Keys enumerate in lexicographic order, which is also the order a
/// [`SafetensorsStore`](crate::SafetensorsStore) reports them in.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: BTreeMap<String, Record>,
    store_name: String,
}

impl MemoryStore {
    pub fn new(name: &str) -> Self {
        Self {
            records: BTreeMap::new(),
            store_name: name.to_string(),
        }
    }

    /// Build a store from `(key, record)` pairs. Later duplicates replace earlier ones.
    pub fn from_records<K, I>(name: &str, records: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Record)>,
    {
        Self {
            records: records.into_iter().map(|(k, r)| (k.into(), r)).collect(),
            store_name: name.to_string(),
        }
    }

    /// Insert or replace a record.
    pub fn insert(&mut self, key: impl Into<String>, record: Record) -> Option<Record> {
        self.records.insert(key.into(), record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Persist every record to a safetensors store file at `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        crate::safetensors_store::write_records(
            path,
            self.records.iter().map(|(k, r)| (k.as_str(), r)),
        )
    }

    fn get(&self, key: &str) -> Result<&Record> {
        self.records
            .get(key)
            .ok_or_else(|| Error::UnknownKey(key.to_string()))
    }
}

impl RecordStore for MemoryStore {
    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.records.keys().cloned().collect())
    }

    fn feature(&self, key: &str) -> Result<Array2<f32>> {
        Ok(self.get(key)?.feature.clone())
    }

    fn label(&self, key: &str) -> Result<i64> {
        Ok(self.get(key)?.label)
    }

    fn record(&self, key: &str) -> Result<Record> {
        self.get(key).cloned()
    }

    fn name(&self) -> &str {
        &self.store_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sample_store() -> MemoryStore {
        MemoryStore::from_records(
            "tiny",
            vec![
                ("b", Record::new(array![[1.0, 2.0], [3.0, 4.0]], 1)),
                ("a", Record::new(array![[0.0], [0.5]], 0)),
            ],
        )
    }

    #[test]
    fn keys_are_sorted() {
        let store = sample_store();
        assert_eq!(store.keys().unwrap(), vec!["a", "b"]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.name(), "tiny");
    }

    #[test]
    fn record_members() {
        let store = sample_store();
        let rec = store.record("b").unwrap();
        assert_eq!(rec.rows(), 2);
        assert_eq!(rec.frames(), 2);
        assert_eq!(rec.label, 1);
        assert_eq!(store.label("a").unwrap(), 0);
    }

    #[test]
    fn unknown_key() {
        let store = sample_store();
        assert!(matches!(
            store.feature("zzz").unwrap_err(),
            Error::UnknownKey(k) if k == "zzz"
        ));
    }

    #[test]
    fn boxed_store_delegates() {
        let boxed: Box<dyn RecordStore> = Box::new(sample_store());
        assert_eq!(boxed.keys().unwrap().len(), 2);
        assert_eq!(boxed.name(), "tiny");
    }
}
