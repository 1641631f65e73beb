// SafetensorsStore: file-backed record store
//
// Records live in a single safetensors container. Each record key `k` is a
// group of two tensors:
//
//   k/feature   F32 or F64, shape [F, T_k]
//   k/label     I64, I32 or U8, scalar (shape [] or [1])
//
// The file is memory-mapped when the store is opened and the header is
// parsed once; individual tensors are paged in and decoded on access. Keys are reported
// in sorted order.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, info};
use memmap2::{Mmap, MmapOptions};
use ndarray::Array2;
use safetensors::tensor::{Metadata, TensorView};
use safetensors::{Dtype, SafeTensors};

use spectrofeed_core::{decode_le_as_f64, encode_le, DType, Error, Result, Shape, WithDType};

use crate::store::{Record, RecordStore};

/// Member name of the feature matrix inside a record group.
pub const FEATURE_MEMBER: &str = "feature";
/// Member name of the label scalar inside a record group.
pub const LABEL_MEMBER: &str = "label";

const HEADER_LEN_BYTES: usize = 8;

fn st_to_dtype(dtype: Dtype) -> Option<DType> {
    match dtype {
        Dtype::F32 => Some(DType::F32),
        Dtype::F64 => Some(DType::F64),
        Dtype::U8 => Some(DType::U8),
        Dtype::I32 => Some(DType::I32),
        Dtype::I64 => Some(DType::I64),
        _ => None,
    }
}

/// Split a tensor name `key/member` into its record key, if `member` is one we know.
fn record_key(tensor_name: &str) -> Option<&str> {
    let (key, member) = tensor_name.rsplit_once('/')?;
    (member == FEATURE_MEMBER || member == LABEL_MEMBER).then_some(key)
}

/// A read-only record store over a safetensors file.
pub struct SafetensorsStore {
    path: PathBuf,
    mmap: Mmap,
    metadata: Metadata,
    data_start: usize,
    keys: Vec<String>,
    store_name: String,
}

impl std::fmt::Debug for SafetensorsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetensorsStore")
            .field("path", &self.path)
            .field("records", &self.keys.len())
            .field("bytes", &self.mmap.len())
            .finish()
    }
}

impl SafetensorsStore {
    /// Open the store at `path`, failing fast if the file is missing or malformed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(Error::Store(format!("{}: empty file", path.display())));
        }
        // SAFETY: the store is read-only and the mapping lives as long as the store.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let (header_len, metadata) = SafeTensors::read_metadata(&mmap)
            .map_err(|e| Error::Store(format!("{}: {e:?}", path.display())))?;

        let mut keys: Vec<String> = metadata
            .tensors()
            .keys()
            .filter_map(|name| record_key(name))
            .map(str::to_string)
            .collect();
        keys.sort();
        keys.dedup();

        info!(
            "opened record store {} ({} records, {} bytes)",
            path.display(),
            keys.len(),
            mmap.len()
        );

        let store_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("safetensors")
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            metadata,
            data_start: HEADER_LEN_BYTES + header_len,
            keys,
            store_name,
        })
    }

    /// Path the store was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of record groups in the file.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Size of the mapped file in bytes.
    pub fn mapped_len(&self) -> usize {
        self.mmap.len()
    }

    /// Locate `key/member` and return its dtype, shape and raw bytes.
    fn member(&self, key: &str, member: &'static str) -> Result<(DType, Shape, &[u8])> {
        let name = format!("{key}/{member}");
        let info = match self.metadata.info(&name) {
            Some(info) => info,
            None if self.keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok() => {
                return Err(Error::MissingMember {
                    key: key.to_string(),
                    member,
                })
            }
            None => return Err(Error::UnknownKey(key.to_string())),
        };

        let dtype = st_to_dtype(info.dtype).ok_or_else(|| Error::UnsupportedDType {
            name: name.clone(),
            dtype: format!("{:?}", info.dtype),
        })?;

        let (start, end) = info.data_offsets;
        let bytes = self
            .mmap
            .get(self.data_start + start..self.data_start + end)
            .ok_or_else(|| {
                Error::Store(format!(
                    "{}: data of {name} lies outside the file",
                    self.path.display()
                ))
            })?;

        Ok((dtype, Shape::from(info.shape.as_slice()), bytes))
    }
}

impl RecordStore for SafetensorsStore {
    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.keys.clone())
    }

    fn feature(&self, key: &str) -> Result<Array2<f32>> {
        let (dtype, shape, bytes) = self.member(key, FEATURE_MEMBER)?;
        if !dtype.is_float() {
            return Err(Error::UnsupportedDType {
                name: format!("{key}/{FEATURE_MEMBER}"),
                dtype: dtype.to_string(),
            });
        }
        if shape.rank() != 2 {
            return Err(Error::RankMismatch {
                name: format!("{key}/{FEATURE_MEMBER}"),
                expected: 2,
                got: shape,
            });
        }

        let values: Vec<f32> = match dtype {
            DType::F32 => bytes
                .chunks_exact(4)
                .map(f32::from_le)
                .collect(),
            _ => decode_le_as_f64(bytes, dtype)?
                .into_iter()
                .map(|v| v as f32)
                .collect(),
        };
        let dims = shape.dims();
        Array2::from_shape_vec((dims[0], dims[1]), values).map_err(Error::store)
    }

    fn label(&self, key: &str) -> Result<i64> {
        let (dtype, shape, bytes) = self.member(key, LABEL_MEMBER)?;
        if !dtype.is_int() {
            return Err(Error::UnsupportedDType {
                name: format!("{key}/{LABEL_MEMBER}"),
                dtype: dtype.to_string(),
            });
        }
        if !shape.is_single() {
            return Err(Error::RankMismatch {
                name: format!("{key}/{LABEL_MEMBER}"),
                expected: 0,
                got: shape,
            });
        }
        let values = decode_le_as_f64(bytes, dtype)?;
        values
            .first()
            .map(|&v| v as i64)
            .ok_or_else(|| Error::Store(format!("{key}/{LABEL_MEMBER} holds no data")))
    }

    fn name(&self) -> &str {
        &self.store_name
    }
}

// Writing stores

/// Write `(key, record)` pairs as a safetensors store file.
///
/// Features are written as F32 `[F, T_k]`, labels as scalar I64.
pub fn write_records<'a, I>(path: impl AsRef<Path>, records: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a str, &'a Record)>,
{
    let path = path.as_ref();

    // Encoded bytes must outlive the views that borrow them.
    let mut encoded: Vec<(String, Dtype, Vec<usize>, Vec<u8>)> = Vec::new();
    for (key, record) in records {
        let feature: Vec<f32> = record.feature.iter().copied().collect();
        encoded.push((
            format!("{key}/{FEATURE_MEMBER}"),
            Dtype::F32,
            vec![record.rows(), record.frames()],
            encode_le(&feature),
        ));
        encoded.push((
            format!("{key}/{LABEL_MEMBER}"),
            Dtype::I64,
            vec![],
            encode_le(&[record.label]),
        ));
    }

    let views = encoded
        .iter()
        .map(|(name, dtype, shape, bytes)| {
            TensorView::new(*dtype, shape.clone(), bytes)
                .map(|view| (name.clone(), view))
                .map_err(|e| Error::Store(format!("{name}: {e:?}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut metadata = HashMap::new();
    metadata.insert("format".to_string(), "spectrofeed".to_string());

    safetensors::serialize_to_file(views, &Some(metadata), path)
        .map_err(|e| Error::Store(format!("{}: {e:?}", path.display())))?;

    debug!(
        "wrote {} records to {}",
        encoded.len() / 2,
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::fs;

    fn write_raw(path: &Path, tensors: Vec<(&str, Dtype, Vec<usize>, Vec<u8>)>) {
        let views: Vec<(String, TensorView<'_>)> = tensors
            .iter()
            .map(|(n, d, s, b)| (n.to_string(), TensorView::new(*d, s.clone(), b).unwrap()))
            .collect();
        safetensors::serialize_to_file(views, &None, path).unwrap();
    }

    #[test]
    fn record_key_parsing() {
        assert_eq!(record_key("dog_01/feature"), Some("dog_01"));
        assert_eq!(record_key("a/b/label"), Some("a/b"));
        assert_eq!(record_key("dog_01/other"), None);
        assert_eq!(record_key("nogroup"), None);
    }

    #[test]
    fn write_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.safetensors");
        let r0 = Record::new(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], 3);
        let r1 = Record::new(array![[7.0], [8.0]], 0);
        write_records(&path, vec![("z", &r0), ("m", &r1)]).unwrap();

        let store = SafetensorsStore::open(&path).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["m", "z"]);
        assert_eq!(store.name(), "train");
        assert_eq!(store.record("z").unwrap(), r0);
        assert_eq!(store.label("m").unwrap(), 0);
    }

    #[test]
    fn records_are_read_from_the_mapped_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("many.safetensors");
        let records: Vec<(String, Record)> = (0..20)
            .map(|i| {
                let m = Array2::from_shape_fn((3, 10 + i), |(r, t)| (i * 100 + r * 10 + t) as f32);
                (format!("rec_{i:02}"), Record::new(m, (i % 5) as i64))
            })
            .collect();
        write_records(&path, records.iter().map(|(k, r)| (k.as_str(), r))).unwrap();

        let store = SafetensorsStore::open(&path).unwrap();
        assert_eq!(store.mapped_len() as u64, fs::metadata(&path).unwrap().len());
        for (key, record) in records.iter().rev() {
            assert_eq!(&store.record(key).unwrap(), record);
        }
    }

    #[test]
    fn open_empty_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.safetensors");
        fs::write(&path, b"").unwrap();
        assert!(matches!(
            SafetensorsStore::open(&path).unwrap_err(),
            Error::Store(_)
        ));
    }

    #[test]
    fn open_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SafetensorsStore::open(dir.path().join("absent.safetensors")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn open_garbage_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.safetensors");
        fs::write(&path, b"definitely not a container").unwrap();
        assert!(matches!(
            SafetensorsStore::open(&path).unwrap_err(),
            Error::Store(_)
        ));
    }

    #[test]
    fn missing_label_member() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.safetensors");
        write_raw(
            &path,
            vec![("k/feature", Dtype::F32, vec![1, 2], encode_le(&[0.5f32, 1.5]))],
        );

        let store = SafetensorsStore::open(&path).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["k"]);
        assert_eq!(store.feature("k").unwrap(), array![[0.5f32, 1.5]]);
        assert!(matches!(
            store.label("k").unwrap_err(),
            Error::MissingMember { member: "label", .. }
        ));
        assert!(matches!(
            store.label("nope").unwrap_err(),
            Error::UnknownKey(_)
        ));
    }

    #[test]
    fn reads_f64_features_and_i32_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.safetensors");
        write_raw(
            &path,
            vec![
                ("r/feature", Dtype::F64, vec![2, 1], encode_le(&[0.25f64, -4.0])),
                ("r/label", Dtype::I32, vec![1], encode_le(&[2i32])),
            ],
        );

        let store = SafetensorsStore::open(&path).unwrap();
        assert_eq!(store.feature("r").unwrap(), array![[0.25f32], [-4.0]]);
        assert_eq!(store.label("r").unwrap(), 2);
    }

    #[test]
    fn rejects_rank_one_feature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.safetensors");
        write_raw(
            &path,
            vec![
                ("r/feature", Dtype::F32, vec![3], encode_le(&[1.0f32, 2.0, 3.0])),
                ("r/label", Dtype::I64, vec![], encode_le(&[1i64])),
            ],
        );

        let store = SafetensorsStore::open(&path).unwrap();
        assert!(matches!(
            store.feature("r").unwrap_err(),
            Error::RankMismatch { expected: 2, .. }
        ));
    }
}
