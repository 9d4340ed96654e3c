// ============================================================
// Layer 4 — Shard Store
// ============================================================
// The on-disk encoding cache. Every cached batch is a pair of
// safetensors files sharing a split and an index:
//
//   {encoding_dir}/
//     train_x_0.safetensors   train_y_0.safetensors
//     train_x_1.safetensors   train_y_1.safetensors
//     ...
//     val_x_0.safetensors     val_y_0.safetensors
//
// The index is the zero-based batch number of the writing
// pass, written without padding. It is the only thing tying
// X_i to y_i, so discovery parses it as an integer and sorts
// numerically (train_x_10 comes after train_x_2) and refuses
// directories where the x and y index sets differ.
//
// Tensor names inside the files:
//   x files                    → "x"
//   classification y files     → "y"
//   captioning y files         → "input_ids", "attention_mask"
//
// Reference: safetensors crate documentation

use anyhow::{Context, Result};
use safetensors::{tensor::TensorView, Dtype, SafeTensors};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::domain::{
    clip::{CapSample, ClsSample, FRAME_STACK_RANK},
    error::PipelineError,
    model_type::Split,
    tensor::{HostTensor, TensorValues},
};

pub const SHARD_EXTENSION: &str = "safetensors";

/// Which half of a shard pair a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardRole {
    X,
    Y,
}

impl ShardRole {
    fn tag(self) -> &'static str {
        match self {
            ShardRole::X => "x",
            ShardRole::Y => "y",
        }
    }
}

pub fn shard_file_name(split: Split, role: ShardRole, index: usize) -> String {
    format!("{}_{}_{}.{}", split.prefix(), role.tag(), index, SHARD_EXTENSION)
}

/// Parse `{split}_{x|y}_{index}.safetensors`. Anything else (other split,
/// padded or signed indices, stray files) yields None.
pub fn parse_shard_name(name: &str, split: Split) -> Option<(ShardRole, usize)> {
    let stem = name.strip_suffix(SHARD_EXTENSION)?.strip_suffix('.')?;
    let rest = stem.strip_prefix(split.prefix())?.strip_prefix('_')?;

    let (role, digits) = if let Some(d) = rest.strip_prefix("x_") {
        (ShardRole::X, d)
    } else if let Some(d) = rest.strip_prefix("y_") {
        (ShardRole::Y, d)
    } else {
        return None;
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok().map(|index| (role, index))
}

/// One discovered (X_i, y_i) file pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPair {
    pub index: usize,
    pub x:     PathBuf,
    pub y:     PathBuf,
}

// ─── ShardRecord ──────────────────────────────────────────────────────────────
/// Conversion between a sample type and the tensors of its shard files.
pub trait ShardRecord: Sized + Send + 'static {
    /// Drop a singleton leading batch dimension of X when reading.
    const SQUEEZE_X: bool;

    fn into_tensors(self) -> (HostTensor, Vec<(&'static str, HostTensor)>);

    fn from_tensors(x: HostTensor, y: NamedTensors, path: &Path) -> Result<Self, PipelineError>;
}

/// Tensors read from one y file, looked up by name.
pub struct NamedTensors(BTreeMap<String, HostTensor>);

impl NamedTensors {
    pub fn take(&mut self, name: &str, path: &Path) -> Result<HostTensor, PipelineError> {
        self.0.remove(name).ok_or_else(|| PipelineError::MalformedShard {
            path:   path.to_path_buf(),
            reason: format!("missing tensor '{name}'"),
        })
    }
}

impl ShardRecord for ClsSample {
    const SQUEEZE_X: bool = false;

    fn into_tensors(self) -> (HostTensor, Vec<(&'static str, HostTensor)>) {
        (self.x, vec![("y", self.y)])
    }

    fn from_tensors(x: HostTensor, mut y: NamedTensors, path: &Path) -> Result<Self, PipelineError> {
        let y = y.take("y", path)?;
        ClsSample::new(x, y).map_err(|e| PipelineError::MalformedShard {
            path:   path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

impl ShardRecord for CapSample {
    const SQUEEZE_X: bool = true;

    fn into_tensors(self) -> (HostTensor, Vec<(&'static str, HostTensor)>) {
        (
            self.frames,
            vec![("input_ids", self.input_ids), ("attention_mask", self.attention_mask)],
        )
    }

    fn from_tensors(frames: HostTensor, mut y: NamedTensors, path: &Path) -> Result<Self, PipelineError> {
        let input_ids = y.take("input_ids", path)?;
        let attention_mask = y.take("attention_mask", path)?;
        if input_ids.as_i64().is_none() || input_ids.shape() != attention_mask.shape() {
            return Err(PipelineError::MalformedShard {
                path:   path.to_path_buf(),
                reason: format!(
                    "token tensors must be i64 of equal shape, got {:?} {} and {:?} {}",
                    input_ids.shape(),
                    input_ids.dtype_name(),
                    attention_mask.shape(),
                    attention_mask.dtype_name(),
                ),
            });
        }
        Ok(CapSample { frames, input_ids, attention_mask })
    }
}

// ─── ShardStore ───────────────────────────────────────────────────────────────
/// A directory of shard pairs.
#[derive(Debug, Clone)]
pub struct ShardStore {
    dir: PathBuf,
}

impl ShardStore {
    /// Open an existing cache for reading.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a cache that must not exist yet. Nothing is written when the
    /// directory is already there.
    pub fn create_fresh(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if dir.exists() {
            return Err(PipelineError::OutputDirExists(dir).into());
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create encoding dir '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Create the cache or reuse an existing one. Colliding indices are
    /// overwritten by later writes.
    pub fn create_or_reuse(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create encoding dir '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, split: Split, role: ShardRole, index: usize) -> PathBuf {
        self.dir.join(shard_file_name(split, role, index))
    }

    /// Persist one record as the pair (X_index, y_index).
    pub fn write<R: ShardRecord>(&self, split: Split, index: usize, record: R) -> Result<()> {
        let (x, y) = record.into_tensors();
        write_tensors(&self.path_of(split, ShardRole::X, index), &[("x", x)])?;
        write_tensors(&self.path_of(split, ShardRole::Y, index), &y)?;
        Ok(())
    }

    /// Discover the pairs of a split, ordered by numeric index.
    pub fn pairs(&self, split: Split) -> Result<Vec<ShardPair>> {
        let mut xs: BTreeMap<usize, PathBuf> = BTreeMap::new();
        let mut ys: BTreeMap<usize, PathBuf> = BTreeMap::new();

        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot list encoding dir '{}'", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some((role, index)) = parse_shard_name(&name.to_string_lossy(), split) else {
                continue;
            };
            match role {
                ShardRole::X => xs.insert(index, entry.path()),
                ShardRole::Y => ys.insert(index, entry.path()),
            };
        }

        if xs.len() != ys.len() {
            return Err(PipelineError::ShardCountMismatch {
                split,
                dir:     self.dir.clone(),
                x_files: xs.len(),
                y_files: ys.len(),
            }
            .into());
        }

        let mut pairs = Vec::with_capacity(xs.len());
        for (index, x) in xs {
            let y = ys.remove(&index).ok_or(PipelineError::UnpairedShard {
                split,
                dir: self.dir.clone(),
                index,
                missing: "y",
            })?;
            pairs.push(ShardPair { index, x, y });
        }
        Ok(pairs)
    }

    /// Load one pair from disk.
    pub fn read<R: ShardRecord>(&self, pair: &ShardPair) -> Result<R> {
        let mut x_tensors = read_tensors(&pair.x)?;
        let x = x_tensors.take("x", &pair.x)?;
        // [1, T, C, H, W] → [T, C, H, W]; a single-frame [T, C, H, W] stays as is
        let x = if R::SQUEEZE_X && x.rank() > FRAME_STACK_RANK { x.squeeze_leading() } else { x };
        let y = read_tensors(&pair.y)?;
        Ok(R::from_tensors(x, y, &pair.y)?)
    }
}

// ─── safetensors codec ────────────────────────────────────────────────────────
fn to_le_bytes(values: &TensorValues) -> (Dtype, Vec<u8>) {
    match values {
        TensorValues::F32(v) => (Dtype::F32, v.iter().flat_map(|x| x.to_le_bytes()).collect()),
        TensorValues::U8(v)  => (Dtype::U8, v.clone()),
        TensorValues::I64(v) => (Dtype::I64, v.iter().flat_map(|x| x.to_le_bytes()).collect()),
    }
}

fn from_le_bytes(dtype: Dtype, data: &[u8]) -> Option<TensorValues> {
    match dtype {
        Dtype::F32 => Some(TensorValues::F32(
            data.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )),
        Dtype::U8 => Some(TensorValues::U8(data.to_vec())),
        Dtype::I64 => Some(TensorValues::I64(
            data.chunks_exact(8)
                .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        )),
        _ => None,
    }
}

fn write_tensors(path: &Path, tensors: &[(&str, HostTensor)]) -> Result<()> {
    let encoded: Vec<(String, Dtype, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|(name, t)| {
            let (dtype, bytes) = to_le_bytes(t.values());
            (name.to_string(), dtype, t.shape().to_vec(), bytes)
        })
        .collect();

    let mut views = Vec::with_capacity(encoded.len());
    for (name, dtype, shape, bytes) in &encoded {
        let view = TensorView::new(*dtype, shape.clone(), bytes)
            .with_context(|| format!("Cannot build tensor '{name}' for '{}'", path.display()))?;
        views.push((name.clone(), view));
    }

    safetensors::serialize_to_file(views, &None, path)
        .with_context(|| format!("Cannot write shard '{}'", path.display()))?;
    Ok(())
}

fn read_tensors(path: &Path) -> Result<NamedTensors> {
    let bytes = fs::read(path).with_context(|| format!("Cannot read shard '{}'", path.display()))?;
    let malformed = |reason: String| PipelineError::MalformedShard { path: path.to_path_buf(), reason };

    let file = SafeTensors::deserialize(&bytes).map_err(|e| malformed(e.to_string()))?;
    let mut tensors = BTreeMap::new();
    for (name, view) in file.tensors() {
        let values = from_le_bytes(view.dtype(), view.data())
            .ok_or_else(|| malformed(format!("tensor '{name}' has unsupported dtype {:?}", view.dtype())))?;
        let tensor = HostTensor::new(view.shape().to_vec(), values)
            .map_err(|e| malformed(format!("tensor '{name}': {e}")))?;
        tensors.insert(name, tensor);
    }
    Ok(NamedTensors(tensors))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn cls_sample(rows: usize, features: usize, classes: usize) -> ClsSample {
        let x: Vec<f32> = (0..rows * features).map(|i| i as f32 * 0.37 - 1.5).collect();
        let y: Vec<f32> = (0..rows * classes).map(|i| (i % 3 == 0) as u8 as f32).collect();
        ClsSample::new(
            HostTensor::f32(vec![rows, features], x).unwrap(),
            HostTensor::f32(vec![rows, classes], y).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_shard_names() {
        assert_eq!(shard_file_name(Split::Train, ShardRole::X, 0), "train_x_0.safetensors");
        assert_eq!(parse_shard_name("val_y_12.safetensors", Split::Val), Some((ShardRole::Y, 12)));
        assert_eq!(parse_shard_name("val_y_12.safetensors", Split::Train), None);
        assert_eq!(parse_shard_name("train_x_01.safetensors", Split::Train), None);
        assert_eq!(parse_shard_name("train_x_.safetensors", Split::Train), None);
        assert_eq!(parse_shard_name("train_z_1.safetensors", Split::Train), None);
        assert_eq!(parse_shard_name("train_x_1.pt", Split::Train), None);
    }

    #[test]
    fn test_classification_round_trip_is_bit_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path());
        let sample = cls_sample(3, 5, 4);
        store.write(Split::Train, 0, sample.clone()).unwrap();

        let pairs = store.pairs(Split::Train).unwrap();
        assert_eq!(pairs.len(), 1);
        let back: ClsSample = store.read(&pairs[0]).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn test_captioning_round_trip_squeezes_leading_dim() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path());
        let sample = CapSample {
            frames:         HostTensor::u8(vec![1, 2, 3, 2, 2], (0..24).collect()).unwrap(),
            input_ids:      HostTensor::i64(vec![1, 4], vec![101, 200, 201, 102]).unwrap(),
            attention_mask: HostTensor::i64(vec![1, 4], vec![1, 1, 1, 1]).unwrap(),
        };
        store.write(Split::Val, 0, sample.clone()).unwrap();

        let back: CapSample = store.read(&store.pairs(Split::Val).unwrap()[0]).unwrap();
        assert_eq!(back.frames.shape(), &[2, 3, 2, 2]);
        assert_eq!(back.frames.as_u8(), sample.frames.as_u8());
        assert_eq!(back.input_ids, sample.input_ids);
        assert_eq!(back.attention_mask, sample.attention_mask);
    }

    #[test]
    fn test_single_frame_clip_keeps_its_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path());
        let sample = CapSample {
            frames:         HostTensor::u8(vec![1, 3, 2, 2], (0..12).collect()).unwrap(),
            input_ids:      HostTensor::i64(vec![1, 3], vec![101, 200, 102]).unwrap(),
            attention_mask: HostTensor::i64(vec![1, 3], vec![1, 1, 1]).unwrap(),
        };
        store.write(Split::Train, 0, sample.clone()).unwrap();

        let back: CapSample = store.read(&store.pairs(Split::Train).unwrap()[0]).unwrap();
        assert_eq!(back, sample);
        assert_eq!(back.frames.shape(), &[1, 3, 2, 2]);
    }

    #[test]
    fn test_pairs_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path());
        for i in 0..12 {
            store.write(Split::Train, i, cls_sample(1, 2, 2)).unwrap();
        }

        let indices: Vec<usize> = store.pairs(Split::Train).unwrap().iter().map(|p| p.index).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
        // a lexicographic sort would have put 10 right after 1
        assert_eq!(indices[2], 2);
        assert_eq!(indices[10], 10);
    }

    #[test]
    fn test_count_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path());
        store.write(Split::Train, 0, cls_sample(1, 2, 2)).unwrap();
        store.write(Split::Train, 1, cls_sample(1, 2, 2)).unwrap();
        fs::remove_file(store.path_of(Split::Train, ShardRole::Y, 1)).unwrap();

        let err = store.pairs(Split::Train).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::ShardCountMismatch { x_files: 2, y_files: 1, .. })
        ));
    }

    #[test]
    fn test_unpaired_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path());
        store.write(Split::Train, 0, cls_sample(1, 2, 2)).unwrap();
        store.write(Split::Train, 1, cls_sample(1, 2, 2)).unwrap();
        fs::rename(
            store.path_of(Split::Train, ShardRole::Y, 1),
            store.path_of(Split::Train, ShardRole::Y, 2),
        )
        .unwrap();

        let err = store.pairs(Split::Train).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::UnpairedShard { index: 1, .. })
        ));
    }

    #[test]
    fn test_create_fresh_refuses_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShardStore::create_fresh(dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::OutputDirExists(_))
        ));
        assert!(ShardStore::create_or_reuse(dir.path()).is_ok());
    }

    #[test]
    fn test_corrupt_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ShardStore::open(dir.path());
        store.write(Split::Train, 0, cls_sample(1, 2, 2)).unwrap();
        fs::write(store.path_of(Split::Train, ShardRole::X, 0), b"not a shard").unwrap();

        let pair = &store.pairs(Split::Train).unwrap()[0];
        let err = store.read::<ClsSample>(pair).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MalformedShard { .. })
        ));
    }
}
