//! # Checkpoint Weights
//!
//! Summaries of `safetensors` checkpoints, single-file or sharded.
//!
//! Pickled `pytorch_model.bin` checkpoints are located but not parsed; their
//! summary lists the files and no tensors.

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    path::{Path, PathBuf},
};

use safetensors::SafeTensors;
use serde::Deserialize;

use crate::errors::{MZResult, MobilizeError};

/// Single-file safetensors checkpoint.
pub const SAFETENSORS_FILE_NAME: &str = "model.safetensors";

/// Index of a sharded safetensors checkpoint.
pub const SAFETENSORS_INDEX_FILE_NAME: &str = "model.safetensors.index.json";

/// Pickled checkpoint; detected but not read.
pub const PYTORCH_FILE_NAME: &str = "pytorch_model.bin";

/// Index of a sharded pickled checkpoint.
pub const PYTORCH_INDEX_FILE_NAME: &str = "pytorch_model.bin.index.json";

/// Name, dtype and shape of one checkpoint tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
    /// Tensor name.
    pub name: String,

    /// Element type, as named by safetensors (e.g. `F16`, `BF16`).
    pub dtype: String,

    /// Tensor shape.
    pub shape: Vec<usize>,
}

impl TensorInfo {
    /// Number of elements.
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

#[derive(Debug, Deserialize)]
struct ShardIndex {
    weight_map: BTreeMap<String, String>,
}

/// Tensor summary of a checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CheckpointWeights {
    shards: Vec<PathBuf>,
    tensors: Vec<TensorInfo>,
}

impl CheckpointWeights {
    /// Resolve the weight files of a checkpoint directory.
    ///
    /// Safetensors files are preferred over pickled ones; an index file is
    /// preferred over a single file.
    pub fn shard_paths<P: AsRef<Path>>(dir: P) -> MZResult<Vec<PathBuf>> {
        let dir = dir.as_ref();

        for (index, single) in [
            (SAFETENSORS_INDEX_FILE_NAME, SAFETENSORS_FILE_NAME),
            (PYTORCH_INDEX_FILE_NAME, PYTORCH_FILE_NAME),
        ] {
            let index_path = dir.join(index);
            if index_path.exists() {
                return read_index(dir, &index_path);
            }
            let single = dir.join(single);
            if single.exists() {
                return Ok(vec![single]);
            }
        }

        Err(MobilizeError::MissingFile {
            path: dir.join(SAFETENSORS_FILE_NAME),
        })
    }

    /// Load the tensor summary of every shard.
    ///
    /// Pickled shards are listed without tensors.
    pub fn load<P: AsRef<Path>>(dir: P) -> MZResult<Self> {
        let shards = Self::shard_paths(dir)?;

        let mut tensors = Vec::new();
        for shard in &shards {
            if !is_safetensors(shard) {
                log::warn!(
                    "{}: pickled weights are not read; tensor summary is empty",
                    shard.display()
                );
                continue;
            }
            let found = read_shard(shard)?;
            log::debug!("{}: {} tensors", shard.display(), found.len());
            tensors.extend(found);
        }
        tensors.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self { shards, tensors })
    }

    /// Whether every shard is a pickled file.
    pub fn is_pickled(&self) -> bool {
        !self.shards.is_empty() && !self.shards.iter().any(|s| is_safetensors(s))
    }

    /// The shard files, in load order.
    pub fn shards(&self) -> &[PathBuf] {
        &self.shards
    }

    /// All tensors, sorted by name.
    pub fn tensors(&self) -> &[TensorInfo] {
        &self.tensors
    }

    /// Number of tensors.
    pub fn num_tensors(&self) -> usize {
        self.tensors.len()
    }

    /// Total number of elements across all tensors.
    pub fn num_parameters(&self) -> usize {
        self.tensors.iter().map(TensorInfo::num_elements).sum()
    }
}

fn is_safetensors(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "safetensors")
}

fn read_index(
    dir: &Path,
    index_path: &Path,
) -> MZResult<Vec<PathBuf>> {
    let index: ShardIndex = serde_json::from_reader(File::open(index_path)?)?;
    let names: BTreeSet<String> = index.weight_map.into_values().collect();
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

fn read_shard(path: &Path) -> MZResult<Vec<TensorInfo>> {
    if !path.exists() {
        return Err(MobilizeError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;

    // SAFETY: the map is read-only and dropped before this function returns.
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    let st = SafeTensors::deserialize(&mmap)?;

    Ok(st
        .tensors()
        .into_iter()
        .map(|(name, view)| TensorInfo {
            name,
            dtype: format!("{:?}", view.dtype()),
            shape: view.shape().to_vec(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempdir::TempDir;

    use super::*;
    use crate::checkpoint::testing::{write_json, write_safetensors};

    #[test]
    fn test_single_file() {
        let dir = TempDir::new("mobilize_weights").unwrap();
        write_safetensors(
            &dir.path().join(SAFETENSORS_FILE_NAME),
            &[("b.weight", vec![2, 3]), ("a.bias", vec![3])],
        );

        let weights = CheckpointWeights::load(dir.path()).unwrap();
        assert_eq!(weights.shards().len(), 1);
        assert_eq!(weights.num_tensors(), 2);
        assert_eq!(weights.num_parameters(), 9);
        assert_eq!(
            weights.tensors()[0],
            TensorInfo {
                name: "a.bias".to_string(),
                dtype: "F32".to_string(),
                shape: vec![3],
            }
        );
    }

    #[test]
    fn test_sharded_index() {
        let dir = TempDir::new("mobilize_weights").unwrap();
        write_safetensors(
            &dir.path().join("model-00001-of-00002.safetensors"),
            &[("x", vec![4])],
        );
        write_safetensors(
            &dir.path().join("model-00002-of-00002.safetensors"),
            &[("y", vec![1, 2])],
        );
        write_json(
            &dir.path().join(SAFETENSORS_INDEX_FILE_NAME),
            r#"{"metadata": {"total_size": 24}, "weight_map": {
                "y": "model-00002-of-00002.safetensors",
                "x": "model-00001-of-00002.safetensors"
            }}"#,
        );

        let weights = CheckpointWeights::load(dir.path()).unwrap();
        assert_eq!(weights.shards().len(), 2);
        assert!(weights.shards()[0].ends_with("model-00001-of-00002.safetensors"));
        assert_eq!(weights.num_parameters(), 6);
    }

    #[test]
    fn test_missing_weights() {
        let dir = TempDir::new("mobilize_weights").unwrap();
        match CheckpointWeights::load(dir.path()) {
            Err(MobilizeError::MissingFile { path }) => {
                assert!(path.ends_with(SAFETENSORS_FILE_NAME));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_pickled_file_is_listed_not_read() {
        let dir = TempDir::new("mobilize_weights").unwrap();
        fs::write(dir.path().join(PYTORCH_FILE_NAME), b"not read").unwrap();

        let weights = CheckpointWeights::load(dir.path()).unwrap();
        assert!(weights.is_pickled());
        assert_eq!(weights.shards(), [dir.path().join(PYTORCH_FILE_NAME)]);
        assert_eq!(weights.num_tensors(), 0);
        assert_eq!(weights.num_parameters(), 0);

        // Safetensors win when both are present.
        write_safetensors(&dir.path().join(SAFETENSORS_FILE_NAME), &[("w", vec![2])]);
        let weights = CheckpointWeights::load(dir.path()).unwrap();
        assert!(!weights.is_pickled());
        assert_eq!(weights.num_parameters(), 2);
    }

    #[test]
    fn test_pickled_index() {
        let dir = TempDir::new("mobilize_weights").unwrap();
        write_json(
            &dir.path().join(PYTORCH_INDEX_FILE_NAME),
            r#"{"weight_map": {
                "a": "pytorch_model-00002-of-00002.bin",
                "b": "pytorch_model-00001-of-00002.bin",
                "c": "pytorch_model-00001-of-00002.bin"
            }}"#,
        );

        let weights = CheckpointWeights::load(dir.path()).unwrap();
        assert!(weights.is_pickled());
        assert_eq!(weights.shards().len(), 2);
        assert!(weights.shards()[0].ends_with("pytorch_model-00001-of-00002.bin"));
        assert_eq!(weights.num_tensors(), 0);
    }

    #[test]
    fn test_corrupt_shard() {
        let dir = TempDir::new("mobilize_weights").unwrap();
        fs::write(
            dir.path().join(SAFETENSORS_FILE_NAME),
            b"\x04\x00\x00\x00\x00\x00\x00\x00garbage",
        )
        .unwrap();
        assert!(matches!(
            CheckpointWeights::load(dir.path()),
            Err(MobilizeError::Safetensors(_))
        ));
    }
}
