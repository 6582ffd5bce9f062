//! Tiled, compressed array store.
//!
//! A directory in the Zarr v3 layout: a group `zarr.json` at the root and
//! one sub-directory per array holding its `zarr.json` and one file per
//! chunk under `c/<i>/<j>/...`. Chunks are little-endian float32 or float64
//! compressed with zstd. Chunks made entirely of fill are not written; readers treat a
//! missing chunk as fill.
//!
//! Submodules:
//! - `metadata`: the JSON documents.

pub mod metadata;

use ndarray::{ArrayD, ArrayViewD, IxDyn, Slice};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::logging::{self, Stage};
use crate::model::{Attributes, PrepError, Result, ValueType};
use metadata::{ArrayMetadata, Codec, GroupMetadata, METADATA_FILE};

/// Counts reported after writing one array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrayWriteStats {
    pub chunks_written: usize,
    pub chunks_skipped: usize,
    pub bytes_written: u64,
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

pub struct StoreWriter {
    root: PathBuf,
    zstd_level: i32,
}

impl StoreWriter {
    /// Create an empty store at `root`, replacing an existing store there.
    ///
    /// A non-empty directory that is not a store is left alone and reported
    /// as `NotAStore`.
    pub fn create(root: &Path, zstd_level: i32) -> Result<Self> {
        if root.exists() {
            if root.join(METADATA_FILE).is_file() {
                std::fs::remove_dir_all(root).map_err(|e| PrepError::io(root, e))?;
            } else if !is_empty_dir(root)? {
                return Err(PrepError::NotAStore(root.to_path_buf()));
            }
        }
        std::fs::create_dir_all(root).map_err(|e| PrepError::io(root, e))?;
        Ok(Self {
            root: root.to_path_buf(),
            zstd_level,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn write_group(&self, attributes: &Attributes) -> Result<()> {
        write_json(&self.root.join(METADATA_FILE), &GroupMetadata::new(attributes))
    }

    /// Write one array chunked by `chunk_shape`, narrowing to `dtype`.
    pub fn write_array(
        &self,
        name: &str,
        data: ArrayViewD<f64>,
        dtype: ValueType,
        chunk_shape: &[usize],
        dimension_names: &[&str],
        attributes: &Attributes,
    ) -> Result<ArrayWriteStats> {
        if chunk_shape.len() != data.ndim() || dimension_names.len() != data.ndim() {
            return Err(PrepError::GridShape {
                variable: name.to_string(),
                detail: format!(
                    "{} dimensions, {} chunk lengths, {} dimension names",
                    data.ndim(),
                    chunk_shape.len(),
                    dimension_names.len()
                ),
            });
        }
        if chunk_shape.contains(&0) {
            return Err(PrepError::GridShape {
                variable: name.to_string(),
                detail: "chunk lengths must be positive".to_string(),
            });
        }

        let meta = ArrayMetadata::new(
            dtype,
            data.shape(),
            chunk_shape,
            vec![Codec::little_endian(), Codec::zstd(self.zstd_level)],
            dimension_names,
            attributes,
        );
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir).map_err(|e| PrepError::io(&dir, e))?;
        write_json(&dir.join(METADATA_FILE), &meta)?;

        let mut stats = ArrayWriteStats::default();
        for index in chunk_indices(&meta.grid_shape()) {
            let region = chunk_region(&index, chunk_shape, data.shape());
            let view = data.slice_each_axis(|ax| Slice::from(region[ax.axis.index()].clone()));
            if view.iter().all(|v| v.is_nan()) {
                stats.chunks_skipped += 1;
                continue;
            }

            let mut padded = ArrayD::from_elem(IxDyn(chunk_shape), f64::NAN);
            padded
                .slice_each_axis_mut(|ax| Slice::from(0..region[ax.axis.index()].len()))
                .assign(&view);

            let mut bytes = Vec::with_capacity(padded.len() * dtype.size());
            for v in padded.iter() {
                match dtype {
                    ValueType::Float32 => bytes.extend_from_slice(&(*v as f32).to_le_bytes()),
                    ValueType::Float64 => bytes.extend_from_slice(&v.to_le_bytes()),
                }
            }
            let compressed = zstd::bulk::compress(&bytes, self.zstd_level)
                .map_err(|e| PrepError::io(&dir, e))?;

            let path = dir.join(meta.chunk_key(&index));
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PrepError::io(parent, e))?;
            }
            std::fs::write(&path, &compressed).map_err(|e| PrepError::io(&path, e))?;
            stats.chunks_written += 1;
            stats.bytes_written += compressed.len() as u64;
        }

        logging::debug(
            Stage::Store,
            Some(name),
            &format!(
                "{} chunks written ({} bytes), {} empty chunks skipped",
                stats.chunks_written, stats.bytes_written, stats.chunks_skipped
            ),
        );
        Ok(stats)
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries = std::fs::read_dir(path).map_err(|e| PrepError::io(path, e))?;
    Ok(entries.next().is_none())
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).map_err(|e| PrepError::io(path, e))
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

pub struct TiledStore {
    root: PathBuf,
    group: GroupMetadata,
}

impl TiledStore {
    pub fn open(root: &Path) -> Result<Self> {
        let path = root.join(METADATA_FILE);
        if !path.is_file() {
            return Err(PrepError::NotAStore(root.to_path_buf()));
        }
        let group: GroupMetadata = read_json(&path)?;
        Ok(Self {
            root: root.to_path_buf(),
            group,
        })
    }

    pub fn group(&self) -> &GroupMetadata {
        &self.group
    }

    /// Names of the arrays directly under the root, sorted.
    pub fn array_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(|e| PrepError::io(&self.root, e))? {
            let entry = entry.map_err(|e| PrepError::io(&self.root, e))?;
            if entry.path().join(METADATA_FILE).is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn metadata(&self, name: &str) -> Result<ArrayMetadata> {
        let path = self.root.join(name).join(METADATA_FILE);
        if !path.is_file() {
            return Err(PrepError::MissingVariable(name.to_string()));
        }
        let meta: ArrayMetadata = read_json(&path)?;
        meta.value_type()?;
        Ok(meta)
    }

    /// Read a whole array; float32 values are widened.
    pub fn read_array(&self, name: &str) -> Result<ArrayD<f64>> {
        let meta = self.metadata(name)?;
        let window: Vec<Range<usize>> = meta.shape.iter().map(|len| 0..*len).collect();
        self.read_window_with(name, &meta, &window)
    }

    /// Read a rectangular window, decoding only the chunks it touches.
    pub fn read_window(&self, name: &str, window: &[Range<usize>]) -> Result<ArrayD<f64>> {
        let meta = self.metadata(name)?;
        self.read_window_with(name, &meta, window)
    }

    fn read_window_with(&self, name: &str, meta: &ArrayMetadata, window: &[Range<usize>]) -> Result<ArrayD<f64>> {
        let in_bounds = window.len() == meta.shape.len()
            && window.iter().zip(&meta.shape).all(|(r, len)| r.start <= r.end && r.end <= *len);
        if !in_bounds {
            return Err(PrepError::GridShape {
                variable: name.to_string(),
                detail: format!("window {:?} outside shape {:?}", window, meta.shape),
            });
        }

        let fill = meta.fill()?;
        let out_shape: Vec<usize> = window.iter().map(|r| r.len()).collect();
        let mut out = ArrayD::from_elem(IxDyn(&out_shape), fill);
        if out.is_empty() {
            return Ok(out);
        }

        let chunk_shape = meta.chunk_shape().to_vec();
        let first: Vec<usize> = window.iter().zip(&chunk_shape).map(|(r, c)| r.start / c).collect();
        let last: Vec<usize> = window.iter().zip(&chunk_shape).map(|(r, c)| (r.end - 1) / c).collect();
        let span: Vec<usize> = first.iter().zip(&last).map(|(f, l)| l - f + 1).collect();

        for offset in chunk_indices(&span) {
            let index: Vec<usize> = offset.iter().zip(&first).map(|(o, f)| o + f).collect();
            let Some(chunk) = self.read_chunk(name, meta, &index)? else {
                continue;
            };
            // overlap of this chunk with the window, in global coordinates
            let overlap: Vec<Range<usize>> = index
                .iter()
                .zip(&chunk_shape)
                .zip(window)
                .map(|((i, c), w)| (i * c).max(w.start)..((i + 1) * c).min(w.end))
                .collect();
            let src = chunk.slice_each_axis(|ax| {
                let d = ax.axis.index();
                let base = index[d] * chunk_shape[d];
                Slice::from(overlap[d].start - base..overlap[d].end - base)
            });
            out.slice_each_axis_mut(|ax| {
                let d = ax.axis.index();
                Slice::from(overlap[d].start - window[d].start..overlap[d].end - window[d].start)
            })
            .assign(&src);
        }
        Ok(out)
    }

    fn read_chunk(&self, name: &str, meta: &ArrayMetadata, index: &[usize]) -> Result<Option<ArrayD<f64>>> {
        let path = self.root.join(name).join(meta.chunk_key(index));
        let mut bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PrepError::io(&path, e)),
        };

        let mut little_endian = true;
        for codec in meta.codecs.iter().rev() {
            match codec {
                Codec::Zstd { .. } => {
                    bytes = zstd::decode_all(bytes.as_slice()).map_err(|e| PrepError::io(&path, e))?;
                }
                Codec::Bytes { endian } => little_endian = endian != "big",
            }
        }

        let dtype = meta.value_type()?;
        let chunk_shape = meta.chunk_shape();
        let expected: usize = chunk_shape.iter().product::<usize>() * dtype.size();
        if bytes.len() != expected {
            return Err(PrepError::GridShape {
                variable: name.to_string(),
                detail: format!("chunk {} has {} bytes, expected {}", path.display(), bytes.len(), expected),
            });
        }
        let values: Vec<f64> = match dtype {
            ValueType::Float32 => bytes
                .chunks_exact(4)
                .map(|b| {
                    let raw: [u8; 4] = b.try_into().unwrap_or([0; 4]);
                    let v = if little_endian { f32::from_le_bytes(raw) } else { f32::from_be_bytes(raw) };
                    f64::from(v)
                })
                .collect(),
            ValueType::Float64 => bytes
                .chunks_exact(8)
                .map(|b| {
                    let raw: [u8; 8] = b.try_into().unwrap_or([0; 8]);
                    if little_endian { f64::from_le_bytes(raw) } else { f64::from_be_bytes(raw) }
                })
                .collect(),
        };
        Ok(Some(ArrayD::from_shape_vec(IxDyn(chunk_shape), values)?))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| PrepError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

// ---------------------------------------------------------------------------
// Chunk arithmetic
// ---------------------------------------------------------------------------

/// Every index of an n-d grid in C order.
fn chunk_indices(grid: &[usize]) -> Vec<Vec<usize>> {
    if grid.contains(&0) {
        return Vec::new();
    }
    let total: usize = grid.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut index = vec![0usize; grid.len()];
    for _ in 0..total {
        out.push(index.clone());
        for d in (0..grid.len()).rev() {
            index[d] += 1;
            if index[d] < grid[d] {
                break;
            }
            index[d] = 0;
        }
    }
    out
}

/// The part of the array a chunk covers, clipped at the array edge.
fn chunk_region(index: &[usize], chunk_shape: &[usize], shape: &[usize]) -> Vec<Range<usize>> {
    index
        .iter()
        .zip(chunk_shape)
        .zip(shape)
        .map(|((i, c), len)| (i * c).min(*len)..((i + 1) * c).min(*len))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, s};

    #[test]
    fn test_chunk_indices_c_order() {
        assert_eq!(chunk_indices(&[2, 2]), [vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
        assert!(chunk_indices(&[3, 0]).is_empty());
    }

    #[test]
    fn test_chunk_region_clips_edge() {
        assert_eq!(chunk_region(&[1, 2], &[4, 4], &[6, 10]), [4..6, 8..10]);
    }

    fn sample() -> Array3<f64> {
        Array3::from_shape_fn((3, 5, 7), |(t, y, x)| (t * 100 + y * 10 + x) as f64)
    }

    #[test]
    fn test_store_round_trip_with_partial_edge_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("grid.zarr");
        let writer = StoreWriter::create(&root, 5).unwrap();
        writer.write_group(&Vec::new()).unwrap();
        let stats = writer
            .write_array("v", sample().view().into_dyn(), ValueType::Float64, &[3, 2, 2], &["time", "lat", "lon"], &Vec::new())
            .unwrap();
        assert_eq!(stats.chunks_written, 3 * 4);

        let store = TiledStore::open(&root).unwrap();
        assert_eq!(store.array_names().unwrap(), ["v"]);
        let back = store.read_array("v").unwrap();
        assert_eq!(back, sample().into_dyn());
        assert!(root.join("v/c/0/2/3").is_file());
    }

    #[test]
    fn test_window_read_matches_slice() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("grid.zarr");
        let writer = StoreWriter::create(&root, 3).unwrap();
        writer.write_group(&Vec::new()).unwrap();
        writer
            .write_array("v", sample().view().into_dyn(), ValueType::Float64, &[3, 2, 2], &["t", "y", "x"], &Vec::new())
            .unwrap();

        let store = TiledStore::open(&root).unwrap();
        let window = store.read_window("v", &[0..3, 1..4, 3..6]).unwrap();
        assert_eq!(window, sample().slice(s![.., 1..4, 3..6]).to_owned().into_dyn());
        assert!(store.read_window("v", &[0..3, 0..6, 0..1]).is_err());
    }

    #[test]
    fn test_all_nan_chunks_are_skipped_and_read_as_nan() {
        let mut data = sample();
        data.slice_mut(s![.., 0..2, 0..2]).fill(f64::NAN);
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("grid.zarr");
        let writer = StoreWriter::create(&root, 5).unwrap();
        writer.write_group(&Vec::new()).unwrap();
        let stats = writer
            .write_array("v", data.view().into_dyn(), ValueType::Float64, &[3, 2, 2], &["t", "y", "x"], &Vec::new())
            .unwrap();
        assert_eq!(stats.chunks_skipped, 1);
        assert!(!root.join("v/c/0/0/0").exists());

        let back = TiledStore::open(&root).unwrap().read_array("v").unwrap();
        assert!(back.slice(s![.., 0..2, 0..2]).iter().all(|v| v.is_nan()));
        assert_eq!(back[[2, 4, 6]], 246.0);
    }

    #[test]
    fn test_float32_chunks_are_half_size_and_widen_on_read() {
        let data = Array3::from_shape_fn((2, 2, 2), |(t, y, x)| (t * 4 + y * 2 + x) as f64 + 0.25);
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("grid.zarr");
        let writer = StoreWriter::create(&root, 5).unwrap();
        writer.write_group(&Vec::new()).unwrap();
        writer
            .write_array("v", data.view().into_dyn(), ValueType::Float32, &[2, 2, 2], &["t", "y", "x"], &Vec::new())
            .unwrap();

        let raw = std::fs::read(root.join("v/c/0/0/0")).unwrap();
        assert_eq!(zstd::decode_all(raw.as_slice()).unwrap().len(), 8 * 4);

        let store = TiledStore::open(&root).unwrap();
        assert_eq!(store.metadata("v").unwrap().data_type, "float32");
        assert_eq!(store.read_array("v").unwrap(), data.into_dyn());
    }

    #[test]
    fn test_unknown_data_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("grid.zarr");
        let writer = StoreWriter::create(&root, 5).unwrap();
        writer.write_group(&Vec::new()).unwrap();
        writer
            .write_array("v", sample().view().into_dyn(), ValueType::Float64, &[3, 2, 2], &["t", "y", "x"], &Vec::new())
            .unwrap();
        let path = root.join("v").join(METADATA_FILE);
        let text = std::fs::read_to_string(&path).unwrap().replace("float64", "int16");
        std::fs::write(&path, text).unwrap();

        let store = TiledStore::open(&root).unwrap();
        assert!(matches!(store.read_array("v"), Err(PrepError::UnsupportedDataType(t)) if t == "int16"));
    }

    #[test]
    fn test_create_replaces_store_but_not_other_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("grid.zarr");
        StoreWriter::create(&root, 5).unwrap().write_group(&Vec::new()).unwrap();
        std::fs::write(root.join("stale"), b"x").unwrap();
        StoreWriter::create(&root, 5).unwrap();
        assert!(!root.join("stale").exists());

        let other = dir.path().join("notes");
        std::fs::create_dir(&other).unwrap();
        std::fs::write(other.join("keep.txt"), b"x").unwrap();
        assert!(matches!(StoreWriter::create(&other, 5), Err(PrepError::NotAStore(_))));
        assert!(other.join("keep.txt").exists());
    }
}
