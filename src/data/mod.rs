//! # Data Module
//!
//! In-memory classification datasets and an ordered, finite batch stream
//! over them.

use crate::tensor::{TensorData, TensorError};
use crate::utils::serialization::SerializationError;
use log::{info, warn};
use ndarray::{Array1, Array2, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// One mini-batch: `inputs` is `(N, features)`, `labels` holds `N` class indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Array2<TensorData>,
    pub labels: Array1<usize>,
}

impl Batch {
    pub fn new(inputs: Array2<TensorData>, labels: Array1<usize>) -> Result<Self, TensorError> {
        if inputs.nrows() != labels.len() {
            return Err(TensorError::IncompatibleShapes {
                op: "batch".to_string(),
                shape1: inputs.shape().to_vec(),
                shape2: labels.shape().to_vec(),
            });
        }
        Ok(Batch { inputs, labels })
    }

    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// A labelled dataset with flattened rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Array2<TensorData>,
    labels: Array1<usize>,
    num_classes: usize,
}

// On-disk form: flat row-major data, as checkpoints store tensors.
#[derive(Serialize, Deserialize)]
struct DatasetFile {
    features: usize,
    num_classes: usize,
    inputs: Vec<TensorData>,
    labels: Vec<usize>,
}

impl Dataset {
    pub fn new(
        inputs: Array2<TensorData>,
        labels: Array1<usize>,
        num_classes: usize,
    ) -> Result<Self, TensorError> {
        if inputs.nrows() != labels.len() {
            return Err(TensorError::IncompatibleShapes {
                op: "dataset".to_string(),
                shape1: inputs.shape().to_vec(),
                shape2: labels.shape().to_vec(),
            });
        }
        if let Some(&label) = labels.iter().find(|&&y| y >= num_classes) {
            return Err(TensorError::InvalidConfig(format!(
                "label {label} out of range for {num_classes} classes"
            )));
        }
        Ok(Dataset {
            inputs,
            labels,
            num_classes,
        })
    }

    /// Gaussian clusters: each class has a centre drawn from `N(0, 1)` per
    /// feature, and each sample is its class centre plus `N(0, noise)` noise.
    pub fn synthetic<R: Rng + ?Sized>(
        features: usize,
        num_classes: usize,
        samples: usize,
        noise: TensorData,
        rng: &mut R,
    ) -> Result<Self, TensorError> {
        if num_classes == 0 {
            return Err(TensorError::InvalidConfig(
                "synthetic dataset needs at least one class".to_string(),
            ));
        }
        let unit = Normal::<TensorData>::new(0.0, 1.0)
            .map_err(|e| TensorError::InvalidConfig(e.to_string()))?;
        let jitter = Normal::<TensorData>::new(0.0, noise)
            .map_err(|e| TensorError::InvalidConfig(e.to_string()))?;

        let centres = Array2::from_shape_simple_fn((num_classes, features), || unit.sample(rng));
        let labels = Array1::from_shape_simple_fn(samples, || rng.gen_range(0..num_classes));
        let mut inputs = centres.select(Axis(0), &labels.to_vec());
        inputs.mapv_inplace(|x| x + jitter.sample(rng));

        Dataset::new(inputs, labels, num_classes)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Width of each input row.
    pub fn features(&self) -> usize {
        self.inputs.ncols()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn inputs(&self) -> &Array2<TensorData> {
        &self.inputs
    }

    pub fn labels(&self) -> &Array1<usize> {
        &self.labels
    }

    /// Gathers the given rows into a batch.
    pub fn batch(&self, indices: &[usize]) -> Batch {
        Batch {
            inputs: self.inputs.select(Axis(0), indices),
            labels: self.labels.select(Axis(0), indices),
        }
    }

    /// Splits off the last `1 - train_fraction` of the rows.
    pub fn split(&self, train_fraction: f64) -> (Dataset, Dataset) {
        let cut = ((self.len() as f64) * train_fraction.clamp(0.0, 1.0)).round() as usize;
        let (head, tail): (Vec<usize>, Vec<usize>) = (0..self.len()).partition(|&i| i < cut);
        let part = |rows: &[usize]| Dataset {
            inputs: self.inputs.select(Axis(0), rows),
            labels: self.labels.select(Axis(0), rows),
            num_classes: self.num_classes,
        };
        (part(&head), part(&tail))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SerializationError> {
        let file = DatasetFile {
            features: self.features(),
            num_classes: self.num_classes,
            inputs: self.inputs.iter().copied().collect(),
            labels: self.labels.to_vec(),
        };
        let writer = BufWriter::new(File::create(path.as_ref())?);
        bincode::serialize_into(writer, &file)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SerializationError> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let file: DatasetFile = bincode::deserialize_from(reader)?;
        let rows = file.labels.len();
        let inputs = Array2::from_shape_vec((rows, file.features), file.inputs)
            .map_err(TensorError::from)?;
        Ok(Dataset::new(inputs, Array1::from(file.labels), file.num_classes)?)
    }
}

/// Reads a cached dataset; if that fails, calls `fetch` once to populate
/// `path` and reads it again.
pub fn load_or_fetch<P, F>(path: P, fetch: F) -> Result<Dataset, SerializationError>
where
    P: AsRef<Path>,
    F: FnOnce(&Path) -> Result<(), SerializationError>,
{
    let path = path.as_ref();
    match Dataset::load(path) {
        Ok(dataset) => Ok(dataset),
        Err(err) => {
            warn!("Could not read dataset at {}: {err}; fetching", path.display());
            fetch(path)?;
            let dataset = Dataset::load(path)?;
            info!("Fetched {} samples into {}", dataset.len(), path.display());
            Ok(dataset)
        }
    }
}

/// Serves a dataset as a sequence of batches in a fixed order.
///
/// The last batch is smaller when the batch size does not divide the
/// dataset length.
#[derive(Debug, Clone)]
pub struct DataLoader<'a> {
    dataset: &'a Dataset,
    batch_size: usize,
    order: Vec<usize>,
}

impl<'a> DataLoader<'a> {
    /// Batches in dataset order.
    pub fn new(dataset: &'a Dataset, batch_size: usize) -> Result<Self, TensorError> {
        if batch_size == 0 {
            return Err(TensorError::InvalidConfig(
                "batch_size must be positive".to_string(),
            ));
        }
        Ok(DataLoader {
            dataset,
            batch_size,
            order: (0..dataset.len()).collect(),
        })
    }

    /// Batches in an order drawn once from `rng`.
    pub fn shuffled<R: Rng + ?Sized>(
        dataset: &'a Dataset,
        batch_size: usize,
        rng: &mut R,
    ) -> Result<Self, TensorError> {
        let mut loader = Self::new(dataset, batch_size)?;
        loader.order.shuffle(rng);
        Ok(loader)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self) -> usize {
        self.order.len().div_ceil(self.batch_size)
    }

    pub fn iter(&self) -> Batches<'_> {
        Batches {
            dataset: self.dataset,
            chunks: self.order.chunks(self.batch_size),
        }
    }
}

impl<'l, 'a> IntoIterator for &'l DataLoader<'a> {
    type Item = Batch;
    type IntoIter = Batches<'l>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`DataLoader::iter`].
#[derive(Debug, Clone)]
pub struct Batches<'a> {
    dataset: &'a Dataset,
    chunks: std::slice::Chunks<'a, usize>,
}

impl Iterator for Batches<'_> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        self.chunks.next().map(|rows| self.dataset.batch(rows))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Batches<'_> {}
