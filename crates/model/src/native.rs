//! Boundary to the native feature/batch library
//!
//! The library is passed in as a handle rather than looked up globally.
//! [`LoaderGuard`] owns a batch source for a scope and releases it exactly
//! once, whether the scope ends normally, early, or by unwinding.

use crate::error::{ModelError, Result};

/// Size queries answered by the native library
pub trait FeatureSource {
    /// Width of a spatial point feature vector
    fn point_dims(&self) -> usize;

    /// Rows of the full-resolution embedding table
    fn embedding_count(&self) -> usize;
}

/// Per-sample embedding inputs of a batch
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingBatch {
    /// Continuous index-domain queries
    Queries(Vec<f32>),
    /// Pre-resolved table rows
    Indices(Vec<u32>),
}

impl EmbeddingBatch {
    pub fn len(&self) -> usize {
        match self {
            EmbeddingBatch::Queries(q) => q.len(),
            EmbeddingBatch::Indices(i) => i.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One training batch
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Points `[batch_size, point_dims]`, row-major
    pub points: Vec<f32>,
    /// Embedding inputs `[batch_size]`, if the model has embeddings
    pub embeddings: Option<EmbeddingBatch>,
    /// Targets `[batch_size, 1]`
    pub targets: Vec<f32>,
    point_dims: usize,
}

impl Batch {
    /// Zeroed batch buffers for a source to fill
    pub fn zeroed(batch_size: usize, point_dims: usize, embeddings: Option<EmbeddingBatch>) -> Self {
        Self {
            points: vec![0.0; batch_size * point_dims],
            embeddings,
            targets: vec![0.0; batch_size],
            point_dims,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.targets.len()
    }

    pub fn point_dims(&self) -> usize {
        self.point_dims
    }

    /// Point features of sample `index`
    pub fn point(&self, index: usize) -> &[f32] {
        &self.points[index * self.point_dims..(index + 1) * self.point_dims]
    }

    /// Check that every buffer agrees on the batch size
    pub fn validate(&self) -> Result<()> {
        let n = self.batch_size();
        if self.points.len() != n * self.point_dims {
            return Err(ModelError::InvalidBatch(format!(
                "points hold {} values, expected {} x {}",
                self.points.len(),
                n,
                self.point_dims
            )));
        }
        if let Some(e) = &self.embeddings {
            if e.len() != n {
                return Err(ModelError::InvalidBatch(format!(
                    "{} embedding inputs for {} samples",
                    e.len(),
                    n
                )));
            }
        }
        Ok(())
    }
}

/// A seeded, referentially transparent stream of batches
pub trait BatchSource: FeatureSource {
    /// Fill `batch` in place
    fn next_batch(&mut self, batch: &mut Batch) -> Result<()>;

    /// Free native resources. Called once by [`LoaderGuard`].
    fn release(&mut self) {}
}

/// Scoped owner of a [`BatchSource`]
pub struct LoaderGuard<S: BatchSource> {
    source: Option<S>,
}

impl<S: BatchSource> LoaderGuard<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Some(source),
        }
    }

    /// Fill `batch` from the source, validating the result
    pub fn next_batch(&mut self, batch: &mut Batch) -> Result<()> {
        let source = self.source.as_mut().ok_or(ModelError::Released)?;
        if batch.point_dims() != source.point_dims() {
            return Err(ModelError::InvalidBatch(format!(
                "batch has {} point dims, source produces {}",
                batch.point_dims(),
                source.point_dims()
            )));
        }
        source.next_batch(batch)?;
        batch.validate()
    }

    /// Release the source. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.release();
            tracing::debug!("batch source released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.source.is_none()
    }
}

impl<S: BatchSource> Drop for LoaderGuard<S> {
    fn drop(&mut self) {
        self.release();
    }
}
