//! Embedding tables and temporal interpolation
//!
//! A continuous query is split into two neighbouring rows and a blend
//! fraction. The split is shared by the float model and the fixed-point
//! decoder so both break ties identically:
//!
//! - `q` is clamped below at 0
//! - `i0 = min(floor(q), T - 1)`, `i1 = min(i0 + 1, T - 1)`
//! - `frac = q - i0`
//!
//! At or past the last row `i0 == i1`, so `frac` has no effect and nothing
//! is read out of bounds.

use framenet_fixed_point::Tensor;
use rand::Rng;

use crate::error::{ModelError, Result};

/// A query into one or more embedding tables
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EmbeddingQuery {
    /// Row-index domain of the full-resolution table. A table at `1/r`
    /// resolution sees `q / r`.
    Index(f32),
    /// Normalized time in `[0, 1]`, scaled by each table's own size
    Normalized(f32),
}

impl EmbeddingQuery {
    /// The index-domain query for a table of `table_size` rows at
    /// `resolution_ratio`
    pub fn index_for(self, table_size: usize, resolution_ratio: u32) -> f32 {
        match self {
            EmbeddingQuery::Index(q) => q / resolution_ratio as f32,
            EmbeddingQuery::Normalized(t) => t * table_size as f32,
        }
    }

    fn raw(self) -> f32 {
        match self {
            EmbeddingQuery::Index(q) | EmbeddingQuery::Normalized(q) => q,
        }
    }
}

/// Two neighbouring rows and the blend fraction between them
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationIndex {
    pub i0: usize,
    pub i1: usize,
    pub frac: f32,
}

impl InterpolationIndex {
    /// Split an index-domain query for a table of `table_size` rows
    pub fn resolve(query: f32, table_size: usize) -> Result<Self> {
        if !query.is_finite() {
            return Err(ModelError::NonFiniteQuery(query));
        }
        if table_size == 0 {
            return Err(ModelError::Layout("embedding table has no rows".to_string()));
        }

        let query = query.max(0.0);
        let last = table_size - 1;
        let i0 = (query.floor() as usize).min(last);
        let i1 = (i0 + 1).min(last);
        let frac = query - i0 as f32;

        Ok(Self { i0, i1, frac })
    }
}

/// `a + (b - a) * t`; exact when `t == 0` or `a == b`
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Embedding table `[table_size, embedding_dim]` with its resolution ratio
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingTable {
    weight: Tensor,
    resolution_ratio: u32,
}

impl EmbeddingTable {
    /// Create from a rank-2 weight tensor
    pub fn new(weight: Tensor, resolution_ratio: u32) -> Result<Self> {
        if weight.rank() != 2 || weight.shape()[0] == 0 || weight.shape()[1] == 0 {
            return Err(ModelError::Layout(format!(
                "embedding weight must be a non-empty matrix, got shape {:?}",
                weight.shape()
            )));
        }
        if resolution_ratio == 0 {
            return Err(ModelError::Layout("resolution ratio must be >= 1".to_string()));
        }
        Ok(Self {
            weight,
            resolution_ratio,
        })
    }

    /// Create with uniform random values in `[-1, 1)` (for testing)
    pub fn random<R: Rng>(
        table_size: usize,
        embedding_dim: usize,
        resolution_ratio: u32,
        rng: &mut R,
    ) -> Result<Self> {
        let data = (0..table_size * embedding_dim)
            .map(|_| rng.gen_range(-1.0..1.0))
            .collect();
        Self::new(Tensor::matrix(table_size, embedding_dim, data)?, resolution_ratio)
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn table_size(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn embedding_dim(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn resolution_ratio(&self) -> u32 {
        self.resolution_ratio
    }

    pub fn row(&self, index: usize) -> Option<&[f32]> {
        self.weight.row(index)
    }

    pub(crate) fn with_weight(&self, weight: Tensor) -> Self {
        Self {
            weight,
            resolution_ratio: self.resolution_ratio,
        }
    }

    /// Interpolated row for an index-domain query of this table
    pub fn interpolate(&self, query: f32) -> Result<Vec<f32>> {
        let mut out = Vec::with_capacity(self.embedding_dim());
        self.interpolate_into(query, &mut out)?;
        Ok(out)
    }

    /// Interpolated row for a normalized-time query in `[0, 1]`
    pub fn interpolate_normalized(&self, time: f32) -> Result<Vec<f32>> {
        self.interpolate(EmbeddingQuery::Normalized(time).index_for(self.table_size(), 1))
    }

    /// Append the interpolated row to `out`
    pub fn interpolate_into(&self, query: f32, out: &mut Vec<f32>) -> Result<()> {
        let index = InterpolationIndex::resolve(query, self.table_size())?;
        let cols = self.embedding_dim();
        let data = self.weight.data();
        let a = &data[index.i0 * cols..(index.i0 + 1) * cols];
        let b = &data[index.i1 * cols..(index.i1 + 1) * cols];
        out.extend(a.iter().zip(b).map(|(&a, &b)| lerp(a, b, index.frac)));
        Ok(())
    }
}

/// Look a query up in every table and concatenate in declaration order.
///
/// Each table gets its own scaled copy of the query.
pub fn lookup_all<'a>(
    tables: impl IntoIterator<Item = &'a EmbeddingTable>,
    query: EmbeddingQuery,
) -> Result<Vec<f32>> {
    if !query.raw().is_finite() {
        return Err(ModelError::NonFiniteQuery(query.raw()));
    }
    let mut out = Vec::new();
    for table in tables {
        let q = query.index_for(table.table_size(), table.resolution_ratio());
        table.interpolate_into(q, &mut out)?;
    }
    Ok(out)
}
