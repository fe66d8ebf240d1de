use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::Number;
use crate::error::{Result, RetrievalError};
use crate::vector_ops::squared_l2_distance_simd;

/// One search hit: the row of the matching vector and its squared L2
/// distance to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub position: usize,
    pub distance: Number,
}

/// Exact nearest-neighbour index over a flat, row-major vector buffer.
///
/// Row `i` holds the vector inserted `i`-th, which is what keeps a vector
/// aligned with the chunk of the same position. The index is immutable once
/// built, so concurrent searches need no locking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dimensions: usize,
    data: Vec<Number>,
}

impl FlatIndex {
    pub fn build(vectors: &[Vec<Number>]) -> Result<Self> {
        let first = vectors.first().ok_or_else(|| {
            RetrievalError::EmptyInput("cannot build an index from zero vectors".into())
        })?;
        let dimensions = first.len();
        if dimensions == 0 {
            return Err(RetrievalError::InvalidArgument(
                "vectors must have at least one dimension".into(),
            ));
        }

        let mut data = Vec::with_capacity(dimensions * vectors.len());
        for vector in vectors {
            if vector.len() != dimensions {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimensions,
                    actual: vector.len(),
                });
            }
            data.extend_from_slice(vector);
        }

        log::debug!(
            "Built flat index with {} vectors of {} dimensions",
            vectors.len(),
            dimensions
        );
        Ok(Self { dimensions, data })
    }

    /// Returns the `min(k, len)` nearest rows, nearest first. Equal distances
    /// are ordered by position.
    pub fn search(&self, query: &[Number], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(RetrievalError::InvalidArgument("k must be positive".into()));
        }
        if query.len() != self.dimensions {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }

        let mut neighbors: Vec<Neighbor> = self
            .data
            .par_chunks_exact(self.dimensions)
            .enumerate()
            .map(|(position, vector)| Neighbor {
                position,
                distance: squared_l2_distance_simd(query, vector),
            })
            .collect();

        neighbors.sort_unstable_by(compare_neighbors);
        neighbors.truncate(k);
        Ok(neighbors)
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dimensions.max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn vector(&self, position: usize) -> Option<&[Number]> {
        let start = position.checked_mul(self.dimensions)?;
        let end = start.checked_add(self.dimensions)?;
        self.data.get(start..end)
    }

    pub(crate) fn raw_data(&self) -> &[Number] {
        &self.data
    }

    /// Checks the shape of an index that came from outside the process.
    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.dimensions == 0 {
            return Err("index has zero dimensions".into());
        }
        if self.data.len() % self.dimensions != 0 {
            return Err(format!(
                "index buffer of {} values is not a multiple of {} dimensions",
                self.data.len(),
                self.dimensions
            ));
        }
        Ok(())
    }
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.position.cmp(&b.position))
}
