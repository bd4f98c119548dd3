//! Exact inner-product index over normalized vectors.
//!
//! Vectors are stored row-major in insertion order; a vector's position is the
//! join key into the metadata store. The on-disk form is a small header
//! (`magic`, dimension, count) followed by little-endian `f32` rows.

use crate::error::SearchError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

const MAGIC: &[u8; 8] = b"PRAGFLT1";

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&mut self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                found: vector.len(),
            });
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Top `k` `(position, score)` pairs by inner product, best first.
    /// Equal scores keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, SearchError> {
        if query.len() != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                found: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dimension.max(1))
            .enumerate()
            .map(|(position, row)| (position, dot(row, query)))
            .collect();

        scored.sort_by(|left, right| right.1.total_cmp(&left.1));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_u32::<LittleEndian>(self.dimension as u32)?;
        writer.write_u64::<LittleEndian>(self.len() as u64)?;
        for value in &self.data {
            writer.write_f32::<LittleEndian>(*value)?;
        }
        writer.flush()
    }

    pub fn read_from<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "not a flat vector index file",
            ));
        }

        let dimension = reader.read_u32::<LittleEndian>()? as usize;
        let count = reader.read_u64::<LittleEndian>()? as usize;
        let total = dimension.checked_mul(count).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "index header overflows")
        })?;

        let mut data = vec![0f32; total];
        reader.read_f32_into::<LittleEndian>(&mut data)?;

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "trailing bytes after vector data",
            ));
        }

        Ok(Self { dimension, data })
    }
}

fn dot(left: &[f32], right: &[f32]) -> f32 {
    left.iter().zip(right).map(|(a, b)| a * b).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(rows: &[[f32; 2]]) -> FlatIndex {
        let mut index = FlatIndex::new(2);
        for row in rows {
            index.add(row).expect("row has the index dimension");
        }
        index
    }

    #[test]
    fn search_orders_by_inner_product() -> Result<(), SearchError> {
        let index = index_of(&[[1.0, 0.0], [0.0, 1.0], [0.6, 0.8]]);
        let hits = index.search(&[0.0, 1.0], 3)?;
        let positions: Vec<usize> = hits.iter().map(|hit| hit.0).collect();
        assert_eq!(positions, vec![1, 2, 0]);
        assert!(hits.windows(2).all(|pair| pair[0].1 >= pair[1].1));
        Ok(())
    }

    #[test]
    fn ties_keep_insertion_order_and_k_caps_results() -> Result<(), SearchError> {
        let index = index_of(&[[0.0, 1.0], [1.0, 0.0], [1.0, 0.0], [1.0, 0.0]]);
        let hits = index.search(&[1.0, 0.0], 2)?;
        assert_eq!(hits.iter().map(|hit| hit.0).collect::<Vec<_>>(), vec![1, 2]);

        let all = index.search(&[1.0, 0.0], 10)?;
        assert_eq!(all.len(), 4);
        Ok(())
    }

    #[test]
    fn nan_rows_do_not_break_the_ordering() -> Result<(), SearchError> {
        let index = index_of(&[[1.0, 0.0], [f32::NAN, 0.0], [0.5, 0.0]]);
        let hits = index.search(&[1.0, 0.0], 3)?;
        assert_eq!(hits.len(), 3);

        let finite: Vec<usize> = hits
            .iter()
            .filter(|hit| !hit.1.is_nan())
            .map(|hit| hit.0)
            .collect();
        assert_eq!(finite, vec![0, 2]);
        Ok(())
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let mut index = FlatIndex::new(3);
        assert!(matches!(
            index.add(&[1.0]),
            Err(SearchError::DimensionMismatch { expected: 3, found: 1 })
        ));
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn persisted_index_reads_back_identically() -> std::io::Result<()> {
        let index = index_of(&[[0.25, -0.5], [1.0, 0.0]]);
        let mut bytes = Vec::new();
        index.write_to(&mut bytes)?;

        let restored = FlatIndex::read_from(bytes.as_slice())?;
        assert_eq!(restored, index);
        assert_eq!(restored.vector(1), Some(&[1.0, 0.0][..]));
        Ok(())
    }

    #[test]
    fn truncated_file_is_rejected() -> std::io::Result<()> {
        let index = index_of(&[[0.25, -0.5], [1.0, 0.0]]);
        let mut bytes = Vec::new();
        index.write_to(&mut bytes)?;
        bytes.truncate(bytes.len() - 2);

        assert!(FlatIndex::read_from(bytes.as_slice()).is_err());
        Ok(())
    }
}
