use crate::hash_index::{KeyExtractor, KeyKind, Position};
use crate::table::Table;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Widest supported partition id, in bits. Partitioning materialises
/// `2^bits` histogram, prefix and cursor slots per side.
pub const MAX_RADIX_BITS: u32 = 20;

/// Two-pass radix layout: `bits1` low hash bits, then the next `bits2` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RadixBits {
    pub bits1: u32,
    pub bits2: u32,
}

impl RadixBits {
    pub fn new(bits1: u32, bits2: u32) -> Result<Self> {
        let bits = Self { bits1, bits2 };
        bits.validate()?;
        Ok(bits)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bits1.saturating_add(self.bits2) > MAX_RADIX_BITS {
            return Err(Error::PartitionMismatch(format!(
                "bits1 + bits2 = {} exceeds {} bits",
                self.bits1.saturating_add(self.bits2),
                MAX_RADIX_BITS
            )));
        }
        Ok(())
    }

    pub fn partition_count(&self) -> usize {
        1usize << (self.bits1 + self.bits2)
    }

    /// Partition id of a hash: the `bits1` field becomes the high part and the
    /// `bits2` field above it becomes the low part.
    #[inline]
    pub fn partition_of(&self, hash: u64) -> usize {
        let mask1 = (1u64 << self.bits1) - 1;
        let mask2 = ((1u64 << self.bits2) - 1) << self.bits1;
        (((hash & mask1) << self.bits2) + ((hash & mask2) >> self.bits1)) as usize
    }
}

/// Start offset of every partition in a partition-ordered row sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixSumTable {
    offsets: Vec<usize>,
}

impl PrefixSumTable {
    pub fn new(offsets: Vec<usize>) -> Result<Self> {
        if offsets.is_empty() {
            return Err(Error::PartitionMismatch(
                "prefix sum table needs at least one partition".to_string(),
            ));
        }
        if offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::PartitionMismatch(
                "prefix sum offsets must be non-decreasing".to_string(),
            ));
        }
        Ok(Self { offsets })
    }

    /// Exclusive prefix sum of per-partition row counts.
    pub fn from_histogram(histogram: &[usize]) -> Result<Self> {
        let mut offsets = Vec::with_capacity(histogram.len());
        let mut running = 0usize;
        for &count in histogram {
            offsets.push(running);
            running += count;
        }
        Self::new(offsets)
    }

    pub fn partitions(&self) -> usize {
        self.offsets.len()
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Rows of partition `p`; the last partition runs to `total`.
    pub fn range(&self, partition: usize, total: usize) -> std::ops::Range<usize> {
        let begin = self.offsets[partition].min(total);
        let end = if partition + 1 == self.offsets.len() {
            total
        } else {
            self.offsets[partition + 1].min(total)
        };
        begin..end.max(begin)
    }
}

/// One join input, partition-ordered: parallel hash/position arrays and the
/// prefix table that delimits each partition.
#[derive(Debug, Clone)]
pub struct JoinSide {
    hashes: Vec<u64>,
    positions: Vec<Position>,
    prefix: PrefixSumTable,
}

impl JoinSide {
    /// Accept arrays produced elsewhere. Their row order must already follow the
    /// prefix table's partitions.
    pub fn new(hashes: Vec<u64>, positions: Vec<Position>, prefix: PrefixSumTable) -> Result<Self> {
        if hashes.len() != positions.len() {
            return Err(Error::PartitionMismatch(format!(
                "{} hashes but {} positions",
                hashes.len(),
                positions.len()
            )));
        }
        if let Some(&last) = prefix.offsets().last() {
            if last > hashes.len() {
                return Err(Error::PartitionMismatch(format!(
                    "prefix offset {} past {} rows",
                    last,
                    hashes.len()
                )));
            }
        }
        Ok(Self {
            hashes,
            positions,
            prefix,
        })
    }

    /// Hash the join key of every row and counting-sort the rows by partition id.
    pub fn partition(table: &dyn Table, fields: &[usize], bits: RadixBits) -> Result<Self> {
        bits.validate()?;
        let extractor = KeyExtractor::for_table(KeyKind::Join, fields.to_vec(), table)?;
        let rows = table.row_count();
        let offset = table.base_offset();
        offset.checked_add(rows).ok_or(Error::PositionOverflow)?;

        let start = Instant::now();
        let hashes: Vec<u64> = (0..rows)
            .map(|row| extractor.extract(table, row).hash_value())
            .collect();

        let mut histogram = vec![0usize; bits.partition_count()];
        for &hash in &hashes {
            histogram[bits.partition_of(hash)] += 1;
        }
        let prefix = PrefixSumTable::from_histogram(&histogram)?;

        let mut cursor = prefix.offsets().to_vec();
        let mut sorted_hashes = vec![0u64; rows];
        let mut sorted_positions = vec![0 as Position; rows];
        for (row, &hash) in hashes.iter().enumerate() {
            let slot = &mut cursor[bits.partition_of(hash)];
            sorted_hashes[*slot] = hash;
            sorted_positions[*slot] = row + offset;
            *slot += 1;
        }

        debug!(
            rows,
            partitions = histogram.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Join side partitioned"
        );
        Self::new(sorted_hashes, sorted_positions, prefix)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    pub fn hashes(&self) -> &[u64] {
        &self.hashes
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn prefix(&self) -> &PrefixSumTable {
        &self.prefix
    }

    pub fn partition_range(&self, partition: usize) -> std::ops::Range<usize> {
        self.prefix.range(partition, self.hashes.len())
    }
}
