use super::{JoinSide, RadixBits};
use crate::hash_index::Position;
use crate::table::Table;
use crate::{Error, Result};
use rayon::prelude::*;
use std::time::Instant;
use tracing::debug;

/// Matched row pairs as two parallel position lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinPositions {
    pub left: Vec<Position>,
    pub right: Vec<Position>,
}

impl JoinPositions {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            left: Vec::with_capacity(capacity),
            right: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.left.len()
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    pub fn push(&mut self, left: Position, right: Position) {
        self.left.push(left);
        self.right.push(right);
    }

    pub fn extend(&mut self, other: JoinPositions) {
        self.left.extend(other.left);
        self.right.extend(other.right);
    }

    pub fn pairs(&self) -> impl Iterator<Item = (Position, Position)> + '_ {
        self.left.iter().copied().zip(self.right.iter().copied())
    }
}

/// Partitioned hash-equality join between two partition-ordered sides.
///
/// Every left row of an assigned partition is compared against the right
/// partition its hash maps to under `bits`. The right side must have been
/// partitioned with the same bits.
#[derive(Debug, Clone)]
pub struct EquiJoinProbe {
    bits: RadixBits,
    partitions: Vec<usize>,
}

impl EquiJoinProbe {
    pub fn new(bits: RadixBits, partitions: Vec<usize>) -> Result<Self> {
        bits.validate()?;
        Ok(Self { bits, partitions })
    }

    /// Probe every partition of the left side.
    pub fn all_partitions(bits: RadixBits, left: &JoinSide) -> Result<Self> {
        Self::new(bits, (0..left.prefix().partitions()).collect())
    }

    pub fn bits(&self) -> RadixBits {
        self.bits
    }

    pub fn partitions(&self) -> &[usize] {
        &self.partitions
    }

    fn check(&self, left: &JoinSide, right: &JoinSide) -> Result<()> {
        let expected = self.bits.partition_count();
        if right.prefix().partitions() != expected {
            return Err(Error::PartitionMismatch(format!(
                "right side has {} partitions, bits1={} bits2={} need {}",
                right.prefix().partitions(),
                self.bits.bits1,
                self.bits.bits2,
                expected
            )));
        }
        if let Some(&partition) = self
            .partitions
            .iter()
            .find(|&&p| p >= left.prefix().partitions())
        {
            return Err(Error::PartitionMismatch(format!(
                "partition {} out of range for left side with {} partitions",
                partition,
                left.prefix().partitions()
            )));
        }
        Ok(())
    }

    fn probe_partition(&self, partition: usize, left: &JoinSide, right: &JoinSide) -> JoinPositions {
        let mut output = JoinPositions::default();
        let (left_hashes, right_hashes) = (left.hashes(), right.hashes());
        for left_row in left.partition_range(partition) {
            let hash = left_hashes[left_row];
            for right_row in right.partition_range(self.bits.partition_of(hash)) {
                if right_hashes[right_row] == hash {
                    output.push(left.positions()[left_row], right.positions()[right_row]);
                }
            }
        }
        output
    }

    pub fn probe(&self, left: &JoinSide, right: &JoinSide) -> Result<JoinPositions> {
        self.check(left, right)?;
        let start = Instant::now();
        let mut output = JoinPositions::with_capacity(left.len());
        for &partition in &self.partitions {
            output.extend(self.probe_partition(partition, left, right));
        }
        debug!(
            partitions = self.partitions.len(),
            matches = output.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Join probe finished"
        );
        Ok(output)
    }

    /// Probe the assigned partitions on the current rayon pool. Emits the same
    /// pairs as [`probe`](Self::probe).
    pub fn probe_parallel(&self, left: &JoinSide, right: &JoinSide) -> Result<JoinPositions> {
        self.check(left, right)?;
        let start = Instant::now();
        let parts: Vec<JoinPositions> = self
            .partitions
            .par_iter()
            .map(|&partition| self.probe_partition(partition, left, right))
            .collect();
        let mut output = JoinPositions::with_capacity(parts.iter().map(JoinPositions::len).sum());
        for part in parts {
            output.extend(part);
        }
        debug!(
            partitions = self.partitions.len(),
            threads = rayon::current_num_threads(),
            matches = output.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Parallel join probe finished"
        );
        Ok(output)
    }
}

fn local_row(table: &dyn Table, position: Position) -> Result<usize> {
    let base = table.base_offset();
    position
        .checked_sub(base)
        .filter(|&row| row < table.row_count())
        .ok_or(Error::InvalidRange {
            first: position,
            last: base + table.row_count(),
        })
}

/// Keep only pairs whose join columns hold equal values, dropping hash collisions.
pub fn verify_exact(
    pairs: &JoinPositions,
    left: &dyn Table,
    left_fields: &[usize],
    right: &dyn Table,
    right_fields: &[usize],
) -> Result<JoinPositions> {
    if left_fields.len() != right_fields.len() {
        return Err(Error::KeyMismatch {
            expected: left_fields.len(),
            actual: right_fields.len(),
        });
    }
    for (table, fields) in [(left, left_fields), (right, right_fields)] {
        if let Some(&column) = fields.iter().find(|&&c| c >= table.column_count()) {
            return Err(Error::ColumnOutOfRange {
                column,
                columns: table.column_count(),
            });
        }
    }

    let mut verified = JoinPositions::with_capacity(pairs.len());
    for (l, r) in pairs.pairs() {
        let (left_row, right_row) = (local_row(left, l)?, local_row(right, r)?);
        let equal = left_fields
            .iter()
            .zip(right_fields)
            .all(|(&lc, &rc)| left.value(lc, left_row) == right.value(rc, right_row));
        if equal {
            verified.push(l, r);
        }
    }
    if verified.len() != pairs.len() {
        debug!(
            candidates = pairs.len(),
            dropped = pairs.len() - verified.len(),
            "Hash collisions removed"
        );
    }
    Ok(verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::PrefixSumTable;
    use crate::table::ColumnarTable;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
    use tracing_subscriber::Registry;

    fn single_partition(hashes: Vec<u64>) -> JoinSide {
        let positions = (0..hashes.len()).collect();
        JoinSide::new(hashes, positions, PrefixSumTable::new(vec![0]).unwrap()).unwrap()
    }

    /// Collects the level of every event emitted while installed.
    struct LevelRecorder(Arc<Mutex<Vec<Level>>>);

    impl<S: Subscriber> Layer<S> for LevelRecorder {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            self.0.lock().push(*event.metadata().level());
        }
    }

    fn sorted_pairs(output: &JoinPositions) -> Vec<(Position, Position)> {
        let mut pairs: Vec<_> = output.pairs().collect();
        pairs.sort();
        pairs
    }

    #[test]
    fn test_probe_emits_every_hash_equal_pair() {
        let left = single_partition(vec![5, 5, 9]);
        let right = single_partition(vec![5, 9, 9]);
        let probe = EquiJoinProbe::new(RadixBits::new(0, 0).unwrap(), vec![0]).unwrap();
        let output = probe.probe(&left, &right).unwrap();
        assert_eq!(sorted_pairs(&output), vec![(0, 0), (1, 0), (2, 1), (2, 2)]);
        assert_eq!(probe.probe_parallel(&left, &right).unwrap().len(), 4);
    }

    #[test]
    fn test_both_probe_paths_log_at_debug() {
        let left = single_partition(vec![5, 5, 9]);
        let right = single_partition(vec![5, 9, 9]);
        let probe = EquiJoinProbe::new(RadixBits::new(0, 0).unwrap(), vec![0]).unwrap();

        let levels = Arc::new(Mutex::new(Vec::new()));
        let subscriber = Registry::default().with(LevelRecorder(levels.clone()));
        tracing::subscriber::with_default(subscriber, || {
            probe.probe(&left, &right).unwrap();
            probe.probe_parallel(&left, &right).unwrap();
        });

        let levels = levels.lock();
        assert_eq!(levels.iter().filter(|&&level| level == Level::DEBUG).count(), 2);
        assert!(levels.iter().all(|&level| level != Level::INFO));
    }

    #[test]
    fn test_partitioned_probe_matches_nested_loop() {
        let left_keys: Vec<i64> = (0..200).map(|i| (i * 7) % 31).collect();
        let right_keys: Vec<i64> = (0..150).map(|i| (i * 5) % 23).collect();
        let left_table = ColumnarTable::from_i64_columns(&[("k", left_keys.clone())]).unwrap();
        let right_table = ColumnarTable::from_i64_columns(&[("k", right_keys.clone())]).unwrap();

        let mut expected = Vec::new();
        for (l, lk) in left_keys.iter().enumerate() {
            for (r, rk) in right_keys.iter().enumerate() {
                if lk == rk {
                    expected.push((l, r));
                }
            }
        }
        expected.sort();

        for (bits1, bits2) in [(0, 0), (1, 2), (3, 0), (2, 2)] {
            let bits = RadixBits::new(bits1, bits2).unwrap();
            let left = JoinSide::partition(&left_table, &[0], bits).unwrap();
            let right = JoinSide::partition(&right_table, &[0], bits).unwrap();
            let probe = EquiJoinProbe::all_partitions(bits, &left).unwrap();
            assert_eq!(sorted_pairs(&probe.probe(&left, &right).unwrap()), expected);
            assert_eq!(sorted_pairs(&probe.probe_parallel(&left, &right).unwrap()), expected);
        }
    }

    #[test]
    fn test_disjoint_partition_subsets_cover_whole_join() {
        let table = ColumnarTable::from_i64_columns(&[("k", (0..64).map(|i| i % 9).collect())])
            .unwrap();
        let bits = RadixBits::new(2, 1).unwrap();
        let side = JoinSide::partition(&table, &[0], bits).unwrap();
        let whole = EquiJoinProbe::all_partitions(bits, &side)
            .unwrap()
            .probe(&side, &side)
            .unwrap();

        let mut combined = JoinPositions::default();
        for assigned in [vec![0, 2, 4, 6], vec![1, 3, 5, 7]] {
            let probe = EquiJoinProbe::new(bits, assigned).unwrap();
            combined.extend(probe.probe(&side, &side).unwrap());
        }
        assert_eq!(sorted_pairs(&combined), sorted_pairs(&whole));
    }

    #[test]
    fn test_mismatched_bits_rejected() {
        let left = single_partition(vec![1]);
        let right = single_partition(vec![1]);
        let probe = EquiJoinProbe::new(RadixBits::new(1, 0).unwrap(), vec![0]).unwrap();
        assert!(matches!(
            probe.probe(&left, &right),
            Err(Error::PartitionMismatch(_))
        ));

        let probe = EquiJoinProbe::new(RadixBits::default(), vec![3]).unwrap();
        assert!(matches!(
            probe.probe(&left, &right),
            Err(Error::PartitionMismatch(_))
        ));
    }

    #[test]
    fn test_verify_exact_drops_collisions() {
        let left = ColumnarTable::from_i64_columns(&[("k", vec![1, 2])]).unwrap();
        let right = ColumnarTable::from_i64_columns(&[("k", vec![2, 1])]).unwrap();
        let mut candidates = JoinPositions::default();
        candidates.push(0, 1);
        candidates.push(0, 0);
        candidates.push(1, 0);
        let verified = verify_exact(&candidates, &left, &[0], &right, &[0]).unwrap();
        assert_eq!(sorted_pairs(&verified), vec![(0, 1), (1, 0)]);

        candidates.push(5, 0);
        assert!(verify_exact(&candidates, &left, &[0], &right, &[0]).is_err());
    }
}
