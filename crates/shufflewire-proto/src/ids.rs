//! Opaque identifier codecs.
//!
//! The protocol routes on fixed-width byte-string identifiers without
//! interpreting them: they are compared for equality and hashed, nothing
//! more. All multi-byte integers on the wire are big-endian.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::errors::{ProtocolError, Result, ensure_remaining};

/// Identifies a logical receive channel on the consumer side.
///
/// 16 opaque bytes. Every credit, cancel, and data message names the channel
/// it belongs to with this id; the dispatchers use it as their routing key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId([u8; 16]);

impl ChannelId {
    /// Encoded length in bytes.
    pub const WIRE_LENGTH: usize = 16;

    /// Wrap raw id bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// The raw id bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Append the wire form to `dst`.
    pub fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.0);
    }

    /// Read one id from `src`.
    pub fn read_from(src: &mut impl Buf) -> Result<Self> {
        ensure_remaining(src.remaining(), Self::WIRE_LENGTH, "channel id")?;
        let mut bytes = [0u8; 16];
        src.copy_to_slice(&mut bytes);
        Ok(Self(bytes))
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({:#034x})", u128::from_be_bytes(self.0))
    }
}

/// Identifies a producer-side result partition.
///
/// A pair of 16-byte opaque ids: the intermediate partition and the producer
/// attempt that is writing it. Reruns of a producer get a fresh attempt id,
/// so stale requests never attach to a new attempt's output.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionId {
    partition: [u8; 16],
    producer: [u8; 16],
}

impl PartitionId {
    /// Encoded length in bytes.
    pub const WIRE_LENGTH: usize = 32;

    /// Build from the two opaque halves.
    #[must_use]
    pub const fn new(partition: [u8; 16], producer: [u8; 16]) -> Self {
        Self { partition, producer }
    }

    /// The intermediate-partition half.
    #[must_use]
    pub const fn partition(&self) -> &[u8; 16] {
        &self.partition
    }

    /// The producer-attempt half.
    #[must_use]
    pub const fn producer(&self) -> &[u8; 16] {
        &self.producer
    }

    /// Append the wire form to `dst`.
    pub fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.partition);
        dst.put_slice(&self.producer);
    }

    /// Read one id from `src`.
    pub fn read_from(src: &mut impl Buf) -> Result<Self> {
        ensure_remaining(src.remaining(), Self::WIRE_LENGTH, "partition id")?;
        let mut partition = [0u8; 16];
        let mut producer = [0u8; 16];
        src.copy_to_slice(&mut partition);
        src.copy_to_slice(&mut producer);
        Ok(Self { partition, producer })
    }
}

impl fmt::Debug for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PartitionId({:#034x}@{:#034x})",
            u128::from_be_bytes(self.partition),
            u128::from_be_bytes(self.producer)
        )
    }
}

/// A set of non-negative subpartition indices.
///
/// Wire form is a sorted run-length encoding: a `u16` run count followed by
/// that many inclusive `⟨start:u32, end:u32⟩` runs. Runs are normalized:
/// strictly ascending, non-overlapping, non-adjacent. The byte length is
/// therefore derivable from the value itself via [`Self::wire_length`].
///
/// # Invariants
///
/// - `start ≤ end` within each run
/// - each run starts at least two past the previous run's end
/// - at most `u16::MAX` runs (guaranteed by normalization for any set
///   produced from real subpartition counts)
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct SubpartitionIndexSet {
    runs: Vec<(u32, u32)>,
}

impl SubpartitionIndexSet {
    /// Build a normalized set from arbitrary indices (duplicates collapse,
    /// adjacent indices coalesce into runs).
    #[must_use]
    pub fn from_indices(indices: impl IntoIterator<Item = u32>) -> Self {
        let mut sorted: Vec<u32> = indices.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut runs: Vec<(u32, u32)> = Vec::new();
        for index in sorted {
            match runs.last_mut() {
                Some((_, end)) if *end + 1 == index => *end = index,
                _ => runs.push((index, index)),
            }
        }
        Self { runs }
    }

    /// Build a set covering one inclusive range.
    #[must_use]
    pub fn from_range(start: u32, end: u32) -> Self {
        if start > end {
            return Self { runs: Vec::new() };
        }
        Self { runs: vec![(start, end)] }
    }

    /// True if `index` is a member.
    #[must_use]
    pub fn contains(&self, index: u32) -> bool {
        self.runs
            .binary_search_by(|&(start, end)| {
                if index < start {
                    std::cmp::Ordering::Greater
                } else if index > end {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Number of member indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.iter().map(|&(start, end)| (end - start) as usize + 1).sum()
    }

    /// True if the set has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Iterate members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.runs.iter().flat_map(|&(start, end)| start..=end)
    }

    /// Encoded length in bytes, derivable from the value alone.
    #[must_use]
    pub fn wire_length(&self) -> usize {
        2 + 8 * self.runs.len()
    }

    /// Append the wire form to `dst`.
    pub fn write_to(&self, dst: &mut impl BufMut) {
        debug_assert!(self.runs.len() <= usize::from(u16::MAX));
        dst.put_u16(self.runs.len() as u16);
        for &(start, end) in &self.runs {
            dst.put_u32(start);
            dst.put_u32(end);
        }
    }

    /// Read one set from `src`, validating normalization.
    pub fn read_from(src: &mut impl Buf) -> Result<Self> {
        ensure_remaining(src.remaining(), 2, "subpartition set run count")?;
        let num_runs = usize::from(src.get_u16());
        ensure_remaining(src.remaining(), 8 * num_runs, "subpartition set runs")?;

        let mut runs = Vec::with_capacity(num_runs);
        let mut previous_end: Option<u32> = None;
        for _ in 0..num_runs {
            let start = src.get_u32();
            let end = src.get_u32();
            if start > end {
                return Err(ProtocolError::corrupt(format!(
                    "subpartition run {start}..={end} is inverted"
                )));
            }
            if let Some(prev) = previous_end {
                if start <= prev.saturating_add(1) {
                    return Err(ProtocolError::corrupt(
                        "subpartition runs are not normalized ascending",
                    ));
                }
            }
            previous_end = Some(end);
            runs.push((start, end));
        }
        Ok(Self { runs })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;

    #[test]
    fn channel_id_round_trip() {
        let id = ChannelId::from_bytes([7u8; 16]);
        let mut wire = BytesMut::new();
        id.write_to(&mut wire);
        assert_eq!(wire.len(), ChannelId::WIRE_LENGTH);

        let decoded = ChannelId::read_from(&mut wire.freeze()).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn partition_id_round_trip() {
        let id = PartitionId::new([1u8; 16], [2u8; 16]);
        let mut wire = BytesMut::new();
        id.write_to(&mut wire);
        assert_eq!(wire.len(), PartitionId::WIRE_LENGTH);

        let decoded = PartitionId::read_from(&mut wire.freeze()).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn truncated_id_is_corruption() {
        let mut short = BytesMut::from(&[0u8; 5][..]).freeze();
        let err = ChannelId::read_from(&mut short).unwrap_err();
        assert!(matches!(err, ProtocolError::StreamCorruption { .. }));
    }

    #[test]
    fn index_set_coalesces_adjacent_indices() {
        let set = SubpartitionIndexSet::from_indices([4, 1, 2, 2, 0, 9]);
        assert_eq!(set.len(), 5);
        assert!(set.contains(0) && set.contains(2) && set.contains(9));
        assert!(!set.contains(3) && !set.contains(8));
        // {0,1,2}, {4}, {9} -> three runs
        assert_eq!(set.wire_length(), 2 + 8 * 3);
    }

    #[test]
    fn index_set_round_trip() {
        let set = SubpartitionIndexSet::from_indices([0, 1, 2, 5, 6, 42]);
        let mut wire = BytesMut::new();
        set.write_to(&mut wire);
        assert_eq!(wire.len(), set.wire_length());

        let decoded = SubpartitionIndexSet::read_from(&mut wire.freeze()).unwrap();
        assert_eq!(decoded, set);
        assert_eq!(decoded.iter().collect::<Vec<_>>(), vec![0, 1, 2, 5, 6, 42]);
    }

    #[test]
    fn index_set_rejects_unnormalized_runs() {
        // Two overlapping runs: 0..=5 then 3..=7
        let mut wire = BytesMut::new();
        wire.put_u16(2);
        wire.put_u32(0);
        wire.put_u32(5);
        wire.put_u32(3);
        wire.put_u32(7);

        let err = SubpartitionIndexSet::read_from(&mut wire.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::StreamCorruption { .. }));
    }

    #[test]
    fn index_set_rejects_inverted_run() {
        let mut wire = BytesMut::new();
        wire.put_u16(1);
        wire.put_u32(9);
        wire.put_u32(3);

        let err = SubpartitionIndexSet::read_from(&mut wire.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::StreamCorruption { .. }));
    }

    #[test]
    fn empty_index_set() {
        let set = SubpartitionIndexSet::from_indices([]);
        assert!(set.is_empty());
        assert_eq!(set.wire_length(), 2);

        let mut wire = BytesMut::new();
        set.write_to(&mut wire);
        let decoded = SubpartitionIndexSet::read_from(&mut wire.freeze()).unwrap();
        assert!(decoded.is_empty());
    }
}
