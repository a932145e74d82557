//! Accumulation of data fragments into one profile's worth of parts.

use std::time::Instant;

use crate::packet::{DataFragment, FragmentSource};

/// Fragments collected for a single `(source, timestamp)` key.
///
/// A set completes when it holds as many parts as the wire promised. The
/// receive loop closes a still-incomplete set when a newer timestamp
/// arrives from the same source, or on sweep timeout.
#[derive(Debug)]
pub(crate) struct FragmentSet {
    source: FragmentSource,
    timestamp_ns: u64,
    num_parts: u8,
    fragments: Vec<DataFragment>,
    complete: bool,
    created: Instant,
}

impl FragmentSet {
    pub fn new(first: DataFragment, now: Instant) -> FragmentSet {
        let complete = first.num_parts == 1;
        FragmentSet {
            source: first.source,
            timestamp_ns: first.timestamp_ns,
            num_parts: first.num_parts,
            complete,
            created: now,
            fragments: vec![first],
        }
    }

    pub fn source(&self) -> FragmentSource {
        self.source
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn fragments(&self) -> &[DataFragment] {
        &self.fragments
    }

    /// True when the fragment belongs to this set's key.
    pub fn accepts(&self, fragment: &DataFragment) -> bool {
        fragment.source == self.source && fragment.timestamp_ns == self.timestamp_ns
    }

    /// Add a fragment of the same key. Returns false (and drops the
    /// fragment) on a key mismatch.
    pub fn add(&mut self, fragment: DataFragment) -> bool {
        if !self.accepts(&fragment) {
            return false;
        }
        self.fragments.push(fragment);
        self.complete = self.fragments.len() >= usize::from(self.num_parts);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DataType;
    use crate::packet::device_sim::{build_fragment, FragmentParams};
    use crate::types::{Camera, Laser};

    fn fragment(part_num: u8, num_parts: u8, timestamp_ns: u64) -> DataFragment {
        let pkt = build_fragment(&FragmentParams {
            source: FragmentSource {
                head_id: 1,
                camera: Camera::A,
                laser: Laser::L1,
            },
            timestamp_ns,
            part_num,
            num_parts,
            data_types: DataType::LM,
            steps: vec![1],
            start_col: 0,
            end_col: 7,
            encoder_values: vec![],
            payload_length: 8,
            payload: vec![0; 8],
        });
        DataFragment::parse(&pkt).unwrap()
    }

    #[test]
    fn single_part_set_is_immediately_complete() {
        let set = FragmentSet::new(fragment(0, 1, 10), Instant::now());
        assert!(set.is_complete());
        assert_eq!(set.fragments().len(), 1);
    }

    #[test]
    fn completes_when_all_parts_arrive() {
        let mut set = FragmentSet::new(fragment(0, 3, 10), Instant::now());
        assert!(!set.is_complete());
        assert!(set.add(fragment(2, 3, 10)));
        assert!(!set.is_complete());
        assert!(set.add(fragment(1, 3, 10)));
        assert!(set.is_complete());
    }

    #[test]
    fn refuses_foreign_timestamps() {
        let mut set = FragmentSet::new(fragment(0, 2, 10), Instant::now());
        assert!(!set.add(fragment(1, 2, 11)));
        assert!(!set.is_complete());
        assert_eq!(set.fragments().len(), 1);
    }
}
