//! Time-ordered constant-value trace fragments
//!
//! A [`FragmentSequence`] is the immutable form every trace (cost, carbon
//! intensity, CPU utilization) takes once a loader has parsed it. Fragments
//! are sorted, non-overlapping, half-open intervals whose union covers every
//! instant a simulation run will query.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// A time-bounded constant-value record. Interval is half-open:
/// `start_time <= t < end_time`. Times are simulated milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub start_time: i64,
    pub end_time: i64,
    pub value: f64,
}

impl Fragment {
    pub fn contains(&self, t: i64) -> bool {
        self.start_time <= t && t < self.end_time
    }
}

/// How the outermost fragments are bounded.
///
/// Cost traces historically extend the first fragment to the minimum
/// representable time so no queried instant falls before the trace; carbon
/// loaders keep the recorded bounds. Which behavior applies is a per-sequence
/// choice made by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    /// First fragment starts at `i64::MIN`, last fragment ends at `i64::MAX`.
    Extend,
    /// Keep the recorded bounds; times outside them are a terminal state for
    /// the consuming node.
    Strict,
}

/// An immutable, time-ordered sequence of fragments.
///
/// Built once by a loader, then shared read-only (`Rc`) across every node
/// reading the same trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentSequence {
    fragments: Vec<Fragment>,
}

impl FragmentSequence {
    /// Build a sequence from `(start_time, end_time, value)` interval rows,
    /// the cost-trace wire shape. Rows must be sorted and non-overlapping.
    pub fn from_intervals(
        rows: Vec<(i64, i64, f64)>,
        policy: BoundaryPolicy,
    ) -> Result<Self, SimError> {
        if rows.is_empty() {
            return Err(SimError::EmptyTrace("interval trace".to_string()));
        }

        let mut fragments = Vec::with_capacity(rows.len());
        for (i, &(start, end, value)) in rows.iter().enumerate() {
            if end <= start {
                return Err(SimError::UnsortedTrace(i));
            }
            if let Some(prev) = fragments.last() {
                let prev: &Fragment = prev;
                if start < prev.end_time {
                    return Err(SimError::OverlappingTrace(i));
                }
            }
            fragments.push(Fragment {
                start_time: start,
                end_time: end,
                value,
            });
        }

        if policy == BoundaryPolicy::Extend {
            fragments.first_mut().unwrap().start_time = i64::MIN;
            fragments.last_mut().unwrap().end_time = i64::MAX;
        }

        Ok(FragmentSequence { fragments })
    }

    /// Build a sequence from `(timestamp, value)` single-point samples, the
    /// carbon-intensity wire shape. Each sample's end time is implied by the
    /// next sample; the last sample extends forever. The first sample's start
    /// is extended to the minimum representable time under
    /// [`BoundaryPolicy::Extend`].
    pub fn from_samples(
        mut rows: Vec<(i64, f64)>,
        policy: BoundaryPolicy,
    ) -> Result<Self, SimError> {
        if rows.is_empty() {
            return Err(SimError::EmptyTrace("sample trace".to_string()));
        }

        rows.sort_by_key(|&(t, _)| t);

        let mut fragments = Vec::with_capacity(rows.len());
        for (i, &(start, value)) in rows.iter().enumerate() {
            let end = match rows.get(i + 1) {
                Some(&(next_start, _)) => {
                    if next_start == start {
                        return Err(SimError::OverlappingTrace(i + 1));
                    }
                    next_start
                }
                None => i64::MAX,
            };
            fragments.push(Fragment {
                start_time: start,
                end_time: end,
                value,
            });
        }

        if policy == BoundaryPolicy::Extend {
            fragments.first_mut().unwrap().start_time = i64::MIN;
        }

        Ok(FragmentSequence { fragments })
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn get(&self, index: usize) -> &Fragment {
        &self.fragments[index]
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Look up the value whose fragment covers `t`, if any.
    pub fn value_at(&self, t: i64) -> Option<f64> {
        let idx = self
            .fragments
            .partition_point(|f| f.start_time <= t)
            .checked_sub(1)?;
        let frag = &self.fragments[idx];
        frag.contains(t).then_some(frag.value)
    }

    pub fn into_shared(self) -> Rc<FragmentSequence> {
        Rc::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intervals_preserve_values() {
        let seq = FragmentSequence::from_intervals(
            vec![(0, 100, 5.0), (100, 200, 10.0)],
            BoundaryPolicy::Strict,
        )
        .unwrap();

        assert_eq!(seq.len(), 2);
        assert_eq!(seq.get(0).value, 5.0);
        assert_eq!(seq.get(1).start_time, 100);
    }

    #[test]
    fn test_extend_policy_unbounds_edges() {
        let seq = FragmentSequence::from_intervals(
            vec![(0, 100, 5.0), (100, 200, 10.0)],
            BoundaryPolicy::Extend,
        )
        .unwrap();

        assert_eq!(seq.get(0).start_time, i64::MIN);
        assert_eq!(seq.get(1).end_time, i64::MAX);

        // Lookups before the first recorded instant never fail
        assert_eq!(seq.value_at(-1_000_000), Some(5.0));
        assert_eq!(seq.value_at(1_000_000), Some(10.0));
    }

    #[test]
    fn test_samples_imply_end_times() {
        let seq = FragmentSequence::from_samples(
            vec![(200, 3.0), (0, 1.0), (100, 2.0)],
            BoundaryPolicy::Strict,
        )
        .unwrap();

        // Sorted by timestamp, end implied by next sample
        assert_eq!(seq.get(0).start_time, 0);
        assert_eq!(seq.get(0).end_time, 100);
        assert_eq!(seq.get(1).end_time, 200);
        assert_eq!(seq.get(2).end_time, i64::MAX);
    }

    #[test]
    fn test_empty_trace_rejected() {
        let err = FragmentSequence::from_intervals(vec![], BoundaryPolicy::Extend);
        assert!(matches!(err, Err(SimError::EmptyTrace(_))));

        let err = FragmentSequence::from_samples(vec![], BoundaryPolicy::Extend);
        assert!(matches!(err, Err(SimError::EmptyTrace(_))));
    }

    #[test]
    fn test_overlap_rejected() {
        let err = FragmentSequence::from_intervals(
            vec![(0, 100, 5.0), (50, 200, 10.0)],
            BoundaryPolicy::Strict,
        );
        assert!(matches!(err, Err(SimError::OverlappingTrace(1))));
    }

    #[test]
    fn test_coverage_every_instant_in_one_fragment() {
        let seq = FragmentSequence::from_intervals(
            vec![(0, 100, 1.0), (100, 250, 2.0), (250, 400, 3.0)],
            BoundaryPolicy::Strict,
        )
        .unwrap();

        for t in (0..400).step_by(7) {
            let covering: Vec<&Fragment> =
                seq.fragments().iter().filter(|f| f.contains(t)).collect();
            assert_eq!(covering.len(), 1, "instant {t} covered by exactly one fragment");
            assert_eq!(seq.value_at(t), Some(covering[0].value));
        }

        // Exact boundary belongs to the following fragment (half-open)
        assert_eq!(seq.value_at(100), Some(2.0));
        assert_eq!(seq.value_at(400), None);
    }
}
