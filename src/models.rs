//! Resource update nodes: cost and carbon models
//!
//! A [`ResourceUpdateNode`] binds one host to one fragment sequence and
//! pushes the active fragment's value into the host whenever the active
//! fragment changes. Cost and carbon intensity share the same state
//! machine; only the host field they write differs.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::engine::NEVER;
use crate::error::SimError;
use crate::fragment::FragmentSequence;
use crate::host::HostState;

/// Which host field the node pushes updates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceTarget {
    Cost,
    CarbonIntensity,
}

/// Flow node that tracks a fragment sequence over simulated time.
///
/// The node is either *tracking* (the cursor's fragment covers the current
/// instant) or momentarily *searching* during [`ResourceUpdateNode::update`],
/// which walks the cursor backward then forward until the covering fragment
/// is found. Walking off either end of the sequence is a terminal state: the
/// node retires and the host keeps the last pushed value.
#[derive(Debug)]
pub struct ResourceUpdateNode {
    sequence: Rc<FragmentSequence>,
    index: usize,
    host: Rc<RefCell<HostState>>,
    target: ResourceTarget,
    retired: bool,
}

impl ResourceUpdateNode {
    /// Bind a sequence to a host. Refuses an empty sequence: running a
    /// resource node with no fragments would leave the host undefined.
    pub fn new(
        sequence: Rc<FragmentSequence>,
        host: Rc<RefCell<HostState>>,
        target: ResourceTarget,
    ) -> Result<Self, SimError> {
        if sequence.is_empty() {
            return Err(SimError::EmptyTrace(format!(
                "{target:?} trace for host '{}'",
                host.borrow().name()
            )));
        }

        let node = ResourceUpdateNode {
            sequence,
            index: 0,
            host,
            target,
            retired: false,
        };
        node.push(node.sequence.get(0).value);
        Ok(node)
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Cursor into the sequence; `fragments[index]` covers the last update
    /// instant whenever the node is not retired.
    pub fn fragment_index(&self) -> usize {
        self.index
    }

    /// Advance the cursor to the fragment covering `now`, push its value to
    /// the host, and report the fragment's end as the next wake time.
    pub fn update(&mut self, now: i64) -> i64 {
        if self.retired {
            return NEVER;
        }

        // Walk backward while time is earlier than the cursor's fragment,
        // then forward while time is at or past its end. Fragments are
        // contiguous and sorted, so both phases converge.
        while now < self.sequence.get(self.index).start_time {
            if self.index == 0 {
                return self.retire(now);
            }
            self.index -= 1;
        }
        while now >= self.sequence.get(self.index).end_time {
            if self.index + 1 >= self.sequence.len() {
                return self.retire(now);
            }
            self.index += 1;
        }

        let fragment = self.sequence.get(self.index);
        self.push(fragment.value);
        fragment.end_time
    }

    fn retire(&mut self, now: i64) -> i64 {
        debug!(
            target_field = ?self.target,
            host = %self.host.borrow().name(),
            now,
            "trace exhausted, node retiring"
        );
        self.retired = true;
        NEVER
    }

    fn push(&self, value: f64) {
        let mut host = self.host.borrow_mut();
        match self.target {
            ResourceTarget::Cost => host.update_cost(value),
            ResourceTarget::CarbonIntensity => host.update_carbon_intensity(value),
        }
    }
}
