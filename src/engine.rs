//! Event-driven flow graph engine
//!
//! The engine owns an arena of flow nodes and a global timeline of pending
//! wake times. Simulated time only moves when something is due: each node
//! reports, from its own `update`, the next instant it wants to run, and the
//! engine never polls in between.
//!
//! The whole engine is single-threaded by design. Node firing order inside
//! one instant is ascending node id, and nodes must not depend on sibling
//! order at the same instant.

use std::collections::BTreeMap;

use tracing::trace;

use crate::cpu::ProcessingUnitNode;
use crate::models::ResourceUpdateNode;

/// Sentinel wake time meaning "never wake again". A node returning this is
/// retired but stays attached until closed.
pub const NEVER: i64 = i64::MAX;

/// Handle to a node owned by a [`FlowGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

/// Closed set of node variants the engine can drive.
#[derive(Debug)]
pub enum FlowNode {
    ResourceUpdate(ResourceUpdateNode),
    ProcessingUnit(ProcessingUnitNode),
}

impl FlowNode {
    /// Run the node at simulated instant `now` and report its next wake time.
    fn update(&mut self, now: i64) -> i64 {
        match self {
            FlowNode::ResourceUpdate(node) => node.update(now),
            FlowNode::ProcessingUnit(node) => node.update(now),
        }
    }

    /// Whether the node has reached a terminal state and wants detaching.
    fn retired(&self) -> bool {
        match self {
            FlowNode::ResourceUpdate(node) => node.is_retired(),
            FlowNode::ProcessingUnit(_) => false,
        }
    }
}

#[derive(Debug)]
struct NodeSlot {
    node: FlowNode,
    /// Pending wake time, or `NEVER` when the node has no timeline entry.
    wake: i64,
}

/// The mutable graph of flow nodes plus the global event timeline.
#[derive(Debug)]
pub struct FlowGraph {
    slots: Vec<Option<NodeSlot>>,
    timeline: BTreeMap<i64, Vec<NodeId>>,
    now: i64,
}

impl FlowGraph {
    pub fn new(start_time: i64) -> Self {
        FlowGraph {
            slots: Vec::new(),
            timeline: BTreeMap::new(),
            now: start_time,
        }
    }

    /// Current simulated time in milliseconds.
    pub fn now(&self) -> i64 {
        self.now
    }

    /// Attach a node and immediately run its first update at the current
    /// instant, which also determines its initial wake time.
    pub fn attach(&mut self, node: FlowNode) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Some(NodeSlot { node, wake: NEVER }));
        self.fire(id, self.now);
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&FlowNode> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref()).map(|s| &s.node)
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.slots.get(id.0).is_some_and(|slot| slot.is_some())
    }

    /// Schedule (or move) the node's single pending wake to `time`.
    ///
    /// A node holds at most one timeline entry; rescheduling replaces it.
    /// Scheduling a detached node or a wake in the past is a programming
    /// error and panics.
    pub fn schedule_wake(&mut self, id: NodeId, time: i64) {
        assert!(
            time >= self.now,
            "wake time {time} is before current time {}",
            self.now
        );
        let slot = self.slots[id.0]
            .as_mut()
            .expect("schedule_wake on detached node");
        let previous = slot.wake;
        slot.wake = time;
        if previous != NEVER {
            Self::remove_timeline_entry(&mut self.timeline, previous, id);
        }
        self.timeline.entry(time).or_default().push(id);
    }

    /// Detach a node, removing its pending timeline entry. Idempotent.
    pub fn close(&mut self, id: NodeId) {
        if let Some(slot) = self.slots.get_mut(id.0).and_then(Option::take) {
            if slot.wake != NEVER {
                Self::remove_timeline_entry(&mut self.timeline, slot.wake, id);
            }
        }
    }

    /// Earliest pending wake time, if any.
    pub fn next_due(&self) -> Option<i64> {
        self.timeline.keys().next().copied()
    }

    /// Advance simulated time to `time`, firing every due node on the way.
    pub fn advance_to(&mut self, time: i64) {
        assert!(time >= self.now, "cannot advance backwards to {time}");
        while let Some(due) = self.next_due() {
            if due > time {
                break;
            }
            self.advance();
        }
        self.now = self.now.max(time);
    }

    /// Pop the earliest timeline bucket and fire every node due at that
    /// instant exactly once.
    pub fn advance(&mut self) {
        let Some((due, mut ids)) = self.timeline.pop_first() else {
            return;
        };
        assert!(due >= self.now, "timeline went backwards");
        self.now = due;

        // Deterministic order inside one instant
        ids.sort_unstable();
        for id in ids {
            // A sibling update may have closed or rescheduled this node
            let due_now = self.slots[id.0]
                .as_ref()
                .is_some_and(|slot| slot.wake == due);
            if due_now {
                self.slots[id.0].as_mut().unwrap().wake = NEVER;
                self.fire(id, due);
            }
        }
    }

    fn fire(&mut self, id: NodeId, now: i64) {
        let slot = self.slots[id.0].as_mut().expect("fired a detached node");
        let next = slot.node.update(now);
        trace!(node = id.0, now, next, "node updated");

        if slot.node.retired() {
            self.close(id);
        } else if next != NEVER {
            self.schedule_wake(id, next);
        }
    }

    fn remove_timeline_entry(timeline: &mut BTreeMap<i64, Vec<NodeId>>, time: i64, id: NodeId) {
        if let Some(bucket) = timeline.get_mut(&time) {
            bucket.retain(|&entry| entry != id);
            if bucket.is_empty() {
                timeline.remove(&time);
            }
        }
    }
}
