//! Discrete-event simulation driver
//!
//! Owns the flow graph, the simulated hosts and the placement scheduler,
//! and replays task arrival/completion events against them. The scheduler
//! is only ever invoked between engine ticks: before each service event the
//! flow graph is advanced to the event's instant, so every `select` sees
//! host state consistent with one simulated time.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cpu::{ProcessingUnitNode, ScalingDriver, ScalingGovernor};
use crate::engine::{FlowGraph, FlowNode, NodeId};
use crate::error::SimError;
use crate::fragment::FragmentSequence;
use crate::host::{HostCapacity, HostSnapshot, HostState, HostView};
use crate::models::{ResourceTarget, ResourceUpdateNode};
use crate::scheduler::Scheduler;

/// A task to be placed and executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    /// Arrival instant in simulated milliseconds.
    pub arrival_time: i64,
    pub duration_ms: i64,
    pub vcpus: u32,
    pub memory_mb: i64,
    /// CPU demand the task adds to its host while running.
    pub cpu_load_mhz: f64,
}

impl Task {
    pub fn new(
        id: u64,
        arrival_time: i64,
        duration_ms: i64,
        vcpus: u32,
        memory_mb: i64,
        cpu_load_mhz: f64,
    ) -> Self {
        Task {
            id,
            arrival_time,
            duration_ms,
            vcpus,
            memory_mb,
            cpu_load_mhz,
        }
    }
}

/// Everything needed to stand up one simulated host.
pub struct HostSpec {
    pub name: String,
    pub capacity: HostCapacity,
    pub governor: ScalingGovernor,
    pub driver: ScalingDriver,
    pub cost_trace: Option<Rc<FragmentSequence>>,
    pub carbon_trace: Option<Rc<FragmentSequence>>,
}

/// Service-level event.
#[derive(Debug, Clone, Copy)]
enum Event {
    TaskArrival { task_id: u64 },
    TaskCompletion { task_id: u64 },
}

/// Timed event wrapper for priority queue ordering.
#[derive(Debug)]
struct TimedEvent {
    time: i64,
    /// Insertion sequence, so equal-time events pop in a stable order.
    seq: u64,
    event: Event,
}

// Min-heap on (time, seq): BinaryHeap is a max-heap by default
impl Ord for TimedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for TimedEvent {}

impl PartialEq for TimedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

/// One simulated machine: its state plus the flow nodes bound to it.
struct SimHost {
    name: String,
    state: Rc<RefCell<HostState>>,
    cpu_node: NodeId,
    cost_node: Option<NodeId>,
    carbon_node: Option<NodeId>,
}

impl SimHost {
    fn view(&self) -> HostView {
        HostView::new(Rc::clone(&self.state))
    }
}

/// Where a running task lives and at what rate it is billed.
struct Placement {
    state: Rc<RefCell<HostState>>,
    cpu_node: NodeId,
    hourly_rate: f64,
}

/// One recorded scheduling outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub time: i64,
    pub task_id: u64,
    /// Chosen host name, or `None` when placement was deferred.
    pub host: Option<String>,
}

/// Result of a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub scheduler: String,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub pending_tasks: usize,
    /// Number of `select` calls that found no eligible host.
    pub deferred_placements: usize,
    pub total_cost: f64,
    pub total_energy_joules: f64,
    pub decisions: Vec<PlacementDecision>,
    pub host_snapshots: Vec<HostSnapshot>,
}

/// Discrete-event simulation of a datacenter under one placement strategy.
pub struct Simulation {
    graph: FlowGraph,
    scheduler: Box<dyn Scheduler>,
    hosts: Vec<SimHost>,
    events: BinaryHeap<TimedEvent>,
    next_seq: u64,
    tasks: HashMap<u64, Task>,
    pending: Vec<u64>,
    placements: HashMap<u64, Placement>,
    decisions: Vec<PlacementDecision>,
    completed: usize,
    deferred: usize,
    total_cost: f64,
}

impl Simulation {
    pub fn new(start_time: i64, scheduler: Box<dyn Scheduler>) -> Self {
        Simulation {
            graph: FlowGraph::new(start_time),
            scheduler,
            hosts: Vec::new(),
            events: BinaryHeap::new(),
            next_seq: 0,
            tasks: HashMap::new(),
            pending: Vec::new(),
            placements: HashMap::new(),
            decisions: Vec::new(),
            completed: 0,
            deferred: 0,
            total_cost: 0.0,
        }
    }

    /// Stand up a host: create its state, attach its flow nodes, register
    /// it with the scheduler.
    pub fn add_host(&mut self, spec: HostSpec) -> Result<(), SimError> {
        let state = Rc::new(RefCell::new(HostState::new(spec.name.clone(), spec.capacity)));

        let cpu_node = self.graph.attach(FlowNode::ProcessingUnit(
            ProcessingUnitNode::new(Rc::clone(&state), spec.governor, spec.driver),
        ));

        let cost_node = spec
            .cost_trace
            .map(|trace| {
                ResourceUpdateNode::new(trace, Rc::clone(&state), ResourceTarget::Cost)
                    .map(|node| self.graph.attach(FlowNode::ResourceUpdate(node)))
            })
            .transpose()?;
        let carbon_node = spec
            .carbon_trace
            .map(|trace| {
                ResourceUpdateNode::new(trace, Rc::clone(&state), ResourceTarget::CarbonIntensity)
                    .map(|node| self.graph.attach(FlowNode::ResourceUpdate(node)))
            })
            .transpose()?;

        let host = SimHost {
            name: spec.name,
            state,
            cpu_node,
            cost_node,
            carbon_node,
        };
        self.scheduler.add_host(host.view());
        debug!(host = %host.name, "host added");
        self.hosts.push(host);
        Ok(())
    }

    /// Tear down a host: detach its nodes and unregister it. Tasks still
    /// running on it keep their reserved state until completion.
    pub fn remove_host(&mut self, name: &str) {
        let Some(index) = self.hosts.iter().position(|h| h.name == name) else {
            return;
        };
        let host = self.hosts.remove(index);
        self.scheduler.remove_host(&host.view());
        self.graph.close(host.cpu_node);
        if let Some(id) = host.cost_node {
            self.graph.close(id);
        }
        if let Some(id) = host.carbon_node {
            self.graph.close(id);
        }
        debug!(host = %host.name, "host removed");
    }

    pub fn add_task(&mut self, task: Task) {
        let time = task.arrival_time;
        let task_id = task.id;
        self.tasks.insert(task_id, task);
        self.push_event(time, Event::TaskArrival { task_id });
    }

    pub fn now(&self) -> i64 {
        self.graph.now()
    }

    /// Run until `until` (simulated milliseconds) and collect results.
    pub fn run(&mut self, until: i64) -> SimulationResult {
        while let Some(next) = self.events.peek() {
            if next.time > until {
                break;
            }
            let timed = self.events.pop().unwrap();
            // Bring every flow node up to date before touching host state
            self.graph.advance_to(timed.time);
            self.handle_event(timed.event);
        }

        // Drain wakes already pending before the horizon, then flush CPU
        // accounting up to it
        self.graph.advance_to(until);
        for host in &self.hosts {
            if self.graph.is_attached(host.cpu_node) {
                self.graph.schedule_wake(host.cpu_node, until);
            }
        }
        self.graph.advance_to(until);

        self.collect_results(until)
    }

    fn push_event(&mut self, time: i64, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(TimedEvent { time, seq, event });
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::TaskArrival { task_id } => {
                if !self.try_place(task_id) {
                    self.pending.push(task_id);
                }
            }
            Event::TaskCompletion { task_id } => self.handle_completion(task_id),
        }
    }

    /// Ask the scheduler for a host and reserve resources on it.
    fn try_place(&mut self, task_id: u64) -> bool {
        let task = self.tasks[&task_id].clone();
        let choice = self.scheduler.select(&task);
        self.decisions.push(PlacementDecision {
            time: self.graph.now(),
            task_id,
            host: choice.as_ref().map(|h| h.name()),
        });

        let Some(view) = choice else {
            self.deferred += 1;
            debug!(task = task_id, "placement deferred");
            return false;
        };

        let host = self
            .hosts
            .iter()
            .find(|h| h.view() == view)
            .expect("scheduler returned an unknown host");

        host.state
            .borrow_mut()
            .place_guest(task.vcpus, task.memory_mb, task.cpu_load_mhz);
        let hourly_rate = host.state.borrow().cost();
        let cpu_node = host.cpu_node;
        let placement = Placement {
            state: Rc::clone(&host.state),
            cpu_node,
            hourly_rate,
        };

        // Demand changed: recompute supply at this instant
        self.graph.schedule_wake(cpu_node, self.graph.now());

        self.placements.insert(task_id, placement);
        self.push_event(
            self.graph.now() + task.duration_ms,
            Event::TaskCompletion { task_id },
        );
        true
    }

    fn handle_completion(&mut self, task_id: u64) {
        let Some(placement) = self.placements.remove(&task_id) else {
            return;
        };
        let task = self.tasks[&task_id].clone();

        placement
            .state
            .borrow_mut()
            .release_guest(task.vcpus, task.memory_mb, task.cpu_load_mhz);
        if self.graph.is_attached(placement.cpu_node) {
            self.graph.schedule_wake(placement.cpu_node, self.graph.now());
        }

        // Billed at the placement-time rate for the task's runtime
        self.total_cost += placement.hourly_rate * task.duration_ms as f64 / 3_600_000.0;
        self.completed += 1;

        self.retry_pending();
    }

    /// Freed capacity may unblock deferred tasks; retry in arrival order.
    fn retry_pending(&mut self) {
        let waiting: Vec<u64> = std::mem::take(&mut self.pending);
        for task_id in waiting {
            if !self.try_place(task_id) {
                self.pending.push(task_id);
            }
        }
    }

    fn collect_results(&self, until: i64) -> SimulationResult {
        let total_energy_joules = self
            .hosts
            .iter()
            .filter_map(|host| match self.graph.node(host.cpu_node) {
                Some(FlowNode::ProcessingUnit(node)) => Some(node.counters().energy_joules),
                _ => None,
            })
            .sum();

        let result = SimulationResult {
            scheduler: self.scheduler.name().to_string(),
            total_tasks: self.tasks.len(),
            completed_tasks: self.completed,
            pending_tasks: self.pending.len() + self.placements.len(),
            deferred_placements: self.deferred,
            total_cost: self.total_cost,
            total_energy_joules,
            decisions: self.decisions.clone(),
            host_snapshots: self.hosts.iter().map(|h| h.view().snapshot(until)).collect(),
        };
        info!(
            scheduler = %result.scheduler,
            completed = result.completed_tasks,
            deferred = result.deferred_placements,
            cost = result.total_cost,
            "simulation finished"
        );
        result
    }
}
