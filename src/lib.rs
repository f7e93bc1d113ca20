//! Meridian Simulation Engine
//!
//! Discrete-event datacenter operation simulator. A flow graph of timed
//! nodes drives host cost, carbon intensity, CPU supply and power draw
//! forward in simulated time; pluggable placement schedulers read the live
//! host state to decide where incoming tasks run.

pub mod cpu;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod host;
pub mod models;
pub mod scheduler;
pub mod simulation;
pub mod traces;

pub use engine::{FlowGraph, FlowNode, NodeId, NEVER};
pub use error::SimError;
pub use fragment::{BoundaryPolicy, Fragment, FragmentSequence};
pub use host::{HostCapacity, HostSnapshot, HostView};
pub use scheduler::Scheduler;
pub use simulation::{Simulation, SimulationResult, Task};
