//! Simulated host state and its read-only projection
//!
//! Each simulated machine owns one [`HostState`]. The flow nodes bound to
//! the host are its only writers for cost, carbon intensity and CPU
//! statistics; the placement path adjusts guest bookkeeping. Schedulers and
//! metrics export only ever see a [`HostView`].

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Fixed capacity of a host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HostCapacity {
    pub vcpus: u32,
    pub cpu_mhz: f64,
    pub memory_mb: i64,
}

/// CPU statistics maintained by the host's processing-unit node.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CpuStats {
    /// Fraction of capacity currently demanded, in `[0, 1]`.
    pub utilization: f64,
}

/// System-level statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SystemStats {
    pub guests_running: i32,
}

/// Live state of one simulated host.
#[derive(Debug)]
pub struct HostState {
    name: String,
    capacity: HostCapacity,

    cost: f64,
    carbon_intensity: f64,

    cpu_stats: CpuStats,
    system_stats: SystemStats,

    cpu_demand_mhz: f64,
    cpu_speed_mhz: f64,
    power_draw_w: f64,

    available_memory_mb: i64,
    provisioned_vcpus: u32,
}

impl HostState {
    pub fn new(name: impl Into<String>, capacity: HostCapacity) -> Self {
        HostState {
            name: name.into(),
            capacity,
            cost: 0.0,
            carbon_intensity: 0.0,
            cpu_stats: CpuStats::default(),
            system_stats: SystemStats::default(),
            cpu_demand_mhz: 0.0,
            cpu_speed_mhz: 0.0,
            power_draw_w: 0.0,
            available_memory_mb: capacity.memory_mb,
            provisioned_vcpus: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> HostCapacity {
        self.capacity
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    pub fn carbon_intensity(&self) -> f64 {
        self.carbon_intensity
    }

    pub fn cpu_stats(&self) -> CpuStats {
        self.cpu_stats
    }

    pub fn system_stats(&self) -> SystemStats {
        self.system_stats
    }

    pub fn cpu_demand_mhz(&self) -> f64 {
        self.cpu_demand_mhz
    }

    pub fn cpu_speed_mhz(&self) -> f64 {
        self.cpu_speed_mhz
    }

    pub fn power_draw_w(&self) -> f64 {
        self.power_draw_w
    }

    pub fn available_memory_mb(&self) -> i64 {
        self.available_memory_mb
    }

    pub fn provisioned_vcpus(&self) -> u32 {
        self.provisioned_vcpus
    }

    /// Push a new cost value. Called only by the bound cost node.
    pub fn update_cost(&mut self, cost: f64) {
        self.cost = cost;
    }

    /// Push a new carbon intensity value. Called only by the bound carbon node.
    pub fn update_carbon_intensity(&mut self, intensity: f64) {
        self.carbon_intensity = intensity;
    }

    /// Record recomputed CPU supply and power. Called only by the bound
    /// processing-unit node.
    pub fn record_cpu(&mut self, utilization: f64, speed_mhz: f64, power_w: f64) {
        self.cpu_stats.utilization = utilization;
        self.cpu_speed_mhz = speed_mhz;
        self.power_draw_w = power_w;
    }

    pub fn set_cpu_demand(&mut self, demand_mhz: f64) {
        self.cpu_demand_mhz = demand_mhz.max(0.0);
    }

    /// Reserve resources for a placed task.
    pub fn place_guest(&mut self, vcpus: u32, memory_mb: i64, cpu_load_mhz: f64) {
        self.system_stats.guests_running += 1;
        self.provisioned_vcpus += vcpus;
        self.available_memory_mb -= memory_mb;
        self.cpu_demand_mhz += cpu_load_mhz;
    }

    /// Release resources held by a completed task.
    pub fn release_guest(&mut self, vcpus: u32, memory_mb: i64, cpu_load_mhz: f64) {
        self.system_stats.guests_running -= 1;
        self.provisioned_vcpus = self.provisioned_vcpus.saturating_sub(vcpus);
        self.available_memory_mb =
            (self.available_memory_mb + memory_mb).min(self.capacity.memory_mb);
        self.cpu_demand_mhz = (self.cpu_demand_mhz - cpu_load_mhz).max(0.0);
    }
}

/// Read-only projection of a host's live state.
///
/// Cheap to clone; two views are equal when they project the same host.
#[derive(Debug, Clone)]
pub struct HostView {
    inner: Rc<RefCell<HostState>>,
}

impl HostView {
    pub fn new(state: Rc<RefCell<HostState>>) -> Self {
        HostView { inner: state }
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    pub fn capacity(&self) -> HostCapacity {
        self.inner.borrow().capacity
    }

    pub fn cost(&self) -> f64 {
        self.inner.borrow().cost
    }

    pub fn carbon_intensity(&self) -> f64 {
        self.inner.borrow().carbon_intensity
    }

    pub fn cpu_utilization(&self) -> f64 {
        self.inner.borrow().cpu_stats.utilization
    }

    pub fn guests_running(&self) -> i32 {
        self.inner.borrow().system_stats.guests_running
    }

    pub fn available_memory_mb(&self) -> i64 {
        self.inner.borrow().available_memory_mb
    }

    pub fn provisioned_vcpus(&self) -> u32 {
        self.inner.borrow().provisioned_vcpus
    }

    pub fn power_draw_w(&self) -> f64 {
        self.inner.borrow().power_draw_w
    }

    /// Capture a metrics-export row at the given simulated instant.
    pub fn snapshot(&self, timestamp: i64) -> HostSnapshot {
        let state = self.inner.borrow();
        HostSnapshot {
            timestamp,
            host: state.name.clone(),
            cost: state.cost,
            carbon_intensity: state.carbon_intensity,
            cpu_utilization: state.cpu_stats.utilization,
            power_draw_w: state.power_draw_w,
            guests_running: state.system_stats.guests_running,
            available_memory_mb: state.available_memory_mb,
        }
    }
}

impl PartialEq for HostView {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Point-in-time export row consumed by external metrics sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSnapshot {
    pub timestamp: i64,
    pub host: String,
    pub cost: f64,
    pub carbon_intensity: f64,
    pub cpu_utilization: f64,
    pub power_draw_w: f64,
    pub guests_running: i32,
    pub available_memory_mb: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capacity() -> HostCapacity {
        HostCapacity {
            vcpus: 8,
            cpu_mhz: 3200.0,
            memory_mb: 16384,
        }
    }

    #[test]
    fn test_guest_bookkeeping() {
        let mut host = HostState::new("host1", capacity());

        host.place_guest(2, 4096, 1000.0);
        assert_eq!(host.system_stats().guests_running, 1);
        assert_eq!(host.provisioned_vcpus(), 2);
        assert_eq!(host.available_memory_mb(), 12288);
        assert_eq!(host.cpu_demand_mhz(), 1000.0);

        host.release_guest(2, 4096, 1000.0);
        assert_eq!(host.system_stats().guests_running, 0);
        assert_eq!(host.available_memory_mb(), 16384);
        assert_eq!(host.cpu_demand_mhz(), 0.0);
    }

    #[test]
    fn test_view_tracks_live_state() {
        let state = Rc::new(RefCell::new(HostState::new("host1", capacity())));
        let view = HostView::new(Rc::clone(&state));

        state.borrow_mut().update_cost(42.5);
        assert_eq!(view.cost(), 42.5);

        let snap = view.snapshot(1000);
        assert_eq!(snap.host, "host1");
        assert_eq!(snap.cost, 42.5);
    }

    #[test]
    fn test_view_equality_is_identity() {
        let a = Rc::new(RefCell::new(HostState::new("same", capacity())));
        let b = Rc::new(RefCell::new(HostState::new("same", capacity())));

        let view_a = HostView::new(Rc::clone(&a));
        assert_eq!(view_a, HostView::new(a));
        assert_ne!(view_a, HostView::new(b));
    }
}
