//! Processing-unit flow node: CPU demand/supply matching and power draw
//!
//! One node represents a host's aggregate CPU. Demand changes arrive from
//! the placement path; on each wake the node matches demand against the
//! frequency its governor targets, records the achieved speed and the
//! instantaneous power draw into the host, and integrates time/energy
//! counters since its previous update.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::engine::NEVER;
use crate::host::HostState;

/// Frequency-scaling policy deciding a target frequency from utilization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScalingGovernor {
    /// Always run at the maximum frequency.
    Performance,
    /// Always run at the minimum frequency.
    PowerSave,
    /// Scale frequency with utilization, jumping to maximum above the
    /// threshold.
    OnDemand { up_threshold: f64 },
}

impl ScalingGovernor {
    /// Target frequency for the given utilization, bounded by the driver's
    /// frequency range.
    pub fn target_frequency(&self, utilization: f64, min_mhz: f64, max_mhz: f64) -> f64 {
        match *self {
            ScalingGovernor::Performance => max_mhz,
            ScalingGovernor::PowerSave => min_mhz,
            ScalingGovernor::OnDemand { up_threshold } => {
                if utilization >= up_threshold {
                    max_mhz
                } else {
                    min_mhz + (max_mhz - min_mhz) * (utilization / up_threshold)
                }
            }
        }
    }
}

/// Maps a governor's target frequency to achievable speed and power draw.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScalingDriver {
    pub min_freq_mhz: f64,
    pub max_freq_mhz: f64,
    pub idle_power_w: f64,
    pub max_power_w: f64,
}

impl ScalingDriver {
    /// Speed actually supplied: demand capped by the target frequency.
    pub fn supply(&self, demand_mhz: f64, target_mhz: f64) -> f64 {
        demand_mhz.min(target_mhz).max(0.0)
    }

    /// Instantaneous power draw, linear between idle and max over
    /// utilization.
    pub fn power(&self, utilization: f64) -> f64 {
        self.idle_power_w + (self.max_power_w - self.idle_power_w) * utilization.clamp(0.0, 1.0)
    }
}

/// Utilization and energy bookkeeping accumulated across updates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CpuCounters {
    pub active_time_ms: f64,
    pub idle_time_ms: f64,
    pub energy_joules: f64,
}

/// Flow node owning one host's CPU supply computation.
#[derive(Debug)]
pub struct ProcessingUnitNode {
    host: Rc<RefCell<HostState>>,
    governor: ScalingGovernor,
    driver: ScalingDriver,
    counters: CpuCounters,
    last_update: Option<i64>,
    prev_utilization: f64,
    prev_power_w: f64,
}

impl ProcessingUnitNode {
    pub fn new(
        host: Rc<RefCell<HostState>>,
        governor: ScalingGovernor,
        driver: ScalingDriver,
    ) -> Self {
        ProcessingUnitNode {
            host,
            governor,
            driver,
            counters: CpuCounters::default(),
            last_update: None,
            prev_utilization: 0.0,
            prev_power_w: 0.0,
        }
    }

    pub fn counters(&self) -> CpuCounters {
        self.counters
    }

    /// Recompute supply and power from the host's current demand.
    ///
    /// Purely demand-driven: the node does not re-arm itself. The placement
    /// path schedules a wake at the current instant whenever demand changes.
    pub fn update(&mut self, now: i64) -> i64 {
        // Integrate the interval since the previous update at its old rates
        if let Some(last) = self.last_update {
            let dt = (now - last) as f64;
            self.counters.active_time_ms += dt * self.prev_utilization;
            self.counters.idle_time_ms += dt * (1.0 - self.prev_utilization);
            self.counters.energy_joules += self.prev_power_w * dt / 1000.0;
        }
        self.last_update = Some(now);

        let mut host = self.host.borrow_mut();
        let capacity = host.capacity().cpu_mhz;
        let demand = host.cpu_demand_mhz();
        let utilization = if capacity > 0.0 {
            (demand / capacity).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let max_mhz = self.driver.max_freq_mhz.min(capacity);
        let target = self
            .governor
            .target_frequency(utilization, self.driver.min_freq_mhz, max_mhz);
        let speed = self.driver.supply(demand, target);
        let power = self.driver.power(utilization);
        host.record_cpu(utilization, speed, power);

        self.prev_utilization = utilization;
        self.prev_power_w = power;

        NEVER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostCapacity;

    fn host() -> Rc<RefCell<HostState>> {
        Rc::new(RefCell::new(HostState::new(
            "host1",
            HostCapacity {
                vcpus: 8,
                cpu_mhz: 3200.0,
                memory_mb: 16384,
            },
        )))
    }

    fn driver() -> ScalingDriver {
        ScalingDriver {
            min_freq_mhz: 800.0,
            max_freq_mhz: 3200.0,
            idle_power_w: 50.0,
            max_power_w: 250.0,
        }
    }

    #[test]
    fn test_performance_governor_targets_max() {
        let g = ScalingGovernor::Performance;
        assert_eq!(g.target_frequency(0.1, 800.0, 3200.0), 3200.0);
    }

    #[test]
    fn test_powersave_governor_targets_min() {
        let g = ScalingGovernor::PowerSave;
        assert_eq!(g.target_frequency(0.9, 800.0, 3200.0), 800.0);
    }

    #[test]
    fn test_ondemand_governor_scales_then_jumps() {
        let g = ScalingGovernor::OnDemand { up_threshold: 0.8 };
        // Below threshold: proportional between min and max
        assert_eq!(g.target_frequency(0.4, 800.0, 3200.0), 800.0 + 2400.0 * 0.5);
        // At or above threshold: pinned to max
        assert_eq!(g.target_frequency(0.8, 800.0, 3200.0), 3200.0);
        assert_eq!(g.target_frequency(1.0, 800.0, 3200.0), 3200.0);
    }

    #[test]
    fn test_update_matches_demand_and_records_power() {
        let host = host();
        host.borrow_mut().set_cpu_demand(1600.0);
        let mut node =
            ProcessingUnitNode::new(Rc::clone(&host), ScalingGovernor::Performance, driver());

        let next = node.update(0);
        assert_eq!(next, NEVER);

        let state = host.borrow();
        assert_eq!(state.cpu_stats().utilization, 0.5);
        assert_eq!(state.cpu_speed_mhz(), 1600.0);
        // Linear power model: 50 + 200 * 0.5
        assert_eq!(state.power_draw_w(), 150.0);
    }

    #[test]
    fn test_powersave_caps_supply_below_demand() {
        let host = host();
        host.borrow_mut().set_cpu_demand(1600.0);
        let mut node =
            ProcessingUnitNode::new(Rc::clone(&host), ScalingGovernor::PowerSave, driver());

        node.update(0);
        // Governor pins frequency at 800 MHz; supply cannot exceed it
        assert_eq!(host.borrow().cpu_speed_mhz(), 800.0);
    }

    #[test]
    fn test_counters_integrate_between_updates() {
        let host = host();
        host.borrow_mut().set_cpu_demand(1600.0);
        let mut node =
            ProcessingUnitNode::new(Rc::clone(&host), ScalingGovernor::Performance, driver());

        node.update(0);
        // 10 seconds at 50% utilization, 150 W
        node.update(10_000);

        let counters = node.counters();
        assert_eq!(counters.active_time_ms, 5_000.0);
        assert_eq!(counters.idle_time_ms, 5_000.0);
        assert_eq!(counters.energy_joules, 1_500.0);
    }

    #[test]
    fn test_demand_exceeding_capacity_saturates() {
        let host = host();
        host.borrow_mut().set_cpu_demand(10_000.0);
        let mut node =
            ProcessingUnitNode::new(Rc::clone(&host), ScalingGovernor::Performance, driver());

        node.update(0);
        let state = host.borrow();
        assert_eq!(state.cpu_stats().utilization, 1.0);
        // Supply is bounded by achievable frequency, not raw demand
        assert_eq!(state.cpu_speed_mhz(), 3200.0);
        assert_eq!(state.power_draw_w(), 250.0);
    }
}
