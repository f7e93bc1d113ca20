//! Pluggable placement schedulers
//!
//! A scheduler is either composed from filters (boolean eligibility
//! predicates) and weighers (scoring functions), or written as a monolithic
//! strategy. All of them operate over [`HostView`] read projections and
//! return `None` when no host is eligible — a scheduling deferral, not an
//! error.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::host::HostView;
use crate::simulation::Task;

/// Placement policy contract.
pub trait Scheduler {
    fn name(&self) -> &str;

    fn add_host(&mut self, host: HostView);

    fn remove_host(&mut self, host: &HostView);

    /// Pick a host for the task, or `None` to defer.
    fn select(&mut self, task: &Task) -> Option<HostView>;
}

/// Boolean eligibility predicate over (host, task). Filters must be
/// side-effect-free and independent of evaluation order.
pub trait HostFilter {
    fn test(&self, host: &HostView, task: &Task) -> bool;
}

/// Host can fit the task at all, ignoring current load.
pub struct ComputeFilter;

impl HostFilter for ComputeFilter {
    fn test(&self, host: &HostView, task: &Task) -> bool {
        let capacity = host.capacity();
        task.vcpus <= capacity.vcpus && task.memory_mb <= capacity.memory_mb
    }
}

/// vCPU oversubscription bound.
pub struct VCpuFilter {
    pub allocation_ratio: f64,
}

impl HostFilter for VCpuFilter {
    fn test(&self, host: &HostView, task: &Task) -> bool {
        let limit = host.capacity().vcpus as f64 * self.allocation_ratio;
        (host.provisioned_vcpus() + task.vcpus) as f64 <= limit
    }
}

/// Memory oversubscription bound.
pub struct RamFilter {
    pub allocation_ratio: f64,
}

impl HostFilter for RamFilter {
    fn test(&self, host: &HostView, task: &Task) -> bool {
        let capacity = host.capacity().memory_mb as f64;
        let provisioned = (host.capacity().memory_mb - host.available_memory_mb()) as f64;
        provisioned + task.memory_mb as f64 <= capacity * self.allocation_ratio
    }
}

/// Host's current cost must not exceed a ceiling.
pub struct CostFilter {
    pub max_cost: f64,
}

impl HostFilter for CostFilter {
    fn test(&self, host: &HostView, _task: &Task) -> bool {
        host.cost() <= self.max_cost
    }
}

/// Numeric scoring function over (host, task). A negative multiplier turns
/// a weigher into a minimizer.
pub trait HostWeigher {
    fn weigh(&self, host: &HostView, task: &Task) -> f64;

    fn multiplier(&self) -> f64;
}

/// Weighs hosts by their current cost.
pub struct CostWeigher {
    pub multiplier: f64,
}

impl HostWeigher for CostWeigher {
    fn weigh(&self, host: &HostView, _task: &Task) -> f64 {
        host.cost()
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

/// Weighs hosts by available memory.
pub struct RamWeigher {
    pub multiplier: f64,
}

impl HostWeigher for RamWeigher {
    fn weigh(&self, host: &HostView, _task: &Task) -> f64 {
        host.available_memory_mb() as f64
    }

    fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

/// Scheduler composed from a filter pipeline and a weigher set.
///
/// A host is eligible only if every filter passes. Among eligible hosts the
/// one with the highest combined score wins; exact score ties break to the
/// host with the most available memory so repeated runs are reproducible.
pub struct FilterScheduler {
    name: String,
    filters: Vec<Box<dyn HostFilter>>,
    weighers: Vec<Box<dyn HostWeigher>>,
    hosts: Vec<HostView>,
}

impl FilterScheduler {
    pub fn new(
        name: impl Into<String>,
        filters: Vec<Box<dyn HostFilter>>,
        weighers: Vec<Box<dyn HostWeigher>>,
    ) -> Self {
        FilterScheduler {
            name: name.into(),
            filters,
            weighers,
            hosts: Vec::new(),
        }
    }

    /// Hosts surviving the filter pipeline, in registration order.
    pub fn eligible_hosts(&self, task: &Task) -> Vec<HostView> {
        self.hosts
            .iter()
            .filter(|host| self.filters.iter().all(|f| f.test(host, task)))
            .cloned()
            .collect()
    }

    fn score(&self, host: &HostView, task: &Task) -> f64 {
        self.weighers
            .iter()
            .map(|w| w.multiplier() * w.weigh(host, task))
            .sum()
    }
}

impl Scheduler for FilterScheduler {
    fn name(&self) -> &str {
        &self.name
    }

    fn add_host(&mut self, host: HostView) {
        self.hosts.push(host);
    }

    fn remove_host(&mut self, host: &HostView) {
        self.hosts.retain(|h| h != host);
    }

    fn select(&mut self, task: &Task) -> Option<HostView> {
        let eligible = self.eligible_hosts(task);
        if eligible.is_empty() {
            debug!(scheduler = %self.name, task = task.id, "no eligible host, deferring");
            return None;
        }

        let mut best: Option<(HostView, f64)> = None;
        for host in eligible {
            let score = self.score(&host, task);
            let better = match &best {
                None => true,
                Some((current, current_score)) => {
                    score > *current_score
                        || (score == *current_score
                            && host.available_memory_mb() > current.available_memory_mb())
                }
            };
            if better {
                best = Some((host, score));
            }
        }
        best.map(|(host, _)| host)
    }
}

/// Strategy: place on the cheapest host that fits under strict
/// oversubscription bounds; cost ties go to the host with more free memory.
pub fn lowest_cost() -> FilterScheduler {
    FilterScheduler::new(
        "LowestCost",
        vec![
            Box::new(ComputeFilter),
            Box::new(VCpuFilter {
                allocation_ratio: 1.0,
            }),
            Box::new(RamFilter {
                allocation_ratio: 1.5,
            }),
        ],
        vec![Box::new(CostWeigher { multiplier: -1.0 })],
    )
}

/// Strategy: like [`lowest_cost`] but hosts above the cost ceiling are not
/// eligible at all.
pub fn cost_efficient(max_cost: f64) -> FilterScheduler {
    FilterScheduler::new(
        "CostEfficient",
        vec![
            Box::new(ComputeFilter),
            Box::new(VCpuFilter {
                allocation_ratio: 1.0,
            }),
            Box::new(RamFilter {
                allocation_ratio: 1.5,
            }),
            Box::new(CostFilter { max_cost }),
        ],
        vec![Box::new(CostWeigher { multiplier: -1.0 })],
    )
}

/// Tuning knobs for the predictive strategy.
#[derive(Debug, Clone, Copy)]
pub struct PredictiveConfig {
    /// Bounded cost-history length per host.
    pub history_len: usize,
    pub cost_weight: f64,
    pub utilization_weight: f64,
    pub balance_weight: f64,
    /// Reserved smoothing constant. The trend extrapolation deliberately
    /// does not use it; kept configurable for compatibility.
    pub smoothing: f64,
    pub vcpu_allocation_ratio: f64,
    pub ram_allocation_ratio: f64,
    pub max_cost: f64,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        PredictiveConfig {
            history_len: 10,
            cost_weight: 0.4,
            utilization_weight: 0.3,
            balance_weight: 0.3,
            smoothing: 0.3,
            vcpu_allocation_ratio: 1.5,
            ram_allocation_ratio: 2.0,
            max_cost: f64::MAX,
        }
    }
}

/// Linear trend extrapolation over an observed cost history.
///
/// `trend = (latest - oldest) / history_len`, `predicted = current * (1 + trend)`.
pub fn predict_cost(history: &VecDeque<f64>, current_cost: f64) -> f64 {
    if history.len() < 2 {
        return current_cost;
    }
    let oldest = *history.front().unwrap();
    let latest = *history.back().unwrap();
    let trend = (latest - oldest) / history.len() as f64;
    current_cost * (1.0 + trend)
}

/// Monolithic strategy scoring hosts on predicted cost, utilization headroom
/// and load balance. Hosts are keyed by name for history tracking, so host
/// names must be unique within one scheduler.
pub struct PredictiveScheduler {
    config: PredictiveConfig,
    hosts: Vec<HostView>,
    cost_history: HashMap<String, VecDeque<f64>>,
}

impl PredictiveScheduler {
    pub fn new(config: PredictiveConfig) -> Self {
        PredictiveScheduler {
            config,
            hosts: Vec::new(),
            cost_history: HashMap::new(),
        }
    }

    fn observe_costs(&mut self) {
        for host in &self.hosts {
            let history = self
                .cost_history
                .entry(host.name())
                .or_insert_with(VecDeque::new);
            if history.len() == self.config.history_len {
                history.pop_front();
            }
            history.push_back(host.cost());
        }
    }

    fn eligible(&self, task: &Task) -> Vec<HostView> {
        let filters: [&dyn HostFilter; 4] = [
            &ComputeFilter,
            &VCpuFilter {
                allocation_ratio: self.config.vcpu_allocation_ratio,
            },
            &RamFilter {
                allocation_ratio: self.config.ram_allocation_ratio,
            },
            &CostFilter {
                max_cost: self.config.max_cost,
            },
        ];
        self.hosts
            .iter()
            .filter(|host| filters.iter().all(|f| f.test(host, task)))
            .cloned()
            .collect()
    }
}

impl Scheduler for PredictiveScheduler {
    fn name(&self) -> &str {
        "Predictive"
    }

    fn add_host(&mut self, host: HostView) {
        self.hosts.push(host);
    }

    fn remove_host(&mut self, host: &HostView) {
        self.cost_history.remove(&host.name());
        self.hosts.retain(|h| h != host);
    }

    fn select(&mut self, task: &Task) -> Option<HostView> {
        self.observe_costs();

        let eligible = self.eligible(task);
        if eligible.is_empty() {
            debug!(scheduler = "Predictive", task = task.id, "no eligible host, deferring");
            return None;
        }

        let predicted: Vec<f64> = eligible
            .iter()
            .map(|host| {
                let history = &self.cost_history[&host.name()];
                predict_cost(history, host.cost())
            })
            .collect();
        let max_predicted = predicted.iter().cloned().fold(f64::MIN, f64::max);
        let max_guests = eligible
            .iter()
            .map(|h| h.guests_running())
            .max()
            .unwrap_or(0)
            .max(1) as f64;

        let mut best: Option<(HostView, f64)> = None;
        for (host, predicted_cost) in eligible.into_iter().zip(predicted) {
            let cost_score = if max_predicted > 0.0 {
                1.0 - predicted_cost / max_predicted
            } else {
                1.0
            };
            let utilization_score = 1.0 - host.cpu_utilization();
            let balance_score = 1.0 - host.guests_running() as f64 / max_guests;

            let score = self.config.cost_weight * cost_score
                + self.config.utilization_weight * utilization_score
                + self.config.balance_weight * balance_score;

            // First host wins exact ties: registration order is stable
            if best.as_ref().is_none_or(|(_, s)| score > *s) {
                best = Some((host, score));
            }
        }
        best.map(|(host, _)| host)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::host::{HostCapacity, HostState};

    fn backed_view(name: &str, cost: f64, memory_mb: i64) -> (HostView, Rc<RefCell<HostState>>) {
        let state = Rc::new(RefCell::new(HostState::new(
            name,
            HostCapacity {
                vcpus: 16,
                cpu_mhz: 3200.0,
                memory_mb,
            },
        )));
        state.borrow_mut().update_cost(cost);
        (HostView::new(Rc::clone(&state)), state)
    }

    fn view(name: &str, cost: f64, memory_mb: i64) -> HostView {
        backed_view(name, cost, memory_mb).0
    }

    fn small_task() -> Task {
        Task {
            id: 1,
            arrival_time: 0,
            duration_ms: 3_600_000,
            vcpus: 2,
            memory_mb: 1024,
            cpu_load_mhz: 500.0,
        }
    }

    #[test]
    fn test_lowest_cost_tie_breaks_on_memory() {
        let mut scheduler = lowest_cost();
        scheduler.add_host(view("a", 3.0, 8_192));
        scheduler.add_host(view("b", 3.0, 16_384));
        scheduler.add_host(view("c", 5.0, 32_768));

        let chosen = scheduler.select(&small_task()).unwrap();
        assert_eq!(chosen.name(), "b");
    }

    #[test]
    fn test_cost_filter_eligibility() {
        let mut scheduler = cost_efficient(10.0);
        scheduler.add_host(view("cheap", 5.0, 8_192));
        scheduler.add_host(view("pricey", 15.0, 8_192));

        let eligible = scheduler.eligible_hosts(&small_task());
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].name(), "cheap");

        let chosen = scheduler.select(&small_task()).unwrap();
        assert_eq!(chosen.name(), "cheap");
    }

    #[test]
    fn test_all_hosts_filtered_defers() {
        let mut scheduler = cost_efficient(10.0);
        scheduler.add_host(view("pricey1", 15.0, 8_192));
        scheduler.add_host(view("pricey2", 15.0, 8_192));

        assert!(scheduler.select(&small_task()).is_none());
    }

    #[test]
    fn test_empty_pool_defers() {
        let mut scheduler = lowest_cost();
        assert!(scheduler.select(&small_task()).is_none());
    }

    #[test]
    fn test_removed_host_not_selected() {
        let mut scheduler = lowest_cost();
        let cheap = view("cheap", 1.0, 8_192);
        scheduler.add_host(cheap.clone());
        scheduler.add_host(view("other", 9.0, 8_192));

        scheduler.remove_host(&cheap);
        let chosen = scheduler.select(&small_task()).unwrap();
        assert_eq!(chosen.name(), "other");
    }

    #[test]
    fn test_stricter_filter_never_grows_eligible_set() {
        let hosts = vec![
            view("a", 5.0, 8_192),
            view("b", 12.0, 8_192),
            view("c", 20.0, 8_192),
        ];

        let mut loose = FilterScheduler::new(
            "loose",
            vec![Box::new(ComputeFilter)],
            vec![Box::new(CostWeigher { multiplier: -1.0 })],
        );
        let mut strict = FilterScheduler::new(
            "strict",
            vec![Box::new(ComputeFilter), Box::new(CostFilter { max_cost: 15.0 })],
            vec![Box::new(CostWeigher { multiplier: -1.0 })],
        );
        for host in &hosts {
            loose.add_host(host.clone());
            strict.add_host(host.clone());
        }

        let task = small_task();
        let loose_set = loose.eligible_hosts(&task);
        let strict_set = strict.eligible_hosts(&task);

        assert!(strict_set.len() <= loose_set.len());
        for host in &strict_set {
            assert!(loose_set.contains(host));
        }
    }

    #[test]
    fn test_vcpu_filter_oversubscription_bound() {
        let host = view("a", 1.0, 8_192);
        let filter = VCpuFilter {
            allocation_ratio: 1.0,
        };
        let mut task = small_task();

        task.vcpus = 16;
        assert!(filter.test(&host, &task));
        task.vcpus = 17;
        assert!(!filter.test(&host, &task));
    }

    #[test]
    fn test_trend_extrapolation() {
        let history: VecDeque<f64> = [10.0, 12.0, 14.0].into_iter().collect();
        let predicted = predict_cost(&history, 14.0);

        // trend = (14 - 10) / 3, predicted = 14 * (1 + trend)
        assert!((predicted - 32.6667).abs() < 0.001);
    }

    #[test]
    fn test_trend_needs_two_samples() {
        let history: VecDeque<f64> = [10.0].into_iter().collect();
        assert_eq!(predict_cost(&history, 10.0), 10.0);
    }

    #[test]
    fn test_predictive_prefers_flat_cost_over_rising() {
        let mut scheduler = PredictiveScheduler::new(PredictiveConfig::default());
        let (flat, _flat_state) = backed_view("flat", 10.0, 8_192);
        let (rising, rising_state) = backed_view("rising", 10.0, 8_192);
        scheduler.add_host(flat.clone());
        scheduler.add_host(rising.clone());

        let task = small_task();
        // Build history: flat stays at 10, rising climbs before each
        // observation, exactly as a bound cost node would push it
        for step in 0..5 {
            rising_state
                .borrow_mut()
                .update_cost(10.0 + step as f64 * 4.0);
            scheduler.select(&task);
        }

        let chosen = scheduler.select(&task).unwrap();
        assert_eq!(chosen.name(), "flat");
    }

    #[test]
    fn test_predictive_history_is_bounded() {
        let mut scheduler = PredictiveScheduler::new(PredictiveConfig {
            history_len: 3,
            ..PredictiveConfig::default()
        });
        scheduler.add_host(view("a", 5.0, 8_192));

        let task = small_task();
        for _ in 0..10 {
            scheduler.select(&task);
        }
        assert_eq!(scheduler.cost_history["a"].len(), 3);
    }
}
