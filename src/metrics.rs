use serde::Serialize;

use crate::{
    delay::{self, DelayClass},
    simulator::SimulationRun,
};

/// Comparable KPIs of one run. `route_changed` counts trains whose route in
/// the candidate differs from the baseline it is aggregated against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub throughput_pct: f64,
    pub total_delay: i64,
    pub conflict_count: usize,
    pub on_time: usize,
    pub minor_delay: usize,
    pub major_delay: usize,
    pub route_changed: usize,
}

/// Before/after pair for result panels and suggestion scoring.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MetricsDelta {
    pub before: Metrics,
    pub after: Metrics,
}

impl MetricsDelta {
    pub fn between(baseline: &SimulationRun, candidate: &SimulationRun) -> MetricsDelta {
        MetricsDelta {
            before: baseline.metrics,
            after: aggregate(baseline, candidate),
        }
    }
}

/// Reduces a candidate run to KPIs, measured against a baseline run: delays
/// count against the baseline's planned times, route changes against its
/// routes. Pass the same run twice for a run's own metrics.
pub fn aggregate(baseline: &SimulationRun, candidate: &SimulationRun) -> Metrics {
    let delays = delay::propagate_against(candidate, &baseline.scenario.timetable);
    let constraints = &candidate.scenario.constraints;

    let mut metrics = Metrics {
        conflict_count: candidate.conflicts.len(),
        ..Metrics::default()
    };

    for d in delays.iter() {
        metrics.total_delay += d.delay as i64;
        match d.class {
            DelayClass::OnTime => metrics.on_time += 1,
            DelayClass::Minor => metrics.minor_delay += 1,
            DelayClass::Major => metrics.major_delay += 1,
        }
    }

    let n_trains = delays.len();
    let within = delays
        .iter()
        .filter(|d| d.delay <= constraints.max_allowed_delay)
        .count();
    metrics.throughput_pct = if n_trains == 0 {
        100.0
    } else {
        100.0 * within as f64 / n_trains as f64
    };

    for train in (0..candidate.scenario.timetable.trains.len()).map(crate::problem::TrainId::from) {
        let baseline_route = baseline.scenario.timetable.route_locations(train);
        let candidate_route = candidate.scenario.timetable.route_locations(train);
        if baseline_route != candidate_route {
            metrics.route_changed += 1;
        }
    }

    metrics
}
