use serde::Serialize;
use typed_index_collections::TiVec;

use crate::{
    problem::{DurationValue, TimeValue, Timetable, TrainId},
    simulator::SimulationRun,
};

/// Delays of at most this many time units classify as minor.
pub const MINOR_DELAY_LIMIT: DurationValue = 10;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub enum DelayClass {
    OnTime,
    Minor,
    Major,
}

impl DelayClass {
    pub fn classify(delay: DurationValue) -> DelayClass {
        if delay <= 0 {
            DelayClass::OnTime
        } else if delay <= MINOR_DELAY_LIMIT {
            DelayClass::Minor
        } else {
            DelayClass::Major
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct TrainDelay {
    pub delay: DurationValue,
    pub class: DelayClass,
}

/// Cumulative delay per train against the run's own timetable.
pub fn propagate(run: &SimulationRun) -> TiVec<TrainId, TrainDelay> {
    propagate_against(run, &run.scenario.timetable)
}

/// Cumulative delay per train: actual minus planned time at the final route
/// entry, measured against `reference` (the published plan — a candidate is
/// not allowed to hide lateness by moving its own planned times). Upstream
/// deferrals are already folded in by the simulator's causal shift; this only
/// aggregates and classifies.
pub fn propagate_against(
    run: &SimulationRun,
    reference: &Timetable,
) -> TiVec<TrainId, TrainDelay> {
    let n_trains = run.scenario.timetable.trains.len();

    let mut final_entry: TiVec<TrainId, Option<TimeValue>> = vec![None; n_trains].into();
    for occ in &run.timeline {
        let actual = &mut final_entry[occ.train];
        *actual = Some(match *actual {
            Some(t) => t.max(occ.interval.time_start),
            None => occ.interval.time_start,
        });
    }

    (0..n_trains)
        .map(TrainId::from)
        .map(|train| {
            let planned = reference.route(train).last().map(|e| e.planned_arrival);
            let delay = match (planned, final_entry[train]) {
                (Some(planned), Some(actual)) => (actual - planned).max(0),
                _ => 0,
            };
            TrainDelay {
                delay,
                class: DelayClass::classify(delay),
            }
        })
        .collect::<Vec<_>>()
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn classification_bounds() {
        assert_eq!(DelayClass::classify(0), DelayClass::OnTime);
        assert_eq!(DelayClass::classify(1), DelayClass::Minor);
        assert_eq!(DelayClass::classify(10), DelayClass::Minor);
        assert_eq!(DelayClass::classify(11), DelayClass::Major);
    }
}
