use std::collections::BTreeSet;

use serde::Serialize;
use typed_index_collections::TiVec;

use crate::{
    interval::TimeInterval,
    occupation::OccupancyInterval,
    problem::{ConstraintSet, DurationValue, LocationId, Topology, TrainId},
    simulator::SimulationRun,
};

/// Deferrals below this many time units count as minor.
pub const MINOR_DEFERRAL_LIMIT: DurationValue = 10;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize)]
pub enum Severity {
    None,
    Minor,
    Major,
}

impl Severity {
    pub fn bucket(deferred: DurationValue) -> Severity {
        if deferred <= 0 {
            Severity::None
        } else if deferred < MINOR_DEFERRAL_LIMIT {
            Severity::Minor
        } else {
            Severity::Major
        }
    }
}

/// An unresolved scheduling clash. Derived output, not an error: produced by
/// the simulator's deferral bookkeeping and by the overlap re-check below.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub location: LocationId,
    pub window: TimeInterval,
    pub trains: BTreeSet<TrainId>,
    pub severity: Severity,
    /// The train whose entry was pushed back, when the conflict stems from a
    /// deferral rather than the overlap re-check.
    pub deferred: Option<TrainId>,
}

/// All conflicts of a run, ordered by time ascending then location.
pub fn detect(run: &SimulationRun) -> Vec<Conflict> {
    merge_and_order(
        &run.scenario.topology,
        &run.scenario.constraints,
        &run.timeline,
        &run.deferrals,
    )
}

pub fn merge_and_order(
    topology: &Topology,
    constraints: &ConstraintSet,
    timeline: &[OccupancyInterval],
    deferrals: &[Conflict],
) -> Vec<Conflict> {
    let mut out = deferrals.to_vec();
    out.extend(overlap_recheck(topology, constraints, timeline));
    out.sort_by(|a, b| {
        (a.window.time_start, a.location, &a.trains)
            .cmp(&(b.window.time_start, b.location, &b.trains))
    });
    out.dedup();
    out
}

/// Independent capacity re-check over the finished timeline: any overlap
/// beyond declared capacity (zero headway assumed) is flagged even if the
/// deferral logic already handled the location.
fn overlap_recheck(
    topology: &Topology,
    constraints: &ConstraintSet,
    timeline: &[OccupancyInterval],
) -> Vec<Conflict> {
    let mut per_location: TiVec<LocationId, Vec<(TimeInterval, TrainId)>> =
        vec![Vec::new(); topology.locations.len()].into();
    for occ in timeline {
        per_location[occ.location].push((occ.interval, occ.train));
    }

    let mut out = Vec::new();
    for (location, intervals) in per_location.iter_enumerated() {
        let capacity = topology.locations[location].effective_capacity(constraints);

        // Boundary sweep; exits sort before entries at the same instant
        // because intervals are half-open.
        let mut bounds = Vec::new();
        for (interval, train) in intervals {
            bounds.push((interval.time_start, 1i32, *train));
            bounds.push((interval.time_end, -1i32, *train));
        }
        bounds.sort_by_key(|(t, delta, train)| (*t, *delta, *train));

        let mut active: BTreeSet<TrainId> = BTreeSet::new();
        let mut violation: Option<(crate::problem::TimeValue, BTreeSet<TrainId>)> = None;
        for (t, delta, train) in bounds {
            if delta < 0 {
                active.remove(&train);
                if active.len() <= capacity {
                    if let Some((start, trains)) = violation.take() {
                        out.push(Conflict {
                            location,
                            window: TimeInterval::new(start, t),
                            trains,
                            severity: Severity::bucket(t - start),
                            deferred: None,
                        });
                    }
                }
            } else {
                active.insert(train);
                if active.len() > capacity {
                    match violation.as_mut() {
                        Some((_, trains)) => {
                            trains.extend(active.iter().copied());
                        }
                        None => violation = Some((t, active.clone())),
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::Location;

    #[test]
    pub fn severity_buckets() {
        assert_eq!(Severity::bucket(0), Severity::None);
        assert_eq!(Severity::bucket(9), Severity::Minor);
        assert_eq!(Severity::bucket(10), Severity::Major);
        assert_eq!(Severity::bucket(240), Severity::Major);
    }

    #[test]
    pub fn recheck_flags_overlap_beyond_capacity() {
        let mut topology = Topology::new();
        let b1 = topology.add(Location::block("B1"));
        let constraints = ConstraintSet::default();

        // Two simultaneous occupants on a capacity-1 block.
        let timeline = vec![
            OccupancyInterval {
                location: b1,
                train: TrainId(0),
                interval: TimeInterval::new(100, 400),
            },
            OccupancyInterval {
                location: b1,
                train: TrainId(1),
                interval: TimeInterval::new(200, 500),
            },
        ];
        let conflicts = merge_and_order(&topology, &constraints, &timeline, &[]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].location, b1);
        assert_eq!(conflicts[0].window, TimeInterval::new(200, 400));
        assert_eq!(conflicts[0].trains.len(), 2);
        assert_eq!(conflicts[0].severity, Severity::Major);
    }

    #[test]
    pub fn recheck_accepts_back_to_back_intervals() {
        let mut topology = Topology::new();
        let b1 = topology.add(Location::block("B1"));
        let constraints = ConstraintSet::default();

        let timeline = vec![
            OccupancyInterval {
                location: b1,
                train: TrainId(0),
                interval: TimeInterval::new(100, 200),
            },
            OccupancyInterval {
                location: b1,
                train: TrainId(1),
                interval: TimeInterval::new(200, 300),
            },
        ];
        assert!(merge_and_order(&topology, &constraints, &timeline, &[]).is_empty());
    }

    #[test]
    pub fn ordering_is_by_time_then_location() {
        let mut topology = Topology::new();
        let b1 = topology.add(Location::block("B1"));
        let b2 = topology.add(Location::block("B2"));
        let constraints = ConstraintSet::default();

        let mk = |location, start| Conflict {
            location,
            window: TimeInterval::new(start, start + 20),
            trains: BTreeSet::from([TrainId(0)]),
            severity: Severity::Major,
            deferred: Some(TrainId(0)),
        };
        let deferrals = vec![mk(b2, 100), mk(b1, 100), mk(b1, 50)];
        let ordered = merge_and_order(&topology, &constraints, &[], &deferrals);
        assert_eq!(ordered.len(), 3);
        assert_eq!((ordered[0].location, ordered[0].window.time_start), (b1, 50));
        assert_eq!((ordered[1].location, ordered[1].window.time_start), (b1, 100));
        assert_eq!((ordered[2].location, ordered[2].window.time_start), (b2, 100));
    }
}
