use std::{
    cmp::Reverse,
    collections::{BTreeSet, BinaryHeap},
    time::Instant,
};

use log::{debug, trace};
use typed_index_collections::TiVec;

use crate::{
    conflict::{self, Conflict, Severity},
    interval::TimeInterval,
    metrics::{self, Metrics},
    occupation::{Admission, LocationState, Occupant, OccupancyInterval},
    problem::{DurationValue, LocationId, Perturbation, PriorityClass, Scenario, TimeValue, TrainId},
    EngineError,
};

/// Immutable record of one simulation: the scenario it ran, the occupancy
/// timeline it produced, the deferrals it had to apply, the merged conflict
/// list, and the run's own KPIs.
#[derive(Clone, Debug)]
pub struct SimulationRun {
    pub scenario: Scenario,
    pub timeline: Vec<OccupancyInterval>,
    pub deferrals: Vec<Conflict>,
    pub conflicts: Vec<Conflict>,
    pub metrics: Metrics,
}

/// Exits sort before entries at the same instant so a vacated slot is
/// released before the next admission check.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
enum EventKind {
    Exit,
    Enter,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
struct Event {
    time: TimeValue,
    kind: EventKind,
    priority: PriorityClass,
    train: TrainId,
    route_pos: usize,
}

struct PendingDeferral {
    intended: TimeValue,
    involved: BTreeSet<TrainId>,
    forced_major: bool,
}

struct TrainState {
    route: Vec<usize>,
    lateness: DurationValue,
    pending: Option<PendingDeferral>,
}

/// Runs one scenario to completion. Deterministic: the event order is a
/// total order on (time, kind, priority class, train id).
pub fn simulate(scenario: &Scenario, deadline: Option<Instant>) -> Result<SimulationRun, EngineError> {
    scenario.check()?;

    let topology = &scenario.topology;
    let constraints = &scenario.constraints;
    let timetable = &scenario.timetable;

    let mut closures: Vec<(LocationId, TimeInterval, bool)> = Vec::new();
    let mut initial_lateness: TiVec<TrainId, DurationValue> =
        vec![0; timetable.trains.len()].into();
    match scenario.perturbation {
        Some(Perturbation::DelayTrain { train, amount }) => initial_lateness[train] = amount,
        Some(Perturbation::CloseBlock { block, window }) => closures.push((block, window, false)),
        Some(Perturbation::Accident { block, window }) => closures.push((block, window, true)),
        None => {}
    }

    let mut trains: TiVec<TrainId, TrainState> = timetable
        .routes()
        .into_iter()
        .zip(initial_lateness)
        .map(|(route, lateness)| TrainState {
            route,
            lateness,
            pending: None,
        })
        .collect::<Vec<_>>()
        .into();

    let mut locations: TiVec<LocationId, LocationState> = topology
        .locations
        .iter()
        .map(|_| LocationState::default())
        .collect::<Vec<_>>()
        .into();

    let mut queue: BinaryHeap<Reverse<Event>> = BinaryHeap::new();
    for (train, state) in trains.iter_enumerated() {
        if let Some(&first) = state.route.first() {
            let entry = &timetable.entries[first];
            queue.push(Reverse(Event {
                time: entry.planned_arrival + state.lateness,
                kind: EventKind::Enter,
                priority: timetable.trains[train].priority,
                train,
                route_pos: 0,
            }));
        }
    }

    let mut timeline: Vec<OccupancyInterval> = Vec::new();
    let mut deferrals: Vec<Conflict> = Vec::new();

    while let Some(Reverse(event)) = queue.pop() {
        if let Some(deadline) = deadline {
            if Instant::now() > deadline {
                return Err(EngineError::CandidateTimeout);
            }
        }

        let state = &mut trains[event.train];
        let entry = timetable.entries[state.route[event.route_pos]];
        let location = &topology.locations[entry.location];

        match event.kind {
            EventKind::Enter => {
                let t = event.time;
                let capacity = location.effective_capacity(constraints);
                let headway = location.effective_min_headway(constraints);

                let mut feasible = t;
                let mut blockers: BTreeSet<TrainId> = BTreeSet::new();
                let mut forced_major = false;

                for (closed, window, accident) in &closures {
                    if *closed == entry.location && window.contains(t) {
                        feasible = feasible.max(window.time_end);
                        forced_major |= *accident;
                    }
                }

                match locations[entry.location].admission(event.train, t, capacity, headway) {
                    Admission::Granted => {}
                    Admission::Deferred { until, blockers: b } => {
                        feasible = feasible.max(until);
                        blockers.extend(b);
                    }
                }

                if feasible > t {
                    trace!(
                        "defer train{} at {} from {} to {}",
                        usize::from(event.train),
                        location.name,
                        t,
                        feasible
                    );
                    let pending = state.pending.get_or_insert(PendingDeferral {
                        intended: t,
                        involved: BTreeSet::new(),
                        forced_major: false,
                    });
                    pending.involved.extend(blockers);
                    pending.forced_major |= forced_major;
                    queue.push(Reverse(Event {
                        time: feasible,
                        ..event
                    }));
                } else {
                    if let Some(deferral) = state.pending.take() {
                        let delta = t - deferral.intended;
                        state.lateness += delta;
                        let mut severity = Severity::bucket(delta);
                        if deferral.forced_major || delta > constraints.max_allowed_delay {
                            severity = Severity::Major;
                        }
                        let mut involved = deferral.involved;
                        involved.insert(event.train);
                        debug!(
                            "train{} deferred {}s at {} ({:?})",
                            usize::from(event.train),
                            delta,
                            location.name,
                            severity
                        );
                        deferrals.push(Conflict {
                            location: entry.location,
                            window: TimeInterval::new(deferral.intended, t),
                            trains: involved,
                            severity,
                            deferred: Some(event.train),
                        });
                    }

                    let mut exit_time = (entry.planned_departure + state.lateness)
                        .max(t + location.effective_min_occupation(constraints));
                    if location.is_platform() {
                        exit_time = exit_time.max(t + constraints.dwell_time);
                    }
                    locations[entry.location].enter(Occupant {
                        train: event.train,
                        entered: t,
                        scheduled_exit: exit_time,
                    });
                    queue.push(Reverse(Event {
                        time: exit_time,
                        kind: EventKind::Exit,
                        ..event
                    }));
                }
            }
            EventKind::Exit => {
                let entered = locations[entry.location].exit(event.train, event.time);
                timeline.push(OccupancyInterval {
                    location: entry.location,
                    train: event.train,
                    interval: TimeInterval::new(entered, event.time),
                });

                let next_pos = event.route_pos + 1;
                if next_pos < state.route.len() {
                    let next = timetable.entries[state.route[next_pos]];
                    queue.push(Reverse(Event {
                        time: (next.planned_arrival + state.lateness).max(event.time),
                        kind: EventKind::Enter,
                        route_pos: next_pos,
                        ..event
                    }));
                }
            }
        }
    }

    timeline.sort_by_key(|o| (o.interval.time_start, o.location, o.train));

    let conflicts = conflict::merge_and_order(topology, constraints, &timeline, &deferrals);
    let mut run = SimulationRun {
        scenario: scenario.clone(),
        timeline,
        deferrals,
        conflicts,
        metrics: Metrics::default(),
    };
    run.metrics = metrics::aggregate(&run, &run);
    Ok(run)
}
