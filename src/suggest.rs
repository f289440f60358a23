use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use itertools::Itertools;
use log::{debug, warn};
use rayon::prelude::*;
use serde::Serialize;
use typed_index_collections::TiVec;

use crate::{
    conflict::Severity,
    delay::{self, TrainDelay},
    interval::TimeInterval,
    metrics::{self, MetricsDelta},
    occupation::OccupancyInterval,
    problem::{ConstraintSet, DurationValue, LocationId, Scenario, Timetable, Topology, TrainId},
    simulator::{self, SimulationRun},
    EngineError,
};

/// Shared flag to stop a suggestion batch: no new candidate evaluations are
/// started once set; in-flight ones finish on their own.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SuggestOptions {
    /// Wall-clock budget per candidate; an overrunning candidate is dropped
    /// and reported, the rest of the batch continues.
    pub candidate_timeout: Option<Duration>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub enum SuggestionKind {
    Reschedule,
    PrioritySwap,
    Reroute,
}

/// One ranked reschedule proposal, with its own fully re-simulated run.
#[derive(Clone, Debug)]
pub struct Suggestion {
    pub id: usize,
    pub kind: SuggestionKind,
    pub description: String,
    pub trains: Vec<TrainId>,
    pub delta: MetricsDelta,
    pub run: SimulationRun,
}

impl Suggestion {
    /// The candidate timetable this suggestion proposes as the new baseline.
    pub fn timetable(&self) -> &Timetable {
        &self.run.scenario.timetable
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DropReason {
    Timeout,
    Cancelled,
    Failed,
}

#[derive(Clone, Debug)]
pub struct DroppedCandidate {
    pub description: String,
    pub reason: DropReason,
}

/// Result of one suggestion batch. `complete` is false when the batch was
/// cancelled; the suggestions returned so far remain valid.
#[derive(Clone, Debug)]
pub struct SuggestionBatch {
    pub suggestions: Vec<Suggestion>,
    pub dropped: Vec<DroppedCandidate>,
    pub complete: bool,
}

/// Local, greedy, bounded search: one move per candidate, each candidate
/// fully re-simulated and scored against the baseline. Reproducible and
/// explainable within bounded compute; not a global optimizer.
pub fn suggest(
    baseline: &SimulationRun,
    max_candidates: usize,
    options: &SuggestOptions,
    cancel: &CancellationToken,
) -> SuggestionBatch {
    if max_candidates == 0 || baseline.conflicts.is_empty() {
        return SuggestionBatch {
            suggestions: Vec::new(),
            dropped: Vec::new(),
            complete: true,
        };
    }

    let moves = enumerate_moves(baseline);
    debug!("evaluating {} candidate moves", moves.len());
    let baseline_delays = delay::propagate(baseline);

    // Candidates are independent; evaluation order does not matter, the
    // collected results keep move order.
    let evals: Vec<Eval> = moves
        .par_iter()
        .map(|mv| evaluate(baseline, &baseline_delays, mv, options, cancel))
        .collect();

    let mut kept: Vec<Candidate> = Vec::new();
    let mut dropped = Vec::new();
    for eval in evals {
        match eval {
            Eval::Kept(candidate) => kept.push(*candidate),
            Eval::NotImproving => {}
            Eval::Dropped(d) => dropped.push(d),
        }
    }

    kept.sort_by(|a, b| {
        let reduction_a = baseline.metrics.total_delay - a.delta.after.total_delay;
        let reduction_b = baseline.metrics.total_delay - b.delta.after.total_delay;
        reduction_b
            .cmp(&reduction_a)
            .then(a.affected.cmp(&b.affected))
            .then_with(|| a.description.cmp(&b.description))
    });
    kept.truncate(max_candidates);

    let suggestions = kept
        .into_iter()
        .enumerate()
        .map(|(id, c)| Suggestion {
            id,
            kind: c.kind,
            description: c.description,
            trains: c.trains,
            delta: c.delta,
            run: c.run,
        })
        .collect();

    SuggestionBatch {
        suggestions,
        complete: !cancel.is_cancelled(),
        dropped,
    }
}

struct Candidate {
    kind: SuggestionKind,
    description: String,
    trains: Vec<TrainId>,
    delta: MetricsDelta,
    run: SimulationRun,
    affected: usize,
}

enum Eval {
    Kept(Box<Candidate>),
    NotImproving,
    Dropped(DroppedCandidate),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
enum CandidateMove {
    Shift {
        train: TrainId,
        delta: DurationValue,
        location: LocationId,
    },
    Swap {
        keep: TrainId,
        yield_train: TrainId,
        location: LocationId,
    },
    Reroute {
        train: TrainId,
        from: LocationId,
        to: LocationId,
    },
}

/// One move per baseline conflict and option: shift the deferred train by the
/// amount that clears its deferral, let a lower-priority blocker yield, or
/// reroute via a declared alternate with room in the contested window.
fn enumerate_moves(baseline: &SimulationRun) -> Vec<CandidateMove> {
    let topology = &baseline.scenario.topology;
    let constraints = &baseline.scenario.constraints;
    let timetable = &baseline.scenario.timetable;

    let mut moves = Vec::new();
    for conflict in &baseline.conflicts {
        let Some(deferred) = conflict.deferred else {
            continue;
        };

        let delta = conflict.window.length();
        if delta > 0 && delta <= constraints.max_allowed_delay {
            moves.push(CandidateMove::Shift {
                train: deferred,
                delta,
                location: conflict.location,
            });
        }

        for &other in &conflict.trains {
            if other != deferred
                && timetable.trains[deferred].priority < timetable.trains[other].priority
            {
                moves.push(CandidateMove::Swap {
                    keep: deferred,
                    yield_train: other,
                    location: conflict.location,
                });
            }
        }

        for &alt in &topology.locations[conflict.location].alternates {
            if alternate_has_room(topology, constraints, &baseline.timeline, alt, conflict.window)
            {
                moves.push(CandidateMove::Reroute {
                    train: deferred,
                    from: conflict.location,
                    to: alt,
                });
            }
        }
    }

    moves.into_iter().unique().collect()
}

fn alternate_has_room(
    topology: &Topology,
    constraints: &ConstraintSet,
    timeline: &[OccupancyInterval],
    alt: LocationId,
    window: TimeInterval,
) -> bool {
    let capacity = topology.locations[alt].effective_capacity(constraints);
    let overlapping = timeline
        .iter()
        .filter(|o| o.location == alt && o.interval.overlap(&window));

    // Peak concurrency among the overlapping stays.
    let mut bounds = Vec::new();
    for occ in overlapping {
        bounds.push((occ.interval.time_start, 1i32));
        bounds.push((occ.interval.time_end, -1i32));
    }
    bounds.sort();
    let mut active = 0i32;
    let mut peak = 0i32;
    for (_, delta) in bounds {
        active += delta;
        peak = peak.max(active);
    }
    (peak as usize) < capacity
}

fn apply_move(
    baseline: &SimulationRun,
    mv: &CandidateMove,
) -> (Timetable, SuggestionKind, String, Vec<TrainId>) {
    let topology = &baseline.scenario.topology;
    let constraints = &baseline.scenario.constraints;
    let timetable = &baseline.scenario.timetable;
    let mut out = timetable.clone();

    match *mv {
        CandidateMove::Shift {
            train,
            delta,
            location,
        } => {
            for entry in out.entries.iter_mut().filter(|e| e.train == train) {
                entry.planned_arrival += delta;
                entry.planned_departure += delta;
            }
            let description = format!(
                "delay {} by {}s to clear {} (within max allowed delay)",
                timetable.trains[train].name, delta, topology.locations[location].name
            );
            (out, SuggestionKind::Reschedule, description, vec![train])
        }
        CandidateMove::Swap {
            keep,
            yield_train,
            location,
        } => {
            let keep_departure = timetable
                .route(keep)
                .find(|e| e.location == location)
                .map(|e| e.planned_departure);
            let yield_arrival = timetable
                .route(yield_train)
                .find(|e| e.location == location)
                .map(|e| e.planned_arrival);
            let headway = topology.locations[location].effective_min_headway(constraints);
            let delta = match (keep_departure, yield_arrival) {
                (Some(dep), Some(arr)) => (dep + headway - arr).max(0),
                _ => 0,
            };

            let mut reached = false;
            for entry in out.entries.iter_mut().filter(|e| e.train == yield_train) {
                reached |= entry.location == location;
                if reached {
                    entry.planned_arrival += delta;
                    entry.planned_departure += delta;
                }
            }
            let description = format!(
                "prefer {} over {} at {} (no new major conflict)",
                timetable.trains[keep].name,
                timetable.trains[yield_train].name,
                topology.locations[location].name
            );
            (
                out,
                SuggestionKind::PrioritySwap,
                description,
                vec![keep, yield_train],
            )
        }
        CandidateMove::Reroute { train, from, to } => {
            for entry in out
                .entries
                .iter_mut()
                .filter(|e| e.train == train && e.location == from)
            {
                entry.location = to;
            }
            let description = format!(
                "reroute {} via {} (alternate capacity available)",
                timetable.trains[train].name, topology.locations[to].name
            );
            (out, SuggestionKind::Reroute, description, vec![train])
        }
    }
}

fn evaluate(
    baseline: &SimulationRun,
    baseline_delays: &TiVec<TrainId, TrainDelay>,
    mv: &CandidateMove,
    options: &SuggestOptions,
    cancel: &CancellationToken,
) -> Eval {
    let (timetable, kind, description, trains) = apply_move(baseline, mv);

    if cancel.is_cancelled() {
        return Eval::Dropped(DroppedCandidate {
            description,
            reason: DropReason::Cancelled,
        });
    }

    let deadline = options.candidate_timeout.map(|budget| Instant::now() + budget);
    let scenario = Scenario {
        topology: baseline.scenario.topology.clone(),
        constraints: baseline.scenario.constraints.clone(),
        timetable,
        perturbation: baseline.scenario.perturbation,
    };

    let run = match simulator::simulate(&scenario, deadline) {
        Ok(run) => run,
        Err(EngineError::CandidateTimeout) => {
            warn!("candidate timed out: {}", description);
            return Eval::Dropped(DroppedCandidate {
                description,
                reason: DropReason::Timeout,
            });
        }
        Err(e) => {
            warn!("candidate rejected: {} ({})", description, e);
            return Eval::Dropped(DroppedCandidate {
                description,
                reason: DropReason::Failed,
            });
        }
    };

    let after = metrics::aggregate(baseline, &run);
    let before = baseline.metrics;
    let improves = after.total_delay <= before.total_delay
        && after.conflict_count <= before.conflict_count
        && (after.total_delay < before.total_delay
            || after.conflict_count < before.conflict_count);
    if !improves {
        return Eval::NotImproving;
    }

    if kind == SuggestionKind::PrioritySwap {
        let majors = |run: &SimulationRun| {
            run.conflicts
                .iter()
                .filter(|c| c.severity == Severity::Major)
                .count()
        };
        // The yielding train must absorb the deferral without a new major.
        if majors(&run) > majors(baseline) {
            return Eval::NotImproving;
        }
    }

    let candidate_delays = delay::propagate_against(&run, &baseline.scenario.timetable);
    let affected = baseline_delays
        .iter()
        .zip(candidate_delays.iter())
        .filter(|(a, b)| a.delay != b.delay)
        .count();

    Eval::Kept(Box::new(Candidate {
        kind,
        description,
        trains,
        delta: MetricsDelta { before, after },
        run,
        affected,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::problem::{Location, PriorityClass, TimeValue};

    fn hm(h: i32, m: i32) -> TimeValue {
        h * 3600 + m * 60
    }

    fn simulate(scenario: &Scenario) -> SimulationRun {
        simulator::simulate(scenario, None).unwrap()
    }

    #[test]
    pub fn shift_clears_the_conflict_without_extra_delay() {
        let mut topology = crate::problem::Topology::new();
        let b1 = topology.add(Location::block("B1"));
        let mut timetable = Timetable::new();
        let t1 = timetable.add_train("T1", PriorityClass::Express);
        let t2 = timetable.add_train("T2", PriorityClass::Local);
        timetable.add_stop(t1, b1, hm(9, 0), hm(9, 5));
        timetable.add_stop(t2, b1, hm(9, 3), hm(9, 8));
        let scenario = Scenario {
            topology: Arc::new(topology),
            constraints: Arc::new(ConstraintSet {
                max_allowed_delay: 600,
                ..ConstraintSet::default()
            }),
            timetable,
            perturbation: None,
        };
        let baseline = simulate(&scenario);
        assert_eq!(baseline.conflicts.len(), 1);

        let batch = suggest(
            &baseline,
            5,
            &SuggestOptions::default(),
            &CancellationToken::new(),
        );
        assert!(batch.complete);
        assert_eq!(batch.suggestions.len(), 1);
        let suggestion = &batch.suggestions[0];
        assert_eq!(suggestion.kind, SuggestionKind::Reschedule);
        assert_eq!(suggestion.trains, vec![t2]);
        assert!(suggestion.description.contains("delay T2 by 240s"));
        assert_eq!(suggestion.delta.after.conflict_count, 0);
        assert!(suggestion.delta.after.total_delay <= baseline.metrics.total_delay);
    }

    #[test]
    pub fn swap_yields_the_freight_to_the_express() {
        let mut topology = crate::problem::Topology::new();
        let b1 = topology.add(Location::block("B1"));
        let mut timetable = Timetable::new();
        let freight = timetable.add_train("F1", PriorityClass::Freight);
        let express = timetable.add_train("X1", PriorityClass::Express);
        // The freight holds the block for 20 minutes; the express behind it
        // would eat the whole wait.
        timetable.add_stop(freight, b1, hm(9, 0), hm(9, 20));
        timetable.add_stop(express, b1, hm(9, 1), hm(9, 6));
        let scenario = Scenario {
            topology: Arc::new(topology),
            constraints: Arc::new(ConstraintSet {
                max_allowed_delay: 600,
                ..ConstraintSet::default()
            }),
            timetable,
            perturbation: None,
        };
        let baseline = simulate(&scenario);
        assert_eq!(baseline.conflicts.len(), 1);
        assert_eq!(baseline.conflicts[0].deferred, Some(express));
        assert_eq!(baseline.metrics.total_delay, 1260);

        let batch = suggest(
            &baseline,
            5,
            &SuggestOptions::default(),
            &CancellationToken::new(),
        );
        assert_eq!(batch.suggestions.len(), 1);
        let suggestion = &batch.suggestions[0];
        assert_eq!(suggestion.kind, SuggestionKind::PrioritySwap);
        assert!(suggestion.description.contains("prefer X1 over F1"));
        assert_eq!(suggestion.delta.after.conflict_count, 0);
        assert!(suggestion.delta.after.total_delay < baseline.metrics.total_delay);
    }

    #[test]
    pub fn reroute_uses_a_declared_alternate() {
        let mut topology = crate::problem::Topology::new();
        let b1 = topology.add(Location::block("B1"));
        let b2 = topology.add(Location::block("B2"));
        topology.locations[b1].alternates.push(b2);
        let mut timetable = Timetable::new();
        let t1 = timetable.add_train("T1", PriorityClass::Express);
        let t2 = timetable.add_train("T2", PriorityClass::Local);
        timetable.add_stop(t1, b1, hm(9, 0), hm(9, 5));
        timetable.add_stop(t2, b1, hm(9, 3), hm(9, 8));
        let scenario = Scenario {
            topology: Arc::new(topology),
            constraints: Arc::new(ConstraintSet::default()),
            timetable,
            perturbation: None,
        };
        let baseline = simulate(&scenario);
        assert_eq!(baseline.conflicts.len(), 1);

        let batch = suggest(
            &baseline,
            5,
            &SuggestOptions::default(),
            &CancellationToken::new(),
        );
        // The 240s shift exceeds the 180s allowance, so the reroute is the
        // only candidate left.
        assert_eq!(batch.suggestions.len(), 1);
        let suggestion = &batch.suggestions[0];
        assert_eq!(suggestion.kind, SuggestionKind::Reroute);
        assert!(suggestion.description.contains("reroute T2 via B2"));
        assert_eq!(suggestion.delta.after.total_delay, 0);
        assert_eq!(suggestion.delta.after.conflict_count, 0);
        assert_eq!(suggestion.delta.after.route_changed, 1);
    }

    #[test]
    pub fn every_suggestion_improves_on_the_baseline() {
        let mut topology = crate::problem::Topology::new();
        let b1 = topology.add(Location::block("B1"));
        let b2 = topology.add(Location::block("B2"));
        topology.locations[b1].alternates.push(b2);
        let mut timetable = Timetable::new();
        let t1 = timetable.add_train("T1", PriorityClass::Express);
        let t2 = timetable.add_train("T2", PriorityClass::Local);
        let t3 = timetable.add_train("T3", PriorityClass::Freight);
        timetable.add_stop(t1, b1, hm(9, 0), hm(9, 5));
        timetable.add_stop(t2, b1, hm(9, 3), hm(9, 8));
        timetable.add_stop(t3, b1, hm(9, 4), hm(9, 30));
        let scenario = Scenario {
            topology: Arc::new(topology),
            constraints: Arc::new(ConstraintSet {
                max_allowed_delay: 3600,
                ..ConstraintSet::default()
            }),
            timetable,
            perturbation: None,
        };
        let baseline = simulate(&scenario);
        assert!(!baseline.conflicts.is_empty());

        let batch = suggest(
            &baseline,
            10,
            &SuggestOptions::default(),
            &CancellationToken::new(),
        );
        assert!(!batch.suggestions.is_empty());
        for suggestion in &batch.suggestions {
            let after = &suggestion.delta.after;
            assert!(after.total_delay <= baseline.metrics.total_delay);
            assert!(after.conflict_count <= baseline.metrics.conflict_count);
            assert!(
                after.total_delay < baseline.metrics.total_delay
                    || after.conflict_count < baseline.metrics.conflict_count
            );
        }
        // Best-first by total-delay reduction.
        for pair in batch.suggestions.windows(2) {
            assert!(pair[0].delta.after.total_delay <= pair[1].delta.after.total_delay);
        }
    }

    #[test]
    pub fn cancelled_batch_is_marked_incomplete() {
        let mut topology = crate::problem::Topology::new();
        let b1 = topology.add(Location::block("B1"));
        let mut timetable = Timetable::new();
        let t1 = timetable.add_train("T1", PriorityClass::Express);
        let t2 = timetable.add_train("T2", PriorityClass::Local);
        timetable.add_stop(t1, b1, hm(9, 0), hm(9, 5));
        timetable.add_stop(t2, b1, hm(9, 3), hm(9, 8));
        let scenario = Scenario {
            topology: Arc::new(topology),
            constraints: Arc::new(ConstraintSet {
                max_allowed_delay: 600,
                ..ConstraintSet::default()
            }),
            timetable,
            perturbation: None,
        };
        let baseline = simulate(&scenario);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let batch = suggest(&baseline, 5, &SuggestOptions::default(), &cancel);
        assert!(!batch.complete);
        assert!(batch.suggestions.is_empty());
        assert!(batch
            .dropped
            .iter()
            .all(|d| d.reason == DropReason::Cancelled));
        assert!(!batch.dropped.is_empty());
    }

    #[test]
    pub fn conflict_free_baseline_yields_an_empty_batch() {
        let mut topology = crate::problem::Topology::new();
        let b1 = topology.add(Location::block("B1"));
        let mut timetable = Timetable::new();
        let t1 = timetable.add_train("T1", PriorityClass::Express);
        timetable.add_stop(t1, b1, hm(9, 0), hm(9, 5));
        let scenario = Scenario {
            topology: Arc::new(topology),
            constraints: Arc::new(ConstraintSet::default()),
            timetable,
            perturbation: None,
        };
        let baseline = simulate(&scenario);
        let batch = suggest(
            &baseline,
            5,
            &SuggestOptions::default(),
            &CancellationToken::new(),
        );
        assert!(batch.complete);
        assert!(batch.suggestions.is_empty());
        assert!(batch.dropped.is_empty());
    }
}
