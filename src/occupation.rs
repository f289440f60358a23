use log::warn;
use serde::Serialize;
use tinyvec::TinyVec;

use crate::{
    interval::TimeInterval,
    problem::{DurationValue, LocationId, TimeValue, TrainId},
};

/// One completed stay of a train at a location; the simulator's output unit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Serialize)]
pub struct OccupancyInterval {
    pub location: LocationId,
    pub train: TrainId,
    pub interval: TimeInterval,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Occupant {
    pub train: TrainId,
    pub entered: TimeValue,
    pub scheduled_exit: TimeValue,
}

/// Admission verdict for a train asking to enter a location.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Granted,
    Deferred {
        until: TimeValue,
        blockers: TinyVec<[TrainId; 4]>,
    },
}

/// Live occupancy of one location during a simulation run.
#[derive(Clone, Debug, Default)]
pub struct LocationState {
    pub active: TinyVec<[Occupant; 4]>,
    pub last_vacated: Option<(TimeValue, TrainId)>,
}

impl LocationState {
    /// Capacity and headway admission. Headway binds between one train
    /// vacating and a *different* train occupying; a train never blocks
    /// itself. Entry at exactly `departure + headway` is legal.
    pub fn admission(
        &self,
        train: TrainId,
        t: TimeValue,
        capacity: usize,
        headway: DurationValue,
    ) -> Admission {
        let mut until = t;
        let mut blockers: TinyVec<[TrainId; 4]> = TinyVec::new();

        if self.active.len() >= capacity {
            if let Some(first_exit) = self.active.iter().map(|o| o.scheduled_exit).min() {
                until = until.max(first_exit + headway);
                for occ in self.active.iter() {
                    blockers.push(occ.train);
                }
            }
        }

        if let Some((vacated_at, vacated_train)) = self.last_vacated {
            if vacated_train != train && t < vacated_at + headway {
                until = until.max(vacated_at + headway);
                if !blockers.contains(&vacated_train) {
                    blockers.push(vacated_train);
                }
            }
        }

        if until > t {
            Admission::Deferred { until, blockers }
        } else {
            Admission::Granted
        }
    }

    pub fn enter(&mut self, occupant: Occupant) {
        if self.active.iter().any(|o| o.train == occupant.train) {
            warn!("train {:?} already occupies this location", occupant.train);
            return;
        }
        self.active.push(occupant);
    }

    /// Removes the occupant and returns its entry time.
    pub fn exit(&mut self, train: TrainId, t: TimeValue) -> TimeValue {
        let idx = self
            .active
            .iter()
            .position(|o| o.train == train)
            .unwrap_or_else(|| panic!("train {:?} exits a location it never entered", train));
        let occupant = self.active.remove(idx);
        match self.last_vacated {
            Some((prev, _)) if prev >= t => {}
            _ => self.last_vacated = Some((t, train)),
        }
        occupant.entered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn admits_up_to_capacity() {
        let mut state = LocationState::default();
        assert_eq!(state.admission(TrainId(0), 100, 2, 0), Admission::Granted);
        state.enter(Occupant {
            train: TrainId(0),
            entered: 100,
            scheduled_exit: 300,
        });
        assert_eq!(state.admission(TrainId(1), 150, 2, 0), Admission::Granted);
        state.enter(Occupant {
            train: TrainId(1),
            entered: 150,
            scheduled_exit: 400,
        });

        match state.admission(TrainId(2), 200, 2, 0) {
            Admission::Deferred { until, blockers } => {
                assert_eq!(until, 300);
                assert_eq!(blockers.len(), 2);
            }
            other => panic!("expected deferral, got {:?}", other),
        }
    }

    #[test]
    pub fn headway_bound_is_inclusive() {
        let mut state = LocationState::default();
        state.enter(Occupant {
            train: TrainId(0),
            entered: 0,
            scheduled_exit: 300,
        });
        state.exit(TrainId(0), 300);

        match state.admission(TrainId(1), 350, 1, 120) {
            Admission::Deferred { until, blockers } => {
                assert_eq!(until, 420);
                assert_eq!(blockers.to_vec(), vec![TrainId(0)]);
            }
            other => panic!("expected deferral, got {:?}", other),
        }
        assert_eq!(state.admission(TrainId(1), 420, 1, 120), Admission::Granted);
    }

    #[test]
    pub fn headway_does_not_bind_against_same_train() {
        let mut state = LocationState::default();
        state.enter(Occupant {
            train: TrainId(3),
            entered: 0,
            scheduled_exit: 100,
        });
        state.exit(TrainId(3), 100);
        assert_eq!(state.admission(TrainId(3), 110, 1, 120), Admission::Granted);
    }
}
