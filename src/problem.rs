use std::sync::Arc;

use serde::{Deserialize, Serialize};
use typed_index_collections::TiVec;

use crate::interval::TimeInterval;

/// Seconds since section-local midnight.
pub type TimeValue = i32;
pub type DurationValue = i32;

#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Default,
    derive_more::From,
    derive_more::Into,
    Serialize,
    Deserialize,
)]
pub struct TrainId(pub usize);

#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Debug,
    Default,
    derive_more::From,
    derive_more::Into,
    Serialize,
    Deserialize,
)]
pub struct LocationId(pub usize);

/// Ordered so that sorting ascending puts the most important class first.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    Express,
    Mail,
    Local,
    Freight,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocationKind {
    Block,
    Platform { block: LocationId },
}

/// A block or platform in the section. Capacity, occupation and headway
/// fields override the section-wide defaults from [`ConstraintSet`] when set.
#[derive(Clone, Debug)]
pub struct Location {
    pub name: String,
    pub kind: LocationKind,
    pub capacity: Option<usize>,
    pub min_occupation: Option<DurationValue>,
    pub min_headway: Option<DurationValue>,
    pub alternates: Vec<LocationId>,
}

impl Location {
    pub fn block(name: &str) -> Location {
        Location {
            name: name.to_string(),
            kind: LocationKind::Block,
            capacity: None,
            min_occupation: None,
            min_headway: None,
            alternates: Vec::new(),
        }
    }

    pub fn platform(name: &str, block: LocationId) -> Location {
        Location {
            name: name.to_string(),
            kind: LocationKind::Platform { block },
            capacity: None,
            min_occupation: None,
            min_headway: None,
            alternates: Vec::new(),
        }
    }

    pub fn is_platform(&self) -> bool {
        matches!(self.kind, LocationKind::Platform { .. })
    }

    pub fn effective_capacity(&self, constraints: &ConstraintSet) -> usize {
        self.capacity.unwrap_or(match self.kind {
            LocationKind::Block => constraints.block_capacity,
            LocationKind::Platform { .. } => constraints.platform_capacity,
        })
    }

    pub fn effective_min_occupation(&self, constraints: &ConstraintSet) -> DurationValue {
        self.min_occupation.unwrap_or(constraints.min_occupation)
    }

    pub fn effective_min_headway(&self, constraints: &ConstraintSet) -> DurationValue {
        self.min_headway.unwrap_or(constraints.min_headway)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Topology {
    pub locations: TiVec<LocationId, Location>,
}

impl Topology {
    pub fn new() -> Topology {
        Default::default()
    }

    pub fn add(&mut self, location: Location) -> LocationId {
        self.locations.push_and_get_key(location)
    }

    pub fn find(&self, name: &str) -> Option<LocationId> {
        self.locations
            .iter_enumerated()
            .find(|(_, l)| l.name == name)
            .map(|(id, _)| id)
    }
}

/// Section-wide scheduling parameters. Per-location overrides live on
/// [`Location`]; these are the defaults and the policy bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintSet {
    pub min_headway: DurationValue,
    pub block_capacity: usize,
    pub platform_capacity: usize,
    pub min_occupation: DurationValue,
    pub dwell_time: DurationValue,
    pub max_allowed_delay: DurationValue,
}

impl Default for ConstraintSet {
    fn default() -> Self {
        ConstraintSet {
            min_headway: 120,
            block_capacity: 1,
            platform_capacity: 2,
            min_occupation: 60,
            dwell_time: 90,
            max_allowed_delay: 180,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Train {
    pub name: String,
    pub priority: PriorityClass,
}

/// One stop of a train's scheduled route. Candidate timetables replace the
/// whole entry sequence; entries are never edited in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub train: TrainId,
    pub location: LocationId,
    pub planned_arrival: TimeValue,
    pub planned_departure: TimeValue,
}

#[derive(Clone, Debug, Default)]
pub struct Timetable {
    pub trains: TiVec<TrainId, Train>,
    pub entries: Vec<ScheduleEntry>,
}

impl Timetable {
    pub fn new() -> Timetable {
        Default::default()
    }

    pub fn add_train(&mut self, name: &str, priority: PriorityClass) -> TrainId {
        self.trains.push_and_get_key(Train {
            name: name.to_string(),
            priority,
        })
    }

    pub fn find_train(&self, name: &str) -> Option<TrainId> {
        self.trains
            .iter_enumerated()
            .find(|(_, t)| t.name == name)
            .map(|(id, _)| id)
    }

    pub fn add_stop(
        &mut self,
        train: TrainId,
        location: LocationId,
        planned_arrival: TimeValue,
        planned_departure: TimeValue,
    ) {
        self.entries.push(ScheduleEntry {
            train,
            location,
            planned_arrival,
            planned_departure,
        });
    }

    /// Route of a train, in entry order.
    pub fn route(&self, train: TrainId) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(move |e| e.train == train)
    }

    pub fn route_locations(&self, train: TrainId) -> Vec<LocationId> {
        self.route(train).map(|e| e.location).collect()
    }

    /// Entry indexes per train, in route order.
    pub fn routes(&self) -> TiVec<TrainId, Vec<usize>> {
        let mut routes: TiVec<TrainId, Vec<usize>> =
            vec![Vec::new(); self.trains.len()].into();
        for (idx, entry) in self.entries.iter().enumerate() {
            if usize::from(entry.train) < routes.len() {
                routes[entry.train].push(idx);
            }
        }
        routes
    }
}

/// A disruption applied to the baseline timetable. Closed set; the simulator
/// handles every variant exhaustively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Perturbation {
    DelayTrain {
        train: TrainId,
        amount: DurationValue,
    },
    CloseBlock {
        block: LocationId,
        window: TimeInterval,
    },
    Accident {
        block: LocationId,
        window: TimeInterval,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ScenarioError {
    #[error("unknown location {0:?}")]
    UnknownLocation(String),
    #[error("unknown train {0:?}")]
    UnknownTrain(String),
    #[error("train {train:?} has non-monotonic planned times at {location:?}")]
    UnorderedTimes { train: String, location: String },
    #[error("delay amount for train {train:?} must be non-negative")]
    NegativeDelay { train: String },
    #[error("closure window on {location:?} is empty or reversed")]
    BadWindow { location: String },
}

/// Everything one simulation needs. Topology and constraints are shared
/// read-only across runs; the timetable is owned per scenario.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub topology: Arc<Topology>,
    pub constraints: Arc<ConstraintSet>,
    pub timetable: Timetable,
    pub perturbation: Option<Perturbation>,
}

impl Scenario {
    /// Structural validation, run before any simulation work.
    pub fn check(&self) -> Result<(), ScenarioError> {
        let n_locations = self.topology.locations.len();
        let n_trains = self.timetable.trains.len();

        for entry in &self.timetable.entries {
            if usize::from(entry.train) >= n_trains {
                return Err(ScenarioError::UnknownTrain(format!(
                    "#{}",
                    usize::from(entry.train)
                )));
            }
            if usize::from(entry.location) >= n_locations {
                return Err(ScenarioError::UnknownLocation(format!(
                    "#{}",
                    usize::from(entry.location)
                )));
            }
            if entry.planned_departure < entry.planned_arrival {
                return Err(ScenarioError::UnorderedTimes {
                    train: self.timetable.trains[entry.train].name.clone(),
                    location: self.topology.locations[entry.location].name.clone(),
                });
            }
        }

        for (train, route) in self.timetable.routes().iter_enumerated() {
            for pair in route.windows(2) {
                let prev = &self.timetable.entries[pair[0]];
                let next = &self.timetable.entries[pair[1]];
                if next.planned_arrival < prev.planned_departure {
                    return Err(ScenarioError::UnorderedTimes {
                        train: self.timetable.trains[train].name.clone(),
                        location: self.topology.locations[next.location].name.clone(),
                    });
                }
            }
        }

        match self.perturbation {
            Some(Perturbation::DelayTrain { train, amount }) => {
                if usize::from(train) >= n_trains {
                    return Err(ScenarioError::UnknownTrain(format!("#{}", usize::from(train))));
                }
                if amount < 0 {
                    return Err(ScenarioError::NegativeDelay {
                        train: self.timetable.trains[train].name.clone(),
                    });
                }
            }
            Some(Perturbation::CloseBlock { block, window })
            | Some(Perturbation::Accident { block, window }) => {
                if usize::from(block) >= n_locations {
                    return Err(ScenarioError::UnknownLocation(format!(
                        "#{}",
                        usize::from(block)
                    )));
                }
                if window.length() <= 0 {
                    return Err(ScenarioError::BadWindow {
                        location: self.topology.locations[block].name.clone(),
                    });
                }
            }
            None => {}
        }

        Ok(())
    }
}
