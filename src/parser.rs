use std::{collections::HashMap, sync::Arc};

use chrono::{NaiveTime, Timelike};
use log::debug;
use serde::Deserialize;

use crate::{
    interval::TimeInterval,
    problem::{
        ConstraintSet, DurationValue, Location, LocationId, LocationKind, Perturbation,
        PriorityClass, Scenario, ScenarioError, TimeValue, Timetable, Topology,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("cannot read scenario file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed scenario file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unparseable clock time {0:?}")]
    BadTime(String),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

pub struct NamedScenario {
    pub name: String,
    pub scenario: Scenario,
}

/// Clock times are accepted as "HH:MM", "HH:MM:SS" or raw seconds since
/// midnight.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum TimeSpec {
    Seconds(TimeValue),
    Clock(String),
}

impl TimeSpec {
    fn resolve(&self) -> Result<TimeValue, ParseError> {
        match self {
            TimeSpec::Seconds(s) => Ok(*s),
            TimeSpec::Clock(text) => {
                let time = NaiveTime::parse_from_str(text, "%H:%M:%S")
                    .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
                    .map_err(|_| ParseError::BadTime(text.clone()))?;
                Ok(time.num_seconds_from_midnight() as TimeValue)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    name: Option<String>,
    locations: Vec<LocationFile>,
    #[serde(default)]
    constraints: ConstraintSet,
    trains: Vec<TrainFile>,
    #[serde(default)]
    perturbation: Option<PerturbationFile>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LocationKindFile {
    #[default]
    Block,
    Platform,
}

#[derive(Debug, Deserialize)]
struct LocationFile {
    name: String,
    #[serde(rename = "type", default)]
    kind: LocationKindFile,
    /// Required for platforms: the block the platform belongs to.
    #[serde(default)]
    block: Option<String>,
    #[serde(default)]
    capacity: Option<usize>,
    #[serde(default)]
    min_occupation: Option<DurationValue>,
    #[serde(default)]
    min_headway: Option<DurationValue>,
    #[serde(default)]
    alternates: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TrainFile {
    name: String,
    priority: PriorityClass,
    route: Vec<StopFile>,
}

#[derive(Debug, Deserialize)]
struct StopFile {
    location: String,
    arrival: TimeSpec,
    departure: TimeSpec,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PerturbationFile {
    DelayTrain { train: String, amount: DurationValue },
    CloseBlock { block: String, from: TimeSpec, to: TimeSpec },
    Accident { block: String, from: TimeSpec, to: TimeSpec },
}

pub fn read_json_file(path: &str) -> Result<NamedScenario, ParseError> {
    let text = std::fs::read_to_string(path)?;
    scenario_from_json(&text)
}

pub fn scenario_from_json(text: &str) -> Result<NamedScenario, ParseError> {
    let file: ScenarioFile = serde_json::from_str(text)?;

    let mut topology = Topology::new();
    let mut location_ids: HashMap<String, LocationId> = HashMap::new();
    for location in &file.locations {
        let id = topology.add(Location::block(&location.name));
        location_ids.insert(location.name.clone(), id);
    }
    let lookup = |ids: &HashMap<String, LocationId>, name: &str| {
        ids.get(name)
            .copied()
            .ok_or_else(|| ScenarioError::UnknownLocation(name.to_string()))
    };

    for (idx, location) in file.locations.iter().enumerate() {
        let id = LocationId::from(idx);
        if location.kind == LocationKindFile::Platform {
            let block_name = location
                .block
                .as_deref()
                .ok_or_else(|| ScenarioError::UnknownLocation(format!("{} (platform without block)", location.name)))?;
            let block = lookup(&location_ids, block_name)?;
            topology.locations[id].kind = LocationKind::Platform { block };
        }
        topology.locations[id].capacity = location.capacity;
        topology.locations[id].min_occupation = location.min_occupation;
        topology.locations[id].min_headway = location.min_headway;
        for alternate in &location.alternates {
            let alt = lookup(&location_ids, alternate)?;
            topology.locations[id].alternates.push(alt);
        }
    }

    let mut timetable = Timetable::new();
    for train in &file.trains {
        let id = timetable.add_train(&train.name, train.priority);
        for stop in &train.route {
            let location = lookup(&location_ids, &stop.location)?;
            timetable.add_stop(id, location, stop.arrival.resolve()?, stop.departure.resolve()?);
        }
    }

    let perturbation = match &file.perturbation {
        None => None,
        Some(PerturbationFile::DelayTrain { train, amount }) => {
            let train = timetable
                .find_train(train)
                .ok_or_else(|| ScenarioError::UnknownTrain(train.clone()))?;
            Some(Perturbation::DelayTrain {
                train,
                amount: *amount,
            })
        }
        Some(PerturbationFile::CloseBlock { block, from, to }) => Some(Perturbation::CloseBlock {
            block: lookup(&location_ids, block)?,
            window: TimeInterval::new(from.resolve()?, to.resolve()?),
        }),
        Some(PerturbationFile::Accident { block, from, to }) => Some(Perturbation::Accident {
            block: lookup(&location_ids, block)?,
            window: TimeInterval::new(from.resolve()?, to.resolve()?),
        }),
    };

    let scenario = Scenario {
        topology: Arc::new(topology),
        constraints: Arc::new(file.constraints),
        timetable,
        perturbation,
    };
    scenario.check()?;

    debug!(
        "loaded scenario with {} locations, {} trains",
        scenario.topology.locations.len(),
        scenario.timetable.trains.len()
    );

    Ok(NamedScenario {
        name: file.name.unwrap_or_else(|| "scenario".to_string()),
        scenario,
    })
}
