pub mod conflict;
pub mod delay;
pub mod interval;
pub mod metrics;
pub mod occupation;
pub mod parser;
pub mod problem;
pub mod simulator;
pub mod suggest;
pub mod validate;

pub use conflict::{Conflict, Severity};
pub use metrics::{Metrics, MetricsDelta};
pub use problem::{
    ConstraintSet, Location, LocationId, Perturbation, PriorityClass, Scenario, ScheduleEntry,
    Timetable, Topology, Train, TrainId,
};
pub use simulator::SimulationRun;
pub use suggest::{
    CancellationToken, DropReason, SuggestOptions, Suggestion, SuggestionBatch, SuggestionKind,
};
pub use validate::ConfigError;

use problem::ScenarioError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("candidate evaluation exceeded its time budget")]
    CandidateTimeout,
    #[error("suggestion {0} does not belong to this run's batch")]
    UnknownSuggestion(usize),
}

/// Validates the scenario's configuration, then runs it to completion. The
/// returned run carries the occupancy timeline, the ordered conflict list and
/// the run's KPIs.
pub fn run_simulation(scenario: Scenario) -> Result<SimulationRun, EngineError> {
    validate::validate(&scenario.constraints)?;
    validate::validate_topology(&scenario.topology)?;
    simulator::simulate(&scenario, None)
}

/// Ranked reschedule suggestions for a finished run. Candidates are
/// evaluated in parallel; the token stops new evaluations, the per-candidate
/// timeout in `options` drops slow ones without failing the batch.
pub fn get_suggestions(
    run: &SimulationRun,
    max_candidates: usize,
    options: &SuggestOptions,
    cancel: &CancellationToken,
) -> SuggestionBatch {
    suggest::suggest(run, max_candidates, options, cancel)
}

/// Picks a suggestion's timetable as the new baseline. Pure: persisting the
/// returned timetable is the caller's responsibility.
pub fn apply_suggestion(
    run: &SimulationRun,
    batch: &SuggestionBatch,
    suggestion_id: usize,
) -> Result<Timetable, EngineError> {
    let suggestion = batch
        .suggestions
        .iter()
        .find(|s| s.id == suggestion_id && s.delta.before == run.metrics)
        .ok_or(EngineError::UnknownSuggestion(suggestion_id))?;
    Ok(suggestion.timetable().clone())
}
