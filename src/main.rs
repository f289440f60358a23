use std::{path::PathBuf, time::Duration};

use log::error;
use structopt::StructOpt;

use railweave::{
    delay, get_suggestions, parser, run_simulation, CancellationToken, SimulationRun,
    SuggestOptions, SuggestionBatch,
};

#[derive(StructOpt, Debug)]
#[structopt(name = "railweave")]
struct Opt {
    /// "simulate" or "suggest"
    #[structopt(name = "MODE")]
    mode: String,

    /// Scenario files to process
    #[structopt(name = "FILE", parse(from_os_str))]
    files: Vec<PathBuf>,

    /// Maximum number of suggestions to return
    #[structopt(short, long, default_value = "5")]
    max_candidates: usize,

    /// Wall-clock budget per suggestion candidate, in seconds
    #[structopt(long)]
    candidate_timeout: Option<f64>,

    /// Print machine-readable JSON instead of tables
    #[structopt(long)]
    json: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Simulate,
    Suggest,
}

pub fn main() {
    pretty_env_logger::init();
    let opt = Opt::from_args();

    let mode = match opt.mode.as_str() {
        "simulate" => Mode::Simulate,
        "suggest" => Mode::Suggest,
        other => {
            error!("unknown mode {:?} (use simulate or suggest)", other);
            std::process::exit(1);
        }
    };

    if opt.files.is_empty() {
        error!("no scenario files given");
        std::process::exit(1);
    }

    for file in &opt.files {
        hprof::start_frame();
        if let Err(message) = process(file, mode, &opt) {
            error!("{}: {}", file.to_string_lossy(), message);
            std::process::exit(2);
        }
        hprof::profiler().print_timing();
    }
}

fn process(file: &PathBuf, mode: Mode, opt: &Opt) -> Result<(), String> {
    let named = parser::read_json_file(&file.to_string_lossy()).map_err(|e| e.to_string())?;

    let run = {
        let _p = hprof::enter("simulate");
        run_simulation(named.scenario).map_err(|e| e.to_string())?
    };

    let batch = (mode == Mode::Suggest).then(|| {
        let _p = hprof::enter("suggest");
        let options = SuggestOptions {
            candidate_timeout: opt.candidate_timeout.map(Duration::from_secs_f64),
        };
        get_suggestions(&run, opt.max_candidates, &options, &CancellationToken::new())
    });

    if opt.json {
        print_json(&named.name, &run, batch.as_ref());
    } else {
        print_run(&named.name, &run);
        if let Some(batch) = &batch {
            print_suggestions(batch);
        }
    }
    Ok(())
}

fn fmt_time(t: i32) -> String {
    format!("{:02}:{:02}:{:02}", t / 3600, (t / 60) % 60, t % 60)
}

fn print_run(name: &str, run: &SimulationRun) {
    let timetable = &run.scenario.timetable;
    let topology = &run.scenario.topology;

    println!(
        "{}: {} trains, {} occupancy intervals",
        name,
        timetable.trains.len(),
        run.timeline.len()
    );

    println!("conflicts ({}):", run.conflicts.len());
    for conflict in &run.conflicts {
        let trains = conflict
            .trains
            .iter()
            .map(|t| timetable.trains[*t].name.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "  {:<10} {} -> {} {:>6?} {}",
            topology.locations[conflict.location].name,
            fmt_time(conflict.window.time_start),
            fmt_time(conflict.window.time_end),
            conflict.severity,
            trains
        );
    }

    println!("train delays:");
    for (train, train_delay) in delay::propagate(run).iter_enumerated() {
        println!(
            "  {:<10} {:>6}s {:?}",
            timetable.trains[train].name, train_delay.delay, train_delay.class
        );
    }

    let m = &run.metrics;
    println!(
        "throughput {:.1}% | total delay {}s | conflicts {} | on-time {} minor {} major {}",
        m.throughput_pct, m.total_delay, m.conflict_count, m.on_time, m.minor_delay, m.major_delay
    );
}

fn print_suggestions(batch: &SuggestionBatch) {
    println!(
        "suggestions ({}{}):",
        batch.suggestions.len(),
        if batch.complete { "" } else { ", incomplete" }
    );
    for suggestion in &batch.suggestions {
        let before = &suggestion.delta.before;
        let after = &suggestion.delta.after;
        println!(
            "  #{} [{:?}] {} | delay {}s -> {}s | conflicts {} -> {}",
            suggestion.id,
            suggestion.kind,
            suggestion.description,
            before.total_delay,
            after.total_delay,
            before.conflict_count,
            after.conflict_count
        );
    }
    for dropped in &batch.dropped {
        println!("  dropped [{:?}] {}", dropped.reason, dropped.description);
    }
}

fn print_json(name: &str, run: &SimulationRun, batch: Option<&SuggestionBatch>) {
    let timetable = &run.scenario.timetable;
    let delays = delay::propagate(run);

    let suggestions = batch.map(|batch| {
        batch
            .suggestions
            .iter()
            .map(|s| {
                serde_json::json!({
                    "id": s.id,
                    "kind": s.kind,
                    "description": s.description,
                    "trains": s.trains,
                    "metrics": { "before": s.delta.before, "after": s.delta.after },
                })
            })
            .collect::<Vec<_>>()
    });

    let out = serde_json::json!({
        "name": name,
        "metrics": run.metrics,
        "conflicts": run.conflicts,
        "occupancy": run.timeline,
        "delays": delays
            .iter_enumerated()
            .map(|(train, d)| {
                serde_json::json!({
                    "train": timetable.trains[train].name,
                    "delay": d.delay,
                    "class": d.class,
                })
            })
            .collect::<Vec<_>>(),
        "suggestions": suggestions,
        "complete": batch.map(|b| b.complete).unwrap_or(true),
    });

    println!("{}", serde_json::to_string_pretty(&out).unwrap());
}
