use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use log::info;

use runtrack_lib::db::models::{RunRecord, SortKey};
use runtrack_lib::store::delete_run;
use runtrack_lib::tracking::{parse_track, replay_track, RunFinalizer, TrackerConfig};
use runtrack_lib::utils::{
    format_calories, format_distance_km, format_run_date, format_speed, format_stopwatch,
    init_logging,
};
use runtrack_lib::{resolve_data_dir, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run tracking and run history", long_about = None)]
struct Cli {
    /// Directory holding the run database and settings (defaults to $RUNTRACK_DATA_DIR)
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a recorded track file and store the finished run
    Replay {
        /// JSON array of start/fix/pause/resume/stop events
        #[arg(value_hint = ValueHint::FilePath)]
        track: PathBuf,

        /// Image stored with the run
        #[arg(long, value_hint = ValueHint::FilePath)]
        thumbnail: Option<PathBuf>,
    },
    /// List stored runs
    List {
        /// Ordering of the listed runs, largest or newest first
        #[arg(long, value_enum, default_value_t = SortOpt::Date)]
        sort: SortOpt,
    },
    /// Delete a stored run
    Delete { id: i64 },
    /// Totals across every stored run
    Totals,
    /// Show or change the user profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SortOpt {
    Date,
    Distance,
    #[value(alias = "time")]
    Duration,
    #[value(aliases = ["speed", "avgSpeed"])]
    AvgSpeed,
    Calories,
}

impl From<SortOpt> for SortKey {
    fn from(opt: SortOpt) -> Self {
        match opt {
            SortOpt::Date => SortKey::Date,
            SortOpt::Distance => SortKey::Distance,
            SortOpt::Duration => SortKey::Duration,
            SortOpt::AvgSpeed => SortKey::AvgSpeed,
            SortOpt::Calories => SortKey::Calories,
        }
    }
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    Show,
    Set {
        #[arg(long)]
        name: String,

        /// Body weight in kilograms
        #[arg(long)]
        weight: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let data_dir = resolve_data_dir(cli.data_dir);
    let state = AppState::open(&data_dir, TrackerConfig::from_env())
        .await
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;

    match cli.command {
        Command::Replay { track, thumbnail } => replay(&state, track, thumbnail).await,
        Command::List { sort } => list(&state, sort.into()).await,
        Command::Delete { id } => {
            let run = state
                .store
                .database()
                .get_run(id)
                .await?
                .ok_or_else(|| anyhow!("no run with id {id}"))?;
            delete_run(state.store.as_ref(), &run).await?;
            println!("Deleted run #{id}");
            Ok(())
        }
        Command::Totals => {
            let totals = state.store.totals().await?;
            println!("Runs:      {}", totals.run_count);
            println!(
                "Distance:  {}",
                format_distance_km(i32::try_from(totals.total_distance_meters).unwrap_or(i32::MAX))
            );
            println!("Time:      {}", format_stopwatch(totals.total_duration_ms, false));
            println!("Calories:  {}kcal", totals.total_calories_burned);
            println!("Avg speed: {}", format_speed(totals.mean_avg_speed_kmh));
            Ok(())
        }
        Command::Profile { action } => {
            let profile = match action {
                ProfileAction::Show => state.settings.profile(),
                ProfileAction::Set { name, weight } => state.settings.update_profile(&name, weight)?,
            };
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
    }
}

async fn replay(state: &AppState, track: PathBuf, thumbnail: Option<PathBuf>) -> Result<()> {
    let contents = fs::read_to_string(&track)
        .with_context(|| format!("failed to read track {}", track.display()))?;
    let events = parse_track(&contents)?;
    let mut outcome = replay_track(&events)?;

    if outcome.dropped_fixes > 0 {
        info!("{} fixes arrived while paused and were dropped", outcome.dropped_fixes);
    }

    let thumbnail = match thumbnail {
        Some(path) => fs::read(&path)
            .with_context(|| format!("failed to read thumbnail {}", path.display()))?,
        None => Vec::new(),
    };

    let finalizer = RunFinalizer::new(state.store.clone());
    let run = finalizer
        .finalize(&mut outcome.session, state.settings.weight_kg(), thumbnail)
        .await?;
    print_run(&run);
    Ok(())
}

async fn list(state: &AppState, key: SortKey) -> Result<()> {
    let history = state.history(key);
    let current = history.current();
    if current.runs.is_empty() {
        println!("No runs yet");
    }
    for run in &current.runs {
        print_run(run);
    }
    history.shutdown().await
}

fn print_run(run: &RunRecord) {
    println!(
        "#{:<4} {}  {:>9}  {}  {:>9}  {:>8}",
        run.id,
        format_run_date(run.captured_at_ms),
        format_distance_km(run.distance_meters),
        format_stopwatch(run.duration_ms, false),
        format_speed(run.avg_speed_kmh),
        format_calories(run.calories_burned),
    );
}
