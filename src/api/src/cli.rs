//! CLI commands for racedb-api.
//!
//! Every command except `serve` opens the race database, runs one engine
//! and prints JSON or a table to stdout. Progress goes to stderr.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::optimizer::{
    named_preset, optimize_conditional, optimize_conditional_weights, optimize_global_weights,
    RaceConditions, PRESET_NAMES,
};
use crate::prediction::{predict_race, RacePrediction, Weights};
use crate::stats::{aggregate, summary, Dimension, RaceFilter, RateTable, Summary};
use crate::storage::{ExportBundle, RaceRepository};
use crate::strategy::{recommend, StrategyReport};
use crate::types::{Course, Race, Surface};

#[derive(Parser)]
#[command(name = "racedb-api")]
#[command(version, about = "RaceDB: race statistics and win-rate prediction API and CLI", long_about = None)]
pub struct Cli {
    /// SQLite database path (overrides config)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print a rate table for one dimension
    Stats {
        /// popularity, jockey, gateNumber, course or distanceSurface
        #[arg(value_name = "DIMENSION")]
        dimension: String,

        #[arg(long, value_delimiter = ',')]
        course: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        surface: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        distance: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        level: Vec<String>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Collection overview and top jockeys
    Summary {
        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Predict a candidate race from a JSON file
    Predict {
        /// Path to race JSON file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// default, global, conditional, or a preset name
        #[arg(short, long, default_value = "default")]
        weights: String,

        /// Add betting recommendations
        #[arg(short, long)]
        strategy: bool,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Derive factor weights from stored results
    Optimize {
        /// Target surface for conditional weights
        #[arg(long, requires = "distance")]
        surface: Option<String>,

        /// Target distance in meters
        #[arg(long, requires = "surface")]
        distance: Option<u32>,

        /// Target course
        #[arg(long)]
        course: Option<String>,
    },

    /// Import races from an export file
    Import {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// Export all races as JSON (stdout when no file is given)
    Export {
        #[arg(value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

/// Open the configured repository, honoring `--db`.
pub fn open_repository(config: &AppConfig, db: Option<&Path>) -> anyhow::Result<RaceRepository> {
    let path = db
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.storage.path));
    eprintln!("Using database: {}", path.display());
    RaceRepository::new(&path).with_context(|| format!("Failed to open {}", path.display()))
}

fn load_history(db: Option<&Path>) -> anyhow::Result<(AppConfig, Vec<Race>)> {
    let config = AppConfig::load()?;
    let races = open_repository(&config, db)?.list()?;
    eprintln!("Loaded {} races", races.len());
    Ok((config, races))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print statistics for one dimension.
pub fn run_stats(
    db: Option<&Path>,
    dimension: &str,
    filter: RaceFilter,
    format: &str,
) -> anyhow::Result<()> {
    let dimension: Dimension = dimension.parse()?;
    let (_, races) = load_history(db)?;
    let table = aggregate(&races, dimension, &filter);

    match format {
        "json" => print_json(&table)?,
        _ => print_rate_table(&table),
    }
    Ok(())
}

fn print_rate_table(table: &RateTable) {
    println!("=== {} ===", table.dimension);
    println!(
        "  {:<16} {:>6} {:>5} {:>7} {:>7} {:>7}",
        "key", "runs", "wins", "win%", "place%", "show%"
    );
    for (key, row) in &table.rows {
        println!(
            "  {:<16} {:>6} {:>5} {:>7.1} {:>7.1} {:>7.1}",
            key.to_string(),
            row.total,
            row.wins,
            row.win_rate,
            row.place_rate,
            row.show_rate
        );
    }
    if table.excluded > 0 {
        println!();
        println!("  {} entrants excluded for invalid keys", table.excluded);
    }
}

pub fn run_summary(db: Option<&Path>, format: &str) -> anyhow::Result<()> {
    let (_, races) = load_history(db)?;
    let s = summary(&races);
    match format {
        "json" => print_json(&s)?,
        _ => print_summary(&s),
    }
    Ok(())
}

fn print_summary(s: &Summary) {
    println!("Races:   {} ({} with results)", s.total_races, s.resulted_races);
    println!("Entries: {}", s.total_horses);
    println!();
    println!("=== Top Jockeys ===");
    for (i, j) in s.top_jockeys.iter().enumerate() {
        println!(
            "  {:2}. {:<16} {:>5.1}% ({}/{})",
            i + 1,
            j.jockey,
            j.win_rate,
            j.wins,
            j.rides
        );
    }
}

/// Resolve a `--weights` choice against the history and candidate.
fn resolve_weights(
    choice: &str,
    config: &AppConfig,
    history: &[Race],
    candidate: &Race,
) -> anyhow::Result<Weights> {
    let weights = match choice {
        "default" => config.prediction.weights,
        "global" => optimize_global_weights(history),
        "conditional" => optimize_conditional_weights(history, &RaceConditions::of(candidate)),
        other => match named_preset(other) {
            Some(w) => w,
            None => bail!(
                "Unknown weights '{}'. Use default, global, conditional or one of: {}",
                other,
                PRESET_NAMES.join(", ")
            ),
        },
    };
    Ok(weights)
}

/// Run prediction for a race file.
pub fn run_predict(
    db: Option<&Path>,
    input: &Path,
    weights: &str,
    with_strategy: bool,
    format: &str,
) -> anyhow::Result<()> {
    let input_json = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let candidate: Race = serde_json::from_str(&input_json)?;
    eprintln!("Horses: {}", candidate.field_size());

    let (config, history) = load_history(db)?;
    let weights = resolve_weights(weights, &config, &history, &candidate)?;
    let prediction = predict_race(
        &candidate,
        &history,
        Some(&weights),
        &config.prediction.options(),
    )?;

    if with_strategy {
        let report = recommend(prediction);
        match format {
            "json" => print_json(&report)?,
            _ => print_strategy(&report),
        }
    } else {
        match format {
            "json" => print_json(&prediction)?,
            _ => print_prediction(&prediction),
        }
    }
    Ok(())
}

fn print_prediction(prediction: &RacePrediction) {
    println!("=== Predicted Win Rates ===");
    for (i, p) in prediction.predictions.iter().enumerate() {
        println!(
            "  {:2}. {:>2} {:<18} {:>6.1}%  conf {:>5.1}%  odds {:>6.1}",
            i + 1,
            p.horse.horse_number,
            p.horse.name,
            p.predicted_win_rate * 100.0,
            p.confidence * 100.0,
            p.horse.odds
        );
    }
    println!();
    println!(
        "Average confidence: {:.1}%",
        prediction.average_confidence * 100.0
    );
}

fn print_strategy(report: &StrategyReport) {
    print_prediction(&report.race_analysis);
    println!();
    println!("=== Strategies (risk: {:?}) ===", report.risk_level);
    if report.recommended_strategies.is_empty() {
        println!("  none");
    }
    for s in &report.recommended_strategies {
        println!("  {:?}: {}", s.kind, s.target);
        println!("      {}", s.reason);
    }
}

pub fn run_optimize(
    db: Option<&Path>,
    surface: Option<String>,
    distance: Option<u32>,
    course: Option<String>,
) -> anyhow::Result<()> {
    let (_, history) = load_history(db)?;

    match (surface, distance) {
        (Some(surface), Some(distance)) => {
            let surface = Surface::from_label(&surface)
                .with_context(|| format!("Unknown surface: {}", surface))?;
            let course = course
                .as_deref()
                .and_then(Course::from_label)
                .unwrap_or_default();
            let conditions = RaceConditions {
                surface,
                distance,
                course,
            };
            print_json(&optimize_conditional(&history, &conditions))
        }
        _ => print_json(&optimize_global_weights(&history)),
    }
}

pub fn run_import(db: Option<&Path>, input: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let repo = open_repository(&config, db)?;
    let input_json = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let bundle: ExportBundle =
        serde_json::from_str(&input_json).context("Import file must contain a `data` array")?;

    let summary = repo.import(&bundle.data)?;
    print_json(&summary)
}

pub fn run_export(db: Option<&Path>, output: Option<PathBuf>) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let bundle = open_repository(&config, db)?.export()?;
    let json = serde_json::to_string_pretty(&bundle)?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("Exported {} races to {}", bundle.total_races, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
