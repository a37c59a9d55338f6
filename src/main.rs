//! Slipforge CLI
//!
//! Daily driver for the slip engine: resolve identities, ingest phase
//! observations, inspect modifiers, and generate a staked slip batch.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::Colorize;
use rust_decimal::Decimal;
use serde::Deserialize;
use slipforge::phase::{ObservationInput, SubjectRef};
use slipforge::types::{ObservationSource, Odds, Phase, Side};
use slipforge::{Config, GenerateOptions, Pipeline, RawProposition};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "slipforge")]
#[command(about = "Phase-aware betting slip engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a player name to its anonymous identifier
    Resolve {
        /// Raw player name (quoted)
        name: String,
    },

    /// Ingest phase observations from a JSON file
    Ingest {
        /// Path to a JSON array of observations
        file: PathBuf,
    },

    /// Show the phase modifier for a player on a date
    Modifier {
        /// Raw player name (quoted)
        name: String,

        /// Target date (YYYY-MM-DD, default today)
        #[arg(short, long)]
        date: Option<String>,

        /// Narrow to a prop type (points, rebounds, ...)
        #[arg(short, long)]
        prop: Option<String>,
    },

    /// Generate a staked slip batch from a proposition pool
    Generate {
        /// Path to a JSON array of propositions
        file: PathBuf,

        /// Target date (YYYY-MM-DD, default today)
        #[arg(short, long)]
        date: Option<String>,

        /// Override the guard-rail minimum
        #[arg(long)]
        min_slips: Option<usize>,

        /// Accept a batch below the minimum (logged loudly)
        #[arg(long)]
        bypass_guard_rail: bool,

        /// Override the configured bankroll
        #[arg(short, long)]
        bankroll: Option<Decimal>,

        /// Maximum slips funded by the staking engine
        #[arg(long)]
        max_slips: Option<usize>,

        /// Historical win rate, enables dynamic risk divisors
        #[arg(long)]
        win_rate: Option<f64>,
    },

    /// Show store statistics
    Stats,
}

/// One observation row as it appears in an ingest file.
#[derive(Debug, Deserialize)]
struct ObservationRecord {
    player: String,
    date: NaiveDate,
    phase: Phase,
    #[serde(default)]
    cycle_day: Option<u8>,
    confidence: f64,
    #[serde(default)]
    source: Option<ObservationSource>,
}

/// One proposition row as it appears in a pool file.
#[derive(Debug, Deserialize)]
struct PropositionRecord {
    player: String,
    prop_type: String,
    line: f64,
    side: Side,
    odds: Odds,
    confidence: f64,
    #[serde(default)]
    edge: Option<f64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let mut config = Config::from_env();

    match cli.command {
        Commands::Resolve { name } => resolve_name(&config, &name)?,
        Commands::Ingest { file } => ingest_observations(&config, &file)?,
        Commands::Modifier { name, date, prop } => {
            show_modifier(&config, &name, date.as_deref(), prop.as_deref())?
        }
        Commands::Generate {
            file,
            date,
            min_slips,
            bypass_guard_rail,
            bankroll,
            max_slips,
            win_rate,
        } => {
            if let Some(min) = min_slips {
                config.minimum_slips = min;
            }
            if let Some(roll) = bankroll {
                config.bankroll = roll;
            }
            generate_batch(
                &config,
                &file,
                date.as_deref(),
                bypass_guard_rail,
                max_slips,
                win_rate,
            )?
        }
        Commands::Stats => show_stats(&config)?,
    }

    Ok(())
}

fn parse_date(arg: Option<&str>) -> Result<NaiveDate> {
    match arg {
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("bad date {s:?}, expected YYYY-MM-DD")),
        None => Ok(chrono::Local::now().date_naive()),
    }
}

fn resolve_name(config: &Config, name: &str) -> Result<()> {
    let mut pipeline = Pipeline::from_config(config);
    let id = pipeline.resolver_mut().resolve(name)?;

    println!("\n{}", "=".repeat(70));
    println!("  IDENTITY");
    println!("{}\n", "=".repeat(70));
    println!("  Input:      {name}");
    println!("  Anonymous:  {}", id.to_string().cyan());

    Ok(())
}

fn ingest_observations(config: &Config, file: &PathBuf) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let records: Vec<ObservationRecord> = serde_json::from_str(&text)
        .with_context(|| format!("cannot parse {} as an observation array", file.display()))?;
    let total = records.len();

    let inputs: Vec<ObservationInput> = records
        .into_iter()
        .map(|r| ObservationInput {
            subject: SubjectRef::Name(r.player),
            date: r.date,
            phase: r.phase,
            cycle_day: r.cycle_day,
            confidence: r.confidence,
            source: r.source.unwrap_or(ObservationSource::Imported),
        })
        .collect();

    let mut pipeline = Pipeline::from_config(config);
    let (tracker, resolver) = pipeline.tracker_and_resolver_mut();
    let accepted = tracker.ingest(inputs, resolver)?;

    println!(
        "\nIngested {} of {} observation(s); store now holds {}.",
        accepted.to_string().green(),
        total,
        pipeline.tracker().observation_count()
    );

    Ok(())
}

fn show_modifier(config: &Config, name: &str, date: Option<&str>, prop: Option<&str>) -> Result<()> {
    let target = parse_date(date)?;
    let mut pipeline = Pipeline::from_config(config);
    let id = pipeline.resolver_mut().resolve(name)?;

    let modifier = pipeline.tracker().get_modifier(id, target, prop);
    let phase = pipeline.tracker().latest_phase(id, target);

    println!("\n{}", "=".repeat(70));
    println!("  PHASE MODIFIER - {target}");
    println!("{}\n", "=".repeat(70));
    println!("  Player:    {name}");
    println!(
        "  Phase:     {}",
        phase.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
    );
    if let Some(p) = prop {
        println!("  Prop:      {p}");
    }

    let shown = format!("{modifier:.4}");
    let shown = if modifier > 1.0 {
        shown.green()
    } else if modifier < 1.0 {
        shown.red()
    } else {
        shown.normal()
    };
    println!("  Modifier:  {shown}");

    Ok(())
}

fn generate_batch(
    config: &Config,
    file: &PathBuf,
    date: Option<&str>,
    bypass_guard_rail: bool,
    max_slips: Option<usize>,
    win_rate: Option<f64>,
) -> Result<()> {
    let target = parse_date(date)?;
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let records: Vec<PropositionRecord> = serde_json::from_str(&text)
        .with_context(|| format!("cannot parse {} as a proposition array", file.display()))?;

    let raw: Vec<RawProposition> = records
        .into_iter()
        .map(|r| RawProposition {
            subject: r.player,
            prop_type: r.prop_type,
            line: r.line,
            side: r.side,
            odds: r.odds,
            confidence: r.confidence,
            edge: r.edge,
        })
        .collect();

    println!("\n{}", "=".repeat(70));
    println!("  SLIP BATCH - {target}");
    println!(
        "  Bankroll: ${} | Minimum: {} | Bypass: {}",
        config.bankroll,
        config.minimum_slips,
        if bypass_guard_rail { "YES" } else { "no" }
    );
    println!("{}\n", "=".repeat(70));
    println!("Pool: {} proposition(s)\n", raw.len());

    let mut pipeline = Pipeline::from_config(config);
    let options = GenerateOptions {
        target_date: target,
        bypass_guard_rail,
        win_rate,
        max_slips: max_slips.unwrap_or(config.staking.max_portfolio_size),
    };

    let batch = match pipeline.generate(raw, &options) {
        Ok(batch) => batch,
        Err(e) => {
            println!("{} {e}", "BATCH REJECTED:".red().bold());
            return Err(e.into());
        }
    };

    for (i, slip) in batch.slips.iter().enumerate() {
        println!(
            "{}. {} [{}] EV {:+.2} | confidence {:.3} | stake {}",
            i + 1,
            slip.slip_id.bold(),
            slip.archetype,
            slip.expected_value,
            slip.aggregate_confidence,
            if slip.stake.is_zero() {
                "unfunded".dimmed().to_string()
            } else {
                format!("${}", slip.stake).green().to_string()
            }
        );
        for leg in &slip.legs {
            println!(
                "     {} {} {} {} @ {:.2} (conf {:.3})",
                leg.subject_ref,
                leg.prop_type,
                leg.side,
                leg.line,
                leg.odds.to_decimal(),
                leg.confidence
            );
        }
        if let Some(odds) = slip.combined_odds {
            println!("     combined odds {odds:.2}");
        }
        println!();
    }

    println!("{}", "-".repeat(70));
    println!(
        "Eligible: {} | Rejected: {} ({} confidence, {} edge, {} edge-case, {} duplicate, {} invalid)",
        batch.eligible_count,
        batch.rejections.total(),
        batch.rejections.below_confidence,
        batch.rejections.below_edge,
        batch.rejections.edge_case,
        batch.rejections.duplicate,
        batch.rejections.invalid,
    );

    let verdict = if batch.guard_rail.bypassed {
        "ACCEPTED (guard rail bypassed)".yellow().bold()
    } else {
        "ACCEPTED".green().bold()
    };
    println!(
        "{} {} slip(s), ${} total stake of ${} bankroll",
        verdict, batch.slips.len(), batch.total_stake, batch.bankroll
    );

    Ok(())
}

fn show_stats(config: &Config) -> Result<()> {
    let pipeline = Pipeline::from_config(config);
    let stats = pipeline.resolver().stats();

    println!("\n{}", "=".repeat(70));
    println!("  ENGINE STATISTICS");
    println!("{}\n", "=".repeat(70));
    println!("Identity store:");
    println!("  Subjects:     {}", stats.total_subjects);
    println!("  Unique ids:   {}", stats.unique_ids);
    println!("\nPhase store:");
    println!("  Observations: {}", pipeline.tracker().observation_count());

    Ok(())
}
