//! Regime engine CLI.
//!
//! Every command runs against a JSON state file holding the stores.
//!
//! # Usage
//!
//! ```bash
//! # Classify every bar, then generate forward outcomes
//! mahler-regime recompute --candles data/spx.csv
//! mahler-regime outcomes --candles data/spx.csv
//!
//! # Inspect evidence
//! mahler-regime matrix
//! mahler-regime stability
//!
//! # Build, save and version a constitution
//! mahler-regime constitution --save
//! mahler-regime version --actor ops
//!
//! # Governance
//! mahler-regime gates --hash <hash>
//! mahler-regime transition --hash <hash> --to DRY_RUN --actor ops
//!
//! # Backtests
//! mahler-regime backtest --candles data/spx.csv --start 2008-01-01 --end 2009-12-31
//! mahler-regime backtest-full --candles data/spx.csv --hash <hash> --attach
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use mahler_regime::data::{Candle, CandleLoader};
use mahler_regime::governance::GovernanceStatus;
use mahler_regime::pipeline::{parse_horizons, JobRunner, OutcomeRequest};
use mahler_regime::store::RegimeStore;
use mahler_regime::{EngineConfig, InMemoryStore, RegimeService};

const SEPARATOR: &str = "============================================================";

/// Regime engine CLI.
#[derive(Parser)]
#[command(name = "mahler-regime")]
#[command(about = "Regime classification, skill analysis and governed risk constitutions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON state file holding regimes, outcomes, constitutions and versions
    #[arg(long, default_value = "state/regime.json")]
    state: PathBuf,

    /// Engine configuration (TOML); defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Preset (symbol) to operate on
    #[arg(long, default_value = "default")]
    preset: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify bars into regimes
    Recompute {
        /// Candle file (CSV or Parquet with date,close columns)
        #[arg(long)]
        candles: PathBuf,

        /// First index to recompute
        #[arg(long, default_value_t = 0)]
        from: usize,

        /// Last index to recompute (inclusive); defaults to the last bar
        #[arg(long)]
        to: Option<usize>,

        /// Indices per committed chunk; defaults to the configured size
        #[arg(long)]
        chunk: Option<usize>,
    },

    /// Generate forward outcomes
    Outcomes {
        #[arg(long)]
        candles: PathBuf,

        #[arg(long, default_value_t = 0)]
        from: usize,

        #[arg(long)]
        to: Option<usize>,

        /// Comma-separated horizons (7d,14d,30d,90d,180d,365d); all when omitted
        #[arg(long)]
        horizons: Option<String>,
    },

    /// Print the skill matrix
    Matrix {
        /// Use the date-joined legacy matrix
        #[arg(long)]
        legacy: bool,

        /// Also print regimes the matrix suggests as useful
        #[arg(long)]
        suggest: bool,
    },

    /// Print decade stability scores
    Stability,

    /// Build a constitution from the stored evidence
    Constitution {
        /// Persist it as the preset's constitution
        #[arg(long)]
        save: bool,
    },

    /// Create a governance version from the saved constitution
    Version {
        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Request a governance transition
    Transition {
        #[arg(long)]
        hash: String,

        /// Target status (GENERATED, DRY_RUN, PROPOSED, APPLIED, ROLLED_BACK)
        #[arg(long)]
        to: String,

        #[arg(long, default_value = "cli")]
        actor: String,

        #[arg(long, default_value = "")]
        details: String,
    },

    /// Evaluate apply gates for a version
    Gates {
        #[arg(long)]
        hash: String,
    },

    /// Show the current regime and active constitution
    Current,

    /// Backtest a constitution over a date range
    Backtest {
        #[arg(long)]
        candles: PathBuf,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// Version hash; the saved constitution when omitted
        #[arg(long)]
        hash: Option<String>,
    },

    /// Backtest a constitution over every configured stress period
    BacktestFull {
        #[arg(long)]
        candles: PathBuf,

        #[arg(long)]
        hash: Option<String>,

        /// Attach the summary to the version's audit log (requires --hash)
        #[arg(long)]
        attach: bool,

        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Show version history
    History,

    /// Show regime day counts per tag and cohort
    Distribution,
}

fn load_candles(path: &Path) -> Result<Vec<Candle>> {
    CandleLoader::load(path).with_context(|| format!("Failed to load candles from {}", path.display()))
}

fn progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn save_state(store: &InMemoryStore, path: &Path) -> Result<()> {
    store
        .save(path)
        .with_context(|| format!("Failed to write state to {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mahler_regime=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let store = Arc::new(
        InMemoryStore::open(&cli.state)
            .with_context(|| format!("Failed to open state {}", cli.state.display()))?,
    );
    let service = RegimeService::new(Arc::clone(&store), config);
    let runner = JobRunner::new(CancellationToken::new());
    let preset = cli.preset.as_str();

    match cli.command {
        Commands::Recompute {
            candles,
            from,
            to,
            chunk,
        } => {
            let candles = load_candles(&candles)?;
            let mut request = service.recompute_request(preset);
            request.from_idx = from;
            request.to_idx = to;
            if let Some(chunk) = chunk {
                request.chunk_size = chunk;
            }
            let engine = service.recompute_engine();
            let pb = progress_bar()?;
            let sink = pb.clone();
            let job = runner.spawn("recompute", move |cancel| {
                engine.recompute(&candles, &request, &cancel, &sink)
            });
            let summary = job.join().await?;
            save_state(&store, &cli.state)?;
            print_json(&summary)?;
        }

        Commands::Outcomes {
            candles,
            from,
            to,
            horizons,
        } => {
            let candles = load_candles(&candles)?;
            let labels: Vec<String> = horizons
                .as_deref()
                .map(|h| h.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            let request = OutcomeRequest {
                preset: preset.to_string(),
                from_idx: from,
                to_idx: to,
                horizons: parse_horizons(&labels)?,
            };
            let generator = service.outcome_generator();
            let pb = progress_bar()?;
            let sink = pb.clone();
            let job = runner.spawn("outcomes", move |cancel| {
                generator.generate(&candles, &request, &cancel, &sink)
            });
            let summary = job.join().await?;
            save_state(&store, &cli.state)?;
            print_json(&summary)?;
        }

        Commands::Matrix { legacy, suggest } => {
            let matrix = if legacy {
                service.legacy_skill_matrix(preset)?
            } else {
                service.skill_matrix(preset)?
            };
            println!("{}", SEPARATOR);
            println!(
                "Skill matrix [{}] {:?}: {} joined, {} unmatched",
                preset, matrix.join, matrix.joined, matrix.skipped_unmatched
            );
            println!("{}", SEPARATOR);
            for cell in &matrix.cells {
                println!(
                    "{:<22} {:>4} n={:>6} skill_up={:+.3} skill_down={:+.3} {:?}",
                    cell.regime_tag.as_str(),
                    cell.horizon.label(),
                    cell.samples,
                    cell.skill_up,
                    cell.skill_down,
                    cell.confidence
                );
            }
            if suggest {
                let config = &service.config().policy;
                let suggested = matrix.suggest_useful_regimes(
                    config.allow_skill,
                    mahler_regime::analytics::Confidence::Medium,
                );
                println!("\nSuggested useful regimes: {:?}", suggested);
                println!("Configured useful regimes: {:?}", service.config().useful_regimes.tags);
            }
        }

        Commands::Stability => {
            let report = service.stability(preset)?;
            print_json(&report)?;
        }

        Commands::Constitution { save } => {
            let constitution = service.build_constitution(preset)?;
            println!("{}", SEPARATOR);
            println!(
                "Constitution {} [{}] hash {}",
                constitution.version, preset, constitution.hash
            );
            println!("{}", SEPARATOR);
            for policy in &constitution.policies {
                println!(
                    "{:<22} {:?} short={:?}/{:.2} long={:?}/{:.2} grade={:?} coverage={:.2} n={}",
                    policy.regime_tag.as_str(),
                    policy.status,
                    policy.short_filter,
                    policy.size_cap_short,
                    policy.long_filter,
                    policy.size_cap_long,
                    policy.stability_grade,
                    policy.decade_coverage,
                    policy.total_samples
                );
            }
            if save {
                let outcome = service.save_constitution(constitution)?;
                save_state(&store, &cli.state)?;
                println!("\nSaved: {:?}", outcome);
            }
        }

        Commands::Version { actor } => {
            match service.create_version(preset, &actor)? {
                Some(version) => {
                    save_state(&store, &cli.state)?;
                    println!(
                        "Version {} ({}) is {}",
                        version.version, version.hash, version.status
                    );
                }
                None => bail!("No saved constitution for {}; run `constitution --save` first", preset),
            }
        }

        Commands::Transition {
            hash,
            to,
            actor,
            details,
        } => {
            let target: GovernanceStatus = to.parse()?;
            let result = service.transition(preset, &hash, target, &actor, &details)?;
            if result.success {
                save_state(&store, &cli.state)?;
            }
            print_json(&result)?;
            if !result.success {
                bail!(result.error.unwrap_or_else(|| "Transition rejected".to_string()));
            }
        }

        Commands::Gates { hash } => match service.check_gates(preset, &hash)? {
            Some(report) => println!("{}", report.summary()),
            None => bail!("Version {} not found for {}", hash, preset),
        },

        Commands::Current => {
            match service.current_regime(preset)? {
                Some(record) => println!(
                    "{} {}: {} ({:?}) - {}",
                    preset,
                    record.date,
                    record.regime_tag.as_str(),
                    record.risk_level,
                    record.description
                ),
                None => println!("{}: no regime computed", preset),
            }
            match service.active_constitution(preset)? {
                Some(active) => {
                    println!("Active constitution: {} ({})", active.version, active.hash);
                    if let Some(record) = service.current_regime(preset)? {
                        if let Some(policy) = active.constitution.policy(record.regime_tag) {
                            println!(
                                "Policy: {:?} short {:?} long {:?}, exposure {:.2}",
                                policy.status,
                                policy.short_filter,
                                policy.long_filter,
                                policy.exposure()
                            );
                        }
                    }
                }
                None => println!("Active constitution: none"),
            }
        }

        Commands::Backtest {
            candles,
            start,
            end,
            hash,
        } => {
            let candles = load_candles(&candles)?;
            let result = service
                .backtest(&candles, preset, hash.as_deref(), start, end)?
                .ok_or_else(|| anyhow!("No constitution found for {}", preset))?;
            println!("{}", result.summary());
            for reason in &result.reasons {
                println!("  - {}", reason);
            }
        }

        Commands::BacktestFull {
            candles,
            hash,
            attach,
            actor,
        } => {
            if attach && hash.is_none() {
                bail!("--attach requires --hash");
            }
            let candles = load_candles(&candles)?;
            let constitution = service
                .constitution_for(preset, hash.as_deref())?
                .ok_or_else(|| anyhow!("No constitution found for {}", preset))?;
            let regimes = service.store().regimes(preset)?;
            let backtester = service.backtester();
            let job = runner.spawn("backtest-full", move |cancel| {
                backtester.run_full(&candles, &regimes, &constitution, &cancel)
            });
            let result = job.join().await?;

            println!("{}", SEPARATOR);
            println!("Full backtest [{}] {}: {}", preset, result.constitution_version, result.overall);
            println!("{}", SEPARATOR);
            for period in &result.periods {
                match (&period.result, &period.skipped) {
                    (Some(r), _) => println!(
                        "{:<14} {} DD {:+.2}% Sharpe {:+.2} CAGR {:+.2}%",
                        period.period.name,
                        r.verdict,
                        r.impact.drawdown_reduction * 100.0,
                        r.impact.sharpe_delta,
                        r.impact.cagr_delta * 100.0
                    ),
                    (None, Some(reason)) => println!("{:<14} skipped: {}", period.period.name, reason),
                    (None, None) => println!("{:<14} not run", period.period.name),
                }
            }

            if let (true, Some(hash)) = (attach, hash.as_deref()) {
                service
                    .attach_backtest_metrics(preset, hash, &result, &actor)?
                    .ok_or_else(|| anyhow!("Version {} not found for {}", hash, preset))?;
                save_state(&store, &cli.state)?;
                println!("\nMetrics attached to {}", hash);
            }
        }

        Commands::History => {
            for version in service.version_history(preset)? {
                println!(
                    "{} {} {:<12} created {} by {}",
                    version.version,
                    version.hash,
                    version.status.as_str(),
                    version.created_at.format("%Y-%m-%d %H:%M"),
                    version.created_by
                );
                for entry in &version.audit {
                    println!(
                        "    {} {:?} {} {}",
                        entry.at.format("%Y-%m-%d %H:%M"),
                        entry.action,
                        entry.actor,
                        entry.details
                    );
                }
            }
        }

        Commands::Distribution => {
            let distribution = service.distribution(preset)?;
            print_json(&distribution)?;
        }
    }

    Ok(())
}
