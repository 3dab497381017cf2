#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the wealth map pipeline.
//!
//! `run` aggregates the gridded survey years onto communes and writes the
//! output tables, skipping the work when inputs and configuration are
//! unchanged since the last run. `inspect` reports how a dataset's columns
//! resolve. `compare` prints selected indicators for a few communes.
//!
//! Log output is routed through `indicatif::MultiProgress` via
//! [`wealth_map_cli_utils::init_logger`] so progress bars and log lines
//! share the terminal.

mod cache;
mod export;

use std::path::{Path, PathBuf};
use std::str::FromStr as _;

use clap::{Parser, Subcommand};
use wealth_map_cli_utils::{IndicatifProgress, MultiProgress};
use wealth_map_grid_models::Indicator;
use wealth_map_pipeline::PipelineConfig;
use wealth_map_pipeline::tables::{ComparisonTable, commune_comparison};

/// Configuration file picked up from the working directory when
/// `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "wealth_map.toml";

#[derive(Parser)]
#[command(name = "wealth_map", about = "Gridded survey aggregation pipeline")]
struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the input datasets, overriding `data.data_dir`
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline and write the output tables
    Run {
        /// Directory for the output tables and the manifest
        #[arg(long, default_value = "data/generated")]
        output_dir: PathBuf,

        /// Rewrite every output even if nothing changed
        #[arg(long)]
        force: bool,
    },
    /// Report a dataset's columns and how they resolve
    Inspect {
        /// `GeoJSON` or `GeoJSONSeq` file
        path: PathBuf,
    },
    /// Print indicators for communes across years
    Compare {
        /// Commune names or codes
        #[arg(required = true)]
        names: Vec<String>,

        /// Comma-separated indicator columns (default: all)
        #[arg(long, value_delimiter = ',')]
        indicators: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = wealth_map_cli_utils::init_logger();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref(), cli.data_dir)?;

    match cli.command {
        Commands::Run { output_dir, force } => run(&config, &output_dir, force, &multi)?,
        Commands::Inspect { path } => inspect(&path, &config)?,
        Commands::Compare { names, indicators } => {
            compare(&config, &names, &indicators, &multi)?;
        }
    }

    Ok(())
}

fn load_config(
    path: Option<&Path>,
    data_dir: Option<PathBuf>,
) -> Result<PipelineConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            PipelineConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => {
            log::info!("No configuration file, using defaults");
            PipelineConfig::default()
        }
    };
    if let Some(dir) = data_dir {
        config.data.data_dir = dir;
    }
    Ok(config)
}

fn run(
    config: &PipelineConfig,
    output_dir: &Path,
    force: bool,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(output_dir)?;

    let inputs = cache::fingerprint_inputs(config)?;
    let config_sha256 = cache::config_fingerprint(config)?;
    let manifest = cache::load_manifest(output_dir);

    let stale: Vec<&str> = export::OUTPUTS
        .iter()
        .copied()
        .filter(|name| {
            cache::output_needs_regen(
                manifest.as_ref(),
                &inputs,
                &config_sha256,
                name,
                &output_dir.join(name),
                force,
            )
        })
        .collect();

    if stale.is_empty() {
        log::info!("All outputs up to date, nothing to do (use --force to regenerate)");
        return Ok(());
    }
    log::info!("Regenerating: {}", stale.join(", "));

    let progress = IndicatifProgress::pipeline_bar(multi, "Loading datasets");
    let tables = wealth_map_pipeline::run(config, &progress)?;

    for report in &tables.resolve_reports {
        log::info!(
            "{}: {} cells matched, {} dropped ({})",
            report.year,
            report.matched,
            report.dropped,
            if report.native_key {
                "native unit key"
            } else {
                "spatial join"
            }
        );
    }

    // Outputs from a stale manifest are only kept if its fingerprints match.
    let mut next = match manifest {
        Some(m) if m.inputs == inputs && m.config_sha256 == config_sha256 => m,
        _ => cache::Manifest::new(inputs, config_sha256),
    };
    for name in stale {
        export::write_output(output_dir, name, &tables)?;
        cache::record_output(&mut next, name);
        cache::save_manifest(output_dir, &next)?;
    }

    Ok(())
}

fn inspect(path: &Path, config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let report = wealth_map_pipeline::inspect::inspect_dataset(path, config)?;

    println!(
        "{} ({} features, {} with geometry)",
        report.name, report.features, report.with_geometry
    );
    println!(
        "  CRS: {} (effective {})",
        report.declared_crs, report.effective_crs
    );
    println!("  Columns: {}", report.columns.join(", "));
    println!();
    println!("  Grid fields:");
    for (field, column) in &report.fields {
        println!("    {:<12} <- {column}", field.column());
    }
    if !report.missing_fields.is_empty() {
        let missing: Vec<&str> = report.missing_fields.iter().map(|f| f.column()).collect();
        println!("  Missing: {}", missing.join(", "));
    }
    println!();
    let show = |label: &str, value: Option<&String>| {
        println!("  {label:<14} {}", value.map_or("-", String::as_str));
    };
    show("Cell unit key:", report.cell_unit_key.as_ref());
    show("Avg income:", report.avg_income.as_ref());
    show("Unit key:", report.unit_key.as_ref());
    show("Unit name:", report.unit_name.as_ref());

    Ok(())
}

fn parse_indicators(names: &[String]) -> Result<Vec<Indicator>, Box<dyn std::error::Error>> {
    if names.is_empty() {
        return Ok(Indicator::all().to_vec());
    }
    names
        .iter()
        .map(|name| {
            Indicator::from_str(name.trim())
                .map_err(|_| Box::<dyn std::error::Error>::from(format!("Unknown indicator: {name}")))
        })
        .collect()
}

fn compare(
    config: &PipelineConfig,
    names: &[String],
    indicators: &[String],
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let indicators = parse_indicators(indicators)?;

    let progress = IndicatifProgress::pipeline_bar(multi, "Loading datasets");
    let tables = wealth_map_pipeline::run(config, &progress)?;
    progress.finish_and_clear();

    let table = commune_comparison(&tables.by_region, names, &indicators);
    if table.is_empty() {
        log::warn!("No commune matched {}", names.join(", "));
        return Ok(());
    }
    print_comparison(&table);
    Ok(())
}

fn print_comparison(table: &ComparisonTable) {
    let labels: Vec<String> = table.indicators.iter().map(|i| i.label()).collect();
    let name_width = table
        .rows
        .iter()
        .map(|r| r.name.chars().count())
        .chain(std::iter::once(4))
        .max()
        .unwrap_or(4);

    print!("{:<name_width$}  {:<8}  {:<4}", "Name", "Code", "Year");
    for label in &labels {
        print!("  {label:>w$}", w = label.len().max(10));
    }
    println!();

    for row in &table.rows {
        print!("{:<name_width$}  {:<8}  {:<4}", row.name, row.unit_key, row.year);
        for (label, value) in labels.iter().zip(&row.values) {
            let text = match value {
                Some(v) if v.is_finite() => format!("{v:.2}"),
                Some(_) => "n/a".to_string(),
                None => "-".to_string(),
            };
            print!("  {text:>w$}", w = label.len().max(10));
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_indicator_columns() {
        let parsed =
            parse_indicators(&["poverty_rate".to_string(), " youth_pct".to_string()]).unwrap();
        assert_eq!(parsed, vec![Indicator::PovertyRate, Indicator::YouthPct]);
        assert_eq!(parse_indicators(&[]).unwrap(), Indicator::all());
        assert!(parse_indicators(&["wealth".to_string()]).is_err());
    }

    #[test]
    fn data_dir_flag_overrides_config() {
        let config = load_config(None, Some(PathBuf::from("/tmp/surveys"))).unwrap();
        assert_eq!(config.data.data_dir, PathBuf::from("/tmp/surveys"));
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "wealth_map",
            "compare",
            "Annecy",
            "74010",
            "--indicators",
            "poverty_rate,avg_income",
            "--data-dir",
            "surveys",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("surveys")));
        match cli.command {
            Commands::Compare { names, indicators } => {
                assert_eq!(names, vec!["Annecy", "74010"]);
                assert_eq!(indicators, vec!["poverty_rate", "avg_income"]);
            }
            _ => panic!("expected compare"),
        }
    }
}
