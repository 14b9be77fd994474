use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use qol_pipeline::analysis::analyze;
use qol_pipeline::apis::bea_tax::BeaTaxSource;
use qol_pipeline::apis::{DataSource, FetchRequest};
use qol_pipeline::config::{Config, Credentials};
use qol_pipeline::infra::http_client::ReqwestHttp;
use qol_pipeline::pipeline::Pipeline;
use qol_pipeline::types::{parse_state_list, parse_year_list, BaselinePolicy, NormalizationScope};
use qol_pipeline::{logging, metrics as qol_metrics, storage, validate};

#[derive(Parser)]
#[command(name = "qol_pipeline")]
#[command(about = "State quality-of-life pipeline: ACS, CPI and tax data merged into a composite score")]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (defaults to qol.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch all sources, build the QoL table, write the CSV and print the analysis
    Run {
        /// Years to cover (comma-separated)
        #[arg(long)]
        years: Option<String>,
        /// States to cover (comma-separated). Available: CA, NY, TX, UT
        #[arg(long)]
        states: Option<String>,
        /// Fixed CPI baseline instead of the sample mean
        #[arg(long)]
        baseline_cpi: Option<f64>,
        /// Z-score population: per_year or all_years
        #[arg(long)]
        scope: Option<NormalizationScope>,
        /// Tax burden CSV
        #[arg(long)]
        tax_path: Option<PathBuf>,
        /// Output CSV
        #[arg(long)]
        output: Option<PathBuf>,
        /// Write a Prometheus metrics snapshot here when the run ends
        #[arg(long)]
        metrics_out: Option<PathBuf>,
        /// Skip summary statistics and regressions
        #[arg(long)]
        skip_analysis: bool,
    },
    /// Fetch BEA personal income and taxes and write the tax burden CSV
    FetchTax {
        /// Years to cover (comma-separated)
        #[arg(long)]
        years: Option<String>,
        /// Destination CSV (defaults to the configured tax path)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print summary statistics and regressions for an output CSV
    Analyze {
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Run QA checks on an output CSV
    Validate {
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

fn apply_selection(config: &mut Config, years: Option<&str>, states: Option<&str>) -> anyhow::Result<()> {
    if let Some(years) = years {
        config.pipeline.years = parse_year_list(years).context("Invalid --years")?;
    }
    if let Some(states) = states {
        config.pipeline.states = parse_state_list(states).context("Invalid --states")?;
    }
    Ok(())
}

fn finish_metrics(handle: Option<&qol_metrics::PrometheusHandle>, path: Option<&PathBuf>) {
    if let (Some(handle), Some(path)) = (handle, path) {
        if let Err(e) = qol_metrics::write_snapshot(handle, path) {
            warn!("Failed to write metrics snapshot: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let credentials = Credentials::from_env();

    match cli.command {
        Commands::Run {
            years,
            states,
            baseline_cpi,
            scope,
            tax_path,
            output,
            metrics_out,
            skip_analysis,
        } => {
            apply_selection(&mut config, years.as_deref(), states.as_deref())?;
            if let Some(value) = baseline_cpi {
                config.features.baseline = BaselinePolicy::Fixed(value);
            }
            if let Some(scope) = scope {
                config.features.normalization_scope = scope;
            }
            if let Some(path) = tax_path {
                config.sources.tax_path = path;
            }
            if let Some(path) = output {
                config.output.path = path;
            }

            let handle = match qol_metrics::init() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("Metrics disabled: {}", e);
                    None
                }
            };

            println!("🚀 Running QoL pipeline ({})", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
            let http = Arc::new(ReqwestHttp::new(config.sources.timeout_secs)?);
            let pipeline = Pipeline::new(http, &config, &credentials)?;
            let result = match pipeline.run().await {
                Ok(result) => result,
                Err(e) => {
                    error!("Pipeline failed: {}", e);
                    println!("❌ Pipeline failed: {}", e);
                    finish_metrics(handle.as_ref(), metrics_out.as_ref());
                    return Err(e.into());
                }
            };

            let digest = storage::write_observations(&config.output.path, &result.rows)
                .with_context(|| format!("Failed to write {}", config.output.path.display()))?;

            println!("\n📊 Pipeline Results:");
            println!("   Rows: {}", result.rows.len());
            println!("   Scored: {} ({})", result.scored_rows(), result.scope);
            println!("   CPI baseline: {:.3} ({})", result.baseline_cpi, config.features.baseline.note());
            println!("   Imputed values: {}", result.imputed_values);
            println!("   Tax data: {}", if result.tax_available { "loaded" } else { "missing" });
            println!("   Output file: {}", config.output.path.display());
            println!("   SHA-256: {}", digest);

            if !result.warnings.is_empty() {
                println!("\n⚠️  Data quality warnings:");
                for warning in &result.warnings {
                    println!("   - {}", warning);
                }
            }

            let mut ranked: Vec<_> = result.rows.iter().filter(|r| r.qol_score.is_some()).collect();
            ranked.sort_by(|a, b| {
                b.year
                    .cmp(&a.year)
                    .then(b.qol_score.unwrap_or_default().total_cmp(&a.qol_score.unwrap_or_default()))
            });
            println!("\n🏆 QoL ranking:");
            for row in ranked {
                println!("   {} {}  {:>7.3}", row.year, row.state, row.qol_score.unwrap_or_default());
            }

            if !skip_analysis {
                match analyze(&result.rows) {
                    Ok(report) => println!("\n{}", report),
                    Err(e) => {
                        warn!("Analysis skipped: {}", e);
                        println!("\n⚠️  Analysis skipped: {}", e);
                    }
                }
            }

            finish_metrics(handle.as_ref(), metrics_out.as_ref());
            println!("✅ Pipeline completed successfully!");
        }
        Commands::FetchTax { years, output } => {
            apply_selection(&mut config, years.as_deref(), None)?;
            let destination = output.unwrap_or_else(|| config.sources.tax_path.clone());

            println!("📡 Fetching BEA tax metrics...");
            let http = Arc::new(ReqwestHttp::new(config.sources.timeout_secs)?);
            let source = BeaTaxSource::new(http, config.sources.bea_url.clone(), credentials.bea_api_key.clone())?;
            let request = FetchRequest::new(config.pipeline.years.clone(), config.pipeline.states.clone())?;
            let rows = source.fetch(&request).await?;

            storage::write_tax_metrics(&destination, &rows)
                .with_context(|| format!("Failed to write {}", destination.display()))?;
            println!("\n{:<6}{:>6}{:>20}{:>18}{:>10}", "state", "year", "personal_income", "personal_taxes", "pct");
            for row in &rows {
                println!(
                    "{:<6}{:>6}{:>20.2}{:>18.2}{:>10.2}",
                    row.state, row.year, row.personal_income, row.personal_taxes, row.tax_burden_pct
                );
            }
            println!("💾 Saved {}", destination.display());
        }
        Commands::Analyze { input } => {
            let path = input.unwrap_or_else(|| config.output.path.clone());
            let rows = storage::read_observations(&path)?;
            info!("Analyzing {} rows", rows.len());
            let report = analyze(&rows).context("Analysis failed")?;
            println!("{}", report);
        }
        Commands::Validate { input } => {
            let path = input.unwrap_or_else(|| config.output.path.clone());
            let rows = storage::read_observations(&path)?;
            let report = validate::validate_rows(&rows);
            print!("{}", report);
            if !report.passed() {
                bail!("{} QA check(s) failed for {}", report.failures(), path.display());
            }
            println!("[DONE] QA checks complete.");
        }
    }

    Ok(())
}
