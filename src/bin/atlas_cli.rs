use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;

use atlas_rs::config::{AmrConfig, Species, TbPanel};
use atlas_rs::error::Result;
use atlas_rs::report::AmrReport;
use atlas_rs::store::InMemoryStore;
use atlas_rs::{run_amr, SampleInput};

#[derive(Parser, Debug)]
#[command(name = "atlas-rs")]
#[command(version)]
#[command(about = "Species and antimicrobial resistance prediction from k-mer coverage of reference panels")]
struct Args {
    /// Sample identifier used in the report and for stored calls
    #[arg(short = 's', long, help_heading = "Input")]
    sample: String,

    /// Read files (FASTQ, optionally gzipped); repeat for several
    #[arg(short = '1', long = "seq", value_name = "FILE", help_heading = "Input")]
    seqs: Vec<PathBuf>,

    /// Precomputed coverage summaries; skips the external k-mer tool
    #[arg(short = 'c', long = "coverage", value_name = "FILE", help_heading = "Input")]
    coverage: Vec<PathBuf>,

    /// Restrict to one organism group (staph, tb or gn); all when omitted
    #[arg(long, help_heading = "Panels")]
    species: Option<Species>,

    /// TB resistance catalogue (bradley-2015 or walker-2015)
    #[arg(long, help_heading = "Panels")]
    panel: Option<TbPanel>,

    /// Hierarchy definition overriding the per-species default (relative to the working directory)
    #[arg(long, value_name = "JSON", help_heading = "Panels")]
    hierarchy: Option<PathBuf>,

    #[arg(short = 'k', long, help_heading = "Tool")]
    kmer: Option<u32>,

    /// Rebuild skeletons and coverage files even if they exist
    #[arg(short = 'f', long, help_heading = "Tool")]
    force: bool,

    /// JSON file with thresholds, panel lists and tool settings. Relative panel and
    /// hierarchy paths resolve against its directory; without one, against the
    /// working directory
    #[arg(long, value_name = "JSON")]
    config: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[arg(short = 'o', long, value_name = "JSON", help_heading = "Output")]
    out: Option<PathBuf>,
}

fn spinner(colour: &str, msg: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let template = format!("{{spinner:.{colour}}} {{msg}}");
    if let Ok(style) = ProgressStyle::default_spinner()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
        .template(&template)
    {
        spinner.set_style(style);
    }
    spinner.set_message(msg);
    spinner
}

fn load_config(args: &Args) -> Result<AmrConfig> {
    let mut config = match &args.config {
        Some(path) => AmrConfig::from_json_file(path)?,
        None => AmrConfig::new(),
    };
    if args.species.is_some() {
        config.species = args.species;
    }
    if let Some(panel) = args.panel {
        config.tb_panel = panel;
    }
    if let Some(kmer) = args.kmer {
        config.kmer = kmer;
    }
    if let Some(hierarchy) = &args.hierarchy {
        config.hierarchy_file = Some(std::env::current_dir()?.join(hierarchy));
    }
    config.force |= args.force;
    config.validate()?;
    Ok(config)
}

fn run(args: Args) -> Result<bool> {
    // 1. Configuration
    let spinner_cfg = spinner("blue", "Loading configuration...");
    let config = load_config(&args)?;
    spinner_cfg.finish_with_message(format!(
        "{} panel(s) for {}",
        config.panel_paths().len(),
        config.analysis_name()
    ));

    // 2. Pipeline
    let spinner_run = spinner("green", "Typing sample...");
    let input = SampleInput {
        coverage_files: args.coverage.clone(),
        ..SampleInput::from_seqs(args.sample.clone(), args.seqs.clone())
    };
    let store = InMemoryStore::new();
    let sample_report = run_amr(&config, &input, Some(&store));
    let complete = sample_report.is_complete();
    spinner_run.finish_with_message(if complete {
        "Typing finished."
    } else {
        "Typing stopped early; see the report's error field."
    });

    // 3. Report
    let mut report = AmrReport::default();
    report.insert(args.sample.clone(), sample_report);
    match &args.out {
        Some(path) => {
            let spinner_out = spinner("yellow", "Writing report...");
            report.write_json(path)?;
            spinner_out.finish_with_message(format!("Report written to {}", path.display()));
        }
        None => println!("{}", report.to_json()?),
    }
    Ok(complete)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
