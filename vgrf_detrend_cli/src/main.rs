use std::collections::{HashMap, HashSet};
use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use vgrf_detrend::{
    aerial_intervals, detrend_trial, list_aerial_strategies, parse_force_csv, segment,
    shortest_interval, AerialStrategy, Butterworth, DetrendParams, DriftMethod, FilterParams,
    ForceTrial, LowPassFilter, Passthrough, TrialReport, TrialResult, TrimSelection,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drift removal for running vGRF force plate trials", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Remove baseline drift from one or more force CSV files
    Detrend(DetrendArgs),
    /// Report stance segmentation and aerial intervals without correcting
    Segment(SegmentArgs),
    /// List the aerial sampling strategies
    Strategies,
}

#[derive(Parser, Debug)]
struct DetrendArgs {
    /// Headerless force CSV files (1 column, or 3 with vertical last)
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Sampling frequency in Hz
    #[arg(long)]
    fs: f64,

    /// Directory for corrected outputs (defaults to the current directory)
    #[arg(long, value_hint = ValueHint::DirPath)]
    out_dir: Option<PathBuf>,

    #[command(flatten)]
    params: ParamArgs,

    /// Fixed trim in frames at both ends of every aerial phase
    #[arg(long, conflicts_with = "trim_fraction")]
    trim: Option<usize>,

    /// Trim as a fraction of the shortest aerial phase
    #[arg(long)]
    trim_fraction: Option<f64>,

    /// Aerial baseline estimator
    #[arg(long, value_enum)]
    strategy: Option<StrategyOpt>,

    /// Drift reconstruction method
    #[arg(long, value_enum)]
    drift: Option<DriftOpt>,

    /// Threshold for the residual check on the corrected signal
    #[arg(long, conflicts_with = "no_validation")]
    validation_threshold: Option<f64>,

    /// Skip the residual check
    #[arg(long, action = ArgAction::SetTrue)]
    no_validation: bool,

    /// Also write `<stem>_anchors.csv` with the sampled aerial anchors
    #[arg(long, action = ArgAction::SetTrue)]
    anchors: bool,

    /// Combined JSON report path
    #[arg(long, value_hint = ValueHint::FilePath)]
    report: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct SegmentArgs {
    /// Headerless force CSV files to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Sampling frequency in Hz
    #[arg(long)]
    fs: f64,

    #[command(flatten)]
    params: ParamArgs,

    /// Output report path
    #[arg(short, long, default_value = "stance_diagnostics.txt", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

/// Settings shared by every subcommand that segments a signal.
#[derive(Args, Debug)]
struct ParamArgs {
    /// JSON file with detrend parameters; flags override it
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Stance threshold in force units
    #[arg(long)]
    threshold: Option<f64>,

    /// Shortest valid contact time (seconds)
    #[arg(long)]
    min_tc: Option<f64>,

    /// Longest valid contact time (seconds)
    #[arg(long)]
    max_tc: Option<f64>,

    /// Low-pass cutoff in Hz; enables the Butterworth filter
    #[arg(long)]
    cutoff: Option<f64>,

    /// Adjust the cutoff for the forward-backward pass
    #[arg(long, action = ArgAction::SetTrue)]
    correct_cutoff: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum StrategyOpt {
    Midpoint,
    Mean,
    Median,
    MedianClosest,
}

impl From<StrategyOpt> for AerialStrategy {
    fn from(value: StrategyOpt) -> Self {
        match value {
            StrategyOpt::Midpoint => AerialStrategy::Midpoint,
            StrategyOpt::Mean => AerialStrategy::Mean,
            StrategyOpt::Median => AerialStrategy::Median,
            StrategyOpt::MedianClosest => AerialStrategy::MedianClosest,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DriftOpt {
    Continuous,
    Stepwise,
}

impl From<DriftOpt> for DriftMethod {
    fn from(value: DriftOpt) -> Self {
        match value {
            DriftOpt::Continuous => DriftMethod::Continuous,
            DriftOpt::Stepwise => DriftMethod::Stepwise,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Detrend(args) => args.verbose,
        Command::Segment(args) => args.verbose,
        Command::Strategies => false,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Detrend(args) => handle_detrend(args),
        Command::Segment(args) => handle_segment(args),
        Command::Strategies => handle_strategies(),
    }
}

fn load_params(path: Option<&Path>) -> Result<DetrendParams> {
    let Some(path) = path else {
        return Ok(DetrendParams::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid params JSON", path.display()))
}

impl ParamArgs {
    fn resolve(&self) -> Result<DetrendParams> {
        let mut params = load_params(self.config.as_deref())?;
        if let Some(threshold) = self.threshold {
            params.threshold = threshold;
        }
        if let Some(min_tc) = self.min_tc {
            params.min_tc = min_tc;
        }
        if let Some(max_tc) = self.max_tc {
            params.max_tc = max_tc;
        }
        if let Some(cutoff_hz) = self.cutoff {
            params.filter = Some(FilterParams {
                cutoff_hz,
                correct_cutoff: self.correct_cutoff,
            });
        } else if self.correct_cutoff {
            match params.filter.as_mut() {
                Some(filter) => filter.correct_cutoff = true,
                None => return Err(anyhow!("--correct-cutoff needs a cutoff (--cutoff or config)")),
            }
        }
        Ok(params)
    }
}

fn build_params(args: &DetrendArgs) -> Result<DetrendParams> {
    let mut params = args.params.resolve()?;
    if let Some(frames) = args.trim {
        params.trim = TrimSelection::Frames { frames };
    }
    if let Some(fraction) = args.trim_fraction {
        params.trim = TrimSelection::ShortestFraction { fraction };
    }
    if let Some(strategy) = args.strategy {
        params.strategy = strategy.into();
    }
    if let Some(drift) = args.drift {
        params.drift = drift.into();
    }
    if args.no_validation {
        params.validation_threshold = None;
    } else if let Some(threshold) = args.validation_threshold {
        params.validation_threshold = Some(threshold);
    }
    params.validate(args.fs)?;
    Ok(params)
}

#[derive(Debug, Serialize)]
struct TrialEntry {
    input: PathBuf,
    output: PathBuf,
    anchors: Option<PathBuf>,
    report: TrialReport,
}

#[derive(Debug, Serialize)]
struct FailureEntry {
    input: PathBuf,
    error: String,
}

#[derive(Debug, Serialize)]
struct BatchReport {
    generated_at: String,
    version: &'static str,
    fs: f64,
    params: DetrendParams,
    params_hash: String,
    trials: Vec<TrialEntry>,
    failures: Vec<FailureEntry>,
}

fn handle_detrend(args: DetrendArgs) -> Result<()> {
    if args.inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }
    let params = build_params(&args)?;
    let out_dir = args.out_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    debug!(
        inputs = args.inputs.len(),
        hash = %params.params_hash_sha256()?,
        "detrend batch"
    );

    let stems = output_stems(&args.inputs)?;

    // One trial per worker; results come back in input order.
    let outcomes: Vec<(PathBuf, Result<TrialEntry>)> = args
        .inputs
        .par_iter()
        .zip(stems.par_iter())
        .map(|(path, stem)| {
            let outcome = process_trial(path, stem, args.fs, &params, &out_dir, args.anchors);
            (path.clone(), outcome)
        })
        .collect();

    let mut trials = Vec::new();
    let mut failures = Vec::new();
    for (input, outcome) in outcomes {
        match outcome {
            Ok(entry) => {
                info!(
                    "Corrected {}: {} anchors, max drift {:.2}",
                    input.display(),
                    entry.report.aerial_count,
                    entry.report.max_abs_drift
                );
                trials.push(entry);
            }
            Err(err) => {
                warn!("Skipping {}: {:#}", input.display(), err);
                failures.push(FailureEntry {
                    input,
                    error: format!("{:#}", err),
                });
            }
        }
    }

    if let Some(path) = args.report.as_ref() {
        let report = BatchReport {
            generated_at: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
            fs: args.fs,
            params_hash: params.params_hash_sha256()?,
            params: params.clone(),
            trials,
            failures,
        };
        write_report(&report, path)?;
        info!("Report written: {}", path.display());
        if report.trials.is_empty() {
            return Err(anyhow!("all {} trials failed", report.failures.len()));
        }
        return Ok(());
    }

    if trials.is_empty() {
        return Err(anyhow!("all {} trials failed", failures.len()));
    }
    Ok(())
}

/// Output file stem per input. Inputs sharing a file stem get their 1-based
/// position appended so parallel workers never write the same file.
fn output_stems(inputs: &[PathBuf]) -> Result<Vec<String>> {
    let stems: Vec<String> = inputs
        .iter()
        .map(|path| {
            path.file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("trial")
                .to_string()
        })
        .collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for stem in &stems {
        *counts.entry(stem.as_str()).or_insert(0) += 1;
    }
    let unique: Vec<String> = stems
        .iter()
        .zip(inputs)
        .enumerate()
        .map(|(i, (stem, path))| {
            if counts[stem.as_str()] > 1 {
                let renamed = format!("{}_{}", stem, i + 1);
                warn!(
                    "{} shares its file name with another input; writing {}_detrended.csv",
                    path.display(),
                    renamed
                );
                renamed
            } else {
                stem.clone()
            }
        })
        .collect();

    let mut seen = HashSet::new();
    for (stem, path) in unique.iter().zip(inputs) {
        if !seen.insert(stem.as_str()) {
            return Err(anyhow!(
                "output name {} for {} collides with another input; rename one of them",
                stem,
                path.display()
            ));
        }
    }
    Ok(unique)
}

fn process_trial(
    path: &Path,
    stem: &str,
    fs_hz: f64,
    params: &DetrendParams,
    out_dir: &Path,
    write_anchors: bool,
) -> Result<TrialEntry> {
    let trial = read_trial(path, fs_hz)?;
    let result = detrend_trial(&trial, params)
        .with_context(|| format!("failed to detrend {}", path.display()))?;

    let output = out_dir.join(format!("{}_detrended.csv", stem));
    write_corrected_csv(&result, &output)?;
    let anchors = if write_anchors {
        let anchors_path = out_dir.join(format!("{}_anchors.csv", stem));
        write_anchors_csv(&result, &anchors_path)?;
        Some(anchors_path)
    } else {
        None
    };

    Ok(TrialEntry {
        input: path.to_path_buf(),
        output,
        anchors,
        report: result.report,
    })
}

fn read_trial(path: &Path, fs_hz: f64) -> Result<ForceTrial> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let trial =
        parse_force_csv(&data, fs_hz).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(trial)
}

fn write_corrected_csv(result: &TrialResult, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    for row in result.corrected.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn write_anchors_csv(result: &TrialResult, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record([
        "interval",
        "aerial_begin",
        "aerial_end",
        "location",
        "value",
        "residual",
    ])?;
    let anchors = &result.vertical.anchors;
    // the residual pass re-segments, so its intervals may not line up
    let residuals = result
        .vertical
        .residuals
        .as_ref()
        .filter(|r| r.len() == anchors.len());
    for (i, interval) in anchors.intervals.iter().enumerate() {
        let residual = residuals
            .map(|r| format!("{:.6}", r.values[i]))
            .unwrap_or_default();
        writer.write_record([
            i.to_string(),
            interval.begin.to_string(),
            interval.end.to_string(),
            anchors.locations[i].to_string(),
            format!("{:.6}", anchors.values[i]),
            residual,
        ])?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn write_report(report: &BatchReport, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(report)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn handle_segment(args: SegmentArgs) -> Result<()> {
    let params = args.params.resolve()?;
    params.validate(args.fs)?;
    let mut report = String::new();

    for path in &args.inputs {
        report.push_str(&format!("FILE: {}\n", path.display()));
        match diagnose_trial(path, args.fs, &params) {
            Ok(text) => report.push_str(&text),
            Err(err) => {
                warn!("Skipping {}: {:#}", path.display(), err);
                report.push_str(&format!("  error: {:#}\n", err));
            }
        }
        report.push('\n');
    }

    fs::write(&args.output, report)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    info!("Segmentation report written: {}", args.output.display());
    Ok(())
}

fn diagnose_trial(path: &Path, fs_hz: f64, params: &DetrendParams) -> Result<String> {
    let trial = read_trial(path, fs_hz)?;
    let vertical = trial.vertical();
    let filtered = match params.filter.as_ref() {
        Some(settings) => {
            let filter: Butterworth = settings.build();
            filter.filter(&vertical, fs_hz)?
        }
        None => Passthrough.filter(&vertical, fs_hz)?,
    };
    let seg = segment(&filtered, params.threshold, fs_hz, params.min_tc, params.max_tc)?;
    let intervals = aerial_intervals(&seg.stances);

    let mut out = String::new();
    out.push_str(&format!(
        "  frames: {} ({} columns, {:.2} s)\n",
        trial.frames(),
        trial.columns(),
        trial.frames() as f64 / fs_hz
    ));
    out.push_str(&format!(
        "  stances: {} (valid={}, too_short={}, too_long={})\n",
        seg.diagnostics.candidates,
        seg.diagnostics.valid,
        seg.diagnostics.too_short,
        seg.diagnostics.too_long
    ));
    out.push_str(&format!(
        "  contact_frames: [{:.1}, {:.1}]\n",
        seg.min_frames, seg.max_frames
    ));
    for stance in &seg.stances {
        out.push_str(&format!(
            "    - stance {}..{} ({} frames){}\n",
            stance.begin,
            stance.end,
            stance.frames(),
            if stance.valid { "" } else { " invalid" }
        ));
    }
    out.push_str(&format!("  aerial_intervals: {}\n", intervals.len()));
    for interval in &intervals {
        out.push_str(&format!(
            "    - aerial {}..{} ({} frames)\n",
            interval.begin,
            interval.end,
            interval.frames()
        ));
    }
    match shortest_interval(&intervals) {
        Some((index, interval)) => out.push_str(&format!(
            "  shortest_aerial: #{} {} frames (max trim {})\n",
            index,
            interval.frames(),
            interval.frames().saturating_sub(1) / 2
        )),
        None => out.push_str("  shortest_aerial: n/a\n"),
    }
    Ok(out)
}

fn handle_strategies() -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for info in list_aerial_strategies() {
        writeln!(handle, "{:<16} {}", info.id, info.name)?;
        writeln!(handle, "{:<16} {}", "", info.description)?;
    }
    Ok(())
}
