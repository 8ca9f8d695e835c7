use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use ctc_loss::{BatchInput, CtcConfig, CtcLoss, CtcLossBuilder, LossOutput, OwnedBatch, Reduction};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReductionChoice {
    None,
    Mean,
    Sum,
}

impl ReductionChoice {
    fn reduction(self) -> Reduction {
        match self {
            Self::None => Reduction::None,
            Self::Mean => Reduction::Mean,
            Self::Sum => Reduction::Sum,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "ctc_loss_report")]
#[command(about = "Compute CTC costs and gradients for JSON batch files")]
struct Args {
    /// Batch files holding `activations[T][N][C]`, `labels`, `frames` and
    /// `label_lengths`.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[arg(long, env = "CTC_REPORT_CONFIG")]
    config: Option<PathBuf>,
    /// cpu, gpu, cuda or auto; overrides the config file.
    #[arg(long, env = "CTC_REPORT_DEVICE")]
    device: Option<String>,
    #[arg(long, env = "CTC_REPORT_REDUCTION", value_enum)]
    reduction: Option<ReductionChoice>,
    #[arg(long, env = "CTC_REPORT_AVERAGE_FRAMES", default_value_t = false)]
    average_frames: bool,
    #[arg(long, env = "CTC_REPORT_BLANK")]
    blank: Option<usize>,
    #[arg(long, env = "CTC_REPORT_THREADS")]
    threads: Option<usize>,
    /// Write the report here instead of stdout.
    #[arg(long, env = "CTC_REPORT_OUT")]
    out: Option<PathBuf>,
    /// Timed runs per batch; the report keeps the mean.
    #[arg(long, env = "CTC_REPORT_REPEATS", default_value_t = 1)]
    repeats: usize,
}

#[derive(Debug, Serialize)]
struct Report {
    generated_at: String,
    backend: String,
    blank: usize,
    reduction: &'static str,
    average_frames: bool,
    repeats: usize,
    batches: Vec<BatchReport>,
}

#[derive(Debug, Serialize)]
struct BatchReport {
    path: String,
    max_frames: usize,
    batch_size: usize,
    alphabet_size: usize,
    /// `None` when the reduction is `none` or a sample is infeasible.
    loss: Option<f32>,
    infeasible: usize,
    elapsed_ms: f64,
    samples: Vec<SampleReport>,
}

#[derive(Debug, Serialize)]
struct SampleReport {
    index: usize,
    frames: usize,
    label_length: usize,
    /// `None` for samples no alignment can explain.
    cost: Option<f32>,
    grad_norm: f32,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();
    init_tracing();

    if args.repeats == 0 {
        return Err("--repeats must be >= 1.".to_string());
    }

    let config = resolve_config(&args)?;
    let engine = CtcLossBuilder::new(config.clone())
        .build()
        .map_err(|err| format!("Failed to build CTC engine: {err}"))?;

    let progress = ProgressBar::new((args.inputs.len() * args.repeats) as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    progress.set_message("starting...");

    let mut batches = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        progress.set_message(path.display().to_string());
        let owned = BatchInput::load(path)
            .and_then(BatchInput::flatten)
            .map_err(|err| format!("Failed to read batch '{}': {err}", path.display()))?;
        let report = run_batch(&engine, &owned, path, args.repeats, &progress)?;
        batches.push(report);
    }
    progress.finish_with_message("done");

    let report = Report {
        generated_at: Utc::now().to_rfc3339(),
        backend: engine.device_label(),
        blank: config.blank,
        reduction: config.reduction.as_str(),
        average_frames: config.average_frames,
        repeats: args.repeats,
        batches,
    };

    emit_report(&report, args.out.as_deref())
}

/// Pretty JSON to `out`, or to stdout when no path is given.
fn emit_report(report: &Report, out: Option<&Path>) -> Result<(), String> {
    let mut text = serde_json::to_string_pretty(report)
        .map_err(|err| format!("Failed to serialize report: {err}"))?;
    text.push('\n');

    let Some(path) = out else {
        print!("{text}");
        return Ok(());
    };
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .map_err(|err| format!("Failed to create '{}': {err}", dir.display()))?;
    }
    fs::write(path, text).map_err(|err| format!("Failed to write '{}': {err}", path.display()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_config(args: &Args) -> Result<CtcConfig, String> {
    let mut config = match &args.config {
        Some(path) => CtcConfig::load(path).map_err(|err| err.to_string())?,
        None => CtcConfig::default(),
    };
    if let Some(device) = &args.device {
        config.device = device.clone();
    }
    if let Some(reduction) = args.reduction {
        config.reduction = reduction.reduction();
    }
    if args.average_frames {
        config.average_frames = true;
    }
    if let Some(blank) = args.blank {
        config.blank = blank;
    }
    if args.threads.is_some() {
        config.num_threads = args.threads;
    }
    Ok(config)
}

fn run_batch(
    engine: &CtcLoss,
    owned: &OwnedBatch,
    path: &Path,
    repeats: usize,
    progress: &ProgressBar,
) -> Result<BatchReport, String> {
    let batch = owned.as_batch();
    let mut total_ms = 0.0;
    let mut last: Option<LossOutput> = None;
    for _ in 0..repeats {
        let started = Instant::now();
        let result = engine
            .loss(&batch)
            .map_err(|err| format!("CTC failed on '{}': {err}", path.display()))?;
        total_ms += started.elapsed().as_secs_f64() * 1000.0;
        last = Some(result);
        progress.inc(1);
    }
    let result = last.ok_or_else(|| "no run completed".to_string())?;

    let samples: Vec<SampleReport> = (0..batch.batch_size)
        .map(|n| {
            let cost = result.costs()[n];
            let norm = result
                .output
                .sample_grads(n)
                .iter()
                .map(|g| g * g)
                .sum::<f32>()
                .sqrt();
            SampleReport {
                index: n,
                frames: batch.frames[n],
                label_length: batch.label_lengths[n],
                cost: cost.is_finite().then_some(cost),
                grad_norm: norm,
            }
        })
        .collect();
    let infeasible = samples.iter().filter(|s| s.cost.is_none()).count();
    if infeasible > 0 {
        tracing::warn!(
            path = %path.display(),
            infeasible,
            "batch contains samples too short for their labels"
        );
    }

    Ok(BatchReport {
        path: path.display().to_string(),
        max_frames: batch.max_frames,
        batch_size: batch.batch_size,
        alphabet_size: batch.alphabet_size,
        loss: result.loss.filter(|l| l.is_finite()),
        infeasible,
        elapsed_ms: total_ms / repeats as f64,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_is_written_as_json_with_null_for_infeasible_cost() {
        let dir = std::env::temp_dir().join(format!("ctc-report-{}", std::process::id()));
        let path = dir.join("nested").join("report.json");
        let report = Report {
            generated_at: "2026-01-01T00:00:00Z".to_string(),
            backend: "cpu-sequential".to_string(),
            blank: 0,
            reduction: "sum",
            average_frames: false,
            repeats: 1,
            batches: vec![BatchReport {
                path: "batch.json".to_string(),
                max_frames: 2,
                batch_size: 1,
                alphabet_size: 3,
                loss: None,
                infeasible: 1,
                elapsed_ms: 0.5,
                samples: vec![SampleReport {
                    index: 0,
                    frames: 2,
                    label_length: 2,
                    cost: None,
                    grad_norm: 0.0,
                }],
            }],
        };

        emit_report(&report, Some(&path)).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["backend"], "cpu-sequential");
        assert!(written["batches"][0]["samples"][0]["cost"].is_null());
        assert_eq!(written["batches"][0]["infeasible"], 1);
        let _ = fs::remove_dir_all(&dir);
    }
}
