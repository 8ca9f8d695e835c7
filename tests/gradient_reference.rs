use std::env;

use ctc_loss::{CtcBatch, CtcConfig, CtcLoss, CtcLossBuilder, Reduction};
use libtest_mimic::{Arguments, Failed, Trial};
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

const DEFAULT_SEED: u64 = 42;
const DEFAULT_PROBED: usize = 64;
const SUITE_NAME: &str = "ctc_gradient_matches_finite_differences";
const EPS: f32 = 5e-2;

/// `(alphabet, frames, label length, batch, tolerance)`.
const PROBLEM_SIZES: [(usize, usize, usize, usize, f32); 2] =
    [(20, 50, 15, 1, 1e-2), (5, 10, 5, 65, 1e-2)];

#[derive(Debug, Clone)]
struct GradientCase {
    alphabet: usize,
    frames: usize,
    label_len: usize,
    batch_size: usize,
    tol: f32,
    average_frames: bool,
    reduction: Reduction,
    seed: u64,
}

impl GradientCase {
    fn name(&self) -> String {
        format!(
            "{SUITE_NAME}::{}x{}x{}x{}::{}_{}",
            self.alphabet,
            self.frames,
            self.label_len,
            self.batch_size,
            if self.average_frames { "avg" } else { "no_avg" },
            self.reduction.as_str()
        )
    }
}

fn main() {
    let args = Arguments::from_args();

    let full_mode = env_flag("CTC_IT_FULL");
    let seed = env_u64("CTC_IT_SEED", DEFAULT_SEED);
    let device = env::var("CTC_IT_DEVICE").unwrap_or_else(|_| "cpu".to_string());
    let probed = if full_mode { None } else { Some(DEFAULT_PROBED) };

    let mut tests = Vec::new();
    let mut index = 0u64;
    for &(alphabet, frames, label_len, batch_size, tol) in &PROBLEM_SIZES {
        for average_frames in [false, true] {
            for reduction in [Reduction::None, Reduction::Mean, Reduction::Sum] {
                let case = GradientCase {
                    alphabet,
                    frames,
                    label_len,
                    batch_size,
                    tol,
                    average_frames,
                    reduction,
                    seed: seed.wrapping_add(index),
                };
                index += 1;
                let device = device.clone();
                tests.push(Trial::test(case.name(), move || {
                    run_gradient_case(&case, &device, probed).map_err(Failed::from)
                }));
            }
        }
    }

    libtest_mimic::run(&args, tests).exit();
}

struct Problem {
    activations: Vec<f32>,
    labels: Vec<usize>,
    frames: Vec<usize>,
    label_lengths: Vec<usize>,
    shape: (usize, usize, usize),
}

impl Problem {
    fn random(case: &GradientCase, rng: &mut StdRng) -> Self {
        let shape = (case.frames, case.batch_size, case.alphabet);
        let activations = (0..case.frames * case.batch_size * case.alphabet)
            .map(|_| rng.gen::<f32>())
            .collect();

        let mut labels = Vec::with_capacity(case.label_len * case.batch_size);
        for _ in 0..case.batch_size {
            let mut y: Vec<usize> = (0..case.label_len)
                .map(|_| rng.gen_range(1..case.alphabet))
                .collect();
            let mid = case.label_len / 2;
            if case.label_len >= 3 {
                // Force a run of three equal labels around the middle.
                y[mid] = y[mid + 1];
                y[mid - 1] = y[mid];
            }
            labels.extend(y);
        }

        Self {
            activations,
            labels,
            frames: vec![case.frames; case.batch_size],
            label_lengths: vec![case.label_len; case.batch_size],
            shape,
        }
    }

    fn batch_with<'a>(&'a self, activations: &'a [f32]) -> CtcBatch<'a> {
        CtcBatch::new(
            activations,
            self.shape,
            &self.labels,
            &self.frames,
            &self.label_lengths,
        )
    }
}

/// `sum(loss) / 2`, the scalar whose gradient is checked.
fn objective(engine: &CtcLoss, problem: &Problem, activations: &[f32]) -> Result<f32, String> {
    let out = engine
        .loss(&problem.batch_with(activations))
        .map_err(|err| format!("loss() failed: {err}"))?;
    let total = match out.loss {
        Some(loss) => loss,
        None => out.costs().iter().sum(),
    };
    if !total.is_finite() {
        return Err(format!("objective is not finite: {total}"));
    }
    Ok(total / 2.0)
}

fn run_gradient_case(case: &GradientCase, device: &str, probed: Option<usize>) -> Result<(), String> {
    let engine = CtcLossBuilder::new(CtcConfig {
        device: device.to_string(),
        average_frames: case.average_frames,
        reduction: case.reduction,
        ..CtcConfig::default()
    })
    .build()
    .map_err(|err| format!("failed to build engine for '{device}': {err}"))?;

    let mut rng = StdRng::seed_from_u64(case.seed);
    let problem = Problem::random(case, &mut rng);

    let analytic: Vec<f32> = engine
        .loss(&problem.batch_with(&problem.activations))
        .map_err(|err| format!("loss() failed: {err}"))?
        .grads()
        .iter()
        .map(|g| g / 2.0)
        .collect();

    let total = problem.activations.len();
    let coords: Vec<usize> = match probed {
        Some(count) if count < total => sample(&mut rng, total, count).into_vec(),
        _ => (0..total).collect(),
    };

    let mut perturbed = problem.activations.clone();
    let mut failures = Vec::new();
    for &i in &coords {
        let original = perturbed[i];
        perturbed[i] = original + EPS;
        let plus = objective(&engine, &problem, &perturbed)?;
        perturbed[i] = original - EPS;
        let minus = objective(&engine, &problem, &perturbed)?;
        perturbed[i] = original;

        let numeric = (plus - minus) / (2.0 * EPS);
        if (analytic[i] - numeric).abs() > case.tol + case.tol * numeric.abs() {
            failures.push(format!(
                "  index {i}: analytic {:.6}, numeric {numeric:.6}",
                analytic[i]
            ));
        }
    }

    if failures.is_empty() {
        return Ok(());
    }
    Err(format!(
        "{} of {} probed gradient entries disagree (seed {}):\n{}",
        failures.len(),
        coords.len(),
        case.seed,
        failures.join("\n")
    ))
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => false,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(value) => value.trim().parse::<u64>().unwrap_or_else(|err| {
            panic!(
                "Invalid value for {}='{}' (expected u64): {}",
                name, value, err
            )
        }),
        Err(_) => default,
    }
}
