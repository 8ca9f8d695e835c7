//! Log-domain helpers shared by the forward, backward and gradient passes.

pub const NEG_INF: f32 = f32::NEG_INFINITY;

/// `ln(exp(a) + exp(b))` without leaving the log domain.
#[inline(always)]
pub fn log_sum_exp(a: f32, b: f32) -> f32 {
    if a == NEG_INF {
        return b;
    }
    if b == NEG_INF {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

#[inline(always)]
pub fn log_sum_exp3(a: f32, b: f32, c: f32) -> f32 {
    log_sum_exp(log_sum_exp(a, b), c)
}

/// Log-sum-exp over a slice; `NEG_INF` for an empty or all `NEG_INF` slice.
pub fn log_sum_exp_slice(values: &[f32]) -> f32 {
    let max = values.iter().copied().fold(NEG_INF, f32::max);
    if max == NEG_INF {
        return NEG_INF;
    }
    let sum: f32 = values.iter().map(|&v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Per-frame class log-probabilities of one sample, `(frames, classes)` row-major.
#[derive(Debug, Clone)]
pub struct LogProbs {
    values: Vec<f32>,
    frames: usize,
    classes: usize,
}

impl LogProbs {
    /// Gathers sample `sample` out of a `(T_max, N, C)` activation tensor and
    /// log-softmaxes each of its first `frames` rows.
    pub fn from_activations(
        activations: &[f32],
        batch_size: usize,
        classes: usize,
        sample: usize,
        frames: usize,
    ) -> Self {
        let mut values = Vec::with_capacity(frames * classes);
        for t in 0..frames {
            let start = (t * batch_size + sample) * classes;
            let row = &activations[start..start + classes];
            let norm = log_sum_exp_slice(row);
            values.extend(row.iter().map(|&x| x - norm));
        }
        Self {
            values,
            frames,
            classes,
        }
    }

    /// Wraps values that are already normalized log-probabilities.
    pub fn from_normalized(values: Vec<f32>, classes: usize) -> Self {
        let frames = if classes == 0 { 0 } else { values.len() / classes };
        Self {
            values,
            frames,
            classes,
        }
    }

    #[inline(always)]
    pub fn get(&self, t: usize, class: usize) -> f32 {
        self.values[t * self.classes + class]
    }

    pub fn row(&self, t: usize) -> &[f32] {
        &self.values[t * self.classes..(t + 1) * self.classes]
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn classes(&self) -> usize {
        self.classes
    }
}

/// Dense `(frames, states)` table of log-domain values, initialized to `NEG_INF`.
#[derive(Debug, Clone)]
pub struct LogTable {
    values: Vec<f32>,
    frames: usize,
    states: usize,
}

impl LogTable {
    pub fn new(frames: usize, states: usize) -> Self {
        Self {
            values: vec![NEG_INF; frames * states],
            frames,
            states,
        }
    }

    #[inline(always)]
    pub fn get(&self, t: usize, s: usize) -> f32 {
        self.values[t * self.states + s]
    }

    #[inline(always)]
    pub fn set(&mut self, t: usize, s: usize, value: f32) {
        self.values[t * self.states + s] = value;
    }

    pub fn row(&self, t: usize) -> &[f32] {
        &self.values[t * self.states..(t + 1) * self.states]
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn states(&self) -> usize {
        self.states
    }
}

/// Inclusive range of extended positions that can lie on a complete
/// alignment at frame `t`: reachable from the start and still able to reach
/// the end. `None` when the band is empty.
#[inline(always)]
pub fn reachable_band(t: usize, frames: usize, states: usize) -> Option<(usize, usize)> {
    if states == 0 || t >= frames {
        return None;
    }
    let remaining = frames - t;
    let lo = states.saturating_sub(2 * remaining);
    let hi = (2 * t + 1).min(states - 1);
    (lo <= hi).then_some((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_sum_exp_handles_negative_infinity() {
        assert_eq!(log_sum_exp(NEG_INF, NEG_INF), NEG_INF);
        assert_eq!(log_sum_exp(NEG_INF, -2.0), -2.0);
        assert_eq!(log_sum_exp(-3.0, NEG_INF), -3.0);
    }

    #[test]
    fn log_sum_exp_matches_direct_sum() {
        let got = log_sum_exp3(-1.0, -2.0, -3.0);
        let want = ((-1.0f32).exp() + (-2.0f32).exp() + (-3.0f32).exp()).ln();
        assert!((got - want).abs() < 1e-6);
    }

    #[test]
    fn log_sum_exp_survives_large_magnitudes() {
        let got = log_sum_exp(-1000.0, -1000.0);
        assert!((got - (-1000.0 + std::f32::consts::LN_2)).abs() < 1e-3);
    }

    #[test]
    fn log_softmax_rows_normalize() {
        // T=2, N=2, C=3; sample 1 is interleaved with sample 0.
        let acts = vec![
            0.0, 1.0, 2.0, 5.0, 5.0, 5.0, //
            -1.0, -1.0, 1.0, 0.0, 0.0, 0.0,
        ];
        let lp = LogProbs::from_activations(&acts, 2, 3, 1, 2);
        assert_eq!(lp.frames(), 2);
        for t in 0..2 {
            let total: f32 = lp.row(t).iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-6);
            assert!((lp.get(t, 0) - (1.0f32 / 3.0).ln()).abs() < 1e-6);
        }
    }

    #[test]
    fn band_covers_full_table_for_long_inputs() {
        // S=3, T=4: every position reachable in the middle frames.
        assert_eq!(reachable_band(0, 4, 3), Some((0, 1)));
        assert_eq!(reachable_band(2, 4, 3), Some((0, 2)));
        assert_eq!(reachable_band(3, 4, 3), Some((1, 2)));
        assert_eq!(reachable_band(4, 4, 3), None);
    }

    #[test]
    fn band_is_empty_when_too_few_frames() {
        // S=7 (three labels) cannot fit in two frames.
        assert_eq!(reachable_band(0, 2, 7), None);
    }
}
