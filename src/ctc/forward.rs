use crate::ctc::labels::ExtendedLabels;
use crate::ctc::math::{log_sum_exp, log_sum_exp3, reachable_band, LogProbs, LogTable, NEG_INF};

/// α table plus the sample's total log-likelihood.
#[derive(Debug, Clone)]
pub struct ForwardTable {
    pub alpha: LogTable,
    pub log_likelihood: f32,
}

/// Full forward pass; keeps every row for the gradient.
pub fn forward(log_probs: &LogProbs, labels: &ExtendedLabels) -> ForwardTable {
    let t_len = log_probs.frames();
    let s_len = labels.len();
    let mut alpha = LogTable::new(t_len, s_len);
    if t_len == 0 {
        return ForwardTable {
            alpha,
            log_likelihood: empty_log_likelihood(labels),
        };
    }

    alpha.set(0, 0, log_probs.get(0, labels.label(0)));
    if s_len > 1 {
        alpha.set(0, 1, log_probs.get(0, labels.label(1)));
    }

    for t in 1..t_len {
        let Some((lo, hi)) = reachable_band(t, t_len, s_len) else {
            continue;
        };
        for s in lo..=hi {
            let incoming = incoming(alpha.row(t - 1), s, labels);
            if incoming == NEG_INF {
                continue;
            }
            alpha.set(t, s, incoming + log_probs.get(t, labels.label(s)));
        }
    }

    let log_likelihood = terminal(alpha.row(t_len - 1));
    ForwardTable {
        alpha,
        log_likelihood,
    }
}

/// Forward pass over two rolling rows, for callers that only need the cost.
pub fn forward_log_likelihood(log_probs: &LogProbs, labels: &ExtendedLabels) -> f32 {
    let t_len = log_probs.frames();
    let s_len = labels.len();
    if t_len == 0 {
        return empty_log_likelihood(labels);
    }

    let mut prev = vec![NEG_INF; s_len];
    let mut curr = vec![NEG_INF; s_len];
    prev[0] = log_probs.get(0, labels.label(0));
    if s_len > 1 {
        prev[1] = log_probs.get(0, labels.label(1));
    }

    for t in 1..t_len {
        curr.fill(NEG_INF);
        if let Some((lo, hi)) = reachable_band(t, t_len, s_len) {
            for s in lo..=hi {
                let incoming = incoming(&prev, s, labels);
                if incoming != NEG_INF {
                    curr[s] = incoming + log_probs.get(t, labels.label(s));
                }
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    terminal(&prev)
}

#[inline(always)]
fn incoming(prev: &[f32], s: usize, labels: &ExtendedLabels) -> f32 {
    let stay = prev[s];
    let step = if s >= 1 { prev[s - 1] } else { NEG_INF };
    let skip = if labels.can_skip(s) { prev[s - 2] } else { NEG_INF };
    log_sum_exp3(stay, step, skip)
}

fn terminal(last_row: &[f32]) -> f32 {
    let s_len = last_row.len();
    let last = last_row[s_len - 1];
    if s_len >= 2 {
        log_sum_exp(last, last_row[s_len - 2])
    } else {
        last
    }
}

/// Zero frames only align with an empty target.
fn empty_log_likelihood(labels: &ExtendedLabels) -> f32 {
    if labels.label_len() == 0 {
        0.0
    } else {
        NEG_INF
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(frames: usize, classes: usize) -> LogProbs {
        let v = (1.0f32 / classes as f32).ln();
        LogProbs::from_normalized(vec![v; frames * classes], classes)
    }

    #[test]
    fn single_label_over_four_uniform_frames() {
        // Alignments of [1] over 4 frames: the label occupies a contiguous
        // run [i, j] with blanks elsewhere; 10 runs in total.
        let lp = uniform(4, 3);
        let labels = ExtendedLabels::new(&[1], 0, 3, 0).unwrap();
        let table = forward(&lp, &labels);
        let expected = (10.0f32).ln() + 4.0 * (1.0f32 / 3.0).ln();
        assert!((table.log_likelihood - expected).abs() < 1e-5);
    }

    #[test]
    fn rolling_pass_matches_full_table() {
        let values: Vec<f32> = (0..5 * 4)
            .map(|i| -((i % 7) as f32) * 0.3 - 0.1)
            .collect();
        let lp = LogProbs::from_normalized(values, 4);
        let labels = ExtendedLabels::new(&[1, 3, 3], 0, 4, 0).unwrap();
        let full = forward(&lp, &labels).log_likelihood;
        let rolling = forward_log_likelihood(&lp, &labels);
        assert!((full - rolling).abs() < 1e-6);
    }

    #[test]
    fn infeasible_sequence_has_no_mass() {
        let lp = uniform(2, 3);
        let labels = ExtendedLabels::new(&[1, 1], 0, 3, 0).unwrap();
        assert_eq!(forward(&lp, &labels).log_likelihood, NEG_INF);
        assert_eq!(forward_log_likelihood(&lp, &labels), NEG_INF);
    }

    #[test]
    fn empty_target_is_all_blanks() {
        let lp = uniform(3, 2);
        let labels = ExtendedLabels::new(&[], 0, 2, 0).unwrap();
        let ll = forward(&lp, &labels).log_likelihood;
        assert!((ll - 3.0 * (0.5f32).ln()).abs() < 1e-6);
    }

    #[test]
    fn zero_frames() {
        let lp = LogProbs::from_normalized(Vec::new(), 3);
        let empty = ExtendedLabels::new(&[], 0, 3, 0).unwrap();
        let one = ExtendedLabels::new(&[2], 0, 3, 0).unwrap();
        assert_eq!(forward(&lp, &empty).log_likelihood, 0.0);
        assert_eq!(forward(&lp, &one).log_likelihood, NEG_INF);
    }

    #[test]
    fn positions_outside_band_stay_negative_infinity() {
        let lp = uniform(3, 3);
        let labels = ExtendedLabels::new(&[1, 2], 0, 3, 0).unwrap();
        let table = forward(&lp, &labels);
        // At t=0 only the first blank and first label are reachable.
        for s in 2..labels.len() {
            assert_eq!(table.alpha.get(0, s), NEG_INF);
        }
        // At the last frame only the two terminal positions count.
        assert_eq!(table.alpha.get(2, 0), NEG_INF);
    }
}
