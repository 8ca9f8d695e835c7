use crate::ctc::labels::ExtendedLabels;
use crate::ctc::math::{log_sum_exp, reachable_band, LogProbs, LogTable, NEG_INF};

/// Gradient of `-ln p(labels)` with respect to the pre-softmax activations,
/// written as `(frames, classes)` rows into `out`.
///
/// `grad(t, c) = y(t, c) - posterior(t, c)`, where the posterior sums
/// `α(t,s)·β(t,s)/y(t,label(s))` over every extended position carrying `c`.
/// Both tables include the emission at `(t, s)`, hence the single division.
pub fn assemble_gradient(
    log_probs: &LogProbs,
    labels: &ExtendedLabels,
    alpha: &LogTable,
    beta: &LogTable,
    log_likelihood: f32,
    out: &mut [f32],
) {
    let t_len = log_probs.frames();
    let classes = log_probs.classes();
    let s_len = labels.len();
    debug_assert_eq!(out.len(), t_len * classes);

    let mut occupancy = vec![NEG_INF; classes];
    for t in 0..t_len {
        occupancy.fill(NEG_INF);
        if let Some((lo, hi)) = reachable_band(t, t_len, s_len) {
            for s in lo..=hi {
                let joint = alpha.get(t, s) + beta.get(t, s);
                if joint == NEG_INF {
                    continue;
                }
                let class = labels.label(s);
                occupancy[class] = log_sum_exp(occupancy[class], joint);
            }
        }

        let lp_row = log_probs.row(t);
        let out_row = &mut out[t * classes..(t + 1) * classes];
        for ((grad, &lp), &occ) in out_row.iter_mut().zip(lp_row).zip(&occupancy) {
            let posterior = if occ == NEG_INF {
                0.0
            } else {
                (occ - lp - log_likelihood).exp()
            };
            *grad = lp.exp() - posterior;
        }
    }
}
