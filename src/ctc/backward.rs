use crate::ctc::labels::ExtendedLabels;
use crate::ctc::math::{log_sum_exp3, reachable_band, LogProbs, LogTable, NEG_INF};

/// β table: β(t, s) is the log mass of every suffix alignment that is at
/// position `s` on frame `t` (emission at `t` included) and finishes the
/// sequence on the last frame.
pub fn backward(log_probs: &LogProbs, labels: &ExtendedLabels) -> LogTable {
    let t_len = log_probs.frames();
    let s_len = labels.len();
    let mut beta = LogTable::new(t_len, s_len);
    if t_len == 0 {
        return beta;
    }

    let last = t_len - 1;
    beta.set(last, s_len - 1, log_probs.get(last, labels.label(s_len - 1)));
    if s_len >= 2 {
        beta.set(last, s_len - 2, log_probs.get(last, labels.label(s_len - 2)));
    }

    for t in (0..last).rev() {
        let Some((lo, hi)) = reachable_band(t, t_len, s_len) else {
            continue;
        };
        for s in lo..=hi {
            let outgoing = outgoing(beta.row(t + 1), s, labels);
            if outgoing == NEG_INF {
                continue;
            }
            beta.set(t, s, outgoing + log_probs.get(t, labels.label(s)));
        }
    }

    beta
}

#[inline(always)]
fn outgoing(next: &[f32], s: usize, labels: &ExtendedLabels) -> f32 {
    let s_len = next.len();
    let stay = next[s];
    let step = if s + 1 < s_len { next[s + 1] } else { NEG_INF };
    let skip = if s + 2 < s_len && labels.can_skip(s + 2) {
        next[s + 2]
    } else {
        NEG_INF
    };
    log_sum_exp3(stay, step, skip)
}
