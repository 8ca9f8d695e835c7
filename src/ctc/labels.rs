use crate::error::CtcError;

/// Target sequence with a blank before, between and after every label.
///
/// Position `s` holds the blank when `s` is even and `labels[(s - 1) / 2]`
/// when `s` is odd, so the sequence always has `2 * L + 1` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedLabels {
    symbols: Vec<usize>,
    blank: usize,
    repeats: usize,
}

impl ExtendedLabels {
    /// Builds the extended sequence for one sample's labels.
    ///
    /// `sample` is only used to locate the offending label in the error.
    pub fn new(
        labels: &[usize],
        blank: usize,
        alphabet_size: usize,
        sample: usize,
    ) -> Result<Self, CtcError> {
        let mut symbols = Vec::with_capacity(2 * labels.len() + 1);
        symbols.push(blank);
        let mut repeats = 0usize;
        for (position, &label) in labels.iter().enumerate() {
            if label >= alphabet_size || label == blank {
                return Err(CtcError::InvalidLabel {
                    sample,
                    position,
                    label,
                    alphabet_size,
                    blank,
                });
            }
            if position > 0 && labels[position - 1] == label {
                repeats += 1;
            }
            symbols.push(label);
            symbols.push(blank);
        }
        Ok(Self {
            symbols,
            blank,
            repeats,
        })
    }

    /// Extended length `S = 2L + 1`.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Never true: the extended sequence always holds at least one blank.
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Number of target labels `L`.
    pub fn label_len(&self) -> usize {
        self.symbols.len() / 2
    }

    pub fn blank(&self) -> usize {
        self.blank
    }

    #[inline(always)]
    pub fn label(&self, s: usize) -> usize {
        self.symbols[s]
    }

    pub fn symbols(&self) -> &[usize] {
        &self.symbols
    }

    /// Whether the `s - 2 -> s` transition is allowed. Blanks never skip, and a
    /// label may not skip over the blank separating it from an equal label.
    #[inline(always)]
    pub fn can_skip(&self, s: usize) -> bool {
        s >= 2 && self.symbols[s] != self.symbols[s - 2]
    }

    /// Count of adjacent equal label pairs; each one forces an extra blank frame.
    pub fn repeats(&self) -> usize {
        self.repeats
    }

    /// Fewest frames any valid alignment needs.
    pub fn min_frames(&self) -> usize {
        self.label_len() + self.repeats
    }

    pub fn ensure_feasible(&self, frames: usize) -> Result<(), CtcError> {
        let required = self.min_frames();
        if frames < required {
            return Err(CtcError::InfeasibleLength { frames, required });
        }
        Ok(())
    }
}
