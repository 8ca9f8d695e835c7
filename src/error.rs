use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtcError {
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{context}: {message}")]
    Runtime {
        context: &'static str,
        message: String,
    },
    #[error("invalid batch shape: {message}")]
    BatchShape { message: String },
    #[error(
        "invalid label {label} at position {position} of sample {sample} \
         (alphabet size {alphabet_size}, blank {blank})"
    )]
    InvalidLabel {
        sample: usize,
        position: usize,
        label: usize,
        alphabet_size: usize,
        blank: usize,
    },
    /// Not a batch failure: the coordinator turns it into an infinite cost.
    #[error("{frames} frames cannot realize a label sequence that needs {required}")]
    InfeasibleLength { frames: usize, required: usize },
}

impl CtcError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn runtime(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            context,
            message: err.to_string(),
        }
    }

    pub(crate) fn batch_shape(message: impl Into<String>) -> Self {
        Self::BatchShape {
            message: message.into(),
        }
    }

    /// True for errors that abort a whole batch call.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, Self::BatchShape { .. } | Self::InvalidLabel { .. })
    }
}
