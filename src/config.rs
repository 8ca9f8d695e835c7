use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CtcError;
use crate::pipeline::reduction::Reduction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CtcConfig {
    pub blank: usize,
    /// `"cpu"`, `"gpu"` (wgpu), `"cuda"` or `"auto"`.
    pub device: String,
    /// Dedicated worker pool size for the CPU backend; `None` uses rayon's global pool.
    pub num_threads: Option<usize>,
    /// Divide each sample's cost and gradient by its frame count.
    pub average_frames: bool,
    pub reduction: Reduction,
}

impl CtcConfig {
    pub const DEFAULT_BLANK: usize = 0;

    pub fn load(path: &Path) -> Result<Self, CtcError> {
        let data =
            std::fs::read_to_string(path).map_err(|e| CtcError::io("read ctc config", e))?;
        serde_json::from_str(&data).map_err(|e| CtcError::json("parse ctc config", e))
    }
}

impl Default for CtcConfig {
    fn default() -> Self {
        Self {
            blank: Self::DEFAULT_BLANK,
            device: "cpu".to_string(),
            num_threads: None,
            average_frames: false,
            reduction: Reduction::Sum,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctc_config_default() {
        let config = CtcConfig::default();
        assert_eq!(config.blank, 0);
        assert_eq!(config.device, "cpu");
        assert!(config.num_threads.is_none());
        assert!(!config.average_frames);
        assert_eq!(config.reduction, Reduction::Sum);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{ "blank": 3, "reduction": "mean" }"#;
        let config: CtcConfig = serde_json::from_str(json).expect("valid config json");
        assert_eq!(config.blank, 3);
        assert_eq!(config.reduction, Reduction::Mean);
        assert_eq!(config.device, "cpu");
    }

    #[test]
    fn load_reads_file() {
        let path = std::env::temp_dir().join("ctc_loss_config_load.json");
        std::fs::write(&path, r#"{"device": "auto", "num_threads": 2, "average_frames": true}"#)
            .expect("write config");
        let config = CtcConfig::load(&path).expect("load config");
        assert_eq!(config.device, "auto");
        assert_eq!(config.num_threads, Some(2));
        assert!(config.average_frames);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn load_fails_on_missing_file() {
        let result = CtcConfig::load(Path::new("/nonexistent/ctc.json"));
        assert!(matches!(result, Err(CtcError::Io { .. })));
    }
}
