//! Immutable per-run parameters forwarded to every worker launch.
use clap::ValueEnum;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_PSEUDOCOUNT_LOG2_CONCENTRATION: f64 = 0.1;
pub const DEFAULT_MIN_NAUC_GROWING: f64 = 0.5;
pub const DEFAULT_MIN_POINTS_RESISTANCE_AUC: u32 = 4;

/// Host operating system, which decides how a GUI worker reaches a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Linux,
    Mac,
    Windows,
}

impl HostOs {
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "macos" => Self::Mac,
            "windows" => Self::Windows,
            _ => Self::Linux,
        }
    }
}

/// Settings fixed for the lifetime of one run.
///
/// Built once from the CLI and passed by reference to every component; the
/// thresholds are opaque to the orchestrator and only forwarded to workers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunParameters {
    pub pseudocount_log2_concentration: f64,
    pub min_nauc_to_be_considered_growing: f64,
    pub min_points_to_calculate_resistance_auc: u32,
    pub keep_tmp_files: bool,
    pub skip_contrast_correction: bool,
    /// Stage after which the run stops successfully.
    pub stop_after: Option<String>,
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            pseudocount_log2_concentration: DEFAULT_PSEUDOCOUNT_LOG2_CONCENTRATION,
            min_nauc_to_be_considered_growing: DEFAULT_MIN_NAUC_GROWING,
            min_points_to_calculate_resistance_auc: DEFAULT_MIN_POINTS_RESISTANCE_AUC,
            keep_tmp_files: false,
            skip_contrast_correction: false,
            stop_after: None,
        }
    }
}

impl RunParameters {
    /// Environment every worker launch of this run receives.
    pub fn worker_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "KEEP_TMP_FILES".to_string(),
            self.keep_tmp_files.to_string(),
        );
        env.insert(
            "SKIP_CONTRAST_CORRECTION".to_string(),
            self.skip_contrast_correction.to_string(),
        );
        env.insert(
            "pseudocount_log2_concentration".to_string(),
            self.pseudocount_log2_concentration.to_string(),
        );
        env.insert(
            "min_nAUC_to_beConsideredGrowing".to_string(),
            self.min_nauc_to_be_considered_growing.to_string(),
        );
        env.insert(
            "min_points_to_calculate_resistance_auc".to_string(),
            self.min_points_to_calculate_resistance_auc.to_string(),
        );
        env
    }

    pub fn stops_after(&self, stage: &str) -> bool {
        self.stop_after.as_deref() == Some(stage)
    }
}
