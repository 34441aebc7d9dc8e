//! YAML compiler configuration.
//!
//! ```yaml
//! pipeline:
//!   namespace: Game
//!   stop_on_validation_error: false
//!   fail_on_cycles: true
//!   stage_budget_ms: 5000
//! localization:
//!   auto_detect: true
//!   keywords: [name, desc]
//! known_types: [Buff, Currency]
//! rules:
//!   Character:
//!     stop_on_first_error: false
//!     rules:
//!       - field: Level
//!         rule: range
//!         min: 1
//!         max: 99
//!       - field: Title
//!         rule: required
//!         when: "Level >= 10"
//! ```

use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    localization::LocalizationConfig,
    pipeline::{CancellationToken, PipelineOptions},
    validation::TableRules,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub namespace: String,
    pub stop_on_validation_error: bool,
    pub fail_on_cycles: bool,
    pub stage_budget_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub pipeline: PipelineSettings,
    pub localization: LocalizationConfig,
    pub known_types: Vec<String>,
    pub rules: BTreeMap<String, TableRules>,
}

impl CompilerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let reader = BufReader::new(file);
        let config = serde_yaml::from_reader(reader)
            .with_context(|| format!("Parsing config YAML {path:?}"))?;
        Ok(config)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self> {
        serde_yaml::from_str(input).context("Parsing config YAML")
    }

    pub fn pipeline_options(&self, cancellation: CancellationToken) -> PipelineOptions {
        PipelineOptions {
            namespace: self.pipeline.namespace.clone(),
            stop_on_validation_error: self.pipeline.stop_on_validation_error,
            stage_budget: self.pipeline.stage_budget_ms.map(Duration::from_millis),
            cancellation,
        }
    }

    pub fn table_rules(&self, table: &str) -> Option<&TableRules> {
        self.rules.get(table)
    }
}
