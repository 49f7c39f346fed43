use fxhash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::{
    DEFAULT_COMBINE_READOUTS, DEFAULT_MAX_HITS, DEFAULT_PAYLOAD_TIMEOUT_MS,
    DEFAULT_POLL_INTERVAL_MS,
};
use super::data_record::ScanPolicy;
use super::error::ConfigError;

/// One detector module: where its readout stream lives and, for replay, which recorded
/// run feeds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub raw_data_path: Option<PathBuf>,
    /// Fixed extra delay in seconds before every replayed readout
    #[serde(default)]
    pub delay: f64,
}

impl ModuleConfig {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            raw_data_path: None,
            delay: 0.0,
        }
    }
}

/// Structure representing the application configuration. Shared by the monitor and the
/// replay tool, so one file describes both ends of a stream.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Module order defines module index in the aggregated results
    pub modules: Vec<ModuleConfig>,
    /// Cap on hits per module per readout, also the depth of the noise history
    pub max_hits: usize,
    #[serde(default)]
    pub scan_policy: ScanPolicy,
    pub payload_timeout_ms: u64,
    pub combine_readouts: usize,
    pub poll_interval_ms: u64,
    pub loop_replay: bool,
}

impl Default for Config {
    /// The two module telescope replaying the bundled unit test runs on localhost
    fn default() -> Self {
        let mut module_0 = ModuleConfig::new("module_0", "tcp://127.0.0.1:5678");
        module_0.raw_data_path = Some(PathBuf::from("unit_test_data_2.h5"));
        let mut module_1 = ModuleConfig::new("module_1", "tcp://127.0.0.1:5679");
        module_1.raw_data_path = Some(PathBuf::from("unit_test_data_5.h5"));
        Self {
            modules: vec![module_0, module_1],
            max_hits: DEFAULT_MAX_HITS,
            scan_policy: ScanPolicy::default(),
            payload_timeout_ms: DEFAULT_PAYLOAD_TIMEOUT_MS,
            combine_readouts: DEFAULT_COMBINE_READOUTS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            loop_replay: true,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful and valid
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.modules.is_empty() {
            return Err(ConfigError::NoModules);
        }
        if self.max_hits == 0 {
            return Err(ConfigError::BadMaxHits);
        }
        if self.combine_readouts == 0 {
            return Err(ConfigError::BadCombineReadouts);
        }
        let mut addresses = FxHashSet::default();
        for module in self.modules.iter() {
            if !addresses.insert(module.address.as_str()) {
                return Err(ConfigError::DuplicateAddress(module.address.clone()));
            }
        }
        Ok(())
    }

    pub fn payload_timeout(&self) -> Duration {
        Duration::from_millis(self.payload_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn n_modules(&self) -> usize {
        self.modules.len()
    }

    /// Get the path to the recorded run replayed for a module
    pub fn get_raw_data_path(&self, module: &ModuleConfig) -> Result<PathBuf, ConfigError> {
        match &module.raw_data_path {
            Some(path) if path.exists() => Ok(path.clone()),
            Some(path) => Err(ConfigError::BadFilePath(path.clone())),
            None => Err(ConfigError::NoRawDataPath(module.name.clone())),
        }
    }
}
