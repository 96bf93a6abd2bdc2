use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::runtime::DeviceType;

/// Default work-group size for map and reduce kernels
pub const DEFAULT_LOCAL_SIZE: usize = 32;

/// Settings applied when a [`Context`](crate::Context) is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Device type requested from the platform
    pub device_type: DeviceType,
    /// Work-group size used when a builder is not given one
    pub local_size: usize,
    /// Options passed to every program build
    pub build_options: String,
    /// Log generated kernel sources at debug level
    pub log_kernel_source: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            device_type: DeviceType::Default,
            local_size: DEFAULT_LOCAL_SIZE,
            build_options: String::new(),
            log_kernel_source: false,
        }
    }
}

impl ContextConfig {
    pub fn builder() -> ContextConfigBuilder {
        ContextConfigBuilder::new()
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ContextConfig =
            toml::from_str(text).map_err(|e| KernelError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_size == 0 {
            return Err(KernelError::config("local_size must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ContextConfigBuilder {
    config: ContextConfig,
}

impl ContextConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ContextConfig::default(),
        }
    }

    pub fn device_type(mut self, device_type: DeviceType) -> Self {
        self.config.device_type = device_type;
        self
    }

    pub fn local_size(mut self, local_size: usize) -> Self {
        self.config.local_size = local_size;
        self
    }

    pub fn build_options<S: Into<String>>(mut self, options: S) -> Self {
        self.config.build_options = options.into();
        self
    }

    pub fn log_kernel_source(mut self, enable: bool) -> Self {
        self.config.log_kernel_source = enable;
        self
    }

    pub fn build(self) -> Result<ContextConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContextConfig::default();
        assert_eq!(config.local_size, 32);
        assert_eq!(config.device_type, DeviceType::Default);
        assert!(config.build_options.is_empty());
    }

    #[test]
    fn test_from_toml() {
        let config = ContextConfig::from_toml_str(
            r#"
device_type = "cpu"
local_size = 64
"#,
        )
        .unwrap();
        assert_eq!(config.device_type, DeviceType::Cpu);
        assert_eq!(config.local_size, 64);
        assert!(!config.log_kernel_source);
    }

    #[test]
    fn test_rejects_zero_local_size() {
        assert!(ContextConfig::from_toml_str("local_size = 0").is_err());
        assert!(ContextConfig::builder().local_size(0).build().is_err());
    }

    #[test]
    fn test_rejects_unknown_device_type() {
        assert!(ContextConfig::from_toml_str(r#"device_type = "fpga""#).is_err());
    }
}
