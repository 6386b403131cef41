use serde::Deserialize;
use std::{fs, path::Path};

use crate::{
    error::{GradNormError, Result},
    norm::NormOrder,
};

/// Settings for gradient norm tracking, loadable from TOML or JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GradNormConfig {
    #[serde(default)]
    pub norm_type: NormOrder,
    #[serde(default = "default_log_every_n_steps")]
    pub log_every_n_steps: usize,
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,
    #[serde(default)]
    pub track_history: bool,
}

impl Default for GradNormConfig {
    fn default() -> Self {
        Self {
            norm_type: NormOrder::default(),
            log_every_n_steps: default_log_every_n_steps(),
            enable_stdout: default_enable_stdout(),
            track_history: false,
        }
    }
}

impl GradNormConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: GradNormConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(GradNormError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_path(path)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.log_every_n_steps == 0 {
            errors.push("log_every_n_steps must be greater than 0".to_string());
        }

        if let NormOrder::Finite(p) = self.norm_type {
            if !p.is_finite() {
                errors.push(format!(
                    "norm_type must be a finite number, 'inf' or '-inf', got {p}"
                ));
            }
        }

        if !errors.is_empty() {
            return Err(GradNormError::validation(errors));
        }

        Ok(())
    }
}

fn default_log_every_n_steps() -> usize {
    1
}

fn default_enable_stdout() -> bool {
    true
}
