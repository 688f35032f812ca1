use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assemble::AssemblyOptions;
use crate::domain::{Coordinates, SCHEMA_VERSION, ValidationMode};
use crate::error::OlmstedError;

pub const CONFIG_FILE_NAME: &str = "olmsted-prep.json";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub naive_name: Option<String>,
    #[serde(default)]
    pub reroot: Option<bool>,
    #[serde(default)]
    pub validation: Option<ValidationMode>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub pcp_trees: Option<Utf8PathBuf>,
    #[serde(default)]
    pub schema_version: Option<String>,
}

/// Values given on the command line; they win over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub inputs: Vec<Utf8PathBuf>,
    pub output_dir: Option<Utf8PathBuf>,
    pub naive_name: Option<String>,
    pub reroot: bool,
    pub remove_invalid_clones: bool,
    pub coordinates: Option<Coordinates>,
    pub pcp_trees: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub inputs: Vec<Utf8PathBuf>,
    pub output_dir: Option<Utf8PathBuf>,
    pub pcp_trees: Option<Utf8PathBuf>,
    pub assembly: AssemblyOptions,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the config file (explicit path, then `./olmsted-prep.json`, then the per-user
    /// file) and applies `overrides`. No file at all means defaults.
    pub fn resolve(
        path: Option<&Utf8Path>,
        overrides: Overrides,
    ) -> Result<ResolvedConfig, OlmstedError> {
        let config = match path {
            Some(path) => Self::read(path)?,
            None => match Self::discover() {
                Some(found) => Self::read(&found)?,
                None => Config::default(),
            },
        };
        Self::resolve_config(config, overrides)
    }

    pub fn read(path: &Utf8Path) -> Result<Config, OlmstedError> {
        debug!("reading config {path}");
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| OlmstedError::ConfigRead(path.as_std_path().to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| OlmstedError::ConfigParse(err.to_string()))
    }

    fn discover() -> Option<Utf8PathBuf> {
        let local = Utf8PathBuf::from(CONFIG_FILE_NAME);
        if local.as_std_path().exists() {
            return Some(local);
        }
        user_config_path().filter(|path| path.as_std_path().exists())
    }

    pub fn resolve_config(
        config: Config,
        overrides: Overrides,
    ) -> Result<ResolvedConfig, OlmstedError> {
        let naive_name = overrides
            .naive_name
            .or(config.naive_name)
            .unwrap_or_else(|| "naive".to_string());
        if naive_name.trim().is_empty() {
            return Err(OlmstedError::ConfigParse(
                "naive_name must not be empty".to_string(),
            ));
        }

        let validation = if overrides.remove_invalid_clones {
            ValidationMode::Lenient
        } else {
            config.validation.unwrap_or(ValidationMode::Strict)
        };

        let schema_version = config
            .schema_version
            .unwrap_or_else(|| SCHEMA_VERSION.to_string());
        if schema_version.trim().is_empty() {
            return Err(OlmstedError::ConfigParse(
                "schema_version must not be empty".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            inputs: overrides.inputs,
            output_dir: overrides.output_dir,
            pcp_trees: overrides.pcp_trees.or(config.pcp_trees),
            assembly: AssemblyOptions {
                naive_name,
                reroot: overrides.reroot || config.reroot.unwrap_or(false),
                validation,
                coordinates: overrides
                    .coordinates
                    .or(config.coordinates)
                    .unwrap_or(Coordinates::Airr),
                schema_version,
            },
        })
    }
}

/// `$HOME/.config/olmsted-prep/config.json`
pub fn user_config_path() -> Option<Utf8PathBuf> {
    BaseDirs::new().and_then(|dirs| {
        Utf8PathBuf::from_path_buf(
            dirs.home_dir()
                .join(".config")
                .join("olmsted-prep")
                .join("config.json"),
        )
        .ok()
    })
}
