//! Repository CI file parsing.
//!
//! The CI file is a YAML document at the repository root:
//!
//! ```yaml
//! image:
//!   - base:1.0
//!   - base:2.0
//! script:
//!   - make test
//! ```
//!
//! Both keys accept a single string or a list of strings. Other keys are
//! ignored.

use crate::{ConfigError, ConfigResult};
use indexmap::IndexSet;
use serde::Deserialize;

/// Name of the CI file looked up at the repository root.
pub const CI_CONFIG_FILE: &str = ".ci-config";

/// A validated CI file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiConfig {
    /// Images to build in, duplicates removed, first occurrence kept.
    pub images: Vec<String>,
    /// Script lines run in every image.
    pub script: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) if s.is_empty() => Vec::new(),
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawCiConfig {
    #[serde(default)]
    image: Option<OneOrMany>,
    #[serde(default)]
    script: Option<OneOrMany>,
}

/// Parse a CI file.
///
/// Returns [`ConfigError::NoImage`] or [`ConfigError::NoScript`] when the
/// respective key is absent or empty.
pub fn parse_ci_config(yaml: &str) -> ConfigResult<CiConfig> {
    let raw: RawCiConfig = if yaml.trim().is_empty() {
        RawCiConfig::default()
    } else {
        serde_yaml::from_str(yaml)?
    };

    let images = raw.image.map(OneOrMany::into_vec).unwrap_or_default();
    if images.is_empty() {
        return Err(ConfigError::NoImage);
    }
    let images: IndexSet<String> = images.into_iter().collect();

    let script = raw.script.map(OneOrMany::into_vec).unwrap_or_default();
    if script.is_empty() {
        return Err(ConfigError::NoScript);
    }

    Ok(CiConfig {
        images: images.into_iter().collect(),
        script,
    })
}
