use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, QuiverResult};
use crate::index::DuplicatePolicy;

/// Defaults for the stream tools, optionally loaded from a TOML file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuiverConfig {
    /// Extension given to extracted payload files, without the dot.
    pub extension: String,
    /// Cell text for metadata terms an entry does not define.
    pub missing_marker: String,
    /// Field delimiter of the score table; must be a single ASCII character.
    pub score_delimiter: char,
    /// How a tag matching several entries is resolved.
    pub duplicate_policy: DuplicatePolicy,
    /// File name prefix of split pieces.
    pub split_prefix: String,
    /// Whether extraction replaces files that already exist.
    pub overwrite: bool,
}

impl Default for QuiverConfig {
    fn default() -> Self {
        Self {
            extension: "pdb".into(),
            missing_marker: "NaN".into(),
            score_delimiter: '\t',
            duplicate_policy: DuplicatePolicy::Error,
            split_prefix: "split".into(),
            overwrite: false,
        }
    }
}

impl QuiverConfig {
    pub fn from_toml_str(text: &str) -> QuiverResult<Self> {
        Self::parse(text).map_err(QuiverError::Config)
    }

    pub fn load(path: &Path) -> QuiverResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| QuiverError::Config(format!("{}: {e}", path.display())))
    }

    fn parse(text: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(text).map_err(|e| e.to_string())?;
        ascii_delimiter(config.score_delimiter)?;
        Ok(config)
    }

    /// The score delimiter as the single byte the table writer needs.
    pub fn delimiter_byte(&self) -> QuiverResult<u8> {
        ascii_delimiter(self.score_delimiter).map_err(QuiverError::Config)
    }

    pub fn to_toml_string(&self) -> QuiverResult<String> {
        toml::to_string(self).map_err(|e| QuiverError::Config(e.to_string()))
    }
}

fn ascii_delimiter(c: char) -> Result<u8, String> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| format!("score_delimiter {c:?} is not an ASCII character"))
}
