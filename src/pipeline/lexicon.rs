//! Reference word lists used by title sentiment and vocabulary features.

use crate::config::FeatureSettings;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

const BUNDLED_LEXICON: &str = include_str!("../../config/lexicon.toml");

#[derive(Debug, Deserialize)]
struct LexiconFile {
    #[serde(default)]
    positive: Vec<String>,
    #[serde(default)]
    negative: Vec<String>,
    #[serde(default)]
    common: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lexicon {
    positive: HashSet<String>,
    negative: HashSet<String>,
    common: HashSet<String>,
}

fn normalize(words: Vec<String>) -> HashSet<String> {
    words
        .into_iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

impl Lexicon {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: LexiconFile = toml::from_str(content).context("Failed to parse lexicon")?;
        Ok(Self {
            positive: normalize(file.positive),
            negative: normalize(file.negative),
            common: normalize(file.common),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read lexicon file: {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid lexicon file: {:?}", path))
    }

    /// The word lists shipped with the crate.
    pub fn bundled() -> Result<Self> {
        Self::from_toml_str(BUNDLED_LEXICON)
    }

    /// The configured lexicon file, or the bundled lists when none is set.
    pub fn from_settings(settings: &FeatureSettings) -> Result<Self> {
        match &settings.lexicon_path {
            Some(path) => Self::load(path),
            None => Self::bundled(),
        }
    }

    /// `token` must already be lowercase.
    pub fn is_positive(&self, token: &str) -> bool {
        self.positive.contains(token)
    }

    pub fn is_negative(&self, token: &str) -> bool {
        self.negative.contains(token)
    }

    pub fn is_common(&self, token: &str) -> bool {
        self.common.contains(token)
    }

    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.positive.len(), self.negative.len(), self.common.len())
    }
}
