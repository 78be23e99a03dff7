//! Class index to label resolution.
//!
//! The label table is a newline-delimited text file: line `i` (0-based) names
//! class index `i`. It is read once at startup and shared read-only.

use std::path::Path;

use crate::error::{DetectError, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<String>,
}

impl LabelMap {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DetectError::resource(format!("failed to read label file {}: {}", path.display(), e))
        })?;
        let map = Self::parse(&raw);
        if map.is_empty() {
            return Err(DetectError::resource(format!(
                "label file {} contains no labels",
                path.display()
            )));
        }
        log::info!("LabelMap: loaded {} labels from {}", map.len(), path.display());
        Ok(map)
    }

    /// Parse newline-delimited labels. Blank lines keep their index; a single
    /// trailing newline does not add an entry.
    pub fn parse(raw: &str) -> Self {
        let mut labels: Vec<String> = raw
            .split('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();
        if labels.last().is_some_and(|last| last.is_empty()) {
            labels.pop();
        }
        Self { labels }
    }

    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolve a raw class value as emitted by the model.
    ///
    /// Models emit class indices as floats; the value is truncated toward zero.
    pub fn resolve(&self, class: f32) -> Result<&str> {
        if !class.is_finite() || class < 0.0 {
            return Err(DetectError::inference(format!(
                "model produced invalid class index {}",
                class
            )));
        }
        let index = class as usize;
        self.labels
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| {
                DetectError::resource(format!(
                    "class index {} outside label table of {} entries",
                    index,
                    self.labels.len()
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
