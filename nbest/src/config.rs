//! Selector configuration

use serde::Deserialize;
use std::path::Path;

use crate::capability::BackendFlags;
use crate::device::DeviceId;
use crate::select::ScratchLayout;
use crate::Result;

/// Run-wide configuration for a selector and the device it runs on.
///
/// Usually a section of the decoder's JSON configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SelectorConfig {
    /// Largest beam the decoder will request (also bounds input beams)
    #[serde(default = "default_max_beam_size")]
    pub max_beam_size: usize,

    /// Largest number of sentences decoded together
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Device the selector's scratch buffers live on
    #[serde(default)]
    pub device: DeviceId,

    /// Seed forwarded to the device backend
    #[serde(default)]
    pub seed: u64,

    /// Feature toggles applied to the device backend
    #[serde(default)]
    pub backend: BackendFlags,
}

fn default_max_beam_size() -> usize {
    12
}

fn default_max_batch_size() -> usize {
    64
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_beam_size: default_max_beam_size(),
            max_batch_size: default_max_batch_size(),
            device: DeviceId::default(),
            seed: 0,
            backend: BackendFlags::default(),
        }
    }
}

impl SelectorConfig {
    /// Load configuration from a JSON file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Scratch sizing implied by the configured maxima.
    ///
    /// # Panics
    /// Panics if either maximum is zero.
    #[must_use]
    pub fn layout(&self) -> ScratchLayout {
        ScratchLayout::new(self.max_beam_size, self.max_batch_size)
    }
}
