//! Plugin descriptors as reported by the execution backend.

use crate::error::{PluginHostError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Plugin format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginFormat {
    Auv3,
    Vst3,
    Clap,
}

impl PluginFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginFormat::Auv3 => "auv3",
            PluginFormat::Vst3 => "vst3",
            PluginFormat::Clap => "clap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auv3" => Some(PluginFormat::Auv3),
            "vst3" => Some(PluginFormat::Vst3),
            "clap" => Some(PluginFormat::Clap),
            _ => None,
        }
    }
}

impl fmt::Display for PluginFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A plugin parameter as exposed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterDescriptor {
    pub id: String,
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub default_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// A factory preset shipped with the plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryPreset {
    pub id: String,
    pub name: String,
    /// Opaque preset state, base64 encoded.
    pub payload: String,
    /// Format of the decoded payload (e.g. `aupreset`, `vstpreset`).
    pub payload_format: String,
}

impl FactoryPreset {
    /// Decode the base64 payload into raw preset bytes.
    pub fn decode_payload(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.payload.trim())
            .map_err(|e| PluginHostError::InvalidPreset {
                preset_id: self.id.clone(),
                message: e.to_string(),
            })
    }
}

/// Bus layout the native render bridge negotiates for a plugin node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginBusCapabilities {
    pub accepts_audio: bool,
    pub emits_audio: bool,
    pub accepts_midi: bool,
    pub emits_midi: bool,
    pub accepts_sidechain: bool,
    pub emits_sidechain: bool,
}

/// Immutable description of a plugin kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDescriptor {
    /// Globally unique plugin identifier (e.g. `com.x.echo`).
    pub identifier: String,
    pub name: String,
    pub format: PluginFormat,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub supports_sandbox: bool,
    #[serde(default)]
    pub input_channels: u32,
    #[serde(default)]
    pub output_channels: u32,
    #[serde(default)]
    pub accepts_midi: bool,
    #[serde(default)]
    pub emits_midi: bool,
    #[serde(default)]
    pub parameters: Vec<ParameterDescriptor>,
    #[serde(default)]
    pub factory_presets: Vec<FactoryPreset>,
}

impl PluginDescriptor {
    /// Look up a factory preset by id.
    pub fn preset(&self, preset_id: &str) -> Option<&FactoryPreset> {
        self.factory_presets.iter().find(|p| p.id == preset_id)
    }

    /// Id of the first factory preset, used as the initial preset on restart.
    pub fn first_preset_id(&self) -> Option<&str> {
        self.factory_presets.first().map(|p| p.id.as_str())
    }

    pub fn parameter(&self, parameter_id: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.id == parameter_id)
    }

    /// Derive the render bus layout. Inputs beyond a stereo pair are
    /// treated as a sidechain bus.
    pub fn bus_capabilities(&self) -> PluginBusCapabilities {
        PluginBusCapabilities {
            accepts_audio: self.input_channels > 0,
            emits_audio: self.output_channels > 0,
            accepts_midi: self.accepts_midi,
            emits_midi: self.emits_midi,
            accepts_sidechain: self.input_channels > 2,
            emits_sidechain: self.output_channels > 2,
        }
    }
}
