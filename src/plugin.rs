//! The feature-extraction plugin contract consumed by the transformer.
//!
//! Plugins live behind whatever transport the host provides (an in-process
//! implementation, an out-of-process server); the engine only needs the
//! trait surface here. Factories are passed to the transformer explicitly
//! rather than discovered through process-wide state.

use std::collections::HashMap;
use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::time::RealTime;

/// The domain a plugin wants its input in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDomain {
    Time,
    Frequency,
}

/// How an output's features are placed in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    /// One feature per processing block, at the block's frame.
    OneSamplePerStep,
    /// Features at a fixed rate declared by the descriptor.
    FixedSampleRate,
    /// Features carry their own timestamps.
    VariableSampleRate,
}

/// The declared shape of one plugin output.
#[derive(Debug, Clone)]
pub struct OutputDescriptor {
    pub identifier: String,
    pub name: String,
    pub unit: String,
    pub bin_count: usize,
    pub has_fixed_bin_count: bool,
    pub has_known_extents: bool,
    pub min_value: f32,
    pub max_value: f32,
    pub sample_type: SampleType,
    /// Output rate in Hz; meaningful for fixed and variable sample types.
    pub sample_rate: f32,
    pub has_duration: bool,
    pub bin_names: Vec<String>,
}

impl Default for OutputDescriptor {
    fn default() -> Self {
        Self {
            identifier: String::new(),
            name: String::new(),
            unit: String::new(),
            bin_count: 1,
            has_fixed_bin_count: true,
            has_known_extents: false,
            min_value: 0.0,
            max_value: 0.0,
            sample_type: SampleType::OneSamplePerStep,
            sample_rate: 0.0,
            has_duration: false,
            bin_names: Vec::new(),
        }
    }
}

/// One feature emitted by a plugin.
#[derive(Debug, Clone, Default)]
pub struct Feature {
    pub timestamp: Option<RealTime>,
    pub duration: Option<RealTime>,
    pub values: Vec<f32>,
    pub label: String,
}

/// Features grouped by output index.
pub type FeatureSet = HashMap<usize, Vec<Feature>>;

/// A loaded feature-extraction plugin.
pub trait FeaturePlugin: Send {
    fn identifier(&self) -> &str;

    fn plugin_version(&self) -> i32;

    /// Plugin API generation. Version 1 plugins predate explicit feature
    /// durations; the transformer compensates when routing their output.
    fn api_version(&self) -> i32 {
        2
    }

    fn input_domain(&self) -> InputDomain;

    fn min_channel_count(&self) -> usize {
        1
    }

    fn max_channel_count(&self) -> usize {
        1
    }

    /// Preferred step size in frames; 0 leaves the choice to the host.
    fn preferred_step_size(&self) -> usize {
        0
    }

    /// Preferred block size in frames; 0 leaves the choice to the host.
    fn preferred_block_size(&self) -> usize {
        0
    }

    fn output_descriptors(&self) -> Vec<OutputDescriptor>;

    fn set_parameter(&mut self, name: &str, value: f32);

    /// Prepare for processing. Returns false if the plugin rejects the
    /// given channel count or sizes.
    fn initialise(&mut self, channels: usize, step_size: usize, block_size: usize) -> bool;

    /// Process one block. `buffers` holds one buffer per channel: time
    /// samples for time-domain plugins, or interleaved re/im pairs for
    /// bins 0..=block/2 for frequency-domain plugins.
    fn process(&mut self, buffers: &[Vec<f32>], timestamp: RealTime) -> FeatureSet;

    /// Collect any features buffered past the final block.
    fn remaining_features(&mut self) -> FeatureSet;
}

/// A parsed plugin key of the form `"vamp:<soname>:<label>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginKey {
    pub plugin_type: String,
    pub soname: String,
    pub label: String,
}

impl PluginKey {
    /// Parse an identifier string, rejecting malformed keys.
    pub fn parse(identifier: &str) -> EngineResult<Self> {
        let mut parts = identifier.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(plugin_type), Some(soname), Some(label))
                if !plugin_type.is_empty() && !soname.is_empty() && !label.is_empty() =>
            {
                Ok(Self {
                    plugin_type: plugin_type.to_string(),
                    soname: soname.to_string(),
                    label: label.to_string(),
                })
            }
            _ => Err(EngineError::InvalidParameter(format!(
                "malformed plugin key \"{identifier}\" (expected \"type:soname:label\")"
            ))),
        }
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.plugin_type, self.soname, self.label)
    }
}

/// Resolves plugin keys to live plugin instances.
pub trait PluginFactory: Send + Sync {
    /// Keys of every plugin this factory can produce.
    fn plugin_identifiers(&self) -> Vec<String>;

    /// Instantiate a plugin at the given input rate.
    fn instantiate(
        &self,
        identifier: &str,
        input_sample_rate: u32,
    ) -> EngineResult<Box<dyn FeaturePlugin>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_key_round_trip() {
        let key = PluginKey::parse("vamp:example-plugins:percussiononsets").unwrap();
        assert_eq!(key.plugin_type, "vamp");
        assert_eq!(key.soname, "example-plugins");
        assert_eq!(key.label, "percussiononsets");
        assert_eq!(key.to_string(), "vamp:example-plugins:percussiononsets");
    }

    #[test]
    fn test_label_may_contain_colons() {
        let key = PluginKey::parse("vamp:lib:weird:label").unwrap();
        assert_eq!(key.label, "weird:label");
    }

    #[test]
    fn test_malformed_keys_rejected() {
        assert!(PluginKey::parse("").is_err());
        assert!(PluginKey::parse("vamp").is_err());
        assert!(PluginKey::parse("vamp:lib").is_err());
        assert!(PluginKey::parse("vamp::label").is_err());
    }
}
