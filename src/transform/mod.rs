//! Transforms: descriptors of one plugin output to extract, and the
//! worker that runs them over a dense audio input.

pub mod fft;
pub mod transformer;

pub use transformer::{FeatureExtractionTransformer, TransformOutput, TransformerHandle};

use crate::plugin::{FeaturePlugin, InputDomain};
use crate::time::RealTime;

/// Analysis window shape for frequency-domain input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowShape {
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
}

/// How multi-valued features are written into a time/value output model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiValuePolicy {
    /// One point per value, labelled `"[i] label"` when there are several.
    #[default]
    OnePointPerValue,
    /// A single point from the first value.
    FirstValueOnly,
}

/// A request to run one plugin output over an input model.
///
/// Transforms grouped into a single transformer run must be similar:
/// identical in every field except `output`.
#[derive(Debug, Clone)]
pub struct TransformDescriptor {
    /// Plugin key, `"vamp:<soname>:<label>"`.
    pub plugin_key: String,
    /// Output identifier; empty selects the plugin's first output.
    pub output: String,
    /// Parameter assignments applied before initialisation.
    pub parameters: Vec<(String, f32)>,
    /// Expected plugin version; empty skips the check.
    pub plugin_version: String,
    /// Step size in frames; 0 asks the plugin for its preference.
    pub step_size: usize,
    /// Block size in frames; 0 asks the plugin for its preference.
    pub block_size: usize,
    pub window: WindowShape,
    /// Context start; zero starts at the input model's start.
    pub start_time: RealTime,
    /// Context duration; zero runs to the input model's end.
    pub duration: RealTime,
    /// Input channel, or -1 to mix all channels down.
    pub input_channel: i32,
    pub multi_value_policy: MultiValuePolicy,
}

impl Default for TransformDescriptor {
    fn default() -> Self {
        Self {
            plugin_key: String::new(),
            output: String::new(),
            parameters: Vec::new(),
            plugin_version: String::new(),
            step_size: 0,
            block_size: 0,
            window: WindowShape::default(),
            start_time: RealTime::zero(),
            duration: RealTime::zero(),
            input_channel: -1,
            multi_value_policy: MultiValuePolicy::default(),
        }
    }
}

impl TransformDescriptor {
    /// True when the two transforms differ at most in their output choice.
    pub fn is_similar_to(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.output = String::new();
        b.output = String::new();
        a.plugin_key == b.plugin_key
            && a.parameters == b.parameters
            && a.plugin_version == b.plugin_version
            && a.step_size == b.step_size
            && a.block_size == b.block_size
            && a.window == b.window
            && a.start_time == b.start_time
            && a.duration == b.duration
            && a.input_channel == b.input_channel
            && a.multi_value_policy == b.multi_value_policy
    }

    /// Resolve the effective step and block sizes against a plugin's
    /// preferences. A zero size defers to the plugin; a plugin with no
    /// preference gets 1024, with the step defaulting to the block size in
    /// the time domain and half of it in the frequency domain.
    pub fn resolved_sizes(&self, plugin: &dyn FeaturePlugin) -> (usize, usize) {
        let mut block = self.block_size;
        if block == 0 {
            block = plugin.preferred_block_size();
            if block == 0 {
                block = 1024;
            }
        }
        let mut step = self.step_size;
        if step == 0 {
            step = plugin.preferred_step_size();
            if step == 0 {
                step = match plugin.input_domain() {
                    InputDomain::Time => block,
                    InputDomain::Frequency => block / 2,
                };
            }
        }
        (step, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_similarity_ignores_output_only() {
        let base = TransformDescriptor {
            plugin_key: "vamp:lib:plug".into(),
            output: "onsets".into(),
            step_size: 512,
            ..Default::default()
        };
        let mut other = base.clone();
        other.output = "curve".into();
        assert!(base.is_similar_to(&other));

        other.step_size = 256;
        assert!(!base.is_similar_to(&other));
    }
}
