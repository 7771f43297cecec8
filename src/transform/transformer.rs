//! The feature-extraction worker: drives one plugin over one dense audio
//! input and streams emitted features into per-transform output models.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::fft::FftExtractor;
use super::{MultiValuePolicy, TransformDescriptor};
use crate::error::{EngineError, EngineResult};
use crate::event::Event;
use crate::model::dense::{AudioSource, GridModel};
use crate::model::sparse::{
    NoteModel, RegionModel, SparseOneDimensionalModel, SparseTimeValueModel,
};
use crate::model::{Model, ModelId};
use crate::plugin::{
    Feature, FeaturePlugin, FeatureSet, InputDomain, OutputDescriptor, PluginFactory, SampleType,
};
use crate::time::RealTime;

const READY_POLL: Duration = Duration::from_millis(500);

/// One output model created by a transformer, typed by what the plugin's
/// output descriptor called for.
#[derive(Clone)]
pub enum TransformOutput {
    Instants(Arc<SparseOneDimensionalModel>),
    TimeValues(Arc<SparseTimeValueModel>),
    Notes(Arc<NoteModel>),
    Regions(Arc<RegionModel>),
    Grid(Arc<GridModel>),
}

impl TransformOutput {
    pub fn set_completion(&self, completion: u8) {
        match self {
            Self::Instants(m) => m.set_completion(completion),
            Self::TimeValues(m) => m.set_completion(completion),
            Self::Notes(m) => m.set_completion(completion),
            Self::Regions(m) => m.set_completion(completion),
            Self::Grid(m) => m.set_completion(completion),
        }
    }

    pub fn as_model(&self) -> Arc<dyn Model> {
        match self {
            Self::Instants(m) => Arc::clone(m) as Arc<dyn Model>,
            Self::TimeValues(m) => Arc::clone(m) as Arc<dyn Model>,
            Self::Notes(m) => Arc::clone(m) as Arc<dyn Model>,
            Self::Regions(m) => Arc::clone(m) as Arc<dyn Model>,
            Self::Grid(m) => Arc::clone(m) as Arc<dyn Model>,
        }
    }

    pub fn completion(&self) -> u8 {
        self.as_model().completion()
    }
}

/// Runs one plugin over one dense audio input, producing one output model
/// per supplied transform.
///
/// All transforms in one run must be similar: same plugin, parameters,
/// sizes, and context, differing only in choice of plugin output.
/// Construction resolves and initialises the plugin and creates the output
/// models; [`spawn`](Self::spawn) then drives the block pump on a worker
/// thread.
pub struct FeatureExtractionTransformer {
    input: Arc<dyn AudioSource>,
    transforms: Vec<TransformDescriptor>,
    plugin: Box<dyn FeaturePlugin>,
    descriptors: Vec<OutputDescriptor>,
    output_nos: Vec<usize>,
    // per transform, to assign indices to timestampless fixed-rate
    // features; incremented before use
    fixed_rate_feature_nos: Vec<i64>,
    outputs: Vec<TransformOutput>,
    channels: usize,
    step: usize,
    block: usize,
    abandoned: Arc<AtomicBool>,
    message: Arc<Mutex<String>>,
}

impl FeatureExtractionTransformer {
    pub fn new(
        input: Arc<dyn AudioSource>,
        transforms: Vec<TransformDescriptor>,
        factory: &dyn PluginFactory,
    ) -> EngineResult<Self> {
        if transforms.is_empty() {
            return Err(EngineError::InvalidParameter(
                "no transforms supplied".into(),
            ));
        }
        for other in &transforms[1..] {
            if !transforms[0].is_similar_to(other) {
                return Err(EngineError::InvalidParameter(
                    "transforms grouped into one run must be similar in every respect \
                     except plugin output"
                        .into(),
                ));
            }
        }

        let primary = transforms[0].clone();
        let key = primary.plugin_key.clone();
        let mut message = String::new();

        let mut plugin = factory.instantiate(&key, input.sample_rate())?;

        for (name, value) in &primary.parameters {
            plugin.set_parameter(name, *value);
        }

        let mut channels = input.channel_count().max(1);
        if plugin.max_channel_count() < channels {
            channels = 1;
        }
        if plugin.min_channel_count() > channels {
            return Err(EngineError::plugin_init(
                &key,
                format!(
                    "cannot provide enough channels (plugin needs {}..{}, input has {})",
                    plugin.min_channel_count(),
                    plugin.max_channel_count(),
                    input.channel_count()
                ),
            ));
        }

        let (mut step, mut block) = primary.resolved_sizes(plugin.as_ref());
        debug!(channels, step, block, key = %key, "initialising plugin");

        if !plugin.initialise(channels, step, block) {
            let preferred = TransformDescriptor {
                step_size: 0,
                block_size: 0,
                ..primary.clone()
            }
            .resolved_sizes(plugin.as_ref());

            if preferred != (step, block)
                && plugin.initialise(channels, preferred.0, preferred.1)
            {
                message = format!(
                    "Plugin rejected the given step and block sizes ({step} and {block}); \
                     using plugin defaults ({} and {}) instead",
                    preferred.0, preferred.1
                );
                step = preferred.0;
                block = preferred.1;
            } else {
                return Err(EngineError::plugin_init(&key, "plugin rejected initialisation"));
            }
        }

        if !primary.plugin_version.is_empty() {
            let actual = plugin.plugin_version().to_string();
            if actual != primary.plugin_version {
                let mismatch = format!(
                    "Transform was configured for version {} of plugin \"{key}\", but the \
                     plugin being used is version {actual}",
                    primary.plugin_version
                );
                warn!("{mismatch}");
                message = if message.is_empty() {
                    mismatch
                } else {
                    format!("{mismatch}; {message}")
                };
            }
        }

        let available = plugin.output_descriptors();
        if available.is_empty() {
            return Err(EngineError::plugin_init(&key, "plugin has no outputs"));
        }

        let mut descriptors = Vec::new();
        let mut output_nos = Vec::new();
        let mut fixed_rate_feature_nos = Vec::new();
        for transform in &transforms {
            let found = available.iter().enumerate().find(|(_, descriptor)| {
                transform.output.is_empty() || descriptor.identifier == transform.output
            });
            match found {
                Some((index, descriptor)) => {
                    output_nos.push(index);
                    descriptors.push(descriptor.clone());
                    fixed_rate_feature_nos.push(-1);
                }
                None => {
                    return Err(EngineError::plugin_init(
                        &key,
                        format!("plugin has no output named \"{}\"", transform.output),
                    ));
                }
            }
        }

        let outputs = descriptors
            .iter()
            .map(|descriptor| {
                create_output_model(input.as_ref(), descriptor, plugin.api_version(), step)
            })
            .collect();

        Ok(Self {
            input,
            transforms,
            plugin,
            descriptors,
            output_nos,
            fixed_rate_feature_nos,
            outputs,
            channels,
            step,
            block,
            abandoned: Arc::new(AtomicBool::new(false)),
            message: Arc::new(Mutex::new(message)),
        })
    }

    pub fn outputs(&self) -> &[TransformOutput] {
        &self.outputs
    }

    pub fn step_size(&self) -> usize {
        self.step
    }

    pub fn block_size(&self) -> usize {
        self.block
    }

    /// Start the worker thread.
    pub fn spawn(self) -> TransformerHandle {
        let abandoned = Arc::clone(&self.abandoned);
        let message = Arc::clone(&self.message);
        let outputs = self.outputs.clone();
        let join = std::thread::Builder::new()
            .name("feature-extraction".into())
            .spawn(move || {
                let mut transformer = self;
                transformer.run();
            })
            .expect("spawn feature-extraction worker");
        TransformerHandle {
            abandoned,
            message,
            outputs,
            join: Some(join),
        }
    }

    /// Drive the plugin over the input. Usually called via [`spawn`];
    /// callable directly for synchronous use.
    pub fn run(&mut self) {
        while !self.input.is_ready() && !self.abandoned.load(Ordering::Acquire) {
            debug!("waiting for input model to be ready");
            std::thread::sleep(READY_POLL);
        }
        if self.abandoned.load(Ordering::Acquire) {
            self.complete_all();
            return;
        }

        let sample_rate = self.input.sample_rate();
        let frequency_domain = self.plugin.input_domain() == InputDomain::Frequency;

        let mut ffts = Vec::new();
        if frequency_domain {
            for _ in 0..self.channels {
                match FftExtractor::new(self.transforms[0].window, self.block) {
                    Ok(extractor) => ffts.push(extractor),
                    Err(e) => {
                        warn!("abandoning transform: {e}");
                        self.set_message(e.to_string());
                        self.complete_all();
                        return;
                    }
                }
            }
        }

        let start_frame = self.input.start_frame();
        let end_frame = self.input.end_frame();

        let mut context_start = self.transforms[0].start_time.to_frame(sample_rate);
        if context_start == 0 || context_start < start_frame {
            context_start = start_frame;
        }
        let mut context_duration = self.transforms[0].duration.to_frame(sample_rate);
        if context_duration == 0 {
            context_duration = end_frame - context_start;
        }
        if context_start + context_duration > end_frame {
            context_duration = end_frame - context_start;
        }

        for output in &self.outputs {
            output.set_completion(0);
        }

        let step = self.step as i64;
        let block = self.block as i64;
        let mut block_frame = context_start;
        let mut prev_completion = 0i64;

        let mut time_block = vec![0.0f32; self.block];
        let mut buffers = vec![vec![0.0f32; self.block + 2]; self.channels];

        while !self.abandoned.load(Ordering::Acquire) {
            if frequency_domain {
                if block_frame - block / 2 > context_start + context_duration {
                    break;
                }
            } else if block_frame >= context_start + context_duration {
                break;
            }

            let completion = (((block_frame - context_start) / step) * 99)
                / (context_duration / step + 1);

            for ch in 0..self.channels {
                if frequency_domain {
                    self.read_time_frames(ch, block_frame - block / 2, &mut time_block);
                    ffts[ch].transform(&time_block, &mut buffers[ch]);
                } else {
                    self.read_time_frames(ch, block_frame, &mut time_block);
                    buffers[ch][..self.block].copy_from_slice(&time_block);
                }
            }

            let features = self
                .plugin
                .process(&buffers, RealTime::from_frame(block_frame, sample_rate));

            if self.abandoned.load(Ordering::Acquire) {
                break;
            }

            self.route_feature_set(&features, block_frame);

            if block_frame == context_start || completion > prev_completion {
                for output in &self.outputs {
                    output.set_completion(completion as u8);
                }
                prev_completion = completion;
            }

            block_frame += step;
        }

        if !self.abandoned.load(Ordering::Acquire) {
            let remaining = self.plugin.remaining_features();
            self.route_feature_set(&remaining, block_frame);
        }

        self.complete_all();
    }

    pub fn message(&self) -> String {
        self.message.lock().clone()
    }

    fn set_message(&self, message: String) {
        *self.message.lock() = message;
    }

    fn complete_all(&self) {
        for output in &self.outputs {
            output.set_completion(100);
        }
    }

    fn route_feature_set(&mut self, features: &FeatureSet, block_frame: i64) {
        for n in 0..self.output_nos.len() {
            if let Some(list) = features.get(&self.output_nos[n]) {
                for feature in list {
                    self.add_feature(n, block_frame, feature);
                }
            }
        }
    }

    /// Fix the feature's frame per the output's sample type, then write it
    /// into the output model the constructor chose.
    fn add_feature(&mut self, n: usize, block_frame: i64, feature: &Feature) {
        let input_rate = self.input.sample_rate();
        let descriptor = &self.descriptors[n];

        let mut frame = block_frame;
        match descriptor.sample_type {
            SampleType::VariableSampleRate => match feature.timestamp {
                Some(timestamp) => frame = timestamp.to_frame(input_rate),
                None => {
                    warn!("dropping variable-sample-rate feature without timestamp");
                    return;
                }
            },
            SampleType::FixedSampleRate if descriptor.sample_rate > 0.0 => {
                match feature.timestamp {
                    Some(timestamp) => {
                        self.fixed_rate_feature_nos[n] = (timestamp.to_seconds()
                            * f64::from(descriptor.sample_rate))
                        .round() as i64;
                    }
                    None => {
                        self.fixed_rate_feature_nos[n] += 1;
                    }
                }
                frame = ((self.fixed_rate_feature_nos[n] as f64
                    / f64::from(descriptor.sample_rate))
                    * f64::from(input_rate))
                .round() as i64;
            }
            _ => {}
        }

        match &self.outputs[n] {
            TransformOutput::Instants(model) => {
                model.add_event(Event::new(frame).with_label(feature.label.clone()));
            }

            TransformOutput::TimeValues(model) => {
                match self.transforms[n].multi_value_policy {
                    MultiValuePolicy::OnePointPerValue => {
                        for (i, &value) in feature.values.iter().enumerate() {
                            let label = if feature.values.len() > 1 {
                                format!("[{}] {}", i + 1, feature.label)
                            } else {
                                feature.label.clone()
                            };
                            model.add_event(
                                Event::new(frame).with_value(value).with_label(label),
                            );
                        }
                    }
                    MultiValuePolicy::FirstValueOnly => {
                        let value = feature.values.first().copied().unwrap_or(f32::NAN);
                        model.add_event(
                            Event::new(frame)
                                .with_value(value)
                                .with_label(feature.label.clone()),
                        );
                    }
                }
            }

            TransformOutput::Notes(model) => {
                let (value, duration, index) = value_and_duration(feature, input_rate);
                let mut velocity = 100.0f32;
                if feature.values.len() > index {
                    velocity = feature.values[index];
                }
                velocity = velocity.clamp(0.0, 127.0);
                model.add_event(
                    Event::new(frame)
                        .with_value(value)
                        .with_duration(duration)
                        .with_level(velocity / 127.0)
                        .with_label(feature.label.clone()),
                );
            }

            TransformOutput::Regions(model) => {
                let (value, duration, _) = value_and_duration(feature, input_rate);
                if feature.duration.is_some() && !feature.values.is_empty() {
                    for (i, &v) in feature.values.iter().enumerate() {
                        let label = if feature.values.len() > 1 {
                            format!("[{}] {}", i + 1, feature.label)
                        } else {
                            feature.label.clone()
                        };
                        model.add_event(
                            Event::new(frame)
                                .with_value(v)
                                .with_duration(duration)
                                .with_label(label),
                        );
                    }
                } else {
                    model.add_event(
                        Event::new(frame)
                            .with_value(value)
                            .with_duration(duration)
                            .with_label(feature.label.clone()),
                    );
                }
            }

            TransformOutput::Grid(model) => {
                let resolution = i64::from(model.resolution().max(1));
                model.set_column((frame / resolution).max(0) as usize, &feature.values);
            }
        }
    }

    /// Read `out.len()` time-domain frames starting at `start` for the
    /// given plugin channel, zero-padding anything outside the input.
    fn read_time_frames(&self, channel_index: usize, start: i64, out: &mut [f32]) {
        out.fill(0.0);
        let size = out.len() as i64;
        let mut offset = 0usize;
        let mut from = start;
        let mut wanted = size;
        if from < 0 {
            offset = (-from) as usize;
            wanted = size + from;
            if wanted <= 0 {
                return;
            }
            from = 0;
        }
        let channel = if self.channels == 1 {
            self.transforms[0].input_channel
        } else {
            channel_index as i32
        };
        let end = offset + wanted as usize;
        self.input.channel_frames(channel, from, &mut out[offset..end]);
    }
}

/// Owns the worker thread driving a transformer.
pub struct TransformerHandle {
    abandoned: Arc<AtomicBool>,
    message: Arc<Mutex<String>>,
    outputs: Vec<TransformOutput>,
    join: Option<JoinHandle<()>>,
}

impl TransformerHandle {
    /// Request cooperative cancellation. The worker exits at the next
    /// block boundary, leaving every output completed to 100.
    pub fn abandon(&self) {
        self.abandoned.store(true, Ordering::Release);
    }

    pub fn outputs(&self) -> &[TransformOutput] {
        &self.outputs
    }

    pub fn message(&self) -> String {
        self.message.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join
            .as_ref()
            .map(|handle| handle.is_finished())
            .unwrap_or(true)
    }

    /// Wait for the worker to exit.
    pub fn join(mut self) {
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TransformerHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.join.take() {
            self.abandoned.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}

/// Extract the leading value and the duration of a note/region feature,
/// returning also the index of the first unconsumed value.
fn value_and_duration(feature: &Feature, input_rate: u32) -> (f32, i64, usize) {
    let mut index = 0usize;
    let mut value = 0.0f32;
    if feature.values.len() > index {
        value = feature.values[index];
        index += 1;
    }
    let duration = match feature.duration {
        Some(duration) => duration.to_frame(input_rate),
        None => {
            if feature.values.len() > index {
                let from_value = feature.values[index].round() as i64;
                index += 1;
                from_value
            } else {
                1
            }
        }
    };
    (value, duration.max(0), index)
}

/// Pick and build the output model for one descriptor, per its shape.
fn create_output_model(
    input: &dyn AudioSource,
    descriptor: &OutputDescriptor,
    plugin_api_version: i32,
    step: usize,
) -> TransformOutput {
    let bin_count = if descriptor.has_fixed_bin_count {
        descriptor.bin_count
    } else {
        1
    };
    let have_extents = bin_count > 0 && descriptor.has_known_extents;

    let model_rate = input.sample_rate();
    let model_resolution: i32 = match descriptor.sample_type {
        SampleType::VariableSampleRate => {
            if descriptor.sample_rate > 0.0 {
                ((f64::from(model_rate) / f64::from(descriptor.sample_rate)) + 0.001).max(1.0)
                    as i32
            } else {
                1
            }
        }
        SampleType::OneSamplePerStep => step as i32,
        SampleType::FixedSampleRate => {
            if descriptor.sample_rate > model_rate as f32 {
                warn!(
                    output_rate = f64::from(descriptor.sample_rate),
                    input_rate = model_rate,
                    "plugin reports an output rate finer than the input rate"
                );
                1
            } else if descriptor.sample_rate > 0.0 {
                (f64::from(model_rate) / f64::from(descriptor.sample_rate)).max(1.0) as i32
            } else {
                1
            }
        }
    };

    // Plugins predating explicit durations get their variable-rate
    // multi-bin outputs treated as durationful, with the second value
    // read as the duration.
    let pre_duration_plugin = plugin_api_version < 2;
    let has_duration = descriptor.has_duration
        || (pre_duration_plugin
            && bin_count > 1
            && descriptor.sample_type == SampleType::VariableSampleRate);

    let source: Option<ModelId> = Some(input.id());

    if bin_count == 0 && !has_duration {
        let model = SparseOneDimensionalModel::new(model_rate, model_resolution);
        model.set_source(source);
        TransformOutput::Instants(Arc::new(model))
    } else if has_duration {
        let unit = descriptor.unit.as_str();
        let is_note =
            bin_count > 1 && (unit == "Hz" || unit.contains("MIDI") || unit.contains("midi"));
        if is_note {
            let model = if have_extents {
                NoteModel::with_extents(
                    model_rate,
                    model_resolution,
                    descriptor.min_value,
                    descriptor.max_value,
                )
            } else {
                NoteModel::new(model_rate, model_resolution)
            };
            model.set_scale_units(unit);
            model.set_source(source);
            TransformOutput::Notes(Arc::new(model))
        } else {
            let model = if have_extents {
                RegionModel::with_extents(
                    model_rate,
                    model_resolution,
                    descriptor.min_value,
                    descriptor.max_value,
                )
            } else {
                RegionModel::new(model_rate, model_resolution)
            };
            model.set_source(source);
            TransformOutput::Regions(Arc::new(model))
        }
    } else if bin_count == 1 || descriptor.sample_type == SampleType::VariableSampleRate {
        let model = if have_extents {
            SparseTimeValueModel::with_extents(
                model_rate,
                model_resolution,
                descriptor.min_value,
                descriptor.max_value,
            )
        } else {
            SparseTimeValueModel::new(model_rate, model_resolution)
        };
        model.set_scale_units(descriptor.unit.clone());
        model.set_source(source);
        TransformOutput::TimeValues(Arc::new(model))
    } else {
        let model = GridModel::new(model_rate, model_resolution, bin_count);
        if !descriptor.bin_names.is_empty() {
            model.set_bin_names(descriptor.bin_names.clone());
        }
        model.set_source(source);
        TransformOutput::Grid(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{DecodeCache, DecodeCacheConfig};
    use crate::env::RuntimeEnv;
    use crate::model::ModelEvent;
    use crate::plugin::FeatureSet;
    use crate::transform::WindowShape;
    use std::collections::HashMap;
    use std::time::Instant;

    fn ramp_input(frames: usize, rate: u32) -> Arc<DecodeCache> {
        let env = Arc::new(RuntimeEnv::with_write_buffer_frames(2_048));
        let cache = DecodeCache::new(env, DecodeCacheConfig::default());
        cache.set_stream_format(rate, 1);
        let samples: Vec<f32> = (0..frames).map(|i| (i % 100) as f32 / 200.0).collect();
        cache.add_samples_interleaved(&samples).unwrap();
        cache.finish().unwrap();
        Arc::new(cache)
    }

    struct SingleFactory<F>(F);

    impl<F> PluginFactory for SingleFactory<F>
    where
        F: Fn() -> Box<dyn FeaturePlugin> + Send + Sync,
    {
        fn plugin_identifiers(&self) -> Vec<String> {
            vec!["vamp:test:plugin".into()]
        }
        fn instantiate(
            &self,
            identifier: &str,
            _input_sample_rate: u32,
        ) -> crate::error::EngineResult<Box<dyn FeaturePlugin>> {
            if identifier == "vamp:test:plugin" {
                Ok((self.0)())
            } else {
                Err(EngineError::PluginUnavailable(identifier.into()))
            }
        }
    }

    /// Emits one feature per block on output 0, with the block index as
    /// its value.
    struct CountingPlugin {
        descriptor: OutputDescriptor,
        blocks_processed: usize,
    }

    impl CountingPlugin {
        fn new(descriptor: OutputDescriptor) -> Self {
            Self {
                descriptor,
                blocks_processed: 0,
            }
        }
    }

    impl FeaturePlugin for CountingPlugin {
        fn identifier(&self) -> &str {
            "counting"
        }
        fn plugin_version(&self) -> i32 {
            2
        }
        fn input_domain(&self) -> InputDomain {
            InputDomain::Time
        }
        fn output_descriptors(&self) -> Vec<OutputDescriptor> {
            vec![self.descriptor.clone()]
        }
        fn set_parameter(&mut self, _name: &str, _value: f32) {}
        fn initialise(&mut self, _channels: usize, _step: usize, _block: usize) -> bool {
            true
        }
        fn process(&mut self, _buffers: &[Vec<f32>], _timestamp: RealTime) -> FeatureSet {
            let feature = Feature {
                values: vec![self.blocks_processed as f32],
                ..Default::default()
            };
            self.blocks_processed += 1;
            HashMap::from([(0, vec![feature])])
        }
        fn remaining_features(&mut self) -> FeatureSet {
            HashMap::new()
        }
    }

    fn transform_for(output: &str) -> TransformDescriptor {
        TransformDescriptor {
            plugin_key: "vamp:test:plugin".into(),
            output: output.into(),
            step_size: 1_024,
            block_size: 1_024,
            ..Default::default()
        }
    }

    #[test]
    fn test_one_sample_per_step_routing() {
        let input = ramp_input(8_192, 44_100);
        let factory = SingleFactory(|| {
            Box::new(CountingPlugin::new(OutputDescriptor {
                identifier: "curve".into(),
                ..Default::default()
            })) as Box<dyn FeaturePlugin>
        });

        let transformer = FeatureExtractionTransformer::new(
            Arc::clone(&input) as Arc<dyn AudioSource>,
            vec![transform_for("curve")],
            &factory,
        )
        .unwrap();

        // watch one output's completion for monotonicity
        let completions = Arc::new(Mutex::new(Vec::new()));
        let output = transformer.outputs()[0].clone();
        if let TransformOutput::TimeValues(model) = &output {
            let sink = Arc::clone(&completions);
            model.subscribe(Arc::new(move |_, event| {
                if let ModelEvent::CompletionChanged(pct) = event {
                    sink.lock().push(*pct);
                }
            }));
        } else {
            panic!("expected a time/value output model");
        }

        let handle = transformer.spawn();
        handle.join();

        let TransformOutput::TimeValues(model) = &output else {
            unreachable!()
        };
        let events = model.all_events();
        assert_eq!(events.len(), 8);
        for (k, event) in events.iter().enumerate() {
            assert_eq!(event.frame(), k as i64 * 1_024);
            assert_eq!(event.value(), k as f32);
        }
        assert_eq!(model.completion(), 100);
        assert_eq!(model.resolution(), 1_024);

        let seen = completions.lock().clone();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "non-monotone: {seen:?}");
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn test_dissimilar_transforms_rejected() {
        let input = ramp_input(2_048, 44_100);
        let factory = SingleFactory(|| {
            Box::new(CountingPlugin::new(OutputDescriptor::default())) as Box<dyn FeaturePlugin>
        });
        let mut other = transform_for("");
        other.step_size = 512;
        let result = FeatureExtractionTransformer::new(
            input as Arc<dyn AudioSource>,
            vec![transform_for(""), other],
            &factory,
        );
        assert!(matches!(result, Err(EngineError::InvalidParameter(_))));
    }

    #[test]
    fn test_unknown_output_rejected() {
        let input = ramp_input(2_048, 44_100);
        let factory = SingleFactory(|| {
            Box::new(CountingPlugin::new(OutputDescriptor {
                identifier: "curve".into(),
                ..Default::default()
            })) as Box<dyn FeaturePlugin>
        });
        let result = FeatureExtractionTransformer::new(
            input as Arc<dyn AudioSource>,
            vec![transform_for("nonexistent")],
            &factory,
        );
        assert!(matches!(result, Err(EngineError::PluginInitFailed { .. })));
    }

    /// Accepts only its own preferred sizes.
    struct PickyPlugin;

    impl FeaturePlugin for PickyPlugin {
        fn identifier(&self) -> &str {
            "picky"
        }
        fn plugin_version(&self) -> i32 {
            3
        }
        fn input_domain(&self) -> InputDomain {
            InputDomain::Time
        }
        fn preferred_step_size(&self) -> usize {
            512
        }
        fn preferred_block_size(&self) -> usize {
            2_048
        }
        fn output_descriptors(&self) -> Vec<OutputDescriptor> {
            vec![OutputDescriptor::default()]
        }
        fn set_parameter(&mut self, _name: &str, _value: f32) {}
        fn initialise(&mut self, _channels: usize, step: usize, block: usize) -> bool {
            step == 512 && block == 2_048
        }
        fn process(&mut self, _buffers: &[Vec<f32>], _timestamp: RealTime) -> FeatureSet {
            HashMap::new()
        }
        fn remaining_features(&mut self) -> FeatureSet {
            HashMap::new()
        }
    }

    #[test]
    fn test_retry_with_plugin_preferred_sizes() {
        let input = ramp_input(4_096, 44_100);
        let factory = SingleFactory(|| Box::new(PickyPlugin) as Box<dyn FeaturePlugin>);

        let transformer = FeatureExtractionTransformer::new(
            input as Arc<dyn AudioSource>,
            vec![transform_for("")],
            &factory,
        )
        .unwrap();

        assert_eq!(transformer.step_size(), 512);
        assert_eq!(transformer.block_size(), 2_048);
        assert!(transformer.message().contains("rejected"));
    }

    #[test]
    fn test_version_mismatch_recorded() {
        let input = ramp_input(2_048, 44_100);
        let factory = SingleFactory(|| {
            Box::new(CountingPlugin::new(OutputDescriptor::default())) as Box<dyn FeaturePlugin>
        });
        let mut transform = transform_for("");
        transform.plugin_version = "1".into();
        let transformer = FeatureExtractionTransformer::new(
            input as Arc<dyn AudioSource>,
            vec![transform],
            &factory,
        )
        .unwrap();
        assert!(transformer.message().contains("version"));
    }

    /// Emits everything from remaining_features only.
    struct TailPlugin {
        descriptor: OutputDescriptor,
        tail: Vec<Feature>,
    }

    impl FeaturePlugin for TailPlugin {
        fn identifier(&self) -> &str {
            "tail"
        }
        fn plugin_version(&self) -> i32 {
            2
        }
        fn input_domain(&self) -> InputDomain {
            InputDomain::Time
        }
        fn output_descriptors(&self) -> Vec<OutputDescriptor> {
            vec![self.descriptor.clone()]
        }
        fn set_parameter(&mut self, _name: &str, _value: f32) {}
        fn initialise(&mut self, _channels: usize, _step: usize, _block: usize) -> bool {
            true
        }
        fn process(&mut self, _buffers: &[Vec<f32>], _timestamp: RealTime) -> FeatureSet {
            HashMap::new()
        }
        fn remaining_features(&mut self) -> FeatureSet {
            HashMap::from([(0, std::mem::take(&mut self.tail))])
        }
    }

    #[test]
    fn test_note_routing_with_duration_and_velocity() {
        let input = ramp_input(4_096, 44_100);
        let factory = SingleFactory(|| {
            Box::new(TailPlugin {
                descriptor: OutputDescriptor {
                    identifier: "notes".into(),
                    unit: "Hz".into(),
                    bin_count: 3,
                    has_duration: true,
                    sample_type: SampleType::VariableSampleRate,
                    sample_rate: 44_100.0,
                    ..Default::default()
                },
                // with an explicit duration the second value is velocity
                tail: vec![Feature {
                    timestamp: Some(RealTime::from_frame(1_000, 44_100)),
                    duration: Some(RealTime::from_frame(500, 44_100)),
                    values: vec![440.0, 64.0],
                    label: "a note".into(),
                }],
            }) as Box<dyn FeaturePlugin>
        });

        let transformer = FeatureExtractionTransformer::new(
            input as Arc<dyn AudioSource>,
            vec![transform_for("notes")],
            &factory,
        )
        .unwrap();
        let output = transformer.outputs()[0].clone();
        let handle = transformer.spawn();
        handle.join();

        let TransformOutput::Notes(model) = &output else {
            panic!("expected a note model for a durationful Hz output");
        };
        let events = model.all_events();
        assert_eq!(events.len(), 1);
        let note = &events[0];
        assert_eq!(note.frame(), 1_000);
        assert_eq!(note.value(), 440.0);
        assert_eq!(note.duration(), 500);
        assert!((note.level() - 64.0 / 127.0).abs() < 1e-6);
        assert_eq!(note.label(), "a note");
        assert_eq!(model.scale_units(), "Hz");
    }

    #[test]
    fn test_single_bin_duration_gives_regions() {
        let input = ramp_input(4_096, 44_100);
        let factory = SingleFactory(|| {
            Box::new(TailPlugin {
                descriptor: OutputDescriptor {
                    identifier: "segments".into(),
                    bin_count: 1,
                    has_duration: true,
                    sample_type: SampleType::VariableSampleRate,
                    ..Default::default()
                },
                tail: vec![Feature {
                    timestamp: Some(RealTime::from_frame(100, 44_100)),
                    duration: Some(RealTime::from_frame(50, 44_100)),
                    values: vec![7.0],
                    ..Default::default()
                }],
            }) as Box<dyn FeaturePlugin>
        });

        let transformer = FeatureExtractionTransformer::new(
            input as Arc<dyn AudioSource>,
            vec![transform_for("segments")],
            &factory,
        )
        .unwrap();
        let output = transformer.outputs()[0].clone();
        transformer.spawn().join();

        let TransformOutput::Regions(model) = &output else {
            panic!("expected a region model for a single-bin durationful output");
        };
        let events = model.all_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].frame(), 100);
        assert_eq!(events[0].duration(), 50);
        assert_eq!(events[0].value(), 7.0);
    }

    #[test]
    fn test_variable_rate_feature_without_timestamp_dropped() {
        let input = ramp_input(4_096, 44_100);
        let factory = SingleFactory(|| {
            Box::new(TailPlugin {
                descriptor: OutputDescriptor {
                    identifier: "sparse".into(),
                    bin_count: 1,
                    sample_type: SampleType::VariableSampleRate,
                    ..Default::default()
                },
                tail: vec![
                    Feature {
                        timestamp: None,
                        values: vec![1.0],
                        ..Default::default()
                    },
                    Feature {
                        timestamp: Some(RealTime::from_frame(10, 44_100)),
                        values: vec![2.0],
                        ..Default::default()
                    },
                ],
            }) as Box<dyn FeaturePlugin>
        });

        let transformer = FeatureExtractionTransformer::new(
            input as Arc<dyn AudioSource>,
            vec![transform_for("sparse")],
            &factory,
        )
        .unwrap();
        let output = transformer.outputs()[0].clone();
        transformer.spawn().join();

        let TransformOutput::TimeValues(model) = &output else {
            panic!("expected a time/value model");
        };
        let events = model.all_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value(), 2.0);
    }

    #[test]
    fn test_multi_value_policy_splits_points() {
        let input = ramp_input(4_096, 44_100);
        let factory = SingleFactory(|| {
            Box::new(TailPlugin {
                descriptor: OutputDescriptor {
                    identifier: "multi".into(),
                    bin_count: 2,
                    sample_type: SampleType::VariableSampleRate,
                    ..Default::default()
                },
                tail: vec![Feature {
                    timestamp: Some(RealTime::from_frame(5, 44_100)),
                    duration: None,
                    values: vec![1.0, 2.0],
                    label: "pair".into(),
                }],
            }) as Box<dyn FeaturePlugin>
        });

        let transformer = FeatureExtractionTransformer::new(
            input as Arc<dyn AudioSource>,
            vec![transform_for("multi")],
            &factory,
        )
        .unwrap();
        let output = transformer.outputs()[0].clone();
        transformer.spawn().join();

        let TransformOutput::TimeValues(model) = &output else {
            panic!("expected a time/value model for a variable-rate multi-bin output");
        };
        let events = model.all_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].label(), "[1] pair");
        assert_eq!(events[1].label(), "[2] pair");
    }

    #[test]
    fn test_fixed_rate_multi_bin_gives_grid() {
        let input = ramp_input(4_096, 44_100);
        let factory = SingleFactory(|| {
            Box::new(CountingPlugin::new(OutputDescriptor {
                identifier: "bins".into(),
                bin_count: 4,
                sample_type: SampleType::FixedSampleRate,
                sample_rate: 44_100.0 / 1_024.0,
                bin_names: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                ..Default::default()
            })) as Box<dyn FeaturePlugin>
        });

        let transformer = FeatureExtractionTransformer::new(
            input as Arc<dyn AudioSource>,
            vec![transform_for("bins")],
            &factory,
        )
        .unwrap();
        let output = transformer.outputs()[0].clone();
        transformer.spawn().join();

        let TransformOutput::Grid(model) = &output else {
            panic!("expected a grid model for a fixed-rate multi-bin output");
        };
        assert_eq!(model.bin_count(), 4);
        assert_eq!(model.resolution(), 1_024);
        assert_eq!(model.bin_name(1).as_deref(), Some("b"));
        assert!(model.column_count() >= 4);
        assert_eq!(model.completion(), 100);
    }

    /// A plugin speaking the pre-duration API generation.
    struct LegacyPlugin {
        tail: Vec<Feature>,
    }

    impl FeaturePlugin for LegacyPlugin {
        fn identifier(&self) -> &str {
            "legacy"
        }
        fn plugin_version(&self) -> i32 {
            1
        }
        fn api_version(&self) -> i32 {
            1
        }
        fn input_domain(&self) -> InputDomain {
            InputDomain::Time
        }
        fn output_descriptors(&self) -> Vec<OutputDescriptor> {
            vec![OutputDescriptor {
                identifier: "intervals".into(),
                bin_count: 2,
                sample_type: SampleType::VariableSampleRate,
                has_duration: false,
                ..Default::default()
            }]
        }
        fn set_parameter(&mut self, _name: &str, _value: f32) {}
        fn initialise(&mut self, _channels: usize, _step: usize, _block: usize) -> bool {
            true
        }
        fn process(&mut self, _buffers: &[Vec<f32>], _timestamp: RealTime) -> FeatureSet {
            HashMap::new()
        }
        fn remaining_features(&mut self) -> FeatureSet {
            HashMap::from([(0, std::mem::take(&mut self.tail))])
        }
    }

    #[test]
    fn test_legacy_multi_bin_variable_rate_reads_duration_from_values() {
        let input = ramp_input(4_096, 44_100);
        let factory = SingleFactory(|| {
            Box::new(LegacyPlugin {
                tail: vec![Feature {
                    timestamp: Some(RealTime::from_frame(200, 44_100)),
                    duration: None,
                    values: vec![3.0, 150.0],
                    ..Default::default()
                }],
            }) as Box<dyn FeaturePlugin>
        });

        let transformer = FeatureExtractionTransformer::new(
            input as Arc<dyn AudioSource>,
            vec![transform_for("intervals")],
            &factory,
        )
        .unwrap();
        let output = transformer.outputs()[0].clone();
        transformer.spawn().join();

        // no Hz/MIDI unit, so the durationful treatment lands on regions
        let TransformOutput::Regions(model) = &output else {
            panic!("expected a region model for a legacy multi-bin output");
        };
        let events = model.all_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].frame(), 200);
        assert_eq!(events[0].value(), 3.0);
        assert_eq!(events[0].duration(), 150);
    }

    /// Records the buffer shapes it is given.
    struct SpectrumPlugin {
        seen: Arc<Mutex<Vec<usize>>>,
        dc: Arc<Mutex<Vec<f32>>>,
    }

    impl FeaturePlugin for SpectrumPlugin {
        fn identifier(&self) -> &str {
            "spectrum"
        }
        fn plugin_version(&self) -> i32 {
            2
        }
        fn input_domain(&self) -> InputDomain {
            InputDomain::Frequency
        }
        fn output_descriptors(&self) -> Vec<OutputDescriptor> {
            vec![OutputDescriptor {
                identifier: "power".into(),
                ..Default::default()
            }]
        }
        fn set_parameter(&mut self, _name: &str, _value: f32) {}
        fn initialise(&mut self, _channels: usize, _step: usize, _block: usize) -> bool {
            true
        }
        fn process(&mut self, buffers: &[Vec<f32>], _timestamp: RealTime) -> FeatureSet {
            self.seen.lock().push(buffers[0].len());
            self.dc.lock().push(buffers[0][0]);
            HashMap::new()
        }
        fn remaining_features(&mut self) -> FeatureSet {
            HashMap::new()
        }
    }

    #[test]
    fn test_frequency_domain_blocks() {
        let env = Arc::new(RuntimeEnv::with_write_buffer_frames(2_048));
        let cache = DecodeCache::new(env, DecodeCacheConfig::default());
        cache.set_stream_format(44_100, 1);
        cache.add_samples_interleaved(&vec![0.5f32; 8_192]).unwrap();
        cache.finish().unwrap();
        let input: Arc<dyn AudioSource> = Arc::new(cache);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let dc = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let dc_in = Arc::clone(&dc);
        let factory = SingleFactory(move || {
            Box::new(SpectrumPlugin {
                seen: Arc::clone(&seen_in),
                dc: Arc::clone(&dc_in),
            }) as Box<dyn FeaturePlugin>
        });

        let mut transform = transform_for("power");
        transform.window = WindowShape::Rectangular;
        let transformer =
            FeatureExtractionTransformer::new(input, vec![transform], &factory).unwrap();
        transformer.spawn().join();

        let lengths = seen.lock().clone();
        assert!(!lengths.is_empty());
        // interleaved re/im pairs for bins 0..=block/2
        assert!(lengths.iter().all(|&len| len == 1_024 + 2));

        // away from the edges a constant 0.5 signal has DC re = 0.5 * block
        let dc_values = dc.lock().clone();
        let interior = &dc_values[2..dc_values.len() - 2];
        for &value in interior {
            assert!((value - 512.0).abs() < 1.0, "dc bin {value}");
        }
    }

    #[test]
    fn test_cancellation_completes_outputs() {
        // an input that never becomes ready keeps the worker polling
        let env = Arc::new(RuntimeEnv::with_write_buffer_frames(256));
        let cache = DecodeCache::new(env, DecodeCacheConfig::default());
        cache.set_stream_format(44_100, 1);
        cache.add_samples_interleaved(&vec![0.0f32; 1_024]).unwrap();
        let input: Arc<dyn AudioSource> = Arc::new(cache);

        let factory = SingleFactory(|| {
            Box::new(CountingPlugin::new(OutputDescriptor::default())) as Box<dyn FeaturePlugin>
        });
        let transformer =
            FeatureExtractionTransformer::new(input, vec![transform_for("")], &factory).unwrap();
        let output = transformer.outputs()[0].clone();

        let started = Instant::now();
        let handle = transformer.spawn();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());

        handle.abandon();
        handle.join();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(output.completion(), 100);

        let TransformOutput::TimeValues(model) = &output else {
            panic!("expected a time/value output");
        };
        assert_eq!(model.event_count(), 0);
    }
}
