//! # Conversion Options

use std::path::{Path, PathBuf};

use crate::{model::MobileModelConfig, tflite::TfliteConverter};

/// Default checkpoint directory.
pub const DEFAULT_CHECKPOINT_DIR: &str = "TinyLlama-1.1B-step-50K-105b";

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "converted_model";

/// Default length of the dummy trace input.
pub const DEFAULT_TRACE_LEN: usize = 1;

/// Options for [`convert`](crate::bundle::convert).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversionOptions {
    /// Directory holding the pretrained checkpoint.
    pub checkpoint_dir: PathBuf,

    /// Directory the bundle is written to; created if absent.
    pub output_dir: PathBuf,

    /// Shape of the mobile model.
    pub model: MobileModelConfig,

    /// TFLite converter settings.
    pub converter: TfliteConverter,

    /// Initialization seed; `None` seeds from the OS.
    pub seed: Option<u64>,

    /// Length of the dummy sequence used to trace the model.
    pub trace_len: usize,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            model: MobileModelConfig::default(),
            converter: TfliteConverter::float16(),
            seed: None,
            trace_len: DEFAULT_TRACE_LEN,
        }
    }
}

impl ConversionOptions {
    /// Set the checkpoint directory.
    pub fn with_checkpoint_dir<P: AsRef<Path>>(
        mut self,
        checkpoint_dir: P,
    ) -> Self {
        self.checkpoint_dir = checkpoint_dir.as_ref().to_path_buf();
        self
    }

    /// Set the output directory.
    pub fn with_output_dir<P: AsRef<Path>>(
        mut self,
        output_dir: P,
    ) -> Self {
        self.output_dir = output_dir.as_ref().to_path_buf();
        self
    }

    /// Set the model shape.
    pub fn with_model(
        mut self,
        model: MobileModelConfig,
    ) -> Self {
        self.model = model;
        self
    }

    /// Set the converter.
    pub fn with_converter(
        mut self,
        converter: TfliteConverter,
    ) -> Self {
        self.converter = converter;
        self
    }

    /// Set the seed.
    pub fn with_seed(
        mut self,
        seed: Option<u64>,
    ) -> Self {
        self.seed = seed;
        self
    }

    /// Set the trace length.
    pub fn with_trace_len(
        mut self,
        trace_len: usize,
    ) -> Self {
        self.trace_len = trace_len;
        self
    }
}
