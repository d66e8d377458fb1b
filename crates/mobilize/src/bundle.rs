//! # Mobile Bundle
//!
//! The conversion pipeline and the three files it produces:
//! * [`MODEL_FILE_NAME`], the TFLite model,
//! * [`TOKENIZER_CONFIG_FILE_NAME`], a [`TokenizerConfigRecord`],
//! * [`VOCAB_FILE_NAME`], a [`VocabRecord`].
//!
//! Rerunning [`convert`] overwrites the same files.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;

use crate::{
    checkpoint::{CheckpointWeights, PretrainedTokenizer},
    config::ConversionOptions,
    errors::{MZResult, MobilizeError},
    export::{TokenizerConfigRecord, VocabRecord, write_json_file},
    model::{MobileModel, TraceReport},
    tflite::{TensorType, TfliteModelInfo},
};

/// Converted model file.
pub const MODEL_FILE_NAME: &str = "tinyllama_model.tflite";

/// Tokenizer metadata file.
pub const TOKENIZER_CONFIG_FILE_NAME: &str = "tokenizer_config.json";

/// Vocabulary file.
pub const VOCAB_FILE_NAME: &str = "vocab.json";

/// Paths of the bundle files inside an output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePaths {
    /// The TFLite model.
    pub model: PathBuf,

    /// The tokenizer config record.
    pub tokenizer_config: PathBuf,

    /// The vocabulary record.
    pub vocab: PathBuf,
}

impl BundlePaths {
    /// Paths under `dir`.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Self {
            model: dir.join(MODEL_FILE_NAME),
            tokenizer_config: dir.join(TOKENIZER_CONFIG_FILE_NAME),
            vocab: dir.join(VOCAB_FILE_NAME),
        }
    }
}

/// What a [`convert`] run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    /// Written files.
    pub paths: BundlePaths,

    /// Size of the model file.
    pub model_bytes: usize,

    /// Storage type of the model weights.
    pub weight_type: TensorType,

    /// Parameters of the mobile model.
    pub num_parameters: usize,

    /// Tensors found in the checkpoint.
    pub checkpoint_tensors: usize,

    /// Parameters found in the checkpoint.
    pub checkpoint_parameters: usize,

    /// Result of the dummy trace.
    pub trace: TraceReport,

    /// The written tokenizer record.
    pub tokenizer_config: TokenizerConfigRecord,

    /// Number of vocabulary entries written.
    pub vocab_len: usize,
}

fn write_bytes(
    path: &Path,
    bytes: &[u8],
) -> MZResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(bytes)?;
    writer.flush()?;
    Ok(())
}

/// Convert a checkpoint into a mobile bundle.
///
/// The checkpoint weights are loaded and summarized but not transferred;
/// the mobile model is freshly initialized.
pub fn convert(options: &ConversionOptions) -> MZResult<ConversionReport> {
    options.model.validate()?;
    if options.trace_len == 0 {
        return Err(MobilizeError::InvalidConfig(
            "trace length must be non-zero".to_string(),
        ));
    }
    let weight_type = options.converter.weight_type()?;

    fs::create_dir_all(&options.output_dir)?;
    let paths = BundlePaths::new(&options.output_dir);

    log::info!("loading tokenizer from {}", options.checkpoint_dir.display());
    let tokenizer = PretrainedTokenizer::from_dir(&options.checkpoint_dir)?;
    log::info!(
        "tokenizer: vocab_size={} (with added tokens: {})",
        tokenizer.vocab_size(),
        tokenizer.tokenizer().get_vocab_size(true)
    );

    log::info!("loading checkpoint weights");
    let (checkpoint_tensors, checkpoint_parameters) = {
        let weights = CheckpointWeights::load(&options.checkpoint_dir)?;
        if weights.is_pickled() {
            log::warn!("checkpoint weights are pickled; reporting no tensors");
        }
        log::info!(
            "checkpoint: {} tensors, {} parameters, {} shard(s)",
            weights.num_tensors(),
            weights.num_parameters(),
            weights.shards().len()
        );
        (weights.num_tensors(), weights.num_parameters())
    };

    if tokenizer.vocab_size() != options.model.vocab_size {
        log::warn!(
            "model vocab_size {} differs from tokenizer vocab_size {}",
            options.model.vocab_size,
            tokenizer.vocab_size()
        );
    }

    log::info!("building mobile model: {:?}", options.model);
    let model = MobileModel::seeded(options.model, options.seed)?;
    let trace = model.trace(options.trace_len)?;
    log::info!(
        "traced: input_len={} output_shape={:?}",
        trace.input_len,
        trace.output_shape
    );

    log::info!("converting to TFLite with {weight_type:?} weights");
    let model_bytes = options.converter.convert(&model)?;
    write_bytes(&paths.model, &model_bytes)?;
    log::info!("wrote {} ({} bytes)", paths.model.display(), model_bytes.len());

    let tokenizer_config = TokenizerConfigRecord::from_tokenizer(&tokenizer);
    write_json_file(&paths.tokenizer_config, &tokenizer_config)?;
    log::info!("wrote {}", paths.tokenizer_config.display());

    let vocab = VocabRecord::from_tokenizer(&tokenizer);
    write_json_file(&paths.vocab, &vocab)?;
    log::info!("wrote {} ({} tokens)", paths.vocab.display(), vocab.len());

    Ok(ConversionReport {
        paths,
        model_bytes: model_bytes.len(),
        weight_type,
        num_parameters: model.num_parameters(),
        checkpoint_tensors,
        checkpoint_parameters,
        trace,
        tokenizer_config,
        vocab_len: vocab.len(),
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> MZResult<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn require(path: &Path) -> MZResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(MobilizeError::MissingFile {
            path: path.to_path_buf(),
        })
    }
}

/// Overview of a converted bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSummary {
    /// Model file size.
    pub model_bytes: usize,

    /// Model description string.
    pub description: Option<String>,

    /// Schema version.
    pub version: u32,

    /// Tensors in the main subgraph.
    pub num_tensors: usize,

    /// Operator counts by schema name.
    pub operator_counts: BTreeMap<String, usize>,

    /// Input tensor shape signatures (falling back to the static shape).
    pub input_shapes: Vec<Vec<i32>>,

    /// Output tensor shape signatures (falling back to the static shape).
    pub output_shapes: Vec<Vec<i32>>,

    /// Total bytes of constant buffers.
    pub weight_bytes: usize,

    /// Whether any constant is stored as float16.
    pub float16_weights: bool,

    /// The tokenizer record.
    pub tokenizer_config: TokenizerConfigRecord,

    /// Number of vocabulary entries.
    pub vocab_len: usize,
}

/// A bundle read back from an output directory.
#[derive(Debug, Clone)]
pub struct ConvertedBundle {
    paths: BundlePaths,
    model: Vec<u8>,
    tokenizer_config: TokenizerConfigRecord,
    vocab: VocabRecord,
}

impl ConvertedBundle {
    /// Read the three bundle files.
    pub fn load<P: AsRef<Path>>(dir: P) -> MZResult<Self> {
        let paths = BundlePaths::new(dir);
        require(&paths.model)?;
        require(&paths.tokenizer_config)?;
        require(&paths.vocab)?;

        Ok(Self {
            model: fs::read(&paths.model)?,
            tokenizer_config: read_json(&paths.tokenizer_config)?,
            vocab: read_json(&paths.vocab)?,
            paths,
        })
    }

    /// The file paths.
    pub fn paths(&self) -> &BundlePaths {
        &self.paths
    }

    /// The raw model bytes.
    pub fn model_bytes(&self) -> &[u8] {
        &self.model
    }

    /// The tokenizer record.
    pub fn tokenizer_config(&self) -> &TokenizerConfigRecord {
        &self.tokenizer_config
    }

    /// The vocabulary.
    pub fn vocab(&self) -> &VocabRecord {
        &self.vocab
    }

    /// Parse the model.
    pub fn model_info(&self) -> MZResult<TfliteModelInfo<'_>> {
        TfliteModelInfo::parse(&self.model)
    }

    /// Check the bundle is self-consistent.
    ///
    /// * the model is non-empty and parses,
    /// * every defined special id is in the vocabulary.
    pub fn verify(&self) -> MZResult<()> {
        if self.model.is_empty() {
            return Err(MobilizeError::MalformedModel(format!(
                "{} is empty",
                self.paths.model.display()
            )));
        }
        self.model_info()?.main_subgraph()?;

        for id in self.tokenizer_config.special_ids() {
            if !self.vocab.contains_id(id) {
                return Err(MobilizeError::InvalidConfig(format!(
                    "special token id {id} is not in {}",
                    self.paths.vocab.display()
                )));
            }
        }
        Ok(())
    }

    /// Summarize the bundle.
    pub fn summary(&self) -> MZResult<BundleSummary> {
        let info = self.model_info()?;
        let subgraph = info.main_subgraph()?;

        let mut operator_counts = BTreeMap::new();
        for op in info.operator_sequence(0)? {
            *operator_counts.entry(op.name().to_string()).or_insert(0) += 1;
        }

        let shapes = |indices: &[i32]| {
            indices
                .iter()
                .filter_map(|&i| subgraph.tensors.get(i as usize))
                .map(|t| t.shape_signature.clone().unwrap_or_else(|| t.shape.clone()))
                .collect::<Vec<_>>()
        };

        Ok(BundleSummary {
            model_bytes: self.model.len(),
            description: info.description.clone(),
            version: info.version,
            num_tensors: subgraph.tensors.len(),
            operator_counts,
            input_shapes: shapes(&subgraph.inputs),
            output_shapes: shapes(&subgraph.outputs),
            weight_bytes: info.total_buffer_bytes(),
            float16_weights: subgraph
                .tensors
                .iter()
                .any(|t| t.tensor_type == TensorType::Float16 as i8),
            tokenizer_config: self.tokenizer_config,
            vocab_len: self.vocab.len(),
        })
    }
}
