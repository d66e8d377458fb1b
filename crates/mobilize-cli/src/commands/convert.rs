use std::path::PathBuf;

use mobilize::{
    bundle::convert,
    config::{ConversionOptions, DEFAULT_CHECKPOINT_DIR, DEFAULT_OUTPUT_DIR},
    model::{DEFAULT_HIDDEN_SIZE, DEFAULT_NUM_LAYERS, DEFAULT_VOCAB_SIZE, MobileModelConfig},
    tflite::TfliteConverter,
};

use crate::logging::LogArgs;

/// Storage precision of the converted weights.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum Precision {
    /// Float16 weights, widened by DEQUANTIZE ops.
    Float16,

    /// Plain float32 weights.
    Float32,
}

impl Precision {
    fn converter(self) -> TfliteConverter {
        match self {
            Precision::Float16 => TfliteConverter::float16(),
            Precision::Float32 => TfliteConverter::new(),
        }
    }
}

/// Args for the convert command.
#[derive(clap::Args, Debug)]
pub struct ConvertArgs {
    /// Pretrained checkpoint directory.
    #[arg(long, default_value = DEFAULT_CHECKPOINT_DIR)]
    checkpoint_dir: PathBuf,

    /// Bundle output directory; created if absent.
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Mobile model vocabulary size.
    #[arg(long, default_value_t = DEFAULT_VOCAB_SIZE)]
    vocab_size: usize,

    /// Embedding and LSTM width.
    #[arg(long, default_value_t = DEFAULT_HIDDEN_SIZE)]
    hidden_size: usize,

    /// Number of stacked LSTM layers.
    #[arg(long, default_value_t = DEFAULT_NUM_LAYERS)]
    num_layers: usize,

    /// Initialization seed; random when absent.
    #[arg(long)]
    seed: Option<u64>,

    /// Weight precision.
    #[arg(long, value_enum, default_value = "float16")]
    precision: Precision,

    #[clap(flatten)]
    pub logging: LogArgs,
}

impl ConvertArgs {
    fn options(&self) -> ConversionOptions {
        ConversionOptions::default()
            .with_checkpoint_dir(&self.checkpoint_dir)
            .with_output_dir(&self.output_dir)
            .with_model(
                MobileModelConfig::default()
                    .with_vocab_size(self.vocab_size)
                    .with_hidden_size(self.hidden_size)
                    .with_num_layers(self.num_layers),
            )
            .with_converter(self.precision.converter())
            .with_seed(self.seed)
    }

    /// Run the convert command.
    pub fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.logging.setup_logging(3)?;

        let report = convert(&self.options())?;

        println!("model:            {}", report.paths.model.display());
        println!("  size:           {} bytes", report.model_bytes);
        println!("  weights:        {:?}", report.weight_type);
        println!("  parameters:     {}", report.num_parameters);
        println!("tokenizer config: {}", report.paths.tokenizer_config.display());
        println!(
            "vocab:            {} ({} tokens)",
            report.paths.vocab.display(),
            report.vocab_len
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use mobilize::tflite::TensorType;

    use super::*;

    #[derive(clap::Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        args: ConvertArgs,
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["mobilize"]);
        let options = cli.args.options();
        assert_eq!(options, ConversionOptions::default());
    }

    #[test]
    fn test_flags() {
        let cli = Cli::parse_from([
            "mobilize",
            "--checkpoint-dir",
            "ckpt",
            "--output-dir",
            "out",
            "--vocab-size",
            "100",
            "--num-layers",
            "1",
            "--seed",
            "7",
            "--precision",
            "float32",
            "-vv",
        ]);
        let options = cli.args.options();
        assert_eq!(options.checkpoint_dir, PathBuf::from("ckpt"));
        assert_eq!(options.output_dir, PathBuf::from("out"));
        assert_eq!(options.model.vocab_size, 100);
        assert_eq!(options.model.num_layers, 1);
        assert_eq!(options.seed, Some(7));
        assert_eq!(options.converter.weight_type().unwrap(), TensorType::Float32);
    }
}
