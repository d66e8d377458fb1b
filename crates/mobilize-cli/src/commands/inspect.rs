use std::path::PathBuf;

use mobilize::{bundle::ConvertedBundle, config::DEFAULT_OUTPUT_DIR};

use crate::logging::LogArgs;

/// Args for the inspect command.
#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// Bundle directory to inspect.
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    #[clap(flatten)]
    pub logging: LogArgs,
}

impl InspectArgs {
    /// Run the inspect command.
    pub fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.logging.setup_logging(2)?;

        log::info!("loading bundle from {}", self.output_dir.display());
        let bundle = ConvertedBundle::load(&self.output_dir)?;
        bundle.verify()?;
        let summary = bundle.summary()?;

        println!("model: {}", bundle.paths().model.display());
        println!("  size:        {} bytes", summary.model_bytes);
        println!("  version:     {}", summary.version);
        if let Some(description) = &summary.description {
            println!("  description: {description}");
        }
        println!("  tensors:     {}", summary.num_tensors);
        let precision = if summary.float16_weights {
            " (float16)"
        } else {
            ""
        };
        println!("  weights:     {} bytes{precision}", summary.weight_bytes);
        println!("  inputs:      {:?}", summary.input_shapes);
        println!("  outputs:     {:?}", summary.output_shapes);
        println!("  operators:");
        for (name, count) in &summary.operator_counts {
            println!("    {name}: {count}");
        }

        let config = &summary.tokenizer_config;
        println!("tokenizer config: {}", bundle.paths().tokenizer_config.display());
        println!("  vocab_size:   {}", config.vocab_size);
        println!("  bos_token_id: {:?}", config.bos_token_id);
        println!("  eos_token_id: {:?}", config.eos_token_id);
        println!("  unk_token_id: {:?}", config.unk_token_id);
        println!("  pad_token_id: {}", config.pad_token_id);
        println!(
            "vocab: {} ({} tokens)",
            bundle.paths().vocab.display(),
            summary.vocab_len
        );

        Ok(())
    }
}
