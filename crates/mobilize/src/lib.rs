//! # `mobilize` Checkpoint to Mobile Converter
//!
//! Converts a pretrained causal language model checkpoint into a compact
//! bundle for on-device inference:
//! * a float16-quantized TensorFlow Lite model,
//! * `tokenizer_config.json` with the special token ids,
//! * `vocab.json` with the full vocabulary.
//!
//! The checkpoint's transformer is replaced by a small recurrent network
//! (embedding, stacked LSTM, dense projection) that shares only the
//! vocabulary size with the source. The checkpoint weights are read and
//! summarized, but are not transferred.
//!
//! See:
//! * [`bundle::convert`] for the end-to-end pipeline,
//! * [`config::ConversionOptions`] for its options,
//! * [`checkpoint`] for tokenizer and weight loading,
//! * [`model`] for the mobile network,
//! * [`tflite`] for the model writer and reader,
//! * [`export`] for the tokenizer records.
//!
//! ## Converting a Checkpoint
//!
//! ```rust,no_run
//! use mobilize::{bundle::convert, config::ConversionOptions};
//!
//! let options = ConversionOptions::default()
//!     .with_checkpoint_dir("TinyLlama-1.1B-step-50K-105b")
//!     .with_output_dir("converted_model")
//!     .with_seed(Some(0));
//!
//! let report = convert(&options)?;
//! println!("{} bytes", report.model_bytes);
//! # Ok::<(), mobilize::errors::MobilizeError>(())
//! ```
#![warn(missing_docs, unused)]

pub mod bundle;
pub mod checkpoint;
pub mod config;
pub mod errors;
pub mod export;
pub mod model;
pub mod tflite;

#[doc(inline)]
pub use bundle::{ConversionReport, ConvertedBundle, convert};
#[doc(inline)]
pub use config::ConversionOptions;
#[doc(inline)]
pub use errors::{MZResult, MobilizeError};
