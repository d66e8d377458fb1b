//! # Checkpoint Loading
//!
//! Reading the pretrained checkpoint directory:
//! * [`PretrainedTokenizer`] for the tokenizer and its special tokens,
//! * [`CheckpointWeights`] for a summary of the weight tensors.

pub mod tokenizer;
pub mod weights;

#[doc(inline)]
pub use tokenizer::{PretrainedTokenizer, SpecialTokens};
#[doc(inline)]
pub use weights::{CheckpointWeights, TensorInfo};

#[cfg(test)]
pub(crate) mod testing {
    use std::{fs, path::Path};

    use super::tokenizer::{TOKENIZER_CONFIG_FILE_NAME, TOKENIZER_FILE_NAME};

    pub fn write_json(
        path: &Path,
        text: &str,
    ) {
        fs::write(path, text).unwrap();
    }

    /// A five-token word-level tokenizer with `<unk>`, `<s>` and `</s>` declared.
    pub fn write_checkpoint_tokenizer(dir: &Path) {
        write_json(
            &dir.join(TOKENIZER_FILE_NAME),
            r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": null,
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {"<unk>": 0, "<s>": 1, "</s>": 2, "hello": 3, "world": 4},
    "unk_token": "<unk>"
  }
}"#,
        );
        write_json(
            &dir.join(TOKENIZER_CONFIG_FILE_NAME),
            r#"{
  "bos_token": {"__type": "AddedToken", "content": "<s>", "special": true},
  "eos_token": "</s>",
  "unk_token": "<unk>",
  "pad_token": null,
  "model_max_length": 2048
}"#,
        );
    }

    /// Write a float32 safetensors file of zeros.
    pub fn write_safetensors(
        path: &Path,
        tensors: &[(&str, Vec<usize>)],
    ) {
        let mut entries = Vec::new();
        let mut offset = 0usize;
        for (name, shape) in tensors {
            let size = 4 * shape.iter().product::<usize>();
            entries.push(format!(
                r#""{name}": {{"dtype": "F32", "shape": {shape:?}, "data_offsets": [{offset}, {}]}}"#,
                offset + size
            ));
            offset += size;
        }
        let header = format!("{{{}}}", entries.join(", "));

        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header.as_bytes());
        bytes.resize(bytes.len() + offset, 0);
        fs::write(path, bytes).unwrap();
    }
}
