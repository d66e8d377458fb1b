//! # Pretrained Tokenizer
//!
//! Loads a Hugging Face tokenizer directory:
//! * `tokenizer.json` via the `tokenizers` crate,
//! * special tokens from `tokenizer_config.json`,
//!   overlaid by `special_tokens_map.json`.

use std::{collections::HashMap, fs, path::Path};

use serde::{Deserialize, Deserializer};
use tokenizers::Tokenizer;

use crate::errors::{MZResult, MobilizeError};

/// Serialized tokenizer file.
pub const TOKENIZER_FILE_NAME: &str = "tokenizer.json";

/// Tokenizer config file; source of special tokens.
pub const TOKENIZER_CONFIG_FILE_NAME: &str = "tokenizer_config.json";

/// Special tokens map; overrides the tokenizer config.
pub const SPECIAL_TOKENS_MAP_FILE_NAME: &str = "special_tokens_map.json";

/// A special token entry: either `"<s>"` or `{"content": "<s>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SpecialTokenEntry {
    Content(String),
    Added { content: String },
}

impl SpecialTokenEntry {
    fn into_content(self) -> String {
        match self {
            SpecialTokenEntry::Content(content) => content,
            SpecialTokenEntry::Added { content } => content,
        }
    }
}

/// Present fields map to `Some`, so an explicit `null` is kept as `Some(None)`.
fn present<'de, D>(de: D) -> Result<Option<Option<SpecialTokenEntry>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<SpecialTokenEntry>::deserialize(de).map(Some)
}

/// Special token fields of one file; the outer `Option` is key presence.
#[derive(Debug, Default, Deserialize)]
struct SpecialTokenFile {
    #[serde(default, deserialize_with = "present")]
    bos_token: Option<Option<SpecialTokenEntry>>,
    #[serde(default, deserialize_with = "present")]
    eos_token: Option<Option<SpecialTokenEntry>>,
    #[serde(default, deserialize_with = "present")]
    unk_token: Option<Option<SpecialTokenEntry>>,
    #[serde(default, deserialize_with = "present")]
    pad_token: Option<Option<SpecialTokenEntry>>,
}

impl SpecialTokenFile {
    fn read_optional(path: &Path) -> MZResult<Self> {
        if !path.exists() {
            log::debug!("no {}", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn overlay(
        self,
        over: Self,
    ) -> SpecialTokens {
        type Field = Option<Option<SpecialTokenEntry>>;
        let pick = |over: Field, base: Field| {
            over.or(base)
                .flatten()
                .map(SpecialTokenEntry::into_content)
        };
        SpecialTokens {
            bos: pick(over.bos_token, self.bos_token),
            eos: pick(over.eos_token, self.eos_token),
            unk: pick(over.unk_token, self.unk_token),
            pad: pick(over.pad_token, self.pad_token),
        }
    }
}

/// Special token strings declared by a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecialTokens {
    /// Beginning-of-sequence token.
    pub bos: Option<String>,

    /// End-of-sequence token.
    pub eos: Option<String>,

    /// Unknown token.
    pub unk: Option<String>,

    /// Padding token.
    pub pad: Option<String>,
}

/// A checkpoint tokenizer with resolved special token ids.
#[derive(Debug, Clone)]
pub struct PretrainedTokenizer {
    tokenizer: Tokenizer,
    special_tokens: SpecialTokens,
    bos_token_id: Option<u32>,
    eos_token_id: Option<u32>,
    unk_token_id: Option<u32>,
    pad_token_id: Option<u32>,
}

impl PretrainedTokenizer {
    /// Load the tokenizer files from a checkpoint directory.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> MZResult<Self> {
        let dir = dir.as_ref();

        let path = dir.join(TOKENIZER_FILE_NAME);
        if !path.exists() {
            return Err(MobilizeError::MissingFile { path });
        }
        let tokenizer = Tokenizer::from_file(&path)?;

        let config = SpecialTokenFile::read_optional(&dir.join(TOKENIZER_CONFIG_FILE_NAME))?;
        let map = SpecialTokenFile::read_optional(&dir.join(SPECIAL_TOKENS_MAP_FILE_NAME))?;

        Ok(Self::new(tokenizer, config.overlay(map)))
    }

    /// Wrap a loaded tokenizer and resolve its special tokens.
    ///
    /// A special token missing from the vocabulary resolves to the unk id.
    pub fn new(
        tokenizer: Tokenizer,
        special_tokens: SpecialTokens,
    ) -> Self {
        let unk_token_id = special_tokens
            .unk
            .as_deref()
            .and_then(|t| tokenizer.token_to_id(t));
        let resolve = |token: &Option<String>| {
            token.as_deref().and_then(|t| match tokenizer.token_to_id(t) {
                Some(id) => Some(id),
                None => {
                    log::warn!("special token {t:?} is not in the vocabulary; using unk");
                    unk_token_id
                }
            })
        };

        let bos_token_id = resolve(&special_tokens.bos);
        let eos_token_id = resolve(&special_tokens.eos);
        let pad_token_id = resolve(&special_tokens.pad);

        Self {
            tokenizer,
            special_tokens,
            bos_token_id,
            eos_token_id,
            unk_token_id,
            pad_token_id,
        }
    }

    /// The underlying tokenizer.
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// The declared special token strings.
    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special_tokens
    }

    /// Base vocabulary size, excluding added tokens.
    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(false)
    }

    /// The full vocabulary, including added tokens.
    pub fn vocab(&self) -> HashMap<String, u32> {
        self.tokenizer.get_vocab(true)
    }

    /// Beginning-of-sequence id.
    pub fn bos_token_id(&self) -> Option<u32> {
        self.bos_token_id
    }

    /// End-of-sequence id.
    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token_id
    }

    /// Unknown-token id.
    pub fn unk_token_id(&self) -> Option<u32> {
        self.unk_token_id
    }

    /// Padding id.
    pub fn pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;
    use crate::checkpoint::testing::{write_checkpoint_tokenizer, write_json};

    #[test]
    fn test_missing_tokenizer_file() {
        let dir = TempDir::new("mobilize_tok").unwrap();
        match PretrainedTokenizer::from_dir(dir.path()) {
            Err(MobilizeError::MissingFile { path }) => {
                assert!(path.ends_with(TOKENIZER_FILE_NAME));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_special_tokens_from_config() {
        let dir = TempDir::new("mobilize_tok").unwrap();
        write_checkpoint_tokenizer(dir.path());

        let tok = PretrainedTokenizer::from_dir(dir.path()).unwrap();
        assert_eq!(tok.vocab_size(), 5);
        assert_eq!(tok.unk_token_id(), Some(0));
        assert_eq!(tok.bos_token_id(), Some(1));
        assert_eq!(tok.eos_token_id(), Some(2));
        assert_eq!(tok.pad_token_id(), None);
        assert_eq!(tok.vocab().get("hello"), Some(&3));
    }

    #[test]
    fn test_special_tokens_map_overrides() {
        let dir = TempDir::new("mobilize_tok").unwrap();
        write_checkpoint_tokenizer(dir.path());
        write_json(
            &dir.path().join(SPECIAL_TOKENS_MAP_FILE_NAME),
            r#"{"pad_token": {"content": "</s>", "lstrip": false}, "bos_token": "world"}"#,
        );

        let tok = PretrainedTokenizer::from_dir(dir.path()).unwrap();
        assert_eq!(tok.special_tokens().pad.as_deref(), Some("</s>"));
        assert_eq!(tok.pad_token_id(), Some(2));
        assert_eq!(tok.bos_token_id(), Some(4));
        assert_eq!(tok.eos_token_id(), Some(2));
    }

    #[test]
    fn test_special_tokens_map_null_clears() {
        let dir = TempDir::new("mobilize_tok").unwrap();
        write_checkpoint_tokenizer(dir.path());
        write_json(
            &dir.path().join(TOKENIZER_CONFIG_FILE_NAME),
            r#"{"bos_token": "<s>", "eos_token": "</s>", "pad_token": "</s>"}"#,
        );
        write_json(
            &dir.path().join(SPECIAL_TOKENS_MAP_FILE_NAME),
            r#"{"pad_token": null, "unk_token": "<unk>"}"#,
        );

        let tok = PretrainedTokenizer::from_dir(dir.path()).unwrap();
        assert_eq!(tok.special_tokens().pad, None);
        assert_eq!(tok.pad_token_id(), None);
        assert_eq!(tok.eos_token_id(), Some(2));
        assert_eq!(tok.unk_token_id(), Some(0));
    }

    #[test]
    fn test_unknown_special_token_maps_to_unk() {
        let dir = TempDir::new("mobilize_tok").unwrap();
        write_checkpoint_tokenizer(dir.path());
        write_json(
            &dir.path().join(SPECIAL_TOKENS_MAP_FILE_NAME),
            r#"{"pad_token": "[PAD]"}"#,
        );

        let tok = PretrainedTokenizer::from_dir(dir.path()).unwrap();
        assert_eq!(tok.pad_token_id(), Some(0));
    }

    #[test]
    fn test_null_entries_are_undefined() {
        let dir = TempDir::new("mobilize_tok").unwrap();
        write_checkpoint_tokenizer(dir.path());
        write_json(
            &dir.path().join(TOKENIZER_CONFIG_FILE_NAME),
            r#"{"bos_token": null, "unk_token": "<unk>", "model_max_length": 2048}"#,
        );

        let tok = PretrainedTokenizer::from_dir(dir.path()).unwrap();
        assert_eq!(tok.bos_token_id(), None);
        assert_eq!(tok.eos_token_id(), None);
        assert_eq!(tok.unk_token_id(), Some(0));
    }
}
