//! # Tokenizer Records
//!
//! The JSON records written next to the converted model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize, Serializer, ser::SerializeMap};

use crate::checkpoint::PretrainedTokenizer;

/// Value written for `pad_token_id` when no pad token is defined.
pub const NO_PAD_TOKEN_ID: i64 = -1;

/// Token metadata consumed by the mobile runtime.
///
/// Keys serialize in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerConfigRecord {
    /// Base vocabulary size, excluding added tokens.
    pub vocab_size: usize,

    /// Beginning-of-sequence id, or `null`.
    pub bos_token_id: Option<u32>,

    /// End-of-sequence id, or `null`.
    pub eos_token_id: Option<u32>,

    /// Unknown-token id, or `null`.
    pub unk_token_id: Option<u32>,

    /// Padding id, or [`NO_PAD_TOKEN_ID`].
    pub pad_token_id: i64,
}

impl TokenizerConfigRecord {
    /// Build a record from explicit ids.
    pub fn new(
        vocab_size: usize,
        bos_token_id: Option<u32>,
        eos_token_id: Option<u32>,
        unk_token_id: Option<u32>,
        pad_token_id: Option<u32>,
    ) -> Self {
        Self {
            vocab_size,
            bos_token_id,
            eos_token_id,
            unk_token_id,
            pad_token_id: pad_token_id.map_or(NO_PAD_TOKEN_ID, i64::from),
        }
    }

    /// Build a record from a loaded tokenizer.
    pub fn from_tokenizer(tokenizer: &PretrainedTokenizer) -> Self {
        Self::new(
            tokenizer.vocab_size(),
            tokenizer.bos_token_id(),
            tokenizer.eos_token_id(),
            tokenizer.unk_token_id(),
            tokenizer.pad_token_id(),
        )
    }

    /// The pad id, if one is defined.
    pub fn pad_token(&self) -> Option<u32> {
        u32::try_from(self.pad_token_id).ok()
    }

    /// All defined special ids.
    pub fn special_ids(&self) -> Vec<u32> {
        [
            self.bos_token_id,
            self.eos_token_id,
            self.unk_token_id,
            self.pad_token(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// The full token-string to id vocabulary.
///
/// Entries serialize in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "HashMap<String, u32>")]
pub struct VocabRecord {
    entries: Vec<(String, u32)>,
}

impl From<HashMap<String, u32>> for VocabRecord {
    fn from(map: HashMap<String, u32>) -> Self {
        let mut entries: Vec<(String, u32)> = map.into_iter().collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Self { entries }
    }
}

impl VocabRecord {
    /// Build a record from a loaded tokenizer, including added tokens.
    pub fn from_tokenizer(tokenizer: &PretrainedTokenizer) -> Self {
        tokenizer.vocab().into()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending id order.
    pub fn entries(&self) -> &[(String, u32)] {
        &self.entries
    }

    /// Whether some token maps to `id`.
    pub fn contains_id(
        &self,
        id: u32,
    ) -> bool {
        self.entries
            .binary_search_by(|(_, probe)| probe.cmp(&id))
            .is_ok()
    }

    /// Rebuild the token to id map.
    pub fn to_map(&self) -> HashMap<String, u32> {
        self.entries.iter().cloned().collect()
    }
}

impl Serialize for VocabRecord {
    fn serialize<S>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (token, id) in &self.entries {
            map.serialize_entry(token, id)?;
        }
        map.end()
    }
}
