//! Text codecs for turning token windows back into text
//!
//! Only the renderer decodes; the analysis itself works on token ids.
//! Two vocabularies are supported:
//! - character-level vocabularies stored as `meta.json` next to the token file
//!   (`stoi` / `itos` maps)
//! - HuggingFace `tokenizer.json` files, by default GPT-2's from the hub

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::Deserialize;
use tokenizers::Tokenizer;
use tracing::info;

const GPT2_REPO: &str = "openai-community/gpt2";

/// Reversible mapping between text and token ids
pub trait TextCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// Decode every token on its own; undecodable ids render as `<id>`
    fn decode_each(&self, ids: &[u32]) -> Vec<String> {
        ids.iter()
            .map(|&id| self.decode(&[id]).unwrap_or_else(|_| format!("<{id}>")))
            .collect()
    }
}

/// HuggingFace tokenizer codec
pub struct HfCodec {
    tokenizer: Tokenizer,
}

impl HfCodec {
    /// Load a `tokenizer.json`
    pub fn from_file(path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Tokenizer error for {}: {e}", path.display()))?;
        Ok(Self { tokenizer })
    }

    /// Download GPT-2's `tokenizer.json` from HuggingFace
    pub fn gpt2() -> Result<Self> {
        info!("No vocabulary given, assuming GPT-2 encodings");
        let api = Api::new().context("Failed to create HuggingFace API")?;
        let repo = api.repo(Repo::new(GPT2_REPO.to_string(), RepoType::Model));
        let path = repo
            .get("tokenizer.json")
            .context("Failed to download GPT-2 tokenizer.json")?;
        Self::from_file(&path)
    }
}

impl TextCodec for HfCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        self.tokenizer
            .decode(ids, false)
            .map_err(|e| anyhow::anyhow!("Decoding failed: {e}"))
    }
}

/// Raw `meta.json` structure
#[derive(Debug, Deserialize)]
struct CharMeta {
    stoi: HashMap<String, u32>,
    itos: HashMap<String, String>,
}

/// Character-level codec
#[derive(Debug, Clone)]
pub struct CharCodec {
    stoi: HashMap<char, u32>,
    itos: HashMap<u32, char>,
}

impl CharCodec {
    /// Load a character vocabulary from `meta.json`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let meta: CharMeta = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Self::from_meta(meta)
    }

    /// Build from the characters of a vocabulary, in id order
    pub fn from_chars(chars: &str) -> Self {
        let itos: HashMap<u32, char> = chars
            .chars()
            .enumerate()
            .map(|(i, c)| (i as u32, c))
            .collect();
        let stoi = itos.iter().map(|(&i, &c)| (c, i)).collect();
        Self { stoi, itos }
    }

    fn from_meta(meta: CharMeta) -> Result<Self> {
        let stoi = meta
            .stoi
            .into_iter()
            .map(|(s, i)| Ok((single_char(&s)?, i)))
            .collect::<Result<_>>()?;
        let itos = meta
            .itos
            .into_iter()
            .map(|(i, s)| {
                let id: u32 = i
                    .parse()
                    .with_context(|| format!("Invalid token id '{i}' in itos"))?;
                Ok((id, single_char(&s)?))
            })
            .collect::<Result<_>>()?;
        Ok(Self { stoi, itos })
    }

    /// Vocabulary size
    pub fn len(&self) -> usize {
        self.itos.len()
    }

    /// Check if the vocabulary is empty
    pub fn is_empty(&self) -> bool {
        self.itos.is_empty()
    }
}

fn single_char(s: &str) -> Result<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => anyhow::bail!("Vocabulary entry '{s}' is not a single character"),
    }
}

impl TextCodec for CharCodec {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        text.chars()
            .map(|c| {
                self.stoi
                    .get(&c)
                    .copied()
                    .ok_or_else(|| anyhow::anyhow!("Character {c:?} not in vocabulary"))
            })
            .collect()
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        ids.iter()
            .map(|id| {
                self.itos
                    .get(id)
                    .copied()
                    .ok_or_else(|| anyhow::anyhow!("Token id {id} not in vocabulary"))
            })
            .collect()
    }
}

/// Pick the codec for a run.
///
/// An explicit `tokenizer.json` wins; otherwise a `meta.json` beside the
/// token data selects a character vocabulary; otherwise GPT-2 is assumed.
pub fn load_codec(tokenizer: Option<&Path>, data_dir: &Path) -> Result<Box<dyn TextCodec>> {
    if let Some(path) = tokenizer {
        info!("Loading tokenizer from {}", path.display());
        return Ok(Box::new(HfCodec::from_file(path)?));
    }
    let meta_path = data_dir.join("meta.json");
    if meta_path.exists() {
        info!("Loading character vocabulary from {}", meta_path.display());
        return Ok(Box::new(CharCodec::load(&meta_path)?));
    }
    Ok(Box::new(HfCodec::gpt2()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_codec_round_trip() {
        let codec = CharCodec::from_chars("\n abcdefgh");
        let ids = codec.encode("bad cafe").unwrap();
        assert_eq!(ids[0], 3);
        assert_eq!(codec.decode(&ids).unwrap(), "bad cafe");
        assert!(codec.encode("xyz").is_err());
        assert!(codec.decode(&[99]).is_err());
    }

    #[test]
    fn test_decode_each_marks_unknown_ids() {
        let codec = CharCodec::from_chars("ab");
        assert_eq!(codec.decode_each(&[1, 0, 7]), vec!["b", "a", "<7>"]);
    }

    #[test]
    fn test_load_meta_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(
            &path,
            r#"{"vocab_size": 3, "stoi": {"a": 0, "b": 1, "\n": 2}, "itos": {"0": "a", "1": "b", "2": "\n"}}"#,
        )
        .unwrap();

        let codec = CharCodec::load(&path).unwrap();
        assert_eq!(codec.len(), 3);
        assert_eq!(codec.decode(&[2, 0]).unwrap(), "\na");

        // load_codec picks it up from the data directory
        let codec = load_codec(None, dir.path()).unwrap();
        assert_eq!(codec.encode("ab").unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_rejects_multi_char_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        std::fs::write(&path, r#"{"stoi": {"ab": 0}, "itos": {"0": "ab"}}"#).unwrap();
        assert!(CharCodec::load(&path).is_err());
    }
}
