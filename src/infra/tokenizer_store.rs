// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Manages the caption tokenizer: build once from the training
// captions, save next to the encoding cache, reload for
// training and evaluation so all three agree on the ids.
//
// In tokenizers 0.15, train_from_files requires Trainer::Model
// to equal ModelWrapper. The vocabulary is therefore counted
// here and written as a WordLevel tokenizer JSON directly,
// then loaded back through Tokenizer::from_file.
//
// Special token ids follow the BERT convention:
//   [PAD]=0 [UNK]=1 [CLS]=101 [SEP]=102 [MASK]=103
// Regular words start at 104.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tokenizers::Tokenizer;

use crate::domain::traits::TextDecoder;

pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;
pub const CLS_ID: u32 = 101;
pub const SEP_ID: u32 = 102;
const FIRST_WORD_ID: usize = 104;
const SPECIAL_TOKENS: usize = 5;

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(TOKENIZER_FILE)
    }

    /// Load existing tokenizer or build a new one from texts
    pub fn load_or_build(&self, texts: &[String], vocab_size: usize) -> Result<CaptionTokenizer> {
        if self.path().exists() {
            tracing::info!("Loading existing tokenizer from '{}'", self.path().display());
            self.load()
        } else {
            tracing::info!("Building new tokenizer (vocab_size={})", vocab_size);
            self.build_and_save(texts, vocab_size)
        }
    }

    pub fn load(&self) -> Result<CaptionTokenizer> {
        CaptionTokenizer::from_file(&self.path())
    }

    fn build_and_save(&self, texts: &[String], vocab_size: usize) -> Result<CaptionTokenizer> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Cannot create '{}'", self.dir.display()))?;

        // ── Step 1: Count word frequencies ────────────────────────────────────
        let mut freq: HashMap<String, usize> = HashMap::new();
        for text in texts {
            for word in words(text) {
                *freq.entry(word).or_insert(0) += 1;
            }
        }

        // Most frequent first; ties broken alphabetically so rebuilding
        // from the same captions gives the same ids.
        let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(vocab_size.saturating_sub(SPECIAL_TOKENS));

        // ── Step 2: Build vocab JSON ──────────────────────────────────────────
        let mut vocab = serde_json::json!({
            "[PAD]":  PAD_ID,
            "[UNK]":  UNK_ID,
            "[CLS]":  CLS_ID,
            "[SEP]":  SEP_ID,
            "[MASK]": 103,
        });
        let mut next_id = FIRST_WORD_ID;
        for (word, _) in &ranked {
            if vocab.get(word).is_none() {
                vocab[word] = serde_json::json!(next_id);
                next_id += 1;
            }
        }

        // ── Step 3: Write tokenizer JSON in HuggingFace format ────────────────
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": 0,   "content": "[PAD]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 1,   "content": "[UNK]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 101, "content": "[CLS]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 102, "content": "[SEP]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 103, "content": "[MASK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": {
                "type": "BertNormalizer",
                "clean_text": true,
                "handle_chinese_chars": true,
                "strip_accents": null,
                "lowercase": true
            },
            "pre_tokenizer": {
                "type": "Whitespace"
            },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": "[UNK]"
            }
        });

        let path = self.path();
        fs::write(&path, serde_json::to_string_pretty(&tokenizer_json)?)
            .with_context(|| format!("Cannot write tokenizer JSON '{}'", path.display()))?;

        tracing::info!(
            "Tokenizer built with {} words, saved to '{}'",
            next_id - FIRST_WORD_ID,
            path.display()
        );
        CaptionTokenizer::from_file(&path)
    }
}

/// Lower-cased alphanumeric runs, the same units the Whitespace
/// pre-tokenizer produces for plain words.
fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

// ─── CaptionTokenizer ─────────────────────────────────────────────────────────
/// A loaded tokenizer plus the caption framing rules.
pub struct CaptionTokenizer {
    inner:      Tokenizer,
    path:       PathBuf,
    vocab_size: usize,
}

impl CaptionTokenizer {
    pub fn from_file(path: &Path) -> Result<Self> {
        let inner = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Cannot load tokenizer from '{}': {e}", path.display()))?;

        // Ids are not contiguous (2..=100 are unused), so the embedding
        // table has to cover the largest id rather than the token count.
        let vocab_size = inner
            .get_vocab(true)
            .values()
            .copied()
            .max()
            .map(|id| id as usize + 1)
            .unwrap_or(FIRST_WORD_ID);

        Ok(Self { inner, path: path.to_path_buf(), vocab_size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of an embedding table able to index every id.
    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn pad_id(&self) -> u32 {
        PAD_ID
    }

    pub fn cls_id(&self) -> u32 {
        CLS_ID
    }

    pub fn sep_id(&self) -> u32 {
        SEP_ID
    }

    /// `[CLS] words… [SEP]`, truncated to `max_len` ids with [SEP] kept last.
    pub fn encode_caption(&self, text: &str, max_len: usize) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| anyhow::anyhow!("Cannot tokenize caption '{text}': {e}"))?;

        let body_len = max_len.saturating_sub(2);
        let mut ids = Vec::with_capacity(body_len + 2);
        ids.push(CLS_ID);
        ids.extend(encoding.get_ids().iter().copied().take(body_len));
        ids.push(SEP_ID);
        Ok(ids)
    }

    pub fn decode_ids(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| anyhow::anyhow!("Cannot decode token ids: {e}"))
    }
}

impl TextDecoder for CaptionTokenizer {
    fn decode(&self, ids: &[i64]) -> Result<String> {
        let ids: Vec<u32> = ids
            .iter()
            .filter_map(|&id| u32::try_from(id).ok())
            .collect();
        self.decode_ids(&ids)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn captions() -> Vec<String> {
        vec![
            "A person opens the door.".to_string(),
            "The person is holding a cup".to_string(),
        ]
    }

    #[test]
    fn test_caption_is_framed_with_cls_and_sep() {
        let dir = tempfile::tempdir().unwrap();
        let tok = TokenizerStore::new(dir.path()).load_or_build(&captions(), 100).unwrap();

        let ids = tok.encode_caption("the person opens a cup", 64).unwrap();
        assert_eq!(ids.first(), Some(&CLS_ID));
        assert_eq!(ids.last(), Some(&SEP_ID));
        assert_eq!(ids.len(), 7);
        assert!(ids[1..6].iter().all(|&id| id as usize >= FIRST_WORD_ID));
    }

    #[test]
    fn test_truncation_keeps_sep() {
        let dir = tempfile::tempdir().unwrap();
        let tok = TokenizerStore::new(dir.path()).load_or_build(&captions(), 100).unwrap();

        let ids = tok.encode_caption("the person opens the door", 4).unwrap();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[3], SEP_ID);
    }

    #[test]
    fn test_decode_skips_special_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let tok = TokenizerStore::new(dir.path()).load_or_build(&captions(), 100).unwrap();

        let ids: Vec<i64> = tok
            .encode_caption("person opens door", 16)
            .unwrap()
            .into_iter()
            .map(i64::from)
            .chain([0, 0])
            .collect();
        assert_eq!(tok.decode(&ids).unwrap(), "person opens door");
    }

    #[test]
    fn test_reload_gives_same_vocab() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenizerStore::new(dir.path());
        let built = store.load_or_build(&captions(), 100).unwrap();
        let loaded = store.load_or_build(&[], 100).unwrap();
        assert_eq!(built.vocab_size(), loaded.vocab_size());
        assert!(built.vocab_size() > FIRST_WORD_ID);
    }
}
