use super::Encode;
use crate::{Result, TaskError};
use std::path::Path;
use tokenizers::Tokenizer;

/// HuggingFace `tokenizer.json` 格式的分词器。
pub struct HfEncoder(Tokenizer);

impl HfEncoder {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| TaskError::source(format!("cannot load tokenizer {}: {e}", path.display())))?;
        tracing::info!(
            "loaded tokenizer from {} ({} tokens)",
            path.display(),
            tokenizer.get_vocab_size(true)
        );
        Ok(Self(tokenizer))
    }
}

impl Encode for HfEncoder {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .0
            .encode(text, false)
            .map_err(|e| TaskError::source(format!("cannot encode text: {e}")))?;
        Ok(encoding.get_ids().to_vec())
    }
}

#[test]
fn test_word_level() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokenizer.json");
    let json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": { "<eos>": 0, "<unk>": 1, "the": 2, "cat": 3, "sat": 4 },
            "unk_token": "<unk>"
        }
    });
    std::fs::write(&path, json.to_string()).unwrap();

    let encoder = HfEncoder::from_file(&path).unwrap();
    assert_eq!(encoder.encode("the cat sat").unwrap(), [2, 3, 4]);
    assert_eq!(encoder.encode("the dog").unwrap(), [2, 1]);

    assert!(matches!(
        HfEncoder::from_file(dir.path().join("missing.json")),
        Err(TaskError::SourceUnavailable(_))
    ));
}
