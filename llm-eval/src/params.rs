use crate::{OverflowPolicy, Result, TaskError};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// 评测任务的参数
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvalParams {
    pub n_ctx: usize,   // 上下文宽度，例如 1024
    pub n_vocab: usize, // 词表大小，例如 50257
    /// 缺省时由词表大小推出，见 [`EvalParams::eos`]。
    #[serde(default)]
    pub eos_id: Option<u32>,
    #[serde(default = "default_batch_size")]
    pub eval_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub predict_batch_size: usize,
    pub tokenizer_path: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

fn default_batch_size() -> usize {
    8
}

fn default_cache_dir() -> PathBuf {
    ".".into()
}

impl EvalParams {
    pub fn new(n_ctx: usize, n_vocab: usize, tokenizer_path: impl Into<PathBuf>) -> Self {
        Self {
            n_ctx,
            n_vocab,
            eos_id: None,
            eval_batch_size: default_batch_size(),
            predict_batch_size: default_batch_size(),
            tokenizer_path: tokenizer_path.into(),
            cache_dir: default_cache_dir(),
            overflow: OverflowPolicy::default(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let params = serde_json::from_str::<Self>(&text)
            .map_err(|e| TaskError::config(format!("{}: {e}", path.display())))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        macro_rules! positive {
            ($( $name:ident )+) => {
                $(
                    if self.$name == 0 {
                        return Err(TaskError::config(concat!(stringify!($name), " must be positive")));
                    }
                )+
            };
        }

        positive! {
            n_ctx
            n_vocab
            eval_batch_size
            predict_batch_size
        }

        let eos = self.eos();
        if eos as usize >= self.n_vocab {
            return Err(TaskError::config(format!(
                "eos {eos} is outside vocabulary of {}",
                self.n_vocab
            )));
        }
        Ok(())
    }

    /// GPT-2 词表的 `<|endoftext|>` 是 50256，其他词表默认 0。
    pub fn eos(&self) -> u32 {
        self.eos_id
            .unwrap_or(if self.n_vocab >= 50257 { 50256 } else { 0 })
    }
}

#[test]
fn test_from_json() {
    let params = serde_json::from_str::<EvalParams>(
        r#"{ "n_ctx": 2048, "n_vocab": 50257, "tokenizer_path": "gpt2.json", "overflow": "truncate" }"#,
    )
    .unwrap();
    assert_eq!(params.eos(), 50256);
    assert_eq!(params.eval_batch_size, 8);
    assert_eq!(params.cache_dir, Path::new("."));
    assert_eq!(params.overflow, OverflowPolicy::Truncate);
    params.validate().unwrap();
}

#[test]
fn test_eos() {
    let mut params = EvalParams::new(16, 100, "t.json");
    assert_eq!(params.eos(), 0);
    params.eos_id = Some(99);
    assert_eq!(params.eos(), 99);
    params.validate().unwrap();
    params.eos_id = Some(100);
    assert!(params.validate().is_err());
}

#[test]
fn test_validate() {
    let mut params = EvalParams::new(16, 100, "t.json");
    params.eval_batch_size = 0;
    let err = params.validate().unwrap_err();
    assert!(err.to_string().contains("eval_batch_size must be positive"));

    params.eval_batch_size = 4;
    params.n_ctx = 0;
    assert!(matches!(params.validate(), Err(TaskError::Configuration(_))));
}

#[test]
fn test_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.json");
    fs::write(&path, r#"{ "n_ctx": 0, "n_vocab": 10, "tokenizer_path": "t" }"#).unwrap();
    assert!(matches!(
        EvalParams::from_file(&path),
        Err(TaskError::Configuration(_))
    ));

    fs::write(&path, "{").unwrap();
    assert!(matches!(
        EvalParams::from_file(&path),
        Err(TaskError::Configuration(_))
    ));
}
