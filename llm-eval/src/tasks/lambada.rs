//! OpenAI 版本的 LAMBADA，与原论文的数据有出入，准确率不宜与原版直接比较。
//! 评测只看每个 eos 之前一个位置的预测。

use super::{EvalTask, TaskContext, TaskInput, TaskKind, window_stream};
use crate::{
    EvalParams, Result, TaskError,
    source::{Sources, cache_path, read_or_create},
};
use serde::Deserialize;
use std::path::Path;

const LAMBADA_URL: &str = "https://storage.googleapis.com/gpt-2/data/lambada_test.jsonl";

pub struct Lambada;

#[derive(Deserialize)]
struct Line {
    text: String,
}

impl Lambada {
    fn tokens(&self, params: &EvalParams, path: &Path, sources: &Sources) -> Result<Vec<Vec<u32>>> {
        read_or_create(path, || {
            let raw = sources.fetch(LAMBADA_URL)?;
            let encoder = sources.encoder(params)?;
            raw.split(|&b| b == b'\n')
                .filter(|line| !line.trim_ascii().is_empty())
                .enumerate()
                .map(|(i, line)| {
                    let Line { text } = serde_json::from_slice(line)
                        .map_err(|e| TaskError::source(format!("lambada line {i}: {e}")))?;
                    encoder.encode(&text)
                })
                .collect()
        })
    }
}

impl EvalTask for Lambada {
    fn kind(&self) -> TaskKind {
        TaskKind::Lambada
    }

    fn init(&self, params: &EvalParams, sources: &Sources) -> Result<TaskContext> {
        params.validate()?;

        let tokens_path = cache_path(params, "lambada");
        let docs = self.tokens(params, &tokens_path, sources)?;
        let stream = window_stream(params, &docs)?;
        Ok(TaskContext {
            kind: self.kind(),
            params: params.clone(),
            tokens_path,
            n_steps: stream.steps_per_pass(),
        })
    }

    fn input(&self, ctx: &TaskContext, sources: &Sources) -> Result<TaskInput> {
        let docs = self.tokens(&ctx.params, &ctx.tokens_path, sources)?;
        window_stream(&ctx.params, &docs).map(TaskInput::Windows)
    }
}

#[cfg(test)]
fn jsonl(texts: &[&str]) -> Vec<u8> {
    texts
        .iter()
        .map(|text| serde_json::json!({ "text": text }).to_string() + "\n")
        .collect::<String>()
        .into_bytes()
}

#[cfg(test)]
fn params(dir: &Path) -> EvalParams {
    let mut params = EvalParams::new(8, 100, "tokenizer.json");
    params.eval_batch_size = 2;
    params.cache_dir = dir.into();
    params
}

#[test]
fn test_init_and_input() {
    use crate::source::test_utils::{FakeFetch, offline, sources};

    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path());

    let mut fetch = FakeFetch::default();
    fetch.files.insert(
        LAMBADA_URL.into(),
        jsonl(&["a bb ccc", "dddd", "", "ee fff gggg hh"]),
    );
    let ctx = Lambada.init(&params, &sources(fetch.clone())).unwrap();
    assert_eq!(fetch.requests.borrow().len(), 1);
    assert!(ctx.tokens_path.is_file());
    // 空行之外的空文本也是一篇文档：[1 2 3 0 4 0 0] [2 3 4 2 0]
    assert_eq!(ctx.n_steps, 1);
    assert_eq!(Lambada.task_info(&ctx).n_steps, 1);

    // 第二次走缓存
    let ctx = Lambada.init(&params, &offline()).unwrap();
    assert_eq!(ctx.n_steps, 1);

    let TaskInput::Windows(mut stream) = Lambada.input(&ctx, &offline()).unwrap() else {
        panic!("lambada yields windows")
    };
    assert_eq!(stream.steps_per_pass(), 1);
    let batch = stream.next().unwrap();
    assert_eq!(batch.input(0), [1, 2, 3, 0, 4, 0, 0, 1]);
    assert_eq!(batch.target(0), [0, 3, 0, 4, 0, 0, 0, 0]);
    assert_eq!(batch.input(1), [2, 3, 4, 2, 0, 1, 1, 1]);
}

#[test]
fn test_empty_corpus() {
    use crate::source::test_utils::{FakeFetch, offline, sources};

    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path());
    let mut fetch = FakeFetch::default();
    fetch.files.insert(LAMBADA_URL.into(), b"\n".to_vec());

    let ctx = Lambada.init(&params, &sources(fetch)).unwrap();
    assert_eq!(ctx.n_steps, 1);

    let TaskInput::Windows(mut stream) = Lambada.input(&ctx, &offline()).unwrap() else {
        panic!("lambada yields windows")
    };
    let batch = stream.next().unwrap();
    assert!(batch.inputs.iter().all(|&t| t == crate::DUMMY_TOKEN));
    assert!(batch.targets.iter().all(|&t| t == params.eos()));
}

#[test]
fn test_source_unavailable() {
    use crate::source::test_utils::offline;

    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path());
    assert!(matches!(
        Lambada.init(&params, &offline()),
        Err(TaskError::SourceUnavailable(_))
    ));
    assert!(!cache_path(&params, "lambada").exists());
}

#[test]
fn test_bad_line() {
    use crate::source::test_utils::{FakeFetch, sources};

    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path());
    let mut fetch = FakeFetch::default();
    fetch.files.insert(LAMBADA_URL.into(), b"{\"text\": \"a\"}\nnot json\n".to_vec());
    let err = Lambada.init(&params, &sources(fetch)).err().unwrap();
    assert!(err.to_string().contains("lambada line 1"));
}

#[test]
fn test_overflow() {
    use crate::{OverflowPolicy, source::test_utils::{FakeFetch, sources}};

    let dir = tempfile::tempdir().unwrap();
    let mut params = params(dir.path());
    let mut fetch = FakeFetch::default();
    fetch.files.insert(LAMBADA_URL.into(), jsonl(&["a b c d e f g h"]));
    let sources = sources(fetch);

    assert!(matches!(
        Lambada.init(&params, &sources),
        Err(TaskError::Overflow { len: 8, n_ctx: 8 })
    ));

    params.overflow = OverflowPolicy::Truncate;
    assert_eq!(Lambada.init(&params, &sources).unwrap().n_steps, 1);
}
