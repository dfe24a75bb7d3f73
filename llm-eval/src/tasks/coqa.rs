use super::{EvalTask, TaskContext, TaskInput, TaskKind};
use crate::{
    EvalParams, Result, TaskError,
    source::{Sources, cache_path, read_or_create},
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, path::Path};

const COQA_URL: &str = "https://nlp.stanford.edu/data/coqa/coqa-dev-v1.0.json";

/// CoQA 开发集，原样保留未用到的字段，另为每个故事加上编码后的提示。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoqaData {
    pub data: Vec<CoqaStory>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoqaStory {
    pub id: String,
    pub story: String,
    pub questions: Vec<CoqaQuestion>,
    /// `{id}_{turn_id}` -> 提示的 token
    #[serde(default)]
    pub prompts: BTreeMap<String, Vec<u32>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoqaQuestion {
    pub input_text: String,
    pub turn_id: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 一组待预测的提示，`keys[i]` 对应 `prompts[i]`。
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PromptBatch {
    pub keys: Vec<String>,
    pub prompts: Vec<Vec<u32>>,
}

impl CoqaStory {
    pub fn prompt_id(&self, question: &CoqaQuestion) -> String {
        format!("{}_{}", self.id, question.turn_id)
    }

    pub fn prompt_text(&self, question: &CoqaQuestion) -> String {
        format!("{}\nQ: {}\nA: ", self.story, question.input_text)
    }
}

pub struct Coqa;

impl Coqa {
    fn tokens(&self, params: &EvalParams, path: &Path, sources: &Sources) -> Result<CoqaData> {
        read_or_create(path, || {
            let raw = sources.fetch(COQA_URL)?;
            let mut data = serde_json::from_slice::<CoqaData>(&raw)
                .map_err(|e| TaskError::source(format!("coqa: {e}")))?;

            let encoder = sources.encoder(params)?;
            for story in &mut data.data {
                let mut prompts = BTreeMap::new();
                for q in &story.questions {
                    let key = story.prompt_id(q);
                    if prompts.contains_key(&key) {
                        return Err(TaskError::source(format!(
                            "coqa: duplicate question {key}"
                        )));
                    }
                    let tokens = encoder.encode(&story.prompt_text(q))?;
                    prompts.insert(key, tokens);
                }
                story.prompts = prompts
            }
            tracing::info!("coqa: {} stories encoded", data.data.len());
            Ok(data)
        })
    }

    /// 按问题顺序取出所有提示，每 `batch_size` 个一组，最后一组可以不满。
    fn batches(data: &CoqaData, batch_size: usize, path: &Path) -> Result<Vec<PromptBatch>> {
        let mut prompts = Vec::new();
        for story in &data.data {
            for q in &story.questions {
                let key = story.prompt_id(q);
                let Some(tokens) = story.prompts.get(&key) else {
                    return Err(TaskError::CacheCorruption {
                        path: path.into(),
                        source: serde::de::Error::custom(format!("missing prompt {key}")),
                    });
                };
                prompts.push((key, tokens.clone()))
            }
        }

        Ok(prompts
            .into_iter()
            .chunks(batch_size)
            .into_iter()
            .map(|chunk| {
                let (keys, prompts) = chunk.unzip();
                PromptBatch { keys, prompts }
            })
            .collect())
    }
}

impl EvalTask for Coqa {
    fn kind(&self) -> TaskKind {
        TaskKind::Coqa
    }

    fn init(&self, params: &EvalParams, sources: &Sources) -> Result<TaskContext> {
        params.validate()?;

        let tokens_path = cache_path(params, "coqa");
        let data = self.tokens(params, &tokens_path, sources)?;
        let batches = Self::batches(&data, params.predict_batch_size, &tokens_path)?;
        Ok(TaskContext {
            kind: self.kind(),
            params: params.clone(),
            tokens_path,
            n_steps: batches.len(),
        })
    }

    fn input(&self, ctx: &TaskContext, sources: &Sources) -> Result<TaskInput> {
        let data = self.tokens(&ctx.params, &ctx.tokens_path, sources)?;
        Self::batches(&data, ctx.params.predict_batch_size, &ctx.tokens_path).map(TaskInput::Prompts)
    }
}

#[cfg(test)]
fn raw() -> Vec<u8> {
    serde_json::json!({
        "version": "1.0",
        "data": [
            {
                "source": "wikipedia",
                "id": "s1",
                "story": "a bb",
                "questions": [
                    { "input_text": "ccc", "turn_id": 1 },
                    { "input_text": "dddd ee", "turn_id": 2 }
                ],
                "answers": [
                    { "input_text": "x", "turn_id": 1 },
                    { "input_text": "y", "turn_id": 2 }
                ]
            },
            {
                "id": "s2",
                "story": "fffff",
                "questions": [ { "input_text": "g", "turn_id": 1 } ]
            }
        ]
    })
    .to_string()
    .into_bytes()
}

#[test]
fn test_init_and_input() {
    use crate::source::test_utils::{FakeFetch, offline, sources};

    let dir = tempfile::tempdir().unwrap();
    let mut params = EvalParams::new(64, 100, "tokenizer.json");
    params.predict_batch_size = 2;
    params.cache_dir = dir.path().into();

    let mut fetch = FakeFetch::default();
    fetch.files.insert(COQA_URL.into(), raw());
    let ctx = Coqa.init(&params, &sources(fetch)).unwrap();
    assert_eq!(ctx.n_steps, 2);

    // 缓存保留原始字段
    let cached = serde_json::from_slice::<Value>(&std::fs::read(&ctx.tokens_path).unwrap()).unwrap();
    assert_eq!(cached["version"], "1.0");
    assert_eq!(cached["data"][0]["answers"][1]["input_text"], "y");
    assert_eq!(
        cached["data"][0]["prompts"]["s1_2"],
        serde_json::json!([1, 2, 2, 4, 2, 2])
    );

    let TaskInput::Prompts(batches) = Coqa.input(&ctx, &offline()).unwrap() else {
        panic!("coqa yields prompts")
    };
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].keys, ["s1_1", "s1_2"]);
    // "a bb\nQ: ccc\nA: "
    assert_eq!(batches[0].prompts[0], [1, 2, 2, 3, 2]);
    assert_eq!(batches[1].keys, ["s2_1"]);
    assert_eq!(batches[1].prompts, [vec![5, 2, 1, 2]]);
}

#[test]
fn test_missing_prompt() {
    use crate::source::test_utils::offline;

    let dir = tempfile::tempdir().unwrap();
    let mut params = EvalParams::new(64, 100, "tokenizer.json");
    params.cache_dir = dir.path().into();

    // 缓存里缺少 prompts 字段
    std::fs::write(cache_path(&params, "coqa"), raw()).unwrap();
    assert!(matches!(
        Coqa.init(&params, &offline()),
        Err(TaskError::CacheCorruption { .. })
    ));
}

#[test]
fn test_duplicate_turn() {
    use crate::source::test_utils::{FakeFetch, sources};

    let dir = tempfile::tempdir().unwrap();
    let mut params = EvalParams::new(64, 100, "tokenizer.json");
    params.cache_dir = dir.path().into();

    let raw = serde_json::json!({
        "data": [{
            "id": "s1",
            "story": "a",
            "questions": [
                { "input_text": "b", "turn_id": 1 },
                { "input_text": "c", "turn_id": 1 }
            ]
        }]
    });
    let mut fetch = FakeFetch::default();
    fetch.files.insert(COQA_URL.into(), raw.to_string().into_bytes());
    let err = Coqa.init(&params, &sources(fetch)).err().unwrap();
    assert!(matches!(err, TaskError::SourceUnavailable(_)));
    assert!(err.to_string().contains("s1_1"));
    assert!(!cache_path(&params, "coqa").exists());
}
