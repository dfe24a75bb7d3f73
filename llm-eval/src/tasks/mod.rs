mod coqa;
mod lambada;
mod wikitext;

use crate::{BatchStream, BinPacker, EvalParams, Result, source::Sources};
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf};

pub use coqa::{Coqa, CoqaData, CoqaQuestion, CoqaStory, PromptBatch};
pub use lambada::Lambada;
pub use wikitext::{Wikitext, WikitextVersion};

/// 评测任务：`init` 准备缓存并统计步数，`input` 产生模型输入。
pub trait EvalTask {
    fn kind(&self) -> TaskKind;

    fn init(&self, params: &EvalParams, sources: &Sources) -> Result<TaskContext>;

    fn task_info(&self, ctx: &TaskContext) -> TaskInfo {
        TaskInfo {
            n_steps: ctx.n_steps,
        }
    }

    fn input(&self, ctx: &TaskContext, sources: &Sources) -> Result<TaskInput>;
}

/// `init` 的结果，后续调用都显式传入。
#[derive(Clone, Debug)]
pub struct TaskContext {
    pub kind: TaskKind,
    pub params: EvalParams,
    pub tokens_path: PathBuf,
    pub n_steps: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TaskInfo {
    pub n_steps: usize,
}

pub enum TaskInput {
    /// lambada 与 wikitext：装箱后的无限批次流。
    Windows(BatchStream),
    /// coqa：按 `predict_batch_size` 分组的提示。
    Prompts(Vec<PromptBatch>),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lower")]
pub enum TaskKind {
    Lambada,
    Wikitext2,
    Wikitext103,
    Coqa,
}

impl TaskKind {
    pub const ALL: [Self; 4] = [Self::Lambada, Self::Wikitext2, Self::Wikitext103, Self::Coqa];

    pub fn name(self) -> &'static str {
        match self {
            Self::Lambada => "lambada",
            Self::Wikitext2 => "wikitext2",
            Self::Wikitext103 => "wikitext103",
            Self::Coqa => "coqa",
        }
    }

    pub fn task(self) -> &'static dyn EvalTask {
        match self {
            Self::Lambada => &Lambada,
            Self::Wikitext2 => &Wikitext::V2,
            Self::Wikitext103 => &Wikitext::V103,
            Self::Coqa => &Coqa,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 把文档装箱并建立批次流，批大小即 `eval_batch_size`。
fn window_stream(params: &EvalParams, docs: &[Vec<u32>]) -> Result<BatchStream> {
    let bins = BinPacker::new(params.n_ctx, params.eos(), params.eval_batch_size)?
        .overflow(params.overflow)
        .token_type(tensor::token_type(params.n_vocab))
        .pack(docs)?;
    tracing::info!(
        "{} documents packed into {} bins of {} tokens",
        docs.len(),
        bins.num_bins(),
        bins.n_ctx()
    );
    BatchStream::new(bins, params.eval_batch_size)
}

#[test]
fn test_kinds() {
    use clap::ValueEnum;

    for kind in TaskKind::ALL {
        assert_eq!(kind.task().kind(), kind);
        assert_eq!(TaskKind::from_str(kind.name(), false), Ok(kind));
        assert_eq!(kind.to_string(), kind.name());
    }
    assert_eq!(
        serde_json::from_str::<TaskKind>(r#""wikitext103""#).unwrap(),
        TaskKind::Wikitext103
    );
}
