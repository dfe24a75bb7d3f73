//! 评测语料的准备：取回原始文本、分词、把 token 序列装进定宽的上下文窗口，
//! 再以无限循环的批次流交给评测循环。

mod error;
mod pack;
mod params;
mod stream;

pub mod source;
pub mod tasks;
pub mod window;

pub use error::{Result, TaskError};
pub use pack::{BinMatrix, BinPacker, DUMMY_TOKEN, OverflowPolicy, pack};
pub use params::EvalParams;
pub use stream::{Batch, BatchStream};
pub use tasks::{EvalTask, TaskContext, TaskInfo, TaskInput, TaskKind};

type Tensor<T> = tensor::Tensor<T, 2>;
