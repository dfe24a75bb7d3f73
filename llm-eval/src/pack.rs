use crate::{Result, TaskError, Tensor};
use digit_layout::{DigitLayout, types};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 填充用的哑 token
pub const DUMMY_TOKEN: u32 = 1;

/// 单个文档连同 eos 超过上下文宽度时的处理方式。
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// 报错，不产生任何输出。
    #[default]
    Reject,
    /// 只保留文档末尾的 `n_ctx - 1` 个 token。
    Truncate,
}

/// 按顺序把整篇文档装入定宽的 bin。
#[derive(Clone, Debug)]
pub struct BinPacker {
    n_ctx: usize,
    eos: u32,
    batch_multiple: usize,
    overflow: OverflowPolicy,
    dt: DigitLayout,
}

impl BinPacker {
    pub fn new(n_ctx: usize, eos: u32, batch_multiple: usize) -> Result<Self> {
        if n_ctx == 0 {
            return Err(TaskError::config("context width must be positive"));
        }
        if batch_multiple == 0 {
            return Err(TaskError::config("batch multiple must be positive"));
        }
        Ok(Self {
            n_ctx,
            eos,
            batch_multiple,
            overflow: OverflowPolicy::Reject,
            dt: types::U32,
        })
    }

    pub fn overflow(self, overflow: OverflowPolicy) -> Self {
        Self { overflow, ..self }
    }

    /// 指定矩阵的元素类型，参见 [`tensor::token_type`]。
    pub fn token_type(self, dt: DigitLayout) -> Self {
        Self { dt, ..self }
    }

    /// 装箱但不填充，返回的 bin 数已对齐到 `batch_multiple`。
    pub fn bins<I, D>(&self, docs: I) -> Result<Vec<Vec<u32>>>
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u32]>,
    {
        let &Self {
            n_ctx,
            eos,
            batch_multiple,
            overflow,
            ..
        } = self;

        let mut bins = Vec::<Vec<u32>>::new();
        for (i, doc) in docs.into_iter().enumerate() {
            let mut doc = doc.as_ref();
            if doc.len() + 1 > n_ctx {
                match overflow {
                    OverflowPolicy::Reject => {
                        return Err(TaskError::Overflow {
                            len: doc.len(),
                            n_ctx,
                        });
                    }
                    OverflowPolicy::Truncate => {
                        tracing::warn!(
                            "document {i} truncated from {} to {} tokens",
                            doc.len(),
                            n_ctx - 1
                        );
                        doc = &doc[doc.len() - (n_ctx - 1)..]
                    }
                }
            }

            match bins.last_mut() {
                Some(bin) if bin.len() + doc.len() + 1 <= n_ctx => {
                    bin.extend_from_slice(doc);
                    bin.push(eos)
                }
                _ => {
                    let mut bin = Vec::with_capacity(n_ctx);
                    bin.extend_from_slice(doc);
                    bin.push(eos);
                    bins.push(bin)
                }
            }
        }

        // 空输入也至少补出一组
        let n_full = bins.len();
        bins.resize(n_full.max(1).next_multiple_of(batch_multiple), Vec::new());
        tracing::debug!("packed into {n_full} bins, {} after padding", bins.len());
        Ok(bins)
    }

    /// 装箱并写入 `num_bins x n_ctx` 的矩阵，空位为 [`DUMMY_TOKEN`]。
    pub fn pack<I, D>(&self, docs: I) -> Result<BinMatrix>
    where
        I: IntoIterator<Item = D>,
        D: AsRef<[u32]>,
    {
        let bins = self.bins(docs)?;

        let limit = tensor::max_token(self.dt);
        if let Some(&t) = bins.iter().flatten().find(|&&t| t > limit) {
            return Err(TaskError::config(format!(
                "token {t} does not fit {:?}",
                self.dt
            )));
        }

        let mut matrix =
            Tensor::new(self.dt, &[bins.len(), self.n_ctx]).map(|len| vec![0u8; len]);
        matrix.as_deref_mut().fill(DUMMY_TOKEN);
        for (i, bin) in bins.iter().enumerate() {
            matrix.as_deref_mut().index(&[i]).write(bin)
        }

        Ok(BinMatrix {
            tensor: matrix,
            eos: self.eos,
        })
    }
}

/// 见 [`BinPacker::pack`]。
pub fn pack<I, D>(docs: I, n_ctx: usize, eos: u32, batch_multiple: usize) -> Result<BinMatrix>
where
    I: IntoIterator<Item = D>,
    D: AsRef<[u32]>,
{
    BinPacker::new(n_ctx, eos, batch_multiple)?.pack(docs)
}

/// 装箱结果，每行一个 bin。
#[derive(Clone)]
pub struct BinMatrix {
    tensor: Tensor<Vec<u8>>,
    eos: u32,
}

impl BinMatrix {
    pub fn num_bins(&self) -> usize {
        self.tensor.shape()[0]
    }

    pub fn n_ctx(&self) -> usize {
        self.tensor.shape()[1]
    }

    pub fn eos(&self) -> u32 {
        self.eos
    }

    pub fn as_tensor(&self) -> Tensor<&[u8]> {
        self.tensor.as_deref()
    }

    pub fn row(&self, i: usize) -> Vec<u32> {
        self.as_tensor().index(&[i]).tokens().collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<u32>> + '_ {
        (0..self.num_bins()).map(|i| self.row(i))
    }
}

impl PartialEq for BinMatrix {
    fn eq(&self, other: &Self) -> bool {
        self.eos == other.eos && self.as_tensor() == other.as_tensor()
    }
}

impl fmt::Debug for BinMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BinMatrix")
            .field("shape", &self.tensor.shape())
            .field("dt", &self.tensor.dt())
            .field("eos", &self.eos)
            .finish()
    }
}

impl fmt::Display for BinMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.as_tensor(), f)
    }
}

#[test]
fn test_two_docs() {
    let matrix = pack([vec![5u32, 6], vec![7]], 4, 0, 1).unwrap();
    assert_eq!(matrix.num_bins(), 2);
    assert_eq!(matrix.row(0), [5, 6, 0, 1]);
    assert_eq!(matrix.row(1), [7, 0, 1, 1]);
}

#[test]
fn test_fill_exactly() {
    let matrix = pack([vec![5u32], vec![7]], 4, 0, 1).unwrap();
    assert_eq!(matrix.num_bins(), 1);
    assert_eq!(matrix.row(0), [5, 0, 7, 0]);
}

#[test]
fn test_empty_input() {
    let matrix = pack(Vec::<Vec<u32>>::new(), 8, 0, 4).unwrap();
    assert_eq!(matrix.num_bins(), 4);
    assert!(matrix.rows().flatten().all(|t| t == DUMMY_TOKEN));
}

#[test]
fn test_empty_docs() {
    let bins = BinPacker::new(3, 9, 1)
        .unwrap()
        .bins([vec![], vec![], vec![], vec![4u32]])
        .unwrap();
    assert_eq!(bins, [vec![9, 9, 9], vec![4, 9]]);
}

#[test]
fn test_pad_to_multiple() {
    let matrix = pack([vec![2u32; 3], vec![3; 3], vec![4; 3]], 4, 0, 4).unwrap();
    assert_eq!(matrix.num_bins(), 4);
    assert_eq!(matrix.row(2), [4, 4, 4, 0]);
    assert_eq!(matrix.row(3), [1; 4]);
}

#[test]
fn test_bad_config() {
    assert!(matches!(
        pack([vec![1u32]], 0, 0, 1),
        Err(TaskError::Configuration(_))
    ));
    assert!(matches!(
        pack([vec![1u32]], 4, 0, 0),
        Err(TaskError::Configuration(_))
    ));
}

#[test]
fn test_overflow() {
    let docs = [vec![3u32, 4, 5, 6]];
    assert!(matches!(
        pack(&docs, 4, 0, 1),
        Err(TaskError::Overflow { len: 4, n_ctx: 4 })
    ));

    let matrix = BinPacker::new(4, 0, 1)
        .unwrap()
        .overflow(OverflowPolicy::Truncate)
        .pack(&docs)
        .unwrap();
    assert_eq!(matrix.row(0), [4, 5, 6, 0]);
}

#[test]
fn test_token_type() {
    let packer = BinPacker::new(2, 0, 1).unwrap().token_type(types::U16);
    assert_eq!(packer.pack([vec![65535u32]]).unwrap().row(0), [65535, 0]);
    assert!(matches!(
        packer.pack([vec![65536u32]]),
        Err(TaskError::Configuration(_))
    ));
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn empty_input_is_one_group(n_ctx in 1..64usize, multiple in 1..8usize) {
            let matrix = pack(Vec::<Vec<u32>>::new(), n_ctx, 0, multiple).unwrap();
            prop_assert_eq!(matrix.num_bins(), multiple);
            prop_assert!(matrix.rows().flatten().all(|t| t == DUMMY_TOKEN));
        }
    }

    fn docs() -> impl Strategy<Value = Vec<Vec<u32>>> {
        prop::collection::vec(prop::collection::vec(2..1000u32, 0..12), 0..40)
    }

    proptest! {
        #[test]
        fn bins_fit_and_align(docs in docs(), n_ctx in 13..64usize, multiple in 1..8usize) {
            let bins = BinPacker::new(n_ctx, 0, multiple).unwrap().bins(&docs).unwrap();
            prop_assert_eq!(bins.len() % multiple, 0);
            prop_assert!(bins.len() >= multiple);
            prop_assert!(bins.iter().all(|bin| bin.len() <= n_ctx));

            // 拼接所有 bin 即原文档加分隔符
            let expected = docs.iter().flat_map(|d| d.iter().copied().chain([0])).collect::<Vec<_>>();
            prop_assert_eq!(bins.concat(), expected);
        }

        #[test]
        fn padding_is_dummy(docs in docs(), n_ctx in 13..64usize, multiple in 1..8usize) {
            let packer = BinPacker::new(n_ctx, 0, multiple).unwrap();
            let bins = packer.bins(&docs).unwrap();
            let matrix = packer.pack(&docs).unwrap();
            prop_assert_eq!(matrix.num_bins(), bins.len());
            for (bin, row) in bins.iter().zip(matrix.rows()) {
                prop_assert_eq!(&row[..bin.len()], &bin[..]);
                prop_assert!(row[bin.len()..].iter().all(|&t| t == DUMMY_TOKEN));
            }
        }

        #[test]
        fn deterministic(docs in docs(), n_ctx in 13..64usize) {
            let packer = BinPacker::new(n_ctx, 0, 3).unwrap().token_type(types::U16);
            prop_assert_eq!(packer.pack(&docs).unwrap(), packer.pack(&docs).unwrap());
        }
    }
}
