use crate::{BinMatrix, Result, TaskError, window::derive_target_into};
use rayon::{
    iter::{IndexedParallelIterator, ParallelIterator},
    slice::{ParallelSlice, ParallelSliceMut},
};

/// 一个批次，`inputs` 与 `targets` 均为行优先的 `batch_size x n_ctx`。
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Batch {
    pub batch_size: usize,
    pub n_ctx: usize,
    pub inputs: Vec<u32>,
    pub targets: Vec<u32>,
}

impl Batch {
    pub fn input(&self, i: usize) -> &[u32] {
        &self.inputs[i * self.n_ctx..][..self.n_ctx]
    }

    pub fn target(&self, i: usize) -> &[u32] {
        &self.targets[i * self.n_ctx..][..self.n_ctx]
    }
}

/// 无限循环的批次流，每轮 `steps_per_pass` 个批次。
pub struct BatchStream {
    bins: BinMatrix,
    batch_size: usize,
    steps: usize,
    step: usize,
}

impl BatchStream {
    pub fn new(bins: BinMatrix, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(TaskError::config("batch size must be positive"));
        }
        let steps = bins.num_bins() / batch_size;
        if steps == 0 {
            return Err(TaskError::config(format!(
                "batch size {batch_size} exceeds {} bins",
                bins.num_bins()
            )));
        }
        // 末尾不足一批的行被丢弃
        let dropped = bins.num_bins() % batch_size;
        if dropped > 0 {
            tracing::debug!("{dropped} trailing rows dropped from every pass")
        }

        Ok(Self {
            bins,
            batch_size,
            steps,
            step: 0,
        })
    }

    pub fn steps_per_pass(&self) -> usize {
        self.steps
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn bins(&self) -> &BinMatrix {
        &self.bins
    }

    /// 回到第一个批次。
    pub fn reset(&mut self) {
        self.step = 0
    }

    /// 第 `step` 个批次，与流的当前位置无关。
    ///
    /// # Panics
    ///
    /// `step` 不小于 [`steps_per_pass`](Self::steps_per_pass) 时。
    pub fn batch(&self, step: usize) -> Batch {
        assert!(step < self.steps);

        let n_ctx = self.bins.n_ctx();
        let eos = self.bins.eos();
        let inputs = self
            .bins
            .as_tensor()
            .rows(step * self.batch_size, self.batch_size)
            .tokens()
            .collect::<Vec<_>>();

        let mut targets = vec![eos; inputs.len()];
        targets
            .par_chunks_mut(n_ctx)
            .zip(inputs.par_chunks(n_ctx))
            .for_each(|(target, row)| derive_target_into(row, eos, target));

        Batch {
            batch_size: self.batch_size,
            n_ctx,
            inputs,
            targets,
        }
    }
}

impl Iterator for BatchStream {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        let batch = self.batch(self.step);
        self.step += 1;
        if self.step == self.steps {
            tracing::debug!("pass of {} batches finished", self.steps);
            self.step = 0
        }
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (usize::MAX, None)
    }
}

#[cfg(test)]
fn two_bins() -> BinMatrix {
    crate::pack([vec![5u32, 6], vec![7]], 4, 0, 1).unwrap()
}

#[test]
fn test_single_batch() {
    let mut stream = BatchStream::new(two_bins(), 2).unwrap();
    assert_eq!(stream.steps_per_pass(), 1);

    let batch = stream.next().unwrap();
    assert_eq!(batch.inputs, [5, 6, 0, 1, 7, 0, 1, 1]);
    assert_eq!(batch.input(1), [7, 0, 1, 1]);
    // 5 6 <eos> 预测 6；7 <eos> 的计分位置绕回到第 3 位
    assert_eq!(batch.target(0), [6, 0, 0, 0]);
    assert_eq!(batch.target(1), [0, 0, 0, 7]);

    assert_eq!(stream.next().unwrap(), batch);
}

#[test]
fn test_drop_remainder() {
    let bins = crate::pack([vec![2u32; 3], vec![3; 3], vec![4; 3]], 4, 0, 1).unwrap();
    let mut stream = BatchStream::new(bins, 2).unwrap();
    assert_eq!(stream.steps_per_pass(), 1);
    assert!(stream.all_distinct_in_pass());
    assert_eq!(stream.next().unwrap().inputs, [2, 2, 2, 0, 3, 3, 3, 0]);
    assert_eq!(stream.next().unwrap().inputs, [2, 2, 2, 0, 3, 3, 3, 0]);
}

#[test]
fn test_repeat() {
    let bins = crate::pack((0..8u32).map(|i| vec![i + 2; 3]), 4, 0, 2).unwrap();
    let stream = BatchStream::new(bins, 2).unwrap();
    assert_eq!(stream.steps_per_pass(), 4);
    assert!(stream.all_distinct_in_pass());

    let batches = stream.take(12).collect::<Vec<_>>();
    assert_eq!(batches[..4], batches[4..8]);
    assert_eq!(batches[..4], batches[8..]);

    let mut stream = BatchStream::new(crate::pack([vec![9u32]], 4, 0, 4).unwrap(), 2).unwrap();
    stream.next();
    stream.reset();
    assert_eq!(stream.next().unwrap(), stream.batch(0));
}

#[test]
fn test_empty_input() {
    let bins = crate::pack(Vec::<Vec<u32>>::new(), 4, 0, 4).unwrap();
    let mut stream = BatchStream::new(bins, 4).unwrap();
    assert_eq!(stream.steps_per_pass(), 1);

    let batch = stream.next().unwrap();
    assert_eq!(batch.inputs, [1; 16]);
    assert_eq!(batch.targets, [0; 16]);
}

#[test]
#[should_panic]
fn test_batch_out_of_range() {
    BatchStream::new(two_bins(), 2).unwrap().batch(1);
}

#[test]
fn test_zero_steps() {
    assert!(matches!(
        BatchStream::new(two_bins(), 3),
        Err(TaskError::Configuration(_))
    ));
    assert!(matches!(
        BatchStream::new(two_bins(), 0),
        Err(TaskError::Configuration(_))
    ));
}

#[cfg(test)]
impl BatchStream {
    fn all_distinct_in_pass(&self) -> bool {
        use itertools::Itertools;
        (0..self.steps).map(|i| self.batch(i).inputs).all_unique()
    }
}
