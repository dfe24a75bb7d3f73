mod fmt;
mod host;
mod transform;

use digit_layout::{DigitLayout, types};
use ndarray_layout::{ArrayLayout, Endian::BigEndian};
use std::ops::{Deref, DerefMut};

pub use host::Tokens;

/// 以 [`DigitLayout`] 描述 token id 类型、[`ArrayLayout`] 描述形状的张量。
#[derive(Clone)]
pub struct Tensor<T, const N: usize> {
    dt: DigitLayout,
    layout: ArrayLayout<N>,
    data: T,
}

/// 能容纳 `n_vocab` 个 token id 的最窄整数类型。
pub fn token_type(n_vocab: usize) -> DigitLayout {
    if n_vocab <= u16::MAX as usize + 1 {
        types::U16
    } else {
        types::U32
    }
}

/// `dt` 类型能表示的最大 token id。
pub fn max_token(dt: DigitLayout) -> u32 {
    match dt {
        types::U16 => u16::MAX as _,
        types::U32 => u32::MAX,
        dt => panic!("not a token type: {dt:?}"),
    }
}

impl<const N: usize> Tensor<usize, N> {
    pub fn new(dt: DigitLayout, shape: &[usize]) -> Self {
        assert!(matches!(dt, types::U16 | types::U32), "not a token type: {dt:?}");

        let element_size = dt.nbytes();
        let layout = ArrayLayout::new_contiguous(shape, BigEndian, element_size);
        let size = layout.num_elements() * element_size;
        Self {
            dt,
            layout,
            data: size,
        }
    }
}

impl<T, const N: usize> Tensor<T, N> {
    pub const fn dt(&self) -> DigitLayout {
        self.dt
    }

    pub const fn layout(&self) -> &ArrayLayout<N> {
        &self.layout
    }

    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    pub fn take(self) -> T {
        self.data
    }

    pub const fn get(&self) -> &T {
        &self.data
    }

    pub fn is_contiguous(&self) -> bool {
        if self.layout.num_elements() == 0 {
            return true;
        }
        match self.layout.merge_be(0, self.layout.ndim()) {
            Some(layout) => {
                let &[s] = layout.strides() else {
                    unreachable!()
                };
                s == self.dt.nbytes() as isize
            }
            None => false,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Tensor<U, N> {
        let Self { dt, layout, data } = self;
        Tensor {
            dt,
            layout,
            data: f(data),
        }
    }
}

impl<T: Deref, const N: usize> Tensor<T, N> {
    pub fn as_deref(&self) -> Tensor<&<T as Deref>::Target, N> {
        Tensor {
            dt: self.dt,
            layout: self.layout.clone(),
            data: self.data.deref(),
        }
    }
}

impl<T: DerefMut, const N: usize> Tensor<T, N> {
    pub fn as_deref_mut(&mut self) -> Tensor<&mut <T as Deref>::Target, N> {
        Tensor {
            dt: self.dt,
            layout: self.layout.clone(),
            data: self.data.deref_mut(),
        }
    }
}

impl<const N: usize> PartialEq for Tensor<&[u8], N> {
    fn eq(&self, other: &Self) -> bool {
        self.dt == other.dt
            && self.shape() == other.shape()
            && self.tokens().eq(other.tokens())
    }
}

#[test]
fn test_token_type() {
    assert_eq!(token_type(50257), types::U16);
    assert_eq!(token_type(65536), types::U16);
    assert_eq!(token_type(65537), types::U32);
    assert_eq!(max_token(types::U16), 65535);
}

#[test]
fn test_new() {
    let tensor = Tensor::<usize, 2>::new(types::U16, &[3, 5]);
    assert_eq!(tensor.shape(), &[3, 5]);
    assert_eq!(*tensor.get(), 30);
    assert!(tensor.is_contiguous());

    let tensor = Tensor::<usize, 2>::new(types::U32, &[3, 5]);
    assert_eq!(tensor.take(), 60);

    let tensor = Tensor::<usize, 2>::new(types::U16, &[0, 5]);
    assert_eq!(*tensor.get(), 0);
    assert!(tensor.is_contiguous());
}
