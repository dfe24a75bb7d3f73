use super::{Tensor, max_token};
use digit_layout::{DigitLayout, types};

impl<'s, const N: usize> Tensor<&'s [u8], N> {
    /// 按行优先顺序读出所有 token。
    pub fn tokens(&self) -> Tokens<'s> {
        assert!(self.is_contiguous());

        let len = self.layout.num_elements() * self.dt.nbytes();
        Tokens {
            dt: self.dt,
            bytes: &self.data[self.layout.offset() as usize..][..len],
        }
    }

    pub fn scalar(&self) -> u32 {
        let &[] = self.layout.shape() else {
            panic!("not a scalar tensor")
        };

        decode(self.dt, &self.data[self.layout.offset() as usize..])
    }
}

impl<const N: usize> Tensor<&mut [u8], N> {
    pub fn fill(&mut self, val: u32) {
        let len = self.element_size();
        let dt = self.dt;
        for chunk in self.bytes_mut().chunks_exact_mut(len) {
            encode(dt, val, chunk)
        }
    }

    /// 从首个元素开始依次写入 `tokens`。
    pub fn write(&mut self, tokens: &[u32]) {
        let len = self.element_size();
        let dt = self.dt;
        let bytes = self.bytes_mut();
        assert!(tokens.len() * len <= bytes.len());

        for (&t, chunk) in tokens.iter().zip(bytes.chunks_exact_mut(len)) {
            encode(dt, t, chunk)
        }
    }

    fn element_size(&self) -> usize {
        self.dt.nbytes()
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        assert!(self.is_contiguous());

        let len = self.layout.num_elements() * self.dt.nbytes();
        &mut self.data[self.layout.offset() as usize..][..len]
    }
}

/// 连续 token 张量的迭代器。
#[derive(Clone)]
pub struct Tokens<'s> {
    dt: DigitLayout,
    bytes: &'s [u8],
}

impl Iterator for Tokens<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.is_empty() {
            return None;
        }
        let (head, tail) = self.bytes.split_at(self.dt.nbytes());
        self.bytes = tail;
        Some(decode(self.dt, head))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.bytes.len() / self.dt.nbytes();
        (n, Some(n))
    }
}

impl ExactSizeIterator for Tokens<'_> {}

fn decode(dt: DigitLayout, bytes: &[u8]) -> u32 {
    match dt {
        types::U16 => u16::from_ne_bytes([bytes[0], bytes[1]]) as _,
        types::U32 => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        dt => panic!("not a token type: {dt:?}"),
    }
}

fn encode(dt: DigitLayout, val: u32, bytes: &mut [u8]) {
    assert!(val <= max_token(dt), "token {val} overflows {dt:?}");
    match dt {
        types::U16 => bytes.copy_from_slice(&(val as u16).to_ne_bytes()),
        types::U32 => bytes.copy_from_slice(&val.to_ne_bytes()),
        dt => panic!("not a token type: {dt:?}"),
    }
}

#[test]
fn test_fill_and_write() {
    let mut tensor = Tensor::<usize, 2>::new(types::U16, &[2, 3]).map(|len| vec![0u8; len]);
    tensor.as_deref_mut().fill(1);
    tensor.as_deref_mut().write(&[7, 8]);
    assert_eq!(
        tensor.as_deref().tokens().collect::<Vec<_>>(),
        [7, 8, 1, 1, 1, 1]
    );

    let mut tensor = Tensor::<usize, 1>::new(types::U32, &[2]).map(|len| vec![0u8; len]);
    tensor.as_deref_mut().write(&[70000, 3]);
    assert_eq!(tensor.as_deref().tokens().len(), 2);
    assert_eq!(tensor.as_deref().tokens().next(), Some(70000));
}

#[test]
#[should_panic]
fn test_overflow_u16() {
    let mut tensor = Tensor::<usize, 1>::new(types::U16, &[1]).map(|len| vec![0u8; len]);
    tensor.as_deref_mut().write(&[65536]);
}
