use super::Tensor;
use ndarray_layout::{ArrayLayout, Endian::BigEndian};

impl<T, const N: usize> Tensor<T, N> {
    /// 逐个消去最高维，例如矩阵的 `index(&[i])` 即第 i 行。
    pub fn index(self, indices: &[usize]) -> Self {
        let mut layout = self.layout.clone();
        for &index in indices {
            layout = layout.index(0, index)
        }
        Self {
            dt: self.dt,
            layout,
            data: self.data,
        }
    }
}

impl<'s, const N: usize> Tensor<&'s [u8], N> {
    /// 取最高维上 `start..start + len` 的连续切片。
    pub fn rows(&self, start: usize, len: usize) -> Self {
        assert!(self.is_contiguous());

        let mut shape = self.shape().to_vec();
        let [rows, ..] = &mut *shape else {
            panic!("not a matrix")
        };
        assert!(start + len <= *rows);
        *rows = len;

        let &[stride, ..] = self.layout.strides() else {
            unreachable!()
        };
        let offset = self.layout.offset() as usize + start * stride as usize;
        let layout = ArrayLayout::new_contiguous(&shape, BigEndian, self.dt.nbytes());
        let size = layout.num_elements() * self.dt.nbytes();
        Self {
            dt: self.dt,
            layout,
            data: &self.data[offset..][..size],
        }
    }
}

#[test]
fn test_rows() {
    use digit_layout::types;

    let mut tensor = Tensor::<usize, 2>::new(types::U16, &[4, 2]).map(|len| vec![0u8; len]);
    tensor.as_deref_mut().write(&[1, 2, 3, 4, 5, 6, 7, 8]);

    let tensor = tensor.as_deref();
    let rows = tensor.rows(1, 2);
    assert_eq!(rows.shape(), &[2, 2]);
    assert_eq!(rows.tokens().collect::<Vec<_>>(), [3, 4, 5, 6]);

    let row = rows.index(&[1]);
    assert_eq!(row.shape(), &[2]);
    assert_eq!(row.tokens().collect::<Vec<_>>(), [5, 6]);
    assert_eq!(row.index(&[0]).scalar(), 5);
}
