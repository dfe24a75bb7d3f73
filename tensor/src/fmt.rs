use crate::Tensor;
use digit_layout::types;
use std::fmt;

impl<const N: usize> fmt::Display for Tensor<&[u8], N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let layout = self.layout();
        let ptr = self.get().as_ptr();

        unsafe {
            match self.dt() {
                types::U16 => layout.write_array(f, ptr.cast::<TokenFmt<u16>>()),
                types::U32 => layout.write_array(f, ptr.cast::<TokenFmt<u32>>()),
                dt => panic!("not a token type: {dt:?}"),
            }
        }
    }
}

#[derive(Clone, Copy)]
#[repr(transparent)]
struct TokenFmt<T: Copy>(T);

impl fmt::Display for TokenFmt<u16> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:>6}", self.0)
    }
}

impl fmt::Display for TokenFmt<u32> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:>7}", self.0)
    }
}
