//! 由装箱后的一行生成目标行。
//!
//! 行被视为环：位置 `i` 的目标是 `row[i + 1]`，但仅当 `row[i + 2]` 是 eos 时才计分，
//! 其余位置一律填 eos，由评测端忽略。

/// 见模块文档，`target` 与 `row` 等长。
pub fn derive_target_into(row: &[u32], eos: u32, target: &mut [u32]) {
    let n = row.len();
    assert_eq!(target.len(), n);

    for (i, t) in target.iter_mut().enumerate() {
        let next = row[(i + 1) % n];
        let after_next = row[(i + 2) % n];
        *t = if after_next == eos { next } else { eos }
    }
}

pub fn derive_target(row: &[u32], eos: u32) -> Vec<u32> {
    let mut target = vec![eos; row.len()];
    derive_target_into(row, eos, &mut target);
    target
}

#[test]
fn test_cloze() {
    // 5 6 <eos> | 7 <eos> | pad
    let row = [5, 6, 0, 7, 0, 1];
    assert_eq!(derive_target(&row, 0), [6, 0, 7, 0, 0, 0]);
}

#[test]
fn test_wraparound() {
    // eos 在第 1 位，计分位置绕回到末尾
    let row = [9, 0, 1, 1, 1];
    assert_eq!(derive_target(&row, 0), [0, 0, 0, 0, 9]);

    // eos 在第 0 位
    let row = [0, 1, 1, 8];
    assert_eq!(derive_target(&row, 0), [0, 0, 8, 0]);
}

#[test]
fn test_short_rows() {
    assert_eq!(derive_target(&[], 0), Vec::<u32>::new());
    assert_eq!(derive_target(&[0], 0), [0]);
    assert_eq!(derive_target(&[4], 0), [0]);
    assert_eq!(derive_target(&[4, 0], 0), [0, 4]);
    assert_eq!(derive_target(&[4, 5], 5), [5, 4]);
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn single_eos(n in 3..128usize, k in 0..128usize, before in 2..1000u32) {
            let k = k % n;
            let mut row = vec![1; n];
            row[k] = 0;
            row[(k + n - 1) % n] = before;

            let target = derive_target(&row, 0);
            let scored = (k + n - 2) % n;
            for (i, &t) in target.iter().enumerate() {
                if i == scored {
                    prop_assert_eq!(t, before);
                } else {
                    prop_assert_eq!(t, 0);
                }
            }
        }

        #[test]
        fn same_shape(row in prop::collection::vec(0..50u32, 1..64), eos in 0..50u32) {
            prop_assert_eq!(derive_target(&row, eos).len(), row.len());
        }
    }
}
