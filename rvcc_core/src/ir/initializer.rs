//! Flattening of array initializers to the row-major `[VarValue]` a `GlobalVar` or
//! local `alloca`'s initial-store sequence needs (spec §4.1, "Constants").
//!
//! `Initializer` is the minimal initializer-tree shape the frontend contract (§6.1)
//! hands the builder: a scalar leaf, or a brace-delimited list of sub-initializers.
//! A nested `{}` always initializes the next whole sub-block of the enclosing
//! dimension — any elements it leaves unmentioned are zero-filled — while a run of
//! bare scalars at the same brace level fills positions back-to-back, C-style.

use super::module::VarValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    Scalar(VarValue),
    List(Vec<Initializer>),
}

/// Flattens `init` against `dims` into a row-major buffer of length
/// `dims.iter().product()` (or 1 for a scalar declaration, `dims == []`).
pub fn fill(dims: &[u32], init: &Initializer, is_float: bool) -> Vec<VarValue> {
    let total = dims.iter().map(|d| *d as usize).product::<usize>().max(1);
    let zero = zero_value(is_float);
    let mut out = flatten(dims, init, zero);
    out.resize(total, zero);
    out.truncate(total);
    out
}

fn zero_value(is_float: bool) -> VarValue {
    if is_float {
        VarValue::F32(0.0)
    } else {
        VarValue::I32(0)
    }
}

fn sub_block_size(dims: &[u32]) -> usize {
    dims.get(1..).map(|d| d.iter().map(|x| *x as usize).product::<usize>()).unwrap_or(1).max(1)
}

fn flatten(dims: &[u32], init: &Initializer, zero: VarValue) -> Vec<VarValue> {
    match init {
        Initializer::Scalar(v) => vec![*v],
        Initializer::List(items) => {
            let sub_size = sub_block_size(dims);
            let inner_dims = dims.get(1..).unwrap_or(&[]);
            let mut out = Vec::new();
            for item in items {
                let is_nested_list = matches!(item, Initializer::List(_));
                if is_nested_list && dims.len() > 1 {
                    // Align to the next whole sub-block boundary, zero-filling the
                    // remainder of whatever sub-block was in progress.
                    let rem = out.len() % sub_size;
                    if rem != 0 {
                        out.resize(out.len() - rem + sub_size, zero);
                    }
                }
                if is_nested_list {
                    out.extend(flatten(inner_dims, item, zero));
                } else {
                    out.push(match item {
                        Initializer::Scalar(v) => *v,
                        Initializer::List(_) => unreachable!(),
                    });
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_scalar_list_fills_in_order() {
        let dims = [4u32];
        let init = Initializer::List(vec![
            Initializer::Scalar(VarValue::I32(1)),
            Initializer::Scalar(VarValue::I32(2)),
        ]);
        let out = fill(&dims, &init, false);
        assert_eq!(out, vec![VarValue::I32(1), VarValue::I32(2), VarValue::I32(0), VarValue::I32(0)]);
    }

    #[test]
    fn nested_brace_advances_to_next_row() {
        // int a[2][2] = {{1}, {2, 3}};
        let dims = [2u32, 2u32];
        let init = Initializer::List(vec![
            Initializer::List(vec![Initializer::Scalar(VarValue::I32(1))]),
            Initializer::List(vec![Initializer::Scalar(VarValue::I32(2)), Initializer::Scalar(VarValue::I32(3))]),
        ]);
        let out = fill(&dims, &init, false);
        assert_eq!(out, vec![VarValue::I32(1), VarValue::I32(0), VarValue::I32(2), VarValue::I32(3)]);
    }

    #[test]
    fn absent_positions_are_zero_filled() {
        let dims = [3u32];
        let init = Initializer::List(vec![Initializer::Scalar(VarValue::I32(7))]);
        let out = fill(&dims, &init, false);
        assert_eq!(out, vec![VarValue::I32(7), VarValue::I32(0), VarValue::I32(0)]);
    }

    #[test]
    fn mixed_scalars_then_nested_brace_realigns() {
        // int a[3][2] = {1, {2, 3}, 4};
        let dims = [3u32, 2u32];
        let init = Initializer::List(vec![
            Initializer::Scalar(VarValue::I32(1)),
            Initializer::List(vec![Initializer::Scalar(VarValue::I32(2)), Initializer::Scalar(VarValue::I32(3))]),
            Initializer::Scalar(VarValue::I32(4)),
        ]);
        let out = fill(&dims, &init, false);
        assert_eq!(
            out,
            vec![
                VarValue::I32(1),
                VarValue::I32(0),
                VarValue::I32(2),
                VarValue::I32(3),
                VarValue::I32(4),
                VarValue::I32(0),
            ]
        );
    }
}
