//! Left division by a triangular matrix, `C = A \ B`, as one multi-output node.
//!
//! The node packs the primal values of the used triangle of `A` and the
//! operand indices of whichever sides are tracked. Each entry of `C` is a leaf
//! recorded immediately after the node; those leaves carry the primal result
//! and collect adjoints from downstream, and the node reads them back when
//! the sweep reaches it:
//!
//! ```text
//! adjB  = A^T \ adjC
//! adjA -= adjB * C^T     (only on the packed triangle)
//! ```

use nalgebra::DMatrix;

use crate::arena::Span;
use crate::dot_product::{resolve_operands, Operand};
use crate::error::AdError;
use crate::node::{Buffers, Op, Sweep};
use crate::tape::{try_with_active_tape, Tape};
use crate::var::Var;

/// Which triangle of `A` is read; the other one is treated as zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TriangularView {
    Lower,
    Upper,
}

impl TriangularView {
    /// `(row, col)` pairs of the triangle, column by column.
    fn entries(self, m: usize) -> impl Iterator<Item = (usize, usize)> {
        (0..m).flat_map(move |j| {
            let rows = match self {
                TriangularView::Lower => j..m,
                TriangularView::Upper => 0..j + 1,
            };
            rows.map(move |i| (i, j))
        })
    }

    fn solve(self, a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
        let x = match self {
            TriangularView::Lower => a.solve_lower_triangular(b),
            TriangularView::Upper => a.solve_upper_triangular(b),
        };
        x.unwrap_or_else(|| DMatrix::from_element(b.nrows(), b.ncols(), f64::NAN))
    }

    /// Solve `A^T x = b` reading only this triangle of `A`.
    fn tr_solve(self, a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
        let x = match self {
            TriangularView::Lower => a.tr_solve_lower_triangular(b),
            TriangularView::Upper => a.tr_solve_upper_triangular(b),
        };
        x.unwrap_or_else(|| DMatrix::from_element(b.nrows(), b.ncols(), f64::NAN))
    }
}

/// Which operands receive adjoints.
#[derive(Clone, Copy, Debug)]
pub(crate) enum TriSolveKind {
    Both { a_refs: Span, b_refs: Span },
    LhsOnly { a_refs: Span },
    RhsOnly { b_refs: Span },
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct TriSolve {
    view: TriangularView,
    /// Rows (and columns) of `A`, rows of `B`.
    m: u32,
    /// Columns of `B`.
    n: u32,
    /// Tape index of `C[(0, 0)]`; the rest follow in column-major order.
    first_result: u32,
    /// Packed triangle of `A`.
    a: Span,
    kind: TriSolveKind,
}

impl TriSolve {
    pub(crate) fn chain(&self, sweep: &mut Sweep<'_>, buffers: &Buffers) {
        let (m, n) = (self.m as usize, self.n as usize);
        let first = self.first_result as usize;
        let result = |i: usize, j: usize| (first + i + j * m) as u32;
        let adj_c = DMatrix::from_fn(m, n, |i, j| sweep.adjoint(result(i, j)));
        if adj_c.iter().all(|&x| x == 0.0) {
            return;
        }

        let mut a = DMatrix::zeros(m, m);
        for ((i, j), &v) in self.view.entries(m).zip(buffers.values.slice(self.a)) {
            a[(i, j)] = v;
        }
        let adj_b = self.view.tr_solve(&a, &adj_c);

        let (a_refs, b_refs) = match self.kind {
            TriSolveKind::Both { a_refs, b_refs } => (Some(a_refs), Some(b_refs)),
            TriSolveKind::LhsOnly { a_refs } => (Some(a_refs), None),
            TriSolveKind::RhsOnly { b_refs } => (None, Some(b_refs)),
        };

        if let Some(a_refs) = a_refs {
            for ((i, j), &r) in self.view.entries(m).zip(buffers.refs.slice(a_refs)) {
                let mut s = 0.0;
                for k in 0..n {
                    s += adj_b[(i, k)] * sweep.value(result(j, k));
                }
                sweep.accumulate(r, -s);
            }
        }
        if let Some(b_refs) = b_refs {
            for (&g, &r) in adj_b.iter().zip(buffers.refs.slice(b_refs)) {
                sweep.accumulate(r, g);
            }
        }
    }
}

fn record_tri_solve<A: Operand, B: Operand>(
    tape: &mut Tape,
    view: TriangularView,
    a: &DMatrix<A>,
    b: &DMatrix<B>,
) -> Result<DMatrix<Var>, AdError> {
    let (m, n) = (a.nrows(), b.ncols());
    let a_refs = resolve_operands(tape, view.entries(m).map(|(i, j)| &a[(i, j)]))?;
    let b_refs = resolve_operands(tape, b.iter())?;

    let a_primal = DMatrix::from_fn(m, m, |i, j| a[(i, j)].primal());
    let b_primal = DMatrix::from_fn(m, n, |i, j| b[(i, j)].primal());
    let c = view.solve(&a_primal, &b_primal);

    if m * n == 0 {
        return Ok(DMatrix::from_vec(m, n, Vec::new()));
    }
    let buffers = tape.buffers_mut();
    let kind = match (a_refs, b_refs) {
        (Some(a_refs), Some(b_refs)) => Some(TriSolveKind::Both {
            a_refs: buffers.refs.alloc_copy(&a_refs),
            b_refs: buffers.refs.alloc_copy(&b_refs),
        }),
        (Some(a_refs), None) => Some(TriSolveKind::LhsOnly {
            a_refs: buffers.refs.alloc_copy(&a_refs),
        }),
        (None, Some(b_refs)) => Some(TriSolveKind::RhsOnly {
            b_refs: buffers.refs.alloc_copy(&b_refs),
        }),
        // Nothing to differentiate: the results are plain leaves.
        (None, None) => None,
    };
    if let Some(kind) = kind {
        let packed: Vec<f64> = view.entries(m).map(|(i, j)| a_primal[(i, j)]).collect();
        let a_span = tape.buffers_mut().values.alloc_copy(&packed);
        let first_result = tape.len() as u32 + 1;
        tape.push(
            0.0,
            Op::TriSolve(TriSolve {
                view,
                m: m as u32,
                n: n as u32,
                first_result,
                a: a_span,
                kind,
            }),
        );
    }
    let results: Vec<Var> = c
        .iter()
        .map(|&v| Var::from_node(v, tape.push_leaf(v)))
        .collect();
    Ok(DMatrix::from_vec(m, n, results))
}

/// `A \ B` for triangular `A`.
///
/// Either operand may hold `f64` or [`Var`] entries; only tracked operands
/// receive adjoints. Entries of `A` outside `view` are ignored and receive
/// nothing. Shapes are checked before anything is recorded.
///
/// ```
/// use nalgebra::DMatrix;
/// use revtape::{mdivide_left_tri, Session, TriangularView, Var};
///
/// let _s = Session::new();
/// let a = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 1.0, 3.0]);
/// let b = DMatrix::from_fn(2, 1, |i, _| Var::new([5.0, 11.0][i]));
/// let c = mdivide_left_tri(TriangularView::Lower, &a, &b).unwrap();
/// assert_eq!(c[(0, 0)].value(), 2.5);
/// ```
pub fn mdivide_left_tri<A: Operand, B: Operand>(
    view: TriangularView,
    a: &DMatrix<A>,
    b: &DMatrix<B>,
) -> Result<DMatrix<Var>, AdError> {
    if a.nrows() != a.ncols() {
        return Err(AdError::NotSquare {
            function: "mdivide_left_tri",
            rows: a.nrows(),
            cols: a.ncols(),
        });
    }
    if a.ncols() != b.nrows() {
        return Err(AdError::NotMultiplicable {
            function: "mdivide_left_tri",
            lhs_cols: a.ncols(),
            rhs_rows: b.nrows(),
        });
    }
    try_with_active_tape(|t| record_tri_solve(t, view, a, b))?
}

/// [`mdivide_left_tri`] reading the lower triangle of `A`.
pub fn mdivide_left_tri_low<A: Operand, B: Operand>(
    a: &DMatrix<A>,
    b: &DMatrix<B>,
) -> Result<DMatrix<Var>, AdError> {
    mdivide_left_tri(TriangularView::Lower, a, b)
}
