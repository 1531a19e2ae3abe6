//! Dot products as single multi-operand nodes.
//!
//! Either side may be plain numbers or [`Var`]s. A tracked side is packed as
//! operand indices (its primals are read back from the tape during the
//! sweep); a constant side is packed as primal values. Constant sides get no
//! adjoint, and two constant sides record only a leaf.

use nalgebra::{DMatrix, DVector, RowDVector};

use crate::arena::Span;
use crate::error::AdError;
use crate::node::{Buffers, NodeId, Op, Sweep};
use crate::tape::{try_with_active_tape, Tape};
use crate::var::Var;

/// Element type accepted by the matrix operations: `f64` (constant) or
/// [`Var`] (tracked).
pub trait Operand: nalgebra::Scalar + Copy {
    /// Whether values of this type carry a tape node.
    const TRACKED: bool;

    fn primal(&self) -> f64;

    fn node_id(&self) -> Option<NodeId>;
}

impl Operand for f64 {
    const TRACKED: bool = false;

    #[inline]
    fn primal(&self) -> f64 {
        *self
    }

    #[inline]
    fn node_id(&self) -> Option<NodeId> {
        None
    }
}

impl Operand for Var {
    const TRACKED: bool = true;

    #[inline]
    fn primal(&self) -> f64 {
        self.value
    }

    #[inline]
    fn node_id(&self) -> Option<NodeId> {
        Some(self.id)
    }
}

/// Resolve the handles of a tracked operand sequence. `None` for constants.
pub(crate) fn resolve_operands<'a, A: Operand + 'a>(
    tape: &Tape,
    xs: impl IntoIterator<Item = &'a A>,
) -> Result<Option<Vec<u32>>, AdError> {
    if !A::TRACKED {
        return Ok(None);
    }
    xs.into_iter()
        .filter_map(Operand::node_id)
        .map(|id| tape.resolve(id))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// One side of a dot product.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Packed {
    /// Operand indices into the tape.
    Tracked(Span),
    /// Primal values.
    Constant(Span),
}

impl Packed {
    fn pack<A: Operand>(tape: &mut Tape, xs: &[A], refs: Option<Vec<u32>>) -> Packed {
        let buffers = tape.buffers_mut();
        match refs {
            Some(refs) => Packed::Tracked(buffers.refs.alloc_copy(&refs)),
            None => Packed::Constant(buffers.values.alloc_extend(xs.iter().map(Operand::primal))),
        }
    }

    #[inline]
    fn primal(&self, i: usize, sweep: &Sweep<'_>, buffers: &Buffers) -> f64 {
        match *self {
            Packed::Tracked(refs) => sweep.value(buffers.refs.slice(refs)[i]),
            Packed::Constant(values) => buffers.values.slice(values)[i],
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct DotProduct {
    len: u32,
    lhs: Packed,
    rhs: Packed,
}

impl DotProduct {
    pub(crate) fn chain(&self, adjoint: f64, sweep: &mut Sweep<'_>, buffers: &Buffers) {
        if adjoint == 0.0 {
            return;
        }
        for i in 0..self.len as usize {
            let l = self.lhs.primal(i, sweep, buffers);
            let r = self.rhs.primal(i, sweep, buffers);
            if let Packed::Tracked(refs) = self.lhs {
                sweep.accumulate(buffers.refs.slice(refs)[i], adjoint * r);
            }
            if let Packed::Tracked(refs) = self.rhs {
                sweep.accumulate(buffers.refs.slice(refs)[i], adjoint * l);
            }
        }
    }
}

fn record_dot<A: Operand, B: Operand>(tape: &mut Tape, a: &[A], b: &[B]) -> Result<Var, AdError> {
    let value = a
        .iter()
        .zip(b)
        .map(|(x, y)| x.primal() * y.primal())
        .sum::<f64>();
    let a_refs = resolve_operands(tape, a)?;
    let b_refs = resolve_operands(tape, b)?;
    if a_refs.is_none() && b_refs.is_none() {
        return Ok(Var::from_node(value, tape.push_leaf(value)));
    }
    let lhs = Packed::pack(tape, a, a_refs);
    let rhs = Packed::pack(tape, b, b_refs);
    let id = tape.push(
        value,
        Op::Dot(DotProduct {
            len: a.len() as u32,
            lhs,
            rhs,
        }),
    );
    Ok(Var::from_node(value, id))
}

/// `sum_i a[i] * b[i]` as one node.
///
/// ```
/// use revtape::{dot_product, Session, Var};
///
/// let _s = Session::new();
/// let x = [Var::new(1.0), Var::new(2.0)];
/// let d = dot_product(&x, &[3.0, 4.0]).unwrap();
/// assert_eq!(d.value(), 11.0);
/// assert_eq!(d.grad_wrt(&x).unwrap(), vec![3.0, 4.0]);
/// ```
pub fn dot_product<A: Operand, B: Operand>(a: &[A], b: &[B]) -> Result<Var, AdError> {
    if a.len() != b.len() {
        return Err(AdError::SizeMismatch {
            function: "dot_product",
            lhs: "v1",
            lhs_len: a.len(),
            rhs: "v2",
            rhs_len: b.len(),
        });
    }
    try_with_active_tape(|t| record_dot(t, a, b))?
}

fn check_same_shape<A: Operand, B: Operand>(
    function: &'static str,
    a: &DMatrix<A>,
    b: &DMatrix<B>,
) -> Result<(), AdError> {
    if a.nrows() != b.nrows() {
        return Err(AdError::SizeMismatch {
            function,
            lhs: "rows of v1",
            lhs_len: a.nrows(),
            rhs: "rows of v2",
            rhs_len: b.nrows(),
        });
    }
    if a.ncols() != b.ncols() {
        return Err(AdError::SizeMismatch {
            function,
            lhs: "columns of v1",
            lhs_len: a.ncols(),
            rhs: "columns of v2",
            rhs_len: b.ncols(),
        });
    }
    Ok(())
}

/// Dot product of each pair of columns; one node per column.
pub fn columns_dot_product<A: Operand, B: Operand>(
    a: &DMatrix<A>,
    b: &DMatrix<B>,
) -> Result<RowDVector<Var>, AdError> {
    check_same_shape("columns_dot_product", a, b)?;
    try_with_active_tape(|t| {
        resolve_operands(t, a.iter())?;
        resolve_operands(t, b.iter())?;
        let mut out = Vec::with_capacity(a.ncols());
        for j in 0..a.ncols() {
            let x: Vec<A> = a.column(j).iter().copied().collect();
            let y: Vec<B> = b.column(j).iter().copied().collect();
            out.push(record_dot(t, &x, &y)?);
        }
        Ok::<_, AdError>(RowDVector::from_vec(out))
    })?
}

/// Dot product of each pair of rows; one node per row.
pub fn rows_dot_product<A: Operand, B: Operand>(
    a: &DMatrix<A>,
    b: &DMatrix<B>,
) -> Result<DVector<Var>, AdError> {
    check_same_shape("rows_dot_product", a, b)?;
    try_with_active_tape(|t| {
        resolve_operands(t, a.iter())?;
        resolve_operands(t, b.iter())?;
        let mut out = Vec::with_capacity(a.nrows());
        for i in 0..a.nrows() {
            let x: Vec<A> = a.row(i).iter().copied().collect();
            let y: Vec<B> = b.row(i).iter().copied().collect();
            out.push(record_dot(t, &x, &y)?);
        }
        Ok::<_, AdError>(DVector::from_vec(out))
    })?
}
