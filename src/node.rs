//! Operation nodes: the entries of the tape.
//!
//! A node holds its primal value, its adjoint accumulator and an [`Op`]
//! describing how to push that adjoint into its operands. Operands are
//! referenced by tape index; because every operand was recorded before the
//! node that uses it, those indices always point at live nodes.

use crate::arena::{Arena, Span};
use crate::dot_product::DotProduct;
use crate::tri_solve::TriSolve;

/// Handle to a node: its position on the tape plus the generation the
/// position was recorded under.
///
/// A handle only resolves while the node it was issued for is still on the
/// tape. Once the region holding it is recovered, the index is either past
/// the end of the tape or reused by a node of a newer generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u64,
}

impl NodeId {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct Node {
    pub value: f64,
    pub adjoint: f64,
    pub generation: u64,
    pub op: Op,
}

/// Closed set of node kinds. Data that does not fit inline is packed into
/// the tape's arenas and addressed by [`Span`].
#[derive(Clone, Copy, Debug)]
pub(crate) enum Op {
    /// Independent variable, or an output slot of a multi-output node.
    Leaf,
    Unary {
        operand: u32,
        partial: f64,
    },
    Binary {
        lhs: u32,
        lhs_partial: f64,
        rhs: u32,
        rhs_partial: f64,
    },
    /// Operand indices in `refs`, matching partials in `values`.
    Precomputed {
        operands: Span,
        partials: Span,
    },
    Dot(DotProduct),
    TriSolve(TriSolve),
}

/// Arena pools owned by the tape.
pub(crate) struct Buffers {
    pub values: Arena<f64>,
    pub refs: Arena<u32>,
}

/// Mutable view of the tape during a reverse sweep.
///
/// Nodes below `floor` were recorded before the innermost nested scope and
/// are constants for this sweep: contributions to them are dropped.
pub(crate) struct Sweep<'a> {
    nodes: &'a mut [Node],
    floor: u32,
}

impl<'a> Sweep<'a> {
    #[inline]
    pub fn new(nodes: &'a mut [Node], floor: u32) -> Self {
        Sweep { nodes, floor }
    }

    #[inline]
    pub fn value(&self, index: u32) -> f64 {
        self.nodes[index as usize].value
    }

    #[inline]
    pub fn adjoint(&self, index: u32) -> f64 {
        self.nodes[index as usize].adjoint
    }

    #[inline]
    pub fn node(&self, index: usize) -> Node {
        self.nodes[index]
    }

    #[inline]
    pub fn accumulate(&mut self, index: u32, d: f64) {
        if index >= self.floor {
            self.nodes[index as usize].adjoint += d;
        }
    }
}

impl Op {
    /// Add `adjoint * d(self)/d(operand)` into every operand's adjoint.
    ///
    /// Must not panic on numeric input: bad values turn into NaN/Inf.
    #[inline]
    pub(crate) fn chain(&self, adjoint: f64, sweep: &mut Sweep<'_>, buffers: &Buffers) {
        match *self {
            Op::Leaf => {}
            Op::Unary { operand, partial } => {
                if adjoint != 0.0 {
                    sweep.accumulate(operand, adjoint * partial);
                }
            }
            Op::Binary {
                lhs,
                lhs_partial,
                rhs,
                rhs_partial,
            } => {
                if adjoint != 0.0 {
                    sweep.accumulate(lhs, adjoint * lhs_partial);
                    sweep.accumulate(rhs, adjoint * rhs_partial);
                }
            }
            Op::Precomputed { operands, partials } => {
                if adjoint != 0.0 {
                    let idx = buffers.refs.slice(operands);
                    let d = buffers.values.slice(partials);
                    for (&i, &di) in idx.iter().zip(d) {
                        sweep.accumulate(i, adjoint * di);
                    }
                }
            }
            Op::Dot(ref dot) => dot.chain(adjoint, sweep, buffers),
            // Driven by the adjoints of its output slots, not its own.
            Op::TriSolve(ref solve) => solve.chain(sweep, buffers),
        }
    }
}
