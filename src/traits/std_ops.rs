use std::iter::{Product, Sum};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::tape;
use crate::var::Var;

// ──────────────────────────────────────────────
//  Var ∘ Var
// ──────────────────────────────────────────────

impl Add for Var {
    type Output = Var;
    #[inline]
    fn add(self, rhs: Var) -> Var {
        let value = self.value + rhs.value;
        let id = tape::with_active_tape(|t| t.push_binary(self.id, 1.0, rhs.id, 1.0, value));
        Var::from_node(value, id)
    }
}

impl Sub for Var {
    type Output = Var;
    #[inline]
    fn sub(self, rhs: Var) -> Var {
        let value = self.value - rhs.value;
        let id = tape::with_active_tape(|t| t.push_binary(self.id, 1.0, rhs.id, -1.0, value));
        Var::from_node(value, id)
    }
}

impl Mul for Var {
    type Output = Var;
    #[inline]
    fn mul(self, rhs: Var) -> Var {
        let value = self.value * rhs.value;
        let id = tape::with_active_tape(|t| {
            t.push_binary(self.id, rhs.value, rhs.id, self.value, value)
        });
        Var::from_node(value, id)
    }
}

impl Div for Var {
    type Output = Var;
    #[inline]
    fn div(self, rhs: Var) -> Var {
        let inv = 1.0 / rhs.value;
        let value = self.value * inv;
        let id = tape::with_active_tape(|t| {
            t.push_binary(self.id, inv, rhs.id, -value * inv, value)
        });
        Var::from_node(value, id)
    }
}

impl Neg for Var {
    type Output = Var;
    #[inline]
    fn neg(self) -> Var {
        let value = -self.value;
        let id = tape::with_active_tape(|t| t.push_unary(self.id, -1.0, value));
        Var::from_node(value, id)
    }
}

// ──────────────────────────────────────────────
//  Mixed Var / f64
// ──────────────────────────────────────────────

// Constants are not recorded; each mixed op is a unary node on the Var side.
macro_rules! impl_mixed_op {
    ($trait:ident, $method:ident, |$a:ident, $b:ident| $value:expr, var_lhs: $dl:expr, var_rhs: $dr:expr) => {
        impl $trait<f64> for Var {
            type Output = Var;
            #[inline]
            fn $method(self, rhs: f64) -> Var {
                let ($a, $b) = (self.value, rhs);
                let value = $value;
                let partial = $dl;
                let id = tape::with_active_tape(|t| t.push_unary(self.id, partial, value));
                Var::from_node(value, id)
            }
        }

        impl $trait<Var> for f64 {
            type Output = Var;
            #[inline]
            fn $method(self, rhs: Var) -> Var {
                let ($a, $b) = (self, rhs.value);
                let value = $value;
                let partial = $dr;
                let id = tape::with_active_tape(|t| t.push_unary(rhs.id, partial, value));
                Var::from_node(value, id)
            }
        }
    };
}

impl_mixed_op!(Add, add, |a, b| a + b, var_lhs: 1.0, var_rhs: 1.0);
impl_mixed_op!(Sub, sub, |a, b| a - b, var_lhs: 1.0, var_rhs: -1.0);
impl_mixed_op!(Mul, mul, |a, b| a * b, var_lhs: b, var_rhs: a);
impl_mixed_op!(Div, div, |a, b| a / b, var_lhs: 1.0 / b, var_rhs: -a / (b * b));

// ──────────────────────────────────────────────
//  Compound assignment
// ──────────────────────────────────────────────

macro_rules! impl_assign_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait for Var {
            #[inline]
            fn $method(&mut self, rhs: Var) {
                *self = *self $op rhs;
            }
        }

        impl $trait<f64> for Var {
            #[inline]
            fn $method(&mut self, rhs: f64) {
                *self = *self $op rhs;
            }
        }
    };
}

impl_assign_op!(AddAssign, add_assign, +);
impl_assign_op!(SubAssign, sub_assign, -);
impl_assign_op!(MulAssign, mul_assign, *);
impl_assign_op!(DivAssign, div_assign, /);

// ──────────────────────────────────────────────
//  Iterator folds
// ──────────────────────────────────────────────

/// Sums into a single node with unit partials instead of a chain of
/// binary additions.
impl Sum for Var {
    fn sum<I: Iterator<Item = Var>>(iter: I) -> Var {
        let terms: Vec<Var> = iter.collect();
        let value = terms.iter().map(|v| v.value).sum();
        let id = tape::with_active_tape(|t| {
            let operands: Vec<u32> = terms.iter().map(|v| t.live(v.id)).collect();
            let ones = vec![1.0; operands.len()];
            t.push_precomputed(value, &operands, &ones)
        });
        Var::from_node(value, id)
    }
}

impl<'a> Sum<&'a Var> for Var {
    fn sum<I: Iterator<Item = &'a Var>>(iter: I) -> Var {
        iter.copied().sum()
    }
}

impl Product for Var {
    fn product<I: Iterator<Item = Var>>(iter: I) -> Var {
        let mut iter = iter;
        match iter.next() {
            Some(first) => iter.fold(first, |acc, v| acc * v),
            None => Var::new(1.0),
        }
    }
}
