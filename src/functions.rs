//! Elementary functions on [`Var`], plus the escape hatch for nodes whose
//! partial derivatives the caller already knows.

use crate::error::AdError;
use crate::tape::{try_with_active_tape, with_active_tape};
use crate::var::Var;

impl Var {
    /// Record `value = f(self)` with local derivative `partial`.
    #[inline]
    fn unary(self, value: f64, partial: f64) -> Var {
        let id = with_active_tape(|t| t.push_unary(self.id, partial, value));
        Var::from_node(value, id)
    }

    #[inline]
    pub fn exp(self) -> Var {
        let e = self.value.exp();
        self.unary(e, e)
    }

    #[inline]
    pub fn ln(self) -> Var {
        self.unary(self.value.ln(), 1.0 / self.value)
    }

    #[inline]
    pub fn sqrt(self) -> Var {
        let s = self.value.sqrt();
        self.unary(s, 0.5 / s)
    }

    #[inline]
    pub fn sin(self) -> Var {
        self.unary(self.value.sin(), self.value.cos())
    }

    #[inline]
    pub fn cos(self) -> Var {
        self.unary(self.value.cos(), -self.value.sin())
    }

    #[inline]
    pub fn tan(self) -> Var {
        let t = self.value.tan();
        self.unary(t, 1.0 + t * t)
    }

    #[inline]
    pub fn tanh(self) -> Var {
        let t = self.value.tanh();
        self.unary(t, 1.0 - t * t)
    }

    /// Derivative at zero is taken as 0.
    #[inline]
    pub fn abs(self) -> Var {
        let d = if self.value > 0.0 {
            1.0
        } else if self.value < 0.0 {
            -1.0
        } else {
            0.0
        };
        self.unary(self.value.abs(), d)
    }

    #[inline]
    pub fn square(self) -> Var {
        self.unary(self.value * self.value, 2.0 * self.value)
    }

    #[inline]
    pub fn powf(self, n: f64) -> Var {
        self.unary(self.value.powf(n), n * self.value.powf(n - 1.0))
    }

    #[inline]
    pub fn powi(self, n: i32) -> Var {
        let d = if n == 0 {
            0.0
        } else {
            f64::from(n) * self.value.powi(n - 1)
        };
        self.unary(self.value.powi(n), d)
    }

    /// `self ^ exponent` with both sides differentiable.
    pub fn pow(self, exponent: Var) -> Var {
        let value = self.value.powf(exponent.value);
        let d_base = exponent.value * self.value.powf(exponent.value - 1.0);
        let d_exp = if self.value == 0.0 {
            0.0
        } else {
            value * self.value.ln()
        };
        let id = with_active_tape(|t| t.push_binary(self.id, d_base, exponent.id, d_exp, value));
        Var::from_node(value, id)
    }
}

/// Record a node with value `value` whose partial derivative with respect to
/// `operands[i]` is `gradients[i]`.
///
/// Fails before recording anything if the lengths differ or an operand
/// handle is stale.
pub fn precomputed_gradients(
    value: f64,
    operands: &[Var],
    gradients: &[f64],
) -> Result<Var, AdError> {
    if operands.len() != gradients.len() {
        return Err(AdError::SizeMismatch {
            function: "precomputed_gradients",
            lhs: "operands",
            lhs_len: operands.len(),
            rhs: "gradients",
            rhs_len: gradients.len(),
        });
    }
    let id = try_with_active_tape(|t| {
        let indices = operands
            .iter()
            .map(|v| t.resolve(v.id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok::<_, AdError>(t.push_precomputed(value, &indices, gradients))
    })??;
    Ok(Var::from_node(value, id))
}
