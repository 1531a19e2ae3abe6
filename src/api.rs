use nalgebra::DMatrix;

use crate::dot_product::dot_product;
use crate::error::AdError;
use crate::nested::try_nested;
use crate::tape::{has_active_session, Session};
use crate::var::{self, Var};

/// Run `f` in a nested scope of the active session, or in a temporary
/// session when there is none. Either way nothing `f` records survives.
fn scoped<R>(f: impl FnOnce() -> Result<R, AdError>) -> Result<R, AdError> {
    if has_active_session() {
        try_nested(f)
    } else {
        let _session = Session::new();
        f()
    }
}

/// Value and gradient of a scalar function `f : R^n → R`.
///
/// ```
/// let (v, g) = revtape::gradient(|x| x[0] * x[0] + x[1] * x[1], &[3.0, 4.0]).unwrap();
/// assert_eq!(v, 25.0);
/// assert_eq!(g, vec![6.0, 8.0]);
/// ```
pub fn gradient(
    f: impl FnOnce(&[Var]) -> Var,
    x: &[f64],
) -> Result<(f64, Vec<f64>), AdError> {
    scoped(|| {
        let inputs = var::vars(x);
        let output = f(&inputs);
        let grad = output.grad_wrt(&inputs)?;
        Ok((output.value(), grad))
    })
}

/// Values and Jacobian of `f : R^n → R^m`, one reverse sweep per output.
///
/// Returns `(f(x), J)` with `J[(i, j)] = ∂f_i/∂x_j`.
pub fn jacobian(
    f: impl FnOnce(&[Var]) -> Vec<Var>,
    x: &[f64],
) -> Result<(Vec<f64>, DMatrix<f64>), AdError> {
    scoped(|| {
        let inputs = var::vars(x);
        let outputs = f(&inputs);
        let mut jac = DMatrix::zeros(outputs.len(), inputs.len());
        for (i, out) in outputs.iter().enumerate() {
            let row = out.grad_wrt(&inputs)?;
            for (j, d) in row.into_iter().enumerate() {
                jac[(i, j)] = d;
            }
        }
        Ok((var::values(&outputs), jac))
    })
}

/// Vector-Jacobian product: `(f(x), wᵀ·J)` from a single sweep.
pub fn vjp(
    f: impl FnOnce(&[Var]) -> Vec<Var>,
    x: &[f64],
    w: &[f64],
) -> Result<(Vec<f64>, Vec<f64>), AdError> {
    scoped(|| {
        let inputs = var::vars(x);
        let outputs = f(&inputs);
        if outputs.len() != w.len() {
            return Err(AdError::SizeMismatch {
                function: "vjp",
                lhs: "outputs",
                lhs_len: outputs.len(),
                rhs: "weights",
                rhs_len: w.len(),
            });
        }
        let weighted = dot_product(&outputs, w)?;
        let grad = weighted.grad_wrt(&inputs)?;
        Ok((var::values(&outputs), grad))
    })
}
