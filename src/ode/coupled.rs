//! The forward-sensitivity system built around a user ODE.
//!
//! For a base system of `N` states and `P` sensitivity parameters the coupled
//! state has `N + N * P` entries: the base state, then for each parameter `j`
//! the block `y[N + N*j .. N + N*(j+1)]` holding `d y_k / d p_j`.
//!
//! When the initial state is a parameter, the base part stores `y - y0`
//! instead of `y`. Its sensitivities then start at zero like every other
//! parameter's, and `y0` is added back when the states are decoupled.

use log::trace;

use super::OdeSystem;
use crate::dot_product::{resolve_operands, Operand};
use crate::error::{AdError, OdeError};
use crate::functions::precomputed_gradients;
use crate::nested::try_nested;
use crate::tape::try_with_active_tape;
use crate::var::Var;

/// Which inputs the sensitivities are taken with respect to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Coupling {
    /// Initial state and parameters are data; no sensitivities.
    None,
    /// Known initial state, unknown parameters.
    Params,
    /// Unknown initial state, known parameters.
    Initial,
    /// Both unknown. Initial-state sensitivities come first.
    Both,
}

impl Coupling {
    fn of(initial: bool, params: bool) -> Self {
        match (initial, params) {
            (false, false) => Coupling::None,
            (false, true) => Coupling::Params,
            (true, false) => Coupling::Initial,
            (true, true) => Coupling::Both,
        }
    }

    fn offsets_initial_state(self) -> bool {
        matches!(self, Coupling::Initial | Coupling::Both)
    }
}

pub struct CoupledOdeSystem<'a, F> {
    system: &'a F,
    coupling: Coupling,
    y0: Vec<f64>,
    theta: Vec<f64>,
    x: &'a [f64],
    x_int: &'a [i32],
    y0_vars: Vec<Var>,
    theta_vars: Vec<Var>,
}

impl<'a, F: OdeSystem> CoupledOdeSystem<'a, F> {
    /// The coupling is chosen by the operand types: `Var` entries are
    /// differentiated against, `f64` entries are data.
    ///
    /// Fails if a `Var` handle is stale.
    pub fn new<Y: Operand, P: Operand>(
        system: &'a F,
        y0: &[Y],
        theta: &[P],
        x: &'a [f64],
        x_int: &'a [i32],
    ) -> Result<Self, AdError> {
        if Y::TRACKED || P::TRACKED {
            try_with_active_tape(|t| {
                resolve_operands(t, y0)?;
                resolve_operands(t, theta)?;
                Ok::<_, AdError>(())
            })??;
        }
        Ok(CoupledOdeSystem {
            system,
            coupling: Coupling::of(Y::TRACKED, P::TRACKED),
            y0: y0.iter().map(Operand::primal).collect(),
            theta: theta.iter().map(Operand::primal).collect(),
            x,
            x_int,
            y0_vars: tracked_vars(y0),
            theta_vars: tracked_vars(theta),
        })
    }

    #[inline]
    pub fn coupling(&self) -> Coupling {
        self.coupling
    }

    /// Number of base states `N`.
    #[inline]
    pub fn num_states(&self) -> usize {
        self.y0.len()
    }

    /// Number of sensitivity parameters `P`.
    pub fn num_sensitivities(&self) -> usize {
        let (n, m) = (self.y0.len(), self.theta.len());
        match self.coupling {
            Coupling::None => 0,
            Coupling::Params => m,
            Coupling::Initial => n,
            Coupling::Both => n + m,
        }
    }

    /// `N + N * P`.
    pub fn size(&self) -> usize {
        let n = self.num_states();
        n + n * self.num_sensitivities()
    }

    /// Coupled state at `t0`: the base initial state (or zeros when it is
    /// offset) followed by zero sensitivities.
    pub fn initial_state(&self) -> Vec<f64> {
        let mut state = vec![0.0; self.size()];
        if !self.coupling.offsets_initial_state() {
            state[..self.y0.len()].copy_from_slice(&self.y0);
        }
        state
    }

    fn base_state(&self, y: &[f64]) -> Vec<f64> {
        let n = self.num_states();
        if self.coupling.offsets_initial_state() {
            y[..n].iter().zip(&self.y0).map(|(a, b)| a + b).collect()
        } else {
            y[..n].to_vec()
        }
    }

    fn check_rhs_len(&self, found: usize) -> Result<(), AdError> {
        let expected = self.num_states();
        if found != expected {
            return Err(OdeError::DerivativeSizeMismatch { expected, found }.into());
        }
        Ok(())
    }

    /// Time derivative of the coupled state `y` at `t`.
    ///
    /// Row `i` of the Jacobian is taken by one reverse sweep inside its own
    /// nested scope of the active session, so repeated calls do not grow
    /// the tape. Without sensitivities no session is needed.
    pub fn derivatives(&self, t: f64, y: &[f64]) -> Result<Vec<f64>, AdError> {
        if y.len() != self.size() {
            return Err(OdeError::CoupledStateSizeMismatch {
                expected: self.size(),
                found: y.len(),
            }
            .into());
        }
        let n = self.num_states();
        let base = self.base_state(y);
        let mut dy_dt = self
            .system
            .rhs::<f64>(t, &base, &self.theta, self.x, self.x_int);
        self.check_rhs_len(dy_dt.len())?;

        let p = self.num_sensitivities();
        if p == 0 {
            return Ok(dy_dt);
        }
        // Gradients are taken over (y, theta); Params sensitivities start
        // after the states.
        let direct = if self.coupling == Coupling::Params { n } else { 0 };
        let mut coupled = vec![0.0; n * p];
        for i in 0..n {
            let grad = try_nested(|| {
                let y_vars: Vec<Var> = base.iter().map(|&v| Var::new(v)).collect();
                let theta_vars: Vec<Var> = self.theta.iter().map(|&v| Var::new(v)).collect();
                let out = self
                    .system
                    .rhs::<Var>(t, &y_vars, &theta_vars, self.x, self.x_int);
                self.check_rhs_len(out.len())?;
                let wrt: Vec<Var> = y_vars.into_iter().chain(theta_vars).collect();
                out[i].grad_wrt(&wrt)
            })?;
            for j in 0..p {
                let mut d = grad[direct + j];
                for k in 0..n {
                    d += y[n + n * j + k] * grad[k];
                }
                coupled[i + j * n] = d;
            }
        }
        trace!("coupled derivatives at t = {t}: {n} states, {p} sensitivities");
        dy_dt.extend(coupled);
        Ok(dy_dt)
    }

    /// Turn coupled states into base states as `Var`s whose gradients with
    /// respect to the tracked inputs are the integrated sensitivities.
    pub fn decouple_states(&self, ys: &[Vec<f64>]) -> Result<Vec<Vec<Var>>, AdError> {
        let n = self.num_states();
        let p = self.num_sensitivities();
        let operands: Vec<Var> = match self.coupling {
            Coupling::None => Vec::new(),
            Coupling::Params => self.theta_vars.clone(),
            Coupling::Initial => self.y0_vars.clone(),
            Coupling::Both => self
                .y0_vars
                .iter()
                .chain(&self.theta_vars)
                .copied()
                .collect(),
        };
        let mut out = Vec::with_capacity(ys.len());
        for y in ys {
            if y.len() != self.size() {
                return Err(OdeError::CoupledStateSizeMismatch {
                    expected: self.size(),
                    found: y.len(),
                }
                .into());
            }
            let mut state = Vec::with_capacity(n);
            for j in 0..n {
                let v = if p == 0 {
                    try_with_active_tape(|t| Var::from_node(y[j], t.push_leaf(y[j])))?
                } else {
                    let grads: Vec<f64> = (0..p).map(|k| y[n + n * k + j]).collect();
                    precomputed_gradients(y[j], &operands, &grads)?
                };
                state.push(if self.coupling.offsets_initial_state() {
                    v + self.y0_vars[j]
                } else {
                    v
                });
            }
            out.push(state);
        }
        Ok(out)
    }
}

fn tracked_vars<A: Operand>(xs: &[A]) -> Vec<Var> {
    xs.iter()
        .filter_map(|x| x.node_id().map(|id| Var::from_node(x.primal(), id)))
        .collect()
}
