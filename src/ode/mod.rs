//! ODE solutions with forward sensitivities.
//!
//! [`integrate_ode`] integrates the [`CoupledOdeSystem`] built around a user
//! [`OdeSystem`] and returns the states as `Var`s, so the solution can take
//! part in a larger reverse-mode computation. The Jacobian rows the coupled
//! system needs are computed with nested reverse sweeps on the active tape.

mod coupled;
mod integrator;

use log::debug;

pub use coupled::{CoupledOdeSystem, Coupling};

use crate::dot_product::Operand;
use crate::error::{AdError, OdeError};
use crate::scalar::Scalar;
use crate::var::Var;

/// Right-hand side of `dy/dt = f(t, y, theta, x, x_int)`.
///
/// Written once, generically: it is evaluated with `T = f64` to advance the
/// state and with `T = Var` to differentiate it.
///
/// ```
/// use revtape::{OdeSystem, Scalar};
///
/// /// Damped harmonic oscillator.
/// struct Harmonic;
///
/// impl OdeSystem for Harmonic {
///     fn rhs<T: Scalar>(&self, _t: f64, y: &[T], theta: &[T], _x: &[f64], _x_int: &[i32]) -> Vec<T> {
///         vec![y[1], -y[0] - theta[0] * y[1]]
///     }
/// }
/// ```
pub trait OdeSystem {
    fn rhs<T: Scalar>(&self, t: f64, y: &[T], theta: &[T], x: &[f64], x_int: &[i32]) -> Vec<T>;
}

/// Integrator settings.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OdeConfig {
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    /// First trial step.
    pub initial_step: f64,
    /// Accepted plus rejected steps allowed over the whole integration.
    pub max_num_steps: usize,
    /// A rejected step shrinking below this aborts the integration.
    pub minimum_step: f64,
}

impl Default for OdeConfig {
    fn default() -> Self {
        OdeConfig {
            relative_tolerance: 1e-6,
            absolute_tolerance: 1e-6,
            initial_step: 0.1,
            max_num_steps: 100_000,
            minimum_step: 1e-13,
        }
    }
}

fn check_finite(name: &'static str, xs: impl IntoIterator<Item = f64>) -> Result<(), OdeError> {
    for (index, value) in xs.into_iter().enumerate() {
        if !value.is_finite() {
            return Err(OdeError::NonFinite { name, index, value });
        }
    }
    Ok(())
}

impl OdeConfig {
    /// Check that tolerances and step sizes describe a forward integration.
    pub fn validate(&self) -> Result<(), OdeError> {
        let positive = [
            ("relative_tolerance", self.relative_tolerance),
            ("absolute_tolerance", self.absolute_tolerance),
            ("initial_step", self.initial_step),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(OdeError::InvalidConfig {
                    name,
                    value,
                    requirement: "finite and positive",
                });
            }
        }
        if !(self.minimum_step.is_finite() && self.minimum_step >= 0.0) {
            return Err(OdeError::InvalidConfig {
                name: "minimum_step",
                value: self.minimum_step,
                requirement: "finite and non-negative",
            });
        }
        if self.minimum_step > self.initial_step {
            return Err(OdeError::InvalidConfig {
                name: "minimum_step",
                value: self.minimum_step,
                requirement: "no larger than initial_step",
            });
        }
        Ok(())
    }
}

fn validate(
    y0: &[f64],
    t0: f64,
    ts: &[f64],
    theta: &[f64],
    x: &[f64],
    config: &OdeConfig,
) -> Result<(), OdeError> {
    if y0.is_empty() {
        return Err(OdeError::EmptyInitialState);
    }
    check_finite("initial state", y0.iter().copied())?;
    check_finite("initial time", [t0])?;
    if ts.is_empty() {
        return Err(OdeError::EmptyTimes);
    }
    check_finite("times", ts.iter().copied())?;
    for (i, w) in ts.windows(2).enumerate() {
        if w[1] <= w[0] {
            return Err(OdeError::TimesNotIncreasing {
                index: i + 1,
                value: w[1],
                previous: w[0],
            });
        }
    }
    if t0 >= ts[0] {
        return Err(OdeError::InitialTimeNotBeforeOutputs { t0, t1: ts[0] });
    }
    check_finite("parameter vector", theta.iter().copied())?;
    check_finite("continuous data", x.iter().copied())?;
    config.validate()
}

/// Solve the ODE at each time in `ts` and return the states as `Var`s.
///
/// `y0` and `theta` hold `f64` or `Var` entries; the returned states carry
/// gradients with respect to whichever are `Var`. Inputs are validated before
/// anything is recorded. Requires an active session.
#[allow(clippy::too_many_arguments)]
pub fn integrate_ode<F, Y, P>(
    system: &F,
    y0: &[Y],
    t0: f64,
    ts: &[f64],
    theta: &[P],
    x: &[f64],
    x_int: &[i32],
    config: &OdeConfig,
) -> Result<Vec<Vec<Var>>, AdError>
where
    F: OdeSystem,
    Y: Operand,
    P: Operand,
{
    let y0_primal: Vec<f64> = y0.iter().map(Operand::primal).collect();
    let theta_primal: Vec<f64> = theta.iter().map(Operand::primal).collect();
    validate(&y0_primal, t0, ts, &theta_primal, x, config)?;

    let coupled = CoupledOdeSystem::new(system, y0, theta, x, x_int)?;
    debug!(
        "integrate_ode: {} states, {:?} coupling, coupled size {}, {} output times",
        coupled.num_states(),
        coupled.coupling(),
        coupled.size(),
        ts.len()
    );
    let (states, _) = integrator::integrate(
        |t, y| coupled.derivatives(t, y),
        coupled.initial_state(),
        t0,
        ts,
        config,
    )?;
    coupled.decouple_states(&states)
}

/// Solve the ODE on plain numbers; no session is needed.
#[allow(clippy::too_many_arguments)]
pub fn integrate_ode_values<F: OdeSystem>(
    system: &F,
    y0: &[f64],
    t0: f64,
    ts: &[f64],
    theta: &[f64],
    x: &[f64],
    x_int: &[i32],
    config: &OdeConfig,
) -> Result<Vec<Vec<f64>>, AdError> {
    validate(y0, t0, ts, theta, x, config)?;
    let coupled = CoupledOdeSystem::new(system, y0, theta, x, x_int)?;
    let (states, _) = integrator::integrate(
        |t, y| coupled.derivatives(t, y),
        coupled.initial_state(),
        t0,
        ts,
        config,
    )?;
    Ok(states)
}
