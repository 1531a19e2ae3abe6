//! Explicit Dormand–Prince 5(4) integrator with adaptive step size.
//!
//! Steps are shortened so every output time is reached exactly; states are
//! only reported at those times, so no dense output is needed.

use log::{debug, trace};
use nalgebra::DVector;

use super::OdeConfig;
use crate::error::{AdError, OdeError};

const STAGES: usize = 7;

/// Node positions of each stage within the step.
const C: [f64; STAGES] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];

/// Stage coefficients; row `i` combines the first `i` stage derivatives.
const A: [[f64; STAGES - 1]; STAGES] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
        0.0,
    ],
    [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];

/// Fifth-order weights minus the embedded fourth-order weights.
const E: [f64; STAGES] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

const ORDER: f64 = 5.0;
const SAFETY: f64 = 0.9;
const MIN_FACTOR: f64 = 0.2;
const MAX_FACTOR: f64 = 5.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct IntegrationStats {
    pub accepted: usize,
    pub rejected: usize,
    pub rhs_evaluations: usize,
}

/// Integrate `dy/dt = rhs(t, y)` from `(t0, y0)` and return the state at each
/// of `ts`. `ts` must be strictly increasing and start after `t0`.
pub(crate) fn integrate<F>(
    mut rhs: F,
    y0: Vec<f64>,
    t0: f64,
    ts: &[f64],
    config: &OdeConfig,
) -> Result<(Vec<Vec<f64>>, IntegrationStats), AdError>
where
    F: FnMut(f64, &[f64]) -> Result<Vec<f64>, AdError>,
{
    let n = y0.len();
    let mut stats = IntegrationStats::default();
    let mut eval = |t: f64,
                    y: &DVector<f64>,
                    stats: &mut IntegrationStats|
     -> Result<DVector<f64>, AdError> {
        stats.rhs_evaluations += 1;
        let dy = rhs(t, y.as_slice())?;
        if dy.len() != n {
            return Err(AdError::from(OdeError::DerivativeSizeMismatch {
                expected: n,
                found: dy.len(),
            }));
        }
        Ok(DVector::from_vec(dy))
    };

    let mut t = t0;
    let mut y = DVector::from_vec(y0);
    let mut h = config.initial_step;
    let mut k: Vec<DVector<f64>> = vec![DVector::zeros(n); STAGES];
    k[0] = eval(t, &y, &mut stats)?;

    let mut out = Vec::with_capacity(ts.len());
    for &t_out in ts {
        while t < t_out {
            if stats.accepted + stats.rejected >= config.max_num_steps {
                return Err(OdeError::TooManySteps {
                    max_steps: config.max_num_steps,
                    time: t,
                }
                .into());
            }
            let remaining = t_out - t;
            let truncated = h >= remaining;
            let step = if truncated { remaining } else { h };

            for i in 1..STAGES {
                let mut stage = y.clone();
                for j in 0..i {
                    if A[i][j] != 0.0 {
                        stage.axpy(step * A[i][j], &k[j], 1.0);
                    }
                }
                k[i] = eval(t + C[i] * step, &stage, &mut stats)?;
            }

            // The last stage is evaluated at the fifth-order solution.
            let mut y_new = y.clone();
            for j in 0..STAGES - 1 {
                if A[STAGES - 1][j] != 0.0 {
                    y_new.axpy(step * A[STAGES - 1][j], &k[j], 1.0);
                }
            }

            let mut sum_sq = 0.0;
            for i in 0..n {
                let err: f64 = step * (0..STAGES).map(|s| E[s] * k[s][i]).sum::<f64>();
                let scale = config.absolute_tolerance
                    + config.relative_tolerance * y[i].abs().max(y_new[i].abs());
                sum_sq += (err / scale).powi(2);
            }
            let error_norm = if n == 0 { 0.0 } else { (sum_sq / n as f64).sqrt() };

            let factor = if !error_norm.is_finite() {
                MIN_FACTOR
            } else if error_norm == 0.0 {
                MAX_FACTOR
            } else {
                (SAFETY * error_norm.powf(-1.0 / ORDER)).clamp(MIN_FACTOR, MAX_FACTOR)
            };

            if error_norm <= 1.0 {
                stats.accepted += 1;
                t = if truncated { t_out } else { t + step };
                y = y_new;
                k.swap(0, STAGES - 1);
                if !truncated {
                    h = step * factor;
                }
                trace!("accepted step {step:e} to t = {t} (error {error_norm:e})");
            } else {
                stats.rejected += 1;
                h = step * factor;
                if h < config.minimum_step {
                    return Err(OdeError::StepSizeTooSmall { step: h, time: t }.into());
                }
                trace!("rejected step {step:e} at t = {t} (error {error_norm:e})");
            }
        }
        out.push(y.as_slice().to_vec());
    }
    debug!(
        "integrated {} states over [{}, {}]: {} steps accepted, {} rejected, {} rhs evaluations",
        n,
        t0,
        ts.last().copied().unwrap_or(t0),
        stats.accepted,
        stats.rejected,
        stats.rhs_evaluations
    );
    Ok((out, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn exponential_decay_hits_output_times() {
        let config = OdeConfig::default();
        let ts = [0.5, 1.0, 2.0];
        let (ys, stats) =
            integrate(|_, y| Ok(vec![-y[0]]), vec![1.0], 0.0, &ts, &config).unwrap();
        for (y, t) in ys.iter().zip(ts) {
            assert_relative_eq!(y[0], (-t).exp(), max_relative = 1e-5);
        }
        assert!(stats.accepted > 0);
    }

    #[test]
    fn step_limit_is_reported() {
        let config = OdeConfig {
            max_num_steps: 3,
            ..OdeConfig::default()
        };
        let err = integrate(|_, y| Ok(vec![-y[0]]), vec![1.0], 0.0, &[100.0], &config).unwrap_err();
        assert!(matches!(
            err,
            AdError::Ode(OdeError::TooManySteps { max_steps: 3, .. })
        ));
    }

    #[test]
    fn wrong_derivative_length_is_an_error() {
        let err = integrate(
            |_, _| Ok(vec![0.0, 0.0]),
            vec![1.0],
            0.0,
            &[1.0],
            &OdeConfig::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            AdError::Ode(OdeError::DerivativeSizeMismatch {
                expected: 1,
                found: 2
            })
        );
    }

    #[test]
    fn blow_up_fails_with_small_step() {
        // y' = y^2 from y(0) = 1 diverges at t = 1.
        let err = integrate(
            |_, y| Ok(vec![y[0] * y[0]]),
            vec![1.0],
            0.0,
            &[2.0],
            &OdeConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AdError::Ode(OdeError::StepSizeTooSmall { .. } | OdeError::TooManySteps { .. })
        ));
    }
}
