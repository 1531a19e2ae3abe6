#![allow(dead_code)]

use revtape::Scalar;

// ─── Rosenbrock ────────────────────────────────────────────────────────────

pub fn rosenbrock<T: Scalar>(x: &[T]) -> T {
    let mut sum = T::zero();
    for i in 0..x.len() - 1 {
        let t1 = T::one() - x[i];
        let t2 = x[i + 1] - x[i] * x[i];
        sum = sum + t1 * t1 + t2 * t2 * 100.0;
    }
    sum
}

// ─── Rastrigin ─────────────────────────────────────────────────────────────
// f(x) = 10n + Σ[x_i² - 10·cos(2π·x_i)]

pub fn rastrigin<T: Scalar>(x: &[T]) -> T {
    let two_pi = 2.0 * std::f64::consts::PI;
    let mut sum = T::from_f64(10.0 * x.len() as f64);
    for &xi in x {
        sum = sum + xi * xi - (xi * two_pi).cos() * 10.0;
    }
    sum
}

// ─── Lower-triangular test matrix ──────────────────────────────────────────
// Diagonally dominant so the solve stays well conditioned.

pub fn lower_triangular(n: usize) -> nalgebra::DMatrix<f64> {
    nalgebra::DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            n as f64 + 1.0
        } else if i > j {
            ((i * n + j) as f64).sin()
        } else {
            0.0
        }
    })
}

// ─── Helpers ───────────────────────────────────────────────────────────────

pub fn make_input(n: usize) -> Vec<f64> {
    (0..n).map(|i| 0.5 + 0.01 * i as f64).collect()
}

pub fn finite_diff_gradient(f: fn(&[f64]) -> f64, x: &[f64], h: f64) -> Vec<f64> {
    let mut g = vec![0.0; x.len()];
    let mut xp = x.to_vec();
    for i in 0..x.len() {
        let orig = xp[i];
        xp[i] = orig + h;
        let fp = f(&xp);
        xp[i] = orig - h;
        let fm = f(&xp);
        xp[i] = orig;
        g[i] = (fp - fm) / (2.0 * h);
    }
    g
}
