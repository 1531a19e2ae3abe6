//! The [`Scalar`] trait for writing AD-generic numeric code.
//!
//! Functions written as `fn f<T: Scalar>(x: T) -> T` run unchanged on plain
//! `f64` (no recording) and on [`Var`] (recorded onto the active tape). ODE
//! right-hand sides are written this way so the sensitivity layer can
//! evaluate them both ways.

use std::fmt::{Debug, Display};
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use num_traits::{One, Zero};

use crate::var::Var;

pub trait Scalar:
    Copy
    + Debug
    + Display
    + PartialOrd
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + 'static
{
    /// Lift a plain number. For [`Var`] this records a new leaf.
    fn from_f64(value: f64) -> Self;

    /// Extract the primal value.
    fn value(&self) -> f64;

    fn exp(self) -> Self;
    fn ln(self) -> Self;
    fn sqrt(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tanh(self) -> Self;
    fn abs(self) -> Self;
    fn powf(self, n: f64) -> Self;
    fn powi(self, n: i32) -> Self;
}

impl Scalar for f64 {
    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }
    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }
    #[inline]
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
    #[inline]
    fn sin(self) -> Self {
        f64::sin(self)
    }
    #[inline]
    fn cos(self) -> Self {
        f64::cos(self)
    }
    #[inline]
    fn tanh(self) -> Self {
        f64::tanh(self)
    }
    #[inline]
    fn abs(self) -> Self {
        f64::abs(self)
    }
    #[inline]
    fn powf(self, n: f64) -> Self {
        f64::powf(self, n)
    }
    #[inline]
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }
}

impl Scalar for Var {
    #[inline]
    fn from_f64(value: f64) -> Self {
        Var::new(value)
    }

    #[inline]
    fn value(&self) -> f64 {
        self.value
    }

    #[inline]
    fn exp(self) -> Self {
        Var::exp(self)
    }
    #[inline]
    fn ln(self) -> Self {
        Var::ln(self)
    }
    #[inline]
    fn sqrt(self) -> Self {
        Var::sqrt(self)
    }
    #[inline]
    fn sin(self) -> Self {
        Var::sin(self)
    }
    #[inline]
    fn cos(self) -> Self {
        Var::cos(self)
    }
    #[inline]
    fn tanh(self) -> Self {
        Var::tanh(self)
    }
    #[inline]
    fn abs(self) -> Self {
        Var::abs(self)
    }
    #[inline]
    fn powf(self, n: f64) -> Self {
        Var::powf(self, n)
    }
    #[inline]
    fn powi(self, n: i32) -> Self {
        Var::powi(self, n)
    }
}
