use num_traits::{One, Zero};

use crate::var::Var;

// `zero()` and `one()` record fresh leaves, so they need an active session.
// This is what lets `nalgebra` build `DMatrix<Var>` zeros and identities.

impl Zero for Var {
    #[inline]
    fn zero() -> Self {
        Var::new(0.0)
    }

    #[inline]
    fn is_zero(&self) -> bool {
        self.value == 0.0
    }
}

impl One for Var {
    #[inline]
    fn one() -> Self {
        Var::new(1.0)
    }

    #[inline]
    fn is_one(&self) -> bool {
        self.value == 1.0
    }
}
