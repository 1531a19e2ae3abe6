use std::cmp::Ordering;
use std::fmt::{self, Display};

use crate::error::AdError;
use crate::node::NodeId;
use crate::tape::{self, with_active_tape};

/// Differentiable scalar: a primal value plus a handle to its tape node.
///
/// `Copy` because the tape lives in a thread-local, not inside this struct.
/// Copies alias the same node; the node, not the handle, carries identity.
#[derive(Clone, Copy, Debug)]
pub struct Var {
    pub(crate) value: f64,
    pub(crate) id: NodeId,
}

impl Var {
    /// Record a new independent variable (a leaf with no operands).
    ///
    /// # Panics
    ///
    /// Panics if no [`Session`](crate::Session) is active on this thread.
    #[inline]
    pub fn new(value: f64) -> Self {
        let id = with_active_tape(|t| t.push_leaf(value));
        Var { value, id }
    }

    /// Build a handle from an existing node.
    #[inline]
    pub(crate) fn from_node(value: f64, id: NodeId) -> Self {
        Var { value, id }
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Adjoint accumulated by the last sweep.
    ///
    /// # Panics
    ///
    /// Panics if the handle is stale or no session is active. Use
    /// [`crate::adjoint`] for the fallible form.
    pub fn adj(&self) -> f64 {
        match tape::adjoint(*self) {
            Ok(a) => a,
            Err(e) => panic!("{e}"),
        }
    }

    /// Run a reverse sweep with this variable as the root.
    pub fn grad(&self) -> Result<(), AdError> {
        tape::grad(*self)
    }

    /// Sweep from this variable and return the adjoints of `wrt`.
    pub fn grad_wrt(&self, wrt: &[Var]) -> Result<Vec<f64>, AdError> {
        tape::gradient(*self, wrt)
    }
}

impl Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl From<f64> for Var {
    #[inline]
    fn from(value: f64) -> Self {
        Var::new(value)
    }
}

/// Comparisons look at primal values only.
impl PartialEq for Var {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl PartialOrd for Var {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&other.value)
    }
}

impl PartialEq<f64> for Var {
    fn eq(&self, other: &f64) -> bool {
        self.value == *other
    }
}

impl PartialOrd<f64> for Var {
    fn partial_cmp(&self, other: &f64) -> Option<Ordering> {
        self.value.partial_cmp(other)
    }
}

/// Copy the primal values out of a slice of variables.
pub fn values(vars: &[Var]) -> Vec<f64> {
    vars.iter().map(Var::value).collect()
}

/// Record one leaf per entry of `xs`.
pub fn vars(xs: &[f64]) -> Vec<Var> {
    xs.iter().map(|&x| Var::new(x)).collect()
}
