//! Reverse-mode automatic differentiation on an arena-backed tape.
//!
//! A [`Session`] owns a tape and makes it the thread's active tape. Every
//! operation on a [`Var`] appends a node holding its value and what it needs
//! to push adjoints into its operands; [`grad`] sweeps the tape backwards.
//! Nested scopes ([`NestedScope`], [`nested`]) carve out regions of the tape
//! that can be discarded on their own, which is how the ODE sensitivity layer
//! takes a fresh Jacobian row at every integrator step without the tape
//! growing.
//!
//! ```
//! use revtape::{Session, Var};
//!
//! let session = Session::new();
//! let x = Var::new(3.0);
//! let y = Var::new(4.0);
//! let z = x * y + x;
//! session.grad(z).unwrap();
//! assert_eq!(x.adj(), 5.0);
//! assert_eq!(y.adj(), 3.0);
//! ```

pub mod api;
pub mod arena;
pub mod dot_product;
pub mod error;
pub mod functions;
pub mod nested;
mod node;
pub mod ode;
pub mod scalar;
pub mod tape;
mod traits;
pub mod tri_solve;
pub mod var;

pub use api::{gradient, jacobian, vjp};
pub use dot_product::{columns_dot_product, dot_product, rows_dot_product, Operand};
pub use error::{AdError, OdeError};
pub use functions::precomputed_gradients;
pub use nested::{nested, nested_depth, recover_nested, start_nested, try_nested, NestedScope};
pub use node::NodeId;
pub use ode::{
    integrate_ode, integrate_ode_values, CoupledOdeSystem, Coupling, OdeConfig, OdeSystem,
};
pub use scalar::Scalar;
pub use tape::{
    adjoint, grad, recover_memory, set_zero_all_adjoints, stats, tape_len, with_active_tape,
    Session, SessionConfig, Tape, TapeStats,
};
pub use tri_solve::{mdivide_left_tri, mdivide_left_tri_low, TriangularView};
pub use var::Var;
