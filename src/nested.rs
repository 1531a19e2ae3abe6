//! Nested scopes: LIFO regions of the tape that can be discarded on their own.
//!
//! Opening a scope records the tape length and both arena high-water marks.
//! Recovering it truncates the tape back to that length and rewinds the
//! arenas, leaving every node below the mark (values and adjoints) untouched.
//! Recovery also moves the tape to a new generation for the indices it frees,
//! so a `Var` that escaped the scope no longer resolves.

use log::debug;

use crate::error::AdError;
use crate::node::NodeId;
use crate::tape::{next_generation, try_with_active_tape, Checkpoint, Tape};

impl Tape {
    /// Open a nested scope. Returns the new depth.
    pub fn start_nested(&mut self) -> usize {
        self.scopes.push(Checkpoint {
            tape_len: self.nodes.len() as u32,
            values: self.buffers.values.mark(),
            refs: self.buffers.refs.mark(),
        });
        debug!(
            "nested scope {} opened at tape length {}",
            self.scopes.len(),
            self.nodes.len()
        );
        self.scopes.len()
    }

    /// Discard everything recorded since the innermost scope was opened.
    pub fn recover_nested(&mut self) -> Result<(), AdError> {
        let checkpoint = self.scopes.pop().ok_or(AdError::NoNestedScope)?;
        let dropped = self.nodes.len() - checkpoint.tape_len as usize;
        self.nodes.truncate(checkpoint.tape_len as usize);
        self.buffers.values.restore(checkpoint.values);
        self.buffers.refs.restore(checkpoint.refs);
        // Indices at or above the mark will be reissued; new nodes must not
        // match handles into the discarded region.
        self.generation = next_generation();
        debug!(
            "nested scope {} recovered ({} nodes dropped)",
            self.scopes.len() + 1,
            dropped
        );
        Ok(())
    }

    /// Recover scopes until only `depth` remain open.
    pub fn recover_nested_to(&mut self, depth: usize) -> Result<(), AdError> {
        if self.scopes.len() < depth {
            return Err(AdError::NoNestedScope);
        }
        while self.scopes.len() > depth {
            self.recover_nested()?;
        }
        Ok(())
    }

    /// Whether `id` was recorded inside the innermost open scope.
    pub fn in_current_scope(&self, id: NodeId) -> bool {
        self.resolve(id).is_ok_and(|i| i >= self.segment_start())
    }
}

/// Open a nested scope on the active tape.
pub fn start_nested() -> Result<usize, AdError> {
    try_with_active_tape(|t| t.start_nested())
}

/// Recover the innermost nested scope of the active tape.
pub fn recover_nested() -> Result<(), AdError> {
    try_with_active_tape(|t| t.recover_nested())?
}

/// Number of open nested scopes on the active tape.
pub fn nested_depth() -> Result<usize, AdError> {
    try_with_active_tape(|t| t.nested_depth())
}

/// RAII guard for a nested scope.
///
/// The scope is recovered when the guard is dropped, on every exit path.
/// Dropping a guard whose scope is no longer the innermost recovers the
/// scopes opened inside it first. Guards must be dropped while their
/// session is still the active one.
///
/// ```
/// use revtape::{NestedScope, Session, Var};
///
/// let _session = Session::new();
/// let outer = Var::new(2.0);
/// let inner_grad = {
///     let _scope = NestedScope::new().unwrap();
///     let a = Var::new(outer.value());
///     let f = a * a;
///     f.grad_wrt(&[a]).unwrap()[0]
/// };
/// assert_eq!(inner_grad, 4.0);
/// assert_eq!(revtape::tape_len().unwrap(), 1);
/// ```
#[must_use = "the scope is recovered as soon as the guard is dropped"]
pub struct NestedScope {
    depth: usize,
}

impl NestedScope {
    pub fn new() -> Result<Self, AdError> {
        let depth = start_nested()?;
        Ok(NestedScope { depth })
    }

    /// Depth of this scope (1 for the outermost).
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Drop for NestedScope {
    fn drop(&mut self) {
        let target = self.depth - 1;
        let recovered = try_with_active_tape(|t| {
            if t.nested_depth() >= self.depth {
                t.recover_nested_to(target)
            } else {
                Ok(())
            }
        })
        .and_then(|r| r);
        if let Err(e) = recovered {
            debug!("nested scope {} not recovered on drop: {e}", self.depth);
        }
    }
}

/// Run `f` inside a nested scope and recover it afterwards.
///
/// Whatever `f` returns must not hold `Var`s built inside the scope; copy
/// results out as plain numbers.
pub fn nested<R>(f: impl FnOnce() -> R) -> Result<R, AdError> {
    let scope = NestedScope::new()?;
    let out = f();
    drop(scope);
    Ok(out)
}

/// Like [`nested`] for closures that themselves return a `Result`.
pub fn try_nested<R>(f: impl FnOnce() -> Result<R, AdError>) -> Result<R, AdError> {
    nested(f)?
}

