//! The tape ("chainable stack") and the session that activates it.
//!
//! Nodes are appended in construction order; the reverse sweep visits them in
//! exactly the opposite order, which is a valid topological order because an
//! operand is always recorded before the node that uses it. The tape also owns
//! the arena pools that nodes pack their auxiliary data into, so truncating the
//! tape and rewinding the pools together reclaims everything a region recorded.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace, warn};

use crate::arena::{Arena, ArenaMark};
use crate::error::AdError;
use crate::node::{Buffers, Node, NodeId, Op, Sweep};
use crate::var::Var;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Draw a generation number never handed out before in this process.
pub(crate) fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Sizing knobs for a [`Session`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionConfig {
    /// Nodes reserved up front.
    pub initial_tape_capacity: usize,
    /// Elements per arena block (each pool grows in blocks of this size).
    pub arena_block_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_tape_capacity: 1024,
            arena_block_len: 64 * 1024,
        }
    }
}

/// Snapshot of tape and arena usage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TapeStats {
    pub nodes: usize,
    pub nested_depth: usize,
    pub values_used: usize,
    pub refs_used: usize,
    pub value_blocks: usize,
    pub ref_blocks: usize,
}

/// Where the tape stood when a nested scope was opened.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Checkpoint {
    pub tape_len: u32,
    pub values: ArenaMark,
    pub refs: ArenaMark,
}

/// Ordered record of every node built in a session.
pub struct Tape {
    id: u64,
    pub(crate) nodes: Vec<Node>,
    pub(crate) buffers: Buffers,
    pub(crate) scopes: Vec<Checkpoint>,
    pub(crate) generation: u64,
    /// The tape this one displaced as the active tape.
    shadowed: Option<Box<Tape>>,
}

impl Tape {
    fn new(config: &SessionConfig) -> Self {
        Tape {
            id: next_generation(),
            nodes: Vec::with_capacity(config.initial_tape_capacity),
            buffers: Buffers {
                values: Arena::new(config.arena_block_len),
                refs: Arena::new(config.arena_block_len),
            },
            scopes: Vec::new(),
            generation: next_generation(),
            shadowed: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn nested_depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn stats(&self) -> TapeStats {
        TapeStats {
            nodes: self.nodes.len(),
            nested_depth: self.scopes.len(),
            values_used: self.buffers.values.used(),
            refs_used: self.buffers.refs.used(),
            value_blocks: self.buffers.values.num_blocks(),
            ref_blocks: self.buffers.refs.num_blocks(),
        }
    }

    /// First tape index belonging to the innermost open scope.
    #[inline]
    pub(crate) fn segment_start(&self) -> u32 {
        self.scopes.last().map_or(0, |c| c.tape_len)
    }

    /// Map a handle to its tape index, rejecting handles whose node is gone.
    #[inline]
    pub(crate) fn resolve(&self, id: NodeId) -> Result<u32, AdError> {
        match self.nodes.get(id.index as usize) {
            Some(node) if node.generation == id.generation => Ok(id.index),
            _ => Err(AdError::StaleHandle {
                index: id.index,
                generation: id.generation,
            }),
        }
    }

    /// Like [`resolve`](Tape::resolve) but for the operator layer, which
    /// cannot return errors.
    #[inline]
    pub(crate) fn live(&self, id: NodeId) -> u32 {
        match self.resolve(id) {
            Ok(index) => index,
            Err(e) => panic!("{e}"),
        }
    }

    #[inline]
    pub(crate) fn buffers_mut(&mut self) -> &mut Buffers {
        &mut self.buffers
    }

    #[inline]
    pub(crate) fn push(&mut self, value: f64, op: Op) -> NodeId {
        let index = self.nodes.len() as u32;
        self.nodes.push(Node {
            value,
            adjoint: 0.0,
            generation: self.generation,
            op,
        });
        NodeId {
            index,
            generation: self.generation,
        }
    }

    #[inline]
    pub(crate) fn push_leaf(&mut self, value: f64) -> NodeId {
        self.push(value, Op::Leaf)
    }

    /// Record `value = f(operand)` with `partial = df/d(operand)`.
    #[inline]
    pub(crate) fn push_unary(&mut self, operand: NodeId, partial: f64, value: f64) -> NodeId {
        let operand = self.live(operand);
        self.push(value, Op::Unary { operand, partial })
    }

    /// Record a binary operation with precomputed partial derivatives.
    #[inline]
    pub(crate) fn push_binary(
        &mut self,
        lhs: NodeId,
        lhs_partial: f64,
        rhs: NodeId,
        rhs_partial: f64,
        value: f64,
    ) -> NodeId {
        let lhs = self.live(lhs);
        let rhs = self.live(rhs);
        self.push(
            value,
            Op::Binary {
                lhs,
                lhs_partial,
                rhs,
                rhs_partial,
            },
        )
    }

    /// Record a node with caller-supplied partials over resolved operands.
    pub(crate) fn push_precomputed(
        &mut self,
        value: f64,
        operands: &[u32],
        partials: &[f64],
    ) -> NodeId {
        let operands = self.buffers.refs.alloc_copy(operands);
        let partials = self.buffers.values.alloc_copy(partials);
        self.push(value, Op::Precomputed { operands, partials })
    }

    pub fn adjoint(&self, id: NodeId) -> Result<f64, AdError> {
        let index = self.resolve(id)?;
        Ok(self.nodes[index as usize].adjoint)
    }

    /// Reverse sweep from `root`.
    ///
    /// Zeroes every adjoint in the current segment (the innermost open scope,
    /// or the whole tape), seeds `root` with 1 and chains every node from
    /// `root` down to the segment start. Nodes below the segment are treated
    /// as constants and keep their adjoints.
    pub fn grad(&mut self, root: NodeId) -> Result<(), AdError> {
        let root = self.resolve(root)?;
        let start = self.segment_start();
        if root < start {
            return Err(AdError::RootOutsideScope {
                index: root,
                scope_start: start,
            });
        }
        for node in &mut self.nodes[start as usize..] {
            node.adjoint = 0.0;
        }
        self.nodes[root as usize].adjoint = 1.0;

        let mut sweep = Sweep::new(&mut self.nodes, start);
        for i in (start as usize..=root as usize).rev() {
            let Node { op, adjoint, .. } = sweep.node(i);
            op.chain(adjoint, &mut sweep, &self.buffers);
        }
        trace!(
            "grad: swept {} nodes ({}..={})",
            root - start + 1,
            start,
            root
        );
        Ok(())
    }

    /// Sweep from `root` and read the adjoints of `wrt`.
    ///
    /// Variables recorded before the innermost open scope are constants for
    /// the sweep and get 0.
    pub fn gradient(&mut self, root: NodeId, wrt: &[Var]) -> Result<Vec<f64>, AdError> {
        let indices = wrt
            .iter()
            .map(|v| self.resolve(v.id))
            .collect::<Result<Vec<_>, _>>()?;
        self.grad(root)?;
        let start = self.segment_start();
        Ok(indices
            .into_iter()
            .map(|i| {
                if i < start {
                    0.0
                } else {
                    self.nodes[i as usize].adjoint
                }
            })
            .collect())
    }

    /// Zero every adjoint on the tape, including those below open scopes.
    pub fn set_zero_all_adjoints(&mut self) {
        for node in &mut self.nodes {
            node.adjoint = 0.0;
        }
    }

    /// Discard every node and rewind both arena pools.
    ///
    /// All handles issued so far become stale. Not allowed while a nested
    /// scope is open.
    pub fn recover_memory(&mut self) -> Result<(), AdError> {
        if !self.scopes.is_empty() {
            return Err(AdError::NestedScopeOpen {
                depth: self.scopes.len(),
            });
        }
        debug!("recover_memory: dropping {} nodes", self.nodes.len());
        self.nodes.clear();
        self.buffers.values.recover_all();
        self.buffers.refs.recover_all();
        self.generation = next_generation();
        Ok(())
    }
}

thread_local! {
    static ACTIVE: RefCell<Option<Tape>> = const { RefCell::new(None) };
}

/// Access the active tape for the current thread. Panics if no session is active.
///
/// `f` must not re-enter the tape (for example by building `Var`s).
#[inline]
pub fn with_active_tape<R>(f: impl FnOnce(&mut Tape) -> R) -> R {
    ACTIVE.with(|cell| {
        let mut slot = cell.borrow_mut();
        match slot.as_mut() {
            Some(tape) => f(tape),
            None => panic!("No active tape. Create a revtape::Session first."),
        }
    })
}

/// Fallible form of [`with_active_tape`].
#[inline]
pub fn try_with_active_tape<R>(f: impl FnOnce(&mut Tape) -> R) -> Result<R, AdError> {
    ACTIVE.with(|cell| {
        let mut slot = cell.borrow_mut();
        slot.as_mut().map(f).ok_or(AdError::NoActiveSession)
    })
}

/// Whether a session is active on this thread.
pub fn has_active_session() -> bool {
    ACTIVE.with(|cell| cell.borrow().is_some())
}

/// An autodiff session: owns a fresh tape and makes it the thread's active
/// tape for as long as the handle lives.
///
/// Sessions stack: creating one while another is active shadows it, and
/// dropping the newer one restores the older. Dropping a shadowed session
/// discards only its own tape; the active tape stays active and later
/// restores whatever the dropped session had shadowed. A session is tied to
/// its thread.
///
/// ```
/// use revtape::{Session, Var};
///
/// let session = Session::new();
/// let x = Var::new(3.0);
/// let y = Var::new(4.0);
/// let z = x * y + x;
/// session.grad(z).unwrap();
/// assert_eq!(x.adj(), 5.0);
/// assert_eq!(y.adj(), 3.0);
/// ```
pub struct Session {
    id: u64,
    _not_send: PhantomData<*const ()>,
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let mut tape = Tape::new(&config);
        let id = tape.id;
        let shadows = ACTIVE.with(|cell| {
            let mut slot = cell.borrow_mut();
            tape.shadowed = slot.take().map(Box::new);
            let shadows = tape.shadowed.is_some();
            *slot = Some(tape);
            shadows
        });
        debug!("session {id} started ({:?}, shadows another: {})", config, shadows);
        Session {
            id,
            _not_send: PhantomData,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Run `f` on this session's tape, failing if another session shadows it.
    pub fn with_tape<R>(&self, f: impl FnOnce(&mut Tape) -> R) -> Result<R, AdError> {
        ACTIVE.with(|cell| {
            let mut slot = cell.borrow_mut();
            match slot.as_mut() {
                Some(tape) if tape.id == self.id => Ok(f(tape)),
                _ => Err(AdError::SessionNotActive { session: self.id }),
            }
        })
    }

    pub fn grad(&self, root: Var) -> Result<(), AdError> {
        self.with_tape(|t| t.grad(root.id))?
    }

    pub fn gradient(&self, root: Var, wrt: &[Var]) -> Result<Vec<f64>, AdError> {
        self.with_tape(|t| t.gradient(root.id, wrt))?
    }

    pub fn adjoint(&self, v: Var) -> Result<f64, AdError> {
        self.with_tape(|t| t.adjoint(v.id))?
    }

    pub fn set_zero_all_adjoints(&self) -> Result<(), AdError> {
        self.with_tape(|t| t.set_zero_all_adjoints())
    }

    pub fn recover_memory(&self) -> Result<(), AdError> {
        self.with_tape(|t| t.recover_memory())?
    }

    pub fn start_nested(&self) -> Result<usize, AdError> {
        self.with_tape(|t| t.start_nested())
    }

    pub fn recover_nested(&self) -> Result<(), AdError> {
        self.with_tape(|t| t.recover_nested())?
    }

    pub fn tape_len(&self) -> Result<usize, AdError> {
        self.with_tape(|t| t.len())
    }

    pub fn nested_depth(&self) -> Result<usize, AdError> {
        self.with_tape(|t| t.nested_depth())
    }

    pub fn stats(&self) -> Result<TapeStats, AdError> {
        self.with_tape(|t| t.stats())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let id = self.id;
        let _ = ACTIVE.try_with(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.as_ref().map(|t| t.id) == Some(id) {
                *slot = slot.take().and_then(|mut t| t.shadowed.take().map(|b| *b));
            } else if unlink_shadowed(&mut slot, id) {
                warn!("session {id} dropped while shadowed; its tape was discarded");
            }
        });
        debug!("session {id} ended");
    }
}

/// Remove the tape `id` from below the active tape, splicing in whatever it
/// shadowed. Returns whether it was found.
fn unlink_shadowed(slot: &mut Option<Tape>, id: u64) -> bool {
    let mut node = match slot.as_mut() {
        Some(t) => t,
        None => return false,
    };
    loop {
        let hit = match node.shadowed.as_deref() {
            Some(below) => below.id == id,
            None => return false,
        };
        if hit {
            let removed = node.shadowed.take();
            node.shadowed = removed.and_then(|mut b| b.shadowed.take());
            return true;
        }
        node = match node.shadowed.as_deref_mut() {
            Some(below) => below,
            None => return false,
        };
    }
}

// ── Free functions over the active tape ──

/// Reverse sweep from `root` on the active tape.
pub fn grad(root: Var) -> Result<(), AdError> {
    try_with_active_tape(|t| t.grad(root.id))?
}

/// Reverse sweep from `root`, returning the adjoints of `wrt`.
pub fn gradient(root: Var, wrt: &[Var]) -> Result<Vec<f64>, AdError> {
    try_with_active_tape(|t| t.gradient(root.id, wrt))?
}

pub fn adjoint(v: Var) -> Result<f64, AdError> {
    try_with_active_tape(|t| t.adjoint(v.id))?
}

pub fn set_zero_all_adjoints() -> Result<(), AdError> {
    try_with_active_tape(|t| t.set_zero_all_adjoints())
}

/// Discard the whole active tape. Fails while nested scopes are open.
pub fn recover_memory() -> Result<(), AdError> {
    try_with_active_tape(|t| t.recover_memory())?
}

pub fn tape_len() -> Result<usize, AdError> {
    try_with_active_tape(|t| t.len())
}

pub fn stats() -> Result<TapeStats, AdError> {
    try_with_active_tape(|t| t.stats())
}
