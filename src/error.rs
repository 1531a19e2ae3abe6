use thiserror::Error;

/// Errors raised by the autodiff engine and the functions built on it.
///
/// Validation errors are always raised before anything is recorded, so the
/// active tape is left exactly as it was.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdError {
    #[error("{function}: expecting a square matrix; rows ({rows}) and columns ({cols}) must match")]
    NotSquare {
        function: &'static str,
        rows: usize,
        cols: usize,
    },
    #[error("{function}: columns of the left operand ({lhs_cols}) must match rows of the right operand ({rhs_rows})")]
    NotMultiplicable {
        function: &'static str,
        lhs_cols: usize,
        rhs_rows: usize,
    },
    #[error("{function}: size of {lhs} ({lhs_len}) must match size of {rhs} ({rhs_len})")]
    SizeMismatch {
        function: &'static str,
        lhs: &'static str,
        lhs_len: usize,
        rhs: &'static str,
        rhs_len: usize,
    },
    #[error("stale variable handle (node {index}, generation {generation}); its tape region has been recovered")]
    StaleHandle { index: u32, generation: u64 },
    #[error("no autodiff session is active on this thread")]
    NoActiveSession,
    #[error("session {session} is not the active session on this thread")]
    SessionNotActive { session: u64 },
    #[error("no nested scope is open")]
    NoNestedScope,
    #[error("cannot recover all memory while {depth} nested scope(s) are open")]
    NestedScopeOpen { depth: usize },
    #[error("gradient root (node {index}) was recorded before the innermost nested scope (starts at {scope_start})")]
    RootOutsideScope { index: u32, scope_start: u32 },
    #[error("ODE error: {0}")]
    Ode(#[from] OdeError),
}

/// Errors specific to the ODE sensitivity layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OdeError {
    #[error("initial state has size 0")]
    EmptyInitialState,
    #[error("output times have size 0")]
    EmptyTimes,
    #[error("{name}[{index}] is {value}, but must be finite")]
    NonFinite {
        name: &'static str,
        index: usize,
        value: f64,
    },
    #[error("output times must be strictly increasing, but ts[{index}] = {value} follows {previous}")]
    TimesNotIncreasing {
        index: usize,
        value: f64,
        previous: f64,
    },
    #[error("solver setting {name} is {value}, but must be {requirement}")]
    InvalidConfig {
        name: &'static str,
        value: f64,
        requirement: &'static str,
    },
    #[error("initial time {t0} must be less than the first output time {t1}")]
    InitialTimeNotBeforeOutputs { t0: f64, t1: f64 },
    #[error("ODE right-hand side returned {found} derivatives, expected {expected}")]
    DerivativeSizeMismatch { expected: usize, found: usize },
    #[error("coupled state has size {found}, expected {expected}")]
    CoupledStateSizeMismatch { expected: usize, found: usize },
    #[error("exceeded {max_steps} integrator steps at t = {time}")]
    TooManySteps { max_steps: usize, time: f64 },
    #[error("step size {step} fell below the minimum at t = {time}")]
    StepSizeTooSmall { step: f64, time: f64 },
}
