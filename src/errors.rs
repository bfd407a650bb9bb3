use thiserror::Error;

/// A structured failure produced while lowering a clause or query to
/// bytecode. Compilation of the offending clause is aborted; these are
/// never used for control flow at resolution time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("clause {functor} has {arity} arguments, the limit is 255")]
    TooManyArguments { functor: String, arity: usize },
    #[error("head element must be a constant, variable or list pattern: {found}")]
    BadHeadElement { found: String },
    #[error("a compound term cannot appear as an argument of another goal: {functor}")]
    NestedCompound { functor: String },
    #[error("left operand of an assignment must be a variable")]
    InvalidAssignment,
    #[error("right operand of an assignment cannot be a goal")]
    AssignmentFromGoal,
    #[error("built-in {0} cannot be used as a goal on its own")]
    UnsupportedBuiltin(String),
    #[error("list patterns are only valid in rule heads")]
    ListPatternOutsideHead,
    #[error("the tail of a list pattern must follow at least one fixed element and come last")]
    TailNotLast,
    #[error("a list pattern cannot have more than 255 fixed elements")]
    ListPatternTooLong,
    #[error("clause needs more than 255 registers")]
    RegisterOverflow,
    #[error("a negated goal must be a callable term")]
    UncallableNegation,
    #[error("invalid goal in clause body: {found}")]
    InvalidGoal { found: String },
}

/// A broken engine invariant. These indicate implementation bugs, not
/// user query failures; ordinary unification mismatches never surface
/// here.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid opcode byte {0:#04x}")]
    BadOpcode(u8),
    #[error("instruction pointer ran off the end of a code segment at {0}")]
    CodeOverrun(usize),
    #[error("constant pool index {0} out of range")]
    BadConstant(u32),
    #[error("variable {0} is already bound")]
    DoubleBind(String),
    #[error("clause returned without a continuation")]
    MissingContinuation,
    #[error("instruction requires a caller frame")]
    FrameUnderflow,
    #[error("asserted clause failed to compile: {0}")]
    Assert(#[from] CompileError),
}

/// Either tier of failure, for entry points that compile and run in
/// one call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
