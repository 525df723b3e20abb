use std::fmt::Display;

/// A failure while turning one compilation unit into machine code. Cloneable so a
/// unit's failure can be reported again on every later attempt to use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The unit's generator callback failed.
    Generator(String),
    /// A port is wider than one 64-bit simulation word.
    UnsupportedWidth { port: String, width: u32 },
    /// A primitive definition cannot be lowered.
    Primitive { defn: String, reason: String },
    /// The code generator backend rejected the function.
    Backend(String),
    /// The generated unit does not define a symbol it promised.
    MissingSymbol { symbol: String },
}

impl Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CompileError::Generator(reason) => {
                write!(f, "unit generator failed: {reason}")
            }
            CompileError::UnsupportedWidth { port, width } => {
                write!(f, "port {port} is {width} bits wide, the limit is 64")
            }
            CompileError::Primitive { defn, reason } => {
                write!(f, "cannot lower primitive {defn}: {reason}")
            }
            CompileError::Backend(reason) => {
                write!(f, "backend error: {reason}")
            }
            CompileError::MissingSymbol { symbol } => {
                write!(f, "generated unit does not define {symbol}")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// An engine-level failure: bad unit or symbol bookkeeping, or a compilation error
/// surfaced through [`crate::Engine::resolve`] or [`crate::Engine::compile_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    Backend(String),
    UnknownSymbol { symbol: String },
    UnknownUnit { unit: String },
    DuplicateUnit { unit: String },
    DuplicateSymbol { symbol: String },
    RemovedUnit { unit: String },
    Compile(CompileError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EngineError::Backend(reason) => write!(f, "backend error: {reason}"),
            EngineError::UnknownSymbol { symbol } => write!(f, "no live unit defines symbol {symbol}"),
            EngineError::UnknownUnit { unit } => write!(f, "no live unit named {unit}"),
            EngineError::DuplicateUnit { unit } => write!(f, "a live unit named {unit} already exists"),
            EngineError::DuplicateSymbol { symbol } => {
                write!(f, "symbol {symbol} is already defined by a live unit")
            }
            EngineError::RemovedUnit { unit } => write!(f, "unit {unit} has been removed"),
            EngineError::Compile(err) => write!(f, "compilation failed: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Compile(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CompileError> for EngineError {
    fn from(err: CompileError) -> Self {
        EngineError::Compile(err)
    }
}
