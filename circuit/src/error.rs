use std::fmt::Display;

/// A structural problem found while building a circuit: malformed or unresolvable
/// connectivity, width mismatches, duplicate names. Always fatal to the whole build;
/// nothing is silently defaulted. Port and instance fields carry qualified names
/// (`module.instance.port`) where the context is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    ZeroWidthPort { port: String },
    DuplicatePort { iface: String, port: String },
    DuplicateInstance { defn: String, instance: String },
    UnknownPort { port: String },
    WidthMismatch { port: String, expected: u32, found: u32 },
    SliceOutOfRange { port: String, offset: u32, width: u32, source_width: u32 },
    EmptyConstant { port: String },
    DanglingInput { port: String },
    DoubleConnect { port: String },
    InvalidPrimitive { defn: String, reason: String },
    CombinationalLoop { defn: String, instance: String },
}

impl StructuralError {
    /// Prefixes unqualified port/instance names with the enclosing context.
    pub(crate) fn qualified(self, prefix: &str) -> StructuralError {
        let add = |name: String| format!("{prefix}.{name}");
        match self {
            StructuralError::ZeroWidthPort { port } => StructuralError::ZeroWidthPort { port: add(port) },
            StructuralError::UnknownPort { port } => StructuralError::UnknownPort { port: add(port) },
            StructuralError::WidthMismatch { port, expected, found } => {
                StructuralError::WidthMismatch { port: add(port), expected, found }
            }
            StructuralError::SliceOutOfRange { port, offset, width, source_width } => {
                StructuralError::SliceOutOfRange { port: add(port), offset, width, source_width }
            }
            StructuralError::EmptyConstant { port } => StructuralError::EmptyConstant { port: add(port) },
            StructuralError::DanglingInput { port } => StructuralError::DanglingInput { port: add(port) },
            StructuralError::DoubleConnect { port } => StructuralError::DoubleConnect { port: add(port) },
            other => other,
        }
    }
}

impl Display for StructuralError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StructuralError::ZeroWidthPort { port } => {
                write!(f, "port {port} has zero width")
            }
            StructuralError::DuplicatePort { iface, port } => {
                write!(f, "interface {iface} declares port {port} more than once")
            }
            StructuralError::DuplicateInstance { defn, instance } => {
                write!(f, "definition {defn} declares instance {instance} more than once")
            }
            StructuralError::UnknownPort { port } => {
                write!(f, "connection references unknown port {port}")
            }
            StructuralError::WidthMismatch { port, expected, found } => {
                write!(f, "port {port} is {expected} bits wide but its driver supplies {found}")
            }
            StructuralError::SliceOutOfRange { port, offset, width, source_width } => {
                write!(
                    f,
                    "driver of {port} slices bits {offset}+:{width} of a {source_width}-bit signal"
                )
            }
            StructuralError::EmptyConstant { port } => {
                write!(f, "driver of {port} is an empty constant")
            }
            StructuralError::DanglingInput { port } => {
                write!(f, "input {port} has no driver")
            }
            StructuralError::DoubleConnect { port } => {
                write!(f, "input {port} is connected more than once")
            }
            StructuralError::InvalidPrimitive { defn, reason } => {
                write!(f, "primitive {defn} is malformed: {reason}")
            }
            StructuralError::CombinationalLoop { defn, instance } => {
                write!(f, "definition {defn} has a combinational loop through instance {instance}")
            }
        }
    }
}

impl std::error::Error for StructuralError {}
