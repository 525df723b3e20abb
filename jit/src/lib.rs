//! Lazy machine-code compilation and simulation for hotwire circuits.
//!
//! [`Engine`] manages compilation units with address-stable stubs: a unit's symbols
//! are callable the moment it is submitted, and its code is generated on first call.
//! [`CompiledCircuit`] maps a [`hotwire_circuit::Circuit`] onto the engine, one unit
//! per definition, each exporting a `compute` and an `update` function with the
//! uniform [`SimFn`] signature.

mod builder;
mod codegen;
mod engine;
mod error;
mod primitives;
mod sim;

pub use builder::{BuildFn, CodeFn, CodeUnit, FuncEnv, TransformFn};
pub use codegen::{compute_symbol, definition_unit, generator, unit_symbols, update_symbol};
pub use engine::{Engine, Generator, UnitStatus};
pub use error::{CompileError, EngineError};
pub use sim::{CompiledCircuit, SimFn};
