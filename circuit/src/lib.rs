//! This library provides the in-memory circuit IR for the hotwire simulator.
//!
//! A [`Circuit`] is an arena of [`Definition`]s identified by [`DefnId`] indices, built
//! bottom-up from an abstract netlist description (a [`NetlistSource`]). Each definition
//! carries an [`Interface`] of named ports and either a list of child [`Instance`]s with
//! fully resolved bit-level wiring ([`Select`]s of [`ValueSlice`]s) or a primitive
//! behavior descriptor ([`PrimitiveKind`]). Structural problems are reported as
//! [`StructuralError`]s; a circuit either builds completely or not at all.

mod bits;
mod value;
mod iface;
mod graph;
mod siminfo;
mod source;
mod build;
mod error;

pub use bits::Bits;
pub use value::{Endpoint, Select, SliceSource, Value, ValueSlice};
pub use iface::{Input, Interface};
pub use graph::{Body, Circuit, Definition, DefnId, InstId, Instance, PrimitiveKind};
pub use siminfo::SimInfo;
pub use source::{
    Driver, DriverPart, EndpointRef, MemNetlist, ModuleContents, NetlistSource, PortDecl, PortDir, PortRef,
};
pub use build::build_circuit;
pub use error::StructuralError;
