use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use crate::bits::Bits;
use crate::graph::PrimitiveKind;

/// Direction of a port as declared by the source netlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDir {
    Input,
    Output,
}

/// One port declaration of a source module.
#[derive(Debug, Clone)]
pub struct PortDecl {
    pub name: String,
    pub width: u32,
    pub dir: PortDir,
}

impl PortDecl {
    pub fn input(name: impl Into<String>, width: u32) -> Self {
        PortDecl { name: name.into(), width, dir: PortDir::Input }
    }

    pub fn output(name: impl Into<String>, width: u32) -> Self {
        PortDecl { name: name.into(), width, dir: PortDir::Output }
    }
}

/// A driver or consumer endpoint within one composite module: the module's own
/// boundary, or one of its children by position in the child list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRef {
    Parent,
    Child(usize),
}

/// Names one consumer-side port of a composite module: a child instance's input, or
/// the module's own output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub endpoint: EndpointRef,
    pub port: String,
}

impl PortRef {
    pub fn parent(port: impl Into<String>) -> Self {
        PortRef { endpoint: EndpointRef::Parent, port: port.into() }
    }

    pub fn child(child: usize, port: impl Into<String>) -> Self {
        PortRef { endpoint: EndpointRef::Child(child), port: port.into() }
    }
}

/// One contiguous piece of a driver description.
#[derive(Debug, Clone)]
pub enum DriverPart {
    /// A range of a signal; `width: None` means the whole signal from `offset` on.
    Wire { from: EndpointRef, port: String, offset: u32, width: Option<u32> },
    /// Literal bits.
    Const(Bits),
}

impl DriverPart {
    pub fn whole(from: EndpointRef, port: impl Into<String>) -> Self {
        DriverPart::Wire { from, port: port.into(), offset: 0, width: None }
    }

    pub fn slice(from: EndpointRef, port: impl Into<String>, offset: u32, width: u32) -> Self {
        DriverPart::Wire { from, port: port.into(), offset, width: Some(width) }
    }
}

/// How one consumer input is driven: by a single (whole or ranged) source, or by an
/// ordered array of per-element sources.
#[derive(Debug, Clone)]
pub enum Driver {
    Single(DriverPart),
    Parts(Vec<DriverPart>),
}

impl Driver {
    pub fn whole(from: EndpointRef, port: impl Into<String>) -> Self {
        Driver::Single(DriverPart::whole(from, port))
    }

    pub fn slice(from: EndpointRef, port: impl Into<String>, offset: u32, width: u32) -> Self {
        Driver::Single(DriverPart::slice(from, port, offset, width))
    }

    pub fn bits(bits: Bits) -> Self {
        Driver::Single(DriverPart::Const(bits))
    }
}

/// What a source module contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleContents {
    Primitive(PrimitiveKind),
    Composite,
}

/// The capability the circuit builder consumes: enumeration of a netlist's modules,
/// ports, children and per-consumer driver descriptions. The builder walks this
/// depth-first, children before parents; implementations adapt a concrete netlist
/// format or an in-memory description ([`MemNetlist`]).
pub trait NetlistSource {
    /// Opaque module identity; structurally identical uses of one module share it,
    /// which is what circuit-level deduplication keys on.
    type ModId: Copy + Eq + Hash + Debug;

    fn module_name(&self, module: Self::ModId) -> String;

    fn ports(&self, module: Self::ModId) -> Vec<PortDecl>;

    fn contents(&self, module: Self::ModId) -> ModuleContents;

    /// Child instances of a composite module, in declaration order.
    fn children(&self, module: Self::ModId) -> Vec<(String, Self::ModId)>;

    /// The driver of one consumer input, or `None` if the netlist leaves it dangling.
    fn driver(&self, module: Self::ModId, consumer: &PortRef) -> Option<Driver>;
}

#[derive(Debug, Clone)]
struct MemModule {
    name: String,
    ports: Vec<PortDecl>,
    contents: ModuleContents,
    children: Vec<(String, usize)>,
    drivers: HashMap<PortRef, Driver>,
}

/// An in-memory netlist description, used by tests and by drivers that assemble
/// designs programmatically.
#[derive(Debug, Clone, Default)]
pub struct MemNetlist {
    modules: Vec<MemModule>,
}

impl MemNetlist {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_primitive(&mut self, name: impl Into<String>, ports: Vec<PortDecl>, kind: PrimitiveKind) -> usize {
        self.modules.push(MemModule {
            name: name.into(),
            ports,
            contents: ModuleContents::Primitive(kind),
            children: Vec::new(),
            drivers: HashMap::new(),
        });
        self.modules.len() - 1
    }

    pub fn add_composite(&mut self, name: impl Into<String>, ports: Vec<PortDecl>) -> usize {
        self.modules.push(MemModule {
            name: name.into(),
            ports,
            contents: ModuleContents::Composite,
            children: Vec::new(),
            drivers: HashMap::new(),
        });
        self.modules.len() - 1
    }

    /// Adds a child instance and returns its index for use in [`EndpointRef::Child`].
    pub fn add_child(&mut self, module: usize, name: impl Into<String>, child: usize) -> usize {
        let children = &mut self.modules[module].children;
        children.push((name.into(), child));
        children.len() - 1
    }

    pub fn connect(&mut self, module: usize, consumer: PortRef, driver: Driver) {
        self.modules[module].drivers.insert(consumer, driver);
    }
}

impl NetlistSource for MemNetlist {
    type ModId = usize;

    fn module_name(&self, module: usize) -> String {
        self.modules[module].name.clone()
    }

    fn ports(&self, module: usize) -> Vec<PortDecl> {
        self.modules[module].ports.clone()
    }

    fn contents(&self, module: usize) -> ModuleContents {
        self.modules[module].contents
    }

    fn children(&self, module: usize) -> Vec<(String, usize)> {
        self.modules[module].children.clone()
    }

    fn driver(&self, module: usize, consumer: &PortRef) -> Option<Driver> {
        self.modules[module].drivers.get(consumer).cloned()
    }
}
