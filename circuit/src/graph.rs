use std::fmt::{Debug, Display};

use crate::iface::Interface;
use crate::siminfo::SimInfo;

/// Index of a [`Definition`] in its owning [`Circuit`]'s arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefnId {
    pub(crate) index: u32,
}

impl DefnId {
    pub(crate) fn new(index: u32) -> Self {
        DefnId { index }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl Debug for DefnId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "DefnId({})", self.index)
    }
}

impl Display for DefnId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "%d{}", self.index)
    }
}

/// Index of an [`Instance`] within its enclosing composite [`Definition`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstId {
    pub(crate) index: u32,
}

impl InstId {
    pub(crate) fn new(index: u32) -> Self {
        InstId { index }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }
}

impl Debug for InstId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "InstId({})", self.index)
    }
}

impl Display for InstId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "%i{}", self.index)
    }
}

/// The closed set of primitive behaviors. The behavior generators themselves live with
/// the code generator; this descriptor only identifies the kind and its port shape.
///
/// All primitives take their data ports at a common width; [`PrimitiveKind::Mux`]
/// additionally takes a trailing 1-bit selector. [`PrimitiveKind::Dff`] is the one
/// stateful kind: its output reflects stored state, and its update samples the data
/// input into that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    And,
    Or,
    Xor,
    Not,
    Mux,
    Buf,
    Dff,
}

impl PrimitiveKind {
    pub fn is_stateful(self) -> bool {
        matches!(self, PrimitiveKind::Dff)
    }

    /// Expected (module input, module output) port counts.
    pub fn port_counts(self) -> (usize, usize) {
        match self {
            PrimitiveKind::And | PrimitiveKind::Or | PrimitiveKind::Xor => (2, 1),
            PrimitiveKind::Not | PrimitiveKind::Buf | PrimitiveKind::Dff => (1, 1),
            PrimitiveKind::Mux => (3, 1),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveKind::And => "and",
            PrimitiveKind::Or => "or",
            PrimitiveKind::Xor => "xor",
            PrimitiveKind::Not => "not",
            PrimitiveKind::Mux => "mux",
            PrimitiveKind::Buf => "buf",
            PrimitiveKind::Dff => "dff",
        }
    }
}

impl Display for PrimitiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One placed use of a [`Definition`] inside a parent definition. Carries its own
/// interface copy so instance inputs are wired independently of the template.
#[derive(Debug, Clone)]
pub struct Instance {
    name: String,
    iface: Interface,
    defn: DefnId,
}

impl Instance {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn iface(&self) -> &Interface {
        &self.iface
    }

    pub(crate) fn iface_mut(&mut self) -> &mut Interface {
        &mut self.iface
    }

    pub fn defn(&self) -> DefnId {
        self.defn
    }
}

/// The behavior form of a [`Definition`]: exactly one of the two applies.
#[derive(Debug, Clone)]
pub enum Body {
    Composite { instances: Vec<Instance> },
    Primitive(PrimitiveKind),
}

/// A named, reusable circuit behavior: an interface plus either resolved child
/// instances or a primitive descriptor. Immutable once registered in a [`Circuit`].
#[derive(Debug, Clone)]
pub struct Definition {
    name: String,
    iface: Interface,
    body: Body,
    siminfo: SimInfo,
}

impl Definition {
    pub(crate) fn new_primitive(name: impl Into<String>, iface: Interface, kind: PrimitiveKind) -> Self {
        Definition {
            name: name.into(),
            iface,
            body: Body::Primitive(kind),
            siminfo: SimInfo::primitive(kind),
        }
    }

    pub(crate) fn new_composite(
        name: impl Into<String>,
        iface: Interface,
        instances: Vec<Instance>,
        siminfo: SimInfo,
    ) -> Self {
        Definition { name: name.into(), iface, body: Body::Composite { instances }, siminfo }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn iface(&self) -> &Interface {
        &self.iface
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.body, Body::Primitive(_))
    }

    pub fn instances(&self) -> &[Instance] {
        match &self.body {
            Body::Composite { instances } => instances,
            Body::Primitive(_) => &[],
        }
    }

    pub fn instance(&self, id: InstId) -> &Instance {
        &self.instances()[id.index()]
    }

    pub fn siminfo(&self) -> &SimInfo {
        &self.siminfo
    }

    /// Creates a fresh instance of this definition, with the flipped interface copy
    /// left unconnected for the parent to wire.
    pub fn make_instance(&self, name: impl Into<String>, defn: DefnId) -> Instance {
        let name = name.into();
        Instance { iface: self.iface.instance_copy(name.clone()), name, defn }
    }
}

/// The closed set of definitions reachable from a top definition, deduplicated by
/// source-module identity. The circuit exclusively owns its definitions; everything
/// else refers to them through [`DefnId`] indices, which stay stable for the
/// circuit's lifetime.
#[derive(Debug, Clone)]
pub struct Circuit {
    definitions: Vec<Definition>,
}

impl Circuit {
    pub(crate) fn new(definitions: Vec<Definition>) -> Self {
        assert!(!definitions.is_empty());
        Circuit { definitions }
    }

    pub fn defn(&self, id: DefnId) -> &Definition {
        &self.definitions[id.index()]
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Always false: construction requires at least the top definition.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// The top definition: by the post-order build invariant, always the last one.
    pub fn top_id(&self) -> DefnId {
        DefnId::new(self.definitions.len() as u32 - 1)
    }

    pub fn top(&self) -> &Definition {
        self.defn(self.top_id())
    }

    pub fn definitions(&self) -> impl ExactSizeIterator<Item = (DefnId, &Definition)> {
        self.definitions.iter().enumerate().map(|(index, defn)| (DefnId::new(index as u32), defn))
    }
}

impl Display for Circuit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (id, defn) in self.definitions() {
            write!(f, "{id} = {}", defn.name())?;
            match defn.body() {
                Body::Primitive(kind) => writeln!(f, " [{kind}]")?,
                Body::Composite { instances } => {
                    writeln!(f)?;
                    for inst in instances {
                        writeln!(f, "  {} : {}", inst.name(), inst.defn())?;
                        for input in inst.iface().inputs() {
                            match input.select() {
                                Some(select) => writeln!(f, "    {} <- {select}", input.name())?,
                                None => writeln!(f, "    {} <- (unconnected)", input.name())?,
                            }
                        }
                    }
                    for input in defn.iface().inputs() {
                        match input.select() {
                            Some(select) => writeln!(f, "  out {} <- {select}", input.name())?,
                            None => writeln!(f, "  out {} <- (unconnected)", input.name())?,
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
