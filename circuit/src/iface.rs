use indexmap::IndexMap;

use crate::error::StructuralError;
use crate::value::{Select, Value};

/// A consumer-side port: unconnected until [`Input::connect`] is called exactly once
/// with a select of matching width.
#[derive(Debug, Clone)]
pub struct Input {
    name: String,
    width: u32,
    select: Option<Select>,
}

impl Input {
    pub(crate) fn new(name: impl Into<String>, width: u32) -> Self {
        assert!(width >= 1);
        Input { name: name.into(), width, select: None }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn is_connected(&self) -> bool {
        self.select.is_some()
    }

    pub fn select(&self) -> Option<&Select> {
        self.select.as_ref()
    }

    pub(crate) fn connect(&mut self, select: Select) -> Result<(), StructuralError> {
        if self.select.is_some() {
            return Err(StructuralError::DoubleConnect { port: self.name.clone() });
        }
        if select.width() != self.width {
            return Err(StructuralError::WidthMismatch {
                port: self.name.clone(),
                expected: self.width,
                found: select.width(),
            });
        }
        self.select = Some(select);
        Ok(())
    }
}

/// The named, ordered port set of a definition or an instance.
///
/// A definition's interface is flipped relative to the source module's port list:
/// a module *input* port is an interface output (a driver, seen from inside), and a
/// module *output* port is an interface input (a consumer wired by a [`Select`]).
/// An instance's interface is the un-flipped view the parent wires against.
#[derive(Debug, Clone)]
pub struct Interface {
    name: String,
    inputs: IndexMap<String, Input>,
    outputs: IndexMap<String, Value>,
    is_definition: bool,
}

impl Interface {
    pub(crate) fn new(
        name: impl Into<String>,
        inputs: Vec<Input>,
        outputs: Vec<Value>,
        is_definition: bool,
    ) -> Result<Self, StructuralError> {
        let name = name.into();
        let mut iface =
            Interface { name: name.clone(), inputs: IndexMap::new(), outputs: IndexMap::new(), is_definition };
        for input in inputs {
            let port = input.name().to_owned();
            if iface.inputs.insert(port.clone(), input).is_some() || iface.outputs.contains_key(&port) {
                return Err(StructuralError::DuplicatePort { iface: name, port });
            }
        }
        for output in outputs {
            let port = output.name().to_owned();
            if iface.outputs.insert(port.clone(), output).is_some() || iface.inputs.contains_key(&port) {
                return Err(StructuralError::DuplicatePort { iface: name, port });
            }
        }
        Ok(iface)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_definition(&self) -> bool {
        self.is_definition
    }

    pub fn is_instance(&self) -> bool {
        !self.is_definition
    }

    pub fn inputs(&self) -> impl ExactSizeIterator<Item = &Input> {
        self.inputs.values()
    }

    pub fn outputs(&self) -> impl ExactSizeIterator<Item = &Value> {
        self.outputs.values()
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.get_index_of(name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.get_index_of(name)
    }

    pub fn input_at(&self, index: usize) -> &Input {
        self.inputs.get_index(index).unwrap().1
    }

    pub fn output_at(&self, index: usize) -> &Value {
        self.outputs.get_index(index).unwrap().1
    }

    pub(crate) fn input_mut(&mut self, name: &str) -> Option<&mut Input> {
        self.inputs.get_mut(name)
    }

    /// The flipped copy used for a fresh instance: this interface's outputs become
    /// unconnected inputs for the parent to wire, and vice versa.
    pub(crate) fn instance_copy(&self, name: impl Into<String>) -> Interface {
        let mut inputs = IndexMap::new();
        for output in self.outputs.values() {
            inputs.insert(output.name().to_owned(), Input::new(output.name(), output.width()));
        }
        let mut outputs = IndexMap::new();
        for input in self.inputs.values() {
            outputs.insert(input.name().to_owned(), Value::new(input.name(), input.width()));
        }
        Interface { name: name.into(), inputs, outputs, is_definition: false }
    }
}
