use std::collections::HashMap;

use tracing::debug;

use crate::error::StructuralError;
use crate::graph::{Circuit, Definition, DefnId, Instance, PrimitiveKind};
use crate::iface::{Input, Interface};
use crate::siminfo;
use crate::source::{Driver, DriverPart, EndpointRef, ModuleContents, NetlistSource, PortDecl, PortDir, PortRef};
use crate::value::{Endpoint, Select, Value, ValueSlice};

/// Builds the closed circuit reachable from `root`, visiting dependencies before
/// dependents and deduplicating by source-module identity. Any structural problem
/// aborts the whole build; a [`Circuit`] is either fully valid or not produced.
pub fn build_circuit<S: NetlistSource>(source: &S, root: S::ModId) -> Result<Circuit, StructuralError> {
    let mut builder = Builder { source, definitions: Vec::new(), seen: HashMap::new() };
    builder.process(root)?;
    Ok(Circuit::new(builder.definitions))
}

struct Builder<'a, S: NetlistSource> {
    source: &'a S,
    definitions: Vec<Definition>,
    seen: HashMap<S::ModId, DefnId>,
}

impl<S: NetlistSource> Builder<'_, S> {
    fn process(&mut self, module: S::ModId) -> Result<DefnId, StructuralError> {
        if let Some(&id) = self.seen.get(&module) {
            return Ok(id);
        }
        let name = self.source.module_name(module);
        let defn = match self.source.contents(module) {
            ModuleContents::Primitive(kind) => self.process_primitive(module, &name, kind)?,
            ModuleContents::Composite => self.process_composite(module, &name)?,
        };
        let id = DefnId::new(self.definitions.len() as u32);
        debug!(module = %name, id = %id, "built definition");
        self.definitions.push(defn);
        self.seen.insert(module, id);
        Ok(id)
    }

    fn process_primitive(
        &mut self,
        module: S::ModId,
        name: &str,
        kind: PrimitiveKind,
    ) -> Result<Definition, StructuralError> {
        let ports = self.source.ports(module);
        check_primitive_ports(name, kind, &ports)?;
        let iface = make_iface(name, &ports)?;
        Ok(Definition::new_primitive(name, iface, kind))
    }

    fn process_composite(&mut self, module: S::ModId, name: &str) -> Result<Definition, StructuralError> {
        // Children first: the arena stays in post-order, so every instance's
        // definition index is already valid when the parent is wired.
        let children = self.source.children(module);
        let mut child_ids = Vec::with_capacity(children.len());
        for (_, child) in &children {
            child_ids.push(self.process(*child)?);
        }

        let mut iface = make_iface(name, &self.source.ports(module))?;

        let mut instances: Vec<Instance> = Vec::with_capacity(children.len());
        for ((inst_name, _), &id) in children.iter().zip(&child_ids) {
            if instances.iter().any(|inst| inst.name() == inst_name) {
                return Err(StructuralError::DuplicateInstance {
                    defn: name.to_owned(),
                    instance: inst_name.clone(),
                });
            }
            instances.push(self.definitions[id.index()].make_instance(inst_name, id));
        }

        // Resolve every consumer's driver before mutating anything, so slice
        // resolution can look at all interfaces at once.
        let mut resolved: Vec<(Option<usize>, String, Select)> = Vec::new();
        for (index, inst) in instances.iter().enumerate() {
            for input in inst.iface().inputs() {
                let consumer = PortRef::child(index, input.name());
                let qualified = format!("{name}.{}.{}", inst.name(), input.name());
                let select = self.resolve_driver(module, &consumer, &qualified, &iface, &instances)?;
                resolved.push((Some(index), input.name().to_owned(), select));
            }
        }
        for input in iface.inputs() {
            let qualified = format!("{name}.{}", input.name());
            let consumer = PortRef::parent(input.name());
            let select = self.resolve_driver(module, &consumer, &qualified, &iface, &instances)?;
            resolved.push((None, input.name().to_owned(), select));
        }

        for (inst, port, select) in resolved {
            let (context, input) = match inst {
                Some(index) => {
                    let inst = &mut instances[index];
                    (format!("{name}.{}", inst.name()), inst.iface_mut().input_mut(&port).unwrap())
                }
                None => (name.to_owned(), iface.input_mut(&port).unwrap()),
            };
            input.connect(select).map_err(|err| err.qualified(&context))?;
        }

        let siminfo = siminfo::analyze_composite(name, &iface, &instances, &self.definitions)?;
        Ok(Definition::new_composite(name, iface, instances, siminfo))
    }

    fn resolve_driver(
        &self,
        module: S::ModId,
        consumer: &PortRef,
        qualified: &str,
        iface: &Interface,
        instances: &[Instance],
    ) -> Result<Select, StructuralError> {
        let driver = self
            .source
            .driver(module, consumer)
            .ok_or_else(|| StructuralError::DanglingInput { port: qualified.to_owned() })?;
        let slices = match &driver {
            Driver::Single(part) => vec![resolve_part(part, qualified, iface, instances)?],
            Driver::Parts(parts) => parts
                .iter()
                .map(|part| resolve_part(part, qualified, iface, instances))
                .collect::<Result<_, _>>()?,
        };
        Ok(Select::new(slices))
    }
}

fn resolve_part(
    part: &DriverPart,
    qualified: &str,
    iface: &Interface,
    instances: &[Instance],
) -> Result<ValueSlice, StructuralError> {
    match part {
        DriverPart::Const(bits) => {
            if bits.is_empty() {
                return Err(StructuralError::EmptyConstant { port: qualified.to_owned() });
            }
            Ok(ValueSlice::constant(bits.clone()))
        }
        DriverPart::Wire { from, port, offset, width } => {
            let (endpoint, value) = match from {
                EndpointRef::Parent => {
                    let value = iface
                        .output(port)
                        .ok_or_else(|| StructuralError::UnknownPort { port: format!("{}.{port}", iface.name()) })?;
                    (Endpoint::Own, (iface.output_index(port).unwrap(), value))
                }
                EndpointRef::Child(index) => {
                    let inst = instances.get(*index).ok_or_else(|| StructuralError::UnknownPort {
                        port: format!("{}.#{index}.{port}", iface.name()),
                    })?;
                    let value = inst.iface().output(port).ok_or_else(|| StructuralError::UnknownPort {
                        port: format!("{}.{}.{port}", iface.name(), inst.name()),
                    })?;
                    (Endpoint::Inst(crate::graph::InstId::new(*index as u32)), (inst.iface().output_index(port).unwrap(), value))
                }
            };
            let (output, value) = value;
            let source_width = value.width();
            let width = match width {
                Some(width) => *width,
                None => source_width.saturating_sub(*offset),
            };
            let fits = offset.checked_add(width).is_some_and(|end| end <= source_width);
            if width == 0 || !fits {
                return Err(StructuralError::SliceOutOfRange {
                    port: qualified.to_owned(),
                    offset: *offset,
                    width,
                    source_width,
                });
            }
            Ok(ValueSlice::new(endpoint, output, *offset, width, source_width))
        }
    }
}

/// The flipped interface of a source module: input ports become interface outputs
/// (drivers, seen from inside) and output ports become interface inputs (consumers).
fn make_iface(name: &str, ports: &[PortDecl]) -> Result<Interface, StructuralError> {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for port in ports {
        if port.width == 0 {
            return Err(StructuralError::ZeroWidthPort { port: format!("{name}.{}", port.name) });
        }
        match port.dir {
            PortDir::Input => outputs.push(Value::new(&port.name, port.width)),
            PortDir::Output => inputs.push(Input::new(&port.name, port.width)),
        }
    }
    Interface::new(name, inputs, outputs, true)
}

fn check_primitive_ports(name: &str, kind: PrimitiveKind, ports: &[PortDecl]) -> Result<(), StructuralError> {
    let invalid = |reason: String| StructuralError::InvalidPrimitive { defn: name.to_owned(), reason };
    let inputs: Vec<&PortDecl> = ports.iter().filter(|port| port.dir == PortDir::Input).collect();
    let outputs: Vec<&PortDecl> = ports.iter().filter(|port| port.dir == PortDir::Output).collect();
    let (want_inputs, want_outputs) = kind.port_counts();
    if inputs.len() != want_inputs || outputs.len() != want_outputs {
        return Err(invalid(format!(
            "{kind} takes {want_inputs} inputs and {want_outputs} outputs, got {} and {}",
            inputs.len(),
            outputs.len()
        )));
    }
    let data_width = inputs[0].width;
    // For a mux the trailing input is the 1-bit selector; every other port carries
    // the common data width.
    let data_inputs = if kind == PrimitiveKind::Mux { &inputs[..inputs.len() - 1] } else { &inputs[..] };
    for port in data_inputs {
        if port.width != data_width {
            return Err(invalid(format!("input {} is {} bits, expected {data_width}", port.name, port.width)));
        }
    }
    if kind == PrimitiveKind::Mux && inputs.last().unwrap().width != 1 {
        return Err(invalid(format!("selector {} must be 1 bit", inputs.last().unwrap().name)));
    }
    for port in &outputs {
        if port.width != data_width {
            return Err(invalid(format!("output {} is {} bits, expected {data_width}", port.name, port.width)));
        }
    }
    Ok(())
}
