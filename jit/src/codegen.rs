use std::sync::Arc;

use hotwire_circuit::{Body, Circuit, Definition, DefnId, Endpoint, InstId, Select, SliceSource, ValueSlice};
use tracing::debug;

use crate::builder::{CodeUnit, FuncEnv};
use crate::engine::Generator;
use crate::error::CompileError;
use crate::primitives;

use cranelift::prelude::Value;
use cranelift_codegen::ir::StackSlot;

pub fn compute_symbol(defn: &str) -> String {
    format!("{defn}.compute")
}

pub fn update_symbol(defn: &str) -> String {
    format!("{defn}.update")
}

/// The symbols a definition's unit exports, in the order the engine tracks them.
pub fn unit_symbols(defn: &str) -> Vec<String> {
    vec![compute_symbol(defn), update_symbol(defn)]
}

/// A deferred generator for one definition's unit, suitable for lazy submission.
pub fn generator(circuit: Arc<Circuit>, id: DefnId) -> Generator {
    Box::new(move || definition_unit(&circuit, id))
}

/// Lowers one definition to its compute/update pair.
///
/// Every port travels as one 64-bit word; the compute function evaluates
/// combinational logic from inputs and stored state, and the update function
/// advances stored state without touching outputs.
pub fn definition_unit(circuit: &Arc<Circuit>, id: DefnId) -> Result<CodeUnit, CompileError> {
    let defn = circuit.defn(id);
    check_widths(defn)?;
    debug!(defn = %defn.name(), "generating unit");

    let mut unit = CodeUnit::new();
    match defn.body() {
        Body::Primitive(kind) => {
            let behavior = primitives::behavior(*kind);
            // All data ports carry the width of the output port.
            let width = defn.iface().input_at(0).width();
            unit.define(
                compute_symbol(defn.name()),
                Box::new(move |env| {
                    (behavior.compute)(env, width)?;
                    env.ret();
                    Ok(())
                }),
            );
            unit.define(
                update_symbol(defn.name()),
                Box::new(move |env| {
                    if behavior.stateful {
                        (behavior.update)(env, width)?;
                    }
                    env.ret();
                    Ok(())
                }),
            );
            if let Some(define) = behavior.define {
                define(&mut unit, defn.name(), width)?;
            }
        }
        Body::Composite { .. } => {
            let compute_circuit = circuit.clone();
            unit.define(
                compute_symbol(defn.name()),
                Box::new(move |env| emit_composite(env, &compute_circuit, id, Flavor::Compute)),
            );
            let update_circuit = circuit.clone();
            unit.define(
                update_symbol(defn.name()),
                Box::new(move |env| emit_composite(env, &update_circuit, id, Flavor::Update)),
            );
        }
    }
    Ok(unit)
}

#[derive(Clone, Copy, PartialEq)]
enum Flavor {
    Compute,
    Update,
}

/// Per-instance scratch: one stack slot of input words and one of output words.
struct Scratch {
    in_slots: Vec<StackSlot>,
    out_slots: Vec<StackSlot>,
}

fn emit_composite(
    env: &mut FuncEnv,
    circuit: &Circuit,
    id: DefnId,
    flavor: Flavor,
) -> Result<(), CompileError> {
    let defn = circuit.defn(id);
    let siminfo = defn.siminfo();
    let instances = defn.instances();

    let mut scratch = Scratch {
        in_slots: Vec::with_capacity(instances.len()),
        out_slots: Vec::with_capacity(instances.len()),
    };
    for inst in instances {
        scratch.in_slots.push(env.make_slot(inst.iface().num_inputs()));
        scratch.out_slots.push(env.make_slot(inst.iface().num_outputs()));
    }
    // Zero the output slots: registered instances are evaluated before their
    // drivers, so their input gathers read slots nothing has written yet.
    let zero = env.iconst(0);
    for (inst, &slot) in instances.iter().zip(&scratch.out_slots) {
        for word in 0..inst.iface().num_outputs() {
            env.slot_store(slot, word, zero);
        }
    }

    for &inst_id in siminfo.eval_order() {
        emit_gather_inputs(env, defn, inst_id, &scratch)?;
        emit_child_call(env, circuit, defn, inst_id, &scratch, Flavor::Compute)?;
    }

    match flavor {
        Flavor::Compute => {
            for (index, input) in defn.iface().inputs().enumerate() {
                let select = connected(defn, input.name(), input.select())?;
                let word = emit_select(env, select, &scratch)?;
                env.store_output(index, word);
            }
        }
        Flavor::Update => {
            // Stateful instances may sit anywhere in the evaluation order, so their
            // inputs are re-gathered now that every driver has settled.
            for &inst_id in siminfo.stateful_instances() {
                emit_gather_inputs(env, defn, inst_id, &scratch)?;
                emit_child_call(env, circuit, defn, inst_id, &scratch, Flavor::Update)?;
            }
        }
    }
    env.ret();
    Ok(())
}

fn emit_gather_inputs(
    env: &mut FuncEnv,
    defn: &Definition,
    inst_id: InstId,
    scratch: &Scratch,
) -> Result<(), CompileError> {
    let inst = defn.instance(inst_id);
    for (index, input) in inst.iface().inputs().enumerate() {
        let qualified = format!("{}.{}", inst.name(), input.name());
        let select = connected(defn, &qualified, input.select())?;
        let word = emit_select(env, select, scratch)?;
        env.slot_store(scratch.in_slots[inst_id.index()], index, word);
    }
    Ok(())
}

fn emit_child_call(
    env: &mut FuncEnv,
    circuit: &Circuit,
    defn: &Definition,
    inst_id: InstId,
    scratch: &Scratch,
    flavor: Flavor,
) -> Result<(), CompileError> {
    let inst = defn.instance(inst_id);
    let child = circuit.defn(inst.defn());
    let in_addr = env.slot_addr(scratch.in_slots[inst_id.index()]);
    let out_addr = env.slot_addr(scratch.out_slots[inst_id.index()]);
    let state = env.state_slice_ptr(defn.siminfo().state_offset(inst_id).unwrap_or(0));
    let symbol = match flavor {
        Flavor::Compute => compute_symbol(child.name()),
        Flavor::Update => update_symbol(child.name()),
    };
    env.call(&symbol, &[in_addr, state, out_addr])
}

/// Materializes a select as one word: slices are placed LSB first, each shifted into
/// position. Whole-source slices pass through untouched, relying on the invariant
/// that every produced word is canonical (high bits above the width are zero).
fn emit_select(env: &mut FuncEnv, select: &Select, scratch: &Scratch) -> Result<Value, CompileError> {
    if let Some(slice) = select.direct_value() {
        return Ok(emit_slice_word(env, slice, scratch));
    }
    let mut acc = env.iconst(0);
    let mut position = 0;
    for slice in select.slices() {
        let word = emit_slice_word(env, slice, scratch);
        let placed = env.shl(word, position);
        acc = env.bor(acc, placed);
        position += slice.width();
    }
    Ok(acc)
}

fn emit_slice_word(env: &mut FuncEnv, slice: &ValueSlice, scratch: &Scratch) -> Value {
    match slice.source() {
        SliceSource::Const(bits) => env.iconst(bits.to_u64()),
        SliceSource::Port { endpoint, output } => {
            let loaded = match endpoint {
                Endpoint::Own => env.load_input(*output),
                Endpoint::Inst(inst) => env.slot_load(scratch.out_slots[inst.index()], *output),
            };
            if slice.is_whole() {
                loaded
            } else {
                let shifted = env.shr(loaded, slice.offset());
                env.mask_to_width(shifted, slice.width())
            }
        }
    }
}

fn connected<'a>(
    defn: &Definition,
    port: &str,
    select: Option<&'a Select>,
) -> Result<&'a Select, CompileError> {
    select.ok_or_else(|| CompileError::Generator(format!("input {}.{port} is unconnected", defn.name())))
}

fn check_widths(defn: &Definition) -> Result<(), CompileError> {
    let check = |port: String, width: u32| {
        if width > 64 { Err(CompileError::UnsupportedWidth { port, width }) } else { Ok(()) }
    };
    for input in defn.iface().inputs() {
        check(format!("{}.{}", defn.name(), input.name()), input.width())?;
    }
    for output in defn.iface().outputs() {
        check(format!("{}.{}", defn.name(), output.name()), output.width())?;
    }
    for inst in defn.instances() {
        for input in inst.iface().inputs() {
            check(format!("{}.{}.{}", defn.name(), inst.name(), input.name()), input.width())?;
        }
        for output in inst.iface().outputs() {
            check(format!("{}.{}.{}", defn.name(), inst.name(), output.name()), output.width())?;
        }
    }
    Ok(())
}
