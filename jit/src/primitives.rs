use hotwire_circuit::PrimitiveKind;

use crate::builder::{CodeUnit, FuncEnv};
use crate::error::CompileError;

/// Lowering recipes for one primitive kind, at a given data width. Input and output
/// words are canonical (bits above the port width are zero); each recipe preserves
/// that, masking where an operation could set high bits.
///
/// `update` only runs when `stateful` is set; `define` adds any extra module-level
/// functions a kind needs beyond its compute/update pair. No current kind needs one.
#[derive(Clone, Copy)]
pub(crate) struct PrimitiveBehavior {
    pub(crate) stateful: bool,
    pub(crate) compute: fn(&mut FuncEnv, u32) -> Result<(), CompileError>,
    pub(crate) update: fn(&mut FuncEnv, u32) -> Result<(), CompileError>,
    pub(crate) define: Option<fn(&mut CodeUnit, &str, u32) -> Result<(), CompileError>>,
}

impl PrimitiveBehavior {
    const fn combinational(compute: fn(&mut FuncEnv, u32) -> Result<(), CompileError>) -> Self {
        PrimitiveBehavior { stateful: false, compute, update: update_nop, define: None }
    }
}

pub(crate) fn behavior(kind: PrimitiveKind) -> PrimitiveBehavior {
    match kind {
        PrimitiveKind::And => PrimitiveBehavior::combinational(compute_and),
        PrimitiveKind::Or => PrimitiveBehavior::combinational(compute_or),
        PrimitiveKind::Xor => PrimitiveBehavior::combinational(compute_xor),
        PrimitiveKind::Not => PrimitiveBehavior::combinational(compute_not),
        PrimitiveKind::Mux => PrimitiveBehavior::combinational(compute_mux),
        PrimitiveKind::Buf => PrimitiveBehavior::combinational(compute_buf),
        PrimitiveKind::Dff => {
            PrimitiveBehavior { stateful: true, compute: compute_dff, update: update_dff, define: None }
        }
    }
}

fn compute_and(env: &mut FuncEnv, _width: u32) -> Result<(), CompileError> {
    let a = env.load_input(0);
    let b = env.load_input(1);
    let out = env.band(a, b);
    env.store_output(0, out);
    Ok(())
}

fn compute_or(env: &mut FuncEnv, _width: u32) -> Result<(), CompileError> {
    let a = env.load_input(0);
    let b = env.load_input(1);
    let out = env.bor(a, b);
    env.store_output(0, out);
    Ok(())
}

fn compute_xor(env: &mut FuncEnv, _width: u32) -> Result<(), CompileError> {
    let a = env.load_input(0);
    let b = env.load_input(1);
    let out = env.bxor(a, b);
    env.store_output(0, out);
    Ok(())
}

fn compute_not(env: &mut FuncEnv, width: u32) -> Result<(), CompileError> {
    let a = env.load_input(0);
    let inverted = env.bnot(a);
    let out = env.mask_to_width(inverted, width);
    env.store_output(0, out);
    Ok(())
}

/// `out = sel ? b : a`, branch-free: the 1-bit selector is stretched to a full mask.
fn compute_mux(env: &mut FuncEnv, _width: u32) -> Result<(), CompileError> {
    let a = env.load_input(0);
    let b = env.load_input(1);
    let sel = env.load_input(2);
    let mask = env.fill_mask(sel);
    let inverse = env.bnot(mask);
    let b_part = env.band(b, mask);
    let a_part = env.band(a, inverse);
    let out = env.bor(b_part, a_part);
    env.store_output(0, out);
    Ok(())
}

fn compute_buf(env: &mut FuncEnv, _width: u32) -> Result<(), CompileError> {
    let a = env.load_input(0);
    env.store_output(0, a);
    Ok(())
}

// The output reflects stored state only; the data input is sampled by the update.
fn compute_dff(env: &mut FuncEnv, _width: u32) -> Result<(), CompileError> {
    let stored = env.load_state(0);
    env.store_output(0, stored);
    Ok(())
}

fn update_dff(env: &mut FuncEnv, width: u32) -> Result<(), CompileError> {
    let d = env.load_input(0);
    let masked = env.mask_to_width(d, width);
    env.store_state(0, masked);
    Ok(())
}

fn update_nop(_env: &mut FuncEnv, _width: u32) -> Result<(), CompileError> {
    Ok(())
}
