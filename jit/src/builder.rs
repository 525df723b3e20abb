use std::collections::HashMap;
use std::sync::Arc;

use cranelift::prelude::*;
use cranelift_codegen::Context;
use cranelift_codegen::ir::{Function, StackSlot};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};

use crate::error::CompileError;

/// Emits the body of one function through a [`FuncEnv`].
pub type BuildFn = Box<dyn FnOnce(&mut FuncEnv) -> Result<(), CompileError> + Send>;

/// Hook applied to every function of a unit after its body is built and before it
/// is handed to the backend. Receives the symbol name and the finished IR.
pub type TransformFn = dyn Fn(&str, &mut Function) + Send + Sync;

/// One named function of a compilation unit, deferred until the unit compiles.
pub struct CodeFn {
    symbol: String,
    build: BuildFn,
}

impl CodeFn {
    pub fn new(symbol: impl Into<String>, build: BuildFn) -> Self {
        CodeFn { symbol: symbol.into(), build }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub(crate) fn into_parts(self) -> (String, BuildFn) {
        (self.symbol, self.build)
    }
}

/// A compilation unit: the functions that link and unlink together as one atom.
#[derive(Default)]
pub struct CodeUnit {
    functions: Vec<CodeFn>,
}

impl CodeUnit {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn define(&mut self, symbol: impl Into<String>, build: BuildFn) {
        self.functions.push(CodeFn::new(symbol, build));
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|func| func.symbol.as_str())
    }

    pub(crate) fn into_functions(self) -> Vec<CodeFn> {
        self.functions
    }
}

/// The uniform signature every simulation function carries:
/// `fn(inputs: *const u64, state: *mut u64, outputs: *mut u64)`.
pub(crate) fn uniform_signature(module: &JITModule) -> Signature {
    let pointer_type = module.target_config().pointer_type();
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(pointer_type));
    sig.params.push(AbiParam::new(pointer_type));
    sig.params.push(AbiParam::new(pointer_type));
    sig
}

/// One in-flight unit module: owns the backing [`JITModule`] and the shared
/// function-building contexts while the unit's functions are emitted one by one.
pub(crate) struct ModuleEnv {
    module: JITModule,
    ctx: Context,
    fb_ctx: FunctionBuilderContext,
    signature: Signature,
    pointer_type: Type,
    defined: HashMap<String, FuncId>,
    transform: Option<Arc<TransformFn>>,
}

impl ModuleEnv {
    pub(crate) fn new(builder: JITBuilder, transform: Option<Arc<TransformFn>>) -> Self {
        let module = JITModule::new(builder);
        let ctx = module.make_context();
        let pointer_type = module.target_config().pointer_type();
        let signature = uniform_signature(&module);
        ModuleEnv {
            module,
            ctx,
            fb_ctx: FunctionBuilderContext::new(),
            signature,
            pointer_type,
            defined: HashMap::new(),
            transform,
        }
    }

    pub(crate) fn build_function(&mut self, symbol: &str, build: BuildFn) -> Result<(), CompileError> {
        self.ctx.func.signature = self.signature.clone();
        let id = self
            .module
            .declare_function(symbol, Linkage::Export, &self.signature)
            .map_err(|err| CompileError::Backend(err.to_string()))?;
        {
            let builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.fb_ctx);
            let mut env = FuncEnv::new(builder, &mut self.module, self.signature.clone(), self.pointer_type);
            build(&mut env)?;
            env.finish();
        }
        if let Some(transform) = &self.transform {
            transform(symbol, &mut self.ctx.func);
        }
        self.module
            .define_function(id, &mut self.ctx)
            .map_err(|err| CompileError::Backend(err.to_string()))?;
        self.module.clear_context(&mut self.ctx);
        self.defined.insert(symbol.to_owned(), id);
        Ok(())
    }

    /// Finalizes the module and returns it together with the entry address of each
    /// requested symbol, in order.
    pub(crate) fn finish(mut self, symbols: &[String]) -> Result<(JITModule, Vec<u64>), CompileError> {
        self.module
            .finalize_definitions()
            .map_err(|err| CompileError::Backend(err.to_string()))?;
        let mut addrs = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let id = self
                .defined
                .get(symbol)
                .ok_or_else(|| CompileError::MissingSymbol { symbol: symbol.clone() })?;
            addrs.push(self.module.get_finalized_function(*id) as u64);
        }
        Ok((self.module, addrs))
    }
}

/// The function-building surface handed to [`BuildFn`] callbacks.
///
/// The entry block is already set up; the three uniform parameters are available as
/// [`FuncEnv::inputs_ptr`], [`FuncEnv::state_ptr`] and [`FuncEnv::outputs_ptr`]. All
/// word accessors operate on 64-bit words, indexed from the respective pointer.
pub struct FuncEnv<'a> {
    builder: FunctionBuilder<'a>,
    module: &'a mut JITModule,
    signature: Signature,
    pointer_type: Type,
    imports: HashMap<String, FuncId>,
    inputs: Value,
    state: Value,
    outputs: Value,
}

impl<'a> FuncEnv<'a> {
    fn new(
        mut builder: FunctionBuilder<'a>,
        module: &'a mut JITModule,
        signature: Signature,
        pointer_type: Type,
    ) -> Self {
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);
        let params = builder.block_params(entry);
        let (inputs, state, outputs) = (params[0], params[1], params[2]);
        FuncEnv { builder, module, signature, pointer_type, imports: HashMap::new(), inputs, state, outputs }
    }

    fn finish(self) {
        self.builder.finalize();
    }

    pub fn inputs_ptr(&self) -> Value {
        self.inputs
    }

    pub fn state_ptr(&self) -> Value {
        self.state
    }

    pub fn outputs_ptr(&self) -> Value {
        self.outputs
    }

    pub fn iconst(&mut self, value: u64) -> Value {
        self.builder.ins().iconst(types::I64, value as i64)
    }

    pub fn load_word(&mut self, ptr: Value, index: usize) -> Value {
        self.builder.ins().load(types::I64, MemFlags::trusted(), ptr, (index * 8) as i32)
    }

    pub fn store_word(&mut self, ptr: Value, index: usize, value: Value) {
        self.builder.ins().store(MemFlags::trusted(), value, ptr, (index * 8) as i32);
    }

    pub fn load_input(&mut self, index: usize) -> Value {
        self.load_word(self.inputs, index)
    }

    pub fn store_output(&mut self, index: usize, value: Value) {
        self.store_word(self.outputs, index, value)
    }

    pub fn load_state(&mut self, word: u32) -> Value {
        self.load_word(self.state, word as usize)
    }

    pub fn store_state(&mut self, word: u32, value: Value) {
        self.store_word(self.state, word as usize, value)
    }

    /// The state pointer advanced by `words` 64-bit words.
    pub fn state_slice_ptr(&mut self, words: u32) -> Value {
        if words == 0 {
            self.state
        } else {
            self.builder.ins().iadd_imm(self.state, (words as i64) * 8)
        }
    }

    pub fn make_slot(&mut self, words: usize) -> StackSlot {
        let size = (words.max(1) * 8) as u32;
        self.builder.create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, size, 3))
    }

    pub fn slot_load(&mut self, slot: StackSlot, word: usize) -> Value {
        self.builder.ins().stack_load(types::I64, slot, (word * 8) as i32)
    }

    pub fn slot_store(&mut self, slot: StackSlot, word: usize, value: Value) {
        self.builder.ins().stack_store(value, slot, (word * 8) as i32);
    }

    pub fn slot_addr(&mut self, slot: StackSlot) -> Value {
        self.builder.ins().stack_addr(self.pointer_type, slot, 0)
    }

    /// Calls another simulation function by symbol with the uniform signature. The
    /// symbol is resolved at link time, through the engine for cross-unit calls.
    pub fn call(&mut self, symbol: &str, args: &[Value]) -> Result<(), CompileError> {
        let id = match self.imports.get(symbol) {
            Some(&id) => id,
            None => {
                let id = self
                    .module
                    .declare_function(symbol, Linkage::Import, &self.signature)
                    .map_err(|err| CompileError::Backend(err.to_string()))?;
                self.imports.insert(symbol.to_owned(), id);
                id
            }
        };
        let func_ref = self.module.declare_func_in_func(id, self.builder.func);
        self.builder.ins().call(func_ref, args);
        Ok(())
    }

    pub fn band(&mut self, a: Value, b: Value) -> Value {
        self.builder.ins().band(a, b)
    }

    pub fn bor(&mut self, a: Value, b: Value) -> Value {
        self.builder.ins().bor(a, b)
    }

    pub fn bxor(&mut self, a: Value, b: Value) -> Value {
        self.builder.ins().bxor(a, b)
    }

    pub fn bnot(&mut self, a: Value) -> Value {
        self.builder.ins().bnot(a)
    }

    /// All-ones when the 1-bit value is set, zero otherwise.
    pub fn fill_mask(&mut self, bit: Value) -> Value {
        self.builder.ins().ineg(bit)
    }

    pub fn shl(&mut self, value: Value, amount: u32) -> Value {
        if amount == 0 {
            value
        } else {
            self.builder.ins().ishl_imm(value, amount as i64)
        }
    }

    pub fn shr(&mut self, value: Value, amount: u32) -> Value {
        if amount == 0 {
            value
        } else {
            self.builder.ins().ushr_imm(value, amount as i64)
        }
    }

    /// Clears all bits of `value` above `width`. Widths over 64 are rejected before
    /// codegen, so 64 means the word passes through untouched.
    pub fn mask_to_width(&mut self, value: Value, width: u32) -> Value {
        if width >= 64 {
            value
        } else {
            self.builder.ins().band_imm(value, ((1u64 << width) - 1) as i64)
        }
    }

    pub fn ret(&mut self) {
        self.builder.ins().return_(&[]);
    }
}
