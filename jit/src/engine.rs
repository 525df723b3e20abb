use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use cranelift::prelude::*;
use cranelift_codegen::ir::Function;
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module, default_libcall_names};
use target_lexicon::Triple;
use tracing::{debug, error, info, warn};

use crate::builder::{CodeUnit, ModuleEnv, TransformFn, uniform_signature};
use crate::error::{CompileError, EngineError};

/// Produces a unit's functions on demand. Runs at most once, when the unit is first
/// compiled; until then only the unit's name and symbol list exist.
pub type Generator = Box<dyn FnOnce() -> Result<CodeUnit, CompileError> + Send>;

/// Where a unit stands in its lifecycle. Removal is terminal: a removed unit no
/// longer has a status, and its name and symbols become reusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    /// Submitted; stubs are installed, the generator has not run.
    Stubbed,
    /// The generator or backend is running right now.
    Compiling,
    /// Machine code is linked; stubs are patched to jump straight to it.
    Linked,
    /// Compilation failed; the error is replayed on every later resolve.
    Failed,
}

const MATERIALIZE_SYMBOL: &str = "hotwire.materialize";

/// A lazy machine-code engine over compilation units.
///
/// Each submitted unit exports a fixed list of symbols. Every symbol immediately
/// receives a stub whose address never changes: calling it compiles the unit on
/// first use and forwards every call after that through a patched slot, at the cost
/// of one atomic load and an indirect jump. [`Engine::resolve`] returns the final
/// entry address once a unit is linked, bypassing the stub entirely.
///
/// All addresses handed out are valid until the owning unit is removed or the
/// engine is dropped. The engine assumes a 64-bit host: code addresses travel
/// through the same `I64` words as simulation values.
pub struct Engine {
    shared: Arc<EngineShared>,
}

pub(crate) struct EngineShared {
    self_weak: Weak<EngineShared>,
    isa: OwnedTargetIsa,
    transform: Mutex<Option<Arc<TransformFn>>>,
    units: Mutex<Vec<Arc<UnitEntry>>>,
    names: Mutex<HashMap<String, usize>>,
    symbols: Mutex<HashMap<String, (usize, usize)>>,
}

struct UnitEntry {
    name: String,
    symbols: Vec<String>,
    /// One patch slot per symbol: zero until linked, then the final entry address.
    /// The stubs read these with an atomic load; [`Arc`] keeps them alive for as
    /// long as the stub code may run.
    slots: Vec<Arc<AtomicU64>>,
    stub_addrs: Vec<u64>,
    stub_module: Mutex<Option<SendModule>>,
    state: Mutex<UnitState>,
}

/// `JITModule` owns raw code pointers and a boxed symbol-lookup closure. Every
/// access is serialized through the owning unit's mutex.
struct SendModule(JITModule);

unsafe impl Send for SendModule {}

enum UnitState {
    Stubbed { generator: Option<Generator> },
    Linked { module: SendModule, addrs: Vec<u64> },
    Failed(CompileError),
    Removed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn backend(err: impl std::fmt::Display) -> EngineError {
    EngineError::Backend(err.to_string())
}

impl Engine {
    pub fn new() -> Result<Self, EngineError> {
        let mut flags = settings::builder();
        flags.set("opt_level", "speed").map_err(backend)?;
        flags.set("is_pic", "false").map_err(backend)?;
        let isa = cranelift_native::builder()
            .map_err(backend)?
            .finish(settings::Flags::new(flags))
            .map_err(backend)?;
        let shared = Arc::new_cyclic(|weak| EngineShared {
            self_weak: weak.clone(),
            isa,
            transform: Mutex::new(None),
            units: Mutex::new(Vec::new()),
            names: Mutex::new(HashMap::new()),
            symbols: Mutex::new(HashMap::new()),
        });
        Ok(Engine { shared })
    }

    /// The target this engine emits code for.
    pub fn triple(&self) -> &Triple {
        self.shared.isa.triple()
    }

    /// Installs a hook that sees every function's IR after it is built and before
    /// the backend compiles it. Applies to units compiled from now on.
    pub fn set_transform(&self, transform: impl Fn(&str, &mut Function) + Send + Sync + 'static) {
        *lock(&self.shared.transform) = Some(Arc::new(transform));
    }

    pub fn clear_transform(&self) {
        *lock(&self.shared.transform) = None;
    }

    /// Submits a unit and compiles it immediately.
    pub fn submit(&self, name: &str, unit: CodeUnit) -> Result<(), EngineError> {
        let symbols: Vec<String> = unit.symbols().map(str::to_owned).collect();
        let id = self.shared.submit(name, symbols, Box::new(move || Ok(unit)))?;
        self.shared.compile_unit(id)?;
        Ok(())
    }

    /// Submits a unit whose code is produced by `generator` on first use. The
    /// symbols get callable stub addresses right away; nothing is generated or
    /// compiled until one of them is called or resolved.
    pub fn submit_lazy(&self, name: &str, symbols: Vec<String>, generator: Generator) -> Result<(), EngineError> {
        self.shared.submit(name, symbols, generator)?;
        Ok(())
    }

    /// The address-stable stub for a symbol. Valid before the unit compiles;
    /// calling it triggers compilation.
    pub fn lookup(&self, symbol: &str) -> Result<*const u8, EngineError> {
        let (unit, index) = self.shared.symbol_target(symbol)?;
        let units = lock(&self.shared.units);
        Ok(units[unit].stub_addrs[index] as *const u8)
    }

    /// The callable address for a symbol: the final entry once its unit is linked,
    /// the address-stable stub while it is still pending. Resolving never compiles
    /// anything; calling a pending symbol's address does. A failed unit replays its
    /// error instead.
    pub fn resolve(&self, symbol: &str) -> Result<*const u8, EngineError> {
        let (unit, index) = self.shared.symbol_target(symbol)?;
        let entry = lock(&self.shared.units)[unit].clone();
        let addr = match entry.state.try_lock() {
            // Mid-compilation: the stub blocks on the winner and forwards.
            Err(_) => entry.stub_addrs[index],
            Ok(state) => match &*state {
                UnitState::Linked { addrs, .. } => addrs[index],
                UnitState::Stubbed { .. } => entry.stub_addrs[index],
                UnitState::Failed(err) => return Err(EngineError::Compile(err.clone())),
                UnitState::Removed => return Err(EngineError::RemovedUnit { unit: entry.name.clone() }),
            },
        };
        Ok(addr as *const u8)
    }

    /// Compiles every live unit that is still pending. Keeps going past failures
    /// and reports the first error encountered.
    pub fn compile_all(&self) -> Result<(), EngineError> {
        let mut ids: Vec<usize> = lock(&self.shared.names).values().copied().collect();
        ids.sort_unstable();
        let mut first = None;
        for id in ids {
            if let Err(err) = self.shared.compile_unit(id) {
                if first.is_none() {
                    first = Some(err);
                }
            }
        }
        match first {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Removes a live unit, freeing its code and stub memory. The unit's name and
    /// symbols become available for resubmission; previously handed-out addresses
    /// for this unit must no longer be called.
    pub fn remove(&self, name: &str) -> Result<(), EngineError> {
        let entry = {
            let mut names = lock(&self.shared.names);
            let Some(&id) = names.get(name) else {
                return Err(EngineError::UnknownUnit { unit: name.to_owned() });
            };
            let entry = lock(&self.shared.units)[id].clone();
            let mut symbols = lock(&self.shared.symbols);
            for symbol in &entry.symbols {
                symbols.remove(symbol);
            }
            names.remove(name);
            entry
        };
        let old = std::mem::replace(&mut *lock(&entry.state), UnitState::Removed);
        if let UnitState::Linked { module, .. } = old {
            unsafe { module.0.free_memory() };
        }
        if let Some(stub) = lock(&entry.stub_module).take() {
            unsafe { stub.0.free_memory() };
        }
        info!(unit = name, "unit removed");
        Ok(())
    }

    /// Where a live unit stands; `None` for unknown or removed names.
    pub fn status(&self, name: &str) -> Option<UnitStatus> {
        let id = *lock(&self.shared.names).get(name)?;
        let entry = lock(&self.shared.units)[id].clone();
        let status = match entry.state.try_lock() {
            Err(_) => UnitStatus::Compiling,
            Ok(state) => match &*state {
                UnitState::Stubbed { .. } => UnitStatus::Stubbed,
                UnitState::Linked { .. } => UnitStatus::Linked,
                UnitState::Failed(_) => UnitStatus::Failed,
                UnitState::Removed => return None,
            },
        };
        Some(status)
    }
}

impl EngineShared {
    fn submit(&self, name: &str, symbols: Vec<String>, generator: Generator) -> Result<usize, EngineError> {
        let mut names = lock(&self.names);
        if names.contains_key(name) {
            return Err(EngineError::DuplicateUnit { unit: name.to_owned() });
        }
        let mut symbol_map = lock(&self.symbols);
        for symbol in &symbols {
            if symbol_map.contains_key(symbol) {
                return Err(EngineError::DuplicateSymbol { symbol: symbol.clone() });
            }
        }
        let mut units = lock(&self.units);
        let id = units.len();
        let slots: Vec<Arc<AtomicU64>> = symbols.iter().map(|_| Arc::new(AtomicU64::new(0))).collect();
        let (stub_module, stub_addrs) = self.build_stubs(id, &symbols, &slots)?;
        for (index, symbol) in symbols.iter().enumerate() {
            symbol_map.insert(symbol.clone(), (id, index));
        }
        names.insert(name.to_owned(), id);
        units.push(Arc::new(UnitEntry {
            name: name.to_owned(),
            symbols,
            slots,
            stub_addrs,
            stub_module: Mutex::new(Some(SendModule(stub_module))),
            state: Mutex::new(UnitState::Stubbed { generator: Some(generator) }),
        }));
        info!(unit = name, "unit submitted");
        Ok(id)
    }

    fn symbol_target(&self, symbol: &str) -> Result<(usize, usize), EngineError> {
        lock(&self.symbols)
            .get(symbol)
            .copied()
            .ok_or_else(|| EngineError::UnknownSymbol { symbol: symbol.to_owned() })
    }

    /// Compiles a unit to completion, or returns its recorded outcome. The unit's
    /// state mutex is held for the whole compilation, so concurrent callers block
    /// and then observe the result.
    fn compile_unit(&self, id: usize) -> Result<Vec<u64>, EngineError> {
        let entry = lock(&self.units)[id].clone();
        let mut state = lock(&entry.state);
        let generator = match &mut *state {
            UnitState::Linked { addrs, .. } => return Ok(addrs.clone()),
            UnitState::Failed(err) => return Err(EngineError::Compile(err.clone())),
            UnitState::Removed => return Err(EngineError::RemovedUnit { unit: entry.name.clone() }),
            UnitState::Stubbed { generator } => generator.take(),
        };
        let Some(generator) = generator else {
            let err = CompileError::Generator("an earlier compilation attempt did not finish".to_owned());
            return Err(EngineError::Compile(err));
        };
        debug!(unit = %entry.name, "compiling unit");
        match self.run_generator(generator, &entry) {
            Ok((module, addrs)) => {
                for (slot, &addr) in entry.slots.iter().zip(&addrs) {
                    slot.store(addr, Ordering::Release);
                }
                *state = UnitState::Linked { module: SendModule(module), addrs: addrs.clone() };
                info!(unit = %entry.name, "unit linked");
                Ok(addrs)
            }
            Err(err) => {
                warn!(unit = %entry.name, %err, "unit failed to compile");
                *state = UnitState::Failed(err.clone());
                Err(EngineError::Compile(err))
            }
        }
    }

    fn run_generator(&self, generator: Generator, entry: &UnitEntry) -> Result<(JITModule, Vec<u64>), CompileError> {
        let unit = generator()?;
        let transform = lock(&self.transform).clone();
        let mut builder = JITBuilder::with_isa(self.isa.clone(), default_libcall_names());
        // Cross-unit calls resolve to the callee's stub, never to its code directly,
        // so linking this unit does not force compiling anything it references.
        let weak = self.self_weak.clone();
        builder.symbol_lookup_fn(Box::new(move |symbol| {
            let shared = weak.upgrade()?;
            shared.stub_address(symbol).map(|addr| addr as *const u8)
        }));
        let mut env = ModuleEnv::new(builder, transform);
        for func in unit.into_functions() {
            let (symbol, build) = func.into_parts();
            env.build_function(&symbol, build)?;
        }
        env.finish(&entry.symbols)
    }

    fn stub_address(&self, symbol: &str) -> Option<u64> {
        let (unit, index) = *lock(&self.symbols).get(symbol)?;
        let units = lock(&self.units);
        Some(units[unit].stub_addrs[index])
    }

    /// Entry point of the stub miss path. Returns the symbol's final address,
    /// blocking while another caller compiles the same unit. There is no way to
    /// surface an error through already-emitted machine code, so a failure here
    /// is fatal to the process.
    fn materialize(&self, unit: usize, symbol: usize) -> u64 {
        match self.compile_unit(unit) {
            Ok(addrs) => addrs[symbol],
            Err(err) => {
                let name = lock(&self.units)[unit].name.clone();
                error!(unit = %name, %err, "lazy compilation failed on the call path");
                std::process::abort();
            }
        }
    }

    /// Emits one stub per symbol: load the patch slot; if nonzero, tail through to
    /// the linked code; otherwise call back into the engine to compile the unit,
    /// then call the address it returns.
    fn build_stubs(
        &self,
        unit: usize,
        symbols: &[String],
        slots: &[Arc<AtomicU64>],
    ) -> Result<(JITModule, Vec<u64>), EngineError> {
        let mut builder = JITBuilder::with_isa(self.isa.clone(), default_libcall_names());
        builder.symbol(MATERIALIZE_SYMBOL, materialize_trampoline as *const u8);
        let mut module = JITModule::new(builder);
        let pointer_type = module.target_config().pointer_type();
        let uniform = uniform_signature(&module);

        let mut materialize_sig = module.make_signature();
        materialize_sig.params.push(AbiParam::new(pointer_type));
        materialize_sig.params.push(AbiParam::new(types::I64));
        materialize_sig.params.push(AbiParam::new(types::I64));
        materialize_sig.returns.push(AbiParam::new(types::I64));
        let materialize_id = module
            .declare_function(MATERIALIZE_SYMBOL, Linkage::Import, &materialize_sig)
            .map_err(backend)?;

        let mut ctx = module.make_context();
        let mut fb_ctx = FunctionBuilderContext::new();
        let mut ids = Vec::with_capacity(symbols.len());
        for (index, (symbol, slot)) in symbols.iter().zip(slots).enumerate() {
            ctx.func.signature = uniform.clone();
            let id = module.declare_function(symbol, Linkage::Export, &uniform).map_err(backend)?;
            let mut fb = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
            let entry = fb.create_block();
            fb.append_block_params_for_function_params(entry);
            fb.switch_to_block(entry);
            fb.seal_block(entry);
            let args = fb.block_params(entry).to_vec();
            let hit = fb.create_block();
            let miss = fb.create_block();

            let slot_addr = fb.ins().iconst(pointer_type, Arc::as_ptr(slot) as i64);
            let target = fb.ins().atomic_load(types::I64, MemFlags::trusted(), slot_addr);
            fb.ins().brif(target, hit, &[], miss, &[]);

            fb.switch_to_block(hit);
            fb.seal_block(hit);
            let sig_ref = fb.import_signature(uniform.clone());
            fb.ins().call_indirect(sig_ref, target, &args);
            fb.ins().return_(&[]);

            fb.switch_to_block(miss);
            fb.seal_block(miss);
            let materialize_ref = module.declare_func_in_func(materialize_id, fb.func);
            let engine_arg = fb.ins().iconst(pointer_type, self as *const EngineShared as i64);
            let unit_arg = fb.ins().iconst(types::I64, unit as i64);
            let symbol_arg = fb.ins().iconst(types::I64, index as i64);
            let call = fb.ins().call(materialize_ref, &[engine_arg, unit_arg, symbol_arg]);
            let addr = fb.inst_results(call)[0];
            fb.ins().call_indirect(sig_ref, addr, &args);
            fb.ins().return_(&[]);
            fb.finalize();

            module.define_function(id, &mut ctx).map_err(backend)?;
            module.clear_context(&mut ctx);
            ids.push(id);
        }
        module.finalize_definitions().map_err(backend)?;
        let addrs = ids.iter().map(|&id| module.get_finalized_function(id) as u64).collect();
        Ok((module, addrs))
    }
}

unsafe extern "C" fn materialize_trampoline(shared: *const EngineShared, unit: u64, symbol: u64) -> u64 {
    let shared = unsafe { &*shared };
    shared.materialize(unit as usize, symbol as usize)
}
