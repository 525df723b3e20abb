use std::sync::Arc;

use hotwire_circuit::Circuit;

use crate::codegen::{self, compute_symbol, update_symbol};
use crate::engine::Engine;
use crate::error::EngineError;

/// The uniform machine-code entry point: `fn(inputs, state, outputs)`, each buffer a
/// flat array of 64-bit words, one word per port.
pub type SimFn = unsafe extern "C" fn(*const u64, *mut u64, *mut u64);

/// A circuit bound to an [`Engine`], one compilation unit per definition.
///
/// All units are submitted lazily: constructing a `CompiledCircuit` generates no
/// code. A definition compiles the first time it is entered, whether through
/// [`CompiledCircuit::compute`] on the top or through a parent's call into a child's
/// stub; [`CompiledCircuit::compile_all`] forces everything up front.
///
/// Input words are indexed by the top module's input ports in declaration order,
/// output words by its output ports likewise. Input values are masked to their
/// port's width before they reach compiled code.
pub struct CompiledCircuit {
    circuit: Arc<Circuit>,
    engine: Engine,
}

impl CompiledCircuit {
    pub fn new(circuit: Arc<Circuit>) -> Result<Self, EngineError> {
        Self::with_engine(circuit, Engine::new()?)
    }

    /// Binds to an existing engine, so a transform hook or earlier units carry over.
    pub fn with_engine(circuit: Arc<Circuit>, engine: Engine) -> Result<Self, EngineError> {
        for (id, defn) in circuit.definitions() {
            engine.submit_lazy(
                defn.name(),
                codegen::unit_symbols(defn.name()),
                codegen::generator(circuit.clone(), id),
            )?;
        }
        Ok(CompiledCircuit { circuit, engine })
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn num_inputs(&self) -> usize {
        self.circuit.top().iface().num_outputs()
    }

    pub fn num_outputs(&self) -> usize {
        self.circuit.top().iface().num_inputs()
    }

    /// Word index of a top-level input port.
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.circuit.top().iface().output_index(name)
    }

    /// Word index of a top-level output port.
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.circuit.top().iface().input_index(name)
    }

    pub fn new_inputs(&self) -> Vec<u64> {
        vec![0; self.num_inputs()]
    }

    pub fn new_outputs(&self) -> Vec<u64> {
        vec![0; self.num_outputs()]
    }

    /// A zeroed state buffer sized for the top definition.
    pub fn new_state(&self) -> Vec<u64> {
        vec![0; self.circuit.top().siminfo().state_words() as usize]
    }

    /// Evaluates combinational logic: fills `outputs` from `inputs` and the stored
    /// state, leaving the state untouched.
    pub fn compute(&self, inputs: &[u64], state: &mut [u64], outputs: &mut [u64]) -> Result<(), EngineError> {
        let top = self.circuit.top();
        assert_eq!(inputs.len(), self.num_inputs());
        assert_eq!(state.len(), top.siminfo().state_words() as usize);
        assert_eq!(outputs.len(), self.num_outputs());
        let masked = self.masked_inputs(inputs);
        let func = self.entry(&compute_symbol(top.name()))?;
        unsafe { func(masked.as_ptr(), state.as_mut_ptr(), outputs.as_mut_ptr()) };
        Ok(())
    }

    /// Advances stored state one cycle under the given inputs.
    pub fn update(&self, inputs: &[u64], state: &mut [u64]) -> Result<(), EngineError> {
        let top = self.circuit.top();
        assert_eq!(inputs.len(), self.num_inputs());
        assert_eq!(state.len(), top.siminfo().state_words() as usize);
        let masked = self.masked_inputs(inputs);
        let mut scratch = self.new_outputs();
        let func = self.entry(&update_symbol(top.name()))?;
        unsafe { func(masked.as_ptr(), state.as_mut_ptr(), scratch.as_mut_ptr()) };
        Ok(())
    }

    /// One clock cycle: latch state under `inputs`, then evaluate `outputs`.
    pub fn step(&self, inputs: &[u64], state: &mut [u64], outputs: &mut [u64]) -> Result<(), EngineError> {
        self.update(inputs, state)?;
        self.compute(inputs, state, outputs)
    }

    /// Forces compilation of every definition.
    pub fn compile_all(&self) -> Result<(), EngineError> {
        self.engine.compile_all()
    }

    fn entry(&self, symbol: &str) -> Result<SimFn, EngineError> {
        let addr = self.engine.resolve(symbol)?;
        Ok(unsafe { std::mem::transmute::<*const u8, SimFn>(addr) })
    }

    fn masked_inputs(&self, inputs: &[u64]) -> Vec<u64> {
        self.circuit
            .top()
            .iface()
            .outputs()
            .zip(inputs)
            .map(|(port, &word)| {
                if port.width() >= 64 { word } else { word & ((1u64 << port.width()) - 1) }
            })
            .collect()
    }
}
