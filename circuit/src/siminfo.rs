use crate::error::StructuralError;
use crate::graph::{Definition, InstId, Instance, PrimitiveKind};
use crate::iface::Interface;
use crate::value::{Endpoint, SliceSource};

/// Derived simulation metadata for one definition: statefulness, state storage
/// layout, and a combinational evaluation order for its instances.
///
/// State is laid out as a flat array of 64-bit words: a `dff` owns one word, and a
/// composite's region is the concatenation of its stateful instances' regions.
#[derive(Debug, Clone)]
pub struct SimInfo {
    stateful: bool,
    outputs_registered: bool,
    state_words: u32,
    eval_order: Vec<InstId>,
    state_offsets: Vec<Option<u32>>,
    stateful_instances: Vec<InstId>,
}

impl SimInfo {
    /// True when the definition transitively contains a stateful primitive.
    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    /// True when every output is driven from stored state (or a constant), so the
    /// definition's outputs do not combinationally depend on its inputs.
    pub fn outputs_registered(&self) -> bool {
        self.outputs_registered
    }

    /// Words of state storage this definition needs.
    pub fn state_words(&self) -> u32 {
        self.state_words
    }

    /// Instances in evaluation order: registered-output instances first, then the
    /// rest with every combinational dependency before its consumer.
    pub fn eval_order(&self) -> &[InstId] {
        &self.eval_order
    }

    /// Offset of an instance's state region within this definition's, if stateful.
    pub fn state_offset(&self, inst: InstId) -> Option<u32> {
        self.state_offsets[inst.index()]
    }

    /// The stateful instances, in declaration order.
    pub fn stateful_instances(&self) -> &[InstId] {
        &self.stateful_instances
    }

    pub(crate) fn primitive(kind: PrimitiveKind) -> Self {
        SimInfo {
            stateful: kind.is_stateful(),
            outputs_registered: kind.is_stateful(),
            state_words: if kind.is_stateful() { 1 } else { 0 },
            eval_order: Vec::new(),
            state_offsets: Vec::new(),
            stateful_instances: Vec::new(),
        }
    }
}

/// Analyzes a fully wired composite definition. `defns` holds the already-built
/// children (the post-order build guarantees they precede their parents).
pub(crate) fn analyze_composite(
    name: &str,
    iface: &Interface,
    instances: &[Instance],
    defns: &[Definition],
) -> Result<SimInfo, StructuralError> {
    let mut state_words = 0;
    let mut state_offsets = Vec::with_capacity(instances.len());
    let mut stateful_instances = Vec::new();
    for (index, inst) in instances.iter().enumerate() {
        let child = defns[inst.defn().index()].siminfo();
        if child.stateful {
            state_offsets.push(Some(state_words));
            state_words += child.state_words;
            stateful_instances.push(InstId::new(index as u32));
        } else {
            state_offsets.push(None);
        }
    }

    let eval_order = eval_order(name, instances, defns)?;

    let outputs_registered = iface.inputs().all(|input| {
        input.select().is_some_and(|select| {
            select.slices().iter().all(|slice| match slice.source() {
                SliceSource::Const(_) => true,
                SliceSource::Port { endpoint: Endpoint::Own, .. } => false,
                SliceSource::Port { endpoint: Endpoint::Inst(inst), .. } => {
                    let child = instances[inst.index()].defn();
                    defns[child.index()].siminfo().outputs_registered
                }
            })
        })
    });

    Ok(SimInfo {
        stateful: !stateful_instances.is_empty(),
        outputs_registered,
        state_words,
        eval_order,
        state_offsets,
        stateful_instances,
    })
}

/// Orders instances so that every combinational dependency is evaluated before its
/// consumer. Instances whose definitions have registered outputs come first: their
/// outputs depend only on stored state, so they can always run, and placing them up
/// front is what breaks feedback cycles through registers. A residual cycle among
/// the remaining instances is a structural error.
fn eval_order(
    name: &str,
    instances: &[Instance],
    defns: &[Definition],
) -> Result<Vec<InstId>, StructuralError> {
    let deps: Vec<Vec<usize>> = instances
        .iter()
        .map(|inst| {
            let mut deps = Vec::new();
            for input in inst.iface().inputs() {
                let Some(select) = input.select() else { continue };
                for slice in select.slices() {
                    if let SliceSource::Port { endpoint: Endpoint::Inst(src), .. } = slice.source() {
                        let src_defn = &defns[instances[src.index()].defn().index()];
                        if !src_defn.siminfo().outputs_registered && !deps.contains(&src.index()) {
                            deps.push(src.index());
                        }
                    }
                }
            }
            deps
        })
        .collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; instances.len()];
    let mut order = Vec::with_capacity(instances.len());
    for (index, inst) in instances.iter().enumerate() {
        if defns[inst.defn().index()].siminfo().outputs_registered {
            marks[index] = Mark::Done;
            order.push(InstId::new(index as u32));
        }
    }
    // Iterative DFS; the second appearance of an index on the stack closes it.
    for root in 0..instances.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        let mut stack = vec![(root, false)];
        while let Some((index, closing)) = stack.pop() {
            if closing {
                marks[index] = Mark::Done;
                order.push(InstId::new(index as u32));
                continue;
            }
            match marks[index] {
                Mark::Done => continue,
                Mark::OnStack => {
                    return Err(StructuralError::CombinationalLoop {
                        defn: name.to_owned(),
                        instance: instances[index].name().to_owned(),
                    });
                }
                Mark::Unvisited => {
                    marks[index] = Mark::OnStack;
                    stack.push((index, true));
                    for &dep in &deps[index] {
                        if marks[dep] == Mark::OnStack {
                            return Err(StructuralError::CombinationalLoop {
                                defn: name.to_owned(),
                                instance: instances[dep].name().to_owned(),
                            });
                        }
                        if marks[dep] == Mark::Unvisited {
                            stack.push((dep, false));
                        }
                    }
                }
            }
        }
    }
    Ok(order)
}
