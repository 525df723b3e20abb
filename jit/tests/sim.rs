use std::sync::Arc;

use hotwire_circuit::{
    Bits, Circuit, Driver, DriverPart, EndpointRef, MemNetlist, PortDecl, PortRef, PrimitiveKind,
    build_circuit,
};
use hotwire_jit::{CompileError, CompiledCircuit, EngineError, UnitStatus};

fn and2(netlist: &mut MemNetlist, width: u32) -> usize {
    netlist.add_primitive(
        "and2",
        vec![
            PortDecl::input("a", width),
            PortDecl::input("b", width),
            PortDecl::output("o", width),
        ],
        PrimitiveKind::And,
    )
}

fn compiled(netlist: &MemNetlist, top: usize) -> CompiledCircuit {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let circuit = Arc::new(build_circuit(netlist, top).unwrap());
    CompiledCircuit::new(circuit).unwrap()
}

fn and_pair() -> (MemNetlist, usize) {
    let mut netlist = MemNetlist::new();
    let and2 = and2(&mut netlist, 1);
    let top = netlist.add_composite(
        "top",
        vec![
            PortDecl::input("a", 1),
            PortDecl::input("b", 1),
            PortDecl::input("c", 1),
            PortDecl::output("x", 1),
            PortDecl::output("y", 1),
        ],
    );
    let g0 = netlist.add_child(top, "g0", and2);
    let g1 = netlist.add_child(top, "g1", and2);
    netlist.connect(top, PortRef::child(g0, "a"), Driver::whole(EndpointRef::Parent, "a"));
    netlist.connect(top, PortRef::child(g0, "b"), Driver::whole(EndpointRef::Parent, "b"));
    netlist.connect(top, PortRef::child(g1, "a"), Driver::whole(EndpointRef::Parent, "b"));
    netlist.connect(top, PortRef::child(g1, "b"), Driver::whole(EndpointRef::Parent, "c"));
    netlist.connect(top, PortRef::parent("x"), Driver::whole(EndpointRef::Child(g0), "o"));
    netlist.connect(top, PortRef::parent("y"), Driver::whole(EndpointRef::Child(g1), "o"));
    (netlist, top)
}

#[test]
fn test_and_pair() {
    let (netlist, top) = and_pair();
    let sim = compiled(&netlist, top);
    let mut state = sim.new_state();
    let mut outputs = sim.new_outputs();

    sim.compute(&[1, 1, 0], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [1, 0]);
    sim.compute(&[1, 1, 1], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [1, 1]);
    sim.compute(&[0, 1, 1], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [0, 1]);
}

#[test]
fn test_lazy_until_first_compute() {
    let (netlist, top) = and_pair();
    let sim = compiled(&netlist, top);
    assert_eq!(sim.engine().status("top"), Some(UnitStatus::Stubbed));
    assert_eq!(sim.engine().status("and2"), Some(UnitStatus::Stubbed));

    let mut state = sim.new_state();
    let mut outputs = sim.new_outputs();
    sim.compute(&[1, 1, 1], &mut state, &mut outputs).unwrap();
    assert_eq!(sim.engine().status("top"), Some(UnitStatus::Linked));
    assert_eq!(sim.engine().status("and2"), Some(UnitStatus::Linked));
}

#[test]
fn test_compile_all_matches_lazy() {
    let (netlist, top) = and_pair();
    let lazy = compiled(&netlist, top);
    let forced = compiled(&netlist, top);
    forced.compile_all().unwrap();

    let mut state = lazy.new_state();
    let mut lazy_out = lazy.new_outputs();
    let mut forced_out = forced.new_outputs();
    for inputs in [[0, 0, 0], [1, 0, 1], [1, 1, 0], [1, 1, 1]] {
        lazy.compute(&inputs, &mut state, &mut lazy_out).unwrap();
        forced.compute(&inputs, &mut state, &mut forced_out).unwrap();
        assert_eq!(lazy_out, forced_out);
    }
}

#[test]
fn test_toggle() {
    let mut netlist = MemNetlist::new();
    let not1 = netlist.add_primitive(
        "not1",
        vec![PortDecl::input("a", 1), PortDecl::output("o", 1)],
        PrimitiveKind::Not,
    );
    let dff1 = netlist.add_primitive(
        "dff1",
        vec![PortDecl::input("d", 1), PortDecl::output("q", 1)],
        PrimitiveKind::Dff,
    );
    let top = netlist.add_composite("top", vec![PortDecl::output("q", 1)]);
    let inv = netlist.add_child(top, "inv", not1);
    let reg = netlist.add_child(top, "reg", dff1);
    netlist.connect(top, PortRef::child(inv, "a"), Driver::whole(EndpointRef::Child(reg), "q"));
    netlist.connect(top, PortRef::child(reg, "d"), Driver::whole(EndpointRef::Child(inv), "o"));
    netlist.connect(top, PortRef::parent("q"), Driver::whole(EndpointRef::Child(reg), "q"));

    let sim = compiled(&netlist, top);
    let mut state = sim.new_state();
    let mut outputs = sim.new_outputs();

    sim.compute(&[], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [0]);
    for expected in [1, 0, 1, 0, 1] {
        sim.step(&[], &mut state, &mut outputs).unwrap();
        assert_eq!(outputs, [expected]);
    }
}

#[test]
fn test_hierarchy_reuse() {
    let mut netlist = MemNetlist::new();
    let and2 = and2(&mut netlist, 1);
    let mid = netlist.add_composite(
        "mid",
        vec![PortDecl::input("a", 1), PortDecl::input("b", 1), PortDecl::output("o", 1)],
    );
    let gate = netlist.add_child(mid, "gate", and2);
    netlist.connect(mid, PortRef::child(gate, "a"), Driver::whole(EndpointRef::Parent, "a"));
    netlist.connect(mid, PortRef::child(gate, "b"), Driver::whole(EndpointRef::Parent, "b"));
    netlist.connect(mid, PortRef::parent("o"), Driver::whole(EndpointRef::Child(gate), "o"));

    // and4 = (a & b) & (c & d), built from two mids and a bare and2.
    let top = netlist.add_composite(
        "top",
        vec![
            PortDecl::input("a", 1),
            PortDecl::input("b", 1),
            PortDecl::input("c", 1),
            PortDecl::input("d", 1),
            PortDecl::output("o", 1),
        ],
    );
    let lo = netlist.add_child(top, "lo", mid);
    let hi = netlist.add_child(top, "hi", mid);
    let join = netlist.add_child(top, "join", and2);
    netlist.connect(top, PortRef::child(lo, "a"), Driver::whole(EndpointRef::Parent, "a"));
    netlist.connect(top, PortRef::child(lo, "b"), Driver::whole(EndpointRef::Parent, "b"));
    netlist.connect(top, PortRef::child(hi, "a"), Driver::whole(EndpointRef::Parent, "c"));
    netlist.connect(top, PortRef::child(hi, "b"), Driver::whole(EndpointRef::Parent, "d"));
    netlist.connect(top, PortRef::child(join, "a"), Driver::whole(EndpointRef::Child(lo), "o"));
    netlist.connect(top, PortRef::child(join, "b"), Driver::whole(EndpointRef::Child(hi), "o"));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(join), "o"));

    let sim = compiled(&netlist, top);
    let mut state = sim.new_state();
    let mut outputs = sim.new_outputs();
    sim.compute(&[1, 1, 1, 1], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [1]);
    sim.compute(&[1, 1, 1, 0], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [0]);
}

#[test]
fn test_bit_gather() {
    let mut netlist = MemNetlist::new();
    let buf3 = netlist.add_primitive(
        "buf3",
        vec![PortDecl::input("a", 3), PortDecl::output("o", 3)],
        PrimitiveKind::Buf,
    );
    let top = netlist.add_composite(
        "top",
        vec![
            PortDecl::input("x", 1),
            PortDecl::input("y", 1),
            PortDecl::input("z", 1),
            PortDecl::output("o", 3),
        ],
    );
    let buf = netlist.add_child(top, "buf", buf3);
    netlist.connect(
        top,
        PortRef::child(buf, "a"),
        Driver::Parts(vec![
            DriverPart::whole(EndpointRef::Parent, "x"),
            DriverPart::whole(EndpointRef::Parent, "y"),
            DriverPart::whole(EndpointRef::Parent, "z"),
        ]),
    );
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(buf), "o"));

    let sim = compiled(&netlist, top);
    let mut state = sim.new_state();
    let mut outputs = sim.new_outputs();
    sim.compute(&[1, 0, 1], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [0b101]);
    sim.compute(&[0, 1, 0], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [0b010]);
}

#[test]
fn test_slice_extract() {
    let mut netlist = MemNetlist::new();
    let buf1 = netlist.add_primitive(
        "buf1",
        vec![PortDecl::input("a", 1), PortDecl::output("o", 1)],
        PrimitiveKind::Buf,
    );
    let top = netlist.add_composite(
        "top",
        vec![PortDecl::input("x", 3), PortDecl::output("o", 1)],
    );
    let buf = netlist.add_child(top, "buf", buf1);
    netlist.connect(top, PortRef::child(buf, "a"), Driver::slice(EndpointRef::Parent, "x", 1, 1));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(buf), "o"));

    let sim = compiled(&netlist, top);
    let mut state = sim.new_state();
    let mut outputs = sim.new_outputs();
    sim.compute(&[0b010], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [1]);
    sim.compute(&[0b101], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [0]);
}

#[test]
fn test_constant_driver() {
    let mut netlist = MemNetlist::new();
    let and2 = and2(&mut netlist, 4);
    let top = netlist.add_composite(
        "top",
        vec![PortDecl::input("a", 4), PortDecl::output("o", 4)],
    );
    let gate = netlist.add_child(top, "gate", and2);
    netlist.connect(top, PortRef::child(gate, "a"), Driver::whole(EndpointRef::Parent, "a"));
    netlist.connect(top, PortRef::child(gate, "b"), Driver::bits(Bits::from_u64(0b0110, 4)));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(gate), "o"));

    let sim = compiled(&netlist, top);
    let mut state = sim.new_state();
    let mut outputs = sim.new_outputs();
    sim.compute(&[0b1111], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [0b0110]);
}

#[test]
fn test_mux() {
    let mut netlist = MemNetlist::new();
    let mux = netlist.add_primitive(
        "mux4",
        vec![
            PortDecl::input("a", 4),
            PortDecl::input("b", 4),
            PortDecl::input("sel", 1),
            PortDecl::output("o", 4),
        ],
        PrimitiveKind::Mux,
    );
    let top = netlist.add_composite(
        "top",
        vec![
            PortDecl::input("a", 4),
            PortDecl::input("b", 4),
            PortDecl::input("sel", 1),
            PortDecl::output("o", 4),
        ],
    );
    let m = netlist.add_child(top, "m", mux);
    for port in ["a", "b", "sel"] {
        netlist.connect(top, PortRef::child(m, port), Driver::whole(EndpointRef::Parent, port));
    }
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(m), "o"));

    let sim = compiled(&netlist, top);
    let mut state = sim.new_state();
    let mut outputs = sim.new_outputs();
    sim.compute(&[0b0011, 0b1100, 0], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [0b0011]);
    sim.compute(&[0b0011, 0b1100, 1], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [0b1100]);
}

#[test]
fn test_full_width_word() {
    let mut netlist = MemNetlist::new();
    let xor = netlist.add_primitive(
        "xor64",
        vec![
            PortDecl::input("a", 64),
            PortDecl::input("b", 64),
            PortDecl::output("o", 64),
        ],
        PrimitiveKind::Xor,
    );
    let top = netlist.add_composite(
        "top",
        vec![PortDecl::input("a", 64), PortDecl::input("b", 64), PortDecl::output("o", 64)],
    );
    let gate = netlist.add_child(top, "gate", xor);
    netlist.connect(top, PortRef::child(gate, "a"), Driver::whole(EndpointRef::Parent, "a"));
    netlist.connect(top, PortRef::child(gate, "b"), Driver::whole(EndpointRef::Parent, "b"));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(gate), "o"));

    let sim = compiled(&netlist, top);
    let mut state = sim.new_state();
    let mut outputs = sim.new_outputs();
    sim.compute(&[u64::MAX, 0xAAAA_AAAA_AAAA_AAAA], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [0x5555_5555_5555_5555]);
}

#[test]
fn test_unsupported_width() {
    let mut netlist = MemNetlist::new();
    let wide = netlist.add_primitive(
        "buf65",
        vec![PortDecl::input("a", 65), PortDecl::output("o", 65)],
        PrimitiveKind::Buf,
    );
    let top = netlist.add_composite(
        "top",
        vec![PortDecl::input("a", 65), PortDecl::output("o", 65)],
    );
    let buf = netlist.add_child(top, "buf", wide);
    netlist.connect(top, PortRef::child(buf, "a"), Driver::whole(EndpointRef::Parent, "a"));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(buf), "o"));

    // Wide ports are fine in the circuit itself; only lowering rejects them.
    let circuit = Arc::new(build_circuit(&netlist, top).unwrap());
    let sim = CompiledCircuit::new(circuit).unwrap();
    let err = sim.compile_all().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Compile(CompileError::UnsupportedWidth { width: 65, .. })
    ));
}

#[test]
fn test_input_masking() {
    let (netlist, top) = and_pair();
    let sim = compiled(&netlist, top);
    let mut state = sim.new_state();
    let mut outputs = sim.new_outputs();
    // Bits above a port's width are dropped before compiled code sees them.
    sim.compute(&[0b10, 0b10, 0b10], &mut state, &mut outputs).unwrap();
    assert_eq!(outputs, [0, 0]);
}

#[test]
fn test_port_lookup() {
    let (netlist, top) = and_pair();
    let sim = compiled(&netlist, top);
    assert_eq!(sim.num_inputs(), 3);
    assert_eq!(sim.num_outputs(), 2);
    assert_eq!(sim.input_index("c"), Some(2));
    assert_eq!(sim.output_index("y"), Some(1));
    assert_eq!(sim.input_index("y"), None);
    let _: &Circuit = sim.circuit();
}
