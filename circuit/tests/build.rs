use hotwire_circuit::{
    build_circuit, Bits, Driver, DriverPart, EndpointRef, MemNetlist, PortDecl, PortRef, PrimitiveKind,
    StructuralError,
};

fn and2(netlist: &mut MemNetlist) -> usize {
    netlist.add_primitive(
        "and2",
        vec![PortDecl::input("a", 1), PortDecl::input("b", 1), PortDecl::output("o", 1)],
        PrimitiveKind::And,
    )
}

fn buf1(netlist: &mut MemNetlist) -> usize {
    netlist.add_primitive(
        "buf1",
        vec![PortDecl::input("a", 1), PortDecl::output("o", 1)],
        PrimitiveKind::Buf,
    )
}

fn dff1(netlist: &mut MemNetlist) -> usize {
    netlist.add_primitive(
        "dff1",
        vec![PortDecl::input("d", 1), PortDecl::output("q", 1)],
        PrimitiveKind::Dff,
    )
}

#[test]
fn test_dedup() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let mut netlist = MemNetlist::new();
    let and2 = and2(&mut netlist);
    let top = netlist.add_composite(
        "top",
        vec![
            PortDecl::input("a", 1),
            PortDecl::input("b", 1),
            PortDecl::output("x", 1),
            PortDecl::output("y", 1),
        ],
    );
    let g0 = netlist.add_child(top, "g0", and2);
    let g1 = netlist.add_child(top, "g1", and2);
    for (gate, port) in [(g0, "x"), (g1, "y")] {
        netlist.connect(top, PortRef::child(gate, "a"), Driver::whole(EndpointRef::Parent, "a"));
        netlist.connect(top, PortRef::child(gate, "b"), Driver::whole(EndpointRef::Parent, "b"));
        netlist.connect(top, PortRef::parent(port), Driver::whole(EndpointRef::Child(gate), "o"));
    }

    let circuit = build_circuit(&netlist, top).unwrap();
    // Both instances reference the same source module: exactly one and2 definition.
    assert!(!circuit.is_empty());
    assert_eq!(circuit.len(), 2);
    assert_eq!(circuit.top().name(), "top");
    assert_eq!(circuit.top().instances().len(), 2);
    let and_id = circuit.top().instances()[0].defn();
    assert_eq!(circuit.top().instances()[1].defn(), and_id);
    assert_eq!(circuit.defn(and_id).name(), "and2");
}

#[test]
fn test_post_order() {
    let mut netlist = MemNetlist::new();
    let and2 = and2(&mut netlist);
    let mid = netlist.add_composite(
        "mid",
        vec![PortDecl::input("a", 1), PortDecl::input("b", 1), PortDecl::output("o", 1)],
    );
    let gate = netlist.add_child(mid, "gate", and2);
    netlist.connect(mid, PortRef::child(gate, "a"), Driver::whole(EndpointRef::Parent, "a"));
    netlist.connect(mid, PortRef::child(gate, "b"), Driver::whole(EndpointRef::Parent, "b"));
    netlist.connect(mid, PortRef::parent("o"), Driver::whole(EndpointRef::Child(gate), "o"));

    let top = netlist.add_composite(
        "top",
        vec![PortDecl::input("a", 1), PortDecl::input("b", 1), PortDecl::output("o", 1)],
    );
    let inner = netlist.add_child(top, "inner", mid);
    netlist.connect(top, PortRef::child(inner, "a"), Driver::whole(EndpointRef::Parent, "a"));
    netlist.connect(top, PortRef::child(inner, "b"), Driver::whole(EndpointRef::Parent, "b"));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(inner), "o"));

    let circuit = build_circuit(&netlist, top).unwrap();
    let names: Vec<&str> = circuit.definitions().map(|(_, defn)| defn.name()).collect();
    assert_eq!(names, ["and2", "mid", "top"]);
    assert_eq!(circuit.top_id(), circuit.definitions().last().unwrap().0);
}

#[test]
fn test_array_driver_slices() {
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
    // Three per-bit drivers from three distinct sources: nothing to merge.
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

    let circuit = build_circuit(&netlist, top).unwrap();
    let select = circuit.top().instances()[0].iface().input("a").unwrap().select().unwrap();
    assert_eq!(select.slices().len(), 3);
    assert_eq!(select.width(), 3);
}

#[test]
fn test_array_driver_compaction() {
    let mut netlist = MemNetlist::new();
    let buf3 = netlist.add_primitive(
        "buf3",
        vec![PortDecl::input("a", 3), PortDecl::output("o", 3)],
        PrimitiveKind::Buf,
    );
    let top = netlist.add_composite(
        "top",
        vec![PortDecl::input("x", 3), PortDecl::output("o", 3)],
    );
    let buf = netlist.add_child(top, "buf", buf3);
    // Per-bit drivers that are contiguous bits of one source compact to one slice.
    netlist.connect(
        top,
        PortRef::child(buf, "a"),
        Driver::Parts(vec![
            DriverPart::slice(EndpointRef::Parent, "x", 0, 1),
            DriverPart::slice(EndpointRef::Parent, "x", 1, 1),
            DriverPart::slice(EndpointRef::Parent, "x", 2, 1),
        ]),
    );
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(buf), "o"));

    let circuit = build_circuit(&netlist, top).unwrap();
    let select = circuit.top().instances()[0].iface().input("a").unwrap().select().unwrap();
    assert_eq!(select.slices().len(), 1);
    assert!(select.direct_value().is_some());
}

#[test]
fn test_constant_driver() {
    let mut netlist = MemNetlist::new();
    let buf3 = netlist.add_primitive(
        "buf3",
        vec![PortDecl::input("a", 3), PortDecl::output("o", 3)],
        PrimitiveKind::Buf,
    );
    let top = netlist.add_composite("top", vec![PortDecl::output("o", 3)]);
    let buf = netlist.add_child(top, "buf", buf3);
    netlist.connect(top, PortRef::child(buf, "a"), Driver::bits(Bits::from_u64(0b101, 3)));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(buf), "o"));

    let circuit = build_circuit(&netlist, top).unwrap();
    let select = circuit.top().instances()[0].iface().input("a").unwrap().select().unwrap();
    assert_eq!(select.slices().len(), 1);
    assert!(select.slices()[0].is_constant());
}

#[test]
fn test_dangling_input() {
    let mut netlist = MemNetlist::new();
    let and2 = and2(&mut netlist);
    let top = netlist.add_composite(
        "top",
        vec![PortDecl::input("a", 1), PortDecl::output("o", 1)],
    );
    let g0 = netlist.add_child(top, "g0", and2);
    netlist.connect(top, PortRef::child(g0, "a"), Driver::whole(EndpointRef::Parent, "a"));
    // g0.b is left unconnected.
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(g0), "o"));

    let err = build_circuit(&netlist, top).unwrap_err();
    assert_eq!(err, StructuralError::DanglingInput { port: "top.g0.b".to_owned() });
}

#[test]
fn test_width_mismatch() {
    let mut netlist = MemNetlist::new();
    let buf3 = netlist.add_primitive(
        "buf3",
        vec![PortDecl::input("a", 3), PortDecl::output("o", 3)],
        PrimitiveKind::Buf,
    );
    let top = netlist.add_composite(
        "top",
        vec![PortDecl::input("x", 2), PortDecl::output("o", 3)],
    );
    let buf = netlist.add_child(top, "buf", buf3);
    netlist.connect(top, PortRef::child(buf, "a"), Driver::whole(EndpointRef::Parent, "x"));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(buf), "o"));

    let err = build_circuit(&netlist, top).unwrap_err();
    assert_eq!(
        err,
        StructuralError::WidthMismatch { port: "top.buf.a".to_owned(), expected: 3, found: 2 }
    );
}

#[test]
fn test_zero_width_port() {
    let mut netlist = MemNetlist::new();
    let top = netlist.add_composite("top", vec![PortDecl::input("a", 0), PortDecl::output("o", 1)]);
    let err = build_circuit(&netlist, top).unwrap_err();
    assert_eq!(err, StructuralError::ZeroWidthPort { port: "top.a".to_owned() });
}

#[test]
fn test_slice_out_of_range() {
    let mut netlist = MemNetlist::new();
    let buf1 = buf1(&mut netlist);
    let top = netlist.add_composite(
        "top",
        vec![PortDecl::input("x", 4), PortDecl::output("o", 1)],
    );
    let buf = netlist.add_child(top, "buf", buf1);
    netlist.connect(top, PortRef::child(buf, "a"), Driver::slice(EndpointRef::Parent, "x", 4, 1));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(buf), "o"));

    let err = build_circuit(&netlist, top).unwrap_err();
    assert!(matches!(err, StructuralError::SliceOutOfRange { offset: 4, width: 1, source_width: 4, .. }));
}

#[test]
fn test_slice_offset_overflow() {
    let mut netlist = MemNetlist::new();
    let buf1 = buf1(&mut netlist);
    let top = netlist.add_composite(
        "top",
        vec![PortDecl::input("x", 4), PortDecl::output("o", 1)],
    );
    let buf = netlist.add_child(top, "buf", buf1);
    // An offset near u32::MAX must report out of range, not wrap around.
    netlist.connect(top, PortRef::child(buf, "a"), Driver::slice(EndpointRef::Parent, "x", u32::MAX, 1));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(buf), "o"));

    let err = build_circuit(&netlist, top).unwrap_err();
    assert!(matches!(err, StructuralError::SliceOutOfRange { offset: u32::MAX, width: 1, .. }));
}

#[test]
fn test_combinational_loop() {
    let mut netlist = MemNetlist::new();
    let buf1 = buf1(&mut netlist);
    let top = netlist.add_composite("top", vec![PortDecl::output("o", 1)]);
    let b0 = netlist.add_child(top, "b0", buf1);
    let b1 = netlist.add_child(top, "b1", buf1);
    netlist.connect(top, PortRef::child(b0, "a"), Driver::whole(EndpointRef::Child(b1), "o"));
    netlist.connect(top, PortRef::child(b1, "a"), Driver::whole(EndpointRef::Child(b0), "o"));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(b0), "o"));

    let err = build_circuit(&netlist, top).unwrap_err();
    assert!(matches!(err, StructuralError::CombinationalLoop { .. }));
}

#[test]
fn test_register_breaks_loop() {
    let mut netlist = MemNetlist::new();
    let buf1 = buf1(&mut netlist);
    let dff1 = dff1(&mut netlist);
    let top = netlist.add_composite("top", vec![PortDecl::output("o", 1)]);
    let buf = netlist.add_child(top, "buf", buf1);
    let reg = netlist.add_child(top, "reg", dff1);
    netlist.connect(top, PortRef::child(buf, "a"), Driver::whole(EndpointRef::Child(reg), "q"));
    netlist.connect(top, PortRef::child(reg, "d"), Driver::whole(EndpointRef::Child(buf), "o"));
    netlist.connect(top, PortRef::parent("o"), Driver::whole(EndpointRef::Child(reg), "q"));

    let circuit = build_circuit(&netlist, top).unwrap();
    let siminfo = circuit.top().siminfo();
    assert!(siminfo.is_stateful());
    assert!(siminfo.outputs_registered());
    assert_eq!(siminfo.state_words(), 1);
    assert_eq!(siminfo.stateful_instances().len(), 1);
    // The register (instance 1) evaluates first; the buffer reads its fresh output.
    let order: Vec<usize> = siminfo.eval_order().iter().map(|id| id.index()).collect();
    assert_eq!(order, [1, 0]);
}

#[test]
fn test_stateful_propagates() {
    let mut netlist = MemNetlist::new();
    let dff1 = dff1(&mut netlist);
    let mid = netlist.add_composite(
        "mid",
        vec![PortDecl::input("d", 1), PortDecl::output("q", 1)],
    );
    let reg = netlist.add_child(mid, "reg", dff1);
    netlist.connect(mid, PortRef::child(reg, "d"), Driver::whole(EndpointRef::Parent, "d"));
    netlist.connect(mid, PortRef::parent("q"), Driver::whole(EndpointRef::Child(reg), "q"));

    let top = netlist.add_composite(
        "top",
        vec![PortDecl::input("d", 1), PortDecl::output("q", 1)],
    );
    let r0 = netlist.add_child(top, "r0", mid);
    let r1 = netlist.add_child(top, "r1", mid);
    netlist.connect(top, PortRef::child(r0, "d"), Driver::whole(EndpointRef::Parent, "d"));
    netlist.connect(top, PortRef::child(r1, "d"), Driver::whole(EndpointRef::Child(r0), "q"));
    netlist.connect(top, PortRef::parent("q"), Driver::whole(EndpointRef::Child(r1), "q"));

    let circuit = build_circuit(&netlist, top).unwrap();
    assert!(circuit.defn(circuit.top().instances()[0].defn()).siminfo().is_stateful());
    assert!(circuit.top().siminfo().is_stateful());
    // Two mid instances, one dff word each.
    assert_eq!(circuit.top().siminfo().state_words(), 2);
}

#[test]
fn test_duplicate_instance() {
    let mut netlist = MemNetlist::new();
    let buf1 = buf1(&mut netlist);
    let top = netlist.add_composite("top", vec![PortDecl::input("a", 1), PortDecl::output("o", 1)]);
    netlist.add_child(top, "b", buf1);
    netlist.add_child(top, "b", buf1);
    let err = build_circuit(&netlist, top).unwrap_err();
    assert_eq!(err, StructuralError::DuplicateInstance { defn: "top".to_owned(), instance: "b".to_owned() });
}

#[test]
fn test_invalid_primitive() {
    let mut netlist = MemNetlist::new();
    let bad = netlist.add_primitive(
        "and1",
        vec![PortDecl::input("a", 1), PortDecl::output("o", 1)],
        PrimitiveKind::And,
    );
    let err = build_circuit(&netlist, bad).unwrap_err();
    assert!(matches!(err, StructuralError::InvalidPrimitive { .. }));
}
