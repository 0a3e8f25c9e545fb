use gomono::tree::{tree_to_canonical_json, Decl, Type};
use gomono::{monomorphize, MonoErrorKind, MonoOptions};
use serde_json::Value;

mod tree_testutil;

use tree_testutil::*;

fn int() -> Value {
    named("int")
}

fn string() -> Value {
    named("string")
}

fn assert_fully_concrete(v: &Value) {
    for kind in ["intro", "param", "inst", "instantiate"] {
        assert!(!contains_kind(v, kind), "{kind:?} node left in output: {v}");
    }
}

/// `func Reverse(dst []$T, src []T) { var tmp T }`
fn reverse_decl() -> Value {
    func(
        "Reverse",
        vec![p("dst", slice(intro("T"))), p("src", slice(tparam("T")))],
        Vec::new(),
        vec![var_stmt("tmp", Some(tparam("T")), None)],
    )
}

#[test]
fn slice_reversal_specializes_once_per_element_type() {
    let main = func(
        "main",
        Vec::new(),
        Vec::new(),
        vec![
            var_stmt("a", Some(slice(int())), None),
            var_stmt("b", Some(slice(string())), None),
            expr_stmt(call(
                "Reverse",
                vec![local("a", slice(int())), local("a", slice(int()))],
                None,
            )),
            expr_stmt(call(
                "Reverse",
                vec![local("b", slice(string())), local("b", slice(string()))],
                None,
            )),
        ],
    );
    let out = run_ok(vec![reverse_decl(), main]);

    let specs = funcs_with_prefix(&out.file, "Reverse__mono__");
    assert_eq!(specs.len(), 2, "{:?}", decl_names(&out.file));
    assert!(!decl_names(&out.file).contains(&"Reverse".to_string()));

    let main = func_named(&out.file, "main");
    let called = callees(&serde_json::to_value(main).expect("encode main"));
    for spec in &specs {
        assert!(called.contains(&spec.name), "{} is never called", spec.name);
    }

    let elem_types: Vec<Type> = specs
        .iter()
        .map(|f| match &f.params[0].ty {
            Type::Slice { elem } => (**elem).clone(),
            other => panic!("unexpected param type {other}"),
        })
        .collect();
    assert_eq!(elem_types, vec![Type::named("int"), Type::named("string")]);

    assert_fully_concrete(&as_value(&out.file));
    assert_eq!(out.mono_map.stats.specializations_emitted, 2);
    assert_eq!(out.mono_map.stats.sites_rewritten, 2);
    assert_eq!(out.mono_map.stats.generic_declarations, 1);
}

fn min_decl() -> Value {
    func(
        "Min",
        vec![p("a", intro_r("T", &["ord"])), p("b", tparam("T"))],
        vec![result(tparam("T"))],
        vec![ret(vec![local("a", tparam("T"))])],
    )
}

fn main_calling_min(arg_ty: Value) -> Value {
    func(
        "main",
        Vec::new(),
        Vec::new(),
        vec![expr_stmt(at(
            call(
                "Min",
                vec![lit("1", arg_ty.clone()), lit("2", arg_ty.clone())],
                Some(arg_ty),
            ),
            7,
            3,
        ))],
    )
}

#[test]
fn ordered_min_accepts_ints() {
    let out = run_ok(vec![min_decl(), main_calling_min(int())]);
    let specs = funcs_with_prefix(&out.file, "Min__mono__int__h");
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].results[0].ty, Type::named("int"));
    assert_fully_concrete(&as_value(&out.file));
}

#[test]
fn ordered_min_rejects_complex_numbers() {
    let err = run(vec![min_decl(), main_calling_min(named("complex128"))])
        .expect_err("complex128 is not orderable");
    assert_eq!(err.kind, MonoErrorKind::RestrictionViolation);
    assert_eq!(err.code, "GM-0102");
    assert_eq!(err.decl.as_deref(), Some("main"));
    assert_eq!(err.pos.map(|p| (p.line, p.col)), Some((7, 3)));
}

/// `func Read($T) T { var x T; return x }`
fn read_decl() -> Value {
    func(
        "Read",
        vec![marker(intro("T"))],
        vec![result(tparam("T"))],
        vec![
            var_stmt("x", Some(tparam("T")), None),
            ret(vec![local("x", tparam("T"))]),
        ],
    )
}

#[test]
fn unnamed_parameter_specializations_are_independent() {
    let main = func(
        "main",
        Vec::new(),
        Vec::new(),
        vec![
            var_stmt("i", None, Some(call("Read", vec![type_lit(int())], Some(int())))),
            var_stmt(
                "s",
                None,
                Some(call("Read", vec![type_lit(string())], Some(string()))),
            ),
        ],
    );
    let out = run_ok(vec![read_decl(), main]);

    let specs = funcs_with_prefix(&out.file, "Read__mono__");
    assert_eq!(specs.len(), 2);
    assert_ne!(specs[0].name, specs[1].name);
    for f in &specs {
        assert!(f.params.is_empty(), "type-only parameter must be removed");
    }
    assert_eq!(specs[0].results[0].ty, Type::named("int"));
    assert_eq!(specs[1].results[0].ty, Type::named("string"));

    // The type arguments disappear from the rewritten calls.
    let main = serde_json::to_value(func_named(&out.file, "main")).expect("encode main");
    assert!(!contains_kind(&main, "type_lit"), "{main}");
    assert_fully_concrete(&as_value(&out.file));
}

#[test]
fn recursive_list_type_converges_with_one_specialization() {
    let list = type_decl(
        "List",
        vec![("T", Vec::new())],
        struct_ty(vec![
            ("val", tparam("T")),
            ("next", ptr(inst("List", vec![tparam("T")]))),
        ]),
    );
    let main = func(
        "main",
        Vec::new(),
        Vec::new(),
        vec![var_stmt("l", Some(inst("List", vec![int()])), None)],
    );
    let out = run_ok(vec![list, main]);

    let types: Vec<_> = out
        .file
        .decls
        .iter()
        .filter_map(|d| match d {
            Decl::Type(t) => Some(t),
            _ => None,
        })
        .collect();
    assert_eq!(types.len(), 1);
    let spec = types[0];
    assert!(spec.name.starts_with("List__mono__int__h"), "{}", spec.name);
    assert!(spec.type_params.is_empty());

    let Type::Struct { fields } = &spec.underlying else {
        panic!("expected struct underlying");
    };
    assert_eq!(fields[0].ty, Type::named("int"));
    assert_eq!(
        fields[1].ty,
        Type::Pointer {
            elem: Box::new(Type::named(&spec.name))
        }
    );

    assert_eq!(out.mono_map.items.len(), 1);
    assert_eq!(out.mono_map.items[0].kind, "type");
    assert_eq!(out.mono_map.items[0].sites.len(), 2);
    assert_fully_concrete(&as_value(&out.file));
}

#[test]
fn methods_follow_their_type_specialization() {
    let stack = type_decl(
        "Stack",
        vec![("T", Vec::new())],
        struct_ty(vec![("items", slice(tparam("T")))]),
    );
    let push = method(
        "Push",
        p("s", ptr(inst("Stack", vec![intro("E")]))),
        vec![p("v", tparam("E"))],
        Vec::new(),
        Vec::new(),
    );
    let len = method(
        "Len",
        p("s", inst("Stack", vec![intro("E")])),
        Vec::new(),
        vec![result(int())],
        Vec::new(),
    );
    let main = func(
        "main",
        Vec::new(),
        Vec::new(),
        vec![
            var_stmt("a", Some(inst("Stack", vec![int()])), None),
            var_stmt("b", Some(inst("Stack", vec![string()])), None),
        ],
    );
    let out = run_ok(vec![stack, push, len, main]);

    let pushes: Vec<_> = out
        .file
        .decls
        .iter()
        .filter_map(|d| match d {
            Decl::Func(f) if f.name == "Push" => Some(f),
            _ => None,
        })
        .collect();
    assert_eq!(pushes.len(), 2);
    let param_types: Vec<_> = pushes.iter().map(|f| f.params[0].ty.clone()).collect();
    assert_eq!(param_types, vec![Type::named("int"), Type::named("string")]);
    for f in &pushes {
        let recv = f.receiver.as_ref().expect("receiver");
        let Type::Pointer { elem } = &recv.ty else {
            panic!("receiver lost its pointer: {}", recv.ty);
        };
        let name = elem.as_named().expect("named receiver");
        assert!(name.starts_with("Stack__mono__"), "{name}");
    }

    let names = decl_names(&out.file);
    assert_eq!(names.iter().filter(|n| n.ends_with(".Len")).count(), 2);
    assert!(!names.iter().any(|n| n == "Stack" || n == "Stack.Push"));
    assert_eq!(
        out.mono_map.items.iter().filter(|i| i.kind == "method").count(),
        4
    );
    assert_fully_concrete(&as_value(&out.file));
}

#[test]
fn nested_generic_calls_take_several_cycles() {
    let single = func(
        "Single",
        vec![p("x", intro("T"))],
        vec![result(slice(tparam("T")))],
        Vec::new(),
    );
    let wrap = func(
        "Wrap",
        vec![p("x", intro("T"))],
        vec![result(slice(tparam("T")))],
        vec![ret(vec![call(
            "Single",
            vec![local("x", tparam("T"))],
            Some(slice(tparam("T"))),
        )])],
    );
    let main = func(
        "main",
        Vec::new(),
        Vec::new(),
        vec![expr_stmt(call(
            "Wrap",
            vec![lit("1", int())],
            Some(slice(int())),
        ))],
    );
    let out = run_ok(vec![single, wrap, main]);

    assert_eq!(funcs_with_prefix(&out.file, "Wrap__mono__").len(), 1);
    let singles = funcs_with_prefix(&out.file, "Single__mono__");
    assert_eq!(singles.len(), 1);
    let wrap_spec = funcs_with_prefix(&out.file, "Wrap__mono__")[0];
    let called = callees(&serde_json::to_value(wrap_spec).expect("encode"));
    assert_eq!(called, vec![singles[0].name.clone()]);
    assert!(out.mono_map.stats.cycles >= 3, "{:?}", out.mono_map.stats);
    assert_fully_concrete(&as_value(&out.file));
}

#[test]
fn inference_matches_function_valued_parameters() {
    // func Map(s []$T, f func(T) $U) []U
    let map_fn = func(
        "Map",
        vec![
            p("s", slice(intro("T"))),
            p("f", func_ty(vec![tparam("T")], vec![intro("U")])),
        ],
        vec![result(slice(tparam("U")))],
        Vec::new(),
    );
    let main = func(
        "main",
        Vec::new(),
        Vec::new(),
        vec![expr_stmt(call(
            "Map",
            vec![
                local("xs", slice(int())),
                local("show", func_ty(vec![int()], vec![string()])),
            ],
            Some(slice(string())),
        ))],
    );
    let out = run_ok(vec![map_fn, main]);
    let specs = funcs_with_prefix(&out.file, "Map__mono__int__string__h");
    assert_eq!(specs.len(), 1, "{:?}", decl_names(&out.file));
    assert_eq!(
        specs[0].results[0].ty,
        Type::Slice {
            elem: Box::new(Type::named("string"))
        }
    );
}

#[test]
fn explicit_instantiation_names_the_specialization() {
    let main = func(
        "main",
        Vec::new(),
        Vec::new(),
        vec![
            var_stmt("f", None, Some(instantiate("Min", vec![int()]))),
            expr_stmt(serde_json::json!({
                "kind": "call",
                "func": instantiate("Min", vec![int()]),
                "args": [lit("1", int()), lit("2", int())],
            })),
        ],
    );
    let out = run_ok(vec![min_decl(), main]);
    let specs = funcs_with_prefix(&out.file, "Min__mono__");
    assert_eq!(specs.len(), 1);
    assert_eq!(out.mono_map.items[0].sites.len(), 2);
    assert_fully_concrete(&as_value(&out.file));
}

#[test]
fn repeated_sites_share_one_specialization() {
    let calls: Vec<Value> = (0..3)
        .map(|_| {
            expr_stmt(call(
                "Reverse",
                vec![local("a", slice(int())), local("a", slice(int()))],
                None,
            ))
        })
        .collect();
    let main = func("main", Vec::new(), Vec::new(), calls);
    let out = run_ok(vec![reverse_decl(), main]);
    assert_eq!(funcs_with_prefix(&out.file, "Reverse__mono__").len(), 1);
    assert_eq!(out.mono_map.items.len(), 1);
    assert_eq!(out.mono_map.items[0].sites.len(), 3);
    assert_eq!(out.mono_map.stats.sites_rewritten, 3);
}

#[test]
fn output_is_a_fixpoint() {
    let main = func(
        "main",
        Vec::new(),
        Vec::new(),
        vec![
            expr_stmt(call("Min", vec![lit("1", int()), lit("2", int())], Some(int()))),
            var_stmt("x", None, Some(call("Read", vec![type_lit(string())], Some(string())))),
        ],
    );
    let first = run_ok(vec![min_decl(), read_decl(), main]);
    let text = tree_to_canonical_json(&first.file).expect("encode");

    let second = monomorphize(first.file.clone(), &MonoOptions::default()).expect("second run");
    assert_eq!(tree_to_canonical_json(&second.file).expect("encode"), text);
    assert!(second.mono_map.items.is_empty());
    assert_eq!(second.mono_map.stats.cycles, 1);
}

#[test]
fn runs_are_deterministic() {
    let build = || {
        let main = func(
            "main",
            Vec::new(),
            Vec::new(),
            vec![
                expr_stmt(call(
                    "Reverse",
                    vec![local("b", slice(string())), local("b", slice(string()))],
                    None,
                )),
                expr_stmt(call("Min", vec![lit("1", int()), lit("2", int())], Some(int()))),
                expr_stmt(call(
                    "Reverse",
                    vec![local("a", slice(int())), local("a", slice(int()))],
                    None,
                )),
            ],
        );
        run_ok(vec![reverse_decl(), min_decl(), main])
    };
    let a = build();
    let b = build();
    assert_eq!(
        tree_to_canonical_json(&a.file).expect("encode"),
        tree_to_canonical_json(&b.file).expect("encode")
    );
    assert_eq!(
        serde_json::to_string(&a.mono_map).expect("encode"),
        serde_json::to_string(&b.mono_map).expect("encode")
    );
    assert_eq!(a.mono_map.meta.get("output_blake3"), b.mono_map.meta.get("output_blake3"));
}

#[test]
fn local_identifiers_shadow_generic_functions() {
    let main = func(
        "main",
        Vec::new(),
        Vec::new(),
        vec![
            var_stmt("Min", Some(int()), None),
            expr_stmt(local("Min", int())),
        ],
    );
    let out = run_ok(vec![min_decl(), main]);
    assert!(out.mono_map.items.is_empty());
    assert!(funcs_with_prefix(&out.file, "Min").is_empty());
}

#[test]
fn growing_instantiation_does_not_converge() {
    // func Grow(x $T) { var y []T; Grow(y) }
    let grow = func(
        "Grow",
        vec![p("x", intro("T"))],
        Vec::new(),
        vec![
            var_stmt("y", Some(slice(tparam("T"))), None),
            expr_stmt(call("Grow", vec![local("y", slice(tparam("T")))], None)),
        ],
    );
    let main = func(
        "main",
        Vec::new(),
        Vec::new(),
        vec![expr_stmt(call("Grow", vec![lit("1", int())], None))],
    );
    let options = MonoOptions {
        max_cycles: 16,
        ..MonoOptions::default()
    };
    let err = monomorphize(file(vec![grow, main]), &options).expect_err("must not converge");
    assert_eq!(err.kind, MonoErrorKind::NonConvergence);

    let options = MonoOptions {
        max_type_depth: 4,
        ..MonoOptions::default()
    };
    let grow_file = file(vec![
        func(
            "Grow",
            vec![p("x", intro("T"))],
            Vec::new(),
            vec![expr_stmt(call(
                "Grow",
                vec![local("y", slice(tparam("T")))],
                None,
            ))],
        ),
        func(
            "main",
            Vec::new(),
            Vec::new(),
            vec![expr_stmt(call("Grow", vec![lit("1", int())], None))],
        ),
    ]);
    let err = monomorphize(grow_file, &options).expect_err("must hit depth cap");
    assert_eq!(err.kind, MonoErrorKind::NonConvergence);
    assert!(err.message.contains("max_type_depth=4"), "{}", err.message);
}
