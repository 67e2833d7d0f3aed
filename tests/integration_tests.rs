//! End-to-end tests through the public facade.
//!
//! Running the output needs the host runtime, so these assemble every
//! module with `wat`, validate it with `wasmparser` (GC and exceptions
//! enabled) and then assert on the structure of the text.

use bumpalo::Bump;
use pyrite::ast::*;
use pyrite::prelude::*;
use pyrite::{ErrorKind, FunctionFlags};
use pyrite_core::{BinaryOp, CmpOp};
use wasmparser::{Validator, WasmFeatures};

fn compile<'ast>(b: &AstBuilder<'ast>, module: Module<'ast>) -> WatModule {
    compile_with(b, module, CompileOptions::default())
}

fn compile_with<'ast>(b: &AstBuilder<'ast>, module: Module<'ast>, options: CompileOptions) -> WatModule {
    let compiled = compile_module(&module, b.arena(), &options).unwrap_or_else(|e| panic!("compile failed: {e}"));
    assert_valid(&compiled);
    compiled
}

/// Assemble the text and run the validator over the binary.
fn assert_valid(module: &WatModule) {
    let bytes = wat::parse_str(module.text()).unwrap_or_else(|e| panic!("assembly failed: {e}\n{}", module.text()));
    let mut validator = Validator::new_with_features(WasmFeatures::all());
    if let Err(e) = validator.validate_all(&bytes) {
        panic!("validation failed: {e}\n{}", module.text());
    }
}

/// `def fib(n): return n if n < 2 else fib(n - 1) + fib(n - 2)` then `print(fib(10))`.
fn fibonacci<'ast>(b: &AstBuilder<'ast>) -> Module<'ast> {
    let n = || b.name("n");
    let recurse = |k| b.call_name("fib", &[b.bin(n(), BinaryOp::Sub, b.int(k))]);
    b.module(&[
        b.func(
            "fib",
            &["n"],
            &[b.ret(Some(b.if_exp(
                b.cmp(n(), CmpOp::Lt, b.int(2)),
                n(),
                b.bin(recurse(1), BinaryOp::Add, recurse(2)),
            )))],
        ),
        b.expr_stmt(b.call_name("print", &[b.call_name("fib", &[b.int(10)])])),
    ])
}

#[test]
fn test_print_sum() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let module = b.module(&[b.expr_stmt(b.call_name(
        "print",
        &[b.bin(b.int(1), BinaryOp::Add, b.int(2))],
    ))]);
    let wat = compile(&b, module);
    let text = wat.text();
    assert!(text.starts_with("(module"));
    assert!(text.contains("call $builtin_print"));
    assert!(text.contains("(func $_start (export \"_start\") (result i32)"));
    assert_eq!(wat.functions().len(), 1);
    assert!(wat.functions()[0].flags.contains(FunctionFlags::MODULE_BODY));
}

#[test]
fn test_recursive_fibonacci_is_direct() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let wat = compile(&b, fibonacci(&b));
    let fib = wat.function("fib").unwrap();
    assert!(fib.flags.contains(FunctionFlags::DIRECT));
    assert!(wat.text().contains(&format!("call $user_func_{}_direct", fib.index)));
    assert_eq!(wat.stats().direct_functions, 1);
    // Recursive, so never inlined.
    assert_eq!(wat.stats().inlined_calls, 0);
}

#[test]
fn test_generator_with_two_suspension_points() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let module = b.module(&[
        b.func(
            "pair",
            &[],
            &[
                b.expr_stmt(b.yield_(Some(b.int(1)))),
                b.expr_stmt(b.yield_(Some(b.int(2)))),
            ],
        ),
        b.for_(
            b.name("v"),
            b.call_name("pair", &[]),
            &[b.expr_stmt(b.call_name("print", &[b.name("v")]))],
        ),
    ]);
    let wat = compile(&b, module);
    assert_eq!(wat.generator_count(), 1);
    assert_eq!(wat.stats().generators, 1);
    let text = wat.text();
    assert!(text.contains("struct.new $GENERATOR"));
    assert!(text.contains("struct.set $GENERATOR $state"));
}

#[test]
fn test_inlining_is_optional() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let helper = b.func(
        "mix",
        &["a", "b"],
        &[b.ret(Some(b.bin(
            b.bin(b.name("a"), BinaryOp::Mult, b.int(31)),
            BinaryOp::Add,
            b.name("b"),
        )))],
    );
    let module = b.module(&[
        helper,
        b.assign_name("acc", b.int(0)),
        b.for_range(
            "i",
            &[b.int(10)],
            &[b.for_range(
                "j",
                &[b.int(10)],
                &[b.assign_name("acc", b.call_name("mix", &[b.name("acc"), b.name("j")]))],
            )],
        ),
        b.expr_stmt(b.call_name("print", &[b.name("acc")])),
    ]);

    let inlined = compile(&b, module);
    let plain = compile_with(&b, module, CompileOptions::new().inline(false));
    assert_eq!(inlined.stats().inlined_calls, 1);
    assert_eq!(plain.stats().inlined_calls, 0);
    let mix = plain.function("mix").unwrap();
    assert!(plain.text().contains(&format!("call $user_func_{}_direct", mix.index)));
}

#[test]
fn test_slotted_and_generic_classes() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let init = b.func(
        "__init__",
        &["self", "x"],
        &[b.assign(b.attr(b.name("self"), "x"), b.name("x"))],
    );
    let module = b.module(&[
        b.class(
            "Point",
            &[],
            &[b.assign_name("__slots__", b.tuple(&[b.str("x")])), init],
        ),
        b.assign_name("p", b.call_name("Point", &[b.int(1)])),
        b.aug_assign(b.attr(b.name("p"), "x"), BinaryOp::Add, b.int(1)),
        b.expr_stmt(b.call_name("print", &[b.attr(b.name("p"), "x")])),
    ]);

    let slotted = compile(&b, module);
    assert_eq!(slotted.stats().slotted_classes, 1);
    assert!(slotted.text().contains("(type $SLOTTED_Point (sub final $INSTANCE_BASE"));
    assert!(slotted.text().contains("(func $slotted_getattr"));

    let generic = compile_with(&b, module, CompileOptions::new().slotted_layouts(false));
    assert_eq!(generic.stats().slotted_classes, 0);
    assert!(!generic.text().contains("SLOTTED_Point"));
}

#[test]
fn test_finally_runs_when_handler_raises() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let def = b.func(
        "risky",
        &[],
        &[b.try_(
            &[b.raise(Some(b.call_name("ValueError", &[b.str("first")])), None)],
            &[b.handler(
                Some(b.name("ValueError")),
                None,
                &[b.raise(Some(b.call_name("KeyError", &[b.str("second")])), None)],
            )],
            &[b.expr_stmt(b.call_name("print", &[b.str("else")]))],
            &[b.expr_stmt(b.call_name("print", &[b.str("finally")]))],
        )],
    );
    let wat = compile(&b, b.module(&[def]));
    let text = wat.text();
    assert!(text.contains("(catch_all_ref"));
    assert!(text.contains("throw_ref"));
    // The handler's exception carries the one it replaced as context.
    assert!(text.contains("call $exception_chain_context"));
    // `else` once, `finally` on the normal and the exceptional path.
    assert_eq!(text.matches("call $builtin_print").count(), 3);
}

#[test]
fn test_compilation_is_deterministic() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let module = fibonacci(&b);
    let first = compile(&b, module);
    let second = compile(&b, module);
    assert_eq!(first.text(), second.text());
    assert_eq!(first.stats(), second.stats());
}

#[test]
fn test_unoptimized_output_still_complete() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let wat = compile_with(&b, fibonacci(&b), CompileOptions::unoptimized());
    assert_eq!(wat.stats().direct_functions, 0);
    assert_eq!(wat.stats().native_locals, 0);
    assert!(wat.text().contains("call_indirect $table (type $FUNC)"));
}

#[test]
fn test_errors_abort_the_module() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let module = b.module(&[b.expr_stmt(b.call_name("print", &[b.int(1)])), b.ret(None)]);
    let err = compile_module(&module, &arena, &CompileOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedConstruct);
}

#[test]
fn test_comments_can_be_disabled() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let wat = compile_with(&b, fibonacci(&b), CompileOptions::new().comments(false));
    assert!(!wat.text().contains(";;"));
}

#[test]
fn test_nested_grid_reads_validate() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let row = |x: i64, y: i64| b.list(&[b.int(x), b.int(y)]);
    let cell = b.subscript(b.subscript(b.name("grid"), b.name("i")), b.name("j"));
    let def = b.func(
        "total",
        &[],
        &[
            b.assign_name("grid", b.list(&[row(1, 2), row(3, 4)])),
            b.assign_name("s", b.int(0)),
            b.for_range(
                "i",
                &[b.int(2)],
                &[b.for_range("j", &[b.int(2)], &[b.aug_assign(b.name("s"), BinaryOp::Add, cell)])],
            ),
            b.ret(Some(b.name("s"))),
        ],
    );
    let module = b.module(&[def, b.expr_stmt(b.call_name("print", &[b.call_name("total", &[])]))]);
    let wat = compile(&b, module);
    assert!(wat.text().contains("ref.test (ref $LIST)"));
}

#[test]
fn test_closures_and_nonlocal_validate() {
    let arena = Bump::new();
    let b = AstBuilder::new(&arena);
    let bump = b.func(
        "bump",
        &[],
        &[b.nonlocal(&["count"]), b.aug_assign(b.name("count"), BinaryOp::Add, b.int(1))],
    );
    let counter = b.func(
        "counter",
        &[],
        &[
            b.assign_name("count", b.int(0)),
            bump,
            b.expr_stmt(b.call_name("bump", &[])),
            b.expr_stmt(b.call_name("bump", &[])),
            b.ret(Some(b.name("count"))),
        ],
    );
    let module = b.module(&[counter, b.expr_stmt(b.call_name("print", &[b.call_name("counter", &[])]))]);
    let wat = compile(&b, module);
    assert!(wat.function("bump").is_some());
}
