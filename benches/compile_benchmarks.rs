//! Compile-time benchmarks.
//!
//! - Numeric kernel: nested loops over native arithmetic
//! - Class workload: slotted and generic attribute traffic
//! - Inliner: the AST rewrite pass on its own
//!
//! ## Profiling with Puffin
//!
//! ```bash
//! cargo bench --features profile-with-puffin -- --profile-time 5
//! ```

use bumpalo::Bump;
use criterion::{Criterion, criterion_group, criterion_main};
use pyrite::ast::*;
use pyrite::{CompileOptions, compile_module};
use pyrite_core::{BinaryOp, CmpOp};
use std::hint::black_box;

#[cfg(feature = "profile-with-puffin")]
static FRAME_VIEW: std::sync::OnceLock<puffin::GlobalFrameView> = std::sync::OnceLock::new();

#[cfg(feature = "profile-with-puffin")]
fn setup_profiler() {
    puffin::set_scopes_on(true);
    FRAME_VIEW.get_or_init(puffin::GlobalFrameView::default);
}

#[cfg(not(feature = "profile-with-puffin"))]
fn setup_profiler() {}

#[cfg(feature = "profile-with-puffin")]
fn end_profiling_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}

#[cfg(not(feature = "profile-with-puffin"))]
fn end_profiling_frame() {}

#[cfg(feature = "profile-with-puffin")]
fn print_profiling_stats() {
    let Some(frame_view) = FRAME_VIEW.get() else {
        println!("Profiler not initialized");
        return;
    };
    let view = frame_view.lock();
    println!("\n=== Profiling: {} frames recorded ===", view.recent_frames().count());
}

#[cfg(not(feature = "profile-with-puffin"))]
fn print_profiling_stats() {}

/// `copies` independent dot-product style kernels plus a driver loop.
fn numeric_kernel<'ast>(b: &AstBuilder<'ast>, copies: usize) -> Module<'ast> {
    let mut body = Vec::new();
    for k in 0..copies {
        let name = format!("kernel_{k}");
        body.push(b.func(
            &name,
            &["n"],
            &[
                b.assign_name("total", b.int(0)),
                b.for_range(
                    "i",
                    &[b.name("n")],
                    &[b.for_range(
                        "j",
                        &[b.name("i")],
                        &[b.if_(
                            b.cmp(b.bin(b.name("j"), BinaryOp::Mod, b.int(3)), CmpOp::Eq, b.int(0)),
                            &[b.aug_assign(
                                b.name("total"),
                                BinaryOp::Add,
                                b.bin(b.name("i"), BinaryOp::Mult, b.name("j")),
                            )],
                            &[],
                        )],
                    )],
                ),
                b.ret(Some(b.name("total"))),
            ],
        ));
        body.push(b.expr_stmt(b.call_name("print", &[b.call_name(&name, &[b.int(100)])])));
    }
    b.module(&body)
}

/// `copies` small classes, half of them slotted, with methods touching fields.
fn class_workload<'ast>(b: &AstBuilder<'ast>, copies: usize) -> Module<'ast> {
    let mut body = Vec::new();
    for k in 0..copies {
        let name = format!("Shape{k}");
        let mut members = Vec::new();
        if k % 2 == 0 {
            members.push(b.assign_name("__slots__", b.tuple(&[b.str("w"), b.str("h")])));
        }
        members.push(b.func(
            "__init__",
            &["self", "w", "h"],
            &[
                b.assign(b.attr(b.name("self"), "w"), b.name("w")),
                b.assign(b.attr(b.name("self"), "h"), b.name("h")),
            ],
        ));
        members.push(b.func(
            "area",
            &["self"],
            &[b.ret(Some(b.bin(
                b.attr(b.name("self"), "w"),
                BinaryOp::Mult,
                b.attr(b.name("self"), "h"),
            )))],
        ));
        body.push(b.class(&name, &[], &members));
        body.push(b.expr_stmt(b.call_name(
            "print",
            &[b.method_call(b.call_name(&name, &[b.int(2), b.int(3)]), "area", &[])],
        )));
    }
    b.module(&body)
}

/// Helpers small enough to inline, each called from a loop.
fn inline_workload<'ast>(b: &AstBuilder<'ast>, copies: usize) -> Module<'ast> {
    let mut body = Vec::new();
    for k in 0..copies {
        let name = format!("scale_{k}");
        body.push(b.func(
            &name,
            &["x", "y"],
            &[b.ret(Some(b.bin(b.bin(b.name("x"), BinaryOp::Mult, b.int(k as i64 + 2)), BinaryOp::Add, b.name("y"))))],
        ));
        body.push(b.for_range(
            "i",
            &[b.int(10)],
            &[b.expr_stmt(b.call_name("print", &[b.call_name(&name, &[b.name("i"), b.int(1)])]))],
        ));
    }
    b.module(&body)
}

fn numeric_benchmarks(c: &mut Criterion) {
    setup_profiler();
    let mut group = c.benchmark_group("compile/numeric");
    for copies in [1usize, 16, 128] {
        group.bench_function(format!("kernels_{copies}"), |bench| {
            bench.iter(|| {
                let arena = Bump::new();
                let b = AstBuilder::new(&arena);
                let module = numeric_kernel(&b, copies);
                let wat = compile_module(black_box(&module), &arena, &CompileOptions::default()).unwrap();
                end_profiling_frame();
                black_box(wat.stats().instructions)
            });
        });
    }
    group.bench_function("kernels_16_unoptimized", |bench| {
        bench.iter(|| {
            let arena = Bump::new();
            let b = AstBuilder::new(&arena);
            let module = numeric_kernel(&b, 16);
            let wat = compile_module(black_box(&module), &arena, &CompileOptions::unoptimized()).unwrap();
            black_box(wat.stats().instructions)
        });
    });
    group.finish();
    print_profiling_stats();
}

fn class_benchmarks(c: &mut Criterion) {
    setup_profiler();
    let mut group = c.benchmark_group("compile/classes");
    for copies in [4usize, 64] {
        group.bench_function(format!("classes_{copies}"), |bench| {
            bench.iter(|| {
                let arena = Bump::new();
                let b = AstBuilder::new(&arena);
                let module = class_workload(&b, copies);
                let wat = compile_module(black_box(&module), &arena, &CompileOptions::default()).unwrap();
                end_profiling_frame();
                black_box(wat.stats().slotted_classes)
            });
        });
    }
    group.finish();
    print_profiling_stats();
}

fn inliner_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("inliner");
    group.bench_function("helpers_64", |bench| {
        bench.iter(|| {
            let arena = Bump::new();
            let b = AstBuilder::new(&arena);
            let module = inline_workload(&b, 64);
            let (_, inlined) = pyrite_compiler::inline::inline_module(black_box(&module), &arena).unwrap();
            black_box(inlined)
        });
    });
    group.finish();
}

criterion_group!(benches, numeric_benchmarks, class_benchmarks, inliner_benchmarks);
criterion_main!(benches);
