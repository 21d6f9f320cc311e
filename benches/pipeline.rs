//! Benchmarks for the method pipeline.
//!
//! Measures the stages separately on a synthetic loop-heavy method:
//! - Decoding and encoding
//! - CFG construction and stack analysis
//! - Lifting to IR
//! - Full optimization and re-encoding, single and batched

extern crate abcscope;

use abcscope::{
    analysis::{stack, ControlFlowGraph},
    prelude::*,
};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

/// `n` sequential counting loops, each summing into register 2.
fn loops(n: usize) -> MethodBody {
    let mut asm = InstructionAssembler::new();
    asm.getlocal(0).pushscope().pushbyte(0).setlocal(2);
    for i in 0..n {
        let top = format!("top{i}");
        let test = format!("test{i}");
        asm.pushbyte(0)
            .setlocal(3)
            .jump(&test)
            .label(&top)
            .getlocal(2)
            .getlocal(3)
            .pushbyte(2)
            .multiply()
            .add()
            .setlocal(2)
            .inclocal(3)
            .label(&test)
            .getlocal(3)
            .getlocal(1)
            .iflt(&top);
    }
    asm.getlocal(2).returnvalue();

    let encoded = encode_body(&asm.finish().unwrap()).unwrap();
    MethodBody::new(MethodId(0), 1, encoded.code).with_local_count(4)
}

fn bench_codec(c: &mut Criterion) {
    let body = loops(32);

    c.bench_function("codec_decode", |b| {
        b.iter(|| black_box(decode(black_box(&body.code)).unwrap()));
    });

    let code = decode(&body.code).unwrap();
    c.bench_function("codec_encode", |b| {
        b.iter(|| black_box(encode(black_box(&code)).unwrap()));
    });
}

fn bench_analysis(c: &mut Criterion) {
    let body = loops(32);
    let code = decode(&body.code).unwrap();
    let pool = ConstantPool::new();

    c.bench_function("cfg_build", |b| {
        b.iter(|| black_box(ControlFlowGraph::build(black_box(&code)).unwrap()));
    });

    let cfg = ControlFlowGraph::build(&code).unwrap();
    c.bench_function("stack_analyze", |b| {
        b.iter(|| black_box(stack::analyze(&code, &cfg, &pool, 4096).unwrap()));
    });

    let config = PipelineConfig::default();
    c.bench_function("lift", |b| {
        b.iter(|| black_box(lift(black_box(&body), &pool, &config).unwrap()));
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let body = loops(8);
    let pipeline = Pipeline::default();

    c.bench_function("process_method", |b| {
        b.iter(|| {
            let mut pool = ConstantPool::new();
            black_box(
                pipeline
                    .process_method(black_box(&body), &mut pool, &NullEnvironment)
                    .unwrap(),
            )
        });
    });

    let bodies: Vec<MethodBody> = (0..64)
        .map(|i| {
            let mut body = loops(4);
            body.method = MethodId(i);
            body
        })
        .collect();
    c.bench_function("process_batch_64", |b| {
        b.iter(|| {
            let mut pool = ConstantPool::new();
            black_box(pipeline.process_batch(black_box(&bodies), &mut pool, &NullEnvironment))
        });
    });
}

criterion_group!(benches, bench_codec, bench_analysis, bench_pipeline);
criterion_main!(benches);
