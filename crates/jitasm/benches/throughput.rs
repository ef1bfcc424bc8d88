//! Performance benchmarks for `jitasm`.
//!
//! Measures:
//! - Single instruction emission latency
//! - Multi-instruction throughput (bytes of code per second)
//! - Label-heavy workloads
//! - Constant-pool interning
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use jitasm::*;

// ─── Single-Instruction Latency ─────────────────────────────────────────

fn bench_single_instruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_instruction");

    group.bench_function("add_reg_reg", |b| {
        b.iter(|| {
            let mut asm = Assembler::new();
            asm.add(black_box(RAX), black_box(RCX)).unwrap();
            asm.finalize().unwrap()
        })
    });

    group.bench_function("mov_mem_sib_disp", |b| {
        b.iter(|| {
            let mut asm = Assembler::new();
            asm.mov(qword(RAX + RCX * 8 + 0x10), black_box(RDX)).unwrap();
            asm.finalize().unwrap()
        })
    });

    group.bench_function("mov64_imm", |b| {
        b.iter(|| {
            let mut asm = Assembler::new();
            asm.mov64(R10, black_box(0x1234567812345678)).unwrap();
            asm.finalize().unwrap()
        })
    });

    group.bench_function("vaddps_ymm", |b| {
        b.iter(|| {
            let mut asm = Assembler::new();
            asm.vaddps(black_box(YMM0), YMM1, YMM2).unwrap();
            asm.finalize().unwrap()
        })
    });

    group.finish();
}

// ─── Multi-Instruction Throughput ───────────────────────────────────────

fn emit_block(asm: &mut Assembler, n: usize) {
    for i in 0..n {
        match i % 6 {
            0 => asm.mov(RAX, RBX).unwrap(),
            1 => asm.add(RCX, RDX).unwrap(),
            2 => asm.sub(RSI, RDI).unwrap(),
            3 => asm.xor_(R8, R9).unwrap(),
            4 => asm.and_(R10, R11).unwrap(),
            _ => asm.or_(R12, R13).unwrap(),
        }
    }
}

fn bench_block_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_throughput");
    for &n in &[100usize, 1000] {
        // 3 bytes per instruction in the block above.
        group.throughput(Throughput::Bytes((n * 3) as u64));
        group.bench_function(format!("{}_instructions", n), |b| {
            b.iter(|| {
                let mut asm = Assembler::new();
                emit_block(&mut asm, n);
                asm.finalize().unwrap()
            })
        });
    }
    group.finish();
}

// ─── Label-Heavy Workloads ──────────────────────────────────────────────

fn bench_labels(c: &mut Criterion) {
    let mut group = c.benchmark_group("labels");

    group.bench_function("100_forward_branches", |b| {
        b.iter(|| {
            let mut asm = Assembler::new();
            let labels: Vec<_> = (0..100).map(|_| asm.new_label()).collect();
            for &l in &labels {
                asm.jcc(Condition::Equal, l).unwrap();
            }
            for &l in &labels {
                asm.set_label(l).unwrap();
                asm.add(RAX, 1).unwrap();
            }
            asm.finalize().unwrap()
        })
    });

    group.bench_function("loop_back_edges", |b| {
        b.iter(|| {
            let mut asm = Assembler::new();
            for _ in 0..100 {
                let start = asm.set_label_here();
                asm.add(RSI, 1).unwrap();
                asm.cmp(RSI, RDI).unwrap();
                asm.jcc(Condition::NotEqual, start).unwrap();
            }
            asm.finalize().unwrap()
        })
    });

    group.finish();
}

// ─── Constant Pool ──────────────────────────────────────────────────────

fn bench_constants(c: &mut Criterion) {
    let mut group = c.benchmark_group("constant_pool");

    group.bench_function("interned_f64_hit", |b| {
        b.iter(|| {
            let mut asm = Assembler::new();
            for _ in 0..100 {
                let k = asm.f64(black_box(2.5));
                asm.vaddsd(XMM0, XMM0, k).unwrap();
            }
            asm.finalize().unwrap()
        })
    });

    group.bench_function("distinct_f64_slots", |b| {
        b.iter(|| {
            let mut asm = Assembler::new();
            for i in 0..100 {
                let k = asm.f64(f64::from(i));
                asm.vaddsd(XMM0, XMM0, k).unwrap();
            }
            asm.finalize().unwrap()
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_instruction,
    bench_block_throughput,
    bench_labels,
    bench_constants
);
criterion_main!(benches);
