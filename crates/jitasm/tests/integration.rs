//! End-to-end scenarios: label resolution, constant-pool layout and
//! patching, listing fidelity, and misuse diagnostics.

use jitasm::*;

fn check(f: impl FnOnce(&mut Assembler) -> Result<(), AsmError>, code: &[u8], data: &[u8]) {
    let mut asm = Assembler::new();
    f(&mut asm).unwrap();
    let out = asm.finalize().unwrap();
    assert_eq!(out.code, code, "code: got {:02x?}", out.code);
    assert_eq!(out.data, data, "data: got {:02x?}", out.data);
}

// ── Control flow ────────────────────────────────────────────────────────

#[test]
fn backward_branch() {
    check(
        |b| {
            let start = b.set_label_here();
            b.add(RSI, 1)?;
            b.cmp(RSI, RDI)?;
            b.jcc(Condition::Equal, start)
        },
        &[0x48, 0x83, 0xc6, 0x01, 0x48, 0x3b, 0xf7, 0x0f, 0x84, 0xf3, 0xff, 0xff, 0xff],
        &[],
    );
}

#[test]
fn backward_branch_label_set_between() {
    check(
        |b| {
            let start = b.new_label();
            b.add(RSI, 1)?;
            b.set_label(start)?;
            b.cmp(RSI, RDI)?;
            b.jcc(Condition::Equal, start)
        },
        &[0x48, 0x83, 0xc6, 0x01, 0x48, 0x3b, 0xf7, 0x0f, 0x84, 0xf7, 0xff, 0xff, 0xff],
        &[],
    );
}

#[test]
fn forward_branch() {
    check(
        |b| {
            let skip = b.new_label();
            b.cmp(RSI, RDI)?;
            b.jcc(Condition::Greater, skip)?;
            b.or_(RDI, 0x3e)?;
            b.set_label(skip)
        },
        &[0x48, 0x3b, 0xf7, 0x0f, 0x8f, 0x04, 0x00, 0x00, 0x00, 0x48, 0x83, 0xcf, 0x3e],
        &[],
    );
}

#[test]
fn forward_jmp() {
    check(
        |b| {
            let skip = b.new_label();
            b.jmp(skip)?;
            b.and_(RDI, 0x3e)?;
            b.set_label(skip)
        },
        &[0xe9, 0x04, 0x00, 0x00, 0x00, 0x48, 0x83, 0xe7, 0x3e],
        &[],
    );
}

#[test]
fn label_call() {
    check(
        |b| {
            let fn_b = b.new_label();
            b.and_(RCX, 0x3e)?;
            b.call(fn_b)?;
            b.ret()?;
            b.set_label(fn_b)?;
            b.lea(RAX, qword(RCX + 0x1f))?;
            b.ret()
        },
        &[
            0x48, 0x83, 0xe1, 0x3e, 0xe8, 0x01, 0x00, 0x00, 0x00, 0xc3, 0x48, 0x8d, 0x41, 0x1f,
            0xc3,
        ],
        &[],
    );
}

#[test]
fn multiple_references_to_one_forward_label() {
    let mut asm = Assembler::new();
    let end = asm.new_label();
    asm.jcc(Condition::Equal, end).unwrap(); // 6 bytes
    asm.jcc(Condition::NotEqual, end).unwrap(); // 6 bytes
    asm.jmp(end).unwrap(); // 5 bytes
    asm.set_label(end).unwrap();
    let out = asm.finalize().unwrap();
    // All three displacements resolve to offset 17.
    assert_eq!(&out.code[2..6], &(17i32 - 6).to_le_bytes());
    assert_eq!(&out.code[8..12], &(17i32 - 12).to_le_bytes());
    assert_eq!(&out.code[13..17], &(17i32 - 17).to_le_bytes());
}

// ── Constant pool ───────────────────────────────────────────────────────

#[test]
fn mixed_constant_pool() {
    // Layout is descending-alignment, stable within a class:
    // f32x4 @ 0, i64 @ 16, f64 @ 24, bytes @ 32, f32 @ 48, padded to 64.
    check(
        |b| {
            b.xor_(RAX, RAX)?;
            let big = b.i64(0x1234567887654321);
            b.add(RAX, big)?;
            let one_f32 = b.f32(1.0);
            b.vmovss(XMM2, one_f32)?;
            let one_f64 = b.f64(1.0);
            b.vmovsd(XMM3, one_f64)?;
            let vec4 = b.f32x4(1.0, 2.0, 4.0, 8.0);
            b.vmovaps(XMM4, vec4)?;
            let blob = b.bytes(b"hello world!123\0", 8)?;
            b.vmovupd(XMM5, blob)?;
            b.ret()
        },
        &[
            0x48, 0x33, 0xc0, // xor rax, rax
            0x48, 0x03, 0x05, 0xc6, 0xff, 0xff, 0xff, // add rax, [.start-48]
            0xc4, 0xe1, 0xfa, 0x10, 0x15, 0xdd, 0xff, 0xff, 0xff, // vmovss
            0xc4, 0xe1, 0xfb, 0x10, 0x1d, 0xbc, 0xff, 0xff, 0xff, // vmovsd
            0xc4, 0xe1, 0xf8, 0x28, 0x25, 0x9b, 0xff, 0xff, 0xff, // vmovaps
            0xc4, 0xe1, 0xf9, 0x10, 0x2d, 0xb2, 0xff, 0xff, 0xff, // vmovupd
            0xc3,
        ],
        &[
            0x00, 0x00, 0x80, 0x3f, // 1.0f
            0x00, 0x00, 0x00, 0x40, // 2.0f
            0x00, 0x00, 0x80, 0x40, // 4.0f
            0x00, 0x00, 0x00, 0x41, // 8.0f
            0x21, 0x43, 0x65, 0x87, 0x78, 0x56, 0x34, 0x12, // i64
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3f, // 1.0
            b'h', b'e', b'l', b'l', b'o', b' ', b'w', b'o', b'r', b'l', b'd', b'!', b'1', b'2',
            b'3', 0x00, // blob
            0x00, 0x00, 0x80, 0x3f, // 1.0f
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // pad to max alignment
            0x00, 0x00, 0x00, 0x00,
        ],
    );
}

#[test]
fn constant_storage_dedupes() {
    let mut asm = Assembler::new();
    for _ in 0..=3000 {
        let one = asm.f32(1.0);
        asm.vaddss(XMM0, XMM0, one).unwrap();
    }
    let out = asm.finalize().unwrap();

    // One interned slot, not 3001 copies.
    assert_eq!(out.data, vec![0x00, 0x00, 0x80, 0x3f]);

    // Every instruction is 9 bytes and resolves to the same address:
    // disp + end-of-instruction == -4, i.e. 4 bytes before the code start.
    assert_eq!(out.code.len(), 9 * 3001);
    for i in 0..3001 {
        let instr = &out.code[9 * i..9 * (i + 1)];
        assert_eq!(&instr[..5], &[0xc4, 0xe1, 0xfa, 0x58, 0x05]);
        let disp = i32::from_le_bytes(instr[5..9].try_into().unwrap());
        assert_eq!(disp as i64 + (9 * (i + 1)) as i64, -4);
    }
}

#[test]
fn pool_kind_is_part_of_identity() {
    let mut asm = Assembler::new();
    let a = asm.i32(1);
    let b = asm.f32(f32::from_bits(1));
    asm.mov(EAX, a).unwrap();
    asm.mov(ECX, b).unwrap();
    let out = asm.finalize().unwrap();
    // Same bytes, different kinds: two slots.
    assert_eq!(out.data.len(), 8);
}

#[test]
fn pool_alignment_invariant() {
    let mut asm = Assembler::new();
    let blob = asm.bytes(&[0xAA; 3], 2).unwrap();
    asm.vmovupd(XMM0, blob).unwrap();
    let pi = asm.f64(core::f64::consts::PI);
    asm.vmovsd(XMM1, pi).unwrap();
    let v = asm.f32x4(1.0, 1.0, 1.0, 1.0);
    asm.vmovaps(XMM2, v).unwrap();
    let out = asm.finalize().unwrap();

    assert_eq!(out.data.len() % 16, 0);
    // The f32x4 slot leads (highest alignment) and sits at offset 0.
    assert_eq!(&out.data[..4], &1.0f32.to_le_bytes());
}

#[test]
fn bytes_rejects_non_power_of_two_alignment() {
    let mut asm = Assembler::new();
    assert!(matches!(
        asm.bytes(&[1, 2, 3], 3),
        Err(AsmError::InvalidOperands { .. })
    ));
}

// ── Listing ─────────────────────────────────────────────────────────────

#[test]
fn listing_fidelity() {
    let mut asm = Assembler::new();
    asm.enable_listing();

    asm.push(R12).unwrap();
    asm.add(RAX, RDI).unwrap();
    asm.add(RCX, 8).unwrap();
    asm.sub(dword(RAX), 0x1fdc).unwrap();
    asm.and_(dword(RCX), 0x37).unwrap();
    asm.mov(RDI, qword(RAX + RSI * 2)).unwrap();
    asm.vaddss(XMM0, XMM0, dword(RAX + R14 * 2 + 0x1c)).unwrap();

    let start = asm.set_label_here();
    asm.cmp(RSI, RDI).unwrap();
    asm.jcc(Condition::Equal, start).unwrap();

    asm.jmp(qword(RDX)).unwrap();
    asm.vaddps(YMM9, YMM12, ymmword(RBP + 0xc)).unwrap();
    let c = asm.f64(2.5);
    asm.vaddpd(YMM2, YMM7, c).unwrap();
    asm.neg(qword(RBP + R12 * 2)).unwrap();
    asm.mov64(R10, 0x1234567812345678).unwrap();
    asm.vmovapd(xmmword(RAX), XMM11).unwrap();
    asm.movzx(EAX, byte(RCX)).unwrap();
    asm.movsx(RSI, word(R12)).unwrap();
    asm.imul2(RCX, RDX).unwrap();
    asm.imul3(RCX, RDX, 8).unwrap();
    asm.vroundsd(XMM1, XMM2, XMM3, 5).unwrap();
    asm.pop(R12).unwrap();
    asm.ret().unwrap();
    asm.int3().unwrap();

    let out = asm.finalize().unwrap();

    let expected = r"
 push        r12
 add         rax,rdi
 add         rcx,8
 sub         dword ptr [rax],1FDCh
 and         dword ptr [rcx],37h
 mov         rdi,qword ptr [rax+rsi*2]
 vaddss      xmm0,xmm0,dword ptr [rax+r14*2+01Ch]
.L1:
 cmp         rsi,rdi
 je          .L1
 jmp         qword ptr [rdx]
 vaddps      ymm9,ymm12,ymmword ptr [rbp+0Ch]
 vaddpd      ymm2,ymm7,qword ptr [.start-8]
 neg         qword ptr [rbp+r12*2]
 mov         r10,1234567812345678h
 vmovapd     xmmword ptr [rax],xmm11
 movzx       eax,byte ptr [rcx]
 movsx       rsi,word ptr [r12]
 imul        rcx,rdx
 imul        rcx,rdx,8
 vroundsd    xmm1,xmm2,xmm3,5
 pop         r12
 ret
 int3
";
    assert_eq!(format!("\n{}", out.text), expected);
}

#[test]
fn listing_disabled_produces_no_text() {
    let mut asm = Assembler::new();
    asm.add(RAX, RCX).unwrap();
    let out = asm.finalize().unwrap();
    assert!(out.text.is_empty());
}

// ── Label misuse ────────────────────────────────────────────────────────

#[test]
fn undefined_label_fails_finalize() {
    let mut asm = Assembler::new();
    let l = asm.new_label();
    asm.jmp(l).unwrap();
    assert_eq!(
        asm.finalize().unwrap_err(),
        AsmError::UndefinedLabel { label: 1 }
    );
}

#[test]
fn unreferenced_undefined_label_is_fine() {
    let mut asm = Assembler::new();
    let _ = asm.new_label();
    asm.ret().unwrap();
    assert!(asm.finalize().is_ok());
}

#[test]
fn duplicate_label_definition_fails() {
    let mut asm = Assembler::new();
    let l = asm.set_label_here();
    asm.ret().unwrap();
    assert_eq!(
        asm.set_label(l).unwrap_err(),
        AsmError::DuplicateLabel { label: 1 }
    );
}
