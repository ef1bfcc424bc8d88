#![no_main]
use jitasm::*;
use libfuzzer_sys::fuzz_target;

const GP64: [Reg; 16] = [
    RAX, RCX, RDX, RBX, RSP, RBP, RSI, RDI, R8, R9, R10, R11, R12, R13, R14, R15,
];
const GP32: [Reg; 4] = [EAX, ECX, EBX, R13D];
const GP8: [Reg; 4] = [AL, CL, SIL, R8B];
const XMM: [Reg; 4] = [XMM0, XMM5, XMM10, XMM15];

// Drive the full builder API from a raw byte stream. Errors are expected
// (invalid shapes, overflowing immediates); panics are not.
fuzz_target!(|data: &[u8]| {
    let mut asm = Assembler::new();
    asm.enable_listing();
    let mut labels: Vec<Label> = Vec::new();

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let [op, a, b, c] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        let r1 = GP64[(a & 15) as usize];
        let r2 = GP64[(b & 15) as usize];
        let x1 = XMM[(a & 3) as usize];
        let x2 = XMM[(b & 3) as usize];
        let mem = qword(r1 + r2 * i32::from(c & 15) + i32::from(c));
        let imm = i32::from_le_bytes([a, b, c, 0]);

        let _ = match op % 24 {
            0 => asm.add(r1, r2),
            1 => asm.add(r1, imm),
            2 => asm.add(r1, mem),
            3 => asm.sub(mem, r2),
            4 => asm.and_(GP32[(a & 3) as usize], imm),
            5 => asm.or_(GP8[(a & 3) as usize], GP8[(b & 3) as usize]),
            6 => asm.mov(r1, r2),
            7 => asm.mov(r1, imm),
            8 => asm.mov64(r1, i64::from(imm) << i64::from(c & 31)),
            9 => asm.movzx(r1, byte(r2)),
            10 => asm.test(r1, imm),
            11 => asm.shl(r1, i32::from(c)),
            12 => asm.sar(r1, CL),
            13 => asm.lea(r1, mem),
            14 => asm.imul3(r1, r2, imm),
            15 => asm.jmp(r1),
            16 => {
                labels.push(asm.new_label());
                Ok(())
            }
            17 => {
                if let Some(&l) = labels.get((a as usize) % labels.len().max(1)) {
                    asm.jcc(Condition::Equal, l)
                } else {
                    Ok(())
                }
            }
            18 => {
                if let Some(&l) = labels.get((a as usize) % labels.len().max(1)) {
                    let _ = asm.set_label(l);
                }
                Ok(())
            }
            19 => {
                labels.push(asm.set_label_here());
                Ok(())
            }
            20 => {
                let k = asm.f64(f64::from(imm));
                asm.vaddsd(x1, x2, k)
            }
            21 => asm.vaddps(x1, x2, XMM[(c & 3) as usize]),
            22 => {
                let k = asm.bytes(chunk, u32::from(c).max(1))
                    .and_then(|m| asm.vmovupd(x1, m));
                k
            }
            _ => asm.vroundsd(x1, x2, XMM[(c & 3) as usize], c),
        };
    }

    // Finalize must never panic; undefined labels surface as errors.
    let _ = asm.finalize();
});
