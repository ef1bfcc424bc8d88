//! The assembler: instruction methods, label lifecycle, constant-pool entry
//! points and `finalize()`.
//!
//! One [`Assembler`] instance owns a `code` buffer, a `data` (constant pool)
//! buffer and an optional text listing. Instruction methods append encoded
//! bytes atomically; label and constant references leave 32-bit slots that
//! are rewritten when the target becomes known. `finalize()` consumes the
//! assembler, resolves every outstanding slot and freezes the outputs.
//!
//! The finished layout contract: the consumer places `data` immediately
//! before `code`, so RIP-relative constant displacements are negative
//! offsets from the code start (the listing renders them as `[.start-N]`).

use alloc::string::String;
use alloc::vec::Vec;

use crate::encoder::{self, InstrBuf, SlotRef};
use crate::error::AsmError;
use crate::listing::Listing;
use crate::operand::{Condition, Label, Mem, OpSize, Operand, Reg};
use crate::pool::{ConstPool, SlotKind};

/// A pending 32-bit label displacement slot in `code`.
struct LabelPatch {
    label: u32,
    /// Offset of the slot; the RIP base is `slot + 4`.
    slot: u32,
}

/// A pending 32-bit constant-pool displacement slot in `code`.
struct ConstPatch {
    slot_id: u32,
    /// Offset of the slot within `code`.
    slot: u32,
    /// Offset just past the referencing instruction (the RIP base).
    rip: u32,
}

/// Finalized output: machine code, constant pool and optional listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembly {
    /// Encoded instructions.
    pub code: Vec<u8>,
    /// Constant pool, to be placed immediately before `code`.
    pub data: Vec<u8>,
    /// Text listing; empty unless listing was enabled.
    pub text: String,
}

/// In-memory x86-64 instruction encoder for a JIT backend.
///
/// ```
/// use jitasm::{qword, Assembler, RAX, RSP};
///
/// let mut asm = Assembler::new();
/// asm.add(RAX, qword(RSP + 0x1b)).unwrap();
/// let out = asm.finalize().unwrap();
/// assert_eq!(out.code, vec![0x48, 0x03, 0x44, 0x24, 0x1B]);
/// ```
#[derive(Default)]
pub struct Assembler {
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    label_patches: Vec<LabelPatch>,
    const_patches: Vec<ConstPatch>,
    pool: ConstPool,
    listing: Option<Listing>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also build a textual listing of everything emitted (the `log_text`
    /// option). Off by default; the release path pays no formatting cost.
    pub fn enable_listing(&mut self) -> &mut Self {
        if self.listing.is_none() {
            self.listing = Some(Listing::new());
        }
        self
    }

    // ─── Labels ─────────────────────────────────────────────────────

    /// Mint a fresh, undefined label.
    pub fn new_label(&mut self) -> Label {
        let label = Label(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    /// Define `label` at the current code offset and resolve every pending
    /// reference to it.
    ///
    /// # Errors
    ///
    /// [`AsmError::DuplicateLabel`] if the label is already defined;
    /// [`AsmError::DispOutOfRange`] if a resolved displacement does not fit
    /// in 32 bits.
    pub fn set_label(&mut self, label: Label) -> Result<(), AsmError> {
        let entry = self
            .labels
            .get_mut(label.0 as usize)
            .ok_or(AsmError::UndefinedLabel { label: label.id() })?;
        if entry.is_some() {
            return Err(AsmError::DuplicateLabel { label: label.id() });
        }
        let def = self.code.len() as u32;
        *entry = Some(def);

        let code = &mut self.code;
        let mut failed = None;
        self.label_patches.retain(|patch| {
            if patch.label != label.0 {
                return true;
            }
            let disp = i64::from(def) - (i64::from(patch.slot) + 4);
            match i32::try_from(disp) {
                Ok(disp) => {
                    let at = patch.slot as usize;
                    code[at..at + 4].copy_from_slice(&disp.to_le_bytes());
                }
                Err(_) => failed = Some(AsmError::DispOutOfRange { disp }),
            }
            false
        });
        if let Some(err) = failed {
            return Err(err);
        }

        if let Some(listing) = self.listing.as_mut() {
            listing.label_def(label);
        }
        Ok(())
    }

    /// Mint a label and define it at the current code offset.
    pub fn set_label_here(&mut self) -> Label {
        let label = self.new_label();
        self.labels[label.0 as usize] = Some(self.code.len() as u32);
        if let Some(listing) = self.listing.as_mut() {
            listing.label_def(label);
        }
        label
    }

    // ─── Constant pool ──────────────────────────────────────────────

    /// Intern a 32-bit integer constant (4-byte aligned).
    pub fn i32(&mut self, value: i32) -> Mem {
        let id = self.pool.intern(SlotKind::I32, &value.to_le_bytes(), 4);
        Mem::const_ref(OpSize::Dword, id)
    }

    /// Intern a 64-bit integer constant (8-byte aligned).
    pub fn i64(&mut self, value: i64) -> Mem {
        let id = self.pool.intern(SlotKind::I64, &value.to_le_bytes(), 8);
        Mem::const_ref(OpSize::Qword, id)
    }

    /// Intern a single-precision float constant (4-byte aligned).
    pub fn f32(&mut self, value: f32) -> Mem {
        let id = self.pool.intern(SlotKind::F32, &value.to_le_bytes(), 4);
        Mem::const_ref(OpSize::Dword, id)
    }

    /// Intern a double-precision float constant (8-byte aligned).
    pub fn f64(&mut self, value: f64) -> Mem {
        let id = self.pool.intern(SlotKind::F64, &value.to_le_bytes(), 8);
        Mem::const_ref(OpSize::Qword, id)
    }

    /// Intern a packed 4 x f32 vector constant (16-byte aligned).
    pub fn f32x4(&mut self, a: f32, b: f32, c: f32, d: f32) -> Mem {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&a.to_le_bytes());
        bytes[4..8].copy_from_slice(&b.to_le_bytes());
        bytes[8..12].copy_from_slice(&c.to_le_bytes());
        bytes[12..16].copy_from_slice(&d.to_le_bytes());
        let id = self.pool.intern(SlotKind::F32x4, &bytes, 16);
        Mem::const_ref(OpSize::Xmmword, id)
    }

    /// Intern an arbitrary byte blob with an explicit alignment (the
    /// conventional default is 8).
    ///
    /// # Errors
    ///
    /// [`AsmError::InvalidOperands`] unless `align` is a power of two in
    /// `1..=4096`.
    pub fn bytes(&mut self, data: &[u8], align: u32) -> Result<Mem, AsmError> {
        if !align.is_power_of_two() || align > 4096 {
            return Err(encoder::invalid("constant alignment must be a power of two"));
        }
        let id = self.pool.intern(SlotKind::Bytes, data, align);
        Ok(Mem::const_ref(OpSize::Xmmword, id))
    }

    // ─── Emission plumbing ──────────────────────────────────────────

    fn commit(&mut self, buf: &InstrBuf, slot_ref: Option<SlotRef>) {
        let start = self.code.len() as u32;
        self.code.extend_from_slice(buf);
        if let Some(r) = slot_ref {
            self.const_patches.push(ConstPatch {
                slot_id: r.slot,
                slot: start + r.disp_pos as u32,
                rip: self.code.len() as u32,
            });
        }
    }

    fn log(&mut self, mnemonic: &str, ops: &[Operand]) {
        if let Some(listing) = self.listing.as_mut() {
            listing.instr(mnemonic, ops);
        }
    }

    fn alu(
        &mut self,
        mnemonic: &'static str,
        ext: u8,
        opcodes: [u8; 4],
        dst: Operand,
        src: Operand,
    ) -> Result<(), AsmError> {
        let mut buf = InstrBuf::new();
        let [opc8_mr, opc_mr, opc8_rm, opc_rm] = opcodes;
        let slot = encoder::encode_alu(
            &mut buf, mnemonic, ext, opc8_mr, opc_mr, opc8_rm, opc_rm, &dst, &src,
        )?;
        self.commit(&buf, slot);
        self.log(mnemonic, &[dst, src]);
        Ok(())
    }

    fn unary(&mut self, mnemonic: &'static str, ext: u8, op: Operand) -> Result<(), AsmError> {
        let mut buf = InstrBuf::new();
        let slot = encoder::encode_unary(&mut buf, mnemonic, ext, &op)?;
        self.commit(&buf, slot);
        self.log(mnemonic, &[op]);
        Ok(())
    }

    fn shift(
        &mut self,
        mnemonic: &'static str,
        ext: u8,
        dst: Operand,
        src: Operand,
    ) -> Result<(), AsmError> {
        let mut buf = InstrBuf::new();
        let slot = encoder::encode_shift(&mut buf, mnemonic, ext, &dst, &src)?;
        self.commit(&buf, slot);
        self.log(mnemonic, &[dst, src]);
        Ok(())
    }

    /// Emit a near branch: `opcode` bytes then a 32-bit displacement that
    /// either resolves immediately (backward reference) or is patched when
    /// the label is defined.
    fn branch(&mut self, mnemonic: &str, opcode: &[u8], target: Label) -> Result<(), AsmError> {
        let def = *self
            .labels
            .get(target.0 as usize)
            .ok_or(AsmError::UndefinedLabel { label: target.id() })?;

        let mut buf = InstrBuf::new();
        buf.extend_from_slice(opcode);
        let slot = (self.code.len() + buf.len()) as u32;
        match def {
            Some(def) => {
                let disp = i64::from(def) - (i64::from(slot) + 4);
                let disp =
                    i32::try_from(disp).map_err(|_| AsmError::DispOutOfRange { disp })?;
                buf.extend_from_slice(&disp.to_le_bytes());
                self.commit(&buf, None);
            }
            None => {
                buf.extend_from_slice(&[0; 4]);
                self.commit(&buf, None);
                self.label_patches.push(LabelPatch { label: target.0, slot });
            }
        }
        self.log(mnemonic, &[Operand::Label(target)]);
        Ok(())
    }

    // ─── Base binary ALU ────────────────────────────────────────────

    pub fn add(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.alu("add", 0, [0x00, 0x01, 0x02, 0x03], dst.into(), src.into())
    }

    pub fn or_(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.alu("or", 1, [0x08, 0x09, 0x0A, 0x0B], dst.into(), src.into())
    }

    pub fn and_(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.alu("and", 4, [0x20, 0x21, 0x22, 0x23], dst.into(), src.into())
    }

    pub fn sub(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.alu("sub", 5, [0x28, 0x29, 0x2A, 0x2B], dst.into(), src.into())
    }

    pub fn xor_(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.alu("xor", 6, [0x30, 0x31, 0x32, 0x33], dst.into(), src.into())
    }

    pub fn cmp(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.alu("cmp", 7, [0x38, 0x39, 0x3A, 0x3B], dst.into(), src.into())
    }

    // ─── Base unary ─────────────────────────────────────────────────

    pub fn not_(&mut self, op: impl Into<Operand>) -> Result<(), AsmError> {
        self.unary("not", 2, op.into())
    }

    pub fn neg(&mut self, op: impl Into<Operand>) -> Result<(), AsmError> {
        self.unary("neg", 3, op.into())
    }

    pub fn mul(&mut self, op: impl Into<Operand>) -> Result<(), AsmError> {
        self.unary("mul", 4, op.into())
    }

    /// One-operand widening `imul`; see [`imul2`](Self::imul2) and
    /// [`imul3`](Self::imul3) for the two- and three-operand forms.
    pub fn imul(&mut self, op: impl Into<Operand>) -> Result<(), AsmError> {
        self.unary("imul", 5, op.into())
    }

    pub fn div(&mut self, op: impl Into<Operand>) -> Result<(), AsmError> {
        self.unary("div", 6, op.into())
    }

    pub fn idiv(&mut self, op: impl Into<Operand>) -> Result<(), AsmError> {
        self.unary("idiv", 7, op.into())
    }

    /// Two-operand `imul dst, src` (`0F AF`).
    pub fn imul2(&mut self, dst: Reg, src: impl Into<Operand>) -> Result<(), AsmError> {
        let src = src.into();
        let mut buf = InstrBuf::new();
        let slot = encoder::encode_imul2(&mut buf, dst, &src)?;
        self.commit(&buf, slot);
        self.log("imul", &[Operand::Reg(dst), src]);
        Ok(())
    }

    /// Three-operand `imul dst, src, imm` (`6B` for a sign-extended imm8,
    /// `69` otherwise).
    pub fn imul3(&mut self, dst: Reg, src: impl Into<Operand>, imm: i32) -> Result<(), AsmError> {
        let src = src.into();
        let mut buf = InstrBuf::new();
        let slot = encoder::encode_imul3(&mut buf, dst, &src, imm)?;
        self.commit(&buf, slot);
        self.log("imul", &[Operand::Reg(dst), src, Operand::Imm(i64::from(imm))]);
        Ok(())
    }

    // ─── mov family ─────────────────────────────────────────────────

    pub fn mov(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        let (dst, src) = (dst.into(), src.into());
        let mut buf = InstrBuf::new();
        let slot = encoder::encode_mov(&mut buf, &dst, &src)?;
        self.commit(&buf, slot);
        self.log("mov", &[dst, src]);
        Ok(())
    }

    /// `mov r64, imm64` — always the 10-byte `REX.W B8+r imm64` form.
    pub fn mov64(&mut self, dst: Reg, value: i64) -> Result<(), AsmError> {
        let mut buf = InstrBuf::new();
        encoder::encode_mov64(&mut buf, dst, value)?;
        self.commit(&buf, None);
        self.log("mov", &[Operand::Reg(dst), Operand::Imm(value)]);
        Ok(())
    }

    /// Sign-extending load (`0F BE`/`0F BF`); the source tag picks the
    /// byte/word variant.
    pub fn movsx(&mut self, dst: Reg, src: Mem) -> Result<(), AsmError> {
        let mut buf = InstrBuf::new();
        let slot = encoder::encode_movx(&mut buf, "movsx", 0xBE, 0xBF, dst, &src)?;
        self.commit(&buf, slot);
        self.log("movsx", &[Operand::Reg(dst), Operand::Mem(src)]);
        Ok(())
    }

    /// Zero-extending load (`0F B6`/`0F B7`).
    pub fn movzx(&mut self, dst: Reg, src: Mem) -> Result<(), AsmError> {
        let mut buf = InstrBuf::new();
        let slot = encoder::encode_movx(&mut buf, "movzx", 0xB6, 0xB7, dst, &src)?;
        self.commit(&buf, slot);
        self.log("movzx", &[Operand::Reg(dst), Operand::Mem(src)]);
        Ok(())
    }

    // ─── test / lea ─────────────────────────────────────────────────

    pub fn test(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        let (dst, src) = (dst.into(), src.into());
        let mut buf = InstrBuf::new();
        let slot = encoder::encode_test(&mut buf, &dst, &src)?;
        self.commit(&buf, slot);
        self.log("test", &[dst, src]);
        Ok(())
    }

    /// `lea dst, [..]`: the source must be a memory operand, but no memory
    /// access is performed.
    pub fn lea(&mut self, dst: Reg, src: impl Into<Operand>) -> Result<(), AsmError> {
        let src = src.into();
        let mut buf = InstrBuf::new();
        let slot = encoder::encode_lea(&mut buf, dst, &src)?;
        self.commit(&buf, slot);
        self.log("lea", &[Operand::Reg(dst), src]);
        Ok(())
    }

    // ─── Shifts ─────────────────────────────────────────────────────

    pub fn shl(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.shift("shl", 4, dst.into(), src.into())
    }

    pub fn sal(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.shift("sal", 4, dst.into(), src.into())
    }

    pub fn shr(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.shift("shr", 5, dst.into(), src.into())
    }

    pub fn sar(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.shift("sar", 7, dst.into(), src.into())
    }

    // ─── Branches / jumps / calls ───────────────────────────────────

    /// Near conditional branch (`0F 8x` + disp32; no short-form
    /// optimization).
    pub fn jcc(&mut self, cond: Condition, target: Label) -> Result<(), AsmError> {
        self.branch(cond.jcc_name(), &[0x0F, 0x80 + cond.code()], target)
    }

    /// `jmp` to a label (`E9` + disp32) or absolute indirect through a
    /// 64-bit register / qword memory operand (`FF /4`).
    pub fn jmp(&mut self, target: impl Into<Operand>) -> Result<(), AsmError> {
        match target.into() {
            Operand::Label(label) => self.branch("jmp", &[0xE9], label),
            op => {
                let mut buf = InstrBuf::new();
                let slot = encoder::encode_jmpcall_rm(&mut buf, "jmp", 4, &op)?;
                self.commit(&buf, slot);
                self.log("jmp", &[op]);
                Ok(())
            }
        }
    }

    /// `call` to a label (`E8` + disp32) or absolute indirect (`FF /2`).
    pub fn call(&mut self, target: impl Into<Operand>) -> Result<(), AsmError> {
        match target.into() {
            Operand::Label(label) => self.branch("call", &[0xE8], label),
            op => {
                let mut buf = InstrBuf::new();
                let slot = encoder::encode_jmpcall_rm(&mut buf, "call", 2, &op)?;
                self.commit(&buf, slot);
                self.log("call", &[op]);
                Ok(())
            }
        }
    }

    // ─── Stack / misc ───────────────────────────────────────────────

    pub fn push(&mut self, reg: Reg) -> Result<(), AsmError> {
        let mut buf = InstrBuf::new();
        encoder::encode_push_pop(&mut buf, 0x50, reg)?;
        self.commit(&buf, None);
        self.log("push", &[Operand::Reg(reg)]);
        Ok(())
    }

    pub fn pop(&mut self, reg: Reg) -> Result<(), AsmError> {
        let mut buf = InstrBuf::new();
        encoder::encode_push_pop(&mut buf, 0x58, reg)?;
        self.commit(&buf, None);
        self.log("pop", &[Operand::Reg(reg)]);
        Ok(())
    }

    pub fn ret(&mut self) -> Result<(), AsmError> {
        self.code.push(0xC3);
        self.log("ret", &[]);
        Ok(())
    }

    pub fn int3(&mut self) -> Result<(), AsmError> {
        self.code.push(0xCC);
        self.log("int3", &[]);
        Ok(())
    }

    // ─── AVX: binary merge ──────────────────────────────────────────

    pub fn vaddpd(&mut self, dst: Reg, src1: Reg, src2: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_merge("vaddpd", 0x66, 0x58, dst, src1, src2.into())
    }

    pub fn vaddps(&mut self, dst: Reg, src1: Reg, src2: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_merge("vaddps", 0x00, 0x58, dst, src1, src2.into())
    }

    pub fn vaddsd(&mut self, dst: Reg, src1: Reg, src2: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_merge("vaddsd", 0xF2, 0x58, dst, src1, src2.into())
    }

    pub fn vaddss(&mut self, dst: Reg, src1: Reg, src2: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_merge("vaddss", 0xF3, 0x58, dst, src1, src2.into())
    }

    pub fn vsubsd(&mut self, dst: Reg, src1: Reg, src2: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_merge("vsubsd", 0xF2, 0x5C, dst, src1, src2.into())
    }

    pub fn vmulsd(&mut self, dst: Reg, src1: Reg, src2: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_merge("vmulsd", 0xF2, 0x59, dst, src1, src2.into())
    }

    pub fn vdivsd(&mut self, dst: Reg, src1: Reg, src2: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_merge("vdivsd", 0xF2, 0x5E, dst, src1, src2.into())
    }

    pub fn vxorpd(&mut self, dst: Reg, src1: Reg, src2: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_merge("vxorpd", 0x66, 0x57, dst, src1, src2.into())
    }

    // ─── AVX: unary merge ───────────────────────────────────────────

    pub fn vsqrtpd(&mut self, dst: Reg, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_unary("vsqrtpd", 0x66, 0x51, dst, src.into())
    }

    pub fn vsqrtps(&mut self, dst: Reg, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_unary("vsqrtps", 0x00, 0x51, dst, src.into())
    }

    pub fn vsqrtsd(&mut self, dst: Reg, src1: Reg, src2: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_merge("vsqrtsd", 0xF2, 0x51, dst, src1, src2.into())
    }

    pub fn vsqrtss(&mut self, dst: Reg, src1: Reg, src2: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_merge("vsqrtss", 0xF3, 0x51, dst, src1, src2.into())
    }

    pub fn vcomisd(&mut self, dst: Reg, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_unary("vcomisd", 0x66, 0x2F, dst, src.into())
    }

    pub fn vucomisd(&mut self, dst: Reg, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_unary("vucomisd", 0x66, 0x2E, dst, src.into())
    }

    // ─── AVX: moves ─────────────────────────────────────────────────

    pub fn vmovsd(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_move("vmovsd", 0xF2, 0x10, 0x11, dst.into(), src.into())
    }

    pub fn vmovss(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_move("vmovss", 0xF3, 0x10, 0x11, dst.into(), src.into())
    }

    /// Three-register `vmovsd dst, src1, src2` (merge the low lane of
    /// `src2` with the upper bits of `src1`).
    pub fn vmovsd_merge(&mut self, dst: Reg, src1: Reg, src2: Reg) -> Result<(), AsmError> {
        self.vex_merge("vmovsd", 0xF2, 0x10, dst, src1, Operand::Reg(src2))
    }

    /// Three-register `vmovss dst, src1, src2`.
    pub fn vmovss_merge(&mut self, dst: Reg, src1: Reg, src2: Reg) -> Result<(), AsmError> {
        self.vex_merge("vmovss", 0xF3, 0x10, dst, src1, Operand::Reg(src2))
    }

    pub fn vmovapd(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_move("vmovapd", 0x66, 0x28, 0x29, dst.into(), src.into())
    }

    pub fn vmovaps(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_move("vmovaps", 0x00, 0x28, 0x29, dst.into(), src.into())
    }

    pub fn vmovupd(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_move("vmovupd", 0x66, 0x10, 0x11, dst.into(), src.into())
    }

    pub fn vmovups(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>) -> Result<(), AsmError> {
        self.vex_move("vmovups", 0x00, 0x10, 0x11, dst.into(), src.into())
    }

    // ─── AVX: conversions ───────────────────────────────────────────

    /// Truncating f64 → integer conversion; VEX.W selects the destination
    /// integer width.
    pub fn vcvttsd2si(&mut self, dst: Reg, src: impl Into<Operand>) -> Result<(), AsmError> {
        let src = src.into();
        let w = match dst.size() {
            OpSize::Dword => false,
            OpSize::Qword => true,
            _ => {
                return Err(encoder::invalid(
                    "vcvttsd2si destination must be a 32- or 64-bit register",
                ))
            }
        };
        let mut buf = InstrBuf::new();
        let slot = match &src {
            Operand::Reg(r) if r.is_vector() => {
                encoder::encode_vex_rr(&mut buf, encoder::MAP_0F, 0xF2, 0x2C, w, false, dst, 0, *r);
                None
            }
            Operand::Mem(m) => {
                encoder::encode_vex_rm(&mut buf, encoder::MAP_0F, 0xF2, 0x2C, w, false, dst, 0, m)?
            }
            _ => return Err(encoder::invalid("vcvttsd2si source must be xmm or memory")),
        };
        self.commit(&buf, slot);
        self.log("vcvttsd2si", &[Operand::Reg(dst), src]);
        Ok(())
    }

    /// Integer → f64 conversion; VEX.W selects the source integer width.
    pub fn vcvtsi2sd(&mut self, dst: Reg, src1: Reg, src2: impl Into<Operand>) -> Result<(), AsmError> {
        let src2 = src2.into();
        if !dst.is_vector() || !src1.is_vector() {
            return Err(encoder::invalid("vcvtsi2sd destination operands must be xmm"));
        }
        let mut buf = InstrBuf::new();
        let slot = match &src2 {
            Operand::Reg(r) if r.is_gp() => {
                let w = match r.size() {
                    OpSize::Dword => false,
                    OpSize::Qword => true,
                    _ => {
                        return Err(encoder::invalid(
                            "vcvtsi2sd source must be a 32- or 64-bit register",
                        ))
                    }
                };
                encoder::encode_vex_rr(
                    &mut buf,
                    encoder::MAP_0F,
                    0xF2,
                    0x2A,
                    w,
                    false,
                    dst,
                    src1.index(),
                    *r,
                );
                None
            }
            Operand::Mem(m) => {
                let w = match m.size() {
                    OpSize::Dword => false,
                    OpSize::Qword => true,
                    _ => {
                        return Err(encoder::invalid(
                            "vcvtsi2sd source must be a dword or qword memory operand",
                        ))
                    }
                };
                encoder::encode_vex_rm(
                    &mut buf,
                    encoder::MAP_0F,
                    0xF2,
                    0x2A,
                    w,
                    false,
                    dst,
                    src1.index(),
                    m,
                )?
            }
            _ => return Err(encoder::invalid("vcvtsi2sd source must be a register or memory")),
        };
        self.commit(&buf, slot);
        self.log("vcvtsi2sd", &[Operand::Reg(dst), Operand::Reg(src1), src2]);
        Ok(())
    }

    // ─── AVX: ternary with imm8 ─────────────────────────────────────

    /// `vroundsd dst, src1, src2, mode` (`VEX.0F3A 0B` + imm8).
    pub fn vroundsd(
        &mut self,
        dst: Reg,
        src1: Reg,
        src2: impl Into<Operand>,
        mode: u8,
    ) -> Result<(), AsmError> {
        let src2 = src2.into();
        if !dst.is_vector() || !src1.is_vector() {
            return Err(encoder::invalid("vroundsd operands must be xmm"));
        }
        let mut buf = InstrBuf::new();
        let slot = match &src2 {
            Operand::Reg(r) if r.is_vector() => {
                encoder::encode_vex_rr(
                    &mut buf,
                    encoder::MAP_0F3A,
                    0x66,
                    0x0B,
                    true,
                    false,
                    dst,
                    src1.index(),
                    *r,
                );
                None
            }
            Operand::Mem(m) => encoder::encode_vex_rm(
                &mut buf,
                encoder::MAP_0F3A,
                0x66,
                0x0B,
                true,
                false,
                dst,
                src1.index(),
                m,
            )?,
            _ => return Err(encoder::invalid("vroundsd source must be xmm or memory")),
        };
        buf.push(mode);
        self.commit(&buf, slot);
        self.log(
            "vroundsd",
            &[
                Operand::Reg(dst),
                Operand::Reg(src1),
                src2,
                Operand::Imm(i64::from(mode)),
            ],
        );
        Ok(())
    }

    // ─── AVX shape helpers ──────────────────────────────────────────

    /// `op dst, src1, src2` — the three-operand non-destructive form;
    /// `src1` rides in VEX.vvvv, `src2` is the r/m operand.
    fn vex_merge(
        &mut self,
        mnemonic: &'static str,
        prefix: u8,
        opcode: u8,
        dst: Reg,
        src1: Reg,
        src2: Operand,
    ) -> Result<(), AsmError> {
        if !dst.is_vector() || !src1.is_vector() || dst.size() != src1.size() {
            return Err(encoder::invalid(alloc::format!(
                "{} destination operands must be matching vector registers",
                mnemonic
            )));
        }
        let l = dst.size() == OpSize::Ymmword;
        let mut buf = InstrBuf::new();
        let slot = match &src2 {
            Operand::Reg(r) if r.is_vector() => {
                encoder::encode_vex_rr(
                    &mut buf,
                    encoder::MAP_0F,
                    prefix,
                    opcode,
                    true,
                    l,
                    dst,
                    src1.index(),
                    *r,
                );
                None
            }
            Operand::Mem(m) => encoder::encode_vex_rm(
                &mut buf,
                encoder::MAP_0F,
                prefix,
                opcode,
                true,
                l,
                dst,
                src1.index(),
                m,
            )?,
            _ => {
                return Err(encoder::invalid(alloc::format!(
                    "{} source must be a vector register or memory",
                    mnemonic
                )))
            }
        };
        self.commit(&buf, slot);
        self.log(mnemonic, &[Operand::Reg(dst), Operand::Reg(src1), src2]);
        Ok(())
    }

    /// `op dst, src` — single-source form with VEX.vvvv unused.
    fn vex_unary(
        &mut self,
        mnemonic: &'static str,
        prefix: u8,
        opcode: u8,
        dst: Reg,
        src: Operand,
    ) -> Result<(), AsmError> {
        if !dst.is_vector() {
            return Err(encoder::invalid(alloc::format!(
                "{} destination must be a vector register",
                mnemonic
            )));
        }
        let mut buf = InstrBuf::new();
        let slot = match &src {
            Operand::Reg(r) if r.is_vector() => {
                let l = dst.size() == OpSize::Ymmword || r.size() == OpSize::Ymmword;
                encoder::encode_vex_rr(&mut buf, encoder::MAP_0F, prefix, opcode, true, l, dst, 0, *r);
                None
            }
            Operand::Mem(m) => {
                let l = dst.size() == OpSize::Ymmword;
                encoder::encode_vex_rm(&mut buf, encoder::MAP_0F, prefix, opcode, true, l, dst, 0, m)?
            }
            _ => {
                return Err(encoder::invalid(alloc::format!(
                    "{} source must be a vector register or memory",
                    mnemonic
                )))
            }
        };
        self.commit(&buf, slot);
        self.log(mnemonic, &[Operand::Reg(dst), src]);
        Ok(())
    }

    /// Load/store move pair: the memory side picks the opcode direction.
    fn vex_move(
        &mut self,
        mnemonic: &'static str,
        prefix: u8,
        load: u8,
        store: u8,
        dst: Operand,
        src: Operand,
    ) -> Result<(), AsmError> {
        let mut buf = InstrBuf::new();
        let slot = match (&dst, &src) {
            (Operand::Reg(d), Operand::Mem(m)) if d.is_vector() => {
                let l = d.size() == OpSize::Ymmword;
                encoder::encode_vex_rm(&mut buf, encoder::MAP_0F, prefix, load, true, l, *d, 0, m)?
            }
            (Operand::Mem(m), Operand::Reg(s)) if s.is_vector() => {
                let l = s.size() == OpSize::Ymmword;
                encoder::encode_vex_rm(&mut buf, encoder::MAP_0F, prefix, store, true, l, *s, 0, m)?
            }
            (Operand::Reg(d), Operand::Reg(s)) if d.is_vector() && s.is_vector() => {
                let l = d.size() == OpSize::Ymmword || s.size() == OpSize::Ymmword;
                encoder::encode_vex_rr(&mut buf, encoder::MAP_0F, prefix, load, true, l, *d, 0, *s);
                None
            }
            _ => {
                return Err(encoder::invalid(alloc::format!(
                    "unsupported operand shape for {}",
                    mnemonic
                )))
            }
        };
        self.commit(&buf, slot);
        self.log(mnemonic, &[dst, src]);
        Ok(())
    }

    // ─── Finalize ───────────────────────────────────────────────────

    /// Resolve every outstanding patch, lay out the constant pool and
    /// freeze the outputs. Consumes the assembler, so nothing can be
    /// emitted afterwards.
    ///
    /// # Errors
    ///
    /// [`AsmError::UndefinedLabel`] if a referenced label was never
    /// defined; [`AsmError::DispOutOfRange`] if a constant displacement
    /// does not fit in 32 bits.
    pub fn finalize(mut self) -> Result<Assembly, AsmError> {
        if let Some(patch) = self.label_patches.first() {
            return Err(AsmError::UndefinedLabel { label: patch.label + 1 });
        }

        let (data, offsets) = self.pool.layout();
        for patch in &self.const_patches {
            let disp = i64::from(offsets[patch.slot_id as usize])
                - data.len() as i64
                - i64::from(patch.rip);
            let disp = i32::try_from(disp).map_err(|_| AsmError::DispOutOfRange { disp })?;
            let at = patch.slot as usize;
            self.code[at..at + 4].copy_from_slice(&disp.to_le_bytes());
        }

        let text = self
            .listing
            .take()
            .map(|listing| listing.render(&offsets, data.len()))
            .unwrap_or_default();

        Ok(Assembly { code: self.code, data, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::{RAX, RSI, XMM0};

    #[test]
    fn set_label_drains_pending_patches() {
        let mut asm = Assembler::new();
        let target = asm.new_label();
        asm.jcc(Condition::Equal, target).unwrap(); // slot at 2..6
        asm.jmp(target).unwrap(); // slot at 7..11
        assert_eq!(asm.label_patches.len(), 2);
        asm.set_label(target).unwrap();
        assert!(asm.label_patches.is_empty());

        let out = asm.finalize().unwrap();
        assert_eq!(&out.code[2..6], &5i32.to_le_bytes());
        assert_eq!(&out.code[7..11], &0i32.to_le_bytes());
    }

    #[test]
    fn const_patch_records_instruction_end_as_rip_base() {
        let mut asm = Assembler::new();
        asm.add(RAX, RSI).unwrap(); // 3 bytes
        let c = asm.f64(2.5);
        asm.vaddsd(XMM0, XMM0, c).unwrap(); // 9 bytes, disp slot at 8..12
        assert_eq!(asm.const_patches.len(), 1);
        assert_eq!(asm.const_patches[0].slot, 8);
        assert_eq!(asm.const_patches[0].rip, 12);
    }

    // The label table and patch list hold u32 offsets, so definition sites
    // and reference slots can sit farther apart than a disp32 reaches. The
    // three resolution paths must all reject that instead of truncating.

    #[test]
    fn branch_to_unreachable_definition_fails() {
        let mut asm = Assembler::new();
        let target = asm.new_label();
        asm.labels[target.0 as usize] = Some(u32::MAX);
        let err = asm.jcc(Condition::Equal, target).unwrap_err();
        assert!(matches!(err, AsmError::DispOutOfRange { .. }));
        // Nothing was committed for the failed branch.
        assert!(asm.code.is_empty());
    }

    #[test]
    fn set_label_rejects_out_of_range_patch() {
        let mut asm = Assembler::new();
        let target = asm.new_label();
        asm.jcc(Condition::Equal, target).unwrap();
        asm.label_patches[0].slot = u32::MAX - 4;
        let err = asm.set_label(target).unwrap_err();
        assert!(matches!(err, AsmError::DispOutOfRange { .. }));
    }

    #[test]
    fn finalize_rejects_out_of_range_constant_disp() {
        let mut asm = Assembler::new();
        let c = asm.f64(1.0);
        asm.vmovsd(XMM0, c).unwrap();
        asm.const_patches[0].rip = u32::MAX;
        let err = asm.finalize().unwrap_err();
        assert!(matches!(err, AsmError::DispOutOfRange { .. }));
    }
}
