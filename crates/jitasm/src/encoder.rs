//! x86-64 encoding primitives.
//!
//! Manual REX / VEX / ModR/M / SIB / displacement / immediate construction,
//! plus the shared encoder templates the instruction table dispatches into.
//! Each template writes one complete instruction into an [`InstrBuf`] and
//! reports an optional constant-pool reference whose 32-bit displacement
//! slot is patched at finalize.

use alloc::format;
use alloc::string::String;

use crate::error::AsmError;
use crate::operand::{Mem, OpSize, Operand, Reg};

// ─── InstrBuf: stack-allocated instruction buffer ───────────────────────

/// Stack buffer for a single instruction's bytes.
///
/// x86-64 instructions are at most 15 bytes; 16 covers every encoding this
/// crate produces without touching the heap, and keeps emission atomic —
/// nothing reaches the code buffer until the whole instruction encoded.
pub(crate) struct InstrBuf {
    data: [u8; 16],
    len: u8,
}

impl InstrBuf {
    #[inline]
    pub(crate) const fn new() -> Self {
        Self { data: [0; 16], len: 0 }
    }

    #[inline]
    pub(crate) fn push(&mut self, byte: u8) {
        debug_assert!((self.len as usize) < 16, "instruction longer than 16 bytes");
        self.data[self.len as usize] = byte;
        self.len += 1;
    }

    #[inline]
    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) {
        let start = self.len as usize;
        debug_assert!(start + bytes.len() <= 16);
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len() as u8;
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len as usize
    }
}

impl core::ops::Deref for InstrBuf {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

/// A pending constant-pool reference inside an [`InstrBuf`]: the position
/// of the 32-bit displacement slot, relative to the start of the buffer.
pub(crate) struct SlotRef {
    pub(crate) slot: u32,
    pub(crate) disp_pos: usize,
}

// ─── Byte builders ──────────────────────────────────────────────────────

#[inline]
pub(crate) fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    0x40 | (u8::from(w) << 3) | (u8::from(r) << 2) | (u8::from(x) << 1) | u8::from(b)
}

#[inline]
pub(crate) fn needs_rex(w: bool, r: bool, x: bool, b: bool) -> bool {
    w || r || x || b
}

#[inline]
pub(crate) fn modrm(mod_: u8, reg: u8, rm: u8) -> u8 {
    (mod_ << 6) | ((reg & 7) << 3) | (rm & 7)
}

#[inline]
fn sib(scale: u8, index: u8, base: u8) -> u8 {
    let ss = match scale {
        2 => 1,
        4 => 2,
        8 => 3,
        _ => 0,
    };
    (ss << 6) | ((index & 7) << 3) | (base & 7)
}

/// Little-endian immediate of width 1/2/4/8.
pub(crate) fn emit_imm(buf: &mut InstrBuf, value: i64, size: u8) {
    match size {
        1 => buf.push(value as u8),
        2 => buf.extend_from_slice(&(value as i16).to_le_bytes()),
        4 => buf.extend_from_slice(&(value as i32).to_le_bytes()),
        _ => buf.extend_from_slice(&value.to_le_bytes()),
    }
}

pub(crate) fn invalid(detail: impl Into<String>) -> AsmError {
    AsmError::InvalidOperands { detail: detail.into() }
}

fn check_imm(value: i64, min: i64, max: i64) -> Result<(), AsmError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(AsmError::ImmediateOverflow { value, min, max })
    }
}

#[inline]
fn fits_i8(value: i64) -> bool {
    (-128..=127).contains(&value)
}

// ─── Memory operand validation ──────────────────────────────────────────

/// Shape checks deferred from the side-effect-free operand builders.
pub(crate) fn validate_mem(mem: &Mem) -> Result<(), AsmError> {
    if mem.slot.is_some() {
        return Ok(());
    }
    let addr = &mem.addr;
    if addr.malformed {
        return Err(invalid("malformed address expression"));
    }
    if addr.index.is_some() && addr.scale == 0 {
        return Err(invalid("memory scale must be 1, 2, 4, or 8"));
    }
    for reg in addr.base.iter().chain(addr.index.iter()) {
        if reg.size() != OpSize::Qword {
            return Err(invalid(format!(
                "memory base/index must be a 64-bit register, got {}",
                reg
            )));
        }
    }
    if let Some(idx) = addr.index {
        // Index field value 0b100 means "no index"; rsp is unencodable.
        if idx.index() == 4 {
            return Err(invalid("rsp cannot be used as an index register"));
        }
    }
    Ok(())
}

// ─── REX emission ───────────────────────────────────────────────────────

fn mem_rex_xb(mem: &Mem) -> (bool, bool) {
    let x = mem.addr.index.is_some_and(|r| r.is_extended());
    let b = mem.addr.base.is_some_and(|r| r.is_extended());
    (x, b)
}

/// 66 prefix + REX for a reg, reg-direct operation.
pub(crate) fn emit_rex_reg_rm(buf: &mut InstrBuf, size: OpSize, reg: Reg, rm: Reg) {
    let w = size == OpSize::Qword;
    let r = reg.is_extended();
    let b = rm.is_extended();
    if size == OpSize::Word {
        buf.push(0x66);
    }
    if needs_rex(w, r, false, b) || reg.forces_rex() || rm.forces_rex() {
        buf.push(rex(w, r, false, b));
    }
}

/// 66 prefix + REX for a reg, mem operation.
pub(crate) fn emit_rex_reg_mem(buf: &mut InstrBuf, size: OpSize, reg: Reg, mem: &Mem) {
    let w = size == OpSize::Qword;
    let r = reg.is_extended();
    let (x, b) = mem_rex_xb(mem);
    if size == OpSize::Word {
        buf.push(0x66);
    }
    if needs_rex(w, r, x, b) || reg.forces_rex() {
        buf.push(rex(w, r, x, b));
    }
}

/// 66 prefix + REX for a /digit reg-direct operation (no reg operand).
pub(crate) fn emit_rex_digit_rm(buf: &mut InstrBuf, size: OpSize, rm: Reg) {
    let w = size == OpSize::Qword;
    let b = rm.is_extended();
    if size == OpSize::Word {
        buf.push(0x66);
    }
    if needs_rex(w, false, false, b) || rm.forces_rex() {
        buf.push(rex(w, false, false, b));
    }
}

/// 66 prefix + REX for a /digit memory operation.
pub(crate) fn emit_rex_digit_mem(buf: &mut InstrBuf, size: OpSize, mem: &Mem) {
    let w = size == OpSize::Qword;
    let (x, b) = mem_rex_xb(mem);
    if size == OpSize::Word {
        buf.push(0x66);
    }
    if needs_rex(w, false, x, b) {
        buf.push(rex(w, false, x, b));
    }
}

// ─── ModR/M + SIB + displacement ────────────────────────────────────────

/// Emit ModR/M + SIB + displacement for a (pre-validated) memory operand.
///
/// The two load-bearing edge cases live here: base low bits 100 (rsp/r12)
/// always takes a SIB byte, and base low bits 101 (rbp/r13) at zero
/// displacement promotes to mod=01 with disp8=0, because mod=00 r/m=101
/// means RIP-relative.
pub(crate) fn emit_mem_modrm(buf: &mut InstrBuf, reg_field: u8, mem: &Mem) -> Option<SlotRef> {
    // RIP-relative constant-pool reference, patched at finalize.
    if let Some(slot) = mem.slot {
        buf.push(modrm(0b00, reg_field, 0b101));
        let disp_pos = buf.len();
        buf.extend_from_slice(&[0; 4]);
        return Some(SlotRef { slot, disp_pos });
    }

    let addr = &mem.addr;
    match (addr.base, addr.index) {
        // Absolute [disp32]: SIB with no index and base=101.
        (None, None) => {
            buf.push(modrm(0b00, reg_field, 0b100));
            buf.push(sib(1, 0b100, 0b101));
            buf.extend_from_slice(&addr.disp.to_le_bytes());
        }
        // [index*scale + disp32]: SIB base=101 means no base, disp32 follows.
        (None, Some(idx)) => {
            buf.push(modrm(0b00, reg_field, 0b100));
            buf.push(sib(addr.scale, idx.base_code(), 0b101));
            buf.extend_from_slice(&addr.disp.to_le_bytes());
        }
        (Some(base), index) => {
            let need_sib = index.is_some() || base.base_code() == 0b100;
            let (mod_bits, disp_size) = if addr.disp == 0 && base.base_code() != 0b101 {
                (0b00, 0)
            } else if fits_i8(addr.disp as i64) {
                (0b01, 1)
            } else {
                (0b10, 4)
            };

            if need_sib {
                // Index field 100 encodes "no index".
                let idx_code = index.map_or(0b100, |r| r.base_code());
                buf.push(modrm(mod_bits, reg_field, 0b100));
                buf.push(sib(addr.scale, idx_code, base.base_code()));
            } else {
                buf.push(modrm(mod_bits, reg_field, base.base_code()));
            }

            match disp_size {
                1 => buf.push(addr.disp as i8 as u8),
                4 => buf.extend_from_slice(&addr.disp.to_le_bytes()),
                _ => {}
            }
        }
    }
    None
}

// ─── Width helpers ──────────────────────────────────────────────────────

fn gp_size(op: &Operand, mnemonic: &str) -> Result<OpSize, AsmError> {
    let size = match op {
        Operand::Reg(r) => r.size(),
        Operand::Mem(m) => m.size(),
        _ => return Err(invalid(format!("{} expects a register or memory operand", mnemonic))),
    };
    if size.is_gp() {
        Ok(size)
    } else {
        Err(invalid(format!("{} expects a general-purpose operand", mnemonic)))
    }
}

fn check_gp_pair(dst: Reg, src_size: OpSize, mnemonic: &str) -> Result<OpSize, AsmError> {
    if !dst.is_gp() || !src_size.is_gp() {
        return Err(invalid(format!("{} expects general-purpose operands", mnemonic)));
    }
    if dst.size() != src_size {
        return Err(invalid(format!("operand size mismatch in {}", mnemonic)));
    }
    Ok(dst.size())
}

/// Immediate with the natural width of `size` (imm64 is never produced
/// here; `mov r64, imm` has its own path).
fn emit_sized_imm(buf: &mut InstrBuf, size: OpSize, value: i64) -> Result<(), AsmError> {
    match size {
        OpSize::Byte => {
            check_imm(value, -128, 255)?;
            emit_imm(buf, value, 1);
        }
        OpSize::Word => {
            check_imm(value, -32768, 65535)?;
            emit_imm(buf, value, 2);
        }
        OpSize::Dword => {
            check_imm(value, i64::from(i32::MIN), i64::from(u32::MAX))?;
            emit_imm(buf, value, 4);
        }
        _ => {
            // Qword forms take a sign-extended imm32.
            check_imm(value, i64::from(i32::MIN), i64::from(i32::MAX))?;
            emit_imm(buf, value, 4);
        }
    }
    Ok(())
}

// ─── /digit form plumbing ───────────────────────────────────────────────

/// Emit prefix + opcode + ModR/M for an opcode-extension form over a
/// register-direct or memory r/m operand. `opc8` is the byte-size opcode.
fn encode_digit(
    buf: &mut InstrBuf,
    size: OpSize,
    opc8: u8,
    opc: u8,
    ext: u8,
    rm: &Operand,
) -> Result<Option<SlotRef>, AsmError> {
    let opcode = if size == OpSize::Byte { opc8 } else { opc };
    match rm {
        Operand::Reg(r) => {
            emit_rex_digit_rm(buf, size, *r);
            buf.push(opcode);
            buf.push(modrm(0b11, ext, r.base_code()));
            Ok(None)
        }
        Operand::Mem(m) => {
            validate_mem(m)?;
            emit_rex_digit_mem(buf, size, m);
            buf.push(opcode);
            Ok(emit_mem_modrm(buf, ext, m))
        }
        _ => Err(invalid("expected a register or memory operand")),
    }
}

// ─── Base binary ALU family ─────────────────────────────────────────────

/// add/or/and/sub/xor/cmp. Opcode bytes follow the classic layout:
/// `opc_mr` (r/m ← r), `opc_rm` (r ← r/m), plus their byte variants; the
/// imm forms are the shared `80`/`81`/`83` with `ext` selecting the op.
pub(crate) fn encode_alu(
    buf: &mut InstrBuf,
    mnemonic: &str,
    ext: u8,
    opc8_mr: u8,
    opc_mr: u8,
    opc8_rm: u8,
    opc_rm: u8,
    dst: &Operand,
    src: &Operand,
) -> Result<Option<SlotRef>, AsmError> {
    match (dst, src) {
        (Operand::Reg(d), Operand::Reg(s)) => {
            let size = check_gp_pair(*d, s.size(), mnemonic)?;
            emit_rex_reg_rm(buf, size, *d, *s);
            buf.push(if size == OpSize::Byte { opc8_rm } else { opc_rm });
            buf.push(modrm(0b11, d.base_code(), s.base_code()));
            Ok(None)
        }
        (Operand::Reg(d), Operand::Mem(m)) => {
            let size = check_gp_pair(*d, m.size(), mnemonic)?;
            validate_mem(m)?;
            emit_rex_reg_mem(buf, size, *d, m);
            buf.push(if size == OpSize::Byte { opc8_rm } else { opc_rm });
            Ok(emit_mem_modrm(buf, d.base_code(), m))
        }
        (Operand::Mem(m), Operand::Reg(s)) => {
            let size = check_gp_pair(*s, m.size(), mnemonic)?;
            validate_mem(m)?;
            emit_rex_reg_mem(buf, size, *s, m);
            buf.push(if size == OpSize::Byte { opc8_mr } else { opc_mr });
            Ok(emit_mem_modrm(buf, s.base_code(), m))
        }
        (dst @ (Operand::Reg(_) | Operand::Mem(_)), Operand::Imm(v)) => {
            let size = gp_size(dst, mnemonic)?;
            if size == OpSize::Byte {
                let slot = encode_digit(buf, size, 0x80, 0x80, ext, dst)?;
                check_imm(*v, -128, 255)?;
                emit_imm(buf, *v, 1);
                Ok(slot)
            } else if fits_i8(*v) {
                // Sign-extended short form.
                let slot = encode_digit(buf, size, 0x83, 0x83, ext, dst)?;
                emit_imm(buf, *v, 1);
                Ok(slot)
            } else {
                let slot = encode_digit(buf, size, 0x81, 0x81, ext, dst)?;
                emit_sized_imm(buf, size, *v)?;
                Ok(slot)
            }
        }
        _ => Err(invalid(format!("unsupported operand shape for {}", mnemonic))),
    }
}

// ─── Base unary family (F6/F7 /digit) ───────────────────────────────────

pub(crate) fn encode_unary(
    buf: &mut InstrBuf,
    mnemonic: &str,
    ext: u8,
    op: &Operand,
) -> Result<Option<SlotRef>, AsmError> {
    let size = gp_size(op, mnemonic)?;
    encode_digit(buf, size, 0xF6, 0xF7, ext, op)
}

// ─── Shift family ───────────────────────────────────────────────────────

pub(crate) fn encode_shift(
    buf: &mut InstrBuf,
    mnemonic: &str,
    ext: u8,
    dst: &Operand,
    src: &Operand,
) -> Result<Option<SlotRef>, AsmError> {
    let size = gp_size(dst, mnemonic)?;
    match src {
        Operand::Imm(1) => encode_digit(buf, size, 0xD0, 0xD1, ext, dst),
        Operand::Imm(v) => {
            check_imm(*v, 0, 255)?;
            let slot = encode_digit(buf, size, 0xC0, 0xC1, ext, dst)?;
            emit_imm(buf, *v, 1);
            Ok(slot)
        }
        Operand::Reg(r) if r.size() == OpSize::Byte && r.index() == 1 => {
            encode_digit(buf, size, 0xD2, 0xD3, ext, dst)
        }
        _ => Err(invalid(format!(
            "{} count must be cl or an 8-bit immediate",
            mnemonic
        ))),
    }
}

// ─── mov family ─────────────────────────────────────────────────────────

pub(crate) fn encode_mov(
    buf: &mut InstrBuf,
    dst: &Operand,
    src: &Operand,
) -> Result<Option<SlotRef>, AsmError> {
    match (dst, src) {
        (Operand::Reg(d), Operand::Reg(s)) => {
            let size = check_gp_pair(*d, s.size(), "mov")?;
            emit_rex_reg_rm(buf, size, *d, *s);
            buf.push(if size == OpSize::Byte { 0x8A } else { 0x8B });
            buf.push(modrm(0b11, d.base_code(), s.base_code()));
            Ok(None)
        }
        (Operand::Reg(d), Operand::Mem(m)) => {
            let size = check_gp_pair(*d, m.size(), "mov")?;
            validate_mem(m)?;
            emit_rex_reg_mem(buf, size, *d, m);
            buf.push(if size == OpSize::Byte { 0x8A } else { 0x8B });
            Ok(emit_mem_modrm(buf, d.base_code(), m))
        }
        (Operand::Mem(m), Operand::Reg(s)) => {
            let size = check_gp_pair(*s, m.size(), "mov")?;
            validate_mem(m)?;
            emit_rex_reg_mem(buf, size, *s, m);
            buf.push(if size == OpSize::Byte { 0x88 } else { 0x89 });
            Ok(emit_mem_modrm(buf, s.base_code(), m))
        }
        (Operand::Mem(m), Operand::Imm(v)) => {
            let size = m.size();
            if !size.is_gp() {
                return Err(invalid("mov to memory requires a general-purpose size tag"));
            }
            let slot = encode_digit(buf, size, 0xC6, 0xC7, 0, dst)?;
            emit_sized_imm(buf, size, *v)?;
            Ok(slot)
        }
        (Operand::Reg(d), Operand::Imm(v)) => {
            encode_mov_reg_imm(buf, *d, *v)?;
            Ok(None)
        }
        _ => Err(invalid("unsupported operand shape for mov")),
    }
}

/// `mov reg, imm` via the `B0+r`/`B8+r` short forms. The qword form always
/// emits the full 10-byte `REX.W B8+r imm64` encoding so that generated
/// code has a predictable size regardless of the immediate's value.
fn encode_mov_reg_imm(buf: &mut InstrBuf, dst: Reg, value: i64) -> Result<(), AsmError> {
    if !dst.is_gp() {
        return Err(invalid("mov immediate requires a general-purpose register"));
    }
    let w = dst.size() == OpSize::Qword;
    let b = dst.is_extended();
    if dst.size() == OpSize::Word {
        buf.push(0x66);
    }
    if needs_rex(w, false, false, b) || dst.forces_rex() {
        buf.push(rex(w, false, false, b));
    }
    match dst.size() {
        OpSize::Byte => {
            check_imm(value, -128, 255)?;
            buf.push(0xB0 + dst.base_code());
            emit_imm(buf, value, 1);
        }
        OpSize::Word => {
            check_imm(value, -32768, 65535)?;
            buf.push(0xB8 + dst.base_code());
            emit_imm(buf, value, 2);
        }
        OpSize::Dword => {
            check_imm(value, i64::from(i32::MIN), i64::from(u32::MAX))?;
            buf.push(0xB8 + dst.base_code());
            emit_imm(buf, value, 4);
        }
        _ => {
            buf.push(0xB8 + dst.base_code());
            emit_imm(buf, value, 8);
        }
    }
    Ok(())
}

pub(crate) fn encode_mov64(buf: &mut InstrBuf, dst: Reg, value: i64) -> Result<(), AsmError> {
    if dst.size() != OpSize::Qword {
        return Err(invalid("mov64 requires a 64-bit register"));
    }
    buf.push(rex(true, false, false, dst.is_extended()));
    buf.push(0xB8 + dst.base_code());
    emit_imm(buf, value, 8);
    Ok(())
}

// ─── movsx / movzx ──────────────────────────────────────────────────────

/// Two-byte `0F opc` extension loads; the byte/word variant is chosen by
/// the source memory tag, the destination width drives REX.W.
pub(crate) fn encode_movx(
    buf: &mut InstrBuf,
    mnemonic: &str,
    opc_byte: u8,
    opc_word: u8,
    dst: Reg,
    src: &Mem,
) -> Result<Option<SlotRef>, AsmError> {
    if !matches!(dst.size(), OpSize::Dword | OpSize::Qword) {
        return Err(invalid(format!("{} destination must be 32- or 64-bit", mnemonic)));
    }
    let opcode = match src.size() {
        OpSize::Byte => opc_byte,
        OpSize::Word => opc_word,
        _ => {
            return Err(invalid(format!(
                "{} source must be a byte or word memory operand",
                mnemonic
            )))
        }
    };
    validate_mem(src)?;
    emit_rex_reg_mem(buf, dst.size(), dst, src);
    buf.push(0x0F);
    buf.push(opcode);
    Ok(emit_mem_modrm(buf, dst.base_code(), src))
}

// ─── test ───────────────────────────────────────────────────────────────

/// `F6/F7 /0` for every immediate form (the `A8/A9` accumulator shortcut
/// is never used); `84/85` with the first operand in ModR/M.reg otherwise.
pub(crate) fn encode_test(
    buf: &mut InstrBuf,
    dst: &Operand,
    src: &Operand,
) -> Result<Option<SlotRef>, AsmError> {
    match (dst, src) {
        (Operand::Reg(_) | Operand::Mem(_), Operand::Imm(v)) => {
            let size = gp_size(dst, "test")?;
            let slot = encode_digit(buf, size, 0xF6, 0xF7, 0, dst)?;
            emit_sized_imm(buf, size, *v)?;
            Ok(slot)
        }
        (Operand::Reg(d), Operand::Reg(s)) => {
            let size = check_gp_pair(*d, s.size(), "test")?;
            emit_rex_reg_rm(buf, size, *d, *s);
            buf.push(if size == OpSize::Byte { 0x84 } else { 0x85 });
            buf.push(modrm(0b11, d.base_code(), s.base_code()));
            Ok(None)
        }
        (Operand::Reg(d), Operand::Mem(m)) => {
            let size = check_gp_pair(*d, m.size(), "test")?;
            validate_mem(m)?;
            emit_rex_reg_mem(buf, size, *d, m);
            buf.push(if size == OpSize::Byte { 0x84 } else { 0x85 });
            Ok(emit_mem_modrm(buf, d.base_code(), m))
        }
        (Operand::Mem(m), Operand::Reg(s)) => {
            let size = check_gp_pair(*s, m.size(), "test")?;
            validate_mem(m)?;
            emit_rex_reg_mem(buf, size, *s, m);
            buf.push(if size == OpSize::Byte { 0x84 } else { 0x85 });
            Ok(emit_mem_modrm(buf, s.base_code(), m))
        }
        _ => Err(invalid("unsupported operand shape for test")),
    }
}

// ─── lea ────────────────────────────────────────────────────────────────

pub(crate) fn encode_lea(
    buf: &mut InstrBuf,
    dst: Reg,
    src: &Operand,
) -> Result<Option<SlotRef>, AsmError> {
    let mem = match src {
        Operand::Mem(m) => m,
        _ => return Err(invalid("lea source must be a memory operand")),
    };
    if !matches!(dst.size(), OpSize::Dword | OpSize::Qword) {
        return Err(invalid("lea destination must be 32- or 64-bit"));
    }
    validate_mem(mem)?;
    emit_rex_reg_mem(buf, dst.size(), dst, mem);
    buf.push(0x8D);
    Ok(emit_mem_modrm(buf, dst.base_code(), mem))
}

// ─── Absolute indirect jmp/call (FF /4, FF /2) ──────────────────────────

/// The operand is always a 64-bit register or qword memory; REX.W is
/// emitted to match the reference encodings (`jmp rax` → `48 FF E0`).
pub(crate) fn encode_jmpcall_rm(
    buf: &mut InstrBuf,
    mnemonic: &str,
    ext: u8,
    op: &Operand,
) -> Result<Option<SlotRef>, AsmError> {
    match op {
        Operand::Reg(r) if r.size() == OpSize::Qword => {
            encode_digit(buf, OpSize::Qword, 0xFF, 0xFF, ext, op)
        }
        Operand::Mem(m) if m.size() == OpSize::Qword => {
            encode_digit(buf, OpSize::Qword, 0xFF, 0xFF, ext, op)
        }
        _ => Err(invalid(format!(
            "indirect {} requires a 64-bit register or qword memory operand",
            mnemonic
        ))),
    }
}

// ─── imul (multi-form) ──────────────────────────────────────────────────

pub(crate) fn encode_imul2(
    buf: &mut InstrBuf,
    dst: Reg,
    src: &Operand,
) -> Result<Option<SlotRef>, AsmError> {
    if !matches!(dst.size(), OpSize::Dword | OpSize::Qword) {
        return Err(invalid("imul destination must be 32- or 64-bit"));
    }
    match src {
        Operand::Reg(s) => {
            check_gp_pair(dst, s.size(), "imul")?;
            emit_rex_reg_rm(buf, dst.size(), dst, *s);
            buf.extend_from_slice(&[0x0F, 0xAF]);
            buf.push(modrm(0b11, dst.base_code(), s.base_code()));
            Ok(None)
        }
        Operand::Mem(m) => {
            check_gp_pair(dst, m.size(), "imul")?;
            validate_mem(m)?;
            emit_rex_reg_mem(buf, dst.size(), dst, m);
            buf.extend_from_slice(&[0x0F, 0xAF]);
            Ok(emit_mem_modrm(buf, dst.base_code(), m))
        }
        _ => Err(invalid("imul source must be a register or memory operand")),
    }
}

pub(crate) fn encode_imul3(
    buf: &mut InstrBuf,
    dst: Reg,
    src: &Operand,
    imm: i32,
) -> Result<Option<SlotRef>, AsmError> {
    if !matches!(dst.size(), OpSize::Dword | OpSize::Qword) {
        return Err(invalid("imul destination must be 32- or 64-bit"));
    }
    let short = fits_i8(i64::from(imm));
    let opcode = if short { 0x6B } else { 0x69 };
    let slot = match src {
        Operand::Reg(s) => {
            check_gp_pair(dst, s.size(), "imul")?;
            emit_rex_reg_rm(buf, dst.size(), dst, *s);
            buf.push(opcode);
            buf.push(modrm(0b11, dst.base_code(), s.base_code()));
            None
        }
        Operand::Mem(m) => {
            check_gp_pair(dst, m.size(), "imul")?;
            validate_mem(m)?;
            emit_rex_reg_mem(buf, dst.size(), dst, m);
            buf.push(opcode);
            emit_mem_modrm(buf, dst.base_code(), m)
        }
        _ => return Err(invalid("imul source must be a register or memory operand")),
    };
    emit_imm(buf, i64::from(imm), if short { 1 } else { 4 });
    Ok(slot)
}

// ─── push / pop / fixed encodings ───────────────────────────────────────

pub(crate) fn encode_push_pop(buf: &mut InstrBuf, base: u8, reg: Reg) -> Result<(), AsmError> {
    if reg.size() != OpSize::Qword {
        return Err(invalid("push/pop require a 64-bit register"));
    }
    if reg.is_extended() {
        buf.push(rex(false, false, false, true));
    }
    buf.push(base + reg.base_code());
    Ok(())
}

// ─── VEX (AVX) emission ─────────────────────────────────────────────────

pub(crate) const MAP_0F: u8 = 0b00001;
pub(crate) const MAP_0F3A: u8 = 0b00011;

fn vex_pp(prefix: u8) -> u8 {
    match prefix {
        0x66 => 0b01,
        0xF3 => 0b10,
        0xF2 => 0b11,
        _ => 0b00,
    }
}

/// Emit the 3-byte VEX prefix `C4 [R̄ X̄ B̄ mmmmm] [W v̄vvv L pp]`.
///
/// The 2-byte `C5` form is never produced; the reference encoder emits
/// `C4` unconditionally and the golden vectors pin that choice.
fn emit_vex3(
    buf: &mut InstrBuf,
    r: bool,
    x: bool,
    b: bool,
    map: u8,
    w: bool,
    vvvv: u8,
    l: bool,
    pp: u8,
) {
    buf.push(0xC4);
    buf.push(
        (if r { 0 } else { 0x80 }) | (if x { 0 } else { 0x40 }) | (if b { 0 } else { 0x20 })
            | (map & 0x1F),
    );
    buf.push((u8::from(w) << 7) | (((!vvvv) & 0x0F) << 3) | (u8::from(l) << 2) | (pp & 0x03));
}

/// VEX op with a register r/m: `reg` in ModR/M.reg, `rm` in ModR/M.r/m,
/// `vvvv` the second-source index (0 when absent — its complement is 1111).
pub(crate) fn encode_vex_rr(
    buf: &mut InstrBuf,
    map: u8,
    prefix: u8,
    opcode: u8,
    w: bool,
    l: bool,
    reg: Reg,
    vvvv: u8,
    rm: Reg,
) {
    emit_vex3(
        buf,
        reg.is_extended(),
        false,
        rm.is_extended(),
        map,
        w,
        vvvv,
        l,
        vex_pp(prefix),
    );
    buf.push(opcode);
    buf.push(modrm(0b11, reg.base_code(), rm.base_code()));
}

/// VEX op with a memory r/m.
pub(crate) fn encode_vex_rm(
    buf: &mut InstrBuf,
    map: u8,
    prefix: u8,
    opcode: u8,
    w: bool,
    l: bool,
    reg: Reg,
    vvvv: u8,
    mem: &Mem,
) -> Result<Option<SlotRef>, AsmError> {
    validate_mem(mem)?;
    let (x, b) = mem_rex_xb(mem);
    emit_vex3(buf, reg.is_extended(), x, b, map, w, vvvv, l, vex_pp(prefix));
    buf.push(opcode);
    Ok(emit_mem_modrm(buf, reg.base_code(), mem))
}
