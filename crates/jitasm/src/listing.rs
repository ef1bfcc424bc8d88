//! Optional assembly listing.
//!
//! The text mirrors the reference JIT's log format: one leading space, the
//! mnemonic left-padded to a 12-column field, operands comma-separated with
//! no spaces, labels as `.Ln`, hex immediates uppercase with a trailing `h`.
//! Constant-pool references print as `[.start-N]`; their offsets are only
//! known once the pool is laid out, so the buffer stores them as chunks
//! resolved during `finalize()`.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use crate::operand::{Label, Mem, Operand};

enum Chunk {
    Text(String),
    ConstRef { slot: u32 },
}

#[derive(Default)]
pub(crate) struct Listing {
    chunks: Vec<Chunk>,
}

impl Listing {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push_str(&mut self, s: &str) {
        if let Some(Chunk::Text(t)) = self.chunks.last_mut() {
            t.push_str(s);
        } else {
            self.chunks.push(Chunk::Text(String::from(s)));
        }
    }

    /// Log one instruction line.
    pub(crate) fn instr(&mut self, mnemonic: &str, ops: &[Operand]) {
        if ops.is_empty() {
            self.push_str(&format!(" {}\n", mnemonic));
            return;
        }
        self.push_str(&format!(" {:<12}", mnemonic));
        for (i, op) in ops.iter().enumerate() {
            if i > 0 {
                self.push_str(",");
            }
            self.operand(op);
        }
        self.push_str("\n");
    }

    /// Log a label definition site.
    pub(crate) fn label_def(&mut self, label: Label) {
        self.push_str(&format!(".L{}:\n", label.id()));
    }

    fn operand(&mut self, op: &Operand) {
        match op {
            Operand::Reg(r) => self.push_str(&format!("{}", r)),
            Operand::Imm(v) => self.push_str(&imm_text(*v)),
            Operand::Label(l) => self.push_str(&format!(".L{}", l.id())),
            Operand::Mem(m) => self.mem(m),
        }
    }

    fn mem(&mut self, mem: &Mem) {
        self.push_str(&format!("{} ptr [", mem.size().ptr_name()));
        if let Some(slot) = mem.slot {
            self.chunks.push(Chunk::ConstRef { slot });
            self.push_str("]");
            return;
        }
        let mut body = String::new();
        if let Some(base) = mem.addr.base {
            let _ = write!(body, "{}", base);
        }
        if let Some(index) = mem.addr.index {
            if !body.is_empty() {
                body.push('+');
            }
            let _ = write!(body, "{}", index);
            if mem.addr.scale != 1 {
                let _ = write!(body, "*{}", mem.addr.scale);
            }
        }
        let disp = mem.addr.disp;
        if disp != 0 || body.is_empty() {
            if !body.is_empty() {
                body.push(if disp < 0 { '-' } else { '+' });
            }
            body.push_str(&disp_text(i64::from(disp).unsigned_abs()));
        }
        self.push_str(&body);
        self.push_str("]");
    }

    /// Produce the final text, resolving constant references against the
    /// laid-out pool.
    pub(crate) fn render(&self, offsets: &[u32], data_len: usize) -> String {
        let mut out = String::new();
        for chunk in &self.chunks {
            match chunk {
                Chunk::Text(t) => out.push_str(t),
                Chunk::ConstRef { slot } => {
                    let n = data_len as u64 - u64::from(offsets[*slot as usize]);
                    let _ = write!(out, ".start-{}", n);
                }
            }
        }
        out
    }
}

/// Immediate: 0..=9 decimal, otherwise uppercase hex with a trailing `h`
/// and a leading `0` when the first digit is alphabetic. Negative values
/// print their 64-bit two's complement, assembler-style.
fn imm_text(value: i64) -> String {
    if (0..=9).contains(&value) {
        return format!("{}", value);
    }
    let hex = format!("{:X}", value as u64);
    if hex.as_bytes()[0].is_ascii_alphabetic() {
        format!("0{}h", hex)
    } else {
        format!("{}h", hex)
    }
}

/// Memory displacement magnitude: 0..=9 decimal, otherwise hex with an
/// unconditional leading `0` (`0Ch`, `01Ch`), as the reference prints it.
fn disp_text(value: u64) -> String {
    if value <= 9 {
        format!("{}", value)
    } else {
        format!("0{:X}h", value)
    }
}
