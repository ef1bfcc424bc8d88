//! # jitasm — In-memory x86-64 Assembler for JIT Backends
//!
//! `jitasm` is a pure Rust, zero-C-dependency runtime assembler that turns
//! typed instruction calls into machine-code bytes. A JIT compiler backend
//! drives it one instruction at a time and receives a `code` buffer, a
//! deduplicated, aligned constant pool (`data`) exposed through RIP-relative
//! operands, and — when enabled — a textual listing of everything emitted.
//!
//! ## Quick Start
//!
//! ```rust
//! use jitasm::{qword, Assembler, Condition, RDI, RSI};
//!
//! let mut asm = Assembler::new();
//! let start = asm.set_label_here();
//! asm.add(RSI, 1).unwrap();
//! asm.cmp(RSI, RDI).unwrap();
//! asm.jcc(Condition::Equal, start).unwrap();
//! let out = asm.finalize().unwrap();
//! assert_eq!(
//!     out.code,
//!     vec![0x48, 0x83, 0xC6, 0x01, 0x48, 0x3B, 0xF7, 0x0F, 0x84, 0xF3, 0xFF, 0xFF, 0xFF]
//! );
//! ```
//!
//! ## Features
//!
//! - **Pure Rust** — no C/C++ FFI, no LLVM, no system assembler at runtime.
//! - **`no_std` + `alloc`** — embeddable; the default `std` feature only
//!   adds `std::error::Error` impls.
//! - **Labels & forward references** — 32-bit slots patched at definition
//!   or finalize.
//! - **Constant pool** — interned, deduplicated, alignment-exact literals
//!   addressed RIP-relatively.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
// ── Lint policy ─────────────────────────────────────────────────────────
// An instruction encoder intentionally performs many narrowing casts
// between integer widths (i64→u8, usize→u32) and uses dense hex literals
// without separators (0xABAB, 0x0F3A). The lints below are expected and
// acceptable in this context.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::cast_possible_wrap,
    clippy::unreadable_literal,
    clippy::too_many_arguments,
    clippy::missing_errors_doc,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::uninlined_format_args,
    clippy::match_same_arms
)]

extern crate alloc;

/// The assembler object, instruction methods and finalized output.
pub mod builder;
/// Encoding primitives (REX, VEX, ModR/M, SIB, immediates).
pub(crate) mod encoder;
/// Error types.
pub mod error;
/// Optional text listing.
pub(crate) mod listing;
/// Registers, memory operands, immediates, labels, conditions.
pub mod operand;
/// Constant pool interning and layout.
pub(crate) mod pool;

pub use builder::{Assembler, Assembly};
pub use error::AsmError;
pub use operand::*;
