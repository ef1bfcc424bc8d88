//! Error types for encoding diagnostics.

use alloc::string::String;
use core::fmt;

/// Assembly error with a descriptive payload.
///
/// Every variant is a misuse category: the assembler owns no external
/// resources, so an error aborts the enclosing compilation attempt and the
/// builder is discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AsmError {
    /// Invalid operand combination for the instruction.
    InvalidOperands {
        /// Description of why the operands are invalid.
        detail: String,
    },

    /// Immediate value exceeds the allowed range for the selected form.
    ImmediateOverflow {
        /// The immediate value that overflowed.
        value: i64,
        /// Minimum allowed value.
        min: i64,
        /// Maximum allowed value.
        max: i64,
    },

    /// A label was referenced but never defined before `finalize()`.
    UndefinedLabel {
        /// The 1-based label id (`.L1`, `.L2`, …).
        label: u32,
    },

    /// `set_label` was called twice on the same handle.
    DuplicateLabel {
        /// The 1-based label id.
        label: u32,
    },

    /// A resolved displacement does not fit in a signed 32-bit field.
    DispOutOfRange {
        /// The displacement that overflowed.
        disp: i64,
    },
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmError::InvalidOperands { detail } => {
                write!(f, "invalid operand combination: {}", detail)
            }
            AsmError::ImmediateOverflow { value, min, max } => {
                write!(
                    f,
                    "immediate value {} out of range [{}..{}]",
                    value, min, max
                )
            }
            AsmError::UndefinedLabel { label } => {
                write!(f, "undefined label '.L{}'", label)
            }
            AsmError::DuplicateLabel { label } => {
                write!(f, "label '.L{}' is already defined", label)
            }
            AsmError::DispOutOfRange { disp } => {
                write!(f, "displacement {} does not fit in 32 bits", disp)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for AsmError {}
