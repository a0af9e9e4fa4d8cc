//! Assembler and disassembler errors

use stoat_vm_bytecode::{Label, Opcode};
use thiserror::Error;

/// Errors that can occur while decoding or encoding a routine.
///
/// All of these are fatal: decode/encode either fully succeeds or fails
/// atomically with no partially built output.
#[derive(Debug, Error)]
pub enum AsmError {
    /// The instruction stream is not valid for the configured opcode table
    #[error("malformed instruction stream at byte {offset}: {reason}")]
    MalformedInput {
        /// Byte offset of the offending data
        offset: usize,
        /// What was wrong at that offset
        reason: String,
    },

    /// A jump references a label that never appears in the routine body
    #[error("instruction {index} jumps to label {} which is not in the routine", .label.id())]
    DanglingReference {
        /// Body index of the jump instruction
        index: usize,
        /// The missing label
        label: Label,
    },

    /// An operand cannot be represented even with wide-operand prefixing
    #[error("instruction {index} has operand {value} outside the encodable range")]
    UnencodableMagnitude {
        /// Body index of the instruction
        index: usize,
        /// The unrepresentable value
        value: i64,
    },

    /// The stack-depth analyzer has no effect entry for an opcode
    #[error("no stack effect is known for opcode {}", .opcode.name())]
    UnknownOpcode {
        /// The uncovered opcode
        opcode: Opcode,
    },

    /// An operand's variant does not match its opcode's operand category
    #[error("instruction {index} ({}) carries an operand of the wrong kind", .opcode.name())]
    OperandMismatch {
        /// Body index of the instruction
        index: usize,
        /// The instruction's opcode
        opcode: Opcode,
    },
}

/// Result type for assembler operations
pub type AsmResult<T> = std::result::Result<T, AsmError>;
