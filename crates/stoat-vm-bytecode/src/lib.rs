//! # Stoat VM Bytecode
//!
//! This crate defines the bytecode format for the Stoat stack virtual
//! machine: the opcode table, the editable instruction model, constant
//! values, and the binary routine record the loader consumes.
//!
//! ## Design Principles
//!
//! - **Stack-based**: operands live on an evaluation stack; each opcode's
//!   16-bit operand indexes a side table or encodes a jump distance
//! - **Identity-aware**: the constant pool keys slots by object identity,
//!   never by equality, so equal-but-distinct constants keep their slots
//! - **Round-trippable**: everything a loader header carries survives a
//!   decode/edit/encode cycle byte for byte
//! - **Serializable**: records can be cached to disk for fast startup

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod constant;
pub mod error;
pub mod instruction;
pub mod opcode;
pub mod record;
pub mod routine;

pub use constant::{Constant, ConstantPool};
pub use error::BytecodeError;
pub use instruction::{ClosureKind, Instruction, Item, Label, Operand};
pub use opcode::{EXTENDED_ARG_BASE, OPERAND_THRESHOLD, Opcode, OperandKind};
pub use record::RoutineRecord;
pub use routine::{Routine, RoutineBuilder};

/// Record format version
pub const RECORD_VERSION: u32 = 1;

/// Magic bytes for cached record files
pub const RECORD_MAGIC: [u8; 8] = *b"STOATBC\0";
