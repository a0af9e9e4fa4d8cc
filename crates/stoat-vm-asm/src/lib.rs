//! # Stoat VM Assembler
//!
//! Round-trip assembler and disassembler for Stoat VM bytecode: the
//! [`decode`] pass turns a binary routine record into an editable body of
//! instructions and jump labels, and the [`encode`] pass turns an edited
//! body back into the exact binary layout the loader expects, deriving the
//! side tables, the position table, and the declared stack depth on the way.
//!
//! Neither pass interprets the bytecode; they only transform between the
//! binary and structured representations while preserving execution
//! semantics exactly.
//!
//! ## Example
//!
//! ```
//! use std::rc::Rc;
//! use stoat_vm_asm::{decode, encode};
//! use stoat_vm_bytecode::{Constant, Instruction, Opcode, Operand, Routine};
//!
//! let routine = Routine::builder("answer")
//!     .item(Instruction::new(
//!         Opcode::LoadConst,
//!         Operand::Const(Rc::new(Constant::int(42))),
//!     ))
//!     .item(Instruction::new(Opcode::ReturnValue, Operand::None))
//!     .build();
//!
//! let record = encode(&routine).unwrap();
//! assert_eq!(record.stack_size, 1);
//!
//! let reloaded = decode(&record, false).unwrap();
//! assert_eq!(reloaded.items, routine.items);
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod compare;
pub mod decode;
pub mod depth;
pub mod encode;
pub mod error;
pub mod linetable;

pub use compare::{FieldDiff, compare_records, verify_roundtrip};
pub use decode::decode;
pub use depth::max_stack_depth;
pub use encode::{EncodeOptions, encode, encode_with};
pub use error::{AsmError, AsmResult};
