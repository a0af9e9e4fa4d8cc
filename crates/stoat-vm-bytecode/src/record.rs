//! The binary routine record exchanged with the loader

use std::io::{Read, Write};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::constant::Constant;
use crate::error::{BytecodeError, Result};
use crate::{RECORD_MAGIC, RECORD_VERSION};

/// One routine in the loader's binary layout.
///
/// This is the shape the live-routine introspection hook returns and the
/// shape the assembler emits: an instruction byte stream plus the side
/// tables the stream's operands index into. The record is inert data; the
/// editable form is [`crate::Routine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineRecord {
    /// Declared-parameter count (excluding vararg/kwarg slots)
    pub arg_count: u32,
    /// Maximum operand-stack depth the loader must reserve
    pub stack_size: u32,
    /// Raw flag bits
    pub flags: u32,
    /// Instruction byte stream
    pub code: Vec<u8>,
    /// Constant pool, in slot order
    pub consts: Vec<Rc<Constant>>,
    /// Name table (globals, attributes, imports), in slot order
    pub names: Vec<String>,
    /// Local-slot names, parameters first
    pub local_names: Vec<String>,
    /// Cell-variable names, sorted
    pub cell_names: Vec<String>,
    /// Free-variable names, sorted
    pub free_names: Vec<String>,
    /// Source file, for diagnostics
    pub filename: String,
    /// Routine name, for diagnostics
    pub name: String,
    /// Source line of the routine header
    pub first_line: u32,
    /// Delta-compressed source-position table
    pub line_table: Vec<u8>,
}

impl RoutineRecord {
    /// Serialize the record to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();

        bytes.extend_from_slice(&RECORD_MAGIC);
        bytes.extend_from_slice(&RECORD_VERSION.to_le_bytes());

        let body = serialize_body(self)?;
        bytes.extend_from_slice(&(body.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&body);

        Ok(bytes)
    }

    /// Deserialize a record from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            return Err(BytecodeError::UnexpectedEnd);
        }

        if bytes[0..8] != RECORD_MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }

        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[8..12]);
        let version = u32::from_le_bytes(word);
        if version != RECORD_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }

        word.copy_from_slice(&bytes[12..16]);
        let body_len = u32::from_le_bytes(word) as usize;
        if bytes.len() < 16 + body_len {
            return Err(BytecodeError::UnexpectedEnd);
        }

        deserialize_body(&bytes[16..16 + body_len])
    }

    /// Write the record to a writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Read a record from a reader
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }
}

// Body serialization goes through serde_json; the framing above carries the
// magic and version so stale caches are rejected before any parsing happens.
fn serialize_body<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        BytecodeError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        ))
    })
}

fn deserialize_body<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        BytecodeError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        ))
    })
}
