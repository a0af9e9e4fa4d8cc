//! Field-level comparison of routine records.
//!
//! Regression checks want "observably the same routine", which is looser
//! than byte equality: the constant pool may be permuted (as long as every
//! constant-load still fetches an equal value), and two position tables are
//! interchangeable when they assign the same line to every byte offset.
//! Everything else must match exactly.

use stoat_vm_bytecode::{EXTENDED_ARG_BASE, Opcode, RoutineRecord};

use crate::decode::decode;
use crate::encode::{EncodeOptions, encode_with};
use crate::error::AsmResult;
use crate::linetable;

/// One field that differs between two records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    /// Name of the differing record field
    pub field: &'static str,
    /// Rendered value from the left record
    pub left: String,
    /// Rendered value from the right record
    pub right: String,
}

impl FieldDiff {
    fn new(field: &'static str, left: impl std::fmt::Debug, right: impl std::fmt::Debug) -> Self {
        Self {
            field,
            left: format!("{left:?}"),
            right: format!("{right:?}"),
        }
    }
}

/// Compare two records field by field, returning every observable
/// difference. An empty result means the records load identically.
pub fn compare_records(a: &RoutineRecord, b: &RoutineRecord) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();

    if a.arg_count != b.arg_count {
        diffs.push(FieldDiff::new("arg_count", a.arg_count, b.arg_count));
    }
    if a.stack_size != b.stack_size {
        diffs.push(FieldDiff::new("stack_size", a.stack_size, b.stack_size));
    }
    if a.flags != b.flags {
        diffs.push(FieldDiff::new("flags", a.flags, b.flags));
    }
    if a.name != b.name {
        diffs.push(FieldDiff::new("name", &a.name, &b.name));
    }
    if a.filename != b.filename {
        diffs.push(FieldDiff::new("filename", &a.filename, &b.filename));
    }
    if a.first_line != b.first_line {
        diffs.push(FieldDiff::new("first_line", a.first_line, b.first_line));
    }
    if a.names != b.names {
        diffs.push(FieldDiff::new("names", &a.names, &b.names));
    }
    if a.local_names != b.local_names {
        diffs.push(FieldDiff::new("local_names", &a.local_names, &b.local_names));
    }
    if a.cell_names != b.cell_names {
        diffs.push(FieldDiff::new("cell_names", &a.cell_names, &b.cell_names));
    }
    if a.free_names != b.free_names {
        diffs.push(FieldDiff::new("free_names", &a.free_names, &b.free_names));
    }

    let streams_equivalent = code_equivalent(a, b);
    if !streams_equivalent {
        diffs.push(FieldDiff::new("code", &a.code, &b.code));
    }
    // a permuted pool is harmless only while the streams agree about what
    // every constant load fetches
    if a.consts != b.consts && !streams_equivalent {
        diffs.push(FieldDiff::new("consts", &a.consts, &b.consts));
    }

    if !line_tables_equivalent(a, b) {
        diffs.push(FieldDiff::new("line_table", &a.line_table, &b.line_table));
    }

    diffs
}

/// Decode, re-encode in compatibility mode, and report what changed.
///
/// The reference regression harness for this format: an empty result means
/// the round trip reproduced the routine.
pub fn verify_roundtrip(record: &RoutineRecord, is_function: bool) -> AsmResult<Vec<FieldDiff>> {
    let routine = decode(record, is_function)?;
    let reencoded = encode_with(&routine, &EncodeOptions { compat: true })?;
    Ok(compare_records(record, &reencoded))
}

// Streams are equivalent when they decode to the same (opcode, operand)
// sequence, comparing constant loads by the value they fetch rather than by
// slot number.
fn code_equivalent(a: &RoutineRecord, b: &RoutineRecord) -> bool {
    match (scan(&a.code), scan(&b.code)) {
        (Some(left), Some(right)) => {
            left.len() == right.len()
                && left.iter().zip(&right).all(|(x, y)| {
                    if x.0 != y.0 {
                        return false;
                    }
                    if x.0 == Opcode::LoadConst {
                        let (Some(i), Some(j)) = (x.1, y.1) else {
                            return false;
                        };
                        match (a.consts.get(i as usize), b.consts.get(j as usize)) {
                            (Some(ca), Some(cb)) => ca == cb,
                            _ => false,
                        }
                    } else {
                        x.1 == y.1
                    }
                })
        }
        _ => a.code == b.code,
    }
}

// Light scan of a stream into (opcode, operand) pairs with wide prefixes
// folded; returns None on any malformed input so the caller falls back to
// byte comparison.
fn scan(code: &[u8]) -> Option<Vec<(Opcode, Option<u32>)>> {
    let mut out = Vec::new();
    let mut i = 0usize;
    let mut extended: u64 = 0;
    while i < code.len() {
        let opcode = Opcode::from_byte(code[i])?;
        i += 1;
        if !opcode.has_operand() {
            out.push((opcode, None));
            continue;
        }
        if i + 2 > code.len() {
            return None;
        }
        let raw = code[i] as u64 + code[i + 1] as u64 * 256 + extended;
        extended = 0;
        i += 2;
        if opcode == Opcode::ExtendedArg {
            extended = raw * EXTENDED_ARG_BASE as u64;
            continue;
        }
        out.push((opcode, Some(u32::try_from(raw).ok()?)));
    }
    Some(out)
}

fn line_tables_equivalent(a: &RoutineRecord, b: &RoutineRecord) -> bool {
    if a.line_table == b.line_table {
        return true;
    }
    if a.code.len() == b.code.len() {
        return linetable::line_map(&a.line_table, a.code.len())
            == linetable::line_map(&b.line_table, b.code.len());
    }
    linetable::simplified(&a.line_table) == linetable::simplified(&b.line_table)
}
