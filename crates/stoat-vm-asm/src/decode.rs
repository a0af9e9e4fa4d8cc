//! Disassembler: binary routine records into editable routines

use std::rc::Rc;

use rustc_hash::FxHashMap;
use stoat_vm_bytecode::{
    ClosureKind, EXTENDED_ARG_BASE, Instruction, Item, Label, Opcode, Operand, OperandKind,
    Routine, RoutineRecord,
};

use crate::error::{AsmError, AsmResult};
use crate::linetable;

/// Singleton names the reference loader adds to the name table even when no
/// lookup by that name occurs; their positions are recorded as hints so
/// compatibility-mode encode can reproduce the table byte for byte.
const HINTED_SINGLETON_NAMES: [&str; 5] = ["True", "False", "None", "NotImplemented", "Ellipsis"];

/// Decode a binary routine record into its editable form.
///
/// `is_function` tells the decoder whether pool slot 0 is the routine's
/// documentation constant; the record itself does not distinguish function
/// bodies from module or class bodies.
///
/// The returned body is in stream order, with every jump target materialized
/// as a label at the offset it is jumped to. Multiple jumps to one offset
/// share a single label.
pub fn decode(record: &RoutineRecord, is_function: bool) -> AsmResult<Routine> {
    let mut routine = Routine::new(record.name.clone(), record.filename.clone());
    routine.flags = record.flags;
    routine.first_line = record.first_line;
    routine.param_names = declared_params(record);
    if is_function && !record.consts.is_empty() {
        routine.docstring = Some(Rc::clone(&record.consts[0]));
    }
    for singleton in HINTED_SINGLETON_NAMES {
        if let Some(idx) = record.names.iter().position(|name| name == singleton) {
            let after = if idx == 0 {
                None
            } else {
                Some(record.names[idx - 1].clone())
            };
            routine.name_table_hints.insert(singleton.to_string(), after);
        }
    }

    let items = {
        let mut labels = routine_labels(&mut routine);
        decode_items(record, &mut labels)?
    };
    routine.items = items;
    Ok(routine)
}

// Adapter so label allocation during the scan goes through the routine's
// own counter and stays unique for labels created after decoding.
struct LabelSource<'a> {
    routine: &'a mut Routine,
    by_offset: FxHashMap<usize, Label>,
}

impl LabelSource<'_> {
    fn at_offset(&mut self, offset: usize) -> Label {
        *self
            .by_offset
            .entry(offset)
            .or_insert_with(|| self.routine.new_label())
    }
}

fn routine_labels(routine: &mut Routine) -> LabelSource<'_> {
    LabelSource {
        routine,
        by_offset: FxHashMap::default(),
    }
}

fn declared_params(record: &RoutineRecord) -> Vec<String> {
    let mut count = record.arg_count as usize;
    if record.flags & Routine::FLAG_VARARGS != 0 {
        count += 1;
    }
    if record.flags & Routine::FLAG_VARKEYWORDS != 0 {
        count += 1;
    }
    record.local_names.iter().take(count).cloned().collect()
}

fn decode_items(record: &RoutineRecord, labels: &mut LabelSource<'_>) -> AsmResult<Vec<Item>> {
    let code = &record.code;
    let lines = linetable::line_map(&record.line_table, code.len());

    // instructions keyed by their end offset; labels keyed by target offset
    let mut decoded: Vec<(usize, Instruction)> = Vec::new();

    let mut i = 0usize;
    let mut extended: u64 = 0;
    while i < code.len() {
        let opcode_offset = i;
        let byte = code[i];
        let opcode = Opcode::from_byte(byte).ok_or_else(|| AsmError::MalformedInput {
            offset: opcode_offset,
            reason: format!("unrecognized opcode {byte:#04x}"),
        })?;
        let line = lines[opcode_offset];
        i += 1;

        let operand = if let Some(kind) = opcode.operand_kind() {
            if i + 2 > code.len() {
                return Err(AsmError::MalformedInput {
                    offset: opcode_offset,
                    reason: format!("truncated operand for {}", opcode.name()),
                });
            }
            let raw_wide = code[i] as u64 + code[i + 1] as u64 * 256 + extended;
            extended = 0;
            i += 2;

            if opcode == Opcode::ExtendedArg {
                // fold into the next instruction's operand; the prefix itself
                // is regenerated at encode time and never appears in the body
                extended = raw_wide * EXTENDED_ARG_BASE as u64;
                continue;
            }

            let raw = u32::try_from(raw_wide).map_err(|_| AsmError::MalformedInput {
                offset: opcode_offset,
                reason: format!("operand {raw_wide} exceeds the 32-bit range"),
            })?;
            resolve_operand(record, labels, kind, raw, opcode_offset, i)?
        } else {
            Operand::None
        };

        decoded.push((i, Instruction::with_line(opcode, operand, line)));
    }

    // Merge to body order: sort by offset, instructions before labels on
    // ties, so a label lands right before the instruction it targets.
    let mut entries: Vec<(usize, u8, Item)> = decoded
        .into_iter()
        .map(|(end, inst)| (end, 0u8, Item::Inst(inst)))
        .chain(
            labels
                .by_offset
                .iter()
                .map(|(&target, &label)| (target, 1u8, Item::Label(label))),
        )
        .collect();
    entries.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    Ok(entries.into_iter().map(|(_, _, item)| item).collect())
}

fn resolve_operand(
    record: &RoutineRecord,
    labels: &mut LabelSource<'_>,
    kind: OperandKind,
    raw: u32,
    opcode_offset: usize,
    next_offset: usize,
) -> AsmResult<Operand> {
    let out_of_range = |table: &str| AsmError::MalformedInput {
        offset: opcode_offset,
        reason: format!("{table} index {raw} out of range"),
    };

    let operand = match kind {
        OperandKind::Plain | OperandKind::Compare => Operand::Raw(raw),
        OperandKind::Const => {
            let value = record
                .consts
                .get(raw as usize)
                .ok_or_else(|| out_of_range("constant pool"))?;
            Operand::Const(Rc::clone(value))
        }
        OperandKind::Name => {
            let name = record
                .names
                .get(raw as usize)
                .ok_or_else(|| out_of_range("name table"))?;
            Operand::Name(name.clone())
        }
        OperandKind::Local => {
            let name = record
                .local_names
                .get(raw as usize)
                .ok_or_else(|| out_of_range("local-slot table"))?;
            Operand::Local(name.clone())
        }
        OperandKind::ClosureVar => {
            // one combined index space: cell slots first, then free slots
            let index = raw as usize;
            if let Some(name) = record.cell_names.get(index) {
                Operand::Closure(name.clone(), ClosureKind::Cell)
            } else {
                let name = record
                    .free_names
                    .get(index - record.cell_names.len())
                    .ok_or_else(|| out_of_range("closure-variable table"))?;
                Operand::Closure(name.clone(), ClosureKind::Free)
            }
        }
        OperandKind::RelativeJump => Operand::Jump(labels.at_offset(next_offset + raw as usize)),
        OperandKind::AbsoluteJump => Operand::Jump(labels.at_offset(raw as usize)),
    };
    Ok(operand)
}
