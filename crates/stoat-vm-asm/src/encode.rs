//! Assembler: editable routines into binary routine records.
//!
//! Encoding is a fixed-point layout problem: an instruction's width depends
//! on whether its operand needs a wide prefix, jump operands depend on byte
//! offsets, and byte offsets depend on every width before them. The solver
//! iterates layout with widths that only ever grow, so each pass either
//! reaches a fixed point or widens at least one instruction; termination is
//! structural, not a tuned iteration cap.

use rustc_hash::FxHashMap;
use stoat_vm_bytecode::{
    ClosureKind, ConstantPool, Item, Label, Opcode, Operand, OperandKind, Routine, RoutineRecord,
};

use crate::depth;
use crate::error::{AsmError, AsmResult};
use crate::linetable::LineTableBuilder;

/// Options for one encode pass.
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    /// Reproduce the reference loader's output byte for byte, including its
    /// quirks: hinted singleton names are inserted into the name table even
    /// when nothing references them, and an iterator routine whose position
    /// table would be empty gets the loader's placeholder entry.
    pub compat: bool,
}

/// Encode a routine with default options.
pub fn encode(routine: &Routine) -> AsmResult<RoutineRecord> {
    encode_with(routine, &EncodeOptions::default())
}

/// Encode a routine into the loader's binary record.
///
/// The routine is read-only; all side tables are derived fresh. Decoding the
/// result yields a body observably equivalent to the input.
pub fn encode_with(routine: &Routine, options: &EncodeOptions) -> AsmResult<RoutineRecord> {
    let mut tables = Tables::collect(routine)?;
    if options.compat {
        tables.insert_hinted_names(routine);
    }
    let resolved = tables.resolve_static_operands(routine)?;
    let layout = Layout::solve(&routine.items, &resolved);
    let (code, mut line_table) = emit(routine, &resolved, &layout)?;

    if options.compat
        && line_table.is_empty()
        && routine
            .instructions()
            .any(|inst| inst.opcode == Opcode::ForIter)
    {
        // the reference loader always emits a nonempty position table for
        // single-line iterator bodies
        line_table = vec![6, 0];
    }

    let stack_size = depth::max_stack_depth(routine)?;

    Ok(RoutineRecord {
        arg_count: routine.declared_param_count() as u32,
        stack_size,
        flags: routine.flags,
        code,
        consts: tables.consts.into_values(),
        names: tables.names,
        local_names: tables.locals,
        cell_names: tables.cells,
        free_names: tables.frees,
        filename: routine.filename.clone(),
        name: routine.name.clone(),
        first_line: routine.first_line,
        line_table,
    })
}

/// Side tables under construction during one encode pass.
struct Tables {
    consts: ConstantPool,
    names: Vec<String>,
    locals: Vec<String>,
    cells: Vec<String>,
    frees: Vec<String>,
}

impl Tables {
    /// Walk the body once: validate each operand against its opcode's
    /// category and grow the tables. Cell and free tables are sorted
    /// afterwards to match the loader's layout rule, so first-use order
    /// never reaches the emitted indices.
    fn collect(routine: &Routine) -> AsmResult<Self> {
        let mut consts = ConstantPool::new();
        if let Some(doc) = &routine.docstring {
            consts.add(doc);
        }

        let mut tables = Self {
            consts,
            names: Vec::new(),
            locals: routine.param_names.clone(),
            cells: Vec::new(),
            frees: Vec::new(),
        };

        for (index, item) in routine.items.iter().enumerate() {
            let Item::Inst(inst) = item else {
                continue;
            };
            let mismatch = AsmError::OperandMismatch {
                index,
                opcode: inst.opcode,
            };
            match (inst.opcode.operand_kind(), &inst.operand) {
                (None, Operand::None) => {}
                (Some(OperandKind::Plain | OperandKind::Compare), Operand::Raw(_)) => {}
                (Some(OperandKind::Const), Operand::Const(value)) => {
                    tables.consts.add(value);
                }
                (Some(OperandKind::Name), Operand::Name(name)) => {
                    get_or_add(&mut tables.names, name);
                }
                (Some(OperandKind::Local), Operand::Local(name)) => {
                    get_or_add(&mut tables.locals, name);
                }
                (Some(OperandKind::ClosureVar), Operand::Closure(name, kind)) => {
                    match kind {
                        ClosureKind::Cell => get_or_add(&mut tables.cells, name),
                        ClosureKind::Free => get_or_add(&mut tables.frees, name),
                    };
                }
                (
                    Some(OperandKind::RelativeJump | OperandKind::AbsoluteJump),
                    Operand::Jump(_),
                ) => {}
                _ => return Err(mismatch),
            }
        }

        tables.cells.sort();
        tables.frees.sort();
        Ok(tables)
    }

    /// Insert hinted singleton names at their recorded positions: at the
    /// table front when no predecessor was recorded, otherwise right after
    /// the predecessor. A hint whose predecessor never shows up is skipped
    /// silently. Hints are retried until none applies, so a hint whose
    /// predecessor is itself hinted lands correctly regardless of map order.
    fn insert_hinted_names(&mut self, routine: &Routine) {
        let mut pending: Vec<(&String, &Option<String>)> =
            routine.name_table_hints.iter().collect();
        pending.sort_by(|a, b| a.0.cmp(b.0));
        pending.retain(|(name, _)| !self.names.iter().any(|n| n == *name));

        loop {
            let mut inserted_any = false;
            pending.retain(|&(name, after)| {
                match after {
                    None => {
                        self.names.insert(0, name.clone());
                        inserted_any = true;
                        false
                    }
                    Some(previous) => match self.names.iter().position(|n| n == previous) {
                        Some(pos) => {
                            self.names.insert(pos + 1, name.clone());
                            inserted_any = true;
                            false
                        }
                        None => true,
                    },
                }
            });
            if !inserted_any {
                break;
            }
        }
    }

    /// Materialize every non-jump operand to its final table index. Runs
    /// after sorting and hint insertion, so all positions are final; jump
    /// operands stay unresolved for the layout solver.
    fn resolve_static_operands(&mut self, routine: &Routine) -> AsmResult<Vec<Option<u32>>> {
        routine
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let Item::Inst(inst) = item else {
                    return Ok(None);
                };
                let slot = match &inst.operand {
                    Operand::None | Operand::Jump(_) => return Ok(None),
                    Operand::Raw(value) => return Ok(Some(*value)),
                    Operand::Const(value) => self.consts.add(value) as usize,
                    Operand::Name(name) => get_or_add(&mut self.names, name),
                    Operand::Local(name) => get_or_add(&mut self.locals, name),
                    Operand::Closure(name, ClosureKind::Cell) => get_or_add(&mut self.cells, name),
                    Operand::Closure(name, ClosureKind::Free) => {
                        self.cells.len() + get_or_add(&mut self.frees, name)
                    }
                };
                let value = u32::try_from(slot).map_err(|_| AsmError::UnencodableMagnitude {
                    index,
                    value: slot as i64,
                })?;
                Ok(Some(value))
            })
            .collect()
    }
}

fn get_or_add(list: &mut Vec<String>, name: &str) -> usize {
    match list.iter().position(|entry| entry == name) {
        Some(index) => index,
        None => {
            list.push(name.to_string());
            list.len() - 1
        }
    }
}

/// Solved layout: every item's encoded width and every label's byte offset.
struct Layout {
    widths: Vec<u64>,
    label_offsets: FxHashMap<Label, u64>,
}

impl Layout {
    fn solve(items: &[Item], resolved: &[Option<u32>]) -> Self {
        let mut widths: Vec<u64> = items
            .iter()
            .map(|item| match item {
                Item::Label(_) => 0,
                Item::Inst(inst) => {
                    if inst.has_operand() {
                        3
                    } else {
                        1
                    }
                }
            })
            .collect();
        let mut label_offsets: FxHashMap<Label, u64> = FxHashMap::default();

        // Widths only ratchet upwards, so offsets grow monotonically and
        // every non-final pass widens something: the loop must terminate.
        loop {
            let mut changed = false;
            let mut offset = 0u64;

            for (index, item) in items.iter().enumerate() {
                match item {
                    Item::Label(label) => {
                        if label_offsets.insert(*label, offset) != Some(offset) {
                            changed = true;
                        }
                    }
                    Item::Inst(inst) => {
                        if inst.has_operand() {
                            let value = match &inst.operand {
                                Operand::Jump(label) => {
                                    // an unplaced label acts as offset zero until
                                    // a later pass pins it down
                                    let target =
                                        label_offsets.get(label).copied().unwrap_or(0);
                                    match inst.opcode.operand_kind() {
                                        Some(OperandKind::RelativeJump) => target
                                            .saturating_sub(offset + widths[index]),
                                        _ => target,
                                    }
                                }
                                _ => resolved[index].unwrap_or(0) as u64,
                            };
                            let needed = width_for(value);
                            if needed > widths[index] {
                                widths[index] = needed;
                                changed = true;
                            }
                        }
                        offset += widths[index];
                    }
                }
            }

            if !changed {
                break;
            }
        }

        Self {
            widths,
            label_offsets,
        }
    }
}

// Encoded width of an operand-carrying instruction: the opcode and its
// 16-bit operand, plus one three-byte wide prefix per extra 16-bit chunk.
fn width_for(value: u64) -> u64 {
    let mut width = 3;
    let mut rest = value >> 16;
    while rest > 0 {
        width += 3;
        rest >>= 16;
    }
    width
}

fn emit(
    routine: &Routine,
    resolved: &[Option<u32>],
    layout: &Layout,
) -> AsmResult<(Vec<u8>, Vec<u8>)> {
    let mut code: Vec<u8> = Vec::new();
    let mut lines = LineTableBuilder::new();
    let mut offset = 0u64;

    for (index, item) in routine.items.iter().enumerate() {
        let Item::Inst(inst) = item else {
            continue;
        };
        let start = u32::try_from(offset).map_err(|_| AsmError::UnencodableMagnitude {
            index,
            value: offset as i64,
        })?;
        lines.record(start, inst.line);

        if !inst.has_operand() {
            code.push(inst.opcode.to_byte());
            offset += 1;
            continue;
        }

        let width = layout.widths[index];
        let end = offset + width;
        let value = match &inst.operand {
            Operand::Jump(label) => {
                let target = layout.label_offsets.get(label).copied().ok_or(
                    AsmError::DanglingReference {
                        index,
                        label: *label,
                    },
                )?;
                match inst.opcode.operand_kind() {
                    Some(OperandKind::RelativeJump) => {
                        // relative distances count from the end of the whole
                        // encoded instruction, prefixes included
                        if target < end {
                            return Err(AsmError::UnencodableMagnitude {
                                index,
                                value: target as i64 - end as i64,
                            });
                        }
                        target - end
                    }
                    _ => target,
                }
            }
            _ => resolved[index].ok_or(AsmError::OperandMismatch {
                index,
                opcode: inst.opcode,
            })? as u64,
        };

        // the decoder bounds accumulated operands to 32 bits; anything wider
        // cannot survive a round trip no matter how many prefixes we emit
        if value > u32::MAX as u64 {
            return Err(AsmError::UnencodableMagnitude {
                index,
                value: value as i64,
            });
        }
        debug_assert!(width_for(value) <= width);

        let prefixes = (width - 3) / 3;
        for chunk_index in (1..=prefixes).rev() {
            let chunk = (value >> (16 * chunk_index)) & 0xFFFF;
            code.push(Opcode::ExtendedArg.to_byte());
            code.push((chunk & 0xFF) as u8);
            code.push((chunk >> 8) as u8);
        }
        code.push(inst.opcode.to_byte());
        code.push((value & 0xFF) as u8);
        code.push(((value >> 8) & 0xFF) as u8);
        offset = end;
    }

    Ok((code, lines.finish()))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::decode::decode;
    use proptest::prelude::*;
    use stoat_vm_bytecode::{ClosureKind, Constant, Instruction};

    fn inst(opcode: Opcode, operand: Operand) -> Item {
        Item::Inst(Instruction::new(opcode, operand))
    }

    /// Same body shape, label identities mapped structurally.
    fn assert_bodies_equivalent(left: &[Item], right: &[Item]) {
        assert_eq!(left.len(), right.len(), "body lengths differ");
        let mut mapping: FxHashMap<Label, Label> = FxHashMap::default();
        let mut check = |a: Label, b: Label| {
            let mapped = *mapping.entry(a).or_insert(b);
            assert_eq!(mapped, b, "label structure differs");
        };
        for (l, r) in left.iter().zip(right) {
            match (l, r) {
                (Item::Label(a), Item::Label(b)) => check(*a, *b),
                (Item::Inst(a), Item::Inst(b)) => {
                    assert_eq!(a.opcode, b.opcode);
                    assert_eq!(a.line, b.line);
                    match (&a.operand, &b.operand) {
                        (Operand::Jump(a), Operand::Jump(b)) => check(*a, *b),
                        (x, y) => assert_eq!(x, y),
                    }
                }
                _ => panic!("item kinds differ"),
            }
        }
    }

    #[test]
    fn test_two_parameter_add() {
        let routine = Routine::builder("add")
            .params(["a", "b"])
            .items(vec![
                inst(Opcode::LoadLocal, Operand::Local("a".into())),
                inst(Opcode::LoadLocal, Operand::Local("b".into())),
                inst(Opcode::BinaryAdd, Operand::None),
                inst(Opcode::ReturnValue, Operand::None),
            ])
            .build();

        let record = encode(&routine).unwrap();
        assert_eq!(record.stack_size, 2);
        assert_eq!(record.arg_count, 2);
        assert_eq!(record.local_names, vec!["a", "b"]);
        assert!(record.names.is_empty());
        assert!(record.consts.is_empty());
        assert!(record.line_table.is_empty());
        assert_eq!(
            record.code,
            vec![
                Opcode::LoadLocal.to_byte(),
                0,
                0,
                Opcode::LoadLocal.to_byte(),
                1,
                0,
                Opcode::BinaryAdd.to_byte(),
                Opcode::ReturnValue.to_byte(),
            ]
        );
    }

    #[test]
    fn test_docstring_seeds_pool_slot_zero() {
        let doc = Rc::new(Constant::str("adds things"));
        let other = Rc::new(Constant::int(2));
        let routine = Routine::builder("f")
            .docstring(Rc::clone(&doc))
            .items(vec![
                inst(Opcode::LoadConst, Operand::Const(Rc::clone(&other))),
                inst(Opcode::ReturnValue, Operand::None),
                inst(Opcode::LoadConst, Operand::Const(Rc::clone(&doc))),
            ])
            .build();

        let record = encode(&routine).unwrap();
        assert_eq!(record.consts.len(), 2);
        assert!(Rc::ptr_eq(&record.consts[0], &doc));
        assert!(Rc::ptr_eq(&record.consts[1], &other));
        // the doc-constant load reuses slot 0
        assert_eq!(record.code[4], Opcode::LoadConst.to_byte());
        assert_eq!(&record.code[5..7], &[0, 0]);
    }

    #[test]
    fn test_equal_constants_with_distinct_identity_keep_slots() {
        let int_one = Rc::new(Constant::int(1));
        let float_one = Rc::new(Constant::float(1.0));
        let routine = Routine::builder("f")
            .items(vec![
                inst(Opcode::LoadConst, Operand::Const(Rc::clone(&int_one))),
                inst(Opcode::LoadConst, Operand::Const(Rc::clone(&float_one))),
                inst(Opcode::LoadConst, Operand::Const(Rc::clone(&int_one))),
                inst(Opcode::ReturnValue, Operand::None),
            ])
            .build();

        let record = encode(&routine).unwrap();
        assert_eq!(record.consts.len(), 2);
        // first and third loads share slot 0; the float keeps its own slot
        assert_eq!(&record.code[1..3], &[0, 0]);
        assert_eq!(&record.code[4..6], &[1, 0]);
        assert_eq!(&record.code[7..9], &[0, 0]);
    }

    #[test]
    fn test_closure_tables_are_name_sorted() {
        let routine = Routine::builder("f")
            .items(vec![
                inst(
                    Opcode::LoadDeref,
                    Operand::Closure("zeta".into(), ClosureKind::Cell),
                ),
                inst(
                    Opcode::LoadDeref,
                    Operand::Closure("alpha".into(), ClosureKind::Cell),
                ),
                inst(
                    Opcode::LoadDeref,
                    Operand::Closure("mu".into(), ClosureKind::Free),
                ),
                inst(Opcode::ReturnValue, Operand::None),
            ])
            .build();

        let record = encode(&routine).unwrap();
        assert_eq!(record.cell_names, vec!["alpha", "zeta"]);
        assert_eq!(record.free_names, vec!["mu"]);
        // first-use order never leaks: zeta resolves to sorted slot 1,
        // alpha to 0, and the free variable follows the cell block
        assert_eq!(&record.code[1..3], &[1, 0]);
        assert_eq!(&record.code[4..6], &[0, 0]);
        assert_eq!(&record.code[7..9], &[2, 0]);
    }

    #[test]
    fn test_forward_jump_is_end_relative() {
        let mut routine = Routine::new("f", "<test>");
        let skip = routine.new_label();
        routine.items = vec![
            inst(Opcode::SetupLoop, Operand::Jump(skip)),
            inst(Opcode::PopTop, Operand::None),
            Item::Label(skip),
            inst(Opcode::ReturnValue, Operand::None),
        ];

        let record = encode(&routine).unwrap();
        // SetupLoop ends at 3, target offset 4, so the distance is 1
        assert_eq!(
            record.code,
            vec![
                Opcode::SetupLoop.to_byte(),
                1,
                0,
                Opcode::PopTop.to_byte(),
                Opcode::ReturnValue.to_byte(),
            ]
        );
    }

    #[test]
    fn test_backward_relative_jump_is_unencodable() {
        let mut routine = Routine::new("f", "<test>");
        let back = routine.new_label();
        routine.items = vec![
            Item::Label(back),
            inst(Opcode::PopTop, Operand::None),
            inst(Opcode::JumpForward, Operand::Jump(back)),
        ];
        assert!(matches!(
            encode(&routine),
            Err(AsmError::UnencodableMagnitude { index: 2, .. })
        ));
    }

    #[test]
    fn test_dangling_jump_label_fails() {
        let routine = Routine::builder("f")
            .item(Instruction::new(
                Opcode::JumpAbsolute,
                Operand::Jump(Label::new(41)),
            ))
            .build();
        assert!(matches!(
            encode(&routine),
            Err(AsmError::DanglingReference { index: 0, .. })
        ));
    }

    #[test]
    fn test_operand_kind_mismatch_fails() {
        let routine = Routine::builder("f")
            .item(Instruction::new(Opcode::LoadConst, Operand::Raw(0)))
            .build();
        assert!(matches!(
            encode(&routine),
            Err(AsmError::OperandMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn test_wide_raw_operands_roundtrip() {
        for magnitude in [0u32, 65535, 65536, 131071] {
            let routine = Routine::builder("f")
                .items(vec![
                    inst(Opcode::UnpackSequence, Operand::Raw(magnitude)),
                    inst(Opcode::ReturnValue, Operand::None),
                ])
                .build();

            let record = encode(&routine).unwrap();
            let needs_prefix = magnitude >= 65536;
            assert_eq!(
                record.code.len(),
                if needs_prefix { 7 } else { 4 },
                "unexpected width for {magnitude}"
            );

            let decoded = decode(&record, false).unwrap();
            let operand = decoded.instructions().next().unwrap().operand.clone();
            assert_eq!(operand, Operand::Raw(magnitude), "lost {magnitude}");
        }
    }

    #[test]
    fn test_wide_jump_reaches_fixed_point() {
        // enough single-byte filler that the jump target sits past the
        // 16-bit boundary and the jump itself needs a wide prefix
        let mut routine = Routine::new("f", "<test>");
        let target = routine.new_label();
        let mut items = vec![inst(Opcode::JumpAbsolute, Operand::Jump(target))];
        items.extend((0..70_000).map(|_| inst(Opcode::PopTop, Operand::None)));
        items.push(Item::Label(target));
        items.push(inst(Opcode::ReturnValue, Operand::None));
        routine.items = items;

        let record = encode(&routine).unwrap();
        // wide prefix + jump = 6 bytes, so the target lands at 6 + 70000
        assert_eq!(record.code[0], Opcode::ExtendedArg.to_byte());
        let high = u16::from_le_bytes([record.code[1], record.code[2]]) as u32;
        let low = u16::from_le_bytes([record.code[4], record.code[5]]) as u32;
        assert_eq!(record.code[3], Opcode::JumpAbsolute.to_byte());
        assert_eq!(high * 65536 + low, 70_006);

        let decoded = decode(&record, false).unwrap();
        assert_bodies_equivalent(&routine.items, &decoded.items);
    }

    #[test]
    fn test_hinted_names_inserted_in_compat_mode() {
        let mut routine = Routine::builder("f")
            .items(vec![
                inst(Opcode::LoadGlobal, Operand::Name("isinstance".into())),
                inst(Opcode::ReturnValue, Operand::None),
            ])
            .build();
        routine.name_table_hints.insert("None".into(), None);
        routine
            .name_table_hints
            .insert("True".into(), Some("isinstance".into()));
        routine
            .name_table_hints
            .insert("Ellipsis".into(), Some("absent".into()));

        let plain = encode(&routine).unwrap();
        assert_eq!(plain.names, vec!["isinstance"]);

        let compat = encode_with(&routine, &EncodeOptions { compat: true }).unwrap();
        assert_eq!(compat.names, vec!["None", "isinstance", "True"]);
        // the operand resolves against the post-insertion table
        assert_eq!(&compat.code[1..3], &[1, 0]);
    }

    #[test]
    fn test_chained_hints_resolve_regardless_of_order() {
        let mut routine = Routine::builder("f")
            .item(Instruction::new(Opcode::ReturnValue, Operand::None))
            .build();
        routine.name_table_hints.insert("None".into(), None);
        routine
            .name_table_hints
            .insert("True".into(), Some("None".into()));

        let compat = encode_with(&routine, &EncodeOptions { compat: true }).unwrap();
        assert_eq!(compat.names, vec!["None", "True"]);
    }

    #[test]
    fn test_iterator_quirk_emits_placeholder_table() {
        let mut routine = Routine::new("g", "<test>");
        let head = routine.new_label();
        let exit = routine.new_label();
        routine.flags = Routine::FLAG_GENERATOR;
        routine.items = vec![
            inst(Opcode::LoadLocals, Operand::None),
            inst(Opcode::GetIter, Operand::None),
            Item::Label(head),
            inst(Opcode::ForIter, Operand::Jump(exit)),
            inst(Opcode::PopTop, Operand::None),
            inst(Opcode::JumpAbsolute, Operand::Jump(head)),
            Item::Label(exit),
            inst(Opcode::LoadLocals, Operand::None),
            inst(Opcode::ReturnValue, Operand::None),
        ];

        let plain = encode(&routine).unwrap();
        assert!(plain.line_table.is_empty());

        let compat = encode_with(&routine, &EncodeOptions { compat: true }).unwrap();
        assert_eq!(compat.line_table, vec![6, 0]);
    }

    #[test]
    fn test_lines_survive_a_round_trip() {
        let routine = Routine::builder("f")
            .items(vec![
                Item::Inst(Instruction::with_line(
                    Opcode::LoadLocal,
                    Operand::Local("x".into()),
                    1,
                )),
                Item::Inst(Instruction::with_line(Opcode::PopTop, Operand::None, 1)),
                Item::Inst(Instruction::with_line(
                    Opcode::LoadLocal,
                    Operand::Local("x".into()),
                    4,
                )),
                Item::Inst(Instruction::with_line(
                    Opcode::ReturnValue,
                    Operand::None,
                    4,
                )),
            ])
            .build();

        let record = encode(&routine).unwrap();
        let decoded = decode(&record, false).unwrap();
        assert_bodies_equivalent(&routine.items, &decoded.items);
    }

    #[test]
    fn test_branching_routine_roundtrip() {
        let mut routine = Routine::new("f", "<test>");
        let else_arm = routine.new_label();
        let done = routine.new_label();
        let shared = Rc::new(Constant::int(10));
        routine.param_names = vec!["x".into()];
        routine.items = vec![
            inst(Opcode::LoadLocal, Operand::Local("x".into())),
            inst(Opcode::PopJumpIfFalse, Operand::Jump(else_arm)),
            inst(Opcode::LoadConst, Operand::Const(Rc::clone(&shared))),
            inst(Opcode::JumpForward, Operand::Jump(done)),
            Item::Label(else_arm),
            inst(Opcode::LoadGlobal, Operand::Name("fallback".into())),
            Item::Label(done),
            inst(Opcode::ReturnValue, Operand::None),
        ];

        let record = encode(&routine).unwrap();
        let decoded = decode(&record, false).unwrap();
        assert_bodies_equivalent(&routine.items, &decoded.items);

        // and a second encode of the decoded body is byte-identical
        let record2 = encode(&decoded).unwrap();
        assert_eq!(record2, record);
    }

    proptest! {
        // Raw operands of any magnitude survive encode/decode untouched.
        #[test]
        fn prop_raw_operands_roundtrip(values in proptest::collection::vec(any::<u32>(), 1..24)) {
            let items: Vec<Item> = values
                .iter()
                .map(|&value| inst(Opcode::UnpackSequence, Operand::Raw(value)))
                .chain(std::iter::once(inst(Opcode::ReturnValue, Operand::None)))
                .collect();
            let routine = Routine::builder("f").items(items).build();

            let record = encode(&routine).unwrap();
            let decoded = decode(&record, false).unwrap();
            let out: Vec<u32> = decoded
                .instructions()
                .filter_map(|inst| inst.operand.raw())
                .collect();
            prop_assert_eq!(out, values);
        }
    }
}
