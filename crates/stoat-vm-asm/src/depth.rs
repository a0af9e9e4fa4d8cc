//! Stack-depth analysis.
//!
//! The loader header declares the maximum operand-stack depth a routine may
//! reach; under-declaring corrupts the stack at execution time, so the
//! analyzer must never under-estimate. The body is partitioned into basic
//! blocks (a block begins at every label and right after every jump), each
//! block's maximum relative depth is computed by walking forward from its
//! start, and jump edges recurse into successor blocks with memoization.
//! A block already on the visit stack contributes zero additional depth:
//! a well-formed loop body returns to its entry depth.

use rustc_hash::{FxHashMap, FxHashSet};
use stoat_vm_bytecode::{Instruction, Item, Label, Opcode, Routine};

use crate::error::{AsmError, AsmResult};

/// Compute the maximum operand-stack depth the routine can reach.
pub fn max_stack_depth(routine: &Routine) -> AsmResult<u32> {
    let mut label_blocks = FxHashMap::default();
    for (index, item) in routine.items.iter().enumerate() {
        if let Item::Label(label) = item {
            label_blocks.insert(*label, index);
        }
    }

    let mut walker = Walker {
        items: &routine.items,
        label_blocks,
        memo: FxHashMap::default(),
        visiting: FxHashSet::default(),
    };
    let depth = walker.block_effect(0)?.max(0);
    Ok(depth.min(u32::MAX as i64) as u32)
}

struct Walker<'a> {
    items: &'a [Item],
    label_blocks: FxHashMap<Label, usize>,
    memo: FxHashMap<usize, i64>,
    visiting: FxHashSet<usize>,
}

impl Walker<'_> {
    fn cached_block_effect(&mut self, begin: usize) -> AsmResult<i64> {
        if let Some(&depth) = self.memo.get(&begin) {
            return Ok(depth);
        }
        if self.visiting.contains(&begin) {
            // a cycle: loop bodies are depth-neutral at their entry
            return Ok(0);
        }
        self.visiting.insert(begin);
        let depth = self.block_effect(begin);
        self.visiting.remove(&begin);
        let depth = depth?;
        self.memo.insert(begin, depth);
        Ok(depth)
    }

    // Maximum depth reached relative to the block's entry depth, including
    // everything reachable from it. The walk runs through labels (control
    // falls through them) and only a jump hands off to successors.
    fn block_effect(&mut self, begin: usize) -> AsmResult<i64> {
        let mut depth = 0i64;
        let mut max_depth = 0i64;

        for index in begin..self.items.len() {
            let Item::Inst(inst) = &self.items[index] else {
                continue;
            };
            depth += stack_effect(inst, index)?;
            max_depth = max_depth.max(depth);

            if !inst.opcode.is_jump() {
                continue;
            }

            // Depth changes that apply to one successor edge only: the
            // iterator-advance jump pops the iterator and its sentinel on
            // the exit edge, handler setup pushes the handler frame on the
            // handler edge, and the pop-or-jump conditionals pop only when
            // falling through.
            let target_delta = match inst.opcode {
                Opcode::ForIter => -2,
                Opcode::SetupExcept | Opcode::SetupFinally => 3,
                _ => 0,
            };
            max_depth = max_depth.max(depth + target_delta);

            let label = inst
                .operand
                .jump_target()
                .ok_or(AsmError::OperandMismatch {
                    index,
                    opcode: inst.opcode,
                })?;
            let target_block =
                *self
                    .label_blocks
                    .get(&label)
                    .ok_or(AsmError::DanglingReference { index, label })?;

            let mut successor = target_delta + self.cached_block_effect(target_block)?;
            if !inst.opcode.is_unconditional_jump() {
                let fallthrough_delta = match inst.opcode {
                    Opcode::JumpIfTrueOrPop | Opcode::JumpIfFalseOrPop => -1,
                    _ => 0,
                };
                let fallthrough = fallthrough_delta + self.cached_block_effect(index + 1)?;
                successor = successor.max(fallthrough);
            }
            return Ok(max_depth.max(depth + successor));
        }
        Ok(max_depth)
    }
}

/// Stack effect of one instruction.
///
/// Most opcodes have a fixed effect; the variadic build/call/unpack/closure
/// forms compute theirs from the raw operand. An opcode covered by neither
/// table is an analyzer/ISA mismatch and fails loudly.
pub fn stack_effect(inst: &Instruction, index: usize) -> AsmResult<i64> {
    if let Some(delta) = fixed_effect(inst.opcode) {
        return Ok(delta);
    }

    let arg = inst.operand.raw().ok_or(AsmError::OperandMismatch {
        index,
        opcode: inst.opcode,
    })? as i64;

    let delta = match inst.opcode {
        Opcode::UnpackSequence => arg - 1,
        Opcode::DupTopN => arg,
        Opcode::BuildTuple | Opcode::BuildList | Opcode::BuildSet => 1 - arg,
        Opcode::Raise | Opcode::MakeFunction => -arg,
        Opcode::MakeClosure => -arg - 1,
        Opcode::BuildSlice => {
            if arg == 3 {
                -2
            } else {
                -1
            }
        }
        Opcode::CallFunction => -packed_arg_count(arg),
        Opcode::CallFunctionVar | Opcode::CallFunctionKw => -packed_arg_count(arg) - 1,
        Opcode::CallFunctionVarKw => -packed_arg_count(arg) - 2,
        opcode => return Err(AsmError::UnknownOpcode { opcode }),
    };
    Ok(delta)
}

// Call operands pack the positional count in the low byte and the keyword
// count in the high byte; each keyword argument occupies two stack slots.
fn packed_arg_count(arg: i64) -> i64 {
    arg % 256 + 2 * (arg / 256)
}

fn fixed_effect(opcode: Opcode) -> Option<i64> {
    use Opcode::*;

    let delta = match opcode {
        PopTop => -1,
        RotTwo | RotThree | RotFour | Nop => 0,
        DupTop => 1,

        UnaryPositive | UnaryNegative | UnaryNot | UnaryConvert | UnaryInvert => 0,

        BinaryPower | BinaryMultiply | BinaryDivide | BinaryModulo | BinaryAdd
        | BinarySubtract | BinarySubscript | BinaryFloorDivide | BinaryTrueDivide
        | BinaryLshift | BinaryRshift | BinaryAnd | BinaryXor | BinaryOr => -1,

        InplaceFloorDivide | InplaceTrueDivide | InplaceAdd | InplaceSubtract
        | InplaceMultiply | InplaceDivide | InplaceModulo | InplacePower | InplaceLshift
        | InplaceRshift | InplaceAnd | InplaceXor | InplaceOr => -1,

        Slice0 => 0,
        Slice1 | Slice2 => -1,
        Slice3 => -2,
        StoreSlice0 => -2,
        StoreSlice1 | StoreSlice2 => -3,
        StoreSlice3 => -4,
        DeleteSlice0 => -1,
        DeleteSlice1 | DeleteSlice2 => -2,
        DeleteSlice3 => -3,

        StoreMap => -2,
        StoreSubscript => -3,
        DeleteSubscript => -2,
        GetIter => 0,

        PrintExpr | PrintItem => -1,
        PrintNewline => 0,
        PrintItemTo => -2,
        PrintNewlineTo => -1,

        BreakLoop => 0,
        WithCleanup => -1,
        LoadLocals => 1,
        ReturnValue => -1,
        ImportStar => -1,
        ExecStatement => -3,
        YieldValue => 0,
        PopBlock => 0,
        EndFinally => -3,
        BuildClass => -2,

        StoreName => -1,
        DeleteName => 0,
        ForIter => 1,
        ListAppend => -1,
        StoreAttr => -2,
        DeleteAttr => -1,
        StoreGlobal => -1,
        DeleteGlobal => 0,
        LoadConst | LoadName => 1,
        BuildMap => 1,
        LoadAttr => 0,
        CompareOp => -1,
        ImportName => -1,
        ImportFrom => 1,

        JumpForward | JumpIfFalseOrPop | JumpIfTrueOrPop | JumpAbsolute => 0,
        PopJumpIfFalse | PopJumpIfTrue => -1,
        LoadGlobal => 1,
        ContinueLoop => 0,
        SetupLoop | SetupExcept | SetupFinally => 0,
        SetupWith => 4,

        LoadLocal => 1,
        StoreLocal => -1,
        DeleteLocal => 0,

        LoadClosure | LoadDeref => 1,
        StoreDeref => -1,
        ExtendedArg => 0,
        SetAdd => -1,
        MapAdd => -2,

        // variadic forms are computed from the operand; Stop is reserved
        // and deliberately uncovered
        Stop | UnpackSequence | DupTopN | BuildTuple | BuildList | BuildSet | Raise
        | CallFunction | MakeFunction | BuildSlice | MakeClosure | CallFunctionVar
        | CallFunctionKw | CallFunctionVarKw => return None,
    };
    Some(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stoat_vm_bytecode::Operand;

    fn inst(opcode: Opcode) -> Item {
        Item::Inst(Instruction::new(opcode, Operand::None))
    }

    fn inst_raw(opcode: Opcode, arg: u32) -> Item {
        Item::Inst(Instruction::new(opcode, Operand::Raw(arg)))
    }

    #[test]
    fn test_every_opcode_has_exactly_one_effect_source() {
        let formula_ops = [
            Opcode::UnpackSequence,
            Opcode::DupTopN,
            Opcode::BuildTuple,
            Opcode::BuildList,
            Opcode::BuildSet,
            Opcode::Raise,
            Opcode::MakeFunction,
            Opcode::MakeClosure,
            Opcode::BuildSlice,
            Opcode::CallFunction,
            Opcode::CallFunctionVar,
            Opcode::CallFunctionKw,
            Opcode::CallFunctionVarKw,
        ];
        for byte in 0..=u8::MAX {
            let Some(opcode) = Opcode::from_byte(byte) else {
                continue;
            };
            let fixed = fixed_effect(opcode).is_some();
            let formula = formula_ops.contains(&opcode);
            if opcode == Opcode::Stop {
                assert!(!fixed && !formula, "Stop must stay uncovered");
            } else {
                assert!(
                    fixed ^ formula,
                    "{} must be covered by exactly one table",
                    opcode.name()
                );
            }
        }
    }

    #[test]
    fn test_reserved_opcode_is_an_error() {
        let probe = Instruction::new(Opcode::Stop, Operand::Raw(0));
        assert!(matches!(
            stack_effect(&probe, 0),
            Err(AsmError::UnknownOpcode { opcode: Opcode::Stop })
        ));
    }

    #[test]
    fn test_call_operand_packing() {
        // 2 positional + 1 keyword: low byte 2, high byte 1; the keyword
        // pair occupies two slots
        let call = Instruction::new(Opcode::CallFunction, Operand::Raw(0x0102));
        assert_eq!(stack_effect(&call, 0).unwrap(), -4);
    }

    #[test]
    fn test_straight_line_depth() {
        let routine = Routine::builder("add")
            .params(["a", "b"])
            .items(vec![
                Item::Inst(Instruction::new(
                    Opcode::LoadLocal,
                    Operand::Local("a".into()),
                )),
                Item::Inst(Instruction::new(
                    Opcode::LoadLocal,
                    Operand::Local("b".into()),
                )),
                inst(Opcode::BinaryAdd),
                inst(Opcode::ReturnValue),
            ])
            .build();
        assert_eq!(max_stack_depth(&routine).unwrap(), 2);
    }

    #[test]
    fn test_branch_takes_deeper_successor() {
        // cond branch: one arm builds a 3-tuple (depth 3), the other returns
        // immediately (depth 1)
        let mut routine = Routine::new("f", "<test>");
        let deep = routine.new_label();
        routine.items = vec![
            inst(Opcode::LoadLocals),
            Item::Inst(Instruction::new(Opcode::PopJumpIfTrue, Operand::Jump(deep))),
            inst(Opcode::LoadLocals),
            inst(Opcode::ReturnValue),
            Item::Label(deep),
            inst(Opcode::LoadLocals),
            inst(Opcode::LoadLocals),
            inst(Opcode::LoadLocals),
            inst_raw(Opcode::BuildTuple, 3),
            inst(Opcode::ReturnValue),
        ];
        assert_eq!(max_stack_depth(&routine).unwrap(), 3);
    }

    #[test]
    fn test_loop_terminates_and_is_depth_neutral() {
        // while-style loop: the backward jump forms a cycle with net
        // effect zero
        let mut routine = Routine::new("f", "<test>");
        let head = routine.new_label();
        routine.items = vec![
            Item::Label(head),
            inst(Opcode::LoadLocals),
            Item::Inst(Instruction::new(
                Opcode::PopJumpIfTrue,
                Operand::Jump(head),
            )),
            inst(Opcode::LoadLocals),
            inst(Opcode::ReturnValue),
        ];
        assert_eq!(max_stack_depth(&routine).unwrap(), 1);
    }

    #[test]
    fn test_iterator_loop_depth() {
        // for-style loop: GetIter; head: ForIter exit; body pops; jump head;
        // exit: return
        let mut routine = Routine::new("f", "<test>");
        let head = routine.new_label();
        let exit = routine.new_label();
        routine.items = vec![
            inst(Opcode::LoadLocals),
            inst(Opcode::GetIter),
            Item::Label(head),
            Item::Inst(Instruction::new(Opcode::ForIter, Operand::Jump(exit))),
            inst(Opcode::PopTop),
            Item::Inst(Instruction::new(Opcode::JumpAbsolute, Operand::Jump(head))),
            Item::Label(exit),
            inst(Opcode::LoadLocals),
            inst(Opcode::ReturnValue),
        ];
        // iterator + loop item live simultaneously
        assert_eq!(max_stack_depth(&routine).unwrap(), 2);
    }

    #[test]
    fn test_handler_edge_reserves_frame_slots() {
        let mut routine = Routine::new("f", "<test>");
        let handler = routine.new_label();
        routine.items = vec![
            Item::Inst(Instruction::new(
                Opcode::SetupExcept,
                Operand::Jump(handler),
            )),
            inst(Opcode::PopBlock),
            inst(Opcode::LoadLocals),
            inst(Opcode::ReturnValue),
            Item::Label(handler),
            inst(Opcode::PopTop),
            inst(Opcode::PopTop),
            inst(Opcode::PopTop),
            inst(Opcode::LoadLocals),
            inst(Opcode::ReturnValue),
        ];
        // the handler edge enters with three extra values on the stack
        assert_eq!(max_stack_depth(&routine).unwrap(), 3);
    }

    #[test]
    fn test_dangling_jump_label_is_fatal() {
        let routine = Routine::builder("f")
            .item(Instruction::new(
                Opcode::JumpAbsolute,
                Operand::Jump(Label::new(9)),
            ))
            .build();
        assert!(matches!(
            max_stack_depth(&routine),
            Err(AsmError::DanglingReference { index: 0, .. })
        ));
    }

    #[test]
    fn test_formula_opcode_without_raw_operand_is_mismatch() {
        let routine = Routine::builder("f")
            .item(Instruction::new(Opcode::BuildTuple, Operand::None))
            .build();
        assert!(matches!(
            max_stack_depth(&routine),
            Err(AsmError::OperandMismatch { index: 0, .. })
        ));
    }
}
