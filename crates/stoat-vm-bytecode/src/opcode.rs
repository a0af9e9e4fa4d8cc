//! Opcode table for the Stoat VM instruction set.
//!
//! This module is the single source of truth for the ISA: which byte each
//! opcode occupies, whether it carries an operand, and what that operand
//! indexes into. Both the decoder and the encoder dispatch off this table.

use serde::{Deserialize, Serialize};

/// First opcode value that carries a 16-bit operand.
///
/// Opcodes below this threshold are a single byte; opcodes at or above it are
/// followed by a two-byte little-endian operand.
pub const OPERAND_THRESHOLD: u8 = 90;

/// Multiplier applied to a wide-operand prefix ([`Opcode::ExtendedArg`])
/// before folding it into the following instruction's operand.
pub const EXTENDED_ARG_BASE: u32 = 1 << 16;

/// What an opcode's operand indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperandKind {
    /// A raw count or mode (argument counts, unpack arity, slice arity...)
    Plain,
    /// A comparison-operator code
    Compare,
    /// Index into the constant pool
    Const,
    /// Index into the name table
    Name,
    /// Index into the local-slot table
    Local,
    /// Combined index into the cell table followed by the free table
    ClosureVar,
    /// Byte distance from the end of this instruction to the jump target
    RelativeJump,
    /// Absolute byte offset of the jump target
    AbsoluteJump,
}

/// Stack VM opcodes.
///
/// Discriminants are the loader's opcode bytes. The set is closed: the
/// stack-depth analyzer is verified exhaustively against it, so adding an
/// opcode here without teaching the analyzer about it is a test failure,
/// not a latent miscompilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    // ==================== Stack shuffling ====================
    /// Reserved by the loader, never emitted
    Stop = 0,
    /// Pop the top of the stack
    PopTop = 1,
    /// Swap the two top items
    RotTwo = 2,
    /// Rotate the three top items
    RotThree = 3,
    /// Duplicate the top item
    DupTop = 4,
    /// Rotate the four top items
    RotFour = 5,
    /// No operation
    Nop = 9,

    // ==================== Unary operations ====================
    /// TOS = +TOS
    UnaryPositive = 10,
    /// TOS = -TOS
    UnaryNegative = 11,
    /// TOS = not TOS
    UnaryNot = 12,
    /// TOS = repr(TOS)
    UnaryConvert = 13,
    /// TOS = ~TOS
    UnaryInvert = 15,

    // ==================== Binary operations ====================
    /// TOS = TOS1 ** TOS
    BinaryPower = 19,
    /// TOS = TOS1 * TOS
    BinaryMultiply = 20,
    /// TOS = TOS1 / TOS (classic division)
    BinaryDivide = 21,
    /// TOS = TOS1 % TOS
    BinaryModulo = 22,
    /// TOS = TOS1 + TOS
    BinaryAdd = 23,
    /// TOS = TOS1 - TOS
    BinarySubtract = 24,
    /// TOS = TOS1[TOS]
    BinarySubscript = 25,
    /// TOS = TOS1 // TOS
    BinaryFloorDivide = 26,
    /// TOS = TOS1 / TOS (true division)
    BinaryTrueDivide = 27,
    /// In-place TOS1 //= TOS
    InplaceFloorDivide = 28,
    /// In-place TOS1 /= TOS (true division)
    InplaceTrueDivide = 29,

    // ==================== Slicing ====================
    /// TOS = TOS[:]
    Slice0 = 30,
    /// TOS = TOS1[TOS:]
    Slice1 = 31,
    /// TOS = TOS1[:TOS]
    Slice2 = 32,
    /// TOS = TOS2[TOS1:TOS]
    Slice3 = 33,
    /// TOS1[:] = TOS
    StoreSlice0 = 40,
    /// TOS2[TOS1:] = TOS
    StoreSlice1 = 41,
    /// TOS2[:TOS1] = TOS
    StoreSlice2 = 42,
    /// TOS3[TOS2:TOS1] = TOS
    StoreSlice3 = 43,
    /// del TOS[:]
    DeleteSlice0 = 50,
    /// del TOS1[TOS:]
    DeleteSlice1 = 51,
    /// del TOS1[:TOS]
    DeleteSlice2 = 52,
    /// del TOS2[TOS1:TOS]
    DeleteSlice3 = 53,

    // ==================== In-place operations ====================
    /// Store a key/value pair into the map at TOS2
    StoreMap = 54,
    /// In-place TOS1 += TOS
    InplaceAdd = 55,
    /// In-place TOS1 -= TOS
    InplaceSubtract = 56,
    /// In-place TOS1 *= TOS
    InplaceMultiply = 57,
    /// In-place TOS1 /= TOS (classic division)
    InplaceDivide = 58,
    /// In-place TOS1 %= TOS
    InplaceModulo = 59,
    /// TOS1[TOS] = TOS2
    StoreSubscript = 60,
    /// del TOS1[TOS]
    DeleteSubscript = 61,
    /// TOS = TOS1 << TOS
    BinaryLshift = 62,
    /// TOS = TOS1 >> TOS
    BinaryRshift = 63,
    /// TOS = TOS1 & TOS
    BinaryAnd = 64,
    /// TOS = TOS1 ^ TOS
    BinaryXor = 65,
    /// TOS = TOS1 | TOS
    BinaryOr = 66,
    /// In-place TOS1 **= TOS
    InplacePower = 67,
    /// TOS = iter(TOS)
    GetIter = 68,

    // ==================== Printing ====================
    /// Print TOS in interactive mode
    PrintExpr = 70,
    /// Print TOS to standard output
    PrintItem = 71,
    /// Print a newline to standard output
    PrintNewline = 72,
    /// Print TOS1 to the stream at TOS
    PrintItemTo = 73,
    /// Print a newline to the stream at TOS
    PrintNewlineTo = 74,

    /// In-place TOS1 <<= TOS
    InplaceLshift = 75,
    /// In-place TOS1 >>= TOS
    InplaceRshift = 76,
    /// In-place TOS1 &= TOS
    InplaceAnd = 77,
    /// In-place TOS1 ^= TOS
    InplaceXor = 78,
    /// In-place TOS1 |= TOS
    InplaceOr = 79,

    // ==================== Block management ====================
    /// Terminate the innermost loop
    BreakLoop = 80,
    /// Clean up the stack when a `with` block exits
    WithCleanup = 81,
    /// Push the local namespace mapping
    LoadLocals = 82,
    /// Return TOS to the caller
    ReturnValue = 83,
    /// Import all public symbols from the module at TOS
    ImportStar = 84,
    /// Execute dynamic code from the three top items
    ExecStatement = 85,
    /// Yield TOS from a generator
    YieldValue = 86,
    /// Pop the innermost block
    PopBlock = 87,
    /// Terminate a finally clause
    EndFinally = 88,
    /// Build a class from the three top items
    BuildClass = 89,

    // ==================== Name access (operand from here on) ====================
    /// names[arg] = TOS
    StoreName = 90,
    /// del names[arg]
    DeleteName = 91,
    /// Unpack TOS into `arg` individual values
    UnpackSequence = 92,
    /// Advance the iterator at TOS, or jump past the loop when exhausted
    ForIter = 93,
    /// Append TOS to the list `arg` entries down (list comprehensions)
    ListAppend = 94,
    /// TOS.names[arg] = TOS1
    StoreAttr = 95,
    /// del TOS.names[arg]
    DeleteAttr = 96,
    /// globals[names[arg]] = TOS
    StoreGlobal = 97,
    /// del globals[names[arg]]
    DeleteGlobal = 98,
    /// Duplicate the `arg` top items
    DupTopN = 99,
    /// Push consts[arg]
    LoadConst = 100,
    /// Push the value bound to names[arg]
    LoadName = 101,
    /// Build a tuple from the `arg` top items
    BuildTuple = 102,
    /// Build a list from the `arg` top items
    BuildList = 103,
    /// Build a set from the `arg` top items
    BuildSet = 104,
    /// Build an empty map sized for `arg` entries
    BuildMap = 105,
    /// TOS = TOS.names[arg]
    LoadAttr = 106,
    /// TOS = TOS1 <cmp[arg]> TOS
    CompareOp = 107,
    /// Import the module names[arg]
    ImportName = 108,
    /// Load the attribute names[arg] from the module at TOS
    ImportFrom = 109,

    // ==================== Jumps ====================
    /// Unconditional relative jump
    JumpForward = 110,
    /// Jump if TOS is false, popping it only on fall-through
    JumpIfFalseOrPop = 111,
    /// Jump if TOS is true, popping it only on fall-through
    JumpIfTrueOrPop = 112,
    /// Unconditional absolute jump
    JumpAbsolute = 113,
    /// Pop TOS and jump if it is false
    PopJumpIfFalse = 114,
    /// Pop TOS and jump if it is true
    PopJumpIfTrue = 115,
    /// Push the global bound to names[arg]
    LoadGlobal = 116,
    /// Continue the innermost loop from a finally clause
    ContinueLoop = 119,
    /// Push a loop block ending at the jump target
    SetupLoop = 120,
    /// Push an exception-handler block starting at the jump target
    SetupExcept = 121,
    /// Push a finally block starting at the jump target
    SetupFinally = 122,

    // ==================== Local slots ====================
    /// Push locals[arg]
    LoadLocal = 124,
    /// locals[arg] = TOS
    StoreLocal = 125,
    /// del locals[arg]
    DeleteLocal = 126,

    // ==================== Calls and closures ====================
    /// Raise an exception from the `arg` top items
    Raise = 130,
    /// Call a function; arg packs positional and keyword counts
    CallFunction = 131,
    /// Make a function with `arg` default values
    MakeFunction = 132,
    /// Build a slice object from `arg` items
    BuildSlice = 133,
    /// Make a closure with `arg` default values and a cell tuple
    MakeClosure = 134,
    /// Push the cell object for closure variable `arg`
    LoadClosure = 135,
    /// Push the contents of the cell for closure variable `arg`
    LoadDeref = 136,
    /// Store TOS into the cell for closure variable `arg`
    StoreDeref = 137,
    /// Call a function with an extra positional-argument tuple
    CallFunctionVar = 140,
    /// Call a function with an extra keyword-argument map
    CallFunctionKw = 141,
    /// Call a function with both extra argument collections
    CallFunctionVarKw = 142,
    /// Push a with block; the jump target is the cleanup code
    SetupWith = 143,

    /// Wide-operand prefix: folds `arg * 65536` into the next instruction
    ExtendedArg = 145,
    /// Add TOS to the set `arg` entries down (set comprehensions)
    SetAdd = 146,
    /// Store a key/value pair into the map `arg` entries down
    MapAdd = 147,
}

impl Opcode {
    /// Convert from raw byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        // Use a match to ensure safety
        match byte {
            0 => Some(Self::Stop),
            1 => Some(Self::PopTop),
            2 => Some(Self::RotTwo),
            3 => Some(Self::RotThree),
            4 => Some(Self::DupTop),
            5 => Some(Self::RotFour),
            9 => Some(Self::Nop),

            10 => Some(Self::UnaryPositive),
            11 => Some(Self::UnaryNegative),
            12 => Some(Self::UnaryNot),
            13 => Some(Self::UnaryConvert),
            15 => Some(Self::UnaryInvert),

            19 => Some(Self::BinaryPower),
            20 => Some(Self::BinaryMultiply),
            21 => Some(Self::BinaryDivide),
            22 => Some(Self::BinaryModulo),
            23 => Some(Self::BinaryAdd),
            24 => Some(Self::BinarySubtract),
            25 => Some(Self::BinarySubscript),
            26 => Some(Self::BinaryFloorDivide),
            27 => Some(Self::BinaryTrueDivide),
            28 => Some(Self::InplaceFloorDivide),
            29 => Some(Self::InplaceTrueDivide),

            30 => Some(Self::Slice0),
            31 => Some(Self::Slice1),
            32 => Some(Self::Slice2),
            33 => Some(Self::Slice3),
            40 => Some(Self::StoreSlice0),
            41 => Some(Self::StoreSlice1),
            42 => Some(Self::StoreSlice2),
            43 => Some(Self::StoreSlice3),
            50 => Some(Self::DeleteSlice0),
            51 => Some(Self::DeleteSlice1),
            52 => Some(Self::DeleteSlice2),
            53 => Some(Self::DeleteSlice3),

            54 => Some(Self::StoreMap),
            55 => Some(Self::InplaceAdd),
            56 => Some(Self::InplaceSubtract),
            57 => Some(Self::InplaceMultiply),
            58 => Some(Self::InplaceDivide),
            59 => Some(Self::InplaceModulo),
            60 => Some(Self::StoreSubscript),
            61 => Some(Self::DeleteSubscript),
            62 => Some(Self::BinaryLshift),
            63 => Some(Self::BinaryRshift),
            64 => Some(Self::BinaryAnd),
            65 => Some(Self::BinaryXor),
            66 => Some(Self::BinaryOr),
            67 => Some(Self::InplacePower),
            68 => Some(Self::GetIter),

            70 => Some(Self::PrintExpr),
            71 => Some(Self::PrintItem),
            72 => Some(Self::PrintNewline),
            73 => Some(Self::PrintItemTo),
            74 => Some(Self::PrintNewlineTo),
            75 => Some(Self::InplaceLshift),
            76 => Some(Self::InplaceRshift),
            77 => Some(Self::InplaceAnd),
            78 => Some(Self::InplaceXor),
            79 => Some(Self::InplaceOr),

            80 => Some(Self::BreakLoop),
            81 => Some(Self::WithCleanup),
            82 => Some(Self::LoadLocals),
            83 => Some(Self::ReturnValue),
            84 => Some(Self::ImportStar),
            85 => Some(Self::ExecStatement),
            86 => Some(Self::YieldValue),
            87 => Some(Self::PopBlock),
            88 => Some(Self::EndFinally),
            89 => Some(Self::BuildClass),

            90 => Some(Self::StoreName),
            91 => Some(Self::DeleteName),
            92 => Some(Self::UnpackSequence),
            93 => Some(Self::ForIter),
            94 => Some(Self::ListAppend),
            95 => Some(Self::StoreAttr),
            96 => Some(Self::DeleteAttr),
            97 => Some(Self::StoreGlobal),
            98 => Some(Self::DeleteGlobal),
            99 => Some(Self::DupTopN),
            100 => Some(Self::LoadConst),
            101 => Some(Self::LoadName),
            102 => Some(Self::BuildTuple),
            103 => Some(Self::BuildList),
            104 => Some(Self::BuildSet),
            105 => Some(Self::BuildMap),
            106 => Some(Self::LoadAttr),
            107 => Some(Self::CompareOp),
            108 => Some(Self::ImportName),
            109 => Some(Self::ImportFrom),

            110 => Some(Self::JumpForward),
            111 => Some(Self::JumpIfFalseOrPop),
            112 => Some(Self::JumpIfTrueOrPop),
            113 => Some(Self::JumpAbsolute),
            114 => Some(Self::PopJumpIfFalse),
            115 => Some(Self::PopJumpIfTrue),
            116 => Some(Self::LoadGlobal),
            119 => Some(Self::ContinueLoop),
            120 => Some(Self::SetupLoop),
            121 => Some(Self::SetupExcept),
            122 => Some(Self::SetupFinally),

            124 => Some(Self::LoadLocal),
            125 => Some(Self::StoreLocal),
            126 => Some(Self::DeleteLocal),

            130 => Some(Self::Raise),
            131 => Some(Self::CallFunction),
            132 => Some(Self::MakeFunction),
            133 => Some(Self::BuildSlice),
            134 => Some(Self::MakeClosure),
            135 => Some(Self::LoadClosure),
            136 => Some(Self::LoadDeref),
            137 => Some(Self::StoreDeref),
            140 => Some(Self::CallFunctionVar),
            141 => Some(Self::CallFunctionKw),
            142 => Some(Self::CallFunctionVarKw),
            143 => Some(Self::SetupWith),
            145 => Some(Self::ExtendedArg),
            146 => Some(Self::SetAdd),
            147 => Some(Self::MapAdd),

            _ => None,
        }
    }

    /// Convert to raw byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Whether this opcode is followed by a 16-bit operand in the stream
    #[inline]
    pub fn has_operand(self) -> bool {
        self.to_byte() >= OPERAND_THRESHOLD
    }

    /// The operand category, or `None` for operand-less opcodes
    pub fn operand_kind(self) -> Option<OperandKind> {
        if !self.has_operand() {
            return None;
        }
        let kind = match self {
            Self::StoreName
            | Self::DeleteName
            | Self::StoreAttr
            | Self::DeleteAttr
            | Self::StoreGlobal
            | Self::DeleteGlobal
            | Self::LoadName
            | Self::LoadAttr
            | Self::ImportName
            | Self::ImportFrom
            | Self::LoadGlobal => OperandKind::Name,

            Self::LoadConst => OperandKind::Const,

            Self::CompareOp => OperandKind::Compare,

            Self::LoadLocal | Self::StoreLocal | Self::DeleteLocal => OperandKind::Local,

            Self::LoadClosure | Self::LoadDeref | Self::StoreDeref => OperandKind::ClosureVar,

            Self::ForIter
            | Self::JumpForward
            | Self::SetupLoop
            | Self::SetupExcept
            | Self::SetupFinally
            | Self::SetupWith => OperandKind::RelativeJump,

            Self::JumpIfFalseOrPop
            | Self::JumpIfTrueOrPop
            | Self::JumpAbsolute
            | Self::PopJumpIfFalse
            | Self::PopJumpIfTrue
            | Self::ContinueLoop => OperandKind::AbsoluteJump,

            _ => OperandKind::Plain,
        };
        Some(kind)
    }

    /// Whether this opcode transfers control to a label operand
    #[inline]
    pub fn is_jump(self) -> bool {
        matches!(
            self.operand_kind(),
            Some(OperandKind::RelativeJump | OperandKind::AbsoluteJump)
        )
    }

    /// Whether this jump never falls through to the next instruction
    #[inline]
    pub fn is_unconditional_jump(self) -> bool {
        matches!(self, Self::JumpAbsolute | Self::JumpForward)
    }

    /// Get the name of this opcode
    pub const fn name(self) -> &'static str {
        match self {
            Self::Stop => "Stop",
            Self::PopTop => "PopTop",
            Self::RotTwo => "RotTwo",
            Self::RotThree => "RotThree",
            Self::DupTop => "DupTop",
            Self::RotFour => "RotFour",
            Self::Nop => "Nop",
            Self::UnaryPositive => "UnaryPositive",
            Self::UnaryNegative => "UnaryNegative",
            Self::UnaryNot => "UnaryNot",
            Self::UnaryConvert => "UnaryConvert",
            Self::UnaryInvert => "UnaryInvert",
            Self::BinaryPower => "BinaryPower",
            Self::BinaryMultiply => "BinaryMultiply",
            Self::BinaryDivide => "BinaryDivide",
            Self::BinaryModulo => "BinaryModulo",
            Self::BinaryAdd => "BinaryAdd",
            Self::BinarySubtract => "BinarySubtract",
            Self::BinarySubscript => "BinarySubscript",
            Self::BinaryFloorDivide => "BinaryFloorDivide",
            Self::BinaryTrueDivide => "BinaryTrueDivide",
            Self::InplaceFloorDivide => "InplaceFloorDivide",
            Self::InplaceTrueDivide => "InplaceTrueDivide",
            Self::Slice0 => "Slice0",
            Self::Slice1 => "Slice1",
            Self::Slice2 => "Slice2",
            Self::Slice3 => "Slice3",
            Self::StoreSlice0 => "StoreSlice0",
            Self::StoreSlice1 => "StoreSlice1",
            Self::StoreSlice2 => "StoreSlice2",
            Self::StoreSlice3 => "StoreSlice3",
            Self::DeleteSlice0 => "DeleteSlice0",
            Self::DeleteSlice1 => "DeleteSlice1",
            Self::DeleteSlice2 => "DeleteSlice2",
            Self::DeleteSlice3 => "DeleteSlice3",
            Self::StoreMap => "StoreMap",
            Self::InplaceAdd => "InplaceAdd",
            Self::InplaceSubtract => "InplaceSubtract",
            Self::InplaceMultiply => "InplaceMultiply",
            Self::InplaceDivide => "InplaceDivide",
            Self::InplaceModulo => "InplaceModulo",
            Self::StoreSubscript => "StoreSubscript",
            Self::DeleteSubscript => "DeleteSubscript",
            Self::BinaryLshift => "BinaryLshift",
            Self::BinaryRshift => "BinaryRshift",
            Self::BinaryAnd => "BinaryAnd",
            Self::BinaryXor => "BinaryXor",
            Self::BinaryOr => "BinaryOr",
            Self::InplacePower => "InplacePower",
            Self::GetIter => "GetIter",
            Self::PrintExpr => "PrintExpr",
            Self::PrintItem => "PrintItem",
            Self::PrintNewline => "PrintNewline",
            Self::PrintItemTo => "PrintItemTo",
            Self::PrintNewlineTo => "PrintNewlineTo",
            Self::InplaceLshift => "InplaceLshift",
            Self::InplaceRshift => "InplaceRshift",
            Self::InplaceAnd => "InplaceAnd",
            Self::InplaceXor => "InplaceXor",
            Self::InplaceOr => "InplaceOr",
            Self::BreakLoop => "BreakLoop",
            Self::WithCleanup => "WithCleanup",
            Self::LoadLocals => "LoadLocals",
            Self::ReturnValue => "ReturnValue",
            Self::ImportStar => "ImportStar",
            Self::ExecStatement => "ExecStatement",
            Self::YieldValue => "YieldValue",
            Self::PopBlock => "PopBlock",
            Self::EndFinally => "EndFinally",
            Self::BuildClass => "BuildClass",
            Self::StoreName => "StoreName",
            Self::DeleteName => "DeleteName",
            Self::UnpackSequence => "UnpackSequence",
            Self::ForIter => "ForIter",
            Self::ListAppend => "ListAppend",
            Self::StoreAttr => "StoreAttr",
            Self::DeleteAttr => "DeleteAttr",
            Self::StoreGlobal => "StoreGlobal",
            Self::DeleteGlobal => "DeleteGlobal",
            Self::DupTopN => "DupTopN",
            Self::LoadConst => "LoadConst",
            Self::LoadName => "LoadName",
            Self::BuildTuple => "BuildTuple",
            Self::BuildList => "BuildList",
            Self::BuildSet => "BuildSet",
            Self::BuildMap => "BuildMap",
            Self::LoadAttr => "LoadAttr",
            Self::CompareOp => "CompareOp",
            Self::ImportName => "ImportName",
            Self::ImportFrom => "ImportFrom",
            Self::JumpForward => "JumpForward",
            Self::JumpIfFalseOrPop => "JumpIfFalseOrPop",
            Self::JumpIfTrueOrPop => "JumpIfTrueOrPop",
            Self::JumpAbsolute => "JumpAbsolute",
            Self::PopJumpIfFalse => "PopJumpIfFalse",
            Self::PopJumpIfTrue => "PopJumpIfTrue",
            Self::LoadGlobal => "LoadGlobal",
            Self::ContinueLoop => "ContinueLoop",
            Self::SetupLoop => "SetupLoop",
            Self::SetupExcept => "SetupExcept",
            Self::SetupFinally => "SetupFinally",
            Self::LoadLocal => "LoadLocal",
            Self::StoreLocal => "StoreLocal",
            Self::DeleteLocal => "DeleteLocal",
            Self::Raise => "Raise",
            Self::CallFunction => "CallFunction",
            Self::MakeFunction => "MakeFunction",
            Self::BuildSlice => "BuildSlice",
            Self::MakeClosure => "MakeClosure",
            Self::LoadClosure => "LoadClosure",
            Self::LoadDeref => "LoadDeref",
            Self::StoreDeref => "StoreDeref",
            Self::CallFunctionVar => "CallFunctionVar",
            Self::CallFunctionKw => "CallFunctionKw",
            Self::CallFunctionVarKw => "CallFunctionVarKw",
            Self::SetupWith => "SetupWith",
            Self::ExtendedArg => "ExtendedArg",
            Self::SetAdd => "SetAdd",
            Self::MapAdd => "MapAdd",
        }
    }
}
