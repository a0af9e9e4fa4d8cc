//! The editable routine representation

use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::constant::Constant;
use crate::instruction::{Item, Label};

/// A routine in its editable form: an ordered sequence of instructions and
/// jump-target labels plus the header metadata the loader needs.
///
/// Routines are produced by the disassembler or built directly, mutated
/// freely, and consumed read-only by the assembler. Side tables (constants,
/// names, local slots) are never stored here; the assembler derives them
/// fresh on every encode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routine {
    /// Ordered body: instructions interleaved with jump-target labels
    pub items: Vec<Item>,
    /// Routine name, for diagnostics and the loader header
    pub name: String,
    /// Source file name, for diagnostics and the loader header
    pub filename: String,
    /// Raw loader flag bits (see the `FLAG_*` constants)
    pub flags: u32,
    /// Declared parameter names, in declaration order; these seed the
    /// local-slot table before any instruction is processed
    pub param_names: Vec<String>,
    /// Documentation constant occupying pool slot 0, or `None` when this
    /// body is not a function (module and class bodies carry no doc slot)
    pub docstring: Option<Rc<Constant>>,
    /// Source line of the routine header; instruction lines are relative
    /// to this
    pub first_line: u32,
    /// Name-table placement hints for singleton names the reference loader
    /// materializes even when nothing looks them up: maps each such name to
    /// the entry it historically followed (`None` = table front). Populated
    /// by the disassembler, consulted only by compatibility-mode encode.
    pub name_table_hints: FxHashMap<String, Option<String>>,
    next_label: u32,
}

impl Routine {
    /// Flag bit: routine uses optimized local-slot access
    pub const FLAG_OPTIMIZED: u32 = 0x0001;
    /// Flag bit: routine gets a fresh local namespace per call
    pub const FLAG_NEWLOCALS: u32 = 0x0002;
    /// Flag bit: routine accepts a trailing positional-argument tuple
    pub const FLAG_VARARGS: u32 = 0x0004;
    /// Flag bit: routine accepts a trailing keyword-argument map
    pub const FLAG_VARKEYWORDS: u32 = 0x0008;
    /// Flag bit: routine is nested inside another routine
    pub const FLAG_NESTED: u32 = 0x0010;
    /// Flag bit: routine is a generator body
    pub const FLAG_GENERATOR: u32 = 0x0020;

    /// Create an empty routine
    pub fn new(name: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            name: name.into(),
            filename: filename.into(),
            flags: 0,
            param_names: Vec::new(),
            docstring: None,
            first_line: 1,
            name_table_hints: FxHashMap::default(),
            next_label: 0,
        }
    }

    /// Create a new routine builder
    pub fn builder(name: impl Into<String>) -> RoutineBuilder {
        RoutineBuilder::new(name)
    }

    /// Allocate a label that is fresh within this routine
    pub fn new_label(&mut self) -> Label {
        let label = Label::new(self.next_label);
        self.next_label += 1;
        label
    }

    /// Whether this body is a function (carries a doc slot)
    #[inline]
    pub fn is_function(&self) -> bool {
        self.docstring.is_some()
    }

    /// Whether this routine is a generator body
    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags & Self::FLAG_GENERATOR != 0
    }

    /// The declared-parameter count the loader header records: trailing
    /// vararg/kwarg slots are part of `param_names` but not of the count
    pub fn declared_param_count(&self) -> usize {
        let mut count = self.param_names.len();
        if self.flags & Self::FLAG_VARARGS != 0 {
            count = count.saturating_sub(1);
        }
        if self.flags & Self::FLAG_VARKEYWORDS != 0 {
            count = count.saturating_sub(1);
        }
        count
    }

    /// Iterate over the instructions in body order, skipping labels
    pub fn instructions(&self) -> impl Iterator<Item = &crate::Instruction> {
        self.items.iter().filter_map(Item::as_inst)
    }
}

/// Builder for creating routines
#[derive(Debug)]
pub struct RoutineBuilder {
    name: String,
    filename: String,
    flags: u32,
    param_names: Vec<String>,
    docstring: Option<Rc<Constant>>,
    first_line: u32,
    items: Vec<Item>,
}

impl RoutineBuilder {
    /// Create a new routine builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: "<input>".into(),
            flags: 0,
            param_names: Vec::new(),
            docstring: None,
            first_line: 1,
            items: Vec::new(),
        }
    }

    /// Set the source file name
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Set the raw flag bits
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Add a declared parameter
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.param_names.push(name.into());
        self
    }

    /// Set all declared parameters
    pub fn params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.param_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Mark this body as a function with the given doc constant
    pub fn docstring(mut self, doc: Rc<Constant>) -> Self {
        self.docstring = Some(doc);
        self
    }

    /// Set the routine's first source line
    pub fn first_line(mut self, line: u32) -> Self {
        self.first_line = line;
        self
    }

    /// Append a body item
    pub fn item(mut self, item: impl Into<Item>) -> Self {
        self.items.push(item.into());
        self
    }

    /// Set the whole body
    pub fn items(mut self, items: Vec<Item>) -> Self {
        self.items = items;
        self
    }

    /// Build the routine.
    ///
    /// The label allocator resumes past the highest handle present in the
    /// body, so labels created before the build stay unique afterwards.
    pub fn build(self) -> Routine {
        let next_label = self
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Label(label) => Some(label.id()),
                Item::Inst(inst) => inst.operand.jump_target().map(Label::id),
            })
            .max()
            .map_or(0, |max| max + 1);

        Routine {
            items: self.items,
            name: self.name,
            filename: self.filename,
            flags: self.flags,
            param_names: self.param_names,
            docstring: self.docstring,
            first_line: self.first_line,
            name_table_hints: FxHashMap::default(),
            next_label,
        }
    }
}
