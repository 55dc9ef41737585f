//! Compiled script and function artifacts

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constant::Constant;
use crate::instruction::Instruction;

/// Flags of a compiled unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptFlags {
    /// A function artifact (false for a toplevel script)
    pub is_function: bool,
    /// Compiled under strict mode
    pub is_strict: bool,
    /// References the `arguments` object
    pub uses_arguments: bool,
    /// Compiled for the interpreter (continuation capture requires this)
    pub is_interpreted: bool,
    /// Variables live in an activation scope object instead of local slots
    /// (required when nested functions close over them)
    pub needs_activation: bool,
}

/// A compiled executable unit: a toplevel script or a single function.
///
/// Nested function definitions are compiled into the `functions` table and
/// instantiated at runtime by `MakeClosure`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptFunction {
    /// Function name (None for anonymous functions and scripts)
    pub name: Option<String>,
    /// Source name supplied at compile time
    pub source_name: String,
    /// First line number of the unit in its source
    pub base_line: u32,
    /// Number of declared parameters
    pub param_count: u16,
    /// Number of local slots (parameters included)
    pub local_count: u16,
    /// Maximum value-stack depth needed by `instructions`
    pub max_stack: u16,
    /// Unit flags
    pub flags: ScriptFlags,
    /// Parameter names, in order
    pub param_names: Vec<String>,
    /// Local slot names (debugging)
    pub local_names: Vec<String>,
    /// The instruction stream
    pub instructions: Vec<Instruction>,
    /// Constant pool
    pub constants: Vec<Constant>,
    /// Nested compiled functions
    pub functions: Vec<Arc<ScriptFunction>>,
    /// Instruction index to source line mapping
    pub line_table: LineTable,
    /// Raw source text, retained when the compiler environment asks for it
    pub source: Option<String>,
    /// Opaque security tag threaded through from compilation
    pub security_tag: Option<String>,
}

impl ScriptFunction {
    /// Start building a unit
    pub fn builder(source_name: impl Into<String>) -> ScriptFunctionBuilder {
        ScriptFunctionBuilder::new(source_name)
    }

    /// The function name or `<anonymous>`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Source line for an instruction index
    pub fn line_for(&self, pc: usize) -> u32 {
        self.line_table.find(pc as u32).unwrap_or(self.base_line)
    }

    /// Look up a constant
    pub fn constant(&self, index: u16) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Look up a string constant (names)
    pub fn name_constant(&self, index: u16) -> Option<&str> {
        self.constants.get(index as usize).and_then(Constant::as_str)
    }
}

/// Builder for compiled units
#[derive(Debug)]
pub struct ScriptFunctionBuilder {
    name: Option<String>,
    source_name: String,
    base_line: u32,
    param_count: u16,
    local_count: u16,
    max_stack: u16,
    flags: ScriptFlags,
    param_names: Vec<String>,
    local_names: Vec<String>,
    instructions: Vec<Instruction>,
    constants: Vec<Constant>,
    functions: Vec<Arc<ScriptFunction>>,
    line_table: LineTable,
    source: Option<String>,
    security_tag: Option<String>,
}

impl ScriptFunctionBuilder {
    /// Create a builder for a unit from the named source
    pub fn new(source_name: impl Into<String>) -> Self {
        Self {
            name: None,
            source_name: source_name.into(),
            base_line: 1,
            param_count: 0,
            local_count: 0,
            max_stack: 0,
            flags: ScriptFlags::default(),
            param_names: Vec::new(),
            local_names: Vec::new(),
            instructions: Vec::new(),
            constants: Vec::new(),
            functions: Vec::new(),
            line_table: LineTable::default(),
            source: None,
            security_tag: None,
        }
    }

    /// Set the unit name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the first source line
    pub fn base_line(mut self, line: u32) -> Self {
        self.base_line = line;
        self
    }

    /// Set parameter count
    pub fn param_count(mut self, count: u16) -> Self {
        self.param_count = count;
        self
    }

    /// Set local slot count
    pub fn local_count(mut self, count: u16) -> Self {
        self.local_count = count;
        self
    }

    /// Set the maximum stack depth
    pub fn max_stack(mut self, depth: u16) -> Self {
        self.max_stack = depth;
        self
    }

    /// Set flags
    pub fn flags(mut self, flags: ScriptFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Add a parameter name
    pub fn param_name(mut self, name: impl Into<String>) -> Self {
        self.param_names.push(name.into());
        self
    }

    /// Set local slot names
    pub fn local_names(mut self, names: Vec<String>) -> Self {
        self.local_names = names;
        self
    }

    /// Set the instruction stream
    pub fn instructions(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    /// Set the constant pool
    pub fn constants(mut self, constants: Vec<Constant>) -> Self {
        self.constants = constants;
        self
    }

    /// Add a nested function
    pub fn function(mut self, function: Arc<ScriptFunction>) -> Self {
        self.functions.push(function);
        self
    }

    /// Set the nested-function table
    pub fn functions(mut self, functions: Vec<Arc<ScriptFunction>>) -> Self {
        self.functions = functions;
        self
    }

    /// Set the line table
    pub fn line_table(mut self, table: LineTable) -> Self {
        self.line_table = table;
        self
    }

    /// Retain raw source
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach a security tag
    pub fn security_tag(mut self, tag: Option<String>) -> Self {
        self.security_tag = tag;
        self
    }

    /// Build the unit
    pub fn build(self) -> ScriptFunction {
        ScriptFunction {
            name: self.name,
            source_name: self.source_name,
            base_line: self.base_line,
            param_count: self.param_count,
            local_count: self.local_count,
            max_stack: self.max_stack,
            flags: self.flags,
            param_names: self.param_names,
            local_names: self.local_names,
            instructions: self.instructions,
            constants: self.constants,
            functions: self.functions,
            line_table: self.line_table,
            source: self.source,
            security_tag: self.security_tag,
        }
    }
}

/// Instruction index to source line mapping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineTable {
    /// (instruction index, line) pairs, ascending by instruction index
    pub entries: Vec<(u32, u32)>,
}

impl LineTable {
    /// Record that instructions from `pc` onward belong to `line`
    pub fn add(&mut self, pc: u32, line: u32) {
        if self.entries.last().map(|&(_, l)| l) != Some(line) {
            self.entries.push((pc, line));
        }
    }

    /// The source line owning the instruction at `pc`
    pub fn find(&self, pc: u32) -> Option<u32> {
        match self.entries.binary_search_by_key(&pc, |&(p, _)| p) {
            Ok(i) => Some(self.entries[i].1),
            Err(0) => None,
            Err(i) => Some(self.entries[i - 1].1),
        }
    }

    /// All distinct line numbers in the table
    pub fn lines(&self) -> Vec<u32> {
        let mut lines: Vec<u32> = self.entries.iter().map(|&(_, l)| l).collect();
        lines.sort_unstable();
        lines.dedup();
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let unit = ScriptFunction::builder("test.js")
            .name("add")
            .param_count(2)
            .local_count(2)
            .max_stack(2)
            .instructions(vec![
                Instruction::GetLocal { index: 0 },
                Instruction::GetLocal { index: 1 },
                Instruction::Add,
                Instruction::Return,
            ])
            .build();
        assert_eq!(unit.display_name(), "add");
        assert_eq!(unit.instructions.len(), 4);
        assert!(!unit.flags.is_function);
    }

    #[test]
    fn test_line_table_lookup() {
        let mut table = LineTable::default();
        table.add(0, 1);
        table.add(5, 2);
        table.add(9, 7);
        assert_eq!(table.find(0), Some(1));
        assert_eq!(table.find(4), Some(1));
        assert_eq!(table.find(6), Some(2));
        assert_eq!(table.find(100), Some(7));
        assert_eq!(table.lines(), vec![1, 2, 7]);
    }
}
