//! Debugger-facing view of compiled units

use serde::{Deserialize, Serialize};

use crate::script::ScriptFunction;

/// Tree-shaped description of a compiled unit, mirroring its nested function
/// structure. Posted to an attached debugger after compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebuggableScript {
    /// Source name of the unit
    pub source_name: String,
    /// Function name, when the unit is a named function
    pub function_name: Option<String>,
    /// Whether this node describes a function (false for the toplevel)
    pub is_function: bool,
    /// Declared parameter count
    pub param_count: u16,
    /// Distinct source lines with generated code
    pub line_numbers: Vec<u32>,
    /// Views of the nested functions, in definition order
    pub nested: Vec<DebuggableScript>,
}

impl DebuggableScript {
    /// Build the debuggable tree for a compiled unit
    pub fn from_script(script: &ScriptFunction) -> Self {
        Self {
            source_name: script.source_name.clone(),
            function_name: script.name.clone(),
            is_function: script.flags.is_function,
            param_count: script.param_count,
            line_numbers: script.line_table.lines(),
            nested: script
                .functions
                .iter()
                .map(|f| Self::from_script(f))
                .collect(),
        }
    }

    /// Walk the tree depth-first, script before its nested functions
    pub fn visit(&self, f: &mut dyn FnMut(&DebuggableScript)) {
        f(self);
        for nested in &self.nested {
            nested.visit(f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptFlags;
    use std::sync::Arc;

    #[test]
    fn test_tree_mirrors_nesting() {
        let inner = ScriptFunction::builder("t.js")
            .name("inner")
            .flags(ScriptFlags {
                is_function: true,
                ..Default::default()
            })
            .build();
        let outer = ScriptFunction::builder("t.js")
            .function(Arc::new(inner))
            .build();
        let view = DebuggableScript::from_script(&outer);
        assert!(!view.is_function);
        assert_eq!(view.nested.len(), 1);
        assert_eq!(view.nested[0].function_name.as_deref(), Some("inner"));

        let mut order = Vec::new();
        view.visit(&mut |node| order.push(node.is_function));
        assert_eq!(order, vec![false, true]);
    }
}
