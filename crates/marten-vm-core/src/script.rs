//! Executable script artifacts

use std::sync::Arc;

use marten_vm_bytecode::{DebuggableScript, ScriptFunction};

use crate::context::Context;
use crate::error::JsResult;
use crate::object::ScriptObject;
use crate::value::Value;

/// A compiled toplevel script, executable against a scope.
#[derive(Debug, Clone)]
pub struct Script {
    unit: Arc<ScriptFunction>,
}

impl Script {
    pub(crate) fn new(unit: Arc<ScriptFunction>) -> Self {
        Self { unit }
    }

    /// The underlying compiled unit
    pub fn unit(&self) -> &Arc<ScriptFunction> {
        &self.unit
    }

    /// Execute against `scope`, with the scope object as the `this` value.
    pub fn exec(&self, cx: &Context, scope: &Arc<ScriptObject>) -> JsResult<Value> {
        crate::interpreter::execute_top(
            cx,
            self.unit.clone(),
            scope.clone(),
            Value::object(scope.clone()),
            &[],
            false,
        )
    }

    /// The tree-shaped view posted to debuggers
    pub fn debuggable(&self) -> DebuggableScript {
        DebuggableScript::from_script(&self.unit)
    }

    /// Decompiled form of this script
    pub fn decompile(&self, indent: usize) -> String {
        decompile(self.unit.source.as_deref(), self.unit.display_name(), indent)
    }
}

/// Decompile a compiled unit: the retained raw source re-indented, or the
/// `[native code]` sentinel when no source was kept.
pub fn decompile(source: Option<&str>, name: &str, indent: usize) -> String {
    match source {
        Some(source) => {
            let pad = " ".repeat(indent);
            source
                .lines()
                .map(|line| format!("{}{}", pad, line))
                .collect::<Vec<_>>()
                .join("\n")
        }
        None => format!("function {}() {{ [native code] }}", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompile_without_source() {
        assert_eq!(
            decompile(None, "f", 0),
            "function f() { [native code] }"
        );
    }

    #[test]
    fn test_decompile_reindents() {
        assert_eq!(decompile(Some("a;\nb;"), "f", 2), "  a;\n  b;");
    }
}
