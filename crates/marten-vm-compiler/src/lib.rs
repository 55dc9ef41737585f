//! ECMAScript to bytecode compiler
//!
//! The pipeline: lex and parse to an AST, lower to an IR unit (scope
//! resolution, strict-mode propagation), then generate the instruction
//! stream. Entry points exist for whole-script compilation and for the
//! single-function mode used by `compileFunction`-style hosts.

pub mod ast;
mod codegen;
mod env;
mod error;
pub mod ir;
mod lexer;
mod parser;

use std::sync::Arc;

use marten_vm_bytecode::ScriptFunction;

pub use env::{CompilerEnv, LanguageVersion};
pub use error::{CompileError, CompileResult};
pub use lexer::{Keyword, Lexer, Punct, Token, TokenKind};
pub use parser::Parser;

/// Compile a whole script.
pub fn compile_script(
    source: &str,
    source_name: &str,
    base_line: u32,
    env: &CompilerEnv,
    security_tag: Option<String>,
) -> CompileResult<Arc<ScriptFunction>> {
    let mut parser = Parser::new(source, base_line, env)?;
    let program = parser.parse_program()?;
    let unit = ir::lower_program(program, env, base_line);
    tracing::debug!(source_name, base_line, "compiling script");
    codegen::compile_unit(&unit, env, source, source_name, security_tag)
}

/// Compile a source expected to contain a single function definition and
/// return that function's artifact. Stray semicolons are tolerated around
/// the definition.
pub fn compile_function(
    source: &str,
    source_name: &str,
    base_line: u32,
    env: &CompilerEnv,
    security_tag: Option<String>,
) -> CompileResult<Arc<ScriptFunction>> {
    let mut parser = Parser::new(source, base_line, env)?;
    let def = parser.parse_single_function()?;
    let unit = ir::lower_function(&def, env, env.strict_mode);
    tracing::debug!(source_name, name = ?def.name, "compiling function");
    codegen::compile_unit(&unit, env, source, source_name, security_tag)
}

/// Is `source` a complete compilable unit?
///
/// Parses with a discarding reporter and returns false only when parsing
/// failed because the input ended prematurely; an interactive caller may
/// then gather more input and retry. Other syntax errors return true, since
/// appending text cannot fix them.
pub fn string_is_compilable_unit(source: &str, env: &CompilerEnv) -> bool {
    let result = Parser::new(source, 1, env).and_then(|mut p| p.parse_program().map(|_| ()));
    match result {
        Ok(()) => true,
        Err(error) => !error.is_premature_eof(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_vm_bytecode::Instruction;

    #[test]
    fn test_compile_script_produces_toplevel() {
        let env = CompilerEnv::default();
        let script = compile_script("var a = 1 + 2;", "test.js", 1, &env, None).unwrap();
        assert!(!script.flags.is_function);
        assert!(script.flags.is_interpreted);
        assert!(script.source.is_some());
        // Scripts return their completion value.
        assert!(matches!(
            script.instructions.last(),
            Some(Instruction::Return)
        ));
    }

    #[test]
    fn test_compile_function_requires_single_function() {
        let env = CompilerEnv::default();
        let f = compile_function(";; function f(a) { return a; } ;", "f.js", 1, &env, None)
            .unwrap();
        assert!(f.flags.is_function);
        assert_eq!(f.param_count, 1);
        assert!(compile_function("var x = 1;", "f.js", 1, &env, None).is_err());
        assert!(
            compile_function("function f() {} function g() {}", "f.js", 1, &env, None).is_err()
        );
    }

    #[test]
    fn test_compilable_unit_detection() {
        let env = CompilerEnv::default();
        assert!(!string_is_compilable_unit("function f(){", &env));
        assert!(string_is_compilable_unit("function f(){}", &env));
        assert!(!string_is_compilable_unit("1 +", &env));
        // A hard syntax error is "complete": more input cannot fix it.
        assert!(string_is_compilable_unit("var 1 = x;", &env));
    }

    #[test]
    fn test_nested_functions_in_table() {
        let env = CompilerEnv::default();
        let script = compile_script(
            "function outer() { var x = 1; return function inner() { return x; }; }",
            "t.js",
            1,
            &env,
            None,
        )
        .unwrap();
        assert_eq!(script.functions.len(), 1);
        let outer = &script.functions[0];
        assert_eq!(outer.name.as_deref(), Some("outer"));
        assert!(outer.flags.needs_activation);
        assert_eq!(outer.functions.len(), 1);
        assert_eq!(outer.functions[0].name.as_deref(), Some("inner"));
    }

    #[test]
    fn test_leaf_function_uses_slots() {
        let env = CompilerEnv::default();
        let script =
            compile_script("function add(a, b) { return a + b; }", "t.js", 1, &env, None)
                .unwrap();
        let add = &script.functions[0];
        assert!(!add.flags.needs_activation);
        assert!(add
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::GetLocal { .. })));
    }

    #[test]
    fn test_generate_source_flag() {
        let env = CompilerEnv {
            generate_source: false,
            ..Default::default()
        };
        let script = compile_script("var a;", "t.js", 1, &env, None).unwrap();
        assert!(script.source.is_none());
    }

    #[test]
    fn test_base_line_offsets_line_table() {
        let env = CompilerEnv::default();
        let script = compile_script("a;\nb;", "t.js", 10, &env, None).unwrap();
        assert_eq!(script.base_line, 10);
        assert!(script.line_table.lines().contains(&11));
    }

    #[test]
    fn test_regex_literal_constant() {
        let env = CompilerEnv::default();
        let script = compile_script("var r = /ab+c/gi;", "t.js", 1, &env, None).unwrap();
        assert!(script.constants.iter().any(|c| matches!(
            c,
            marten_vm_bytecode::Constant::RegExp { source, flags }
                if source == "ab+c" && flags == "gi"
        )));
    }
}
