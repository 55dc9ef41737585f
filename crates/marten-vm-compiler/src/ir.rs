//! Intermediate script tree
//!
//! The parse tree is lowered into an [`IrUnit`] per compiled unit: variable
//! scopes are resolved, strict mode is propagated, and the storage strategy
//! is chosen. A function whose variables are closed over by nested functions
//! (or that touches `arguments`) keeps them in an activation scope object;
//! a leaf function gets flat local slots. Toplevel script variables always
//! live on the executing scope, which is how scripts share a global object.

use rustc_hash::FxHashMap;

use crate::ast::{DeclKind, Expr, ExprKind, FunctionDef, Stmt, StmtKind};
use crate::env::CompilerEnv;

/// Storage strategy for a unit's variables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarStorage {
    /// Flat frame slots, resolved at compile time
    Slots,
    /// Properties of an activation (or the executing) scope object
    Scope,
}

/// A lowered compilation unit
#[derive(Debug)]
pub struct IrUnit {
    /// Unit name
    pub name: Option<String>,
    /// Parameter names
    pub params: Vec<String>,
    /// Function-scoped variable names in declaration order (vars, function
    /// declarations, catch variables)
    pub var_names: Vec<String>,
    /// Name to slot mapping, populated only under [`VarStorage::Slots`]
    pub slot_map: FxHashMap<String, u16>,
    /// Storage strategy
    pub storage: VarStorage,
    /// Strict mode (directive, inherited, or forced by the environment)
    pub is_strict: bool,
    /// A function unit (false for a toplevel script)
    pub is_function: bool,
    /// References `arguments`
    pub uses_arguments: bool,
    /// Body statements
    pub body: Vec<Stmt>,
    /// First line of the unit
    pub base_line: u32,
    /// Character span of the unit in the outer source, for functions
    pub source_span: Option<(usize, usize)>,
}

impl IrUnit {
    /// Number of user slots (params + vars) under slot storage
    pub fn slot_count(&self) -> u16 {
        self.slot_map.len() as u16
    }

    /// Resolve a name to a slot, when the unit uses slot storage
    pub fn slot_of(&self, name: &str) -> Option<u16> {
        self.slot_map.get(name).copied()
    }
}

/// Lower a parsed program into a toplevel script unit.
pub fn lower_program(
    body: Vec<Stmt>,
    env: &CompilerEnv,
    base_line: u32,
) -> IrUnit {
    let is_strict = env.strict_mode || has_strict_directive(&body);
    let mut var_names = Vec::new();
    collect_var_names(&body, &mut var_names);
    IrUnit {
        name: None,
        params: Vec::new(),
        var_names,
        slot_map: FxHashMap::default(),
        // Script variables are properties of the executing scope.
        storage: VarStorage::Scope,
        is_strict,
        is_function: false,
        uses_arguments: false,
        body,
        base_line,
        source_span: None,
    }
}

/// Lower a function definition into a unit, inheriting strictness from the
/// enclosing unit.
pub fn lower_function(
    def: &FunctionDef,
    env: &CompilerEnv,
    parent_strict: bool,
) -> IrUnit {
    let is_strict = env.strict_mode || parent_strict || has_strict_directive(&def.body);
    let mut var_names = Vec::new();
    collect_var_names(&def.body, &mut var_names);
    let uses_arguments = body_uses_arguments(&def.body);
    let has_closures = body_declares_functions(&def.body);
    let storage = if has_closures || uses_arguments {
        VarStorage::Scope
    } else {
        VarStorage::Slots
    };

    let mut slot_map = FxHashMap::default();
    if storage == VarStorage::Slots {
        for param in &def.params {
            let next = slot_map.len() as u16;
            slot_map.entry(param.clone()).or_insert(next);
        }
        for var in &var_names {
            let next = slot_map.len() as u16;
            slot_map.entry(var.clone()).or_insert(next);
        }
    }

    IrUnit {
        name: def.name.clone(),
        params: def.params.clone(),
        var_names,
        slot_map,
        storage,
        is_strict,
        is_function: true,
        uses_arguments,
        body: def.body.clone(),
        base_line: def.pos.line,
        source_span: Some((def.source_start, def.source_end)),
    }
}

/// Leading string-expression statements form the directive prologue.
fn has_strict_directive(body: &[Stmt]) -> bool {
    for stmt in body {
        let StmtKind::Expr(Expr {
            kind: ExprKind::String(s),
            ..
        }) = &stmt.kind
        else {
            return false;
        };
        if s == "use strict" {
            return true;
        }
    }
    false
}

/// Collect function-scoped bindings: `var`/`let`/`const` names, function
/// declaration names and catch variables, without descending into nested
/// function bodies.
fn collect_var_names(body: &[Stmt], out: &mut Vec<String>) {
    for stmt in body {
        collect_from_stmt(stmt, out);
    }
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

fn collect_from_stmt(stmt: &Stmt, out: &mut Vec<String>) {
    match &stmt.kind {
        StmtKind::VarDecl { decls, .. } => {
            for (name, _) in decls {
                push_unique(out, name);
            }
        }
        StmtKind::Function(def) => {
            if let Some(name) = &def.name {
                push_unique(out, name);
            }
        }
        StmtKind::Block(body) => collect_var_names(body, out),
        StmtKind::If { then, other, .. } => {
            collect_from_stmt(then, out);
            if let Some(other) = other {
                collect_from_stmt(other, out);
            }
        }
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
            collect_from_stmt(body, out);
        }
        StmtKind::For { init, body, .. } => {
            if let Some(init) = init {
                collect_from_stmt(init, out);
            }
            collect_from_stmt(body, out);
        }
        StmtKind::ForIn {
            decl, name, body, ..
        } => {
            if decl.is_some() {
                push_unique(out, name);
            }
            collect_from_stmt(body, out);
        }
        StmtKind::Try {
            block,
            catch,
            finally,
        } => {
            collect_var_names(block, out);
            if let Some((name, body)) = catch {
                push_unique(out, name);
                collect_var_names(body, out);
            }
            if let Some(body) = finally {
                collect_var_names(body, out);
            }
        }
        StmtKind::Switch { cases, .. } => {
            for (_, body) in cases {
                collect_var_names(body, out);
            }
        }
        _ => {}
    }
}

/// Does this body define any function (declaration or expression)?
fn body_declares_functions(body: &[Stmt]) -> bool {
    body.iter().any(stmt_declares_function)
}

fn stmt_declares_function(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Function(_) => true,
        StmtKind::Expr(e) | StmtKind::Throw(e) => expr_declares_function(e),
        StmtKind::Return(Some(e)) => expr_declares_function(e),
        StmtKind::VarDecl { decls, .. } => decls
            .iter()
            .any(|(_, init)| init.as_ref().is_some_and(expr_declares_function)),
        StmtKind::Block(body) => body_declares_functions(body),
        StmtKind::If { cond, then, other } => {
            expr_declares_function(cond)
                || stmt_declares_function(then)
                || other.as_deref().is_some_and(stmt_declares_function)
        }
        StmtKind::While { cond, body } | StmtKind::DoWhile { body, cond } => {
            expr_declares_function(cond) || stmt_declares_function(body)
        }
        StmtKind::For {
            init,
            test,
            update,
            body,
        } => {
            init.as_deref().is_some_and(stmt_declares_function)
                || test.as_ref().is_some_and(expr_declares_function)
                || update.as_ref().is_some_and(expr_declares_function)
                || stmt_declares_function(body)
        }
        StmtKind::ForIn { object, body, .. } => {
            expr_declares_function(object) || stmt_declares_function(body)
        }
        StmtKind::Try {
            block,
            catch,
            finally,
        } => {
            body_declares_functions(block)
                || catch
                    .as_ref()
                    .is_some_and(|(_, body)| body_declares_functions(body))
                || finally.as_deref().is_some_and(body_declares_functions)
        }
        StmtKind::Switch { disc, cases } => {
            expr_declares_function(disc)
                || cases.iter().any(|(test, body)| {
                    test.as_ref().is_some_and(expr_declares_function)
                        || body_declares_functions(body)
                })
        }
        _ => false,
    }
}

fn expr_declares_function(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Function(_) => true,
        ExprKind::Unary { operand, .. } => expr_declares_function(operand),
        ExprKind::Update { target, .. } => expr_declares_function(target),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            expr_declares_function(left) || expr_declares_function(right)
        }
        ExprKind::Conditional { cond, then, other } => {
            expr_declares_function(cond)
                || expr_declares_function(then)
                || expr_declares_function(other)
        }
        ExprKind::Assign { target, value, .. } => {
            expr_declares_function(target) || expr_declares_function(value)
        }
        ExprKind::Call { callee, args } | ExprKind::New { callee, args } => {
            expr_declares_function(callee) || args.iter().any(expr_declares_function)
        }
        ExprKind::Member { object, .. } => expr_declares_function(object),
        ExprKind::Index { object, index } => {
            expr_declares_function(object) || expr_declares_function(index)
        }
        ExprKind::Array(items) | ExprKind::Sequence(items) => {
            items.iter().any(expr_declares_function)
        }
        ExprKind::Object(props) => props.iter().any(|(_, v)| expr_declares_function(v)),
        _ => false,
    }
}

/// Does this body reference `arguments` outside nested functions?
fn body_uses_arguments(body: &[Stmt]) -> bool {
    body.iter().any(stmt_uses_arguments)
}

fn stmt_uses_arguments(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Expr(e) | StmtKind::Throw(e) => expr_uses_arguments(e),
        StmtKind::Return(Some(e)) => expr_uses_arguments(e),
        StmtKind::VarDecl { decls, .. } => decls
            .iter()
            .any(|(_, init)| init.as_ref().is_some_and(expr_uses_arguments)),
        StmtKind::Block(body) => body_uses_arguments(body),
        StmtKind::If { cond, then, other } => {
            expr_uses_arguments(cond)
                || stmt_uses_arguments(then)
                || other.as_deref().is_some_and(stmt_uses_arguments)
        }
        StmtKind::While { cond, body } | StmtKind::DoWhile { body, cond } => {
            expr_uses_arguments(cond) || stmt_uses_arguments(body)
        }
        StmtKind::For {
            init,
            test,
            update,
            body,
        } => {
            init.as_deref().is_some_and(stmt_uses_arguments)
                || test.as_ref().is_some_and(expr_uses_arguments)
                || update.as_ref().is_some_and(expr_uses_arguments)
                || stmt_uses_arguments(body)
        }
        StmtKind::ForIn { object, body, .. } => {
            expr_uses_arguments(object) || stmt_uses_arguments(body)
        }
        StmtKind::Try {
            block,
            catch,
            finally,
        } => {
            body_uses_arguments(block)
                || catch
                    .as_ref()
                    .is_some_and(|(_, body)| body_uses_arguments(body))
                || finally.as_deref().is_some_and(body_uses_arguments)
        }
        StmtKind::Switch { disc, cases } => {
            expr_uses_arguments(disc)
                || cases.iter().any(|(test, body)| {
                    test.as_ref().is_some_and(expr_uses_arguments) || body_uses_arguments(body)
                })
        }
        _ => false,
    }
}

fn expr_uses_arguments(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Name(name) => name == "arguments",
        // A nested function has its own arguments object.
        ExprKind::Function(_) => false,
        ExprKind::Unary { operand, .. } => expr_uses_arguments(operand),
        ExprKind::Update { target, .. } => expr_uses_arguments(target),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            expr_uses_arguments(left) || expr_uses_arguments(right)
        }
        ExprKind::Conditional { cond, then, other } => {
            expr_uses_arguments(cond) || expr_uses_arguments(then) || expr_uses_arguments(other)
        }
        ExprKind::Assign { target, value, .. } => {
            expr_uses_arguments(target) || expr_uses_arguments(value)
        }
        ExprKind::Call { callee, args } | ExprKind::New { callee, args } => {
            expr_uses_arguments(callee) || args.iter().any(expr_uses_arguments)
        }
        ExprKind::Member { object, .. } => expr_uses_arguments(object),
        ExprKind::Index { object, index } => {
            expr_uses_arguments(object) || expr_uses_arguments(index)
        }
        ExprKind::Array(items) | ExprKind::Sequence(items) => {
            items.iter().any(expr_uses_arguments)
        }
        ExprKind::Object(props) => props.iter().any(|(_, v)| expr_uses_arguments(v)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn program(source: &str) -> Vec<Stmt> {
        let env = CompilerEnv::default();
        Parser::new(source, 1, &env).unwrap().parse_program().unwrap()
    }

    #[test]
    fn test_script_vars_use_scope_storage() {
        let env = CompilerEnv::default();
        let unit = lower_program(program("var a = 1; var b;"), &env, 1);
        assert_eq!(unit.storage, VarStorage::Scope);
        assert_eq!(unit.var_names, vec!["a", "b"]);
    }

    #[test]
    fn test_leaf_function_uses_slots() {
        let env = CompilerEnv::default();
        let body = program("function f(a, b) { var c = a + b; return c; }");
        let StmtKind::Function(def) = &body[0].kind else {
            panic!()
        };
        let unit = lower_function(def, &env, false);
        assert_eq!(unit.storage, VarStorage::Slots);
        assert_eq!(unit.slot_of("a"), Some(0));
        assert_eq!(unit.slot_of("b"), Some(1));
        assert_eq!(unit.slot_of("c"), Some(2));
    }

    #[test]
    fn test_closure_forces_activation() {
        let env = CompilerEnv::default();
        let body = program("function f() { var x = 1; return function () { return x; }; }");
        let StmtKind::Function(def) = &body[0].kind else {
            panic!()
        };
        let unit = lower_function(def, &env, false);
        assert_eq!(unit.storage, VarStorage::Scope);
    }

    #[test]
    fn test_arguments_forces_activation() {
        let env = CompilerEnv::default();
        let body = program("function f() { return arguments[0]; }");
        let StmtKind::Function(def) = &body[0].kind else {
            panic!()
        };
        let unit = lower_function(def, &env, false);
        assert_eq!(unit.storage, VarStorage::Scope);
        assert!(unit.uses_arguments);
    }

    #[test]
    fn test_strict_directive_propagates() {
        let env = CompilerEnv::default();
        let body = program("'use strict'; function f() { return 1; }");
        let unit = lower_program(body, &env, 1);
        assert!(unit.is_strict);
        let StmtKind::Function(def) = &unit.body[1].kind else {
            panic!()
        };
        let inner = lower_function(def, &env, unit.is_strict);
        assert!(inner.is_strict);
    }

    #[test]
    fn test_catch_variable_is_function_scoped() {
        let env = CompilerEnv::default();
        let body = program("function f() { try { g(); } catch (e) { return e; } }");
        let StmtKind::Function(def) = &body[0].kind else {
            panic!()
        };
        let unit = lower_function(def, &env, false);
        assert!(unit.slot_of("e").is_some());
    }
}
