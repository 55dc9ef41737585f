//! Code generation
//!
//! Lowers an [`IrUnit`] into a [`ScriptFunction`]. Jumps are emitted with
//! placeholder offsets and patched once their targets are known. The value
//! stack is tracked linearly to size the frame.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use marten_vm_bytecode::{Constant, Instruction, LineTable, ScriptFlags, ScriptFunction};

use crate::ast::*;
use crate::env::CompilerEnv;
use crate::error::{CompileError, CompileResult};
use crate::ir::{self, IrUnit, VarStorage};

/// Constant pool deduplication key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Number(u64),
    Str(String),
    Regex(String, String),
}

/// Per-loop jump patch lists
#[derive(Debug, Default)]
struct LoopCtx {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

/// Code generator for one unit
struct CodeGen<'a> {
    env: &'a CompilerEnv,
    unit: &'a IrUnit,
    source: &'a str,
    source_name: &'a str,
    security_tag: Option<String>,
    code: Vec<Instruction>,
    constants: Vec<Constant>,
    const_map: FxHashMap<ConstKey, u16>,
    line_table: LineTable,
    current_line: u32,
    functions: Vec<Arc<ScriptFunction>>,
    loops: Vec<LoopCtx>,
    temp_base: u16,
    temps_live: u16,
    temps_max: u16,
    /// Slot receiving expression-statement values in script units; the
    /// script's completion value.
    completion_slot: Option<u16>,
}

/// Compile a lowered unit (and, recursively, its nested functions).
pub fn compile_unit(
    unit: &IrUnit,
    env: &CompilerEnv,
    source: &str,
    source_name: &str,
    security_tag: Option<String>,
) -> CompileResult<Arc<ScriptFunction>> {
    let temp_base = if unit.storage == VarStorage::Slots {
        unit.slot_count()
    } else {
        0
    };
    let mut generator = CodeGen {
        env,
        unit,
        source,
        source_name,
        security_tag,
        code: Vec::new(),
        constants: Vec::new(),
        const_map: FxHashMap::default(),
        line_table: LineTable::default(),
        current_line: 0,
        functions: Vec::new(),
        loops: Vec::new(),
        temp_base,
        temps_live: 0,
        temps_max: 0,
        completion_slot: None,
    };
    generator.emit_unit()?;
    Ok(Arc::new(generator.finish()))
}

impl<'a> CodeGen<'a> {
    fn emit_unit(&mut self) -> CompileResult<()> {
        // Scripts complete with the value of the last executed expression
        // statement; it accumulates in a reserved slot.
        if !self.unit.is_function {
            self.completion_slot = Some(self.alloc_temp());
        }
        // Prologue: declare function-scoped bindings on the variable object,
        // then bind hoisted function declarations.
        if self.unit.storage == VarStorage::Scope {
            for name in self.unit.var_names.clone() {
                let index = self.name_const(&name)?;
                self.emit(Instruction::DeclareVar { name: index });
            }
        }
        let mut decls = Vec::new();
        collect_function_decls(&self.unit.body, &mut decls);
        for def in decls {
            let index = self.compile_nested(&def)?;
            self.emit(Instruction::MakeClosure { function: index });
            let name = def.name.clone().unwrap_or_default();
            self.emit_store_name(&name)?;
            self.emit(Instruction::Pop);
        }
        let body = self.unit.body.clone();
        for stmt in &body {
            self.emit_stmt(stmt)?;
        }
        match self.completion_slot {
            Some(slot) => {
                self.emit(Instruction::GetLocal { index: slot });
                self.emit(Instruction::Return);
            }
            None => self.emit(Instruction::ReturnUndefined),
        }
        Ok(())
    }

    fn finish(self) -> ScriptFunction {
        let local_count = self.temp_base + self.temps_max;
        let mut local_names: Vec<String> = Vec::with_capacity(local_count as usize);
        if self.unit.storage == VarStorage::Slots {
            let mut by_slot: Vec<(u16, String)> = self
                .unit
                .slot_map
                .iter()
                .map(|(name, &slot)| (slot, name.clone()))
                .collect();
            by_slot.sort_by_key(|&(slot, _)| slot);
            local_names.extend(by_slot.into_iter().map(|(_, name)| name));
        }
        for i in 0..self.temps_max {
            local_names.push(format!("%t{}", i));
        }
        let max_stack = compute_max_stack(&self.code);
        let raw_source = if self.env.generate_source {
            Some(match self.unit.source_span {
                Some((start, end)) => slice_chars(self.source, start, end),
                None => self.source.to_string(),
            })
        } else {
            None
        };
        ScriptFunction {
            name: self.unit.name.clone(),
            source_name: self.source_name.to_string(),
            base_line: self.unit.base_line,
            param_count: self.unit.params.len() as u16,
            local_count,
            max_stack,
            flags: ScriptFlags {
                is_function: self.unit.is_function,
                is_strict: self.unit.is_strict,
                uses_arguments: self.unit.uses_arguments,
                is_interpreted: true,
                needs_activation: self.unit.is_function
                    && self.unit.storage == VarStorage::Scope,
            },
            param_names: self.unit.params.clone(),
            local_names,
            instructions: self.code,
            constants: self.constants,
            functions: self.functions,
            line_table: if self.env.generate_debug_info {
                self.line_table
            } else {
                LineTable::default()
            },
            source: raw_source,
            security_tag: self.security_tag,
        }
    }

    fn compile_nested(&mut self, def: &FunctionDef) -> CompileResult<u16> {
        let unit = ir::lower_function(def, self.env, self.unit.is_strict);
        let compiled = compile_unit(
            &unit,
            self.env,
            self.source,
            self.source_name,
            self.security_tag.clone(),
        )?;
        let index = self.functions.len();
        if index > u16::MAX as usize {
            return Err(CompileError::internal("too many nested functions"));
        }
        self.functions.push(compiled);
        Ok(index as u16)
    }

    // ==================== statements ====================

    fn emit_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        self.mark_line(stmt.pos.line);
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.emit_expr(expr)?;
                if let Some(slot) = self.completion_slot {
                    self.emit(Instruction::SetLocal { index: slot });
                }
                self.emit(Instruction::Pop);
            }
            StmtKind::VarDecl { decls, .. } => {
                for (name, init) in decls {
                    if let Some(init) = init {
                        self.emit_expr(init)?;
                        self.emit_store_name(name)?;
                        self.emit(Instruction::Pop);
                    }
                }
            }
            // Bound during the prologue pass.
            StmtKind::Function(_) => {}
            StmtKind::Return(value) => {
                if !self.unit.is_function {
                    return Err(CompileError::syntax(
                        "return must be inside a function",
                        stmt.pos.line,
                        stmt.pos.column,
                    ));
                }
                match value {
                    Some(expr) => {
                        self.emit_expr(expr)?;
                        self.emit(Instruction::Return);
                    }
                    None => self.emit(Instruction::ReturnUndefined),
                }
            }
            StmtKind::If { cond, then, other } => {
                self.emit_expr(cond)?;
                let to_else = self.emit_jump(Instruction::JumpIfFalse { offset: 0 });
                self.emit_stmt(then)?;
                match other {
                    Some(other) => {
                        let to_end = self.emit_jump(Instruction::Jump { offset: 0 });
                        self.patch_jump(to_else);
                        self.emit_stmt(other)?;
                        self.patch_jump(to_end);
                    }
                    None => self.patch_jump(to_else),
                }
            }
            StmtKind::Block(body) => {
                for stmt in body {
                    self.emit_stmt(stmt)?;
                }
            }
            StmtKind::While { cond, body } => {
                let start = self.code.len();
                self.emit_expr(cond)?;
                let exit = self.emit_jump(Instruction::JumpIfFalse { offset: 0 });
                self.loops.push(LoopCtx::default());
                self.emit_stmt(body)?;
                self.emit_jump_to(start);
                let ctx = self.loops.pop().unwrap_or_default();
                self.patch_jump(exit);
                for jump in ctx.breaks {
                    self.patch_jump(jump);
                }
                for jump in ctx.continues {
                    self.patch_jump_to(jump, start);
                }
            }
            StmtKind::DoWhile { body, cond } => {
                let start = self.code.len();
                self.loops.push(LoopCtx::default());
                self.emit_stmt(body)?;
                let cond_at = self.code.len();
                self.emit_expr(cond)?;
                let insn = self.code.len();
                self.emit(Instruction::JumpIfTrue { offset: 0 });
                self.patch_jump_to(insn, start);
                let ctx = self.loops.pop().unwrap_or_default();
                for jump in ctx.breaks {
                    self.patch_jump(jump);
                }
                for jump in ctx.continues {
                    self.patch_jump_to(jump, cond_at);
                }
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.emit_stmt(init)?;
                }
                let start = self.code.len();
                let exit = match test {
                    Some(test) => {
                        self.emit_expr(test)?;
                        Some(self.emit_jump(Instruction::JumpIfFalse { offset: 0 }))
                    }
                    None => None,
                };
                self.loops.push(LoopCtx::default());
                self.emit_stmt(body)?;
                let update_at = self.code.len();
                if let Some(update) = update {
                    self.emit_expr(update)?;
                    self.emit(Instruction::Pop);
                }
                self.emit_jump_to(start);
                let ctx = self.loops.pop().unwrap_or_default();
                if let Some(exit) = exit {
                    self.patch_jump(exit);
                }
                for jump in ctx.breaks {
                    self.patch_jump(jump);
                }
                for jump in ctx.continues {
                    self.patch_jump_to(jump, update_at);
                }
            }
            StmtKind::ForIn {
                name, object, body, ..
            } => {
                self.emit_expr(object)?;
                self.emit(Instruction::EnumInit);
                let start = self.code.len();
                let exit = self.emit_jump(Instruction::EnumNext { offset: 0 });
                self.emit_store_name(name)?;
                self.emit(Instruction::Pop);
                self.loops.push(LoopCtx::default());
                self.emit_stmt(body)?;
                self.emit_jump_to(start);
                let ctx = self.loops.pop().unwrap_or_default();
                // Breaks and exhaustion land on EnumDone.
                self.patch_jump(exit);
                for jump in ctx.breaks {
                    self.patch_jump(jump);
                }
                for jump in ctx.continues {
                    self.patch_jump_to(jump, start);
                }
                self.emit(Instruction::EnumDone);
            }
            StmtKind::Break => {
                let jump = self.emit_jump(Instruction::Jump { offset: 0 });
                match self.loops.last_mut() {
                    Some(ctx) => ctx.breaks.push(jump),
                    None => {
                        return Err(CompileError::syntax(
                            "break must be inside a loop or switch",
                            stmt.pos.line,
                            stmt.pos.column,
                        ));
                    }
                }
            }
            StmtKind::Continue => {
                let jump = self.emit_jump(Instruction::Jump { offset: 0 });
                match self.loops.last_mut() {
                    Some(ctx) => ctx.continues.push(jump),
                    None => {
                        return Err(CompileError::syntax(
                            "continue must be inside a loop",
                            stmt.pos.line,
                            stmt.pos.column,
                        ));
                    }
                }
            }
            StmtKind::Throw(expr) => {
                self.emit_expr(expr)?;
                self.emit(Instruction::Throw);
            }
            StmtKind::Try {
                block,
                catch,
                finally,
            } => self.emit_try(block, catch.as_ref(), finally.as_deref())?,
            StmtKind::Switch { disc, cases } => self.emit_switch(disc, cases)?,
            StmtKind::Empty => {}
        }
        Ok(())
    }

    fn emit_try(
        &mut self,
        block: &[Stmt],
        catch: Option<&(String, Vec<Stmt>)>,
        finally: Option<&[Stmt]>,
    ) -> CompileResult<()> {
        let push_at = self.code.len();
        self.emit(Instruction::PushTry {
            catch_offset: -1,
            finally_offset: -1,
        });
        for stmt in block {
            self.emit_stmt(stmt)?;
        }
        self.emit(Instruction::PopTry);
        if let Some(finally) = finally {
            for stmt in finally {
                self.emit_stmt(stmt)?;
            }
        }
        let mut end_jumps = vec![self.emit_jump(Instruction::Jump { offset: 0 })];

        let mut catch_pc: i32 = -1;
        if let Some((name, body)) = catch {
            catch_pc = self.offset_from(push_at);
            // The interpreter pushes the thrown value before entering.
            self.emit_store_name(name)?;
            self.emit(Instruction::Pop);
            for stmt in body {
                self.emit_stmt(stmt)?;
            }
            if let Some(finally) = finally {
                // The handler was downgraded to finally-only on catch entry.
                self.emit(Instruction::PopTry);
                for stmt in finally {
                    self.emit_stmt(stmt)?;
                }
            }
            end_jumps.push(self.emit_jump(Instruction::Jump { offset: 0 }));
        }

        let mut finally_pc: i32 = -1;
        if let Some(finally) = finally {
            finally_pc = self.offset_from(push_at);
            for stmt in finally {
                self.emit_stmt(stmt)?;
            }
            self.emit(Instruction::EndFinally);
        }

        // Patch the handler offsets and the jumps to the end.
        if let Instruction::PushTry {
            catch_offset,
            finally_offset,
        } = &mut self.code[push_at]
        {
            *catch_offset = catch_pc;
            *finally_offset = finally_pc;
        }
        for jump in end_jumps {
            self.patch_jump(jump);
        }
        Ok(())
    }

    fn emit_switch(
        &mut self,
        disc: &Expr,
        cases: &[(Option<Expr>, Vec<Stmt>)],
    ) -> CompileResult<()> {
        let temp = self.alloc_temp();
        self.emit_expr(disc)?;
        self.emit(Instruction::SetLocal { index: temp });
        self.emit(Instruction::Pop);

        let mut case_jumps = Vec::new();
        for (test, _) in cases {
            if let Some(test) = test {
                self.emit(Instruction::GetLocal { index: temp });
                self.emit_expr(test)?;
                self.emit(Instruction::StrictEq);
                case_jumps.push(Some(self.emit_jump(Instruction::JumpIfTrue { offset: 0 })));
            } else {
                case_jumps.push(None);
            }
        }
        let default_jump = self.emit_jump(Instruction::Jump { offset: 0 });

        self.loops.push(LoopCtx::default());
        let mut default_at = None;
        for (index, (test, body)) in cases.iter().enumerate() {
            if test.is_none() {
                default_at = Some(self.code.len());
            }
            if let Some(Some(jump)) = case_jumps.get(index) {
                self.patch_jump(*jump);
            }
            for stmt in body {
                self.emit_stmt(stmt)?;
            }
        }
        let ctx = self.loops.pop().unwrap_or_default();
        match default_at {
            Some(at) => self.patch_jump_to(default_jump, at),
            None => self.patch_jump(default_jump),
        }
        for jump in ctx.breaks {
            self.patch_jump(jump);
        }
        // `continue` inside a switch targets the enclosing loop.
        if !ctx.continues.is_empty() {
            match self.loops.last_mut() {
                Some(outer) => outer.continues.extend(ctx.continues),
                None => {
                    return Err(CompileError::syntax(
                        "continue must be inside a loop",
                        disc.pos.line,
                        disc.pos.column,
                    ));
                }
            }
        }
        self.release_temp();
        Ok(())
    }

    // ==================== expressions ====================

    fn emit_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match &expr.kind {
            ExprKind::Number(n) => {
                if *n == (*n as i32) as f64 && !(*n == 0.0 && n.is_sign_negative()) {
                    self.emit(Instruction::LoadInt { value: *n as i32 });
                } else {
                    let index = self.const_index(Constant::Number(*n))?;
                    self.emit(Instruction::LoadConst { index });
                }
            }
            ExprKind::String(s) => {
                let index = self.const_index(Constant::String(s.clone()))?;
                self.emit(Instruction::LoadConst { index });
            }
            ExprKind::Boolean(true) => self.emit(Instruction::LoadTrue),
            ExprKind::Boolean(false) => self.emit(Instruction::LoadFalse),
            ExprKind::Null => self.emit(Instruction::LoadNull),
            ExprKind::This => self.emit(Instruction::LoadThis),
            ExprKind::Regex { source, flags } => {
                let index = self.const_index(Constant::RegExp {
                    source: source.clone(),
                    flags: flags.clone(),
                })?;
                self.emit(Instruction::LoadConst { index });
            }
            ExprKind::Name(name) => self.emit_load_name(name)?,
            ExprKind::Array(items) => {
                for item in items {
                    self.emit_expr(item)?;
                }
                self.emit(Instruction::NewArray {
                    count: items.len() as u16,
                });
            }
            ExprKind::Object(props) => {
                self.emit(Instruction::NewObject);
                for (key, value) in props {
                    self.emit_expr(value)?;
                    let name = self.name_const(&key.as_name())?;
                    self.emit(Instruction::DefineProp { name });
                }
            }
            ExprKind::Function(def) => {
                let index = self.compile_nested(def)?;
                self.emit(Instruction::MakeClosure { function: index });
            }
            ExprKind::Unary { op, operand } => self.emit_unary(*op, operand, expr.pos)?,
            ExprKind::Update {
                increment,
                prefix,
                target,
            } => self.emit_update(*increment, *prefix, target)?,
            ExprKind::Binary { op, left, right } => {
                self.emit_expr(left)?;
                self.emit_expr(right)?;
                self.emit(binary_instruction(*op));
            }
            ExprKind::Logical { op, left, right } => {
                self.emit_expr(left)?;
                self.emit(Instruction::Dup);
                let short = match op {
                    LogicalOp::And => self.emit_jump(Instruction::JumpIfFalse { offset: 0 }),
                    LogicalOp::Or => self.emit_jump(Instruction::JumpIfTrue { offset: 0 }),
                };
                self.emit(Instruction::Pop);
                self.emit_expr(right)?;
                self.patch_jump(short);
            }
            ExprKind::Conditional { cond, then, other } => {
                self.emit_expr(cond)?;
                let to_else = self.emit_jump(Instruction::JumpIfFalse { offset: 0 });
                self.emit_expr(then)?;
                let to_end = self.emit_jump(Instruction::Jump { offset: 0 });
                self.patch_jump(to_else);
                self.emit_expr(other)?;
                self.patch_jump(to_end);
            }
            ExprKind::Assign { op, target, value } => {
                self.emit_assign(op.as_ref().copied(), target, value)?;
            }
            ExprKind::Call { callee, args } => match &callee.kind {
                ExprKind::Member { object, property } => {
                    self.emit_expr(object)?;
                    for arg in args {
                        self.emit_expr(arg)?;
                    }
                    let name = self.name_const(property)?;
                    self.emit(Instruction::CallMethod {
                        name,
                        argc: args.len() as u16,
                    });
                }
                _ => {
                    self.emit_expr(callee)?;
                    for arg in args {
                        self.emit_expr(arg)?;
                    }
                    self.emit(Instruction::Call {
                        argc: args.len() as u16,
                    });
                }
            },
            ExprKind::New { callee, args } => {
                self.emit_expr(callee)?;
                for arg in args {
                    self.emit_expr(arg)?;
                }
                self.emit(Instruction::New {
                    argc: args.len() as u16,
                });
            }
            ExprKind::Member { object, property } => {
                self.emit_expr(object)?;
                let name = self.name_const(property)?;
                self.emit(Instruction::GetProp { name });
            }
            ExprKind::Index { object, index } => {
                self.emit_expr(object)?;
                self.emit_expr(index)?;
                self.emit(Instruction::GetElem);
            }
            ExprKind::Sequence(exprs) => {
                for (i, e) in exprs.iter().enumerate() {
                    self.emit_expr(e)?;
                    if i + 1 < exprs.len() {
                        self.emit(Instruction::Pop);
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_unary(&mut self, op: UnaryOp, operand: &Expr, pos: Position) -> CompileResult<()> {
        match op {
            UnaryOp::TypeOf => {
                if let ExprKind::Name(name) = &operand.kind {
                    if self.slot_for(name).is_none() {
                        let name = self.name_const(name)?;
                        self.emit(Instruction::TypeOfName { name });
                        return Ok(());
                    }
                }
                self.emit_expr(operand)?;
                self.emit(Instruction::TypeOf);
            }
            UnaryOp::Void => {
                self.emit_expr(operand)?;
                self.emit(Instruction::Pop);
                self.emit(Instruction::LoadUndefined);
            }
            UnaryOp::Delete => match &operand.kind {
                ExprKind::Member { object, property } => {
                    self.emit_expr(object)?;
                    let name = self.name_const(property)?;
                    self.emit(Instruction::DeleteProp { name });
                }
                ExprKind::Index { object, index } => {
                    self.emit_expr(object)?;
                    self.emit_expr(index)?;
                    self.emit(Instruction::DeleteElem);
                }
                ExprKind::Name(_) => {
                    if self.unit.is_strict {
                        return Err(CompileError::syntax(
                            "delete of an unqualified name in strict mode",
                            pos.line,
                            pos.column,
                        ));
                    }
                    // Declared bindings are permanent; report failure.
                    self.emit(Instruction::LoadFalse);
                }
                _ => {
                    self.emit_expr(operand)?;
                    self.emit(Instruction::Pop);
                    self.emit(Instruction::LoadTrue);
                }
            },
            UnaryOp::Not => {
                self.emit_expr(operand)?;
                self.emit(Instruction::Not);
            }
            UnaryOp::BitNot => {
                self.emit_expr(operand)?;
                self.emit(Instruction::BitNot);
            }
            UnaryOp::Neg => {
                self.emit_expr(operand)?;
                self.emit(Instruction::Neg);
            }
            UnaryOp::Pos => {
                self.emit_expr(operand)?;
                self.emit(Instruction::Pos);
            }
        }
        Ok(())
    }

    fn emit_update(&mut self, increment: bool, prefix: bool, target: &Expr) -> CompileResult<()> {
        let delta = Instruction::LoadInt {
            value: if increment { 1 } else { -1 },
        };
        match &target.kind {
            ExprKind::Name(name) => {
                self.emit_load_name(name)?;
                self.emit(Instruction::Pos);
                if !prefix {
                    let old = self.alloc_temp();
                    self.emit(Instruction::SetLocal { index: old });
                    self.emit(delta);
                    self.emit(Instruction::Add);
                    self.emit_store_name(name)?;
                    self.emit(Instruction::Pop);
                    self.emit(Instruction::GetLocal { index: old });
                    self.release_temp();
                } else {
                    self.emit(delta);
                    self.emit(Instruction::Add);
                    self.emit_store_name(name)?;
                }
            }
            ExprKind::Member { object, property } => {
                let obj = self.alloc_temp();
                self.emit_expr(object)?;
                self.emit(Instruction::SetLocal { index: obj });
                self.emit(Instruction::Pop);
                let name = self.name_const(property)?;
                self.emit(Instruction::GetLocal { index: obj });
                self.emit(Instruction::GetProp { name });
                self.emit(Instruction::Pos);
                let old = self.alloc_temp();
                self.emit(Instruction::SetLocal { index: old });
                self.emit(delta);
                self.emit(Instruction::Add);
                let new = self.alloc_temp();
                self.emit(Instruction::SetLocal { index: new });
                self.emit(Instruction::Pop);
                self.emit(Instruction::GetLocal { index: obj });
                self.emit(Instruction::GetLocal { index: new });
                self.emit(Instruction::SetProp { name });
                if !prefix {
                    self.emit(Instruction::Pop);
                    self.emit(Instruction::GetLocal { index: old });
                }
                self.release_temp();
                self.release_temp();
                self.release_temp();
            }
            ExprKind::Index { object, index } => {
                let obj = self.alloc_temp();
                let key = self.alloc_temp();
                self.emit_expr(object)?;
                self.emit(Instruction::SetLocal { index: obj });
                self.emit(Instruction::Pop);
                self.emit_expr(index)?;
                self.emit(Instruction::SetLocal { index: key });
                self.emit(Instruction::Pop);
                self.emit(Instruction::GetLocal { index: obj });
                self.emit(Instruction::GetLocal { index: key });
                self.emit(Instruction::GetElem);
                self.emit(Instruction::Pos);
                let old = self.alloc_temp();
                self.emit(Instruction::SetLocal { index: old });
                self.emit(delta);
                self.emit(Instruction::Add);
                let new = self.alloc_temp();
                self.emit(Instruction::SetLocal { index: new });
                self.emit(Instruction::Pop);
                self.emit(Instruction::GetLocal { index: obj });
                self.emit(Instruction::GetLocal { index: key });
                self.emit(Instruction::GetLocal { index: new });
                self.emit(Instruction::SetElem);
                if !prefix {
                    self.emit(Instruction::Pop);
                    self.emit(Instruction::GetLocal { index: old });
                }
                self.release_temp();
                self.release_temp();
                self.release_temp();
                self.release_temp();
            }
            _ => {
                return Err(CompileError::InvalidAssignmentTarget {
                    line: target.pos.line,
                    column: target.pos.column,
                });
            }
        }
        Ok(())
    }

    fn emit_assign(
        &mut self,
        op: Option<BinaryOp>,
        target: &Expr,
        value: &Expr,
    ) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                match op {
                    Some(op) => {
                        self.emit_load_name(name)?;
                        self.emit_expr(value)?;
                        self.emit(binary_instruction(op));
                    }
                    None => self.emit_expr(value)?,
                }
                self.emit_store_name(name)?;
            }
            ExprKind::Member { object, property } => {
                let name = self.name_const(property)?;
                match op {
                    Some(op) => {
                        let obj = self.alloc_temp();
                        self.emit_expr(object)?;
                        self.emit(Instruction::SetLocal { index: obj });
                        self.emit(Instruction::Pop);
                        self.emit(Instruction::GetLocal { index: obj });
                        self.emit(Instruction::GetLocal { index: obj });
                        self.emit(Instruction::GetProp { name });
                        self.emit_expr(value)?;
                        self.emit(binary_instruction(op));
                        self.emit(Instruction::SetProp { name });
                        self.release_temp();
                    }
                    None => {
                        self.emit_expr(object)?;
                        self.emit_expr(value)?;
                        self.emit(Instruction::SetProp { name });
                    }
                }
            }
            ExprKind::Index { object, index } => match op {
                Some(op) => {
                    let obj = self.alloc_temp();
                    let key = self.alloc_temp();
                    self.emit_expr(object)?;
                    self.emit(Instruction::SetLocal { index: obj });
                    self.emit(Instruction::Pop);
                    self.emit_expr(index)?;
                    self.emit(Instruction::SetLocal { index: key });
                    self.emit(Instruction::Pop);
                    self.emit(Instruction::GetLocal { index: obj });
                    self.emit(Instruction::GetLocal { index: key });
                    self.emit(Instruction::GetLocal { index: obj });
                    self.emit(Instruction::GetLocal { index: key });
                    self.emit(Instruction::GetElem);
                    self.emit_expr(value)?;
                    self.emit(binary_instruction(op));
                    self.emit(Instruction::SetElem);
                    self.release_temp();
                    self.release_temp();
                }
                None => {
                    self.emit_expr(object)?;
                    self.emit_expr(index)?;
                    self.emit_expr(value)?;
                    self.emit(Instruction::SetElem);
                }
            },
            _ => {
                return Err(CompileError::InvalidAssignmentTarget {
                    line: target.pos.line,
                    column: target.pos.column,
                });
            }
        }
        Ok(())
    }

    // ==================== name resolution ====================

    fn slot_for(&self, name: &str) -> Option<u16> {
        if self.unit.storage == VarStorage::Slots {
            self.unit.slot_of(name)
        } else {
            None
        }
    }

    fn emit_load_name(&mut self, name: &str) -> CompileResult<()> {
        match self.slot_for(name) {
            Some(index) => self.emit(Instruction::GetLocal { index }),
            None => {
                let name = self.name_const(name)?;
                self.emit(Instruction::GetName { name });
            }
        }
        Ok(())
    }

    fn emit_store_name(&mut self, name: &str) -> CompileResult<()> {
        match self.slot_for(name) {
            Some(index) => self.emit(Instruction::SetLocal { index }),
            None => {
                let name = self.name_const(name)?;
                self.emit(Instruction::SetName { name });
            }
        }
        Ok(())
    }

    // ==================== emission helpers ====================

    fn emit(&mut self, insn: Instruction) {
        self.code.push(insn);
    }

    fn emit_jump(&mut self, insn: Instruction) -> usize {
        let at = self.code.len();
        self.code.push(insn);
        at
    }

    /// Patch a recorded jump to land at the current end of code.
    fn patch_jump(&mut self, at: usize) {
        let target = self.code.len();
        self.patch_jump_to(at, target);
    }

    fn patch_jump_to(&mut self, at: usize, target: usize) {
        let offset = target as i64 - (at as i64 + 1);
        let offset = offset as i32;
        match &mut self.code[at] {
            Instruction::Jump { offset: o }
            | Instruction::JumpIfFalse { offset: o }
            | Instruction::JumpIfTrue { offset: o }
            | Instruction::EnumNext { offset: o } => *o = offset,
            _ => {}
        }
    }

    /// Emit an unconditional jump to a known earlier target.
    fn emit_jump_to(&mut self, target: usize) {
        let at = self.code.len();
        self.code.push(Instruction::Jump { offset: 0 });
        self.patch_jump_to(at, target);
    }

    /// Offset of the current end of code relative to the instruction after
    /// `at` (for handler offsets in PushTry).
    fn offset_from(&self, at: usize) -> i32 {
        (self.code.len() as i64 - (at as i64 + 1)) as i32
    }

    fn mark_line(&mut self, line: u32) {
        if line != self.current_line {
            self.current_line = line;
            self.line_table.add(self.code.len() as u32, line);
        }
    }

    fn const_index(&mut self, constant: Constant) -> CompileResult<u16> {
        let key = match &constant {
            Constant::Number(n) => ConstKey::Number(n.to_bits()),
            Constant::String(s) => ConstKey::Str(s.clone()),
            Constant::RegExp { source, flags } => {
                ConstKey::Regex(source.clone(), flags.clone())
            }
        };
        if let Some(&index) = self.const_map.get(&key) {
            return Ok(index);
        }
        let index = self.constants.len();
        if index > u16::MAX as usize {
            return Err(CompileError::TooManyConstants);
        }
        self.constants.push(constant);
        self.const_map.insert(key, index as u16);
        Ok(index as u16)
    }

    fn name_const(&mut self, name: &str) -> CompileResult<u16> {
        self.const_index(Constant::String(name.to_string()))
    }

    fn alloc_temp(&mut self) -> u16 {
        let index = self.temp_base + self.temps_live;
        self.temps_live += 1;
        self.temps_max = self.temps_max.max(self.temps_live);
        index
    }

    fn release_temp(&mut self) {
        self.temps_live = self.temps_live.saturating_sub(1);
    }
}

fn binary_instruction(op: BinaryOp) -> Instruction {
    match op {
        BinaryOp::Add => Instruction::Add,
        BinaryOp::Sub => Instruction::Sub,
        BinaryOp::Mul => Instruction::Mul,
        BinaryOp::Div => Instruction::Div,
        BinaryOp::Mod => Instruction::Mod,
        BinaryOp::BitAnd => Instruction::BitAnd,
        BinaryOp::BitOr => Instruction::BitOr,
        BinaryOp::BitXor => Instruction::BitXor,
        BinaryOp::Shl => Instruction::Shl,
        BinaryOp::Shr => Instruction::Shr,
        BinaryOp::Ushr => Instruction::Ushr,
        BinaryOp::Eq => Instruction::Eq,
        BinaryOp::Ne => Instruction::Ne,
        BinaryOp::StrictEq => Instruction::StrictEq,
        BinaryOp::StrictNe => Instruction::StrictNe,
        BinaryOp::Lt => Instruction::Lt,
        BinaryOp::Le => Instruction::Le,
        BinaryOp::Gt => Instruction::Gt,
        BinaryOp::Ge => Instruction::Ge,
        BinaryOp::In => Instruction::In,
        BinaryOp::InstanceOf => Instruction::InstanceOf,
    }
}

/// Hoisted function declarations at function scope, in source order.
fn collect_function_decls(body: &[Stmt], out: &mut Vec<FunctionDef>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Function(def) => out.push((**def).clone()),
            StmtKind::Block(body) => collect_function_decls(body, out),
            StmtKind::If { then, other, .. } => {
                collect_function_decls(std::slice::from_ref(then), out);
                if let Some(other) = other {
                    collect_function_decls(std::slice::from_ref(other), out);
                }
            }
            StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
                collect_function_decls(std::slice::from_ref(body), out);
            }
            StmtKind::For { init, body, .. } => {
                if let Some(init) = init {
                    collect_function_decls(std::slice::from_ref(init), out);
                }
                collect_function_decls(std::slice::from_ref(body), out);
            }
            StmtKind::ForIn { body, .. } => {
                collect_function_decls(std::slice::from_ref(body), out);
            }
            StmtKind::Try {
                block,
                catch,
                finally,
            } => {
                collect_function_decls(block, out);
                if let Some((_, body)) = catch {
                    collect_function_decls(body, out);
                }
                if let Some(body) = finally {
                    collect_function_decls(body, out);
                }
            }
            StmtKind::Switch { cases, .. } => {
                for (_, body) in cases {
                    collect_function_decls(body, out);
                }
            }
            _ => {}
        }
    }
}

/// Linear worst-case estimate of the value stack depth.
fn compute_max_stack(code: &[Instruction]) -> u16 {
    let mut depth: i32 = 0;
    let mut max: i32 = 0;
    for insn in code {
        depth = (depth + insn.stack_effect()).max(0);
        max = max.max(depth);
    }
    max.clamp(0, u16::MAX as i32) as u16
}

/// Slice a string by character offsets.
fn slice_chars(source: &str, start: usize, end: usize) -> String {
    source
        .chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .collect()
}
