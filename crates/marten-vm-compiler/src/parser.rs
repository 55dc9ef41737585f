//! ECMAScript parser
//!
//! Recursive descent over the token stream with one-token state. Automatic
//! semicolon insertion follows the standard rule: a statement may end at a
//! `}`, at end of input, or before a token preceded by a line terminator.
//! Every "expected more" failure is reported as
//! [`CompileError::UnexpectedEndOfInput`] so interactive callers can detect
//! incomplete input and ask for more.

use crate::ast::*;
use crate::env::CompilerEnv;
use crate::error::{CompileError, CompileResult};
use crate::lexer::{Keyword, Lexer, Punct, Token, TokenKind};

/// Parser state
pub struct Parser<'a> {
    lexer: Lexer,
    env: &'a CompilerEnv,
    current: Token,
}

impl<'a> Parser<'a> {
    /// Create a parser over `source`
    pub fn new(source: &str, base_line: u32, env: &'a CompilerEnv) -> CompileResult<Self> {
        let mut lexer = Lexer::new(source, base_line, env.reserved_keyword_as_identifier);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            env,
            current,
        })
    }

    /// Parse a whole program
    pub fn parse_program(&mut self) -> CompileResult<Vec<Stmt>> {
        let mut statements = Vec::new();
        while self.current.kind != TokenKind::Eof {
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    /// Parse a source expected to contain exactly one function definition
    /// (the "return function" compilation mode). Stray semicolons around the
    /// definition are tolerated.
    pub fn parse_single_function(&mut self) -> CompileResult<FunctionDef> {
        while self.eat_punct(Punct::Semi) {}
        if self.current.kind != TokenKind::Keyword(Keyword::Function) {
            return Err(self.unexpected("a function definition"));
        }
        let def = self.parse_function(true)?;
        while self.eat_punct(Punct::Semi) {}
        if self.current.kind != TokenKind::Eof {
            return Err(self.unexpected("end of function source"));
        }
        Ok(def)
    }

    // ==================== statements ====================

    fn parse_statement(&mut self) -> CompileResult<Stmt> {
        let pos = self.current.pos;
        let kind = match &self.current.kind {
            TokenKind::Punct(Punct::LBrace) => {
                self.advance()?;
                let body = self.parse_block_tail()?;
                StmtKind::Block(body)
            }
            TokenKind::Punct(Punct::Semi) => {
                self.advance()?;
                StmtKind::Empty
            }
            TokenKind::Keyword(kw) => {
                let kw = *kw;
                match kw {
                    Keyword::Var | Keyword::Let | Keyword::Const => {
                        let kind = self.parse_var_statement()?;
                        self.consume_semicolon()?;
                        kind
                    }
                    Keyword::Function => return self.parse_function_statement(pos),
                    Keyword::If => self.parse_if()?,
                    Keyword::While => self.parse_while()?,
                    Keyword::Do => self.parse_do_while()?,
                    Keyword::For => self.parse_for()?,
                    Keyword::Return => {
                        self.advance()?;
                        let value = if self.statement_ends_here() {
                            None
                        } else {
                            Some(self.parse_expression(false)?)
                        };
                        self.consume_semicolon()?;
                        StmtKind::Return(value)
                    }
                    Keyword::Throw => {
                        self.advance()?;
                        if self.current.newline_before {
                            return Err(CompileError::syntax(
                                "no line break is allowed after 'throw'",
                                pos.line,
                                pos.column,
                            ));
                        }
                        let value = self.parse_expression(false)?;
                        self.consume_semicolon()?;
                        StmtKind::Throw(value)
                    }
                    Keyword::Break => {
                        self.advance()?;
                        self.consume_semicolon()?;
                        StmtKind::Break
                    }
                    Keyword::Continue => {
                        self.advance()?;
                        self.consume_semicolon()?;
                        StmtKind::Continue
                    }
                    Keyword::Try => self.parse_try()?,
                    Keyword::Switch => self.parse_switch()?,
                    Keyword::With => {
                        return Err(CompileError::unsupported(
                            "with statements",
                            pos.line,
                            pos.column,
                        ));
                    }
                    _ => {
                        let expr = self.parse_expression(false)?;
                        self.consume_semicolon()?;
                        StmtKind::Expr(expr)
                    }
                }
            }
            _ => {
                let expr = self.parse_expression(false)?;
                if matches!(expr.kind, ExprKind::Name(_))
                    && self.current.kind == TokenKind::Punct(Punct::Colon)
                {
                    return Err(CompileError::unsupported(
                        "labelled statements",
                        pos.line,
                        pos.column,
                    ));
                }
                self.consume_semicolon()?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt { kind, pos })
    }

    fn parse_block_tail(&mut self) -> CompileResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.current.kind {
                TokenKind::Punct(Punct::RBrace) => {
                    self.advance()?;
                    return Ok(body);
                }
                TokenKind::Eof => {
                    return Err(CompileError::UnexpectedEndOfInput {
                        line: self.current.pos.line,
                    });
                }
                _ => body.push(self.parse_statement()?),
            }
        }
    }

    /// Parses the declaration list; the caller consumes the terminator.
    fn parse_var_statement(&mut self) -> CompileResult<StmtKind> {
        let kind = match self.current.kind {
            TokenKind::Keyword(Keyword::Var) => DeclKind::Var,
            TokenKind::Keyword(Keyword::Let) => DeclKind::Let,
            _ => DeclKind::Const,
        };
        self.advance()?;
        let mut decls = Vec::new();
        loop {
            let name = self.expect_identifier("variable name")?;
            let init = if self.eat_punct(Punct::Assign) {
                Some(self.parse_assignment(false)?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(StmtKind::VarDecl { kind, decls })
    }

    fn parse_function_statement(&mut self, pos: Position) -> CompileResult<Stmt> {
        // With the member-expression extension, `function a.b.c() {}` is
        // sugar for `a.b.c = function() {}`.
        let def = self.parse_function(true)?;
        if let Some(path) = def.name.as_deref().filter(|n| n.contains('.')) {
            if !self.env.member_expr_as_function_name {
                return Err(CompileError::syntax(
                    "function statement requires a simple name",
                    pos.line,
                    pos.column,
                ));
            }
            let mut segments = path.split('.');
            let first = segments.next().unwrap_or_default().to_string();
            let mut target = Expr {
                kind: ExprKind::Name(first),
                pos,
            };
            for segment in segments {
                target = Expr {
                    kind: ExprKind::Member {
                        object: Box::new(target),
                        property: segment.to_string(),
                    },
                    pos,
                };
            }
            let mut def = def;
            def.name = None;
            let assign = Expr {
                kind: ExprKind::Assign {
                    op: None,
                    target: Box::new(target),
                    value: Box::new(Expr {
                        kind: ExprKind::Function(Box::new(def)),
                        pos,
                    }),
                },
                pos,
            };
            return Ok(Stmt {
                kind: StmtKind::Expr(assign),
                pos,
            });
        }
        if def.name.is_none() {
            return Err(CompileError::syntax(
                "function statement requires a name",
                pos.line,
                pos.column,
            ));
        }
        Ok(Stmt {
            kind: StmtKind::Function(Box::new(def)),
            pos,
        })
    }

    fn parse_if(&mut self) -> CompileResult<StmtKind> {
        self.advance()?;
        self.expect_punct(Punct::LParen)?;
        let cond = self.parse_expression(false)?;
        self.expect_punct(Punct::RParen)?;
        let then = Box::new(self.parse_statement()?);
        let other = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If { cond, then, other })
    }

    fn parse_while(&mut self) -> CompileResult<StmtKind> {
        self.advance()?;
        self.expect_punct(Punct::LParen)?;
        let cond = self.parse_expression(false)?;
        self.expect_punct(Punct::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::While { cond, body })
    }

    fn parse_do_while(&mut self) -> CompileResult<StmtKind> {
        self.advance()?;
        let body = Box::new(self.parse_statement()?);
        if !self.eat_keyword(Keyword::While) {
            return Err(self.unexpected("'while'"));
        }
        self.expect_punct(Punct::LParen)?;
        let cond = self.parse_expression(false)?;
        self.expect_punct(Punct::RParen)?;
        // do/while accepts semicolon insertion unconditionally
        self.eat_punct(Punct::Semi);
        Ok(StmtKind::DoWhile { body, cond })
    }

    fn parse_for(&mut self) -> CompileResult<StmtKind> {
        let pos = self.current.pos;
        self.advance()?;
        self.expect_punct(Punct::LParen)?;

        // for (;;) with an empty initializer
        if self.eat_punct(Punct::Semi) {
            return self.parse_for_tail(None);
        }

        if matches!(
            self.current.kind,
            TokenKind::Keyword(Keyword::Var)
                | TokenKind::Keyword(Keyword::Let)
                | TokenKind::Keyword(Keyword::Const)
        ) {
            let decl_stmt = self.parse_var_statement()?;
            let StmtKind::VarDecl { kind, decls } = &decl_stmt else {
                return Err(CompileError::internal("var statement expected"));
            };
            if self.eat_keyword(Keyword::In) {
                if decls.len() != 1 || decls[0].1.is_some() {
                    return Err(CompileError::syntax(
                        "invalid for..in loop variable declaration",
                        pos.line,
                        pos.column,
                    ));
                }
                let name = decls[0].0.clone();
                let kind = *kind;
                let object = self.parse_expression(false)?;
                self.expect_punct(Punct::RParen)?;
                let body = Box::new(self.parse_statement()?);
                return Ok(StmtKind::ForIn {
                    decl: Some(kind),
                    name,
                    object,
                    body,
                });
            }
            self.expect_punct(Punct::Semi)?;
            return self.parse_for_tail(Some(Box::new(Stmt {
                kind: decl_stmt,
                pos,
            })));
        }

        let init = self.parse_expression(true)?;
        if self.eat_keyword(Keyword::In) {
            let ExprKind::Name(name) = init.kind else {
                return Err(CompileError::syntax(
                    "invalid for..in loop target",
                    pos.line,
                    pos.column,
                ));
            };
            let object = self.parse_expression(false)?;
            self.expect_punct(Punct::RParen)?;
            let body = Box::new(self.parse_statement()?);
            return Ok(StmtKind::ForIn {
                decl: None,
                name,
                object,
                body,
            });
        }
        self.expect_punct(Punct::Semi)?;
        self.parse_for_tail(Some(Box::new(Stmt {
            kind: StmtKind::Expr(init),
            pos,
        })))
    }

    fn parse_for_tail(&mut self, init: Option<Box<Stmt>>) -> CompileResult<StmtKind> {
        let test = if self.current.kind == TokenKind::Punct(Punct::Semi) {
            None
        } else {
            Some(self.parse_expression(false)?)
        };
        self.expect_punct(Punct::Semi)?;
        let update = if self.current.kind == TokenKind::Punct(Punct::RParen) {
            None
        } else {
            Some(self.parse_expression(false)?)
        };
        self.expect_punct(Punct::RParen)?;
        let body = Box::new(self.parse_statement()?);
        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_try(&mut self) -> CompileResult<StmtKind> {
        let pos = self.current.pos;
        self.advance()?;
        self.expect_punct(Punct::LBrace)?;
        let block = self.parse_block_tail()?;
        let catch = if self.eat_keyword(Keyword::Catch) {
            self.expect_punct(Punct::LParen)?;
            let name = self.expect_identifier("catch variable")?;
            self.expect_punct(Punct::RParen)?;
            self.expect_punct(Punct::LBrace)?;
            Some((name, self.parse_block_tail()?))
        } else {
            None
        };
        let finally = if self.eat_keyword(Keyword::Finally) {
            self.expect_punct(Punct::LBrace)?;
            Some(self.parse_block_tail()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(CompileError::syntax(
                "try without catch or finally",
                pos.line,
                pos.column,
            ));
        }
        Ok(StmtKind::Try {
            block,
            catch,
            finally,
        })
    }

    fn parse_switch(&mut self) -> CompileResult<StmtKind> {
        let pos = self.current.pos;
        self.advance()?;
        self.expect_punct(Punct::LParen)?;
        let disc = self.parse_expression(false)?;
        self.expect_punct(Punct::RParen)?;
        self.expect_punct(Punct::LBrace)?;
        let mut cases: Vec<(Option<Expr>, Vec<Stmt>)> = Vec::new();
        let mut seen_default = false;
        loop {
            let test = if self.eat_keyword(Keyword::Case) {
                let e = self.parse_expression(false)?;
                Some(e)
            } else if self.eat_keyword(Keyword::Default) {
                if seen_default {
                    return Err(CompileError::syntax(
                        "double default label in switch",
                        pos.line,
                        pos.column,
                    ));
                }
                seen_default = true;
                None
            } else if self.eat_punct(Punct::RBrace) {
                return Ok(StmtKind::Switch { disc, cases });
            } else {
                return Err(self.unexpected("'case', 'default' or '}'"));
            };
            self.expect_punct(Punct::Colon)?;
            let mut body = Vec::new();
            loop {
                match self.current.kind {
                    TokenKind::Keyword(Keyword::Case)
                    | TokenKind::Keyword(Keyword::Default)
                    | TokenKind::Punct(Punct::RBrace) => break,
                    TokenKind::Eof => {
                        return Err(CompileError::UnexpectedEndOfInput {
                            line: self.current.pos.line,
                        });
                    }
                    _ => body.push(self.parse_statement()?),
                }
            }
            cases.push((test, body));
        }
    }

    // ==================== functions ====================

    fn parse_function(&mut self, allow_member_name: bool) -> CompileResult<FunctionDef> {
        let pos = self.current.pos;
        let source_start = self.current.offset;
        self.advance()?; // 'function'

        let name = if let TokenKind::Ident(name) = &self.current.kind {
            let mut name = name.clone();
            self.advance()?;
            // Member-expression function names: a dotted path
            if allow_member_name && self.env.member_expr_as_function_name {
                while self.current.kind == TokenKind::Punct(Punct::Dot) {
                    self.advance()?;
                    let segment = self.expect_identifier("property name")?;
                    name.push('.');
                    name.push_str(&segment);
                }
            }
            Some(name)
        } else {
            None
        };

        self.expect_punct(Punct::LParen)?;
        let mut params = Vec::new();
        if !self.eat_punct(Punct::RParen) {
            loop {
                params.push(self.expect_identifier("parameter name")?);
                if self.eat_punct(Punct::Comma) {
                    continue;
                }
                self.expect_punct(Punct::RParen)?;
                break;
            }
        }
        self.expect_punct(Punct::LBrace)?;
        // Capture the end offset at the closing brace of the body.
        let body = {
            let mut body = Vec::new();
            loop {
                match self.current.kind {
                    TokenKind::Punct(Punct::RBrace) => break,
                    TokenKind::Eof => {
                        return Err(CompileError::UnexpectedEndOfInput {
                            line: self.current.pos.line,
                        });
                    }
                    _ => body.push(self.parse_statement()?),
                }
            }
            body
        };
        let source_end = self.current.offset + 1;
        self.advance()?; // '}'
        Ok(FunctionDef {
            name,
            params,
            body,
            pos,
            source_start,
            source_end,
        })
    }

    // ==================== expressions ====================

    /// Parse a full (comma) expression. `no_in` suppresses the `in` operator
    /// at the top level, as required inside `for` heads.
    pub fn parse_expression(&mut self, no_in: bool) -> CompileResult<Expr> {
        let pos = self.current.pos;
        let first = self.parse_assignment(no_in)?;
        if self.current.kind != TokenKind::Punct(Punct::Comma) {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat_punct(Punct::Comma) {
            exprs.push(self.parse_assignment(no_in)?);
        }
        Ok(Expr {
            kind: ExprKind::Sequence(exprs),
            pos,
        })
    }

    fn parse_assignment(&mut self, no_in: bool) -> CompileResult<Expr> {
        let pos = self.current.pos;
        let left = self.parse_conditional(no_in)?;
        let op = match self.current.kind {
            TokenKind::Punct(Punct::Assign) => None,
            TokenKind::Punct(Punct::PlusAssign) => Some(BinaryOp::Add),
            TokenKind::Punct(Punct::MinusAssign) => Some(BinaryOp::Sub),
            TokenKind::Punct(Punct::StarAssign) => Some(BinaryOp::Mul),
            TokenKind::Punct(Punct::SlashAssign) => Some(BinaryOp::Div),
            TokenKind::Punct(Punct::PercentAssign) => Some(BinaryOp::Mod),
            TokenKind::Punct(Punct::AmpAssign) => Some(BinaryOp::BitAnd),
            TokenKind::Punct(Punct::PipeAssign) => Some(BinaryOp::BitOr),
            TokenKind::Punct(Punct::CaretAssign) => Some(BinaryOp::BitXor),
            TokenKind::Punct(Punct::ShlAssign) => Some(BinaryOp::Shl),
            TokenKind::Punct(Punct::ShrAssign) => Some(BinaryOp::Shr),
            TokenKind::Punct(Punct::UshrAssign) => Some(BinaryOp::Ushr),
            _ => return Ok(left),
        };
        if !matches!(
            left.kind,
            ExprKind::Name(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        ) {
            return Err(CompileError::InvalidAssignmentTarget {
                line: pos.line,
                column: pos.column,
            });
        }
        self.advance()?;
        let value = self.parse_assignment(no_in)?;
        Ok(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(left),
                value: Box::new(value),
            },
            pos,
        })
    }

    fn parse_conditional(&mut self, no_in: bool) -> CompileResult<Expr> {
        let pos = self.current.pos;
        let cond = self.parse_binary(0, no_in)?;
        if !self.eat_punct(Punct::Question) {
            return Ok(cond);
        }
        let then = self.parse_assignment(false)?;
        self.expect_punct(Punct::Colon)?;
        let other = self.parse_assignment(no_in)?;
        Ok(Expr {
            kind: ExprKind::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                other: Box::new(other),
            },
            pos,
        })
    }

    fn parse_binary(&mut self, min_prec: u8, no_in: bool) -> CompileResult<Expr> {
        let pos = self.current.pos;
        let mut left = self.parse_unary()?;
        loop {
            let Some((prec, op)) = self.binary_op(no_in) else {
                return Ok(left);
            };
            if prec < min_prec {
                return Ok(left);
            }
            self.advance()?;
            match op {
                BinaryOrLogical::Logical(op) => {
                    let right = self.parse_binary(prec + 1, no_in)?;
                    left = Expr {
                        kind: ExprKind::Logical {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        pos,
                    };
                }
                BinaryOrLogical::Binary(op) => {
                    let right = self.parse_binary(prec + 1, no_in)?;
                    left = Expr {
                        kind: ExprKind::Binary {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        pos,
                    };
                }
            }
        }
    }

    fn binary_op(&self, no_in: bool) -> Option<(u8, BinaryOrLogical)> {
        use BinaryOrLogical::*;
        let op = match self.current.kind {
            TokenKind::Punct(Punct::OrOr) => (1, Logical(LogicalOp::Or)),
            TokenKind::Punct(Punct::AndAnd) => (2, Logical(LogicalOp::And)),
            TokenKind::Punct(Punct::Pipe) => (3, Binary(BinaryOp::BitOr)),
            TokenKind::Punct(Punct::Caret) => (4, Binary(BinaryOp::BitXor)),
            TokenKind::Punct(Punct::Amp) => (5, Binary(BinaryOp::BitAnd)),
            TokenKind::Punct(Punct::EqEq) => (6, Binary(BinaryOp::Eq)),
            TokenKind::Punct(Punct::NotEq) => (6, Binary(BinaryOp::Ne)),
            TokenKind::Punct(Punct::EqEqEq) => (6, Binary(BinaryOp::StrictEq)),
            TokenKind::Punct(Punct::NotEqEq) => (6, Binary(BinaryOp::StrictNe)),
            TokenKind::Punct(Punct::Lt) => (7, Binary(BinaryOp::Lt)),
            TokenKind::Punct(Punct::Le) => (7, Binary(BinaryOp::Le)),
            TokenKind::Punct(Punct::Gt) => (7, Binary(BinaryOp::Gt)),
            TokenKind::Punct(Punct::Ge) => (7, Binary(BinaryOp::Ge)),
            TokenKind::Keyword(Keyword::Instanceof) => (7, Binary(BinaryOp::InstanceOf)),
            TokenKind::Keyword(Keyword::In) if !no_in => (7, Binary(BinaryOp::In)),
            TokenKind::Punct(Punct::Shl) => (8, Binary(BinaryOp::Shl)),
            TokenKind::Punct(Punct::Shr) => (8, Binary(BinaryOp::Shr)),
            TokenKind::Punct(Punct::Ushr) => (8, Binary(BinaryOp::Ushr)),
            TokenKind::Punct(Punct::Plus) => (9, Binary(BinaryOp::Add)),
            TokenKind::Punct(Punct::Minus) => (9, Binary(BinaryOp::Sub)),
            TokenKind::Punct(Punct::Star) => (10, Binary(BinaryOp::Mul)),
            TokenKind::Punct(Punct::Slash) => (10, Binary(BinaryOp::Div)),
            TokenKind::Punct(Punct::Percent) => (10, Binary(BinaryOp::Mod)),
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary(&mut self) -> CompileResult<Expr> {
        let pos = self.current.pos;
        let op = match self.current.kind {
            TokenKind::Punct(Punct::Not) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Tilde) => Some(UnaryOp::BitNot),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Pos),
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Keyword(Keyword::Typeof) => Some(UnaryOp::TypeOf),
            TokenKind::Keyword(Keyword::Void) => Some(UnaryOp::Void),
            TokenKind::Keyword(Keyword::Delete) => Some(UnaryOp::Delete),
            _ => None,
        };
        if let Some(op) = op {
            self.advance()?;
            let operand = self.parse_unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                pos,
            });
        }
        if matches!(
            self.current.kind,
            TokenKind::Punct(Punct::PlusPlus) | TokenKind::Punct(Punct::MinusMinus)
        ) {
            let increment = self.current.kind == TokenKind::Punct(Punct::PlusPlus);
            self.advance()?;
            let target = self.parse_unary()?;
            self.check_update_target(&target)?;
            return Ok(Expr {
                kind: ExprKind::Update {
                    increment,
                    prefix: true,
                    target: Box::new(target),
                },
                pos,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> CompileResult<Expr> {
        let pos = self.current.pos;
        let expr = self.parse_call()?;
        if !self.current.newline_before
            && matches!(
                self.current.kind,
                TokenKind::Punct(Punct::PlusPlus) | TokenKind::Punct(Punct::MinusMinus)
            )
        {
            let increment = self.current.kind == TokenKind::Punct(Punct::PlusPlus);
            self.advance()?;
            self.check_update_target(&expr)?;
            return Ok(Expr {
                kind: ExprKind::Update {
                    increment,
                    prefix: false,
                    target: Box::new(expr),
                },
                pos,
            });
        }
        Ok(expr)
    }

    fn check_update_target(&self, target: &Expr) -> CompileResult<()> {
        if matches!(
            target.kind,
            ExprKind::Name(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        ) {
            Ok(())
        } else {
            Err(CompileError::InvalidAssignmentTarget {
                line: target.pos.line,
                column: target.pos.column,
            })
        }
    }

    fn parse_call(&mut self) -> CompileResult<Expr> {
        let mut expr = if self.current.kind == TokenKind::Keyword(Keyword::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            let pos = self.current.pos;
            match self.current.kind {
                TokenKind::Punct(Punct::Dot) => {
                    self.advance()?;
                    let property = self.expect_property_name()?;
                    expr = Expr {
                        kind: ExprKind::Member {
                            object: Box::new(expr),
                            property,
                        },
                        pos,
                    };
                }
                TokenKind::Punct(Punct::LBracket) => {
                    self.advance()?;
                    let index = self.parse_expression(false)?;
                    self.expect_punct(Punct::RBracket)?;
                    expr = Expr {
                        kind: ExprKind::Index {
                            object: Box::new(expr),
                            index: Box::new(index),
                        },
                        pos,
                    };
                }
                TokenKind::Punct(Punct::LParen) => {
                    let args = self.parse_arguments()?;
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        pos,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_new(&mut self) -> CompileResult<Expr> {
        let pos = self.current.pos;
        self.advance()?; // 'new'
        let mut callee = if self.current.kind == TokenKind::Keyword(Keyword::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        // Member accesses bind tighter than the construction call
        loop {
            let mpos = self.current.pos;
            match self.current.kind {
                TokenKind::Punct(Punct::Dot) => {
                    self.advance()?;
                    let property = self.expect_property_name()?;
                    callee = Expr {
                        kind: ExprKind::Member {
                            object: Box::new(callee),
                            property,
                        },
                        pos: mpos,
                    };
                }
                TokenKind::Punct(Punct::LBracket) => {
                    self.advance()?;
                    let index = self.parse_expression(false)?;
                    self.expect_punct(Punct::RBracket)?;
                    callee = Expr {
                        kind: ExprKind::Index {
                            object: Box::new(callee),
                            index: Box::new(index),
                        },
                        pos: mpos,
                    };
                }
                _ => break,
            }
        }
        let args = if self.current.kind == TokenKind::Punct(Punct::LParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr {
            kind: ExprKind::New {
                callee: Box::new(callee),
                args,
            },
            pos,
        })
    }

    fn parse_arguments(&mut self) -> CompileResult<Vec<Expr>> {
        self.expect_punct(Punct::LParen)?;
        let mut args = Vec::new();
        if self.eat_punct(Punct::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_assignment(false)?);
            if self.eat_punct(Punct::Comma) {
                continue;
            }
            self.expect_punct(Punct::RParen)?;
            return Ok(args);
        }
    }

    fn parse_primary(&mut self) -> CompileResult<Expr> {
        let pos = self.current.pos;
        let kind = match &self.current.kind {
            TokenKind::Number(n) => {
                let n = *n;
                self.advance()?;
                ExprKind::Number(n)
            }
            TokenKind::Str(s) => {
                let s = s.clone();
                self.advance()?;
                ExprKind::String(s)
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                ExprKind::Name(name)
            }
            TokenKind::Keyword(Keyword::This) => {
                self.advance()?;
                ExprKind::This
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance()?;
                ExprKind::Boolean(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance()?;
                ExprKind::Boolean(false)
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance()?;
                ExprKind::Null
            }
            TokenKind::Keyword(Keyword::Function) => {
                let def = self.parse_function(false)?;
                ExprKind::Function(Box::new(def))
            }
            TokenKind::Punct(Punct::Slash) | TokenKind::Punct(Punct::SlashAssign) => {
                // The grammar expects an expression here, so '/' starts a
                // regular expression literal.
                let token = self
                    .lexer
                    .rescan_regex(self.current.offset, self.current.pos)?;
                let TokenKind::Regex { source, flags } = token.kind else {
                    return Err(CompileError::internal("regex rescan yielded non-regex"));
                };
                self.current = self.lexer.next_token()?;
                return Ok(Expr {
                    kind: ExprKind::Regex { source, flags },
                    pos,
                });
            }
            TokenKind::Punct(Punct::LParen) => {
                self.advance()?;
                let expr = self.parse_expression(false)?;
                self.expect_punct(Punct::RParen)?;
                return Ok(expr);
            }
            TokenKind::Punct(Punct::LBracket) => return self.parse_array_literal(),
            TokenKind::Punct(Punct::LBrace) => return self.parse_object_literal(),
            TokenKind::Eof => {
                return Err(CompileError::UnexpectedEndOfInput {
                    line: self.current.pos.line,
                });
            }
            other => {
                return Err(CompileError::syntax(
                    format!("unexpected token {:?}", other),
                    pos.line,
                    pos.column,
                ));
            }
        };
        Ok(Expr { kind, pos })
    }

    fn parse_array_literal(&mut self) -> CompileResult<Expr> {
        let pos = self.current.pos;
        self.advance()?; // '['
        let mut elements = Vec::new();
        loop {
            if self.eat_punct(Punct::RBracket) {
                return Ok(Expr {
                    kind: ExprKind::Array(elements),
                    pos,
                });
            }
            if self.current.kind == TokenKind::Punct(Punct::Comma) {
                // Elision holds the undefined value
                elements.push(Expr {
                    kind: ExprKind::Name("undefined".to_string()),
                    pos: self.current.pos,
                });
                self.advance()?;
                continue;
            }
            elements.push(self.parse_assignment(false)?);
            if self.eat_punct(Punct::Comma) {
                continue;
            }
            self.expect_punct(Punct::RBracket)?;
            return Ok(Expr {
                kind: ExprKind::Array(elements),
                pos,
            });
        }
    }

    fn parse_object_literal(&mut self) -> CompileResult<Expr> {
        let pos = self.current.pos;
        self.advance()?; // '{'
        let mut props = Vec::new();
        loop {
            if self.eat_punct(Punct::RBrace) {
                return Ok(Expr {
                    kind: ExprKind::Object(props),
                    pos,
                });
            }
            let key = match &self.current.kind {
                TokenKind::Ident(name) => PropKey::Ident(name.clone()),
                TokenKind::Keyword(kw) => PropKey::Ident(keyword_text(*kw).to_string()),
                TokenKind::Str(s) => PropKey::String(s.clone()),
                TokenKind::Number(n) => PropKey::Number(*n),
                TokenKind::Eof => {
                    return Err(CompileError::UnexpectedEndOfInput {
                        line: self.current.pos.line,
                    });
                }
                other => {
                    return Err(CompileError::syntax(
                        format!("invalid property key {:?}", other),
                        self.current.pos.line,
                        self.current.pos.column,
                    ));
                }
            };
            self.advance()?;
            self.expect_punct(Punct::Colon)?;
            let value = self.parse_assignment(false)?;
            props.push((key, value));
            if self.eat_punct(Punct::Comma) {
                continue;
            }
            self.expect_punct(Punct::RBrace)?;
            return Ok(Expr {
                kind: ExprKind::Object(props),
                pos,
            });
        }
    }

    // ==================== token helpers ====================

    fn advance(&mut self) -> CompileResult<()> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.current.kind == TokenKind::Punct(punct) {
            // Advancing can only fail on malformed trailing input, which the
            // next parse step reports with better context.
            if let Ok(token) = self.lexer.next_token() {
                self.current = token;
            }
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.current.kind == TokenKind::Keyword(keyword) {
            if let Ok(token) = self.lexer.next_token() {
                self.current = token;
            }
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct) -> CompileResult<()> {
        if self.current.kind == TokenKind::Punct(punct) {
            self.advance()
        } else if self.current.kind == TokenKind::Eof {
            Err(CompileError::UnexpectedEndOfInput {
                line: self.current.pos.line,
            })
        } else {
            Err(self.unexpected(&format!("{:?}", punct)))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> CompileResult<String> {
        match &self.current.kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            TokenKind::Eof => Err(CompileError::UnexpectedEndOfInput {
                line: self.current.pos.line,
            }),
            _ => Err(self.unexpected(what)),
        }
    }

    /// Property names after `.` also accept keywords.
    fn expect_property_name(&mut self) -> CompileResult<String> {
        match &self.current.kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            TokenKind::Keyword(kw) => {
                let name = keyword_text(*kw).to_string();
                self.advance()?;
                Ok(name)
            }
            TokenKind::Eof => Err(CompileError::UnexpectedEndOfInput {
                line: self.current.pos.line,
            }),
            _ => Err(self.unexpected("property name")),
        }
    }

    fn statement_ends_here(&self) -> bool {
        self.current.newline_before
            || matches!(
                self.current.kind,
                TokenKind::Punct(Punct::Semi) | TokenKind::Punct(Punct::RBrace) | TokenKind::Eof
            )
    }

    fn consume_semicolon(&mut self) -> CompileResult<()> {
        if self.eat_punct(Punct::Semi) {
            return Ok(());
        }
        // Automatic semicolon insertion
        if matches!(
            self.current.kind,
            TokenKind::Punct(Punct::RBrace) | TokenKind::Eof
        ) || self.current.newline_before
        {
            return Ok(());
        }
        Err(self.unexpected("';'"))
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        if self.current.kind == TokenKind::Eof {
            return CompileError::UnexpectedEndOfInput {
                line: self.current.pos.line,
            };
        }
        CompileError::syntax(
            format!("expected {}, found {:?}", expected, self.current.kind),
            self.current.pos.line,
            self.current.pos.column,
        )
    }
}

enum BinaryOrLogical {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn keyword_text(kw: Keyword) -> &'static str {
    use Keyword::*;
    match kw {
        Var => "var",
        Let => "let",
        Const => "const",
        Function => "function",
        Return => "return",
        If => "if",
        Else => "else",
        While => "while",
        Do => "do",
        For => "for",
        In => "in",
        Break => "break",
        Continue => "continue",
        New => "new",
        Delete => "delete",
        Typeof => "typeof",
        Void => "void",
        Instanceof => "instanceof",
        This => "this",
        True => "true",
        False => "false",
        Null => "null",
        Throw => "throw",
        Try => "try",
        Catch => "catch",
        Finally => "finally",
        Switch => "switch",
        Case => "case",
        Default => "default",
        With => "with",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> CompileResult<Vec<Stmt>> {
        let env = CompilerEnv::default();
        Parser::new(source, 1, &env)?.parse_program()
    }

    #[test]
    fn test_var_statement() {
        let prog = parse("var x = 1, y;").unwrap();
        assert_eq!(prog.len(), 1);
        let StmtKind::VarDecl { kind, decls } = &prog[0].kind else {
            panic!("expected var declaration");
        };
        assert_eq!(*kind, DeclKind::Var);
        assert_eq!(decls.len(), 2);
        assert!(decls[1].1.is_none());
    }

    #[test]
    fn test_precedence() {
        let prog = parse("x = 1 + 2 * 3;").unwrap();
        let StmtKind::Expr(e) = &prog[0].kind else {
            panic!()
        };
        let ExprKind::Assign { value, .. } = &e.kind else {
            panic!()
        };
        let ExprKind::Binary { op, right, .. } = &value.kind else {
            panic!()
        };
        assert_eq!(*op, BinaryOp::Add);
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_asi() {
        assert!(parse("var a = 1\nvar b = 2").is_ok());
        assert!(parse("a = 1 b = 2").is_err());
        assert!(parse("return").is_ok());
    }

    #[test]
    fn test_regex_vs_division() {
        let prog = parse("x = a / b; y = /ab/g;").unwrap();
        let StmtKind::Expr(e) = &prog[1].kind else {
            panic!()
        };
        let ExprKind::Assign { value, .. } = &e.kind else {
            panic!()
        };
        assert!(matches!(value.kind, ExprKind::Regex { .. }));
    }

    #[test]
    fn test_for_in() {
        let prog = parse("for (var i in t) delete t[i];").unwrap();
        assert!(matches!(prog[0].kind, StmtKind::ForIn { .. }));
    }

    #[test]
    fn test_function_forms() {
        assert!(parse("function f(a, b) { return a + b; }").is_ok());
        assert!(parse("var f = function () {};").is_ok());
        assert!(parse("function () {}").is_err());
    }

    #[test]
    fn test_member_expr_function_name_extension() {
        let source = "function a.b.c() {}";
        assert!(parse(source).is_err());
        let env = CompilerEnv {
            member_expr_as_function_name: true,
            ..Default::default()
        };
        let prog = Parser::new(source, 1, &env)
            .unwrap()
            .parse_program()
            .unwrap();
        assert!(matches!(prog[0].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn test_premature_eof_detection() {
        assert!(matches!(
            parse("function f() {"),
            Err(CompileError::UnexpectedEndOfInput { .. })
        ));
        assert!(matches!(
            parse("1 +"),
            Err(CompileError::UnexpectedEndOfInput { .. })
        ));
        assert!(parse("function f() {}").is_ok());
    }

    #[test]
    fn test_try_forms() {
        assert!(parse("try { f(); } catch (e) { g(e); }").is_ok());
        assert!(parse("try { f(); } finally { g(); }").is_ok());
        assert!(parse("try { f(); }").is_err());
    }

    #[test]
    fn test_switch() {
        let prog = parse("switch (x) { case 1: a(); break; default: b(); }").unwrap();
        let StmtKind::Switch { cases, .. } = &prog[0].kind else {
            panic!()
        };
        assert_eq!(cases.len(), 2);
        assert!(cases[0].0.is_some());
        assert!(cases[1].0.is_none());
    }

    #[test]
    fn test_new_with_member() {
        let prog = parse("var d = new a.B(1);").unwrap();
        let StmtKind::VarDecl { decls, .. } = &prog[0].kind else {
            panic!()
        };
        let Some(init) = &decls[0].1 else { panic!() };
        assert!(matches!(init.kind, ExprKind::New { .. }));
    }

    #[test]
    fn test_with_unsupported() {
        assert!(matches!(
            parse("with (o) { x; }"),
            Err(CompileError::Unsupported { .. })
        ));
    }
}
