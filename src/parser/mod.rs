//! Parser for the OpenCL C kernel subset
//!
//! A recursive descent parser that produces a [`Program`] from a token stream.
//! Only kernel functions are accepted at file scope. Inside a kernel the
//! parser understands private scalar declarations, `__local` arrays at
//! kernel scope, structured control flow and the full C expression grammar
//! except the comma operator.

use crate::ast::*;
use crate::common::Span;
use crate::diagnostics::SourceError;
use crate::lexer::{Token, TokenKind};

type Result<T> = std::result::Result<T, SourceError>;

/// Parse a token stream into a program
pub fn parse(tokens: &[Token]) -> Result<Program> {
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

/// Lex and parse kernel source in one step
pub fn parse_source(source: &str) -> Result<Program> {
    let tokens = crate::lexer::lex(source)?;
    parse(&tokens)
}

/// Parser state
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    /// Block nesting depth inside the current kernel body
    depth: usize,
    /// Loop nesting depth, for `break`/`continue` checks
    loops: usize,
    local_arrays: Vec<LocalArray>,
    uses_barrier: bool,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            loops: 0,
            local_arrays: Vec::new(),
            uses_barrier: false,
        }
    }

    fn current(&self) -> &Token {
        // The lexer always terminates the stream with Eof
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> TokenKind {
        self.tokens
            .get(self.pos)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn peek_n(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek() == kind
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("`{}`", kind)))
        }
    }

    fn unexpected(&self, expected: &str) -> SourceError {
        let tok = self.current();
        let found = if tok.kind == TokenKind::Eof {
            "end of file".to_string()
        } else {
            format!("`{}`", tok.text)
        };
        SourceError::new(format!("expected {}, found {}", expected, found), tok.span)
    }

    fn span(&self) -> Span {
        self.current().span
    }

    fn prev_span(&self) -> Span {
        self.tokens
            .get(self.pos.saturating_sub(1))
            .map(|t| t.span)
            .unwrap_or_default()
    }

    // ==================== PROGRAM ====================

    fn parse_program(&mut self) -> Result<Program> {
        let mut kernels: Vec<KernelDef> = Vec::new();

        while !self.at(TokenKind::Eof) {
            let kernel = self.parse_kernel()?;
            if kernels.iter().any(|k| k.name == kernel.name) {
                return Err(SourceError::new(
                    format!("redefinition of kernel `{}`", kernel.name),
                    kernel.span,
                ));
            }
            kernels.push(kernel);
        }

        Ok(Program { kernels })
    }

    fn parse_kernel(&mut self) -> Result<KernelDef> {
        let start = self.span();
        if !self.eat(TokenKind::Kernel) {
            return Err(SourceError::new(
                "only `__kernel` functions are supported at file scope",
                start,
            ));
        }
        self.expect(TokenKind::Void)?;
        let name = self.expect(TokenKind::Ident)?.text;
        let params = self.parse_params()?;

        self.local_arrays.clear();
        self.uses_barrier = false;
        self.depth = 0;
        self.loops = 0;

        let body = self.parse_block()?;

        Ok(KernelDef {
            name,
            params,
            body,
            local_arrays: std::mem::take(&mut self.local_arrays),
            uses_barrier: self.uses_barrier,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Param>> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();

        if self.at(TokenKind::Void) && self.peek_n(1) == TokenKind::RParen {
            self.advance();
        }

        while !self.at(TokenKind::RParen) {
            let param = self.parse_param()?;
            if params.iter().any(|p: &Param| p.name == param.name) {
                return Err(SourceError::new(
                    format!("duplicate parameter `{}`", param.name),
                    param.span,
                ));
            }
            params.push(param);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }

        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_param(&mut self) -> Result<Param> {
        let start = self.span();
        let mut quals = self.parse_qualifiers();
        let ty = self.parse_scalar_type()?;
        quals.merge(self.parse_qualifiers());

        let is_pointer = self.eat(TokenKind::Star);
        if is_pointer {
            // qualifiers after `*` apply to the pointer itself
            self.parse_qualifiers();
        }

        let name_tok = self.expect(TokenKind::Ident)?;
        let span = start.merge(name_tok.span);

        let kind = match (is_pointer, quals.space) {
            (true, Some(AddressSpace::Local)) => {
                return Err(SourceError::new(
                    "`__local` pointer parameters are not supported",
                    span,
                ));
            }
            (true, Some(space)) if space != AddressSpace::Private => ParamKind::Pointer(space),
            (true, _) => {
                return Err(SourceError::new(
                    "kernel pointer parameters must be declared `__global` or `__constant`",
                    span,
                ));
            }
            (false, None) | (false, Some(AddressSpace::Private)) => ParamKind::Value,
            (false, Some(_)) => {
                return Err(SourceError::new(
                    "only pointer parameters may carry an address-space qualifier",
                    span,
                ));
            }
        };

        Ok(Param {
            name: name_tok.text,
            ty,
            kind,
            is_const: quals.is_const,
            span,
        })
    }

    fn parse_qualifiers(&mut self) -> Qualifiers {
        let mut quals = Qualifiers::default();
        loop {
            match self.peek() {
                TokenKind::Global => quals.space = Some(AddressSpace::Global),
                TokenKind::Local => quals.space = Some(AddressSpace::Local),
                TokenKind::Constant => quals.space = Some(AddressSpace::Constant),
                TokenKind::Private => quals.space = Some(AddressSpace::Private),
                TokenKind::Const => quals.is_const = true,
                TokenKind::Volatile | TokenKind::Restrict => {}
                _ => break,
            }
            self.advance();
        }
        quals
    }

    fn parse_scalar_type(&mut self) -> Result<ScalarType> {
        let ty = match self.peek() {
            TokenKind::Bool => ScalarType::Bool,
            TokenKind::Char => ScalarType::Char,
            TokenKind::UChar => ScalarType::UChar,
            TokenKind::Short => ScalarType::Short,
            TokenKind::UShort => ScalarType::UShort,
            TokenKind::Int => ScalarType::Int,
            TokenKind::UInt => ScalarType::UInt,
            TokenKind::Long => ScalarType::Long,
            TokenKind::ULong | TokenKind::SizeT => ScalarType::ULong,
            TokenKind::Float => ScalarType::Float,
            TokenKind::Double => ScalarType::Double,
            TokenKind::Unsigned => {
                self.advance();
                let ty = match self.peek() {
                    TokenKind::Char => ScalarType::UChar,
                    TokenKind::Short => ScalarType::UShort,
                    TokenKind::Int => ScalarType::UInt,
                    TokenKind::Long => ScalarType::ULong,
                    // bare `unsigned`
                    _ => return Ok(ScalarType::UInt),
                };
                self.advance();
                return Ok(ty);
            }
            TokenKind::Signed => {
                self.advance();
                let ty = match self.peek() {
                    TokenKind::Char => ScalarType::Char,
                    TokenKind::Short => ScalarType::Short,
                    TokenKind::Int => ScalarType::Int,
                    TokenKind::Long => ScalarType::Long,
                    _ => return Ok(ScalarType::Int),
                };
                self.advance();
                return Ok(ty);
            }
            _ => return Err(self.unexpected("a type")),
        };
        self.advance();
        Ok(ty)
    }

    fn at_declaration(&self) -> bool {
        let kind = self.peek();
        (kind.is_type_keyword() && kind != TokenKind::Void) || kind.is_qualifier()
    }

    // ==================== STATEMENTS ====================

    fn parse_block(&mut self) -> Result<Block> {
        self.expect(TokenKind::LBrace)?;
        self.depth += 1;
        let mut stmts = Vec::new();
        while !self.at(TokenKind::RBrace) {
            if self.at(TokenKind::Eof) {
                return Err(self.unexpected("`}`"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        self.depth -= 1;
        Ok(Block { stmts })
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            TokenKind::LBrace => Ok(Stmt::Block(self.parse_block()?)),
            TokenKind::Semi => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            TokenKind::While => self.parse_while(),
            TokenKind::Do => self.parse_do_while(),
            TokenKind::Return => {
                let span = self.advance().span;
                if !self.at(TokenKind::Semi) {
                    return Err(SourceError::new(
                        "kernels return `void`; `return` takes no value",
                        self.span(),
                    ));
                }
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Return(span))
            }
            TokenKind::Break | TokenKind::Continue => {
                let tok = self.advance();
                if self.loops == 0 {
                    return Err(SourceError::new(
                        format!("`{}` outside of a loop", tok.text),
                        tok.span,
                    ));
                }
                self.expect(TokenKind::Semi)?;
                Ok(if tok.kind == TokenKind::Break {
                    Stmt::Break(tok.span)
                } else {
                    Stmt::Continue(tok.span)
                })
            }
            _ if self.at_declaration() => {
                let stmt = self.parse_declaration()?;
                self.expect(TokenKind::Semi)?;
                Ok(stmt)
            }
            _ => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semi)?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    /// Declaration without the trailing `;`
    fn parse_declaration(&mut self) -> Result<Stmt> {
        let start = self.span();
        let mut quals = self.parse_qualifiers();
        let ty = self.parse_scalar_type()?;
        quals.merge(self.parse_qualifiers());

        if self.at(TokenKind::Star) {
            return Err(SourceError::new(
                "pointer variables are not supported",
                self.span(),
            ));
        }

        match quals.space {
            Some(AddressSpace::Local) => self.parse_local_array(ty, start),
            Some(AddressSpace::Global) | Some(AddressSpace::Constant) => Err(SourceError::new(
                "program-scope address spaces are not allowed for kernel variables",
                start,
            )),
            _ => {
                let mut declarators = Vec::new();
                loop {
                    let name_tok = self.expect(TokenKind::Ident)?;
                    if self.at(TokenKind::LBracket) {
                        return Err(SourceError::new(
                            "private arrays are not supported",
                            self.span(),
                        ));
                    }
                    let init = if self.eat(TokenKind::Eq) {
                        Some(self.parse_assignment()?)
                    } else {
                        None
                    };
                    declarators.push(Declarator {
                        name: name_tok.text,
                        init,
                        span: name_tok.span.merge(self.prev_span()),
                    });
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                Ok(Stmt::Decl { ty, declarators })
            }
        }
    }

    fn parse_local_array(&mut self, ty: ScalarType, start: Span) -> Result<Stmt> {
        if self.depth != 1 || self.loops != 0 {
            return Err(SourceError::new(
                "`__local` variables must be declared at kernel function scope",
                start,
            ));
        }
        let name_tok = self.expect(TokenKind::Ident)?;
        if !self.at(TokenKind::LBracket) {
            return Err(SourceError::new(
                "`__local` variables must be arrays",
                name_tok.span,
            ));
        }
        self.advance();
        let len_expr = self.parse_expr()?;
        let len = const_eval(&len_expr).filter(|&n| n > 0).ok_or_else(|| {
            SourceError::new(
                "local array length must be a positive integer constant",
                len_expr.span,
            )
        })?;
        self.expect(TokenKind::RBracket)?;
        if self.at(TokenKind::Eq) {
            return Err(SourceError::new(
                "`__local` variables cannot be initialized",
                self.span(),
            ));
        }

        if self.local_arrays.iter().any(|a| a.name == name_tok.text) {
            return Err(SourceError::new(
                format!("redefinition of `{}`", name_tok.text),
                name_tok.span,
            ));
        }
        self.local_arrays.push(LocalArray {
            name: name_tok.text.clone(),
            ty,
            len: len as usize,
            span: start.merge(self.prev_span()),
        });
        Ok(Stmt::LocalDecl {
            name: name_tok.text,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let then_branch = Box::new(self.parse_sub_stmt()?);
        let else_branch = if self.eat(TokenKind::Else) {
            Some(Box::new(self.parse_sub_stmt()?))
        } else {
            None
        };
        Ok(Stmt::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        self.expect(TokenKind::For)?;
        self.expect(TokenKind::LParen)?;
        // The init clause gets its own scope
        self.depth += 1;

        let init = if self.at(TokenKind::Semi) {
            None
        } else if self.at_declaration() {
            Some(Box::new(self.parse_declaration()?))
        } else {
            Some(Box::new(Stmt::Expr(self.parse_expr()?)))
        };
        self.expect(TokenKind::Semi)?;

        let cond = if self.at(TokenKind::Semi) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(TokenKind::Semi)?;

        let step = if self.at(TokenKind::RParen) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(TokenKind::RParen)?;

        let body = Box::new(self.parse_loop_body()?);
        self.depth -= 1;

        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt> {
        self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let body = Box::new(self.parse_loop_body()?);
        Ok(Stmt::While { cond, body })
    }

    fn parse_do_while(&mut self) -> Result<Stmt> {
        self.expect(TokenKind::Do)?;
        let body = Box::new(self.parse_loop_body()?);
        self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::Semi)?;
        Ok(Stmt::DoWhile { body, cond })
    }

    fn parse_loop_body(&mut self) -> Result<Stmt> {
        self.loops += 1;
        let body = self.parse_sub_stmt();
        self.loops -= 1;
        body
    }

    /// Statement nested under a control-flow construct
    fn parse_sub_stmt(&mut self) -> Result<Stmt> {
        if self.at_declaration() {
            return Err(SourceError::new(
                "a declaration cannot be the body of a control statement",
                self.span(),
            ));
        }
        self.depth += 1;
        let stmt = self.parse_stmt();
        self.depth -= 1;
        stmt
    }

    // ==================== EXPRESSIONS ====================

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let target = self.parse_ternary()?;

        if !self.peek().is_assign_op() {
            return Ok(target);
        }

        let op_tok = self.advance();
        if !is_lvalue(&target) {
            return Err(SourceError::new(
                "left-hand side of assignment is not assignable",
                target.span,
            ));
        }
        let op = match op_tok.kind {
            TokenKind::Eq => None,
            TokenKind::PlusEq => Some(BinaryOp::Add),
            TokenKind::MinusEq => Some(BinaryOp::Sub),
            TokenKind::StarEq => Some(BinaryOp::Mul),
            TokenKind::SlashEq => Some(BinaryOp::Div),
            TokenKind::PercentEq => Some(BinaryOp::Rem),
            TokenKind::AmpEq => Some(BinaryOp::BitAnd),
            TokenKind::PipeEq => Some(BinaryOp::BitOr),
            TokenKind::CaretEq => Some(BinaryOp::BitXor),
            TokenKind::ShlEq => Some(BinaryOp::Shl),
            _ => Some(BinaryOp::Shr),
        };
        let value = self.parse_assignment()?;
        let span = target.span.merge(value.span);
        Ok(Expr {
            kind: ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            span,
        })
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let cond = self.parse_binary(0)?;
        if !self.eat(TokenKind::Question) {
            return Ok(cond);
        }
        let then_expr = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        let else_expr = self.parse_ternary()?;
        let span = cond.span.merge(else_expr.span);
        Ok(Expr {
            kind: ExprKind::Ternary {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            span,
        })
    }

    /// Precedence climbing over the binary operators
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;

        while let Some((op, prec)) = binary_op(self.peek()) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            };
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let start = self.span();
        let op = match self.peek() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let increment = self.advance().kind == TokenKind::PlusPlus;
                let target = self.parse_unary()?;
                return self.make_step(target, increment, true, start);
            }
            TokenKind::LParen if self.is_cast() => {
                self.advance();
                self.parse_qualifiers();
                let ty = self.parse_scalar_type()?;
                self.expect(TokenKind::RParen)?;
                let expr = self.parse_unary()?;
                let span = start.merge(expr.span);
                return Ok(Expr {
                    kind: ExprKind::Cast {
                        ty,
                        expr: Box::new(expr),
                    },
                    span,
                });
            }
            _ => None,
        };

        match op {
            Some(op) => {
                self.advance();
                let expr = self.parse_unary()?;
                let span = start.merge(expr.span);
                Ok(Expr {
                    kind: ExprKind::Unary {
                        op,
                        expr: Box::new(expr),
                    },
                    span,
                })
            }
            None => self.parse_postfix(),
        }
    }

    fn is_cast(&self) -> bool {
        let next = self.peek_n(1);
        (next.is_type_keyword() && next != TokenKind::Void) || next == TokenKind::Const
    }

    fn make_step(&self, target: Expr, increment: bool, prefix: bool, start: Span) -> Result<Expr> {
        if !is_lvalue(&target) {
            return Err(SourceError::new(
                "operand of increment/decrement is not assignable",
                target.span,
            ));
        }
        let span = start.merge(target.span).merge(self.prev_span());
        Ok(Expr {
            kind: ExprKind::Step {
                target: Box::new(target),
                increment,
                prefix,
            },
            span,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek() {
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Expr {
                        kind: ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    };
                }
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    let increment = self.advance().kind == TokenKind::PlusPlus;
                    let start = expr.span;
                    expr = self.make_step(expr, increment, false, start)?;
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let tok = self.current().clone();
        let kind = match tok.kind {
            TokenKind::IntLit => {
                self.advance();
                ExprKind::IntLit(parse_int(&tok.text, 10).ok_or_else(|| {
                    SourceError::new("integer literal is too large", tok.span)
                })?)
            }
            TokenKind::HexLit => {
                self.advance();
                ExprKind::IntLit(parse_int(&tok.text[2..], 16).ok_or_else(|| {
                    SourceError::new("integer literal is too large", tok.span)
                })?)
            }
            TokenKind::FloatLit => {
                self.advance();
                let digits = tok.text.trim_end_matches(['f', 'F']);
                let value = digits.parse::<f64>().map_err(|_| {
                    SourceError::new("malformed floating-point literal", tok.span)
                })?;
                ExprKind::FloatLit(value)
            }
            TokenKind::True => {
                self.advance();
                ExprKind::IntLit(1)
            }
            TokenKind::False => {
                self.advance();
                ExprKind::IntLit(0)
            }
            TokenKind::Ident => {
                self.advance();
                if self.at(TokenKind::LParen) {
                    return self.parse_call(tok);
                }
                ExprKind::Ident(tok.text)
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                return Ok(Expr {
                    kind: inner.kind,
                    span: tok.span.merge(self.prev_span()),
                });
            }
            _ => return Err(self.unexpected("expression")),
        };

        Ok(Expr {
            kind,
            span: tok.span,
        })
    }

    fn parse_call(&mut self, name: Token) -> Result<Expr> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        while !self.at(TokenKind::RParen) {
            args.push(self.parse_assignment()?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        if matches!(name.text.as_str(), "barrier" | "work_group_barrier") {
            self.uses_barrier = true;
        }

        Ok(Expr {
            kind: ExprKind::Call {
                name: name.text,
                args,
            },
            span: name.span.merge(self.prev_span()),
        })
    }
}

#[derive(Debug, Default)]
struct Qualifiers {
    space: Option<AddressSpace>,
    is_const: bool,
}

impl Qualifiers {
    fn merge(&mut self, other: Qualifiers) {
        if other.space.is_some() {
            self.space = other.space;
        }
        self.is_const |= other.is_const;
    }
}

/// Binary operator and precedence (higher binds tighter)
fn binary_op(kind: TokenKind) -> Option<(BinaryOp, u8)> {
    Some(match kind {
        TokenKind::PipePipe => (BinaryOp::Or, 1),
        TokenKind::AmpAmp => (BinaryOp::And, 2),
        TokenKind::Pipe => (BinaryOp::BitOr, 3),
        TokenKind::Caret => (BinaryOp::BitXor, 4),
        TokenKind::Amp => (BinaryOp::BitAnd, 5),
        TokenKind::EqEq => (BinaryOp::Eq, 6),
        TokenKind::Ne => (BinaryOp::Ne, 6),
        TokenKind::Lt => (BinaryOp::Lt, 7),
        TokenKind::Le => (BinaryOp::Le, 7),
        TokenKind::Gt => (BinaryOp::Gt, 7),
        TokenKind::Ge => (BinaryOp::Ge, 7),
        TokenKind::Shl => (BinaryOp::Shl, 8),
        TokenKind::Shr => (BinaryOp::Shr, 8),
        TokenKind::Plus => (BinaryOp::Add, 9),
        TokenKind::Minus => (BinaryOp::Sub, 9),
        TokenKind::Star => (BinaryOp::Mul, 10),
        TokenKind::Slash => (BinaryOp::Div, 10),
        TokenKind::Percent => (BinaryOp::Rem, 10),
        _ => return None,
    })
}

fn is_lvalue(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Ident(_) | ExprKind::Index { .. })
}

/// Parse an integer literal body, ignoring `u`/`l` suffixes
fn parse_int(text: &str, radix: u32) -> Option<i64> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    u64::from_str_radix(digits, radix).ok().map(|v| v as i64)
}

/// Evaluate an integer constant expression
fn const_eval(expr: &Expr) -> Option<i64> {
    match &expr.kind {
        ExprKind::IntLit(n) => Some(*n),
        ExprKind::Unary {
            op: UnaryOp::Neg,
            expr,
        } => const_eval(expr).map(i64::wrapping_neg),
        ExprKind::Unary {
            op: UnaryOp::Plus,
            expr,
        } => const_eval(expr),
        ExprKind::Binary { op, lhs, rhs } => {
            let (a, b) = (const_eval(lhs)?, const_eval(rhs)?);
            match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem => a.checked_rem(b),
                BinaryOp::Shl => u32::try_from(b).ok().and_then(|b| a.checked_shl(b)),
                BinaryOp::Shr => u32::try_from(b).ok().and_then(|b| a.checked_shr(b)),
                _ => None,
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_array_length_is_folded() {
        let program = parse_source(
            "__kernel void k(__global int* out) { __local int scratch[4 * 8]; out[0] = 1; }",
        )
        .unwrap();
        let kernel = &program.kernels[0];
        assert_eq!(kernel.local_arrays.len(), 1);
        assert_eq!(kernel.local_arrays[0].len, 32);
        assert!(!kernel.uses_barrier);
    }

    #[test]
    fn test_barrier_is_detected() {
        let program = parse_source(
            "__kernel void k(__global int* out) { barrier(CLK_LOCAL_MEM_FENCE); }",
        )
        .unwrap();
        assert!(program.kernels[0].uses_barrier);
    }

    #[test]
    fn test_precedence() {
        let program =
            parse_source("__kernel void k(__global int* o) { o[0] = 1 + 2 * 3 << 1; }").unwrap();
        let Stmt::Expr(expr) = &program.kernels[0].body.stmts[0] else {
            panic!("expected expression statement");
        };
        let ExprKind::Assign { value, .. } = &expr.kind else {
            panic!("expected assignment");
        };
        // (1 + (2 * 3)) << 1
        assert_eq!(const_eval(value), Some(14));
    }

    #[test]
    fn test_local_in_nested_block_rejected() {
        let err = parse_source("__kernel void k() { if (1) { __local int s[4]; } }").unwrap_err();
        assert!(err.message.contains("kernel function scope"));
    }
}
