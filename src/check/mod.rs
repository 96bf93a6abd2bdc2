//! Semantic checks for kernels
//!
//! Runs after parsing and before a program counts as built. It resolves
//! every identifier against its scope, checks builtin calls and their
//! arities, and rejects writes through read-only pointers. All errors are
//! collected so that a build log lists every problem at once.

use rustc_hash::FxHashMap;

use crate::ast::*;
use crate::diagnostics::SourceError;
use crate::interp::builtins;

/// Check every kernel in a program
pub fn check_program(program: &Program) -> Vec<SourceError> {
    let mut errors = Vec::new();
    for kernel in &program.kernels {
        errors.extend(check_kernel(kernel));
    }
    errors
}

/// Check a single kernel
pub fn check_kernel(kernel: &KernelDef) -> Vec<SourceError> {
    let mut checker = Checker {
        scopes: vec![FxHashMap::default()],
        errors: Vec::new(),
    };
    for param in &kernel.params {
        let binding = match param.kind {
            ParamKind::Value => Binding::Scalar,
            ParamKind::Pointer(space) => Binding::Array {
                writable: !param.is_const && space != AddressSpace::Constant,
            },
        };
        checker.declare(&param.name, binding, param.span);
    }
    checker.check_block(&kernel.body, &kernel.local_arrays);
    checker.errors
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    Scalar,
    Array { writable: bool },
}

struct Checker<'a> {
    scopes: Vec<FxHashMap<&'a str, Binding>>,
    errors: Vec<SourceError>,
}

impl<'a> Checker<'a> {
    fn error(&mut self, message: impl Into<String>, span: crate::common::Span) {
        self.errors.push(SourceError::new(message, span));
    }

    fn declare(&mut self, name: &'a str, binding: Binding, span: crate::common::Span) {
        let Some(scope) = self.scopes.last_mut() else {
            return;
        };
        if scope.insert(name, binding).is_some() {
            self.error(format!("redefinition of `{}`", name), span);
        }
    }

    fn lookup(&self, name: &str) -> Option<Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    fn check_block(&mut self, block: &'a Block, local_arrays: &'a [LocalArray]) {
        self.scopes.push(FxHashMap::default());
        for stmt in &block.stmts {
            if let Stmt::LocalDecl { name } = stmt
                && let Some(array) = local_arrays.iter().find(|a| &a.name == name)
            {
                self.declare(&array.name, Binding::Array { writable: true }, array.span);
                continue;
            }
            self.check_stmt(stmt, local_arrays);
        }
        self.scopes.pop();
    }

    fn check_scoped(&mut self, stmt: &'a Stmt, local_arrays: &'a [LocalArray]) {
        self.scopes.push(FxHashMap::default());
        self.check_stmt(stmt, local_arrays);
        self.scopes.pop();
    }

    fn check_stmt(&mut self, stmt: &'a Stmt, local_arrays: &'a [LocalArray]) {
        match stmt {
            Stmt::Decl { declarators, .. } => {
                for decl in declarators {
                    // The initializer cannot see the name it initializes
                    if let Some(init) = &decl.init {
                        self.check_expr(init);
                    }
                    self.declare(&decl.name, Binding::Scalar, decl.span);
                }
            }
            Stmt::LocalDecl { .. } | Stmt::Empty => {}
            Stmt::Expr(expr) => self.check_expr(expr),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.check_expr(cond);
                self.check_scoped(then_branch, local_arrays);
                if let Some(else_branch) = else_branch {
                    self.check_scoped(else_branch, local_arrays);
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.scopes.push(FxHashMap::default());
                if let Some(init) = init {
                    self.check_stmt(init, local_arrays);
                }
                if let Some(cond) = cond {
                    self.check_expr(cond);
                }
                if let Some(step) = step {
                    self.check_expr(step);
                }
                self.check_scoped(body, local_arrays);
                self.scopes.pop();
            }
            Stmt::While { cond, body } | Stmt::DoWhile { body, cond } => {
                self.check_expr(cond);
                self.check_scoped(body, local_arrays);
            }
            Stmt::Block(block) => self.check_block(block, local_arrays),
            Stmt::Return(_) | Stmt::Break(_) | Stmt::Continue(_) => {}
        }
    }

    fn check_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::IntLit(_) | ExprKind::FloatLit(_) => {}
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(Binding::Scalar) => {}
                Some(Binding::Array { .. }) => {
                    self.error(format!("array `{}` used as a scalar", name), expr.span)
                }
                None if builtins::constant(name).is_some() => {}
                None => self.error(format!("use of undeclared identifier `{}`", name), expr.span),
            },
            ExprKind::Index { base, index } => {
                self.check_array(base);
                self.check_expr(index);
            }
            ExprKind::Call { name, args } => {
                match builtins::arity(name) {
                    None => self.error(
                        format!("implicit declaration of function `{}`", name),
                        expr.span,
                    ),
                    Some(range) if !range.contains(&args.len()) => self.error(
                        format!(
                            "`{}` expects {} argument(s), found {}",
                            name,
                            range.start(),
                            args.len()
                        ),
                        expr.span,
                    ),
                    Some(_) => {}
                }
                for arg in args {
                    self.check_expr(arg);
                }
            }
            ExprKind::Unary { expr, .. } | ExprKind::Cast { expr, .. } => self.check_expr(expr),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.check_expr(lhs);
                self.check_expr(rhs);
            }
            ExprKind::Assign { target, value, .. } => {
                self.check_target(target);
                self.check_expr(value);
            }
            ExprKind::Step { target, .. } => self.check_target(target),
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                self.check_expr(cond);
                self.check_expr(then_expr);
                self.check_expr(else_expr);
            }
        }
    }

    /// Check the base of an index expression; returns whether it is writable
    fn check_array(&mut self, base: &Expr) -> bool {
        match &base.kind {
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(Binding::Array { writable }) => writable,
                Some(Binding::Scalar) => {
                    self.error(format!("subscripted value `{}` is not an array", name), base.span);
                    true
                }
                None => {
                    self.error(format!("use of undeclared identifier `{}`", name), base.span);
                    true
                }
            },
            _ => {
                self.error("only named arrays can be indexed", base.span);
                true
            }
        }
    }

    fn check_target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Index { base, index } => {
                if !self.check_array(base) {
                    self.error("cannot write through a pointer to const data", target.span);
                }
                self.check_expr(index);
            }
            _ => self.check_expr(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn errors(source: &str) -> Vec<String> {
        let program = parse_source(source).unwrap();
        check_program(&program)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }

    #[test]
    fn test_valid_kernel_has_no_errors() {
        let errs = errors(
            "__kernel void k(__global float* out, const uint n) {
                __local float s[8];
                uint i = get_global_id(0);
                for (uint j = 0; j < n; j++) { s[j % 8] = out[i]; }
                barrier(CLK_LOCAL_MEM_FENCE);
            }",
        );
        assert!(errs.is_empty(), "{:?}", errs);
    }

    #[test]
    fn test_undeclared_identifier() {
        let errs = errors("__kernel void k(__global float* out) { out[0] = y; }");
        assert_eq!(errs, vec!["use of undeclared identifier `y`".to_string()]);
    }

    #[test]
    fn test_write_to_const_pointer() {
        let errs = errors("__kernel void k(__global const float* x) { x[0] = 1.0f; }");
        assert_eq!(errs.len(), 1);
        assert!(errs[0].contains("const"));
    }

    #[test]
    fn test_unknown_function_and_scope_exit() {
        let errs = errors(
            "__kernel void k(__global int* o) { { int t = 1; } o[0] = t + foo(1); }",
        );
        assert_eq!(errs.len(), 2);
    }
}
