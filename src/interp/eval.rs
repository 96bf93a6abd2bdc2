//! Tree-walking interpreter for one work-item

use rustc_hash::FxHashMap;

use crate::ast::*;
use crate::runtime::GpuError;

use super::barrier::{Aborted, GroupBarrier};
use super::builtins;
use super::memory::Memory;
use super::value::Value;
use super::{Binding, Geometry};

/// Control flow signal carried on the error path
#[derive(Debug)]
pub(crate) enum ControlFlow {
    Return,
    Break,
    Continue,
    /// The work-group was aborted by a peer while this item waited
    Aborted,
    Fault(GpuError),
}

impl From<GpuError> for ControlFlow {
    fn from(err: GpuError) -> Self {
        ControlFlow::Fault(err)
    }
}

impl From<Aborted> for ControlFlow {
    fn from(_: Aborted) -> Self {
        ControlFlow::Aborted
    }
}

type Flow<T> = Result<T, ControlFlow>;

fn fault(message: impl Into<String>) -> ControlFlow {
    ControlFlow::Fault(GpuError::Execution(message.into()))
}

/// A named slot visible to the kernel body
#[derive(Debug, Clone, Copy)]
enum Slot<'a> {
    Var(Value),
    Memory(&'a Memory),
}

/// Identity of one work-item within the NDRange
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkItemId {
    pub global: [usize; 3],
    pub local: [usize; 3],
    pub group: [usize; 3],
}

/// Interpreter state of a single work-item
pub(crate) struct WorkItem<'a> {
    geometry: &'a Geometry,
    id: WorkItemId,
    scopes: Vec<FxHashMap<&'a str, Slot<'a>>>,
    barrier: Option<&'a GroupBarrier>,
}

impl<'a> WorkItem<'a> {
    pub fn new(
        kernel: &'a KernelDef,
        args: &'a [Binding],
        locals: &'a [Memory],
        geometry: &'a Geometry,
        id: WorkItemId,
        barrier: Option<&'a GroupBarrier>,
    ) -> Self {
        let mut kernel_scope = FxHashMap::default();
        for (param, arg) in kernel.params.iter().zip(args) {
            let slot = match arg {
                Binding::Scalar(value) => Slot::Var(value.convert(param.ty)),
                Binding::Global(memory) => Slot::Memory(memory),
            };
            kernel_scope.insert(param.name.as_str(), slot);
        }
        for memory in locals {
            kernel_scope.insert(memory.name(), Slot::Memory(memory));
        }

        WorkItem {
            geometry,
            id,
            scopes: vec![kernel_scope],
            barrier,
        }
    }

    /// Execute the kernel body to completion
    pub fn run(&mut self, body: &'a Block) -> Flow<()> {
        match self.exec_block(body) {
            Ok(()) | Err(ControlFlow::Return) => Ok(()),
            Err(ControlFlow::Break) | Err(ControlFlow::Continue) => {
                Err(fault("`break` or `continue` outside of a loop"))
            }
            Err(other) => Err(other),
        }
    }

    // ==================== SCOPES ====================

    fn push_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn define(&mut self, name: &'a str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, Slot::Var(value));
        }
    }

    fn lookup(&self, name: &str) -> Option<Slot<'a>> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn assign_var(&mut self, name: &str, value: Value) -> Flow<Value> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(slot) = scope.get_mut(name) {
                return match slot {
                    Slot::Var(old) => {
                        let stored = value.convert(old.ty());
                        *old = stored;
                        Ok(stored)
                    }
                    Slot::Memory(memory) => Err(fault(format!(
                        "cannot assign to array `{}`",
                        memory.name()
                    ))),
                };
            }
        }
        Err(fault(format!("use of undeclared identifier `{}`", name)))
    }

    // ==================== STATEMENTS ====================

    fn exec_block(&mut self, block: &'a Block) -> Flow<()> {
        self.push_scope();
        let result = block.stmts.iter().try_for_each(|stmt| self.exec_stmt(stmt));
        self.pop_scope();
        result
    }

    fn exec_stmt(&mut self, stmt: &'a Stmt) -> Flow<()> {
        match stmt {
            Stmt::Decl { ty, declarators } => {
                for decl in declarators {
                    let value = match &decl.init {
                        Some(init) => self.eval_expr(init)?.convert(*ty),
                        None => Value::zero(*ty),
                    };
                    self.define(&decl.name, value);
                }
                Ok(())
            }
            // Local arrays are bound for the whole group before execution
            Stmt::LocalDecl { .. } | Stmt::Empty => Ok(()),
            Stmt::Expr(expr) => self.eval_expr(expr).map(|_| ()),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval_expr(cond)?.is_truthy() {
                    self.exec_scoped(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_scoped(else_branch)
                } else {
                    Ok(())
                }
            }
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => {
                self.push_scope();
                let result = self.exec_for(init.as_deref(), cond.as_ref(), step.as_ref(), body);
                self.pop_scope();
                result
            }
            Stmt::While { cond, body } => {
                while self.eval_expr(cond)?.is_truthy() {
                    match self.exec_scoped(body) {
                        Ok(()) | Err(ControlFlow::Continue) => {}
                        Err(ControlFlow::Break) => break,
                        Err(other) => return Err(other),
                    }
                }
                Ok(())
            }
            Stmt::DoWhile { body, cond } => {
                loop {
                    match self.exec_scoped(body) {
                        Ok(()) | Err(ControlFlow::Continue) => {}
                        Err(ControlFlow::Break) => break,
                        Err(other) => return Err(other),
                    }
                    if !self.eval_expr(cond)?.is_truthy() {
                        break;
                    }
                }
                Ok(())
            }
            Stmt::Block(block) => self.exec_block(block),
            Stmt::Return(_) => Err(ControlFlow::Return),
            Stmt::Break(_) => Err(ControlFlow::Break),
            Stmt::Continue(_) => Err(ControlFlow::Continue),
        }
    }

    fn exec_for(
        &mut self,
        init: Option<&'a Stmt>,
        cond: Option<&'a Expr>,
        step: Option<&'a Expr>,
        body: &'a Stmt,
    ) -> Flow<()> {
        if let Some(init) = init {
            self.exec_stmt(init)?;
        }
        loop {
            if let Some(cond) = cond
                && !self.eval_expr(cond)?.is_truthy()
            {
                break;
            }
            match self.exec_scoped(body) {
                Ok(()) | Err(ControlFlow::Continue) => {}
                Err(ControlFlow::Break) => break,
                Err(other) => return Err(other),
            }
            if let Some(step) = step {
                self.eval_expr(step)?;
            }
        }
        Ok(())
    }

    /// Run a nested statement in its own scope
    fn exec_scoped(&mut self, stmt: &'a Stmt) -> Flow<()> {
        self.push_scope();
        let result = self.exec_stmt(stmt);
        self.pop_scope();
        result
    }

    // ==================== EXPRESSIONS ====================

    fn eval_expr(&mut self, expr: &'a Expr) -> Flow<Value> {
        match &expr.kind {
            ExprKind::IntLit(n) => Ok(match i32::try_from(*n) {
                Ok(v) => Value::int(v as i64),
                Err(_) => Value::Int(*n, ScalarType::Long),
            }),
            ExprKind::FloatLit(v) => Ok(Value::double(*v)),
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(Slot::Var(value)) => Ok(value),
                Some(Slot::Memory(memory)) => Err(fault(format!(
                    "array `{}` used as a scalar",
                    memory.name()
                ))),
                None => builtins::constant(name)
                    .ok_or_else(|| fault(format!("use of undeclared identifier `{}`", name))),
            },
            ExprKind::Index { base, index } => {
                let memory = self.memory_of(base)?;
                let index = self.eval_expr(index)?;
                Ok(memory.load(index_of(index))?)
            }
            ExprKind::Call { name, args } => self.eval_call(name, args),
            ExprKind::Unary { op, expr } => {
                let value = self.eval_expr(expr)?;
                Value::unary(*op, value).map_err(fault)
            }
            ExprKind::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                let result = self.eval_expr(lhs)?.is_truthy() && self.eval_expr(rhs)?.is_truthy();
                Ok(Value::bool(result))
            }
            ExprKind::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                let result = self.eval_expr(lhs)?.is_truthy() || self.eval_expr(rhs)?.is_truthy();
                Ok(Value::bool(result))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.eval_expr(lhs)?;
                let rhs = self.eval_expr(rhs)?;
                Value::binary(*op, lhs, rhs).map_err(fault)
            }
            ExprKind::Assign { op, target, value } => {
                let rhs = self.eval_expr(value)?;
                let new = match op {
                    Some(op) => {
                        let old = self.eval_expr(target)?;
                        Value::binary(*op, old, rhs).map_err(fault)?
                    }
                    None => rhs,
                };
                self.store(target, new)
            }
            ExprKind::Step {
                target,
                increment,
                prefix,
            } => {
                let old = self.eval_expr(target)?;
                let op = if *increment { BinaryOp::Add } else { BinaryOp::Sub };
                let new = Value::binary(op, old, Value::int(1)).map_err(fault)?;
                let stored = self.store(target, new)?;
                Ok(if *prefix { stored } else { old })
            }
            ExprKind::Ternary {
                cond,
                then_expr,
                else_expr,
            } => {
                if self.eval_expr(cond)?.is_truthy() {
                    self.eval_expr(then_expr)
                } else {
                    self.eval_expr(else_expr)
                }
            }
            ExprKind::Cast { ty, expr } => Ok(self.eval_expr(expr)?.convert(*ty)),
        }
    }

    fn memory_of(&self, base: &Expr) -> Flow<&'a Memory> {
        match &base.kind {
            ExprKind::Ident(name) => match self.lookup(name) {
                Some(Slot::Memory(memory)) => Ok(memory),
                Some(Slot::Var(_)) => Err(fault(format!("`{}` is not an array", name))),
                None => Err(fault(format!("use of undeclared identifier `{}`", name))),
            },
            _ => Err(fault("only named arrays can be indexed")),
        }
    }

    fn store(&mut self, target: &'a Expr, value: Value) -> Flow<Value> {
        match &target.kind {
            ExprKind::Ident(name) => self.assign_var(name, value),
            ExprKind::Index { base, index } => {
                let memory = self.memory_of(base)?;
                let index = self.eval_expr(index)?;
                Ok(memory.store(index_of(index), value)?)
            }
            _ => Err(fault("expression is not assignable")),
        }
    }

    fn eval_call(&mut self, name: &str, args: &'a [Expr]) -> Flow<Value> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval_expr(arg)?);
        }

        if builtins::WORK_ITEM_FUNCTIONS.contains(&name) {
            let dim = values.first().map(|v| v.as_i64()).unwrap_or(0);
            return Ok(Value::size(self.work_item_query(name, dim)));
        }

        match name {
            "get_work_dim" => Ok(Value::uint(self.geometry.work_dim as u32)),
            "barrier" | "work_group_barrier" => {
                if let Some(barrier) = self.barrier {
                    barrier.wait()?;
                }
                Ok(Value::int(0))
            }
            // A single in-order interpreter has no reordering to fence
            "mem_fence" => Ok(Value::int(0)),
            _ => builtins::call_math(name, &values).map_err(fault),
        }
    }

    fn work_item_query(&self, name: &str, dim: i64) -> usize {
        let geometry = self.geometry;
        let Some(d) = usize::try_from(dim).ok().filter(|&d| d < geometry.work_dim) else {
            // Out-of-range dimensions report sizes of 1 and ids of 0
            return match name {
                "get_global_size" | "get_local_size" | "get_num_groups" => 1,
                _ => 0,
            };
        };
        match name {
            "get_global_id" => self.id.global[d],
            "get_local_id" => self.id.local[d],
            "get_group_id" => self.id.group[d],
            "get_global_size" => geometry.global_size[d],
            "get_local_size" => geometry.local_size[d],
            "get_num_groups" => geometry.num_groups[d],
            _ => 0,
        }
    }
}

/// Signed index value, reinterpreting unsigned 64-bit indices
fn index_of(value: Value) -> i64 {
    match value {
        Value::Int(v, ScalarType::ULong) if v < 0 => i64::MAX,
        other => other.as_i64(),
    }
}
