//! Abstract Syntax Tree for the OpenCL C kernel subset
//!
//! This module defines the AST types produced by the parser.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::Span;

/// A parsed program: the kernels it defines, in source order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub kernels: Vec<KernelDef>,
}

impl Program {
    pub fn kernel(&self, name: &str) -> Option<&KernelDef> {
        self.kernels.iter().find(|k| k.name == name)
    }
}

/// A `__kernel void name(...) { ... }` definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    /// Local-memory arrays declared anywhere in the body
    pub local_arrays: Vec<LocalArray>,
    /// Whether the body calls `barrier`
    pub uses_barrier: bool,
    pub span: Span,
}

/// OpenCL C scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    ULong,
    Float,
    Double,
}

impl ScalarType {
    pub fn byte_width(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::Char | ScalarType::UChar => 1,
            ScalarType::Short | ScalarType::UShort => 2,
            ScalarType::Int | ScalarType::UInt | ScalarType::Float => 4,
            ScalarType::Long | ScalarType::ULong | ScalarType::Double => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::Float | ScalarType::Double)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ScalarType::Char
                | ScalarType::Short
                | ScalarType::Int
                | ScalarType::Long
                | ScalarType::Float
                | ScalarType::Double
        )
    }

    /// Map an OpenCL C type name (as produced by the host side) to a type
    pub fn from_name(name: &str) -> Option<ScalarType> {
        Some(match name {
            "bool" => ScalarType::Bool,
            "char" => ScalarType::Char,
            "uchar" | "unsigned char" => ScalarType::UChar,
            "short" => ScalarType::Short,
            "ushort" | "unsigned short" => ScalarType::UShort,
            "int" => ScalarType::Int,
            "uint" | "unsigned int" | "unsigned" => ScalarType::UInt,
            "long" => ScalarType::Long,
            "ulong" | "unsigned long" | "size_t" => ScalarType::ULong,
            "float" => ScalarType::Float,
            "double" => ScalarType::Double,
            _ => return None,
        })
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarType::Bool => "bool",
            ScalarType::Char => "char",
            ScalarType::UChar => "uchar",
            ScalarType::Short => "short",
            ScalarType::UShort => "ushort",
            ScalarType::Int => "int",
            ScalarType::UInt => "uint",
            ScalarType::Long => "long",
            ScalarType::ULong => "ulong",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
        };
        f.write_str(name)
    }
}

/// Address space of a pointer or variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressSpace {
    Private,
    Global,
    Local,
    Constant,
}

/// Kernel parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: ScalarType,
    pub kind: ParamKind,
    pub is_const: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamKind {
    /// Passed by value
    Value,
    /// Pointer into the given address space
    Pointer(AddressSpace),
}

/// `__local T name[N];`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalArray {
    pub name: String,
    pub ty: ScalarType,
    pub len: usize,
    pub span: Span,
}

/// Block of statements
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

/// One declarator in a declaration statement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    /// `T a = 1, b;` in private memory
    Decl {
        ty: ScalarType,
        declarators: Vec<Declarator>,
    },
    /// Local array declaration; storage is allocated per work-group
    LocalDecl { name: String },
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    Block(Block),
    Return(Span),
    Break(Span),
    Continue(Span),
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    Ident(String),
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `target = value` or `target op= value`
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// `++x`, `x++`, `--x`, `x--`
    Step {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
    Ternary {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Cast {
        ty: ScalarType,
        expr: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }
}
