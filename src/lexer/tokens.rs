//! Token definitions for the OpenCL C kernel lexer

use crate::common::Span;
use logos::Logos;
use serde::{Deserialize, Serialize};

/// A token with its kind, span, and text
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

/// Token kinds recognized by the lexer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Logos, Serialize, Deserialize)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*[^/])*\*/")]
#[logos(skip r"#[^\n]*")]
pub enum TokenKind {
    // Function and address-space qualifiers
    #[token("__kernel")]
    #[token("kernel")]
    Kernel,
    #[token("__global")]
    #[token("global")]
    Global,
    #[token("__local")]
    #[token("local")]
    Local,
    #[token("__constant")]
    #[token("constant")]
    Constant,
    #[token("__private")]
    #[token("private")]
    Private,
    #[token("const")]
    #[token("__const")]
    Const,
    #[token("volatile")]
    Volatile,
    #[token("restrict")]
    #[token("__restrict")]
    Restrict,

    // Scalar types
    #[token("void")]
    Void,
    #[token("bool")]
    Bool,
    #[token("char")]
    Char,
    #[token("uchar")]
    UChar,
    #[token("short")]
    Short,
    #[token("ushort")]
    UShort,
    #[token("int")]
    Int,
    #[token("uint")]
    UInt,
    #[token("long")]
    Long,
    #[token("ulong")]
    ULong,
    #[token("float")]
    Float,
    #[token("double")]
    Double,
    #[token("size_t")]
    SizeT,
    #[token("unsigned")]
    Unsigned,
    #[token("signed")]
    Signed,

    // Control flow
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,

    // Boolean literals
    #[token("true")]
    True,
    #[token("false")]
    False,

    // Literals
    #[regex(r"[0-9]+[uUlL]*", priority = 2)]
    IntLit,
    #[regex(r"0[xX][0-9a-fA-F]+[uUlL]*")]
    HexLit,
    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?[fF]?")]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?[fF]?")]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+[fF]?")]
    FloatLit,

    // Identifiers (priority 1 so keyword tokens take precedence)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", priority = 1)]
    Ident,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("=")]
    Eq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,

    // Compound operators
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AmpAmp,
    #[token("||")]
    PipePipe,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("&=")]
    AmpEq,
    #[token("|=")]
    PipeEq,
    #[token("^=")]
    CaretEq,
    #[token("<<=")]
    ShlEq,
    #[token(">>=")]
    ShrEq,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // Punctuation
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,

    // Special
    Eof,
}

impl TokenKind {
    /// Check if this token starts a type specifier
    pub fn is_type_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Void
                | TokenKind::Bool
                | TokenKind::Char
                | TokenKind::UChar
                | TokenKind::Short
                | TokenKind::UShort
                | TokenKind::Int
                | TokenKind::UInt
                | TokenKind::Long
                | TokenKind::ULong
                | TokenKind::Float
                | TokenKind::Double
                | TokenKind::SizeT
                | TokenKind::Unsigned
                | TokenKind::Signed
        )
    }

    /// Check if this token is an address-space or type qualifier
    pub fn is_qualifier(&self) -> bool {
        matches!(
            self,
            TokenKind::Global
                | TokenKind::Local
                | TokenKind::Constant
                | TokenKind::Private
                | TokenKind::Const
                | TokenKind::Volatile
                | TokenKind::Restrict
        )
    }

    /// Check if this token is a literal
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            TokenKind::IntLit
                | TokenKind::HexLit
                | TokenKind::FloatLit
                | TokenKind::True
                | TokenKind::False
        )
    }

    /// Check if this token is an assignment operator
    pub fn is_assign_op(&self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::PlusEq
                | TokenKind::MinusEq
                | TokenKind::StarEq
                | TokenKind::SlashEq
                | TokenKind::PercentEq
                | TokenKind::AmpEq
                | TokenKind::PipeEq
                | TokenKind::CaretEq
                | TokenKind::ShlEq
                | TokenKind::ShrEq
        )
    }

    /// Get the string representation of the token
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Kernel => "__kernel",
            TokenKind::Global => "__global",
            TokenKind::Local => "__local",
            TokenKind::Constant => "__constant",
            TokenKind::Private => "__private",
            TokenKind::Const => "const",
            TokenKind::Volatile => "volatile",
            TokenKind::Restrict => "restrict",
            TokenKind::Void => "void",
            TokenKind::Bool => "bool",
            TokenKind::Char => "char",
            TokenKind::UChar => "uchar",
            TokenKind::Short => "short",
            TokenKind::UShort => "ushort",
            TokenKind::Int => "int",
            TokenKind::UInt => "uint",
            TokenKind::Long => "long",
            TokenKind::ULong => "ulong",
            TokenKind::Float => "float",
            TokenKind::Double => "double",
            TokenKind::SizeT => "size_t",
            TokenKind::Unsigned => "unsigned",
            TokenKind::Signed => "signed",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::For => "for",
            TokenKind::While => "while",
            TokenKind::Do => "do",
            TokenKind::Return => "return",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::IntLit => "<int>",
            TokenKind::HexLit => "<hex>",
            TokenKind::FloatLit => "<float>",
            TokenKind::Ident => "<ident>",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::Caret => "^",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Tilde => "~",
            TokenKind::Bang => "!",
            TokenKind::Eq => "=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::Question => "?",
            TokenKind::Colon => ":",
            TokenKind::EqEq => "==",
            TokenKind::Ne => "!=",
            TokenKind::Le => "<=",
            TokenKind::Ge => ">=",
            TokenKind::AmpAmp => "&&",
            TokenKind::PipePipe => "||",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            TokenKind::PlusPlus => "++",
            TokenKind::MinusMinus => "--",
            TokenKind::PlusEq => "+=",
            TokenKind::MinusEq => "-=",
            TokenKind::StarEq => "*=",
            TokenKind::SlashEq => "/=",
            TokenKind::PercentEq => "%=",
            TokenKind::AmpEq => "&=",
            TokenKind::PipeEq => "|=",
            TokenKind::CaretEq => "^=",
            TokenKind::ShlEq => "<<=",
            TokenKind::ShrEq => ">>=",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semi => ";",
            TokenKind::Eof => "<eof>",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
