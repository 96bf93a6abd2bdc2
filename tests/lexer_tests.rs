//! Lexer tests

use kernelctx::lexer::{TokenKind, lex};

fn kinds(source: &str) -> Vec<TokenKind> {
    lex(source).unwrap().into_iter().map(|t| t.kind).collect()
}

#[test]
fn test_lex_empty() {
    let tokens = lex("").unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0].kind, TokenKind::Eof);
}

#[test]
fn test_lex_whitespace_and_comments() {
    let source = "  // line comment\n /* block\n comment */ \t";
    assert_eq!(kinds(source), vec![TokenKind::Eof]);
}

#[test]
fn test_lex_block_comment_between_operators() {
    assert_eq!(
        kinds("a /* half */ / 2 /**/ * b"),
        vec![
            TokenKind::Ident,
            TokenKind::Slash,
            TokenKind::IntLit,
            TokenKind::Star,
            TokenKind::Ident,
            TokenKind::Eof
        ]
    );
}

#[test]
fn test_lex_preprocessor_lines_skipped() {
    let source = "#pragma OPENCL EXTENSION cl_khr_fp64 : enable\nuint x;";
    assert_eq!(
        kinds(source),
        vec![TokenKind::UInt, TokenKind::Ident, TokenKind::Semi, TokenKind::Eof]
    );
}

#[test]
fn test_lex_qualifiers_with_and_without_underscores() {
    assert_eq!(
        kinds("__kernel kernel __global global __local local __constant const"),
        vec![
            TokenKind::Kernel,
            TokenKind::Kernel,
            TokenKind::Global,
            TokenKind::Global,
            TokenKind::Local,
            TokenKind::Local,
            TokenKind::Constant,
            TokenKind::Const,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_lex_scalar_types() {
    assert_eq!(
        kinds("char uchar short ushort int uint long ulong float double size_t"),
        vec![
            TokenKind::Char,
            TokenKind::UChar,
            TokenKind::Short,
            TokenKind::UShort,
            TokenKind::Int,
            TokenKind::UInt,
            TokenKind::Long,
            TokenKind::ULong,
            TokenKind::Float,
            TokenKind::Double,
            TokenKind::SizeT,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_lex_keyword_prefix_is_identifier() {
    let tokens = lex("integer forward uints").unwrap();
    assert!(tokens[..3].iter().all(|t| t.kind == TokenKind::Ident));
    assert_eq!(tokens[0].text, "integer");
}

#[test]
fn test_lex_literals() {
    let tokens = lex("42 7u 0xFF 1.5f 2.0 .25 1e3").unwrap();
    let expected = [
        (TokenKind::IntLit, "42"),
        (TokenKind::IntLit, "7u"),
        (TokenKind::HexLit, "0xFF"),
        (TokenKind::FloatLit, "1.5f"),
        (TokenKind::FloatLit, "2.0"),
        (TokenKind::FloatLit, ".25"),
        (TokenKind::FloatLit, "1e3"),
    ];
    for (token, (kind, text)) in tokens.iter().zip(expected) {
        assert_eq!(token.kind, kind);
        assert_eq!(token.text, text);
    }
}

#[test]
fn test_lex_longest_operator_wins() {
    assert_eq!(
        kinds("a <<= 1; b >> c; d++ && e--"),
        vec![
            TokenKind::Ident,
            TokenKind::ShlEq,
            TokenKind::IntLit,
            TokenKind::Semi,
            TokenKind::Ident,
            TokenKind::Shr,
            TokenKind::Ident,
            TokenKind::Semi,
            TokenKind::Ident,
            TokenKind::PlusPlus,
            TokenKind::AmpAmp,
            TokenKind::Ident,
            TokenKind::MinusMinus,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_lex_spans() {
    let tokens = lex("uint  idx").unwrap();
    assert_eq!((tokens[1].span.start, tokens[1].span.end), (6, 9));
}

#[test]
fn test_lex_rejects_unknown_character() {
    let err = lex("uint x = @;").unwrap_err();
    assert!(err.message.contains('@'));
    assert_eq!(err.span.start, 9);
}
