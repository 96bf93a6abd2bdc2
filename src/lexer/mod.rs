//! Lexer for the OpenCL C kernel subset

mod tokens;

pub use tokens::{Token, TokenKind};

use logos::Logos;

use crate::common::Span;
use crate::diagnostics::SourceError;

/// Tokenize kernel source. The returned stream always ends with `Eof`.
pub fn lex(source: &str) -> Result<Vec<Token>, SourceError> {
    let mut tokens = Vec::new();
    let mut lexer = TokenKind::lexer(source);

    while let Some(result) = lexer.next() {
        let span = Span::from(lexer.span());
        match result {
            Ok(kind) => tokens.push(Token {
                kind,
                span,
                text: lexer.slice().to_string(),
            }),
            Err(()) => {
                return Err(SourceError::new(
                    format!("unexpected character `{}`", lexer.slice()),
                    span,
                ));
            }
        }
    }

    let end = source.len();
    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(end, end),
        text: String::new(),
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lex_skips_preprocessor_and_comments() {
        let tokens = lex("#pragma OPENCL EXTENSION cl_khr_fp64 : enable\n/* c */ int x; // tail").unwrap();
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TokenKind::Int, TokenKind::Ident, TokenKind::Semi, TokenKind::Eof]
        );
    }

    #[test]
    fn test_lex_error_span() {
        let err = lex("int x = @;").unwrap_err();
        assert_eq!(err.span, Span::new(8, 9));
    }
}
