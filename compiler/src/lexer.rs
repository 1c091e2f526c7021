// Lexer for .mw declaration lines.
//
// Tokenizes the body of one `#` declaration line (the reader strips the
// prefix and handles every other line shape). Uses the `logos` crate for
// DFA-based lexing.
//
// Preconditions: input is one declaration-line body, valid UTF-8.
// Postconditions: returns all tokens for the line, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// A lexer error with the offending text and line.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub line: u32,
    pub message: String,
}

/// Raw logos token over one declaration-line body.
///
/// Keywords and punctuation are fixed strings; identifiers, numbers, and
/// strings carry their text via the span. A trailing `//` comment ends the
/// line.
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r]+")]
#[logos(skip r"//[^\n]*")]
enum RawTok {
    // ── Keywords ──
    #[token("new")]
    New,
    #[token("FORTRAN")]
    Fortran,
    #[token("input")]
    Input,
    #[token("output")]
    Output,
    #[token("inout")]
    Inout,
    #[token("class")]
    Class,
    #[token("typedef")]
    Typedef,
    #[token("cpu")]
    Cpu,
    #[token("gpu")]
    Gpu,

    // ── Literals and names ──
    /// Identifier, optionally namespace-qualified (`std::vector`, `::glob`).
    #[regex(r"(::)?[_a-zA-Z][_a-zA-Z0-9]*(::[_a-zA-Z][_a-zA-Z0-9]*)*")]
    Ident,

    /// Integer literal (array extents and constant arguments).
    #[regex(r"[0-9]+")]
    Number,

    /// Single-quoted string literal; an unterminated quote runs to line end.
    #[regex(r"'[^'\n]*'?")]
    StringLit,

    // ── Punctuation ──
    #[regex(r"[()\[\],;*&=:.>-]", |lex| lex.slice().chars().next())]
    Punct(char),
}

/// Kind of a declaration-line token, as consumed by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokKind {
    Ident,
    Number,
    Str,
    New,
    Fortran,
    Input,
    Output,
    Inout,
    Class,
    Typedef,
    Cpu,
    Gpu,
    Punct(char),
    /// Out-of-band: a non-declaration line passed by (synthesized by the
    /// reader, never produced here).
    LineEnd,
    /// Out-of-band: no more input (synthesized by the reader).
    InputEnd,
}

impl fmt::Display for TokKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokKind::Ident => write!(f, "identifier"),
            TokKind::Number => write!(f, "number"),
            TokKind::Str => write!(f, "string"),
            TokKind::New => write!(f, "'new'"),
            TokKind::Fortran => write!(f, "'FORTRAN'"),
            TokKind::Input => write!(f, "'input'"),
            TokKind::Output => write!(f, "'output'"),
            TokKind::Inout => write!(f, "'inout'"),
            TokKind::Class => write!(f, "'class'"),
            TokKind::Typedef => write!(f, "'typedef'"),
            TokKind::Cpu => write!(f, "'cpu'"),
            TokKind::Gpu => write!(f, "'gpu'"),
            TokKind::Punct(c) => write!(f, "'{c}'"),
            TokKind::LineEnd => write!(f, "end of line"),
            TokKind::InputEnd => write!(f, "end of input"),
        }
    }
}

/// One token with its source text and line number.
#[derive(Debug, Clone, PartialEq)]
pub struct Tok {
    pub kind: TokKind,
    pub text: String,
    pub line: u32,
}

impl Tok {
    pub fn marker(kind: TokKind, line: u32) -> Self {
        Self {
            kind,
            text: String::new(),
            line,
        }
    }
}

/// Lex the body of one `#` declaration line.
///
/// Returns all recognized tokens plus any errors for unrecognized
/// characters. Lexing is non-fatal: errors are collected and the lexer
/// continues past bad characters.
pub fn lex_decl_line(body: &str, line: u32) -> (Vec<Tok>, Vec<LexError>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in RawTok::lexer(body).spanned() {
        let text = &body[range.clone()];
        match result {
            Ok(raw) => {
                let kind = match raw {
                    RawTok::New => TokKind::New,
                    RawTok::Fortran => TokKind::Fortran,
                    RawTok::Input => TokKind::Input,
                    RawTok::Output => TokKind::Output,
                    RawTok::Inout => TokKind::Inout,
                    RawTok::Class => TokKind::Class,
                    RawTok::Typedef => TokKind::Typedef,
                    RawTok::Cpu => TokKind::Cpu,
                    RawTok::Gpu => TokKind::Gpu,
                    RawTok::Ident => TokKind::Ident,
                    RawTok::Number => TokKind::Number,
                    RawTok::StringLit => TokKind::Str,
                    RawTok::Punct(c) => TokKind::Punct(c),
                };
                tokens.push(Tok {
                    kind,
                    text: text.to_string(),
                    line,
                });
            }
            Err(()) => errors.push(LexError {
                line,
                message: format!("unexpected character: {:?}", text),
            }),
        }
    }

    (tokens, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token kinds.
    fn kinds(body: &str) -> Vec<TokKind> {
        let (tokens, errors) = lex_decl_line(body, 1);
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords() {
        assert_eq!(
            kinds("new FORTRAN input output inout class typedef cpu gpu"),
            vec![
                TokKind::New,
                TokKind::Fortran,
                TokKind::Input,
                TokKind::Output,
                TokKind::Inout,
                TokKind::Class,
                TokKind::Typedef,
                TokKind::Cpu,
                TokKind::Gpu,
            ]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `newmat` is an identifier, not keyword `new` + `mat`
        assert_eq!(kinds("new newmat"), vec![TokKind::New, TokKind::Ident]);
        // lowercase `fortran` is a plain identifier
        assert_eq!(kinds("fortran"), vec![TokKind::Ident]);
    }

    #[test]
    fn punctuation() {
        assert_eq!(
            kinds("( ) [ ] , ; * & = : . - >"),
            vec![
                TokKind::Punct('('),
                TokKind::Punct(')'),
                TokKind::Punct('['),
                TokKind::Punct(']'),
                TokKind::Punct(','),
                TokKind::Punct(';'),
                TokKind::Punct('*'),
                TokKind::Punct('&'),
                TokKind::Punct('='),
                TokKind::Punct(':'),
                TokKind::Punct('.'),
                TokKind::Punct('-'),
                TokKind::Punct('>'),
            ]
        );
    }

    #[test]
    fn namespaced_identifier() {
        let (tokens, errors) = lex_decl_line("std::vector ::global x", 1);
        assert!(errors.is_empty());
        assert_eq!(tokens[0].text, "std::vector");
        assert_eq!(tokens[1].text, "::global");
        assert_eq!(tokens[2].text, "x");
    }

    #[test]
    fn declaration_line() {
        assert_eq!(
            kinds("double y[n] = bar(int n, double x[n]);"),
            vec![
                TokKind::Ident,
                TokKind::Ident,
                TokKind::Punct('['),
                TokKind::Ident,
                TokKind::Punct(']'),
                TokKind::Punct('='),
                TokKind::Ident,
                TokKind::Punct('('),
                TokKind::Ident,
                TokKind::Ident,
                TokKind::Punct(','),
                TokKind::Ident,
                TokKind::Ident,
                TokKind::Punct('['),
                TokKind::Ident,
                TokKind::Punct(']'),
                TokKind::Punct(')'),
                TokKind::Punct(';'),
            ]
        );
    }

    #[test]
    fn string_literal_keeps_quotes() {
        let (tokens, _) = lex_decl_line("foo('mode a');", 3);
        assert_eq!(tokens[2].kind, TokKind::Str);
        assert_eq!(tokens[2].text, "'mode a'");
        assert_eq!(tokens[2].line, 3);
    }

    #[test]
    fn trailing_comment_skipped() {
        assert_eq!(
            kinds("foo(); // registers foo"),
            vec![
                TokKind::Ident,
                TokKind::Punct('('),
                TokKind::Punct(')'),
                TokKind::Punct(';'),
            ]
        );
    }

    #[test]
    fn method_arrow_is_two_puncts() {
        assert_eq!(
            kinds("h -> Mesh . refine"),
            vec![
                TokKind::Ident,
                TokKind::Punct('-'),
                TokKind::Punct('>'),
                TokKind::Ident,
                TokKind::Punct('.'),
                TokKind::Ident,
            ]
        );
    }

    #[test]
    fn error_recovery() {
        let (tokens, errors) = lex_decl_line("foo ~ bar", 1);
        assert_eq!(tokens.len(), 2);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains('~'));
    }
}
