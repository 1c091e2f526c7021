// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Source location ──────────────────────────────────────────────────────

/// A source location: input file name plus 1-based line number.
///
/// The reader is line-oriented, so a line is the finest granularity any
/// phase can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loc {
    pub file: String,
    pub line: u32,
}

impl Loc {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0221`, `W0302`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code must never be reassigned to a different semantic meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes.
///
/// E01xx — grammar, E02xx — classification, E03xx — return validation,
/// E04xx — argument validation, E05xx — foreign linkage, W0xxx — warnings.
pub mod codes {
    use super::DiagCode;

    pub const E0101: DiagCode = DiagCode("E0101"); // statement not terminated
    pub const E0102: DiagCode = DiagCode("E0102"); // syntax error
    pub const E0103: DiagCode = DiagCode("E0103"); // unknown typespace

    pub const E0201: DiagCode = DiagCode("E0201"); // array rank above 2
    pub const E0202: DiagCode = DiagCode("E0202"); // array alias over non-real base
    pub const E0203: DiagCode = DiagCode("E0203"); // constant with qualifier
    pub const E0204: DiagCode = DiagCode("E0204"); // bad string qualifier
    pub const E0205: DiagCode = DiagCode("E0205"); // native array handle with qualifier
    pub const E0206: DiagCode = DiagCode("E0206"); // array of handle type

    pub const E0301: DiagCode = DiagCode("E0301"); // return array without dims
    pub const E0302: DiagCode = DiagCode("E0302"); // return constant
    pub const E0303: DiagCode = DiagCode("E0303"); // return array alias
    pub const E0304: DiagCode = DiagCode("E0304"); // return string with dims

    pub const E0401: DiagCode = DiagCode("E0401"); // literal as output
    pub const E0402: DiagCode = DiagCode("E0402"); // handle as output
    pub const E0403: DiagCode = DiagCode("E0403"); // output array without dims
    pub const E0404: DiagCode = DiagCode("E0404"); // array alias not output
    pub const E0405: DiagCode = DiagCode("E0405"); // plain scalar as output
    pub const E0406: DiagCode = DiagCode("E0406"); // constant as output
    pub const E0407: DiagCode = DiagCode("E0407"); // unsized string as output
    pub const E0408: DiagCode = DiagCode("E0408"); // native array handle as inout

    pub const E0501: DiagCode = DiagCode("E0501"); // handle passed to foreign linkage
    pub const E0502: DiagCode = DiagCode("E0502"); // array alias passed to foreign linkage
    pub const E0503: DiagCode = DiagCode("E0503"); // non-scalar foreign return

    pub const W0301: DiagCode = DiagCode("W0301"); // string passed to foreign linkage
    pub const W0302: DiagCode = DiagCode("W0302"); // complex returned from foreign linkage
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub loc: Loc,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code or hint.
    pub fn new(level: DiagLevel, loc: Loc, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            loc,
            message: message.into(),
            hint: None,
        }
    }

    pub fn error(loc: Loc, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, loc, message)
    }

    pub fn warning(loc: Loc, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, loc, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}] ({}): {}", level, code, self.loc, self.message)?;
        } else {
            write!(f, "{} ({}): {}", level, self.loc, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// Count of error-level diagnostics in a slice.
pub fn error_count(diags: &[Diagnostic]) -> usize {
    diags
        .iter()
        .filter(|d| d.level == DiagLevel::Error)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> Loc {
        Loc::new("test.mw", 12)
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::error(loc(), "something failed");
        assert_eq!(format!("{d}"), "error (test.mw:12): something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::warning(loc(), "danger returning complex").with_code(codes::W0302);
        assert_eq!(
            format!("{d}"),
            "warning[W0302] (test.mw:12): danger returning complex"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(loc(), "output array must have dims")
            .with_code(codes::E0403)
            .with_hint("declare the extent, e.g. x[n]");
        assert_eq!(d.code, Some(codes::E0403));
        assert_eq!(d.hint.as_deref(), Some("declare the extent, e.g. x[n]"));
    }

    #[test]
    fn error_counting() {
        let ds = vec![
            Diagnostic::error(loc(), "a"),
            Diagnostic::warning(loc(), "b"),
            Diagnostic::error(loc(), "c"),
        ];
        assert_eq!(error_count(&ds), 2);
    }
}
