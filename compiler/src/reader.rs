// reader.rs — Line-oriented input driver
//
// Classifies every input line by its prefix and routes it: `#` declaration
// bodies to the lexer and parser, `$` C pass-through to the glue buffer,
// `@` directives to the stub writer or include stack, everything else
// verbatim to the current stub file. Statements never span a
// non-declaration line; the reader synthesizes out-of-band markers so the
// parser can report a missing `;`.
//
// Preconditions: inputs are UTF-8 text files.
// Postconditions: parser holds all signatures and diagnostics; stub and C
//                 pass-through buffers hold all echoed text.
// Failure modes: unreadable file or includes nested past the limit; both
//                abort the run.
// Side effects: reads include files from disk.

use std::fmt;
use std::fs;
use std::io;

use crate::lexer::{lex_decl_line, Tok, TokKind};
use crate::parser::Parser;
use crate::registry::Context;
use crate::stubgen::StubWriter;

/// Maximum include nesting before the run aborts.
const MAX_INCLUDE_DEPTH: usize = 10;

/// Fatal reader failure. Unlike diagnostics, these abort the run
/// immediately: there is no sensible way to continue past a missing file.
#[derive(Debug)]
pub enum ReaderError {
    TooDeep { file: String, line: u32 },
    Io { path: String, source: io::Error },
}

impl fmt::Display for ReaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderError::TooDeep { file, line } => {
                write!(f, "{file}:{line}: includes nested too deeply")
            }
            ReaderError::Io { path, source } => write!(f, "could not read '{path}': {source}"),
        }
    }
}

impl std::error::Error for ReaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReaderError::Io { source, .. } => Some(source),
            ReaderError::TooDeep { .. } => None,
        }
    }
}

pub struct Reader<'a> {
    pub ctx: &'a mut Context,
    pub parser: &'a mut Parser,
    pub stubs: &'a mut StubWriter,
    /// Verbatim C pass-through, spliced between the glue header and the
    /// generated routines.
    pub csrc: &'a mut String,
}

impl Reader<'_> {
    /// Process one source buffer under `name`. Returns the last line number.
    pub fn process_source(
        &mut self,
        name: &str,
        content: &str,
        depth: usize,
    ) -> Result<u32, ReaderError> {
        self.parser.set_file(name);
        let mut block_c = false;
        let mut lineno: u32 = 0;

        for line in content.split_inclusive('\n') {
            lineno += 1;

            if block_c {
                if is_block_end(line) {
                    block_c = false;
                } else {
                    self.csrc.push_str(line);
                }
                continue;
            }

            let stripped = line.trim_start_matches([' ', '\t']);
            let leading_ws = &line[..line.len() - stripped.len()];

            // Leading whitespace of any prefixed line is echoed to the stub
            // output; plain text lines carry their own below.
            if !leading_ws.is_empty()
                && (stripped.starts_with('$')
                    || stripped.starts_with('#')
                    || stripped.starts_with('@')
                    || stripped.starts_with("//"))
            {
                self.stubs.write_text(leading_ws);
            }

            if is_block_start(stripped) {
                block_c = true;
            } else if stripped.starts_with("//") {
                self.feed_marker(TokKind::LineEnd, lineno);
            } else if let Some(tail) = stripped.strip_prefix("@function") {
                let tail = tail.trim_end_matches(['\r', '\n']);
                let fname = stub_file_name(tail);
                self.stubs.begin_function(&fname, &format!("function{tail}"));
                self.feed_marker(TokKind::LineEnd, lineno);
            } else if let Some(rest) = stripped.strip_prefix("@include") {
                let target = rest.trim().trim_end_matches(['\r', '\n']);
                if depth >= MAX_INCLUDE_DEPTH {
                    return Err(ReaderError::TooDeep {
                        file: name.to_string(),
                        line: lineno,
                    });
                }
                let nested = fs::read_to_string(target).map_err(|source| ReaderError::Io {
                    path: target.to_string(),
                    source,
                })?;
                self.process_source(target, &nested, depth + 1)?;
                self.parser.set_file(name);
            } else if let Some(rest) = stripped.strip_prefix('@') {
                self.stubs.redirect(rest.trim());
                self.feed_marker(TokKind::LineEnd, lineno);
            } else if let Some(rest) = stripped.strip_prefix('$') {
                self.csrc.push_str(rest);
                self.feed_marker(TokKind::LineEnd, lineno);
            } else if let Some(body) = stripped.strip_prefix('#') {
                let body = body.trim_end_matches(['\r', '\n']);
                let (tokens, errors) = lex_decl_line(body, lineno);
                for e in errors {
                    self.parser.diags.push(
                        crate::diag::Diagnostic::error(
                            crate::diag::Loc::new(name, e.line),
                            e.message,
                        )
                        .with_code(crate::diag::codes::E0102),
                    );
                }
                for t in tokens {
                    self.parser.feed(self.ctx, self.stubs, t);
                }
            } else {
                self.stubs.write_text(line);
                self.feed_marker(TokKind::LineEnd, lineno);
            }
        }

        Ok(lineno)
    }

    pub fn feed_marker(&mut self, kind: TokKind, line: u32) {
        let tok = Tok::marker(kind, line);
        self.parser.feed(self.ctx, self.stubs, tok);
    }
}

/// `$[` alone on its line opens a C pass-through block.
fn is_block_start(stripped: &str) -> bool {
    let rest = match stripped.strip_prefix("$[") {
        Some(r) => r,
        None => return false,
    };
    rest.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}

/// `$]` alone on its line closes it.
fn is_block_end(line: &str) -> bool {
    let t = line.trim_start_matches([' ', '\t']);
    match t.strip_prefix("$]") {
        Some(rest) => rest.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\n')),
        None => false,
    }
}

/// Stub file name for an `@function` tail: the identifier just before the
/// argument list (or the last identifier when there is none), plus `.m`.
fn stub_file_name(tail: &str) -> String {
    let bytes = tail.as_bytes();
    let mut end = tail.find('(').unwrap_or(tail.len());
    let is_name = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    while end > 0 && !is_name(bytes[end - 1]) {
        end -= 1;
    }
    let mut start = end;
    while start > 0 && is_name(bytes[start - 1]) {
        start -= 1;
    }
    format!("{}.m", &tail[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct Rig {
        ctx: Context,
        parser: Parser,
        stubs: StubWriter,
        csrc: String,
    }

    impl Rig {
        fn new(stubs: StubWriter) -> Self {
            Self {
                ctx: Context::new(),
                parser: Parser::new("gw"),
                stubs,
                csrc: String::new(),
            }
        }

        fn run(&mut self, src: &str) -> Result<u32, ReaderError> {
            let mut reader = Reader {
                ctx: &mut self.ctx,
                parser: &mut self.parser,
                stubs: &mut self.stubs,
                csrc: &mut self.csrc,
            };
            let last = reader.process_source("t.mw", src, 0)?;
            reader.feed_marker(TokKind::InputEnd, last);
            Ok(last)
        }
    }

    #[test]
    fn prefixes_route_to_their_streams() {
        let mut r = Rig::new(StubWriter::single("t.m"));
        r.run("% plain text\n$ #include \"lib.h\"\n# foo(int a);\n")
            .unwrap();
        assert_eq!(r.csrc, "#include \"lib.h\"\n");
        assert_eq!(r.parser.sigs.len(), 1);
        let stub = r.stubs.contents("t.m").unwrap();
        assert!(stub.starts_with("% plain text\n"));
        assert!(stub.contains("mex_id_ = 1;"));
    }

    #[test]
    fn block_c_passthrough() {
        let mut r = Rig::new(StubWriter::disabled());
        r.run("$[\nvoid helper() {\n  // $ and # mean nothing here\n}\n$]\n# foo();\n")
            .unwrap();
        assert!(r.csrc.contains("void helper()"));
        assert!(r.csrc.contains("// $ and # mean nothing here"));
        assert!(!r.csrc.contains("$]"));
        assert_eq!(r.parser.sigs.len(), 1);
    }

    #[test]
    fn comment_lines_are_dropped_everywhere() {
        let mut r = Rig::new(StubWriter::single("t.m"));
        r.run("// commentary\n# foo();\n").unwrap();
        assert!(!r.stubs.contents("t.m").unwrap().contains("commentary"));
        assert!(r.parser.diags.is_empty());
    }

    #[test]
    fn function_directive_batches_and_echoes() {
        let mut r = Rig::new(StubWriter::batched());
        r.run("@function [y] = twice(x)\n# double y = twice_impl(double x);\ny = y;\n")
            .unwrap();
        assert_eq!(r.stubs.file_names(), ["twice.m"]);
        let body = r.stubs.contents("twice.m").unwrap();
        assert!(body.starts_with("function [y] = twice(x)\n"));
        assert!(body.contains("mex_id_ = 1;"));
        assert!(body.ends_with("y = y;\n"));
    }

    #[test]
    fn function_name_scan_without_arguments() {
        assert_eq!(stub_file_name(" [y] = twice(x)"), "twice.m");
        assert_eq!(stub_file_name(" cleanup"), "cleanup.m");
        assert_eq!(stub_file_name(" out = helper_2()"), "helper_2.m");
    }

    #[test]
    fn statement_cannot_span_text_line() {
        let mut r = Rig::new(StubWriter::disabled());
        r.run("# foo(int a)\nsome text\n").unwrap();
        assert_eq!(crate::diag::error_count(&r.parser.diags), 1);
    }

    #[test]
    fn unterminated_statement_at_end_of_input() {
        let mut r = Rig::new(StubWriter::disabled());
        r.run("# foo(int a)\n").unwrap();
        assert_eq!(crate::diag::error_count(&r.parser.diags), 1);
    }

    #[test]
    fn statement_may_span_declaration_lines() {
        let mut r = Rig::new(StubWriter::disabled());
        r.run("# double y[n] =\n#   bar(int n, double x[n]);\n").unwrap();
        assert!(r.parser.diags.is_empty());
        assert_eq!(r.parser.sigs.len(), 1);
    }

    #[test]
    fn leading_whitespace_echoed_for_prefixed_lines() {
        let mut r = Rig::new(StubWriter::single("t.m"));
        r.run("  # foo();\n").unwrap();
        let stub = r.stubs.contents("t.m").unwrap();
        assert!(stub.starts_with("  mex_id_ = 1;"));
    }

    #[test]
    fn include_depth_limit() {
        let dir = std::env::temp_dir().join(format!("rdr-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path: PathBuf = dir.join("loop.mw");
        std::fs::write(&path, format!("@include {}\n", path.display())).unwrap();

        let mut r = Rig::new(StubWriter::disabled());
        let src = format!("@include {}\n", path.display());
        let err = r.run(&src).unwrap_err();
        assert!(matches!(err, ReaderError::TooDeep { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_include_is_fatal() {
        let mut r = Rig::new(StubWriter::disabled());
        let err = r.run("@include /no/such/file.mw\n").unwrap_err();
        assert!(matches!(err, ReaderError::Io { .. }));
    }

    #[test]
    fn redirect_switches_stub_file() {
        let mut r = Rig::new(StubWriter::single("a.m"));
        r.run("one\n@ b.m\ntwo\n").unwrap();
        assert_eq!(r.stubs.contents("a.m"), Some("one\n"));
        assert_eq!(r.stubs.contents("b.m"), Some("two\n"));
    }
}
