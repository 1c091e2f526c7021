// pipeline.rs — Run orchestration
//
// Wires the reader, parser, and generator into one run over a list of input
// files, and carries the artifacts out: glue text, stub buffers,
// diagnostics, provenance, and the machine-readable manifest.
//
// Preconditions: options are validated by the caller.
// Postconditions: the result holds every artifact; nothing is written to
//                 disk except by the caller.
// Failure modes: fatal reader errors (missing input, include nesting).
// Side effects: reads input and include files.

use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ast::canonical_signature;
use crate::codegen;
use crate::diag::{error_count, Diagnostic};
use crate::parser::Parser;
use crate::reader::{Reader, ReaderError};
use crate::registry::{ComplexFlavor, Context};
use crate::stubgen::StubWriter;

// ── Options ─────────────────────────────────────────────────────────────────

/// Per-run switches, mapped straight from the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Gateway name the caller stubs dispatch through.
    pub gateway: String,
    pub gpu: bool,
    /// Wrap generated calls in try/catch.
    pub catch_exceptions: bool,
    pub complex: ComplexFlavor,
    /// Integer promotion policy level (0-4).
    pub promote: u8,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            gateway: "mexfunction".into(),
            gpu: false,
            catch_exceptions: false,
            complex: ComplexFlavor::None,
            promote: 0,
        }
    }
}

// ── Provenance ──────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 over the raw source text of every top-level input,
/// in command-line order. Files pulled in by `@include` do not contribute,
/// so two runs differing only in an included file share a hash.
/// `signature_fingerprint`: SHA-256 over the canonical forms of all unique
/// signatures, newline-joined in id order; it shifts when any declaration
/// changes, included files too.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub signature_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn signature_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.signature_fingerprint)
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn sha256(chunks: impl IntoIterator<Item = impl AsRef<[u8]>>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for c in chunks {
        hasher.update(c.as_ref());
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

// ── Manifest ────────────────────────────────────────────────────────────────

/// Machine-readable run summary for `--manifest`.
#[derive(Debug, Serialize)]
pub struct Manifest {
    pub manifest_schema_version: u32,
    pub compiler_version: &'static str,
    pub source_hash: String,
    pub signature_fingerprint: String,
    pub gateway: String,
    pub stub_files: Vec<String>,
    pub signatures: Vec<ManifestSig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestSig {
    pub id: i32,
    pub canonical: String,
    pub file: String,
    pub line: u32,
    /// Source positions of later declarations folded into this one.
    pub duplicates: Vec<String>,
}

// ── Result ──────────────────────────────────────────────────────────────────

pub struct RunResult {
    /// Complete gateway C file text.
    pub glue: String,
    /// Caller stub buffers, ready to flush.
    pub stubs: StubWriter,
    pub diagnostics: Vec<Diagnostic>,
    pub provenance: Provenance,
    /// Unique signatures interned during the run, in id order.
    pub signatures: Vec<ManifestSig>,
}

impl RunResult {
    pub fn has_errors(&self) -> bool {
        error_count(&self.diagnostics) > 0
    }
}

// ── Runner ──────────────────────────────────────────────────────────────────

fn context_from(opts: &RunOptions) -> Context {
    let mut ctx = Context::new();
    ctx.use_gpu = opts.gpu;
    ctx.generate_catch = opts.catch_exceptions;
    ctx.complex_flavor = opts.complex;
    ctx.promote_level = opts.promote;
    ctx
}

fn finish(ctx: Context, parser: Parser, stubs: StubWriter, csrc: String, sources: &[String]) -> RunResult {
    let sigs = parser.sigs.sigs();

    let signatures: Vec<ManifestSig> = sigs
        .iter()
        .map(|f| ManifestSig {
            id: f.id,
            canonical: canonical_signature(f),
            file: f.loc.file.clone(),
            line: f.loc.line,
            duplicates: f.duplicates.iter().map(|d| d.loc.to_string()).collect(),
        })
        .collect();

    let canon: Vec<String> = signatures
        .iter()
        .map(|s| {
            let mut line = s.canonical.clone();
            line.push('\n');
            line
        })
        .collect();
    let provenance = Provenance {
        source_hash: sha256(sources.iter().map(String::as_bytes)),
        signature_fingerprint: sha256(canon.iter().map(String::as_bytes)),
        compiler_version: env!("CARGO_PKG_VERSION"),
    };

    let glue = format!(
        "/* mexgen {} | source sha256 {} */\n{}",
        provenance.compiler_version,
        provenance.source_hash_hex(),
        codegen::generate(&ctx, sigs, &csrc)
    );

    RunResult {
        glue,
        stubs,
        diagnostics: parser.diags,
        provenance,
        signatures,
    }
}

/// Run the compiler over `paths` in order, as if concatenated.
pub fn run_files(
    paths: &[impl AsRef<Path>],
    mut stubs: StubWriter,
    opts: &RunOptions,
) -> Result<RunResult, ReaderError> {
    let mut ctx = context_from(opts);
    let mut parser = Parser::new(&opts.gateway);
    let mut csrc = String::new();
    let mut sources = Vec::with_capacity(paths.len());

    for path in paths {
        let path = path.as_ref();
        let name = path.display().to_string();
        // one read per file; the hash covers exactly the bytes compiled
        let content = std::fs::read_to_string(path).map_err(|source| ReaderError::Io {
            path: name.clone(),
            source,
        })?;
        let mut reader = Reader {
            ctx: &mut ctx,
            parser: &mut parser,
            stubs: &mut stubs,
            csrc: &mut csrc,
        };
        let last = reader.process_source(&name, &content, 0)?;
        reader.feed_marker(crate::lexer::TokKind::InputEnd, last);
        sources.push(content);
    }
    Ok(finish(ctx, parser, stubs, csrc, &sources))
}

/// Run the compiler over one in-memory buffer. Includes still resolve
/// against the filesystem.
pub fn run_source(
    name: &str,
    content: &str,
    mut stubs: StubWriter,
    opts: &RunOptions,
) -> Result<RunResult, ReaderError> {
    let mut ctx = context_from(opts);
    let mut parser = Parser::new(&opts.gateway);
    let mut csrc = String::new();

    let mut reader = Reader {
        ctx: &mut ctx,
        parser: &mut parser,
        stubs: &mut stubs,
        csrc: &mut csrc,
    };
    let last = reader.process_source(name, content, 0)?;
    reader.feed_marker(crate::lexer::TokKind::InputEnd, last);

    let sources = vec![content.to_string()];
    Ok(finish(ctx, parser, stubs, csrc, &sources))
}

/// Build the `--manifest` summary for a finished run.
pub fn build_manifest(result: &RunResult, opts: &RunOptions) -> Manifest {
    Manifest {
        manifest_schema_version: 1,
        compiler_version: result.provenance.compiler_version,
        source_hash: result.provenance.source_hash_hex(),
        signature_fingerprint: result.provenance.signature_fingerprint_hex(),
        gateway: opts.gateway.clone(),
        stub_files: result.stubs.file_names().to_vec(),
        signatures: result.signatures.clone(),
    }
}
