// stubgen.rs — Caller-side stub output
//
// Maintains the set of stub (.m) files being generated and prints the
// two-line gateway call for each declaration. Files accumulate in memory and
// are flushed once at the end of the run, so a failed run leaves no partial
// outputs on disk.
//
// Preconditions: statements arrive in declaration order with dispatch ids
//                already stamped.
// Postconditions: one in-memory buffer per stub file; `files()` yields them
//                 in creation order.
// Failure modes: only on final flush (I/O).
// Side effects: none until `flush`.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use crate::ast::FuncSig;

/// Where stub text goes. Disabled runs swallow all output so the reader and
/// parser never branch on stub configuration.
#[derive(Debug)]
pub struct StubWriter {
    mode: Mode,
    /// file name → accumulated contents
    files: BTreeMap<String, String>,
    /// File names in creation order.
    order: Vec<String>,
    current: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Disabled,
    /// All stubs to one file.
    Single,
    /// One file per `@function` block.
    Batched,
}

impl StubWriter {
    pub fn disabled() -> Self {
        Self {
            mode: Mode::Disabled,
            files: BTreeMap::new(),
            order: Vec::new(),
            current: None,
        }
    }

    /// One combined stub file at `name`.
    pub fn single(name: &str) -> Self {
        let mut w = Self {
            mode: Mode::Single,
            files: BTreeMap::new(),
            order: Vec::new(),
            current: None,
        };
        w.open(name);
        w
    }

    /// Batched mode: output is discarded until the first `@function` line
    /// opens a file.
    pub fn batched() -> Self {
        Self {
            mode: Mode::Batched,
            files: BTreeMap::new(),
            order: Vec::new(),
            current: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != Mode::Disabled
    }

    pub fn is_batched(&self) -> bool {
        self.mode == Mode::Batched
    }

    fn open(&mut self, name: &str) {
        if !self.files.contains_key(name) {
            self.files.insert(name.to_string(), String::new());
            self.order.push(name.to_string());
        }
        self.current = Some(name.to_string());
    }

    /// `@ file` redirect: subsequent stub text goes to `file`. An empty name
    /// closes the current target; output is discarded until the next
    /// redirect or `@function`.
    pub fn redirect(&mut self, name: &str) {
        if self.mode == Mode::Disabled {
            return;
        }
        if name.is_empty() {
            self.current = None;
        } else {
            self.open(name);
        }
    }

    /// `@function` line. In batched mode opens `<fname>.m`; in all enabled
    /// modes the declaration itself (sans marker) is echoed as the `function`
    /// line of the stub.
    pub fn begin_function(&mut self, fname: &str, decl_line: &str) {
        if self.mode == Mode::Disabled {
            return;
        }
        if self.mode == Mode::Batched {
            self.open(&format!("{fname}.m"));
        }
        self.write_text(decl_line);
        self.write_text("\n");
    }

    /// Verbatim caller-language text (plain lines from the interface file).
    pub fn write_text(&mut self, text: &str) {
        if let Some(cur) = &self.current {
            if let Some(buf) = self.files.get_mut(cur) {
                buf.push_str(text);
            }
        }
    }

    /// The two-line gateway call for one declaration occurrence. Uses the
    /// occurrence's own variable names with the representative's dispatch id.
    pub fn write_call(&mut self, indent: &str, gateway: &str, sig: &FuncSig) {
        if self.current.is_none() {
            return;
        }
        let call = render_call(indent, gateway, sig);
        self.write_text(&call);
    }

    /// Generated file names in creation order.
    pub fn file_names(&self) -> &[String] {
        &self.order
    }

    /// Write every accumulated buffer under `dir`.
    pub fn flush(&self, dir: &Path) -> io::Result<()> {
        for name in &self.order {
            fs::write(dir.join(name), &self.files[name])?;
        }
        Ok(())
    }

    /// Contents of one generated file, if it exists.
    pub fn contents(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }
}

// ── Call rendering ──────────────────────────────────────────────────────────

/// Render the gateway call:
///
/// ```text
/// mex_id_ = 7;
/// [y, z] = gw(mex_id_, h, n, x, n, n);
/// ```
///
/// Argument order mirrors incoming-slot order exactly: bound object, input
/// variables left to right, then dimension extents (return's first). A
/// constant input passes a placeholder `0`; its literal is baked into the
/// glue code.
fn render_call(indent: &str, gateway: &str, sig: &FuncSig) -> String {
    let mut s = format!("{indent}mex_id_ = {};\n{indent}", sig.id);

    let outputs: Vec<&str> = sig
        .ret
        .iter()
        .chain(sig.args.iter())
        .filter(|v| v.io.is_output())
        .map(|v| v.name.as_str())
        .collect();
    if !outputs.is_empty() {
        s.push('[');
        s.push_str(&outputs.join(", "));
        s.push_str("] = ");
    }

    s.push_str(gateway);
    s.push_str("(mex_id_");
    if let Some(this) = &sig.this {
        s.push_str(", ");
        s.push_str(this);
    }
    for v in sig.ret.iter().chain(sig.args.iter()) {
        if v.io.is_input() {
            s.push_str(", ");
            if v.category == Some(crate::ast::Category::Const) {
                s.push('0');
            } else {
                s.push_str(&v.name);
            }
        }
    }
    for v in sig.ret.iter().chain(sig.args.iter()) {
        for d in v.dims() {
            s.push_str(", ");
            s.push_str(&d.text);
        }
    }
    s.push_str(");\n");
    s
}
