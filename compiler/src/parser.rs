// parser.rs — Recursive descent parser for interface declaration statements
//
// Consumes the token stream the reader produces from `#` lines. Tokens are
// buffered until a `;` completes a statement; out-of-band line/input-end
// markers with tokens still pending are reported as unterminated statements.
// Each completed statement is analyzed, stamped with its dispatch id, echoed
// as a caller stub, and interned immediately, so typedef and class
// statements affect exactly the declarations after them.
//
// Preconditions: tokens arrive in source order; `set_file` is called before
//               tokens from a new input file.
// Postconditions: `sigs` holds unique representatives in declaration order;
//                all violations are in `diags`.
// Failure modes: none (all errors become diagnostics; a bad statement is
//               skipped and parsing resumes at the next statement).
// Side effects: mutates the type registry and writes caller stubs.

use crate::analyze::analyze;
use crate::ast::{canonical_signature, Device, DimExpr, FuncSig, IoSpec, TypeQual, Var};
use crate::dedup::SigTable;
use crate::diag::{codes, Diagnostic, Loc};
use crate::lexer::{Tok, TokKind};
use crate::registry::Context;
use crate::stubgen::StubWriter;

/// Statement-aborting parse failure. The diagnostic is already recorded when
/// this is raised, so callers only unwind.
struct ParseAbort;

type PResult<T> = Result<T, ParseAbort>;

pub struct Parser {
    pub diags: Vec<Diagnostic>,
    pub sigs: SigTable,
    gateway: String,
    file: String,
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    pub fn new(gateway: impl Into<String>) -> Self {
        Self {
            diags: Vec::new(),
            sigs: SigTable::new(),
            gateway: gateway.into(),
            file: String::new(),
            tokens: Vec::new(),
            pos: 0,
        }
    }

    /// Name of the input file subsequent tokens come from.
    pub fn set_file(&mut self, file: &str) {
        self.file = file.to_string();
    }

    /// Feed one token. `LineEnd` and `InputEnd` are out-of-band markers; a
    /// statement may span several declaration lines, but never a
    /// non-declaration line.
    pub fn feed(&mut self, ctx: &mut Context, stubs: &mut StubWriter, tok: Tok) {
        match tok.kind {
            TokKind::LineEnd | TokKind::InputEnd => {
                if !self.tokens.is_empty() {
                    let what = tok.kind.to_string();
                    self.diags.push(
                        Diagnostic::error(
                            Loc::new(&self.file, tok.line),
                            format!("syntax error, unexpected {what}, expecting ';'"),
                        )
                        .with_code(codes::E0101),
                    );
                    self.tokens.clear();
                }
            }
            _ => {
                let terminator = tok.kind == TokKind::Punct(';');
                self.tokens.push(tok);
                if terminator {
                    self.pos = 0;
                    let _ = self.statement(ctx, stubs);
                    self.tokens.clear();
                }
            }
        }
    }

    // ── Token access ──

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> TokKind {
        self.peek().map_or(TokKind::InputEnd, |t| t.kind)
    }

    fn advance(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn at_punct(&self, ch: char) -> bool {
        self.peek_kind() == TokKind::Punct(ch)
    }

    fn expect(&mut self, kind: TokKind) -> PResult<Tok> {
        match self.advance() {
            Some(t) if t.kind == kind => Ok(t),
            got => {
                let found = got.map_or("end of statement".to_string(), |t| {
                    format!("{} '{}'", t.kind, t.text)
                });
                Err(self.error(format!("expected {kind}, got {found}")))
            }
        }
    }

    fn expect_punct(&mut self, ch: char) -> PResult<Tok> {
        self.expect(TokKind::Punct(ch))
    }

    fn line(&self) -> u32 {
        self.tokens.first().map_or(0, |t| t.line)
    }

    fn loc(&self) -> Loc {
        Loc::new(&self.file, self.line())
    }

    fn error(&mut self, msg: String) -> ParseAbort {
        self.diags
            .push(Diagnostic::error(self.loc(), msg).with_code(codes::E0102));
        ParseAbort
    }

    // ── Statements ──

    /// statement ::= tdef | classdef | basevar '=' funcall | funcall
    fn statement(&mut self, ctx: &mut Context, stubs: &mut StubWriter) -> PResult<()> {
        match self.peek_kind() {
            TokKind::Typedef => self.tdef(ctx),
            TokKind::Class => self.classdef(ctx),
            _ if self.has_assignment() => {
                let ret = self.basevar(ctx)?;
                self.expect_punct('=')?;
                let mut f = self.funcall(ctx)?;
                f.ret.push(ret);
                self.finish(ctx, stubs, f);
                Ok(())
            }
            _ => {
                let f = self.funcall(ctx)?;
                self.finish(ctx, stubs, f);
                Ok(())
            }
        }
    }

    /// Lookahead over the buffered statement: a top-level `=` before any `(`
    /// or `;` marks the assignment form. Bracket depth is tracked so array
    /// extents never confuse the scan.
    fn has_assignment(&self) -> bool {
        let mut depth = 0i32;
        for t in &self.tokens {
            match t.kind {
                TokKind::Punct('[') => depth += 1,
                TokKind::Punct(']') => depth -= 1,
                TokKind::Punct('=') if depth == 0 => return true,
                TokKind::Punct('(') | TokKind::Punct(';') if depth == 0 => return false,
                _ => {}
            }
        }
        false
    }

    /// tdef ::= 'typedef' ID ID ';'
    fn tdef(&mut self, ctx: &mut Context) -> PResult<()> {
        self.expect(TokKind::Typedef)?;
        let space = self.expect(TokKind::Ident)?.text;
        let name = self.expect(TokKind::Ident)?.text;
        self.expect_punct(';')?;

        match space.as_str() {
            "numeric" => ctx.add_scalar_type(name),
            "dcomplex" => ctx.add_zscalar_type(name),
            "fcomplex" => ctx.add_cscalar_type(name),
            "mxArray" => ctx.add_mxarray_type(name),
            _ => {
                self.diags.push(
                    Diagnostic::error(self.loc(), format!("Unrecognized typespace: {space}"))
                        .with_code(codes::E0103),
                );
            }
        }
        Ok(())
    }

    /// classdef ::= 'class' ID ':' ID (',' ID)* ';'
    fn classdef(&mut self, ctx: &mut Context) -> PResult<()> {
        self.expect(TokKind::Class)?;
        let child = self.expect(TokKind::Ident)?.text;
        self.expect_punct(':')?;
        let mut parents = vec![self.expect(TokKind::Ident)?.text];
        while self.at_punct(',') {
            self.advance();
            parents.push(self.expect(TokKind::Ident)?.text);
        }
        self.expect_punct(';')?;
        ctx.register_inherits(&child, &parents);
        Ok(())
    }

    // ── Function statements ──

    /// funcall ::= func '(' args ')' ';'
    fn funcall(&mut self, ctx: &mut Context) -> PResult<FuncSig> {
        let mut f = self.func()?;
        self.expect_punct('(')?;
        f.args = self.args(ctx)?;
        self.expect_punct(')')?;
        self.expect_punct(';')?;
        Ok(f)
    }

    /// func ::= ID '->' ID '.' ID | ID | 'FORTRAN' ID | 'new' ID
    fn func(&mut self) -> PResult<FuncSig> {
        let loc = self.loc();
        match self.peek_kind() {
            TokKind::Fortran => {
                self.advance();
                let name = self.expect(TokKind::Ident)?.text;
                let mut f = FuncSig::new(None, None, name, loc);
                f.fortran = true;
                Ok(f)
            }
            TokKind::New => {
                self.advance();
                let class = self.expect(TokKind::Ident)?.text;
                Ok(FuncSig::new(None, Some(class), "new", loc))
            }
            _ => {
                let name = self.expect(TokKind::Ident)?.text;
                if self.at_punct('-') {
                    self.advance();
                    self.expect_punct('>')?;
                    let class = self.expect(TokKind::Ident)?.text;
                    self.expect_punct('.')?;
                    let method = self.expect(TokKind::Ident)?.text;
                    Ok(FuncSig::new(Some(name), Some(class), method, loc))
                } else {
                    Ok(FuncSig::new(None, None, name, loc))
                }
            }
        }
    }

    /// args ::= var (',' var)* | ε
    fn args(&mut self, ctx: &mut Context) -> PResult<Vec<Var>> {
        if self.at_punct(')') {
            return Ok(Vec::new());
        }
        let mut result = vec![self.var(ctx)?];
        while self.at_punct(',') {
            self.advance();
            result.push(self.var(ctx)?);
        }
        Ok(result)
    }

    /// var ::= [devicespec] [iospec] TYPE [quals] (NAME | NUMBER | STRING)
    ///       | [devicespec] [iospec] TYPE (NAME | NUMBER | STRING) [aqual]
    fn var(&mut self, ctx: &mut Context) -> PResult<Var> {
        let device = self.devicespec();
        let io = self.iospec();
        let basetype = ctx.promote_int(&self.expect(TokKind::Ident)?.text);

        if matches!(
            self.peek_kind(),
            TokKind::Punct('*') | TokKind::Punct('&') | TokKind::Punct('[')
        ) {
            let qual = self.quals()?;
            let name = self.name_or_literal()?;
            return Ok(Var::new(device, io, basetype, Some(qual), name));
        }

        let name = self.name_or_literal()?;
        if self.at_punct('[') {
            let qual = self.aqual()?;
            return Ok(Var::new(device, io, basetype, Some(qual), name));
        }
        Ok(Var::new(device, io, basetype, None, name))
    }

    /// basevar ::= TYPE [quals] ID — the return variable, always cpu output.
    fn basevar(&mut self, ctx: &mut Context) -> PResult<Var> {
        let basetype = ctx.promote_int(&self.expect(TokKind::Ident)?.text);

        if matches!(
            self.peek_kind(),
            TokKind::Punct('*') | TokKind::Punct('&') | TokKind::Punct('[')
        ) {
            let qual = self.quals()?;
            let name = self.expect(TokKind::Ident)?.text;
            return Ok(Var::new(Device::Cpu, IoSpec::Output, basetype, Some(qual), name));
        }

        let name = self.expect(TokKind::Ident)?.text;
        if self.at_punct('[') {
            let qual = self.aqual()?;
            return Ok(Var::new(Device::Cpu, IoSpec::Output, basetype, Some(qual), name));
        }
        Ok(Var::new(Device::Cpu, IoSpec::Output, basetype, None, name))
    }

    fn name_or_literal(&mut self) -> PResult<String> {
        match self.peek_kind() {
            TokKind::Ident | TokKind::Number | TokKind::Str => {
                Ok(self.advance().map(|t| t.text).unwrap_or_default())
            }
            k => {
                let text = self.peek().map(|t| t.text.clone()).unwrap_or_default();
                Err(self.error(format!("expected name, number or string, got {k} '{text}'")))
            }
        }
    }

    fn devicespec(&mut self) -> Device {
        match self.peek_kind() {
            TokKind::Cpu => {
                self.advance();
                Device::Cpu
            }
            TokKind::Gpu => {
                self.advance();
                Device::Gpu
            }
            _ => Device::Cpu,
        }
    }

    fn iospec(&mut self) -> IoSpec {
        let io = match self.peek_kind() {
            TokKind::Input => IoSpec::Input,
            TokKind::Output => IoSpec::Output,
            TokKind::Inout => IoSpec::InOut,
            _ => return IoSpec::Input,
        };
        self.advance();
        io
    }

    /// quals ::= '*' | '&' | aqual
    fn quals(&mut self) -> PResult<TypeQual> {
        if self.at_punct('*') {
            self.advance();
            return Ok(TypeQual::Pointer);
        }
        if self.at_punct('&') {
            self.advance();
            return Ok(TypeQual::Ref);
        }
        self.aqual()
    }

    /// aqual ::= arrayspec ['&']
    fn aqual(&mut self) -> PResult<TypeQual> {
        let dims = self.arrayspec()?;
        if self.at_punct('&') {
            self.advance();
            return Ok(TypeQual::ArrayRef(dims));
        }
        Ok(TypeQual::Array(dims))
    }

    /// arrayspec ::= '[' exprs ']'
    fn arrayspec(&mut self) -> PResult<Vec<DimExpr>> {
        self.expect_punct('[')?;
        let mut dims = Vec::new();
        if !self.at_punct(']') {
            dims.push(self.expr()?);
            while self.at_punct(',') {
                self.advance();
                dims.push(self.expr()?);
            }
        }
        self.expect_punct(']')?;
        Ok(dims)
    }

    /// expr ::= ID | NUMBER
    fn expr(&mut self) -> PResult<DimExpr> {
        match self.peek_kind() {
            TokKind::Ident | TokKind::Number => {
                Ok(DimExpr::new(self.advance().map(|t| t.text).unwrap_or_default()))
            }
            k => {
                let text = self.peek().map(|t| t.text.clone()).unwrap_or_default();
                Err(self.error(format!("expected expression, got {k} '{text}'")))
            }
        }
    }

    // ── Statement completion ──

    /// Analyze, stamp the dispatch id, echo the caller stub with this
    /// occurrence's own names, and intern. A repeat of an earlier canonical
    /// form keeps that form's id.
    fn finish(&mut self, ctx: &mut Context, stubs: &mut StubWriter, mut sig: FuncSig) {
        analyze(ctx, &mut sig, &mut self.diags);
        let canon = canonical_signature(&sig);
        sig.id = self.sigs.peek_id(&canon);
        stubs.write_call("", &self.gateway, &sig);
        self.sigs.intern(canon, sig);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Category;
    use crate::diag::error_count;
    use crate::lexer::lex_decl_line;

    struct Rig {
        ctx: Context,
        parser: Parser,
        stubs: StubWriter,
        line: u32,
    }

    impl Rig {
        fn new() -> Self {
            let mut parser = Parser::new("gw");
            parser.set_file("t.mw");
            Self {
                ctx: Context::new(),
                parser,
                stubs: StubWriter::single("t.m"),
                line: 0,
            }
        }

        /// One declaration-line body, as the reader would feed it.
        fn decl(&mut self, body: &str) {
            self.line += 1;
            let (toks, errs) = lex_decl_line(body, self.line);
            assert!(errs.is_empty(), "lex errors: {errs:?}");
            for t in toks {
                self.parser.feed(&mut self.ctx, &mut self.stubs, t);
            }
        }

        fn line_end(&mut self) {
            self.line += 1;
            let tok = Tok::marker(TokKind::LineEnd, self.line);
            self.parser.feed(&mut self.ctx, &mut self.stubs, tok);
        }

        fn stub(&self) -> &str {
            self.stubs.contents("t.m").unwrap()
        }
    }

    #[test]
    fn plain_call() {
        let mut r = Rig::new();
        r.decl("init();");
        assert!(r.parser.diags.is_empty());
        assert_eq!(r.parser.sigs.len(), 1);
        let f = &r.parser.sigs.sigs()[0];
        assert_eq!(f.callee, "init");
        assert_eq!(f.id, 1);
        assert!(f.this.is_none() && f.class.is_none());
    }

    #[test]
    fn full_declaration_with_return() {
        let mut r = Rig::new();
        r.decl("double y[n] = bar(int n, inout double x[n]);");
        assert!(r.parser.diags.is_empty());
        let f = &r.parser.sigs.sigs()[0];
        assert_eq!(f.ret[0].name, "y");
        assert_eq!(f.ret[0].category, Some(Category::Array));
        assert_eq!(f.args[0].category, Some(Category::Scalar));
        assert_eq!(f.args[1].io, IoSpec::InOut);
        // stub echoed with the declaration's own names
        assert!(r.stub().contains("mex_id_ = 1;"));
        assert!(r.stub().contains("[y, x] = gw(mex_id_, n, x, n, n);"));
    }

    #[test]
    fn prename_qualifier_form() {
        let mut r = Rig::new();
        r.decl("foo(double[n] x, int* p, Mesh& m);");
        let f = &r.parser.sigs.sigs()[0];
        assert_eq!(f.args[0].category, Some(Category::Array));
        assert_eq!(f.args[1].category, Some(Category::PScalar));
        assert_eq!(f.args[2].category, Some(Category::RObj));
    }

    #[test]
    fn method_and_constructor_forms() {
        let mut r = Rig::new();
        r.decl("Mesh* m = new Mesh(int n);");
        r.decl("h->Mesh.refine(int level);");
        let sigs = r.parser.sigs.sigs();
        assert_eq!(sigs[0].callee, "new");
        assert_eq!(sigs[0].class.as_deref(), Some("Mesh"));
        assert_eq!(sigs[0].ret[0].category, Some(Category::PObj));
        assert_eq!(sigs[1].this.as_deref(), Some("h"));
        assert_eq!(sigs[1].class.as_deref(), Some("Mesh"));
        assert_eq!(sigs[1].callee, "refine");
        // bound object passed first in the stub
        assert!(r.stub().contains("gw(mex_id_, h, level);"));
    }

    #[test]
    fn fortran_linkage() {
        let mut r = Rig::new();
        r.decl("FORTRAN daxpy(int n, double a, inout double y[n]);");
        let f = &r.parser.sigs.sigs()[0];
        assert!(f.fortran);
        assert_eq!(f.args[0].category, Some(Category::PScalar));
        assert_eq!(f.args[1].category, Some(Category::PScalar));
    }

    #[test]
    fn typedef_statements_take_effect_immediately() {
        let mut r = Rig::new();
        r.decl("typedef dcomplex dcomplex;");
        r.decl("typedef fcomplex fcomplex;");
        r.decl("foo(dcomplex z, fcomplex c);");
        assert!(r.ctx.is_zscalar_type("dcomplex"));
        let f = &r.parser.sigs.sigs()[0];
        assert_eq!(f.args[0].category, Some(Category::ZScalar));
        assert_eq!(f.args[1].category, Some(Category::CScalar));
    }

    #[test]
    fn unknown_typespace_is_error() {
        let mut r = Rig::new();
        r.decl("typedef quaternion Q;");
        assert_eq!(error_count(&r.parser.diags), 1);
        assert_eq!(r.parser.diags[0].code, Some(codes::E0103));
    }

    #[test]
    fn class_inheritance_registration() {
        let mut r = Rig::new();
        r.decl("class Tri : Shape, Printable;");
        assert_eq!(r.ctx.subclasses_of("Shape").unwrap(), ["Tri".to_string()]);
        assert_eq!(r.ctx.subclasses_of("Printable").unwrap(), ["Tri".to_string()]);
    }

    #[test]
    fn duplicate_signature_shares_id() {
        let mut r = Rig::new();
        r.decl("foo(int a);");
        r.decl("bar(int b);");
        r.decl("foo(int c);");
        let sigs = r.parser.sigs.sigs();
        assert_eq!(sigs.len(), 2);
        assert_eq!(sigs[0].duplicates.len(), 1);
        // both occurrences of the duplicate dispatch to id 1
        let stub = r.stub();
        assert_eq!(stub.matches("mex_id_ = 1;").count(), 2);
        assert_eq!(stub.matches("mex_id_ = 2;").count(), 1);
        assert!(stub.contains("gw(mex_id_, c);"));
    }

    #[test]
    fn constant_and_string_arguments() {
        let mut r = Rig::new();
        r.decl("foo(const 42, cstring 'mode a');");
        let f = &r.parser.sigs.sigs()[0];
        assert_eq!(f.args[0].category, Some(Category::Const));
        assert_eq!(f.args[0].name, "42");
        assert_eq!(f.args[1].category, Some(Category::CString));
        // constants pass a placeholder in the stub
        assert!(r.stub().contains("gw(mex_id_, 0, 'mode a');"));
    }

    #[test]
    fn statement_spanning_two_declaration_lines() {
        let mut r = Rig::new();
        r.decl("double y[n] =");
        r.decl("bar(int n, double x[n]);");
        assert!(r.parser.diags.is_empty());
        assert_eq!(r.parser.sigs.len(), 1);
    }

    #[test]
    fn unterminated_statement_at_line_end() {
        let mut r = Rig::new();
        r.decl("foo(int a)");
        r.line_end();
        assert_eq!(error_count(&r.parser.diags), 1);
        assert_eq!(r.parser.diags[0].code, Some(codes::E0101));
        // buffer was discarded; next statement parses cleanly
        r.decl("bar();");
        assert_eq!(r.parser.sigs.len(), 1);
    }

    #[test]
    fn syntax_error_skips_statement_only() {
        let mut r = Rig::new();
        r.decl("foo(int, int b);");
        assert_eq!(error_count(&r.parser.diags), 1);
        assert_eq!(r.parser.diags[0].code, Some(codes::E0102));
        r.decl("ok();");
        assert_eq!(r.parser.sigs.len(), 1);
    }

    #[test]
    fn gpu_device_spec() {
        let mut r = Rig::new();
        r.decl("axpy(int n, gpu double x[n], gpu inout double y[n]);");
        let f = &r.parser.sigs.sigs()[0];
        assert_eq!(f.args[1].device, Device::Gpu);
        assert_eq!(f.args[2].device, Device::Gpu);
        assert_eq!(f.args[2].io, IoSpec::InOut);
    }

    #[test]
    fn promotion_applies_at_parse_time() {
        let mut r = Rig::new();
        r.ctx.promote_level = 3;
        r.decl("foo(int a, uint b);");
        let f = &r.parser.sigs.sigs()[0];
        assert_eq!(f.args[0].basetype, "int32_t");
        assert_eq!(f.args[1].basetype, "uint64_t");
        assert!(r.ctx.usage.int32_t);
        assert!(r.ctx.usage.uint64_t);
    }

    #[test]
    fn promoted_types_fold_into_same_signature() {
        let mut r = Rig::new();
        r.ctx.promote_level = 3;
        r.decl("foo(int a);");
        r.decl("foo(long b);");
        // both promote to int32_t, so the canonical forms collide
        assert_eq!(r.parser.sigs.len(), 1);
    }

    #[test]
    fn array_alias_parses_and_validates() {
        let mut r = Rig::new();
        r.decl("view(int n, output double x[n]&);");
        let f = &r.parser.sigs.sigs()[0];
        assert_eq!(f.args[1].category, Some(Category::RArray));
        assert!(r.parser.diags.is_empty());
    }
}
