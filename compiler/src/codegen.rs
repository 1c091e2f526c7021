// codegen.rs — C glue generator
//
// Emits the complete gateway C file for a run: banner, runtime support,
// complex typedefs, user pass-through, conversion copiers, casting getters,
// foreign-linkage declarations, one dispatch routine per unique signature,
// the dispatch table, and the gateway entry point.
//
// Every dispatch routine follows the same phase order: declare locals,
// unpack extents, check extents, unpack inputs, null-check handles,
// allocate outputs, count the call, make the call, marshal results, and a
// single cleanup label that frees exactly the buffers that were allocated.
// Buffers are zero-initialized at declaration so the cleanup label is safe
// to reach from any failure point.
//
// Preconditions: signatures are analyzed, deduplicated, and stamped with
//                dispatch ids; the run has no error diagnostics.
// Postconditions: returns the full glue file text.
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::ast::{Category, Device, DimExpr, FuncSig, IoSpec, Var};
use crate::registry::{ComplexFlavor, Context};

/// Runtime support functions and copier macros, embedded verbatim at the
/// top of every glue file.
const SUPPORT_C: &str = include_str!("support/mex_support.c");

const BANNER: &str = "/* --------------------------------------------------- */\n\
                      /* Automatically generated interface glue              */\n\
                      /* --------------------------------------------------- */\n\n";

// ── Type property table ─────────────────────────────────────────────────────

/// Host-array properties of one base type. Single source of truth for type
/// dispatch in the generator.
struct TypeProps {
    mxclass: &'static str,
    /// Interleaved-API accessor, when the host exposes one.
    accessor: &'static str,
    /// Float-precision types use the `_single` copier variants.
    is_single: bool,
    scalar_getter: &'static str,
    scalar_class: &'static str,
    /// Input-only arrays of this type borrow host memory directly.
    direct_input: bool,
}

fn type_props(name: &str) -> TypeProps {
    macro_rules! props {
        ($mx:expr, $acc:expr, $single:expr, $getter:expr, $class:expr, $direct:expr) => {
            TypeProps {
                mxclass: $mx,
                accessor: $acc,
                is_single: $single,
                scalar_getter: $getter,
                scalar_class: $class,
                direct_input: $direct,
            }
        };
    }
    match name {
        "double" => props!("mxDOUBLE_CLASS", "mxGetDoubles", false, "mxWrapGetScalar", "mxDOUBLE_CLASS", true),
        "float" => props!("mxSINGLE_CLASS", "mxGetSingles", true, "mxWrapGetScalar_single", "mxSINGLE_CLASS", true),
        "int32_t" => props!("mxINT32_CLASS", "mxGetInt32s", false, "mxWrapGetScalar", "mxDOUBLE_CLASS", false),
        "int64_t" => props!("mxINT64_CLASS", "mxGetInt64s", false, "mxWrapGetScalar", "mxDOUBLE_CLASS", false),
        "uint32_t" => props!("mxUINT32_CLASS", "mxGetUint32s", false, "mxWrapGetScalar", "mxDOUBLE_CLASS", false),
        "uint64_t" => props!("mxUINT64_CLASS", "mxGetUint64s", false, "mxWrapGetScalar", "mxDOUBLE_CLASS", false),
        "dcomplex" => props!("mxDOUBLE_CLASS", "mxGetComplexDoubles", false, "mxWrapGetScalar", "mxDOUBLE_CLASS", false),
        "fcomplex" => props!("mxSINGLE_CLASS", "mxGetComplexSingles", true, "mxWrapGetScalar_single", "mxSINGLE_CLASS", false),
        "char" => props!("mxCHAR_CLASS", "", false, "mxWrapGetScalar_char", "mxCHAR_CLASS", false),
        _ => props!("mxVOID_CLASS", "", false, "mxWrapGetScalar", "mxDOUBLE_CLASS", false),
    }
}

fn known_type(name: &str) -> bool {
    matches!(
        name,
        "double" | "float" | "int32_t" | "int64_t" | "uint32_t" | "uint64_t" | "dcomplex"
            | "fcomplex" | "char"
    )
}

/// `single_` for float-precision types, empty otherwise.
fn copier_suffix(name: &str) -> &'static str {
    if type_props(name).is_single {
        "single_"
    } else {
        ""
    }
}

/// Device-side spelling of complex base types.
fn cu_type(name: &str) -> &str {
    match name {
        "fcomplex" => "cuFloatComplex",
        "dcomplex" => "cuDoubleComplex",
        other => other,
    }
}

/// Local variable name: outputs bind to their outgoing slot, everything
/// else to its incoming slot.
fn vname(v: &Var) -> String {
    if v.io == IoSpec::Output {
        format!("out{}_", v.output_slot)
    } else {
        format!("in{}_", v.input_slot)
    }
}

/// Product-of-extents expression; `1` when there are no extents.
fn alloc_size_expr(dims: &[DimExpr]) -> String {
    if dims.is_empty() {
        return "1".into();
    }
    dims.iter()
        .map(|e| format!("dim{}_", e.input_slot))
        .collect::<Vec<_>>()
        .join("*")
}

fn cat(v: &Var) -> Category {
    // Analyzed signatures always carry a category; a miss here is a bug in
    // the analyzer, and generating nothing for the slot keeps the C valid.
    v.category.unwrap_or(Category::Scalar)
}

// ── Generator ───────────────────────────────────────────────────────────────

pub struct Cgen<'a> {
    ctx: &'a Context,
    sigs: &'a [FuncSig],
    out: String,
}

/// Generate the complete glue file. `user_c` is the verbatim pass-through
/// collected by the reader, spliced between the header and the copiers.
pub fn generate(ctx: &Context, sigs: &[FuncSig], user_c: &str) -> String {
    let mut g = Cgen {
        ctx,
        sigs,
        out: String::new(),
    };
    g.emit_header();
    g.out.push_str(user_c);
    g.emit_stdint_include();
    g.emit_copiers();
    g.emit_casting_getters();
    if sigs.iter().any(|f| f.fortran) {
        g.emit_fortran_mangling();
        g.emit_fortran_decls();
    }
    for f in sigs {
        g.emit_routine(f);
    }
    g.emit_dispatch_table();
    g.emit_gateway();
    g.out
}

impl Cgen<'_> {
    // ── File header ──

    fn emit_header(&mut self) {
        self.out.push_str(BANNER);
        self.out.push_str(SUPPORT_C);
        self.out.push('\n');
        if self.ctx.use_gpu {
            self.out.push_str("#include <gpu/mxGPUArray.h>\n\n");
        }
        match self.ctx.complex_flavor {
            ComplexFlavor::C99 => self.out.push_str(
                "#include <complex.h>\n\n\
                 typedef _Complex double dcomplex;\n\
                 #define real_dcomplex(z) creal(z)\n\
                 #define imag_dcomplex(z) cimag(z)\n\
                 #define setz_dcomplex(z,r,i)  *z = r + i*_Complex_I\n\n\
                 typedef _Complex float fcomplex;\n\
                 #define real_fcomplex(z) crealf(z)\n\
                 #define imag_fcomplex(z) cimagf(z)\n\
                 #define setz_fcomplex(z,r,i)  *z = r + i*_Complex_I\n\n",
            ),
            ComplexFlavor::Cpp => {
                self.out.push_str(
                    "#include <complex>\n\n\
                     typedef std::complex<double> dcomplex;\n\
                     #define real_dcomplex(z) std::real(z)\n\
                     #define imag_dcomplex(z) std::imag(z)\n\
                     #define setz_dcomplex(z,r,i)  *z = dcomplex(r,i)\n\n\
                     typedef std::complex<float> fcomplex;\n\
                     #define real_fcomplex(z) std::real(z)\n\
                     #define imag_fcomplex(z) std::imag(z)\n\
                     #define setz_fcomplex(z,r,i)  *z = fcomplex(r,i)\n\n",
                );
                if self.ctx.use_gpu {
                    self.out.push_str("#include <cuComplex.h>\n\n");
                }
            }
            ComplexFlavor::None => {}
        }
    }

    fn emit_stdint_include(&mut self) {
        if self.ctx.usage.any_stdint() {
            self.out.push_str("#include <stdint.h>\n\n");
        }
    }

    // ── Copier instantiation ──

    fn emit_copiers(&mut self) {
        self.out.push_str("\n\n\n/* Array copier definitions */\n");
        let names: Vec<String> = self.ctx.scalar_types().map(String::from).collect();
        for name in names {
            if !self.ctx.usage.wants(&name) {
                continue;
            }
            let _ = write!(
                self.out,
                "mxWrapGetArrayDef(mxWrapGetArray_{name}, {name})\n\
                 mxWrapCopyDef    (mxWrapCopy_{name},     {name})\n\
                 mxWrapReturnDef  (mxWrapReturn_{name},   {name})\n\
                 mxWrapGetArrayDef_single(mxWrapGetArray_single_{name}, {name})\n\
                 mxWrapCopyDef_single    (mxWrapCopy_single_{name},     {name})\n\
                 mxWrapReturnDef_single  (mxWrapReturn_single_{name},   {name})\n"
            );
        }
        let cnames: Vec<String> = self.ctx.cscalar_types().map(String::from).collect();
        for name in cnames {
            self.emit_zcopiers(&name, "float");
        }
        let znames: Vec<String> = self.ctx.zscalar_types().map(String::from).collect();
        for name in znames {
            self.emit_zcopiers(&name, "double");
        }
        self.out.push('\n');
    }

    fn emit_zcopiers(&mut self, name: &str, ztype: &str) {
        let _ = write!(
            self.out,
            "mxWrapGetScalarZDef(mxWrapGetScalar_{name}, {name},\n\
             {pad}{ztype}, setz_{name})\n\
             mxWrapGetArrayZDef (mxWrapGetArray_{name}, {name},\n\
             {pad}{ztype}, setz_{name})\n\
             mxWrapCopyZDef     (mxWrapCopy_{name}, {name},\n\
             {pad}real_{name}, imag_{name})\n\
             mxWrapReturnZDef   (mxWrapReturn_{name}, {name},\n\
             {pad}real_{name}, imag_{name})\n\
             mxWrapGetScalarZDef_single(mxWrapGetScalar_single_{name}, {name},\n\
             {pad}{ztype}, setz_{name})\n\
             mxWrapGetArrayZDef_single (mxWrapGetArray_single_{name}, {name},\n\
             {pad}{ztype}, setz_{name})\n\
             mxWrapCopyZDef_single     (mxWrapCopy_single_{name}, {name},\n\
             {pad}real_{name}, imag_{name})\n\
             mxWrapReturnZDef_single   (mxWrapReturn_single_{name}, {name},\n\
             {pad}real_{name}, imag_{name})\n",
            pad = "                    "
        );
    }

    // ── Casting getters for registered class hierarchies ──

    fn emit_casting_getters(&mut self) {
        let classes: Vec<(String, Vec<String>)> = self
            .ctx
            .classes_with_subclasses()
            .map(|(c, subs)| (c.to_string(), subs.to_vec()))
            .collect();
        for (cname, subs) in classes {
            let _ = write!(
                self.out,
                "\n{cname}* mxWrapGetP_{cname}(const mxArray* a, const char** e)\n\
                 {{\n\
                 \x20   char pbuf[128];\n\
                 \x20   if (mxGetClassID(a) == mxDOUBLE_CLASS &&\n\
                 \x20       mxGetM(a)*mxGetN(a) == 1 &&\n\
                 #if MX_HAS_INTERLEAVED_COMPLEX\n\
                 \x20       ((mxIsComplex(a) ? ((*mxGetComplexDoubles(a)).real == 0 && (*mxGetComplexDoubles(a)).imag == 0) : *mxGetDoubles(a) == 0))\n\
                 #else\n\
                 \x20       *mxGetPr(a) == 0\n\
                 #endif\n\
                 \x20       )\n\
                 \x20       return NULL;\n\
                 \x20   if (!mxIsChar(a)) {{\n\
                 #ifdef R2008OO\n\
                 \x20       mxArray* ap = mxGetProperty(a, 0, \"mwptr\");\n\
                 \x20       if (ap)\n\
                 \x20           return mxWrapGetP_{cname}(ap, e);\n\
                 #endif\n\
                 \x20       *e = \"Invalid pointer\";\n\
                 \x20       return NULL;\n\
                 \x20   }}\n\
                 \x20   mxGetString(a, pbuf, sizeof(pbuf));\n\n"
            );
            self.emit_casting_probe(&cname);
            for name in &subs {
                self.emit_casting_probe(name);
            }
            let _ = write!(
                self.out,
                "    *e = \"Invalid pointer to {cname}\";\n    return NULL;\n}}\n\n"
            );
        }
    }

    fn emit_casting_probe(&mut self, name: &str) {
        let _ = write!(
            self.out,
            "    {name}* p_{name} = NULL;\n\
             \x20   sscanf(pbuf, \"{name}:%p\", &p_{name});\n\
             \x20   if (p_{name})\n\
             \x20       return p_{name};\n\n"
        );
    }

    // ── Foreign-linkage name mangling and prototypes ──

    fn fortran_sigs(&self) -> Vec<&FuncSig> {
        let mut seen = std::collections::BTreeSet::new();
        self.sigs
            .iter()
            .filter(|f| f.fortran && seen.insert(f.callee.clone()))
            .collect()
    }

    fn emit_fortran_mangling(&mut self) {
        let names: Vec<String> = self.fortran_sigs().iter().map(|f| f.callee.clone()).collect();
        self.out.push_str("#if defined(MWF77_CAPS)\n");
        for n in &names {
            let _ = writeln!(self.out, "#define MWF77_{n} {}", n.to_uppercase());
        }
        self.out.push_str("#elif defined(MWF77_UNDERSCORE1)\n");
        for n in &names {
            let _ = writeln!(self.out, "#define MWF77_{n} {}_", n.to_lowercase());
        }
        self.out.push_str("#elif defined(MWF77_UNDERSCORE0)\n");
        for n in &names {
            let _ = writeln!(self.out, "#define MWF77_{n} {}", n.to_lowercase());
        }
        self.out.push_str("#else /* f2c convention */\n");
        for n in &names {
            let low = n.to_lowercase();
            let suffix = if low.contains('_') { "__" } else { "_" };
            let _ = writeln!(self.out, "#define MWF77_{n} {low}{suffix}");
        }
        self.out.push_str("#endif\n\n");
    }

    fn emit_fortran_decls(&mut self) {
        self.out.push_str(
            "#ifdef __cplusplus\n\
             extern \"C\" { /* Prevent C++ name mangling */\n\
             #endif\n\n\
             #ifndef MWF77_RETURN\n\
             #define MWF77_RETURN int\n\
             #endif\n\n",
        );
        let decls: Vec<String> = self
            .fortran_sigs()
            .iter()
            .map(|f| {
                let ret = f
                    .ret
                    .first()
                    .map_or("MWF77_RETURN".to_string(), |v| v.basetype.clone());
                let args = f
                    .args
                    .iter()
                    .map(|v| {
                        if cat(v) == Category::Mx {
                            "const mxArray*".to_string()
                        } else {
                            format!("{}*", v.basetype)
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{ret} MWF77_{}({args});\n", f.callee)
            })
            .collect();
        for d in decls {
            self.out.push_str(&d);
        }
        self.out
            .push_str("\n#ifdef __cplusplus\n} /* end extern C */\n#endif\n\n");
    }

    // ── One dispatch routine ──

    fn emit_routine(&mut self, f: &FuncSig) {
        let _ = write!(self.out, "/* ---- {} ----\n * {f}\n", f.loc);
        if let Some(dup) = f.duplicates.first() {
            let _ = writeln!(self.out, " * Also at {}", dup.loc);
        }
        self.out.push_str(" */\n");
        let canon = crate::ast::canonical_signature(f);
        let _ = write!(
            self.out,
            "static const char* stubids{}_ = \"{canon}\";\n\n",
            f.id
        );
        let _ = write!(
            self.out,
            "void mexStub{}(int nlhs, mxArray* plhs[],\n\
             \x20             int nrhs, const mxArray* prhs[])\n\
             {{\n\
             \x20   const char* mw_err_txt_ = 0;\n",
            f.id
        );
        self.emit_locals(f);
        self.emit_unpack_dims(f);
        self.emit_check_dims(f);
        self.emit_unpack_inputs(f);
        self.emit_null_checks(f);
        self.emit_alloc_outputs(f);
        let _ = write!(
            self.out,
            "    if (mexprofrecord_)\n        mexprofrecord_[{}]++;\n",
            f.id
        );
        self.emit_call(f);
        self.emit_marshal(f);
        self.out.push_str("\nmw_err_label:\n");
        self.emit_dealloc(f);
        self.out.push_str(
            "    if (mw_err_txt_)\n        mexErrMsgTxt(mw_err_txt_);\n}\n\n",
        );
    }

    // Step 1: locals, zeroed where cleanup may see them unset.

    fn declare_type(&self, v: &Var) -> String {
        let c = cat(v);
        if c.is_obj() || c.is_array() {
            if v.device == Device::Gpu {
                return format!("{}*", cu_type(&v.basetype));
            }
            return format!("{}*", v.basetype);
        }
        match c {
            Category::RArray => {
                if v.device == Device::Gpu {
                    format!("const {}*", cu_type(&v.basetype))
                } else {
                    format!("const {}*", v.basetype)
                }
            }
            Category::CString => "char*".to_string(),
            Category::Mx => {
                if v.io == IoSpec::Input {
                    "const mxArray*".to_string()
                } else {
                    "mxArray*".to_string()
                }
            }
            _ => v.basetype.clone(),
        }
    }

    fn emit_locals(&mut self, f: &FuncSig) {
        if let (Some(this), Some(class)) = (&f.this, &f.class) {
            let tb = format!("{class}*");
            let _ = writeln!(self.out, "    {tb:10}  in0_ =0; /* {this:10} */");
        }
        self.emit_in_locals(&f.args);
        if !f.nullable_return() {
            self.emit_out_locals(&f.ret);
        }
        self.emit_out_locals(&f.args);
        self.emit_dim_locals(&f.ret);
        self.emit_dim_locals(&f.args);
        if !f.ret.is_empty() || !f.args.is_empty() || f.this.is_some() {
            self.out.push('\n');
        }
    }

    fn emit_in_locals(&mut self, args: &[Var]) {
        for v in args {
            if v.io == IoSpec::Output || cat(v) == Category::Const {
                continue;
            }
            let c = cat(v);
            let tb = self.declare_type(v);
            if c.is_array() || c.is_obj() || c == Category::CString || c == Category::RArray {
                let _ = writeln!(
                    self.out,
                    "    {tb:10}  in{}_ =0; /* {:10} */",
                    v.input_slot, v.name
                );
                if v.device == Device::Gpu {
                    let _ = writeln!(
                        self.out,
                        "    {:10} *mxGPUArray_in{}_ =0; /* {:10} */",
                        "mxGPUArray const", v.input_slot, v.name
                    );
                }
            } else {
                let _ = writeln!(
                    self.out,
                    "    {tb:10}  in{}_;    /* {:10} */",
                    v.input_slot, v.name
                );
            }
        }
    }

    fn emit_out_locals(&mut self, args: &[Var]) {
        for v in args {
            if v.io != IoSpec::Output || cat(v) == Category::Mx {
                continue;
            }
            let c = cat(v);
            let tb = self.declare_type(v);
            if c.is_array() || c.is_obj() || c == Category::CString || c == Category::RArray {
                let _ = writeln!(
                    self.out,
                    "    {tb:10}  out{}_=0; /* {:10} */",
                    v.output_slot, v.name
                );
                if v.device == Device::Gpu {
                    let _ = writeln!(
                        self.out,
                        "    {:10} *mxGPUArray_out{}_ =0; /* {:10} */",
                        "mxGPUArray", v.output_slot, v.name
                    );
                    let _ = writeln!(
                        self.out,
                        "    {:10} gpu_outdims{}_[2] = {{0,0}}; /* {:10} dims*/",
                        "mwSize", v.output_slot, v.name
                    );
                }
            } else {
                let _ = writeln!(
                    self.out,
                    "    {tb:10}  out{}_;   /* {:10} */",
                    v.output_slot, v.name
                );
            }
        }
    }

    fn emit_dim_locals(&mut self, vars: &[Var]) {
        for v in vars {
            for e in v.dims() {
                let _ = writeln!(
                    self.out,
                    "    {:10}  dim{}_;   /* {:10} */",
                    "mwSize", e.input_slot, e.text
                );
            }
        }
    }

    // Step 2: extents from their trailing incoming slots.

    fn emit_unpack_dims(&mut self, f: &FuncSig) {
        let mut any = false;
        for v in f.ret.iter().chain(f.args.iter()) {
            for e in v.dims() {
                let _ = writeln!(
                    self.out,
                    "    dim{0}_ = (mwSize) mxWrapGetScalar(prhs[{0}], &mw_err_txt_);",
                    e.input_slot
                );
                any = true;
            }
        }
        if any {
            self.out.push('\n');
        }
    }

    // Step 3: declared extents against actual argument shapes (host arrays
    // only; device arrays carry their own shape).

    fn emit_check_dims(&mut self, f: &FuncSig) {
        for v in &f.args {
            if v.io == IoSpec::Output || !cat(v).is_array() || v.device == Device::Gpu {
                continue;
            }
            let dims = v.dims();
            if dims.is_empty() {
                continue;
            }
            let il = v.input_slot;
            if dims.len() > 1 {
                let _ = write!(
                    self.out,
                    "    if (mxGetM(prhs[{il}]) != dim{}_ ||\n\
                     \x20       mxGetN(prhs[{il}]) != dim{}_) {{\n\
                     \x20       mw_err_txt_ = \"Bad argument size: {}\";\n\
                     \x20       goto mw_err_label;\n\
                     \x20   }}\n\n",
                    dims[0].input_slot, dims[1].input_slot, v.name
                );
            } else {
                let _ = write!(
                    self.out,
                    "    if (mxGetM(prhs[{il}])*mxGetN(prhs[{il}]) != dim{}_) {{\n\
                     \x20       mw_err_txt_ = \"Bad argument size: {}\";\n\
                     \x20       goto mw_err_label;\n\
                     \x20   }}\n\n",
                    dims[0].input_slot, v.name
                );
            }
        }
    }

    // Step 4: inputs.

    fn emit_unpack_inputs(&mut self, f: &FuncSig) {
        if let Some(class) = f.this.clone() {
            self.emit_handle_getter(&class, 0);
        }
        let args = f.args.clone();
        for v in &args {
            if v.io == IoSpec::Output {
                continue;
            }
            match cat(v) {
                c if c.is_obj() => self.emit_handle_getter(&v.basetype.clone(), v.input_slot),
                c if c.is_array() => self.emit_unpack_array(v),
                Category::Scalar | Category::RScalar | Category::PScalar => {
                    let tp = type_props(&v.basetype);
                    let _ = write!(
                        self.out,
                        "    if( mxGetClassID(prhs[{il}]) != {cls} )\n\
                         \x20       mw_err_txt_ = \"Invalid scalar argument, {cls} expected\";\n\
                         \x20   if (mw_err_txt_) goto mw_err_label;\n\
                         \x20   in{il}_ = ({bt}) {getter}(prhs[{il}], &mw_err_txt_);\n\
                         \x20   if (mw_err_txt_)\n\
                         \x20       goto mw_err_label;\n",
                        il = v.input_slot,
                        cls = tp.scalar_class,
                        bt = v.basetype,
                        getter = tp.scalar_getter
                    );
                    if v.basetype != "char" {
                        self.out.push('\n');
                    }
                }
                Category::CScalar
                | Category::ZScalar
                | Category::RCScalar
                | Category::RZScalar
                | Category::PCScalar
                | Category::PZScalar => {
                    let tp = type_props(&v.basetype);
                    let _ = write!(
                        self.out,
                        "    if( mxGetClassID(prhs[{il}]) != {cls} )\n\
                         \x20       mw_err_txt_ = \"Invalid scalar argument, {cls} expected\";\n\
                         \x20   if (mw_err_txt_) goto mw_err_label;\n\
                         \x20   mxWrapGetScalar_{cs}{bt}(&in{il}_, prhs[{il}]);\n\n",
                        il = v.input_slot,
                        cls = tp.scalar_class,
                        cs = copier_suffix(&v.basetype),
                        bt = v.basetype
                    );
                }
                Category::CString => self.emit_unpack_string(v),
                Category::Mx => {
                    let _ = write!(
                        self.out,
                        "    in{0}_ = prhs[{0}];\n\n",
                        v.input_slot
                    );
                }
                _ => {}
            }
        }
    }

    /// Handle input: registered native-array handles use their own getter,
    /// classes with subclasses use the casting getter, everything else the
    /// generic token parser.
    fn emit_handle_getter(&mut self, basetype: &str, slot: i32) {
        let _ = write!(self.out, "    in{slot}_ = ");
        if self.ctx.is_mxarray_type(basetype) {
            let _ = writeln!(
                self.out,
                "mxWrapGet_{basetype}(prhs[{slot}], &mw_err_txt_);"
            );
        } else if self.ctx.subclasses_of(basetype).is_none() {
            let _ = writeln!(
                self.out,
                "({basetype}*) mxWrapGetP(prhs[{slot}], \"{basetype}:%p\", &mw_err_txt_);"
            );
        } else {
            let _ = writeln!(
                self.out,
                "mxWrapGetP_{basetype}(prhs[{slot}], &mw_err_txt_);"
            );
        }
        self.out
            .push_str("    if (mw_err_txt_)\n        goto mw_err_label;\n\n");
    }

    fn emit_unpack_array(&mut self, v: &Var) {
        let il = v.input_slot;
        let bt = &v.basetype;

        if v.device != Device::Gpu {
            let tp = type_props(bt);
            let cs = copier_suffix(bt);
            let _ = write!(
                self.out,
                "    if (mxGetM(prhs[{il}])*mxGetN(prhs[{il}]) != 0) {{\n"
            );
            if v.is_complex() && known_type(bt) {
                let _ = write!(
                    self.out,
                    "        if( mxGetClassID(prhs[{il}]) != {cls} )\n\
                     \x20           mw_err_txt_ = \"Invalid array argument, {cls} expected\";\n\
                     \x20       if (mw_err_txt_) goto mw_err_label;\n\
                     \x20       in{il}_ = mxWrapGetArray_{cs}{bt}(prhs[{il}], &mw_err_txt_);\n\
                     \x20       if (mw_err_txt_)\n\
                     \x20           goto mw_err_label;\n",
                    cls = tp.mxclass
                );
            } else if tp.direct_input && v.io == IoSpec::Input {
                let _ = write!(
                    self.out,
                    "        if( mxGetClassID(prhs[{il}]) != {cls} )\n\
                     \x20           mw_err_txt_ = \"Invalid array argument, {cls} expected\";\n\
                     \x20       if (mw_err_txt_) goto mw_err_label;\n\
                     #if MX_HAS_INTERLEAVED_COMPLEX\n\
                     \x20       in{il}_ = {acc}(prhs[{il}]);\n\
                     #else\n",
                    cls = tp.mxclass,
                    acc = tp.accessor
                );
                if bt == "double" {
                    let _ = writeln!(self.out, "        in{il}_ = mxGetPr(prhs[{il}]);");
                } else {
                    let _ = writeln!(
                        self.out,
                        "        in{il}_ = ({bt}*) mxGetData(prhs[{il}]);"
                    );
                }
                self.out.push_str("#endif\n");
            } else {
                let _ = write!(
                    self.out,
                    "        in{il}_ = mxWrapGetArray_{cs}{bt}(prhs[{il}], &mw_err_txt_);\n\
                     \x20       if (mw_err_txt_)\n\
                     \x20           goto mw_err_label;\n"
                );
            }
            let _ = write!(self.out, "    }} else\n        in{il}_ = NULL;\n\n");
        } else if v.io.is_input() {
            let _ = write!(
                self.out,
                "    /* extract input device array pointer */\n\
                 \x20   if(!(mxIsGPUArray(prhs[{il}])))\n\
                 \x20       mw_err_txt_ = \"Invalid array argument, gpuArray expected\";\n\
                 \x20   if (mw_err_txt_) goto mw_err_label;\n\
                 \x20   mxGPUArray_in{il}_ = mxGPUCreateFromMxArray(prhs[{il}]);\n\
                 \x20   in{il}_ = ({cut} *)mxGPUGetDataReadOnly(mxGPUArray_in{il}_);\n\n",
                cut = cu_type(bt)
            );
        }
    }

    fn emit_unpack_string(&mut self, v: &Var) {
        let il = v.input_slot;
        if v.dims().is_empty() {
            let _ = write!(
                self.out,
                "    in{il}_ = mxWrapGetString(prhs[{il}], &mw_err_txt_);\n\
                 \x20   if (mw_err_txt_)\n\
                 \x20       goto mw_err_label;\n"
            );
        } else {
            let sz = alloc_size_expr(v.dims());
            let _ = write!(
                self.out,
                "    in{il}_ = (char*) mxMalloc({sz}*sizeof(char));\n\
                 \x20   if (mxGetString(prhs[{il}], in{il}_, {sz}) != 0) {{\n\
                 \x20       mw_err_txt_ = \"Invalid string argument\";\n\
                 \x20       goto mw_err_label;\n\
                 \x20   }}\n"
            );
        }
        self.out.push('\n');
    }

    // Step 5: plain and reference handles must not be null.

    fn emit_null_checks(&mut self, f: &FuncSig) {
        for v in &f.args {
            if v.io != IoSpec::Output
                && matches!(cat(v), Category::Obj | Category::RObj)
            {
                let _ = write!(
                    self.out,
                    "    if (!in{}_) {{\n\
                     \x20       mw_err_txt_ = \"Argument {} cannot be null\";\n\
                     \x20       goto mw_err_label;\n\
                     \x20   }}\n",
                    v.input_slot, v.name
                );
            }
        }
    }

    // Step 6: output buffers.

    fn emit_alloc_outputs(&mut self, f: &FuncSig) {
        if !f.nullable_return() {
            self.emit_alloc_vars(&f.ret.clone(), true);
        }
        self.emit_alloc_vars(&f.args.clone(), false);
    }

    fn emit_alloc_vars(&mut self, args: &[Var], return_flag: bool) {
        for v in args {
            if v.io != IoSpec::Output {
                continue;
            }
            let c = cat(v);
            let ol = v.output_slot;
            if v.device != Device::Gpu {
                if !return_flag && c.is_obj() && self.ctx.is_mxarray_type(&v.basetype) {
                    let _ = writeln!(
                        self.out,
                        "    out{ol}_ = mxWrapAlloc_{}();",
                        v.basetype
                    );
                } else if c.is_array() {
                    // An output array that failed dim validation stays NULL;
                    // the routine is still emitted for the table.
                    if !v.dims().is_empty() {
                        let _ = writeln!(
                            self.out,
                            "    out{ol}_ = ({bt}*) mxMalloc({sz}*sizeof({bt}));",
                            bt = v.basetype,
                            sz = alloc_size_expr(v.dims())
                        );
                    }
                } else if c == Category::RArray {
                    let _ = writeln!(self.out, "    out{ol}_ = ({}*) NULL;", v.basetype);
                } else if c == Category::CString {
                    let _ = writeln!(
                        self.out,
                        "    out{ol}_ = (char*) mxMalloc({}*sizeof(char));",
                        alloc_size_expr(v.dims())
                    );
                }
            } else {
                let dims = v.dims();
                // A device output array that failed dim validation stays
                // NULL, same as the host branch above.
                if dims.is_empty() {
                    continue;
                }
                let ndims = if dims.len() == 2 { 2 } else { 1 };
                let mtype = if v.is_complex() { "mxCOMPLEX" } else { "mxREAL" };
                if ndims == 2 {
                    let _ = writeln!(
                        self.out,
                        "    gpu_outdims{ol}_[0] = dim{}_; gpu_outdims{ol}_[1] = dim{}_;",
                        dims[0].input_slot, dims[1].input_slot
                    );
                } else {
                    let _ = writeln!(
                        self.out,
                        "    gpu_outdims{ol}_[0] = dim{}_;",
                        dims[0].input_slot
                    );
                }
                let _ = write!(
                    self.out,
                    "    mxGPUArray_out{ol}_ = mxGPUCreateGPUArray({ndims}, gpu_outdims{ol}_, {mxcid}, {mtype}, MX_GPU_DO_NOT_INITIALIZE);\n\
                     \x20   out{ol}_ = ({cut} *)mxGPUGetData(mxGPUArray_out{ol}_);\n\n",
                    mxcid = type_props(&v.basetype).mxclass,
                    cut = cu_type(&v.basetype)
                );
            }
        }
    }

    // Step 8: the call itself.

    fn call_expr(&self, f: &FuncSig) -> String {
        let mut s = String::new();
        if f.this.is_some() {
            s.push_str("in0_->");
        }
        if f.callee == "new" {
            let _ = write!(s, "new {}(", f.class.as_deref().unwrap_or(""));
        } else {
            if f.fortran {
                s.push_str("MWF77_");
            }
            let _ = write!(s, "{}(", f.callee);
        }
        let mut first = true;
        for v in &f.args {
            if !first {
                s.push_str(", ");
            }
            first = false;
            let n = vname(v);
            match cat(v) {
                Category::Obj | Category::RObj => {
                    let _ = write!(s, "*{n}");
                }
                Category::Mx if v.io == IoSpec::Output => {
                    let _ = write!(s, "plhs+{}", v.output_slot);
                }
                Category::PScalar | Category::PCScalar | Category::PZScalar => {
                    let _ = write!(s, "&{n}");
                }
                Category::Const => s.push_str(&v.name),
                _ => s.push_str(&n),
            }
        }
        s.push(')');
        s
    }

    fn emit_call(&mut self, f: &FuncSig) {
        if f.this.is_some() {
            self.out.push_str(
                "    if (!in0_) {\n\
                 \x20       mw_err_txt_ = \"Cannot dispatch to NULL\";\n\
                 \x20       goto mw_err_label;\n\
                 \x20   }\n",
            );
        }
        if self.ctx.generate_catch {
            self.out.push_str("    try {\n    ");
        }

        let expr = self.call_expr(f);
        match f.ret.first() {
            None => {
                let _ = writeln!(self.out, "    {expr};");
            }
            Some(v) => {
                let bt = v.basetype.clone();
                match cat(v) {
                    Category::Obj => {
                        if self.ctx.is_mxarray_type(&bt) {
                            let _ = writeln!(
                                self.out,
                                "    plhs[0] = mxWrapSet_{bt}(&({expr}));"
                            );
                        } else {
                            let _ = writeln!(self.out, "    out0_ = new {bt}({expr});");
                        }
                    }
                    c if c.is_array() => {
                        let dims = v.dims();
                        if dims.len() == 2 {
                            let _ = writeln!(
                                self.out,
                                "    plhs[0] = mxWrapReturn_{bt}({expr},  dim{}_, dim{}_);",
                                dims[0].input_slot, dims[1].input_slot
                            );
                        } else {
                            let _ = writeln!(
                                self.out,
                                "    plhs[0] = mxWrapReturn_{bt}({expr}, {}, 1);",
                                alloc_size_expr(dims)
                            );
                        }
                    }
                    Category::Scalar
                    | Category::RScalar
                    | Category::CScalar
                    | Category::RCScalar
                    | Category::ZScalar
                    | Category::RZScalar => {
                        let _ = writeln!(self.out, "    out0_ = {expr};");
                    }
                    Category::CString => {
                        let _ = writeln!(self.out, "    plhs[0] = mxWrapStrncpy({expr});");
                    }
                    Category::Mx => {
                        let _ = writeln!(self.out, "    plhs[0] = {expr};");
                    }
                    Category::PObj => {
                        if self.ctx.is_mxarray_type(&bt) {
                            let _ = writeln!(self.out, "    plhs[0] = mxWrapSet_{bt}({expr});");
                        } else {
                            let _ = writeln!(self.out, "    out0_ = {expr};");
                        }
                    }
                    Category::PScalar | Category::PCScalar | Category::PZScalar => {
                        let _ = writeln!(
                            self.out,
                            "    plhs[0] = mxWrapReturn_{bt}({expr}, 1, 1);"
                        );
                    }
                    Category::RObj => {
                        if self.ctx.is_mxarray_type(&bt) {
                            let _ = writeln!(
                                self.out,
                                "    plhs[0] = mxWrapSet_{bt}(&({expr}));"
                            );
                        } else {
                            let _ = writeln!(self.out, "    out0_ = &({expr});");
                        }
                    }
                    _ => {}
                }
            }
        }

        if self.ctx.generate_catch {
            let _ = write!(
                self.out,
                "    }} catch(...) {{\n\
                 \x20       mw_err_txt_ = \"Caught C++ exception from {}\";\n\
                 \x20   }}\n\
                 \x20   if (mw_err_txt_)\n\
                 \x20       goto mw_err_label;\n",
                f.callee
            );
        }
    }

    // Step 9: results back to outgoing slots.

    fn emit_marshal(&mut self, f: &FuncSig) {
        if !f.nullable_return() {
            self.emit_marshal_vars(&f.ret.clone(), true);
        }
        self.emit_marshal_vars(&f.args.clone(), false);
    }

    fn emit_marshal_vars(&mut self, vars: &[Var], return_flag: bool) {
        for v in vars {
            if v.io == IoSpec::Input {
                continue;
            }
            self.emit_marshal_one(v, return_flag);
        }
    }

    fn emit_marshal_one(&mut self, v: &Var, return_flag: bool) {
        let c = cat(v);
        let n = vname(v);
        let ol = v.output_slot;
        let bt = &v.basetype;

        if c.is_obj() && self.ctx.is_mxarray_type(bt) {
            if !return_flag {
                let _ = writeln!(self.out, "    plhs[{ol}] = mxWrapSet_{bt}({n});");
            }
        } else if c.is_obj() {
            let _ = writeln!(
                self.out,
                "    plhs[{ol}] = mxWrapCreateP(out{ol}_, \"{bt}:%p\");"
            );
        } else if c.is_array() || c == Category::RArray {
            self.emit_marshal_array(v);
        } else if matches!(c, Category::Scalar | Category::RScalar | Category::PScalar) {
            let _ = write!(
                self.out,
                "#if MX_HAS_INTERLEAVED_COMPLEX\n\
                 \x20   plhs[{ol}] = mxCreateDoubleMatrix(1, 1, mxREAL);\n\
                 \x20   *mxGetDoubles(plhs[{ol}]) = {n};\n\
                 #else\n\
                 \x20   plhs[{ol}] = mxCreateDoubleMatrix(1, 1, mxREAL);\n\
                 \x20   *mxGetPr(plhs[{ol}]) = {n};\n\
                 #endif\n"
            );
        } else if c.is_complex() {
            let _ = write!(
                self.out,
                "#if MX_HAS_INTERLEAVED_COMPLEX\n\
                 \x20   plhs[{ol}] = mxCreateDoubleMatrix(1, 1, mxCOMPLEX);\n\
                 \x20   mxGetComplexDoubles(plhs[{ol}])->real = real_{bt}({n});\n\
                 \x20   mxGetComplexDoubles(plhs[{ol}])->imag = imag_{bt}({n});\n\
                 #else\n\
                 \x20   plhs[{ol}] = mxCreateDoubleMatrix(1, 1, mxCOMPLEX);\n\
                 \x20   *mxGetPr(plhs[{ol}]) = real_{bt}({n});\n\
                 \x20   *mxGetPi(plhs[{ol}]) = imag_{bt}({n});\n\
                 #endif\n"
            );
        } else if c == Category::CString {
            let _ = writeln!(self.out, "    plhs[{ol}] = mxCreateString({n});");
        }
    }

    fn emit_marshal_array(&mut self, v: &Var) {
        if v.io == IoSpec::Output && v.dims().is_empty() {
            return;
        }
        let il = v.input_slot;
        let ol = v.output_slot;
        let bt = &v.basetype;
        let n = vname(v);

        if v.device == Device::Gpu {
            if v.io == IoSpec::InOut {
                let _ = writeln!(self.out, "    plhs[{ol}] = prhs[{il}];");
            }
            if v.io == IoSpec::Output {
                let _ = writeln!(
                    self.out,
                    "    plhs[{ol}] = mxGPUCreateMxArrayOnGPU(mxGPUArray_out{ol}_);"
                );
            }
            return;
        }

        let dims = v.dims();
        let mtype = if v.is_complex() { "mxCOMPLEX" } else { "mxREAL" };
        let single = type_props(bt).is_single;
        let alias = cat(v) == Category::RArray;
        let ws = if alias { "        " } else { "    " };

        if alias {
            let _ = write!(
                self.out,
                "    if (out{ol}_ == NULL) {{\n\
                 \x20       plhs[{ol}] = mxCreateDoubleMatrix(0,0, mxREAL);\n\
                 \x20   }} else {{\n"
            );
        }

        let (rows, cols, count, src): (String, String, String, String) = if dims.is_empty() {
            (
                format!("mxGetM(prhs[{il}])"),
                format!("mxGetN(prhs[{il}])"),
                format!("mxGetM(prhs[{il}])*mxGetN(prhs[{il}])"),
                format!("in{il}_"),
            )
        } else if dims.len() == 1 {
            let d = format!("dim{}_", dims[0].input_slot);
            (d.clone(), "1".into(), d, n.clone())
        } else {
            let d0 = format!("dim{}_", dims[0].input_slot);
            let d1 = format!("dim{}_", dims[1].input_slot);
            (d0.clone(), d1.clone(), format!("{d0}*{d1}"), n.clone())
        };

        if single {
            let _ = write!(
                self.out,
                "{ws}plhs[{ol}] = mxCreateNumericMatrix({rows}, {cols}, mxSINGLE_CLASS, {mtype});\n\
                 {ws}mxWrapCopy_single_{bt}(plhs[{ol}], {src}, {count});\n"
            );
        } else {
            let _ = write!(
                self.out,
                "{ws}plhs[{ol}] = mxCreateDoubleMatrix({rows}, {cols}, {mtype});\n\
                 {ws}mxWrapCopy_{bt}(plhs[{ol}], {src}, {count});\n"
            );
        }

        if alias {
            self.out.push_str("    }\n");
        }
    }

    // Step 10: cleanup, reached on success and on every failure path.

    fn emit_dealloc(&mut self, f: &FuncSig) {
        if !f.nullable_return() {
            self.emit_dealloc_vars(&f.ret.clone(), true);
        }
        self.emit_dealloc_vars(&f.args.clone(), false);
    }

    fn emit_dealloc_vars(&mut self, vars: &[Var], return_flag: bool) {
        for v in vars {
            let c = cat(v);
            if v.device != Device::Gpu {
                if c.is_array() || c == Category::CString {
                    if v.io == IoSpec::Output {
                        let _ = writeln!(
                            self.out,
                            "    if (out{0}_) mxFree(out{0}_);",
                            v.output_slot
                        );
                    } else if v.io == IoSpec::InOut
                        || !(v.basetype == "double" || v.basetype == "float")
                    {
                        let _ = writeln!(
                            self.out,
                            "    if (in{0}_)  mxFree(in{0}_);",
                            v.input_slot
                        );
                    }
                } else if c.is_obj() && self.ctx.is_mxarray_type(&v.basetype) {
                    if v.io.is_input() {
                        let _ = writeln!(
                            self.out,
                            "    if (in{0}_)  mxWrapFree_{1}(in{0}_);",
                            v.input_slot, v.basetype
                        );
                    } else if !return_flag {
                        let _ = writeln!(
                            self.out,
                            "    if (out{0}_) mxWrapFree_{1}(out{0}_);",
                            v.output_slot, v.basetype
                        );
                    }
                }
            } else {
                if v.io.is_input() {
                    let _ = writeln!(
                        self.out,
                        "    if (mxGPUArray_in{0}_)  mxGPUDestroyGPUArray(mxGPUArray_in{0}_);",
                        v.input_slot
                    );
                }
                if v.io == IoSpec::Output {
                    let _ = writeln!(
                        self.out,
                        "    if (mxGPUArray_out{0}_)  mxGPUDestroyGPUArray(mxGPUArray_out{0}_);",
                        v.output_slot
                    );
                }
            }
        }
    }

    // ── Dispatch table ──

    fn emit_dispatch_table(&mut self) {
        let mut id_to_stub: BTreeMap<i32, i32> = BTreeMap::new();
        let mut maxid = 0;
        for f in self.sigs {
            id_to_stub.insert(f.id, f.id);
            maxid = maxid.max(f.id);
            for dup in &f.duplicates {
                id_to_stub.insert(dup.id, f.id);
                maxid = maxid.max(dup.id);
            }
        }
        // Even an empty run gets a one-entry table so the gateway's fast
        // path always links.
        self.out.push_str(
            "typedef void (*mwStubFunc_t)(int nlhs, mxArray* plhs[],\n\
             \x20                            int nrhs, const mxArray* prhs[]);\n\n\
             static mwStubFunc_t mwStubs_[] = {\n\
             \x20   NULL",
        );
        for i in 1..=maxid {
            self.out.push_str(",\n");
            match id_to_stub.get(&i) {
                Some(stub) => {
                    let _ = write!(self.out, "    mexStub{stub}");
                }
                None => self.out.push_str("    NULL"),
            }
        }
        self.out.push_str("\n};\n\n");
        let _ = write!(self.out, "static int mwNumStubs_ = {maxid};\n\n");
    }

    // ── Gateway entry point ──

    fn emit_profile_report(&mut self, printfunc: &str) {
        let _ = write!(
            self.out,
            "        if (!mexprofrecord_)\n            {printfunc}\"Profiler inactive\\n\");\n"
        );
        let lines: Vec<String> = self
            .sigs
            .iter()
            .map(|f| {
                let mut loc = f.loc.to_string();
                if let Some(dup) = f.duplicates.first() {
                    let _ = write!(loc, " ({})", dup.loc);
                }
                format!(
                    "        {printfunc}\"%d calls to {loc}\\n\", mexprofrecord_[{}]);\n",
                    f.id
                )
            })
            .collect();
        for l in lines {
            self.out.push_str(&l);
        }
    }

    fn emit_gateway(&mut self) {
        self.out.push_str(
            "/* ----\n\
             \x20*/\n\
             void mexFunction(int nlhs, mxArray* plhs[],\n\
             \x20                int nrhs, const mxArray* prhs[])\n\
             {\n\
             \x20   if (nrhs == 0) {\n\
             \x20       mexPrintf(\"Mex function installed\\n\");\n\
             \x20       return;\n\
             \x20   }\n\n\
             \x20   /* Fast path: integer stub ID */\n\
             \x20   if (!mxIsChar(prhs[0])) {\n\
             \x20       int stub_id = (int) mxGetScalar(prhs[0]);\n\
             \x20       if (stub_id > 0 && stub_id <= mwNumStubs_ && mwStubs_[stub_id])\n\
             \x20           mwStubs_[stub_id](nlhs, plhs, nrhs-1, prhs+1);\n\
             \x20       else\n\
             \x20           mexErrMsgTxt(\"Unknown function ID\");\n\
             \x20       return;\n\
             \x20   }\n\n\n",
        );
        if self.ctx.use_gpu {
            self.out.push_str("    mxInitGPU();\n");
        }
        self.out.push('\n');
        self.out.push_str(
            "    char id[1024];\n\
             \x20   if (mxGetString(prhs[0], id, sizeof(id)) != 0)\n\
             \x20       mexErrMsgTxt(\"Identifier should be a string\");\n",
        );
        for f in self.sigs {
            let _ = write!(
                self.out,
                "    else if (strcmp(id, stubids{0}_) == 0)\n\
                 \x20       mexStub{0}(nlhs,plhs, nrhs-1,prhs+1);\n",
                f.id
            );
        }
        let maxid = self.sigs.iter().map(|f| f.id).max().unwrap_or(0);
        let _ = write!(
            self.out,
            "    else if (strcmp(id, \"*profile on*\") == 0) {{\n\
             \x20       if (!mexprofrecord_) {{\n\
             \x20           mexprofrecord_ = (int*) malloc({n} * sizeof(int));\n\
             \x20           mexLock();\n\
             \x20       }}\n\
             \x20       memset(mexprofrecord_, 0, {n} * sizeof(int));\n\
             \x20   }} else if (strcmp(id, \"*profile off*\") == 0) {{\n\
             \x20       if (mexprofrecord_) {{\n\
             \x20           free(mexprofrecord_);\n\
             \x20           mexUnlock();\n\
             \x20       }}\n\
             \x20       mexprofrecord_ = NULL;\n\
             \x20   }} else if (strcmp(id, \"*profile report*\") == 0) {{\n",
            n = maxid + 1
        );
        self.emit_profile_report("mexPrintf(");
        self.out.push_str(
            "    } else if (strcmp(id, \"*profile log*\") == 0) {\n\
             \x20       FILE* logfp;\n\
             \x20       if (nrhs != 2 || mxGetString(prhs[1], id, sizeof(id)) != 0)\n\
             \x20           mexErrMsgTxt(\"Must have two string arguments\");\n\
             \x20       logfp = fopen(id, \"w+\");\n\
             \x20       if (!logfp)\n\
             \x20           mexErrMsgTxt(\"Cannot open log for output\");\n",
        );
        self.emit_profile_report("fprintf(logfp, ");
        self.out.push_str("        fclose(logfp);\n");
        self.out.push_str(
            "    } else\n        mexErrMsgTxt(\"Unknown identifier\");\n}\n\n",
        );
    }
}
