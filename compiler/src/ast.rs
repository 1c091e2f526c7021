// AST node types for .mw interface declarations.
//
// One statement parses into one `FuncSig` tree (or mutates the type registry,
// for typedef/class statements). Variables are created with their category
// unset; the analyzer classifies and slot-labels each tree exactly once, after
// which the tree is immutable.
//
// Preconditions: produced by the parser from a declaration-line token stream.
// Postconditions: none (data-only module).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::diag::Loc;

// ── Device and direction tags ──

/// Where a marshaled buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Gpu,
}

/// Data-flow direction of a variable across the glue boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoSpec {
    Input,
    Output,
    InOut,
}

impl IoSpec {
    /// The variable consumes an incoming-argument slot.
    pub fn is_input(self) -> bool {
        matches!(self, IoSpec::Input | IoSpec::InOut)
    }

    /// The variable produces an outgoing-result slot.
    pub fn is_output(self) -> bool {
        matches!(self, IoSpec::Output | IoSpec::InOut)
    }

    pub fn is_input_only(self) -> bool {
        self == IoSpec::Input
    }
}

// ── Dimension expressions ──

/// A literal or identifier naming one array extent.
///
/// Owned by the qualifier of the variable it sizes; receives its own
/// input slot during analysis (after all variable slots).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimExpr {
    pub text: String,
    /// Incoming-argument slot carrying this extent at call time; −1 until
    /// the analyzer labels it.
    pub input_slot: i32,
}

impl DimExpr {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            input_slot: -1,
        }
    }
}

// ── Type qualifiers ──

/// Optional qualifier on a declared base type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeQual {
    /// `*` — pass by address.
    Pointer,
    /// `&` — pass by reference.
    Ref,
    /// `[d0]` or `[d0, d1]` — array with declared extents.
    Array(Vec<DimExpr>),
    /// `[d0]&` — alias existing memory rather than allocate fresh.
    ArrayRef(Vec<DimExpr>),
}

impl TypeQual {
    /// Dimension expressions, empty for pointer/reference qualifiers.
    pub fn dims(&self) -> &[DimExpr] {
        match self {
            TypeQual::Array(d) | TypeQual::ArrayRef(d) => d,
            _ => &[],
        }
    }

    pub fn dims_mut(&mut self) -> &mut [DimExpr] {
        match self {
            TypeQual::Array(d) | TypeQual::ArrayRef(d) => d,
            _ => &mut [],
        }
    }
}

// ── Marshaling categories ──

/// The closed set of marshaling categories. Every analyzed variable carries
/// exactly one; category alone selects its code-generation shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Opaque handle passed as an externalized pointer token.
    Obj,
    PObj,
    RObj,
    /// Plain numeric scalar.
    Scalar,
    PScalar,
    RScalar,
    /// Single-precision complex scalar.
    CScalar,
    PCScalar,
    RCScalar,
    /// Double-precision complex scalar.
    ZScalar,
    PZScalar,
    RZScalar,
    /// Numeric array with declared extents.
    Array,
    /// Single-precision complex array.
    CArray,
    /// Double-precision complex array.
    ZArray,
    /// Array alias: reference to existing real-array memory, output only.
    RArray,
    /// Character string, fixed- or caller-sized.
    CString,
    /// The host runtime's own array handle, passed through unconverted.
    Mx,
    /// Constant literal baked into the call.
    Const,
}

impl Category {
    /// Array categories that allocate and copy a host buffer.
    pub fn is_array(self) -> bool {
        matches!(self, Category::Array | Category::CArray | Category::ZArray)
    }

    /// Opaque-handle categories.
    pub fn is_obj(self) -> bool {
        matches!(self, Category::Obj | Category::PObj | Category::RObj)
    }

    /// Complex-valued categories (either precision).
    pub fn is_complex(self) -> bool {
        matches!(
            self,
            Category::CArray
                | Category::ZArray
                | Category::CScalar
                | Category::ZScalar
                | Category::RCScalar
                | Category::RZScalar
                | Category::PCScalar
                | Category::PZScalar
        )
    }
}

// ── Variable ──

/// One declared variable: the bound object, an argument, or the return value.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub device: Device,
    pub io: IoSpec,
    /// Declared base type name, already integer-promotion-rewritten.
    pub basetype: String,
    pub qual: Option<TypeQual>,
    pub name: String,
    /// Set exactly once by the analyzer; `None` before analysis or when
    /// classification failed.
    pub category: Option<Category>,
    pub input_slot: i32,
    pub output_slot: i32,
}

impl Var {
    pub fn new(
        device: Device,
        io: IoSpec,
        basetype: impl Into<String>,
        qual: Option<TypeQual>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            device,
            io,
            basetype: basetype.into(),
            qual,
            name: name.into(),
            category: None,
            input_slot: -1,
            output_slot: -1,
        }
    }

    pub fn is_complex(&self) -> bool {
        self.category.is_some_and(Category::is_complex)
    }

    /// Declared dimension expressions, empty without an array qualifier.
    pub fn dims(&self) -> &[DimExpr] {
        self.qual.as_ref().map_or(&[], TypeQual::dims)
    }
}

// ── Function signature ──

/// One parsed function statement.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncSig {
    /// Bound-object variable name for `obj -> Class.method(...)` form.
    pub this: Option<String>,
    /// Class name for method and constructor forms.
    pub class: Option<String>,
    /// Callee name; `"new"` for constructors.
    pub callee: String,
    pub loc: Loc,
    /// Foreign (FORTRAN) linkage: scalars pass by address.
    pub fortran: bool,
    /// 1-based dispatch id; −1 until deduplication assigns it. Duplicate
    /// signatures share their representative's id.
    pub id: i32,
    pub args: Vec<Var>,
    /// 0-or-1-element return list.
    pub ret: Vec<Var>,
    /// Later declarations sharing this signature's canonical form. Kept for
    /// documentation only; never code-generated.
    pub duplicates: Vec<FuncSig>,
}

impl FuncSig {
    pub fn new(
        this: Option<String>,
        class: Option<String>,
        callee: impl Into<String>,
        loc: Loc,
    ) -> Self {
        Self {
            this,
            class,
            callee: callee.into(),
            loc,
            fortran: false,
            id: -1,
            args: Vec::new(),
            ret: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    /// The return variable builds `plhs[0]` directly at the call site, so no
    /// separate output local is declared or freed for it.
    pub fn nullable_return(&self) -> bool {
        self.ret.first().is_some_and(|v| {
            matches!(
                v.category,
                Some(
                    Category::CString
                        | Category::Array
                        | Category::CArray
                        | Category::ZArray
                        | Category::PScalar
                        | Category::PCScalar
                        | Category::PZScalar
                )
            )
        })
    }
}

// ── Canonical signature ──
//
// The normalized text used for duplicate detection: device + direction +
// promoted base type + qualifier shape per variable (a constant's literal
// text included, so distinct literals stay distinct), joined with the call
// target and any bound-object prefix. Dimension expressions are shape-only:
// each renders as one `x`.

fn canon_qual(q: Option<&TypeQual>) -> String {
    match q {
        None => String::new(),
        Some(TypeQual::Pointer) => "*".into(),
        Some(TypeQual::Ref) => "&".into(),
        Some(TypeQual::Array(dims)) => format!("[{}]", "x".repeat(dims.len())),
        Some(TypeQual::ArrayRef(_)) => "r".into(),
    }
}

fn canon_var(v: &Var) -> String {
    let device = match v.device {
        Device::Cpu => "c ",
        Device::Gpu => "g ",
    };
    let io = match v.io {
        IoSpec::Input => "i ",
        IoSpec::Output => "o ",
        IoSpec::InOut => "io ",
    };
    let mut s = format!("{}{}{}{}", device, io, v.basetype, canon_qual(v.qual.as_ref()));
    if v.category == Some(Category::Const) {
        s.push(' ');
        s.push_str(&v.name);
    }
    s
}

fn canon_vars(vars: &[Var]) -> String {
    vars.iter().map(canon_var).collect::<Vec<_>>().join(", ")
}

/// Canonical form of an analyzed signature.
pub fn canonical_signature(f: &FuncSig) -> String {
    let mut s = String::new();
    if !f.ret.is_empty() {
        s.push_str(&canon_vars(&f.ret));
        s.push_str(" = ");
    }
    if let Some(this) = &f.this {
        s.push_str(this);
        s.push_str("->");
        s.push_str(f.class.as_deref().unwrap_or(""));
        s.push('.');
    }
    s.push_str(&f.callee);
    s.push('(');
    s.push_str(&canon_vars(&f.args));
    s.push(')');
    s
}

// ── Human-readable rendering (for generated-code comments) ──

fn pretty_qual(q: Option<&TypeQual>) -> String {
    match q {
        None => String::new(),
        Some(TypeQual::Pointer) => "*".into(),
        Some(TypeQual::Ref) => "&".into(),
        Some(TypeQual::Array(dims)) => format!(
            "[{}]",
            dims.iter()
                .map(|d| d.text.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Some(TypeQual::ArrayRef(dims)) => format!(
            "[{}]&",
            dims.iter()
                .map(|d| d.text.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

fn pretty_var(v: &Var) -> String {
    format!("{}{} {}", v.basetype, pretty_qual(v.qual.as_ref()), v.name)
}

fn pretty_arg(v: &Var) -> String {
    let device = match v.device {
        Device::Gpu => "gpu ",
        Device::Cpu => "",
    };
    let io = match v.io {
        IoSpec::Output => "output ",
        IoSpec::InOut => "inout ",
        IoSpec::Input => "",
    };
    format!("{}{}{}", device, io, pretty_var(v))
}

impl fmt::Display for FuncSig {
    /// The declaration as the author wrote it, for generated-code comments.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(r) = self.ret.first() {
            write!(f, "{} = ", pretty_var(r))?;
        }
        if let Some(this) = &self.this {
            write!(f, "{}->{}.", this, self.class.as_deref().unwrap_or(""))?;
        }
        write!(
            f,
            "{}({});",
            self.callee,
            self.args
                .iter()
                .map(pretty_arg)
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}
