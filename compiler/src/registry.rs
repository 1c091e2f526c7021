// registry.rs — Per-run compilation context
//
// Holds the declaration-order-sensitive type registries (which names are
// numeric scalars, complex scalars, native-array-compatible handles), the
// class inheritance map, extended-integer usage flags, and the global
// switches. One value per run, threaded by reference through the parser,
// analyzer, and generator; there is no implicit singleton.

use std::collections::{BTreeMap, BTreeSet};

// ── Switches ────────────────────────────────────────────────────────────────

/// How complex values are encoded in generated glue code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComplexFlavor {
    /// No complex typedefs emitted; complex declarations are the author's
    /// responsibility.
    #[default]
    None,
    /// C99 `_Complex` encoding.
    C99,
    /// C++ `std::complex` encoding.
    Cpp,
}

/// Integer promotion policy level (0 = none, 4 = widest).
///
/// Levels rewrite declared `int`/`long`/`uint`/`ulong` base types to wider or
/// fixed-width equivalents before any classification happens:
///   1: int→long, uint→ulong
///   2: level 1 plus long→long, ulong→ulong (flags only)
///   3: int,long→int32_t; uint,ulong→uint64_t
///   4: int,long→int64_t; uint,ulong→uint64_t
pub type PromoteLevel = u8;

/// Per-type usage flags. A flag set means the glue file must instantiate
/// conversion support for that type; unused types emit no support code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeUsage {
    pub int32_t: bool,
    pub int64_t: bool,
    pub uint32_t: bool,
    pub uint64_t: bool,
    pub ulong: bool,
    pub uint: bool,
    pub ushort: bool,
    pub uchar: bool,
}

impl TypeUsage {
    /// Any fixed-width integer in use (gates the `<stdint.h>` include).
    pub fn any_stdint(&self) -> bool {
        self.int32_t || self.int64_t || self.uint32_t || self.uint64_t
    }

    /// Whether the copier set for `name` must be emitted. Types outside the
    /// gated set are always emitted.
    pub fn wants(&self, name: &str) -> bool {
        match name {
            "int32_t" => self.int32_t,
            "int64_t" => self.int64_t,
            "uint32_t" => self.uint32_t,
            "uint64_t" => self.uint64_t,
            "ulong" => self.ulong,
            "uint" => self.uint,
            "ushort" => self.ushort,
            "uchar" => self.uchar,
            _ => true,
        }
    }
}

// ── Context ─────────────────────────────────────────────────────────────────

/// Base numeric primitives seeded into every run.
const BASE_SCALAR_TYPES: &[&str] = &[
    "double", "float", "long", "int", "short", "char", "ulong", "uint", "ushort", "uchar",
    "int32_t", "int64_t", "uint32_t", "uint64_t", "bool", "size_t", "ptrdiff_t",
];

/// All mutable per-run state: type registries, inheritance, usage, switches.
#[derive(Debug, Clone)]
pub struct Context {
    pub use_gpu: bool,
    pub generate_catch: bool,
    pub complex_flavor: ComplexFlavor,
    pub promote_level: PromoteLevel,
    pub usage: TypeUsage,

    scalar_types: BTreeSet<String>,
    cscalar_types: BTreeSet<String>,
    zscalar_types: BTreeSet<String>,
    mxarray_types: BTreeSet<String>,
    /// Class name → registered subclasses, most recently declared first.
    subclasses: BTreeMap<String, Vec<String>>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        let mut ctx = Self {
            use_gpu: false,
            generate_catch: false,
            complex_flavor: ComplexFlavor::None,
            promote_level: 0,
            usage: TypeUsage::default(),
            scalar_types: BTreeSet::new(),
            cscalar_types: BTreeSet::new(),
            zscalar_types: BTreeSet::new(),
            mxarray_types: BTreeSet::new(),
            subclasses: BTreeMap::new(),
        };
        ctx.seed_scalar_types();
        ctx
    }

    /// (Re)seed the numeric-scalar registry with the fixed primitive set.
    pub fn seed_scalar_types(&mut self) {
        self.scalar_types.clear();
        for t in BASE_SCALAR_TYPES {
            self.scalar_types.insert((*t).to_string());
        }
    }

    // ── Registry queries ──

    pub fn is_scalar_type(&self, name: &str) -> bool {
        self.scalar_types.contains(name)
    }

    pub fn is_cscalar_type(&self, name: &str) -> bool {
        self.cscalar_types.contains(name)
    }

    pub fn is_zscalar_type(&self, name: &str) -> bool {
        self.zscalar_types.contains(name)
    }

    /// Handle types registered as native-array-compatible: they may be
    /// outputs and carry their own wrap/alloc/free helpers.
    pub fn is_mxarray_type(&self, name: &str) -> bool {
        self.mxarray_types.contains(name)
    }

    // ── Registry mutation (typedef statements) ──

    pub fn add_scalar_type(&mut self, name: impl Into<String>) {
        self.scalar_types.insert(name.into());
    }

    pub fn add_cscalar_type(&mut self, name: impl Into<String>) {
        self.cscalar_types.insert(name.into());
    }

    pub fn add_zscalar_type(&mut self, name: impl Into<String>) {
        self.zscalar_types.insert(name.into());
    }

    pub fn add_mxarray_type(&mut self, name: impl Into<String>) {
        self.mxarray_types.insert(name.into());
    }

    /// Register `child` as a subclass of each parent. Later declarations are
    /// tried first by the generated casting getters.
    pub fn register_inherits(&mut self, child: &str, parents: &[String]) {
        for parent in parents {
            self.subclasses
                .entry(parent.clone())
                .or_default()
                .insert(0, child.to_string());
        }
    }

    /// Subclasses of `name`, most recently declared first. `None` when the
    /// class has no registered children.
    pub fn subclasses_of(&self, name: &str) -> Option<&[String]> {
        self.subclasses.get(name).map(Vec::as_slice)
    }

    /// Classes with registered subclasses, in sorted order.
    pub fn classes_with_subclasses(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.subclasses
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Sorted scalar / complex registries, for deterministic emission.
    pub fn scalar_types(&self) -> impl Iterator<Item = &str> {
        self.scalar_types.iter().map(String::as_str)
    }

    pub fn cscalar_types(&self) -> impl Iterator<Item = &str> {
        self.cscalar_types.iter().map(String::as_str)
    }

    pub fn zscalar_types(&self) -> impl Iterator<Item = &str> {
        self.zscalar_types.iter().map(String::as_str)
    }

    // ── Integer promotion ──

    /// Record usage of `name` and apply the promotion policy, returning the
    /// base type the rest of the run sees. Called on every declared base
    /// type as it is parsed, so usage accumulates across statements.
    pub fn promote_int(&mut self, name: &str) -> String {
        match name {
            "int32_t" => self.usage.int32_t = true,
            "int64_t" => self.usage.int64_t = true,
            "uint32_t" => self.usage.uint32_t = true,
            "uint64_t" => self.usage.uint64_t = true,
            "ulong" => self.usage.ulong = true,
            "uint" => self.usage.uint = true,
            "ushort" => self.usage.ushort = true,
            "uchar" => self.usage.uchar = true,
            _ => {}
        }

        match self.promote_level {
            1 => {
                if name == "uint" {
                    self.usage.ulong = true;
                }
                match name {
                    "int" => "long".into(),
                    "uint" => "ulong".into(),
                    _ => name.into(),
                }
            }
            2 => {
                if name == "uint" || name == "ulong" {
                    self.usage.ulong = true;
                }
                match name {
                    "int" | "long" => "long".into(),
                    "uint" | "ulong" => "ulong".into(),
                    _ => name.into(),
                }
            }
            3 => {
                match name {
                    "int" => self.usage.int32_t = true,
                    "long" => self.usage.int64_t = true,
                    "uint" => self.usage.uint32_t = true,
                    "ulong" => self.usage.uint64_t = true,
                    _ => {}
                }
                match name {
                    "int" | "long" => "int32_t".into(),
                    "uint" | "ulong" => "uint64_t".into(),
                    _ => name.into(),
                }
            }
            4 => {
                match name {
                    "int" | "long" => self.usage.int64_t = true,
                    "uint" | "ulong" => self.usage.uint64_t = true,
                    _ => {}
                }
                match name {
                    "int" | "long" => "int64_t".into(),
                    "uint" | "ulong" => "uint64_t".into(),
                    _ => name.into(),
                }
            }
            _ => name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_primitives_are_scalar() {
        let ctx = Context::new();
        for t in ["double", "float", "int", "uint64_t", "bool", "ptrdiff_t"] {
            assert!(ctx.is_scalar_type(t), "{t} should be seeded");
        }
        assert!(!ctx.is_scalar_type("dcomplex"));
        assert!(!ctx.is_scalar_type("Mesh"));
    }

    #[test]
    fn typedef_registration() {
        let mut ctx = Context::new();
        ctx.add_scalar_type("myint");
        ctx.add_zscalar_type("dcomplex");
        ctx.add_cscalar_type("fcomplex");
        ctx.add_mxarray_type("Tensor");
        assert!(ctx.is_scalar_type("myint"));
        assert!(ctx.is_zscalar_type("dcomplex"));
        assert!(ctx.is_cscalar_type("fcomplex"));
        assert!(ctx.is_mxarray_type("Tensor"));
    }

    #[test]
    fn promote_level_0_only_flags_usage() {
        let mut ctx = Context::new();
        assert_eq!(ctx.promote_int("int"), "int");
        assert_eq!(ctx.promote_int("uint32_t"), "uint32_t");
        assert!(ctx.usage.uint32_t);
        assert!(!ctx.usage.int32_t);
    }

    #[test]
    fn promote_level_1() {
        let mut ctx = Context::new();
        ctx.promote_level = 1;
        assert_eq!(ctx.promote_int("int"), "long");
        assert_eq!(ctx.promote_int("uint"), "ulong");
        assert_eq!(ctx.promote_int("long"), "long");
        assert!(ctx.usage.ulong);
    }

    #[test]
    fn promote_level_3_widens_to_fixed_width() {
        let mut ctx = Context::new();
        ctx.promote_level = 3;
        assert_eq!(ctx.promote_int("int"), "int32_t");
        assert_eq!(ctx.promote_int("long"), "int32_t");
        assert_eq!(ctx.promote_int("uint"), "uint64_t");
        assert!(ctx.usage.int32_t);
        assert!(ctx.usage.int64_t);
        assert!(ctx.usage.uint32_t);
    }

    #[test]
    fn promote_level_4_widens_to_64() {
        let mut ctx = Context::new();
        ctx.promote_level = 4;
        assert_eq!(ctx.promote_int("int"), "int64_t");
        assert_eq!(ctx.promote_int("ulong"), "uint64_t");
        assert!(ctx.usage.int64_t);
        assert!(ctx.usage.uint64_t);
    }

    #[test]
    fn inherits_most_recent_first() {
        let mut ctx = Context::new();
        ctx.register_inherits("Tri", &["Shape".to_string()]);
        ctx.register_inherits("Quad", &["Shape".to_string()]);
        assert_eq!(
            ctx.subclasses_of("Shape").unwrap(),
            &["Quad".to_string(), "Tri".to_string()]
        );
        assert!(ctx.subclasses_of("Tri").is_none());
    }

    #[test]
    fn usage_gating() {
        let mut ctx = Context::new();
        assert!(ctx.usage.wants("double"));
        assert!(!ctx.usage.wants("uchar"));
        ctx.promote_int("uchar");
        assert!(ctx.usage.wants("uchar"));
        assert!(!ctx.usage.any_stdint());
        ctx.promote_int("int64_t");
        assert!(ctx.usage.any_stdint());
    }
}
