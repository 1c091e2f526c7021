// analyze.rs — Semantic analysis for one function signature
//
// Assigns incoming/outgoing slot indices, classifies every variable into its
// marshaling category, validates return and argument use, and rewrites
// foreign-linkage (FORTRAN) scalar categories to their pass-by-address
// equivalents.
//
// Preconditions: `sig` was just parsed; base types are already
//                integer-promotion-rewritten; no variable is classified.
// Postconditions: every variable carries its slots and (when valid) exactly
//                 one category; violations are appended to `diags` with the
//                 statement's location. Analysis is best-effort and never
//                 aborts.
// Failure modes: none (all violations become diagnostics).
// Side effects: none beyond mutating `sig` and `diags`.

use crate::ast::{Category, FuncSig, TypeQual, Var};
use crate::diag::{codes, Diagnostic, Loc};
use crate::registry::Context;

/// Run full semantic analysis on one signature.
pub fn analyze(ctx: &Context, sig: &mut FuncSig, diags: &mut Vec<Diagnostic>) {
    label_slots(sig);
    let loc = sig.loc.clone();
    check_return(ctx, &mut sig.ret, &loc, diags);
    check_args(ctx, &mut sig.args, &loc, diags);
    foreignize(sig, diags);
}

// ── Slot labeling ───────────────────────────────────────────────────────────
//
// Incoming slots: bound object (0) first, then the return variable if it
// reads input, then arguments left to right; dimension expressions come
// last, return's dims first then each argument's, regardless of the owning
// array's own direction. Outgoing slots: return first, then output/inout
// arguments left to right.

fn label_slots(sig: &mut FuncSig) {
    let mut icount: i32 = if sig.this.is_some() { 1 } else { 0 };
    let mut ocount: i32 = 0;

    let mut label_vars = |vars: &mut [Var], icount: &mut i32, ocount: &mut i32| {
        for v in vars {
            if v.io.is_input() {
                v.input_slot = *icount;
                *icount += 1;
            }
            if v.io.is_output() {
                v.output_slot = *ocount;
                *ocount += 1;
            }
        }
    };
    label_vars(&mut sig.ret, &mut icount, &mut ocount);
    label_vars(&mut sig.args, &mut icount, &mut ocount);

    let mut label_dims = |vars: &mut [Var], icount: &mut i32| {
        for v in vars {
            if let Some(q) = &mut v.qual {
                for e in q.dims_mut() {
                    e.input_slot = *icount;
                    *icount += 1;
                }
            }
        }
    };
    label_dims(&mut sig.ret, &mut icount);
    label_dims(&mut sig.args, &mut icount);
}

// ── Classification ──────────────────────────────────────────────────────────

/// Lattice row for one type family: category per qualifier kind. `None`
/// marks an invalid cell.
struct LatticeRow {
    plain: Category,
    pointer: Category,
    reference: Category,
    array: Option<Category>,
    array_ref: Option<Category>,
}

const SCALAR_ROW: LatticeRow = LatticeRow {
    plain: Category::Scalar,
    pointer: Category::PScalar,
    reference: Category::RScalar,
    array: Some(Category::Array),
    array_ref: Some(Category::RArray),
};

const CSCALAR_ROW: LatticeRow = LatticeRow {
    plain: Category::CScalar,
    pointer: Category::PCScalar,
    reference: Category::RCScalar,
    array: Some(Category::CArray),
    array_ref: None,
};

const ZSCALAR_ROW: LatticeRow = LatticeRow {
    plain: Category::ZScalar,
    pointer: Category::PZScalar,
    reference: Category::RZScalar,
    array: Some(Category::ZArray),
    array_ref: None,
};

fn classify_lattice(v: &mut Var, row: &LatticeRow, loc: &Loc, diags: &mut Vec<Diagnostic>) {
    match &v.qual {
        None => v.category = Some(row.plain),
        Some(TypeQual::Pointer) => v.category = Some(row.pointer),
        Some(TypeQual::Ref) => v.category = Some(row.reference),
        Some(TypeQual::Array(dims)) => {
            v.category = row.array;
            if dims.len() > 2 {
                diags.push(
                    Diagnostic::error(loc.clone(), format!("Array {} should be 1D or 2D", v.name))
                        .with_code(codes::E0201),
                );
            }
        }
        Some(TypeQual::ArrayRef(dims)) => {
            v.category = row.array_ref;
            if row.array_ref.is_none() {
                diags.push(
                    Diagnostic::error(
                        loc.clone(),
                        format!("Array ref {} must be to a real array", v.name),
                    )
                    .with_code(codes::E0202),
                );
            }
            if dims.len() > 2 {
                diags.push(
                    Diagnostic::error(loc.clone(), format!("Array {} should be 1D or 2D", v.name))
                        .with_code(codes::E0201),
                );
            }
        }
    }
}

/// Classify one variable. A pure function of the registry state at the time
/// of the owning statement and the variable's qualifier; idempotent for an
/// unchanged registry.
pub fn classify(ctx: &Context, v: &mut Var, loc: &Loc, diags: &mut Vec<Diagnostic>) {
    let bt = v.basetype.as_str();

    if ctx.is_scalar_type(bt) {
        classify_lattice(v, &SCALAR_ROW, loc, diags);
    } else if ctx.is_cscalar_type(bt) {
        classify_lattice(v, &CSCALAR_ROW, loc, diags);
    } else if ctx.is_zscalar_type(bt) {
        classify_lattice(v, &ZSCALAR_ROW, loc, diags);
    } else if bt == "const" {
        if v.qual.is_some() {
            diags.push(
                Diagnostic::error(
                    loc.clone(),
                    format!("Constant {} cannot have modifiers", v.name),
                )
                .with_code(codes::E0203),
            );
            return;
        }
        v.category = Some(Category::Const);
        // Quoted constants bake in their unquoted text.
        if v.name.starts_with('\'') {
            v.name = v.name.replace('\'', "");
        }
    } else if bt == "cstring" {
        match &v.qual {
            Some(TypeQual::Array(dims)) if dims.len() > 1 => {
                diags.push(
                    Diagnostic::error(loc.clone(), "Strings are one dimensional")
                        .with_code(codes::E0204),
                );
                return;
            }
            Some(TypeQual::Array(_)) | None => {}
            Some(_) => {
                diags.push(
                    Diagnostic::error(
                        loc.clone(),
                        format!("String type {} cannot have modifiers", v.name),
                    )
                    .with_code(codes::E0204),
                );
                return;
            }
        }
        v.category = Some(Category::CString);
    } else if bt == "mxArray" {
        if v.qual.is_some() {
            diags.push(
                Diagnostic::error(
                    loc.clone(),
                    format!("mxArray {} cannot have modifiers", v.name),
                )
                .with_code(codes::E0205),
            );
            return;
        }
        v.category = Some(Category::Mx);
    } else {
        // Anything unregistered is an opaque handle type.
        match &v.qual {
            None => v.category = Some(Category::Obj),
            Some(TypeQual::Pointer) => v.category = Some(Category::PObj),
            Some(TypeQual::Ref) => v.category = Some(Category::RObj),
            Some(TypeQual::Array(_)) | Some(TypeQual::ArrayRef(_)) => {
                diags.push(
                    Diagnostic::error(
                        loc.clone(),
                        format!("{} cannot be an array of object {}", v.name, bt),
                    )
                    .with_code(codes::E0206),
                );
            }
        }
    }
}

// ── Return validation ───────────────────────────────────────────────────────

fn check_return(ctx: &Context, ret: &mut [Var], loc: &Loc, diags: &mut Vec<Diagnostic>) {
    let Some(v) = ret.first_mut() else {
        return;
    };
    classify(ctx, v, loc, diags);

    match v.category {
        Some(Category::Array | Category::CArray | Category::ZArray) => {
            if v.dims().is_empty() {
                diags.push(
                    Diagnostic::error(loc.clone(), format!("Return array {} must have dims", v.name))
                        .with_code(codes::E0301),
                );
            }
        }
        Some(Category::Const) => {
            diags.push(
                Diagnostic::error(loc.clone(), "Cannot return constant").with_code(codes::E0302),
            );
        }
        Some(Category::RArray) => {
            diags.push(
                Diagnostic::error(
                    loc.clone(),
                    format!("Ref to array {} looks just like array on return", v.name),
                )
                .with_code(codes::E0303),
            );
        }
        Some(Category::CString) if v.qual.is_some() => {
            diags.push(
                Diagnostic::error(
                    loc.clone(),
                    format!("Return string {} cannot have dims", v.name),
                )
                .with_code(codes::E0304),
            );
        }
        _ => {}
    }
}

// ── Argument validation ─────────────────────────────────────────────────────

fn check_args(ctx: &Context, args: &mut [Var], loc: &Loc, diags: &mut Vec<Diagnostic>) {
    for v in args {
        classify(ctx, v, loc, diags);

        if v.io.is_input_only() {
            continue;
        }

        // Output / inout checks. A numeric literal in name position can
        // never receive a result.
        if v.name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            diags.push(
                Diagnostic::error(loc.clone(), format!("Number {} cannot be output", v.name))
                    .with_code(codes::E0401),
            );
        }

        match v.category {
            Some(c) if c.is_obj() && !ctx.is_mxarray_type(&v.basetype) => {
                diags.push(
                    Diagnostic::error(loc.clone(), format!("Object {} cannot be output", v.name))
                        .with_code(codes::E0402),
                );
            }
            Some(c)
                if (c.is_array() || c == Category::RArray)
                    && v.io == crate::ast::IoSpec::Output
                    && v.dims().is_empty() =>
            {
                diags.push(
                    Diagnostic::error(
                        loc.clone(),
                        format!("Output array {} must have dims", v.name),
                    )
                    .with_code(codes::E0403),
                );
            }
            Some(Category::RArray) if !v.io.is_output() => {
                diags.push(
                    Diagnostic::error(
                        loc.clone(),
                        format!("Array ref {} *must* be output", v.name),
                    )
                    .with_code(codes::E0404),
                );
            }
            Some(Category::Scalar) => {
                diags.push(
                    Diagnostic::error(loc.clone(), format!("Scalar {} cannot be output", v.name))
                        .with_code(codes::E0405),
                );
            }
            Some(Category::Const) => {
                diags.push(
                    Diagnostic::error(loc.clone(), format!("Constant {} cannot be output", v.name))
                        .with_code(codes::E0406),
                );
            }
            Some(Category::CString) if v.dims().is_empty() => {
                diags.push(
                    Diagnostic::error(
                        loc.clone(),
                        format!("String {} cannot be output without size", v.name),
                    )
                    .with_code(codes::E0407),
                );
            }
            Some(Category::Mx) if v.io == crate::ast::IoSpec::InOut => {
                diags.push(
                    Diagnostic::error(
                        loc.clone(),
                        format!("mxArray {} cannot be used for inout", v.name),
                    )
                    .with_code(codes::E0408),
                );
            }
            _ => {}
        }
    }
}

// ── Foreign-linkage rewriting ───────────────────────────────────────────────
//
// FORTRAN linkage passes every scalar by address: plain and reference
// scalar/complex categories rewrite to their pointer equivalents, so no
// separate foreign-linkage category exists downstream.

fn foreignize(sig: &mut FuncSig, diags: &mut Vec<Diagnostic>) {
    if !sig.fortran {
        return;
    }
    let loc = sig.loc.clone();

    for v in &mut sig.args {
        match v.category {
            Some(c) if c.is_obj() => {
                diags.push(
                    Diagnostic::error(
                        loc.clone(),
                        format!("Cannot pass object {} to FORTRAN", v.name),
                    )
                    .with_code(codes::E0501),
                );
            }
            Some(Category::RArray) => {
                diags.push(
                    Diagnostic::error(
                        loc.clone(),
                        format!("Cannot pass pointer ref {} to FORTRAN", v.name),
                    )
                    .with_code(codes::E0502),
                );
            }
            Some(Category::CString) => {
                diags.push(
                    Diagnostic::warning(
                        loc.clone(),
                        format!("Danger passing C string {} to FORTRAN", v.name),
                    )
                    .with_code(codes::W0301),
                );
            }
            Some(Category::Scalar | Category::RScalar) => v.category = Some(Category::PScalar),
            Some(Category::CScalar | Category::RCScalar) => v.category = Some(Category::PCScalar),
            Some(Category::ZScalar | Category::RZScalar) => v.category = Some(Category::PZScalar),
            _ => {}
        }
    }

    if let Some(v) = sig.ret.first() {
        match v.category {
            Some(Category::CScalar | Category::ZScalar) => {
                diags.push(
                    Diagnostic::warning(loc.clone(), "Danger returning complex from FORTRAN")
                        .with_code(codes::W0302),
                );
            }
            Some(Category::Scalar) => {}
            _ => {
                diags.push(
                    Diagnostic::error(loc.clone(), "Can only return scalars from FORTRAN")
                        .with_code(codes::E0503),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Device, DimExpr, IoSpec};
    use crate::diag::error_count;

    fn loc() -> Loc {
        Loc::new("t.mw", 1)
    }

    fn sig(callee: &str) -> FuncSig {
        FuncSig::new(None, None, callee, loc())
    }

    fn var(io: IoSpec, basetype: &str, qual: Option<TypeQual>, name: &str) -> Var {
        Var::new(Device::Cpu, io, basetype, qual, name)
    }

    fn arr(dims: &[&str]) -> Option<TypeQual> {
        Some(TypeQual::Array(dims.iter().map(|d| DimExpr::new(*d)).collect()))
    }

    // ── Classification lattice ──

    #[test]
    fn lattice_scalar_family() {
        let ctx = Context::new();
        let mut diags = Vec::new();
        let cases = [
            (None, Category::Scalar),
            (Some(TypeQual::Pointer), Category::PScalar),
            (Some(TypeQual::Ref), Category::RScalar),
            (arr(&["m", "n"]).unwrap().into(), Category::Array),
        ];
        for (qual, want) in cases {
            let mut v = var(IoSpec::Input, "double", qual, "x");
            classify(&ctx, &mut v, &loc(), &mut diags);
            assert_eq!(v.category, Some(want));
        }
        assert!(diags.is_empty());
    }

    #[test]
    fn lattice_distinct_categories_never_coincide() {
        let ctx = Context::new();
        let mut diags = Vec::new();
        let mut plain = var(IoSpec::Input, "int", None, "x");
        let mut ptr = var(IoSpec::Input, "int", Some(TypeQual::Pointer), "x");
        let mut two_d = var(IoSpec::Input, "int", arr(&["m", "n"]), "x");
        classify(&ctx, &mut plain, &loc(), &mut diags);
        classify(&ctx, &mut ptr, &loc(), &mut diags);
        classify(&ctx, &mut two_d, &loc(), &mut diags);
        assert_eq!(plain.category, Some(Category::Scalar));
        assert_eq!(ptr.category, Some(Category::PScalar));
        assert_eq!(two_d.category, Some(Category::Array));
        assert_ne!(plain.category, ptr.category);
        assert_ne!(ptr.category, two_d.category);
    }

    #[test]
    fn classification_is_idempotent() {
        let ctx = Context::new();
        let mut diags = Vec::new();
        let mut v = var(IoSpec::Input, "float", Some(TypeQual::Ref), "x");
        classify(&ctx, &mut v, &loc(), &mut diags);
        let first = v.category;
        classify(&ctx, &mut v, &loc(), &mut diags);
        assert_eq!(v.category, first);
        assert!(diags.is_empty());
    }

    #[test]
    fn complex_families_classify_by_registry() {
        let mut ctx = Context::new();
        ctx.add_zscalar_type("dcomplex");
        ctx.add_cscalar_type("fcomplex");
        let mut diags = Vec::new();

        let mut z = var(IoSpec::Input, "dcomplex", arr(&["n"]), "z");
        classify(&ctx, &mut z, &loc(), &mut diags);
        assert_eq!(z.category, Some(Category::ZArray));

        let mut c = var(IoSpec::Input, "fcomplex", None, "c");
        classify(&ctx, &mut c, &loc(), &mut diags);
        assert_eq!(c.category, Some(Category::CScalar));
        assert!(diags.is_empty());
    }

    #[test]
    fn unregistered_type_is_handle() {
        let ctx = Context::new();
        let mut diags = Vec::new();
        let mut v = var(IoSpec::Input, "Mesh", None, "m");
        classify(&ctx, &mut v, &loc(), &mut diags);
        assert_eq!(v.category, Some(Category::Obj));

        let mut p = var(IoSpec::Input, "Mesh", Some(TypeQual::Pointer), "m");
        classify(&ctx, &mut p, &loc(), &mut diags);
        assert_eq!(p.category, Some(Category::PObj));
        assert!(diags.is_empty());
    }

    #[test]
    fn handle_array_rejected() {
        let ctx = Context::new();
        let mut diags = Vec::new();
        let mut v = var(IoSpec::Input, "Mesh", arr(&["n"]), "m");
        classify(&ctx, &mut v, &loc(), &mut diags);
        assert_eq!(v.category, None);
        assert_eq!(error_count(&diags), 1);
    }

    #[test]
    fn three_d_array_rejected() {
        let ctx = Context::new();
        let mut diags = Vec::new();
        let mut v = var(IoSpec::Input, "double", arr(&["a", "b", "c"]), "x");
        classify(&ctx, &mut v, &loc(), &mut diags);
        assert_eq!(error_count(&diags), 1);
    }

    #[test]
    fn complex_array_alias_rejected() {
        let mut ctx = Context::new();
        ctx.add_zscalar_type("dcomplex");
        let mut diags = Vec::new();
        let mut v = var(
            IoSpec::Output,
            "dcomplex",
            Some(TypeQual::ArrayRef(vec![DimExpr::new("n")])),
            "z",
        );
        classify(&ctx, &mut v, &loc(), &mut diags);
        assert_eq!(v.category, None);
        assert_eq!(error_count(&diags), 1);
    }

    #[test]
    fn quoted_constant_drops_quotes() {
        let ctx = Context::new();
        let mut diags = Vec::new();
        let mut v = var(IoSpec::Input, "const", None, "'mode'");
        classify(&ctx, &mut v, &loc(), &mut diags);
        assert_eq!(v.category, Some(Category::Const));
        assert_eq!(v.name, "mode");
    }

    // ── Slot labeling ──

    #[test]
    fn slot_order_bound_object_return_args_then_dims() {
        // double y[n] = h->Mesh.eval(int n, output double z[n])
        let mut f = FuncSig::new(Some("h".into()), Some("Mesh".into()), "eval", loc());
        f.ret
            .push(var(IoSpec::Output, "double", arr(&["n"]), "y"));
        f.args.push(var(IoSpec::Input, "int", None, "n"));
        f.args.push(var(IoSpec::Output, "double", arr(&["n"]), "z"));
        label_slots(&mut f);

        // slot 0 reserved for the bound object; n takes 1
        assert_eq!(f.args[0].input_slot, 1);
        // dims: return's first, then arguments', after all variable inputs
        assert_eq!(f.ret[0].dims()[0].input_slot, 2);
        assert_eq!(f.args[1].dims()[0].input_slot, 3);
        // outputs: return before output args
        assert_eq!(f.ret[0].output_slot, 0);
        assert_eq!(f.args[1].output_slot, 1);
        // direction invariants
        assert_eq!(f.ret[0].input_slot, -1);
        assert_eq!(f.args[0].output_slot, -1);
    }

    #[test]
    fn inout_takes_both_slots() {
        let mut f = sig("f");
        f.args.push(var(IoSpec::InOut, "double", arr(&[]), "x"));
        label_slots(&mut f);
        assert!(f.args[0].input_slot >= 0);
        assert!(f.args[0].output_slot >= 0);
    }

    // ── Validation ──

    #[test]
    fn return_array_requires_dims() {
        let ctx = Context::new();
        let mut f = sig("f");
        f.ret.push(var(IoSpec::Output, "double", arr(&[]), "y"));
        let mut diags = Vec::new();
        analyze(&ctx, &mut f, &mut diags);
        assert_eq!(error_count(&diags), 1);
    }

    #[test]
    fn output_array_without_dims_rejected_but_classified() {
        let ctx = Context::new();
        let mut f = sig("f");
        f.args.push(var(IoSpec::Output, "double", arr(&[]), "x"));
        let mut diags = Vec::new();
        analyze(&ctx, &mut f, &mut diags);
        assert_eq!(error_count(&diags), 1);
        // Signature is retained with its category; codegen skips allocation.
        assert_eq!(f.args[0].category, Some(Category::Array));
    }

    #[test]
    fn plain_scalar_output_rejected() {
        let ctx = Context::new();
        let mut f = sig("f");
        f.args.push(var(IoSpec::Output, "double", None, "x"));
        let mut diags = Vec::new();
        analyze(&ctx, &mut f, &mut diags);
        assert_eq!(error_count(&diags), 1);
    }

    #[test]
    fn inout_array_without_dims_allowed() {
        let ctx = Context::new();
        let mut f = sig("f");
        f.args.push(var(IoSpec::InOut, "double", arr(&[]), "x"));
        let mut diags = Vec::new();
        analyze(&ctx, &mut f, &mut diags);
        assert_eq!(error_count(&diags), 0);
    }

    #[test]
    fn handle_output_requires_mxarray_registration() {
        let mut ctx = Context::new();
        let mut f = sig("f");
        f.args.push(var(IoSpec::Output, "Mesh", None, "m"));
        let mut diags = Vec::new();
        analyze(&ctx, &mut f, &mut diags);
        assert_eq!(error_count(&diags), 1);

        ctx.add_mxarray_type("Mesh");
        let mut f2 = sig("f");
        f2.args.push(var(IoSpec::Output, "Mesh", None, "m"));
        let mut diags2 = Vec::new();
        analyze(&ctx, &mut f2, &mut diags2);
        assert_eq!(error_count(&diags2), 0);
    }

    #[test]
    fn mx_inout_rejected() {
        let ctx = Context::new();
        let mut f = sig("f");
        f.args.push(var(IoSpec::InOut, "mxArray", None, "a"));
        let mut diags = Vec::new();
        analyze(&ctx, &mut f, &mut diags);
        assert_eq!(error_count(&diags), 1);
    }

    #[test]
    fn unsized_string_output_rejected() {
        let ctx = Context::new();
        let mut f = sig("f");
        f.args.push(var(IoSpec::Output, "cstring", None, "s"));
        let mut diags = Vec::new();
        analyze(&ctx, &mut f, &mut diags);
        assert_eq!(error_count(&diags), 1);
    }

    #[test]
    fn sized_string_output_allowed() {
        let ctx = Context::new();
        let mut f = sig("f");
        f.args.push(var(IoSpec::Output, "cstring", arr(&["128"]), "s"));
        let mut diags = Vec::new();
        analyze(&ctx, &mut f, &mut diags);
        assert_eq!(error_count(&diags), 0);
    }

    // ── Foreign linkage ──

    #[test]
    fn fortran_rewrites_scalars_to_pointer_categories() {
        let ctx = Context::new();
        let mut f = sig("dgemm");
        f.fortran = true;
        f.args.push(var(IoSpec::Input, "double", None, "alpha"));
        f.args.push(var(IoSpec::Input, "double", Some(TypeQual::Ref), "beta"));
        let mut diags = Vec::new();
        analyze(&ctx, &mut f, &mut diags);
        assert_eq!(f.args[0].category, Some(Category::PScalar));
        assert_eq!(f.args[1].category, Some(Category::PScalar));
        assert_eq!(error_count(&diags), 0);
    }

    #[test]
    fn fortran_rejects_handles_and_nonscalar_returns() {
        let ctx = Context::new();
        let mut f = sig("fsub");
        f.fortran = true;
        f.args.push(var(IoSpec::Input, "Mesh", None, "m"));
        f.ret.push(var(IoSpec::Output, "double", arr(&["n"]), "y"));
        let mut diags = Vec::new();
        analyze(&ctx, &mut f, &mut diags);
        // handle arg + non-scalar return
        assert_eq!(error_count(&diags), 2);
    }

    #[test]
    fn fortran_complex_return_is_warning_only() {
        let mut ctx = Context::new();
        ctx.add_zscalar_type("dcomplex");
        let mut f = sig("zdot");
        f.fortran = true;
        f.ret.push(var(IoSpec::Output, "dcomplex", None, "z"));
        let mut diags = Vec::new();
        analyze(&ctx, &mut f, &mut diags);
        assert_eq!(error_count(&diags), 0);
        assert_eq!(diags.len(), 1);
    }
}
