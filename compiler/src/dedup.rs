// dedup.rs — Signature interning and dispatch-id assignment
//
// Collects analyzed signatures in declaration order, folding statements with
// an identical canonical form into their first occurrence. Dispatch ids are
// 1-based and assigned per unique canonical form at first declaration;
// duplicates share their representative's id and are never code-generated.
//
// Preconditions: signatures are interned in declaration order, after analysis.
// Postconditions: `sigs()` yields unique representatives in first-seen order,
//                 each with a distinct 1-based id.
// Failure modes: none.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::FuncSig;

#[derive(Debug, Default)]
pub struct SigTable {
    sigs: Vec<FuncSig>,
    /// canonical form → index into `sigs`
    lookup: HashMap<String, usize>,
}

impl SigTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the next `intern` of `canon` will resolve to: the existing
    /// representative's id, or the next fresh id. Lets the caller stamp the
    /// statement (and print its stub) before handing it over.
    pub fn peek_id(&self, canon: &str) -> i32 {
        match self.lookup.get(canon) {
            Some(&idx) => self.sigs[idx].id,
            None => self.sigs.len() as i32 + 1,
        }
    }

    /// Intern one analyzed signature under its canonical form. A first
    /// occurrence becomes a representative; a repeat is absorbed into its
    /// representative's duplicate list.
    pub fn intern(&mut self, canon: String, sig: FuncSig) {
        match self.lookup.get(&canon) {
            Some(&idx) => self.sigs[idx].duplicates.push(sig),
            None => {
                self.lookup.insert(canon, self.sigs.len());
                self.sigs.push(sig);
            }
        }
    }

    /// Unique representatives in first-seen order.
    pub fn sigs(&self) -> &[FuncSig] {
        &self.sigs
    }

    pub fn is_empty(&self) -> bool {
        self.sigs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sigs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::canonical_signature;
    use crate::diag::Loc;

    fn sig(callee: &str, line: u32) -> FuncSig {
        let mut f = FuncSig::new(None, None, callee, Loc::new("t.mw", line));
        f.id = -1;
        f
    }

    fn intern_stamped(table: &mut SigTable, mut f: FuncSig) -> i32 {
        let canon = canonical_signature(&f);
        let id = table.peek_id(&canon);
        f.id = id;
        table.intern(canon, f);
        id
    }

    #[test]
    fn ids_are_one_based_and_dense_over_uniques() {
        let mut t = SigTable::new();
        assert_eq!(intern_stamped(&mut t, sig("a", 1)), 1);
        assert_eq!(intern_stamped(&mut t, sig("b", 2)), 2);
        assert_eq!(intern_stamped(&mut t, sig("c", 3)), 3);
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn duplicate_shares_representative_id() {
        let mut t = SigTable::new();
        assert_eq!(intern_stamped(&mut t, sig("a", 1)), 1);
        assert_eq!(intern_stamped(&mut t, sig("b", 2)), 2);
        // repeat of `a` resolves to id 1, not 3
        assert_eq!(intern_stamped(&mut t, sig("a", 7)), 1);
        assert_eq!(t.len(), 2);
        assert_eq!(t.sigs()[0].duplicates.len(), 1);
        assert_eq!(t.sigs()[0].duplicates[0].loc.line, 7);
        // next unique still takes the next dense id
        assert_eq!(intern_stamped(&mut t, sig("c", 8)), 3);
    }

    #[test]
    fn representatives_keep_first_seen_order() {
        let mut t = SigTable::new();
        intern_stamped(&mut t, sig("z", 1));
        intern_stamped(&mut t, sig("a", 2));
        intern_stamped(&mut t, sig("z", 3));
        let names: Vec<_> = t.sigs().iter().map(|s| s.callee.as_str()).collect();
        assert_eq!(names, ["z", "a"]);
    }
}
