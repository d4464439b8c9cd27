use rustc_hash::FxHashMap;

/// The kinds of SQL identifiers the translator mints.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AliasKind {
    /// A quad-table scan.
    Quad,
    /// A term-table join on the subject id.
    SubjectTerm,
    /// A term-table join on the predicate id.
    PredicateTerm,
    /// A term-table join on the object id.
    ObjectTerm,
    /// A term-table join on the context (graph) id.
    GraphTerm,
    /// A term-table join resolving an object literal's datatype id.
    ObjectDatatype,
    /// A derived table wrapping a nested SELECT.
    Subquery,
    /// A generic join operand.
    Join,
    /// A derived table combining UNION branches.
    Union,
    /// A property-path derived table.
    Path,
    /// A recursive CTE backing a property path.
    PathCte,
}

impl AliasKind {
    fn stem(self) -> &'static str {
        match self {
            AliasKind::Quad => "quad",
            AliasKind::SubjectTerm => "s_term",
            AliasKind::PredicateTerm => "p_term",
            AliasKind::ObjectTerm => "o_term",
            AliasKind::GraphTerm => "g_term",
            AliasKind::ObjectDatatype => "o_dt",
            AliasKind::Subquery => "subquery",
            AliasKind::Join => "join",
            AliasKind::Union => "union",
            AliasKind::Path => "path",
            AliasKind::PathCte => "path_cte",
        }
    }
}

/// Mints collision-free SQL identifiers.
///
/// Counters are per kind and never decrement. A [child](Self::child)
/// generator carries an additional prefix, so identifiers minted by two
/// sibling children can never collide with each other or with the parent.
/// Translator subroutines that build SQL for the operands of a binary
/// pattern must each work with a freshly derived child.
#[derive(Debug, Default)]
pub struct AliasGenerator {
    prefix: String,
    counters: FxHashMap<AliasKind, usize>,
    children: usize,
}

impl AliasGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints the next identifier of the given kind.
    pub fn next(&mut self, kind: AliasKind) -> String {
        let counter = self.counters.entry(kind).or_insert(0);
        let alias = format!("{}{}_{}", self.prefix, kind.stem(), *counter);
        *counter += 1;
        alias
    }

    /// Derives a generator for an independent alias space.
    pub fn child(&mut self) -> AliasGenerator {
        let prefix = format!("{}s{}_", self.prefix, self.children);
        self.children += 1;
        AliasGenerator {
            prefix,
            counters: FxHashMap::default(),
            children: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_per_kind() {
        let mut aliases = AliasGenerator::new();
        assert_eq!(aliases.next(AliasKind::Quad), "quad_0");
        assert_eq!(aliases.next(AliasKind::Quad), "quad_1");
        assert_eq!(aliases.next(AliasKind::SubjectTerm), "s_term_0");
        assert_eq!(aliases.next(AliasKind::Quad), "quad_2");
    }

    #[test]
    fn sibling_children_cannot_collide() {
        let mut parent = AliasGenerator::new();
        let mut left = parent.child();
        let mut right = parent.child();
        let l: Vec<_> = (0..4).map(|_| left.next(AliasKind::Quad)).collect();
        let r: Vec<_> = (0..4).map(|_| right.next(AliasKind::Quad)).collect();
        assert!(l.iter().all(|a| !r.contains(a)));
        assert!(!l.contains(&parent.next(AliasKind::Quad)));
    }

    #[test]
    fn nested_children_stay_prefixed() {
        let mut parent = AliasGenerator::new();
        let mut child = parent.child();
        let mut grandchild = child.child();
        assert_eq!(grandchild.next(AliasKind::Union), "s0_s0_union_0");
        assert_eq!(child.next(AliasKind::Union), "s0_union_0");
    }
}
