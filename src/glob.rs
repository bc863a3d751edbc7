//! Glob pattern semantics shared by branch admission and protected-path checks (§4.5).
//!
//! `*` matches one path segment, `**` matches across segments, matching is
//! case-sensitive and anchored to the whole string. A protected-path pattern
//! with a trailing `/` additionally matches the bare directory name and is
//! treated as `<name>/**`.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Compiles one pattern with `*` confined to a single path segment — globset's
/// default (`literal_separator = false`) treats `*` the same as `**`, which
/// would let e.g. `agent/*` admit `agent/foo/bar`.
fn compile(pattern: &str) -> Option<globset::Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .ok()
}

pub struct PatternSet {
    patterns: Vec<String>,
    set: GlobSet,
}

impl PatternSet {
    /// Compiles branch-name patterns: matched verbatim against the stripped branch name.
    pub fn branches(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        for p in patterns {
            if let Some(g) = compile(p) {
                builder.add(g);
            }
        }
        PatternSet {
            patterns: patterns.to_vec(),
            set: builder.build().unwrap_or_else(|_| GlobSet::empty()),
        }
    }

    /// Compiles protected-path patterns, applying the trailing-slash normalization:
    /// `foo/` matches both the bare path `foo` and anything under it (`foo/**`).
    pub fn protected_paths(patterns: &[String]) -> Self {
        let mut builder = GlobSetBuilder::new();
        for p in patterns {
            if let Some(dir) = p.strip_suffix('/') {
                if let Some(g) = compile(dir) {
                    builder.add(g);
                }
                if let Some(g) = compile(&format!("{dir}/**")) {
                    builder.add(g);
                }
            } else if let Some(g) = compile(p) {
                builder.add(g);
            }
        }
        PatternSet {
            patterns: patterns.to_vec(),
            set: builder.build().unwrap_or_else(|_| GlobSet::empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        self.set.is_match(candidate)
    }

    /// Joined for display in rejection messages, in configured order.
    pub fn joined(&self) -> String {
        self.patterns.join(", ")
    }
}
