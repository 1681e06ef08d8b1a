//! Include/exclude glob compilation for the filesystem walk.

use std::path::Path;

use globset::{Glob, GlobSet, GlobSetBuilder};

/// Result of evaluating a path against the compiled rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkDecision {
    Include,
    ExcludedByGlob,
}

impl WalkDecision {
    #[must_use]
    pub fn is_included(self) -> bool {
        matches!(self, Self::Include)
    }
}

/// Compiled exclude-glob matcher used to prune the walk.
///
/// Scout has no include-list in the contract (§4.1 only mentions
/// "honoring include/exclude globs" against every file under the
/// root), so only excludes are compiled; an empty pattern list means
/// every path passes.
#[derive(Debug, Clone)]
pub struct ExcludeGlobs {
    set: Option<GlobSet>,
}

impl ExcludeGlobs {
    /// Compiles `patterns` into a reusable matcher.
    pub fn new(patterns: &[String]) -> anyhow::Result<Self> {
        if patterns.is_empty() {
            return Ok(Self { set: None });
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(Glob::new(pattern).map_err(|e| anyhow::anyhow!("invalid glob {pattern}: {e}"))?);
        }
        Ok(Self { set: Some(builder.build()?) })
    }

    /// Decides whether `candidate` should be walked.
    #[must_use]
    pub fn decide(&self, candidate: &Path) -> WalkDecision {
        match &self.set {
            Some(set) if set.is_match(candidate) => WalkDecision::ExcludedByGlob,
            _ => WalkDecision::Include,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patterns_include_everything() {
        let globs = ExcludeGlobs::new(&[]).unwrap();
        assert!(globs.decide(Path::new("src/lib.rs")).is_included());
    }

    #[test]
    fn matches_exclude_pattern() {
        let globs = ExcludeGlobs::new(&["**/node_modules/**".to_string()]).unwrap();
        assert_eq!(globs.decide(Path::new("a/node_modules/x.js")), WalkDecision::ExcludedByGlob);
        assert!(globs.decide(Path::new("a/src/x.js")).is_included());
    }
}
