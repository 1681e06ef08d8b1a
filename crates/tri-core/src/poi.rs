//! Points of Interest: the stable code entities that become graph nodes.

use serde::{Deserialize, Serialize};

/// Closed enumeration of POI kinds.
///
/// `Module` covers directory-scope aggregates that directory- or
/// global-scope analysis needs to reference before any function in
/// that directory has been individually resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoiKind {
    File,
    Function,
    Class,
    Variable,
    Module,
}

impl PoiKind {
    /// Short tag used in the deterministic id (`file`, `fn`, `class`, `var`, `mod`).
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Function => "fn",
            Self::Class => "class",
            Self::Variable => "var",
            Self::Module => "mod",
        }
    }
}

/// A stable, identifiable code entity.
///
/// `id` is derived deterministically from `(kind, name, file_path, line)`
/// so that two workers examining the same tree always compute the same
/// id for the same entity without coordination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poi {
    pub id: String,
    pub kind: PoiKind,
    pub name: String,
    pub file_path: String,
    pub start_line: Option<u32>,
    pub end_line: Option<u32>,
}

impl Poi {
    /// Builds a POI, computing its deterministic id.
    ///
    /// Format: `<kind>:<name>@<filePath>[:<line>]`. The line suffix is
    /// included whenever `start_line` is present so that two same-named
    /// entities in the same file (e.g. overloaded functions in a
    /// language that permits it) do not collide.
    #[must_use]
    pub fn new(
        kind: PoiKind,
        name: impl Into<String>,
        file_path: impl Into<String>,
        start_line: Option<u32>,
        end_line: Option<u32>,
    ) -> Self {
        let name = name.into();
        let file_path = file_path.into();
        let id = Self::compute_id(kind, &name, &file_path, start_line);
        Self {
            id,
            kind,
            name,
            file_path,
            start_line,
            end_line,
        }
    }

    /// Computes the deterministic id without constructing a [`Poi`].
    #[must_use]
    pub fn compute_id(
        kind: PoiKind,
        name: &str,
        file_path: &str,
        start_line: Option<u32>,
    ) -> String {
        match start_line {
            Some(line) => format!("{}:{}@{}:{}", kind.tag(), name, file_path, line),
            None => format!("{}:{}@{}", kind.tag(), name, file_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_deterministic() {
        let a = Poi::new(PoiKind::Function, "foo", "a.js", Some(3), Some(5));
        let b = Poi::new(PoiKind::Function, "foo", "a.js", Some(3), Some(9));
        assert_eq!(a.id, b.id, "id must not depend on end_line");
    }

    #[test]
    fn distinct_lines_yield_distinct_ids() {
        let a = Poi::new(PoiKind::Function, "foo", "a.js", Some(3), None);
        let b = Poi::new(PoiKind::Function, "foo", "a.js", Some(30), None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn file_kind_has_no_line() {
        let f = Poi::new(PoiKind::File, "a.js", "a.js", None, None);
        assert_eq!(f.id, "file:a.js@a.js");
    }
}
