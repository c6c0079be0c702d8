//! Typed identifiers for documents and problem groups.
//!
//! Group ids are human-readable and page-scoped: `p{page}_{ns}{seq}` where
//! `page` is the 0-based page index the group is stored on, `ns` is the
//! sequence namespace (`L`, `R`, `X`, `XP`) and `seq` is 1-based.
//!
//! Older data used a bare `{ns}{seq}` form (`L3`). [`GroupId::parse`] accepts
//! it so those groups still take part in sequence allocation, but new ids are
//! always generated in the page-scoped form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::group::GroupColumn;

/// Opaque document identifier assigned by the upload/storage layer.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

/// Problem group identifier, unique within one page.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

/// Decomposed form of a [`GroupId`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupIdParts {
    /// Page index; `None` for legacy bare ids.
    pub page: Option<u32>,
    /// Sequence namespace.
    pub namespace: GroupColumn,
    /// 1-based sequence number within the namespace.
    pub seq: u32,
}

/// Error parsing a group id string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroupIdError {
    #[error("group id '{0}' has no namespace (expected L, R, X or XP)")]
    MissingNamespace(String),
    #[error("group id '{0}' has no sequence number")]
    MissingSequence(String),
    #[error("group id '{0}' has a malformed page prefix")]
    BadPagePrefix(String),
}

impl GroupId {
    /// Canonical page-scoped id: `p{page}_{ns}{seq}`.
    pub fn new(page: u32, namespace: GroupColumn, seq: u32) -> Self {
        Self(format!("p{}_{}{}", page, namespace.as_str(), seq))
    }

    /// Wrap an arbitrary string without validation (stored data, tests).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into page, namespace, and sequence.
    pub fn parse(&self) -> Result<GroupIdParts, GroupIdError> {
        let raw = self.0.as_str();
        let (page, rest) = match raw.strip_prefix('p') {
            Some(tail) => {
                let (digits, rest) = tail
                    .split_once('_')
                    .ok_or_else(|| GroupIdError::BadPagePrefix(raw.to_string()))?;
                let page = digits
                    .parse::<u32>()
                    .map_err(|_| GroupIdError::BadPagePrefix(raw.to_string()))?;
                (Some(page), rest)
            }
            None => (None, raw),
        };

        // XP must be tried before X.
        let (namespace, digits) = if let Some(d) = rest.strip_prefix("XP") {
            (GroupColumn::XP, d)
        } else if let Some(d) = rest.strip_prefix('X') {
            (GroupColumn::X, d)
        } else if let Some(d) = rest.strip_prefix('L') {
            (GroupColumn::L, d)
        } else if let Some(d) = rest.strip_prefix('R') {
            (GroupColumn::R, d)
        } else {
            return Err(GroupIdError::MissingNamespace(raw.to_string()));
        };

        let seq = digits
            .parse::<u32>()
            .map_err(|_| GroupIdError::MissingSequence(raw.to_string()))?;

        Ok(GroupIdParts {
            page,
            namespace,
            seq,
        })
    }

    /// True for the bare pre-page-scoping form (`L3`).
    pub fn is_legacy(&self) -> bool {
        matches!(self.parse(), Ok(GroupIdParts { page: None, .. }))
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_format() {
        assert_eq!(GroupId::new(10, GroupColumn::L, 3).as_str(), "p10_L3");
        assert_eq!(GroupId::new(0, GroupColumn::XP, 1).as_str(), "p0_XP1");
    }

    #[test]
    fn test_parse_page_scoped() {
        let parts = GroupId::from("p10_XP2").parse().unwrap();
        assert_eq!(
            parts,
            GroupIdParts {
                page: Some(10),
                namespace: GroupColumn::XP,
                seq: 2
            }
        );
        assert_eq!(GroupId::from("p4_X7").parse().unwrap().namespace, GroupColumn::X);
    }

    #[test]
    fn test_parse_legacy() {
        let id = GroupId::from("R12");
        let parts = id.parse().unwrap();
        assert_eq!(parts.page, None);
        assert_eq!(parts.namespace, GroupColumn::R);
        assert_eq!(parts.seq, 12);
        assert!(id.is_legacy());
        assert!(!GroupId::from("p1_R12").is_legacy());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            GroupId::from("Q3").parse(),
            Err(GroupIdError::MissingNamespace(_))
        ));
        assert!(matches!(
            GroupId::from("p3_L").parse(),
            Err(GroupIdError::MissingSequence(_))
        ));
        assert!(matches!(
            GroupId::from("pX_L1").parse(),
            Err(GroupIdError::BadPagePrefix(_))
        ));
    }

    #[test]
    fn test_serde_transparent() {
        let id = GroupId::new(2, GroupColumn::R, 1);
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"p2_R1\"");
        let doc: DocumentId = serde_json::from_str("\"doc-9\"").unwrap();
        assert_eq!(doc.as_str(), "doc-9");
    }
}
