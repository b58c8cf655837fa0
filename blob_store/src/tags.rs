//! Tag query model for [`AppendBlobStore::find_by_tag_query`].
//!
//! Queries are a conjunction of `key OP 'value'` clauses. Values are compared
//! lexicographically, the same way Azure blob index tags are, so callers that
//! need ordering (timestamps) must use a format that sorts chronologically.
//!
//! [`AppendBlobStore::find_by_tag_query`]: crate::AppendBlobStore::find_by_tag_query

use std::{collections::HashMap, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl TagOp {
    fn as_str(&self) -> &'static str {
        match self {
            TagOp::Eq => "=",
            TagOp::Lt => "<",
            TagOp::Le => "<=",
            TagOp::Gt => ">",
            TagOp::Ge => ">=",
        }
    }

    fn holds(&self, actual: &str, expected: &str) -> bool {
        match self {
            TagOp::Eq => actual == expected,
            TagOp::Lt => actual < expected,
            TagOp::Le => actual <= expected,
            TagOp::Gt => actual > expected,
            TagOp::Ge => actual >= expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagClause {
    pub key: String,
    pub op: TagOp,
    pub value: String,
}

/// A conjunction of tag clauses. An empty query matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagQuery {
    clauses: Vec<TagClause>,
}

impl TagQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, key: impl Into<String>, op: TagOp, value: impl Into<String>) -> Self {
        self.clauses.push(TagClause {
            key: key.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn less_than(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new().and(key, TagOp::Lt, value)
    }

    /// Returns true when every clause holds for `tags`. A clause whose key is
    /// missing from `tags` never holds.
    pub fn matches(&self, tags: &HashMap<String, String>) -> bool {
        !self.clauses.is_empty() &&
            self.clauses.iter().all(|clause| {
                tags.get(&clause.key)
                    .is_some_and(|actual| clause.op.holds(actual, &clause.value))
            })
    }
}

impl fmt::Display for TagQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            write!(
                f,
                "\"{}\" {} '{}'",
                clause.key,
                clause.op.as_str(),
                clause.value
            )?;
        }
        Ok(())
    }
}
