//! Pending index definitions

use serde::{Deserialize, Serialize};

use super::IndexKind;
use crate::expr::{CanonicalScope, FromClause, PathExpr, ResolvedPath};
use crate::Result;

/// Name, kind, expression and scope of an index not yet built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub kind: IndexKind,
    pub expression: String,
    pub from_clause: String,
}

impl IndexDefinition {
    pub fn new(
        name: impl Into<String>,
        kind: IndexKind,
        expression: impl Into<String>,
        from_clause: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            expression: expression.into(),
            from_clause: from_clause.into(),
        }
    }

    pub fn range(name: impl Into<String>, expression: impl Into<String>, from_clause: impl Into<String>) -> Self {
        Self::new(name, IndexKind::Range, expression, from_clause)
    }

    pub fn hash(name: impl Into<String>, expression: impl Into<String>, from_clause: impl Into<String>) -> Self {
        Self::new(name, IndexKind::Hash, expression, from_clause)
    }

    pub fn key(name: impl Into<String>, expression: impl Into<String>, from_clause: impl Into<String>) -> Self {
        Self::new(name, IndexKind::PrimaryKey, expression, from_clause)
    }

    /// Parse expression and scope
    pub fn compile(&self) -> Result<CompiledDefinition> {
        let from = FromClause::parse(&self.from_clause)?;
        let expression = PathExpr::parse(&self.expression)?;
        let resolved = from.resolve(&expression);
        Ok(CompiledDefinition {
            definition: self.clone(),
            signature: IndexSignature {
                kind: self.kind,
                scope: from.canonical(),
                expression: resolved.clone(),
            },
            from,
            expression,
            resolved,
        })
    }
}

/// Alias-independent identity of an index; two indexes with the same
/// signature on one region are equivalent
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSignature {
    pub kind: IndexKind,
    pub scope: CanonicalScope,
    pub expression: ResolvedPath,
}

#[derive(Debug, Clone)]
pub struct CompiledDefinition {
    pub definition: IndexDefinition,
    pub from: FromClause,
    pub expression: PathExpr,
    pub resolved: ResolvedPath,
    pub signature: IndexSignature,
}

impl CompiledDefinition {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn region_path(&self) -> &str {
        self.from.region_path()
    }
}
