//! Path expressions and iteration scopes
//!
//! An index (or a query) is defined by a from-clause such as
//! `/portfolios p, p.positions.values pos` and a projection such as
//! `pos.secId`. Both are resolved into an alias-independent canonical form so
//! that `p.ID over /portfolios p` and `pf.ID over /portfolios pf` compare
//! equal when the planner matches queries against indexes.

use std::borrow::Cow;
use std::fmt;

use crate::types::Value;
use crate::{Result, StorageError};

/// Dotted path such as `p.positions.values` or `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    text: String,
    segments: Vec<String>,
}

impl PathExpr {
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(StorageError::Parse("empty path expression".to_string()));
        }
        let segments: Vec<String> = trimmed.split('.').map(|s| s.trim().to_string()).collect();
        for segment in &segments {
            if !is_identifier(segment) {
                return Err(StorageError::Parse(format!(
                    "invalid identifier '{}' in path '{}'",
                    segment, trimmed
                )));
            }
        }
        Ok(Self {
            text: trimmed.to_string(),
            segments,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Path rooted at a scope iterator position
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPath {
    /// Position of the iterator the path starts from
    pub iterator: usize,
    /// Field navigation applied to that iterator's current element
    pub fields: Vec<String>,
}

impl ResolvedPath {
    /// Evaluate against one scope tuple
    pub fn eval(&self, tuple: &[Value]) -> Result<Value> {
        let root = tuple.get(self.iterator).ok_or_else(|| {
            StorageError::Evaluation(format!("iterator {} is not bound", self.iterator))
        })?;
        navigate(root, &self.fields).map(Cow::into_owned)
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.iterator)?;
        for field in &self.fields {
            write!(f, ".{}", field)?;
        }
        Ok(())
    }
}

/// Walk `fields` starting at `root`
///
/// Missing fields and navigation through null yield `Undefined`; reading a
/// field of a scalar or list is an evaluation error.
pub fn navigate<'a>(root: &'a Value, fields: &[String]) -> Result<Cow<'a, Value>> {
    let mut current: Cow<'a, Value> = Cow::Borrowed(root);
    for field in fields {
        current = match current {
            Cow::Borrowed(v) => step(v, field)?,
            Cow::Owned(v) => Cow::Owned(step(&v, field)?.into_owned()),
        };
    }
    Ok(current)
}

fn step<'a>(value: &'a Value, field: &str) -> Result<Cow<'a, Value>> {
    match value {
        Value::Map(fields) => {
            if let Some(v) = fields.get(field) {
                return Ok(Cow::Borrowed(v));
            }
            match field {
                "values" => Ok(Cow::Owned(Value::List(fields.values().cloned().collect()))),
                "keys" | "keySet" => Ok(Cow::Owned(Value::List(
                    fields.keys().map(|k| Value::Text(k.clone())).collect(),
                ))),
                _ => Ok(Cow::Owned(Value::Undefined)),
            }
        }
        Value::Null | Value::Undefined => Ok(Cow::Owned(Value::Undefined)),
        other => Err(StorageError::Evaluation(format!(
            "cannot read field '{}' of a {} value",
            field,
            other.type_name()
        ))),
    }
}

/// Elements a scope iterator visits for a collection value
fn collection_items(value: &Value) -> Result<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.clone()),
        Value::Map(fields) => Ok(fields.values().cloned().collect()),
        Value::Null | Value::Undefined => Ok(Vec::new()),
        other => Err(StorageError::Evaluation(format!(
            "cannot iterate over a {} value",
            other.type_name()
        ))),
    }
}

/// One iterator of a from-clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeIterator {
    pub alias: Option<String>,
    /// `None` for the region iterator
    pub collection: Option<ResolvedPath>,
}

/// Alias-independent form of a from-clause
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalScope {
    pub region_path: String,
    pub collections: Vec<ResolvedPath>,
}

impl fmt::Display for CanonicalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.region_path)?;
        for c in &self.collections {
            write!(f, ", {}", c)?;
        }
        Ok(())
    }
}

/// How an index scope relates to a query scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScopeMatch {
    /// Same region, same iterators
    Exact,
    /// Same region; the index iterators are a strict prefix of the query's
    Compatible,
}

/// Iteration scope: region plus nested collection iterators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromClause {
    text: String,
    region_path: String,
    iterators: Vec<ScopeIterator>,
}

impl FromClause {
    /// Parse `"/region [alias] (, path [alias])*"`
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        let mut parts = trimmed.split(',');
        let head = parts
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StorageError::Parse("empty from clause".to_string()))?;

        let (region, alias) = split_alias(head)?;
        let region_path = normalize_region_path(region)?;
        let mut iterators = vec![ScopeIterator {
            alias,
            collection: None,
        }];

        for part in parts {
            let (path_text, alias) = split_alias(part.trim())?;
            let path = PathExpr::parse(path_text)?;
            let collection = resolve_in(&iterators, &path);
            if let Some(a) = &alias {
                if iterators.iter().any(|it| it.alias.as_deref() == Some(a.as_str())) {
                    return Err(StorageError::Parse(format!("duplicate alias '{}'", a)));
                }
            }
            iterators.push(ScopeIterator {
                alias,
                collection: Some(collection),
            });
        }

        Ok(Self {
            text: trimmed.to_string(),
            region_path,
            iterators,
        })
    }

    /// Single-iterator scope over a whole region
    pub fn region(region_path: &str) -> Result<Self> {
        Self::parse(region_path)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Normalized region path (leading '/')
    pub fn region_path(&self) -> &str {
        &self.region_path
    }

    pub fn iterators(&self) -> &[ScopeIterator] {
        &self.iterators
    }

    /// Resolve a path against this scope's aliases
    ///
    /// A leading segment naming an alias roots the path at that iterator;
    /// anything else is rooted at the region iterator.
    pub fn resolve(&self, path: &PathExpr) -> ResolvedPath {
        resolve_in(&self.iterators, path)
    }

    pub fn canonical(&self) -> CanonicalScope {
        CanonicalScope {
            region_path: self.region_path.clone(),
            collections: self
                .iterators
                .iter()
                .filter_map(|it| it.collection.clone())
                .collect(),
        }
    }

    /// Compare an index scope (`self`) with a query scope
    ///
    /// An index with more iterators than the query misses entries whose
    /// nested collections are empty, so it never covers that query.
    pub fn match_scope(&self, query: &FromClause) -> Option<ScopeMatch> {
        if self.region_path != query.region_path {
            return None;
        }
        let ours = self.canonical().collections;
        let theirs = query.canonical().collections;
        if ours.len() > theirs.len() || ours[..] != theirs[..ours.len()] {
            return None;
        }
        if ours.len() == theirs.len() {
            Some(ScopeMatch::Exact)
        } else {
            Some(ScopeMatch::Compatible)
        }
    }

    /// Visit every scope tuple produced by one region value
    ///
    /// Tuple position 0 is the region value, position i the current element
    /// of the i-th collection iterator.
    pub fn for_each_tuple(
        &self,
        value: &Value,
        visit: &mut dyn FnMut(&[Value]) -> Result<()>,
    ) -> Result<()> {
        if self.iterators.len() == 1 {
            return visit(std::slice::from_ref(value));
        }
        let mut tuple = vec![value.clone()];
        self.walk(1, &mut tuple, visit)
    }

    fn walk(
        &self,
        depth: usize,
        tuple: &mut Vec<Value>,
        visit: &mut dyn FnMut(&[Value]) -> Result<()>,
    ) -> Result<()> {
        if depth == self.iterators.len() {
            return visit(tuple);
        }
        let collection = match &self.iterators[depth].collection {
            Some(c) => c,
            None => return Err(StorageError::Evaluation("nested region iterator".to_string())),
        };
        let items = collection_items(&collection.eval(tuple)?)?;
        for item in items {
            tuple.push(item);
            let outcome = self.walk(depth + 1, tuple, visit);
            tuple.pop();
            outcome?;
        }
        Ok(())
    }
}

impl fmt::Display for FromClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn resolve_in(iterators: &[ScopeIterator], path: &PathExpr) -> ResolvedPath {
    let segments = path.segments();
    if let Some(first) = segments.first() {
        if let Some(pos) = iterators
            .iter()
            .position(|it| it.alias.as_deref() == Some(first.as_str()))
        {
            return ResolvedPath {
                iterator: pos,
                fields: segments[1..].to_vec(),
            };
        }
    }
    ResolvedPath {
        iterator: 0,
        fields: segments.to_vec(),
    }
}

fn split_alias(part: &str) -> Result<(&str, Option<String>)> {
    let tokens: Vec<&str> = part.split_whitespace().collect();
    match tokens.as_slice() {
        [expr] => Ok((expr, None)),
        [expr, alias] if is_identifier(alias) => Ok((expr, Some(alias.to_string()))),
        [expr, kw, alias] if kw.eq_ignore_ascii_case("as") && is_identifier(alias) => {
            Ok((expr, Some(alias.to_string())))
        }
        _ => Err(StorageError::Parse(format!("cannot parse iterator '{}'", part))),
    }
}

fn normalize_region_path(path: &str) -> Result<String> {
    let name = path.trim_start_matches('/').trim_end_matches('/');
    if name.is_empty() || !name.split('/').all(is_identifier) {
        return Err(StorageError::Parse(format!("invalid region path '{}'", path)));
    }
    Ok(format!("/{}", name))
}
