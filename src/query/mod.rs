//! Query execution layer
//!
//! A query is a from-clause, at most one comparison predicate and an
//! optional ordering path. The planner picks an index for the predicate when
//! one matches; the executor re-checks every candidate against the current
//! region value so index and scan answers agree.

mod executor;
pub mod observer;
mod planner;

pub use executor::{QueryExecutor, QueryResults, ResultRow};
pub use observer::{ObserverGuard, QueryObserver, RecordingObserver};
pub use planner::{ExecutionPlan, PlanOperator, QueryPlanner};

use std::fmt;

use crate::expr::{FromClause, PathExpr, ResolvedPath};
use crate::index::Operator;
use crate::types::{Key, Value};
use crate::{Result, StorageError};

/// `path <operator> value`
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub path: PathExpr,
    pub operator: Operator,
    pub value: Value,
}

impl Predicate {
    pub fn new(path: &str, operator: Operator, value: impl Into<Value>) -> Result<Self> {
        Ok(Self {
            path: PathExpr::parse(path)?,
            operator,
            value: value.into(),
        })
    }

    pub fn is_undefined(path: &str) -> Result<Self> {
        Self::new(path, Operator::IsUndefined, Value::Null)
    }

    /// Parse `path op literal`, `path IS [NOT] UNDEFINED|NULL` or
    /// `path IS DEFINED`
    ///
    /// Literals: `'text'`, integers, floats, `true`, `false`, `NULL`,
    /// `UNDEFINED`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() >= 3 && words[1].eq_ignore_ascii_case("is") {
            let rest: Vec<String> = words[2..].iter().map(|w| w.to_ascii_uppercase()).collect();
            let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
            return match rest.as_slice() {
                ["UNDEFINED"] | ["NULL"] => Self::is_undefined(words[0]),
                ["DEFINED"] | ["NOT", "UNDEFINED"] | ["NOT", "NULL"] => {
                    Self::new(words[0], Operator::NotEqual, Value::Null)
                }
                _ => Err(StorageError::Parse(format!("cannot parse predicate '{}'", text))),
            };
        }

        let op_start = text
            .find(|c| matches!(c, '<' | '>' | '=' | '!'))
            .ok_or_else(|| StorageError::Parse(format!("no comparison operator in '{}'", text)))?;
        let op_len = text[op_start..]
            .chars()
            .take_while(|c| matches!(c, '<' | '>' | '=' | '!'))
            .count();
        let symbol = &text[op_start..op_start + op_len];
        let operator = Operator::from_symbol(symbol)
            .ok_or_else(|| StorageError::Parse(format!("unknown operator '{}'", symbol)))?;
        let path = &text[..op_start];
        let literal = parse_literal(text[op_start + op_len..].trim())?;
        Self::new(path, operator, literal)
    }

    /// Probe key for an index lookup; `None` for null/undefined
    pub fn probe(&self) -> Result<Option<Key>> {
        Key::try_from_value(&self.value)
    }

    /// Evaluate against one scope tuple; evaluation errors do not match
    pub fn matches(&self, resolved: &ResolvedPath, probe: Option<&Key>, tuple: &[Value]) -> bool {
        match resolved.eval(tuple).and_then(|v| Key::try_from_value(&v)) {
            Ok(candidate) => self.operator.matches(candidate.as_ref(), probe),
            Err(_) => false,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Operator::IsUndefined => write!(f, "{} IS UNDEFINED", self.path),
            op => write!(f, "{} {} {}", self.path, op, self.value),
        }
    }
}

fn parse_literal(text: &str) -> Result<Value> {
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        return Ok(Value::text(text[1..text.len() - 1].replace("''", "'")));
    }
    match text.to_ascii_lowercase().as_str() {
        "null" => return Ok(Value::Null),
        "undefined" => return Ok(Value::Undefined),
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::Integer(i));
    }
    if let Ok(f) = text.parse::<f64>() {
        return Ok(Value::Float(f));
    }
    Err(StorageError::Parse(format!("cannot parse literal '{}'", text)))
}

#[derive(Debug, Clone)]
pub struct Query {
    from: FromClause,
    predicate: Option<Predicate>,
    order_by: Option<PathExpr>,
    hint: Option<String>,
}

impl Query {
    /// Select every tuple of a scope
    pub fn select(from: &str) -> Result<Self> {
        Ok(Self {
            from: FromClause::parse(from)?,
            predicate: None,
            order_by: None,
            hint: None,
        })
    }

    /// `SELECT * FROM <scope> [WHERE <predicate>] [ORDER BY <path>]`
    pub fn parse(text: &str) -> Result<Self> {
        let upper = text.to_ascii_uppercase();
        let from_at = upper
            .find("FROM ")
            .ok_or_else(|| StorageError::Parse(format!("missing FROM in '{}'", text)))?;
        let where_at = upper.find(" WHERE ");
        let order_at = upper.find(" ORDER BY ");

        let from_start = from_at + 5;
        let from_end = where_at.or(order_at).unwrap_or(text.len());
        let misplaced = from_end < from_start
            || matches!((where_at, order_at), (Some(w), Some(o)) if o < w);
        if misplaced {
            return Err(StorageError::Parse(format!(
                "expected FROM, WHERE, ORDER BY in that order in '{}'",
                text
            )));
        }
        let mut query = Self::select(&text[from_start..from_end])?;
        if let Some(w) = where_at {
            let end = order_at.filter(|o| *o > w).unwrap_or(text.len());
            query.predicate = Some(Predicate::parse(&text[w + 7..end])?);
        }
        if let Some(o) = order_at {
            query.order_by = Some(PathExpr::parse(&text[o + 10..])?);
        }
        Ok(query)
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn where_clause(self, predicate: &str) -> Result<Self> {
        Ok(self.filter(Predicate::parse(predicate)?))
    }

    pub fn order_by(mut self, path: &str) -> Result<Self> {
        self.order_by = Some(PathExpr::parse(path)?);
        Ok(self)
    }

    /// Force a named index; planning fails if it cannot answer the query
    pub fn use_index(mut self, name: impl Into<String>) -> Self {
        self.hint = Some(name.into());
        self
    }

    pub fn from_clause(&self) -> &FromClause {
        &self.from
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn order_by_path(&self) -> Option<&PathExpr> {
        self.order_by.as_ref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Ordering is on the predicate's own path, so a range index can serve it
    pub(crate) fn orders_by_predicate(&self) -> bool {
        match (&self.order_by, &self.predicate) {
            (Some(order), Some(p)) => self.from.resolve(order) == self.from.resolve(&p.path),
            _ => false,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT * FROM {}", self.from)?;
        if let Some(p) = &self.predicate {
            write!(f, " WHERE {}", p)?;
        }
        if let Some(o) = &self.order_by {
            write!(f, " ORDER BY {}", o)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_predicates() {
        let p = Predicate::parse("p.ID > 4").unwrap();
        assert_eq!(p.operator, Operator::GreaterThan);
        assert_eq!(p.value, Value::Integer(4));
        assert_eq!(p.path.text(), "p.ID");

        let p = Predicate::parse("status = 'active'").unwrap();
        assert_eq!(p.value, Value::text("active"));

        let p = Predicate::parse("pos.secId != NULL").unwrap();
        assert_eq!(p.operator, Operator::NotEqual);
        assert_eq!(p.value, Value::Null);

        let p = Predicate::parse("p.status IS UNDEFINED").unwrap();
        assert_eq!(p.operator, Operator::IsUndefined);

        let p = Predicate::parse("value <= 2.5").unwrap();
        assert_eq!(p.operator, Operator::LessThanOrEqual);
        assert_eq!(p.value, Value::Float(2.5));

        assert!(Predicate::parse("value ~ 3").is_err());
        assert!(Predicate::parse("value = 'open").is_err());
    }

    #[test]
    fn test_parse_query() {
        let q = Query::parse("SELECT * FROM /portfolios p WHERE p.ID >= 3 ORDER BY p.ID").unwrap();
        assert_eq!(q.from_clause().region_path(), "/portfolios");
        assert_eq!(q.predicate().unwrap().value, Value::Integer(3));
        assert!(q.orders_by_predicate());
        assert_eq!(q.to_string(), "SELECT * FROM /portfolios p WHERE p.ID >= 3 ORDER BY p.ID");

        let q = Query::parse("select * from /portfolios").unwrap();
        assert!(q.predicate().is_none());
        assert!(!q.orders_by_predicate());
    }

    #[test]
    fn test_parse_rejects_misordered_clauses() {
        for text in [
            "SELECT * WHERE x = 1 FROM /r",
            "SELECT * ORDER BY x FROM /r",
            "SELECT * FROM /r ORDER BY x WHERE x = 1",
            "SELECT * FROM WHERE x = 1",
        ] {
            assert!(matches!(Query::parse(text), Err(StorageError::Parse(_))), "{}", text);
        }
    }

    #[test]
    fn test_predicate_matching() {
        let from = FromClause::parse("/r").unwrap();
        let p = Predicate::parse("value > 50").unwrap();
        let resolved = from.resolve(&p.path);
        let probe = p.probe().unwrap();
        let hit = Value::object([("value", Value::Integer(51))]);
        let miss = Value::object([("value", Value::text("zzz"))]);
        let broken = Value::Integer(3);
        assert!(p.matches(&resolved, probe.as_ref(), &[hit]));
        assert!(!p.matches(&resolved, probe.as_ref(), &[miss]));
        assert!(!p.matches(&resolved, probe.as_ref(), &[broken]));
    }
}
