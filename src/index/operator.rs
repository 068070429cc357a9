//! Comparison operators understood by index lookups

use std::fmt;

use crate::types::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// Matches entries whose indexed value is null or undefined
    IsUndefined,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::IsUndefined => "IS UNDEFINED",
        }
    }

    /// Needs an ordered structure
    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            Operator::LessThan
                | Operator::LessThanOrEqual
                | Operator::GreaterThan
                | Operator::GreaterThanOrEqual
        )
    }

    /// Whether an indexed value satisfies `candidate <op> probe`
    ///
    /// `None` stands for null/undefined. Undefined values are matched only by
    /// `IsUndefined`; ordering comparisons never cross key classes and never
    /// match a null probe. `!= NULL` matches every defined value.
    pub fn matches(&self, candidate: Option<&Key>, probe: Option<&Key>) -> bool {
        match self {
            Operator::IsUndefined => candidate.is_none(),
            Operator::NotEqual => match (candidate, probe) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(c), Some(p)) => c != p,
            },
            _ => {
                let (c, p) = match (candidate, probe) {
                    (Some(c), Some(p)) if c.class() == p.class() => (c, p),
                    _ => return false,
                };
                match self {
                    Operator::Equal => c == p,
                    Operator::LessThan => c < p,
                    Operator::LessThanOrEqual => c <= p,
                    Operator::GreaterThan => c > p,
                    Operator::GreaterThanOrEqual => c >= p,
                    Operator::NotEqual | Operator::IsUndefined => false,
                }
            }
        }
    }

    /// Parse a comparison symbol; `<>` is accepted for not-equal
    pub fn from_symbol(symbol: &str) -> Option<Operator> {
        match symbol {
            "=" | "==" => Some(Operator::Equal),
            "!=" | "<>" => Some(Operator::NotEqual),
            "<" => Some(Operator::LessThan),
            "<=" => Some(Operator::LessThanOrEqual),
            ">" => Some(Operator::GreaterThan),
            ">=" => Some(Operator::GreaterThanOrEqual),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
