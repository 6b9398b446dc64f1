//! Condition builder
//!
//! Conditions are immutable expression trees over property references and literal
//! values. Operands are shared through `Arc`, so a subtree can be reused in any number
//! of larger conditions without copying or mutation.
//!
//! ```
//! use akira::condition::Condition;
//!
//! let name = Condition::property("name");
//! let age = Condition::property("age");
//! let adult_x = name.equals("X") & age.greater_than(3);
//!
//! let compiled = adult_x.compile(0);
//! assert_eq!(compiled.fragment, "(n.name = $p0) AND (n.age > $p1)");
//! assert_eq!(compiled.bindings.len(), 2);
//! ```

mod compile;

pub use compile::CompiledCondition;

use std::ops::{BitAnd, BitOr, BitXor, Not};
use std::sync::Arc;

use crate::value::Value;

/// Binary condition operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionOp {
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    And,
    Or,
    Xor,
}

impl ConditionOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            ConditionOp::Equals => "=",
            ConditionOp::NotEquals => "<>",
            ConditionOp::Less => "<",
            ConditionOp::LessOrEqual => "<=",
            ConditionOp::Greater => ">",
            ConditionOp::GreaterOrEqual => ">=",
            ConditionOp::And => "AND",
            ConditionOp::Or => "OR",
            ConditionOp::Xor => "XOR",
        }
    }

    /// Boolean combinators are always parenthesized on both sides
    pub fn is_combinator(&self) -> bool {
        matches!(self, ConditionOp::And | ConditionOp::Or | ConditionOp::Xor)
    }
}

/// Node of a condition expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Reference to a property of the matched vertex
    Property(String),
    /// Literal, always bound as a parameter
    Value(Value),
    /// Negation
    Not(Arc<Condition>),
    /// Comparison or boolean combinator
    Binary {
        op: ConditionOp,
        left: Arc<Condition>,
        right: Arc<Condition>,
    },
}

impl Condition {
    pub fn property(name: impl Into<String>) -> Self {
        Condition::Property(name.into())
    }

    pub fn value(value: impl Into<Value>) -> Self {
        Condition::Value(value.into())
    }

    pub fn binary(&self, op: ConditionOp, other: impl Into<Condition>) -> Condition {
        Condition::Binary {
            op,
            left: Arc::new(self.clone()),
            right: Arc::new(other.into()),
        }
    }

    pub fn equals(&self, other: impl Into<Condition>) -> Condition {
        self.binary(ConditionOp::Equals, other)
    }

    pub fn not_equals(&self, other: impl Into<Condition>) -> Condition {
        self.binary(ConditionOp::NotEquals, other)
    }

    pub fn less_than(&self, other: impl Into<Condition>) -> Condition {
        self.binary(ConditionOp::Less, other)
    }

    pub fn less_or_equal(&self, other: impl Into<Condition>) -> Condition {
        self.binary(ConditionOp::LessOrEqual, other)
    }

    pub fn greater_than(&self, other: impl Into<Condition>) -> Condition {
        self.binary(ConditionOp::Greater, other)
    }

    pub fn greater_or_equal(&self, other: impl Into<Condition>) -> Condition {
        self.binary(ConditionOp::GreaterOrEqual, other)
    }

    pub fn and(&self, other: impl Into<Condition>) -> Condition {
        self.binary(ConditionOp::And, other)
    }

    pub fn or(&self, other: impl Into<Condition>) -> Condition {
        self.binary(ConditionOp::Or, other)
    }

    pub fn xor(&self, other: impl Into<Condition>) -> Condition {
        self.binary(ConditionOp::Xor, other)
    }

    pub fn negate(&self) -> Condition {
        Condition::Not(Arc::new(self.clone()))
    }

    /// Number of parameters this subtree binds when compiled
    pub fn parameter_count(&self) -> usize {
        match self {
            Condition::Property(_) => 0,
            Condition::Value(_) => 1,
            Condition::Not(inner) => inner.parameter_count(),
            Condition::Binary { left, right, .. } => {
                left.parameter_count() + right.parameter_count()
            }
        }
    }

    /// Property names referenced anywhere in this subtree, in rendering order
    pub fn referenced_properties(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_properties(&mut names);
        names
    }

    fn collect_properties<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Condition::Property(name) => names.push(name),
            Condition::Value(_) => {}
            Condition::Not(inner) => inner.collect_properties(names),
            Condition::Binary { left, right, .. } => {
                left.collect_properties(names);
                right.collect_properties(names);
            }
        }
    }
}

impl From<Value> for Condition {
    fn from(value: Value) -> Self {
        Condition::Value(value)
    }
}

impl From<&Condition> for Condition {
    fn from(condition: &Condition) -> Self {
        condition.clone()
    }
}

macro_rules! literal_condition {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Condition {
                fn from(value: $ty) -> Self {
                    Condition::Value(value.into())
                }
            }
        )*
    };
}

literal_condition!(
    &str,
    String,
    i64,
    i32,
    f64,
    bool,
    Vec<u8>,
    chrono::NaiveDate,
    chrono::NaiveDateTime
);

impl<R: Into<Condition>> BitAnd<R> for Condition {
    type Output = Condition;

    fn bitand(self, rhs: R) -> Condition {
        self.and(rhs)
    }
}

impl<R: Into<Condition>> BitOr<R> for Condition {
    type Output = Condition;

    fn bitor(self, rhs: R) -> Condition {
        self.or(rhs)
    }
}

impl<R: Into<Condition>> BitXor<R> for Condition {
    type Output = Condition;

    fn bitxor(self, rhs: R) -> Condition {
        self.xor(rhs)
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(self) -> Condition {
        Condition::Not(Arc::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operands_are_shared_not_mutated() {
        let age = Condition::property("age");
        let older = age.greater_than(18);
        let younger = age.less_than(65);
        let both = older.clone() & younger.clone();

        assert_eq!(age, Condition::property("age"));
        match &both {
            Condition::Binary { op, left, right } => {
                assert_eq!(*op, ConditionOp::And);
                assert_eq!(**left, older);
                assert_eq!(**right, younger);
            }
            other => panic!("unexpected node {:?}", other),
        }
    }

    #[test]
    fn test_parameter_count() {
        let name = Condition::property("name");
        let cond = !(name.equals("a") | name.equals("b")) ^ Condition::property("x").less_or_equal(3);
        assert_eq!(cond.parameter_count(), 3);
        assert_eq!(name.parameter_count(), 0);
    }

    #[test]
    fn test_property_against_property() {
        let cond = Condition::property("a").not_equals(Condition::property("b"));
        assert_eq!(cond.parameter_count(), 0);
        assert_eq!(cond.referenced_properties(), vec!["a", "b"]);
    }

    #[test]
    fn test_referenced_properties() {
        let cond = !(Condition::property("name").equals("a")) & Condition::property("age").greater_than(3);
        assert_eq!(cond.referenced_properties(), vec!["name", "age"]);
        assert!(Condition::value(1).referenced_properties().is_empty());
    }
}
