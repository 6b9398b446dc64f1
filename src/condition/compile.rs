//! Compilation of condition trees into parameterized predicate fragments

use indexmap::IndexMap;

use super::{Condition, ConditionOp};
use crate::value::Value;

/// Predicate fragment plus the literal bound to each of its placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCondition {
    pub fragment: String,
    /// Parameter name (without `$`) to literal value, in placeholder order
    pub bindings: IndexMap<String, Value>,
    /// First parameter index not consumed by this fragment
    pub next_index: usize,
}

struct Compiler<'a> {
    variable: &'a str,
    prefix: &'a str,
    next_index: usize,
    bindings: IndexMap<String, Value>,
}

impl Compiler<'_> {
    fn render(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::Property(name) => format!("{}.{}", self.variable, name),
            Condition::Value(value) => {
                let name = format!("{}{}", self.prefix, self.next_index);
                self.next_index += 1;
                self.bindings.insert(name.clone(), value.clone());
                format!("${}", name)
            }
            Condition::Not(inner) => format!("NOT ({})", self.render(inner)),
            Condition::Binary { op, left, right } if op.is_combinator() => {
                let left = self.render(left);
                let right = self.render(right);
                format!("({}) {} ({})", left, op.symbol(), right)
            }
            Condition::Binary { op, left, right } => {
                let left = self.render_operand(left);
                let right = self.render_operand(right);
                format!("{} {} {}", left, op.symbol(), right)
            }
        }
    }

    /// Comparison operands that are themselves expressions get their own parentheses
    fn render_operand(&mut self, condition: &Condition) -> String {
        match condition {
            Condition::Property(_) | Condition::Value(_) => self.render(condition),
            _ => format!("({})", self.render(condition)),
        }
    }
}

impl Condition {
    /// Compile against the default vertex variable `n` and parameter prefix `p`
    pub fn compile(&self, start_index: usize) -> CompiledCondition {
        self.compile_with("n", "p", start_index)
    }

    /// Compile with an explicit vertex variable and parameter prefix
    ///
    /// Placeholders are numbered from `start_index`, so fragments compiled one after the
    /// other can share a parameter namespace by chaining `next_index`.
    pub fn compile_with(&self, variable: &str, prefix: &str, start_index: usize) -> CompiledCondition {
        let mut compiler = Compiler {
            variable,
            prefix,
            next_index: start_index,
            bindings: IndexMap::new(),
        };
        let fragment = compiler.render(self);
        debug_assert_eq!(compiler.next_index - start_index, self.parameter_count());
        CompiledCondition {
            fragment,
            bindings: compiler.bindings,
            next_index: compiler.next_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_of_two_comparisons() {
        let cond = Condition::property("name").equals("X") & Condition::property("age").greater_than(3);
        let compiled = cond.compile(0);

        assert_eq!(compiled.fragment, "(n.name = $p0) AND (n.age > $p1)");
        assert_eq!(compiled.bindings.len(), 2);
        assert_eq!(compiled.bindings["p0"], Value::from("X"));
        assert_eq!(compiled.bindings["p1"], Value::Integer(3));
        assert!(!compiled.fragment.contains("'X'"));
        assert!(!compiled.fragment.contains('3'));
        assert_eq!(compiled.next_index, 2);
    }

    #[test]
    fn test_start_index_offsets_parameters() {
        let cond = Condition::property("age").less_or_equal(10);
        let compiled = cond.compile(5);
        assert_eq!(compiled.fragment, "n.age <= $p5");
        assert_eq!(compiled.next_index, 6);
    }

    #[test]
    fn test_sibling_subtrees_do_not_collide() {
        let left = Condition::property("a").equals(1) | Condition::property("b").equals(2);
        let right = !Condition::property("c").not_equals(3);
        let compiled = (left ^ right).compile(0);

        assert_eq!(
            compiled.fragment,
            "((n.a = $p0) OR (n.b = $p1)) XOR (NOT (n.c <> $p2))"
        );
        assert_eq!(
            compiled.bindings.keys().collect::<Vec<_>>(),
            vec!["p0", "p1", "p2"]
        );
    }

    #[test]
    fn test_injection_stays_in_bindings() {
        let cond = Condition::property("name").equals("x' OR 1=1 --");
        let compiled = cond.compile(0);
        assert_eq!(compiled.fragment, "n.name = $p0");
        assert_eq!(compiled.bindings["p0"], Value::from("x' OR 1=1 --"));
    }

    #[test]
    fn test_custom_variable_and_prefix() {
        let cond = Condition::property("since").greater_or_equal("2024");
        let compiled = cond.compile_with("t", "arg", 0);
        assert_eq!(compiled.fragment, "t.since >= $arg0");
        assert!(compiled.bindings.contains_key("arg0"));
    }

    #[test]
    fn test_nested_comparison_operand_is_parenthesized() {
        let cond = Condition::property("flag").equals(Condition::property("a").less_than(1));
        assert_eq!(cond.compile(0).fragment, "n.flag = (n.a < $p0)");
    }
}
