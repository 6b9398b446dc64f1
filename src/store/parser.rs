//! Statement parser for the in-memory store, using Pest

use pest::iterators::Pair;
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;
use std::sync::LazyLock;
use thiserror::Error;

use crate::error::OgmError;
use crate::schema::ScalarKind;

#[derive(Parser)]
#[grammar = "store/statement.pest"]
struct StatementParser;

static PRATT_PARSER: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left) | Op::infix(Rule::xor_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::infix(Rule::comparison_op, Assoc::Left))
        .op(Op::infix(Rule::add_sub_op, Assoc::Left))
        .op(Op::infix(Rule::mul_op, Assoc::Left))
});

#[derive(Error, Debug)]
pub(crate) enum ParseError {
    #[error("Parse error: {0}")]
    PestError(#[from] Box<pest::error::Error<Rule>>),

    #[error("Semantic error: {0}")]
    SemanticError(String),
}

impl From<ParseError> for OgmError {
    fn from(e: ParseError) -> Self {
        OgmError::Store(e.to_string())
    }
}

pub(crate) type ParseResult<T> = Result<T, ParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Function {
    Id,
    Labels,
    Properties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FunctionCall {
    pub function: Function,
    pub variable: String,
    /// Column name as written, e.g. `id(n)`
    pub column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Or,
    Xor,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Param(String),
    Integer(i64),
    Property { variable: String, name: String },
    Call(FunctionCall),
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodePattern {
    pub variable: String,
    pub label: Option<String>,
    /// Property name to parameter name
    pub properties: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EdgePattern {
    pub variable: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathPattern {
    pub start: NodePattern,
    pub hop: Option<(EdgePattern, NodePattern)>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Assignment {
    pub variable: String,
    pub property: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Action {
    Set(Vec<Assignment>),
    DetachDelete(String),
    Delete(String),
    MergeEdge {
        source: String,
        edge: EdgePattern,
        target: String,
        /// Parameter holding the edge's property bag
        properties: String,
    },
    Return {
        items: Vec<FunctionCall>,
        limit: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    CreateLabel {
        label: String,
        parent: Option<String>,
    },
    CreateProperty {
        label: String,
        property: String,
        kind: ScalarKind,
        default: Option<String>,
    },
    Create {
        node: NodePattern,
        returns: Vec<FunctionCall>,
    },
    UnwindCreate {
        rows: String,
        node: NodePattern,
        returns: Vec<FunctionCall>,
    },
    Merge {
        node: NodePattern,
        properties: String,
        returns: Vec<FunctionCall>,
    },
    Match {
        patterns: Vec<PathPattern>,
        filter: Option<Expr>,
        action: Action,
    },
}

/// Parse one statement
pub(crate) fn parse_statement(input: &str) -> ParseResult<Command> {
    let mut pairs = StatementParser::parse(Rule::statement, input).map_err(Box::new)?;
    let statement = pairs
        .next()
        .ok_or_else(|| ParseError::SemanticError("empty statement".to_string()))?;
    let command = statement
        .into_inner()
        .next()
        .ok_or_else(|| ParseError::SemanticError("empty statement".to_string()))?;

    match command.as_rule() {
        Rule::create_vlabel => parse_create_vlabel(command),
        Rule::create_property => parse_create_property(command),
        Rule::create_node => parse_create_node(command),
        Rule::unwind_create => parse_unwind_create(command),
        Rule::merge_node => parse_merge_node(command),
        Rule::match_stmt => parse_match(command),
        rule => Err(ParseError::SemanticError(format!("Unexpected statement: {:?}", rule))),
    }
}

fn missing(what: &str) -> ParseError {
    ParseError::SemanticError(format!("Missing {}", what))
}

fn parse_create_vlabel(pair: Pair<Rule>) -> ParseResult<Command> {
    let mut labels = pair
        .into_inner()
        .filter(|p| p.as_rule() == Rule::label)
        .map(|p| p.as_str().to_string());
    let label = labels.next().ok_or_else(|| missing("label"))?;
    Ok(Command::CreateLabel {
        label,
        parent: labels.next(),
    })
}

fn parse_create_property(pair: Pair<Rule>) -> ParseResult<Command> {
    let mut qualified = None;
    let mut kind = None;
    let mut default = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::label => qualified = Some(inner.as_str().to_string()),
            Rule::ident => kind = Some(ScalarKind::from_store_type(inner.as_str())),
            Rule::param => default = Some(param_name(&inner)),
            _ => {}
        }
    }
    let qualified = qualified.ok_or_else(|| missing("property"))?;
    let (label, property) = qualified
        .rsplit_once('.')
        .ok_or_else(|| ParseError::SemanticError(format!("{} is not label.property", qualified)))?;
    Ok(Command::CreateProperty {
        label: label.to_string(),
        property: property.to_string(),
        kind: kind.ok_or_else(|| missing("property type"))?,
        default,
    })
}

fn parse_create_node(pair: Pair<Rule>) -> ParseResult<Command> {
    let mut node = None;
    let mut returns = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::node_pattern => node = Some(parse_node_pattern(inner)?),
            Rule::return_clause => returns = parse_return_clause(inner)?,
            _ => {}
        }
    }
    Ok(Command::Create {
        node: node.ok_or_else(|| missing("node pattern"))?,
        returns,
    })
}

fn parse_unwind_create(pair: Pair<Rule>) -> ParseResult<Command> {
    let mut rows = None;
    let mut node = None;
    let mut returns = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::param => rows = Some(param_name(&inner)),
            Rule::node_pattern => node = Some(parse_node_pattern(inner)?),
            Rule::return_clause => returns = parse_return_clause(inner)?,
            _ => {}
        }
    }
    Ok(Command::UnwindCreate {
        rows: rows.ok_or_else(|| missing("UNWIND source"))?,
        node: node.ok_or_else(|| missing("node pattern"))?,
        returns,
    })
}

fn parse_merge_node(pair: Pair<Rule>) -> ParseResult<Command> {
    let mut node = None;
    let mut properties = None;
    let mut returns = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::node_pattern => node = Some(parse_node_pattern(inner)?),
            Rule::param => properties = Some(param_name(&inner)),
            Rule::return_clause => returns = parse_return_clause(inner)?,
            _ => {}
        }
    }
    Ok(Command::Merge {
        node: node.ok_or_else(|| missing("node pattern"))?,
        properties: properties.ok_or_else(|| missing("SET source"))?,
        returns,
    })
}

fn parse_match(pair: Pair<Rule>) -> ParseResult<Command> {
    let mut patterns = Vec::new();
    let mut filter = None;
    let mut action = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::path => patterns.push(parse_path(inner)?),
            Rule::where_clause => {
                let expr = inner.into_inner().next().ok_or_else(|| missing("WHERE expression"))?;
                filter = Some(parse_expr(expr)?);
            }
            Rule::set_clause => {
                let assignments = inner
                    .into_inner()
                    .map(parse_assignment)
                    .collect::<ParseResult<Vec<_>>>()?;
                action = Some(Action::Set(assignments));
            }
            Rule::detach_delete => action = Some(Action::DetachDelete(first_ident(inner)?)),
            Rule::delete_clause => action = Some(Action::Delete(first_ident(inner)?)),
            Rule::merge_edge => action = Some(parse_merge_edge(inner)?),
            Rule::return_tail => action = Some(parse_return_tail(inner)?),
            _ => {}
        }
    }
    Ok(Command::Match {
        patterns,
        filter,
        action: action.ok_or_else(|| missing("MATCH action"))?,
    })
}

fn parse_path(pair: Pair<Rule>) -> ParseResult<PathPattern> {
    let mut inner = pair.into_inner();
    let start = parse_node_pattern(inner.next().ok_or_else(|| missing("node pattern"))?)?;
    let hop = match (inner.next(), inner.next()) {
        (Some(edge), Some(node)) => Some((parse_edge_pattern(edge)?, parse_node_pattern(node)?)),
        _ => None,
    };
    Ok(PathPattern { start, hop })
}

fn parse_node_pattern(pair: Pair<Rule>) -> ParseResult<NodePattern> {
    let mut variable = None;
    let mut label = None;
    let mut properties = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::ident => variable = Some(inner.as_str().to_string()),
            Rule::label => label = Some(inner.as_str().to_string()),
            Rule::property_bag => {
                for entry in inner.into_inner() {
                    let mut parts = entry.into_inner();
                    let key = parts.next().ok_or_else(|| missing("property key"))?;
                    let value = parts.next().ok_or_else(|| missing("property value"))?;
                    properties.push((key.as_str().to_string(), param_name(&value)));
                }
            }
            _ => {}
        }
    }
    Ok(NodePattern {
        variable: variable.ok_or_else(|| missing("node variable"))?,
        label,
        properties,
    })
}

fn parse_edge_pattern(pair: Pair<Rule>) -> ParseResult<EdgePattern> {
    let mut inner = pair.into_inner();
    let variable = inner.next().ok_or_else(|| missing("edge variable"))?;
    let label = inner.next().ok_or_else(|| missing("edge label"))?;
    Ok(EdgePattern {
        variable: variable.as_str().to_string(),
        label: label.as_str().to_string(),
    })
}

fn parse_merge_edge(pair: Pair<Rule>) -> ParseResult<Action> {
    let mut inner = pair.into_inner();
    let source = parse_node_pattern(inner.next().ok_or_else(|| missing("edge source"))?)?;
    let edge = parse_edge_pattern(inner.next().ok_or_else(|| missing("edge pattern"))?)?;
    let target = parse_node_pattern(inner.next().ok_or_else(|| missing("edge target"))?)?;
    let _variable = inner.next().ok_or_else(|| missing("SET target"))?;
    let properties = inner.next().ok_or_else(|| missing("SET source"))?;
    Ok(Action::MergeEdge {
        source: source.variable,
        edge,
        target: target.variable,
        properties: param_name(&properties),
    })
}

fn parse_assignment(pair: Pair<Rule>) -> ParseResult<Assignment> {
    let mut inner = pair.into_inner();
    let variable = inner.next().ok_or_else(|| missing("SET variable"))?;
    let property = inner.next().ok_or_else(|| missing("SET property"))?;
    let value = inner.next().ok_or_else(|| missing("SET value"))?;
    Ok(Assignment {
        variable: variable.as_str().to_string(),
        property: property.as_str().to_string(),
        value: parse_expr(value)?,
    })
}

fn parse_return_tail(pair: Pair<Rule>) -> ParseResult<Action> {
    let mut items = Vec::new();
    let mut limit = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::return_clause => items = parse_return_clause(inner)?,
            Rule::limit_clause => {
                let value = inner.into_inner().next().ok_or_else(|| missing("LIMIT value"))?;
                limit = Some(value.as_str().parse::<usize>().map_err(|e| {
                    ParseError::SemanticError(format!("Invalid LIMIT: {}", e))
                })?);
            }
            _ => {}
        }
    }
    Ok(Action::Return { items, limit })
}

fn parse_return_clause(pair: Pair<Rule>) -> ParseResult<Vec<FunctionCall>> {
    pair.into_inner().map(parse_function_call).collect()
}

fn parse_function_call(pair: Pair<Rule>) -> ParseResult<FunctionCall> {
    let column = pair.as_str().split_whitespace().collect::<String>();
    let mut inner = pair.into_inner();
    let name = inner.next().ok_or_else(|| missing("function name"))?;
    let variable = inner.next().ok_or_else(|| missing("function argument"))?;
    let function = match name.as_str().to_ascii_lowercase().as_str() {
        "id" => Function::Id,
        "labels" => Function::Labels,
        "properties" => Function::Properties,
        other => return Err(ParseError::SemanticError(format!("Unknown function: {}", other))),
    };
    Ok(FunctionCall {
        function,
        variable: variable.as_str().to_string(),
        column,
    })
}

fn parse_expr(pair: Pair<Rule>) -> ParseResult<Expr> {
    PRATT_PARSER
        .map_primary(parse_term)
        .map_infix(|left, op, right| {
            let left = left?;
            let right = right?;
            let op = match op.as_rule() {
                Rule::or_op => BinaryOp::Or,
                Rule::xor_op => BinaryOp::Xor,
                Rule::and_op => BinaryOp::And,
                Rule::comparison_op | Rule::add_sub_op | Rule::mul_op => parse_op_str(op.as_str())?,
                rule => {
                    return Err(ParseError::SemanticError(format!("Unexpected operator: {:?}", rule)))
                }
            };
            Ok(Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            })
        })
        .parse(pair.into_inner())
}

fn parse_op_str(op: &str) -> ParseResult<BinaryOp> {
    Ok(match op {
        "=" => BinaryOp::Eq,
        "<>" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        _ => return Err(ParseError::SemanticError(format!("Unknown operator: {}", op))),
    })
}

fn parse_term(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut negations = 0;
    let mut primary = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::not_op => negations += 1,
            Rule::primary => primary = Some(parse_primary(inner)?),
            _ => {}
        }
    }
    let mut expr = primary.ok_or_else(|| missing("operand"))?;
    for _ in 0..negations {
        expr = Expr::Not(Box::new(expr));
    }
    Ok(expr)
}

fn parse_primary(pair: Pair<Rule>) -> ParseResult<Expr> {
    let inner = pair.into_inner().next().ok_or_else(|| missing("operand"))?;
    match inner.as_rule() {
        Rule::function_call => Ok(Expr::Call(parse_function_call(inner)?)),
        Rule::property_ref => {
            let mut parts = inner.into_inner();
            let variable = parts.next().ok_or_else(|| missing("variable"))?;
            let name = parts.next().ok_or_else(|| missing("property"))?;
            Ok(Expr::Property {
                variable: variable.as_str().to_string(),
                name: name.as_str().to_string(),
            })
        }
        Rule::param => Ok(Expr::Param(param_name(&inner))),
        Rule::integer => inner
            .as_str()
            .parse::<i64>()
            .map(Expr::Integer)
            .map_err(|e| ParseError::SemanticError(format!("Invalid integer: {}", e))),
        Rule::expr => parse_expr(inner),
        rule => Err(ParseError::SemanticError(format!("Unexpected operand: {:?}", rule))),
    }
}

fn param_name(pair: &Pair<Rule>) -> String {
    pair.as_str().trim_start_matches('$').to_string()
}

fn first_ident(pair: Pair<Rule>) -> ParseResult<String> {
    pair.into_inner()
        .find(|p| p.as_rule() == Rule::ident)
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| missing("variable"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schema_statements() {
        let command = parse_statement("CREATE VLABEL IF NOT EXISTS Employee INHERITS Person").unwrap();
        assert_eq!(
            command,
            Command::CreateLabel {
                label: "Employee".to_string(),
                parent: Some("Person".to_string())
            }
        );

        let command =
            parse_statement("CREATE PROPERTY IF NOT EXISTS app.Person.married BOOLEAN DEFAULT $p0").unwrap();
        assert_eq!(
            command,
            Command::CreateProperty {
                label: "app.Person".to_string(),
                property: "married".to_string(),
                kind: ScalarKind::Boolean,
                default: Some("p0".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_create() {
        let command = parse_statement("CREATE (n:Person {name: $p0, age: $p1}) RETURN id(n)").unwrap();
        let Command::Create { node, returns } = command else {
            panic!("Expected CREATE");
        };
        assert_eq!(node.label.as_deref(), Some("Person"));
        assert_eq!(
            node.properties,
            vec![
                ("name".to_string(), "p0".to_string()),
                ("age".to_string(), "p1".to_string())
            ]
        );
        assert_eq!(returns[0].function, Function::Id);
        assert_eq!(returns[0].column, "id(n)");
    }

    #[test]
    fn test_parse_where_precedence() {
        let command = parse_statement(
            "MATCH (n:Person) WHERE (n.name = $p0) AND (n.age > $p1) RETURN id(n), labels(n), properties(n) LIMIT 1",
        )
        .unwrap();
        let Command::Match { filter, action, .. } = command else {
            panic!("Expected MATCH");
        };
        let Some(Expr::Binary { op, .. }) = filter else {
            panic!("Expected binary filter");
        };
        assert_eq!(op, BinaryOp::And);
        assert!(matches!(action, Action::Return { ref items, limit: Some(1) } if items.len() == 3));

        let expr = match parse_statement("MATCH (n) WHERE n.a = $p0 OR n.b = $p1 AND n.c = $p2 DETACH DELETE n")
            .unwrap()
        {
            Command::Match { filter: Some(expr), .. } => expr,
            other => panic!("Unexpected {:?}", other),
        };
        assert!(matches!(expr, Expr::Binary { op: BinaryOp::Or, .. }));
    }

    #[test]
    fn test_parse_update() {
        let command =
            parse_statement("MATCH (n) WHERE id(n) = $p0 SET n.age = (n.age + $p1) * $p2, n.name = $p3").unwrap();
        let Command::Match { action: Action::Set(assignments), .. } = command else {
            panic!("Expected SET");
        };
        assert_eq!(assignments.len(), 2);
        assert!(matches!(
            assignments[0].value,
            Expr::Binary { op: BinaryOp::Mul, .. }
        ));
    }

    #[test]
    fn test_parse_edges() {
        let command = parse_statement(
            "MATCH (s), (t) WHERE id(s) = $p0 AND id(t) = $p1 MERGE (s)-[r:spouses]->(t) SET r = $p2",
        )
        .unwrap();
        let Command::Match { patterns, action, .. } = command else {
            panic!("Expected MATCH");
        };
        assert_eq!(patterns.len(), 2);
        assert!(matches!(action, Action::MergeEdge { ref edge, .. } if edge.label == "spouses"));

        let command = parse_statement(
            "MATCH (s)-[r:spouses]->(t) WHERE id(s) = $p0 RETURN id(t), labels(t), properties(t), properties(r)",
        )
        .unwrap();
        let Command::Match { patterns, .. } = command else {
            panic!("Expected MATCH");
        };
        assert!(patterns[0].hop.is_some());
    }

    #[test]
    fn test_parse_not() {
        let command = parse_statement("MATCH (n:A) WHERE NOT (n.c <> $p0) RETURN id(n)").unwrap();
        assert!(matches!(
            command,
            Command::Match { filter: Some(Expr::Not(_)), .. }
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(parse_statement("MATCH n RETURN").is_err());
        assert!(parse_statement("DROP GRAPH x").is_err());
    }
}
