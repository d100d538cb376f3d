
// used for parsing filter and processor source text
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

use std::cmp::Ordering;
use std::sync::Arc;

// our own stuff that we need
use crate::construct::{Component, Row};
use crate::datatype::Value;
use crate::error::{IntraError, Result};
use crate::extension::{Capability, Filter, Loader, Processor, Shape};

#[derive(Parser)]
#[grammar = "expression.pest"]
struct ExpressionParser;

// ------------- Syntax -------------
#[derive(Debug, Clone, Copy, PartialEq)]
enum Function {
    Upper,
    Lower,
    Length,
    Text,
}

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Field(Component),
    Literal(Value),
    Call(Function, Box<Term>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Or(Vec<Predicate>),
    And(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare(Term, Operator, Term),
    Constant(bool),
}

fn malformed(what: &str) -> IntraError {
    IntraError::Extension(format!("malformed expression near {what}"))
}

fn build_predicate(pair: Pair<Rule>) -> Result<Predicate> {
    match pair.as_rule() {
        Rule::disjunction | Rule::conjunction => {
            let disjunctive = pair.as_rule() == Rule::disjunction;
            let mut parts = pair
                .into_inner()
                .filter(|p| !matches!(p.as_rule(), Rule::or | Rule::and))
                .map(build_predicate)
                .collect::<Result<Vec<_>>>()?;
            match (parts.len(), disjunctive) {
                (1, _) => parts.pop().ok_or_else(|| malformed("an empty clause")),
                (_, true) => Ok(Predicate::Or(parts)),
                (_, false) => Ok(Predicate::And(parts)),
            }
        }
        Rule::negation => {
            let mut inner: Vec<Pair<Rule>> = pair.into_inner().collect();
            let atom = inner.pop().ok_or_else(|| malformed("a negation"))?;
            let mut predicate = build_predicate(atom)?;
            for _ in inner {
                predicate = Predicate::Not(Box::new(predicate));
            }
            Ok(predicate)
        }
        Rule::atom => {
            let inner = pair.into_inner().next().ok_or_else(|| malformed("an atom"))?;
            build_predicate(inner)
        }
        Rule::boolean => Ok(Predicate::Constant(pair.as_str().eq_ignore_ascii_case("true"))),
        Rule::comparison => {
            let mut inner = pair.into_inner();
            let (left, operator, right) = match (inner.next(), inner.next(), inner.next()) {
                (Some(l), Some(o), Some(r)) => (l, o, r),
                _ => return Err(malformed("a comparison")),
            };
            Ok(Predicate::Compare(
                build_term(left)?,
                build_operator(operator.as_str())?,
                build_term(right)?,
            ))
        }
        _ => Err(malformed(pair.as_str())),
    }
}

fn build_operator(text: &str) -> Result<Operator> {
    match text.trim().to_ascii_lowercase().as_str() {
        "==" => Ok(Operator::Eq),
        "!=" => Ok(Operator::Ne),
        "<" => Ok(Operator::Lt),
        "<=" => Ok(Operator::Le),
        ">" => Ok(Operator::Gt),
        ">=" => Ok(Operator::Ge),
        "contains" => Ok(Operator::Contains),
        "starts_with" => Ok(Operator::StartsWith),
        other => Err(malformed(other)),
    }
}

fn build_term(pair: Pair<Rule>) -> Result<Term> {
    let pair = match pair.as_rule() {
        Rule::term => pair.into_inner().next().ok_or_else(|| malformed("a term"))?,
        _ => pair,
    };
    match pair.as_rule() {
        Rule::call => {
            let mut inner = pair.into_inner();
            let (function, argument) = match (inner.next(), inner.next()) {
                (Some(f), Some(a)) => (f, a),
                _ => return Err(malformed("a function call")),
            };
            let function = match function.as_str().to_ascii_lowercase().as_str() {
                "upper" => Function::Upper,
                "lower" => Function::Lower,
                "length" => Function::Length,
                "text" => Function::Text,
                other => return Err(malformed(other)),
            };
            Ok(Term::Call(function, Box::new(build_term(argument)?)))
        }
        Rule::field => Ok(Term::Field(pair.as_str().parse()?)),
        Rule::string => {
            let text = pair.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
            Ok(Term::Literal(Value::from(text)))
        }
        Rule::number => {
            let text = pair.as_str();
            let number = if text.contains('.') {
                text.parse::<f64>().map(Value::Float).ok()
            } else {
                text.parse::<i64>().map(Value::Int).ok()
            };
            number.map(Term::Literal).ok_or_else(|| malformed(text))
        }
        Rule::boolean => Ok(Term::Literal(Value::Bool(pair.as_str().eq_ignore_ascii_case("true")))),
        _ => Err(malformed(pair.as_str())),
    }
}

// ------------- Evaluation -------------
impl Term {
    fn evaluate(&self, row: &Row) -> Value {
        match self {
            Term::Field(component) => row.component(*component).unwrap_or(Value::Null),
            Term::Literal(value) => value.clone(),
            Term::Call(function, argument) => {
                let value = argument.evaluate(row);
                match function {
                    Function::Upper => Value::Text(value.to_string().to_uppercase()),
                    Function::Lower => Value::Text(value.to_string().to_lowercase()),
                    Function::Text => Value::Text(value.to_string()),
                    Function::Length => match &value {
                        Value::Null => Value::Int(0),
                        Value::Bytes(b) => Value::from(b.len()),
                        Value::List(l) => Value::from(l.len()),
                        other => Value::from(other.to_string().chars().count()),
                    },
                }
            }
        }
    }
}

impl Predicate {
    fn evaluate(&self, row: &Row) -> bool {
        match self {
            Predicate::Or(parts) => parts.iter().any(|p| p.evaluate(row)),
            Predicate::And(parts) => parts.iter().all(|p| p.evaluate(row)),
            Predicate::Not(inner) => !inner.evaluate(row),
            Predicate::Constant(b) => *b,
            Predicate::Compare(left, operator, right) => {
                let (l, r) = (left.evaluate(row), right.evaluate(row));
                match operator {
                    Operator::Contains => l.to_string().contains(&r.to_string()),
                    Operator::StartsWith => l.to_string().starts_with(&r.to_string()),
                    Operator::Ne => l.compare(&r) != Some(Ordering::Equal),
                    ordered => match l.compare(&r) {
                        None => false,
                        Some(ordering) => match ordered {
                            Operator::Eq => ordering == Ordering::Equal,
                            Operator::Lt => ordering == Ordering::Less,
                            Operator::Le => ordering != Ordering::Greater,
                            Operator::Gt => ordering == Ordering::Greater,
                            _ => ordering != Ordering::Less,
                        },
                    },
                }
            }
        }
    }
}

struct ExpressionFilter {
    predicate: Predicate,
}

impl Filter for ExpressionFilter {
    fn accept(&self, row: &Row) -> bool {
        self.predicate.evaluate(row)
    }
}

struct ExpressionProcessor {
    assignments: Vec<(Component, Term)>,
}

impl Processor for ExpressionProcessor {
    fn process(&self, rows: Vec<Row>) -> Result<Vec<Row>> {
        rows.into_iter()
            .map(|row| {
                let computed: Vec<(Component, Value)> = self
                    .assignments
                    .iter()
                    .map(|(component, term)| (*component, term.evaluate(&row)))
                    .collect();
                let mut row = row;
                for (component, value) in computed {
                    row.set_component(component, value)?;
                }
                Ok(row)
            })
            .collect()
    }
}

// ------------- Loader -------------
/// Compiles expression source into filters and processors.
///
/// A filter is a boolean expression over `name`, `value`, `timestamp` and `ttl`,
/// for example `value starts_with 'a' and not (ttl > 60)`. A processor is a
/// comma-separated list of assignments such as `value = upper(value)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionLoader;

impl ExpressionLoader {
    fn parse(rule: Rule, source: &str) -> Result<Pair<'_, Rule>> {
        ExpressionParser::parse(rule, source)
            .map_err(|e| IntraError::Extension(format!("cannot compile '{source}': {e}")))?
            .next()
            .ok_or_else(|| malformed(source))
    }
}

impl Loader for ExpressionLoader {
    fn compile(&self, source: &str, shape: Shape) -> Result<Capability> {
        match shape {
            Shape::Filter => {
                let top = Self::parse(Rule::predicate, source)?;
                let body = top
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::disjunction)
                    .ok_or_else(|| malformed(source))?;
                let predicate = build_predicate(body)?;
                Ok(Capability::Filter(Arc::new(ExpressionFilter { predicate })))
            }
            Shape::Processor => {
                let top = Self::parse(Rule::transform, source)?;
                let mut assignments = Vec::new();
                for assignment in top.into_inner().filter(|p| p.as_rule() == Rule::assignment) {
                    let mut inner = assignment.into_inner();
                    let (field, term) = match (inner.next(), inner.next()) {
                        (Some(f), Some(t)) => (f, t),
                        _ => return Err(malformed("an assignment")),
                    };
                    assignments.push((field.as_str().parse::<Component>()?, build_term(term)?));
                }
                Ok(Capability::Processor(Arc::new(ExpressionProcessor { assignments })))
            }
            other => Err(IntraError::Extension(format!(
                "the expression loader cannot build a {other}"
            ))),
        }
    }
}
