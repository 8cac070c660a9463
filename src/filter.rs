//! Filter expressions over the patient table.
//!
//! An expression is a `&`-separated list of clauses, each `field=value` or
//! `field>value`:
//!
//! ```text
//! Sex=F&Age>50&Node Fields=ro,rc1
//! ```
//!
//! Plain clauses narrow the running subset in order. The `Node Fields` clause
//! is special: its comma-separated tokens are matched on word boundaries
//! against the node-fields column and, depending on [`NodeFieldMode`], either
//! produce one subset per token or a single subset matching any token.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::FilterError;
use crate::table::{Cell, Table};

/// Field name that selects node-field matching instead of a column predicate.
pub const NODE_FIELDS: &str = "Node Fields";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Gt,
}

impl Operator {
    fn symbol(self) -> char {
        match self {
            Operator::Eq => '=',
            Operator::Gt => '>',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    pub value: String,
}

/// How a multi-token `Node Fields` clause is turned into subsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NodeFieldMode {
    /// One subset per token.
    #[default]
    Expand,
    /// One subset matching any of the tokens.
    Cluster,
}

/// A parsed filter expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpression {
    predicates: Vec<Predicate>,
    node_fields: Vec<String>,
}

impl FilterExpression {
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn node_fields(&self) -> &[String] {
        &self.node_fields
    }

    /// Adds node-field tokens, ignoring ones already present.
    pub fn with_node_fields<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for token in tokens {
            let token = token.into();
            if !self.node_fields.contains(&token) {
                self.node_fields.push(token);
            }
        }
        self
    }

    /// Checks every referenced column exists in `table`.
    ///
    /// `node_fields_column` is the column the `Node Fields` clause reads.
    pub fn validate(&self, table: &Table, node_fields_column: &str) -> Result<(), FilterError> {
        let fields = self.predicates.iter().map(|p| p.field.as_str());
        let node = (!self.node_fields.is_empty()).then_some(node_fields_column);

        for field in fields.chain(node) {
            if !table.has_column(field) {
                return Err(FilterError::UnknownField {
                    field: field.to_string(),
                    known: table.sorted_columns(),
                });
            }
        }
        Ok(())
    }
}

impl FromStr for FilterExpression {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut expr = FilterExpression::default();

        for clause in s.split('&') {
            let malformed = |reason| FilterError::Malformed {
                clause: clause.to_string(),
                reason,
            };

            let Some(at) = clause.find(['=', '>']) else {
                return Err(malformed("expected 'field=value' or 'field>value'"));
            };
            let operator = if clause[at..].starts_with('>') {
                Operator::Gt
            } else {
                Operator::Eq
            };
            let field = clause[..at].trim();
            let value = clause[at + 1..].trim();

            if field.is_empty() {
                return Err(malformed("missing field name"));
            }

            if field == NODE_FIELDS {
                if operator != Operator::Eq {
                    return Err(malformed("node fields only support '='"));
                }
                let tokens: Vec<&str> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect();
                if tokens.is_empty() {
                    return Err(malformed("no node field tokens"));
                }
                expr = expr.with_node_fields(tokens);
            } else {
                expr.predicates.push(Predicate {
                    field: field.to_string(),
                    operator,
                    value: value.to_string(),
                });
            }
        }

        Ok(expr)
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut clauses: Vec<String> = self
            .predicates
            .iter()
            .map(|p| format!("{}{}{}", p.field, p.operator.symbol(), p.value))
            .collect();
        if !self.node_fields.is_empty() {
            clauses.push(format!("{NODE_FIELDS}={}", self.node_fields.join(",")));
        }
        if clauses.is_empty() {
            return f.write_str("all");
        }
        f.write_str(&clauses.join("&"))
    }
}

/// A predicate bound to a column of a particular table.
struct CompiledPredicate {
    column: usize,
    test: Test,
}

enum Test {
    Equals { text: String, number: Option<f64> },
    Greater(f64),
}

impl CompiledPredicate {
    fn compile(predicate: &Predicate, table: &Table) -> Result<Self, FilterError> {
        let column = table
            .column_index(&predicate.field)
            .ok_or_else(|| FilterError::UnknownField {
                field: predicate.field.clone(),
                known: table.sorted_columns(),
            })?;

        let number = predicate.value.parse::<f64>().ok();
        let test = match predicate.operator {
            Operator::Eq => Test::Equals {
                text: predicate.value.clone(),
                number,
            },
            Operator::Gt => Test::Greater(number.ok_or_else(|| {
                FilterError::NonNumericComparison {
                    field: predicate.field.clone(),
                    value: predicate.value.clone(),
                }
            })?),
        };

        Ok(Self { column, test })
    }

    fn matches(&self, row: &[Cell]) -> bool {
        let cell = &row[self.column];
        match (&self.test, cell) {
            (_, Cell::Missing) => false,
            (Test::Equals { number: Some(n), .. }, Cell::Number(v)) => v == n,
            (Test::Equals { text, .. }, cell) => cell.to_string() == *text,
            (Test::Greater(n), Cell::Number(v)) => v > n,
            (Test::Greater(_), Cell::Text(_)) => false,
        }
    }
}

/// Word-boundary matcher for one or more node-field tokens.
pub struct NodeFieldMatcher {
    column: usize,
    patterns: Vec<Regex>,
}

impl NodeFieldMatcher {
    pub fn new<S: AsRef<str>>(column: usize, tokens: &[S]) -> Result<Self, FilterError> {
        let patterns = tokens
            .iter()
            .map(|token| {
                let token = token.as_ref();
                Regex::new(&format!(r"\b{}\b", regex::escape(token))).map_err(|source| {
                    FilterError::Pattern {
                        token: token.to_string(),
                        source,
                    }
                })
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { column, patterns })
    }

    /// True when the row's node-fields text contains any of the tokens.
    pub fn matches(&self, row: &[Cell]) -> bool {
        let text = match &row[self.column] {
            Cell::Missing => return false,
            Cell::Text(s) => std::borrow::Cow::Borrowed(s.as_str()),
            other => std::borrow::Cow::Owned(other.to_string()),
        };
        self.patterns.iter().any(|p| p.is_match(&text))
    }
}

/// One filtered patient subset and the population it was drawn from.
#[derive(Debug, Clone)]
pub struct FilteredSubset {
    pub label: String,
    /// Set for expand-mode variants, distinguishes their output files.
    pub tag: Option<String>,
    pub subset: Table,
    /// Patients left after the plain clauses, before node-field selection.
    pub population: Table,
}

/// Applies `expr` to `patients`, returning the labelled subsets in order.
///
/// Every variant is derived from `patients` itself, never from another
/// variant's result. Plain clauses narrow the single subset and the cluster
/// subset; expand mode matches each token against all of `patients`.
#[tracing::instrument(skip_all, fields(filter = %expr, mode = ?mode))]
pub fn apply_filters(
    patients: &Table,
    expr: &FilterExpression,
    mode: NodeFieldMode,
    node_fields_column: &str,
) -> Result<Vec<FilteredSubset>, FilterError> {
    expr.validate(patients, node_fields_column)?;

    let mut population = patients.clone();
    for predicate in &expr.predicates {
        let compiled = CompiledPredicate::compile(predicate, &population)?;
        let before = population.len();
        population = population.filter_rows(|row| compiled.matches(row));
        debug!(
            field = %predicate.field,
            before,
            after = population.len(),
            "Predicate applied"
        );
    }

    let tokens = expr.node_fields();
    if tokens.is_empty() {
        info!(
            from = patients.len(),
            to = population.len(),
            "Filter applied"
        );
        return Ok(vec![FilteredSubset {
            label: expr.to_string(),
            tag: None,
            subset: population.clone(),
            population,
        }]);
    }

    let column = patients
        .column_index(node_fields_column)
        .ok_or_else(|| FilterError::UnknownField {
            field: node_fields_column.to_string(),
            known: patients.sorted_columns(),
        })?;

    let subsets = match mode {
        // Each token starts over from the unfiltered patients.
        NodeFieldMode::Expand => tokens
            .iter()
            .map(|token| -> Result<FilteredSubset, FilterError> {
                let matcher = NodeFieldMatcher::new(column, std::slice::from_ref(token))?;
                Ok(FilteredSubset {
                    label: token.clone(),
                    tag: Some(token.clone()),
                    subset: patients.filter_rows(|row| matcher.matches(row)),
                    population: patients.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        NodeFieldMode::Cluster => {
            let matcher = NodeFieldMatcher::new(column, tokens)?;
            vec![FilteredSubset {
                label: expr.to_string(),
                tag: None,
                subset: population.filter_rows(|row| matcher.matches(row)),
                population,
            }]
        }
    };

    for s in &subsets {
        info!(
            label = %s.label,
            from = patients.len(),
            to = s.subset.len(),
            "Filter applied"
        );
    }

    Ok(subsets)
}
