//! A where-clause oriented view on SPARQL queries.
//!
//! The algebra produced by the parser nests the elements of a group graph pattern into joins,
//! left joins and extensions. The computation pipeline reasons about queries on the level of the
//! written group instead: which triples, filters and binds does the `WHERE` clause contain, and
//! which nested `SELECT`s and `UNION` branches have to be treated on their own. [Query] provides
//! this view and renders back to SPARQL through [Display](fmt::Display).

mod build;
mod normalize;
mod parse;

pub(crate) use build::join;

use crate::ValidationError;
use itertools::Itertools;
use otfc_model::{
    AggregateExpression, Expression, GraphPattern, GroundTerm, Iri, NamedNode, NamedNodePattern,
    OrderExpression, PropertyPathExpression, QueryDataset, SparqlQuery, SparqlSyntaxError,
    TermPattern, TriplePattern, Variable,
};
use std::fmt;

/// The form of a [Query].
#[derive(Clone, Debug, PartialEq)]
pub enum QueryForm {
    Select,
    Construct(Vec<TriplePattern>),
    Ask,
    Describe,
    /// A bare group graph pattern, as found in the branches of a `UNION`.
    Pattern,
}

/// The predicate position of a [WhereTriple].
#[derive(Clone, Debug, PartialEq)]
pub enum TriplePredicate {
    Term(NamedNodePattern),
    Path(PropertyPathExpression),
}

/// A triple of a basic graph pattern, possibly with a property path as predicate.
#[derive(Clone, Debug, PartialEq)]
pub struct WhereTriple {
    pub subject: TermPattern,
    pub predicate: TriplePredicate,
    pub object: TermPattern,
}

impl WhereTriple {
    pub fn new(
        subject: impl Into<TermPattern>,
        predicate: impl Into<NamedNodePattern>,
        object: impl Into<TermPattern>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: TriplePredicate::Term(predicate.into()),
            object: object.into(),
        }
    }

    pub fn path(
        subject: impl Into<TermPattern>,
        path: PropertyPathExpression,
        object: impl Into<TermPattern>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: TriplePredicate::Path(path),
            object: object.into(),
        }
    }

    /// Returns the predicate IRI if the predicate is neither a variable nor a path.
    pub fn predicate_iri(&self) -> Option<&NamedNode> {
        match &self.predicate {
            TriplePredicate::Term(NamedNodePattern::NamedNode(predicate)) => Some(predicate),
            _ => None,
        }
    }

    /// Returns whether `predicate` is used by this triple, including inside a property path.
    pub fn mentions(&self, predicate: &NamedNode) -> bool {
        match &self.predicate {
            TriplePredicate::Term(NamedNodePattern::NamedNode(node)) => node == predicate,
            TriplePredicate::Term(NamedNodePattern::Variable(_)) => false,
            TriplePredicate::Path(path) => path_mentions(path, predicate),
        }
    }

    pub fn is_path(&self) -> bool {
        matches!(self.predicate, TriplePredicate::Path(_))
    }

    /// Returns the triple as a plain [TriplePattern], unless the predicate is a path.
    pub fn as_pattern(&self) -> Option<TriplePattern> {
        match &self.predicate {
            TriplePredicate::Term(predicate) => Some(TriplePattern {
                subject: self.subject.clone(),
                predicate: predicate.clone(),
                object: self.object.clone(),
            }),
            TriplePredicate::Path(_) => None,
        }
    }

    fn to_graph_pattern(&self) -> GraphPattern {
        match &self.predicate {
            TriplePredicate::Term(predicate) => GraphPattern::Bgp {
                patterns: vec![TriplePattern {
                    subject: self.subject.clone(),
                    predicate: predicate.clone(),
                    object: self.object.clone(),
                }],
            },
            TriplePredicate::Path(path) => GraphPattern::Path {
                subject: self.subject.clone(),
                path: path.clone(),
                object: self.object.clone(),
            },
        }
    }
}

impl From<TriplePattern> for WhereTriple {
    fn from(triple: TriplePattern) -> Self {
        Self {
            subject: triple.subject,
            predicate: TriplePredicate::Term(triple.predicate),
            object: triple.object,
        }
    }
}

impl fmt::Display for WhereTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.predicate {
            TriplePredicate::Term(predicate) => {
                write!(f, "{} {predicate} {}", self.subject, self.object)
            }
            TriplePredicate::Path(path) => write!(f, "{} {path} {}", self.subject, self.object),
        }
    }
}

fn path_mentions(path: &PropertyPathExpression, predicate: &NamedNode) -> bool {
    match path {
        PropertyPathExpression::NamedNode(node) => node == predicate,
        PropertyPathExpression::Reverse(inner)
        | PropertyPathExpression::ZeroOrMore(inner)
        | PropertyPathExpression::OneOrMore(inner)
        | PropertyPathExpression::ZeroOrOne(inner) => path_mentions(inner, predicate),
        PropertyPathExpression::Sequence(left, right)
        | PropertyPathExpression::Alternative(left, right) => {
            path_mentions(left, predicate) || path_mentions(right, predicate)
        }
        PropertyPathExpression::NegatedPropertySet(nodes) => nodes.contains(predicate),
    }
}

/// One element of a group graph pattern, in the order in which it was written.
#[derive(Clone, Debug, PartialEq)]
pub enum WhereElement {
    /// A run of consecutive triples.
    Triples(Vec<WhereTriple>),
    Filter(Expression),
    Bind {
        variable: Variable,
        expression: Expression,
    },
    Optional {
        pattern: GraphPattern,
        expression: Option<Expression>,
    },
    Minus(GraphPattern),
    Union(Vec<Query>),
    SubSelect(Box<Query>),
    Values {
        variables: Vec<Variable>,
        bindings: Vec<Vec<Option<GroundTerm>>>,
    },
    Graph {
        name: NamedNodePattern,
        pattern: GraphPattern,
    },
    Service {
        name: NamedNodePattern,
        pattern: GraphPattern,
        silent: bool,
    },
    /// A nested group `{ ... }` that is joined with its siblings.
    Group(GraphPattern),
}

/// The solution modifiers wrapped around the `WHERE` clause, outermost first.
#[derive(Clone, Debug, PartialEq)]
enum Modifier {
    Slice {
        start: usize,
        length: Option<usize>,
    },
    Distinct,
    Reduced,
    Project(Vec<Variable>),
    OrderBy(Vec<OrderExpression>),
    Extend {
        variable: Variable,
        expression: Expression,
    },
    Having(Expression),
    Group {
        variables: Vec<Variable>,
        aggregates: Vec<(Variable, AggregateExpression)>,
    },
}

/// A parsed query, decomposed into its solution modifiers and [WhereElement]s.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    form: QueryForm,
    dataset: Option<QueryDataset>,
    base_iri: Option<Iri<String>>,
    prefixes: Vec<(String, String)>,
    modifiers: Vec<Modifier>,
    elements: Vec<WhereElement>,
}

impl Query {
    /// Parses and validates a query.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let query = Self::parse_unvalidated(text)?;
        query.validate()?;
        Ok(query)
    }

    /// Parses a query without checking whether the computation pipeline supports it.
    pub fn parse_unvalidated(text: &str) -> Result<Self, SparqlSyntaxError> {
        let mut query = Self::from_sparql(SparqlQuery::parse(text, None)?);
        query.prefixes = parse::prefix_declarations(text);
        Ok(query)
    }

    /// Creates a query with the given form and an empty `WHERE` clause.
    pub fn new(form: QueryForm) -> Self {
        Self {
            form,
            dataset: None,
            base_iri: None,
            prefixes: Vec::new(),
            modifiers: Vec::new(),
            elements: Vec::new(),
        }
    }

    pub fn form(&self) -> &QueryForm {
        &self.form
    }

    pub fn is_select(&self) -> bool {
        self.form == QueryForm::Select
    }

    pub fn dataset(&self) -> Option<&QueryDataset> {
        self.dataset.as_ref()
    }

    pub fn set_dataset(&mut self, dataset: Option<QueryDataset>) {
        self.dataset = dataset;
    }

    pub fn prefixes(&self) -> &[(String, String)] {
        &self.prefixes
    }

    pub fn set_prefixes(&mut self, prefixes: Vec<(String, String)>) {
        self.prefixes = prefixes;
    }

    pub fn elements(&self) -> &[WhereElement] {
        &self.elements
    }

    pub fn push_element(&mut self, element: WhereElement) {
        self.elements.push(element);
    }

    /// Returns the triples of the top-level basic graph patterns.
    pub fn where_triples(&self) -> impl Iterator<Item = &WhereTriple> {
        self.elements
            .iter()
            .filter_map(|element| match element {
                WhereElement::Triples(triples) => Some(triples),
                _ => None,
            })
            .flatten()
    }

    /// Returns the top-level filter elements. Parsing already stores each operand of a top-level
    /// conjunction as its own filter.
    pub fn where_filters(&self) -> impl Iterator<Item = &Expression> {
        self.elements.iter().filter_map(|element| match element {
            WhereElement::Filter(expression) => Some(expression),
            _ => None,
        })
    }

    pub fn where_binds(&self) -> impl Iterator<Item = (&Variable, &Expression)> {
        self.elements.iter().filter_map(|element| match element {
            WhereElement::Bind {
                variable,
                expression,
            } => Some((variable, expression)),
            _ => None,
        })
    }

    /// Returns the variables bound by the top-level triples and binds.
    pub fn variables(&self) -> Vec<Variable> {
        let from_triples = self.where_triples().flat_map(|triple| {
            let predicate = match &triple.predicate {
                TriplePredicate::Term(NamedNodePattern::Variable(variable)) => Some(variable),
                _ => None,
            };
            term_variable(&triple.subject)
                .into_iter()
                .chain(predicate)
                .chain(term_variable(&triple.object))
        });
        let from_binds = self.where_binds().map(|(variable, _)| variable);
        from_triples.chain(from_binds).unique().cloned().collect()
    }

    /// Returns the top-level filters that only reference the given variables.
    pub fn filters_over(&self, variables: &[Variable]) -> Vec<Expression> {
        self.where_filters()
            .filter(|filter| {
                expression_variables(filter)
                    .is_some_and(|used| used.iter().all(|v| variables.contains(v)))
            })
            .cloned()
            .collect()
    }

    /// Adds triples to the first basic graph pattern, creating one if there is none yet.
    pub fn add_where_triples(&mut self, triples: impl IntoIterator<Item = WhereTriple>) {
        let block = self.elements.iter_mut().find_map(|element| match element {
            WhereElement::Triples(block) => Some(block),
            _ => None,
        });
        match block {
            Some(block) => block.extend(triples),
            None => {
                let block = triples.into_iter().collect::<Vec<_>>();
                if !block.is_empty() {
                    self.elements.insert(0, WhereElement::Triples(block));
                }
            }
        }
    }

    pub fn add_where_filters(&mut self, filters: impl IntoIterator<Item = Expression>) {
        self.elements
            .extend(filters.into_iter().map(WhereElement::Filter));
    }

    pub fn limit(&self) -> Option<usize> {
        match self.modifiers.first() {
            Some(Modifier::Slice { length, .. }) => *length,
            _ => None,
        }
    }

    pub fn set_limit(&mut self, limit: usize) {
        match self.modifiers.first_mut() {
            Some(Modifier::Slice { length, .. }) => *length = Some(limit),
            _ => self.modifiers.insert(
                0,
                Modifier::Slice {
                    start: 0,
                    length: Some(limit),
                },
            ),
        }
    }

    pub fn remove_limit(&mut self) {
        if let Some(Modifier::Slice { start, length }) = self.modifiers.first_mut() {
            if *start == 0 {
                self.modifiers.remove(0);
            } else {
                *length = None;
            }
        }
    }

    /// Returns every nested `SELECT` and every `UNION` branch, recursively.
    pub fn subqueries(&self) -> Vec<&Query> {
        let mut subqueries = Vec::new();
        for element in &self.elements {
            match element {
                WhereElement::SubSelect(query) => {
                    subqueries.push(query.as_ref());
                    subqueries.extend(query.subqueries());
                }
                WhereElement::Union(branches) => {
                    for branch in branches {
                        subqueries.push(branch);
                        subqueries.extend(branch.subqueries());
                    }
                }
                _ => {}
            }
        }
        subqueries
    }

    /// Returns whether this query or one of its subqueries uses any of the given predicates.
    pub fn mentions_any(&self, predicates: &[NamedNode]) -> bool {
        std::iter::once(self)
            .chain(self.subqueries())
            .flat_map(Query::where_triples)
            .any(|triple| predicates.iter().any(|p| triple.mentions(p)))
    }

    /// Checks that neither this query nor one of its subqueries contains nested groups or
    /// property paths.
    pub fn validate(&self) -> Result<(), ValidationError> {
        std::iter::once(self)
            .chain(self.subqueries())
            .try_for_each(Query::validate_elements)
    }

    fn validate_elements(&self) -> Result<(), ValidationError> {
        for element in &self.elements {
            match element {
                WhereElement::Group(_) => return Err(ValidationError::GroupPatternUnsupported),
                WhereElement::Triples(triples) => {
                    let path = triples.iter().find_map(|triple| match &triple.predicate {
                        TriplePredicate::Path(path) => Some(path),
                        TriplePredicate::Term(_) => None,
                    });
                    if let Some(path) = path {
                        return Err(ValidationError::PropertyPathUnsupported(Box::new(
                            path.clone(),
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (prefix, iri) in &self.prefixes {
            writeln!(f, "PREFIX {prefix}: <{iri}>")?;
        }
        write!(f, "{}", self.to_sparql())
    }
}

fn term_variable(term: &TermPattern) -> Option<&Variable> {
    match term {
        TermPattern::Variable(variable) => Some(variable),
        _ => None,
    }
}

/// Returns the variables referenced by `expression`.
///
/// Returns [None] for expressions containing `EXISTS`, whose variables depend on the scope the
/// expression is evaluated in.
pub(crate) fn expression_variables(expression: &Expression) -> Option<Vec<Variable>> {
    let mut variables = Vec::new();
    collect_expression_variables(expression, &mut variables).then_some(variables)
}

fn collect_expression_variables(expression: &Expression, variables: &mut Vec<Variable>) -> bool {
    match expression {
        Expression::NamedNode(_) | Expression::Literal(_) => true,
        Expression::Variable(variable) | Expression::Bound(variable) => {
            if !variables.contains(variable) {
                variables.push(variable.clone());
            }
            true
        }
        Expression::Or(left, right)
        | Expression::And(left, right)
        | Expression::Equal(left, right)
        | Expression::SameTerm(left, right)
        | Expression::Greater(left, right)
        | Expression::GreaterOrEqual(left, right)
        | Expression::Less(left, right)
        | Expression::LessOrEqual(left, right)
        | Expression::Add(left, right)
        | Expression::Subtract(left, right)
        | Expression::Multiply(left, right)
        | Expression::Divide(left, right) => {
            collect_expression_variables(left, variables)
                && collect_expression_variables(right, variables)
        }
        Expression::UnaryPlus(inner) | Expression::UnaryMinus(inner) | Expression::Not(inner) => {
            collect_expression_variables(inner, variables)
        }
        Expression::In(first, rest) => {
            collect_expression_variables(first, variables)
                && rest
                    .iter()
                    .all(|e| collect_expression_variables(e, variables))
        }
        Expression::If(a, b, c) => {
            collect_expression_variables(a, variables)
                && collect_expression_variables(b, variables)
                && collect_expression_variables(c, variables)
        }
        Expression::Coalesce(args) | Expression::FunctionCall(_, args) => args
            .iter()
            .all(|e| collect_expression_variables(e, variables)),
        Expression::Exists(_) => false,
    }
}
