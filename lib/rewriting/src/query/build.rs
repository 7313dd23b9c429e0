use super::{Modifier, Query, QueryForm, WhereElement, WhereTriple};
use otfc_model::{Expression, GraphPattern, SparqlQuery};

impl Query {
    /// Rebuilds the SPARQL algebra of this query.
    pub fn to_sparql(&self) -> SparqlQuery {
        let pattern = self.to_pattern();
        let dataset = self.dataset.clone();
        let base_iri = self.base_iri.clone();
        match &self.form {
            QueryForm::Select | QueryForm::Pattern => SparqlQuery::Select {
                dataset,
                pattern,
                base_iri,
            },
            QueryForm::Construct(template) => SparqlQuery::Construct {
                template: template.clone(),
                dataset,
                pattern,
                base_iri,
            },
            QueryForm::Describe => SparqlQuery::Describe {
                dataset,
                pattern,
                base_iri,
            },
            QueryForm::Ask => SparqlQuery::Ask {
                dataset,
                pattern,
                base_iri,
            },
        }
    }

    /// Returns the pattern of the `WHERE` clause wrapped into the solution modifiers.
    pub fn to_pattern(&self) -> GraphPattern {
        self.modifiers
            .iter()
            .rev()
            .fold(self.where_pattern(), |inner, modifier| modifier.wrap(inner))
    }

    /// Returns the pattern of the `WHERE` clause.
    pub fn where_pattern(&self) -> GraphPattern {
        let mut pattern = empty();
        let mut filters = Vec::new();
        for element in &self.elements {
            pattern = match element {
                WhereElement::Triples(triples) => join(pattern, triples_pattern(triples)),
                WhereElement::Filter(expression) => {
                    filters.push(expression.clone());
                    pattern
                }
                WhereElement::Bind {
                    variable,
                    expression,
                } => GraphPattern::Extend {
                    inner: Box::new(pattern),
                    variable: variable.clone(),
                    expression: expression.clone(),
                },
                WhereElement::Optional {
                    pattern: right,
                    expression,
                } => GraphPattern::LeftJoin {
                    left: Box::new(pattern),
                    right: Box::new(right.clone()),
                    expression: expression.clone(),
                },
                WhereElement::Minus(right) => GraphPattern::Minus {
                    left: Box::new(pattern),
                    right: Box::new(right.clone()),
                },
                WhereElement::Union(branches) => {
                    let union = branches
                        .iter()
                        .map(Query::to_pattern)
                        .reduce(|left, right| GraphPattern::Union {
                            left: Box::new(left),
                            right: Box::new(right),
                        });
                    match union {
                        Some(union) => join(pattern, union),
                        None => pattern,
                    }
                }
                WhereElement::SubSelect(query) => join(pattern, query.to_pattern()),
                WhereElement::Values {
                    variables,
                    bindings,
                } => join(
                    pattern,
                    GraphPattern::Values {
                        variables: variables.clone(),
                        bindings: bindings.clone(),
                    },
                ),
                WhereElement::Graph { name, pattern: inner } => join(
                    pattern,
                    GraphPattern::Graph {
                        name: name.clone(),
                        inner: Box::new(inner.clone()),
                    },
                ),
                WhereElement::Service {
                    name,
                    pattern: inner,
                    silent,
                } => join(
                    pattern,
                    GraphPattern::Service {
                        name: name.clone(),
                        inner: Box::new(inner.clone()),
                        silent: *silent,
                    },
                ),
                WhereElement::Group(inner) => join(pattern, inner.clone()),
            };
        }
        let filter = filters
            .into_iter()
            .reduce(|left, right| Expression::And(Box::new(left), Box::new(right)));
        match filter {
            Some(expr) => GraphPattern::Filter {
                expr,
                inner: Box::new(pattern),
            },
            None => pattern,
        }
    }
}

impl Modifier {
    fn wrap(&self, inner: GraphPattern) -> GraphPattern {
        let inner = Box::new(inner);
        match self {
            Self::Slice { start, length } => GraphPattern::Slice {
                inner,
                start: *start,
                length: *length,
            },
            Self::Distinct => GraphPattern::Distinct { inner },
            Self::Reduced => GraphPattern::Reduced { inner },
            Self::Project(variables) => GraphPattern::Project {
                inner,
                variables: variables.clone(),
            },
            Self::OrderBy(expression) => GraphPattern::OrderBy {
                inner,
                expression: expression.clone(),
            },
            Self::Extend {
                variable,
                expression,
            } => GraphPattern::Extend {
                inner,
                variable: variable.clone(),
                expression: expression.clone(),
            },
            Self::Having(expr) => GraphPattern::Filter {
                expr: expr.clone(),
                inner,
            },
            Self::Group {
                variables,
                aggregates,
            } => GraphPattern::Group {
                inner,
                variables: variables.clone(),
                aggregates: aggregates.clone(),
            },
        }
    }
}

fn empty() -> GraphPattern {
    GraphPattern::Bgp {
        patterns: Vec::new(),
    }
}

fn triples_pattern(triples: &[WhereTriple]) -> GraphPattern {
    triples
        .iter()
        .map(WhereTriple::to_graph_pattern)
        .fold(empty(), join)
}

/// Joins two patterns, dropping empty basic graph patterns and merging adjacent ones.
pub(crate) fn join(left: GraphPattern, right: GraphPattern) -> GraphPattern {
    match (left, right) {
        (GraphPattern::Bgp { patterns }, right) if patterns.is_empty() => right,
        (left, GraphPattern::Bgp { patterns }) if patterns.is_empty() => left,
        (GraphPattern::Bgp { patterns: mut left }, GraphPattern::Bgp { patterns: right }) => {
            left.extend(right);
            GraphPattern::Bgp { patterns: left }
        }
        (left, right) => GraphPattern::Join {
            left: Box::new(left),
            right: Box::new(right),
        },
    }
}
