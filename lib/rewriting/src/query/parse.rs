use super::{Modifier, Query, QueryForm, TriplePredicate, WhereElement, WhereTriple};
use itertools::Itertools;
use otfc_model::{Expression, GraphPattern, SparqlQuery};
use regex::Regex;
use std::sync::LazyLock;

static PREFIX_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bPREFIX\s+([A-Za-z][\w\-.]*)?:\s*<([^>\s]*)>")
        .expect("Prefix declaration pattern is valid")
});

/// Extracts the `PREFIX` declarations of a query text.
pub(super) fn prefix_declarations(text: &str) -> Vec<(String, String)> {
    PREFIX_DECLARATION
        .captures_iter(text)
        .filter_map(|captures| {
            let prefix = captures.get(1).map_or("", |m| m.as_str());
            let iri = captures.get(2)?.as_str();
            Some((prefix.to_owned(), iri.to_owned()))
        })
        .unique()
        .collect()
}

impl Query {
    /// Decomposes a query of the SPARQL algebra and normalizes its simple paths.
    pub fn from_sparql(query: SparqlQuery) -> Self {
        let (form, dataset, pattern, base_iri) = match query {
            SparqlQuery::Select {
                dataset,
                pattern,
                base_iri,
            } => (QueryForm::Select, dataset, pattern, base_iri),
            SparqlQuery::Construct {
                template,
                dataset,
                pattern,
                base_iri,
            } => (QueryForm::Construct(template), dataset, pattern, base_iri),
            SparqlQuery::Describe {
                dataset,
                pattern,
                base_iri,
            } => (QueryForm::Describe, dataset, pattern, base_iri),
            SparqlQuery::Ask {
                dataset,
                pattern,
                base_iri,
            } => (QueryForm::Ask, dataset, pattern, base_iri),
        };
        let (modifiers, body) = split_modifiers(pattern);
        let mut query = Self {
            form,
            dataset,
            base_iri,
            prefixes: Vec::new(),
            modifiers,
            elements: split_where(body),
        };
        query.normalize();
        query
    }

    fn from_subselect(pattern: GraphPattern) -> Self {
        let (modifiers, body) = split_modifiers(pattern);
        Self {
            modifiers,
            elements: split_where(body),
            ..Self::new(QueryForm::Select)
        }
    }

    fn from_branch(pattern: GraphPattern) -> Self {
        Self {
            elements: split_where(pattern),
            ..Self::new(QueryForm::Pattern)
        }
    }
}

/// Peels the solution modifiers off a query pattern in the order the parser applies them.
fn split_modifiers(pattern: GraphPattern) -> (Vec<Modifier>, GraphPattern) {
    let mut modifiers = Vec::new();
    let pattern = match pattern {
        GraphPattern::Slice {
            inner,
            start,
            length,
        } => {
            modifiers.push(Modifier::Slice { start, length });
            *inner
        }
        pattern => pattern,
    };
    let pattern = match pattern {
        GraphPattern::Distinct { inner } => {
            modifiers.push(Modifier::Distinct);
            *inner
        }
        GraphPattern::Reduced { inner } => {
            modifiers.push(Modifier::Reduced);
            *inner
        }
        pattern => pattern,
    };
    let pattern = match pattern {
        GraphPattern::Project { inner, variables } => {
            modifiers.push(Modifier::Project(variables));
            *inner
        }
        pattern => pattern,
    };
    let pattern = match pattern {
        GraphPattern::OrderBy { inner, expression } => {
            modifiers.push(Modifier::OrderBy(expression));
            *inner
        }
        pattern => pattern,
    };
    let pattern = if has_aggregation(&pattern) {
        split_aggregation(pattern, &mut modifiers)
    } else {
        pattern
    };
    (modifiers, pattern)
}

fn has_aggregation(pattern: &GraphPattern) -> bool {
    match pattern {
        GraphPattern::Extend { inner, .. } | GraphPattern::Filter { inner, .. } => {
            has_aggregation(inner)
        }
        GraphPattern::Group { .. } => true,
        _ => false,
    }
}

fn split_aggregation(pattern: GraphPattern, modifiers: &mut Vec<Modifier>) -> GraphPattern {
    match pattern {
        GraphPattern::Extend {
            inner,
            variable,
            expression,
        } => {
            modifiers.push(Modifier::Extend {
                variable,
                expression,
            });
            split_aggregation(*inner, modifiers)
        }
        GraphPattern::Filter { expr, inner } => {
            modifiers.push(Modifier::Having(expr));
            split_aggregation(*inner, modifiers)
        }
        GraphPattern::Group {
            inner,
            variables,
            aggregates,
        } => {
            modifiers.push(Modifier::Group {
                variables,
                aggregates,
            });
            *inner
        }
        pattern => pattern,
    }
}

/// Splits the pattern of a group graph pattern into its elements.
fn split_where(pattern: GraphPattern) -> Vec<WhereElement> {
    let mut elements = Vec::new();
    match pattern {
        GraphPattern::Filter { expr, inner } => {
            split_spine(*inner, &mut elements);
            let mut filters = Vec::new();
            conjuncts(expr, &mut filters);
            elements.extend(filters.into_iter().map(WhereElement::Filter));
        }
        pattern => split_spine(pattern, &mut elements),
    }
    elements
}

fn conjuncts(expression: Expression, filters: &mut Vec<Expression>) {
    match expression {
        Expression::And(left, right) => {
            conjuncts(*left, filters);
            conjuncts(*right, filters);
        }
        expression => filters.push(expression),
    }
}

fn split_spine(pattern: GraphPattern, elements: &mut Vec<WhereElement>) {
    match pattern {
        GraphPattern::Join { left, right } => {
            split_spine(*left, elements);
            push_operand(*right, elements);
        }
        GraphPattern::LeftJoin {
            left,
            right,
            expression,
        } => {
            split_spine(*left, elements);
            elements.push(WhereElement::Optional {
                pattern: *right,
                expression,
            });
        }
        GraphPattern::Extend {
            inner,
            variable,
            expression,
        } => {
            split_spine(*inner, elements);
            elements.push(WhereElement::Bind {
                variable,
                expression,
            });
        }
        GraphPattern::Minus { left, right } => {
            split_spine(*left, elements);
            elements.push(WhereElement::Minus(*right));
        }
        pattern => push_operand(pattern, elements),
    }
}

fn push_operand(pattern: GraphPattern, elements: &mut Vec<WhereElement>) {
    let element = match pattern {
        GraphPattern::Bgp { patterns } => {
            push_triples(elements, patterns.into_iter().map(WhereTriple::from));
            return;
        }
        GraphPattern::Path {
            subject,
            path,
            object,
        } => {
            let triple = WhereTriple {
                subject,
                predicate: TriplePredicate::Path(path),
                object,
            };
            push_triples(elements, [triple]);
            return;
        }
        pattern @ GraphPattern::Union { .. } => {
            let mut branches = Vec::new();
            union_branches(pattern, &mut branches);
            WhereElement::Union(branches.into_iter().map(Query::from_branch).collect())
        }
        pattern @ (GraphPattern::Project { .. }
        | GraphPattern::Distinct { .. }
        | GraphPattern::Reduced { .. }
        | GraphPattern::Slice { .. }
        | GraphPattern::OrderBy { .. }
        | GraphPattern::Group { .. }) => WhereElement::SubSelect(Box::new(Query::from_subselect(pattern))),
        GraphPattern::Values {
            variables,
            bindings,
        } => WhereElement::Values {
            variables,
            bindings,
        },
        GraphPattern::Graph { name, inner } => WhereElement::Graph {
            name,
            pattern: *inner,
        },
        GraphPattern::Service {
            name,
            inner,
            silent,
        } => WhereElement::Service {
            name,
            pattern: *inner,
            silent,
        },
        pattern => WhereElement::Group(pattern),
    };
    elements.push(element);
}

fn push_triples(elements: &mut Vec<WhereElement>, triples: impl IntoIterator<Item = WhereTriple>) {
    if let Some(WhereElement::Triples(block)) = elements.last_mut() {
        block.extend(triples);
        return;
    }
    let block = triples.into_iter().collect::<Vec<_>>();
    if !block.is_empty() {
        elements.push(WhereElement::Triples(block));
    }
}

fn union_branches(pattern: GraphPattern, branches: &mut Vec<GraphPattern>) {
    match pattern {
        GraphPattern::Union { left, right } => {
            union_branches(*left, branches);
            union_branches(*right, branches);
        }
        pattern => branches.push(pattern),
    }
}
