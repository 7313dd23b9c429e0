//! Splitting a query around computed predicates.
//!
//! After the compute predicates of a query have been evaluated, their triples live in a local
//! store. The rest of the query still refers to the original data source. A [FederationPlan]
//! partitions the triples of the query into the part that depends on computed data and the part
//! that has to be copied from the data source. The latter becomes a `CONSTRUCT` query whose
//! result is loaded into the local store, so that the whole query can be answered locally.

use crate::algebra::blank_node_variable;
use crate::{Query, QueryForm, WhereTriple};
use otfc_model::{
    Expression, NamedNode, QuerySolution, Term, TermPattern, TriplePattern, Variable,
};
use rustc_hash::FxHashSet;

/// The maximum number of subjects that are sampled from the computed triples.
pub const SAMPLE_LIMIT: usize = 10_000;

/// Returns the sampled rows, or [None] if the sample reached `limit` and may be truncated.
pub fn capped(rows: Vec<QuerySolution>, limit: usize) -> Option<Vec<QuerySolution>> {
    (rows.len() < limit).then_some(rows)
}

#[derive(Clone, Debug)]
pub struct FederationPlan {
    offload: Query,
    probe: Option<Query>,
    subjects: Vec<Variable>,
}

impl FederationPlan {
    /// Plans the offloading of `query`, whose `computed` predicates have been materialized.
    ///
    /// Returns [None] if every triple of the query depends on computed data.
    pub fn new(query: &Query, computed: &[NamedNode]) -> Option<Self> {
        let triples = query.where_triples().collect::<Vec<_>>();
        let mut excluded = vec![false; triples.len()];
        let mut visited = FxHashSet::default();
        let mut subjects = Vec::new();
        for (index, triple) in triples.iter().enumerate() {
            if !triple.predicate_iri().is_some_and(|p| computed.contains(p)) {
                continue;
            }
            excluded[index] = true;
            if let TermPattern::Variable(subject) = &triple.subject {
                if !subjects.contains(subject) {
                    subjects.push(subject.clone());
                }
            }
            exclude_path_from(&triple.object, &triples, &mut excluded, &mut visited);
        }

        let template = triples
            .iter()
            .zip(&excluded)
            .filter(|(_, excluded)| !**excluded)
            .filter_map(|(triple, _)| triple.as_pattern())
            .map(|triple| TriplePattern {
                subject: blank_to_variable(triple.subject),
                predicate: triple.predicate,
                object: blank_to_variable(triple.object),
            })
            .collect::<Vec<_>>();
        if template.is_empty() {
            return None;
        }

        let mut offload = Query::new(QueryForm::Construct(template.clone()));
        offload.add_where_triples(template.into_iter().map(WhereTriple::from));
        let variables = offload.variables();
        offload.add_where_filters(query.filters_over(&variables));
        offload.set_prefixes(query.prefixes().to_vec());
        offload.set_dataset(query.dataset().cloned());

        let probe = (!subjects.is_empty()).then(|| {
            let others = query
                .variables()
                .into_iter()
                .filter(|v| !variables.contains(v))
                .collect::<Vec<_>>();
            let mut probe = Query::new(QueryForm::Select);
            probe.add_where_triples(
                triples
                    .iter()
                    .zip(&excluded)
                    .filter(|(_, excluded)| **excluded)
                    .map(|(triple, _)| (*triple).clone()),
            );
            probe.add_where_filters(query.filters_over(&others));
            probe.set_prefixes(query.prefixes().to_vec());
            probe
        });

        Some(Self {
            offload,
            probe,
            subjects,
        })
    }

    /// The `SELECT` query that samples the subjects of the computed triples, if there are any
    /// variable subjects.
    pub fn probe(&self) -> Option<&Query> {
        self.probe.as_ref()
    }

    pub fn subjects(&self) -> &[Variable] {
        &self.subjects
    }

    /// The unrestricted `CONSTRUCT` query.
    pub fn offload(&self) -> &Query {
        &self.offload
    }

    /// Restricts the subjects of the offload query to the values of `sample`.
    ///
    /// [None] stands for a sample that could not be taken completely, in which case the offload
    /// query stays unrestricted.
    pub fn finish(self, sample: Option<&[QuerySolution]>) -> Query {
        let mut offload = self.offload;
        let Some(sample) = sample else {
            return offload;
        };
        let variables = offload.variables();
        let filters = self
            .subjects
            .iter()
            .filter(|subject| variables.contains(*subject))
            .filter_map(|subject| {
                let values = sampled_values(sample, subject)?;
                Some(Expression::In(
                    Box::new(Expression::Variable(subject.clone())),
                    values,
                ))
            })
            .collect::<Vec<_>>();
        offload.add_where_filters(filters);
        offload
    }
}

/// Excludes every triple that is reachable from `term`.
fn exclude_path_from(
    term: &TermPattern,
    triples: &[&WhereTriple],
    excluded: &mut [bool],
    visited: &mut FxHashSet<TermPattern>,
) {
    if matches!(term, TermPattern::NamedNode(_)) || !visited.insert(term.clone()) {
        return;
    }
    for (index, triple) in triples.iter().enumerate() {
        if triple.subject == *term {
            excluded[index] = true;
            exclude_path_from(&triple.object, triples, excluded, visited);
        }
    }
}

fn blank_to_variable(term: TermPattern) -> TermPattern {
    match term {
        TermPattern::BlankNode(node) => blank_node_variable("bn_", &node).into(),
        term => term,
    }
}

/// Returns the distinct values of `subject`. Blank nodes cannot be matched against another
/// store, so a sample containing them yields [None].
fn sampled_values(sample: &[QuerySolution], subject: &Variable) -> Option<Vec<Expression>> {
    let mut seen = FxHashSet::default();
    let mut values = Vec::new();
    for solution in sample {
        let Some(value) = solution.get(subject) else {
            continue;
        };
        if !seen.insert(value.clone()) {
            continue;
        }
        values.push(match value {
            Term::NamedNode(node) => Expression::NamedNode(node.clone()),
            Term::Literal(literal) => Expression::Literal(literal.clone()),
            Term::BlankNode(_) | Term::Triple(_) => return None,
        });
    }
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationError;
    use otfc_model::SparqlQuery;

    const QUERY: &str = "PREFIX : <http://example.com/>
        SELECT * WHERE {
            ?a :name ?n .
            ?a :compute ?c .
            ?c :unit ?u .
            FILTER(?n != \"x\")
            FILTER(?u > 1)
        }";

    fn iri(name: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{name}"))
    }

    fn row(a: &str) -> QuerySolution {
        (
            vec![Variable::new_unchecked("a")],
            vec![Some(Term::from(iri(a)))],
        )
            .into()
    }

    #[test]
    fn computed_triples_and_their_dependents_are_not_offloaded() -> Result<(), Box<dyn std::error::Error>> {
        let query = Query::parse(QUERY)?;
        let plan = FederationPlan::new(&query, &[iri("compute")]).ok_or("no plan")?;
        assert_eq!(plan.subjects(), [Variable::new_unchecked("a")]);

        let expected = SparqlQuery::parse(
            "PREFIX : <http://example.com/>
            CONSTRUCT { ?a :name ?n } WHERE { ?a :name ?n FILTER(?n != \"x\") }",
            None,
        )?;
        assert_eq!(plan.offload().to_sparql(), expected);
        assert_eq!(plan.offload().prefixes(), query.prefixes());

        let probe = plan.probe().ok_or("no probe")?;
        assert_eq!(probe.where_triples().count(), 2);
        assert_eq!(probe.where_filters().count(), 1);
        Ok(())
    }

    #[test]
    fn sample_restricts_the_subjects() -> Result<(), ValidationError> {
        let query = Query::parse(QUERY)?;
        let Some(plan) = FederationPlan::new(&query, &[iri("compute")]) else {
            panic!("expected a plan");
        };
        let sample = [row("x"), row("y"), row("x")];
        let offload = plan.finish(Some(sample.as_slice()));
        let restriction = offload
            .where_filters()
            .find(|filter| matches!(filter, Expression::In(..)))
            .cloned();
        assert_eq!(
            restriction,
            Some(Expression::In(
                Box::new(Expression::Variable(Variable::new_unchecked("a"))),
                vec![
                    Expression::NamedNode(iri("x")),
                    Expression::NamedNode(iri("y"))
                ],
            ))
        );
        Ok(())
    }

    #[test]
    fn truncated_samples_leave_the_query_unrestricted() -> Result<(), ValidationError> {
        let rows = (0..SAMPLE_LIMIT).map(|i| row(&i.to_string())).collect::<Vec<_>>();
        let sample = capped(rows, SAMPLE_LIMIT);
        assert!(sample.is_none());
        assert!(capped(vec![row("x")], SAMPLE_LIMIT).is_some());

        let query = Query::parse(QUERY)?;
        let Some(plan) = FederationPlan::new(&query, &[iri("compute")]) else {
            panic!("expected a plan");
        };
        let offload = plan.finish(sample.as_deref());
        assert_eq!(offload.where_filters().count(), 1);
        Ok(())
    }

    #[test]
    fn blank_nodes_become_variables() -> Result<(), ValidationError> {
        let query = Query::parse(
            "SELECT * WHERE {
                ?a <http://example.com/knows> [ <http://example.com/name> ?n ] .
                ?a <http://example.com/compute> ?c .
            }",
        )?;
        let Some(plan) = FederationPlan::new(&query, &[iri("compute")]) else {
            panic!("expected a plan");
        };
        let QueryForm::Construct(template) = plan.offload().form() else {
            panic!("expected a construct query");
        };
        assert_eq!(template.len(), 2);
        assert!(template
            .iter()
            .all(|t| !matches!(t.subject, TermPattern::BlankNode(_))
                && !matches!(t.object, TermPattern::BlankNode(_))));
        Ok(())
    }

    #[test]
    fn fully_computed_queries_have_nothing_to_offload() -> Result<(), ValidationError> {
        let query = Query::parse(
            "SELECT * WHERE { ?a <http://example.com/compute> ?c . ?c <http://example.com/unit> ?u }",
        )?;
        assert!(FederationPlan::new(&query, &[iri("compute")]).is_none());
        Ok(())
    }
}
