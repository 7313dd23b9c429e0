use super::{Query, TriplePredicate, WhereElement, WhereTriple};
use otfc_model::{BlankNode, PropertyPathExpression, TermPattern};

impl Query {
    /// Rewrites the two trivial path shapes into plain triples.
    ///
    /// `?s ^:p ?o` becomes `?o :p ?s` and `?s :p/:q ?o` becomes `?s :p _:b . _:b :q ?o` with a
    /// fresh blank node. All other paths are kept and later rejected by [Query::validate].
    pub fn normalize(&mut self) {
        for element in &mut self.elements {
            match element {
                WhereElement::Triples(triples) => normalize_triples(triples),
                WhereElement::SubSelect(query) => query.normalize(),
                WhereElement::Union(branches) => branches.iter_mut().for_each(Query::normalize),
                _ => {}
            }
        }
    }
}

fn normalize_triples(triples: &mut Vec<WhereTriple>) {
    let mut normalized = Vec::with_capacity(triples.len());
    for WhereTriple {
        subject,
        predicate,
        object,
    } in std::mem::take(triples)
    {
        let TriplePredicate::Path(path) = predicate else {
            normalized.push(WhereTriple {
                subject,
                predicate,
                object,
            });
            continue;
        };
        match path {
            PropertyPathExpression::NamedNode(predicate) => {
                normalized.push(WhereTriple::new(subject, predicate, object));
            }
            PropertyPathExpression::Reverse(inner) => match *inner {
                PropertyPathExpression::NamedNode(predicate) => {
                    normalized.push(WhereTriple::new(object, predicate, subject));
                }
                inner => normalized.push(WhereTriple::path(
                    subject,
                    PropertyPathExpression::Reverse(Box::new(inner)),
                    object,
                )),
            },
            PropertyPathExpression::Sequence(first, second) => match (*first, *second) {
                (
                    PropertyPathExpression::NamedNode(first),
                    PropertyPathExpression::NamedNode(second),
                ) => {
                    let bridge = TermPattern::BlankNode(BlankNode::default());
                    normalized.push(WhereTriple::new(subject, first, bridge.clone()));
                    normalized.push(WhereTriple::new(bridge, second, object));
                }
                (first, second) => normalized.push(WhereTriple::path(
                    subject,
                    PropertyPathExpression::Sequence(Box::new(first), Box::new(second)),
                    object,
                )),
            },
            path => normalized.push(WhereTriple::path(subject, path, object)),
        }
    }
    *triples = normalized;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryForm;
    use otfc_model::{NamedNode, Variable};

    fn iri(name: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{name}"))
    }

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    #[test]
    fn normalization_without_paths_is_identity() -> Result<(), Box<dyn std::error::Error>> {
        let query = Query::parse(
            "SELECT * WHERE { ?s <http://example.com/a> ?o . ?o <http://example.com/b> \"x\" }",
        )?;
        let mut normalized = query.clone();
        normalized.normalize();
        assert_eq!(
            normalized.where_triples().collect::<Vec<_>>(),
            query.where_triples().collect::<Vec<_>>()
        );
        Ok(())
    }

    #[test]
    fn inverse_link_swaps_subject_and_object() {
        let mut query = Query::new(QueryForm::Select);
        query.add_where_triples([WhereTriple::path(
            var("s"),
            PropertyPathExpression::Reverse(Box::new(iri("a").into())),
            var("o"),
        )]);
        query.normalize();
        assert_eq!(
            query.where_triples().collect::<Vec<_>>(),
            [&WhereTriple::new(var("o"), iri("a"), var("s"))]
        );
    }

    #[test]
    fn two_hop_sequence_is_split_in_place() {
        let mut query = Query::new(QueryForm::Select);
        query.add_where_triples([
            WhereTriple::new(var("x"), iri("first"), var("s")),
            WhereTriple::path(
                var("s"),
                PropertyPathExpression::Sequence(
                    Box::new(iri("a").into()),
                    Box::new(iri("b").into()),
                ),
                var("o"),
            ),
            WhereTriple::new(var("o"), iri("last"), var("y")),
        ]);
        query.normalize();

        let triples = query.where_triples().collect::<Vec<_>>();
        assert_eq!(triples.len(), 4);
        assert_eq!(triples[1].subject, TermPattern::from(var("s")));
        assert_eq!(triples[1].predicate_iri(), Some(&iri("a")));
        assert!(matches!(triples[1].object, TermPattern::BlankNode(_)));
        assert_eq!(triples[2].subject, triples[1].object);
        assert_eq!(triples[2].predicate_iri(), Some(&iri("b")));
        assert_eq!(triples[2].object, TermPattern::from(var("o")));
        assert_eq!(triples[3].predicate_iri(), Some(&iri("last")));
    }

    #[test]
    fn other_paths_are_kept() {
        let mut query = Query::new(QueryForm::Select);
        let star = WhereTriple::path(
            var("s"),
            PropertyPathExpression::ZeroOrMore(Box::new(iri("a").into())),
            var("o"),
        );
        query.add_where_triples([star.clone()]);
        query.normalize();
        assert_eq!(query.where_triples().collect::<Vec<_>>(), [&star]);
        assert!(query.validate().is_err());
    }
}
