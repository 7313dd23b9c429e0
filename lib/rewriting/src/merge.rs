//! Overfetch avoidance for compute predicates.
//!
//! A compute predicate evaluates its own template query and hands the solutions to an external
//! procedure. Without further constraints, the template matches every subject in the data source.
//! The user query usually restricts the subject of the predicate through other triples and
//! filters. [ConstraintSet::mine] collects these restrictions and translates them into the
//! variable space of the template, so that [merge] can add them to it.

use crate::algebra::blank_node_variable;
use crate::query::expression_variables;
use crate::{Query, WhereTriple};
use otfc_model::{Expression, NamedNode, NamedNodePattern, TermPattern, TriplePattern, Variable};
use rustc_hash::{FxHashMap, FxHashSet};

/// Constraints of a user query, translated into the variables of a template.
#[derive(Clone, Debug, Default)]
pub struct ConstraintSet {
    pub constraints: Vec<TriplePattern>,
    pub filters: Vec<Expression>,
    /// Maps the terms of the user query to the variables of the template.
    pub mapping: FxHashMap<TermPattern, Variable>,
}

impl ConstraintSet {
    /// Mines the constraints on the subject of `predicate` from `user`.
    ///
    /// `subject` is the template variable that stands in for the subject of the predicate
    /// triple. Triples using one of the `excluded` predicates are not transferred.
    pub fn mine(
        template: &Query,
        subject: &Variable,
        user: &Query,
        predicate: &NamedNode,
        excluded: &[NamedNode],
    ) -> Self {
        let mut set = Self::default();
        let Some(anchor) = user
            .where_triples()
            .find(|triple| triple.predicate_iri() == Some(predicate))
            .map(|triple| triple.subject.clone())
        else {
            return set;
        };

        let template_triples = template
            .where_triples()
            .filter_map(WhereTriple::as_pattern)
            .collect::<Vec<_>>();
        let mut names = Names {
            taken: template
                .variables()
                .into_iter()
                .map(|v| v.into_string())
                .collect(),
        };
        names.taken.insert(subject.as_str().to_owned());

        match &anchor {
            TermPattern::NamedNode(node) => set.filters.push(Expression::SameTerm(
                Box::new(Expression::Variable(subject.clone())),
                Box::new(Expression::NamedNode(node.clone())),
            )),
            TermPattern::Literal(literal) => set.filters.push(Expression::SameTerm(
                Box::new(Expression::Variable(subject.clone())),
                Box::new(Expression::Literal(literal.clone())),
            )),
            _ => {}
        }
        set.mapping.insert(anchor, subject.clone());

        let mut pending = user
            .where_triples()
            .filter(|triple| match triple.predicate_iri() {
                Some(iri) => iri != predicate && !excluded.contains(iri),
                None => true,
            })
            .filter_map(WhereTriple::as_pattern)
            .filter(|triple| !has_quoted_triple(triple))
            .collect::<Vec<_>>();

        loop {
            let Some(position) = pending.iter().position(|triple| {
                set.mapping.contains_key(&triple.subject) || set.mapping.contains_key(&triple.object)
            }) else {
                break;
            };
            let triple = pending.remove(position);
            let constraint = set.translate(&triple, &template_triples, &mut names);
            if !template_triples.contains(&constraint) && !set.constraints.contains(&constraint) {
                set.constraints.push(constraint);
            }
        }

        for filter in user.where_filters() {
            if let Some(filter) = set.translate_filter(filter) {
                set.filters.push(filter);
            }
        }
        tracing::debug!(
            "Mined {} constraints and {} filters for {predicate}",
            set.constraints.len(),
            set.filters.len()
        );
        set
    }

    fn translate(
        &mut self,
        triple: &TriplePattern,
        template: &[TriplePattern],
        names: &mut Names,
    ) -> TriplePattern {
        // A template triple with the same predicate and the same known end provides the
        // variable for the other end.
        if let Some(subject) = self.mapping.get(&triple.subject).cloned() {
            if is_variable_like(&triple.object) && !self.mapping.contains_key(&triple.object) {
                if let Some(TermPattern::Variable(reused)) = template
                    .iter()
                    .find(|t| {
                        t.predicate == triple.predicate
                            && t.subject == TermPattern::Variable(subject.clone())
                    })
                    .map(|t| &t.object)
                {
                    self.mapping.insert(triple.object.clone(), reused.clone());
                }
            }
        } else if let Some(object) = self.mapping.get(&triple.object).cloned() {
            if is_variable_like(&triple.subject) {
                if let Some(TermPattern::Variable(reused)) = template
                    .iter()
                    .find(|t| {
                        t.predicate == triple.predicate
                            && t.object == TermPattern::Variable(object.clone())
                    })
                    .map(|t| &t.subject)
                {
                    self.mapping.insert(triple.subject.clone(), reused.clone());
                }
            }
        }

        TriplePattern {
            subject: self.term(&triple.subject, names),
            predicate: match &triple.predicate {
                NamedNodePattern::Variable(variable) => NamedNodePattern::Variable(
                    self.variable(TermPattern::Variable(variable.clone()), names),
                ),
                predicate @ NamedNodePattern::NamedNode(_) => predicate.clone(),
            },
            object: self.term(&triple.object, names),
        }
    }

    fn term(&mut self, term: &TermPattern, names: &mut Names) -> TermPattern {
        if let Some(variable) = self.mapping.get(term) {
            return variable.clone().into();
        }
        if is_variable_like(term) {
            return self.variable(term.clone(), names).into();
        }
        term.clone()
    }

    fn variable(&mut self, term: TermPattern, names: &mut Names) -> Variable {
        if let Some(variable) = self.mapping.get(&term) {
            return variable.clone();
        }
        let base = match &term {
            TermPattern::Variable(variable) => variable.as_str().to_owned(),
            TermPattern::BlankNode(node) => blank_node_variable("bn_", node).into_string(),
            other => other.to_string(),
        };
        let variable = names.fresh(base);
        self.mapping.insert(term, variable.clone());
        variable
    }

    /// Translates a user filter. Filters that reference a term without a mapping are dropped
    /// as a whole.
    fn translate_filter(&self, filter: &Expression) -> Option<Expression> {
        let variables = expression_variables(filter)?;
        let mut renaming = FxHashMap::default();
        for variable in variables {
            let mapped = self.mapping.get(&TermPattern::Variable(variable.clone()))?;
            renaming.insert(variable, mapped.clone());
        }
        Some(rename_expression(filter, &renaming))
    }
}

/// Names that are in use in the template, either by the template itself or by a translation.
struct Names {
    taken: FxHashSet<String>,
}

impl Names {
    fn fresh(&mut self, mut name: String) -> Variable {
        while self.taken.contains(&name) {
            name.insert(0, '_');
        }
        self.taken.insert(name.clone());
        Variable::new_unchecked(name)
    }
}

fn is_variable_like(term: &TermPattern) -> bool {
    matches!(term, TermPattern::Variable(_) | TermPattern::BlankNode(_))
}

fn has_quoted_triple(triple: &TriplePattern) -> bool {
    matches!(triple.subject, TermPattern::Triple(_)) || matches!(triple.object, TermPattern::Triple(_))
}

fn rename_expression(
    expression: &Expression,
    renaming: &FxHashMap<Variable, Variable>,
) -> Expression {
    let rename = |e: &Expression| Box::new(rename_expression(e, renaming));
    let rename_all = |args: &[Expression]| {
        args.iter()
            .map(|e| rename_expression(e, renaming))
            .collect::<Vec<_>>()
    };
    let variable = |v: &Variable| renaming.get(v).cloned().unwrap_or_else(|| v.clone());
    match expression {
        Expression::NamedNode(_) | Expression::Literal(_) | Expression::Exists(_) => {
            expression.clone()
        }
        Expression::Variable(v) => Expression::Variable(variable(v)),
        Expression::Bound(v) => Expression::Bound(variable(v)),
        Expression::Or(a, b) => Expression::Or(rename(a), rename(b)),
        Expression::And(a, b) => Expression::And(rename(a), rename(b)),
        Expression::Equal(a, b) => Expression::Equal(rename(a), rename(b)),
        Expression::SameTerm(a, b) => Expression::SameTerm(rename(a), rename(b)),
        Expression::Greater(a, b) => Expression::Greater(rename(a), rename(b)),
        Expression::GreaterOrEqual(a, b) => Expression::GreaterOrEqual(rename(a), rename(b)),
        Expression::Less(a, b) => Expression::Less(rename(a), rename(b)),
        Expression::LessOrEqual(a, b) => Expression::LessOrEqual(rename(a), rename(b)),
        Expression::In(a, list) => Expression::In(rename(a), rename_all(list)),
        Expression::Add(a, b) => Expression::Add(rename(a), rename(b)),
        Expression::Subtract(a, b) => Expression::Subtract(rename(a), rename(b)),
        Expression::Multiply(a, b) => Expression::Multiply(rename(a), rename(b)),
        Expression::Divide(a, b) => Expression::Divide(rename(a), rename(b)),
        Expression::UnaryPlus(a) => Expression::UnaryPlus(rename(a)),
        Expression::UnaryMinus(a) => Expression::UnaryMinus(rename(a)),
        Expression::Not(a) => Expression::Not(rename(a)),
        Expression::If(a, b, c) => Expression::If(rename(a), rename(b), rename(c)),
        Expression::Coalesce(args) => Expression::Coalesce(rename_all(args)),
        Expression::FunctionCall(function, args) => {
            Expression::FunctionCall(function.clone(), rename_all(args))
        }
    }
}

/// Adds the constraints of `user` on the subject of `predicate` to `template`.
pub fn merge(template: &Query, subject: &Variable, user: &Query, predicate: &NamedNode) -> Query {
    merge_excluding(template, subject, user, predicate, &[])
}

/// Like [merge], but triples using one of the `excluded` predicates are not transferred.
///
/// The engine excludes the other compute predicates of the query, whose triples do not exist in
/// the data source the template is evaluated against.
pub fn merge_excluding(
    template: &Query,
    subject: &Variable,
    user: &Query,
    predicate: &NamedNode,
    excluded: &[NamedNode],
) -> Query {
    let set = ConstraintSet::mine(template, subject, user, predicate, excluded);
    let mut merged = template.clone();
    merged.add_where_triples(set.constraints.into_iter().map(WhereTriple::from));
    merged.add_where_filters(set.filters);
    if let Some(limit) = user.limit() {
        // The limit of the user query does not bound the solutions of the template.
        tracing::warn!("Copying LIMIT {limit} onto the template of {predicate} as a heuristic");
        merged.set_limit(limit);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidationError;

    fn iri(name: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{name}"))
    }

    #[test]
    fn filters_over_unmapped_variables_are_dropped() -> Result<(), ValidationError> {
        let template = Query::parse("SELECT ?_s ?x WHERE { ?_s <http://example.com/foo> ?x }")?;
        let user = Query::parse(
            "SELECT * WHERE {
                ?a <http://example.com/age> ?age .
                ?a <http://example.com/compute> ?c .
                ?z <http://example.com/other> ?w .
                FILTER(?age > 18 && ?w < 3)
                FILTER(?age < 99 || ?w > 1)
            }",
        )?;
        let set = ConstraintSet::mine(
            &template,
            &Variable::new_unchecked("_s"),
            &user,
            &iri("compute"),
            &[],
        );
        assert_eq!(set.constraints.len(), 1);
        assert_eq!(set.filters.len(), 1);
        assert_eq!(
            set.filters[0].to_string(),
            Expression::Greater(
                Box::new(Expression::Variable(Variable::new_unchecked("age"))),
                Box::new(Expression::Literal(18.into())),
            )
            .to_string()
        );
        Ok(())
    }

    #[test]
    fn colliding_names_are_prefixed() -> Result<(), ValidationError> {
        let template = Query::parse("SELECT ?_s ?x WHERE { ?_s <http://example.com/foo> ?x }")?;
        let user = Query::parse(
            "SELECT * WHERE {
                ?a <http://example.com/bar> ?x .
                ?a <http://example.com/compute> ?c .
            }",
        )?;
        let set = ConstraintSet::mine(
            &template,
            &Variable::new_unchecked("_s"),
            &user,
            &iri("compute"),
            &[],
        );
        assert_eq!(
            set.constraints,
            [TriplePattern {
                subject: Variable::new_unchecked("_s").into(),
                predicate: iri("bar").into(),
                object: Variable::new_unchecked("_x").into(),
            }]
        );
        Ok(())
    }

    #[test]
    fn transitive_triples_and_known_template_triples() -> Result<(), ValidationError> {
        let template = Query::parse(
            "SELECT ?_s ?x WHERE { ?_s <http://example.com/foo> ?x . ?_s <http://example.com/knows> ?k }",
        )?;
        let user = Query::parse(
            "SELECT * WHERE {
                ?a <http://example.com/knows> ?b .
                ?b <http://example.com/name> \"bob\" .
                ?a <http://example.com/compute> ?c .
                ?c <http://example.com/unit> ?u .
            }",
        )?;
        let set = ConstraintSet::mine(
            &template,
            &Variable::new_unchecked("_s"),
            &user,
            &iri("compute"),
            &[],
        );
        // ?b reuses ?k of the template and the triple on the computed object is not reachable.
        assert_eq!(
            set.constraints,
            [TriplePattern {
                subject: Variable::new_unchecked("k").into(),
                predicate: iri("name").into(),
                object: otfc_model::Literal::new_simple_literal("bob").into(),
            }]
        );
        Ok(())
    }

    #[test]
    fn constant_subjects_become_filters() -> Result<(), ValidationError> {
        let template = Query::parse("SELECT ?_s ?x WHERE { ?_s <http://example.com/foo> ?x }")?;
        let user = Query::parse(
            "SELECT * WHERE { <http://example.com/alice> <http://example.com/compute> ?c }",
        )?;
        let merged = merge(
            &template,
            &Variable::new_unchecked("_s"),
            &user,
            &iri("compute"),
        );
        assert_eq!(merged.where_filters().count(), 1);
        Ok(())
    }

    #[test]
    fn excluded_predicates_are_not_transferred() -> Result<(), ValidationError> {
        let template = Query::parse("SELECT ?_s ?x WHERE { ?_s <http://example.com/foo> ?x }")?;
        let user = Query::parse(
            "SELECT * WHERE {
                ?a <http://example.com/other> ?o .
                ?a <http://example.com/compute> ?c .
            } LIMIT 3",
        )?;
        let merged = merge_excluding(
            &template,
            &Variable::new_unchecked("_s"),
            &user,
            &iri("compute"),
            &[iri("other")],
        );
        assert_eq!(merged.where_triples().count(), 1);
        assert_eq!(merged.limit(), Some(3));
        Ok(())
    }
}
