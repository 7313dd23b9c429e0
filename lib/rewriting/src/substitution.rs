//! Rewriting of substitutable virtual predicates into their template patterns.

use crate::algebra::{
    blank_node_variable, AlgebraNode, AlgebraTree, Child, ExpressionNode, NodeId, TreeRange,
};
use crate::{
    PathOperator, SubstitutionError, TemplateError, OBJECT_PLACEHOLDER, SUBJECT_PLACEHOLDER,
};
use otfc_model::{
    BlankNode, GraphPattern, GroundTerm, NamedNode, NamedNodePattern, PropertyPathExpression,
    SparqlQuery, TermPattern, TriplePattern, Variable,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::HashMap;
use std::hash::BuildHasher;

/// The number of substitutions a single rewrite may perform before it is considered recursive.
pub const DEFAULT_EXPANSION_LIMIT: usize = 1_000;

/// A parsed substitution template.
///
/// The template is a `SELECT` query that uses the boundary variables `?_s` and `?_o`. They are
/// bound to the subject and object of the triple that is substituted.
#[derive(Clone, Debug)]
pub struct SubstitutionTemplate {
    text: String,
    pattern: GraphPattern,
    variables: FxHashSet<Variable>,
}

impl SubstitutionTemplate {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let SparqlQuery::Select { pattern, .. } = SparqlQuery::parse(text, None)? else {
            return Err(TemplateError::NotSelect);
        };
        let mut tree = AlgebraTree::default();
        tree.import(&pattern);
        let variables = tree.variables();
        for name in [SUBJECT_PLACEHOLDER, OBJECT_PLACEHOLDER] {
            if !variables.contains(&Variable::new_unchecked(name)) {
                return Err(TemplateError::MissingBoundaryVariable(name));
            }
        }
        Ok(Self {
            text: text.to_owned(),
            pattern,
            variables,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn pattern(&self) -> &GraphPattern {
        &self.pattern
    }
}

/// Looks up the substitution template of a predicate.
pub trait TemplateLookup {
    fn template(&self, predicate: &NamedNode) -> Option<&SubstitutionTemplate>;
}

impl<S: BuildHasher> TemplateLookup for HashMap<NamedNode, SubstitutionTemplate, S> {
    fn template(&self, predicate: &NamedNode) -> Option<&SubstitutionTemplate> {
        self.get(predicate)
    }
}

/// Parses `query`, substitutes every predicate known to `catalog` and serializes the result.
pub fn substitute<C: TemplateLookup + ?Sized>(
    query: &str,
    catalog: &C,
) -> Result<String, SubstitutionError> {
    let query = SparqlQuery::parse(query, None)?;
    let rewritten = Substitution::new(catalog).rewrite_query(query)?;
    Ok(rewritten.to_string())
}

/// A single rewrite pass.
///
/// The pass owns the arena for the pattern it rewrites. Every substitution instance gets a fresh
/// `_{n}` suffix that is appended to the internal variables of the template. `n` counts up within
/// the pass and skips values whose renamed variables would clash with a variable already in use.
pub struct Substitution<'c, C: ?Sized> {
    catalog: &'c C,
    tree: AlgebraTree,
    expansions: usize,
    expansion_limit: usize,
    next_suffix: usize,
}

impl<'c, C: TemplateLookup + ?Sized> Substitution<'c, C> {
    pub fn new(catalog: &'c C) -> Self {
        Self {
            catalog,
            tree: AlgebraTree::default(),
            expansions: 0,
            expansion_limit: DEFAULT_EXPANSION_LIMIT,
            next_suffix: 1,
        }
    }

    #[must_use]
    pub fn with_expansion_limit(mut self, expansion_limit: usize) -> Self {
        self.expansion_limit = expansion_limit;
        self
    }

    pub fn rewrite_query(&mut self, query: SparqlQuery) -> Result<SparqlQuery, SubstitutionError> {
        Ok(match query {
            SparqlQuery::Select {
                dataset,
                pattern,
                base_iri,
            } => SparqlQuery::Select {
                dataset,
                pattern: self.rewrite_pattern(&pattern)?,
                base_iri,
            },
            SparqlQuery::Construct {
                template,
                dataset,
                pattern,
                base_iri,
            } => SparqlQuery::Construct {
                template,
                dataset,
                pattern: self.rewrite_pattern(&pattern)?,
                base_iri,
            },
            SparqlQuery::Describe {
                dataset,
                pattern,
                base_iri,
            } => SparqlQuery::Describe {
                dataset,
                pattern: self.rewrite_pattern(&pattern)?,
                base_iri,
            },
            SparqlQuery::Ask {
                dataset,
                pattern,
                base_iri,
            } => SparqlQuery::Ask {
                dataset,
                pattern: self.rewrite_pattern(&pattern)?,
                base_iri,
            },
        })
    }

    pub fn rewrite_pattern(
        &mut self,
        pattern: &GraphPattern,
    ) -> Result<GraphPattern, SubstitutionError> {
        let root = self.tree.import(pattern);
        self.visit(root)?;
        Ok(self.tree.export(root))
    }

    fn visit(&mut self, id: NodeId) -> Result<(), SubstitutionError> {
        match &self.tree[id] {
            AlgebraNode::Bgp(_) => {
                if let Some(replacement) = self.substitute_bgp(id)? {
                    self.tree[id] = replacement;
                    self.visit(id)?;
                }
                Ok(())
            }
            AlgebraNode::Join(_) => self.visit_join(id),
            AlgebraNode::Path { path, .. } => self.check_path(path, PathOperator::Link),
            _ => self.visit_children(self.tree.children(id)),
        }
    }

    fn visit_children(&mut self, children: Vec<Child>) -> Result<(), SubstitutionError> {
        for child in children {
            match child {
                Child::Pattern(id) => self.visit(id)?,
                Child::Expression(id) => self.visit_children(self.tree.expression_children(id))?,
            }
        }
        Ok(())
    }

    /// Handles the inputs of a join left to right. A substitution that yields a join is spliced
    /// into the input list of this join.
    fn visit_join(&mut self, id: NodeId) -> Result<(), SubstitutionError> {
        let mut index = 0;
        loop {
            let AlgebraNode::Join(inputs) = &self.tree[id] else {
                return Ok(());
            };
            let Some(&child) = inputs.get(index) else {
                return Ok(());
            };
            let replacement = if matches!(self.tree[child], AlgebraNode::Bgp(_)) {
                self.substitute_bgp(child)?
            } else {
                self.visit(child)?;
                None
            };
            match replacement {
                None => index += 1,
                Some(AlgebraNode::Join(children)) => {
                    if let AlgebraNode::Join(inputs) = &mut self.tree[id] {
                        inputs.splice(index..=index, children);
                    }
                }
                Some(node) => self.tree[child] = node,
            }
        }
    }

    fn check_path(
        &self,
        path: &PropertyPathExpression,
        operator: PathOperator,
    ) -> Result<(), SubstitutionError> {
        match path {
            PropertyPathExpression::NamedNode(predicate) => self.check_link(predicate, operator),
            PropertyPathExpression::Reverse(inner) => self.check_path(inner, PathOperator::Inverse),
            PropertyPathExpression::Sequence(left, right) => {
                self.check_path(left, PathOperator::Sequence)?;
                self.check_path(right, PathOperator::Sequence)
            }
            PropertyPathExpression::Alternative(left, right) => {
                self.check_path(left, PathOperator::Alternative)?;
                self.check_path(right, PathOperator::Alternative)
            }
            PropertyPathExpression::ZeroOrMore(inner) => {
                self.check_path(inner, PathOperator::ZeroOrMore)
            }
            PropertyPathExpression::OneOrMore(inner) => {
                self.check_path(inner, PathOperator::OneOrMore)
            }
            PropertyPathExpression::ZeroOrOne(inner) => {
                self.check_path(inner, PathOperator::ZeroOrOne)
            }
            PropertyPathExpression::NegatedPropertySet(predicates) => predicates
                .iter()
                .try_for_each(|p| self.check_link(p, PathOperator::NegatedPropertySet)),
        }
    }

    fn check_link(
        &self,
        predicate: &NamedNode,
        operator: PathOperator,
    ) -> Result<(), SubstitutionError> {
        if self.catalog.template(predicate).is_some() {
            return Err(SubstitutionError::PathOperator {
                predicate: predicate.clone(),
                operator,
            });
        }
        Ok(())
    }

    /// Substitutes the first substitutable triple of a basic graph pattern.
    ///
    /// Returns the node that replaces the basic graph pattern, or [None] if it does not contain a
    /// substitutable predicate.
    fn substitute_bgp(&mut self, id: NodeId) -> Result<Option<AlgebraNode>, SubstitutionError> {
        let catalog = self.catalog;
        let AlgebraNode::Bgp(patterns) = &self.tree[id] else {
            return Ok(None);
        };
        let found = patterns
            .iter()
            .enumerate()
            .find_map(|(position, pattern)| match &pattern.predicate {
                NamedNodePattern::NamedNode(predicate) => catalog
                    .template(predicate)
                    .map(|template| (position, predicate.clone(), template)),
                NamedNodePattern::Variable(_) => None,
            });
        let Some((position, predicate, template)) = found else {
            return Ok(None);
        };

        self.expansions += 1;
        if self.expansions > self.expansion_limit {
            return Err(SubstitutionError::ExpansionLimit {
                predicate,
                limit: self.expansion_limit,
            });
        }

        let mut patterns = patterns.clone();
        let triple = patterns.remove(position);
        let subject = shared_blank_node(&triple.subject, &mut patterns);
        let object = shared_blank_node(&triple.object, &mut patterns);
        tracing::debug!("Substituting {triple}");

        let root = self.instantiate(template, &predicate, &subject, &object)?;
        let replacement = if patterns.is_empty() {
            self.tree.take(root)
        } else {
            match &self.tree[root] {
                AlgebraNode::Bgp(instance) => {
                    patterns.extend(instance.iter().cloned());
                    AlgebraNode::Bgp(patterns)
                }
                AlgebraNode::Join(inputs) => {
                    let inputs = inputs.clone();
                    let remaining = self.tree.insert(AlgebraNode::Bgp(patterns));
                    AlgebraNode::Join(std::iter::once(remaining).chain(inputs).collect())
                }
                _ => {
                    let remaining = self.tree.insert(AlgebraNode::Bgp(patterns));
                    AlgebraNode::Join(vec![remaining, root])
                }
            }
        };
        Ok(Some(replacement))
    }

    /// Imports a template, renames its internal variables and binds the boundary variables.
    fn instantiate(
        &mut self,
        template: &SubstitutionTemplate,
        predicate: &NamedNode,
        subject: &TermPattern,
        object: &TermPattern,
    ) -> Result<NodeId, SubstitutionError> {
        let (suffix, variables) = self.fresh_names(template);
        let mark = self.tree.watermark();
        let root = self.tree.import(template.pattern());
        let range = self.tree.since(mark);

        // Boundary terms may be variables, so they must only be bound in after renaming.
        Renaming {
            variables: &variables,
            suffix: &suffix,
        }
        .apply(&mut self.tree, &range);
        Boundary {
            predicate,
            subject,
            object,
            suffix: &suffix,
        }
        .apply(&mut self.tree, &range)?;

        Ok(self.simplify_projection(root))
    }

    /// Picks the next suffix under which no renamed variable of `template` collides with a
    /// variable of the tree or of the template itself.
    fn fresh_names(
        &mut self,
        template: &SubstitutionTemplate,
    ) -> (String, FxHashMap<Variable, Variable>) {
        let taken = self.tree.variables();
        loop {
            let suffix = format!("_{}", self.next_suffix);
            self.next_suffix += 1;
            let variables = template
                .variables
                .iter()
                .filter(|variable| !is_boundary(variable))
                .map(|variable| (variable.clone(), suffixed(variable, &suffix)))
                .collect::<FxHashMap<_, _>>();
            // Aggregates bound to a constant are renamed with the same suffix.
            let boundary = [SUBJECT_PLACEHOLDER, OBJECT_PLACEHOLDER]
                .map(|name| suffixed(&Variable::new_unchecked(name), &suffix));
            let clashes = variables
                .values()
                .chain(&boundary)
                .any(|renamed| taken.contains(renamed) || template.variables.contains(renamed));
            if !clashes {
                return (suffix, variables);
            }
        }
    }

    /// Drops a projection whose body does not depend on it.
    fn simplify_projection(&self, root: NodeId) -> NodeId {
        let AlgebraNode::Project { input, .. } = &self.tree[root] else {
            return root;
        };
        let mut current = *input;
        while let AlgebraNode::Extend { input, .. } = &self.tree[current] {
            current = *input;
        }
        match &self.tree[current] {
            AlgebraNode::OrderBy { .. } | AlgebraNode::Group { .. } | AlgebraNode::Slice { .. } => {
                root
            }
            _ => *input,
        }
    }
}

/// Turns a blank node of the substituted triple into a variable, as it is now shared with the
/// template pattern.
fn shared_blank_node(term: &TermPattern, patterns: &mut [TriplePattern]) -> TermPattern {
    let TermPattern::BlankNode(node) = term else {
        return term.clone();
    };
    let variable = TermPattern::Variable(blank_node_variable("_bn_", node));
    for pattern in patterns {
        for position in [&mut pattern.subject, &mut pattern.object] {
            if position == term {
                *position = variable.clone();
            }
        }
    }
    variable
}

fn suffixed(variable: &Variable, suffix: &str) -> Variable {
    Variable::new_unchecked(format!("{}{suffix}", variable.as_str()))
}

fn is_boundary(variable: &Variable) -> bool {
    matches!(variable.as_str(), SUBJECT_PLACEHOLDER | OBJECT_PLACEHOLDER)
}

/// Renames the internal variables of a template instance.
///
/// Renamed variables are never keys of `variables`, so applying the renaming twice to the same
/// term leaves it unchanged.
struct Renaming<'a> {
    variables: &'a FxHashMap<Variable, Variable>,
    suffix: &'a str,
}

impl Renaming<'_> {
    fn apply(&self, tree: &mut AlgebraTree, range: &TreeRange) {
        for id in range.nodes() {
            self.node(&mut tree[id]);
        }
        for id in range.expressions() {
            match &mut tree[id] {
                ExpressionNode::Variable(variable) => self.variable(variable),
                ExpressionNode::Bound(term) => self.term(term),
                _ => {}
            }
        }
    }

    fn node(&self, node: &mut AlgebraNode) {
        match node {
            AlgebraNode::Bgp(patterns) => patterns.iter_mut().for_each(|p| self.triple(p)),
            AlgebraNode::Path {
                subject, object, ..
            } => {
                self.term(subject);
                self.term(object);
            }
            AlgebraNode::Graph { name, .. } | AlgebraNode::Service { name, .. } => {
                self.named_node(name);
            }
            AlgebraNode::Extend { variable, .. } => self.variable(variable),
            AlgebraNode::Values { variables, .. } | AlgebraNode::Project { variables, .. } => {
                variables.iter_mut().for_each(|v| self.variable(v));
            }
            AlgebraNode::Group {
                variables,
                aggregates,
                ..
            } => {
                variables.iter_mut().for_each(|v| self.variable(v));
                aggregates
                    .iter_mut()
                    .for_each(|aggregate| self.variable(&mut aggregate.variable));
            }
            _ => {}
        }
    }

    fn triple(&self, triple: &mut TriplePattern) {
        self.term(&mut triple.subject);
        self.named_node(&mut triple.predicate);
        self.term(&mut triple.object);
    }

    fn term(&self, term: &mut TermPattern) {
        match term {
            TermPattern::Variable(variable) => self.variable(variable),
            TermPattern::BlankNode(node) => {
                *node = BlankNode::new_unchecked(format!("{}{}", node.as_str(), self.suffix));
            }
            TermPattern::Triple(triple) => self.triple(triple),
            TermPattern::NamedNode(_) | TermPattern::Literal(_) => {}
        }
    }

    fn named_node(&self, pattern: &mut NamedNodePattern) {
        if let NamedNodePattern::Variable(variable) = pattern {
            self.variable(variable);
        }
    }

    fn variable(&self, variable: &mut Variable) {
        if let Some(renamed) = self.variables.get(variable) {
            *variable = renamed.clone();
        }
    }
}

/// Binds the boundary variables of an instantiated template to the outer subject and object.
struct Boundary<'a> {
    predicate: &'a NamedNode,
    subject: &'a TermPattern,
    object: &'a TermPattern,
    suffix: &'a str,
}

impl Boundary<'_> {
    fn apply(&self, tree: &mut AlgebraTree, range: &TreeRange) -> Result<(), SubstitutionError> {
        for id in range.nodes() {
            let node = tree.take(id);
            tree[id] = self.node(tree, node)?;
        }
        for id in range.expressions() {
            match &mut tree[id] {
                ExpressionNode::Variable(variable) => {
                    if let Some(term) = self.bound(variable) {
                        tree[id] = self.expression(term)?;
                    }
                }
                ExpressionNode::Bound(term) => self.term(term),
                _ => {}
            }
        }
        Ok(())
    }

    fn bound(&self, variable: &Variable) -> Option<&TermPattern> {
        match variable.as_str() {
            SUBJECT_PLACEHOLDER => Some(self.subject),
            OBJECT_PLACEHOLDER => Some(self.object),
            _ => None,
        }
    }

    fn invalid(&self, term: &TermPattern) -> SubstitutionError {
        SubstitutionError::InvalidBoundary {
            predicate: self.predicate.clone(),
            term: term.to_string(),
        }
    }

    fn node(
        &self,
        tree: &mut AlgebraTree,
        mut node: AlgebraNode,
    ) -> Result<AlgebraNode, SubstitutionError> {
        let mut constraints = Vec::new();
        match &mut node {
            AlgebraNode::Bgp(patterns) => {
                for pattern in patterns {
                    self.triple(pattern)?;
                }
            }
            AlgebraNode::Path {
                subject, object, ..
            } => {
                self.term(subject);
                self.term(object);
            }
            AlgebraNode::Graph { name, .. } | AlgebraNode::Service { name, .. } => {
                self.named_node(name)?;
            }
            AlgebraNode::Project { variables, .. } => self.variables(variables),
            AlgebraNode::Extend {
                input,
                variable,
                expression,
            } => {
                if let Some(term) = self.bound(variable) {
                    match term {
                        TermPattern::Variable(outer) => *variable = outer.clone(),
                        constant => {
                            let constant = self.expression(constant)?;
                            let constant = tree.insert_expression(constant);
                            let expression = tree
                                .insert_expression(ExpressionNode::SameTerm(*expression, constant));
                            return Ok(AlgebraNode::Filter {
                                input: *input,
                                expression,
                            });
                        }
                    }
                }
            }
            AlgebraNode::Values {
                variables,
                bindings,
            } => self.values(variables, bindings)?,
            AlgebraNode::Group {
                variables,
                aggregates,
                ..
            } => {
                self.variables(variables);
                for aggregate in aggregates.iter_mut() {
                    let Some(term) = self.bound(&aggregate.variable) else {
                        continue;
                    };
                    match term {
                        TermPattern::Variable(outer) => aggregate.variable = outer.clone(),
                        constant => {
                            let fresh = suffixed(&aggregate.variable, self.suffix);
                            constraints.push((fresh.clone(), self.expression(constant)?));
                            aggregate.variable = fresh;
                        }
                    }
                }
            }
            _ => {}
        }

        // An aggregate cannot be bound to a constant, so the group is filtered instead.
        let mut condition = None;
        for (variable, constant) in constraints {
            let variable = tree.insert_expression(ExpressionNode::Variable(variable));
            let constant = tree.insert_expression(constant);
            let same = tree.insert_expression(ExpressionNode::SameTerm(variable, constant));
            condition = Some(match condition {
                Some(left) => tree.insert_expression(ExpressionNode::And(left, same)),
                None => same,
            });
        }
        Ok(match condition {
            Some(expression) => AlgebraNode::Filter {
                input: tree.insert(node),
                expression,
            },
            None => node,
        })
    }

    fn triple(&self, triple: &mut TriplePattern) -> Result<(), SubstitutionError> {
        self.term(&mut triple.subject);
        self.named_node(&mut triple.predicate)?;
        self.term(&mut triple.object);
        Ok(())
    }

    fn term(&self, term: &mut TermPattern) {
        match term {
            TermPattern::Variable(variable) => {
                if let Some(bound) = self.bound(variable) {
                    *term = bound.clone();
                }
            }
            TermPattern::Triple(triple) => {
                self.term(&mut triple.subject);
                self.term(&mut triple.object);
            }
            TermPattern::NamedNode(_) | TermPattern::BlankNode(_) | TermPattern::Literal(_) => {}
        }
    }

    fn named_node(&self, pattern: &mut NamedNodePattern) -> Result<(), SubstitutionError> {
        let NamedNodePattern::Variable(variable) = pattern else {
            return Ok(());
        };
        let Some(bound) = self.bound(variable) else {
            return Ok(());
        };
        *pattern = match bound {
            TermPattern::NamedNode(node) => NamedNodePattern::NamedNode(node.clone()),
            TermPattern::Variable(variable) => NamedNodePattern::Variable(variable.clone()),
            other => return Err(self.invalid(other)),
        };
        Ok(())
    }

    /// Binds the boundary variables of a projection. Constants are not projected.
    fn variables(&self, variables: &mut Vec<Variable>) {
        variables.retain_mut(|variable| match self.bound(variable) {
            None => true,
            Some(TermPattern::Variable(outer)) => {
                *variable = outer.clone();
                true
            }
            Some(_) => false,
        });
    }

    /// Binds the boundary columns of a `VALUES` block. A constant removes the column and keeps
    /// the rows that are compatible with it.
    fn values(
        &self,
        variables: &mut Vec<Variable>,
        bindings: &mut Vec<Vec<Option<GroundTerm>>>,
    ) -> Result<(), SubstitutionError> {
        let mut column = 0;
        while column < variables.len() {
            let Some(term) = self.bound(&variables[column]) else {
                column += 1;
                continue;
            };
            let constant = match term {
                TermPattern::Variable(outer) => {
                    variables[column] = outer.clone();
                    column += 1;
                    continue;
                }
                TermPattern::NamedNode(node) => GroundTerm::NamedNode(node.clone()),
                TermPattern::Literal(literal) => GroundTerm::Literal(literal.clone()),
                other => return Err(self.invalid(other)),
            };
            bindings.retain(|row| !matches!(row.get(column), Some(Some(value)) if *value != constant));
            for row in bindings.iter_mut() {
                if column < row.len() {
                    row.remove(column);
                }
            }
            variables.remove(column);
        }
        Ok(())
    }

    fn expression(&self, term: &TermPattern) -> Result<ExpressionNode, SubstitutionError> {
        match term {
            TermPattern::Variable(variable) => Ok(ExpressionNode::Variable(variable.clone())),
            TermPattern::NamedNode(node) => Ok(ExpressionNode::NamedNode(node.clone())),
            TermPattern::Literal(literal) => Ok(ExpressionNode::Literal(literal.clone())),
            other => Err(self.invalid(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(entries: &[(&str, &str)]) -> HashMap<NamedNode, SubstitutionTemplate> {
        entries
            .iter()
            .map(|(iri, template)| {
                (
                    NamedNode::new_unchecked(*iri),
                    SubstitutionTemplate::parse(template).expect("valid template"),
                )
            })
            .collect()
    }

    #[test]
    fn templates_must_use_both_boundary_variables() {
        assert!(matches!(
            SubstitutionTemplate::parse("SELECT ?_s WHERE { ?_s <http://example.com/a> ?x }"),
            Err(TemplateError::MissingBoundaryVariable("_o"))
        ));
        assert!(matches!(
            SubstitutionTemplate::parse("ASK { ?_s <http://example.com/a> ?_o }"),
            Err(TemplateError::NotSelect)
        ));
    }

    #[test]
    fn literal_in_predicate_position_is_rejected() {
        let catalog = catalog(&[(
            "http://example.com/p",
            "SELECT ?_s ?_o WHERE { ?x ?_o ?_s }",
        )]);
        let result = substitute(
            "SELECT * WHERE { ?s <http://example.com/p> \"literal\" }",
            &catalog,
        );
        assert!(matches!(
            result,
            Err(SubstitutionError::InvalidBoundary { .. })
        ));
    }

    #[test]
    fn recursive_templates_hit_the_expansion_limit() {
        let catalog = catalog(&[(
            "http://example.com/loop",
            "SELECT ?_s ?_o WHERE { ?_s <http://example.com/loop> ?_o }",
        )]);
        let query = SparqlQuery::parse(
            "SELECT * WHERE { ?s <http://example.com/loop> ?o }",
            None,
        )
        .expect("valid query");
        let result = Substitution::new(&catalog)
            .with_expansion_limit(5)
            .rewrite_query(query);
        assert!(matches!(
            result,
            Err(SubstitutionError::ExpansionLimit { limit: 5, .. })
        ));
    }

    #[test]
    fn constant_bound_to_an_extension_becomes_a_filter() {
        let catalog = catalog(&[(
            "http://example.com/label",
            "SELECT ?_s ?_o WHERE { ?_s <http://example.com/name> ?n BIND(STR(?n) AS ?_o) }",
        )]);
        let rewritten = substitute(
            "SELECT ?s WHERE { ?s <http://example.com/label> \"bob\" }",
            &catalog,
        )
        .expect("substitution succeeds");
        let query = SparqlQuery::parse(&rewritten, None).expect("rewritten query parses");
        let SparqlQuery::Select { pattern, .. } = query else {
            panic!("expected a select query");
        };
        let GraphPattern::Project { inner, .. } = pattern else {
            panic!("expected a projection");
        };
        assert!(
            matches!(*inner, GraphPattern::Filter { .. }),
            "unexpected pattern {inner:?}"
        );
    }

    #[test]
    fn constant_values_rows_are_restricted() {
        let catalog = catalog(&[(
            "http://example.com/in",
            "SELECT ?_s ?_o WHERE { VALUES (?_s ?_o) { (<http://example.com/a> 1) (<http://example.com/b> 2) } }",
        )]);
        let rewritten = substitute(
            "SELECT ?s WHERE { ?s <http://example.com/in> 2 }",
            &catalog,
        )
        .expect("substitution succeeds");
        let expected = SparqlQuery::parse(
            "SELECT ?s WHERE { VALUES ?s { <http://example.com/b> } }",
            None,
        )
        .expect("valid query");
        assert_eq!(
            SparqlQuery::parse(&rewritten, None).expect("rewritten query parses"),
            expected
        );
    }
}
