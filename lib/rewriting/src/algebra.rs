//! An arena representation of the SPARQL algebra.
//!
//! The substitution engine replaces subtrees while it is still walking the tree. Instead of
//! juggling boxed subtrees, graph patterns and expressions are stored in two arenas and refer to
//! their children by index. Rewriting a node means overwriting its slot; every parent that refers
//! to the slot observes the new content.

use crate::query::join;
use otfc_model::{
    AggregateExpression, AggregateFunction, BlankNode, Expression, Function, GraphPattern,
    GroundTerm, Literal, NamedNode, NamedNodePattern, OrderExpression, PropertyPathExpression,
    TermPattern, TriplePattern, Variable,
};
use rustc_hash::FxHashSet;
use std::ops::{Index, IndexMut, Range};

/// Index of an [AlgebraNode] in an [AlgebraTree].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Index of an [ExpressionNode] in an [AlgebraTree].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(usize);

/// A graph pattern whose children live in the same [AlgebraTree].
#[derive(Clone, Debug, PartialEq)]
pub enum AlgebraNode {
    Bgp(Vec<TriplePattern>),
    /// A property path that is not a plain link.
    Path {
        subject: TermPattern,
        path: PropertyPathExpression,
        object: TermPattern,
    },
    /// An n-ary join. Nested joins are flattened on import.
    Join(Vec<NodeId>),
    LeftJoin {
        left: NodeId,
        right: NodeId,
        expression: Option<ExprId>,
    },
    Lateral {
        left: NodeId,
        right: NodeId,
    },
    Filter {
        input: NodeId,
        expression: ExprId,
    },
    Union {
        left: NodeId,
        right: NodeId,
    },
    Graph {
        name: NamedNodePattern,
        input: NodeId,
    },
    Extend {
        input: NodeId,
        variable: Variable,
        expression: ExprId,
    },
    Minus {
        left: NodeId,
        right: NodeId,
    },
    Values {
        variables: Vec<Variable>,
        bindings: Vec<Vec<Option<GroundTerm>>>,
    },
    OrderBy {
        input: NodeId,
        keys: Vec<OrderKey>,
    },
    Project {
        input: NodeId,
        variables: Vec<Variable>,
    },
    Distinct(NodeId),
    Reduced(NodeId),
    Slice {
        input: NodeId,
        start: usize,
        length: Option<usize>,
    },
    Group {
        input: NodeId,
        variables: Vec<Variable>,
        aggregates: Vec<Aggregate>,
    },
    Service {
        name: NamedNodePattern,
        input: NodeId,
        silent: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrderKey {
    pub descending: bool,
    pub expression: ExprId,
}

/// An aggregate computed by a [AlgebraNode::Group] and bound to `variable`.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregate {
    pub variable: Variable,
    pub kind: AggregateKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AggregateKind {
    CountSolutions {
        distinct: bool,
    },
    Function {
        name: AggregateFunction,
        expression: ExprId,
        distinct: bool,
    },
}

/// An expression whose operands live in the same [AlgebraTree].
#[derive(Clone, Debug, PartialEq)]
pub enum ExpressionNode {
    NamedNode(NamedNode),
    Literal(Literal),
    Variable(Variable),
    Or(ExprId, ExprId),
    And(ExprId, ExprId),
    Equal(ExprId, ExprId),
    SameTerm(ExprId, ExprId),
    Greater(ExprId, ExprId),
    GreaterOrEqual(ExprId, ExprId),
    Less(ExprId, ExprId),
    LessOrEqual(ExprId, ExprId),
    In(ExprId, Vec<ExprId>),
    Add(ExprId, ExprId),
    Subtract(ExprId, ExprId),
    Multiply(ExprId, ExprId),
    Divide(ExprId, ExprId),
    UnaryPlus(ExprId),
    UnaryMinus(ExprId),
    Not(ExprId),
    Exists(NodeId),
    /// `BOUND` over a term. Once a constant is bound in, the expression is always true.
    Bound(TermPattern),
    If(ExprId, ExprId, ExprId),
    Coalesce(Vec<ExprId>),
    FunctionCall(Function, Vec<ExprId>),
}

/// A direct child of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Child {
    Pattern(NodeId),
    Expression(ExprId),
}

/// The arena sizes at a given point in time.
#[derive(Clone, Copy, Debug)]
pub struct Watermark {
    patterns: usize,
    expressions: usize,
}

/// The nodes that have been inserted after a [Watermark].
#[derive(Clone, Debug)]
pub struct TreeRange {
    patterns: Range<usize>,
    expressions: Range<usize>,
}

impl TreeRange {
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        self.patterns.clone().map(NodeId)
    }

    pub fn expressions(&self) -> impl Iterator<Item = ExprId> {
        self.expressions.clone().map(ExprId)
    }
}

#[derive(Clone, Debug, Default)]
pub struct AlgebraTree {
    patterns: Vec<AlgebraNode>,
    expressions: Vec<ExpressionNode>,
}

impl AlgebraTree {
    pub fn insert(&mut self, node: AlgebraNode) -> NodeId {
        self.patterns.push(node);
        NodeId(self.patterns.len() - 1)
    }

    pub fn insert_expression(&mut self, node: ExpressionNode) -> ExprId {
        self.expressions.push(node);
        ExprId(self.expressions.len() - 1)
    }

    /// Moves the content out of a slot, leaving an empty basic graph pattern behind.
    pub fn take(&mut self, id: NodeId) -> AlgebraNode {
        std::mem::replace(&mut self[id], AlgebraNode::Bgp(Vec::new()))
    }

    pub fn watermark(&self) -> Watermark {
        Watermark {
            patterns: self.patterns.len(),
            expressions: self.expressions.len(),
        }
    }

    pub fn since(&self, mark: Watermark) -> TreeRange {
        TreeRange {
            patterns: mark.patterns..self.patterns.len(),
            expressions: mark.expressions..self.expressions.len(),
        }
    }

    /// Copies a graph pattern into the arena and returns the id of its root.
    pub fn import(&mut self, pattern: &GraphPattern) -> NodeId {
        let node = match pattern {
            GraphPattern::Bgp { patterns } => AlgebraNode::Bgp(patterns.clone()),
            GraphPattern::Path {
                subject,
                path: PropertyPathExpression::NamedNode(predicate),
                object,
            } => AlgebraNode::Bgp(vec![TriplePattern {
                subject: subject.clone(),
                predicate: predicate.clone().into(),
                object: object.clone(),
            }]),
            GraphPattern::Path {
                subject,
                path,
                object,
            } => AlgebraNode::Path {
                subject: subject.clone(),
                path: path.clone(),
                object: object.clone(),
            },
            GraphPattern::Join { .. } => {
                let mut inputs = Vec::new();
                self.import_join(pattern, &mut inputs);
                AlgebraNode::Join(inputs)
            }
            GraphPattern::LeftJoin {
                left,
                right,
                expression,
            } => AlgebraNode::LeftJoin {
                left: self.import(left),
                right: self.import(right),
                expression: expression.as_ref().map(|e| self.import_expression(e)),
            },
            GraphPattern::Lateral { left, right } => AlgebraNode::Lateral {
                left: self.import(left),
                right: self.import(right),
            },
            GraphPattern::Filter { expr, inner } => AlgebraNode::Filter {
                input: self.import(inner),
                expression: self.import_expression(expr),
            },
            GraphPattern::Union { left, right } => AlgebraNode::Union {
                left: self.import(left),
                right: self.import(right),
            },
            GraphPattern::Graph { name, inner } => AlgebraNode::Graph {
                name: name.clone(),
                input: self.import(inner),
            },
            GraphPattern::Extend {
                inner,
                variable,
                expression,
            } => AlgebraNode::Extend {
                input: self.import(inner),
                variable: variable.clone(),
                expression: self.import_expression(expression),
            },
            GraphPattern::Minus { left, right } => AlgebraNode::Minus {
                left: self.import(left),
                right: self.import(right),
            },
            GraphPattern::Values {
                variables,
                bindings,
            } => AlgebraNode::Values {
                variables: variables.clone(),
                bindings: bindings.clone(),
            },
            GraphPattern::OrderBy { inner, expression } => AlgebraNode::OrderBy {
                input: self.import(inner),
                keys: expression
                    .iter()
                    .map(|key| match key {
                        OrderExpression::Asc(e) => OrderKey {
                            descending: false,
                            expression: self.import_expression(e),
                        },
                        OrderExpression::Desc(e) => OrderKey {
                            descending: true,
                            expression: self.import_expression(e),
                        },
                    })
                    .collect(),
            },
            GraphPattern::Project { inner, variables } => AlgebraNode::Project {
                input: self.import(inner),
                variables: variables.clone(),
            },
            GraphPattern::Distinct { inner } => AlgebraNode::Distinct(self.import(inner)),
            GraphPattern::Reduced { inner } => AlgebraNode::Reduced(self.import(inner)),
            GraphPattern::Slice {
                inner,
                start,
                length,
            } => AlgebraNode::Slice {
                input: self.import(inner),
                start: *start,
                length: *length,
            },
            GraphPattern::Group {
                inner,
                variables,
                aggregates,
            } => AlgebraNode::Group {
                input: self.import(inner),
                variables: variables.clone(),
                aggregates: aggregates
                    .iter()
                    .map(|(variable, aggregate)| Aggregate {
                        variable: variable.clone(),
                        kind: match aggregate {
                            AggregateExpression::CountSolutions { distinct } => {
                                AggregateKind::CountSolutions {
                                    distinct: *distinct,
                                }
                            }
                            AggregateExpression::FunctionCall {
                                name,
                                expr,
                                distinct,
                            } => AggregateKind::Function {
                                name: name.clone(),
                                expression: self.import_expression(expr),
                                distinct: *distinct,
                            },
                        },
                    })
                    .collect(),
            },
            GraphPattern::Service {
                name,
                inner,
                silent,
            } => AlgebraNode::Service {
                name: name.clone(),
                input: self.import(inner),
                silent: *silent,
            },
        };
        self.insert(node)
    }

    fn import_join(&mut self, pattern: &GraphPattern, inputs: &mut Vec<NodeId>) {
        match pattern {
            GraphPattern::Join { left, right } => {
                self.import_join(left, inputs);
                self.import_join(right, inputs);
            }
            pattern => inputs.push(self.import(pattern)),
        }
    }

    pub fn import_expression(&mut self, expression: &Expression) -> ExprId {
        let node = match expression {
            Expression::NamedNode(node) => ExpressionNode::NamedNode(node.clone()),
            Expression::Literal(literal) => ExpressionNode::Literal(literal.clone()),
            Expression::Variable(variable) => ExpressionNode::Variable(variable.clone()),
            Expression::Or(a, b) => {
                ExpressionNode::Or(self.import_expression(a), self.import_expression(b))
            }
            Expression::And(a, b) => {
                ExpressionNode::And(self.import_expression(a), self.import_expression(b))
            }
            Expression::Equal(a, b) => {
                ExpressionNode::Equal(self.import_expression(a), self.import_expression(b))
            }
            Expression::SameTerm(a, b) => {
                ExpressionNode::SameTerm(self.import_expression(a), self.import_expression(b))
            }
            Expression::Greater(a, b) => {
                ExpressionNode::Greater(self.import_expression(a), self.import_expression(b))
            }
            Expression::GreaterOrEqual(a, b) => ExpressionNode::GreaterOrEqual(
                self.import_expression(a),
                self.import_expression(b),
            ),
            Expression::Less(a, b) => {
                ExpressionNode::Less(self.import_expression(a), self.import_expression(b))
            }
            Expression::LessOrEqual(a, b) => {
                ExpressionNode::LessOrEqual(self.import_expression(a), self.import_expression(b))
            }
            Expression::In(a, list) => ExpressionNode::In(
                self.import_expression(a),
                list.iter().map(|e| self.import_expression(e)).collect(),
            ),
            Expression::Add(a, b) => {
                ExpressionNode::Add(self.import_expression(a), self.import_expression(b))
            }
            Expression::Subtract(a, b) => {
                ExpressionNode::Subtract(self.import_expression(a), self.import_expression(b))
            }
            Expression::Multiply(a, b) => {
                ExpressionNode::Multiply(self.import_expression(a), self.import_expression(b))
            }
            Expression::Divide(a, b) => {
                ExpressionNode::Divide(self.import_expression(a), self.import_expression(b))
            }
            Expression::UnaryPlus(a) => ExpressionNode::UnaryPlus(self.import_expression(a)),
            Expression::UnaryMinus(a) => ExpressionNode::UnaryMinus(self.import_expression(a)),
            Expression::Not(a) => ExpressionNode::Not(self.import_expression(a)),
            Expression::Exists(pattern) => ExpressionNode::Exists(self.import(pattern)),
            Expression::Bound(variable) => {
                ExpressionNode::Bound(TermPattern::Variable(variable.clone()))
            }
            Expression::If(a, b, c) => ExpressionNode::If(
                self.import_expression(a),
                self.import_expression(b),
                self.import_expression(c),
            ),
            Expression::Coalesce(args) => {
                ExpressionNode::Coalesce(args.iter().map(|e| self.import_expression(e)).collect())
            }
            Expression::FunctionCall(function, args) => ExpressionNode::FunctionCall(
                function.clone(),
                args.iter().map(|e| self.import_expression(e)).collect(),
            ),
        };
        self.insert_expression(node)
    }

    /// Rebuilds the graph pattern rooted at `id`.
    pub fn export(&self, id: NodeId) -> GraphPattern {
        match &self[id] {
            AlgebraNode::Bgp(patterns) => GraphPattern::Bgp {
                patterns: patterns.clone(),
            },
            AlgebraNode::Path {
                subject,
                path,
                object,
            } => GraphPattern::Path {
                subject: subject.clone(),
                path: path.clone(),
                object: object.clone(),
            },
            AlgebraNode::Join(inputs) => inputs.iter().fold(
                GraphPattern::Bgp {
                    patterns: Vec::new(),
                },
                |left, input| join(left, self.export(*input)),
            ),
            AlgebraNode::LeftJoin {
                left,
                right,
                expression,
            } => GraphPattern::LeftJoin {
                left: self.boxed(*left),
                right: self.boxed(*right),
                expression: expression.map(|e| self.export_expression(e)),
            },
            AlgebraNode::Lateral { left, right } => GraphPattern::Lateral {
                left: self.boxed(*left),
                right: self.boxed(*right),
            },
            AlgebraNode::Filter { input, expression } => GraphPattern::Filter {
                expr: self.export_expression(*expression),
                inner: self.boxed(*input),
            },
            AlgebraNode::Union { left, right } => GraphPattern::Union {
                left: self.boxed(*left),
                right: self.boxed(*right),
            },
            AlgebraNode::Graph { name, input } => GraphPattern::Graph {
                name: name.clone(),
                inner: self.boxed(*input),
            },
            AlgebraNode::Extend {
                input,
                variable,
                expression,
            } => GraphPattern::Extend {
                inner: self.boxed(*input),
                variable: variable.clone(),
                expression: self.export_expression(*expression),
            },
            AlgebraNode::Minus { left, right } => GraphPattern::Minus {
                left: self.boxed(*left),
                right: self.boxed(*right),
            },
            AlgebraNode::Values {
                variables,
                bindings,
            } => GraphPattern::Values {
                variables: variables.clone(),
                bindings: bindings.clone(),
            },
            AlgebraNode::OrderBy { input, keys } => GraphPattern::OrderBy {
                inner: self.boxed(*input),
                expression: keys
                    .iter()
                    .map(|key| {
                        let expression = self.export_expression(key.expression);
                        if key.descending {
                            OrderExpression::Desc(expression)
                        } else {
                            OrderExpression::Asc(expression)
                        }
                    })
                    .collect(),
            },
            AlgebraNode::Project { input, variables } => GraphPattern::Project {
                inner: self.boxed(*input),
                variables: variables.clone(),
            },
            AlgebraNode::Distinct(input) => GraphPattern::Distinct {
                inner: self.boxed(*input),
            },
            AlgebraNode::Reduced(input) => GraphPattern::Reduced {
                inner: self.boxed(*input),
            },
            AlgebraNode::Slice {
                input,
                start,
                length,
            } => GraphPattern::Slice {
                inner: self.boxed(*input),
                start: *start,
                length: *length,
            },
            AlgebraNode::Group {
                input,
                variables,
                aggregates,
            } => GraphPattern::Group {
                inner: self.boxed(*input),
                variables: variables.clone(),
                aggregates: aggregates
                    .iter()
                    .map(|aggregate| {
                        let expression = match &aggregate.kind {
                            AggregateKind::CountSolutions { distinct } => {
                                AggregateExpression::CountSolutions {
                                    distinct: *distinct,
                                }
                            }
                            AggregateKind::Function {
                                name,
                                expression,
                                distinct,
                            } => AggregateExpression::FunctionCall {
                                name: name.clone(),
                                expr: self.export_expression(*expression),
                                distinct: *distinct,
                            },
                        };
                        (aggregate.variable.clone(), expression)
                    })
                    .collect(),
            },
            AlgebraNode::Service {
                name,
                input,
                silent,
            } => GraphPattern::Service {
                name: name.clone(),
                inner: self.boxed(*input),
                silent: *silent,
            },
        }
    }

    fn boxed(&self, id: NodeId) -> Box<GraphPattern> {
        Box::new(self.export(id))
    }

    pub fn export_expression(&self, id: ExprId) -> Expression {
        let boxed = |id: ExprId| Box::new(self.export_expression(id));
        match &self[id] {
            ExpressionNode::NamedNode(node) => Expression::NamedNode(node.clone()),
            ExpressionNode::Literal(literal) => Expression::Literal(literal.clone()),
            ExpressionNode::Variable(variable) => Expression::Variable(variable.clone()),
            ExpressionNode::Or(a, b) => Expression::Or(boxed(*a), boxed(*b)),
            ExpressionNode::And(a, b) => Expression::And(boxed(*a), boxed(*b)),
            ExpressionNode::Equal(a, b) => Expression::Equal(boxed(*a), boxed(*b)),
            ExpressionNode::SameTerm(a, b) => Expression::SameTerm(boxed(*a), boxed(*b)),
            ExpressionNode::Greater(a, b) => Expression::Greater(boxed(*a), boxed(*b)),
            ExpressionNode::GreaterOrEqual(a, b) => {
                Expression::GreaterOrEqual(boxed(*a), boxed(*b))
            }
            ExpressionNode::Less(a, b) => Expression::Less(boxed(*a), boxed(*b)),
            ExpressionNode::LessOrEqual(a, b) => Expression::LessOrEqual(boxed(*a), boxed(*b)),
            ExpressionNode::In(a, list) => Expression::In(
                boxed(*a),
                list.iter().map(|e| self.export_expression(*e)).collect(),
            ),
            ExpressionNode::Add(a, b) => Expression::Add(boxed(*a), boxed(*b)),
            ExpressionNode::Subtract(a, b) => Expression::Subtract(boxed(*a), boxed(*b)),
            ExpressionNode::Multiply(a, b) => Expression::Multiply(boxed(*a), boxed(*b)),
            ExpressionNode::Divide(a, b) => Expression::Divide(boxed(*a), boxed(*b)),
            ExpressionNode::UnaryPlus(a) => Expression::UnaryPlus(boxed(*a)),
            ExpressionNode::UnaryMinus(a) => Expression::UnaryMinus(boxed(*a)),
            ExpressionNode::Not(a) => Expression::Not(boxed(*a)),
            ExpressionNode::Exists(pattern) => Expression::Exists(self.boxed(*pattern)),
            ExpressionNode::Bound(TermPattern::Variable(variable)) => {
                Expression::Bound(variable.clone())
            }
            ExpressionNode::Bound(_) => Expression::Literal(Literal::from(true)),
            ExpressionNode::If(a, b, c) => Expression::If(boxed(*a), boxed(*b), boxed(*c)),
            ExpressionNode::Coalesce(args) => {
                Expression::Coalesce(args.iter().map(|e| self.export_expression(*e)).collect())
            }
            ExpressionNode::FunctionCall(function, args) => Expression::FunctionCall(
                function.clone(),
                args.iter().map(|e| self.export_expression(*e)).collect(),
            ),
        }
    }

    /// Returns the direct children of a graph pattern, including its expressions.
    pub fn children(&self, id: NodeId) -> Vec<Child> {
        match &self[id] {
            AlgebraNode::Bgp(_) | AlgebraNode::Path { .. } | AlgebraNode::Values { .. } => {
                Vec::new()
            }
            AlgebraNode::Join(inputs) => inputs.iter().copied().map(Child::Pattern).collect(),
            AlgebraNode::LeftJoin {
                left,
                right,
                expression,
            } => [Child::Pattern(*left), Child::Pattern(*right)]
                .into_iter()
                .chain(expression.map(Child::Expression))
                .collect(),
            AlgebraNode::Lateral { left, right }
            | AlgebraNode::Union { left, right }
            | AlgebraNode::Minus { left, right } => {
                vec![Child::Pattern(*left), Child::Pattern(*right)]
            }
            AlgebraNode::Filter { input, expression }
            | AlgebraNode::Extend {
                input, expression, ..
            } => vec![Child::Pattern(*input), Child::Expression(*expression)],
            AlgebraNode::Graph { input, .. }
            | AlgebraNode::Service { input, .. }
            | AlgebraNode::Project { input, .. }
            | AlgebraNode::Slice { input, .. }
            | AlgebraNode::Distinct(input)
            | AlgebraNode::Reduced(input) => vec![Child::Pattern(*input)],
            AlgebraNode::OrderBy { input, keys } => std::iter::once(Child::Pattern(*input))
                .chain(keys.iter().map(|key| Child::Expression(key.expression)))
                .collect(),
            AlgebraNode::Group {
                input, aggregates, ..
            } => std::iter::once(Child::Pattern(*input))
                .chain(aggregates.iter().filter_map(|aggregate| match &aggregate.kind {
                    AggregateKind::Function { expression, .. } => {
                        Some(Child::Expression(*expression))
                    }
                    AggregateKind::CountSolutions { .. } => None,
                }))
                .collect(),
        }
    }

    /// Returns the operands of an expression. `EXISTS` yields its graph pattern.
    pub fn expression_children(&self, id: ExprId) -> Vec<Child> {
        match &self[id] {
            ExpressionNode::NamedNode(_)
            | ExpressionNode::Literal(_)
            | ExpressionNode::Variable(_)
            | ExpressionNode::Bound(_) => Vec::new(),
            ExpressionNode::Or(a, b)
            | ExpressionNode::And(a, b)
            | ExpressionNode::Equal(a, b)
            | ExpressionNode::SameTerm(a, b)
            | ExpressionNode::Greater(a, b)
            | ExpressionNode::GreaterOrEqual(a, b)
            | ExpressionNode::Less(a, b)
            | ExpressionNode::LessOrEqual(a, b)
            | ExpressionNode::Add(a, b)
            | ExpressionNode::Subtract(a, b)
            | ExpressionNode::Multiply(a, b)
            | ExpressionNode::Divide(a, b) => vec![Child::Expression(*a), Child::Expression(*b)],
            ExpressionNode::In(a, list) => std::iter::once(a)
                .chain(list)
                .copied()
                .map(Child::Expression)
                .collect(),
            ExpressionNode::UnaryPlus(a) | ExpressionNode::UnaryMinus(a) | ExpressionNode::Not(a) => {
                vec![Child::Expression(*a)]
            }
            ExpressionNode::Exists(pattern) => vec![Child::Pattern(*pattern)],
            ExpressionNode::If(a, b, c) => vec![
                Child::Expression(*a),
                Child::Expression(*b),
                Child::Expression(*c),
            ],
            ExpressionNode::Coalesce(args) | ExpressionNode::FunctionCall(_, args) => {
                args.iter().copied().map(Child::Expression).collect()
            }
        }
    }

    /// Returns every variable mentioned anywhere in the arena.
    pub fn variables(&self) -> FxHashSet<Variable> {
        let mut variables = FxHashSet::default();
        for node in &self.patterns {
            match node {
                AlgebraNode::Bgp(patterns) => {
                    for pattern in patterns {
                        collect_triple_variables(pattern, &mut variables);
                    }
                }
                AlgebraNode::Path {
                    subject, object, ..
                } => {
                    collect_term_variables(subject, &mut variables);
                    collect_term_variables(object, &mut variables);
                }
                AlgebraNode::Graph { name, .. } | AlgebraNode::Service { name, .. } => {
                    if let NamedNodePattern::Variable(variable) = name {
                        variables.insert(variable.clone());
                    }
                }
                AlgebraNode::Extend { variable, .. } => {
                    variables.insert(variable.clone());
                }
                AlgebraNode::Values { variables: v, .. }
                | AlgebraNode::Project { variables: v, .. } => {
                    variables.extend(v.iter().cloned());
                }
                AlgebraNode::Group {
                    variables: v,
                    aggregates,
                    ..
                } => {
                    variables.extend(v.iter().cloned());
                    variables.extend(aggregates.iter().map(|a| a.variable.clone()));
                }
                _ => {}
            }
        }
        for expression in &self.expressions {
            match expression {
                ExpressionNode::Variable(variable) => {
                    variables.insert(variable.clone());
                }
                ExpressionNode::Bound(term) => collect_term_variables(term, &mut variables),
                _ => {}
            }
        }
        variables
    }
}

impl Index<NodeId> for AlgebraTree {
    type Output = AlgebraNode;

    fn index(&self, id: NodeId) -> &AlgebraNode {
        &self.patterns[id.0]
    }
}

impl IndexMut<NodeId> for AlgebraTree {
    fn index_mut(&mut self, id: NodeId) -> &mut AlgebraNode {
        &mut self.patterns[id.0]
    }
}

impl Index<ExprId> for AlgebraTree {
    type Output = ExpressionNode;

    fn index(&self, id: ExprId) -> &ExpressionNode {
        &self.expressions[id.0]
    }
}

impl IndexMut<ExprId> for AlgebraTree {
    fn index_mut(&mut self, id: ExprId) -> &mut ExpressionNode {
        &mut self.expressions[id.0]
    }
}

fn collect_triple_variables(pattern: &TriplePattern, variables: &mut FxHashSet<Variable>) {
    collect_term_variables(&pattern.subject, variables);
    if let NamedNodePattern::Variable(variable) = &pattern.predicate {
        variables.insert(variable.clone());
    }
    collect_term_variables(&pattern.object, variables);
}

fn collect_term_variables(term: &TermPattern, variables: &mut FxHashSet<Variable>) {
    match term {
        TermPattern::Variable(variable) => {
            variables.insert(variable.clone());
        }
        TermPattern::Triple(triple) => collect_triple_variables(triple, variables),
        TermPattern::NamedNode(_) | TermPattern::BlankNode(_) | TermPattern::Literal(_) => {}
    }
}

/// Returns the variable that stands in for a blank node once it is shared between patterns.
pub(crate) fn blank_node_variable(prefix: &str, node: &BlankNode) -> Variable {
    let id = node
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>();
    Variable::new_unchecked(format!("{prefix}{id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use otfc_model::SparqlQuery;

    fn pattern(query: &str) -> GraphPattern {
        match SparqlQuery::parse(query, None) {
            Ok(SparqlQuery::Select { pattern, .. }) => pattern,
            other => panic!("not a select query: {other:?}"),
        }
    }

    #[test]
    fn import_flattens_joins() {
        let mut tree = AlgebraTree::default();
        let root = tree.import(&pattern(
            "SELECT * WHERE {
                ?s <http://example.com/a> ?o .
                { SELECT ?s WHERE { ?s <http://example.com/b> ?x } LIMIT 1 }
                { SELECT ?o WHERE { ?o <http://example.com/c> ?y } LIMIT 1 }
            }",
        ));
        let AlgebraNode::Project { input, .. } = &tree[root] else {
            panic!("expected a projection, found {:?}", tree[root]);
        };
        let AlgebraNode::Join(inputs) = &tree[*input] else {
            panic!("expected a join, found {:?}", tree[*input]);
        };
        assert_eq!(inputs.len(), 3);
    }

    #[test]
    fn export_restores_the_pattern() {
        for query in [
            "SELECT ?s WHERE { ?s <http://example.com/a> ?o OPTIONAL { ?o <http://example.com/b> ?c } FILTER(BOUND(?c) || ?o IN (1, 2)) } ORDER BY DESC(?s) LIMIT 3",
            "SELECT ?s (COUNT(DISTINCT ?o) AS ?n) WHERE { ?s <http://example.com/a>+ ?o FILTER NOT EXISTS { ?o <http://example.com/b> ?s } } GROUP BY ?s",
            "SELECT * WHERE { GRAPH ?g { ?s ?p ?o } MINUS { ?s <http://example.com/a> ?x } VALUES ?s { <http://example.com/x> UNDEF } }",
        ] {
            let expected = pattern(query);
            let mut tree = AlgebraTree::default();
            let root = tree.import(&expected);
            assert_eq!(tree.export(root), expected, "{query}");
        }
    }

    #[test]
    fn bound_constants_export_as_true() {
        let mut tree = AlgebraTree::default();
        let id = tree.insert_expression(ExpressionNode::Bound(TermPattern::Literal(
            Literal::from(4),
        )));
        assert_eq!(
            tree.export_expression(id),
            Expression::Literal(Literal::from(true))
        );
    }

    #[test]
    fn ranges_cover_newly_inserted_nodes() {
        let mut tree = AlgebraTree::default();
        tree.import(&pattern("SELECT * WHERE { ?s ?p ?o }"));
        let mark = tree.watermark();
        let root = tree.import(&pattern("SELECT * WHERE { ?s ?p ?o FILTER(?o > 1) }"));
        let range = tree.since(mark);
        assert!(range.nodes().any(|id| id == root));
        assert_eq!(range.expressions().count(), 3);
    }

    #[test]
    fn variables_include_expressions_and_projections() {
        let mut tree = AlgebraTree::default();
        tree.import(&pattern(
            "SELECT ?_s (STR(?x) AS ?_o) WHERE { ?_s <http://example.com/a> ?x }",
        ));
        let variables = tree.variables();
        for name in ["_s", "_o", "x"] {
            assert!(variables.contains(&Variable::new_unchecked(name)), "?{name}");
        }
    }
}
