//! Expression tree
//!
//! Nodes are immutable once built. Every constructor computes the node's
//! dependency set from its children, so `dependencies()` on the root is the
//! full set of row fields and calculated columns the formula reads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Aggregation, BinOp, Literal, UnaryOp};

static NEXT_EXPR_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u64);

impl ExprId {
    fn next() -> Self {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Constant, or a row variable read for `Literal::Ident`
    Literal(Literal),

    /// Binary operation: `a + b`, `a == b`, `a && b`
    Basic {
        op: BinOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },

    /// Prefix operation: `-x`, `+x`, `!x`
    Unary { op: UnaryOp, operand: Box<Expression> },

    /// `condition ? true_branch : false_branch`
    Ternary {
        condition: Box<Expression>,
        true_branch: Box<Expression>,
        false_branch: Box<Expression>,
    },

    /// `name(args...)`, resolved case-insensitively at evaluation time
    FunctionCall { name: String, args: Vec<Expression> },

    // === Whole-dataset forms (built programmatically, not parsed) ===
    /// One aggregate per distinct `group_by` key
    Group {
        group_by: Vec<String>,
        aggregation: Aggregation,
        field: Option<String>,
    },

    /// One rank per row from the ascending sort order over `rank_by`
    Rank {
        rank_by: Vec<String>,
        normalize: bool,
        cumulative: bool,
    },

    /// Named analytics algorithm with free-form parameters. Always fails at
    /// evaluation with `NotImplemented`.
    Advanced {
        algorithm: String,
        inputs: Vec<String>,
        params: BTreeMap<String, Literal>,
    },
}

#[derive(Debug, Clone)]
pub struct Expression {
    id: ExprId,
    kind: ExprKind,
    dependencies: BTreeSet<String>,
    height: usize,
}

/// Structural equality: node ids are identity, not structure, and are ignored.
impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.dependencies == other.dependencies
    }
}

impl Expression {
    pub fn new(kind: ExprKind) -> Self {
        let dependencies = collect_dependencies(&kind);
        let height = child_height(&kind) + 1;
        Self {
            id: ExprId::next(),
            kind,
            dependencies,
            height,
        }
    }

    pub fn id(&self) -> ExprId {
        self.id
    }

    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    /// Row fields and calculated columns this expression reads
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Number of nodes on the longest path from this node to a leaf
    pub fn height(&self) -> usize {
        self.height
    }

    /// `Group` and `Rank` produce one result for the whole dataset rather
    /// than one scalar per row
    pub fn is_whole_dataset(&self) -> bool {
        matches!(self.kind, ExprKind::Group { .. } | ExprKind::Rank { .. })
    }

    // ============ Builders ============

    pub fn literal(lit: Literal) -> Self {
        Self::new(ExprKind::Literal(lit))
    }

    pub fn number(n: f64) -> Self {
        Self::literal(Literal::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::literal(Literal::String(s.into()))
    }

    pub fn bool(b: bool) -> Self {
        Self::literal(Literal::Bool(b))
    }

    pub fn null() -> Self {
        Self::literal(Literal::Null)
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Self::literal(Literal::Ident(name.into()))
    }

    pub fn basic(op: BinOp, left: Expression, right: Expression) -> Self {
        Self::new(ExprKind::Basic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        Self::new(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn ternary(condition: Expression, true_branch: Expression, false_branch: Expression) -> Self {
        Self::new(ExprKind::Ternary {
            condition: Box::new(condition),
            true_branch: Box::new(true_branch),
            false_branch: Box::new(false_branch),
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Self::new(ExprKind::FunctionCall {
            name: name.into(),
            args,
        })
    }

    pub fn group<S: Into<String>>(
        group_by: impl IntoIterator<Item = S>,
        aggregation: Aggregation,
        field: Option<&str>,
    ) -> Self {
        Self::new(ExprKind::Group {
            group_by: group_by.into_iter().map(Into::into).collect(),
            aggregation,
            field: field.map(str::to_string),
        })
    }

    pub fn rank<S: Into<String>>(
        rank_by: impl IntoIterator<Item = S>,
        normalize: bool,
        cumulative: bool,
    ) -> Self {
        Self::new(ExprKind::Rank {
            rank_by: rank_by.into_iter().map(Into::into).collect(),
            normalize,
            cumulative,
        })
    }

    pub fn advanced<S: Into<String>>(
        algorithm: impl Into<String>,
        inputs: impl IntoIterator<Item = S>,
        params: BTreeMap<String, Literal>,
    ) -> Self {
        Self::new(ExprKind::Advanced {
            algorithm: algorithm.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            params,
        })
    }

    // ============ Rewrites ============

    /// Rewrite every read of `old` into a read of `new`, keeping node ids.
    pub fn rename_dependency(&self, old: &str, new: &str) -> Expression {
        if !self.dependencies.contains(old) {
            return self.clone();
        }

        let rename = |name: &String| {
            if name == old {
                new.to_string()
            } else {
                name.clone()
            }
        };

        let kind = match &self.kind {
            ExprKind::Literal(Literal::Ident(name)) => ExprKind::Literal(Literal::Ident(rename(name))),
            ExprKind::Literal(lit) => ExprKind::Literal(lit.clone()),
            ExprKind::Basic { op, left, right } => ExprKind::Basic {
                op: *op,
                left: Box::new(left.rename_dependency(old, new)),
                right: Box::new(right.rename_dependency(old, new)),
            },
            ExprKind::Unary { op, operand } => ExprKind::Unary {
                op: *op,
                operand: Box::new(operand.rename_dependency(old, new)),
            },
            ExprKind::Ternary {
                condition,
                true_branch,
                false_branch,
            } => ExprKind::Ternary {
                condition: Box::new(condition.rename_dependency(old, new)),
                true_branch: Box::new(true_branch.rename_dependency(old, new)),
                false_branch: Box::new(false_branch.rename_dependency(old, new)),
            },
            ExprKind::FunctionCall { name, args } => ExprKind::FunctionCall {
                name: name.clone(),
                args: args.iter().map(|a| a.rename_dependency(old, new)).collect(),
            },
            ExprKind::Group {
                group_by,
                aggregation,
                field,
            } => ExprKind::Group {
                group_by: group_by.iter().map(rename).collect(),
                aggregation: *aggregation,
                field: field.as_ref().map(rename),
            },
            ExprKind::Rank {
                rank_by,
                normalize,
                cumulative,
            } => ExprKind::Rank {
                rank_by: rank_by.iter().map(rename).collect(),
                normalize: *normalize,
                cumulative: *cumulative,
            },
            ExprKind::Advanced {
                algorithm,
                inputs,
                params,
            } => ExprKind::Advanced {
                algorithm: algorithm.clone(),
                inputs: inputs.iter().map(rename).collect(),
                params: params.clone(),
            },
        };

        Expression {
            id: self.id,
            dependencies: collect_dependencies(&kind),
            height: self.height,
            kind,
        }
    }
}

fn collect_dependencies(kind: &ExprKind) -> BTreeSet<String> {
    match kind {
        ExprKind::Literal(Literal::Ident(name)) => BTreeSet::from([name.clone()]),
        ExprKind::Literal(_) => BTreeSet::new(),
        ExprKind::Basic { left, right, .. } => {
            left.dependencies.union(&right.dependencies).cloned().collect()
        }
        ExprKind::Unary { operand, .. } => operand.dependencies.clone(),
        ExprKind::Ternary {
            condition,
            true_branch,
            false_branch,
        } => condition
            .dependencies
            .iter()
            .chain(&true_branch.dependencies)
            .chain(&false_branch.dependencies)
            .cloned()
            .collect(),
        ExprKind::FunctionCall { args, .. } => args
            .iter()
            .flat_map(|a| a.dependencies.iter().cloned())
            .collect(),
        ExprKind::Group {
            group_by, field, ..
        } => group_by.iter().chain(field).cloned().collect(),
        ExprKind::Rank { rank_by, .. } => rank_by.iter().cloned().collect(),
        ExprKind::Advanced { inputs, .. } => inputs.iter().cloned().collect(),
    }
}

fn child_height(kind: &ExprKind) -> usize {
    match kind {
        ExprKind::Basic { left, right, .. } => left.height.max(right.height),
        ExprKind::Unary { operand, .. } => operand.height,
        ExprKind::Ternary {
            condition,
            true_branch,
            false_branch,
        } => condition
            .height
            .max(true_branch.height)
            .max(false_branch.height),
        ExprKind::FunctionCall { args, .. } => args.iter().map(|a| a.height).max().unwrap_or(0),
        _ => 0,
    }
}
