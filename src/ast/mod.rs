pub mod lower;
pub use lower::{LowerError, lower};

// ── Canonical rule AST ───────────────────────────────────────────────
//
// The parse tree's sugar (subscripts, tuples, unary not) is gone by the
// time a rule reaches this shape: only comparisons, boolean ops, calls,
// identifiers and literals remain, and each pass is a total match over
// the closed variant set. `Empty` plugs the hole a collapsed unary-not
// leaves on one side of a Boolean node; it assembles to nothing.

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Comparison {
        op: CompareOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Boolean {
        op: BoolOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Call {
        callee: String,
        args: Vec<Node>,
    },
    Identifier {
        name: String,
        kind: IdentKind,
    },
    Literal(Literal),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
    Negate,
}

/// Classification assigned during analysis. A fully analyzed tree holds
/// no `Unknown`; `Unresolved` survives only long enough to be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentKind {
    Unknown,
    Token,
    /// Synthetic tokens minted for late-expansion subrules.
    Event,
    Setting,
    Trick,
    Builtin,
    Var,
    /// Fixed contextual names: ages, trial names.
    Symbol,
    Expandable,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl Node {
    pub fn boolean_lit(b: bool) -> Node {
        Node::Literal(Literal::Bool(b))
    }

    pub fn number(n: f64) -> Node {
        Node::Literal(Literal::Number(n))
    }

    pub fn text(s: impl Into<String>) -> Node {
        Node::Literal(Literal::Text(s.into()))
    }

    pub fn ident(name: impl Into<String>, kind: IdentKind) -> Node {
        Node::Identifier { name: name.into(), kind }
    }

    pub fn call(callee: impl Into<String>, args: Vec<Node>) -> Node {
        Node::Call { callee: callee.into(), args }
    }

    pub fn compare(op: CompareOp, lhs: Node, rhs: Node) -> Node {
        Node::Comparison { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn boolean(op: BoolOp, lhs: Node, rhs: Node) -> Node {
        Node::Boolean { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn negate(target: Node) -> Node {
        Node::boolean(BoolOp::Negate, target, Node::Empty)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    pub fn as_bool_literal(&self) -> Option<bool> {
        match self {
            Node::Literal(Literal::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_identifier(&self) -> Option<(&str, IdentKind)> {
        match self {
            Node::Identifier { name, kind } => Some((name, *kind)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Comparison { op, lhs, rhs } => {
                let op = match op {
                    CompareOp::Eq => "==",
                    CompareOp::NotEq => "!=",
                    CompareOp::Lt => "<",
                };
                write!(f, "({lhs} {op} {rhs})")
            }
            Node::Boolean { op: BoolOp::Negate, lhs, .. } => write!(f, "(not {lhs})"),
            Node::Boolean { op: BoolOp::And, lhs, rhs } => write!(f, "({lhs} and {rhs})"),
            Node::Boolean { op: BoolOp::Or, lhs, rhs } => write!(f, "({lhs} or {rhs})"),
            Node::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Node::Identifier { name, .. } => write!(f, "{name}"),
            Node::Literal(Literal::Number(n)) => write!(f, "{n}"),
            Node::Literal(Literal::Bool(b)) => write!(f, "{b}"),
            Node::Literal(Literal::Text(t)) => write!(f, "'{t}'"),
            Node::Empty => write!(f, "<empty>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_like_rule_text() {
        let node = Node::boolean(
            BoolOp::And,
            Node::call("has", vec![Node::ident("Slingshot", IdentKind::Token), Node::number(1.0)]),
            Node::negate(Node::ident("open_forest", IdentKind::Setting)),
        );
        assert_eq!(node.to_string(), "(has(Slingshot, 1) and (not open_forest))");
    }
}
