use super::{BoolOp, CompareOp, IdentKind, Literal, Node};
use crate::parse_tree::{BinOpKind, BoolOpKind, Expression, LiteralValue};
use crate::zasm::data::normalize;

// ── Parse tree → canonical AST ───────────────────────────────────────
//
// Sugar is rewritten here so downstream passes only ever see canonical
// shapes: `setting in block` and `block[setting]` both become one
// `load_setting_2` call, two-tuples become `has(item, qty)`, unary-not
// either folds or becomes a Negate boolean with an Empty right arm.
// Two folds run this early because hand-written rules hit them
// constantly: `X == X` on the same identifier, and and/or with a
// literal boolean operand.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LowerError {
    #[error("malformed tuple: expected 2 elements, found {arity}")]
    MalformedTuple { arity: usize },
    #[error("subscript target and index must both be identifiers")]
    MalformedSubscript,
    #[error("call target is not an identifier")]
    MalformedCallee,
}

pub fn lower(expr: &Expression) -> Result<Node, LowerError> {
    match expr {
        Expression::BinOp { op: BinOpKind::Contains, lhs, rhs } => {
            // `setting in block` — block first, matching the subscript form
            lower_call("load_setting_2", &[rhs.as_ref().clone(), lhs.as_ref().clone()])
        }
        Expression::BinOp { op, lhs, rhs } => lower_binop(*op, lhs, rhs),
        Expression::BoolOp { op, lhs, rhs } => {
            let lhs = lower(lhs)?;
            let rhs = lower(rhs)?;
            let op = match op {
                BoolOpKind::And => BoolOp::And,
                BoolOpKind::Or => BoolOp::Or,
            };
            Ok(eliminate_const_branch(op, lhs, rhs))
        }
        Expression::Unary { target } => {
            let target = lower(target)?;
            match target.as_bool_literal() {
                Some(b) => Ok(Node::boolean_lit(!b)),
                None => Ok(Node::negate(target)),
            }
        }
        Expression::Call { callee, args } => {
            let Expression::Identifier { name } = callee.as_ref() else {
                return Err(LowerError::MalformedCallee);
            };
            lower_call(name, args)
        }
        Expression::Subscript { target, index } => {
            let (Expression::Identifier { .. }, Expression::Identifier { .. }) =
                (target.as_ref(), index.as_ref())
            else {
                return Err(LowerError::MalformedSubscript);
            };
            lower_call("load_setting_2", &[target.as_ref().clone(), index.as_ref().clone()])
        }
        Expression::Tuple { elems } => {
            if elems.len() != 2 {
                return Err(LowerError::MalformedTuple { arity: elems.len() });
            }
            lower_call("has", elems)
        }
        Expression::Identifier { name } => Ok(Node::ident(name, IdentKind::Unknown)),
        Expression::Literal { value } => Ok(Node::Literal(match value {
            LiteralValue::Number(n) => Literal::Number(*n),
            LiteralValue::Bool(b) => Literal::Bool(*b),
            LiteralValue::Text(t) => Literal::Text(t.clone()),
        })),
    }
}

fn lower_binop(op: BinOpKind, lhs: &Expression, rhs: &Expression) -> Result<Node, LowerError> {
    // `X == X` (and has-wrapped spellings of it) folds now, not later:
    // the idiom shows up constantly in hand-written rules
    if matches!(op, BinOpKind::Eq | BinOpKind::NotEq) {
        if let (Some(l), Some(r)) = (extract_ident(lhs), extract_ident(rhs)) {
            if normalize(l) == normalize(r) {
                return Ok(Node::boolean_lit(op == BinOpKind::Eq));
            }
        }
    }

    let lhs = lower(lhs)?;
    let rhs = lower(rhs)?;
    let op = match op {
        BinOpKind::Eq => CompareOp::Eq,
        BinOpKind::NotEq => CompareOp::NotEq,
        BinOpKind::Lt => CompareOp::Lt,
        BinOpKind::Contains => unreachable!("contains lowered before binop dispatch"),
    };
    Ok(Node::compare(op, lhs, rhs))
}

fn lower_call(name: &str, args: &[Expression]) -> Result<Node, LowerError> {
    let args = args.iter().map(lower).collect::<Result<Vec<_>, _>>()?;
    Ok(Node::call(name, args))
}

/// Short-circuit algebra over literal boolean operands, applied while
/// the tree is being built. The same rewrite runs again during analysis
/// once folding exposes new literals.
pub(crate) fn eliminate_const_branch(op: BoolOp, lhs: Node, rhs: Node) -> Node {
    if let Some(b) = lhs.as_bool_literal() {
        return match (op, b) {
            (BoolOp::And, true) | (BoolOp::Or, false) => rhs,
            (BoolOp::And, false) => Node::boolean_lit(false),
            (BoolOp::Or, true) => Node::boolean_lit(true),
            (BoolOp::Negate, _) => Node::boolean(op, lhs, rhs),
        };
    }
    if let Some(b) = rhs.as_bool_literal() {
        return match (op, b) {
            (BoolOp::And, true) | (BoolOp::Or, false) => lhs,
            (BoolOp::And, false) => Node::boolean_lit(false),
            (BoolOp::Or, true) => Node::boolean_lit(true),
            (BoolOp::Negate, _) => Node::boolean(op, lhs, rhs),
        };
    }
    Node::boolean(op, lhs, rhs)
}

/// Chase the identifier a comparison side reduces to: a bare
/// identifier, a tuple's item, a `has` call's item, or a string literal
/// naming a token. Macro expansion explodes names like `Longshot` into
/// `has` calls, so the chase has to see through those shapes. Only
/// `has` wraps an item; any other call computes a value, so its
/// operands say nothing about name identity.
fn extract_ident(expr: &Expression) -> Option<&str> {
    match expr {
        Expression::Identifier { name } => Some(name),
        Expression::Tuple { elems } => extract_ident(elems.first()?),
        Expression::Call { callee, args } => match callee.as_ref() {
            Expression::Identifier { name } if normalize(name) == "has" => {
                extract_ident(args.first()?)
            }
            _ => None,
        },
        Expression::Literal { value: LiteralValue::Text(t) } => Some(t),
        _ => None,
    }
}
