use log::trace;

use super::{AnalysisContext, looks_like_token};
use crate::ast::lower::eliminate_const_branch;
use crate::ast::{BoolOp, CompareOp, IdentKind, Literal, Node};
use crate::zasm::data::normalize;

// ── Constant folding ─────────────────────────────────────────────────
//
// Two rewrites alternate until neither changes the tree: name-identity
// comparisons collapse to boolean literals, and boolean operators with
// a literal operand short-circuit. Each round can expose work for the
// other, so a single pass of either is not enough.

pub(crate) fn fold_to_fixed_point(node: Node, ctx: &AnalysisContext) -> Node {
    let mut node = node;
    loop {
        let (compared, c1) = fold_compares(node, ctx);
        let (branched, c2) = fold_branches(compared);
        node = branched;
        if !c1 && !c2 {
            return node;
        }
    }
}

/// `==` / `!=` where both sides reduce to a name whose identity is its
/// value (tokens, events, symbols). Settings hold runtime values, so a
/// setting operand never folds here.
fn fold_compares(node: Node, ctx: &AnalysisContext) -> (Node, bool) {
    match node {
        Node::Comparison { op, lhs, rhs } => {
            if matches!(op, CompareOp::Eq | CompareOp::NotEq) {
                if let (Some(l), Some(r)) = (chase_name(&lhs, ctx), chase_name(&rhs, ctx)) {
                    let equal = l == r;
                    trace!("folded name comparison {l:?} vs {r:?}");
                    let value = if op == CompareOp::Eq { equal } else { !equal };
                    return (Node::boolean_lit(value), true);
                }
            }
            let (lhs, c1) = fold_compares(*lhs, ctx);
            let (rhs, c2) = fold_compares(*rhs, ctx);
            (Node::compare(op, lhs, rhs), c1 || c2)
        }
        Node::Boolean { op, lhs, rhs } => {
            let (lhs, c1) = fold_compares(*lhs, ctx);
            let (rhs, c2) = fold_compares(*rhs, ctx);
            (Node::boolean(op, lhs, rhs), c1 || c2)
        }
        Node::Call { callee, args } => {
            let mut changed = false;
            let args = args
                .into_iter()
                .map(|arg| {
                    let (arg, c) = fold_compares(arg, ctx);
                    changed |= c;
                    arg
                })
                .collect();
            (Node::Call { callee, args }, changed)
        }
        leaf => (leaf, false),
    }
}

/// The name a comparison side reduces to: a bare identifier, the item
/// of a `has` call, or a string literal spelled like a token.
fn chase_name(node: &Node, ctx: &AnalysisContext) -> Option<String> {
    match node {
        Node::Identifier { name, kind } => match kind {
            IdentKind::Token | IdentKind::Event | IdentKind::Symbol => Some(normalize(name)),
            _ => None,
        },
        Node::Call { callee, args } if normalize(callee) == "has" => {
            chase_name(args.first()?, ctx)
        }
        Node::Literal(Literal::Text(text)) => {
            if ctx.is_token(text) || looks_like_token(text) {
                Some(normalize(text))
            } else {
                None
            }
        }
        _ => None,
    }
}

fn fold_branches(node: Node) -> (Node, bool) {
    match node {
        Node::Boolean { op: BoolOp::Negate, lhs, rhs } => {
            let (lhs, changed) = fold_branches(*lhs);
            match lhs.as_bool_literal() {
                Some(b) => (Node::boolean_lit(!b), true),
                None => (Node::boolean(BoolOp::Negate, lhs, *rhs), changed),
            }
        }
        Node::Boolean { op, lhs, rhs } => {
            let (lhs, c1) = fold_branches(*lhs);
            let (rhs, c2) = fold_branches(*rhs);
            let literal_arm =
                lhs.as_bool_literal().is_some() || rhs.as_bool_literal().is_some();
            (eliminate_const_branch(op, lhs, rhs), c1 || c2 || literal_arm)
        }
        Node::Comparison { op, lhs, rhs } => {
            let (lhs, c1) = fold_branches(*lhs);
            let (rhs, c2) = fold_branches(*rhs);
            (Node::compare(op, lhs, rhs), c1 || c2)
        }
        Node::Call { callee, args } => {
            let mut changed = false;
            let args = args
                .into_iter()
                .map(|arg| {
                    let (arg, c) = fold_branches(arg);
                    changed |= c;
                    arg
                })
                .collect();
            (Node::Call { callee, args }, changed)
        }
        leaf => (leaf, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BoolOp;

    fn ctx() -> AnalysisContext {
        let mut ctx = AnalysisContext::new();
        ctx.declare_token("Kokiri_Sword");
        ctx.declare_token("Deku_Shield");
        ctx.declare_setting("bridge");
        ctx
    }

    fn tok(name: &str) -> Node {
        Node::ident(name, IdentKind::Token)
    }

    #[test]
    fn differing_token_names_fold_false() {
        let ctx = ctx();
        let tree = Node::compare(CompareOp::Eq, tok("Kokiri_Sword"), tok("Deku_Shield"));
        assert_eq!(fold_to_fixed_point(tree, &ctx), Node::boolean_lit(false));
    }

    #[test]
    fn chases_through_has_calls_and_string_literals() {
        let ctx = ctx();
        let tree = Node::compare(
            CompareOp::Eq,
            Node::call("has", vec![tok("Kokiri_Sword"), Node::number(1.0)]),
            Node::text("Kokiri Sword"),
        );
        assert_eq!(fold_to_fixed_point(tree, &ctx), Node::boolean_lit(true));
    }

    #[test]
    fn setting_operands_never_fold_by_name() {
        let ctx = ctx();
        let tree = Node::compare(
            CompareOp::Eq,
            Node::ident("bridge", IdentKind::Setting),
            Node::text("open"),
        );
        let folded = fold_to_fixed_point(tree.clone(), &ctx);
        assert_eq!(folded, tree);
    }

    #[test]
    fn compare_fold_feeds_branch_fold() {
        // (A == B) or X  →  false or X  →  X
        let ctx = ctx();
        let keep = Node::call("has", vec![tok("Deku_Shield"), Node::number(1.0)]);
        let tree = Node::boolean(
            BoolOp::Or,
            Node::compare(CompareOp::Eq, tok("Kokiri_Sword"), tok("Deku_Shield")),
            keep.clone(),
        );
        assert_eq!(fold_to_fixed_point(tree, &ctx), keep);
    }

    #[test]
    fn negation_of_literals_folds() {
        let ctx = ctx();
        let tree = Node::negate(Node::negate(Node::boolean_lit(false)));
        assert_eq!(fold_to_fixed_point(tree, &ctx), Node::boolean_lit(false));
    }

    #[test]
    fn folds_inside_call_arguments() {
        let ctx = ctx();
        let tree = Node::call(
            "check_age",
            vec![Node::boolean(
                BoolOp::And,
                Node::boolean_lit(true),
                Node::ident("adult", IdentKind::Symbol),
            )],
        );
        assert_eq!(
            fold_to_fixed_point(tree, &ctx),
            Node::call("check_age", vec![Node::ident("adult", IdentKind::Symbol)]),
        );
    }
}
