use log::debug;

use super::{AnalysisContext, AnalysisError, LateExpansion, analyze_fragment};
use crate::ast::{IdentKind, Literal, Node};
use crate::zasm::data::normalize;

// ── Macro and late expansion ─────────────────────────────────────────
//
// Macros substitute by parameter position into a copy of the declared
// body, and the copy re-enters the analysis pipeline in the caller's
// context. A macro is ineligible while one of its own expansions is
// still being analyzed, which bounds expansion depth for any rule set.
//
// `at` and `here` are different: their inner rule must evaluate against
// another region, so it is split off as its own unit and replaced at
// the call site with a check of a synthetic event token.

pub(crate) fn expand(node: Node, ctx: &mut AnalysisContext) -> Result<Node, AnalysisError> {
    match node {
        Node::Comparison { op, lhs, rhs } => {
            Ok(Node::compare(op, expand(*lhs, ctx)?, expand(*rhs, ctx)?))
        }
        Node::Boolean { op, lhs, rhs } => {
            Ok(Node::boolean(op, expand(*lhs, ctx)?, expand(*rhs, ctx)?))
        }
        Node::Call { callee, args } => {
            let args = args
                .into_iter()
                .map(|arg| expand(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            if ctx.is_expandable(&callee) {
                expand_macro(&callee, args, ctx)
            } else {
                Ok(Node::Call { callee, args })
            }
        }
        Node::Identifier { name, kind: IdentKind::Unknown | IdentKind::Expandable }
            if ctx.is_expandable(&name) =>
        {
            expand_macro(&name, Vec::new(), ctx)
        }
        other => Ok(other),
    }
}

fn expand_macro(
    name: &str,
    args: Vec<Node>,
    ctx: &mut AnalysisContext,
) -> Result<Node, AnalysisError> {
    let key = normalize(name);
    if ctx.in_flight.contains(&key) {
        return Err(AnalysisError::RecursiveMacro { name: name.to_owned() });
    }
    let Some(declared) = ctx.macro_named(name).cloned() else {
        return Err(AnalysisError::UndeclaredMacro { name: name.to_owned() });
    };
    if declared.params.len() != args.len() {
        return Err(AnalysisError::ArityMismatch {
            name: name.to_owned(),
            expected: declared.params.len(),
            found: args.len(),
        });
    }
    debug!("expanding macro '{name}'");
    let body = substitute(declared.body, &declared.params, &args);
    ctx.in_flight.insert(key.clone());
    let analyzed = analyze_fragment(body, ctx);
    ctx.in_flight.remove(&key);
    analyzed
}

fn substitute(node: Node, params: &[String], args: &[Node]) -> Node {
    match node {
        Node::Identifier { ref name, .. } => {
            match params.iter().position(|p| normalize(p) == normalize(name)) {
                Some(i) => args[i].clone(),
                None => node,
            }
        }
        Node::Comparison { op, lhs, rhs } => Node::compare(
            op,
            substitute(*lhs, params, args),
            substitute(*rhs, params, args),
        ),
        Node::Boolean { op, lhs, rhs } => Node::boolean(
            op,
            substitute(*lhs, params, args),
            substitute(*rhs, params, args),
        ),
        Node::Call { callee, args: call_args } => {
            let call_args = call_args
                .into_iter()
                .map(|arg| substitute(arg, params, args))
                .collect();
            Node::Call { callee, args: call_args }
        }
        other => other,
    }
}

/// Pull `at`/`here` subrules out of the tree before anything else runs.
/// The subrule is queued raw; it re-enters the pipeline later with its
/// target region as the origin, which also resolves any nesting.
pub(crate) fn yank_late_expansions(
    node: Node,
    ctx: &mut AnalysisContext,
) -> Result<Node, AnalysisError> {
    match node {
        Node::Comparison { op, lhs, rhs } => Ok(Node::compare(
            op,
            yank_late_expansions(*lhs, ctx)?,
            yank_late_expansions(*rhs, ctx)?,
        )),
        Node::Boolean { op, lhs, rhs } => Ok(Node::boolean(
            op,
            yank_late_expansions(*lhs, ctx)?,
            yank_late_expansions(*rhs, ctx)?,
        )),
        Node::Call { callee, args } => match normalize(&callee).as_str() {
            "at" => {
                let Ok([target, rule]) = <[Node; 2]>::try_from(args) else {
                    return Err(AnalysisError::MalformedAt);
                };
                let target = match target {
                    Node::Literal(Literal::Text(text)) => text,
                    Node::Identifier { name, .. } => name,
                    _ => return Err(AnalysisError::MalformedAt),
                };
                Ok(queue_late(target, rule, ctx))
            }
            "here" => {
                let Ok([rule]) = <[Node; 1]>::try_from(args) else {
                    return Err(AnalysisError::MalformedAt);
                };
                let origin = ctx.origin.clone().ok_or(AnalysisError::NoOrigin)?;
                Ok(queue_late(origin, rule, ctx))
            }
            _ => {
                let args = args
                    .into_iter()
                    .map(|arg| yank_late_expansions(arg, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Node::Call { callee, args })
            }
        },
        other => Ok(other),
    }
}

fn queue_late(target: String, rule: Node, ctx: &mut AnalysisContext) -> Node {
    let n = ctx.late_counts.entry(normalize(&target)).or_insert(0);
    *n += 1;
    let name = format!("{} Subrule {}", target, n);
    debug!("queued late expansion '{name}'");
    ctx.late.push(LateExpansion { name: name.clone(), origin: target, rule });
    Node::call("has", vec![Node::ident(name, IdentKind::Event), Node::number(1.0)])
}
