pub mod expand;
pub mod fold;

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use log::trace;
use regex::Regex;

use crate::ast::{IdentKind, Literal, Node};
use crate::zasm::data::normalize;

// ── Rule analysis ────────────────────────────────────────────────────
//
// A context built once per session from the game's token/setting
// universe plus script-declared macros. Each rule's tree runs through:
// late-expansion yank, macro expansion, identifier classification,
// compare/branch folding to a fixed point, then promotion of bare
// identifiers into canonical call form. Expanded fragments re-enter the
// same pipeline in the caller's context.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisError {
    #[error("macro '{name}' takes {expected} arguments, found {found}")]
    ArityMismatch { name: String, expected: usize, found: usize },
    #[error("macro '{name}' expands through itself")]
    RecursiveMacro { name: String },
    #[error("reference to undeclared macro or function '{name}'")]
    UndeclaredMacro { name: String },
    #[error("could not resolve identifier '{name}'")]
    UnresolvedIdentifier { name: String },
    #[error("'here' used with no traversal origin set")]
    NoOrigin,
    #[error("'at' needs a region name literal and a rule")]
    MalformedAt,
}

#[derive(Debug, Clone)]
pub struct Macro {
    pub params: Vec<String>,
    pub body: Node,
}

/// A deferred expansion: `rule` must compile as its own unit named
/// `name`, reachable from `origin`, before anything referencing the
/// synthetic event can evaluate true.
#[derive(Debug, Clone)]
pub struct LateExpansion {
    pub name: String,
    pub origin: String,
    pub rule: Node,
}

#[derive(Debug, Default)]
pub struct AnalysisContext {
    tokens: HashSet<String>,
    settings: HashSet<String>,
    builtins: HashSet<String>,
    contextuals: HashMap<String, IdentKind>,
    macros: HashMap<String, Macro>,
    origin: Option<String>,
    late: Vec<LateExpansion>,
    late_counts: HashMap<String, usize>,
    unresolved: Vec<String>,
    in_flight: HashSet<String>,
    expand_token_like: bool,
}

/// Callees with dedicated handling; always valid even when the script
/// declares nothing.
const CANONICAL_CALLEES: &[&str] = &[
    "has",
    "has_all",
    "has_any",
    "has_bottle",
    "load_setting",
    "load_setting_2",
    "trick_enabled",
    "check_age",
    "is_adult",
    "is_child",
    "at_day",
    "at_night",
    "at_dampe_time",
];

static LOOKS_LIKE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Z][A-Za-z_ ]").expect("token heuristic pattern"));

impl AnalysisContext {
    pub fn new() -> AnalysisContext {
        let mut ctx = AnalysisContext::default();
        ctx.contextuals.insert(normalize("age"), IdentKind::Var);
        for symbolic in [
            "adult", "both", "child", "either", "fire", "forest", "light", "shadow", "spirit",
            "water",
        ] {
            ctx.contextuals.insert(normalize(symbolic), IdentKind::Symbol);
        }
        for callee in CANONICAL_CALLEES {
            ctx.builtins.insert(normalize(callee));
        }
        ctx
    }

    pub fn declare_token(&mut self, name: &str) {
        self.tokens.insert(normalize(name));
    }

    pub fn declare_setting(&mut self, name: &str) {
        self.settings.insert(normalize(name));
    }

    pub fn declare_builtin(&mut self, name: &str) {
        self.builtins.insert(normalize(name));
    }

    pub fn declare_macro(&mut self, name: &str, params: Vec<String>, body: Node) {
        self.macros.insert(normalize(name), Macro { params, body });
    }

    /// Region-relative expansion target for `here(...)`.
    pub fn set_origin(&mut self, origin: impl Into<String>) {
        self.origin = Some(origin.into());
    }

    pub fn clear_origin(&mut self) {
        self.origin = None;
    }

    /// Drain the queued late expansions. Analyzing a drained rule may
    /// queue more; callers loop until this comes back empty.
    pub fn take_late_expansions(&mut self) -> Vec<LateExpansion> {
        std::mem::take(&mut self.late)
    }

    /// Unresolved identifiers seen since the last call, for batch
    /// diagnostics across a whole rule set.
    pub fn take_unresolved(&mut self) -> Vec<String> {
        std::mem::take(&mut self.unresolved)
    }

    fn is_token(&self, name: &str) -> bool {
        self.tokens.contains(&normalize(name))
    }

    fn is_expandable(&self, name: &str) -> bool {
        // token-looking names (Progressive_Hookshot) are occasionally
        // used as plain tokens; only expand them in the second phase
        if looks_like_token(name) && !self.expand_token_like {
            return false;
        }
        self.macros.contains_key(&normalize(name))
    }

    fn macro_named(&self, name: &str) -> Option<&Macro> {
        self.macros.get(&normalize(name))
    }

    fn known_callee(&self, name: &str) -> bool {
        let key = normalize(name);
        self.builtins.contains(&key) || self.macros.contains_key(&key)
    }

    /// First classification match wins; `Unresolved` is recorded for
    /// batch reporting rather than resolved best-effort.
    fn classify(&self, name: &str) -> IdentKind {
        let key = normalize(name);
        if name.starts_with("logic_") {
            IdentKind::Trick
        } else if self.tokens.contains(&key) {
            IdentKind::Token
        } else if self.settings.contains(&key) {
            IdentKind::Setting
        } else if self.macros.contains_key(&key) {
            IdentKind::Expandable
        } else if self.builtins.contains(&key) {
            IdentKind::Builtin
        } else if let Some(&kind) = self.contextuals.get(&key) {
            kind
        } else if looks_like_token(name) {
            IdentKind::Token
        } else {
            IdentKind::Unresolved
        }
    }
}

pub(crate) fn looks_like_token(name: &str) -> bool {
    LOOKS_LIKE_TOKEN.is_match(name)
}

/// What a tree contains, gathered before rewriting so rules with no
/// foldable or expandable structure skip those passes outright.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Report {
    pub expansions: bool,
    pub compares: bool,
    pub branches: bool,
    pub late: bool,
}

pub(crate) fn scan(node: &Node, ctx: &AnalysisContext) -> Report {
    let mut report = Report::default();
    scan_into(node, ctx, &mut report);
    report
}

fn scan_into(node: &Node, ctx: &AnalysisContext, report: &mut Report) {
    match node {
        Node::Comparison { lhs, rhs, .. } => {
            report.compares = true;
            scan_into(lhs, ctx, report);
            scan_into(rhs, ctx, report);
        }
        Node::Boolean { lhs, rhs, .. } => {
            report.branches = true;
            scan_into(lhs, ctx, report);
            scan_into(rhs, ctx, report);
        }
        Node::Call { callee, args } => {
            match normalize(callee).as_str() {
                "at" | "here" => report.late = true,
                _ if ctx.macro_named(callee).is_some() => report.expansions = true,
                _ => {}
            }
            for arg in args {
                scan_into(arg, ctx, report);
            }
        }
        Node::Identifier { name, kind } => {
            // ungated: token-like macro names still count, so the
            // second expansion phase knows to run
            if *kind == IdentKind::Unknown && ctx.macro_named(name).is_some() {
                report.expansions = true;
            }
        }
        Node::Literal(_) | Node::Empty => {}
    }
}

/// Run one rule's tree through the whole pass pipeline.
pub fn analyze(node: Node, ctx: &mut AnalysisContext) -> Result<Node, AnalysisError> {
    ctx.expand_token_like = false;
    analyze_fragment(node, ctx)
}

/// The re-entrant body: expanded macro fragments come back through
/// here in the caller's context, including its in-flight set.
pub(crate) fn analyze_fragment(
    node: Node,
    ctx: &mut AnalysisContext,
) -> Result<Node, AnalysisError> {
    let report = scan(&node, ctx);
    let mut node = node;
    if report.late {
        node = expand::yank_late_expansions(node, ctx)?;
    }
    if report.expansions {
        node = expand::expand(node, ctx)?;
    }
    node = classify(node, ctx)?;
    if report.compares || report.branches {
        node = fold::fold_to_fixed_point(node, ctx);
    }
    node = promote(node, ctx);
    if report.expansions {
        // names like Progressive_Hookshot are expandable but sometimes
        // meant as plain tokens; a second expansion phase with the
        // token-like gate lifted resolves the ones folding left behind
        let prior = ctx.expand_token_like;
        ctx.expand_token_like = true;
        node = expand::expand(node, ctx)?;
        node = fold::fold_to_fixed_point(node, ctx);
        node = promote(node, ctx);
        ctx.expand_token_like = prior;
    }
    Ok(node)
}

/// Tag every untagged identifier and validate call targets. Unresolved
/// names fail the rule, but only after the whole tree has been walked
/// so the batch report carries every bad name, not just the first.
fn classify(node: Node, ctx: &mut AnalysisContext) -> Result<Node, AnalysisError> {
    let seen = ctx.unresolved.len();
    let node = classify_names(node, ctx)?;
    if ctx.unresolved.len() > seen {
        let name = ctx.unresolved[seen].clone();
        return Err(AnalysisError::UnresolvedIdentifier { name });
    }
    Ok(node)
}

fn classify_names(node: Node, ctx: &mut AnalysisContext) -> Result<Node, AnalysisError> {
    match node {
        Node::Comparison { op, lhs, rhs } => Ok(Node::compare(
            op,
            classify_names(*lhs, ctx)?,
            classify_names(*rhs, ctx)?,
        )),
        Node::Boolean { op, lhs, rhs } => {
            Ok(Node::boolean(op, classify_names(*lhs, ctx)?, classify_names(*rhs, ctx)?))
        }
        Node::Call { callee, args } => {
            if !ctx.known_callee(&callee) {
                return Err(AnalysisError::UndeclaredMacro { name: callee });
            }
            let args = args
                .into_iter()
                .map(|arg| classify_names(arg, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Node::Call { callee, args })
        }
        Node::Identifier { name, kind: IdentKind::Unknown } => {
            let kind = ctx.classify(&name);
            trace!("classified '{}' as {:?}", name, kind);
            if kind == IdentKind::Unresolved {
                ctx.unresolved.push(name.clone());
            }
            Ok(Node::Identifier { name, kind })
        }
        tagged @ Node::Identifier { .. } => Ok(tagged),
        literal @ Node::Literal(_) => Ok(literal),
        Node::Empty => Ok(Node::Empty),
    }
}

/// Rewrite classified bare identifiers into canonical call form. Runs
/// after folding so the folds always see original identifiers. Direct
/// identifier arguments of calls are already canonical and stay bare.
fn promote(node: Node, ctx: &AnalysisContext) -> Node {
    match node {
        Node::Comparison { op, lhs, rhs } => {
            if is_age_variable(&lhs) {
                return Node::call("check_age", vec![*rhs]);
            }
            if is_age_variable(&rhs) {
                return Node::call("check_age", vec![*lhs]);
            }
            Node::compare(op, promote_operand(*lhs, ctx), promote_operand(*rhs, ctx))
        }
        Node::Boolean { op, lhs, rhs } => Node::boolean(op, promote(*lhs, ctx), promote(*rhs, ctx)),
        Node::Call { callee, mut args } => {
            if normalize(&callee) == "has" {
                if let Some(Node::Literal(Literal::Text(text))) = args.first() {
                    let item = Node::ident(text.clone(), IdentKind::Token);
                    args[0] = item;
                }
            }
            let args = args
                .into_iter()
                .map(|arg| match arg {
                    bare @ Node::Identifier { .. } => bare,
                    nested => promote(nested, ctx),
                })
                .collect();
            Node::Call { callee, args }
        }
        Node::Identifier { name, kind } => match kind {
            IdentKind::Token | IdentKind::Event => {
                let ident = Node::ident(name, kind);
                Node::call("has", vec![ident, Node::number(1.0)])
            }
            IdentKind::Setting => {
                let ident = Node::ident(name, kind);
                Node::call("load_setting", vec![ident])
            }
            IdentKind::Trick => {
                let ident = Node::ident(name, kind);
                Node::call("trick_enabled", vec![ident])
            }
            IdentKind::Builtin => Node::call(name, Vec::new()),
            _ => Node::Identifier { name, kind },
        },
        Node::Literal(Literal::Text(text)) => {
            if ctx.is_token(&text) || looks_like_token(&text) {
                let ident = Node::ident(text, IdentKind::Token);
                Node::call("has", vec![ident, Node::number(1.0)])
            } else {
                Node::text(text)
            }
        }
        literal @ Node::Literal(_) => literal,
        Node::Empty => Node::Empty,
    }
}

/// Comparison operands compare by interned value, so tokens and string
/// literals stay bare loads there; only names that need a runtime fetch
/// become calls.
fn promote_operand(node: Node, ctx: &AnalysisContext) -> Node {
    match node {
        Node::Identifier { name, kind } => match kind {
            IdentKind::Setting => {
                let ident = Node::ident(name, kind);
                Node::call("load_setting", vec![ident])
            }
            IdentKind::Trick => {
                let ident = Node::ident(name, kind);
                Node::call("trick_enabled", vec![ident])
            }
            IdentKind::Builtin => Node::call(name, Vec::new()),
            _ => Node::Identifier { name, kind },
        },
        literal @ Node::Literal(_) => literal,
        nested => promote(nested, ctx),
    }
}

fn is_age_variable(node: &Node) -> bool {
    matches!(
        node.as_identifier(),
        Some((name, IdentKind::Var)) if normalize(name) == "age"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::CompareOp;

    fn ctx() -> AnalysisContext {
        let mut ctx = AnalysisContext::new();
        ctx.declare_token("Kokiri_Sword");
        ctx.declare_token("Slingshot");
        ctx.declare_setting("open_forest");
        ctx.declare_setting("chicken_count");
        ctx
    }

    #[test]
    fn classification_priority_first_match_wins() {
        let ctx = ctx();
        assert_eq!(ctx.classify("logic_grottos_without_agony"), IdentKind::Trick);
        assert_eq!(ctx.classify("Kokiri_Sword"), IdentKind::Token);
        assert_eq!(ctx.classify("open_forest"), IdentKind::Setting);
        assert_eq!(ctx.classify("has_bottle"), IdentKind::Builtin);
        assert_eq!(ctx.classify("age"), IdentKind::Var);
        assert_eq!(ctx.classify("adult"), IdentKind::Symbol);
        // capitalized-word heuristic catches undeclared token spellings
        assert_eq!(ctx.classify("Zeldas_Lullaby"), IdentKind::Token);
        assert_eq!(ctx.classify("mystery_name"), IdentKind::Unresolved);
    }

    #[test]
    fn token_identifier_promotes_to_has() {
        let mut ctx = ctx();
        let out = analyze(Node::ident("Kokiri_Sword", IdentKind::Unknown), &mut ctx).unwrap();
        assert_eq!(
            out,
            Node::call(
                "has",
                vec![Node::ident("Kokiri_Sword", IdentKind::Token), Node::number(1.0)]
            )
        );
    }

    #[test]
    fn setting_identifier_promotes_to_load_setting() {
        let mut ctx = ctx();
        let out = analyze(Node::ident("open_forest", IdentKind::Unknown), &mut ctx).unwrap();
        assert_eq!(
            out,
            Node::call("load_setting", vec![Node::ident("open_forest", IdentKind::Setting)])
        );
    }

    #[test]
    fn trick_identifier_promotes_to_trick_enabled() {
        let mut ctx = ctx();
        let out = analyze(Node::ident("logic_fewer_tunics", IdentKind::Unknown), &mut ctx).unwrap();
        assert_eq!(
            out,
            Node::call(
                "trick_enabled",
                vec![Node::ident("logic_fewer_tunics", IdentKind::Trick)]
            )
        );
    }

    #[test]
    fn age_comparison_promotes_to_check_age() {
        let mut ctx = ctx();
        let tree = Node::compare(
            CompareOp::Eq,
            Node::ident("age", IdentKind::Unknown),
            Node::ident("adult", IdentKind::Unknown),
        );
        let out = analyze(tree, &mut ctx).unwrap();
        assert_eq!(out, Node::call("check_age", vec![Node::ident("adult", IdentKind::Symbol)]));
    }

    #[test]
    fn setting_comparison_keeps_value_operands() {
        let mut ctx = ctx();
        ctx.declare_setting("bridge");
        let tree = Node::compare(
            CompareOp::Eq,
            Node::ident("bridge", IdentKind::Unknown),
            Node::text("open"),
        );
        let out = analyze(tree, &mut ctx).unwrap();
        assert_eq!(
            out,
            Node::compare(
                CompareOp::Eq,
                Node::call("load_setting", vec![Node::ident("bridge", IdentKind::Setting)]),
                Node::text("open"),
            )
        );
    }

    #[test]
    fn token_like_macro_name_expands_in_second_phase() {
        let mut ctx = ctx();
        ctx.declare_macro(
            "Deku_Pop",
            vec![],
            Node::ident("Kokiri_Sword", IdentKind::Unknown),
        );
        let out = analyze(Node::ident("Deku_Pop", IdentKind::Unknown), &mut ctx).unwrap();
        assert_eq!(
            out,
            Node::call(
                "has",
                vec![Node::ident("Kokiri_Sword", IdentKind::Token), Node::number(1.0)]
            )
        );
    }

    #[test]
    fn unresolved_identifiers_fail_and_accumulate() {
        let mut ctx = ctx();
        let err = analyze(Node::ident("whatever_this_is", IdentKind::Unknown), &mut ctx);
        assert_eq!(
            err,
            Err(AnalysisError::UnresolvedIdentifier { name: "whatever_this_is".into() })
        );
        assert_eq!(ctx.take_unresolved(), vec!["whatever_this_is".to_owned()]);
        assert!(ctx.take_unresolved().is_empty());
    }

    #[test]
    fn every_unresolved_name_in_a_rule_accumulates() {
        let mut ctx = ctx();
        let tree = Node::boolean(
            crate::ast::BoolOp::And,
            Node::ident("first_mystery", IdentKind::Unknown),
            Node::ident("second_mystery", IdentKind::Unknown),
        );
        let err = analyze(tree, &mut ctx);
        assert_eq!(
            err,
            Err(AnalysisError::UnresolvedIdentifier { name: "first_mystery".into() })
        );
        assert_eq!(
            ctx.take_unresolved(),
            vec!["first_mystery".to_owned(), "second_mystery".to_owned()]
        );
    }

    #[test]
    fn unknown_callee_is_an_undeclared_macro() {
        let mut ctx = ctx();
        let err = analyze(Node::call("definitely_not_a_thing", vec![]), &mut ctx);
        assert_eq!(
            err,
            Err(AnalysisError::UndeclaredMacro { name: "definitely_not_a_thing".into() })
        );
    }

    #[test]
    fn call_arguments_stay_bare() {
        let mut ctx = ctx();
        let tree = Node::call(
            "has",
            vec![Node::ident("Kokiri_Sword", IdentKind::Unknown), Node::number(1.0)],
        );
        let out = analyze(tree, &mut ctx).unwrap();
        assert_eq!(
            out,
            Node::call(
                "has",
                vec![Node::ident("Kokiri_Sword", IdentKind::Token), Node::number(1.0)]
            )
        );
    }
}
