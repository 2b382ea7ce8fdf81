use log::{debug, info, warn};
use serde::Deserialize;

use crate::analysis::{AnalysisContext, AnalysisError, analyze};
use crate::ast::{LowerError, Node, lower};
use crate::parse_tree::Expression;
use crate::zasm::{AssembleError, Assembler, Assembly, Unit};

// ── Compilation driver ───────────────────────────────────────────────
//
// One `Compiler` per session. Rules run lower → analyze → assemble
// against shared state: one analysis context, one set of data tables.
// A failing rule is recorded and skipped; the batch keeps going so a
// script's whole error surface shows up in one run. Late expansions
// queue behind the rule that spawned them and are flushed before the
// next rule compiles, since they splice into already-emitted code via
// their synthetic event token.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Lower(#[from] LowerError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
}

/// Failures report against the human-authored rule: its name plus the
/// text it arrived as, whatever stage actually broke.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("rule '{rule}': {source}\n  in: {text}")]
pub struct CompileError {
    pub rule: String,
    pub text: String,
    #[source]
    pub source: StageError,
}

impl CompileError {
    fn new(rule: &str, text: String, source: impl Into<StageError>) -> CompileError {
        CompileError { rule: rule.to_owned(), text, source: source.into() }
    }
}

fn rule_text(expr: &Expression) -> String {
    serde_json::to_string(expr).unwrap_or_default()
}

#[derive(Debug, Default)]
pub struct Compiler {
    ctx: AnalysisContext,
    assembler: Assembler,
    units: Vec<Unit>,
    failures: Vec<CompileError>,
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler { ctx: AnalysisContext::new(), ..Compiler::default() }
    }

    pub fn declare_token(&mut self, name: &str) {
        self.ctx.declare_token(name);
    }

    pub fn declare_setting(&mut self, name: &str) {
        self.ctx.declare_setting(name);
    }

    pub fn declare_builtin(&mut self, name: &str) {
        self.ctx.declare_builtin(name);
    }

    pub fn declare_macro(
        &mut self,
        name: &str,
        params: Vec<String>,
        body: &Expression,
    ) -> Result<(), CompileError> {
        let body = lower(body).map_err(|e| CompileError::new(name, rule_text(body), e))?;
        self.ctx.declare_macro(name, params, body);
        Ok(())
    }

    /// Compile one rule. `origin` names the region the rule is
    /// evaluated from and anchors any `here(...)` inside it.
    pub fn compile_rule(
        &mut self,
        name: &str,
        origin: Option<&str>,
        expr: &Expression,
    ) -> Result<(), CompileError> {
        match origin {
            Some(origin) => self.ctx.set_origin(origin),
            None => self.ctx.clear_origin(),
        }
        let text = rule_text(expr);
        let tree = lower(expr).map_err(|e| CompileError::new(name, text.clone(), e))?;
        self.compile_tree(name, &text, tree)?;
        self.flush_late_expansions()
    }

    fn compile_tree(&mut self, name: &str, text: &str, tree: Node) -> Result<(), CompileError> {
        let analyzed = analyze(tree, &mut self.ctx)
            .map_err(|e| CompileError::new(name, text.to_owned(), e))?;
        let unit = self
            .assembler
            .assemble(name, &analyzed)
            .map_err(|e| CompileError::new(name, text.to_owned(), e))?;
        debug!("compiled '{}' as unit {}", name, unit.id);
        self.units.push(unit);
        Ok(())
    }

    /// Analyzing a subrule can queue further subrules; drain until the
    /// queue stays empty. Termination rides on macro expansion's own
    /// bound, since each pass is ordinary rule compilation.
    fn flush_late_expansions(&mut self) -> Result<(), CompileError> {
        loop {
            let batch = self.ctx.take_late_expansions();
            if batch.is_empty() {
                return Ok(());
            }
            for expansion in batch {
                debug!("compiling late expansion '{}' from '{}'", expansion.name, expansion.origin);
                self.ctx.set_origin(expansion.origin.clone());
                let text = expansion.rule.to_string();
                self.compile_tree(&expansion.name, &text, expansion.rule)?;
            }
        }
    }

    /// Compile every rule, recording failures instead of stopping.
    pub fn compile_all<'r>(
        &mut self,
        rules: impl IntoIterator<Item = &'r Rule>,
    ) {
        for rule in rules {
            if let Err(err) = self.compile_rule(&rule.name, rule.origin.as_deref(), &rule.rule) {
                warn!("{err}");
                self.failures.push(err);
            }
        }
    }

    pub fn failures(&self) -> &[CompileError] {
        &self.failures
    }

    /// Every identifier no rule could resolve, across the whole batch.
    pub fn unresolved(&mut self) -> Vec<String> {
        self.ctx.take_unresolved()
    }

    pub fn finish(self) -> Assembly {
        let mut assembly = Assembly::default();
        for unit in self.units {
            assembly.include(unit);
        }
        assembly.data = self.assembler.into_data();
        assembly
    }
}

// ── Script input ─────────────────────────────────────────────────────
//
// The on-disk form a frontend hands over: the name universe, macro
// declarations, and rules as serialized parse trees.

#[derive(Debug, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub settings: Vec<String>,
    #[serde(default)]
    pub builtins: Vec<String>,
    #[serde(default)]
    pub macros: Vec<MacroDecl>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
pub struct MacroDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Expression,
}

#[derive(Debug, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub origin: Option<String>,
    pub rule: Expression,
}

/// Everything a compiled script produces, failures included.
#[derive(Debug)]
pub struct Outcome {
    pub assembly: Assembly,
    pub failures: Vec<CompileError>,
    pub unresolved: Vec<String>,
}

pub fn compile_script(script: &Script) -> Outcome {
    let mut compiler = Compiler::new();
    for token in &script.tokens {
        compiler.declare_token(token);
    }
    for setting in &script.settings {
        compiler.declare_setting(setting);
    }
    for builtin in &script.builtins {
        compiler.declare_builtin(builtin);
    }
    for decl in &script.macros {
        if let Err(err) = compiler.declare_macro(&decl.name, decl.params.clone(), &decl.body) {
            warn!("{err}");
            compiler.failures.push(err);
        }
    }
    compiler.compile_all(&script.rules);
    let failures = std::mem::take(&mut compiler.failures);
    let unresolved = compiler.unresolved();
    info!(
        "compiled {} of {} rules ({} unresolved names)",
        script.rules.len() - failures.len(),
        script.rules.len(),
        unresolved.len()
    );
    Outcome { assembly: compiler.finish(), failures, unresolved }
}
