//! Compiles world-traversal gating rules to compact bytecode and
//! evaluates them against live game state.
//!
//! A rule arrives as a parse tree ([`parse_tree::Expression`]), lowers
//! to a canonical AST ([`ast::Node`]), is classified, folded and
//! macro-expanded ([`analysis`]), and assembles into 32-bit packed
//! instructions over shared interned data tables ([`zasm`]). The
//! [`vm`] then answers "is this reachable right now?" against anything
//! implementing [`vm::WorldQuery`].

pub mod analysis;
pub mod ast;
pub mod compile;
pub mod packed;
pub mod parse_tree;
pub mod vm;
pub mod zasm;

pub use compile::{CompileError, Compiler, Outcome, Script, compile_script};
pub use packed::Packed;
pub use vm::{SessionBindings, Vm, VmError, WorldQuery};
pub use zasm::Assembly;
