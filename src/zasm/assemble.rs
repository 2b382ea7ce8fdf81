use log::debug;

use super::data::{DataTables, NameHandle, NameKind, normalize};
use super::{Instruction, Op, TOD_DAMPE, TOD_DAY, TOD_NIGHT, Unit};
use crate::ast::{BoolOp, CompareOp, IdentKind, Literal, Node};
use crate::packed::Packed;

// ── Bytecode assembler ───────────────────────────────────────────────
//
// Walks one analyzed AST and emits one unit, interning into the shared
// data tables as it goes. Call sites are checked against a fixed
// fast-path table first; a fast opcode is chosen only when every
// operand fits its reserved layout, otherwise the call silently takes
// the generic encoding — a density trade-off, never an error.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AssembleError {
    #[error("unsupported call arity {arity} for '{callee}'")]
    UnsupportedArity { callee: String, arity: usize },
    #[error("identifier '{name}' reached the assembler unresolved")]
    UnresolvedIdentifier { name: String },
    #[error("boolean {op:?} is missing an operand")]
    MissingOperand { op: BoolOp },
}

#[derive(Debug, Default)]
pub struct Assembler {
    pub data: DataTables,
    next_id: u16,
}

impl Assembler {
    pub fn new() -> Assembler {
        Assembler::default()
    }

    pub fn assemble(&mut self, name: &str, tree: &Node) -> Result<Unit, AssembleError> {
        let mut code = Vec::new();
        self.emit(tree, &mut code)?;
        let id = self.next_id;
        self.next_id += 1;
        debug!("assembled '{}' into {} instructions", name, code.len());
        Ok(Unit { name: name.to_owned(), id, code })
    }

    /// Hand the tables over once every unit is assembled.
    pub fn into_data(self) -> DataTables {
        self.data
    }

    fn emit(&mut self, node: &Node, code: &mut Vec<Instruction>) -> Result<(), AssembleError> {
        match node {
            Node::Comparison { op, lhs, rhs } => {
                self.emit(lhs, code)?;
                self.emit(rhs, code)?;
                code.push(Instruction::op_only(match op {
                    CompareOp::Eq => Op::CmpEq,
                    CompareOp::NotEq => Op::CmpNq,
                    CompareOp::Lt => Op::CmpLt,
                }));
                Ok(())
            }
            Node::Boolean { op: BoolOp::Negate, lhs, .. } => {
                // sole operand, Empty right arm emits nothing
                if lhs.is_empty() {
                    return Err(AssembleError::MissingOperand { op: BoolOp::Negate });
                }
                self.emit(lhs, code)?;
                code.push(Instruction::op_only(Op::BoolNeg));
                Ok(())
            }
            Node::Boolean { op, lhs, rhs } => {
                if lhs.is_empty() || rhs.is_empty() {
                    return Err(AssembleError::MissingOperand { op: *op });
                }
                self.emit(lhs, code)?;
                self.emit(rhs, code)?;
                code.push(Instruction::op_only(match op {
                    BoolOp::And => Op::BoolAnd,
                    BoolOp::Or => Op::BoolOr,
                    BoolOp::Negate => unreachable!("negate handled above"),
                }));
                Ok(())
            }
            Node::Call { callee, args } => self.emit_call(callee, args, code),
            Node::Identifier { name, kind } => {
                let handle = self.intern_ident(name, *kind)?;
                code.push(Instruction::with_u24(Op::LoadName, handle.0));
                Ok(())
            }
            Node::Literal(Literal::Bool(true)) => {
                code.push(Instruction::op_only(Op::LoadTrue));
                Ok(())
            }
            Node::Literal(Literal::Bool(false)) => {
                code.push(Instruction::op_only(Op::LoadFalse));
                Ok(())
            }
            Node::Literal(Literal::Number(n)) => {
                code.push(self.emit_number(*n));
                Ok(())
            }
            Node::Literal(Literal::Text(t)) => {
                let handle = self.data.strings.intern(t);
                code.push(Instruction::with_u24(Op::LoadStr, handle.0));
                Ok(())
            }
            Node::Empty => Ok(()),
        }
    }

    /// Small non-negative integers take the immediate fast form; every
    /// other number is interned.
    fn emit_number(&mut self, n: f64) -> Instruction {
        if n >= 0.0 && n.fract() == 0.0 && n <= u16::MAX as f64 {
            let v = n as u16;
            if v <= u8::MAX as u16 {
                return Instruction::with_imm8(Op::LoadImm8, v as u8);
            }
            return Instruction::with_u16(Op::LoadImm16, v);
        }
        let handle = self.data.consts.intern(Packed::Number(n));
        Instruction::with_u24(Op::LoadConst, handle.0)
    }

    fn emit_call(
        &mut self,
        callee: &str,
        args: &[Node],
        code: &mut Vec<Instruction>,
    ) -> Result<(), AssembleError> {
        match normalize(callee).as_str() {
            "has" if args.len() == 2 => {
                if let Some(fused) = self.try_has_qty(args)? {
                    code.push(fused);
                    return Ok(());
                }
                debug!("has operands too wide for fast encoding, taking generic call");
                self.emit_generic_call(callee, args, code)
            }
            "hasall" | "hasany" if args.len() <= u8::MAX as usize => {
                for arg in args {
                    self.emit(arg, code)?;
                }
                code.push(Instruction::with_imm8(Op::LoadImm8, args.len() as u8));
                code.push(Instruction::op_only(if normalize(callee) == "hasall" {
                    Op::HasAll
                } else {
                    Op::HasAny
                }));
                Ok(())
            }
            "loadsetting" if args.len() == 1 => {
                if let Some((handle, _)) = self.narrow_ident(&args[0], u16::MAX as u32)? {
                    code.push(Instruction::with_u16(Op::ChkSetting, handle.0 as u16));
                    return Ok(());
                }
                self.emit_generic_call(callee, args, code)
            }
            "loadsetting2" if args.len() == 2 => {
                let block = self.narrow_ident(&args[0], 0x0FFF)?;
                let name = self.narrow_ident(&args[1], 0x0FFF)?;
                if let (Some((block, _)), Some((name, _))) = (block, name) {
                    code.push(Instruction::setting2(block.0 as u16, name.0 as u16));
                    return Ok(());
                }
                self.emit_generic_call(callee, args, code)
            }
            "trickenabled" if args.len() == 1 => {
                if let Some((handle, _)) = self.narrow_ident(&args[0], u16::MAX as u32)? {
                    code.push(Instruction::with_u16(Op::ChkTrick, handle.0 as u16));
                    return Ok(());
                }
                self.emit_generic_call(callee, args, code)
            }
            "checkage" if args.len() == 1 => {
                if let Some((name, _)) = args[0].as_identifier() {
                    match normalize(name).as_str() {
                        "adult" => {
                            code.push(Instruction::op_only(Op::IsAdult));
                            return Ok(());
                        }
                        "child" => {
                            code.push(Instruction::op_only(Op::IsChild));
                            return Ok(());
                        }
                        _ => {}
                    }
                }
                self.emit_generic_call(callee, args, code)
            }
            "isadult" if args.is_empty() => {
                code.push(Instruction::op_only(Op::IsAdult));
                Ok(())
            }
            "ischild" if args.is_empty() => {
                code.push(Instruction::op_only(Op::IsChild));
                Ok(())
            }
            "hasbottle" if args.is_empty() => {
                code.push(Instruction::op_only(Op::HasBottle));
                Ok(())
            }
            "atday" if args.is_empty() => {
                code.push(Instruction::with_imm8(Op::ChkTod, TOD_DAY));
                Ok(())
            }
            "atnight" if args.is_empty() => {
                code.push(Instruction::with_imm8(Op::ChkTod, TOD_NIGHT));
                Ok(())
            }
            "atdampetime" if args.is_empty() => {
                code.push(Instruction::with_imm8(Op::ChkTod, TOD_DAMPE));
                Ok(())
            }
            _ => self.emit_generic_call(callee, args, code),
        }
    }

    /// `has(token, qty)` fuses when the token handle fits 16 bits and
    /// the quantity is an integer literal fitting one byte.
    fn try_has_qty(&mut self, args: &[Node]) -> Result<Option<Instruction>, AssembleError> {
        let qty = match &args[1] {
            Node::Literal(Literal::Number(n))
                if *n >= 0.0 && n.fract() == 0.0 && *n <= u8::MAX as f64 =>
            {
                *n as u8
            }
            _ => return Ok(None),
        };
        match self.narrow_ident(&args[0], u16::MAX as u32)? {
            Some((handle, _)) => Ok(Some(Instruction::has_qty(handle.0 as u16, qty))),
            None => Ok(None),
        }
    }

    /// Intern an identifier argument and confirm the handle fits the
    /// reserved operand width. `None` means "take the generic path".
    fn narrow_ident(
        &mut self,
        node: &Node,
        max: u32,
    ) -> Result<Option<(NameHandle, IdentKind)>, AssembleError> {
        let Some((name, kind)) = node.as_identifier() else {
            return Ok(None);
        };
        let name = name.to_owned();
        let handle = self.intern_ident(&name, kind)?;
        if handle.0 <= max {
            Ok(Some((handle, kind)))
        } else {
            Ok(None)
        }
    }

    fn emit_generic_call(
        &mut self,
        callee: &str,
        args: &[Node],
        code: &mut Vec<Instruction>,
    ) -> Result<(), AssembleError> {
        let op = match args.len() {
            0 => Op::Call0,
            1 => Op::Call1,
            2 => Op::Call2,
            arity => {
                return Err(AssembleError::UnsupportedArity { callee: callee.to_owned(), arity });
            }
        };
        for arg in args {
            self.emit(arg, code)?;
        }
        let handle = self.data.names.intern(callee, NameKind::Func);
        code.push(Instruction::with_u24(op, handle.0));
        Ok(())
    }

    fn intern_ident(&mut self, name: &str, kind: IdentKind) -> Result<NameHandle, AssembleError> {
        let kind = match kind {
            IdentKind::Token | IdentKind::Event => NameKind::Token,
            IdentKind::Setting => NameKind::Setting,
            IdentKind::Trick => NameKind::Trick,
            IdentKind::Var | IdentKind::Symbol => NameKind::Var,
            IdentKind::Builtin => NameKind::Func,
            IdentKind::Unknown | IdentKind::Expandable | IdentKind::Unresolved => {
                return Err(AssembleError::UnresolvedIdentifier { name: name.to_owned() });
            }
        };
        Ok(self.data.names.intern(name, kind))
    }
}
