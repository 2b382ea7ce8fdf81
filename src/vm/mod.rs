use std::collections::{HashMap, HashSet};

use log::trace;

use crate::packed::Packed;
use crate::zasm::data::{ConstHandle, DataTables, NameHandle, NameKind, normalize};
use crate::zasm::{Op, TOD_DAMPE, TOD_DAY, TOD_NIGHT, Unit};

// ── Evaluation ───────────────────────────────────────────────────────
//
// A unit evaluates against two things: the live world through the
// `WorldQuery` trait, and the session-fixed bindings (setting values,
// enabled tricks) captured when the session was set up. Every unit runs
// on a fresh stack and must leave exactly one boolean behind; anything
// else is a compiler bug surfaced as an error rather than a panic.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("stack underflow in '{unit}' at instruction {index}")]
    StackUnderflow { unit: String, index: usize },
    #[error("unknown opcode 0x{byte:02X} in '{unit}' at instruction {index}")]
    UnknownOpcode { unit: String, index: usize, byte: u8 },
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },
    #[error("no data table entry for handle {handle}")]
    MissingData { handle: u32 },
    #[error("call to unknown function '{name}'")]
    UnknownFunction { name: String },
    #[error("'{name}' cannot take these arguments")]
    BadCallArguments { name: String },
    #[error("'{unit}' finished with {depth} values on the stack")]
    UnbalancedStack { unit: String, depth: usize },
}

/// The questions a rule can ask of the live world. Implementations are
/// expected to be cheap; a rule may ask several per evaluation.
pub trait WorldQuery {
    /// Does the world hold at least `qty` of the token? The fused
    /// `HasQty` encoding carries an 8-bit quantity, but wider ones
    /// arrive through the generic call path, so the full range must
    /// answer.
    fn has_qty(&self, token: NameHandle, qty: u32) -> bool;

    fn has_all(&self, tokens: &[NameHandle]) -> bool {
        tokens.iter().all(|&t| self.has_qty(t, 1))
    }

    fn has_any(&self, tokens: &[NameHandle]) -> bool {
        tokens.iter().any(|&t| self.has_qty(t, 1))
    }

    fn has_bottle(&self) -> bool;
    fn is_adult(&self) -> bool;
    fn is_child(&self) -> bool;

    /// True when the current time of day intersects the mask.
    fn at_tod(&self, mask: u8) -> bool;
}

/// Session-fixed data: setting values, block settings, enabled tricks.
/// Bound once against the assembly's tables before evaluation starts;
/// an unbound setting reads as `false`.
#[derive(Debug, Default)]
pub struct SessionBindings {
    settings: HashMap<u32, Packed>,
    block_settings: HashMap<(u32, u32), Packed>,
    tricks: HashSet<u32>,
}

impl SessionBindings {
    pub fn new() -> SessionBindings {
        SessionBindings::default()
    }

    pub fn bind_setting(&mut self, data: &mut DataTables, name: &str, value: Packed) {
        let h = data.names.intern(name, NameKind::Setting);
        self.settings.insert(h.0, value);
    }

    /// String-valued settings intern their value so comparisons against
    /// rule-text literals resolve to the same handle.
    pub fn bind_setting_text(&mut self, data: &mut DataTables, name: &str, value: &str) {
        let v = data.strings.intern(value);
        self.bind_setting(data, name, Packed::Str(v.0));
    }

    pub fn bind_block_setting(
        &mut self,
        data: &mut DataTables,
        block: &str,
        name: &str,
        value: Packed,
    ) {
        let b = data.names.intern(block, NameKind::Setting);
        let n = data.names.intern(name, NameKind::Var);
        self.block_settings.insert((b.0, n.0), value);
    }

    pub fn enable_trick(&mut self, data: &mut DataTables, name: &str) {
        let h = data.names.intern(name, NameKind::Trick);
        self.tricks.insert(h.0);
    }

    fn setting(&self, handle: u32) -> Packed {
        self.settings.get(&handle).copied().unwrap_or(Packed::Bool(false))
    }

    fn block_setting(&self, block: u32, name: u32) -> Packed {
        self.block_settings.get(&(block, name)).copied().unwrap_or(Packed::Bool(false))
    }

    fn trick_enabled(&self, handle: u32) -> bool {
        self.tricks.contains(&handle)
    }
}

pub struct Vm<'a> {
    data: &'a DataTables,
    bindings: &'a SessionBindings,
}

impl<'a> Vm<'a> {
    pub fn new(data: &'a DataTables, bindings: &'a SessionBindings) -> Vm<'a> {
        Vm { data, bindings }
    }

    pub fn evaluate<W: WorldQuery>(&self, unit: &Unit, world: &W) -> Result<bool, VmError> {
        let mut stack: Vec<Packed> = Vec::with_capacity(16);
        for (index, instruction) in unit.code.iter().enumerate() {
            let Some(op) = instruction.op() else {
                return Err(VmError::UnknownOpcode {
                    unit: unit.name.clone(),
                    index,
                    byte: instruction.op_byte(),
                });
            };
            let underflow = || VmError::StackUnderflow { unit: unit.name.clone(), index };
            trace!("{}[{index}] {}", unit.name, op.mnemonic());
            match op {
                Op::LoadConst => {
                    let h = instruction.u24();
                    let value = self
                        .data
                        .consts
                        .get(ConstHandle(h))
                        .ok_or(VmError::MissingData { handle: h })?;
                    stack.push(value);
                }
                Op::LoadStr => stack.push(Packed::Str(instruction.u24())),
                Op::LoadName => {
                    let h = instruction.u24();
                    stack.push(self.name_value(h)?);
                }
                Op::LoadTrue => stack.push(Packed::Bool(true)),
                Op::LoadFalse => stack.push(Packed::Bool(false)),
                Op::LoadImm8 => stack.push(Packed::Uint(instruction.imm8() as u32)),
                Op::LoadImm16 => stack.push(Packed::Uint(instruction.u16operand() as u32)),

                Op::CmpEq | Op::CmpNq => {
                    let rhs = stack.pop().ok_or_else(underflow)?;
                    let lhs = stack.pop().ok_or_else(underflow)?;
                    let equal = values_equal(lhs, rhs);
                    stack.push(Packed::Bool(if op == Op::CmpEq { equal } else { !equal }));
                }
                Op::CmpLt => {
                    let rhs = stack.pop().ok_or_else(underflow)?;
                    let lhs = stack.pop().ok_or_else(underflow)?;
                    let (l, r) = match (lhs.as_f64(), rhs.as_f64()) {
                        (Some(l), Some(r)) => (l, r),
                        _ => {
                            return Err(VmError::TypeMismatch {
                                expected: "number",
                                found: non_numeric(lhs, rhs),
                            });
                        }
                    };
                    stack.push(Packed::Bool(l < r));
                }

                Op::BoolAnd | Op::BoolOr => {
                    let rhs = pop_bool(&mut stack).ok_or_else(underflow)??;
                    let lhs = pop_bool(&mut stack).ok_or_else(underflow)??;
                    let value = if op == Op::BoolAnd { lhs && rhs } else { lhs || rhs };
                    stack.push(Packed::Bool(value));
                }
                Op::BoolNeg => {
                    let value = pop_bool(&mut stack).ok_or_else(underflow)??;
                    stack.push(Packed::Bool(!value));
                }
                Op::ReduceAll | Op::ReduceAny => {
                    let count = pop_count(&mut stack).ok_or_else(underflow)??;
                    let mut all = true;
                    let mut any = false;
                    for _ in 0..count {
                        let b = pop_bool(&mut stack).ok_or_else(underflow)??;
                        all &= b;
                        any |= b;
                    }
                    stack.push(Packed::Bool(if op == Op::ReduceAll { all } else { any }));
                }

                Op::Call0 | Op::Call1 | Op::Call2 => {
                    let argc = match op {
                        Op::Call0 => 0,
                        Op::Call1 => 1,
                        _ => 2,
                    };
                    let mut args = [Packed::Bool(false); 2];
                    for slot in (0..argc).rev() {
                        args[slot] = stack.pop().ok_or_else(underflow)?;
                    }
                    let h = instruction.u24();
                    let name = self
                        .data
                        .names
                        .text(NameHandle(h))
                        .ok_or(VmError::MissingData { handle: h })?;
                    let value = self.call(name, &args[..argc], world)?;
                    stack.push(value);
                }

                Op::HasQty => {
                    let token = NameHandle(instruction.u16operand() as u32);
                    let qty = instruction.payload()[2] as u32;
                    stack.push(Packed::Bool(world.has_qty(token, qty)));
                }
                Op::HasAll | Op::HasAny => {
                    let count = pop_count(&mut stack).ok_or_else(underflow)??;
                    let mut tokens = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let value = stack.pop().ok_or_else(underflow)?;
                        let Some(h) = value.as_token() else {
                            return Err(VmError::TypeMismatch {
                                expected: "token",
                                found: value.type_name(),
                            });
                        };
                        tokens.push(NameHandle(h));
                    }
                    let value = if op == Op::HasAll {
                        world.has_all(&tokens)
                    } else {
                        world.has_any(&tokens)
                    };
                    stack.push(Packed::Bool(value));
                }
                Op::IsChild => stack.push(Packed::Bool(world.is_child())),
                Op::IsAdult => stack.push(Packed::Bool(world.is_adult())),
                Op::HasBottle => stack.push(Packed::Bool(world.has_bottle())),
                Op::ChkTod => stack.push(Packed::Bool(world.at_tod(instruction.imm8()))),
                Op::ChkSetting => {
                    let h = instruction.u16operand() as u32;
                    stack.push(self.bindings.setting(h));
                }
                Op::ChkSetting2 => {
                    let (block, name) = instruction.setting2_operands();
                    stack.push(self.bindings.block_setting(block as u32, name as u32));
                }
                Op::ChkTrick => {
                    let h = instruction.u16operand() as u32;
                    stack.push(Packed::Bool(self.bindings.trick_enabled(h)));
                }
            }
        }

        match stack.as_slice() {
            [value] => value.as_bool().ok_or(VmError::TypeMismatch {
                expected: "bool",
                found: value.type_name(),
            }),
            other => Err(VmError::UnbalancedStack {
                unit: unit.name.clone(),
                depth: other.len(),
            }),
        }
    }

    /// What `LoadName` pushes: the tagged handle for identity kinds, so
    /// comparisons work on handles alone.
    fn name_value(&self, handle: u32) -> Result<Packed, VmError> {
        let kind = self
            .data
            .names
            .kind(NameHandle(handle))
            .ok_or(VmError::MissingData { handle })?;
        Ok(match kind {
            NameKind::Token => Packed::Token(handle),
            NameKind::Setting => Packed::Setting(handle),
            NameKind::Trick => Packed::Trick(handle),
            NameKind::Var => Packed::Var(handle),
            NameKind::Func => Packed::Func(handle),
        })
    }

    /// The generic call path. Every fast opcode has a named twin here so
    /// a unit compiled without fusion evaluates identically.
    fn call<W: WorldQuery>(
        &self,
        name: &str,
        args: &[Packed],
        world: &W,
    ) -> Result<Packed, VmError> {
        let key = normalize(name);
        let value = match (key.as_str(), args) {
            ("hasbottle", []) => world.has_bottle(),
            ("isadult", []) => world.is_adult(),
            ("ischild", []) => world.is_child(),
            ("atday", []) => world.at_tod(TOD_DAY),
            ("atnight", []) => world.at_tod(TOD_NIGHT),
            ("atdampetime", []) => world.at_tod(TOD_DAMPE),
            ("has", [token, qty]) => {
                let (Some(h), Some(q)) = (token.as_token(), qty.as_f64()) else {
                    return Err(VmError::BadCallArguments { name: name.to_owned() });
                };
                if !(0.0..=u32::MAX as f64).contains(&q) {
                    return Err(VmError::BadCallArguments { name: name.to_owned() });
                }
                world.has_qty(NameHandle(h), q as u32)
            }
            ("loadsetting", [setting]) => {
                let Packed::Setting(h) = setting else {
                    return Err(VmError::BadCallArguments { name: name.to_owned() });
                };
                return Ok(self.bindings.setting(*h));
            }
            ("loadsetting2", [block, setting]) => {
                let (Packed::Setting(b), n) = (block, setting) else {
                    return Err(VmError::BadCallArguments { name: name.to_owned() });
                };
                let handle = match n {
                    Packed::Var(h) | Packed::Setting(h) | Packed::Token(h) => *h,
                    _ => return Err(VmError::BadCallArguments { name: name.to_owned() }),
                };
                return Ok(self.bindings.block_setting(*b, handle));
            }
            ("trickenabled", [trick]) => {
                let Packed::Trick(h) = trick else {
                    return Err(VmError::BadCallArguments { name: name.to_owned() });
                };
                self.bindings.trick_enabled(*h)
            }
            ("checkage", [age]) => {
                let handle = match age {
                    Packed::Var(h) | Packed::Token(h) => *h,
                    _ => return Err(VmError::BadCallArguments { name: name.to_owned() }),
                };
                let text = self
                    .data
                    .names
                    .text(NameHandle(handle))
                    .ok_or(VmError::MissingData { handle })?;
                match normalize(text).as_str() {
                    "adult" => world.is_adult(),
                    "child" => world.is_child(),
                    "both" => world.is_adult() && world.is_child(),
                    "either" => world.is_adult() || world.is_child(),
                    _ => return Err(VmError::BadCallArguments { name: name.to_owned() }),
                }
            }
            _ => return Err(VmError::UnknownFunction { name: name.to_owned() }),
        };
        Ok(Packed::Bool(value))
    }
}

/// Equality over packed values: numeric variants compare as numbers,
/// everything else by bit pattern (handles compare as identity).
fn values_equal(lhs: Packed, rhs: Packed) -> bool {
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => lhs.same_bits(rhs),
    }
}

fn non_numeric(lhs: Packed, rhs: Packed) -> &'static str {
    if lhs.as_f64().is_none() { lhs.type_name() } else { rhs.type_name() }
}

fn pop_bool(stack: &mut Vec<Packed>) -> Option<Result<bool, VmError>> {
    let value = stack.pop()?;
    Some(value.as_bool().ok_or(VmError::TypeMismatch {
        expected: "bool",
        found: value.type_name(),
    }))
}

fn pop_count(stack: &mut Vec<Packed>) -> Option<Result<u32, VmError>> {
    let value = stack.pop()?;
    Some(value.as_uint().ok_or(VmError::TypeMismatch {
        expected: "count",
        found: value.type_name(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zasm::Instruction;

    /// A world with a token multiset, an age, a bottle flag and a
    /// time-of-day mask.
    #[derive(Default)]
    struct TestWorld {
        tokens: HashMap<u32, u32>,
        adult: bool,
        child: bool,
        bottle: bool,
        tod: u8,
    }

    impl WorldQuery for TestWorld {
        fn has_qty(&self, token: NameHandle, qty: u32) -> bool {
            self.tokens.get(&token.0).copied().unwrap_or(0) >= qty
        }
        fn has_bottle(&self) -> bool {
            self.bottle
        }
        fn is_adult(&self) -> bool {
            self.adult
        }
        fn is_child(&self) -> bool {
            self.child
        }
        fn at_tod(&self, mask: u8) -> bool {
            self.tod & mask != 0
        }
    }

    fn unit(code: Vec<Instruction>) -> Unit {
        Unit { name: "test".to_owned(), id: 0, code }
    }

    #[test]
    fn fast_has_checks_quantity() {
        let mut data = DataTables::default();
        let h = data.names.intern("Bombchus", NameKind::Token);
        let bindings = SessionBindings::new();
        let vm = Vm::new(&data, &bindings);
        let u = unit(vec![Instruction::has_qty(h.0 as u16, 5)]);

        let mut world = TestWorld::default();
        world.tokens.insert(h.0, 4);
        assert_eq!(vm.evaluate(&u, &world), Ok(false));
        world.tokens.insert(h.0, 5);
        assert_eq!(vm.evaluate(&u, &world), Ok(true));
    }

    #[test]
    fn generic_has_call_matches_fast_path() {
        let mut data = DataTables::default();
        let tok = data.names.intern("Bombchus", NameKind::Token);
        let has = data.names.intern("has", NameKind::Func);
        let bindings = SessionBindings::new();
        let vm = Vm::new(&data, &bindings);

        let fast = unit(vec![Instruction::has_qty(tok.0 as u16, 3)]);
        let generic = unit(vec![
            Instruction::with_u24(Op::LoadName, tok.0),
            Instruction::with_imm8(Op::LoadImm8, 3),
            Instruction::with_u24(Op::Call2, has.0),
        ]);

        for qty in [0u32, 2, 3, 9] {
            let mut world = TestWorld::default();
            world.tokens.insert(tok.0, qty);
            assert_eq!(
                vm.evaluate(&fast, &world),
                vm.evaluate(&generic, &world),
                "diverged at qty {qty}"
            );
        }
    }

    #[test]
    fn generic_has_covers_quantities_past_the_fused_range() {
        let mut data = DataTables::default();
        let tok = data.names.intern("Gold_Rupee", NameKind::Token);
        let has = data.names.intern("has", NameKind::Func);
        let bindings = SessionBindings::new();
        let vm = Vm::new(&data, &bindings);

        let u = unit(vec![
            Instruction::with_u24(Op::LoadName, tok.0),
            Instruction::with_u16(Op::LoadImm16, 500),
            Instruction::with_u24(Op::Call2, has.0),
        ]);
        let mut world = TestWorld::default();
        world.tokens.insert(tok.0, 499);
        assert_eq!(vm.evaluate(&u, &world), Ok(false));
        world.tokens.insert(tok.0, 500);
        assert_eq!(vm.evaluate(&u, &world), Ok(true));
    }

    #[test]
    fn setting_value_compares_against_string_literal() {
        let mut data = DataTables::default();
        let mut bindings = SessionBindings::new();
        bindings.bind_setting_text(&mut data, "bridge", "open");
        let bridge = data.names.lookup("bridge").unwrap();
        let open = data.strings.intern("open");
        let vanilla = data.strings.intern("vanilla");
        let vm = Vm::new(&data, &bindings);

        let matching = unit(vec![
            Instruction::with_u16(Op::ChkSetting, bridge.0 as u16),
            Instruction::with_u24(Op::LoadStr, open.0),
            Instruction::op_only(Op::CmpEq),
        ]);
        let differing = unit(vec![
            Instruction::with_u16(Op::ChkSetting, bridge.0 as u16),
            Instruction::with_u24(Op::LoadStr, vanilla.0),
            Instruction::op_only(Op::CmpEq),
        ]);
        let world = TestWorld::default();
        assert_eq!(vm.evaluate(&matching, &world), Ok(true));
        assert_eq!(vm.evaluate(&differing, &world), Ok(false));
    }

    #[test]
    fn numeric_setting_orders_against_immediates() {
        let mut data = DataTables::default();
        let mut bindings = SessionBindings::new();
        bindings.bind_setting(&mut data, "chicken_count", Packed::Uint(4));
        let h = data.names.lookup("chicken_count").unwrap();
        let vm = Vm::new(&data, &bindings);

        let u = unit(vec![
            Instruction::with_u16(Op::ChkSetting, h.0 as u16),
            Instruction::with_imm8(Op::LoadImm8, 7),
            Instruction::op_only(Op::CmpLt),
        ]);
        assert_eq!(vm.evaluate(&u, &TestWorld::default()), Ok(true));
    }

    #[test]
    fn unbound_setting_reads_false() {
        let mut data = DataTables::default();
        let h = data.names.intern("open_forest", NameKind::Setting);
        let bindings = SessionBindings::new();
        let vm = Vm::new(&data, &bindings);
        let u = unit(vec![Instruction::with_u16(Op::ChkSetting, h.0 as u16)]);
        assert_eq!(vm.evaluate(&u, &TestWorld::default()), Ok(false));
    }

    #[test]
    fn block_settings_resolve_by_pair() {
        let mut data = DataTables::default();
        let mut bindings = SessionBindings::new();
        bindings.bind_block_setting(&mut data, "skipped_trials", "forest", Packed::Bool(true));
        let block = data.names.lookup("skipped_trials").unwrap();
        let name = data.names.lookup("forest").unwrap();
        let vm = Vm::new(&data, &bindings);

        let u = unit(vec![Instruction::setting2(block.0 as u16, name.0 as u16)]);
        assert_eq!(vm.evaluate(&u, &TestWorld::default()), Ok(true));
    }

    #[test]
    fn tricks_check_the_session_set() {
        let mut data = DataTables::default();
        let mut bindings = SessionBindings::new();
        bindings.enable_trick(&mut data, "logic_fewer_tunics");
        let h = data.names.lookup("logic_fewer_tunics").unwrap();
        let vm = Vm::new(&data, &bindings);
        let u = unit(vec![Instruction::with_u16(Op::ChkTrick, h.0 as u16)]);
        assert_eq!(vm.evaluate(&u, &TestWorld::default()), Ok(true));
    }

    #[test]
    fn has_all_pops_every_operand() {
        let mut data = DataTables::default();
        let a = data.names.intern("Hookshot", NameKind::Token);
        let b = data.names.intern("Bomb_Bag", NameKind::Token);
        let bindings = SessionBindings::new();
        let vm = Vm::new(&data, &bindings);
        let u = unit(vec![
            Instruction::with_u24(Op::LoadName, a.0),
            Instruction::with_u24(Op::LoadName, b.0),
            Instruction::with_imm8(Op::LoadImm8, 2),
            Instruction::op_only(Op::HasAll),
        ]);

        let mut world = TestWorld::default();
        world.tokens.insert(a.0, 1);
        // one of two missing: false, and the stack still balances
        assert_eq!(vm.evaluate(&u, &world), Ok(false));
        world.tokens.insert(b.0, 1);
        assert_eq!(vm.evaluate(&u, &world), Ok(true));
    }

    #[test]
    fn check_age_ages() {
        let mut data = DataTables::default();
        let adult = data.names.intern("adult", NameKind::Var);
        let either = data.names.intern("either", NameKind::Var);
        let check_age = data.names.intern("check_age", NameKind::Func);
        let bindings = SessionBindings::new();
        let vm = Vm::new(&data, &bindings);

        let mut world = TestWorld::default();
        world.child = true;
        let as_adult = unit(vec![
            Instruction::with_u24(Op::LoadName, adult.0),
            Instruction::with_u24(Op::Call1, check_age.0),
        ]);
        let as_either = unit(vec![
            Instruction::with_u24(Op::LoadName, either.0),
            Instruction::with_u24(Op::Call1, check_age.0),
        ]);
        assert_eq!(vm.evaluate(&as_adult, &world), Ok(false));
        assert_eq!(vm.evaluate(&as_either, &world), Ok(true));
    }

    #[test]
    fn tod_mask_intersects() {
        let data = DataTables::default();
        let bindings = SessionBindings::new();
        let vm = Vm::new(&data, &bindings);
        let u = unit(vec![Instruction::with_imm8(Op::ChkTod, TOD_DAY | TOD_NIGHT)]);

        let mut world = TestWorld::default();
        world.tod = TOD_DAMPE;
        assert_eq!(vm.evaluate(&u, &world), Ok(false));
        world.tod = TOD_NIGHT;
        assert_eq!(vm.evaluate(&u, &world), Ok(true));
    }

    #[test]
    fn underflow_is_an_error_not_a_panic() {
        let data = DataTables::default();
        let bindings = SessionBindings::new();
        let vm = Vm::new(&data, &bindings);
        let u = unit(vec![Instruction::op_only(Op::BoolAnd)]);
        assert!(matches!(
            vm.evaluate(&u, &TestWorld::default()),
            Err(VmError::StackUnderflow { .. })
        ));
    }

    #[test]
    fn leftover_stack_is_an_error() {
        let data = DataTables::default();
        let bindings = SessionBindings::new();
        let vm = Vm::new(&data, &bindings);
        let u = unit(vec![
            Instruction::op_only(Op::LoadTrue),
            Instruction::op_only(Op::LoadTrue),
        ]);
        assert_eq!(
            vm.evaluate(&u, &TestWorld::default()),
            Err(VmError::UnbalancedStack { unit: "test".into(), depth: 2 })
        );
    }

    #[test]
    fn non_boolean_result_is_an_error() {
        let data = DataTables::default();
        let bindings = SessionBindings::new();
        let vm = Vm::new(&data, &bindings);
        let u = unit(vec![Instruction::with_imm8(Op::LoadImm8, 7)]);
        assert_eq!(
            vm.evaluate(&u, &TestWorld::default()),
            Err(VmError::TypeMismatch { expected: "bool", found: "uint" })
        );
    }
}
