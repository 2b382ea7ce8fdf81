use serde::{Deserialize, Serialize};

// ── External parser contract ─────────────────────────────────────────
//
// The front end that tokenizes and parses rule text lives outside this
// crate; it hands us this tree (in process, or as JSON — the CLI reads
// the JSON form). We never inspect source text, only this structure.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expression {
    BinOp {
        op: BinOpKind,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    BoolOp {
        op: BoolOpKind,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    /// Unary `not`.
    Unary { target: Box<Expression> },
    Call {
        callee: Box<Expression>,
        #[serde(default)]
        args: Vec<Expression>,
    },
    /// `block[setting]`
    Subscript {
        target: Box<Expression>,
        index: Box<Expression>,
    },
    /// `(item, qty)` — only two-element tuples are meaningful.
    Tuple { elems: Vec<Expression> },
    Identifier { name: String },
    Literal { value: LiteralValue },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOpKind {
    Eq,
    NotEq,
    Lt,
    /// `setting in block`
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolOpKind {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LiteralValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Expression {
    pub fn ident(name: impl Into<String>) -> Expression {
        Expression::Identifier { name: name.into() }
    }

    pub fn number(n: f64) -> Expression {
        Expression::Literal { value: LiteralValue::Number(n) }
    }

    pub fn boolean(b: bool) -> Expression {
        Expression::Literal { value: LiteralValue::Bool(b) }
    }

    pub fn text(s: impl Into<String>) -> Expression {
        Expression::Literal { value: LiteralValue::Text(s.into()) }
    }

    pub fn call(callee: impl Into<String>, args: Vec<Expression>) -> Expression {
        Expression::Call { callee: Box::new(Expression::ident(callee)), args }
    }

    pub fn and(lhs: Expression, rhs: Expression) -> Expression {
        Expression::BoolOp { op: BoolOpKind::And, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn or(lhs: Expression, rhs: Expression) -> Expression {
        Expression::BoolOp { op: BoolOpKind::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn not(target: Expression) -> Expression {
        Expression::Unary { target: Box::new(target) }
    }

    pub fn binop(op: BinOpKind, lhs: Expression, rhs: Expression) -> Expression {
        Expression::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_a_rule_tree() {
        let json = r#"{
            "kind": "bool_op",
            "op": "and",
            "lhs": { "kind": "identifier", "name": "Kokiri_Sword" },
            "rhs": {
                "kind": "call",
                "callee": { "kind": "identifier", "name": "has" },
                "args": [
                    { "kind": "identifier", "name": "Deku_Shield" },
                    { "kind": "literal", "value": 1 }
                ]
            }
        }"#;
        let expr: Expression = serde_json::from_str(json).expect("parse tree json");
        assert_eq!(
            expr,
            Expression::and(
                Expression::ident("Kokiri_Sword"),
                Expression::call("has", vec![Expression::ident("Deku_Shield"), Expression::number(1.0)]),
            )
        );
    }

    #[test]
    fn literal_values_stay_untagged() {
        let b: Expression = serde_json::from_str(r#"{"kind":"literal","value":true}"#).unwrap();
        let t: Expression = serde_json::from_str(r#"{"kind":"literal","value":"Forest"}"#).unwrap();
        assert_eq!(b, Expression::boolean(true));
        assert_eq!(t, Expression::text("Forest"));
    }
}
