//! Compile-time folding and boolean coercion over the block IR.

use crate::ast::BinaryOp;
use crate::ir::{Block, Field, Input};
use std::cmp::Ordering;

/// Parses a literal the way the target casts strings to numbers. Blank and
/// non-finite values are not numbers.
pub fn number(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok().map(|v| v as f64)
    } else {
        trimmed.parse::<f64>().ok()
    };
    parsed.filter(|v| v.is_finite())
}

pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    format!("{}", value)
}

/// Folds a binary operator over two literals. `None` means the operation
/// has to run at runtime.
pub fn fold_binary(op: BinaryOp, left: &str, right: &str) -> Option<String> {
    if op == BinaryOp::Join {
        return Some(format!("{}{}", left, right));
    }
    if let Some(ordering) = comparison(op) {
        return Some(bool_literal(compare(left, right) == ordering));
    }
    let (a, b) = (number(left)?, number(right)?);
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return None,
        BinaryOp::Div => a / b,
        BinaryOp::Mod if b == 0.0 => return None,
        BinaryOp::Mod => a - b * (a / b).floor(),
        _ => return None,
    };
    result.is_finite().then(|| format_number(result))
}

fn comparison(op: BinaryOp) -> Option<Ordering> {
    match op {
        BinaryOp::Eq => Some(Ordering::Equal),
        BinaryOp::Lt => Some(Ordering::Less),
        BinaryOp::Gt => Some(Ordering::Greater),
        _ => None,
    }
}

/// Numeric when both sides are numbers, case-insensitive text otherwise.
pub fn compare(left: &str, right: &str) -> Ordering {
    if let (Some(a), Some(b)) = (number(left), number(right)) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    left.to_lowercase().cmp(&right.to_lowercase())
}

pub fn truthy(value: &str) -> bool {
    !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}

fn bool_literal(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

/// `sqrt` of a literal, when it stays a real number.
pub fn fold_sqrt(value: &str) -> Option<String> {
    let n = number(value)?;
    (n >= 0.0).then(|| format_number(n.sqrt()))
}

/// Negates an input. The flag reports whether the negation was absorbed
/// into the expression instead of wrapping it in `0 - x`.
pub fn negate(input: Input) -> (Input, bool) {
    if let Input::Literal(value) = &input {
        if let Some(n) = number(value) {
            return (Input::literal(format_number(-n)), true);
        }
    }
    let Input::Block(block) = input else {
        return (subtract_from_zero(input), false);
    };
    let mut block = *block;
    match block.opcode.as_str() {
        "operator_subtract" => {
            if let (Some(left), Some(right)) = (block.take_input("NUM1"), block.take_input("NUM2")) {
                block.inputs.insert(0, ("NUM1".to_string(), right));
                block.inputs.insert(1, ("NUM2".to_string(), left));
                return (Input::block(block), true);
            }
            (subtract_from_zero(Input::block(block)), false)
        }
        "operator_multiply" | "operator_divide" => {
            for operand in ["NUM1", "NUM2"] {
                if negate_in_place(&mut block, operand) {
                    return (Input::block(block), true);
                }
            }
            (subtract_from_zero(Input::block(block)), false)
        }
        _ => (subtract_from_zero(Input::block(block)), false),
    }
}

/// Negates one operand when that simplifies. Leaves the block untouched
/// otherwise.
fn negate_in_place(block: &mut Block, operand: &str) -> bool {
    let Some(slot) = block.inputs.iter_mut().find(|(name, _)| name == operand) else {
        return false;
    };
    let (negated, simplified) = negate(slot.1.clone());
    if simplified {
        slot.1 = negated;
    }
    simplified
}

fn subtract_from_zero(input: Input) -> Input {
    Input::block(
        Block::new("operator_subtract")
            .with_input("NUM1", Input::literal("0"))
            .with_input("NUM2", input),
    )
}

/// Turns any input into a boolean block. With `negate`, the result is the
/// logical inverse.
pub fn coerce_condition(input: Input, negate: bool) -> Block {
    let equals_zero = match input {
        Input::Block(block) if block.is_condition() => {
            return if negate { not_block(*block) } else { *block };
        }
        Input::List(name) => Block::condition("operator_equals")
            .with_input("OPERAND1", Input::literal("0"))
            .with_input(
                "OPERAND2",
                Input::block(Block::new("data_lengthoflist").with_field("LIST", Field::List(name))),
            ),
        Input::Literal(value) => {
            let value = match value.as_str() {
                "true" => "1".to_string(),
                "false" => "0".to_string(),
                _ => value,
            };
            Block::condition("operator_equals")
                .with_input("OPERAND1", Input::literal("0"))
                .with_input("OPERAND2", Input::literal(value))
        }
        other => Block::condition("operator_equals")
            .with_input("OPERAND1", Input::literal("0"))
            .with_input("OPERAND2", other),
    };
    if negate {
        equals_zero
    } else {
        not_block(equals_zero)
    }
}

pub fn not_block(operand: Block) -> Block {
    Block::condition("operator_not").with_input("OPERAND", Input::block(operand))
}

fn is_not(block: &Block) -> bool {
    block.opcode == "operator_not"
}

fn into_operand(mut block: Block) -> Block {
    match block.take_input("OPERAND") {
        Some(Input::Block(inner)) => *inner,
        Some(other) => coerce_condition(other, false),
        None => block,
    }
}

/// `not(a) and not(b)` becomes `not(a or b)`, and dually for `or`.
pub fn logical(op: BinaryOp, left: Input, right: Input) -> Block {
    let left = coerce_condition(left, false);
    let right = coerce_condition(right, false);
    let (opcode, dual) = if op == BinaryOp::And {
        ("operator_and", "operator_or")
    } else {
        ("operator_or", "operator_and")
    };
    if is_not(&left) && is_not(&right) {
        let inner = Block::condition(dual)
            .with_input("OPERAND1", Input::block(into_operand(left)))
            .with_input("OPERAND2", Input::block(into_operand(right)));
        return not_block(inner);
    }
    Block::condition(opcode)
        .with_input("OPERAND1", Input::block(left))
        .with_input("OPERAND2", Input::block(right))
}

/// Logical not. Literals fold, and an existing negation is unwrapped.
pub fn not(input: Input) -> Input {
    if let Input::Literal(value) = &input {
        return Input::literal(bool_literal(!truthy(value)));
    }
    let operand = coerce_condition(input, false);
    if is_not(&operand) {
        return Input::block(into_operand(operand));
    }
    Input::block(not_block(operand))
}
