//! Calculator tool — evaluates arithmetic expressions.
//!
//! Supports `+`, `-`, `*`, `/`, parentheses, decimals, and unary
//! negation. Recursive-descent over a peekable char stream; no
//! dependencies beyond std.

use async_trait::async_trait;
use crank_core::error::ToolError;
use crank_core::tool::Tool;
use std::iter::Peekable;
use std::str::Chars;

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports +, -, *, /, parentheses, \
         and decimal numbers, e.g. '(13 + 29 + 7) * 6'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let expr = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' argument".into()))?;

        let value = evaluate(expr).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "calculator".into(),
            reason: e,
        })?;

        // Integers print without a trailing .0
        if value.fract() == 0.0 && value.abs() < 1e15 {
            Ok(format!("{}", value as i64))
        } else {
            Ok(format!("{value}"))
        }
    }
}

/// Evaluate an arithmetic expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let mut chars = expr.chars().peekable();
    let value = parse_sum(&mut chars)?;
    skip_spaces(&mut chars);
    match chars.peek() {
        None => Ok(value),
        Some(c) => Err(format!("Unexpected character '{c}'")),
    }
}

fn skip_spaces(chars: &mut Peekable<Chars>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn parse_sum(chars: &mut Peekable<Chars>) -> Result<f64, String> {
    let mut value = parse_product(chars)?;
    loop {
        skip_spaces(chars);
        match chars.peek() {
            Some('+') => {
                chars.next();
                value += parse_product(chars)?;
            }
            Some('-') => {
                chars.next();
                value -= parse_product(chars)?;
            }
            _ => return Ok(value),
        }
    }
}

fn parse_product(chars: &mut Peekable<Chars>) -> Result<f64, String> {
    let mut value = parse_atom(chars)?;
    loop {
        skip_spaces(chars);
        match chars.peek() {
            Some('*') => {
                chars.next();
                value *= parse_atom(chars)?;
            }
            Some('/') => {
                chars.next();
                let divisor = parse_atom(chars)?;
                if divisor == 0.0 {
                    return Err("Division by zero".into());
                }
                value /= divisor;
            }
            _ => return Ok(value),
        }
    }
}

fn parse_atom(chars: &mut Peekable<Chars>) -> Result<f64, String> {
    skip_spaces(chars);
    match chars.peek() {
        Some('-') => {
            chars.next();
            Ok(-parse_atom(chars)?)
        }
        Some('(') => {
            chars.next();
            let value = parse_sum(chars)?;
            skip_spaces(chars);
            match chars.next() {
                Some(')') => Ok(value),
                _ => Err("Missing closing parenthesis".into()),
            }
        }
        Some(c) if c.is_ascii_digit() || *c == '.' => {
            let mut number = String::new();
            while chars
                .peek()
                .is_some_and(|c| c.is_ascii_digit() || *c == '.')
            {
                number.push(chars.next().expect("peeked"));
            }
            number
                .parse::<f64>()
                .map_err(|_| format!("Invalid number '{number}'"))
        }
        Some(c) => Err(format!("Unexpected character '{c}'")),
        None => Err("Unexpected end of expression".into()),
    }
}
