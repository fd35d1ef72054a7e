//! Arithmetic calculator tool.
//!
//! Evaluates infix expressions with a small recursive-descent parser; no
//! `eval`, no external process. Low risk, no side effects, deterministic.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tools::traits::{RiskLevel, Tool, ToolContext, ToolError, ToolSpec};

pub const CALCULATOR_TOOL_ID: &str = "calculator";

pub struct CalculatorTool {
    spec: ToolSpec,
}

impl CalculatorTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec {
                id: CALCULATOR_TOOL_ID.to_owned(),
                name: "Calculator".to_owned(),
                description: "Evaluate an arithmetic expression. Supports + - * / % ^, \
                              parentheses and decimal numbers."
                    .to_owned(),
                category: "utility".to_owned(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "expression": {
                            "type": "string",
                            "description": "The expression to evaluate, e.g. \"15+27\".",
                            "minLength": 1
                        }
                    },
                    "required": ["expression"]
                }),
                output_schema: Some(json!({
                    "type": "object",
                    "properties": { "value": { "type": "number" } }
                })),
                risk_level: RiskLevel::Low,
                requires_approval: false,
                side_effects: false,
                supports_dry_run: true,
            },
        }
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let expression = input["expression"].as_str().unwrap_or("");
        let value = evaluate(expression)
            .map_err(|e| ToolError::execution(CALCULATOR_TOOL_ID, e))?;
        Ok(json!({ "value": number_value(value) }))
    }

    async fn dry_run(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let expression = input["expression"].as_str().unwrap_or("");
        // Evaluation is side-effect-free, so a dry run just checks the
        // expression parses and reports what would be computed.
        evaluate(expression).map_err(|e| ToolError::execution(CALCULATOR_TOOL_ID, e))?;
        Ok(json!({ "wouldEvaluate": expression }))
    }
}

/// Integers come back as JSON integers so `15+27` yields `42`, not `42.0`.
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

// ─── Expression parser ────────────────────────────────────────────────────────

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

pub fn evaluate(expression: &str) -> Result<f64, String> {
    let mut parser = Parser {
        input: expression.as_bytes(),
        pos: 0,
    };
    let value = parser.expression()?;
    parser.skip_ws();
    if parser.pos != parser.input.len() {
        return Err(format!(
            "unexpected character '{}' at position {}",
            parser.input[parser.pos] as char, parser.pos
        ));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_owned());
    }
    Ok(value)
}

impl Parser<'_> {
    fn skip_ws(&mut self) {
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.input.get(self.pos).copied()
    }

    fn expression(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                b'+' => {
                    self.pos += 1;
                    value += self.term()?;
                }
                b'-' => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.power()?;
        while let Some(op) = self.peek() {
            match op {
                b'*' => {
                    self.pos += 1;
                    value *= self.power()?;
                }
                b'/' => {
                    self.pos += 1;
                    let divisor = self.power()?;
                    if divisor == 0.0 {
                        return Err("division by zero".to_owned());
                    }
                    value /= divisor;
                }
                b'%' => {
                    self.pos += 1;
                    let divisor = self.power()?;
                    if divisor == 0.0 {
                        return Err("modulo by zero".to_owned());
                    }
                    value %= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    // Right-associative exponentiation.
    fn power(&mut self) -> Result<f64, String> {
        let base = self.unary()?;
        if self.peek() == Some(b'^') {
            self.pos += 1;
            let exponent = self.power()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64, String> {
        if self.peek() == Some(b'-') {
            self.pos += 1;
            return Ok(-self.unary()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.expression()?;
                if self.peek() != Some(b')') {
                    return Err("missing closing parenthesis".to_owned());
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) => Err(format!(
                "unexpected character '{}' at position {}",
                c as char, self.pos
            )),
            None => Err("unexpected end of expression".to_owned()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while self.pos < self.input.len()
            && (self.input[self.pos].is_ascii_digit() || self.input[self.pos] == b'.')
        {
            self.pos += 1;
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| format!("invalid number at position {start}"))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::traits::ToolPermissions;

    fn ctx() -> ToolContext {
        ToolContext::new("p1", "s1", ToolPermissions::allowing(["calculator"]))
    }

    #[test]
    fn arithmetic_with_precedence() {
        assert_eq!(evaluate("15+27").unwrap(), 42.0);
        assert_eq!(evaluate("2+3*4").unwrap(), 14.0);
        assert_eq!(evaluate("(2+3)*4").unwrap(), 20.0);
        assert_eq!(evaluate("10/4").unwrap(), 2.5);
        assert_eq!(evaluate("10 % 3").unwrap(), 1.0);
        assert_eq!(evaluate("2^10").unwrap(), 1024.0);
        assert_eq!(evaluate("2^3^2").unwrap(), 512.0);
        assert_eq!(evaluate("-5 + 3").unwrap(), -2.0);
        assert_eq!(evaluate("--4").unwrap(), 4.0);
    }

    #[test]
    fn errors_are_descriptive() {
        assert!(evaluate("1/0").unwrap_err().contains("division by zero"));
        assert!(evaluate("(1+2").unwrap_err().contains("parenthesis"));
        assert!(evaluate("2 + x").unwrap_err().contains("unexpected character"));
        assert!(evaluate("").unwrap_err().contains("end of expression"));
        assert!(evaluate("1 2").unwrap_err().contains("unexpected"));
    }

    #[tokio::test]
    async fn integer_results_are_json_integers() {
        let tool = CalculatorTool::new();
        let out = tool
            .execute(json!({"expression": "15+27"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out, json!({"value": 42}));
    }

    #[tokio::test]
    async fn fractional_results_stay_floats() {
        let tool = CalculatorTool::new();
        let out = tool
            .execute(json!({"expression": "10/4"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["value"], 2.5);
    }

    #[tokio::test]
    async fn dry_run_validates_without_result() {
        let tool = CalculatorTool::new();
        let out = tool
            .dry_run(json!({"expression": "1+1"}), &ctx())
            .await
            .unwrap();
        assert_eq!(out["wouldEvaluate"], "1+1");

        let err = tool.dry_run(json!({"expression": "1+"}), &ctx()).await;
        assert!(err.is_err());
    }
}
