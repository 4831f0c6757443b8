//! Deterministic goal-gate evaluation.
//!
//! Gates accept or reject upstream results against declared criteria. The
//! evaluator is a pure function over the aggregated upstream artifact map —
//! reproducible and auditable, never model-judged. A criterion whose field
//! is missing counts as failed, so gates fail closed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Criterion / CompareOp
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Contains => "contains",
        };
        f.write_str(s)
    }
}

/// One acceptance criterion: a field path into the aggregated upstream
/// outputs, a comparison operator, and the expected value.
///
/// `field` is a dot path: a bare artifact key (`tests_passed`) or a key
/// followed by segments walking into a nested object (`metrics.coverage`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Criterion {
    pub field: String,
    pub op: CompareOp,
    pub expected: Value,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub field: String,
    pub passed: bool,
    /// The value found at `field`, if any. `None` means the field was
    /// missing — recorded as a failed criterion, not an error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<Value>,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEvaluation {
    pub passed: bool,
    pub criteria: Vec<CriterionResult>,
}

impl GateEvaluation {
    pub fn failed_criteria(&self) -> impl Iterator<Item = &CriterionResult> {
        self.criteria.iter().filter(|c| !c.passed)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate all criteria against the aggregated upstream outputs.
/// Passes only if every criterion passes; an empty criteria list passes.
pub fn evaluate(criteria: &[Criterion], outputs: &BTreeMap<String, Value>) -> GateEvaluation {
    let results: Vec<CriterionResult> = criteria
        .iter()
        .map(|c| evaluate_one(c, outputs))
        .collect();
    GateEvaluation {
        passed: results.iter().all(|r| r.passed),
        criteria: results,
    }
}

fn evaluate_one(criterion: &Criterion, outputs: &BTreeMap<String, Value>) -> CriterionResult {
    let Some(actual) = lookup(outputs, &criterion.field) else {
        return CriterionResult {
            field: criterion.field.clone(),
            passed: false,
            actual: None,
            detail: format!("field '{}' missing from outputs", criterion.field),
        };
    };

    let passed = compare(criterion.op, &actual, &criterion.expected);
    let detail = format!(
        "{} {} {} -> {}",
        render(&actual),
        criterion.op,
        render(&criterion.expected),
        if passed { "pass" } else { "fail" }
    );
    CriterionResult {
        field: criterion.field.clone(),
        passed,
        actual: Some(actual),
        detail,
    }
}

/// Resolve a dot path against the output map. A whole-path key match wins;
/// otherwise the first segment selects an artifact and the remaining
/// segments walk nested objects.
fn lookup(outputs: &BTreeMap<String, Value>, path: &str) -> Option<Value> {
    if let Some(v) = outputs.get(path) {
        return Some(v.clone());
    }
    let mut segments = path.split('.');
    let mut current = outputs.get(segments.next()?)?.clone();
    for seg in segments {
        current = current.get(seg)?.clone();
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// Type-aware scalar comparison
// ---------------------------------------------------------------------------

/// Compare two scalars: numeric when both sides are numbers (or numeric
/// strings), boolean when both are booleans (or "true"/"false"), otherwise
/// normalized (trimmed) string comparison. `Contains` is substring over
/// normalized strings.
fn compare(op: CompareOp, actual: &Value, expected: &Value) -> bool {
    if op == CompareOp::Contains {
        return render(actual).contains(&render(expected));
    }

    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Contains => unreachable!(),
        };
    }

    if let (Some(a), Some(b)) = (as_bool(actual), as_bool(expected)) {
        return match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            // Ordering operators are meaningless for booleans.
            _ => false,
        };
    }

    let a = render(actual);
    let b = render(expected);
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Contains => unreachable!(),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn as_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Normalized string form of a scalar for comparison and diagnostics.
fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
