//! JQ-flavored expression evaluation shared by the V2 parameter resolver.
//!
//! Mirrors the teacher's `expressions.rs`: `${ ... }` wraps a jq filter,
//! bare strings without the wrapper are returned unevaluated. Unlike the
//! teacher, evaluation here never surfaces as a hard error to its caller --
//! the Parameter Resolver (4.B) is referentially transparent and contract-
//! bound to produce `null` at any path it cannot resolve, never a failure.

use jaq_core::{Ctx, Compiler, load::{Arena, File, Loader}};
use serde_json::Value;
use snafu::prelude::*;
use tracing::debug;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("jq load error: {errors}"))]
    JqLoad { errors: String },

    #[snafu(display("jq compile error: {errors}"))]
    JqCompile { errors: String },

    #[snafu(display("jq evaluation error: {message}"))]
    JqEvaluation { message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Evaluate a `${ ... }` wrapped jq expression against `context`. Strings
/// without the wrapper are returned as-is (they are literals, not paths).
pub fn evaluate_expression(expression: &str, context: &Value) -> Result<Value> {
    let expr = expression.trim();
    if !expr.starts_with("${") || !expr.ends_with('}') {
        return Ok(Value::String(expression.to_string()));
    }
    let jq_expr = expr[2..expr.len() - 1].trim();
    evaluate_jq(jq_expr, context)
}

/// Evaluate a bare jq filter (no `${ }` wrapper required) against `context`.
pub fn evaluate_jq(jq_expr: &str, context: &Value) -> Result<Value> {
    debug!("evaluating jq expression: {}", jq_expr);

    let arena = Arena::default();
    let loader = Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let file: File<_, ()> = File {
        path: (),
        code: jq_expr,
    };

    let modules = loader.load(&arena, file).map_err(|errs| Error::JqLoad {
        errors: format!("{errs:?}"),
    })?;

    let compiler = Compiler::default().with_funs(jaq_std::funs().chain(jaq_json::funs()));
    let filter = compiler.compile(modules).map_err(|errs| Error::JqCompile {
        errors: format!("{errs:?}"),
    })?;

    let input: jaq_json::Val = context.clone().into();
    let inputs = jaq_core::RcIter::new(core::iter::empty());
    let mut results: Vec<_> = filter.run((Ctx::new([], &inputs), input)).collect();

    if results.is_empty() {
        return Ok(Value::Null);
    }

    match results.remove(0) {
        Ok(val) => Ok(val.into()),
        Err(e) => Err(Error::JqEvaluation {
            message: format!("{e}"),
        }),
    }
}

/// Recursively evaluate every string leaf of `value` as a jq expression
/// (4.B "nested expressions and JSON-path-like traversal"), never failing --
/// evaluation errors collapse to `Value::Null` at that leaf.
pub fn evaluate_value_null_safe(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(s) => evaluate_expression(s, context).unwrap_or_else(|e| {
            debug!("expression '{}' failed to resolve: {}, substituting null", s, e);
            Value::Null
        }),
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                result.insert(k.clone(), evaluate_value_null_safe(v, context));
            }
            Value::Object(result)
        }
        Value::Array(arr) => Value::Array(
            arr.iter()
                .map(|v| evaluate_value_null_safe(v, context))
                .collect(),
        ),
        other => other.clone(),
    }
}
