//! Structured script diagnostics.
//!
//! Rhai provides rich error types (parse + runtime) with positions. figwatch
//! wraps those into a stable, JSON-serializable diagnostic that the output
//! panel and the publish metadata can show without access to Rust logs.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax/parse errors (compile time).
    ParseError,
    /// Runtime errors in user code.
    RuntimeError,
    /// Script used the host API incorrectly (missing members, wrong types, etc).
    HostApiMisuse,
    /// The script hit a sandbox limit (operations, call depth, sizes).
    LimitExceeded,
    /// Host-side failure (native routine panic, backend error).
    HostError,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    /// Compiling and running the top level of a script file.
    Load,
    /// Invoking a figure routine.
    Render,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based line number in the script.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub phase: ScriptPhase,
    pub message: String,
    pub location: Option<ScriptLocation>,
}

impl ScriptDiagnostic {
    /// A host-side failure with no script position.
    pub fn host_error(phase: ScriptPhase, message: impl Into<String>) -> Self {
        Self {
            kind: ScriptDiagnosticKind::HostError,
            phase,
            message: message.into(),
            location: None,
        }
    }
}

impl fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Rhai messages already carry "(line N, position M)".
        write!(f, "{}", self.message)
    }
}

fn classify_message(message: &str) -> ScriptDiagnosticKind {
    // Rhai error strings are fairly stable; this provides a pragmatic
    // classification without depending on Rhai's internal enum variants.
    let lower = message.to_ascii_lowercase();

    if lower.contains("too many operations")
        || lower.contains("stack overflow")
        || lower.contains("too large")
        || lower.contains("expression exceeds")
    {
        return ScriptDiagnosticKind::LimitExceeded;
    }

    if lower.contains("property not found")
        || lower.contains("variable not found")
        || lower.contains("function not found")
        || lower.contains("index")
        || lower.contains("map key")
        || lower.contains("mismatched types")
        || lower.contains("invalid")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }

    ScriptDiagnosticKind::RuntimeError
}

fn location_of(pos: rhai::Position) -> Option<ScriptLocation> {
    let line = pos.line()? as u32;
    if line == 0 {
        return None;
    }
    let column = pos.position().unwrap_or(0) as u32;
    Some(ScriptLocation {
        line,
        column: column.max(1),
    })
}

pub fn from_parse_error(err: &rhai::ParseError) -> ScriptDiagnostic {
    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::ParseError,
        phase: ScriptPhase::Load,
        message: err.to_string(),
        location: location_of(err.position()),
    }
}

pub fn from_eval_error(phase: ScriptPhase, err: &rhai::EvalAltResult) -> ScriptDiagnostic {
    let message = err.to_string();
    ScriptDiagnostic {
        kind: classify_message(&message),
        phase,
        message,
        location: location_of(err.position()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_location() {
        let engine = rhai::Engine::new();
        let err = engine.compile("let a = 1;\nlet b = ;\n").unwrap_err();

        let diag = from_parse_error(&err);
        assert_eq!(diag.kind, ScriptDiagnosticKind::ParseError);
        assert_eq!(diag.phase, ScriptPhase::Load);
        assert_eq!(diag.location.as_ref().map(|l| l.line), Some(2));
    }

    #[test]
    fn test_runtime_error_classification() {
        let engine = rhai::Engine::new();
        let err = engine.run("let x = 1;\nmissing_fn(x);").unwrap_err();

        let diag = from_eval_error(ScriptPhase::Render, &err);
        assert_eq!(diag.kind, ScriptDiagnosticKind::HostApiMisuse);
        assert_eq!(diag.phase, ScriptPhase::Render);
        assert_eq!(diag.location.as_ref().map(|l| l.line), Some(2));
    }

    #[test]
    fn test_user_throw_is_runtime_error() {
        let engine = rhai::Engine::new();
        let err = engine.run(r#"throw "boom";"#).unwrap_err();

        let diag = from_eval_error(ScriptPhase::Load, &err);
        assert_eq!(diag.kind, ScriptDiagnosticKind::RuntimeError);
        assert!(diag.to_string().contains("boom"));
    }

    #[test]
    fn test_classify_limits() {
        assert_eq!(
            classify_message("Too many operations (line 3, position 1)"),
            ScriptDiagnosticKind::LimitExceeded
        );
    }

    #[test]
    fn test_serializes_snake_case() {
        let diag = ScriptDiagnostic::host_error(ScriptPhase::Render, "backend failed");
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("\"host_error\""));
        assert!(json.contains("\"render\""));
    }
}
