//! Script output for Rhai figure scripts.
//!
//! Scripts write through `print(x)`, `debug(x)` and the `log_info`, `log_warn`
//! and `log_error` functions. Every message goes to the `log` facade and is
//! also captured in a thread-local buffer, which the loader and the executor
//! drain after each load or run so the output panel can show it.

use std::cell::{Cell, RefCell};

use rhai::{Dynamic, Engine};

/// Maximum number of messages kept per load or run.
const MAX_LOGS_PER_RUN: u32 = 100;

// Scripts run on the thread that owns the engine, so per-run state is thread-local.
thread_local! {
    static LOG_COUNT: Cell<u32> = const { Cell::new(0) };
    static WARNED_LIMIT: Cell<bool> = const { Cell::new(false) };
    static CAPTURED: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Log level for script messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Info => "[INFO]",
            LogLevel::Warn => "[WARN]",
            LogLevel::Error => "[ERROR]",
        }
    }
}

/// Reset the per-run counter and drop anything still captured.
/// Call this before a load or a figure run.
pub fn begin_run() {
    LOG_COUNT.with(|c| c.set(0));
    WARNED_LIMIT.with(|w| w.set(false));
    CAPTURED.with(|cell| cell.borrow_mut().clear());
}

/// Take the lines captured since the last [`begin_run`].
pub fn take_script_output() -> Vec<String> {
    CAPTURED.with(|cell| std::mem::take(&mut *cell.borrow_mut()))
}

/// Check if we can log another message this run.
fn can_log() -> bool {
    let count = LOG_COUNT.with(|c| {
        let n = c.get();
        c.set(n.saturating_add(1));
        n
    });
    if count >= MAX_LOGS_PER_RUN {
        if !WARNED_LIMIT.with(|w| w.replace(true)) {
            emit_log(
                LogLevel::Warn,
                &format!(
                    "Script log limit exceeded ({} messages/run). Further logs dropped.",
                    MAX_LOGS_PER_RUN
                ),
            );
        }
        false
    } else {
        true
    }
}

/// Emit a message through the `log` facade and capture it.
pub fn emit_log(level: LogLevel, message: &str) {
    match level {
        LogLevel::Info => log::info!(target: "script", "{}", message),
        LogLevel::Warn => log::warn!(target: "script", "{}", message),
        LogLevel::Error => log::error!(target: "script", "{}", message),
    }
    let line = format!("{} {}", level.prefix(), message);
    CAPTURED.with(|cell| cell.borrow_mut().push(line));
}

/// Log a message from a script, respecting the per-run limit.
pub fn script_log(level: LogLevel, message: &str) {
    if can_log() {
        emit_log(level, message);
    }
}

/// Convert a Rhai Dynamic value to a string safely.
pub fn stringify_dynamic(value: &Dynamic) -> String {
    if let Ok(s) = value.clone().into_string() {
        return s;
    }

    if value.is_array() {
        if let Some(arr) = value.clone().try_cast::<rhai::Array>() {
            let parts: Vec<String> = arr.iter().map(stringify_dynamic).collect();
            return parts.join(" ");
        }
    }

    if value.is_map() {
        if let Some(map) = value.clone().try_cast::<rhai::Map>() {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", k, stringify_dynamic(v)))
                .collect();
            return format!("{{{}}}", parts.join(", "));
        }
    }

    if value.is_int() {
        if let Ok(i) = value.as_int() {
            return i.to_string();
        }
    }

    if value.is_float() {
        if let Ok(f) = value.as_float() {
            return format!("{}", f);
        }
    }

    if value.is_bool() {
        if let Ok(b) = value.as_bool() {
            return b.to_string();
        }
    }

    if value.is_unit() {
        return "()".to_string();
    }

    value.to_string()
}

/// Route `print`/`debug` and register the `log_*` functions on an engine.
pub fn register_script_log(engine: &mut Engine) {
    engine.on_print(|text| script_log(LogLevel::Info, text));
    engine.on_debug(|text, _source, pos| {
        if pos.is_none() {
            script_log(LogLevel::Info, text);
        } else {
            script_log(LogLevel::Info, &format!("{} @ {}", text, pos));
        }
    });

    engine
        .register_fn("log_info", |value: Dynamic| {
            script_log(LogLevel::Info, &stringify_dynamic(&value));
        })
        .register_fn("log_warn", |value: Dynamic| {
            script_log(LogLevel::Warn, &stringify_dynamic(&value));
        })
        .register_fn("log_error", |value: Dynamic| {
            script_log(LogLevel::Error, &stringify_dynamic(&value));
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stringify_string() {
        let value = Dynamic::from("hello");
        assert_eq!(stringify_dynamic(&value), "hello");
    }

    #[test]
    fn test_stringify_int() {
        let value = Dynamic::from(42_i64);
        assert_eq!(stringify_dynamic(&value), "42");
    }

    #[test]
    fn test_stringify_float() {
        let value = Dynamic::from(3.5_f32);
        assert_eq!(stringify_dynamic(&value), "3.5");
    }

    #[test]
    fn test_stringify_array() {
        let mut arr = rhai::Array::new();
        arr.push(Dynamic::from("energy"));
        arr.push(Dynamic::from(0.5_f32));
        let value = Dynamic::from(arr);
        assert_eq!(stringify_dynamic(&value), "energy 0.5");
    }

    #[test]
    fn test_log_level_prefix() {
        assert_eq!(LogLevel::Info.prefix(), "[INFO]");
        assert_eq!(LogLevel::Warn.prefix(), "[WARN]");
        assert_eq!(LogLevel::Error.prefix(), "[ERROR]");
    }

    #[test]
    fn test_capture_and_drain() {
        begin_run();
        script_log(LogLevel::Info, "first");
        script_log(LogLevel::Warn, "second");

        let lines = take_script_output();
        assert_eq!(lines, vec!["[INFO] first".to_string(), "[WARN] second".to_string()]);
        assert!(take_script_output().is_empty());
    }

    #[test]
    fn test_run_log_limit() {
        begin_run();

        for _ in 0..MAX_LOGS_PER_RUN {
            assert!(can_log());
        }
        assert!(!can_log());

        begin_run();
        assert!(can_log());
    }

    #[test]
    fn test_engine_print_is_captured() {
        let mut engine = Engine::new();
        register_script_log(&mut engine);

        begin_run();
        engine.run(r#"print("hello"); log_warn(["x", 1]);"#).unwrap();

        let lines = take_script_output();
        assert_eq!(lines, vec!["[INFO] hello".to_string(), "[WARN] x 1".to_string()]);
    }
}
