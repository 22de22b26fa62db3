//! Disk cache for expensive script computations.
//!
//! `cached(path, force_reload, || expr)` returns the value stored at `path`
//! as JSON. The closure runs, and its result is written to `path`, when the
//! file does not exist, cannot be read back, or `force_reload` is true.
//! `cached(path, || expr)` never forces. Relative paths are resolved against
//! the working directory.
//!
//! Cached values must be representable as JSON: `()`, booleans, numbers,
//! strings, arrays and object maps.

use std::io::ErrorKind;
use std::path::Path;

use anyhow::Context;
use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, ImmutableString, NativeCallContext};
use thiserror::Error;

use crate::script_log::{script_log, LogLevel};

type ApiResult<T> = Result<T, Box<EvalAltResult>>;

#[derive(Debug, Error)]
pub enum CacheReadError {
    #[error("no cached result")]
    Missing,
    #[error("cached result unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("cached result is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

pub fn read_cached(path: &Path) -> Result<Dynamic, CacheReadError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(CacheReadError::Missing),
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&text)?)
}

pub fn write_cached(path: &Path, value: &Dynamic) -> anyhow::Result<()> {
    let json = serde_json::to_string(value).context("value cannot be stored as JSON")?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

/// Return the value cached at `path`, or run `produce` and cache its result.
pub fn load_or_produce(
    path: &Path,
    force_reload: bool,
    produce: impl FnOnce() -> ApiResult<Dynamic>,
) -> ApiResult<Dynamic> {
    if force_reload {
        script_log(
            LogLevel::Info,
            &format!("[cache] force_reload=true; regen {}", path.display()),
        );
    } else {
        match read_cached(path) {
            Ok(value) => {
                script_log(
                    LogLevel::Info,
                    &format!("[cache] loading result from {}", path.display()),
                );
                return Ok(value);
            }
            Err(CacheReadError::Missing) => script_log(
                LogLevel::Info,
                &format!("[cache] no result cached; create {}", path.display()),
            ),
            Err(e) => script_log(LogLevel::Warn, &format!("[cache] {}; regen {}", e, path.display())),
        }
    }

    let value = produce()?;
    write_cached(path, &value).map_err(|e| format!("cached({}): {:#}", path.display(), e))?;
    Ok(value)
}

/// Register `cached` with a Rhai engine.
pub fn register_result_cache(engine: &mut Engine) {
    engine.register_fn(
        "cached",
        |context: NativeCallContext, path: ImmutableString, force_reload: bool, producer: FnPtr| -> ApiResult<Dynamic> {
            load_or_produce(Path::new(path.as_str()), force_reload, || {
                producer.call_within_context(&context, ())
            })
        },
    );
    engine.register_fn(
        "cached",
        |context: NativeCallContext, path: ImmutableString, producer: FnPtr| -> ApiResult<Dynamic> {
            load_or_produce(Path::new(path.as_str()), false, || {
                producer.call_within_context(&context, ())
            })
        },
    );
}
