//! Lua 5.4 environment for model-generated code.
//!
//! Builds the globals the code executor exposes: the safe standard
//! libraries plus a small set of host tables. `print` is redirected into a
//! per-VM buffer so the executor can return what the code printed.
//!
//! # Host APIs
//!
//! | Module | Functions |
//! |--------|-----------|
//! | `os` | `time`, `clock`, `date`, `difftime`, `getenv` (restricted) |
//! | `time` | `now`, `iso` |
//! | `json` | `parse`, `encode` |
//! | `base64` | `encode`, `decode` |
//! | `crypto` | `sha256`, `hmac_sha256` |
//! | `log` | `info`, `warn`, `error`, `debug` |
//!
//! # Sandboxing
//!
//! `io`, `debug`, `loadfile`, `dofile`, `require` and `package` are removed,
//! and `os` is replaced by a table holding only clock and environment
//! readers. This limits what code can reach; it is not a security boundary.
//!
//! `pcall`, `xpcall` and `coroutine.resume` are wrapped so that a run past
//! its [`Deadline`] cannot catch the timeout error and keep going.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use mlua::prelude::*;
use sha2::{Digest, Sha256};

/// Functions kept from the standard `os` library.
const OS_ALLOWED: &[&str] = &["time", "clock", "date", "difftime", "getenv"];

/// Text written by `print` since the last [`take_output`].
#[derive(Default)]
struct OutputBuffer(String);

/// Wall-clock limit for the run in progress.
#[derive(Debug, Clone)]
pub(crate) struct Deadline {
    at: Instant,
    expired: Arc<AtomicBool>,
}

impl Deadline {
    /// `None` when `timeout` is too large to represent as an instant.
    pub(crate) fn after(timeout: Duration) -> Option<Self> {
        Some(Self {
            at: Instant::now().checked_add(timeout)?,
            expired: Arc::new(AtomicBool::new(false)),
        })
    }

    /// True once a check has found the deadline passed.
    pub(crate) fn expired(&self) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    fn check(&self) -> LuaResult<()> {
        if self.expired() || Instant::now() > self.at {
            self.expired.store(true, Ordering::SeqCst);
            return Err(LuaError::RuntimeError(
                "execution deadline exceeded".to_string(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Public helpers
// ═══════════════════════════════════════════════════════════════════════

/// Sandbox the globals and register every host module on `lua`.
pub(crate) fn register_all_host_apis(lua: &Lua) -> LuaResult<()> {
    sandbox_globals(lua)?;
    register_print_capture(lua)?;
    register_time_api(lua)?;
    register_json_api(lua)?;
    register_base64_api(lua)?;
    register_crypto_api(lua)?;
    register_log_api(lua)?;
    Ok(())
}

/// Drain everything printed so far.
pub(crate) fn take_output(lua: &Lua) -> String {
    lua.app_data_mut::<OutputBuffer>()
        .map(|mut buf| std::mem::take(&mut buf.0))
        .unwrap_or_default()
}

/// Make `deadline` the limit checked by [`check_deadline`].
pub(crate) fn arm_deadline(lua: &Lua, deadline: Deadline) {
    lua.set_app_data(deadline);
}

pub(crate) fn disarm_deadline(lua: &Lua) {
    lua.remove_app_data::<Deadline>();
}

/// Fail if the armed deadline has passed. A no-op when none is armed.
pub(crate) fn check_deadline(lua: &Lua) -> LuaResult<()> {
    match lua.app_data_ref::<Deadline>() {
        Some(deadline) => deadline.check(),
        None => Ok(()),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Sandboxing
// ═══════════════════════════════════════════════════════════════════════

/// Remove dangerous standard library functions and restrict `os`.
pub(crate) fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();

    let restricted_os = lua.create_table()?;
    if let Ok(os) = globals.get::<LuaTable>("os") {
        for name in OS_ALLOWED {
            restricted_os.set(*name, os.get::<LuaValue>(*name)?)?;
        }
    }
    globals.set("os", restricted_os)?;

    globals.set("io", LuaValue::Nil)?;
    globals.set("loadfile", LuaValue::Nil)?;
    globals.set("dofile", LuaValue::Nil)?;
    globals.set("debug", LuaValue::Nil)?;
    globals.set("require", LuaValue::Nil)?;
    globals.set("package", LuaValue::Nil)?;

    guard_protected_calls(lua)?;
    Ok(())
}

/// Re-raise the deadline error after any call that would otherwise catch it.
fn guard_protected_calls(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for name in ["pcall", "xpcall"] {
        let original: LuaFunction = globals.get(name)?;
        globals.set(name, deadline_guarded(lua, original)?)?;
    }

    let coroutine: LuaTable = globals.get("coroutine")?;
    let resume: LuaFunction = coroutine.get("resume")?;
    coroutine.set("resume", deadline_guarded(lua, resume)?)?;
    Ok(())
}

fn deadline_guarded(lua: &Lua, original: LuaFunction) -> LuaResult<LuaFunction> {
    lua.create_function(move |lua, args: LuaMultiValue| {
        let results: LuaMultiValue = original.call(args)?;
        check_deadline(lua)?;
        Ok(results)
    })
}

// ═══════════════════════════════════════════════════════════════════════
// print
// ═══════════════════════════════════════════════════════════════════════

fn register_print_capture(lua: &Lua) -> LuaResult<()> {
    lua.set_app_data(OutputBuffer::default());

    let print = lua.create_function(|lua, args: LuaMultiValue| {
        let tostring: LuaFunction = lua.globals().get("tostring")?;
        let mut line = String::new();
        for (i, value) in args.iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            line.push_str(&tostring.call::<String>(value.clone())?);
        }
        line.push('\n');
        if let Some(mut buf) = lua.app_data_mut::<OutputBuffer>() {
            buf.0.push_str(&line);
        }
        Ok(())
    })?;

    lua.globals().set("print", print)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: time
// ═══════════════════════════════════════════════════════════════════════

fn register_time_api(lua: &Lua) -> LuaResult<()> {
    let time = lua.create_table()?;

    // time.now() → fractional seconds since the epoch
    time.set(
        "now",
        lua.create_function(|_lua, ()| {
            Ok(chrono::Utc::now().timestamp_millis() as f64 / 1000.0)
        })?,
    )?;

    // time.iso() → RFC 3339 timestamp in UTC
    time.set(
        "iso",
        lua.create_function(|_lua, ()| Ok(chrono::Utc::now().to_rfc3339()))?,
    )?;

    lua.globals().set("time", time)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: json
// ═══════════════════════════════════════════════════════════════════════

fn register_json_api(lua: &Lua) -> LuaResult<()> {
    let json_table = lua.create_table()?;

    json_table.set(
        "parse",
        lua.create_function(|lua, s: String| {
            let value: serde_json::Value = serde_json::from_str(&s)
                .map_err(|e| mlua::Error::external(anyhow::anyhow!("json.parse: {}", e)))?;
            json_value_to_lua(lua, &value)
        })?,
    )?;

    json_table.set(
        "encode",
        lua.create_function(|_lua, value: LuaValue| {
            let json = lua_value_to_json(value)?;
            serde_json::to_string(&json)
                .map_err(|e| mlua::Error::external(anyhow::anyhow!("json.encode: {}", e)))
        })?,
    )?;

    lua.globals().set("json", json_table)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: base64
// ═══════════════════════════════════════════════════════════════════════

fn register_base64_api(lua: &Lua) -> LuaResult<()> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    let b64 = lua.create_table()?;

    b64.set(
        "encode",
        lua.create_function(|_lua, data: LuaString| Ok(STANDARD.encode(data.as_bytes())))?,
    )?;

    b64.set(
        "decode",
        lua.create_function(|lua, data: String| {
            let bytes = STANDARD
                .decode(data.as_bytes())
                .map_err(|e| mlua::Error::external(anyhow::anyhow!("base64.decode: {}", e)))?;
            lua.create_string(&bytes)
        })?,
    )?;

    lua.globals().set("base64", b64)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: crypto
// ═══════════════════════════════════════════════════════════════════════

fn register_crypto_api(lua: &Lua) -> LuaResult<()> {
    let crypto = lua.create_table()?;

    crypto.set(
        "sha256",
        lua.create_function(|_lua, data: LuaString| {
            let mut hasher = Sha256::new();
            hasher.update(data.as_bytes());
            Ok(format!("{:x}", hasher.finalize()))
        })?,
    )?;

    crypto.set(
        "hmac_sha256",
        lua.create_function(|_lua, (key, data): (LuaString, LuaString)| {
            type HmacSha256 = Hmac<Sha256>;
            let mut mac = HmacSha256::new_from_slice(&key.as_bytes())
                .map_err(|e| mlua::Error::external(anyhow::anyhow!("crypto.hmac_sha256: {}", e)))?;
            mac.update(&data.as_bytes());
            Ok(hex::encode(mac.finalize().into_bytes()))
        })?,
    )?;

    lua.globals().set("crypto", crypto)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Host API: log
// ═══════════════════════════════════════════════════════════════════════

fn register_log_api(lua: &Lua) -> LuaResult<()> {
    let log = lua.create_table()?;

    log.set(
        "info",
        lua.create_function(|_lua, msg: String| {
            tracing::info!(target: "rag_agent::lua", "{}", msg);
            Ok(())
        })?,
    )?;
    log.set(
        "warn",
        lua.create_function(|_lua, msg: String| {
            tracing::warn!(target: "rag_agent::lua", "{}", msg);
            Ok(())
        })?,
    )?;
    log.set(
        "error",
        lua.create_function(|_lua, msg: String| {
            tracing::error!(target: "rag_agent::lua", "{}", msg);
            Ok(())
        })?,
    )?;
    log.set(
        "debug",
        lua.create_function(|_lua, msg: String| {
            tracing::debug!(target: "rag_agent::lua", "{}", msg);
            Ok(())
        })?,
    )?;

    lua.globals().set("log", log)?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Value Conversions: JSON ↔ Lua
// ═══════════════════════════════════════════════════════════════════════

/// Convert a JSON value to a Lua value.
pub(crate) fn json_value_to_lua(lua: &Lua, value: &serde_json::Value) -> LuaResult<LuaValue> {
    match value {
        serde_json::Value::Null => Ok(LuaValue::Nil),
        serde_json::Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(LuaValue::Integer(i))
            } else {
                Ok(LuaValue::Number(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => lua.create_string(s).map(LuaValue::String),
        serde_json::Value::Array(arr) => {
            let table = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                table.set(i as i64 + 1, json_value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
        serde_json::Value::Object(map) => {
            let table = lua.create_table()?;
            for (k, v) in map {
                table.set(k.as_str(), json_value_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(table))
        }
    }
}

/// Convert a Lua value to a JSON value.
///
/// Tables with a non-empty array part become arrays; all others become
/// objects keyed by their string keys.
pub(crate) fn lua_value_to_json(value: LuaValue) -> LuaResult<serde_json::Value> {
    match value {
        LuaValue::Nil => Ok(serde_json::Value::Null),
        LuaValue::Boolean(b) => Ok(serde_json::Value::Bool(b)),
        LuaValue::Integer(i) => Ok(serde_json::Value::Number(i.into())),
        LuaValue::Number(n) => Ok(serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)),
        LuaValue::String(s) => Ok(serde_json::Value::String(s.to_str()?.to_string())),
        LuaValue::Table(t) => {
            let len = t.raw_len();
            if len > 0 {
                let mut arr = Vec::with_capacity(len);
                for i in 1..=len {
                    let v: LuaValue = t.raw_get(i)?;
                    arr.push(lua_value_to_json(v)?);
                }
                Ok(serde_json::Value::Array(arr))
            } else {
                let mut map = serde_json::Map::new();
                for pair in t.pairs::<String, LuaValue>() {
                    let (k, v) = pair?;
                    map.insert(k, lua_value_to_json(v)?);
                }
                Ok(serde_json::Value::Object(map))
            }
        }
        _ => Ok(serde_json::Value::Null),
    }
}
