//! Code executor for model-generated Lua.
//!
//! [`CodeExecutor::run`] always returns text: printed output on success,
//! a fixed sentinel when nothing was printed, or a message starting with
//! [`ERROR_MARKER`] on failure. The agent loop feeds that text straight
//! back to the model, so errors are data here, not control flow.
//!
//! [`LuaExecutor`] keeps one interpreter for the life of the process.
//! Globals assigned by one run are visible to the next, which lets the
//! model build up state across iterations and across questions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mlua::Lua;
use tracing::{debug, warn};

use crate::lua_runtime::{
    arm_deadline, check_deadline, disarm_deadline, register_all_host_apis, take_output, Deadline,
};

/// Prefix of every failure message returned by [`CodeExecutor::run`].
pub const ERROR_MARKER: &str = "[execution error]";

/// Returned when code succeeds without printing anything.
pub const NO_OUTPUT: &str = "Code ran successfully but produced no output.";

/// Instructions between deadline checks.
const HOOK_INTERVAL: u32 = 1_000;

#[derive(Debug)]
pub enum ExecError {
    /// The code failed to compile or raised an error.
    Fault(String),
    /// The code was stopped at its deadline.
    Timeout(Duration),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Fault(msg) => write!(f, "{} {}", ERROR_MARKER, msg),
            ExecError::Timeout(limit) => {
                write!(f, "{} timed out after {}s", ERROR_MARKER, limit.as_secs_f64())
            }
        }
    }
}

impl std::error::Error for ExecError {}

#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Language tag of the fenced blocks this executor accepts.
    fn language(&self) -> &str;

    /// Run `code` and describe the outcome as text.
    async fn run(&self, code: &str) -> String;
}

pub struct LuaExecutor {
    lua: Arc<Mutex<Lua>>,
    timeout: Duration,
}

impl LuaExecutor {
    pub fn new(timeout: Duration) -> Result<Self, ExecError> {
        let lua = Lua::new();
        register_all_host_apis(&lua)
            .map_err(|e| ExecError::Fault(format!("failed to initialise Lua: {}", e)))?;
        Ok(Self {
            lua: Arc::new(Mutex::new(lua)),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `code` on the calling thread and return what it printed.
    ///
    /// Blocks until the code finishes or hits the deadline.
    pub fn execute(&self, code: &str) -> Result<String, ExecError> {
        let lua = self.lua.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        execute_with_deadline(&lua, code, self.timeout)
    }
}

fn execute_with_deadline(lua: &Lua, code: &str, timeout: Duration) -> Result<String, ExecError> {
    let deadline = Deadline::after(timeout);
    if let Some(deadline) = &deadline {
        arm_deadline(lua, deadline.clone());
    }
    lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
        |lua, _debug| {
            check_deadline(lua)?;
            Ok(mlua::VmState::Continue)
        },
    );

    // Output left behind by an earlier run that errored.
    take_output(lua);

    let result = lua.load(code).set_name("agent").exec();
    lua.remove_hook();
    disarm_deadline(lua);
    let output = take_output(lua);

    match result {
        Ok(()) => Ok(output),
        Err(_) if deadline.as_ref().is_some_and(Deadline::expired) => {
            Err(ExecError::Timeout(timeout))
        }
        Err(e) => Err(ExecError::Fault(e.to_string())),
    }
}

/// Map an execution outcome to the text returned to the agent loop.
fn render_outcome(outcome: Result<String, ExecError>) -> String {
    match outcome {
        Ok(output) => {
            let trimmed = output.trim();
            if trimmed.is_empty() {
                NO_OUTPUT.to_string()
            } else {
                trimmed.to_string()
            }
        }
        Err(e) => e.to_string(),
    }
}

#[async_trait]
impl CodeExecutor for LuaExecutor {
    fn language(&self) -> &str {
        "lua"
    }

    async fn run(&self, code: &str) -> String {
        let lua = Arc::clone(&self.lua);
        let timeout = self.timeout;
        let code = code.to_string();

        let joined = tokio::task::spawn_blocking(move || {
            let lua = lua.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            execute_with_deadline(&lua, &code, timeout)
        })
        .await;

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(ExecError::Fault(format!("executor task failed: {}", e))),
        };

        match &outcome {
            Ok(_) => debug!("code executed"),
            Err(e) => warn!(error = %e, "code execution failed"),
        }
        render_outcome(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> LuaExecutor {
        LuaExecutor::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn prints_arithmetic() {
        assert_eq!(executor().run("print(1+1)").await, "2");
    }

    #[tokio::test]
    async fn output_is_trimmed() {
        let out = executor().run("print('  a  ')\nprint('b')").await;
        assert_eq!(out, "a  \nb");
    }

    #[tokio::test]
    async fn no_output_returns_sentinel() {
        assert_eq!(executor().run("local x = 1").await, NO_OUTPUT);
    }

    #[tokio::test]
    async fn undefined_function_returns_error_text() {
        let out = executor().run("foo()").await;
        assert!(out.starts_with(ERROR_MARKER), "got {}", out);
    }

    #[tokio::test]
    async fn syntax_error_returns_error_text() {
        let out = executor().run("print(").await;
        assert!(out.starts_with(ERROR_MARKER), "got {}", out);
    }

    #[tokio::test]
    async fn globals_persist_between_runs() {
        let exec = executor();
        assert_eq!(exec.run("x = 41").await, NO_OUTPUT);
        assert_eq!(exec.run("print(x + 1)").await, "42");
    }

    #[tokio::test]
    async fn state_survives_failed_run() {
        let exec = executor();
        exec.run("counter = 1").await;
        let failed = exec.run("counter = counter + 1; error('boom')").await;
        assert!(failed.contains("boom"));
        assert_eq!(exec.run("print(counter)").await, "2");
    }

    #[tokio::test]
    async fn output_before_error_is_not_leaked_into_next_run() {
        let exec = executor();
        exec.run("print('partial'); error('x')").await;
        assert_eq!(exec.run("print('clean')").await, "clean");
    }

    #[tokio::test]
    async fn infinite_loop_times_out() {
        let exec = LuaExecutor::new(Duration::from_millis(200)).unwrap();
        let out = exec.run("while true do end").await;
        assert!(out.starts_with(ERROR_MARKER), "got {}", out);
        assert!(out.contains("timed out"), "got {}", out);

        // The interpreter is still usable afterwards.
        assert_eq!(exec.run("print('alive')").await, "alive");
    }

    #[tokio::test]
    async fn caught_timeout_still_stops_the_run() {
        let exec = LuaExecutor::new(Duration::from_millis(200)).unwrap();
        let loops = [
            "while true do pcall(function() while true do end end) end",
            "while true do xpcall(function() while true do end end, function(e) return e end) end",
            "while true do coroutine.resume(coroutine.create(function() while true do end end)) end",
        ];
        for code in loops {
            let out = tokio::time::timeout(Duration::from_secs(5), exec.run(code))
                .await
                .unwrap_or_else(|_| panic!("run did not stop: {}", code));
            assert!(out.contains("timed out"), "{} gave {}", code, out);
        }

        let next = tokio::time::timeout(Duration::from_secs(2), exec.run("print('alive')")).await;
        assert_eq!(next.unwrap(), "alive");
    }

    #[tokio::test]
    async fn filesystem_and_process_access_removed() {
        let exec = executor();
        assert_eq!(exec.run("print(io == nil, os.execute == nil)").await, "true\ttrue");
    }

    #[test]
    fn execute_runs_synchronously() {
        let exec = executor();
        assert_eq!(exec.execute("print('sync')").unwrap(), "sync\n");
        assert!(matches!(exec.execute("error('x')"), Err(ExecError::Fault(_))));
    }

    #[test]
    fn timeout_message_names_limit() {
        let msg = ExecError::Timeout(Duration::from_secs(10)).to_string();
        assert_eq!(msg, "[execution error] timed out after 10s");
    }
}
