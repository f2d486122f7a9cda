//! JavaScript engine worker.
//!
//! A boa `Context` is not `Send`, so it lives on a dedicated OS thread. The
//! async side talks to it through a bounded command channel; every command
//! carries a one-shot reply. Commands are processed strictly in order.

use boa_engine::{Context, JsError, JsValue, Source, js_string};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{LoadError, RunError};

const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

enum Command {
    Load {
        code: String,
        reply: oneshot::Sender<Result<(), LoadError>>,
    },
    Run {
        input: Value,
        reply: oneshot::Sender<Result<Value, RunError>>,
    },
}

/// Handle to the engine thread. Dropping it stops the thread.
pub struct JsEngine {
    commands: mpsc::Sender<Command>,
}

impl JsEngine {
    pub fn spawn() -> std::io::Result<Self> {
        let (commands, rx) = mpsc::channel(32);
        std::thread::Builder::new()
            .name("js-engine".into())
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || worker_loop(rx))?;
        Ok(Self { commands })
    }

    /// Install `code` into a fresh context. On failure nothing stays loaded.
    pub async fn load(&self, code: String) -> Result<(), LoadError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Load { code, reply })
            .await
            .map_err(|_| LoadError::EngineUnavailable)?;
        rx.await.map_err(|_| LoadError::EngineUnavailable)?
    }

    /// Call `entrypoint(input)` in the loaded context.
    pub async fn run(&self, input: Value) -> Result<Value, RunError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Run { input, reply })
            .await
            .map_err(|_| RunError::EngineUnavailable)?;
        rx.await.map_err(|_| RunError::EngineUnavailable)?
    }
}

fn worker_loop(mut rx: mpsc::Receiver<Command>) {
    let mut loaded: Option<Context> = None;

    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Load { code, reply } => {
                // Drop the previous namespace first so a failed load leaves nothing.
                loaded = None;
                let result = install(&code).map(|ctx| {
                    loaded = Some(ctx);
                });
                if reply.send(result).is_err() {
                    warn!("load caller went away before the reply");
                }
            }
            Command::Run { input, reply } => {
                let result = match loaded.as_mut() {
                    Some(ctx) => invoke(ctx, &input),
                    None => Err(RunError::NotLoaded),
                };
                if reply.send(result).is_err() {
                    warn!("run caller went away before the reply");
                }
            }
        }
    }

    debug!("engine worker exiting");
}

fn install(code: &str) -> Result<Context, LoadError> {
    let mut ctx = Context::default();
    if let Err(e) = ctx.eval(Source::from_bytes(code)) {
        return Err(LoadError::Execution(describe(e, &mut ctx)));
    }

    let global = ctx.global_object();
    let entrypoint = global
        .get(js_string!("entrypoint"), &mut ctx)
        .map_err(|e| LoadError::Execution(e.to_string()))?;
    if !entrypoint.as_object().is_some_and(|f| f.is_callable()) {
        return Err(LoadError::MissingEntrypoint);
    }
    Ok(ctx)
}

fn invoke(ctx: &mut Context, input: &Value) -> Result<Value, RunError> {
    let arg = JsValue::from_json(input, ctx).map_err(|e| RunError::InvalidInput(e.to_string()))?;

    let global = ctx.global_object();
    let entrypoint = global
        .get(js_string!("entrypoint"), ctx)
        .map_err(|e| RunError::UserCode(describe(e, ctx)))?;
    let Some(function) = entrypoint.as_object().filter(|f| f.is_callable()) else {
        return Err(RunError::UserCode("entrypoint is no longer a function".into()));
    };

    let result = function
        .call(&JsValue::undefined(), &[arg], ctx)
        .map_err(|e| RunError::UserCode(describe(e, ctx)))?;

    if result.is_undefined() {
        return Ok(Value::Null);
    }
    result
        .to_json(ctx)
        .map_err(|e| RunError::UserCode(format!("result is not JSON-serializable: {e}")))
}

/// `Error: message` for thrown error objects, the value itself otherwise.
fn describe(error: JsError, ctx: &mut Context) -> String {
    match error.try_native(ctx) {
        Ok(native) => native.to_string(),
        Err(_) => error.to_string(),
    }
}
