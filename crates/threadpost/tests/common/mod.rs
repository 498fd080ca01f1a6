// Shared fixtures for router integration tests
//
// STATIC_WORKER is a worker script with one handler per behavior under test.
// Long-running handlers spawn tasks on the worker's own runtime and stop
// them from an on_cancel listener.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use threadpost::{body, MessageRouter, RouterConfig, ScriptRegistry, SourceSpec, WorkerMessage};

pub const STATIC_WORKER: &str = "static-worker.js";
pub const GREETING: &str = "Hello from the static worker!";

/// Tick of the long-running `asyncOperation` handler
pub const ASYNC_TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncOperationState {
    pub async_operation_was_called: bool,
    pub did_async_operation_finish: bool,
    pub did_async_operation_cancel: bool,
}

#[derive(Default)]
struct WorkerState {
    count: i64,
    async_operation: AsyncOperationState,
    previous: Option<WorkerMessage>,
    callback_key: Option<String>,
    callback_called: bool,
}

/// Registry with the static worker script published
pub fn registry() -> ScriptRegistry {
    let registry = ScriptRegistry::new();
    registry.register(STATIC_WORKER, static_worker());
    registry
}

/// Router over the static worker with the given config
pub fn router(config: RouterConfig) -> MessageRouter {
    MessageRouter::builder(SourceSpec::external(STATIC_WORKER))
        .registry(registry())
        .config(config)
        .build()
        .expect("router should build")
}

/// Router with a single warm worker, named for the test
pub fn static_router(name: &str) -> MessageRouter {
    router(RouterConfig::new(name))
}

fn static_worker() -> threadpost::WorkerBody {
    body(|runtime, _scope| {
        let state = Arc::new(Mutex::new(WorkerState::default()));

        runtime.on_message(|message, _| {
            message.resolve(GREETING)?;
            Ok(())
        });

        runtime.on_method("actionWithPayload", |message, _| {
            let name: String = message.payload_as()?;
            message.resolve(format!("Hello {name}!"))?;
            Ok(())
        });

        runtime.on_method("sum", |message, _| {
            let n: i64 = message.payload_as()?;
            message.resolve(n + 2)?;
            Ok(())
        });

        runtime.on_method("progressTest", |message, _| {
            let mut result = 0;
            for i in 0..100 {
                result += i;
                message.report_progress(i as f64, None)?;
            }
            message.resolve(result)?;
            Ok(())
        });

        runtime.on_method("echoAfter", |message, _| {
            let delay: u64 = message.payload_as()?;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if message.is_pending() {
                    let _ = message.resolve(delay);
                }
            });
            Ok(())
        });

        let s = Arc::clone(&state);
        runtime.on_method("asyncOperation", move |message, _| {
            s.lock().async_operation.async_operation_was_called = true;

            let task_state = Arc::clone(&s);
            let task_message = message.clone();
            let task = tokio::spawn(async move {
                let mut result = 1;
                let mut interval = tokio::time::interval(ASYNC_TICK);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    result += 1;
                    if task_message.report_progress(result as f64, None).is_err() {
                        return;
                    }
                    if result >= 100 {
                        task_state.lock().async_operation.did_async_operation_finish = true;
                        let _ = task_message.resolve(result);
                        return;
                    }
                }
            });

            let cancel_state = Arc::clone(&s);
            message.on_cancel(move |_| {
                cancel_state.lock().async_operation.did_async_operation_cancel = true;
                task.abort();
            });
            Ok(())
        });

        let s = Arc::clone(&state);
        runtime.on_method("getAsyncOperationState", move |message, _| {
            let snapshot = s.lock().async_operation;
            message.resolve(serde_json::to_value(snapshot)?)?;
            Ok(())
        });

        let s = Arc::clone(&state);
        runtime.on_method("setCount", move |message, _| {
            let count: i64 = message.payload_as()?;
            s.lock().count = count;
            message.resolve(count)?;
            Ok(())
        });

        let s = Arc::clone(&state);
        runtime.on_method("getCount", move |message, _| {
            let count = s.lock().count;
            message.resolve(count)?;
            Ok(())
        });

        let s = Arc::clone(&state);
        runtime.on_method("fastAsyncOperation", move |message, _| {
            let task_state = Arc::clone(&s);
            let task_message = message.clone();
            let task = tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(5));
                loop {
                    interval.tick().await;
                    if !task_message.is_pending() {
                        return;
                    }
                    let count = {
                        let mut state = task_state.lock();
                        state.count += 1;
                        state.count
                    };
                    let _ = task_message.report_progress(count as f64, None);
                    if count >= 100 {
                        let _ = task_message.resolve(count);
                        return;
                    }
                }
            });

            message.on_cancel(move |_| task.abort());
            Ok(())
        });

        runtime.on_method("cancelTest", |message, _| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                let _ = message.cancel("canceled from inside the worker");
            });
            Ok(())
        });

        runtime.on_method("failingHandler", |_message, _| {
            anyhow::bail!("handler exploded")
        });

        let s = Arc::clone(&state);
        runtime.on_method("getDidCallbackWasCalled", move |message, _| {
            let called = s.lock().callback_called;
            message.resolve(called)?;
            Ok(())
        });

        let s = Arc::clone(&state);
        runtime.on_method("sendOpenMessage", move |message, _| {
            let key: String = message.payload_as()?;
            let flag = Arc::clone(&s);
            let mark = move || flag.lock().callback_called = true;

            match key.as_str() {
                "onResolve" => {
                    message.on_resolve(move |_| mark());
                }
                "onCancel" => {
                    message.on_cancel(move |_| mark());
                }
                "onProgress" => {
                    message.on_progress(move |_, _| mark());
                }
                "onFinalize" => {
                    message.on_finalize(mark);
                }
                other => anyhow::bail!("unknown subscription {other}"),
            }

            let mut state = s.lock();
            state.callback_key = Some(key);
            state.previous = Some(message);
            Ok(())
        });

        let s = Arc::clone(&state);
        runtime.on_method("sendCloseMessage", move |message, _| {
            let (previous, key) = {
                let mut state = s.lock();
                (state.previous.take(), state.callback_key.clone())
            };

            if let Some(previous) = previous {
                if key.as_deref() == Some("onProgress") {
                    previous.report_progress(1.0, None)?;
                }
                if key.as_deref() == Some("onCancel") {
                    previous.cancel(Value::Null)?;
                } else {
                    previous.resolve_empty()?;
                }
            }

            message.resolve_empty()?;
            Ok(())
        });

        runtime.on_method("transferArrayBuffer", |message, event| {
            let action = message
                .payload()
                .get("action")
                .and_then(Value::as_str)
                .unwrap_or("resolve")
                .to_string();
            let transfer = event.transfer.clone();
            let echo = json!({ "action": action });

            match action.as_str() {
                "reportProgress" => {
                    let len = transfer.first().map(Vec::len).unwrap_or(0);
                    message.report_progress_with_transfer(50.0, Some(echo), transfer)?;
                    message.resolve(len)?;
                }
                "reject" => message.reject_with_transfer(echo, transfer)?,
                "cancel" => message.cancel_with_transfer(echo, transfer)?,
                _ => message.resolve_with_transfer(Some(echo), transfer)?,
            }
            Ok(())
        });

        runtime.on_method("closeWorker", |message, _| {
            if let Some(runtime) = message.runtime() {
                runtime.close();
            }
            Ok(())
        });

        Ok(())
    })
}
