//! V8 JavaScript runtime using deno_core
//!
//! Every run gets a fresh isolate on its own OS thread. Isolates are `!Send`,
//! and a thread is also the unit we can abandon: termination interrupts the
//! isolate from outside and the thread winds down on its own, so the next run
//! never inherits a poisoned context.

mod console;
pub mod source;

use crate::error::Result;
use crate::settings::JavaScriptSettings;
use crate::types::{EventSender, ExecutionStream, RunRequest};
use async_trait::async_trait;
use coderunner_common::WorkerMessage;
use deno_core::{v8, JsRuntime, PollEventLoopOptions, RuntimeOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Reported when the isolate approaches its heap ceiling
pub const MEMORY_LIMIT_MESSAGE: &str = "Memory limit exceeded";

/// V8 JavaScript runtime
pub struct V8Runtime {
    settings: JavaScriptSettings,
    /// Control block of the in-flight run, if any
    active: Mutex<Option<Arc<RunControl>>>,
}

impl V8Runtime {
    pub fn new(settings: JavaScriptSettings) -> Self {
        Self {
            settings,
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<Arc<RunControl>>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for V8Runtime {
    fn default() -> Self {
        Self::new(JavaScriptSettings::default())
    }
}

#[async_trait]
impl super::Runtime for V8Runtime {
    async fn execute(&self, request: RunRequest) -> Result<ExecutionStream> {
        let (events, stream) = ExecutionStream::channel();
        let control = Arc::new(RunControl::default());
        let max_heap_bytes = self.settings.max_heap_bytes;

        tracing::debug!(
            execution_id = %request.id,
            max_heap_bytes,
            "Starting JavaScript worker"
        );

        if let Some(previous) = self.active().replace(control.clone()) {
            previous.kill();
        }
        std::thread::Builder::new()
            .name(format!("js-worker-{}", request.id))
            .spawn(move || run_on_thread(request, max_heap_bytes, control, events))?;

        Ok(stream)
    }

    fn terminate(&self) {
        if let Some(control) = self.active().take() {
            tracing::debug!("Terminating JavaScript worker");
            control.kill();
        }
    }

    fn name(&self) -> &str {
        "v8"
    }
}

/// Shared between the host and one worker thread
#[derive(Default)]
struct RunControl {
    killed: AtomicBool,
    isolate: Mutex<Option<v8::IsolateHandle>>,
}

impl RunControl {
    /// Publish the isolate handle. Returns `false` if the run was already
    /// killed, in which case the worker must not start guest code.
    fn attach(&self, handle: v8::IsolateHandle) -> bool {
        let mut slot = self.isolate.lock().unwrap_or_else(|e| e.into_inner());
        if self.killed.load(Ordering::SeqCst) {
            return false;
        }
        *slot = Some(handle);
        true
    }

    fn detach(&self) {
        self.isolate.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    fn kill(&self) {
        let mut slot = self.isolate.lock().unwrap_or_else(|e| e.into_inner());
        self.killed.store(true, Ordering::SeqCst);
        if let Some(handle) = slot.take() {
            handle.terminate_execution();
        }
    }

    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

/// State for the near-heap-limit callback
struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// Terminates the isolate and grants 1MB of headroom so the termination
/// can unwind instead of V8 aborting the whole process.
extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` is the `HeapLimitState` boxed in `run_isolate`, which
    // outlives the runtime it was registered on.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + 1024 * 1024
}

fn run_on_thread(
    request: RunRequest,
    max_heap_bytes: usize,
    control: Arc<RunControl>,
    events: EventSender,
) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = events.send(WorkerMessage::error(format!(
                "Failed to load JavaScript runtime: {}",
                e
            )));
            let _ = events.send(WorkerMessage::complete(0));
            return;
        }
    };
    rt.block_on(run_isolate(request, max_heap_bytes, &control, &events));
}

async fn run_isolate(
    request: RunRequest,
    max_heap_bytes: usize,
    control: &RunControl,
    events: &EventSender,
) {
    let mut runtime = JsRuntime::new(RuntimeOptions {
        extensions: vec![console::extension()],
        create_params: Some(v8::CreateParams::default().heap_limits(0, max_heap_bytes)),
        ..Default::default()
    });
    runtime
        .op_state()
        .borrow_mut()
        .put(console::Outbox(events.clone()));

    let heap_state = Box::new(HeapLimitState {
        handle: runtime.v8_isolate().thread_safe_handle(),
        triggered: AtomicBool::new(false),
    });
    runtime.v8_isolate().add_near_heap_limit_callback(
        near_heap_limit_callback,
        &*heap_state as *const HeapLimitState as *mut std::ffi::c_void,
    );

    drive(&mut runtime, &heap_state, request, control, events).await;

    // the heap callback must not outlive its state
    drop(runtime);
}

async fn drive(
    runtime: &mut JsRuntime,
    heap_state: &HeapLimitState,
    request: RunRequest,
    control: &RunControl,
    events: &EventSender,
) {
    let started = Instant::now();

    if !control.attach(runtime.v8_isolate().thread_safe_handle()) {
        tracing::debug!(execution_id = %request.id, "Run killed before start");
        return;
    }

    if let Err(e) = runtime.execute_script(console::BOOTSTRAP_NAME, console::BOOTSTRAP_JS) {
        control.detach();
        let _ = events.send(WorkerMessage::error(format!(
            "Failed to load JavaScript runtime: {}",
            e
        )));
        let _ = events.send(WorkerMessage::complete(elapsed_ms(started)));
        return;
    }
    let _ = events.send(WorkerMessage::Ready);

    let script = source::prepare(&request.code, request.config.max_iterations);
    let outcome = match runtime.execute_script(source::SCRIPT_NAME, script) {
        Ok(_) => runtime
            .run_event_loop(PollEventLoopOptions::default())
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    control.detach();

    if control.is_killed() {
        // the host already settled this run
        tracing::debug!(execution_id = %request.id, "JavaScript worker terminated");
        return;
    }

    let error = if heap_state.triggered.load(Ordering::SeqCst) {
        Some(MEMORY_LIMIT_MESSAGE.to_string())
    } else {
        outcome.err().map(|e| engine_error_message(&e))
    };
    if let Some(error) = &error {
        tracing::debug!(execution_id = %request.id, error = %error, "JavaScript run failed");
        let _ = events.send(WorkerMessage::error(error.clone()));
    }
    let _ = events.send(WorkerMessage::complete(elapsed_ms(started)));
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// First line of an engine error without the `Uncaught` decoration
fn engine_error_message(raw: &str) -> String {
    let first = raw.lines().next().unwrap_or(raw).trim();
    let first = first
        .strip_prefix("Uncaught (in promise) ")
        .or_else(|| first.strip_prefix("Uncaught "))
        .unwrap_or(first);
    first.to_string()
}
