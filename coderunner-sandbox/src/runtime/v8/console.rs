//! Sandboxed console surface for the JavaScript worker
//!
//! Guest output leaves the isolate through a single op that posts
//! [`WorkerMessage`]s onto the run's stream. The bootstrap script captures
//! the op in a closure and removes `Deno` from the global object, so guest
//! code only ever sees the `console` it is handed.

use crate::types::EventSender;
use coderunner_common::WorkerMessage;
use deno_core::{op2, Extension, OpState};

/// Run-scoped sender stored in the isolate's `OpState`
pub struct Outbox(pub EventSender);

/// Post a message from the isolate to the host
#[op2]
fn op_runner_post(state: &mut OpState, #[serde] message: WorkerMessage) {
    // Lifecycle messages belong to the host side of the worker
    if !matches!(message, WorkerMessage::Output { .. } | WorkerMessage::Error { .. }) {
        tracing::warn!(?message, "Dropping lifecycle message posted from script");
        return;
    }
    if let Some(outbox) = state.try_borrow::<Outbox>() {
        if outbox.0.send(message).is_err() {
            tracing::debug!("Run stream closed, dropping output");
        }
    }
}

/// Create the console extension
pub fn extension() -> Extension {
    let ops = vec![op_runner_post()];

    Extension {
        name: "coderunner_console",
        ops: std::borrow::Cow::Owned(ops),
        ..Default::default()
    }
}

/// Script name for the bootstrap
pub const BOOTSTRAP_NAME: &str = "[coderunner:bootstrap]";

/// Installs `__runnerInvoke`, which calls the wrapped snippet once with the
/// sandboxed console and reports its value or exception.
pub const BOOTSTRAP_JS: &str = r#"
((ops) => {
    "use strict";

    const post = (message) => ops.op_runner_post(message);

    const describe = (value) => {
        if (value === undefined) return "undefined";
        if (value === null) return "null";
        switch (typeof value) {
            case "string":
                return value;
            case "bigint":
                return `${value}n`;
            case "function":
                return `[Function: ${value.name || "anonymous"}]`;
            case "object":
                break;
            default:
                return String(value);
        }
        if (value instanceof Error) {
            return `${value.name}: ${value.message}`;
        }
        try {
            const json = JSON.stringify(
                value,
                (_key, v) => (typeof v === "bigint" ? `${v}n` : v),
                2,
            );
            if (json !== undefined) return json;
        } catch (_) {
            // cyclic or otherwise unserializable
        }
        try {
            return String(value);
        } catch (_) {
            return Object.prototype.toString.call(value);
        }
    };

    const format = (args) => args.map(describe).join(" ");

    const emit = (kind) => (...args) => {
        post({ type: "output", data: { kind, content: format(args) } });
    };

    const sandboxConsole = Object.freeze({
        log: emit("log"),
        info: emit("info"),
        warn: emit("warn"),
        error: emit("error"),
        debug: emit("log"),
    });

    class InfiniteLoopError extends Error {
        constructor(limit) {
            super(`Infinite loop detected: exceeded ${limit} iterations`);
            this.name = "InfiniteLoopError";
        }
    }

    const fail = (error) => {
        const message =
            error instanceof Error ? `${error.name}: ${error.message}` : describe(error);
        post({ type: "error", error: message });
    };

    const report = (value) => {
        if (value !== undefined) {
            post({ type: "output", data: { kind: "result", content: describe(value) } });
        }
    };

    globalThis.__runnerInvoke = (body) => {
        delete globalThis.__runnerInvoke;
        let value;
        try {
            value = body(sandboxConsole, InfiniteLoopError);
        } catch (error) {
            fail(error);
            return;
        }
        if (value !== null && typeof value === "object" && typeof value.then === "function") {
            Promise.resolve(value).then(report, fail);
        } else {
            report(value);
        }
    };
})(Deno.core.ops);

delete globalThis.Deno;
"#;
