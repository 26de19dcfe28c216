//! End-to-end JavaScript runs through the service against a real V8 isolate

use assert_matches::assert_matches;
use coderunner_common::{FailureKind, OutputKind, STOPPED_BY_USER};
use coderunner_sandbox::{guard, ExecutionStatus, Language};
use coderunner_tests::common::{iterations, lines, service, timeout, transcript};
use std::sync::Arc;
use std::time::Duration;

const SPIN: &str = "/^(a+)+$/.test('a'.repeat(40) + 'b')";

#[tokio::test]
async fn test_countdown_logs_in_order() {
    let service = service();

    let result = service
        .execute(
            "let n=10; while(n>0){console.log(n); n--;}",
            Language::JavaScript,
            iterations(1000),
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.error, None);
    let expected: Vec<String> = (1..=10).rev().map(|n| n.to_string()).collect();
    assert_eq!(lines(&result, OutputKind::Log), expected);
}

#[tokio::test]
async fn test_infinite_loop_is_guarded() {
    let service = service();

    let result = service
        .execute("let i=0; while(true){i++;}", Language::JavaScript, iterations(500))
        .await;

    assert!(!result.success);
    assert_matches!(result.failure, Some(FailureKind::IterationLimit));
    let error = result.error.unwrap();
    assert!(error.contains("500"), "{}", error);
    assert!(error.contains(&guard::limit_message(500)), "{}", error);
}

#[tokio::test]
async fn test_unbraced_loop_bodies_are_guarded() {
    let service = service();

    for code in [
        "let i = 0, x = true; while (true) if (x) i++;",
        "let i = 0; do i++; while (true);",
    ] {
        let result = service
            .execute(code, Language::JavaScript, iterations(300))
            .await;
        assert_matches!(result.failure, Some(FailureKind::IterationLimit), "{}", code);
        assert!(result.error.unwrap().contains(&guard::limit_message(300)));
    }
}

#[tokio::test]
async fn test_console_methods_map_to_kinds() {
    let service = service();

    let result = service
        .execute(
            "console.log('a'); console.info('i'); console.warn('b'); console.error('c'); console.debug('d');",
            Language::JavaScript,
            None,
        )
        .await;

    assert!(result.success);
    assert_eq!(
        transcript(&result),
        vec![
            (OutputKind::Log, "a".to_string()),
            (OutputKind::Info, "i".to_string()),
            (OutputKind::Warn, "b".to_string()),
            (OutputKind::Error, "c".to_string()),
            (OutputKind::Log, "d".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_console_renders_values() {
    let service = service();

    let result = service
        .execute(
            "console.log('n', 1, null, undefined, [1, 2]); console.log({ a: 1 });",
            Language::JavaScript,
            None,
        )
        .await;

    assert_eq!(
        lines(&result, OutputKind::Log),
        vec!["n 1 null undefined [\n  1,\n  2\n]", "{\n  \"a\": 1\n}"]
    );
}

#[tokio::test]
async fn test_final_expression_is_result() {
    let service = service();

    let result = service.execute("42", Language::JavaScript, None).await;

    assert!(result.success);
    assert_eq!(lines(&result, OutputKind::Result), vec!["42"]);
    assert_eq!(result.outputs.len(), 1);
}

#[tokio::test]
async fn test_declaration_has_no_result() {
    let service = service();

    let result = service
        .execute("const x = 42;", Language::JavaScript, None)
        .await;

    assert!(result.success);
    assert!(result.outputs.is_empty());
}

#[tokio::test]
async fn test_uncaught_throw_fails() {
    let service = service();

    let result = service
        .execute(
            "console.log('before'); throw new Error(\"x\");",
            Language::JavaScript,
            None,
        )
        .await;

    assert!(!result.success);
    assert_matches!(result.failure, Some(FailureKind::Guest));
    assert_eq!(result.error.as_deref(), Some("Error: x"));
    assert_eq!(lines(&result, OutputKind::Log), vec!["before"]);
}

#[tokio::test]
async fn test_rejected_promise_fails() {
    let service = service();

    let result = service
        .execute(
            "async function go() { throw new TypeError('late'); } return go();",
            Language::JavaScript,
            None,
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("TypeError: late"));
}

#[tokio::test]
async fn test_host_globals_are_unreachable() {
    let service = service();

    let result = service
        .execute(
            "[typeof Deno, typeof require, typeof process, typeof fetch].join(',')",
            Language::JavaScript,
            None,
        )
        .await;

    assert!(result.success);
    assert_eq!(
        lines(&result, OutputKind::Result),
        vec!["undefined,undefined,undefined,undefined"]
    );
}

#[tokio::test]
async fn test_unguarded_spin_times_out() {
    let service = service();

    // catastrophic backtracking spins without a single loop
    let result = service
        .execute(SPIN, Language::JavaScript, timeout(Duration::from_millis(300)))
        .await;

    assert!(!result.success);
    assert_matches!(result.failure, Some(FailureKind::Timeout));
    assert!(result.execution_time >= 300);
}

#[tokio::test]
async fn test_runs_are_idempotent() {
    let service = service();
    let code = "let total = 0; for (let i = 1; i <= 3; i++) { total += i; console.log(total); } total";

    let first = service.execute(code, Language::JavaScript, None).await;
    let second = service.execute(code, Language::JavaScript, None).await;

    assert!(first.success);
    assert_eq!(first.success, second.success);
    assert_eq!(first.error, second.error);
    assert_eq!(transcript(&first), transcript(&second));
}

#[tokio::test]
async fn test_globals_do_not_leak_between_runs() {
    let service = service();

    let first = service
        .execute("globalThis.leaked = 1; var counter = 5;", Language::JavaScript, None)
        .await;
    assert!(first.success);

    let second = service
        .execute("typeof leaked + ' ' + typeof counter", Language::JavaScript, None)
        .await;
    assert_eq!(
        lines(&second, OutputKind::Result),
        vec!["undefined undefined"]
    );
}

#[tokio::test]
async fn test_stop_then_rerun() {
    let service = Arc::new(service());

    let task = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .execute(SPIN, Language::JavaScript, timeout(Duration::from_secs(30)))
                .await
        }
    });

    while service.status() != ExecutionStatus::Running {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(service.stop());

    let stopped = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("stopped run resolves")
        .unwrap();
    assert_matches!(stopped.failure, Some(FailureKind::Stopped));
    let last = stopped.outputs.last().unwrap();
    assert_eq!(last.kind, OutputKind::Info);
    assert_eq!(last.content, STOPPED_BY_USER);

    let next = service
        .execute("console.log('fresh')", Language::JavaScript, timeout(Duration::from_secs(5)))
        .await;
    assert!(next.success, "{:?}", next.error);
    assert_eq!(lines(&next, OutputKind::Log), vec!["fresh"]);
}
