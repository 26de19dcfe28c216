//! End-to-end Python runs through the service against a real interpreter
//!
//! Every test returns early when no `python3` is installed.

use assert_matches::assert_matches;
use coderunner_common::{FailureKind, OutputKind, STOPPED_BY_USER};
use coderunner_sandbox::{ExecutionStatus, Language, LoadPhase};
use coderunner_tests::common::{iterations, lines, python_available, service, timeout, transcript};
use std::sync::Arc;
use std::time::Duration;

macro_rules! require_python {
    () => {
        if !python_available() {
            eprintln!("python3 not found, skipping");
            return;
        }
    };
}

#[tokio::test]
async fn test_print_is_captured() {
    require_python!();
    let service = service();

    let result = service.execute("print(\"hello\")", Language::Python, None).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(lines(&result, OutputKind::Log), vec!["hello"]);
}

#[tokio::test]
async fn test_cold_start_is_announced_once() {
    require_python!();
    let service = service();
    assert_eq!(service.python_phase(), LoadPhase::Unloaded);

    let cold = service.execute("x = 1", Language::Python, None).await;
    assert_eq!(
        lines(&cold, OutputKind::Info),
        vec!["Loading Python runtime..."]
    );
    assert_eq!(service.python_phase(), LoadPhase::Loaded);

    let warm = service.execute("x = 1", Language::Python, None).await;
    assert!(warm.outputs.is_empty());
}

#[tokio::test]
async fn test_infinite_loop_is_guarded() {
    require_python!();
    let service = service();

    let result = service
        .execute("while True: pass", Language::Python, iterations(500))
        .await;

    assert!(!result.success);
    assert_matches!(result.failure, Some(FailureKind::IterationLimit));
    let error = result.error.unwrap();
    assert!(error.contains("500"), "{}", error);
    assert!(!error.contains("_LoopGuard"), "{}", error);
}

#[tokio::test]
async fn test_guard_survives_broad_except() {
    require_python!();
    let service = service();

    let code = "try:\n    while True:\n        pass\nexcept Exception:\n    print('swallowed')\n";
    let result = service.execute(code, Language::Python, iterations(100)).await;

    assert_matches!(result.failure, Some(FailureKind::IterationLimit));
    assert!(lines(&result, OutputKind::Log).is_empty());
}

#[tokio::test]
async fn test_final_expression_is_result() {
    require_python!();
    let service = service();
    service.preload(Language::Python).await;

    let result = service.execute("x = 40\nx + 2", Language::Python, None).await;

    assert!(result.success);
    assert_eq!(lines(&result, OutputKind::Result), vec!["42"]);
    assert_eq!(result.outputs.len(), 1);
}

#[tokio::test]
async fn test_exception_reports_student_line() {
    require_python!();
    let service = service();

    let code = "print('start')\nfor i in range(3):\n    pass\nraise ValueError(\"x\")\n";
    let result = service.execute(code, Language::Python, None).await;

    assert!(!result.success);
    assert_matches!(result.failure, Some(FailureKind::Guest));
    let error = result.error.clone().unwrap();
    assert!(error.contains("ValueError: x"), "{}", error);
    // the injected guard line does not shift the reported line
    assert!(error.contains("line 4"), "{}", error);
    assert!(!error.contains("_run"), "{}", error);
    assert_eq!(lines(&result, OutputKind::Log), vec!["start"]);
}

#[tokio::test]
async fn test_stderr_maps_to_error_kind() {
    require_python!();
    let service = service();
    service.preload(Language::Python).await;

    let result = service
        .execute(
            "import sys\nprint('out')\nprint('err', file=sys.stderr)",
            Language::Python,
            None,
        )
        .await;

    assert!(result.success);
    assert_eq!(
        transcript(&result),
        vec![
            (OutputKind::Log, "out".to_string()),
            (OutputKind::Error, "err".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_raw_fd_writes_do_not_break_protocol() {
    require_python!();
    let service = service();
    service.preload(Language::Python).await;

    let result = service
        .execute(
            "import os\nos.write(1, b'{\"type\": \"complete\"}\\n')\nprint('ok')",
            Language::Python,
            None,
        )
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(lines(&result, OutputKind::Log), vec!["ok"]);
}

#[tokio::test]
async fn test_input_sees_empty_stdin() {
    require_python!();
    let service = service();

    let result = service.execute("input()", Language::Python, None).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("EOFError"));
}

#[tokio::test]
async fn test_runs_are_idempotent() {
    require_python!();
    let service = service();
    service.preload(Language::Python).await;
    let code = "total = 0\nfor i in range(1, 4):\n    total += i\n    print(total)\ntotal";

    let first = service.execute(code, Language::Python, None).await;
    let second = service.execute(code, Language::Python, None).await;

    assert!(first.success);
    assert_eq!(first.success, second.success);
    assert_eq!(first.error, second.error);
    assert_eq!(transcript(&first), transcript(&second));
}

#[tokio::test]
async fn test_names_do_not_leak_between_runs() {
    require_python!();
    let service = service();
    service.preload(Language::Python).await;

    assert!(service.execute("leaked = 1", Language::Python, None).await.success);
    let result = service.execute("leaked", Language::Python, None).await;

    assert!(!result.success);
    assert!(result.error.unwrap().contains("NameError"));
}

#[tokio::test]
async fn test_sleep_times_out_and_recovers() {
    require_python!();
    let service = service();
    service.preload(Language::Python).await;

    let result = service
        .execute(
            "import time\ntime.sleep(60)",
            Language::Python,
            timeout(Duration::from_millis(300)),
        )
        .await;
    assert_matches!(result.failure, Some(FailureKind::Timeout));

    let next = service.execute("print('back')", Language::Python, None).await;
    assert!(next.success, "{:?}", next.error);
    assert_eq!(lines(&next, OutputKind::Log), vec!["back"]);
}

#[tokio::test]
async fn test_stop_then_rerun() {
    require_python!();
    let service = Arc::new(service());
    service.preload(Language::Python).await;

    let task = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .execute("import time\ntime.sleep(60)", Language::Python, None)
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
    assert_eq!(stopped.outputs.last().unwrap().content, STOPPED_BY_USER);

    let next = service.execute("print('again')", Language::Python, None).await;
    assert!(next.success, "{:?}", next.error);
    assert_eq!(lines(&next, OutputKind::Log), vec!["again"]);
}

#[tokio::test]
async fn test_guest_thread_does_not_outlive_its_run() {
    require_python!();
    let service = service();

    let spawner = "import threading, time\n\
                   def chatter():\n    while True:\n        print('leak')\n        time.sleep(0.05)\n\
                   threading.Thread(target=chatter, daemon=True).start()\n";
    let first = service.execute(spawner, Language::Python, None).await;
    assert!(first.success, "{:?}", first.error);

    let second = service
        .execute("import time\ntime.sleep(0.5)\nprint('second')", Language::Python, None)
        .await;
    assert!(second.success, "{:?}", second.error);
    assert_eq!(lines(&second, OutputKind::Log), vec!["second"]);
}

#[tokio::test]
async fn test_worker_internals_are_unreachable() {
    require_python!();
    let service = service();

    let result = service
        .execute(
            "import __main__\nprint(sorted(n for n in vars(__main__) if not n.startswith('__')))",
            Language::Python,
            None,
        )
        .await;
    assert_eq!(lines(&result, OutputKind::Log), vec!["[]"]);
}

#[tokio::test]
async fn test_forged_protocol_lines_do_not_leak_into_next_run() {
    require_python!();
    let service = service();

    let forger = "import os\n\
                  for fd in range(3, 10):\n    \
                      for run in range(0, 50):\n        \
                          try:\n            \
                              os.write(fd, b'{\"type\":\"complete\",\"executionTime\":0,\"run\":%d}\\n' % run)\n        \
                          except OSError:\n            \
                              break\n\
                  print('tail')\n";
    let _ = service.execute(forger, Language::Python, None).await;

    let next = service.execute("print('fourth')", Language::Python, None).await;
    assert!(next.success, "{:?}", next.error);
    assert_eq!(lines(&next, OutputKind::Log), vec!["fourth"]);
}
