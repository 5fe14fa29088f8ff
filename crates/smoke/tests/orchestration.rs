//! Smoke run orchestration against fake server and browser handles

mod common;

use common::{hello_dom, CallLog, FakeBrowser, FakeServer};
use hello_smoke::assertion::{ELEMENT_PRESENT, TEXT_EQUALS};
use hello_smoke::{Element, Outcome, RunState, RunnerConfig, SmokeContext, SmokeRunner};
use test_case::test_case;

fn runner(server: FakeServer, browser: FakeBrowser) -> SmokeRunner<FakeServer, FakeBrowser> {
    SmokeRunner::new(SmokeContext { server, browser }, RunnerConfig::default())
}

fn fakes(dom: Vec<Element>) -> (CallLog, FakeServer, FakeBrowser) {
    let log = CallLog::default();
    let server = FakeServer {
        log: log.clone(),
        ..Default::default()
    };
    let browser = FakeBrowser::with_dom(log.clone(), dom);
    (log, server, browser)
}

#[tokio::test]
async fn hello_page_passes() {
    let (log, server, browser) = fakes(hello_dom());
    let mut runner = runner(server, browser);

    let report = runner.run().await;

    assert_eq!(report.outcome, Outcome::Passed);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.checks.len(), 2);
    assert!(report.checks.iter().all(|c| c.passed));
    assert_eq!(log.calls(), vec!["start", "open", "find", "exit", "stop"]);
    assert_eq!(
        runner.history(),
        &[
            RunState::Idle,
            RunState::Starting,
            RunState::Ready,
            RunState::Asserting,
            RunState::TearingDown,
            RunState::Done,
        ]
    );

    let context = runner.into_context();
    assert_eq!(context.browser.opened.as_deref(), Some("http://127.0.0.1:8080"));
}

#[tokio::test]
async fn missing_paragraph_fails_presence_check() {
    let (_log, server, browser) = fakes(vec![Element::new("h1", "Hello World!")]);
    let report = runner(server, browser).run().await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.checks[0].name, ELEMENT_PRESENT);
    assert!(!report.checks[0].passed);
}

#[tokio::test]
async fn wrong_text_fails_only_text_check() {
    let (_log, server, browser) = fakes(vec![Element::new("p", "Goodbye")]);
    let report = runner(server, browser).run().await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert!(report.checks[0].passed);
    assert_eq!(report.checks[1].name, TEXT_EQUALS);
    assert!(!report.checks[1].passed);
}

#[test_case(hello_dom() ; "assertions pass")]
#[test_case(vec![] ; "no paragraph")]
#[test_case(vec![Element::new("p", "Goodbye")] ; "wrong text")]
#[tokio::test]
async fn teardown_runs_once_in_order(dom: Vec<Element>) {
    let (log, server, browser) = fakes(dom);
    let mut runner = runner(server, browser);
    runner.run().await;

    assert_eq!(log.count("exit"), 1);
    assert_eq!(log.count("stop"), 1);
    assert_eq!(&log.calls()[3..], &["exit", "stop"]);
    assert_eq!(runner.state(), RunState::Done);
}

#[tokio::test]
async fn server_start_failure_skips_browser_and_still_cleans_up() {
    let (log, mut server, browser) = fakes(hello_dom());
    server.fail_start = true;
    let mut runner = runner(server, browser);

    let report = runner.run().await;

    match &report.outcome {
        Outcome::SetupFailed { error } => assert!(error.contains("Server did not start")),
        other => panic!("expected setup failure, got {other:?}"),
    }
    assert_eq!(report.exit_code(), 2);
    assert!(report.checks.is_empty());
    assert_eq!(log.calls(), vec!["start", "exit", "stop"]);
    assert_eq!(runner.state(), RunState::Failed);
    assert_eq!(
        runner.history(),
        &[
            RunState::Idle,
            RunState::Starting,
            RunState::TearingDown,
            RunState::Failed,
        ]
    );
}

#[tokio::test]
async fn navigation_failure_is_setup_failure() {
    let (log, server, mut browser) = fakes(hello_dom());
    browser.fail_open = true;

    let report = runner(server, browser).run().await;

    match &report.outcome {
        Outcome::SetupFailed { error } => assert!(error.contains("ERR_CONNECTION_REFUSED")),
        other => panic!("expected setup failure, got {other:?}"),
    }
    assert_eq!(log.calls(), vec!["start", "open", "exit", "stop"]);
}

#[tokio::test]
async fn lookup_error_is_a_failed_check() {
    let (log, server, mut browser) = fakes(hello_dom());
    browser.fail_find = true;

    let report = runner(server, browser).run().await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert!(!report.checks[0].passed);
    assert_eq!(&log.calls()[3..], &["exit", "stop"]);
}

#[tokio::test]
async fn teardown_errors_are_reported_but_not_fatal() {
    let (log, mut server, mut browser) = fakes(hello_dom());
    browser.fail_exit = true;
    server.fail_stop = true;

    let report = runner(server, browser).run().await;

    assert_eq!(report.outcome, Outcome::Passed);
    assert_eq!(report.teardown_errors.len(), 2);
    assert_eq!(log.calls(), vec!["start", "open", "find", "exit", "stop"]);
}

#[tokio::test]
async fn strict_teardown_fails_the_run() {
    let (_log, server, mut browser) = fakes(hello_dom());
    browser.fail_exit = true;
    let config = RunnerConfig {
        fail_on_teardown_error: true,
        ..Default::default()
    };

    let report = SmokeRunner::new(SmokeContext { server, browser }, config)
        .run()
        .await;

    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.teardown_errors.len(), 1);
}
