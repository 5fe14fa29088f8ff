//! Smoke run orchestration: start the server, open the page, check it, tear down

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::assertion::{check_element, AssertionReport, CheckResult, ContentExpectation};
use crate::browser::BrowserDriver;
use crate::error::SmokeResult;
use crate::playwright::{PlaywrightConfig, PlaywrightSession};
use crate::server::{ProcessSupervisor, ServerConfig, ServerProcess};

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Starting,
    Ready,
    Asserting,
    TearingDown,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    SetupFailed { error: String },
}

/// Result of one smoke run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub url: String,
    pub outcome: Outcome,
    pub checks: Vec<CheckResult>,
    pub teardown_errors: Vec<String>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    /// Process exit code: 0 passed, 1 failed, 2 setup failure
    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            Outcome::Passed => 0,
            Outcome::Failed => 1,
            Outcome::SetupFailed { .. } => 2,
        }
    }
}

/// The two handles a run owns from setup to teardown
pub struct SmokeContext<S, B> {
    pub server: S,
    pub browser: B,
}

/// Configuration for the smoke runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub url: String,
    pub expectation: ContentExpectation,

    /// Count teardown errors against an otherwise passing run
    pub fail_on_teardown_error: bool,

    pub server: ServerConfig,
    pub playwright: PlaywrightConfig,
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            expectation: ContentExpectation::default(),
            fail_on_teardown_error: false,
            server: ServerConfig::default(),
            playwright: PlaywrightConfig::default(),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

/// Main smoke runner
pub struct SmokeRunner<S, B> {
    context: SmokeContext<S, B>,
    config: RunnerConfig,
    state: RunState,
    history: Vec<RunState>,
}

impl SmokeRunner<ServerProcess, PlaywrightSession> {
    /// Runner backed by a real server process and a Playwright browser
    pub fn with_config(config: RunnerConfig) -> Self {
        let context = SmokeContext {
            server: ServerProcess::new(config.server.clone()),
            browser: PlaywrightSession::new(config.playwright.clone()),
        };
        Self::new(context, config)
    }
}

impl<S, B> SmokeRunner<S, B>
where
    S: ProcessSupervisor,
    B: BrowserDriver,
{
    pub fn new(context: SmokeContext<S, B>, config: RunnerConfig) -> Self {
        Self {
            context,
            config,
            state: RunState::Idle,
            history: vec![RunState::Idle],
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn into_context(self) -> SmokeContext<S, B> {
        self.context
    }

    fn transition(&mut self, next: RunState) {
        debug!("{:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Run setup, the content check and teardown.
    ///
    /// Teardown runs whatever happened before it, including a failed setup.
    pub async fn run(&mut self) -> RunReport {
        let start = Instant::now();
        self.transition(RunState::Starting);

        let (setup_error, assertions) = match self.setup().await {
            Ok(()) => {
                self.transition(RunState::Ready);
                self.transition(RunState::Asserting);
                (None, Some(self.assert_content().await))
            }
            Err(e) => {
                error!("Setup failed: {}", e);
                (Some(e.to_string()), None)
            }
        };

        self.transition(RunState::TearingDown);
        let teardown_errors = self.teardown().await;
        if setup_error.is_some() {
            self.transition(RunState::Failed);
        } else {
            self.transition(RunState::Done);
        }

        let outcome = match (setup_error, &assertions) {
            (Some(error), _) => Outcome::SetupFailed { error },
            (None, Some(report))
                if report.passed()
                    && (teardown_errors.is_empty() || !self.config.fail_on_teardown_error) =>
            {
                Outcome::Passed
            }
            _ => Outcome::Failed,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Outcome::Passed => info!("✓ {} ({} ms)", self.config.url, duration_ms),
            Outcome::Failed => error!("✗ {} ({} ms)", self.config.url, duration_ms),
            Outcome::SetupFailed { error } => error!("✗ {} - {}", self.config.url, error),
        }

        RunReport {
            url: self.config.url.clone(),
            outcome,
            checks: assertions.map(|r| r.checks).unwrap_or_default(),
            teardown_errors,
            duration_ms,
        }
    }

    async fn setup(&mut self) -> SmokeResult<()> {
        self.context.server.start().await?;
        self.context.browser.open(&self.config.url).await?;
        Ok(())
    }

    async fn assert_content(&mut self) -> AssertionReport {
        let expectation = &self.config.expectation;

        let report = match self.context.browser.find(&expectation.selector).await {
            Ok(found) => check_element(found.as_ref(), expectation),
            Err(e) => AssertionReport::lookup_failed(&expectation.selector, &e),
        };

        for check in &report.checks {
            match (&check.passed, &check.detail) {
                (true, _) => info!("  ✓ {}", check.name),
                (false, Some(detail)) => error!("  ✗ {}: {}", check.name, detail),
                (false, None) => error!("  ✗ {}", check.name),
            }
        }
        report
    }

    async fn teardown(&mut self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Err(e) = self.context.browser.exit().await {
            warn!("Browser exit failed: {}", e);
            errors.push(e.to_string());
        }
        if let Err(e) = self.context.server.stop().await {
            warn!("Server stop failed: {}", e);
            errors.push(e.to_string());
        }

        errors
    }
}

/// Write the report as pretty JSON to `<dir>/smoke-results.json`
pub fn write_results(dir: &Path, report: &RunReport) -> SmokeResult<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let path = dir.join("smoke-results.json");
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}
