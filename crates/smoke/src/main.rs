//! Smoke test entry point
//!
//! Run with: cargo run --package hello-smoke -- --project-dir path/to/site

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use hello_smoke::playwright::{Browser, PlaywrightConfig};
use hello_smoke::runner::write_results;
use hello_smoke::{ContentExpectation, RunnerConfig, ServerConfig, SmokeRunner};

#[derive(Parser, Debug)]
#[command(name = "hello-smoke")]
#[command(about = "Start the web server, load its root page headless and check the greeting")]
#[command(version)]
struct Args {
    /// Server working directory, also where `playwright` is resolved from
    #[arg(long, env = "SMOKE_PROJECT_DIR", default_value = ".")]
    project_dir: PathBuf,

    /// Program that starts the server
    #[arg(long, env = "SMOKE_SERVER_PROGRAM", default_value = "npm")]
    server_program: String,

    /// Argument for the server program (repeat for more)
    #[arg(long = "server-arg", default_value = "start", allow_hyphen_values = true)]
    server_args: Vec<String>,

    /// Page to open
    #[arg(long, env = "SMOKE_URL", default_value = "http://127.0.0.1:8080")]
    url: String,

    /// Substring on server stdout that means it is listening (defaults to the URL)
    #[arg(long, env = "SMOKE_READY_MARKER")]
    ready_marker: Option<String>,

    /// Pause after the readiness marker, in milliseconds
    #[arg(long, default_value = "1000")]
    settle_ms: u64,

    /// Seconds to wait for the readiness marker (0 = until the server exits)
    #[arg(long, env = "SMOKE_STARTUP_TIMEOUT", default_value = "30")]
    startup_timeout: u64,

    /// Element to look up
    #[arg(long, default_value = "p")]
    selector: String,

    /// Exact text content the element must have
    #[arg(long, default_value = "Hello World!")]
    expect_text: String,

    /// Browser engine
    #[arg(long, value_enum, default_value = "chromium")]
    browser: Browser,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Node.js executable used to drive Playwright
    #[arg(long, env = "SMOKE_NODE", default_value = "node")]
    node: PathBuf,

    /// Treat teardown errors as a failed run
    #[arg(long)]
    fail_on_teardown_error: bool,

    /// Output directory for results
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn into_config(self) -> RunnerConfig {
        let ready_marker = self
            .ready_marker
            .unwrap_or_else(|| self.url.trim_end_matches('/').to_string());
        let startup_timeout =
            (self.startup_timeout > 0).then(|| Duration::from_secs(self.startup_timeout));

        RunnerConfig {
            url: self.url,
            expectation: ContentExpectation {
                selector: self.selector,
                text: self.expect_text,
            },
            fail_on_teardown_error: self.fail_on_teardown_error,
            server: ServerConfig {
                program: self.server_program,
                args: self.server_args,
                working_dir: Some(self.project_dir.clone()),
                ready_marker,
                settle_delay: Duration::from_millis(self.settle_ms),
                startup_timeout,
            },
            playwright: PlaywrightConfig {
                browser: self.browser,
                headless: !self.headed,
                node_binary: self.node,
                project_dir: self.project_dir,
                ..Default::default()
            },
            output_dir: self.output,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.into_config();
    let output_dir = config.output_dir.clone();

    let mut runner = SmokeRunner::with_config(config);
    let report = runner.run().await;
    drop(runner);

    if let Err(e) = write_results(&output_dir, &report) {
        error!("Failed to write results: {}", e);
    }

    std::process::exit(report.exit_code());
}
