//! Hello-page smoke test harness
//!
//! This crate runs a single end-to-end check against a local web server:
//! - Spawns the server as a subprocess and waits for its readiness marker
//! - Opens the root page in a headless Playwright browser
//! - Asserts that the first `p` element reads exactly `Hello World!`
//! - Always closes the browser and stops the server afterwards
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     SmokeRunner (Rust)                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Idle -> Starting -> Ready -> Asserting -> TearingDown -> Done│
//! │              │                                                │
//! │              └-> TearingDown -> Failed (setup error)          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  SmokeContext                                                 │
//! │    ├── server:  ProcessSupervisor  (ServerProcess)            │
//! │    └── browser: BrowserDriver      (PlaywrightSession)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod assertion;
pub mod browser;
pub mod error;
pub mod playwright;
pub mod process;
pub mod runner;
pub mod server;

pub use assertion::{check_element, AssertionReport, CheckResult, ContentExpectation};
pub use browser::{BrowserDriver, Element};
pub use error::{SmokeError, SmokeResult};
pub use runner::{Outcome, RunReport, RunState, RunnerConfig, SmokeContext, SmokeRunner};
pub use server::{ProcessSupervisor, ServerConfig, ServerProcess};
