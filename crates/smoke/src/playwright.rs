//! Playwright browser automation
//!
//! The browser lives in a Node.js child process running a generated driver
//! script. Rust and the driver exchange one JSON object per line:
//!
//! ```text
//! driver -> {"event":"ready"}                      browser and page exist
//! driver -> {"event":"fatal","error":"..."}        launch failed
//! rust   -> {"id":1,"method":"open","params":{"url":"...","timeout":30000}}
//! driver -> {"id":1,"result":{"status":200}}
//! rust   -> {"id":2,"method":"find","params":{"selector":"p"}}
//! driver -> {"id":2,"result":{"element":{"tag":"p","textContent":"..."}}}
//! rust   -> {"id":3,"method":"exit","params":{}}
//! driver -> {"id":3,"result":null}
//! ```
//!
//! Any response may carry `"error"` instead of `"result"`. Lines that are not
//! JSON are treated as driver chatter and logged.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::browser::{BrowserDriver, Element};
use crate::error::{SmokeError, SmokeResult};
use crate::process::{forward_output, kill_now, OutputLines};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Node.js executable
    pub node_binary: PathBuf,

    /// Directory whose `node_modules` provides `playwright`
    pub project_dir: PathBuf,

    /// How long the browser may take to come up
    pub launch_timeout: Duration,

    /// Passed to `page.goto`; the whole `open` request gets `request_timeout` on top
    pub navigation_timeout: Duration,

    /// Upper bound on a `find` round trip
    pub request_timeout: Duration,

    /// How long `exit` waits for the driver to answer and then to exit
    pub exit_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            node_binary: PathBuf::from("node"),
            project_dir: PathBuf::from("."),
            launch_timeout: Duration::from_secs(30),
            navigation_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            exit_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Message {
    Response {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct OpenResult {
    status: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct FindResult {
    element: Option<Element>,
}

/// Line-delimited JSON channel to the driver process
pub struct DriverConnection<W, R> {
    writer: W,
    lines: OutputLines<R>,
    next_id: u64,
}

impl<W, R> DriverConnection<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(writer: W, reader: R) -> Self {
        Self {
            writer,
            lines: OutputLines::new(reader),
            next_id: 0,
        }
    }

    /// Wait for the driver's `ready` event
    pub async fn wait_ready(&mut self) -> SmokeResult<()> {
        loop {
            match self.next_message().await? {
                Message::Event { event, error } => match event.as_str() {
                    "ready" => return Ok(()),
                    "fatal" => return Err(fatal(error)),
                    other => debug!("Ignoring driver event before ready: {}", other),
                },
                Message::Response { id, .. } => {
                    debug!("Ignoring response {} before ready", id);
                }
            }
        }
    }

    /// Send one request and wait for the response carrying the same id
    pub async fn request(&mut self, method: &str, params: Value) -> SmokeResult<Value> {
        self.next_id += 1;
        let id = self.next_id;

        let mut line = serde_json::to_vec(&Request { id, method, params })?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;

        loop {
            match self.next_message().await? {
                Message::Response { id: got, result, error } if got == id => {
                    return match error {
                        Some(e) => Err(SmokeError::Driver(e)),
                        None => Ok(result),
                    };
                }
                Message::Response { id: got, .. } => {
                    warn!("Dropping stale driver response {} (waiting for {})", got, id);
                }
                Message::Event { event, error } if event == "fatal" => {
                    return Err(fatal(error));
                }
                Message::Event { event, .. } => debug!("Driver event: {}", event),
            }
        }
    }

    /// `request` bounded by `limit`.
    ///
    /// A response that arrives after the limit is discarded by a later request
    /// as stale.
    pub async fn request_within(
        &mut self,
        limit: Duration,
        method: &str,
        params: Value,
    ) -> SmokeResult<Value> {
        tokio::time::timeout(limit, self.request(method, params))
            .await
            .unwrap_or_else(|_| {
                Err(SmokeError::DriverTimeout {
                    method: method.to_string(),
                    limit,
                })
            })
    }

    async fn next_message(&mut self) -> SmokeResult<Message> {
        loop {
            let line = self
                .lines
                .next_line()
                .await?
                .ok_or_else(|| SmokeError::Driver("driver closed its output".to_string()))?;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Message>(line) {
                Ok(message) => return Ok(message),
                Err(_) => debug!(stream = "driver", "{}", line),
            }
        }
    }
}

fn fatal(error: Option<String>) -> SmokeError {
    SmokeError::Driver(error.unwrap_or_else(|| "driver failed without a message".to_string()))
}

type ChildConnection = DriverConnection<ChildStdin, BufReader<ChildStdout>>;

/// Playwright browser handle
pub struct PlaywrightSession {
    config: PlaywrightConfig,
    child: Option<Child>,
    connection: Option<ChildConnection>,
    script_dir: Option<TempDir>,
    current_url: Option<String>,
}

impl PlaywrightSession {
    /// Create a session; the browser is launched by the first `open`
    pub fn new(config: PlaywrightConfig) -> Self {
        Self {
            config,
            child: None,
            connection: None,
            script_dir: None,
            current_url: None,
        }
    }

    /// URL of the last successful navigation
    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Check that the Node.js binary runs at all
    async fn check_node_installed(&self) -> SmokeResult<()> {
        let status = Command::new(&self.config.node_binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(SmokeError::DriverNotFound),
        }
    }

    async fn launch(&mut self) -> SmokeResult<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        self.check_node_installed().await?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("driver.js");
        std::fs::write(&script_path, build_driver_script(&self.config))?;

        info!(
            "Launching {} (headless: {})",
            self.config.browser.as_str(),
            self.config.headless
        );
        debug!("Driver script: {}", script_path.display());

        let mut cmd = Command::new(&self.config.node_binary);
        cmd.arg(&script_path)
            .current_dir(&self.config.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Browser processes join the driver's group so a kill reaches them too
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SmokeError::Driver("driver stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SmokeError::Driver("driver stdout was not captured".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            forward_output(OutputLines::new(BufReader::new(stderr)), "driver-stderr");
        }

        let mut connection = DriverConnection::new(stdin, BufReader::new(stdout));
        let limit = self.config.launch_timeout;
        let ready = tokio::time::timeout(limit, connection.wait_ready())
            .await
            .unwrap_or_else(|_| {
                Err(SmokeError::Driver(format!("browser did not launch within {:?}", limit)))
            });

        if let Err(e) = ready {
            kill_now(&mut child);
            let _ = child.wait().await;
            return Err(e);
        }

        self.attach(child, connection);
        self.script_dir = Some(script_dir);
        Ok(())
    }

    /// Take ownership of a running driver and its connection
    fn attach(&mut self, child: Child, connection: ChildConnection) {
        self.child = Some(child);
        self.connection = Some(connection);
    }

    async fn reap(&mut self) {
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(self.config.exit_timeout, child.wait()).await {
                Ok(Ok(status)) => debug!("Driver exited ({})", status),
                Ok(Err(e)) => warn!("Failed to wait for driver: {}", e),
                Err(_) => {
                    warn!("Driver did not exit, killing it");
                    kill_now(&mut child);
                    let _ = child.wait().await;
                }
            }
        }
        self.script_dir = None;
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            kill_now(&mut child);
            let _ = child.wait().await;
        }
        self.script_dir = None;
    }
}

#[async_trait]
impl BrowserDriver for PlaywrightSession {
    async fn open(&mut self, url: &str) -> SmokeResult<()> {
        let navigation = |reason: String| SmokeError::Navigation {
            url: url.to_string(),
            reason,
        };

        self.launch().await.map_err(|e| navigation(e.to_string()))?;
        let timeout_ms = self.config.navigation_timeout.as_millis() as u64;
        let limit = self.config.navigation_timeout + self.config.request_timeout;
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| navigation("browser is not running".to_string()))?;

        info!("Opening {}", url);
        let result = connection
            .request_within(limit, "open", json!({ "url": url, "timeout": timeout_ms }))
            .await
            .map_err(|e| navigation(e.to_string()))?;

        let opened: OpenResult = serde_json::from_value(result)?;
        match opened.status {
            Some(status) => debug!("Loaded {} (HTTP {})", url, status),
            None => debug!("Loaded {} (no HTTP response)", url),
        }

        self.current_url = Some(url.to_string());
        Ok(())
    }

    async fn find(&mut self, selector: &str) -> SmokeResult<Option<Element>> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| SmokeError::Driver("browser is not open".to_string()))?;

        let result = connection
            .request_within(
                self.config.request_timeout,
                "find",
                json!({ "selector": selector }),
            )
            .await?;
        let found: FindResult = serde_json::from_value(result)?;

        debug!("find({}) -> {:?}", selector, found.element);
        Ok(found.element)
    }

    async fn exit(&mut self) -> SmokeResult<()> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };

        info!("Closing browser");
        let result = connection
            .request_within(self.config.exit_timeout, "exit", json!({}))
            .await;

        // Closing stdin ends the driver even if it missed the request
        drop(connection);
        match &result {
            Err(SmokeError::DriverTimeout { .. }) => {
                warn!("Driver did not answer exit, killing it");
                self.kill().await;
            }
            _ => self.reap().await,
        }
        self.current_url = None;

        result
            .map(|_| ())
            .map_err(|e| SmokeError::Teardown(format!("browser exit: {}", e)))
    }
}

/// Build the Node.js driver script for this configuration
pub fn build_driver_script(config: &PlaywrightConfig) -> String {
    format!(
        r#"
const readline = require('readline');

const reply = (message, done) => process.stdout.write(JSON.stringify(message) + '\n', done);

(async () => {{
  const playwright = require(require.resolve('playwright', {{ paths: [process.cwd()] }}));
  const browser = await playwright.{browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}
  }});
  const page = await context.newPage();
  reply({{ event: 'ready' }});

  const input = readline.createInterface({{ input: process.stdin }});
  for await (const line of input) {{
    if (!line.trim()) continue;
    const request = JSON.parse(line);
    try {{
      switch (request.method) {{
        case 'open': {{
          const response = await page.goto(request.params.url, {{
            waitUntil: 'load',
            timeout: request.params.timeout,
          }});
          reply({{ id: request.id, result: {{ status: response ? response.status() : null }} }});
          break;
        }}
        case 'find': {{
          const handle = await page.$(request.params.selector);
          const element = handle
            ? await handle.evaluate((node) => ({{
                tag: node.tagName.toLowerCase(),
                textContent: node.textContent,
              }}))
            : null;
          reply({{ id: request.id, result: {{ element }} }});
          break;
        }}
        case 'exit': {{
          await browser.close();
          reply({{ id: request.id, result: null }}, () => process.exit(0));
          return;
        }}
        default:
          reply({{ id: request.id, error: 'unknown method: ' + request.method }});
      }}
    }} catch (error) {{
      reply({{ id: request.id, error: error.message }});
    }}
  }}
  await browser.close();
}})().catch((error) => {{
  reply({{ event: 'fatal', error: error.message }}, () => process.exit(1));
}});
"#,
        browser = config.browser.as_str(),
        headless = config.headless,
        width = config.viewport_width,
        height = config.viewport_height,
    )
}
