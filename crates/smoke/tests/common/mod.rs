//! In-memory stand-ins for the server and the browser

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hello_smoke::{BrowserDriver, Element, ProcessSupervisor, SmokeError, SmokeResult};

/// Ordered record of calls made against the fakes
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<&'static str>>>);

impl CallLog {
    pub fn push(&self, call: &'static str) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }
}

#[derive(Default)]
pub struct FakeServer {
    pub log: CallLog,
    pub fail_start: bool,
    pub fail_stop: bool,
}

#[async_trait]
impl ProcessSupervisor for FakeServer {
    async fn start(&mut self) -> SmokeResult<()> {
        self.log.push("start");
        if self.fail_start {
            return Err(SmokeError::ServerStartup("Server did not start".to_string()));
        }
        Ok(())
    }

    async fn stop(&mut self) -> SmokeResult<()> {
        self.log.push("stop");
        if self.fail_stop {
            return Err(SmokeError::Teardown("process ignored SIGTERM".to_string()));
        }
        Ok(())
    }
}

/// Browser over a flat list of rendered elements; selectors match tag names
#[derive(Default)]
pub struct FakeBrowser {
    pub log: CallLog,
    pub dom: Vec<Element>,
    pub fail_open: bool,
    pub fail_find: bool,
    pub fail_exit: bool,
    pub opened: Option<String>,
}

impl FakeBrowser {
    pub fn with_dom(log: CallLog, dom: Vec<Element>) -> Self {
        Self {
            log,
            dom,
            ..Default::default()
        }
    }
}

#[async_trait]
impl BrowserDriver for FakeBrowser {
    async fn open(&mut self, url: &str) -> SmokeResult<()> {
        self.log.push("open");
        if self.fail_open {
            return Err(SmokeError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".to_string(),
            });
        }
        self.opened = Some(url.to_string());
        Ok(())
    }

    async fn find(&mut self, selector: &str) -> SmokeResult<Option<Element>> {
        self.log.push("find");
        if self.fail_find {
            return Err(SmokeError::Driver("driver closed its output".to_string()));
        }
        Ok(self.dom.iter().find(|e| e.tag == selector).cloned())
    }

    async fn exit(&mut self) -> SmokeResult<()> {
        self.log.push("exit");
        if self.fail_exit {
            return Err(SmokeError::Teardown("browser exit: driver crashed".to_string()));
        }
        Ok(())
    }
}

pub fn hello_dom() -> Vec<Element> {
    vec![Element::new("h1", "Welcome"), Element::new("p", "Hello World!")]
}
