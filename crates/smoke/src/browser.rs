//! Browser driver seam used by the smoke runner

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SmokeResult;

/// Snapshot of a DOM node returned by [`BrowserDriver::find`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    /// Lower-case tag name
    pub tag: String,

    /// The node's `textContent`, verbatim
    pub text_content: String,
}

impl Element {
    pub fn new(tag: impl Into<String>, text_content: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text_content: text_content.into(),
        }
    }
}

/// A headless browser session
#[async_trait]
pub trait BrowserDriver: Send {
    /// Navigate to `url` and wait for the load event
    async fn open(&mut self, url: &str) -> SmokeResult<()>;

    /// First node matching `selector`, or `None`
    async fn find(&mut self, selector: &str) -> SmokeResult<Option<Element>>;

    /// Close the session and wait until the browser is gone
    async fn exit(&mut self) -> SmokeResult<()>;
}
