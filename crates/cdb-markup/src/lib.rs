//! Client for the markup translation service.
//!
//! The service converts between Discord markdown and ContentAPI markup; the
//! bridge treats both directions as opaque text-to-text transforms.

use async_trait::async_trait;

use cdb_core::ports::MarkupTranslator;
use cdb_core::{Error, Result};

const TO_REMOTE_ROUTE: &str = "discord2contentapi";
const TO_LOCAL_ROUTE: &str = "contentapi2discord";

#[derive(Clone)]
pub struct MarkupClient {
    domain: String,
    http: reqwest::Client,
}

impl MarkupClient {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn translate(&self, route: &str, query: &[(&str, &str)], text: &str) -> Result<String> {
        self.http
            .post(format!("http://{}/{route}", self.domain))
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(text.to_string())
            .send()
            .await
            .map_err(external)?
            .error_for_status()
            .map_err(external)?
            .text()
            .await
            .map_err(external)
    }
}

#[async_trait]
impl MarkupTranslator for MarkupClient {
    async fn to_remote(&self, text: &str) -> Result<String> {
        self.translate(TO_REMOTE_ROUTE, &[], text).await
    }

    async fn to_local(&self, text: &str, lang: &str) -> Result<String> {
        self.translate(TO_LOCAL_ROUTE, &[("lang", lang)], text).await
    }
}

fn external(e: reqwest::Error) -> Error {
    Error::External(format!("markup service request failed: {e}"))
}
