use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::app::{ActivationReport, App, DownloadRecord, Outcome, ProgressSink, Trigger};
use crate::download::{Downloader, handle_status, send_with_retries};
use crate::error::FetchError;
use crate::page::{FrameLoader, HtmlPage, PageView};
use crate::store::KvStore;

pub const DEFAULT_NAVIGATION_LIMIT: usize = 10_000;

/// Loads a URL as a fresh page. Every call stands for a full navigation.
pub trait Browser {
    fn open(&self, url: &Url) -> Result<Box<dyn PageView>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub cookie: Option<String>,
    pub timeout: Duration,
}

pub fn build_client(settings: &HttpSettings) -> Result<Client, FetchError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("paystub-fetch/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| FetchError::Http(err.to_string()))?,
    );
    if let Some(cookie) = settings.cookie.as_deref() {
        if !cookie.trim().is_empty() {
            let mut value = HeaderValue::from_str(cookie.trim())
                .map_err(|err| FetchError::Http(format!("invalid cookie header: {err}")))?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }
    }

    Client::builder()
        .default_headers(headers)
        .cookie_store(true)
        .timeout(settings.timeout)
        .build()
        .map_err(|err| FetchError::Http(err.to_string()))
}

#[derive(Clone)]
pub struct HttpBrowser {
    client: Client,
}

impl HttpBrowser {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Browser for HttpBrowser {
    fn open(&self, url: &Url) -> Result<Box<dyn PageView>, FetchError> {
        let response = send_with_retries(|| self.client.get(url.clone()))?;
        let response = handle_status(response)?;
        let final_url = response.url().clone();
        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.contains("html"))
            .unwrap_or(true);
        debug!(url = %final_url, is_html, "page loaded");

        if !is_html {
            return Ok(Box::new(HtmlPage::parse(final_url, "")));
        }
        let body = response
            .text()
            .map_err(|err| FetchError::Http(err.to_string()))?;
        let page = HtmlPage::parse(final_url, &body).with_frame_loader(Box::new(HttpFrameLoader {
            client: self.client.clone(),
        }));
        Ok(Box::new(page))
    }
}

struct HttpFrameLoader {
    client: Client,
}

impl FrameLoader for HttpFrameLoader {
    fn load_frame(&self, src: &Url) -> Result<String, FetchError> {
        let response = self
            .client
            .get(src.clone())
            .send()
            .map_err(|err| FetchError::FrameUnavailable(err.to_string()))?;
        let response = handle_status(response)?;
        response
            .text()
            .map_err(|err| FetchError::FrameUnavailable(err.to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub activations: Vec<ActivationReport>,
    pub downloads: Vec<DownloadRecord>,
    pub outcome: Outcome,
}

/// Replays navigations: each page gets its own activation, and only the store links them.
pub struct Session<'a, B: Browser, S: KvStore, D: Downloader> {
    browser: &'a B,
    app: &'a App<S, D>,
    navigation_limit: usize,
}

impl<'a, B: Browser, S: KvStore, D: Downloader> Session<'a, B, S, D> {
    pub fn new(browser: &'a B, app: &'a App<S, D>) -> Self {
        Self {
            browser,
            app,
            navigation_limit: DEFAULT_NAVIGATION_LIMIT,
        }
    }

    pub fn with_navigation_limit(mut self, limit: usize) -> Self {
        self.navigation_limit = limit.max(1);
        self
    }

    /// `trigger` applies to the first page only; the start control is pressed once.
    pub fn run(
        &self,
        start: &Url,
        trigger: Trigger,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, FetchError> {
        let mut url = start.clone();
        let mut trigger = trigger;
        let mut activations = Vec::new();
        let mut downloads = Vec::new();

        loop {
            if activations.len() >= self.navigation_limit {
                return Err(FetchError::NavigationLimit(self.navigation_limit));
            }
            let page = self.browser.open(&url)?;
            let report = self.app.activate(page.as_ref(), trigger, sink)?;
            trigger = Trigger::Observe;

            if let Some(record) = &report.download {
                downloads.push(record.clone());
            }
            let outcome = report.outcome.clone();
            activations.push(report);

            match outcome {
                Outcome::Navigate { url: next } => {
                    debug!(%next, "navigating");
                    url = next;
                }
                outcome => {
                    info!(
                        activations = activations.len(),
                        downloads = downloads.len(),
                        "session stopped"
                    );
                    return Ok(RunReport {
                        activations,
                        downloads,
                        outcome,
                    });
                }
            }
        }
    }
}
