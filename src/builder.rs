use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::domain::{DEFAULT_EXTENSION, Queue, StubDate, WorkItem};
use crate::error::FetchError;
use crate::page::ListingRow;

static OPEN_IMAGING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"openImaging\('([^']+)','([^']+)'").expect("openImaging handler regex")
});

/// Redirect entry point encoded in a row's click handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub context: String,
    pub path: String,
}

impl RedirectTarget {
    pub fn parse(handler: &str) -> Option<Self> {
        let captures = OPEN_IMAGING.captures(handler)?;
        Some(Self {
            context: captures[1].to_string(),
            path: captures[2].to_string(),
        })
    }

    /// `<origin>/<context><path>`, always absolute.
    pub fn absolute_url(&self, page_url: &Url) -> Result<Url, FetchError> {
        let origin = page_url.origin().ascii_serialization();
        let raw = format!("{origin}/{}{}", self.context, self.path);
        Url::parse(&raw).map_err(|err| FetchError::InvalidUrl(format!("{raw}: {err}")))
    }
}

#[derive(Debug, Default, Serialize)]
pub struct BuildReport {
    pub queue: Queue,
    #[serde(serialize_with = "serialize_errors")]
    pub skipped: Vec<FetchError>,
}

fn serialize_errors<S: serde::Serializer>(
    errors: &[FetchError],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(|err| err.to_string()))
}

#[derive(Debug, Clone)]
pub struct QueueBuilder {
    extension: String,
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSION)
    }
}

impl QueueBuilder {
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    /// Turns table rows into work items in document order. Bad rows are skipped, never fatal.
    pub fn build(&self, page_url: &Url, rows: &[ListingRow]) -> BuildReport {
        let mut items = Vec::new();
        let mut skipped = Vec::new();

        for (row, cells) in rows.iter().enumerate() {
            match self.build_item(page_url, row, cells) {
                Ok(item) => {
                    info!(filename = %item.filename, target = %item.target_url, "queued");
                    items.push(item);
                }
                Err(err) => {
                    warn!("{err}");
                    skipped.push(err);
                }
            }
        }

        BuildReport {
            queue: Queue::new(items),
            skipped,
        }
    }

    fn build_item(
        &self,
        page_url: &Url,
        row: usize,
        listing_row: &ListingRow,
    ) -> Result<WorkItem, FetchError> {
        let skip = |reason: String| FetchError::ScrapeRow { row, reason };

        let date = listing_row
            .cells
            .iter()
            .find_map(|cell| cell.parse::<StubDate>().ok())
            .ok_or_else(|| skip("no MM/DD/YYYY date cell".to_string()))?;
        let filename = date.filename(&self.extension);

        let handler = listing_row
            .action_handler
            .as_deref()
            .ok_or_else(|| skip(format!("no thumbnail/openImaging image for {filename}")))?;
        let target = RedirectTarget::parse(handler)
            .ok_or_else(|| skip(format!("could not parse openImaging for {filename}: {handler}")))?;
        let target_url = target
            .absolute_url(page_url)
            .map_err(|err| skip(err.to_string()))?;

        Ok(WorkItem::new(filename, target_url))
    }
}
