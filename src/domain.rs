use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::FetchError;

pub const DEFAULT_EXTENSION: &str = "pdf";

static STUB_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9]{2})/([0-9]{2})/([0-9]{4})$").expect("stub date regex")
});

/// One queued document retrieval: where to save it and where its redirect starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub filename: String,
    #[serde(alias = "assocUrl")]
    pub target_url: Url,
}

impl WorkItem {
    pub fn new(filename: impl Into<String>, target_url: Url) -> Self {
        Self {
            filename: filename.into(),
            target_url,
        }
    }
}

/// Ordered work list. Replaced wholesale, never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Queue(Vec<WorkItem>);

impl Queue {
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self(items)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, cursor: Cursor) -> Option<&WorkItem> {
        self.0.get(cursor.index())
    }

    pub fn first(&self) -> Option<&WorkItem> {
        self.0.first()
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.0
    }

    /// True when the cursor still points at an unprocessed item.
    pub fn is_active(&self, cursor: Cursor) -> bool {
        cursor.index() < self.len()
    }
}

/// Index of the next unprocessed item. Equal to the queue length once exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(usize);

impl Cursor {
    pub const START: Cursor = Cursor(0);

    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn advance(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pay date as printed in the listing table (`MM/DD/YYYY`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StubDate {
    month: String,
    day: String,
    year: String,
}

impl StubDate {
    pub fn filename(&self, extension: &str) -> String {
        format!("{}-{}-{}.{extension}", self.month, self.day, self.year)
    }
}

impl fmt::Display for StubDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.month, self.day, self.year)
    }
}

impl FromStr for StubDate {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let captures = STUB_DATE
            .captures(value.trim())
            .ok_or_else(|| FetchError::InvalidDate(value.to_string()))?;
        Ok(Self {
            month: captures[1].to_string(),
            day: captures[2].to_string(),
            year: captures[3].to_string(),
        })
    }
}

/// Workflow stage of the page an activation runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Listing,
    RedirectTransit,
    FinalViewer,
    Unrelated,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Listing => write!(f, "listing"),
            Stage::RedirectTransit => write!(f, "redirect-transit"),
            Stage::FinalViewer => write!(f, "final-viewer"),
            Stage::Unrelated => write!(f, "unrelated"),
        }
    }
}
