use url::Url;

use crate::domain::Stage;
use crate::page::PageView;

pub const DEFAULT_IMAGING_PREFIX: &str = "/ecms/imaging/document/";

const TRANSIT_MARKERS: &[&str] = &["associationRedirect.faces", "viewImageContent"];
const VIEWER_MARKER: &str = "viewImage.jsp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageClassifier {
    imaging_prefix: String,
}

impl Default for PageClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_IMAGING_PREFIX)
    }
}

impl PageClassifier {
    pub fn new(imaging_prefix: impl Into<String>) -> Self {
        Self {
            imaging_prefix: imaging_prefix.into(),
        }
    }

    /// Transit and viewer pages only count when there is queued work to resume;
    /// otherwise they are inert.
    pub fn classify(&self, page: &dyn PageView, has_active_work: bool) -> Stage {
        if page.listing_rows().is_some_and(|rows| !rows.is_empty()) {
            return Stage::Listing;
        }

        let stage = self.classify_url(page.url());
        match stage {
            Stage::RedirectTransit | Stage::FinalViewer if !has_active_work => Stage::Unrelated,
            other => other,
        }
    }

    /// The prefix is checked on the path; markers may appear anywhere in the URL.
    fn classify_url(&self, url: &Url) -> Stage {
        if !url.path().starts_with(&self.imaging_prefix) {
            return Stage::Unrelated;
        }
        let href = url.as_str();
        if TRANSIT_MARKERS.iter().any(|marker| href.contains(marker)) {
            Stage::RedirectTransit
        } else if href.contains(VIEWER_MARKER) {
            Stage::FinalViewer
        } else {
            Stage::Unrelated
        }
    }
}
