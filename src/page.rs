use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::FetchError;

static TABLE_BODY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tbody[id$='subfile:tb']").expect("table body selector"));
static TABLE_BODY_FALLBACK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tbody.rich-table-tbody").expect("fallback tbody selector"));
static TABLE_ROW: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("tr.rich-table-row").expect("row selector"));
static CELL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").expect("td selector"));
static IMAGING_THUMB: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("img[onclick*='openImaging']").expect("imaging thumbnail selector")
});
static ANY_IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").expect("img selector"));
static IMAGE_FRAME: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("iframe#imageIframe").expect("image iframe selector"));
static VIEWER_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href*='viewImage.jsp']").expect("viewer link selector"));

/// One table row as seen by the queue builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRow {
    pub cells: Vec<String>,
    /// Inline click handler of the row's thumbnail. `None` when the row has no image at all.
    pub action_handler: Option<String>,
}

/// Read-only view of the page an activation runs on.
pub trait PageView {
    fn url(&self) -> &Url;

    /// Rows of the paystub table, or `None` when the page has no such table.
    fn listing_rows(&self) -> Option<Vec<ListingRow>>;

    /// Looks for the terminal document link inside the viewer frame.
    /// `Err` means the frame could not be read on this attempt.
    fn viewer_link(&self) -> Result<Option<Url>, FetchError>;
}

/// Supplies the current content of a nested frame. Called once per extraction attempt.
pub trait FrameLoader {
    fn load_frame(&self, src: &Url) -> Result<String, FetchError>;
}

pub struct HtmlPage {
    url: Url,
    document: Html,
    frame: FrameContent,
}

enum FrameContent {
    None,
    Snapshot(Url, String),
    Live(Box<dyn FrameLoader>),
}

impl HtmlPage {
    pub fn parse(url: Url, html: &str) -> Self {
        Self {
            url,
            document: Html::parse_document(html),
            frame: FrameContent::None,
        }
    }

    /// A page whose viewer frame has already been captured.
    pub fn with_frame_snapshot(mut self, frame_url: Url, frame_html: impl Into<String>) -> Self {
        self.frame = FrameContent::Snapshot(frame_url, frame_html.into());
        self
    }

    /// A page whose viewer frame is re-read through `loader` on every attempt.
    pub fn with_frame_loader(mut self, loader: Box<dyn FrameLoader>) -> Self {
        self.frame = FrameContent::Live(loader);
        self
    }

    fn table_body(&self) -> Option<ElementRef<'_>> {
        self.document
            .select(&TABLE_BODY)
            .next()
            .or_else(|| self.document.select(&TABLE_BODY_FALLBACK).next())
    }

    fn frame_src(&self) -> Option<Result<Url, FetchError>> {
        let iframe = self.document.select(&IMAGE_FRAME).next()?;
        let src = iframe.value().attr("src").unwrap_or_default();
        Some(
            self.url
                .join(src)
                .map_err(|err| FetchError::InvalidUrl(format!("{src}: {err}"))),
        )
    }
}

impl PageView for HtmlPage {
    fn url(&self) -> &Url {
        &self.url
    }

    fn listing_rows(&self) -> Option<Vec<ListingRow>> {
        let body = self.table_body()?;
        let rows = body.select(&TABLE_ROW).map(read_row).collect();
        Some(rows)
    }

    fn viewer_link(&self) -> Result<Option<Url>, FetchError> {
        let Some(src) = self.frame_src() else {
            return Ok(None);
        };
        let src = src?;
        let (frame_url, html) = match &self.frame {
            FrameContent::None => {
                return Err(FetchError::FrameUnavailable(src.to_string()));
            }
            FrameContent::Snapshot(url, html) => (url.clone(), html.clone()),
            FrameContent::Live(loader) => {
                let html = loader.load_frame(&src)?;
                (src, html)
            }
        };
        find_viewer_link(&frame_url, &html)
    }
}

fn read_row(row: ElementRef<'_>) -> ListingRow {
    let cells = row
        .select(&CELL)
        .map(|cell| cell.text().collect::<String>().trim().to_string())
        .collect();
    let action_handler = row
        .select(&IMAGING_THUMB)
        .next()
        .or_else(|| row.select(&ANY_IMG).next())
        .map(|img| img.value().attr("onclick").unwrap_or_default().to_string());
    ListingRow {
        cells,
        action_handler,
    }
}

pub fn find_viewer_link(frame_url: &Url, html: &str) -> Result<Option<Url>, FetchError> {
    let document = Html::parse_document(html);
    let Some(href) = document
        .select(&VIEWER_LINK)
        .next()
        .and_then(|anchor| anchor.value().attr("href"))
    else {
        return Ok(None);
    };
    frame_url
        .join(href)
        .map(Some)
        .map_err(|err| FetchError::InvalidUrl(format!("{href}: {err}")))
}
