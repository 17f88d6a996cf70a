use std::cell::Cell;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use url::Url;

use paystub_fetch::app::{App, Outcome, ProgressEvent, ProgressSink, Trigger};
use paystub_fetch::domain::Cursor;
use paystub_fetch::download::Downloader;
use paystub_fetch::error::FetchError;
use paystub_fetch::page::{FrameLoader, HtmlPage, PageView};
use paystub_fetch::poller::Poller;
use paystub_fetch::session::{Browser, Session};
use paystub_fetch::store::{MemoryKvStore, QueueStore};

const ORIGIN: &str = "http://ecms.test:10000";

struct Silent;

impl ProgressSink for Silent {
    fn event(&self, _event: ProgressEvent) {}
}

/// Listing page with `stubs` rows; every viewer frame needs `frame_delay` misses before it loads.
struct FakeImagingSite {
    stubs: usize,
    frame_delay: u32,
    broken_frames: HashSet<usize>,
    opened: Mutex<Vec<Url>>,
}

impl FakeImagingSite {
    fn new(stubs: usize, frame_delay: u32) -> Self {
        Self {
            stubs,
            frame_delay,
            broken_frames: HashSet::new(),
            opened: Mutex::new(Vec::new()),
        }
    }

    fn listing_url() -> Url {
        Url::parse(&format!("{ORIGIN}/ecms/faces/payroll/paystubs.faces")).unwrap()
    }

    fn listing_html(&self) -> String {
        let rows: String = (1..=self.stubs)
            .map(|n| {
                format!(
                    r#"<tr class="rich-table-row"><td>Regular</td><td>01/{n:02}/2024</td>
                    <td><img onclick="openImaging('ecms','/imaging/document/associationRedirect.faces?docId={n}','PAY')"></td></tr>"#
                )
            })
            .collect();
        format!(r#"<table><tbody id="form:subfile:tb">{rows}</tbody></table>"#)
    }

    fn doc_id(url: &Url) -> usize {
        url.query_pairs()
            .find(|(key, _)| key == "docId" || key == "doc")
            .and_then(|(_, value)| value.parse().ok())
            .unwrap_or(0)
    }
}

struct DelayedFrame {
    doc: usize,
    misses: Cell<u32>,
    broken: bool,
}

impl FrameLoader for DelayedFrame {
    fn load_frame(&self, _src: &Url) -> Result<String, FetchError> {
        if self.broken {
            return Ok("<p>Document unavailable</p>".to_string());
        }
        if self.misses.get() > 0 {
            self.misses.set(self.misses.get() - 1);
            return Err(FetchError::FrameUnavailable("cross-frame access denied".to_string()));
        }
        Ok(format!(
            r#"<a href="viewImage.jsp?doc={}">open</a>"#,
            self.doc
        ))
    }
}

impl Browser for FakeImagingSite {
    fn open(&self, url: &Url) -> Result<Box<dyn PageView>, FetchError> {
        self.opened.lock().unwrap().push(url.clone());
        let path = url.path();
        if path.ends_with("paystubs.faces") {
            return Ok(Box::new(HtmlPage::parse(url.clone(), &self.listing_html())));
        }
        if path.ends_with("associationRedirect.faces") {
            let doc = Self::doc_id(url);
            let page = HtmlPage::parse(
                url.clone(),
                &format!(r#"<iframe id="imageIframe" src="viewImageContent.faces?docId={doc}"></iframe>"#),
            )
            .with_frame_loader(Box::new(DelayedFrame {
                doc,
                misses: Cell::new(self.frame_delay),
                broken: self.broken_frames.contains(&doc),
            }));
            return Ok(Box::new(page));
        }
        Ok(Box::new(HtmlPage::parse(url.clone(), "")))
    }
}

#[derive(Default)]
struct MockDownloader {
    saved: Mutex<Vec<(usize, String)>>,
    fail_once: Mutex<Option<String>>,
}

impl Downloader for MockDownloader {
    fn download(&self, url: &Url, filename: &str) -> Result<Utf8PathBuf, FetchError> {
        let mut fail_once = self.fail_once.lock().unwrap();
        if fail_once.as_deref() == Some(filename) {
            *fail_once = None;
            return Err(FetchError::Download {
                filename: filename.to_string(),
                message: "503".to_string(),
            });
        }
        self.saved
            .lock()
            .unwrap()
            .push((FakeImagingSite::doc_id(url), filename.to_string()));
        Ok(Utf8PathBuf::from(filename))
    }
}

fn app(downloader: &MockDownloader) -> App<MemoryKvStore, &MockDownloader> {
    App::new(QueueStore::new(MemoryKvStore::new()), downloader)
        .with_poller(Poller::new(Duration::ZERO, 10))
}

#[test]
fn downloads_every_stub_exactly_once() {
    let site = FakeImagingSite::new(4, 2);
    let downloader = MockDownloader::default();
    let app = app(&downloader);

    let report = Session::new(&site, &app)
        .run(&FakeImagingSite::listing_url(), Trigger::Start, &Silent)
        .unwrap();

    assert_eq!(report.outcome, Outcome::Completed { queue_len: 4 });
    assert_eq!(report.downloads.len(), 4);
    // listing + (transit + viewer) per stub
    assert_eq!(report.activations.len(), 1 + 2 * 4);

    let saved = downloader.saved.lock().unwrap();
    let expected: Vec<_> = (1..=4).map(|n| (n, format!("01-{n:02}-2024.pdf"))).collect();
    assert_eq!(*saved, expected);
    assert!(app.store().load().is_empty());
    assert_eq!(app.store().load_cursor(), Cursor::new(4));
}

#[test]
fn listing_without_trigger_does_nothing() {
    let site = FakeImagingSite::new(2, 0);
    let downloader = MockDownloader::default();
    let app = app(&downloader);

    let report = Session::new(&site, &app)
        .run(&FakeImagingSite::listing_url(), Trigger::Observe, &Silent)
        .unwrap();

    assert_eq!(report.outcome, Outcome::AwaitingTrigger);
    assert_eq!(report.activations.len(), 1);
    assert!(app.store().load().is_empty());
}

#[test]
fn stuck_item_resumes_after_reload() {
    let site = FakeImagingSite::new(3, 0);
    let downloader = MockDownloader::default();
    *downloader.fail_once.lock().unwrap() = Some("01-02-2024.pdf".to_string());
    let app = app(&downloader);

    let first = Session::new(&site, &app)
        .run(&FakeImagingSite::listing_url(), Trigger::Start, &Silent)
        .unwrap();
    assert_matches!(first.outcome, Outcome::Stuck { index: 1, .. });
    assert_matches!(
        first.outcome.failure(),
        Some(FetchError::Stuck { index: 1, ref filename, .. }) if filename == "01-02-2024.pdf"
    );
    assert_eq!(first.downloads.len(), 1);
    assert_eq!(app.store().load_cursor(), Cursor::new(1));

    let retry_from = app.status().current.unwrap().target_url;
    let second = Session::new(&site, &app)
        .run(&retry_from, Trigger::Observe, &Silent)
        .unwrap();

    assert_eq!(second.outcome, Outcome::Completed { queue_len: 3 });
    assert!(second.outcome.failure().is_none());
    let saved = downloader.saved.lock().unwrap();
    let names: Vec<_> = saved.iter().map(|(_, name)| name.as_str()).collect();
    assert_eq!(names, ["01-01-2024.pdf", "01-02-2024.pdf", "01-03-2024.pdf"]);
}

#[test]
fn poll_timeout_stops_the_session_without_advancing() {
    let mut site = FakeImagingSite::new(3, 0);
    site.broken_frames.insert(2);
    let downloader = MockDownloader::default();
    let app = app(&downloader);

    let report = Session::new(&site, &app)
        .run(&FakeImagingSite::listing_url(), Trigger::Start, &Silent)
        .unwrap();

    assert_matches!(report.outcome, Outcome::Stuck { index: 1, .. });
    assert_eq!(downloader.saved.lock().unwrap().len(), 1);
    assert_eq!(app.store().load_cursor(), Cursor::new(1));
    assert_eq!(app.store().load().len(), 3);
}

#[test]
fn navigation_limit_is_enforced() {
    let site = FakeImagingSite::new(3, 0);
    let downloader = MockDownloader::default();
    let app = app(&downloader);

    let err = Session::new(&site, &app)
        .with_navigation_limit(2)
        .run(&FakeImagingSite::listing_url(), Trigger::Start, &Silent)
        .unwrap_err();

    assert_matches!(err, FetchError::NavigationLimit(2));
}

#[test]
fn unrelated_start_page_is_inert() {
    let site = FakeImagingSite::new(1, 0);
    let downloader = MockDownloader::default();
    let app = app(&downloader);
    let url = Url::parse(&format!("{ORIGIN}/ecms/imaging/document/viewImage.jsp?doc=1")).unwrap();

    let report = Session::new(&site, &app)
        .run(&url, Trigger::Observe, &Silent)
        .unwrap();

    assert_eq!(report.outcome, Outcome::Inert);
    assert!(downloader.saved.lock().unwrap().is_empty());
    assert_eq!(site.opened.lock().unwrap().len(), 1);
}
