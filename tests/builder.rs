use url::Url;

use paystub_fetch::app::{App, Outcome, ProgressEvent, ProgressSink, Trigger};
use paystub_fetch::builder::QueueBuilder;
use paystub_fetch::domain::{Cursor, Stage};
use paystub_fetch::download::Downloader;
use paystub_fetch::error::FetchError;
use paystub_fetch::page::{HtmlPage, PageView};
use paystub_fetch::store::{MemoryKvStore, QueueStore};

const LISTING: &str = r#"
<html><body>
<table id="form:subfile">
  <tbody id="form:subfile:tb">
    <tr class="rich-table-row">
      <td>Regular</td><td>03/01/2024</td>
      <td><img src="thumb.gif" onclick="openImaging('ecms','/imaging/document/associationRedirect.faces?docId=101','PAY');return false;"></td>
    </tr>
    <tr class="rich-table-row">
      <td>Adjustment</td><td>pending</td>
      <td><img src="thumb.gif" onclick="openImaging('ecms','/imaging/document/associationRedirect.faces?docId=102','PAY');"></td>
    </tr>
    <tr class="rich-table-row">
      <td>Regular</td><td>03/15/2024</td>
      <td><img src="thumb.gif" onclick="openImaging('ecms','/imaging/document/associationRedirect.faces?docId=103','PAY');"></td>
    </tr>
  </tbody>
</table>
</body></html>"#;

struct Silent;

impl ProgressSink for Silent {
    fn event(&self, _event: ProgressEvent) {}
}

struct Unused;

impl Downloader for Unused {
    fn download(&self, _url: &Url, filename: &str) -> Result<camino::Utf8PathBuf, FetchError> {
        Err(FetchError::Download {
            filename: filename.to_string(),
            message: "not used".to_string(),
        })
    }
}

fn listing_page(html: &str) -> HtmlPage {
    HtmlPage::parse(
        Url::parse("http://10.100.82.83:10000/ecms/faces/payroll/paystubs.faces").unwrap(),
        html,
    )
}

#[test]
fn builds_queue_skipping_rows_without_date() {
    let page = listing_page(LISTING);
    let rows = page.listing_rows().unwrap();
    let report = QueueBuilder::default().build(page.url(), &rows);

    let names: Vec<_> = report
        .queue
        .items()
        .iter()
        .map(|item| item.filename.as_str())
        .collect();
    assert_eq!(names, ["03-01-2024.pdf", "03-15-2024.pdf"]);
    assert_eq!(
        report.queue.items()[0].target_url.as_str(),
        "http://10.100.82.83:10000/ecms/imaging/document/associationRedirect.faces?docId=101"
    );
    assert_eq!(report.skipped.len(), 1);
}

#[test]
fn start_persists_queue_and_navigates_to_first_item() {
    let app = App::new(QueueStore::new(MemoryKvStore::new()), Unused);
    let page = listing_page(LISTING);

    let report = app.activate(&page, Trigger::Start, &Silent).unwrap();

    assert_eq!(report.stage, Stage::Listing);
    let state = app.store().load_state();
    assert_eq!(state.queue.len(), 2);
    assert_eq!(state.cursor, Cursor::START);
    assert_eq!(
        report.outcome,
        Outcome::Navigate {
            url: state.queue.items()[0].target_url.clone()
        }
    );
}

#[test]
fn building_twice_is_idempotent_and_rewinds() {
    let app = App::new(QueueStore::new(MemoryKvStore::new()), Unused);
    let page = listing_page(LISTING);

    app.activate(&page, Trigger::Start, &Silent).unwrap();
    let first = app.store().load();
    app.store().save_cursor(Cursor::new(1)).unwrap();

    app.activate(&page, Trigger::Start, &Silent).unwrap();
    assert_eq!(app.store().load(), first);
    assert_eq!(app.store().load_cursor(), Cursor::START);
}

#[test]
fn listing_without_trigger_waits() {
    let app = App::new(QueueStore::new(MemoryKvStore::new()), Unused);
    let report = app
        .activate(&listing_page(LISTING), Trigger::Observe, &Silent)
        .unwrap();
    assert_eq!(report.outcome, Outcome::AwaitingTrigger);
    assert!(app.store().load().is_empty());
}

#[test]
fn empty_build_aborts_without_persisting() {
    let html = r#"<table><tbody class="rich-table-tbody">
        <tr class="rich-table-row"><td>no date</td><td><img onclick="openImaging('ecms','/x')"></td></tr>
        <tr class="rich-table-row"><td>04/01/2024</td><td>no image</td></tr>
    </tbody></table>"#;
    let app = App::new(QueueStore::new(MemoryKvStore::new()), Unused);
    app.store().save_cursor(Cursor::new(4)).unwrap();

    let report = app
        .activate(&listing_page(html), Trigger::Start, &Silent)
        .unwrap();

    assert!(matches!(report.outcome, Outcome::Aborted { .. }));
    assert!(matches!(report.outcome.failure(), Some(FetchError::EmptyQueue)));
    assert!(app.store().load().is_empty());
    assert_eq!(app.store().load_cursor(), Cursor::new(4));
}
