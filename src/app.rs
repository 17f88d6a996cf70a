use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::builder::QueueBuilder;
use crate::classify::PageClassifier;
use crate::domain::{Cursor, Stage, WorkItem};
use crate::download::Downloader;
use crate::error::FetchError;
use crate::page::PageView;
use crate::poller::{PollOutcome, Poller};
use crate::store::{KvStore, PersistedState, QueueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A user-facing notice. Delivered synchronously so a human can step in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub level: NoticeLevel,
    pub message: String,
}

impl ProgressEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Whether the user pressed the start control for this activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    Observe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    AwaitingTrigger,
    Inert,
    Navigate {
        url: Url,
    },
    Completed {
        queue_len: usize,
    },
    Stuck {
        index: usize,
        filename: String,
        reason: String,
    },
    Aborted {
        reason: String,
    },
    AlreadyDownloading,
}

impl Outcome {
    /// Terminal outcomes that leave the queue unfinished, as errors.
    pub fn failure(&self) -> Option<FetchError> {
        match self {
            Outcome::Aborted { .. } => Some(FetchError::EmptyQueue),
            Outcome::Stuck {
                index,
                filename,
                reason,
            } => Some(FetchError::Stuck {
                index: *index,
                filename: filename.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadRecord {
    pub index: usize,
    pub filename: String,
    pub source_url: Url,
    pub path: String,
    pub downloaded_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub url: Url,
    pub stage: Stage,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub queue_len: usize,
    pub cursor: Cursor,
    pub active: bool,
    pub current: Option<WorkItem>,
    pub remaining: Vec<WorkItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkipResult {
    pub skipped: WorkItem,
    pub cursor: Cursor,
    pub next: Option<WorkItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: bool,
}

/// Long-lived collaborators shared by every activation.
pub struct App<S: KvStore, D: Downloader> {
    store: QueueStore<S>,
    downloader: D,
    classifier: PageClassifier,
    builder: QueueBuilder,
    poller: Poller,
}

impl<S: KvStore, D: Downloader> App<S, D> {
    pub fn new(store: QueueStore<S>, downloader: D) -> Self {
        Self {
            store,
            downloader,
            classifier: PageClassifier::default(),
            builder: QueueBuilder::default(),
            poller: Poller::default(),
        }
    }

    pub fn with_classifier(mut self, classifier: PageClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_builder(mut self, builder: QueueBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    pub fn store(&self) -> &QueueStore<S> {
        &self.store
    }

    /// Fresh per-page state. Nothing from a previous activation is carried over.
    pub fn activation(&self) -> Activation<'_, S, D> {
        Activation {
            app: self,
            downloading: false,
        }
    }

    pub fn activate(
        &self,
        page: &dyn PageView,
        trigger: Trigger,
        sink: &dyn ProgressSink,
    ) -> Result<ActivationReport, FetchError> {
        self.activation().run(page, trigger, sink)
    }

    pub fn status(&self) -> StatusResult {
        let state = self.store.load_state();
        let active = state.has_active_work();
        let current = state.queue.get(state.cursor).cloned();
        let remaining = state
            .queue
            .items()
            .iter()
            .skip(state.cursor.index())
            .cloned()
            .collect();
        StatusResult {
            queue_len: state.queue.len(),
            cursor: state.cursor,
            active,
            current,
            remaining,
        }
    }

    /// Operator escape hatch for an item stuck on a poll timeout or a failed download.
    pub fn skip_current(&self, sink: &dyn ProgressSink) -> Result<SkipResult, FetchError> {
        let state = self.store.load_state();
        let skipped = state
            .queue
            .get(state.cursor)
            .cloned()
            .ok_or(FetchError::NoActiveQueue)?;
        let cursor = state.cursor.advance();
        self.store.save_cursor(cursor)?;
        let next = state.queue.get(cursor).cloned();
        if next.is_none() {
            self.store.clear()?;
        }
        sink.event(ProgressEvent::warning(format!(
            "skipped {} ({} of {})",
            skipped.filename,
            cursor.index(),
            state.queue.len()
        )));
        Ok(SkipResult {
            skipped,
            cursor,
            next,
        })
    }

    pub fn clear(&self, sink: &dyn ProgressSink) -> Result<ClearResult, FetchError> {
        self.store.clear()?;
        self.store.save_cursor(Cursor::START)?;
        sink.event(ProgressEvent::info("cleared paystub queue"));
        Ok(ClearResult { cleared: true })
    }
}

/// One page load worth of work. Dropped when the page navigates away.
pub struct Activation<'a, S: KvStore, D: Downloader> {
    app: &'a App<S, D>,
    downloading: bool,
}

impl<S: KvStore, D: Downloader> Activation<'_, S, D> {
    pub fn run(
        &mut self,
        page: &dyn PageView,
        trigger: Trigger,
        sink: &dyn ProgressSink,
    ) -> Result<ActivationReport, FetchError> {
        let state = self.app.store.load_state();
        let stage = self.app.classifier.classify(page, state.has_active_work());
        debug!(
            url = %page.url(),
            %stage,
            queue_len = state.queue.len(),
            cursor = %state.cursor,
            "activation"
        );

        let mut download = None;
        let outcome = match stage {
            Stage::Listing => match trigger {
                Trigger::Start => self.start(page, sink)?,
                Trigger::Observe => Outcome::AwaitingTrigger,
            },
            Stage::RedirectTransit => self.follow_redirect(page, &state, sink),
            Stage::FinalViewer => {
                let (outcome, record) = self.download_current(page, &state, sink)?;
                download = record;
                outcome
            }
            Stage::Unrelated => {
                debug!("no active queue for this page");
                Outcome::Inert
            }
        };

        Ok(ActivationReport {
            url: page.url().clone(),
            stage,
            outcome,
            download,
        })
    }

    /// The only transition that creates state: build, persist, rewind, go.
    pub fn start(
        &mut self,
        page: &dyn PageView,
        sink: &dyn ProgressSink,
    ) -> Result<Outcome, FetchError> {
        let rows = page.listing_rows().unwrap_or_default();
        info!(rows = rows.len(), "found paystub rows");
        let report = self.app.builder.build(page.url(), &rows);

        let Some(first) = report.queue.first().cloned() else {
            let reason = FetchError::EmptyQueue.to_string();
            sink.event(ProgressEvent::error(reason.clone()));
            return Ok(Outcome::Aborted { reason });
        };

        self.app.store.begin(&report.queue)?;
        info!(len = report.queue.len(), "queue stored");
        sink.event(ProgressEvent::info(format!(
            "Starting auto-download for {} paystubs",
            report.queue.len()
        )));
        Ok(Outcome::Navigate {
            url: first.target_url,
        })
    }

    pub fn follow_redirect(
        &self,
        page: &dyn PageView,
        state: &PersistedState,
        sink: &dyn ProgressSink,
    ) -> Outcome {
        let Some(current) = state.queue.get(state.cursor) else {
            debug!("no active queue");
            return Outcome::Inert;
        };
        info!(
            index = state.cursor.index(),
            len = state.queue.len(),
            filename = %current.filename,
            "waiting for viewer frame"
        );

        match self.app.poller.poll(|| page.viewer_link()) {
            PollOutcome::Found { value, attempts } => {
                info!(link = %value, attempts, "found document link, redirecting");
                Outcome::Navigate { url: value }
            }
            PollOutcome::NotFound { attempts } => {
                let reason = FetchError::PollTimeout { attempts }.to_string();
                warn!(filename = %current.filename, "{reason}");
                sink.event(ProgressEvent::warning(format!(
                    "could not find the document link for {}: {reason}",
                    current.filename
                )));
                Outcome::Stuck {
                    index: state.cursor.index(),
                    filename: current.filename.clone(),
                    reason,
                }
            }
        }
    }

    /// Downloads the current item at most once per activation, then advances or finishes.
    pub fn download_current(
        &mut self,
        page: &dyn PageView,
        state: &PersistedState,
        sink: &dyn ProgressSink,
    ) -> Result<(Outcome, Option<DownloadRecord>), FetchError> {
        if self.downloading {
            return Ok((Outcome::AlreadyDownloading, None));
        }
        let Some(current) = state.queue.get(state.cursor) else {
            debug!("no active queue");
            return Ok((Outcome::Inert, None));
        };
        self.downloading = true;

        info!(filename = %current.filename, "starting download");
        let path = match self.app.downloader.download(page.url(), &current.filename) {
            Ok(path) => path,
            Err(err) => {
                warn!(error = %err, "download failed");
                sink.event(ProgressEvent::error(format!(
                    "error downloading {}",
                    current.filename
                )));
                let outcome = Outcome::Stuck {
                    index: state.cursor.index(),
                    filename: current.filename.clone(),
                    reason: err.to_string(),
                };
                return Ok((outcome, None));
            }
        };
        let record = download_record(state.cursor, current, page.url(), path);

        let next = state.cursor.advance();
        self.app.store.save_cursor(next)?;

        let outcome = match state.queue.get(next) {
            Some(item) => {
                info!(next = %item.filename, "moving to next");
                Outcome::Navigate {
                    url: item.target_url.clone(),
                }
            }
            None => {
                self.app.store.clear()?;
                info!("finished all downloads");
                sink.event(ProgressEvent::info("all paystubs downloaded"));
                Outcome::Completed {
                    queue_len: state.queue.len(),
                }
            }
        };
        Ok((outcome, Some(record)))
    }
}

fn download_record(
    cursor: Cursor,
    item: &WorkItem,
    source_url: &Url,
    path: Utf8PathBuf,
) -> DownloadRecord {
    DownloadRecord {
        index: cursor.index(),
        filename: item.filename.clone(),
        source_url: source_url.clone(),
        path: path.to_string(),
        downloaded_at: chrono::Utc::now().to_rfc3339(),
    }
}
