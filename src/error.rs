use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("row {row} skipped: {reason}")]
    ScrapeRow { row: usize, reason: String },

    #[error("invalid paystub date: {0}")]
    InvalidDate(String),

    #[error("stored queue could not be decoded: {0}")]
    ParseState(String),

    #[error("document link did not appear after {attempts} attempts")]
    #[diagnostic(help("reload the viewer with `paystub-fetch resume` once the imaging server responds"))]
    PollTimeout { attempts: u32 },

    #[error("download of {filename} failed: {message}")]
    Download { filename: String, message: String },

    #[error("imaging server request failed: {0}")]
    Http(String),

    #[error("imaging server returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("viewer frame not readable yet: {0}")]
    FrameUnavailable(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("no start URL given and none configured in paystub-fetch.json")]
    MissingStartUrl,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no paystubs queued, check the table structure")]
    EmptyQueue,

    #[error("no active queue")]
    NoActiveQueue,

    #[error("stuck on item {index} ({filename}): {reason}")]
    #[diagnostic(help("reload with `paystub-fetch resume` or move on with `paystub-fetch skip`"))]
    Stuck {
        index: usize,
        filename: String,
        reason: String,
    },

    #[error("stopped after {0} navigations without finishing")]
    NavigationLimit(usize),
}
