use std::io;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::{Client, RequestBuilder, Response};
use tracing::{debug, info};
use url::Url;

use crate::error::FetchError;
use crate::fs_util::{persist, temp_file_beside};

/// External capability that saves one document. Reports success or failure exactly once per call.
pub trait Downloader {
    fn download(&self, url: &Url, filename: &str) -> Result<Utf8PathBuf, FetchError>;
}

impl<T: Downloader + ?Sized> Downloader for &T {
    fn download(&self, url: &Url, filename: &str) -> Result<Utf8PathBuf, FetchError> {
        (**self).download(url, filename)
    }
}

#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
    output_dir: Utf8PathBuf,
}

impl HttpDownloader {
    /// Reuses the browsing client so the download carries the same session cookies.
    pub fn new(client: Client, output_dir: Utf8PathBuf) -> Self {
        Self { client, output_dir }
    }

    pub fn output_dir(&self) -> &Utf8Path {
        &self.output_dir
    }

    fn destination(&self, filename: &str) -> Result<Utf8PathBuf, FetchError> {
        let is_plain = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && !filename.contains(['/', '\\', ':']);
        if !is_plain {
            return Err(FetchError::Download {
                filename: filename.to_string(),
                message: "filename is not filesystem-safe".to_string(),
            });
        }
        Ok(self.output_dir.join(filename))
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &Url, filename: &str) -> Result<Utf8PathBuf, FetchError> {
        let destination = self.destination(filename)?;
        let failed = |message: String| FetchError::Download {
            filename: filename.to_string(),
            message,
        };

        let response = send_with_retries(|| self.client.get(url.clone()))
            .map_err(|err| failed(err.to_string()))?;
        let mut response = handle_status(response).map_err(|err| failed(err.to_string()))?;

        let mut temp = temp_file_beside(&destination)?;
        let bytes = io::copy(&mut response, temp.as_file_mut())
            .map_err(|err| failed(err.to_string()))?;
        persist(temp, &destination)?;

        info!(%filename, bytes, path = %destination, "downloaded");
        Ok(destination)
    }
}

pub(crate) fn handle_status(response: Response) -> Result<Response, FetchError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "imaging server request failed".to_string());
    Err(FetchError::HttpStatus { status, message })
}

pub(crate) fn send_with_retries<F>(mut make_req: F) -> Result<Response, FetchError>
where
    F: FnMut() -> RequestBuilder,
{
    const MAX_RETRIES: usize = 3;
    const BASE_DELAY_MS: u64 = 200;
    let mut attempt = 0usize;
    loop {
        match make_req().send() {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if attempt < MAX_RETRIES && is_retryable_status(status) {
                    debug!(status, attempt, "retrying request");
                    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Ok(resp);
            }
            Err(err) => {
                if attempt < MAX_RETRIES && is_retryable_error(&err) {
                    debug!(error = %err, attempt, "retrying request");
                    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                    attempt += 1;
                    continue;
                }
                return Err(FetchError::Http(err.to_string()));
            }
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}
