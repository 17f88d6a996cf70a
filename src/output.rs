use std::io::{self, Write};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::app::{
    ClearResult, NoticeLevel, Outcome, ProgressEvent, ProgressSink, SkipResult, StatusResult,
};
use crate::session::RunReport;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_skip(result: &SkipResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_clear(result: &ClearResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Notices go to the log so stdout stays pure JSON.
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        match event.level {
            NoticeLevel::Info => info!("{}", event.message),
            NoticeLevel::Warning => warn!("{}", event.message),
            NoticeLevel::Error => error!("{}", event.message),
        }
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub struct ConsoleOutput;

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        let color = match event.level {
            NoticeLevel::Info => CYAN,
            NoticeLevel::Warning => YELLOW,
            NoticeLevel::Error => RED,
        };
        eprintln!("{color}{}{RESET}", event.message);
    }
}

impl ConsoleOutput {
    pub fn print_run(result: &RunReport) {
        println!("{CYAN}paystub-fetch summary{RESET}");
        println!("{GREEN}downloaded: {}{RESET}", result.downloads.len());
        for record in &result.downloads {
            println!("{GREEN}  {} -> {}{RESET}", record.filename, record.path);
        }
        match &result.outcome {
            Outcome::Completed { queue_len } => {
                println!("{GREEN}queue finished ({queue_len} paystubs queued){RESET}");
            }
            Outcome::Stuck {
                index,
                filename,
                reason,
            } => {
                println!("{RED}stuck on item {index} ({filename}): {reason}{RESET}");
            }
            Outcome::Aborted { reason } => println!("{RED}aborted: {reason}{RESET}"),
            Outcome::AwaitingTrigger => {
                println!("{YELLOW}listing page found; run `paystub-fetch start` to begin{RESET}");
            }
            Outcome::Inert => println!("{YELLOW}nothing to do on this page{RESET}"),
            Outcome::AlreadyDownloading | Outcome::Navigate { .. } => {}
        }
    }

    pub fn print_status(result: &StatusResult) {
        if !result.active {
            println!("{YELLOW}no active queue{RESET}");
            return;
        }
        println!(
            "{CYAN}item {} of {}{RESET}",
            result.cursor.index() + 1,
            result.queue_len
        );
        for (offset, item) in result.remaining.iter().enumerate() {
            let marker = if offset == 0 { ">" } else { " " };
            println!("{marker} {} {}", item.filename, item.target_url);
        }
    }

    pub fn print_skip(result: &SkipResult) {
        println!("{YELLOW}skipped {}{RESET}", result.skipped.filename);
        match &result.next {
            Some(next) => println!("{CYAN}next: {}{RESET}", next.filename),
            None => println!("{GREEN}queue exhausted{RESET}"),
        }
    }
}
