pub mod app;
pub mod builder;
pub mod classify;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod fs_util;
pub mod output;
pub mod page;
pub mod poller;
pub mod session;
pub mod store;
