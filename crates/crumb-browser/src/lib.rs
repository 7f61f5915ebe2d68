//! Headless browser automation for cookie scanning.
//!
//! The scanner only talks to the traits in [`page`]. [`chromium`] backs them
//! with a real Chromium over CDP; [`fake`] backs them with scripted pages.

pub mod chromium;
pub mod error;
pub mod fake;
pub mod fingerprint;
pub mod page;

pub use chromium::{ChromiumLauncher, ChromiumPage, ChromiumSession};
pub use error::{BrowserError, Result};
pub use fake::{FakePage, ScriptedBrowser};
pub use fingerprint::{FingerprintConfig, STEALTH_SCRIPT};
pub use page::{extract_host, BrowserLauncher, BrowserSession, NetworkEvent, PageHandle, RawCookie};
