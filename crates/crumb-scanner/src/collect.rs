//! Merges per-page reports into scan-wide findings.

use crate::inspector::PageReport;
use crumb_core::model::{CookieSource, Findings, ObservedCookie, ScanMetadata, UrlError};
use std::collections::{HashMap, HashSet};

fn cookie_key(cookie: &ObservedCookie) -> (String, String, String) {
    (
        cookie.name.clone(),
        cookie.domain.trim_start_matches('.').to_ascii_lowercase(),
        cookie.path.clone(),
    )
}

/// Accumulates page reports in arrival order.
///
/// Cookies are unique per name, domain and path; a jar observation replaces
/// an earlier header observation of the same cookie. Scripts, trackers,
/// iframes and forms are deduplicated, and the first CMP and TCF data seen
/// are kept.
#[derive(Debug, Default)]
pub struct FindingsBuilder {
    findings: Findings,
    cookie_index: HashMap<(String, String, String), usize>,
    seen_scripts: HashSet<String>,
    seen_trackers: HashSet<String>,
    seen_iframes: HashSet<String>,
    seen_forms: HashSet<(Option<String>, String)>,
    urls_scanned: u32,
}

impl FindingsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_page(&mut self, report: PageReport) {
        self.urls_scanned += 1;
        let findings = &mut self.findings;

        for cookie in report.cookies {
            let key = cookie_key(&cookie);
            match self.cookie_index.get(&key) {
                Some(&idx) => {
                    let existing = &mut findings.cookies[idx];
                    if existing.source == CookieSource::Header && cookie.source == CookieSource::Jar {
                        *existing = cookie;
                    }
                }
                None => {
                    self.cookie_index.insert(key, findings.cookies.len());
                    findings.cookies.push(cookie);
                }
            }
        }

        for script in report.scripts {
            let identity = crumb_classify::script::identity(script.src.as_deref(), None);
            // Inline scripts have no stable identity across pages
            if script.inline || self.seen_scripts.insert(identity) {
                findings.scripts.push(script);
            }
        }

        for tracker in report.trackers {
            if self.seen_trackers.insert(tracker.url.clone()) {
                findings.trackers.push(tracker);
            }
        }

        findings.storage.merge(report.storage);

        for iframe in report.iframes {
            if self.seen_iframes.insert(iframe.src.clone()) {
                findings.iframes.push(iframe);
            }
        }

        for form in report.forms {
            if self
                .seen_forms
                .insert((form.action.clone(), form.method.clone()))
            {
                findings.forms.push(form);
            }
        }

        if findings.cmp_data.is_none() {
            findings.cmp_data = report.cmp;
        }
        if findings.tcf_data.is_none() {
            findings.tcf_data = report.tcf;
        }
    }

    pub fn add_error(&mut self, error: UrlError) {
        self.findings.metadata.errors.push(error);
    }

    /// Mark the CMP as accepted when the consent click landed on any page.
    pub fn set_consent_accepted(&mut self, accepted: bool) {
        if let Some(cmp) = self.findings.cmp_data.as_mut() {
            cmp.consent_accepted |= accepted;
        }
    }

    #[must_use]
    pub fn cookies(&self) -> &[ObservedCookie] {
        &self.findings.cookies
    }

    #[must_use]
    pub fn finish(mut self) -> Findings {
        self.findings.metadata = ScanMetadata {
            urls_scanned: self.urls_scanned,
            errors: std::mem::take(&mut self.findings.metadata.errors),
        };
        self.findings
    }
}
