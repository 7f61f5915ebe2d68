//! Consent banners, CMP detection and TCF consent data.

use crumb_browser::PageHandle;
use crumb_core::model::{CmpData, TcfData};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

/// Known "accept" buttons, most specific first.
pub const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-accept-btn-handler",
    "#accept-recommended-btn-handler",
    "#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll",
    "#CybotCookiebotDialogBodyButtonAccept",
    "#didomi-notice-agree-button",
    ".qc-cmp2-summary-buttons button[mode='primary']",
    "#truste-consent-button",
    ".cky-btn-accept",
    ".cmplz-accept",
    "[data-testid='uc-accept-all-button']",
    "#cookie_action_close_header",
    ".cc-allow",
    ".cc-accept",
    ".js-accept-cookies",
    "#accept-cookies",
    "#acceptCookies",
    "button[aria-label*='Accept']",
];

/// Button captions accepted by the text fallback, compared lowercased.
pub const ACCEPT_PHRASES: &[&str] = &[
    "accept all",
    "accept all cookies",
    "accept cookies",
    "allow all",
    "allow cookies",
    "i agree",
    "agree",
    "accept",
    "got it",
    "aceptar todo",
    "aceptar todas",
    "aceptar",
    "acepto",
    "tout accepter",
    "accepter",
    "alle akzeptieren",
    "akzeptieren",
    "accetta tutto",
    "accetta",
    "aceitar",
];

/// Global variables that reveal a consent management platform, in probe order.
pub const CMP_SIGNATURES: &[(&str, &str)] = &[
    ("OneTrust", "OneTrust"),
    ("OneTrust", "OptanonWrapper"),
    ("Cookiebot", "Cookiebot"),
    ("Didomi", "Didomi"),
    ("Usercentrics", "UC_UI"),
    ("TrustArc", "truste"),
    ("Quantcast Choice", "__uspapi"),
    ("Osano", "Osano"),
    ("Iubenda", "_iub"),
    ("Complianz", "complianz"),
    ("CookieYes", "getCkyConsent"),
    ("Klaro", "klaro"),
    ("Sourcepoint", "_sp_"),
    ("Termly", "Termly"),
    ("CookieScript", "CookieScript"),
    ("Borlabs Cookie", "BorlabsCookie"),
    ("IAB TCF", "__tcfapi"),
];

/// Purposes that must rest on explicit consent rather than legitimate interest.
pub const RESTRICTED_PURPOSES: std::ops::RangeInclusive<u32> = 3..=6;

/// How long the page gets to answer a TCF query.
pub const TCF_TIMEOUT: Duration = Duration::from_secs(2);

fn json_list(items: &[&str]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

static CONSENT_SCRIPT: Lazy<String> = Lazy::new(|| {
    format!(
        r"/*crumb:consent*/ (() => {{
  const visible = (el) => !!(el && (el.offsetWidth || el.offsetHeight || el.getClientRects().length));
  const selectors = {selectors};
  for (const selector of selectors) {{
    let el = null;
    try {{ el = document.querySelector(selector); }} catch (e) {{ continue; }}
    if (visible(el)) {{ el.click(); return {{ clicked: true, method: 'selector', target: selector }}; }}
  }}
  const phrases = {phrases};
  const candidates = document.querySelectorAll('button, [role=button], a, input[type=button], input[type=submit]');
  for (const el of candidates) {{
    const text = (el.innerText || el.value || '').trim().toLowerCase();
    if (!text || text.length > 40 || !visible(el)) continue;
    if (phrases.some((p) => text === p || text.startsWith(p + ' '))) {{
      el.click();
      return {{ clicked: true, method: 'text', target: text }};
    }}
  }}
  return {{ clicked: false }};
}})()",
        selectors = json_list(CONSENT_SELECTORS),
        phrases = json_list(ACCEPT_PHRASES),
    )
});

static CMP_SCRIPT: Lazy<String> = Lazy::new(|| {
    let signatures: Vec<[&str; 2]> = CMP_SIGNATURES.iter().map(|(n, g)| [*n, *g]).collect();
    format!(
        r"/*crumb:cmp*/ (() => {{
  const signatures = {signatures};
  for (const [name, global] of signatures) {{
    if (typeof window[global] === 'undefined') continue;
    let version = null;
    try {{
      const g = window[global];
      const v = g && (g.version || g.VERSION);
      if (v) version = String(v);
    }} catch (e) {{}}
    return {{ name, global, version }};
  }}
  return null;
}})()",
        signatures = serde_json::to_string(&signatures).unwrap_or_else(|_| "[]".to_string()),
    )
});

static TCF_SCRIPT: Lazy<String> = Lazy::new(|| {
    format!(
        r"/*crumb:tcf*/ new Promise((resolve) => {{
  const shape = (d) => d ? {{
    tcString: d.tcString || null,
    gdprApplies: typeof d.gdprApplies === 'boolean' ? d.gdprApplies : null,
    cmpId: d.cmpId || null,
    cmpVersion: d.cmpVersion || null,
    purpose: d.purpose || null
  }} : null;
  const viaGetter = () => {{
    let out = null;
    try {{ window.__tcfapi('getTCData', 2, (d, ok) => {{ if (ok) out = d; }}); }} catch (e) {{}}
    return shape(out);
  }};
  if (typeof window.__tcfapi !== 'function') {{ resolve(null); return; }}
  let settled = false;
  const finish = (v) => {{ if (!settled) {{ settled = true; resolve(v); }} }};
  setTimeout(() => finish(viaGetter()), {timeout});
  try {{
    window.__tcfapi('addEventListener', 2, (d, ok) => {{
      if (ok && d && (d.eventStatus === 'tcloaded' || d.eventStatus === 'useractioncomplete')) {{
        try {{ window.__tcfapi('removeEventListener', 2, () => {{}}, d.listenerId); }} catch (e) {{}}
        finish(shape(d));
      }}
    }});
  }} catch (e) {{
    finish(viaGetter());
  }}
}})",
        timeout = TCF_TIMEOUT.as_millis(),
    )
});

/// Outcome of the automatic consent click.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConsentAttempt {
    #[serde(default)]
    pub clicked: bool,
    /// `selector` or `text`
    pub method: Option<String>,
    pub target: Option<String>,
}

/// Try to accept the consent banner on `page`.
pub async fn accept(page: &dyn PageHandle) -> ConsentAttempt {
    match page.evaluate(&CONSENT_SCRIPT).await {
        Ok(Value::Null) => ConsentAttempt::default(),
        Ok(value) => serde_json::from_value(value).unwrap_or_default(),
        Err(e) => {
            debug!(url = page.url(), error = %e, "Consent script failed");
            ConsentAttempt::default()
        }
    }
}

#[derive(Deserialize)]
struct CmpProbe {
    name: String,
    global: String,
    version: Option<String>,
}

/// The first CMP whose global is defined on `page`.
pub async fn detect_cmp(page: &dyn PageHandle) -> Option<CmpData> {
    let value = page.evaluate(&CMP_SCRIPT).await.ok()?;
    let probe: CmpProbe = serde_json::from_value(value).ok()?;
    trace!(url = page.url(), cmp = %probe.name, "Detected CMP");
    Some(CmpData {
        name: probe.name,
        global: probe.global,
        version: probe.version,
        consent_accepted: false,
    })
}

/// Read TCF consent data from `page`, if the page exposes `__tcfapi`.
pub async fn read_tcf(page: &dyn PageHandle) -> Option<TcfData> {
    // Slack on top of the in-page timeout for the evaluation round trip.
    let bound = TCF_TIMEOUT + Duration::from_secs(1);
    match tokio::time::timeout(bound, page.evaluate(&TCF_SCRIPT)).await {
        Ok(Ok(value)) => parse_tcf(&value),
        Ok(Err(e)) => {
            debug!(url = page.url(), error = %e, "TCF script failed");
            None
        }
        Err(_) => {
            debug!(url = page.url(), "TCF query timed out");
            None
        }
    }
}

fn purpose_map(value: Option<&Value>) -> BTreeMap<u32, bool> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| Some((k.parse().ok()?, v.as_bool()?)))
                .collect()
        })
        .unwrap_or_default()
}

fn as_u32(value: Option<&Value>) -> Option<u32> {
    value
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}

/// Build [`TcfData`] from the page's answer and flag compliance issues.
#[must_use]
pub fn parse_tcf(value: &Value) -> Option<TcfData> {
    let object = value.as_object()?;
    let purpose = object.get("purpose");

    let mut data = TcfData {
        tc_string: object
            .get("tcString")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        gdpr_applies: object.get("gdprApplies").and_then(Value::as_bool),
        cmp_id: as_u32(object.get("cmpId")),
        cmp_version: as_u32(object.get("cmpVersion")),
        purpose_consents: purpose_map(purpose.and_then(|p| p.get("consents"))),
        purpose_legitimate_interests: purpose_map(
            purpose.and_then(|p| p.get("legitimateInterests")),
        ),
        compliance_issues: Vec::new(),
    };
    data.compliance_issues = compliance_issues(&data);
    Some(data)
}

/// Restricted purposes that rely on legitimate interest without consent.
#[must_use]
pub fn compliance_issues(data: &TcfData) -> Vec<String> {
    RESTRICTED_PURPOSES
        .filter(|id| {
            data.purpose_legitimate_interests.get(id).copied().unwrap_or(false)
                && !data.purpose_consents.get(id).copied().unwrap_or(false)
        })
        .map(|id| format!("Purpose {id} is based on legitimate interest instead of explicit consent"))
        .collect()
}
