//! Detail Extractor: fetches a product page, clears the age gate at most once, parses fields.

use std::sync::Arc;

use async_trait::async_trait;
use gamecat_core::{DetailRef, ExtractedFields};
use gamecat_storage::{HttpResponse, ReqwestTransport, SessionClient, Transport, STORE_ORIGIN};
use scraper::Html;
use tracing::{info, warn};

use crate::{app_id_from_url, ensure_success, exists, parse_detail_page, AdapterError, Extract};

const GATE_MARKERS: [&str; 4] = [
    "#app_agegate",
    ".agegate_birthday_selector",
    ".agegate_birthday_desc",
    "#agecheck_form",
];

/// Birth date submitted to the verification form.
pub const BIRTH_DAY: &str = "1";
pub const BIRTH_MONTH: &str = "January";
pub const BIRTH_YEAR: &str = "1990";
/// 1990-01-01T00:00:00Z, stored by the storefront once the check passes.
const BIRTHTIME: &str = "631152000";
/// Day, zero-based month index, year.
const LAST_AGE_CHECK: &str = "1-0-1990";

/// Structural age-gate detection: redirected to an `/agecheck/` URL or carrying the gate form.
pub fn is_age_gate(response: &HttpResponse) -> Result<bool, AdapterError> {
    if response.final_url.contains("/agecheck/") {
        return Ok(true);
    }
    let document = Html::parse_document(&response.body);
    for marker in GATE_MARKERS {
        if exists(&document, marker)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn age_check_url(app_id: &str) -> String {
    format!("{STORE_ORIGIN}/agecheckset/app/{app_id}/")
}

/// Where one detail fetch stands with respect to the age gate.
///
/// `Initial --gated--> Gated --form--> Verified --gated--> Blocked`, and any fetch that is not
/// gated lands in `Ready`. The form is therefore submitted at most once per record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Initial,
    Gated { app_id: String },
    Verified,
    Ready(String),
    Blocked,
}

impl GateState {
    /// Transition after a page fetch. Only `Initial` and `Verified` fetch pages.
    pub fn on_page(self, app_id: &str, gated: bool, body: String) -> GateState {
        match (self, gated) {
            (GateState::Initial, true) => GateState::Gated {
                app_id: app_id.to_string(),
            },
            (GateState::Verified, true) => GateState::Blocked,
            (GateState::Initial | GateState::Verified, false) => GateState::Ready(body),
            (state, _) => state,
        }
    }

    /// Transition after the verification form was accepted.
    pub fn on_form_submitted(self) -> GateState {
        match self {
            GateState::Gated { .. } => GateState::Verified,
            state => state,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GateState::Ready(_) | GateState::Blocked)
    }
}

pub struct SteamDetailExtractor<T: Transport = ReqwestTransport> {
    client: Arc<SessionClient<T>>,
}

impl<T: Transport> SteamDetailExtractor<T> {
    pub fn new(client: Arc<SessionClient<T>>) -> Self {
        Self { client }
    }

    async fn fetch_page(&self, url: &str) -> Result<HttpResponse, AdapterError> {
        ensure_success(self.client.fetch(url, &[]).await?)
    }

    async fn submit_age_check(&self, app_id: &str) -> Result<(), AdapterError> {
        let session_id = self.client.session_id();
        let url = age_check_url(app_id);
        info!(app_id, "submitting age verification");
        let form = [
            ("sessionid", session_id.as_str()),
            ("ageDay", BIRTH_DAY),
            ("ageMonth", BIRTH_MONTH),
            ("ageYear", BIRTH_YEAR),
        ];
        ensure_success(self.client.submit_form(&url, &form).await?)?;

        self.client.set_cookie("birthtime", BIRTHTIME);
        self.client.set_cookie("lastagecheckage", LAST_AGE_CHECK);
        self.client.set_cookie("wants_mature_content", "1");
        Ok(())
    }

    /// Drive the gate state machine until it reaches `Ready` or `Blocked`.
    pub async fn fetch_past_gate(&self, detail: &DetailRef) -> Result<GateState, AdapterError> {
        let mut state = GateState::Initial;
        while !state.is_terminal() {
            state = match state {
                GateState::Initial | GateState::Verified => {
                    let page = self.fetch_page(&detail.url).await?;
                    let gated = is_age_gate(&page)?;
                    let app_id = app_id_from_url(&page.final_url)
                        .unwrap_or_else(|| detail.app_id.clone());
                    state.on_page(&app_id, gated, page.body)
                }
                GateState::Gated { ref app_id } => {
                    self.submit_age_check(app_id).await?;
                    state.on_form_submitted()
                }
                terminal => terminal,
            };
        }
        Ok(state)
    }
}

#[async_trait]
impl<T: Transport> Extract for SteamDetailExtractor<T> {
    async fn extract(&self, detail: &DetailRef) -> Result<ExtractedFields, AdapterError> {
        match self.fetch_past_gate(detail).await? {
            GateState::Ready(body) => parse_detail_page(&body),
            _ => {
                warn!(url = %detail.url, "age gate persisted after verification");
                Err(AdapterError::AgeGateBlocked {
                    url: detail.url.clone(),
                })
            }
        }
    }
}
