//! Storefront adapters: search resolution, detail-page extraction and the HTML field parsers behind them.

use async_trait::async_trait;
use gamecat_core::{DetailRef, ExtractedFields};
use gamecat_storage::{HttpResponse, NetworkError};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

pub mod date;
pub mod detail;
pub mod parse;
pub mod search;

pub use date::format_release_date;
pub use detail::{is_age_gate, GateState, SteamDetailExtractor};
pub use parse::parse_detail_page;
pub use search::{parse_suggestions, search_language, search_term, SteamSearchResolver};

pub const CRATE_NAME: &str = "gamecat-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("age gate still shown after verification for {url}")]
    AgeGateBlocked { url: String },
    #[error("unrecognizable page: {0}")]
    Parse(String),
    #[error("invalid selector `{0}`")]
    Selector(String),
}

/// Outcome of a search: zero candidates is an ordinary result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(DetailRef),
    NotFound,
}

#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, game_name: &str) -> Result<Resolution, AdapterError>;
}

#[async_trait]
pub trait Extract: Send + Sync {
    async fn extract(&self, detail: &DetailRef) -> Result<ExtractedFields, AdapterError>;
}

/// Non-2xx statuses the client does not retry still fail the request for adapters.
pub(crate) fn ensure_success(response: HttpResponse) -> Result<HttpResponse, AdapterError> {
    if response.is_success() {
        return Ok(response);
    }
    Err(AdapterError::Network(NetworkError::HttpStatus {
        status: response.status,
        url: response.final_url,
        attempts: 1,
    }))
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Selector(format!("{css}: {e}")))
}

/// Element text with runs of whitespace collapsed; `None` when nothing visible remains.
pub(crate) fn element_text(element: ElementRef<'_>) -> Option<String> {
    text_or_none(&element.text().collect::<Vec<_>>().join(" "))
}

pub(crate) fn text_or_none(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

pub(crate) fn select_first_text(document: &Html, css: &str) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document.select(&sel).find_map(element_text))
}

pub(crate) fn select_all_texts(document: &Html, css: &str) -> Result<Vec<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document.select(&sel).filter_map(element_text).collect())
}

pub(crate) fn select_first_attr(
    document: &Html,
    css: &str,
    attr: &str,
) -> Result<Option<String>, AdapterError> {
    let sel = selector(css)?;
    Ok(document
        .select(&sel)
        .filter_map(|n| n.value().attr(attr))
        .find_map(text_or_none))
}

pub(crate) fn exists(document: &Html, css: &str) -> Result<bool, AdapterError> {
    let sel = selector(css)?;
    Ok(document.select(&sel).next().is_some())
}

/// Numeric app id following `/app/` in a storefront URL.
pub fn app_id_from_url(url: &str) -> Option<String> {
    let (_, rest) = url.split_once("/app/")?;
    let id: String = rest.chars().take_while(char::is_ascii_digit).collect();
    (!id.is_empty()).then_some(id)
}
