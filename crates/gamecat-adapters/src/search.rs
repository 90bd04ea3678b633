//! Search Resolver: storefront suggest endpoint → first plausible product.

use std::sync::Arc;

use async_trait::async_trait;
use gamecat_core::DetailRef;
use gamecat_storage::{ReqwestTransport, SessionClient, Transport, STORE_ORIGIN};
use scraper::Html;
use tracing::{debug, info};

use crate::{
    app_id_from_url, element_text, ensure_success, selector, AdapterError, Resolution, Resolve,
};

pub const DEFAULT_COUNTRY: &str = "KZ";
const NON_GAME_WORDS: [&str; 3] = ["soundtrack", "ost", "demo"];

pub fn suggest_url() -> String {
    format!("{STORE_ORIGIN}/search/suggest")
}

/// `russian` for names containing Cyrillic, `english` otherwise.
pub fn search_language(game_name: &str) -> &'static str {
    if game_name
        .chars()
        .any(|c| ('\u{0400}'..='\u{04FF}').contains(&c))
    {
        "russian"
    } else {
        "english"
    }
}

/// Query text sent to the storefront. The stored record keeps the input name.
pub fn search_term(game_name: &str) -> String {
    game_name
        .replace("GOTY", "Game of the Year")
        .trim()
        .to_string()
}

fn is_non_game(name: &str) -> bool {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| NON_GAME_WORDS.contains(&word))
}

/// Candidates in storefront order: app matches (not creators) with a `/app/<id>` link that are
/// not soundtracks or demos.
pub fn parse_suggestions(html: &str) -> Result<Vec<DetailRef>, AdapterError> {
    let document = Html::parse_fragment(html);
    let match_sel = selector("a.match_app")?;
    let name_sel = selector(".match_name")?;

    let mut candidates = Vec::new();
    for entry in document.select(&match_sel) {
        if entry.value().classes().any(|c| c == "match_creator") {
            continue;
        }
        let Some(href) = entry.value().attr("href") else {
            continue;
        };
        if !href.contains("store.steampowered.com/app/") {
            debug!(href, "skipping non-product suggestion");
            continue;
        }
        let Some(app_id) = app_id_from_url(href) else {
            continue;
        };
        let Some(display_name) = entry.select(&name_sel).next().and_then(element_text) else {
            continue;
        };
        if is_non_game(&display_name) {
            debug!(%display_name, "skipping soundtrack or demo");
            continue;
        }
        let url = href.split('?').next().unwrap_or(href).to_string();
        candidates.push(DetailRef {
            app_id,
            url,
            display_name,
        });
    }
    Ok(candidates)
}

pub struct SteamSearchResolver<T: Transport = ReqwestTransport> {
    client: Arc<SessionClient<T>>,
    country: String,
}

impl<T: Transport> SteamSearchResolver<T> {
    pub fn new(client: Arc<SessionClient<T>>, country: impl Into<String>) -> Self {
        Self {
            client,
            country: country.into(),
        }
    }
}

#[async_trait]
impl<T: Transport> Resolve for SteamSearchResolver<T> {
    async fn resolve(&self, game_name: &str) -> Result<Resolution, AdapterError> {
        let term = search_term(game_name);
        let params = [
            ("term", term.as_str()),
            ("f", "games"),
            ("cc", self.country.as_str()),
            ("realm", "1"),
            ("l", search_language(game_name)),
            ("use_store_query", "1"),
            ("use_search_spellcheck", "1"),
            ("search_creators_and_tags", "1"),
        ];
        let response = ensure_success(self.client.fetch(&suggest_url(), &params).await?)?;
        let candidates = parse_suggestions(&response.body)?;

        match candidates.into_iter().next() {
            Some(detail) => {
                info!(game_name, url = %detail.url, "resolved storefront product");
                Ok(Resolution::Found(detail))
            }
            None => {
                info!(game_name, "no storefront match");
                Ok(Resolution::NotFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use gamecat_storage::{
        BackoffPolicy, Credentials, HttpResponse, Method, NetworkError, ScriptedTransport,
        TransportError,
    };
    use std::time::Duration;

    fn resolver(transport: ScriptedTransport) -> SteamSearchResolver<ScriptedTransport> {
        let backoff = BackoffPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        };
        let client = SessionClient::new(transport, &Credentials::anonymous(), backoff);
        SteamSearchResolver::new(Arc::new(client), DEFAULT_COUNTRY)
    }

    #[test]
    fn language_follows_script_of_the_name() {
        assert_eq!(search_language("Ведьмак 3"), "russian");
        assert_eq!(search_language("The Witcher 3"), "english");
    }

    #[test]
    fn goty_is_expanded_only_in_the_query() {
        assert_eq!(
            search_term("Fallout 3 GOTY"),
            "Fallout 3 Game of the Year"
        );
        assert_eq!(search_term("  Portal  "), "Portal");
    }

    #[test]
    fn soundtrack_filter_matches_whole_words() {
        assert!(is_non_game("Portal 2 Soundtrack"));
        assert!(is_non_game("Hades - OST"));
        assert!(is_non_game("Half-Life Demo"));
        assert!(!is_non_game("Ghostrunner"));
        assert!(!is_non_game("Demolition Inc"));
    }

    #[test]
    fn golden_suggestions_skip_creators_soundtracks_and_non_app_links() {
        let html = fixtures::read("search-suggest", "suggest.html");
        let candidates = parse_suggestions(&html).unwrap();
        let names: Vec<_> = candidates.iter().map(|c| c.display_name.as_str()).collect();
        assert_eq!(names, vec!["Portal 2", "Portal"]);
        assert_eq!(
            candidates[0],
            DetailRef {
                app_id: "620".into(),
                url: "https://store.steampowered.com/app/620/Portal_2/".into(),
                display_name: "Portal 2".into(),
            }
        );
    }

    #[tokio::test]
    async fn resolves_first_candidate_with_storefront_query() {
        let transport = ScriptedTransport::new().on_get(
            &suggest_url(),
            Ok(HttpResponse::ok(
                suggest_url(),
                fixtures::read("search-suggest", "suggest.html"),
            )),
        );
        let resolver = resolver(transport);

        let resolution = resolver.resolve("Portal 2 GOTY").await.unwrap();
        let Resolution::Found(detail) = resolution else {
            panic!("expected a match");
        };
        assert_eq!(detail.app_id, "620");

        let calls = resolver.client.transport().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, Method::Get);
        let params = &calls[0].params;
        assert!(params.contains(&("term".into(), "Portal 2 Game of the Year".into())));
        assert!(params.contains(&("cc".into(), "KZ".into())));
        assert!(params.contains(&("l".into(), "english".into())));
        assert!(params.contains(&("f".into(), "games".into())));
    }

    #[tokio::test]
    async fn empty_suggestions_are_not_found() {
        let transport = ScriptedTransport::new()
            .on_get(&suggest_url(), Ok(HttpResponse::ok(suggest_url(), "")));
        let resolution = resolver(transport).resolve("Nonexistent").await.unwrap();
        assert_eq!(resolution, Resolution::NotFound);
    }

    #[tokio::test]
    async fn client_error_status_is_a_network_error() {
        let transport = ScriptedTransport::new().on_get(
            &suggest_url(),
            Ok(HttpResponse::with_status(403, suggest_url(), "denied")),
        );
        let err = resolver(transport).resolve("Portal").await.unwrap_err();
        assert!(matches!(
            err,
            AdapterError::Network(NetworkError::HttpStatus { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_network_error() {
        let transport = ScriptedTransport::new().on_get(
            &suggest_url(),
            Err(TransportError::retryable("connection reset")),
        );
        let err = resolver(transport).resolve("Portal").await.unwrap_err();
        assert!(matches!(
            err,
            AdapterError::Network(NetworkError::Transport { attempts: 2, .. })
        ));
    }
}
