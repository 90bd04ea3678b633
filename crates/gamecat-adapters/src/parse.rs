//! Field parsers for a storefront product page.

use gamecat_core::{ExtractedFields, FREE, NOT_AVAILABLE, NO_HOURS};
use scraper::Html;

use crate::{
    element_text, exists, select_all_texts, select_first_attr, select_first_text, selector,
    AdapterError,
};

/// Elements only a real product page carries. None of them present means the page is not one.
const PRODUCT_MARKERS: [&str; 5] = [
    ".apphub_AppName",
    "#appHubAppName",
    ".game_area_purchase",
    "#game_highlights",
    ".release_date",
];

const PRICE_SELECTORS: [&str; 3] = [".game_purchase_price", ".discount_final_price", ".price"];
const DATE_SELECTORS: [&str; 2] = [".release_date .date", "[itemprop=\"datePublished\"]"];
const FREE_MARKERS: [&str; 3] = ["free", "бесплатно", "бесплатная"];

pub fn parse_detail_page(html: &str) -> Result<ExtractedFields, AdapterError> {
    let document = Html::parse_document(html);

    let mut is_product = false;
    for marker in PRODUCT_MARKERS {
        if exists(&document, marker)? {
            is_product = true;
            break;
        }
    }
    if !is_product {
        return Err(AdapterError::Parse(
            "no product page elements found".to_string(),
        ));
    }

    Ok(ExtractedFields {
        price: parse_price(&document)?,
        release_date: parse_release_date(&document)?,
        developer: parse_developer(&document)?,
        metascore: or_sentinel(select_first_text(&document, "#game_area_metascore .score")?),
        review_count: or_sentinel(select_first_attr(
            &document,
            "meta[itemprop=\"reviewCount\"]",
            "content",
        )?),
        review_rating: or_sentinel(select_first_attr(
            &document,
            "meta[itemprop=\"ratingValue\"]",
            "content",
        )?),
        tags: parse_tags(&document)?,
        pegi: or_sentinel(select_first_attr(&document, ".game_rating_icon img", "alt")?),
        played_hours: parse_played_hours(&document)?,
        russian_voiceover: parse_russian_voiceover(&document)?.to_string(),
    })
}

fn or_sentinel(value: Option<String>) -> String {
    value.unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn is_free_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    FREE_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub fn parse_price(document: &Html) -> Result<String, AdapterError> {
    for css in PRICE_SELECTORS {
        if let Some(text) = select_first_text(document, css)? {
            return Ok(if is_free_text(&text) {
                FREE.to_string()
            } else {
                text
            });
        }
    }
    // Free-to-play titles may only carry a "Play Game" button inside the purchase block.
    if let Some(block) = select_first_text(document, ".game_area_purchase")? {
        let block = block.to_lowercase();
        if block.contains("free to play") || block.contains("бесплатная игра") {
            return Ok(FREE.to_string());
        }
    }
    Ok(NOT_AVAILABLE.to_string())
}

pub fn parse_release_date(document: &Html) -> Result<String, AdapterError> {
    for css in DATE_SELECTORS {
        if let Some(text) = select_first_text(document, css)? {
            return Ok(crate::format_release_date(&text));
        }
        if let Some(content) = select_first_attr(document, css, "content")? {
            return Ok(crate::format_release_date(&content));
        }
    }
    Ok(NOT_AVAILABLE.to_string())
}

fn parse_developer(document: &Html) -> Result<String, AdapterError> {
    let names = select_all_texts(document, "#developers_list a")?;
    if !names.is_empty() {
        return Ok(names.join(", "));
    }
    Ok(or_sentinel(select_first_text(document, "#developers_list")?))
}

fn parse_tags(document: &Html) -> Result<String, AdapterError> {
    let tags = select_all_texts(document, ".glance_tags.popular_tags a")?;
    if tags.is_empty() {
        Ok(NOT_AVAILABLE.to_string())
    } else {
        Ok(tags.join(", "))
    }
}

/// Total hours on record. The block reads either `42.3 hrs on record` or
/// `0.5 hrs last two weeks / 42.3 hrs on record`.
pub fn parse_played_hours(document: &Html) -> Result<String, AdapterError> {
    let Some(text) = select_first_text(document, ".details_block.hours_played")? else {
        return Ok(NO_HOURS.to_string());
    };
    let total = text.split('/').nth(1).unwrap_or(text.as_str());
    let hours = total
        .replace("ч. всего", "")
        .replace("hrs on record", "")
        .trim()
        .to_string();
    Ok(if hours.is_empty() {
        NO_HOURS.to_string()
    } else {
        hours
    })
}

/// `yes` / `no` for a Russian full-audio track; `N/A` when the language table is missing or
/// has an unexpected shape.
pub fn parse_russian_voiceover(document: &Html) -> Result<&'static str, AdapterError> {
    let row_sel = selector("table.game_language_options tr")?;
    let lang_sel = selector("td.ellipsis")?;
    let check_sel = selector("td.checkcol")?;

    let rows: Vec<_> = document.select(&row_sel).collect();
    if rows.len() < 2 {
        return Ok(NOT_AVAILABLE);
    }

    let russian = rows.iter().skip(1).find(|row| {
        row.select(&lang_sel)
            .next()
            .and_then(element_text)
            .map(|lang| {
                let lang = lang.to_lowercase();
                lang.contains("русский") || lang.contains("russian")
            })
            .unwrap_or(false)
    });
    let Some(row) = russian else {
        return Ok("no");
    };

    // Columns are interface, full audio, subtitles.
    let checks: Vec<_> = row.select(&check_sel).collect();
    if checks.len() < 3 {
        return Ok(NOT_AVAILABLE);
    }
    let audio = checks[1].text().collect::<String>();
    Ok(if audio.contains('✔') { "yes" } else { "no" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn golden(case: &str) {
        let html = fixtures::read(case, "page.html");
        let actual = parse_detail_page(&html).expect("product page parses");
        let expected: ExtractedFields =
            serde_json::from_str(&fixtures::read(case, "snapshot.json")).expect("parse snapshot");
        assert_eq!(actual, expected, "golden mismatch for {case}");
    }

    #[test]
    fn golden_json_snapshot_test_paid_english_page() {
        golden("portal-2");
    }

    #[test]
    fn golden_json_snapshot_test_free_russian_page() {
        golden("free-to-play");
    }

    #[test]
    fn golden_json_snapshot_test_unreleased_page() {
        golden("coming-soon");
    }

    #[test]
    fn non_product_page_is_a_parse_error() {
        let err = parse_detail_page("<html><body><h1>Oops, sorry!</h1></body></html>").unwrap_err();
        assert!(matches!(err, AdapterError::Parse(_)));
    }

    #[test]
    fn bad_date_does_not_invalidate_price() {
        let html = r#"<div class="apphub_AppName">X</div>
            <div class="release_date"><div class="date">When it's done</div></div>
            <div class="game_area_purchase"><div class="game_purchase_price price">$4.99</div></div>"#;
        let fields = parse_detail_page(html).unwrap();
        assert_eq!(fields.price, "$4.99");
        assert_eq!(fields.release_date, NOT_AVAILABLE);
        assert_eq!(fields.played_hours, NO_HOURS);
    }

    #[test]
    fn discounted_price_falls_back_to_final_price() {
        let html = r#"<div id="appHubAppName">X</div>
            <div class="discount_block"><div class="discount_original_price">$20.00</div>
            <div class="discount_final_price">$5.00</div></div>"#;
        let fields = parse_detail_page(html).unwrap();
        assert_eq!(fields.price, "$5.00");
    }

    #[test]
    fn free_to_play_block_without_price_element_is_free() {
        let html = r#"<div id="appHubAppName">X</div>
            <div class="game_area_purchase"><h1>Play Dota 2</h1><div>Free To Play</div></div>"#;
        let fields = parse_detail_page(html).unwrap();
        assert_eq!(fields.price, FREE);
    }

    #[test]
    fn played_hours_without_recent_part() {
        let doc = Html::parse_document(
            r#"<div class="details_block hours_played">4,2 ч. всего</div>"#,
        );
        assert_eq!(parse_played_hours(&doc).unwrap(), "4,2");
    }

    #[test]
    fn voiceover_table_with_short_rows_is_unknown() {
        let doc = Html::parse_document(
            r#"<table class="game_language_options">
                <tr><th></th><th>Interface</th></tr>
                <tr><td class="ellipsis">Russian</td><td class="checkcol"><span>✔</span></td></tr>
            </table>"#,
        );
        assert_eq!(parse_russian_voiceover(&doc).unwrap(), NOT_AVAILABLE);
    }
}
