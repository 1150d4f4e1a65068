//! Reading engagement counts out of a rendered post page.
//!
//! The page exposes its counts in accessibility labels, either all at once on
//! the action bar (`"15 replies, 52 reposts, 149 likes, 4818 views"`) or one
//! per button on older layouts (`"12 Replies. Reply"`).

use chrono::{DateTime, Utc};
use pulse_core::error::AppError;
use pulse_core::models::Metrics;
use pulse_core::owners::is_valid_handle;
use scraper::{ElementRef, Html, Selector};

/// Paths that look like `/<handle>` but are site sections.
const RESERVED_PATHS: &[&str] = &[
    "home",
    "explore",
    "notifications",
    "messages",
    "i",
    "search",
    "settings",
    "compose",
    "intent",
];

/// Parses a display count such as `"847"`, `"1,234"`, `"1.2K"`, `"5M"`, `"3B"`.
/// Anything unparseable reads as zero.
pub fn parse_count(raw: &str) -> u64 {
    let cleaned = raw.trim().replace(',', "");
    let (number, multiplier) = match cleaned.chars().last() {
        Some('K' | 'k') => (&cleaned[..cleaned.len() - 1], 1_000.0),
        Some('M' | 'm') => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        Some('B' | 'b') => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };

    match number.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => (value * multiplier).round() as u64,
        _ => 0,
    }
}

/// The count written just before a word starting with `keyword` in an
/// accessibility label, e.g. `count_before("52 reposts, 149 likes", "like") == Some(149)`.
fn count_before(label: &str, keyword: &str) -> Option<u64> {
    let label = label.to_lowercase();
    let tokens: Vec<&str> = label.split_whitespace().collect();
    tokens.windows(2).find_map(|pair| {
        let number = pair[0].trim_end_matches([',', '.']);
        let starts_with_digit = number.chars().next().is_some_and(|c| c.is_ascii_digit());
        (starts_with_digit && pair[1].starts_with(keyword)).then(|| parse_count(number))
    })
}

fn selector(css: &str) -> Result<Selector, AppError> {
    Selector::parse(css).map_err(|e| AppError::Generic(format!("Invalid selector '{css}': {e}")))
}

/// Extracts the main post's metrics from a page.
///
/// Fails with `"no tweet content found"` when the page has no post article,
/// which is what a login wall or an empty shell looks like.
pub fn parse_metrics(html: &str) -> Result<Metrics, AppError> {
    let document = Html::parse_document(html);
    let article_sel = selector(r#"article[data-testid="tweet"]"#)?;
    let article = document
        .select(&article_sel)
        .next()
        .ok_or_else(|| AppError::ExtractionFailed("no tweet content found".into()))?;

    let mut metrics = Metrics::default();
    read_action_bar(article, &mut metrics)?;
    if metrics.replies == 0 && metrics.reposts == 0 && metrics.likes == 0 {
        read_buttons(article, &mut metrics)?;
    }
    metrics.posted_at = posted_at(article)?;
    metrics.author_handle = author_handle(article)?;

    tracing::debug!(?metrics, "Parsed post metrics");
    Ok(metrics)
}

fn read_action_bar(article: ElementRef<'_>, metrics: &mut Metrics) -> Result<(), AppError> {
    let group_sel = selector(r#"[role="group"][aria-label]"#)?;
    for group in article.select(&group_sel) {
        let Some(label) = group.value().attr("aria-label") else {
            continue;
        };
        let lower = label.to_lowercase();
        if !(lower.contains("repl") || lower.contains("repost") || lower.contains("view")) {
            continue;
        }

        metrics.replies = count_before(label, "repl").unwrap_or(0);
        metrics.reposts = count_before(label, "repost").unwrap_or(0);
        metrics.likes = count_before(label, "like").unwrap_or(0);
        metrics.impressions = count_before(label, "view").unwrap_or(0);
        return Ok(());
    }
    Ok(())
}

fn read_buttons(article: ElementRef<'_>, metrics: &mut Metrics) -> Result<(), AppError> {
    let label_of = |css: &str| -> Result<Option<String>, AppError> {
        let sel = selector(css)?;
        Ok(article
            .select(&sel)
            .find_map(|el| el.value().attr("aria-label").map(str::to_string)))
    };

    if let Some(label) = label_of(r#"[data-testid="reply"]"#)? {
        metrics.replies = count_before(&label, "repl").unwrap_or(0);
    }
    if let Some(label) = label_of(r#"[data-testid="retweet"]"#)? {
        metrics.reposts = count_before(&label, "retweet")
            .or_else(|| count_before(&label, "repost"))
            .unwrap_or(0);
    }
    if let Some(label) = label_of(r#"[data-testid="like"]"#)? {
        metrics.likes = count_before(&label, "like").unwrap_or(0);
    }
    if metrics.impressions == 0 {
        if let Some(label) = label_of(r#"a[href*="/analytics"]"#)? {
            metrics.impressions = count_before(&label, "view").unwrap_or(0);
        }
    }
    Ok(())
}

/// The first `<time datetime>` outside a quoted post.
fn posted_at(article: ElementRef<'_>) -> Result<Option<DateTime<Utc>>, AppError> {
    let quote_sel = selector(r#"[data-testid="quoteTweet"] time"#)?;
    let quoted: Vec<_> = article.select(&quote_sel).map(|el| el.id()).collect();

    let time_sel = selector("time[datetime]")?;
    Ok(article
        .select(&time_sel)
        .filter(|el| !quoted.contains(&el.id()))
        .filter_map(|el| el.value().attr("datetime"))
        .find_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

/// The author's handle (lower-case), from the profile link or an `@handle` span.
fn author_handle(article: ElementRef<'_>) -> Result<Option<String>, AppError> {
    let link_sel = selector(r#"a[href^="/"][role="link"]"#)?;
    let from_link = article
        .select(&link_sel)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| {
            let path = href.split(['?', '#']).next().unwrap_or_default();
            let mut segments = path.split('/').filter(|s| !s.is_empty());
            match (segments.next(), segments.next()) {
                (Some(handle), None) => Some(handle),
                _ => None,
            }
        })
        .find(|handle| !RESERVED_PATHS.contains(handle) && is_valid_handle(handle));
    if let Some(handle) = from_link {
        return Ok(Some(handle.to_lowercase()));
    }

    let span_sel = selector(r#"[dir="ltr"] span"#)?;
    Ok(article
        .select(&span_sel)
        .map(|el| el.text().collect::<String>())
        .find_map(|text| {
            let handle = text.trim().strip_prefix('@')?;
            is_valid_handle(handle).then(|| handle.to_lowercase())
        }))
}
