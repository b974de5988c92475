// Markup extraction for the portal's server-rendered listing and detail
// views. The selectors target the Weaver OA widgets the portal is built on.

use chrono::NaiveDate;
use fancy_regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

use super::{Attachment, Candidate, DetailPage};

/// Download-action URL embedded in the attachment row's onclick handler.
static DOWNLOAD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"](/weaver/weaver\.file\.FileDownload[^'"]+)['"]"#)
        .expect("download pattern is valid")
});

/// Lines in the body that only announce the attachment widget.
const ATTACHMENT_BOILERPLATE: &str = "相关附件";
const ATTACHMENT_PREFIX: &str = "附件";

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("selector is valid")
}

/// Parse the listing table, keeping rows whose date cell equals
/// `target_date`. Rows missing a link or date cell are skipped silently.
pub(super) fn parse_listing(html: &str, target_date: NaiveDate, base_url: &Url) -> Vec<Candidate> {
    let document = Html::parse_document(html);
    let row_selector = selector("tbody tr.datalight");
    let cell_selector = selector("td");
    let anchor_selector = selector("a");

    let mut results = Vec::new();
    for row in document.select(&row_selector) {
        let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
        if cells.len() < 3 {
            continue;
        }

        let Some(anchor) = cells[0].select(&anchor_selector).next() else {
            continue;
        };

        let date_text = cell_text(cells[2]);
        let Ok(published_on) = NaiveDate::parse_from_str(date_text.trim(), "%Y-%m-%d") else {
            continue;
        };
        if published_on != target_date {
            continue;
        }

        let href = anchor.value().attr("href").unwrap_or("").trim();
        if href.is_empty() {
            continue;
        }
        let Ok(link) = base_url.join(href) else {
            debug!("Skipping row with unresolvable href: {}", href);
            continue;
        };

        let title = anchor
            .value()
            .attr("title")
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(ToString::to_string)
            .unwrap_or_else(|| cell_text(anchor).trim().to_string());

        let unit = Some(cell_text(cells[1]).trim().to_string()).filter(|unit| !unit.is_empty());

        results.push(Candidate {
            title,
            unit,
            link: link.to_string(),
            published_on,
        });
    }
    results
}

/// Parse a detail page: attachment descriptors from the accessory widget
/// rows, then the body text with a plain-text attachment listing appended.
pub(super) fn parse_detail(html: &str, base_url: &Url) -> DetailPage {
    let document = Html::parse_document(html);

    let attachments = parse_attachments(&document, base_url);
    let mut content = clean_text(&document);

    if !attachments.is_empty() && !content.is_empty() {
        let listing: Vec<String> = attachments
            .iter()
            .map(|attachment| format!("附件: {} ({})", attachment.name, attachment.url))
            .collect();
        content = format!("{}\n\n{}", content, listing.join("\n"));
    }

    DetailPage {
        content,
        attachments,
    }
}

/// Extract body text by paragraph, preserving paragraph breaks and
/// excluding the portal's metadata table and attachment widget.
fn clean_text(document: &Html) -> String {
    let container_selector = selector("#spanContent");
    let paragraph_selector = selector("p");

    let container = document
        .select(&container_selector)
        .next()
        .unwrap_or_else(|| document.root_element());

    let mut paragraphs = Vec::new();
    for paragraph in container.select(&paragraph_selector) {
        // Nested p tags produce duplicated text; keep only the innermost.
        if paragraph.select(&paragraph_selector).next().is_some() {
            continue;
        }
        if in_excluded_region(paragraph) {
            continue;
        }

        let text = cell_text(paragraph).replace('\u{a0}', " ");
        let trimmed = text.trim();
        if trimmed.is_empty()
            || trimmed.contains(ATTACHMENT_BOILERPLATE)
            || trimmed.starts_with(ATTACHMENT_PREFIX)
        {
            continue;
        }

        let joined = trimmed
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            paragraphs.push(joined);
        }
    }

    // Some announcements carry no p markup at all; fall back to raw lines.
    if paragraphs.is_empty() {
        let text = cell_text(container).replace('\u{a0}', " ");
        paragraphs = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToString::to_string)
            .collect();
    }

    paragraphs.join("\n\n")
}

/// Attachment descriptors from the Weaver accessory widget rows.
fn parse_attachments(document: &Html, base_url: &Url) -> Vec<Attachment> {
    let row_selector = selector(r#"tr[id^="accessory_dsp_tr_"]"#);
    let cell_selector = selector("td");
    let button_selector = selector("button[onclick]");

    let mut attachments = Vec::new();
    for row in document.select(&row_selector) {
        let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
        let name = if cells.len() >= 2 {
            cell_text(cells[1]).trim().to_string()
        } else {
            String::new()
        };

        let Some(button) = row.select(&button_selector).next() else {
            continue;
        };
        let onclick = button.value().attr("onclick").unwrap_or("");
        let Some(captures) = DOWNLOAD_RE.captures(onclick).ok().flatten() else {
            continue;
        };
        let Some(path) = captures.get(1) else {
            continue;
        };
        let Ok(url) = base_url.join(path.as_str()) else {
            continue;
        };

        attachments.push(Attachment {
            name,
            url: url.to_string(),
        });
    }
    attachments
}

/// True when the element sits inside markup that is stripped from body
/// text: the metadata table or an attachment widget row.
fn in_excluded_region(element: ElementRef) -> bool {
    for ancestor in element.ancestors() {
        let Some(ancestor) = ElementRef::wrap(ancestor) else {
            continue;
        };
        let value = ancestor.value();
        match value.name() {
            "table" if value.classes().any(|class| class == "viewform") => return true,
            "tr" if value
                .attr("id")
                .is_some_and(|id| id.starts_with("accessory_dsp_tr_")) =>
            {
                return true;
            }
            _ => {}
        }
    }
    false
}

/// Concatenated text of an element, excluding script/style content, with
/// newlines between the text nodes so line structure survives.
fn cell_text(element: ElementRef) -> String {
    let mut out = String::new();
    collect_text(element, &mut out);
    out
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(text);
        } else if let Some(child_element) = ElementRef::wrap(child) {
            if matches!(child_element.value().name(), "script" | "style") {
                continue;
            }
            collect_text(child_element, out);
        }
    }
}
