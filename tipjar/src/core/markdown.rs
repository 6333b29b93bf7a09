//! Markdown rendering for user-supplied text (profile statements, blurbs).

use pulldown_cmark::{CowStr, Event, LinkType, Options, Parser, Tag, TagEnd, TextMergeStream};

/// Render markdown to HTML.
///
/// Raw HTML in the input is escaped, headings get `toc_N` anchors, and bare
/// `http(s)://` URLs become links.
pub fn render(markdown: &str) -> String {
    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_SMART_PUNCTUATION;
    let parser = TextMergeStream::new(Parser::new_ext(markdown, options));

    let mut events: Vec<Event<'_>> = Vec::new();
    let mut link_depth = 0usize;
    let mut in_code_block = false;
    let mut heading_count = 0usize;

    for event in parser {
        match event {
            Event::Html(raw) | Event::InlineHtml(raw) => events.push(Event::Text(raw)),
            Event::Start(Tag::Heading {
                level,
                classes,
                attrs,
                ..
            }) => {
                let id = CowStr::from(format!("toc_{heading_count}"));
                heading_count += 1;
                events.push(Event::Start(Tag::Heading {
                    level,
                    id: Some(id),
                    classes,
                    attrs,
                }));
            }
            Event::Start(tag @ Tag::Link { .. }) => {
                link_depth += 1;
                events.push(Event::Start(tag));
            }
            Event::End(TagEnd::Link) => {
                link_depth = link_depth.saturating_sub(1);
                events.push(Event::End(TagEnd::Link));
            }
            Event::Start(tag @ Tag::CodeBlock(_)) => {
                in_code_block = true;
                events.push(Event::Start(tag));
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                events.push(Event::End(TagEnd::CodeBlock));
            }
            Event::Text(text) if link_depth == 0 && !in_code_block => {
                autolink(text, &mut events);
            }
            other => events.push(other),
        }
    }

    let mut html = String::with_capacity(markdown.len() * 3 / 2);
    pulldown_cmark::html::push_html(&mut html, events.into_iter());
    html
}

/// Split a text event around bare URLs, wrapping each URL in a link.
fn autolink<'a>(text: CowStr<'a>, out: &mut Vec<Event<'a>>) {
    use std::sync::LazyLock;
    static URL_RE: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r#"https?://[^\s<>"']+"#).unwrap());

    if !URL_RE.is_match(&text) {
        out.push(Event::Text(text));
        return;
    }

    let text = text.into_string();
    let mut last = 0;
    for found in URL_RE.find_iter(&text) {
        let url = found
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', '!', '?', ')']);
        let scheme_len = if url.starts_with("https://") { 8 } else { 7 };
        if url.len() <= scheme_len {
            continue;
        }
        let start = found.start();
        let end = start + url.len();
        if start > last {
            out.push(Event::Text(CowStr::from(text[last..start].to_string())));
        }
        out.push(Event::Start(Tag::Link {
            link_type: LinkType::Autolink,
            dest_url: CowStr::from(url.to_string()),
            title: CowStr::from(""),
            id: CowStr::from(""),
        }));
        out.push(Event::Text(CowStr::from(url.to_string())));
        out.push(Event::End(TagEnd::Link));
        last = end;
    }
    if last < text.len() {
        out.push(Event::Text(CowStr::from(text[last..].to_string())));
    }
}
