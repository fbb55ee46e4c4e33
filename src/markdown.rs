use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use syntect::highlighting::{Theme, ThemeSet};
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

use crate::model::SectionHeading;

/// Renders chapter markdown into the HTML served to readers.
///
/// Chapter sources arrive HTML-entity-encoded from the content source, so
/// every render decodes entities first. Rendering rules differ from stock
/// markdown output: links open in a new tab, images are normalized to full
/// width, level-2/4 headings get shareable anchors, fenced code is
/// syntax-highlighted, and single newlines become line breaks.
///
/// The renderer is an immutable configuration value; construct once and share.
pub struct MarkdownRenderer {
    syntaxes: SyntaxSet,
    theme: Theme,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer {
    pub fn new() -> Self {
        let syntaxes = SyntaxSet::load_defaults_newlines();
        let mut themes = ThemeSet::load_defaults();
        let theme = themes.themes.remove("InspiredGitHub").unwrap_or_default();
        Self { syntaxes, theme }
    }

    /// Convert entity-encoded markdown into HTML.
    pub fn render_html(&self, source: &str) -> String {
        let decoded = html_escape::decode_html_entities(source);
        let events = Parser::new_ext(&decoded, parse_options()).collect::<Vec<_>>();
        events_to_html(self.transform(events))
    }

    fn transform<'a>(&self, events: Vec<Event<'a>>) -> Vec<Event<'a>> {
        let mut out = Vec::with_capacity(events.len());
        let mut iter = events.into_iter();

        while let Some(event) = iter.next() {
            match event {
                // Breaks mode: a single newline in the source becomes <br>.
                Event::SoftBreak => out.push(Event::HardBreak),
                Event::Start(Tag::Link {
                    dest_url, title, ..
                }) => out.push(Event::InlineHtml(link_open(&dest_url, &title).into())),
                Event::End(TagEnd::Link) => out.push(Event::InlineHtml("</a>".into())),
                Event::Start(Tag::Image { dest_url, .. }) => {
                    // Caller-supplied alt text and dimensions are dropped.
                    for inner in iter.by_ref() {
                        if matches!(inner, Event::End(TagEnd::Image)) {
                            break;
                        }
                    }
                    out.push(Event::InlineHtml(image_tag(&dest_url).into()));
                }
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match &kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().unwrap_or("").to_owned()
                        }
                        CodeBlockKind::Indented => String::new(),
                    };
                    let mut code = String::new();
                    for inner in iter.by_ref() {
                        match inner {
                            Event::End(TagEnd::CodeBlock) => break,
                            Event::Text(text) => code.push_str(&text),
                            _ => {}
                        }
                    }
                    out.push(Event::Html(self.highlight_block(&lang, &code).into()));
                }
                Event::Start(Tag::Heading { level, .. })
                    if level == HeadingLevel::H2 || level == HeadingLevel::H4 =>
                {
                    let mut inner = Vec::new();
                    for ev in iter.by_ref() {
                        if matches!(ev, Event::End(TagEnd::Heading(l)) if l == level) {
                            break;
                        }
                        inner.push(ev);
                    }
                    out.push(Event::Html(self.heading_block(level, inner).into()));
                }
                other => out.push(other),
            }
        }

        out
    }

    fn heading_block(&self, level: HeadingLevel, inner: Vec<Event<'_>>) -> String {
        let anchor = heading_anchor(&plain_text(&inner));
        let inner_html = events_to_html(self.transform(inner));
        let inner_html = inner_html.trim();

        let icon_link = format!(
            "<a name=\"{anchor}\" href=\"#{anchor}\" style=\"color: #222;\">\
             <i class=\"material-icons\" style=\"vertical-align: middle; \
             opacity: 0.5; cursor: pointer;\">link</i></a>"
        );

        if level == HeadingLevel::H2 {
            // The section-anchor span is what the reader UI matches against
            // the table of contents to highlight the in-view section.
            format!(
                "<h2 class=\"chapter-section\" style=\"color: #222; font-weight: 400;\">\
                 {icon_link}<span class=\"section-anchor\" name=\"{anchor}\">{inner_html}</span> \
                 {inner_html}</h2>\n"
            )
        } else {
            format!("<h4 style=\"color: #222;\">{icon_link} {inner_html}</h4>\n")
        }
    }

    fn highlight_block(&self, lang: &str, code: &str) -> String {
        let syntax = if lang.is_empty() {
            self.syntaxes.find_syntax_by_first_line(code)
        } else {
            self.syntaxes.find_syntax_by_token(lang)
        }
        .unwrap_or_else(|| self.syntaxes.find_syntax_plain_text());

        match highlighted_html_for_string(code, &self.syntaxes, syntax, &self.theme) {
            Ok(html) => html,
            Err(err) => {
                tracing::debug!(?err, "highlighting failed; emitting plain code block");
                format!(
                    "<pre><code>{}</code></pre>\n",
                    html_escape::encode_text(code)
                )
            }
        }
    }
}

/// Scan entity-encoded markdown for level-2 headings and return one section
/// descriptor per heading, in document order. `escaped_text` equals the
/// anchor name the renderer injects for the same heading.
pub fn extract_sections(source: &str) -> Vec<SectionHeading> {
    let decoded = html_escape::decode_html_entities(source);
    let mut sections = Vec::new();

    let mut in_section = false;
    let mut text = String::new();
    for event in Parser::new_ext(&decoded, parse_options()) {
        match event {
            Event::Start(Tag::Heading {
                level: HeadingLevel::H2,
                ..
            }) => {
                in_section = true;
                text.clear();
            }
            Event::End(TagEnd::Heading(HeadingLevel::H2)) => {
                in_section = false;
                sections.push(SectionHeading {
                    text: text.clone(),
                    level: 2,
                    escaped_text: heading_anchor(&text),
                });
            }
            Event::Text(t) | Event::Code(t) if in_section => text.push_str(&t),
            _ => {}
        }
    }

    sections
}

/// Normalize heading text into an in-page anchor name: trim, lowercase,
/// non-word runs collapse to `-`. A trailing run leaves a trailing `-`
/// (`"Why this book?"` becomes `why-this-book-`). Anchors are not deduped
/// across a document; a later duplicate simply wins.
pub fn heading_anchor(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.trim().chars() {
        if ch.is_alphanumeric() || ch == '_' {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out
}

fn parse_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

fn events_to_html(events: Vec<Event<'_>>) -> String {
    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, events.into_iter());
    html
}

fn plain_text(events: &[Event<'_>]) -> String {
    let mut text = String::new();
    for event in events {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(t),
            _ => {}
        }
    }
    text
}

fn link_open(dest: &str, title: &str) -> String {
    let title_attr = if title.is_empty() {
        String::new()
    } else {
        format!(
            " title=\"{}\"",
            html_escape::encode_double_quoted_attribute(title)
        )
    };
    format!(
        "<a target=\"_blank\" href=\"{}\" rel=\"noopener noreferrer\"{title_attr}>",
        html_escape::encode_double_quoted_attribute(dest)
    )
}

fn image_tag(dest: &str) -> String {
    format!(
        "<img src=\"{}\" style=\"border: 1px solid #ddd;\" width=\"100%\" alt=\"Bookpress\">",
        html_escape::encode_double_quoted_attribute(dest)
    )
}
