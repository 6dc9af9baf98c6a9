//! Structural parser for the vocabulary corpus.
//!
//! The corpus is an HTML export in which every word or root sits in its own
//! block element. Field boundaries are recovered from the markup and from the
//! in-paragraph delimiters (`/`, `=`, `+`, `【真题意群】`), never from line
//! positions: any run of whitespace, including the line breaks the export
//! scatters through entries, counts as one space.

use crate::error::{LensError, Result};
use crate::models::{RootEntry, WordEntry, normalize_token, parse_senses};
use log::{debug, info, warn};
use quick_xml::escape::unescape_with;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use tokio::task;

/// Elements whose boundaries delimit one corpus paragraph.
const BLOCK_TAGS: &[&[u8]] = &[
    b"p", b"div", b"li", b"h1", b"h2", b"h3", b"h4", b"h5", b"h6", b"td",
];
/// Elements whose text never belongs to an entry.
const IGNORED_TAGS: &[&[u8]] = &[b"head", b"title", b"style", b"script"];

/// Syntax errors tolerated before the rest of the document is given up on.
const MAX_MARKUP_ERRORS: usize = 64;

const ROOT_MARKER: char = '△';
const EXAMPLE_MARKER: &str = "【真题意群】";

// Word-processor conditionals (`<![if ...]>`, `<![endif]>`) and any other
// `<!...>` that is not a comment, CDATA or doctype trip the reader.
static BANG_MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<![^>]*>").expect("valid regex"));
static LIST_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\(?\d+[.)、]|[•·▪])\s*").expect("valid regex"));
static HEADWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z' \-]*$").expect("valid regex"));
static EXAMPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"【真题意群】([^【]+)").expect("valid regex"));
static SYNONYMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:同义|近义)[：:]?\s*([A-Za-z][A-Za-z\s,;]*)").expect("valid regex")
});

/// Counters describing what the parser kept, skipped and overwrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseReport {
    /// Non-empty block paragraphs seen in the body.
    pub paragraphs: usize,
    pub words: usize,
    pub roots: usize,
    pub malformed_words: usize,
    pub malformed_roots: usize,
    /// Word blocks whose headword had already been seen (last one wins).
    pub duplicate_words: usize,
    pub duplicate_roots: usize,
    /// Entries whose root split and root meaning had different lengths.
    pub root_mismatches: usize,
    /// Markup syntax errors skipped over while reading.
    pub markup_errors: usize,
    /// The first of those errors, with its byte offset.
    pub markup_error: Option<String>,
}

/// Output of a successful parse, in order of first occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCorpus {
    pub words: Vec<WordEntry>,
    pub roots: Vec<RootEntry>,
    pub report: ParseReport,
}

/// Parses corpus markup into records using spawn_blocking.
pub async fn parse_corpus(markup: String) -> Result<ParsedCorpus> {
    debug!("Starting corpus parsing (using spawn_blocking)...");
    let corpus = task::spawn_blocking(move || parse_markup(&markup)).await??;
    debug!(
        "Successfully parsed corpus: {} words, {} roots.",
        corpus.words.len(),
        corpus.roots.len()
    );
    Ok(corpus)
}

/// Parses corpus markup into word and root records.
///
/// Fails only when the input is blank or has no block markup at all; every
/// other defect is counted in the [`ParseReport`] and parsing goes on.
pub fn parse_markup(markup: &str) -> Result<ParsedCorpus> {
    if markup.trim().is_empty() {
        return Err(LensError::ParseError("corpus is empty".to_string()));
    }

    let cleaned = BANG_MARKUP.replace_all(markup, |caps: &regex::Captures<'_>| {
        let tag = &caps[0];
        let keep = tag.starts_with("<!--")
            || tag.starts_with("<![CDATA[")
            || tag.get(2..9).is_some_and(|t| t.eq_ignore_ascii_case("doctype"));
        if keep { tag.to_string() } else { String::new() }
    });
    let paragraphs = split_paragraphs(&cleaned);

    if paragraphs.markers == 0 {
        let detail = match paragraphs.error {
            Some(e) => format!("no paragraph markup found ({})", e),
            None => "no paragraph markup found".to_string(),
        };
        return Err(LensError::ParseError(detail));
    }

    let mut builder = CorpusBuilder::default();
    builder.report.markup_errors = paragraphs.errors;
    builder.report.markup_error = paragraphs.error;
    for text in &paragraphs.texts {
        builder.push_paragraph(text);
    }
    Ok(builder.finish())
}

// --- Markup Layer ---

#[derive(Debug, Default)]
struct Paragraphs {
    texts: Vec<String>,
    markers: usize,
    errors: usize,
    error: Option<String>,
}

fn split_paragraphs(markup: &str) -> Paragraphs {
    let mut reader = Reader::from_str(markup);
    let config = reader.config_mut();
    config.check_end_names = false;
    config.allow_unmatched_ends = true;

    let mut out = Paragraphs::default();
    let mut current = String::new();
    let mut ignored_depth = 0usize;
    let mut last_error_at = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let name = name.as_ref();
                if name.eq_ignore_ascii_case(b"body") {
                    ignored_depth = 0;
                } else if is_one_of(IGNORED_TAGS, name) {
                    ignored_depth += 1;
                } else if ignored_depth == 0 && is_one_of(BLOCK_TAGS, name) {
                    out.markers += 1;
                    flush(&mut current, &mut out.texts);
                } else if name.eq_ignore_ascii_case(b"br") {
                    current.push(' ');
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let name = name.as_ref();
                if is_one_of(IGNORED_TAGS, name) {
                    ignored_depth = ignored_depth.saturating_sub(1);
                } else if ignored_depth == 0 && is_one_of(BLOCK_TAGS, name) {
                    flush(&mut current, &mut out.texts);
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();
                let name = name.as_ref();
                if ignored_depth > 0 {
                    continue;
                }
                if is_one_of(BLOCK_TAGS, name) {
                    out.markers += 1;
                    flush(&mut current, &mut out.texts);
                } else if name.eq_ignore_ascii_case(b"br") {
                    current.push(' ');
                }
            }
            Ok(Event::Text(t)) if ignored_depth == 0 => current.push_str(&decode_text(&t)),
            Ok(Event::CData(c)) if ignored_depth == 0 => {
                current.push_str(&String::from_utf8_lossy(&c))
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                let position = reader.buffer_position();
                warn!("Corpus markup error at byte {}: {}. Skipping it.", position, e);
                out.errors += 1;
                if out.error.is_none() {
                    out.error = Some(format!("{} at byte {}", e, position));
                }
                // The reader moves past the bad bytes; stop if it cannot.
                if last_error_at == Some(position) || out.errors >= MAX_MARKUP_ERRORS {
                    warn!("Giving up on corpus markup after {} errors.", out.errors);
                    break;
                }
                last_error_at = Some(position);
            }
        }
    }
    flush(&mut current, &mut out.texts);
    out
}

fn is_one_of(tags: &[&[u8]], name: &[u8]) -> bool {
    tags.iter().any(|tag| tag.eq_ignore_ascii_case(name))
}

fn flush(current: &mut String, texts: &mut Vec<String>) {
    let collapsed = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.is_empty() {
        texts.push(collapsed);
    }
    current.clear();
}

fn decode_text(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    match unescape_with(&text, html_entity) {
        Ok(unescaped) => unescaped.into_owned(),
        // Stray '&' in prose; keep the text as written.
        Err(_) => text.to_string(),
    }
}

fn html_entity(name: &str) -> Option<&'static str> {
    match name {
        "nbsp" => Some(" "),
        "amp" => Some("&"),
        "lt" => Some("<"),
        "gt" => Some(">"),
        "quot" => Some("\""),
        "apos" => Some("'"),
        "hellip" => Some("…"),
        "mdash" => Some("—"),
        "ndash" => Some("–"),
        "lsquo" => Some("‘"),
        "rsquo" => Some("’"),
        "ldquo" => Some("“"),
        "rdquo" => Some("”"),
        "middot" => Some("·"),
        "times" => Some("×"),
        _ => None,
    }
}

// --- Entry Layer ---

#[derive(Debug, Default)]
struct CorpusBuilder {
    words: Vec<WordEntry>,
    word_slots: HashMap<String, usize>,
    roots: Vec<RootEntry>,
    root_slots: HashMap<String, usize>,
    report: ParseReport,
}

impl CorpusBuilder {
    fn push_paragraph(&mut self, paragraph: &str) {
        self.report.paragraphs += 1;
        let text = LIST_PREFIX.replace(paragraph, "");
        let text = text.as_ref();

        if let Some(body) = text.strip_prefix(ROOT_MARKER) {
            self.push_root_block(text, body);
        } else if text.starts_with(|c: char| c.is_ascii_alphabetic()) && text.contains(['/', '='])
        {
            self.push_word_block(text);
        }
        // Anything else is headings or prose between entries.
    }

    fn push_root_block(&mut self, raw: &str, body: &str) {
        let Some((variants, meaning)) = body.split_once('=') else {
            debug!("Skipping root block without '=': {}", raw);
            self.report.malformed_roots += 1;
            return;
        };
        let meaning = meaning.trim();
        let keys: Vec<String> = variants
            .split(|c: char| c.is_whitespace() || c == ',' || c == '/')
            .map(normalize_token)
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            debug!("Skipping root block without a usable root: {}", raw);
            self.report.malformed_roots += 1;
            return;
        }
        for root in keys {
            let entry = RootEntry {
                root,
                meaning: meaning.to_string(),
                raw_text: raw.to_string(),
            };
            match self.root_slots.get(&entry.root) {
                Some(&slot) => {
                    debug!("Duplicate root '{}' overwrites earlier entry.", entry.root);
                    self.report.duplicate_roots += 1;
                    self.roots[slot] = entry;
                }
                None => {
                    self.root_slots.insert(entry.root.clone(), self.roots.len());
                    self.roots.push(entry);
                }
            }
        }
    }

    fn push_word_block(&mut self, text: &str) {
        let Some(cut) = text.find(['/', '=']) else {
            return;
        };
        let head = text[..cut].trim();
        if !HEADWORD.is_match(head) {
            debug!("Skipping word block with unusable headword '{}'.", head);
            self.report.malformed_words += 1;
            return;
        }
        let word = normalize_token(head);
        if word.is_empty() {
            self.report.malformed_words += 1;
            return;
        }

        let (phonetic, rest) = split_phonetic(&text[cut..]);
        let body_end = [
            rest.find(EXAMPLE_MARKER),
            SYNONYMS.find(rest).map(|m| m.start()),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(rest.len());
        let body = &rest[..body_end];
        let parts: Vec<&str> = body
            .split('=')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let (mut root_split, mut root_meaning, definition, notes) =
            match parts.iter().position(|p| p.contains('+')) {
                Some(i) => {
                    let split = split_fragments(parts[i]);
                    let meaning = parts.get(i + 1).map_or_else(Vec::new, |m| split_fragments(m));
                    let definition = parts.get(i + 2).map_or_else(String::new, |d| d.to_string());
                    let notes = parts[..i]
                        .iter()
                        .chain(parts.iter().skip(i + 3))
                        .map(|n| n.to_string())
                        .collect();
                    (split, meaning, definition, notes)
                }
                None => {
                    let definition = parts.first().map_or_else(String::new, |d| d.to_string());
                    let notes = parts.iter().skip(1).map(|n| n.to_string()).collect();
                    (Vec::new(), Vec::new(), definition, notes)
                }
            };

        if root_split.len() != root_meaning.len() {
            warn!(
                "Root split {:?} and meaning {:?} of '{}' differ in length; dropping both.",
                root_split, root_meaning, word
            );
            self.report.root_mismatches += 1;
            root_split.clear();
            root_meaning.clear();
        } else if !root_split.is_empty() && normalize_token(&root_split.concat()) != word {
            // Joiners like a dropped or doubled letter are expected; just note it.
            debug!("Root split {:?} does not spell '{}' verbatim.", root_split, word);
        }

        let examples = EXAMPLE
            .captures_iter(text)
            .map(|c| c[1].trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        let synonyms = SYNONYMS
            .captures_iter(text)
            .flat_map(|c| {
                c[1].split([',', ';'])
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .collect();

        let entry = WordEntry {
            senses: parse_senses(&definition),
            word,
            phonetic,
            root_split,
            root_meaning,
            definition,
            examples,
            synonyms,
            notes,
            raw_text: text.to_string(),
        };

        match self.word_slots.get(&entry.word) {
            Some(&slot) => {
                debug!("Duplicate headword '{}' overwrites earlier entry.", entry.word);
                self.report.duplicate_words += 1;
                self.words[slot] = entry;
            }
            None => {
                self.word_slots.insert(entry.word.clone(), self.words.len());
                self.words.push(entry);
            }
        }
    }

    fn finish(mut self) -> ParsedCorpus {
        self.report.words = self.words.len();
        self.report.roots = self.roots.len();
        info!(
            "Parsed {} words and {} roots from {} paragraphs ({} malformed words, {} malformed roots, {} duplicates overwritten).",
            self.report.words,
            self.report.roots,
            self.report.paragraphs,
            self.report.malformed_words,
            self.report.malformed_roots,
            self.report.duplicate_words + self.report.duplicate_roots,
        );
        ParsedCorpus {
            words: self.words,
            roots: self.roots,
            report: self.report,
        }
    }
}

/// Splits `/phonetic/ rest` off the text that follows the headword.
///
/// An unterminated phonetic is discarded along with everything up to the
/// first `=`.
fn split_phonetic(tail: &str) -> (Option<String>, &str) {
    let Some(after) = tail.strip_prefix('/') else {
        return (None, tail);
    };
    match after.find('/') {
        Some(end) => {
            let phonetic = after[..end].trim();
            let phonetic = (!phonetic.is_empty()).then(|| format!("/{}/", phonetic));
            (phonetic, &after[end + 1..])
        }
        None => (None, after.find('=').map_or("", |eq| &after[eq..])),
    }
}

fn split_fragments(section: &str) -> Vec<String> {
    section
        .split('+')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(String::from)
        .collect()
}
