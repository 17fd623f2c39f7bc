//! Minimal PDF 1.4 writer for audit reports.
//!
//! Text only, single built-in font (Helvetica), US Letter pages. The output
//! carries no creation date, so a report depends only on its trail and
//! options.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use custody_ledger_core::event::rfc3339_millis;

use super::AuditTrail;

const PAGE_WIDTH: u32 = 612;
const PAGE_HEIGHT: u32 = 792;
const MARGIN: u32 = 50;
const WRAP_COLUMNS: usize = 95;

const TITLE_SIZE: u32 = 16;
const HEADING_SIZE: u32 = 12;
const BODY_SIZE: u32 = 9;

/// Which sections a PDF report contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportOptions {
    pub title: String,
    pub header_text: Option<String>,
    pub include_hashes: bool,
    pub include_signatures: bool,
    pub include_metadata: bool,
    pub include_timeline: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            title: "Chain of Custody Audit Report".into(),
            header_text: None,
            include_hashes: true,
            include_signatures: true,
            include_metadata: false,
            include_timeline: true,
        }
    }
}

struct Line {
    size: u32,
    text: String,
}

/// Accumulates report lines before layout.
#[derive(Default)]
struct Document {
    lines: Vec<Line>,
}

impl Document {
    fn push(&mut self, size: u32, text: impl AsRef<str>) {
        for part in wrap(text.as_ref(), WRAP_COLUMNS) {
            self.lines.push(Line { size, text: part });
        }
    }

    fn title(&mut self, text: impl AsRef<str>) {
        self.push(TITLE_SIZE, text);
    }

    fn heading(&mut self, text: impl AsRef<str>) {
        self.blank();
        self.push(HEADING_SIZE, text);
    }

    fn body(&mut self, text: impl AsRef<str>) {
        self.push(BODY_SIZE, text);
    }

    fn blank(&mut self) {
        self.lines.push(Line {
            size: BODY_SIZE,
            text: String::new(),
        });
    }

    /// Split lines into pages that fit between the margins.
    fn paginate(&self) -> Vec<&[Line]> {
        let usable = PAGE_HEIGHT - 2 * MARGIN;
        let mut pages = Vec::new();
        let mut start = 0;
        let mut used = 0;
        for (i, line) in self.lines.iter().enumerate() {
            let height = line_height(line.size);
            if used + height > usable && i > start {
                pages.push(&self.lines[start..i]);
                start = i;
                used = 0;
            }
            used += height;
        }
        pages.push(&self.lines[start..]);
        pages
    }
}

fn line_height(size: u32) -> u32 {
    size + 4
}

/// Greedy word wrap. Words longer than `columns` are split.
fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > columns {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            let rest = word.split_off(columns);
            out.push(word.into_iter().collect());
            word = rest;
        }
        let word: String = word.into_iter().collect();
        let needed = if current.is_empty() { 0 } else { 1 } + word.chars().count();
        if current.chars().count() + needed > columns {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() || out.is_empty() {
        out.push(current);
    }
    out
}

/// Escape a PDF literal string for a `/WinAnsiEncoding` font.
///
/// Characters WinAnsi can show are written as octal escapes; anything else
/// becomes `?`.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            ' '..='~' => out.push(c),
            _ => match win_ansi(c) {
                Some(code) => out.push_str(&format!("\\{:03o}", code)),
                None => out.push('?'),
            },
        }
    }
    out
}

/// WinAnsi code for a non-ASCII character.
fn win_ansi(c: char) -> Option<u8> {
    let code = match c {
        '\u{a0}'..='\u{ff}' => c as u8,
        '\u{20ac}' => 0x80,
        '\u{201a}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201e}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02c6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8a,
        '\u{2039}' => 0x8b,
        '\u{0152}' => 0x8c,
        '\u{017d}' => 0x8e,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201c}' => 0x93,
        '\u{201d}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02dc}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9a,
        '\u{203a}' => 0x9b,
        '\u{0153}' => 0x9c,
        '\u{017e}' => 0x9e,
        '\u{0178}' => 0x9f,
        _ => return None,
    };
    Some(code)
}

fn build_document(trail: &AuditTrail, options: &ReportOptions) -> Document {
    let mut doc = Document::default();
    let verification = &trail.verification;

    doc.title(&options.title);
    if let Some(header) = options.header_text.as_deref().filter(|h| !h.trim().is_empty()) {
        doc.body(header);
    }
    doc.body(format!("Shipment: {}", trail.shipment_id));
    doc.body(format!("Generated: {}", rfc3339_millis::format(&trail.generated_at)));

    doc.heading("Summary");
    doc.body(format!("Events: {}", verification.event_count));
    if let (Some(first), Some(last)) = (verification.first_event_at, verification.last_event_at) {
        doc.body(format!("First event: {}", rfc3339_millis::format(&first)));
        doc.body(format!("Last event: {}", rfc3339_millis::format(&last)));
    }
    doc.body(format!(
        "Chain status: {}",
        if verification.is_valid { "VALID" } else { "INVALID" }
    ));

    doc.heading("Integrity Findings");
    if verification.is_valid {
        doc.body("All hashes and links verified.");
    } else {
        for id in &verification.invalid_hashes {
            doc.body(format!("Content hash mismatch: {}", id));
        }
        for id in &verification.broken_links {
            doc.body(format!("Broken link: {}", id));
        }
    }

    if options.include_timeline {
        doc.heading("Timeline");
        for (i, event) in trail.events.iter().enumerate() {
            let c = &event.content;
            doc.body(format!(
                "{}. {}  {}  by {} ({})  at {} ({})",
                i + 1,
                rfc3339_millis::format(&c.timestamp),
                c.event_type,
                c.actor.name,
                c.actor.actor_type,
                c.location.name,
                c.location.location_type,
            ));
        }
    }

    if options.include_hashes {
        doc.heading("Hashes");
        for event in &trail.events {
            doc.body(format!("Event {} (sequence {})", event.id(), event.sequence()));
            doc.body(format!("data: {}", event.data_hash()));
            doc.body(format!("previous: {}", event.previous_hash()));
            doc.body(format!("transaction: {}", event.transaction_hash()));
        }
    }

    if options.include_metadata {
        doc.heading("Metadata");
        let mut any = false;
        for event in trail.events.iter().filter(|e| !e.content.metadata.is_empty()) {
            any = true;
            let json = serde_json::to_string(&event.content.metadata)
                .unwrap_or_else(|_| "<unencodable>".into());
            doc.body(format!("{}: {}", event.id(), json));
        }
        if !any {
            doc.body("No event metadata.");
        }
    }

    if options.include_signatures {
        doc.heading("Signatures");
        match &trail.attestation {
            Some(att) => {
                doc.body(format!("Signer public key: {}", att.public_key));
                doc.body(format!("Chain head: {}", att.chain_head));
                doc.body(format!("Events covered: {}", att.event_count));
                doc.body(format!("Signature: {}", att.signature));
            }
            None => doc.body("Not signed."),
        }
    }

    doc
}

/// Counts bytes so object offsets can go into the xref table.
struct CountingWriter<W> {
    inner: W,
    written: usize,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn page_stream(lines: &[Line]) -> String {
    let mut stream = String::new();
    let mut y = PAGE_HEIGHT - MARGIN;
    for line in lines {
        y -= line_height(line.size);
        if line.text.is_empty() {
            continue;
        }
        stream.push_str(&format!(
            "BT /F1 {} Tf {} {} Td ({}) Tj ET\n",
            line.size,
            MARGIN,
            y,
            escape(&line.text)
        ));
    }
    stream
}

/// Render `trail` as a PDF document into `w`.
pub fn write_report<W: Write>(trail: &AuditTrail, options: &ReportOptions, w: W) -> io::Result<()> {
    let doc = build_document(trail, options);
    let pages = doc.paginate();

    // 1 catalog, 2 page tree, 3 font, 4 info, then (page, content) pairs
    let page_ids: Vec<usize> = (0..pages.len()).map(|i| 5 + 2 * i).collect();
    let object_count = 4 + 2 * pages.len();

    let mut out = CountingWriter { inner: w, written: 0 };
    let mut offsets = Vec::with_capacity(object_count);

    out.write_all(b"%PDF-1.4\n%\xe2\xe3\xcf\xd3\n")?;

    offsets.push(out.written);
    out.write_all(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n")?;

    offsets.push(out.written);
    let kids: Vec<String> = page_ids.iter().map(|id| format!("{} 0 R", id)).collect();
    write!(
        out,
        "2 0 obj\n<< /Type /Pages /Kids [{}] /Count {} >>\nendobj\n",
        kids.join(" "),
        pages.len()
    )?;

    offsets.push(out.written);
    out.write_all(
        b"3 0 obj\n<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>\nendobj\n",
    )?;

    offsets.push(out.written);
    write!(
        out,
        "4 0 obj\n<< /Title ({}) /Producer (custody-ledger) >>\nendobj\n",
        escape(&options.title)
    )?;

    for (page, id) in pages.iter().zip(&page_ids) {
        offsets.push(out.written);
        write!(
            out,
            "{} 0 obj\n<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>\nendobj\n",
            id,
            PAGE_WIDTH,
            PAGE_HEIGHT,
            id + 1
        )?;

        let stream = page_stream(page);
        offsets.push(out.written);
        write!(
            out,
            "{} 0 obj\n<< /Length {} >>\nstream\n{}endstream\nendobj\n",
            id + 1,
            stream.len(),
            stream
        )?;
    }

    let xref_offset = out.written;
    write!(out, "xref\n0 {}\n0000000000 65535 f \n", object_count + 1)?;
    for offset in &offsets {
        write!(out, "{:010} 00000 n \n", offset)?;
    }
    write!(
        out,
        "trailer\n<< /Size {} /Root 1 0 R /Info 4 0 R >>\nstartxref\n{}\n%%EOF\n",
        object_count + 1,
        xref_offset
    )?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape(r"a(b)c\d"), r"a\(b\)c\\d");
        assert_eq!(escape("Z\u{fc}rich"), r"Z\374rich");
        assert_eq!(escape("S\u{e3}o Paulo \u{2013} Santos"), r"S\343o Paulo \226 Santos");
        assert_eq!(escape("\u{20ac}12"), r"\20012");
        assert_eq!(escape("\u{6771}\u{4eac}\n"), "???");
    }

    #[test]
    fn test_wrap() {
        assert_eq!(wrap("", 10), vec![String::new()]);
        assert_eq!(wrap("one two three", 7), vec!["one two", "three"]);
        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_paginates_long_documents() {
        let mut doc = Document::default();
        for i in 0..200 {
            doc.body(format!("line {}", i));
        }
        let pages = doc.paginate();
        assert!(pages.len() > 1);
        assert_eq!(pages.iter().map(|p| p.len()).sum::<usize>(), 200);
    }
}
