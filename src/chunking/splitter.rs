//! Paragraph accumulation and overlap carry.
//!
//! The splitter walks the document once, grouping lines into
//! blank-line-separated paragraphs, and assembles chunks from whole
//! paragraphs. A paragraph larger than the target is emitted as a single
//! oversized chunk rather than split internally.

use crate::chunking::{ChunkPiece, ChunkerConfig, DocumentFormat};
use regex::Regex;
use std::sync::OnceLock;

/// Matches an ATX heading line: 1-6 `#` markers followed by whitespace.
#[allow(clippy::unwrap_used)]
fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap())
}

/// One parsed element of the document.
enum Event {
    /// A blank-line-separated paragraph (joined with single newlines).
    Para(String),
    /// A Markdown heading: the raw line and the title without markers.
    Heading { line: String, title: String },
}

/// Splits text into chunks.
///
/// # Errors
///
/// Currently infallible for valid configs; returns `Result` so callers
/// propagate configuration validation uniformly.
pub fn chunk_text(
    text: &str,
    format: DocumentFormat,
    config: &ChunkerConfig,
) -> crate::Result<Vec<ChunkPiece>> {
    let events = parse_events(text, format);

    let mut asm = Assembler::new(config.target_size, config.overlap);
    for event in events {
        match event {
            Event::Heading { line, title } => {
                // Heading forces a boundary and belongs to the next chunk.
                asm.flush();
                asm.current_section = Some(title);
                asm.push_para(&line);
            }
            Event::Para(para) => {
                if asm.has_content && !asm.fits(&para) {
                    asm.flush();
                }
                asm.push_para(&para);
            }
        }
    }
    asm.flush();

    Ok(asm.pieces)
}

/// Parses the document into paragraph and heading events.
fn parse_events(text: &str, format: DocumentFormat) -> Vec<Event> {
    fn close_para(lines: &mut Vec<&str>, events: &mut Vec<Event>) {
        if !lines.is_empty() {
            events.push(Event::Para(lines.join("\n")));
            lines.clear();
        }
    }

    let mut events = Vec::new();
    let mut para_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            close_para(&mut para_lines, &mut events);
            continue;
        }

        if format == DocumentFormat::Markdown
            && let Some(caps) = heading_re().captures(line)
        {
            close_para(&mut para_lines, &mut events);
            let title = caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            events.push(Event::Heading {
                line: line.to_string(),
                title,
            });
            continue;
        }

        para_lines.push(line);
    }
    close_para(&mut para_lines, &mut events);

    events
}

/// Accumulates paragraphs into chunks with overlap carry.
struct Assembler {
    target: usize,
    overlap: usize,
    pieces: Vec<ChunkPiece>,
    /// Current buffer text (starts with the carry from the last emit).
    buf: String,
    /// Character count of `buf`.
    buf_chars: usize,
    /// Whether `buf` contains anything beyond the carried overlap.
    has_content: bool,
    /// Section in effect for content being added now.
    current_section: Option<String>,
    /// Section attached to the buffer being assembled.
    buf_section: Option<String>,
}

impl Assembler {
    fn new(target: usize, overlap: usize) -> Self {
        Self {
            target,
            overlap,
            pieces: Vec::new(),
            buf: String::new(),
            buf_chars: 0,
            has_content: false,
            current_section: None,
            buf_section: None,
        }
    }

    /// Whether a paragraph fits into the buffer without exceeding the
    /// target.
    fn fits(&self, para: &str) -> bool {
        let sep = if self.buf_chars == 0 { 0 } else { 2 };
        self.buf_chars + sep + para.chars().count() <= self.target
    }

    fn push_para(&mut self, para: &str) {
        if !self.has_content {
            self.buf_section = self.current_section.clone();
        }
        if self.buf_chars > 0 {
            self.buf.push_str("\n\n");
            self.buf_chars += 2;
        }
        self.buf.push_str(para);
        self.buf_chars += para.chars().count();
        self.has_content = true;
    }

    /// Emits the buffer as a chunk (if it has content) and seeds the
    /// next buffer with the overlap tail.
    fn flush(&mut self) {
        if !self.has_content {
            return;
        }

        let carry = tail_chars(&self.buf, self.overlap).to_string();
        let carry_chars = carry.chars().count();

        self.pieces.push(ChunkPiece {
            text: std::mem::take(&mut self.buf),
            section: self.buf_section.clone(),
        });

        self.buf = carry;
        self.buf_chars = carry_chars;
        self.has_content = false;
    }
}

/// Returns the last `n` characters of `s`, respecting char boundaries.
fn tail_chars(s: &str, n: usize) -> &str {
    let count = s.chars().count();
    if count <= n {
        return s;
    }
    let skip = count - n;
    s.char_indices()
        .nth(skip)
        .map_or(s, |(idx, _)| &s[idx..])
}
