use pulldown_cmark::{Event, Options, Parser, Tag};

use crate::config::ChunkConfig;
use crate::graph::NodeId;

/// Bounded passage of a converted document
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub document_id: String,
    /// Index of the chunk within its document
    pub position: usize,
    /// Closest heading above the chunk
    pub heading: Option<String>,
    pub text: String,
}

impl Chunk {
    /// Id of the passage node built from this chunk
    pub fn id(&self) -> NodeId {
        NodeId::passage(&self.document_id, self.position)
    }

    /// Text sent to the embedder: the heading gives the passage its context.
    pub fn embedding_text(&self) -> String {
        match &self.heading {
            Some(heading) => format!("{}\n\n{}", heading, self.text),
            None => self.text.clone(),
        }
    }
}

/// Block of text under a heading, before packing
struct Block {
    /// Count of headings seen before the block
    section: usize,
    heading: Option<String>,
    text: String,
}

/// Markdown-aware chunker.
///
/// Headings always start a new chunk; paragraphs, list items and code blocks
/// under the same heading are packed together up to `max_chars` characters.
/// Blocks longer than that are split on word boundaries.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
}

impl Chunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    pub fn from_config(config: &ChunkConfig) -> Self {
        Self::new(config.max_chars)
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Split a converted document into ordered chunks
    pub fn chunk(&self, document_id: &str, content: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut current = String::new();
        let mut current_heading: Option<String> = None;
        let mut current_section = 0;

        for block in parse_blocks(content) {
            if block.section != current_section {
                self.push_chunk(&mut chunks, document_id, &current_heading, &mut current);
                current_section = block.section;
                current_heading = block.heading.clone();
            }

            for piece in self.split_block(&block.text) {
                let needed = if current.is_empty() {
                    char_len(&piece)
                } else {
                    char_len(&current) + 2 + char_len(&piece)
                };
                if needed > self.max_chars {
                    self.push_chunk(&mut chunks, document_id, &current_heading, &mut current);
                }
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(&piece);
            }
        }
        self.push_chunk(&mut chunks, document_id, &current_heading, &mut current);

        chunks
    }

    fn push_chunk(
        &self,
        chunks: &mut Vec<Chunk>,
        document_id: &str,
        heading: &Option<String>,
        text: &mut String,
    ) {
        if text.trim().is_empty() {
            text.clear();
            return;
        }
        chunks.push(Chunk {
            document_id: document_id.to_string(),
            position: chunks.len(),
            heading: heading.clone(),
            text: std::mem::take(text),
        });
    }

    /// Split a block into pieces of at most `max_chars` characters
    fn split_block(&self, text: &str) -> Vec<String> {
        if char_len(text) <= self.max_chars {
            return vec![text.to_string()];
        }

        let mut pieces = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            for part in split_long_word(word, self.max_chars) {
                let needed = if current.is_empty() {
                    char_len(part)
                } else {
                    char_len(&current) + 1 + char_len(part)
                };
                if needed > self.max_chars && !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(part);
            }
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_long_word(word: &str, max_chars: usize) -> Vec<&str> {
    if char_len(word) <= max_chars {
        return vec![word];
    }
    let mut parts = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (offset, _) in word.char_indices() {
        if count == max_chars {
            parts.push(&word[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    parts.push(&word[start..]);
    parts
}

fn flush(text: &mut String, section: usize, heading: &Option<String>, blocks: &mut Vec<Block>) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        blocks.push(Block {
            section,
            heading: heading.clone(),
            text: trimmed.to_string(),
        });
    }
    text.clear();
}

/// Flatten markdown into text blocks tagged with their heading
fn parse_blocks(content: &str) -> Vec<Block> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut blocks = Vec::new();
    let mut section = 0;
    let mut heading: Option<String> = None;
    let mut heading_text = String::new();
    let mut in_heading = false;
    let mut text = String::new();

    for event in Parser::new_ext(content, options) {
        match event {
            Event::Start(Tag::Heading(..)) => {
                flush(&mut text, section, &heading, &mut blocks);
                section += 1;
                in_heading = true;
                heading_text.clear();
            }
            Event::End(Tag::Heading(..)) => {
                in_heading = false;
                let title = heading_text.trim();
                heading = if title.is_empty() {
                    None
                } else {
                    Some(title.to_string())
                };
            }
            Event::End(
                Tag::Paragraph
                | Tag::CodeBlock(_)
                | Tag::Item
                | Tag::BlockQuote
                | Tag::TableHead
                | Tag::TableRow
                | Tag::FootnoteDefinition(_),
            ) => flush(&mut text, section, &heading, &mut blocks),
            Event::End(Tag::TableCell) => text.push_str(" | "),
            Event::Text(value) => {
                if in_heading {
                    heading_text.push_str(&value);
                } else {
                    text.push_str(&value);
                }
            }
            Event::Code(code) => {
                let target = if in_heading {
                    &mut heading_text
                } else {
                    &mut text
                };
                target.push('`');
                target.push_str(&code);
                target.push('`');
            }
            Event::SoftBreak => {
                if in_heading {
                    heading_text.push(' ');
                } else {
                    text.push(' ');
                }
            }
            Event::HardBreak => text.push('\n'),
            _ => {}
        }
    }
    flush(&mut text, section, &heading, &mut blocks);

    blocks
}
