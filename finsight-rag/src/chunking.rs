//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`HierarchicalChunker`] - splits structured filings by section header into
//!   one Parent summary per section plus overlapping Child windows
//! - [`ParagraphChunker`] - packs news paragraphs into flat chunks
//!
//! Sizes are expressed in estimated tokens, where one token is about four
//! characters. Both strategies share [`split_by_tokens`].

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::ChunkingConfig;
use crate::document::{Chunk, ChunkKind, ChunkMetadata};
use crate::error::{RagError, Result};

/// Characters per estimated token.
const CHARS_PER_TOKEN: usize = 4;

/// A strategy for splitting document text into chunks.
///
/// Implementations copy `metadata` onto every chunk and add chunk-specific
/// fields (section, chunk index). Empty or whitespace-only text yields an
/// empty `Vec`.
pub trait Chunker: Send + Sync {
    /// Split `text` into chunks.
    fn chunk(&self, text: &str, metadata: &ChunkMetadata) -> Vec<Chunk>;
}

/// Estimate the token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / CHARS_PER_TOKEN
}

/// Largest char boundary of `text` that is `<= index`.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Split text into windows of roughly `size` tokens overlapping by `overlap` tokens.
///
/// At every window boundary the split is moved forward to the end of the next
/// sentence (`". "`) if one starts within `search_window` characters. Windows
/// are trimmed and empty windows dropped.
pub fn split_by_tokens(
    text: &str,
    size: usize,
    overlap: usize,
    search_window: usize,
) -> Vec<String> {
    let char_size = size * CHARS_PER_TOKEN;
    let char_overlap = overlap * CHARS_PER_TOKEN;
    if char_size == 0 {
        return Vec::new();
    }

    let len = text.len();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = floor_char_boundary(text, start + char_size);
        if end < len {
            let search_end = floor_char_boundary(text, end + search_window);
            if let Some(pos) = text[end..search_end].find(". ") {
                end += pos + 1;
            }
        }
        if end <= start {
            // A single multi-byte char wider than the window.
            end = text[start..].chars().next().map_or(len, |c| start + c.len_utf8());
        }

        let window = text[start..end].trim();
        if !window.is_empty() {
            chunks.push(window.to_string());
        }

        if end >= len {
            break;
        }
        let next = floor_char_boundary(text, end.saturating_sub(char_overlap));
        start = if next > start { next } else { end };
    }

    chunks
}

/// A named section header pattern.
#[derive(Debug, Clone)]
pub struct SectionPattern {
    regex: Regex,
    name: String,
}

impl SectionPattern {
    /// Compile a case-insensitive header pattern.
    pub fn new(pattern: &str, name: impl Into<String>) -> Result<Self> {
        let regex = Regex::new(&format!("(?i){pattern}")).map_err(|e| {
            RagError::ChunkingError(format!("invalid section pattern '{pattern}': {e}"))
        })?;
        Ok(Self { regex, name: name.into() })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Item headers of an annual report on Form 10-K.
const SEC_ITEM_PATTERNS: &[(&str, &str)] = &[
    (r"ITEM\s+1[.\s]+BUSINESS", "Item 1 - Business"),
    (r"ITEM\s+1A[.\s]+RISK\s+FACTORS", "Item 1A - Risk Factors"),
    (r"ITEM\s+1B[.\s]+UNRESOLVED\s+STAFF\s+COMMENTS", "Item 1B - Unresolved Staff Comments"),
    (r"ITEM\s+2[.\s]+PROPERTIES", "Item 2 - Properties"),
    (r"ITEM\s+3[.\s]+LEGAL\s+PROCEEDINGS", "Item 3 - Legal Proceedings"),
    (r"ITEM\s+4[.\s]+MINE\s+SAFETY", "Item 4 - Mine Safety Disclosures"),
    (r"ITEM\s+5[.\s]+MARKET\s+FOR", "Item 5 - Market for Registrant"),
    (r"ITEM\s+6[.\s]+SELECTED\s+FINANCIAL", "Item 6 - Selected Financial Data"),
    (r"ITEM\s+7[.\s]+MANAGEMENT.?S\s+DISCUSSION", "Item 7 - MD&A"),
    (r"ITEM\s+7A[.\s]+QUANTITATIVE\s+AND\s+QUALITATIVE", "Item 7A - Market Risk"),
    (r"ITEM\s+8[.\s]+FINANCIAL\s+STATEMENTS", "Item 8 - Financial Statements"),
    (r"ITEM\s+9[.\s]+CHANGES\s+IN\s+AND\s+DISAGREEMENTS", "Item 9 - Disagreements"),
    (r"ITEM\s+9A[.\s]+CONTROLS\s+AND\s+PROCEDURES", "Item 9A - Controls and Procedures"),
    (r"ITEM\s+9B[.\s]+OTHER\s+INFORMATION", "Item 9B - Other Information"),
    (r"ITEM\s+10[.\s]+DIRECTORS", "Item 10 - Directors and Officers"),
    (r"ITEM\s+11[.\s]+EXECUTIVE\s+COMPENSATION", "Item 11 - Executive Compensation"),
    (r"ITEM\s+12[.\s]+SECURITY\s+OWNERSHIP", "Item 12 - Security Ownership"),
    (r"ITEM\s+13[.\s]+CERTAIN\s+RELATIONSHIPS", "Item 13 - Related Transactions"),
    (r"ITEM\s+14[.\s]+PRINCIPAL\s+ACCOUNTANT", "Item 14 - Accountant Fees"),
    (r"ITEM\s+15[.\s]+EXHIBITS", "Item 15 - Exhibits"),
];

static SEC_SECTIONS: LazyLock<Vec<SectionPattern>> = LazyLock::new(|| {
    SEC_ITEM_PATTERNS
        .iter()
        .filter_map(|(pattern, name)| SectionPattern::new(pattern, *name).ok())
        .collect()
});

/// The standard 10-K item patterns, Item 1 through Item 15.
pub fn sec_section_patterns() -> Vec<SectionPattern> {
    SEC_SECTIONS.clone()
}

/// A section of a filing located by its header.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub name: String,
    /// Trimmed text from the header up to the next kept header.
    pub text: String,
    /// Byte offset of the header in the source text.
    pub position: usize,
    /// 1-based count of kept sections with this name up to and including this one.
    pub occurrence: usize,
}

/// Locate sections by header pattern.
///
/// Each section runs from its header to the next header (or the end of the
/// text). A span whose trimmed text is not longer than `min_chars` is folded
/// into the section before it, or dropped if it precedes every kept section.
/// A name can match more than once, as with a cross-reference such as
/// "see Item 1A. Risk Factors" in another item's body. Every such span is kept
/// and numbered by [`Section::occurrence`] in document order, so no text after
/// the first kept header is lost.
pub fn extract_sections(text: &str, patterns: &[SectionPattern], min_chars: usize) -> Vec<Section> {
    let mut headers: Vec<(usize, &str)> = patterns
        .iter()
        .flat_map(|p| p.regex.find_iter(text).map(move |m| (m.start(), p.name.as_str())))
        .collect();
    headers.sort_by_key(|(position, _)| *position);

    let mut sections: Vec<Section> = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for (i, (position, name)) in headers.iter().enumerate() {
        let end = headers.get(i + 1).map_or(text.len(), |(next, _)| *next);
        let body = text[*position..end].trim();
        if body.len() <= min_chars {
            // Too short to stand alone: fold into the preceding section, or drop
            // when nothing precedes it (a table of contents line).
            if let Some(last) = sections.last_mut() {
                last.text = text[last.position..end].trim().to_string();
            }
            continue;
        }
        let occurrence = seen.entry(*name).or_insert(0);
        *occurrence += 1;
        if *occurrence > 1 {
            debug!(section = %name, occurrence = *occurrence, position, "repeated section header");
        }
        sections.push(Section {
            name: name.to_string(),
            text: body.to_string(),
            position: *position,
            occurrence: *occurrence,
        });
    }

    sections
}

/// Hex SHA-256 of `text`.
pub(crate) fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Two-tier chunker for structured filings.
///
/// Every recognized section yields one Parent chunk holding a prefix of the
/// section (cut at a sentence end past half the target size) and a set of
/// overlapping Child chunks covering the whole section. Parent ids are derived
/// from `(ticker, doc_type, year, section)` so re-indexing a filing reproduces
/// the same ids.
///
/// When no section header is found, the whole text is split into Child chunks
/// without a parent. Their ids embed a hash of the chunk text.
///
/// # Example
///
/// ```rust,ignore
/// use finsight_rag::{ChunkMetadata, Chunker, HierarchicalChunker};
///
/// let chunker = HierarchicalChunker::new(&config.chunking);
/// let chunks = chunker.chunk(&filing_text, &ChunkMetadata::filing("AAPL", "10-K", 2024));
/// ```
#[derive(Debug, Clone)]
pub struct HierarchicalChunker {
    patterns: Vec<SectionPattern>,
    parent_size: usize,
    child_size: usize,
    overlap: usize,
    min_section_chars: usize,
    search_window: usize,
}

impl HierarchicalChunker {
    /// Create a chunker using the standard 10-K item patterns.
    pub fn new(config: &ChunkingConfig) -> Self {
        Self::with_patterns(config, sec_section_patterns())
    }

    /// Create a chunker with custom section patterns.
    pub fn with_patterns(config: &ChunkingConfig, patterns: Vec<SectionPattern>) -> Self {
        Self {
            patterns,
            parent_size: config.parent_size,
            child_size: config.child_size,
            overlap: config.overlap,
            min_section_chars: config.min_section_chars,
            search_window: config.sentence_search_window,
        }
    }

    /// Sections of `text` according to this chunker's patterns.
    pub fn extract_sections(&self, text: &str) -> Vec<Section> {
        extract_sections(text, &self.patterns, self.min_section_chars)
    }

    fn document_prefix(metadata: &ChunkMetadata) -> String {
        format!(
            "{}_{}_{}",
            metadata.ticker.as_deref().unwrap_or("UNK"),
            metadata.doc_type.as_deref().unwrap_or("UNK"),
            metadata.year.map_or_else(|| "UNK".to_string(), |y| y.to_string())
        )
    }

    fn parent_chunk(&self, section: &Section, metadata: &ChunkMetadata) -> Chunk {
        let target = self.parent_size * CHARS_PER_TOKEN;
        let mut summary = &section.text[..floor_char_boundary(&section.text, target)];
        if let Some(pos) = summary.rfind(". ") {
            if pos > target / 2 {
                summary = &summary[..pos + 1];
            }
        }

        let mut id =
            format!("{}_{}", Self::document_prefix(metadata), section.name.replace(' ', "_"));
        if section.occurrence > 1 {
            id.push_str(&format!("_{}", section.occurrence));
        }
        id.push_str("_PARENT");
        let metadata = ChunkMetadata {
            section: Some(section.name.clone()),
            section_position: Some(section.position),
            ..metadata.clone()
        };

        Chunk {
            id,
            text: format!("[Section: {}]\n\n{summary}", section.name),
            kind: ChunkKind::Parent,
            parent_id: None,
            metadata,
        }
    }

    fn child_chunks(
        &self,
        section: &Section,
        parent_id: &str,
        metadata: &ChunkMetadata,
    ) -> Vec<Chunk> {
        let windows =
            split_by_tokens(&section.text, self.child_size, self.overlap, self.search_window);
        let total = windows.len();
        windows
            .into_iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: format!("{parent_id}_CHILD_{i:03}"),
                text,
                kind: ChunkKind::Child,
                parent_id: Some(parent_id.to_string()),
                metadata: ChunkMetadata {
                    section: Some(section.name.clone()),
                    chunk_index: Some(i),
                    total_chunks: Some(total),
                    ..metadata.clone()
                },
            })
            .collect()
    }

    fn flat_chunks(&self, text: &str, metadata: &ChunkMetadata) -> Vec<Chunk> {
        let prefix = Self::document_prefix(metadata);
        let windows = split_by_tokens(text, self.child_size, self.overlap, self.search_window);
        let total = windows.len();
        windows
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let hash = content_hash(&text);
                Chunk {
                    id: format!("{prefix}_CHUNK_{i:03}_{}", &hash[..12]),
                    text,
                    kind: ChunkKind::Child,
                    parent_id: None,
                    metadata: ChunkMetadata {
                        chunk_index: Some(i),
                        total_chunks: Some(total),
                        ..metadata.clone()
                    },
                }
            })
            .collect()
    }
}

impl Chunker for HierarchicalChunker {
    fn chunk(&self, text: &str, metadata: &ChunkMetadata) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let sections = self.extract_sections(text);
        if sections.is_empty() {
            warn!(
                ticker = metadata.ticker.as_deref().unwrap_or("UNK"),
                "no section headers found, falling back to flat chunking"
            );
            return self.flat_chunks(text, metadata);
        }

        let mut chunks = Vec::new();
        for section in &sections {
            let parent = self.parent_chunk(section, metadata);
            let children = self.child_chunks(section, &parent.id, metadata);
            debug!(section = %section.name, children = children.len(), "chunked section");
            chunks.push(parent);
            chunks.extend(children);
        }
        chunks
    }
}

static PARAGRAPH_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)<p(?:\s[^>]*)?>(.*?)</p\s*>").ok());
static INNER_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]*>").ok());

fn html_to_text(fragment: &str) -> String {
    let stripped = match INNER_TAG.as_ref() {
        Some(tag) => tag.replace_all(fragment, ""),
        None => fragment.into(),
    };
    stripped
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Split article text into paragraphs.
///
/// HTML `<p>` elements are used when present, otherwise blank-line separated
/// blocks. Paragraphs of `min_chars` characters or fewer are dropped.
pub fn extract_paragraphs(text: &str, min_chars: usize) -> Vec<String> {
    let tagged: Vec<String> = PARAGRAPH_TAG
        .as_ref()
        .map(|re| re.captures_iter(text).map(|c| html_to_text(&c[1])).collect())
        .unwrap_or_default();

    let paragraphs: Vec<String> = if tagged.is_empty() {
        text.split("\n\n").map(str::to_string).collect()
    } else {
        tagged
    };

    paragraphs
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| p.len() > min_chars)
        .collect()
}

/// Flat chunker for news and other unstructured text.
///
/// Paragraphs are packed greedily until the next one would push the estimate
/// past `chunk_size`. A paragraph larger than 1.5 × `chunk_size` is split on
/// its own with [`split_by_tokens`]. Text with no usable paragraph is split
/// directly. All chunks are Child chunks without a parent.
#[derive(Debug, Clone)]
pub struct ParagraphChunker {
    chunk_size: usize,
    overlap: usize,
    min_paragraph_chars: usize,
    search_window: usize,
}

impl ParagraphChunker {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.news_chunk_size,
            overlap: config.news_overlap,
            min_paragraph_chars: config.min_paragraph_chars,
            search_window: config.sentence_search_window,
        }
    }

    /// Paragraphs of `text` according to this chunker's minimum length.
    pub fn extract_paragraphs(&self, text: &str) -> Vec<String> {
        extract_paragraphs(text, self.min_paragraph_chars)
    }

    fn pack(&self, paragraphs: Vec<String>) -> Vec<String> {
        let oversized = self.chunk_size * 3 / 2;
        let mut packed = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_tokens = 0;

        for para in paragraphs {
            let tokens = estimate_tokens(&para);
            if tokens > oversized {
                if !current.is_empty() {
                    packed.push(current.join("\n\n"));
                    current.clear();
                    current_tokens = 0;
                }
                packed.extend(split_by_tokens(
                    &para,
                    self.chunk_size,
                    self.overlap,
                    self.search_window,
                ));
            } else if current_tokens + tokens > self.chunk_size && !current.is_empty() {
                packed.push(std::mem::take(&mut current).join("\n\n"));
                current.push(para);
                current_tokens = tokens;
            } else {
                current.push(para);
                current_tokens += tokens;
            }
        }

        if !current.is_empty() {
            packed.push(current.join("\n\n"));
        }
        packed
    }
}

impl Chunker for ParagraphChunker {
    fn chunk(&self, text: &str, metadata: &ChunkMetadata) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let paragraphs = self.extract_paragraphs(text);
        let texts = if paragraphs.is_empty() {
            split_by_tokens(text, self.chunk_size, self.overlap, self.search_window)
        } else {
            self.pack(paragraphs)
        };

        let prefix = match (&metadata.source, &metadata.article_id) {
            (Some(source), Some(article)) => format!("{source}_{article}"),
            (Some(source), None) => source.clone(),
            (None, Some(article)) => format!("news_{article}"),
            (None, None) => "news".to_string(),
        };
        let total = texts.len();

        texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                id: format!("{prefix}_{i:03}"),
                text,
                kind: ChunkKind::Child,
                parent_id: None,
                metadata: ChunkMetadata {
                    chunk_index: Some(i),
                    total_chunks: Some(total),
                    ..metadata.clone()
                },
            })
            .collect()
    }
}
