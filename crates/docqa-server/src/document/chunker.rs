//! Hierarchy-aware semantic chunking.
//!
//! Stage A partitions the canonical text at heading lines, tracking the
//! ancestor-heading stack. Stage B splits each section body with a
//! recursive character splitter that packs segments up to `chunk_size`
//! and seeds each following chunk with the previous chunk's tail for
//! continuity.

use once_cell::sync::Lazy;
use regex::Regex;

static SECTION_HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(#{1,6}\s+.+|\d+\.\d*\s+.+|第[一二三四五六七八九十百]+[章节条款]\s*.*)$")
        .expect("section heading regex")
});

/// Separator preference order for the recursive splitter.
const SEPARATORS: [&str; 13] = [
    "\n\n", "\n", "。", "！", "？", ".", "!", "?", "；", ";", "，", ",", " ",
];

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            min_chunk_size: 50,
        }
    }
}

/// A chunk before ids and indexes are assigned.
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    pub content: String,
    pub heading: Option<String>,
    pub hierarchy: String,
}

#[derive(Debug)]
struct TextSection {
    heading: Option<String>,
    hierarchy: String,
    content: String,
}

pub struct HierarchicalChunker {
    config: ChunkingConfig,
}

impl HierarchicalChunker {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn chunk(&self, text: &str) -> Vec<ChunkDraft> {
        let mut drafts = Vec::new();

        for section in split_sections(text) {
            let body = section.content.trim();
            if body.is_empty() {
                continue;
            }
            for piece in self.split_content(body) {
                drafts.push(ChunkDraft {
                    content: piece,
                    heading: section.heading.clone(),
                    hierarchy: section.hierarchy.clone(),
                });
            }
        }

        drafts
    }

    fn split_content(&self, text: &str) -> Vec<String> {
        self.split_with_separators(text, &SEPARATORS)
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    }

    fn split_with_separators(&self, text: &str, seps: &[&str]) -> Vec<String> {
        if char_len(text) <= self.config.chunk_size {
            return vec![text.to_string()];
        }

        let Some(pos) = seps.iter().position(|s| text.contains(s)) else {
            return self.fixed_slices(text);
        };
        let sep = seps[pos];
        let remaining = &seps[pos + 1..];

        // Oversized separator-free segments recurse into finer separators
        // first, so packing only ever sees segments within the size bound.
        let mut segments: Vec<String> = Vec::new();
        for seg in text.split(sep) {
            if char_len(seg) > self.config.chunk_size {
                segments.extend(self.split_with_separators(seg, remaining));
            } else {
                segments.push(seg.to_string());
            }
        }

        self.pack(segments, sep)
    }

    /// Greedily pack segments, emitting at the size bound and seeding the
    /// next accumulator with the emitted chunk's tail.
    fn pack(&self, segments: Vec<String>, sep: &str) -> Vec<String> {
        let size = self.config.chunk_size;
        let min = self.config.min_chunk_size;
        let sep_len = char_len(sep);

        let mut chunks: Vec<String> = Vec::new();
        let mut acc = String::new();

        for seg in segments {
            if seg.trim().is_empty() {
                continue;
            }
            if acc.is_empty() {
                acc = seg;
                continue;
            }
            if char_len(&acc) + sep_len + char_len(&seg) <= size {
                acc.push_str(sep);
                acc.push_str(&seg);
            } else if char_len(&acc) >= min {
                let seed = tail_chars(&acc, self.config.chunk_overlap);
                chunks.push(std::mem::take(&mut acc));
                // Drop the seed when it would push the new accumulator
                // straight past the bound.
                if seed.is_empty() || char_len(&seed) + sep_len + char_len(&seg) > size {
                    acc = seg;
                } else {
                    acc = format!("{}{}{}", seed, sep, seg);
                }
            } else {
                // Sub-minimum accumulator: flush it as a kept atom rather
                // than growing past the size bound.
                chunks.push(std::mem::take(&mut acc));
                acc = seg;
            }
        }

        if !acc.is_empty() {
            chunks.push(acc);
        }

        chunks
    }

    /// Fixed-width slicing with overlap stride, for separator-free text.
    fn fixed_slices(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let size = self.config.chunk_size.max(1);
        let stride = size.saturating_sub(self.config.chunk_overlap).max(1);

        let mut out = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + size).min(chars.len());
            out.push(chars[start..end].iter().collect());
            if end >= chars.len() {
                break;
            }
            start += stride;
        }
        out
    }
}

fn split_sections(text: &str) -> Vec<TextSection> {
    let mut sections = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current = TextSection {
        heading: None,
        hierarchy: String::new(),
        content: String::new(),
    };

    for line in text.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() && SECTION_HEADING_RE.is_match(trimmed) {
            sections.push(current);

            let level = heading_level(trimmed);
            let title = heading_title(trimmed);
            while stack.len() >= level {
                stack.pop();
            }
            stack.push(title.clone());

            current = TextSection {
                heading: Some(title),
                hierarchy: stack.join(" > "),
                content: String::new(),
            };
        } else {
            current.content.push_str(line);
            current.content.push('\n');
        }
    }
    sections.push(current);

    sections
}

/// Heading depth: leading `#` count for hash form; 1 + dot count on the
/// numeric prefix (trailing dot stripped, so "1." is level 1 and "1.2"
/// level 2); 1 otherwise.
fn heading_level(line: &str) -> usize {
    if line.starts_with('#') {
        return line.chars().take_while(|c| *c == '#').count().min(6);
    }
    let numeric: String = line
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let numeric = numeric.trim_end_matches('.');
    if numeric.is_empty() {
        1
    } else {
        1 + numeric.matches('.').count()
    }
}

fn heading_title(line: &str) -> String {
    line.trim_start_matches('#').trim().to_string()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn tail_chars(s: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let chars: Vec<char> = s.chars().collect();
    let start = chars.len().saturating_sub(n);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize, min: usize) -> HierarchicalChunker {
        HierarchicalChunker::new(ChunkingConfig {
            chunk_size: size,
            chunk_overlap: overlap,
            min_chunk_size: min,
        })
    }

    #[test]
    fn two_sections_two_chunks() {
        let drafts = chunker(500, 50, 3).chunk("# Intro\nHello world.\n\n# Usage\nRun it.\n");
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].hierarchy, "Intro");
        assert_eq!(drafts[0].content, "Hello world.");
        assert_eq!(drafts[1].hierarchy, "Usage");
        assert_eq!(drafts[1].content, "Run it.");
    }

    #[test]
    fn sibling_headings_replace_each_other() {
        let text = "# A\nroot.\n\n## B\nunder b.\n\n## C\nunder c.\n";
        let drafts = chunker(500, 50, 3).chunk(text);
        let under_c = drafts.iter().find(|d| d.content.contains("under c")).unwrap();
        assert_eq!(under_c.hierarchy, "A > C");
        assert_eq!(under_c.heading.as_deref(), Some("C"));
    }

    #[test]
    fn numeric_headings_nest() {
        let text = "1. Basics\nbasics body.\n\n1.2 Volume\nvolume body.\n";
        let drafts = chunker(500, 50, 3).chunk(text);
        let volume = drafts.iter().find(|d| d.content.contains("volume")).unwrap();
        assert_eq!(volume.hierarchy, "1. Basics > 1.2 Volume");
    }

    #[test]
    fn cn_chapter_headings_are_sections() {
        let text = "第一章 绪论\n这是绪论内容。\n\n第二章 方法\n这是方法内容。\n";
        let drafts = chunker(500, 50, 3).chunk(text);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].hierarchy, "第一章 绪论");
        assert_eq!(drafts[1].hierarchy, "第二章 方法");
    }

    #[test]
    fn preamble_has_empty_hierarchy() {
        let drafts = chunker(500, 50, 3).chunk("no heading yet.\n\n# Later\nbody.\n");
        assert_eq!(drafts[0].hierarchy, "");
        assert!(drafts[0].heading.is_none());
    }

    #[test]
    fn chunks_respect_size_bound() {
        let sentence = "This is a sentence that carries some weight. ";
        let text = sentence.repeat(40);
        let drafts = chunker(200, 20, 30).chunk(&text);
        assert!(drafts.len() > 1);
        for d in &drafts {
            assert!(
                d.content.chars().count() <= 200,
                "chunk too large: {}",
                d.content.chars().count()
            );
        }
    }

    #[test]
    fn consecutive_chunks_share_overlap() {
        let sentence = "abcdefghij ";
        let text = sentence.repeat(60);
        let drafts = chunker(100, 20, 10).chunk(&text);
        assert!(drafts.len() > 1);
        let first = &drafts[0].content;
        let tail: String = first
            .chars()
            .skip(first.chars().count().saturating_sub(20))
            .collect();
        assert!(
            drafts[1].content.starts_with(tail.trim_start()),
            "second chunk should begin with the first chunk's 20-char tail"
        );
    }

    #[test]
    fn separator_free_text_falls_back_to_fixed_width() {
        let text = "x".repeat(1200);
        let drafts = chunker(500, 50, 10).chunk(&text);
        assert_eq!(drafts.len(), 3);
        assert_eq!(drafts[0].content.chars().count(), 500);
        // stride = 450, so the second slice begins inside the first
        assert_eq!(drafts[1].content.chars().count(), 500);
        assert_eq!(drafts[2].content.chars().count(), 300);
    }

    #[test]
    fn sub_minimum_accumulator_flushes_as_kept_atom() {
        // a 90-char segment below min followed by a 199-char segment:
        // merging them would produce a 290-char chunk
        let text = format!("{}.{}", "a".repeat(90), "b".repeat(199));
        let drafts = chunker(200, 20, 100).chunk(&text);

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].content.chars().count(), 90);
        assert_eq!(drafts[1].content.chars().count(), 199);
        for d in &drafts {
            assert!(
                d.content.chars().count() <= 200,
                "chunk too large: {}",
                d.content.chars().count()
            );
        }
    }

    #[test]
    fn coverage_no_text_lost() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota. Kappa lambda mu.";
        let drafts = chunker(30, 5, 5).chunk(text);
        let joined: String = drafts.iter().map(|d| d.content.as_str()).collect::<Vec<_>>().join(" ");
        for word in ["Alpha", "zeta", "iota", "mu"] {
            assert!(joined.contains(word), "lost {}", word);
        }
    }
}
