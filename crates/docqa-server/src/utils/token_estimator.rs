//! Token estimation for mixed CJK/Latin content.
//!
//! CJK characters tokenize roughly one-to-one; everything else averages
//! about four characters per token.

use unicode_segmentation::UnicodeSegmentation;

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FA5}')
}

/// Estimate the token count of a text using the CJK-aware heuristic.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }

    let cjk_chars = text.chars().filter(|c| is_cjk(*c)).count();
    let other_graphemes = text
        .graphemes(true)
        .filter(|g| !g.chars().any(is_cjk))
        .count();

    cjk_chars + other_graphemes.div_ceil(4)
}

/// Estimate tokens for a batch of texts.
pub fn estimate_total<'a, I>(texts: I) -> usize
where
    I: IntoIterator<Item = &'a str>,
{
    texts.into_iter().map(estimate_tokens).sum()
}
