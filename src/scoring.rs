//! Scoring functions for catalog matching.
//!
//! This module contains:
//! - Token overlap (used by exact title + author matching)
//! - Token similarity on a 0-100 scale (used by fuzzy matching)
//! - The block-matching ratio the similarity is built on

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

// ============================================================================
// Token Comparison
// ============================================================================

/// True if the two token lists share at least one token.
pub fn token_overlap<S: AsRef<str>>(tokens_a: &[S], tokens_b: &[S]) -> bool {
    let set_a: FxHashSet<&str> = tokens_a.iter().map(AsRef::as_ref).collect();
    tokens_b.iter().any(|t| set_a.contains(t.as_ref()))
}

/// Similarity between two token lists (0 to 100).
///
/// Each side is reduced to its sorted, duplicate-free token set joined by
/// single spaces, then compared with [`match_ratio`]. Either side empty → 0.
///
/// `match_ratio` depends on argument order, so the lexicographically smaller
/// text always goes first. This keeps the score symmetric.
pub fn token_similarity<S: AsRef<str>>(tokens_a: &[S], tokens_b: &[S]) -> u8 {
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0;
    }
    let text_a = sorted_token_text(tokens_a);
    let text_b = sorted_token_text(tokens_b);
    let ratio = if text_a <= text_b {
        match_ratio(&text_a, &text_b)
    } else {
        match_ratio(&text_b, &text_a)
    };
    // Ties round to even, so 82.5 scores 82 and 83.5 scores 84.
    (ratio * 100.0).round_ties_even() as u8
}

fn sorted_token_text<S: AsRef<str>>(tokens: &[S]) -> String {
    let unique: BTreeSet<&str> = tokens.iter().map(AsRef::as_ref).collect();
    unique.into_iter().collect::<Vec<_>>().join(" ")
}

// ============================================================================
// Block Matching
// ============================================================================

/// Strings at least this long drop "popular" characters from the index.
const AUTOJUNK_MIN_LEN: usize = 200;

/// `2 * M / T`, where `M` is the total length of the matching blocks and `T`
/// the combined length of both strings. Two empty strings have ratio 1.0.
///
/// Matching blocks are found by taking the longest common run, then
/// recursing into the unmatched text on either side of it.
pub fn match_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = BlockMatcher::new(&a, &b).matched_len();
    2.0 * matched as f64 / total as f64
}

struct BlockMatcher<'a> {
    a: &'a [char],
    b: &'a [char],
    /// Positions in `b` of each character, ascending.
    b_index: FxHashMap<char, Vec<usize>>,
}

impl<'a> BlockMatcher<'a> {
    fn new(a: &'a [char], b: &'a [char]) -> Self {
        let mut b_index: FxHashMap<char, Vec<usize>> = FxHashMap::default();
        for (j, &c) in b.iter().enumerate() {
            b_index.entry(c).or_default().push(j);
        }

        // In long strings, characters occurring in more than 1% of positions
        // cannot seed a match (they can still extend one).
        if b.len() >= AUTOJUNK_MIN_LEN {
            let max_occurrences = b.len() / 100 + 1;
            b_index.retain(|_, positions| positions.len() <= max_occurrences);
        }

        Self { a, b, b_index }
    }

    /// Total length of all matching blocks.
    fn matched_len(&self) -> usize {
        let mut matched = 0;
        let mut pending = vec![(0, self.a.len(), 0, self.b.len())];

        while let Some((a_lo, a_hi, b_lo, b_hi)) = pending.pop() {
            let (i, j, size) = self.longest_match(a_lo, a_hi, b_lo, b_hi);
            if size == 0 {
                continue;
            }
            matched += size;
            if a_lo < i && b_lo < j {
                pending.push((a_lo, i, b_lo, j));
            }
            if i + size < a_hi && j + size < b_hi {
                pending.push((i + size, a_hi, j + size, b_hi));
            }
        }

        matched
    }

    /// Longest run `a[i..i+size] == b[j..j+size]` inside the given windows.
    /// Among equally long runs the one starting earliest in `a` wins, then
    /// earliest in `b`.
    fn longest_match(
        &self,
        a_lo: usize,
        a_hi: usize,
        b_lo: usize,
        b_hi: usize,
    ) -> (usize, usize, usize) {
        let (mut best_i, mut best_j, mut best_size) = (a_lo, b_lo, 0);

        // run_len[j] = length of the match ending at a[i - 1] and b[j]
        let mut run_len: FxHashMap<usize, usize> = FxHashMap::default();
        for i in a_lo..a_hi {
            let mut next_run_len: FxHashMap<usize, usize> = FxHashMap::default();
            if let Some(positions) = self.b_index.get(&self.a[i]) {
                for &j in positions {
                    if j < b_lo {
                        continue;
                    }
                    if j >= b_hi {
                        break;
                    }
                    let previous = j
                        .checked_sub(1)
                        .and_then(|p| run_len.get(&p))
                        .copied()
                        .unwrap_or(0);
                    let size = previous + 1;
                    next_run_len.insert(j, size);
                    if size > best_size {
                        best_i = i + 1 - size;
                        best_j = j + 1 - size;
                        best_size = size;
                    }
                }
            }
            run_len = next_run_len;
        }

        // Extend across characters the index skipped.
        while best_i > a_lo && best_j > b_lo && self.a[best_i - 1] == self.b[best_j - 1] {
            best_i -= 1;
            best_j -= 1;
            best_size += 1;
        }
        while best_i + best_size < a_hi
            && best_j + best_size < b_hi
            && self.a[best_i + best_size] == self.b[best_j + best_size]
        {
            best_size += 1;
        }

        (best_i, best_j, best_size)
    }
}

// ============================================================================
// TESTS
// ============================================================================
