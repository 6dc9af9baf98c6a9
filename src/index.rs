//! In-memory lexicon index.
//!
//! Words and roots live in two arenas in corpus order. Exact lookups go
//! through key maps into those arenas; approximate lookups walk only the
//! length buckets that can hold a match and prune each candidate with a
//! letter-count bound before paying for a full edit distance.

use crate::models::{RootEntry, WordEntry, normalize_token};
use log::{debug, info, warn};
use std::collections::HashMap;

/// 26 letters plus one shared class for everything else.
const CLASSES: usize = 27;

type LetterCounts = [u16; CLASSES];

/// A fuzzy candidate and its edit distance from the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate<'a> {
    pub entry: &'a WordEntry,
    pub distance: usize,
    /// Position of the entry in corpus order; the tie-break key.
    pub ordinal: usize,
}

/// Read-only lookup structures over a parsed lexicon.
#[derive(Debug, Clone, Default)]
pub struct LexiconIndex {
    words: Vec<WordEntry>,
    word_keys: HashMap<String, usize>,
    roots: Vec<RootEntry>,
    root_keys: HashMap<String, usize>,
    /// `length_buckets[n]` holds ordinals of words with `n` letters, ascending.
    length_buckets: Vec<Vec<usize>>,
    letter_counts: Vec<LetterCounts>,
    missing_root_refs: usize,
}

impl LexiconIndex {
    /// Builds the index. Later duplicates of a key replace earlier ones but
    /// keep the earlier position, matching the parser's rule.
    pub fn build(word_entries: Vec<WordEntry>, root_entries: Vec<RootEntry>) -> Self {
        let mut words: Vec<WordEntry> = Vec::with_capacity(word_entries.len());
        let mut word_keys = HashMap::with_capacity(word_entries.len());
        for mut entry in word_entries {
            entry.word = entry.word.to_ascii_lowercase();
            match word_keys.get(&entry.word) {
                Some(&slot) => words[slot] = entry,
                None => {
                    word_keys.insert(entry.word.clone(), words.len());
                    words.push(entry);
                }
            }
        }

        let mut roots: Vec<RootEntry> = Vec::with_capacity(root_entries.len());
        let mut root_keys = HashMap::with_capacity(root_entries.len());
        for mut entry in root_entries {
            entry.root = entry.root.to_ascii_lowercase();
            match root_keys.get(&entry.root) {
                Some(&slot) => roots[slot] = entry,
                None => {
                    root_keys.insert(entry.root.clone(), roots.len());
                    roots.push(entry);
                }
            }
        }

        let mut length_buckets: Vec<Vec<usize>> = Vec::new();
        let mut letter_counts = Vec::with_capacity(words.len());
        for (ordinal, entry) in words.iter().enumerate() {
            let len = entry.word.chars().count();
            if length_buckets.len() <= len {
                length_buckets.resize_with(len + 1, Vec::new);
            }
            length_buckets[len].push(ordinal);
            letter_counts.push(count_letters(&entry.word));
        }

        let mut index = LexiconIndex {
            words,
            word_keys,
            roots,
            root_keys,
            length_buckets,
            letter_counts,
            missing_root_refs: 0,
        };
        index.missing_root_refs = index.count_missing_root_refs();
        info!(
            "Built lexicon index: {} words, {} roots, {} length buckets.",
            index.words.len(),
            index.roots.len(),
            index.length_buckets.len()
        );
        if index.missing_root_refs > 0 {
            warn!(
                "{} root fragments do not resolve to a root entry.",
                index.missing_root_refs
            );
        }
        index
    }

    fn count_missing_root_refs(&self) -> usize {
        let mut missing = 0;
        for entry in &self.words {
            for fragment in &entry.root_split {
                let key = normalize_token(fragment);
                if !key.is_empty() && !self.root_keys.contains_key(&key) {
                    debug!("Fragment '{}' of '{}' has no root entry.", fragment, entry.word);
                    missing += 1;
                }
            }
        }
        missing
    }

    /// Exact, case-insensitive word lookup.
    pub fn lookup_word(&self, token: &str) -> Option<&WordEntry> {
        let key = token.trim().to_ascii_lowercase();
        self.word_keys.get(&key).map(|&i| &self.words[i])
    }

    /// Exact, case-insensitive root lookup.
    pub fn lookup_root(&self, token: &str) -> Option<&RootEntry> {
        let key = token.trim().to_ascii_lowercase();
        self.root_keys.get(&key).map(|&i| &self.roots[i])
    }

    /// All words within `max_distance` edits of `token`, nearest first, ties
    /// in corpus order.
    pub fn candidates(&self, token: &str, max_distance: usize) -> Vec<Candidate<'_>> {
        let query = token.trim().to_ascii_lowercase();
        let query_len = query.chars().count();
        let query_counts = count_letters(&query);

        let lo = query_len.saturating_sub(max_distance);
        let hi = (query_len + max_distance).min(self.length_buckets.len().saturating_sub(1));

        if self.length_buckets.is_empty() || lo > hi {
            return Vec::new();
        }
        let mut found: Vec<(usize, usize)> = Vec::new();
        for bucket in &self.length_buckets[lo..=hi] {
            for &ordinal in bucket {
                let bound = letter_bound(&query_counts, &self.letter_counts[ordinal]);
                if bound > max_distance {
                    continue;
                }
                let distance = strsim::levenshtein(&query, &self.words[ordinal].word);
                if distance <= max_distance {
                    found.push((distance, ordinal));
                }
            }
        }
        found.sort_unstable();
        found
            .into_iter()
            .map(|(distance, ordinal)| Candidate {
                entry: &self.words[ordinal],
                distance,
                ordinal,
            })
            .collect()
    }

    /// The roots a word's fragments refer to, in fragment order. Fragments
    /// without a root entry are skipped, as are repeats.
    pub fn roots_for(&self, entry: &WordEntry) -> Vec<&RootEntry> {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for fragment in &entry.root_split {
            let key = normalize_token(fragment);
            if let Some(&i) = self.root_keys.get(&key) {
                if !seen.contains(&i) {
                    seen.push(i);
                    out.push(&self.roots[i]);
                }
            }
        }
        out
    }

    pub fn words(&self) -> &[WordEntry] {
        &self.words
    }

    pub fn roots(&self) -> &[RootEntry] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Fragment references with no matching root, counted at build time.
    pub fn missing_root_refs(&self) -> usize {
        self.missing_root_refs
    }
}

/// Letter counts with every character outside `a..=z` pooled in the last slot.
fn count_letters(word: &str) -> LetterCounts {
    let mut counts = [0u16; CLASSES];
    for c in word.chars() {
        let class = if c.is_ascii_lowercase() {
            (c as u8 - b'a') as usize
        } else {
            CLASSES - 1
        };
        counts[class] = counts[class].saturating_add(1);
    }
    counts
}

/// Bag distance, a lower bound on Levenshtein distance.
fn letter_bound(query: &LetterCounts, entry: &LetterCounts) -> usize {
    let mut surplus = 0;
    let mut deficit = 0;
    for (q, e) in query.iter().zip(entry.iter()) {
        if q > e {
            surplus += (q - e) as usize;
        } else {
            deficit += (e - q) as usize;
        }
    }
    surplus.max(deficit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(word: &str) -> WordEntry {
        WordEntry::new(word, format!("def of {}", word))
    }

    fn sample_index() -> LexiconIndex {
        let mut abandon = entry("abandon");
        abandon.root_split = vec!["a".into(), "ban".into(), "don".into()];
        abandon.root_meaning = vec!["×".into(), "禁止".into(), "给出".into()];
        LexiconIndex::build(
            vec![
                abandon,
                entry("band"),
                entry("bank"),
                entry("hand"),
                entry("abundant"),
                entry("amateur"),
            ],
            vec![RootEntry::new("ban", "禁止"), RootEntry::new("Don", "给出")],
        )
    }

    #[test]
    fn test_lookup_round_trip() {
        let index = sample_index();
        for word in index.words() {
            assert_eq!(index.lookup_word(&word.word), Some(word));
        }
        assert_eq!(index.lookup_word("  ABANDON ").unwrap().word, "abandon");
        assert!(index.lookup_word("aband").is_none());
    }

    #[test]
    fn test_lookup_root_case_insensitive() {
        let index = sample_index();
        assert_eq!(index.lookup_root("BAN").unwrap().meaning, "禁止");
        assert_eq!(index.lookup_root("don").unwrap().meaning, "给出");
        assert!(index.lookup_root("abandon").is_none());
        assert_eq!(index.missing_root_refs(), 1); // "a"
    }

    #[test]
    fn test_candidates_sorted_by_distance_then_order() {
        let index = sample_index();
        let found: Vec<_> = index
            .candidates("bant", 1)
            .into_iter()
            .map(|c| (c.entry.word.as_str(), c.distance))
            .collect();
        assert_eq!(found, vec![("band", 1), ("bank", 1)]);

        let found: Vec<_> = index
            .candidates("band", 1)
            .into_iter()
            .map(|c| (c.entry.word.as_str(), c.distance))
            .collect();
        assert_eq!(found, vec![("band", 0), ("bank", 1), ("hand", 1)]);
    }

    #[test]
    fn test_candidates_complete_against_brute_force() {
        let index = sample_index();
        for query in ["abandom", "bnad", "xyz", "amatuer", "abundance", "", "zzzzzzzzzzzz"] {
            for max in 0..4 {
                let mut expected: Vec<(usize, usize)> = index
                    .words()
                    .iter()
                    .enumerate()
                    .map(|(i, w)| (strsim::levenshtein(query, &w.word), i))
                    .filter(|(d, _)| *d <= max)
                    .collect();
                expected.sort();
                let got: Vec<(usize, usize)> = index
                    .candidates(query, max)
                    .into_iter()
                    .map(|c| (c.distance, c.ordinal))
                    .collect();
                assert_eq!(got, expected, "query {:?} max {}", query, max);
            }
        }
    }

    #[test]
    fn test_roots_for_skips_missing_fragments() {
        let index = sample_index();
        let abandon = index.lookup_word("abandon").unwrap();
        let roots: Vec<_> = index.roots_for(abandon).iter().map(|r| r.root.as_str()).collect();
        assert_eq!(roots, vec!["ban", "don"]);
        assert!(index.roots_for(index.lookup_word("band").unwrap()).is_empty());
    }

    #[test]
    fn test_duplicate_keys_keep_first_position() {
        let index = LexiconIndex::build(
            vec![entry("ban"), entry("act"), WordEntry::new("ban", "second")],
            Vec::new(),
        );
        assert_eq!(index.len(), 2);
        assert_eq!(index.words()[0].definition, "second");
    }

    #[test]
    fn test_letter_bound_is_lower_bound() {
        let a = count_letters("abandom");
        let b = count_letters("abandon");
        assert_eq!(letter_bound(&a, &b), 1);
        assert!(letter_bound(&a, &b) <= strsim::levenshtein("abandom", "abandon"));
        // Non-letters pool together rather than counting as mismatches.
        assert_eq!(letter_bound(&count_letters("a-b"), &count_letters("a-b")), 0);
    }
}
