//! Token resolution: exact match first, then a ratio-gated fuzzy match, then
//! the join from a word's fragments to root entries.

use crate::error::{LensError, Result};
use crate::index::LexiconIndex;
use crate::models::{RootEntry, WordEntry, normalize_token};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Slack for ratios such as 1/5 that are not exact in binary.
const RATIO_EPSILON: f64 = 1e-9;

/// Tuning knobs for [`Resolver`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Try approximate matches when the exact lookup fails.
    pub fuzzy_enabled: bool,
    /// Largest accepted `distance / max(len(token), len(candidate))`.
    pub acceptance_ratio: f64,
    /// Tokens shorter than this never fuzzy-match.
    pub min_fuzzy_len: usize,
    /// Optional hard cap on the edit distance searched. When set it
    /// overrides the ratio, so long tokens may miss matches the ratio allows.
    pub max_candidate_distance: Option<usize>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            fuzzy_enabled: true,
            acceptance_ratio: 0.2,
            min_fuzzy_len: 4,
            max_candidate_distance: None,
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.acceptance_ratio) {
            return Err(LensError::InvalidArgument(format!(
                "acceptance ratio must be in [0, 1), got {}",
                self.acceptance_ratio
            )));
        }
        Ok(())
    }

    /// Largest edit distance a candidate can have and still pass the ratio
    /// test against a token of `token_len` letters.
    ///
    /// A candidate at distance `d` has at most `n + d` letters, so it passes
    /// only if `d <= ratio * (n + d)`, i.e. `d <= ratio * n / (1 - ratio)`.
    pub fn search_radius(&self, token_len: usize) -> usize {
        let ratio = self.acceptance_ratio;
        let bound = (ratio * token_len as f64 / (1.0 - ratio) + RATIO_EPSILON).floor();
        let radius = bound as usize;
        self.max_candidate_distance
            .map_or(radius, |cap| radius.min(cap))
    }

    fn accepts(&self, distance: usize, token_len: usize, candidate_len: usize) -> bool {
        let longest = token_len.max(candidate_len).max(1);
        distance as f64 / longest as f64 <= self.acceptance_ratio + RATIO_EPSILON
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

/// A word the resolver settled on, with the roots its fragments name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// The normalized token that was resolved.
    pub query: String,
    pub entry: WordEntry,
    pub kind: MatchKind,
    /// Edit distance between `query` and `entry.word`; 0 for exact matches.
    pub distance: usize,
    /// `distance` over the longer of the two lengths.
    pub ratio: f64,
    pub roots: Vec<RootEntry>,
}

impl Resolution {
    /// 1.0 for exact matches, falling with the normalized distance.
    pub fn confidence(&self) -> f64 {
        1.0 - self.ratio
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ResolutionResult {
    Match(Resolution),
    NoMatch { query: String },
}

impl ResolutionResult {
    pub fn is_match(&self) -> bool {
        matches!(self, ResolutionResult::Match(_))
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        match self {
            ResolutionResult::Match(resolution) => Some(resolution),
            ResolutionResult::NoMatch { .. } => None,
        }
    }

    pub fn query(&self) -> &str {
        match self {
            ResolutionResult::Match(resolution) => &resolution.query,
            ResolutionResult::NoMatch { query } => query,
        }
    }
}

/// Resolves raw, possibly OCR-damaged tokens against a shared index.
#[derive(Debug, Clone)]
pub struct Resolver {
    index: Arc<LexiconIndex>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(index: Arc<LexiconIndex>, config: ResolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Resolver { index, config })
    }

    pub fn index(&self) -> &Arc<LexiconIndex> {
        &self.index
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn resolve(&self, raw_token: &str) -> ResolutionResult {
        let query = normalize_token(raw_token);
        if query.is_empty() {
            return ResolutionResult::NoMatch { query };
        }

        if let Some(entry) = self.index.lookup_word(&query) {
            trace!("'{}' resolved exactly.", query);
            return ResolutionResult::Match(self.finish(query, entry, MatchKind::Exact, 0));
        }

        let token_len = query.len();
        if !self.config.fuzzy_enabled || token_len < self.config.min_fuzzy_len {
            return ResolutionResult::NoMatch { query };
        }

        let radius = self.config.search_radius(token_len);
        if radius == 0 {
            return ResolutionResult::NoMatch { query };
        }
        // Ties were already broken by corpus order.
        let best = self.index.candidates(&query, radius).into_iter().next();
        match best {
            Some(candidate)
                if self
                    .config
                    .accepts(candidate.distance, token_len, candidate.entry.word.len()) =>
            {
                debug!(
                    "'{}' fuzzy-matched '{}' at distance {}.",
                    query, candidate.entry.word, candidate.distance
                );
                let entry = candidate.entry;
                let distance = candidate.distance;
                ResolutionResult::Match(self.finish(query, entry, MatchKind::Fuzzy, distance))
            }
            Some(candidate) => {
                debug!(
                    "'{}' nearest candidate '{}' rejected at distance {}.",
                    query, candidate.entry.word, candidate.distance
                );
                ResolutionResult::NoMatch { query }
            }
            None => ResolutionResult::NoMatch { query },
        }
    }

    /// Resolves each token independently, preserving order.
    pub fn resolve_all<'a>(&self, tokens: impl IntoIterator<Item = &'a str>) -> Vec<ResolutionResult> {
        tokens.into_iter().map(|t| self.resolve(t)).collect()
    }

    /// Root lookup for callers that want morphemes rather than words.
    pub fn lookup_root(&self, token: &str) -> Option<&RootEntry> {
        self.index.lookup_root(&normalize_token(token))
    }

    fn finish(&self, query: String, entry: &WordEntry, kind: MatchKind, distance: usize) -> Resolution {
        let longest = query.len().max(entry.word.len()).max(1);
        Resolution {
            roots: self.index.roots_for(entry).into_iter().cloned().collect(),
            ratio: distance as f64 / longest as f64,
            entry: entry.clone(),
            query,
            kind,
            distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_markup;

    const CORPUS: &str = r#"<body>
<p>△ ban=禁止</p>
<p>△ don=给出</p>
<p>abandon /əˈbændən/=a+ban+don=×+禁止+给出=v. 放弃</p>
<p>amateur /ˈæmətə/=adj. 业余的</p>
<p>react /riˈækt/=re+act=回+做=vi. 反应</p>
<p>reach /riːtʃ/=v. 到达</p>
<p>bad /bæd/=adj. 坏的</p>
</body>"#;

    fn index() -> Arc<LexiconIndex> {
        let corpus = parse_markup(CORPUS).unwrap();
        Arc::new(LexiconIndex::build(corpus.words, corpus.roots))
    }

    fn resolver_with_ratio(ratio: f64) -> Resolver {
        let config = ResolverConfig {
            acceptance_ratio: ratio,
            ..ResolverConfig::default()
        };
        Resolver::new(index(), config).unwrap()
    }

    #[test]
    fn test_exact_match_carries_roots() {
        let resolver = resolver_with_ratio(0.2);
        let result = resolver.resolve("Abandon");
        let resolution = result.resolution().expect("abandon resolves");
        assert_eq!(resolution.kind, MatchKind::Exact);
        assert_eq!(resolution.distance, 0);
        assert_eq!(resolution.confidence(), 1.0);
        let roots: Vec<_> = resolution.roots.iter().map(|r| (r.root.as_str(), r.meaning.as_str())).collect();
        assert_eq!(roots, vec![("ban", "禁止"), ("don", "给出")]);
    }

    #[test]
    fn test_one_letter_ocr_error() {
        let result = resolver_with_ratio(0.2).resolve("abandom");
        let resolution = result.resolution().expect("within 1/7");
        assert_eq!(resolution.kind, MatchKind::Fuzzy);
        assert_eq!(resolution.entry.word, "abandon");
        assert_eq!(resolution.query, "abandom");
        assert_eq!(resolution.distance, 1);
        assert_eq!(resolution.roots.len(), 2);

        assert_eq!(
            resolver_with_ratio(0.1).resolve("abandom"),
            ResolutionResult::NoMatch {
                query: "abandom".to_string()
            }
        );
    }

    #[test]
    fn test_short_and_empty_tokens() {
        let resolver = resolver_with_ratio(0.5);
        // "bat" is one edit from "bad" but too short to fuzz.
        assert!(!resolver.resolve("bat").is_match());
        assert!(resolver.resolve("bad").is_match());
        assert_eq!(resolver.resolve("—123—").query(), "");
        assert!(!resolver.resolve("").is_match());
    }

    #[test]
    fn test_root_only_token_is_no_match() {
        let resolver = resolver_with_ratio(0.2);
        assert!(!resolver.resolve("ban").is_match());
        assert_eq!(resolver.lookup_root("BAN").unwrap().meaning, "禁止");
    }

    #[test]
    fn test_fuzzy_disabled() {
        let config = ResolverConfig {
            fuzzy_enabled: false,
            ..ResolverConfig::default()
        };
        let resolver = Resolver::new(index(), config).unwrap();
        assert!(!resolver.resolve("abandom").is_match());
        assert!(resolver.resolve("abandon").is_match());
    }

    #[test]
    fn test_tie_breaks_by_corpus_order() {
        // "reacx" is one edit from both "react" and "reach"; react comes first.
        let result = resolver_with_ratio(0.2).resolve("reacx");
        assert_eq!(result.resolution().unwrap().entry.word, "react");
    }

    #[test]
    fn test_acceptance_is_monotonic_in_ratio() {
        let ratios = [0.0, 0.1, 0.2, 0.34, 0.5];
        let queries = [
            "abandon", "abandom", "abandn", "abnadon", "amatuer", "amateru", "reacx", "reac",
            "raech", "bda", "xyzzy", "banned",
        ];
        for query in queries {
            let accepted: Vec<bool> = ratios
                .iter()
                .map(|&r| resolver_with_ratio(r).resolve(query).is_match())
                .collect();
            for pair in accepted.windows(2) {
                assert!(
                    !pair[0] || pair[1],
                    "loosening the ratio rejected {:?}: {:?}",
                    query,
                    accepted
                );
            }
            if index().lookup_word(query).is_some() {
                assert!(accepted.iter().all(|&a| a), "exact match rejected: {}", query);
            }
        }
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let resolver = resolver_with_ratio(0.2);
        for token in ["abandon", "abandom", "nothing", ""] {
            assert_eq!(resolver.resolve(token), resolver.resolve(token));
        }
        let batch = resolver.resolve_all(["react", "amatuer"]);
        assert_eq!(batch.len(), 2);
        assert!(batch[0].is_match());
    }

    #[test]
    fn test_search_radius_matches_ratio() {
        let config = ResolverConfig::default();
        assert_eq!(config.search_radius(7), 1); // 0.2 * 7 / 0.8 = 1.75
        assert_eq!(config.search_radius(3), 0);
        assert_eq!(config.search_radius(8), 2);
        assert_eq!(config.search_radius(20), 5);
        assert_eq!(config.search_radius(100), 25);
        let capped = ResolverConfig {
            max_candidate_distance: Some(3),
            ..ResolverConfig::default()
        };
        assert_eq!(capped.search_radius(100), 3);
        let bad = ResolverConfig {
            acceptance_ratio: 1.0,
            ..ResolverConfig::default()
        };
        assert!(matches!(bad.validate(), Err(LensError::InvalidArgument(_))));
    }

    #[test]
    fn test_long_word_within_ratio_matches() {
        let corpus = parse_markup("<p>internationalization /ˌɪntənæʃənəlaɪˈzeɪʃən/=n. 国际化</p>").unwrap();
        let index = Arc::new(LexiconIndex::build(corpus.words, corpus.roots));
        // Four substitutions in twenty letters sits exactly on the 0.2 ratio.
        let token = "intxrnxtionxlizxtion";
        let resolver = Resolver::new(index.clone(), ResolverConfig::default()).unwrap();
        let result = resolver.resolve(token);
        let resolution = result.resolution().expect("ratio 4/20 is accepted");
        assert_eq!(resolution.entry.word, "internationalization");
        assert_eq!(resolution.distance, 4);

        // An explicit cap overrides the ratio.
        let capped = ResolverConfig {
            max_candidate_distance: Some(3),
            ..ResolverConfig::default()
        };
        assert!(!Resolver::new(index, capped).unwrap().resolve(token).is_match());
    }

    #[test]
    fn test_result_serializes_with_tag() {
        let json = serde_json::to_value(resolver_with_ratio(0.2).resolve("zzzz")).unwrap();
        assert_eq!(json["result"], "no_match");
        assert_eq!(json["query"], "zzzz");
    }
}
