// Declare modules
pub mod data;
pub mod error;
pub mod index;
pub mod models;
pub mod parse;
pub mod progress;
pub mod recognition;
pub mod resolve;

// Re-export key types for easier use
pub use error::{LensError, Result};
pub use index::{Candidate, LexiconIndex};
pub use models::{PartOfSpeech, RootEntry, Sense, WordEntry};
pub use parse::{ParseReport, ParsedCorpus};
pub use recognition::{
    Command, CycleOutcome, LoopConfig, LoopHandle, LoopState, Overlay, RecognitionLoop, Region,
    ScreenReader, TokenSelection,
};
pub use resolve::{MatchKind, Resolution, ResolutionResult, Resolver, ResolverConfig};

use log::{info, warn};
use progress::{ProgressCallback, ProgressUpdate, report};
use std::path::PathBuf;
use std::sync::Arc;

/// Options for loading a lexicon.
#[derive(Debug, Default, Clone)]
pub struct LoadOptions {
    /// Optional path to the corpus file.
    /// If None, the default location based on ProjectDirs will be used.
    pub corpus_path: Option<PathBuf>,
    /// Settings for the resolver built over the loaded index.
    pub resolver: ResolverConfig,
}

/// A loaded vocabulary lexicon and the resolver over it.
///
/// Cheap to clone; the index is shared and never mutated after load.
///
/// ```
/// use wordlens::{Lexicon, ResolverConfig};
///
/// let markup = "<p>△ ban=禁止</p><p>abandon /əˈbændən/=a+ban+don=×+禁止+给出=v. 放弃</p>";
/// let lexicon = Lexicon::from_markup(markup, ResolverConfig::default()).unwrap();
/// let result = lexicon.resolve("abandom");
/// assert_eq!(result.resolution().unwrap().entry.word, "abandon");
///
/// // The async loader reads the same format from disk.
/// let missing = tokio_test::block_on(Lexicon::load_with_options(
///     wordlens::LoadOptions {
///         corpus_path: Some("/nonexistent/content.htm".into()),
///         ..Default::default()
///     },
///     None,
/// ));
/// assert!(missing.is_err());
/// ```
#[derive(Debug, Clone)]
pub struct Lexicon {
    resolver: Arc<Resolver>,
    report: Arc<ParseReport>,
}

impl Lexicon {
    /// Loads the corpus from the default data directory with default settings.
    pub async fn load() -> Result<Self> {
        Self::load_with_options(LoadOptions::default(), None).await
    }

    /// Loads the corpus with specific options.
    ///
    /// Reports progress for the read, parse and index stages.
    pub async fn load_with_options(
        options: LoadOptions,
        mut progress: Option<ProgressCallback>,
    ) -> Result<Self> {
        options.resolver.validate()?;

        // 1. Locate the corpus
        let corpus_path = match options.corpus_path {
            Some(path) => {
                info!("Using provided corpus path: {:?}", path);
                path
            }
            None => Self::get_default_corpus_path()?,
        };

        // 2. Read it
        stage(&mut progress, ProgressUpdate::new_stage("Reading", None))?;
        let markup = data::read_corpus(&corpus_path).await?;
        stage(
            &mut progress,
            ProgressUpdate::finished("Reading", markup.len() as u64, None),
        )?;

        // 3. Parse it off the async workers
        stage(&mut progress, ProgressUpdate::new_stage("Parsing", None))?;
        let corpus = parse::parse_corpus(markup).await?;
        stage(
            &mut progress,
            ProgressUpdate::finished(
                "Parsing",
                corpus.report.paragraphs as u64,
                Some(format!(
                    "{} words, {} roots",
                    corpus.words.len(),
                    corpus.roots.len()
                )),
            ),
        )?;

        // 4. Index
        let word_count = corpus.words.len() as u64;
        stage(
            &mut progress,
            ProgressUpdate::new_stage("Indexing", Some(word_count)),
        )?;
        let lexicon = Self::from_corpus(corpus, options.resolver)?;
        stage(
            &mut progress,
            ProgressUpdate::finished("Indexing", word_count, None),
        )?;

        info!(
            "Lexicon ready: {} words, {} roots.",
            lexicon.index().len(),
            lexicon.index().roots().len()
        );
        Ok(lexicon)
    }

    /// Builds a lexicon from corpus text already in memory.
    pub fn from_markup(markup: &str, config: ResolverConfig) -> Result<Self> {
        config.validate()?;
        Self::from_corpus(parse::parse_markup(markup)?, config)
    }

    fn from_corpus(corpus: ParsedCorpus, config: ResolverConfig) -> Result<Self> {
        if corpus.words.is_empty() {
            warn!(
                "Corpus yielded no word entries ({} paragraphs, {} roots).",
                corpus.report.paragraphs,
                corpus.roots.len()
            );
            return Err(LensError::EmptyLexicon);
        }
        let index = Arc::new(LexiconIndex::build(corpus.words, corpus.roots));
        let resolver = Resolver::new(index, config)?;
        Ok(Lexicon {
            resolver: Arc::new(resolver),
            report: Arc::new(corpus.report),
        })
    }

    /// Gets the default path of the corpus file.
    pub fn get_default_corpus_path() -> Result<PathBuf> {
        data::default_corpus_path()
    }

    // --- Query Methods ---

    pub fn resolve(&self, token: &str) -> ResolutionResult {
        self.resolver.resolve(token)
    }

    pub fn lookup_word(&self, word: &str) -> Option<&WordEntry> {
        self.index().lookup_word(word)
    }

    pub fn lookup_root(&self, fragment: &str) -> Option<&RootEntry> {
        self.resolver.lookup_root(fragment)
    }

    /// Fuzzy candidates for `token` within `max_distance` edits.
    pub fn candidates(&self, token: &str, max_distance: usize) -> Vec<Candidate<'_>> {
        self.index().candidates(token, max_distance)
    }

    pub fn roots_for(&self, entry: &WordEntry) -> Vec<&RootEntry> {
        self.index().roots_for(entry)
    }

    /// What the parser kept and skipped while loading.
    pub fn report(&self) -> &ParseReport {
        &self.report
    }

    pub fn index(&self) -> &LexiconIndex {
        self.resolver.index()
    }

    /// Shared resolver, e.g. for a [`RecognitionLoop`].
    pub fn resolver(&self) -> Arc<Resolver> {
        Arc::clone(&self.resolver)
    }
}

fn stage(progress: &mut Option<ProgressCallback>, update: ProgressUpdate) -> Result<()> {
    let description = update.stage_description.clone();
    if report(progress, update) {
        Ok(())
    } else {
        warn!("Loading cancelled during stage '{}'.", description);
        Err(LensError::Internal(format!(
            "loading cancelled during {}",
            description.to_lowercase()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    const CORPUS: &str = r#"<html><head><title>词根词缀</title></head><body>
<p>△ ban=禁止</p>
<p>△ don, dit=给出</p>
<p>abandon /əˈbændən/=a+ban+don=×+禁止+给出=v. 放弃【真题意群】abandon the plan</p>
<p>edit /ˈedɪt/=e+dit=出+给出=vt. 编辑</p>
</body></html>"#;

    fn write_corpus(dir: &std::path::Path, text: &str) -> PathBuf {
        let path = dir.join("content.htm");
        std::fs::write(&path, text).expect("Failed to write corpus");
        path
    }

    #[tokio::test]
    async fn test_load_from_file_reports_progress() {
        let _ = env_logger::builder().is_test(true).try_init();
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = write_corpus(temp_dir.path(), CORPUS);

        let stages = Arc::new(Mutex::new(Vec::new()));
        let seen = stages.clone();
        let callback: ProgressCallback = Box::new(move |update: ProgressUpdate| {
            seen.lock().unwrap().push(update.stage_description);
            true
        });
        let options = LoadOptions {
            corpus_path: Some(path),
            ..Default::default()
        };
        let lexicon = Lexicon::load_with_options(options, Some(callback))
            .await
            .expect("corpus loads");

        assert_eq!(lexicon.index().len(), 2);
        assert_eq!(lexicon.report().roots, 3);
        let abandon = lexicon.lookup_word("abandon").unwrap();
        assert_eq!(abandon.examples, vec!["abandon the plan"]);
        let roots: Vec<_> = lexicon.roots_for(abandon).iter().map(|r| r.root.clone()).collect();
        assert_eq!(roots, vec!["ban", "don"]);
        assert_eq!(lexicon.lookup_root("dit").unwrap().meaning, "给出");

        let stages = stages.lock().unwrap();
        assert_eq!(stages.first().map(String::as_str), Some("Reading"));
        assert_eq!(stages.last().map(String::as_str), Some("Indexing"));
        assert_eq!(stages.len(), 6);
    }

    #[tokio::test]
    async fn test_cancelled_load() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = write_corpus(temp_dir.path(), CORPUS);
        let options = LoadOptions {
            corpus_path: Some(path),
            ..Default::default()
        };
        let callback: ProgressCallback = Box::new(|_| false);
        let result = Lexicon::load_with_options(options, Some(callback)).await;
        assert!(matches!(result, Err(LensError::Internal(_))));
    }

    #[tokio::test]
    async fn test_missing_corpus_file() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let options = LoadOptions {
            corpus_path: Some(temp_dir.path().join("missing.htm")),
            ..Default::default()
        };
        let result = Lexicon::load_with_options(options, None).await;
        assert!(matches!(result, Err(LensError::DataFileNotFound(_))));
    }

    #[test]
    fn test_startup_failures() {
        assert!(matches!(
            Lexicon::from_markup("", ResolverConfig::default()),
            Err(LensError::ParseError(_))
        ));
        assert!(matches!(
            Lexicon::from_markup("<p>△ ban=禁止</p><p>just prose</p>", ResolverConfig::default()),
            Err(LensError::EmptyLexicon)
        ));
        let bad = ResolverConfig {
            acceptance_ratio: -0.5,
            ..ResolverConfig::default()
        };
        assert!(matches!(
            Lexicon::from_markup(CORPUS, bad),
            Err(LensError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_resolve_through_facade() {
        let lexicon = Lexicon::from_markup(CORPUS, ResolverConfig::default()).unwrap();
        let result = lexicon.resolve("ABANDON");
        assert_eq!(result.resolution().unwrap().kind, MatchKind::Exact);
        assert!(!lexicon.resolve("ban").is_match());
        assert_eq!(lexicon.candidates("edot", 1).len(), 1);
        assert_eq!(lexicon.resolver().index().len(), 2);
    }
}
