//! Command-line interface for the wordlens vocabulary lexicon.
//!
//! Provides commands for resolving words and roots against the corpus and a
//! `watch` mode that drives the recognition loop from standard input.

use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{LevelFilter, debug, error, info, warn};
use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wordlens::{
    Command, LensError, Lexicon, LoadOptions, LoopConfig, LoopHandle, Overlay, RecognitionLoop,
    Region, Resolution, ResolutionResult, ResolverConfig, ScreenReader, TokenSelection,
    error::Result,
    models::normalize_token,
    progress::{ProgressCallback, ProgressUpdate},
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Vocabulary lexicon lookup for on-screen text", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the corpus file (defaults to the user data directory)
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// Largest accepted edit distance relative to word length
    #[arg(long, global = true, default_value_t = 0.2)]
    ratio: f64,

    /// Only accept exact matches
    #[arg(long, global = true, default_value_t = false)]
    no_fuzzy: bool,

    /// Set verbosity level (use -v, -vv, or -vvv for increasing verbosity)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve a word, tolerating recognition errors
    Lookup {
        /// The word to resolve
        word: String,
        /// Print the result as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show a root and the words built on it
    Root {
        /// The root fragment
        fragment: String,
    },
    /// Show corpus statistics
    Stats,
    /// Run the recognition loop, reading recognized text from stdin
    ///
    /// Each input line replaces the current screen text. Lines starting with
    /// ':' are commands: :start :pause :resume :toggle :stop :region x,y,w,h
    Watch {
        /// Capture region as x,y,width,height; starts the loop immediately
        #[arg(long)]
        region: Option<Region>,
        /// Milliseconds between recognition cycles
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        /// Resolve every word in the text rather than the longest one
        #[arg(long, default_value_t = false)]
        all_tokens: bool,
    },
}

/// Sets up logging based on verbosity level.
fn setup_logging(verbose: u8) {
    let log_level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter(None, log_level)
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();
}

/// Creates a progress callback that renders loading stages.
fn create_progress_callback(
    multi_progress: MultiProgress,
    progress_bars: Arc<Mutex<HashMap<String, ProgressBar>>>,
) -> ProgressCallback {
    Box::new(move |update: ProgressUpdate| {
        let Ok(mut bars) = progress_bars.lock() else {
            return true;
        };

        if update.current_item == 0 && !bars.contains_key(&update.stage_description) {
            let pb = multi_progress.add(ProgressBar::new(update.total_items.unwrap_or(0)));
            let style_template = if update.total_items.is_some() {
                "{prefix:>12.cyan.bold} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} ({percent}%) {msg}"
            } else {
                "{prefix:>12.cyan.bold} [{elapsed_precise}] {spinner} {msg}"
            };
            if let Ok(style) = ProgressStyle::default_bar().template(style_template) {
                pb.set_style(style.progress_chars("##-"));
            }
            pb.set_prefix(update.stage_description.clone());
            pb.set_message(update.message.unwrap_or_default());
            pb.enable_steady_tick(Duration::from_millis(100));
            bars.insert(update.stage_description.clone(), pb);
        } else if let Some(pb) = bars.get(&update.stage_description) {
            pb.set_position(update.current_item);
            if let Some(msg) = update.message {
                pb.set_message(msg);
            }
            if let Some(total) = update.total_items {
                if update.current_item >= total {
                    pb.finish_and_clear();
                }
            }
        }
        true
    })
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    info!("Loading lexicon...");

    let multi_progress = MultiProgress::new();
    let progress_bars = Arc::new(Mutex::new(HashMap::<String, ProgressBar>::new()));

    let callback = create_progress_callback(multi_progress.clone(), progress_bars.clone());

    let load_options = LoadOptions {
        corpus_path: cli.corpus.clone(),
        resolver: ResolverConfig {
            fuzzy_enabled: !cli.no_fuzzy,
            acceptance_ratio: cli.ratio,
            ..ResolverConfig::default()
        },
    };

    let load_handle =
        tokio::spawn(async move { Lexicon::load_with_options(load_options, Some(callback)).await });

    let load_result = load_handle.await.unwrap_or_else(|e| {
        eprintln!("Error awaiting loading task: {}", e);
        std::process::exit(1);
    });

    // Clean up progress bars
    if let Ok(bars) = progress_bars.lock() {
        for (_, pb) in bars.iter() {
            pb.finish_and_clear();
        }
    }
    drop(multi_progress);
    std::io::stdout().flush().ok();

    let lexicon = match load_result {
        Ok(lexicon) => {
            info!("Lexicon loaded successfully.");
            lexicon
        }
        Err(e) => {
            error!("Failed to load lexicon: {}", e);
            eprintln!("{}", format!("Error: {}", e).red());
            if matches!(e, LensError::DataFileNotFound(_)) && cli.corpus.is_none() {
                eprintln!("Place the corpus at the default location or pass --corpus PATH.");
            }
            std::process::exit(1);
        }
    };

    match cli.command {
        Commands::Lookup { word, json } => {
            if let Err(e) = handle_lookup(&lexicon, &word, json) {
                error!("Error during lookup command: {}", e);
                eprintln!("{}", format!("Error looking up '{}': {}", word, e).red());
                std::process::exit(1);
            }
        }
        Commands::Root { fragment } => handle_root(&lexicon, &fragment),
        Commands::Stats => handle_stats(&lexicon),
        Commands::Watch {
            region,
            interval_ms,
            all_tokens,
        } => {
            let config = LoopConfig {
                interval: Duration::from_millis(interval_ms),
                selection: if all_tokens {
                    TokenSelection::All
                } else {
                    TokenSelection::Primary
                },
            };
            if let Err(e) = handle_watch(&lexicon, region, config).await {
                error!("Error during watch command: {}", e);
                eprintln!("{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Handles the lookup command.
fn handle_lookup(lexicon: &Lexicon, word: &str, json: bool) -> Result<()> {
    info!("Looking up word: '{}'", word);
    let start_lookup = Instant::now();
    let result = lexicon.resolve(word);
    debug!("resolve('{}') took: {:?}", word, start_lookup.elapsed());

    if json {
        let text = serde_json::to_string_pretty(&result)
            .map_err(|e| LensError::Internal(format!("JSON encoding failed: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    match &result {
        ResolutionResult::Match(resolution) => print_resolution(resolution),
        ResolutionResult::NoMatch { query } => {
            println!("No entry found for '{}'.", word.yellow());
            let nearby: Vec<String> = lexicon
                .candidates(query, 3)
                .into_iter()
                .take(5)
                .map(|c| c.entry.word.clone())
                .collect();
            if !nearby.is_empty() {
                println!("  {}: {}", "Nearby".magenta(), nearby.join(", ").green());
            }
        }
    }
    Ok(())
}

/// Prints a resolved word with its roots, examples and synonyms.
fn print_resolution(resolution: &Resolution) {
    let entry = &resolution.entry;
    let mut header = format!("\n{}", entry.word.bold().cyan());
    if let Some(phonetic) = &entry.phonetic {
        header.push_str(&format!(" {}", phonetic.green()));
    }
    if resolution.query != entry.word {
        header.push_str(&format!(
            "  {}",
            format!(
                "(read as '{}', confidence {:.0}%)",
                resolution.query,
                resolution.confidence() * 100.0
            )
            .dimmed()
        ));
    }
    println!("{}", header);

    if entry.senses.is_empty() {
        println!("  {}", entry.definition);
    }
    for (i, sense) in entry.senses.iter().enumerate() {
        let pos = sense.pos.map(|p| p.to_string()).unwrap_or_default();
        println!(
            "  {}: {} {}",
            (i + 1).to_string().bold(),
            pos.italic(),
            sense.gloss
        );
    }

    if !entry.root_split.is_empty() {
        let parts: Vec<String> = entry
            .fragments()
            .map(|(fragment, meaning)| format!("{}({})", fragment, meaning))
            .collect();
        println!("  {}: {}", "Split".magenta(), parts.join(" + "));
    }
    for root in &resolution.roots {
        println!("        {} {}", format!("{}:", root.root).green(), root.meaning);
    }
    for example in &entry.examples {
        println!("        {}", example.italic());
    }
    if !entry.synonyms.is_empty() {
        println!(
            "        {}: {}",
            "Synonyms".magenta(),
            entry.synonyms.join(", ").green()
        );
    }
    for note in &entry.notes {
        println!("        {}", note.dimmed());
    }
}

/// Handles the root command.
fn handle_root(lexicon: &Lexicon, fragment: &str) {
    info!("Looking up root: '{}'", fragment);
    let Some(root) = lexicon.lookup_root(fragment) else {
        println!("No root found for '{}'.", fragment.yellow());
        return;
    };
    println!("\n{} {}", root.root.bold().cyan(), root.meaning);

    let key = normalize_token(&root.root);
    let words: Vec<&str> = lexicon
        .index()
        .words()
        .iter()
        .filter(|w| w.root_split.iter().any(|f| normalize_token(f) == key))
        .map(|w| w.word.as_str())
        .collect();
    if !words.is_empty() {
        println!(
            "  {} ({}): {}",
            "Words".magenta(),
            words.len(),
            words.join(", ").green()
        );
    }
}

/// Handles the stats command.
fn handle_stats(lexicon: &Lexicon) {
    let report = lexicon.report();
    println!("{}", "Corpus".bold().cyan());
    println!("  Paragraphs:         {}", report.paragraphs);
    println!("  Words:              {}", report.words);
    println!("  Roots:              {}", report.roots);
    println!("  Malformed words:    {}", report.malformed_words);
    println!("  Malformed roots:    {}", report.malformed_roots);
    println!("  Duplicate words:    {}", report.duplicate_words);
    println!("  Duplicate roots:    {}", report.duplicate_roots);
    println!("  Root mismatches:    {}", report.root_mismatches);
    println!(
        "  Unknown root refs:  {}",
        lexicon.index().missing_root_refs()
    );
    if let Some(markup_error) = &report.markup_error {
        println!(
            "  {}",
            format!(
                "Markup errors: {} (first: {})",
                report.markup_errors, markup_error
            )
            .red()
        );
    }
}

/// Screen reader backed by the latest line read from stdin.
#[derive(Default)]
struct StdinScreen {
    latest: Mutex<String>,
}

impl StdinScreen {
    fn show(&self, text: String) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = text;
        }
    }
}

impl ScreenReader for StdinScreen {
    type Image = String;

    fn capture(&self, _region: Region) -> String {
        self.latest.lock().map(|t| t.clone()).unwrap_or_default()
    }

    fn recognize(&self, image: &String) -> String {
        image.clone()
    }
}

/// Prints resolutions to the terminal.
struct TerminalOverlay;

impl Overlay for TerminalOverlay {
    fn update(&self, result: &ResolutionResult) {
        if let Some(resolution) = result.resolution() {
            print_resolution(resolution);
        }
    }

    fn clear(&self) {
        println!("{}", "(no entry)".dimmed());
    }
}

fn parse_control(line: &str) -> std::result::Result<Command, String> {
    let mut parts = line.trim_start_matches(':').split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("start"), None) => Ok(Command::Start),
        (Some("pause"), None) => Ok(Command::Pause),
        (Some("resume"), None) => Ok(Command::Resume),
        (Some("toggle"), None) => Ok(Command::Toggle),
        (Some("stop"), None) => Ok(Command::Stop),
        (Some("region"), Some(region)) => region.parse().map(Command::SetRegion),
        _ => Err(format!("Unknown command '{}'", line.trim())),
    }
}

/// Feeds input lines to the loop until EOF, then stops it.
fn feed_lines<R: BufRead>(input: R, screen: &StdinScreen, handle: &LoopHandle) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read input: {}", e);
                break;
            }
        };
        if line.starts_with(':') {
            match parse_control(&line) {
                Ok(command) => {
                    if let Err(e) = handle.send(command) {
                        debug!("Dropping {:?}: {}", command, e);
                        return;
                    }
                }
                Err(msg) => eprintln!("{}", msg.yellow()),
            }
        } else {
            screen.show(line);
        }
    }
    if let Err(e) = handle.stop() {
        // The loop already stopped itself, e.g. after :stop.
        debug!("Stop at end of input not delivered: {}", e);
    }
}

/// Handles the watch command.
async fn handle_watch(lexicon: &Lexicon, region: Option<Region>, config: LoopConfig) -> Result<()> {
    info!("Starting recognition loop with {:?}", config);
    let screen = Arc::new(StdinScreen::default());
    let coordinator = RecognitionLoop::new(
        lexicon.resolver(),
        screen.clone(),
        Arc::new(TerminalOverlay),
        config,
    )?;
    let (handle, join) = coordinator.spawn();

    match region {
        Some(region) => {
            handle.set_region(region)?;
            handle.start()?;
        }
        None => println!(
            "{}",
            "Set a region with :region x,y,w,h, then :start.".dimmed()
        ),
    }

    // A plain thread; it is never joined, so a pending read cannot hold up exit.
    let reader_handle = handle.clone();
    std::thread::spawn(move || feed_lines(std::io::stdin().lock(), &screen, &reader_handle));

    join.await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wordlens::LoopState;

    fn watch_loop() -> (LoopHandle, tokio::task::JoinHandle<()>, Arc<StdinScreen>) {
        let lexicon =
            Lexicon::from_markup("<p>abandon /a/=v. 放弃</p>", ResolverConfig::default()).unwrap();
        let screen = Arc::new(StdinScreen::default());
        let config = LoopConfig {
            interval: Duration::from_millis(5),
            ..LoopConfig::default()
        };
        let coordinator =
            RecognitionLoop::new(lexicon.resolver(), screen.clone(), Arc::new(TerminalOverlay), config)
                .unwrap();
        let (handle, join) = coordinator.spawn();
        (handle, join, screen)
    }

    #[test]
    fn test_parse_control() {
        assert_eq!(parse_control(":start"), Ok(Command::Start));
        assert_eq!(parse_control(":toggle "), Ok(Command::Toggle));
        assert_eq!(
            parse_control(":region 1,2,30,40"),
            Ok(Command::SetRegion(Region {
                x: 1,
                y: 2,
                width: 30,
                height: 40
            }))
        );
        assert!(parse_control(":region").is_err());
        assert!(parse_control(":jump").is_err());
    }

    #[tokio::test]
    async fn test_input_lines_drive_loop() {
        let (handle, join, screen) = watch_loop();
        feed_lines(
            "abandon\n:region 0,0,10,10\n:start\n:bogus\n:stop\n".as_bytes(),
            &screen,
            &handle,
        );
        join.await.unwrap();
        assert_eq!(handle.state(), LoopState::Stopped);
        let region: Region = "0,0,1,1".parse().unwrap();
        assert_eq!(screen.capture(region), "abandon");
    }

    #[tokio::test]
    async fn test_input_after_loop_stopped_is_dropped() {
        let (handle, join, screen) = watch_loop();
        handle.stop().unwrap();
        join.await.unwrap();

        // Both the command and the stop at EOF find the loop gone.
        feed_lines(":start\nreact\n".as_bytes(), &screen, &handle);
        assert_eq!(handle.state(), LoopState::Stopped);
        assert!(matches!(handle.stop(), Err(LensError::LoopClosed)));
    }
}
