//! Recognition loop coordinator.
//!
//! A single task owns the loop state, the capture region and the debounce
//! memory. Control commands arrive over a channel and are applied between
//! cycles; each cycle captures the region, recognizes text, picks tokens and
//! forwards resolutions to the overlay. Screen capture and OCR are treated as
//! slow blocking calls and run on the blocking pool.

use crate::error::{LensError, Result};
use crate::resolve::{ResolutionResult, Resolver};
use log::{debug, info, trace, warn};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinHandle};
use tokio::time::{self, MissedTickBehavior};

/// Default gap between cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

// ASCII runs only, so English next to CJK text still splits cleanly.
static WORD_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]{2,}").expect("valid regex"));

/// Screen rectangle in logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{} {}x{}", self.x, self.y, self.width, self.height)
    }
}

// Parses "x,y,width,height".
impl std::str::FromStr for Region {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [x, y, width, height] = parts.as_slice() else {
            return Err(format!("Invalid region '{}': expected x,y,width,height", s));
        };
        let invalid = |what: &str| format!("Invalid region '{}': bad {}", s, what);
        let region = Region {
            x: x.parse().map_err(|_| invalid("x"))?,
            y: y.parse().map_err(|_| invalid("y"))?,
            width: width.parse().map_err(|_| invalid("width"))?,
            height: height.parse().map_err(|_| invalid("height"))?,
        };
        if region.width == 0 || region.height == 0 {
            return Err(format!("Invalid region '{}': empty area", s));
        }
        Ok(region)
    }
}

/// Screen capture plus text recognition.
///
/// Both calls may be slow and block; they run off the async workers. An
/// unreadable frame should come back as empty text.
pub trait ScreenReader: Send + Sync + 'static {
    type Image: Send + 'static;

    fn capture(&self, region: Region) -> Self::Image;
    fn recognize(&self, image: &Self::Image) -> String;
}

/// Where resolutions are shown. Fire-and-forget.
pub trait Overlay: Send + Sync + 'static {
    fn update(&self, result: &ResolutionResult);
    fn clear(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopState {
    Idle,
    Running,
    Paused,
    /// Terminal.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    /// Running <-> Paused.
    Toggle,
    Stop,
    SetRegion(Region),
}

/// Which tokens of a recognized text are worth resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenSelection {
    /// The longest token only (the first one on ties).
    #[default]
    Primary,
    /// Every distinct token not already seen in the previous cycle.
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Minimum gap between the starts of two cycles.
    pub interval: Duration,
    pub selection: TokenSelection,
}

impl Default for LoopConfig {
    fn default() -> Self {
        LoopConfig {
            interval: DEFAULT_INTERVAL,
            selection: TokenSelection::default(),
        }
    }
}

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Not running, or no region yet; nothing was captured.
    Inactive(LoopState),
    NoTokens,
    /// Tokens were read but none changed since the previous cycle.
    Unchanged,
    Resolved(Vec<ResolutionResult>),
}

/// Candidate English words in recognized text: lowercase, deduplicated, in
/// order of first appearance.
pub fn extract_tokens(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    WORD_RUN
        .find_iter(text)
        .map(|m| m.as_str().to_ascii_lowercase())
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

/// The longest token; the earliest wins a tie.
pub fn primary_token(tokens: &[String]) -> Option<&String> {
    tokens.iter().fold(None, |best: Option<&String>, token| match best {
        Some(b) if b.len() >= token.len() => Some(b),
        _ => Some(token),
    })
}

/// Sends commands to a running loop and observes its state.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<LoopState>,
}

impl LoopHandle {
    pub fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| LensError::LoopClosed)
    }

    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    pub fn toggle(&self) -> Result<()> {
        self.send(Command::Toggle)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn set_region(&self, region: Region) -> Result<()> {
        self.send(Command::SetRegion(region))
    }

    /// Last state published by the loop.
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Waits until the loop reports `target`.
    pub async fn wait_for(&mut self, target: LoopState) -> Result<()> {
        self.state
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| LensError::LoopClosed)
    }
}

/// The coordinator. Owns all mutable loop state.
pub struct RecognitionLoop<S: ScreenReader, O: Overlay> {
    resolver: Arc<Resolver>,
    screen: Arc<S>,
    overlay: Arc<O>,
    config: LoopConfig,
    state: LoopState,
    region: Option<Region>,
    last_token: Option<String>,
    previous_tokens: HashSet<String>,
    state_tx: watch::Sender<LoopState>,
}

impl<S: ScreenReader, O: Overlay> RecognitionLoop<S, O> {
    pub fn new(
        resolver: Arc<Resolver>,
        screen: Arc<S>,
        overlay: Arc<O>,
        config: LoopConfig,
    ) -> Result<Self> {
        if config.interval.is_zero() {
            return Err(LensError::InvalidArgument(
                "recognition interval must be positive".to_string(),
            ));
        }
        let (state_tx, _) = watch::channel(LoopState::Idle);
        Ok(RecognitionLoop {
            resolver,
            screen,
            overlay,
            config,
            state: LoopState::Idle,
            region: None,
            last_token: None,
            previous_tokens: HashSet::new(),
            state_tx,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    /// Applies one control command and returns the resulting state.
    pub fn apply(&mut self, command: Command) -> LoopState {
        use LoopState::*;

        let next = match (self.state, command) {
            (Stopped, _) => Stopped,
            (_, Command::Stop) => Stopped,
            (state, Command::SetRegion(region)) => {
                info!("Capture region set to {}.", region);
                self.region = Some(region);
                self.forget_tokens();
                state
            }
            (Idle, Command::Start) => {
                if self.region.is_some() {
                    Running
                } else {
                    warn!("Start requested before a capture region was set; staying idle.");
                    Idle
                }
            }
            (Running, Command::Pause | Command::Toggle) => Paused,
            (Paused, Command::Resume | Command::Toggle | Command::Start) => Running,
            (state, command) => {
                debug!("Ignoring {:?} while {:?}.", command, state);
                state
            }
        };

        if next != self.state {
            info!("Recognition loop: {:?} -> {:?}", self.state, next);
            self.state = next;
            self.state_tx.send_replace(next);
            if next == Stopped {
                self.overlay.clear();
            }
        }
        next
    }

    /// Runs one cycle if the loop is running; otherwise does nothing.
    pub async fn tick(&mut self) -> CycleOutcome {
        let region = match (self.state, self.region) {
            (LoopState::Running, Some(region)) => region,
            (state, _) => return CycleOutcome::Inactive(state),
        };

        let screen = Arc::clone(&self.screen);
        let recognized = task::spawn_blocking(move || {
            let image = screen.capture(region);
            screen.recognize(&image)
        })
        .await;
        let text = match recognized {
            Ok(text) => text,
            Err(e) => {
                warn!("Screen recognition failed: {}", e);
                String::new()
            }
        };
        self.observe(&text)
    }

    fn observe(&mut self, text: &str) -> CycleOutcome {
        let tokens = extract_tokens(text);
        if tokens.is_empty() {
            return CycleOutcome::NoTokens;
        }

        let fresh: Vec<String> = match self.config.selection {
            TokenSelection::Primary => primary_token(&tokens)
                .filter(|token| self.last_token.as_ref() != Some(*token))
                .cloned()
                .into_iter()
                .collect(),
            TokenSelection::All => {
                let fresh = tokens
                    .iter()
                    .filter(|token| {
                        !self.previous_tokens.contains(*token)
                            && self.last_token.as_ref() != Some(*token)
                    })
                    .cloned()
                    .collect();
                self.previous_tokens = tokens.into_iter().collect();
                fresh
            }
        };
        if fresh.is_empty() {
            return CycleOutcome::Unchanged;
        }

        let mut results = Vec::with_capacity(fresh.len());
        for token in fresh {
            let result = self.resolver.resolve(&token);
            match result.resolution() {
                Some(resolution) => {
                    info!("'{}' -> '{}' ({:?})", token, resolution.entry.word, resolution.kind);
                    self.overlay.update(&result);
                }
                None => {
                    debug!("No entry for '{}'.", token);
                    self.overlay.clear();
                }
            }
            self.last_token = Some(token);
            results.push(result);
        }
        CycleOutcome::Resolved(results)
    }

    fn forget_tokens(&mut self) {
        self.last_token = None;
        self.previous_tokens.clear();
    }

    /// Drives the loop until it is stopped or every handle is dropped.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(
            "Recognition loop started (interval {:?}).",
            self.config.interval
        );
        let mut ticker = time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.state != LoopState::Stopped {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    self.apply(command.unwrap_or(Command::Stop));
                }
                _ = ticker.tick() => {
                    let outcome = self.tick().await;
                    trace!("Cycle outcome: {:?}", outcome);
                }
            }
        }
        info!("Recognition loop finished.");
    }

    /// Moves the loop onto its own task.
    pub fn spawn(self) -> (LoopHandle, JoinHandle<()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let handle = LoopHandle {
            commands,
            state: self.state_tx.subscribe(),
        };
        let join = tokio::spawn(self.run(receiver));
        (handle, join)
    }
}
