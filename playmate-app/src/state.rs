//! In-memory game state and the action dispatcher the session drives.
//!
//! The state lives in a `watch` channel: the dispatcher is the writer, the
//! console (or any UI) subscribes and redraws on change.

use playmate_core::{
    actions::{CharacterColor, CharacterKind},
    error::{PlaymateError, Result},
    ActionCall, ActionDispatcher, AppAction, Screen, Shape,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::cipher::{self, GuessOutcome};

pub const STARTING_LIVES: u32 = 3;
const POINTS_PER_LEVEL: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Sad,
    Neutral,
}

/// The character being built on the character creator screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterDraft {
    #[serde(rename = "type")]
    pub kind: CharacterKind,
    pub color: CharacterColor,
    pub accessory: String,
    /// Set when the agent asked for the final picture.
    pub image_requested: bool,
}

impl Default for CharacterDraft {
    fn default() -> Self {
        Self {
            kind: CharacterKind::Cat,
            color: CharacterColor::Orange,
            accessory: String::new(),
            image_requested: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub current_screen: Screen,
    pub character: CharacterDraft,
    /// Template the painting canvas should render next.
    pub pending_shape: Option<Shape>,
    pub avatar_mood: Mood,
    pub game_level: u32,
    pub lives: u32,
    pub score: u32,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            current_screen: Screen::Menu,
            character: CharacterDraft::default(),
            pending_shape: None,
            avatar_mood: Mood::Happy,
            game_level: 1,
            lives: STARTING_LIVES,
            score: 0,
        }
    }
}

impl GameState {
    /// Apply a validated action. Leaves the state untouched on error.
    fn apply(&mut self, action: AppAction) -> Result<()> {
        match action {
            AppAction::Navigate { screen } => {
                self.current_screen = screen;
            }
            AppAction::UpdateCharacter {
                kind,
                color,
                accessory,
            } => {
                if let Some(kind) = kind {
                    self.character.kind = kind;
                }
                if let Some(color) = color {
                    self.character.color = color;
                }
                if let Some(accessory) = accessory {
                    self.character.accessory = accessory;
                }
                self.current_screen = Screen::CharacterCreator;
            }
            AppAction::DrawShape { shape } => {
                self.current_screen = Screen::Painting;
                self.pending_shape = Some(shape);
            }
            AppAction::SubmitGuess { guess } => self.submit_guess(&guess)?,
            AppAction::GenerateImage { confirm } => {
                if confirm {
                    self.character.image_requested = true;
                }
            }
        }
        Ok(())
    }

    fn submit_guess(&mut self, guess: &str) -> Result<()> {
        let invalid = |reason: &str| PlaymateError::InvalidAction {
            name: "submitGuess".into(),
            reason: reason.into(),
        };
        if self.current_screen != Screen::CipherGame {
            return Err(invalid("cipher game is not open"));
        }
        if self.lives == 0 {
            return Err(invalid("no lives left"));
        }
        let level = cipher::level(self.game_level).ok_or_else(|| invalid("all levels solved"))?;

        match cipher::check_guess(level, guess) {
            GuessOutcome::Correct => {
                info!(word = level.word, image = level.image_prompt, "cipher solved");
                self.game_level += 1;
                self.score += POINTS_PER_LEVEL;
                self.avatar_mood = Mood::Happy;
            }
            GuessOutcome::Wrong => {
                self.lives = self.lives.saturating_sub(1);
                self.avatar_mood = Mood::Sad;
            }
        }
        Ok(())
    }

    fn restart_cipher(&mut self) {
        self.lives = STARTING_LIVES;
        self.game_level = 1;
        self.score = 0;
        self.avatar_mood = Mood::Happy;
    }
}

/// Applies agent actions to the shared [`GameState`].
pub struct GameDispatcher {
    state: watch::Sender<GameState>,
}

impl Default for GameDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl GameDispatcher {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GameState::default());
        Self { state }
    }

    pub fn subscribe(&self) -> watch::Receiver<GameState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> GameState {
        self.state.borrow().clone()
    }

    /// Lives, level and score back to their starting values.
    pub fn restart_cipher(&self) {
        self.state.send_modify(GameState::restart_cipher);
    }

    /// Hand the pending drawing template to the canvas.
    pub fn take_pending_shape(&self) -> Option<Shape> {
        let mut taken = None;
        self.state.send_if_modified(|state| {
            taken = state.pending_shape.take();
            taken.is_some()
        });
        taken
    }
}

impl ActionDispatcher for GameDispatcher {
    fn apply(&self, call: &ActionCall) -> Result<()> {
        let action = AppAction::try_from(call)?;
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            let mut next = state.clone();
            match next.apply(action) {
                Ok(()) if next != *state => {
                    *state = next;
                    true
                }
                Ok(()) => false,
                Err(e) => {
                    outcome = Err(e);
                    false
                }
            }
        });
        outcome
    }
}
