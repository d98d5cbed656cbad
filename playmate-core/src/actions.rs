//! Remote action triggers and the dispatcher interface the session calls into.
//!
//! The agent asks the host to do things by name (`navigate`, `drawShape`, ...)
//! with loosely typed JSON arguments. [`AppAction::try_from`] turns such a
//! call into a validated value; hosts implement [`ActionDispatcher`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{PlaymateError, Result};

/// A structured `{name, arguments}` request from the remote agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub name: String,
    #[serde(default, alias = "args")]
    pub arguments: Map<String, Value>,
}

impl ActionCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            arguments,
        }
    }

    fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn required_str(&self, key: &str) -> Result<&str> {
        self.str_arg(key).ok_or_else(|| self.invalid(format!("missing '{key}'")))
    }

    fn invalid(&self, reason: impl Into<String>) -> PlaymateError {
        PlaymateError::InvalidAction {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn parse_enum<T: DeserializeOwned>(&self, key: &str, value: &str) -> Result<T> {
        serde_json::from_value(Value::String(value.to_string()))
            .map_err(|_| self.invalid(format!("unknown {key} '{value}'")))
    }
}

/// Applies remote actions to application state.
///
/// Called sequentially from the session's dispatch task, so implementations
/// never see two actions of one session concurrently. Must not block for long.
pub trait ActionDispatcher: Send + Sync + 'static {
    fn apply(&self, action: &ActionCall) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Screen {
    Intro,
    Menu,
    CharacterCreator,
    Painting,
    CipherGame,
    PatternGame,
    TreasureHunt,
    MemoryGame,
    MissingSymbol,
    NumberHunter,
    DetectiveGame,
    ShadowMatch,
    AvatarCreator,
}

impl Screen {
    pub const ALL: [Screen; 13] = [
        Screen::Intro,
        Screen::Menu,
        Screen::CharacterCreator,
        Screen::Painting,
        Screen::CipherGame,
        Screen::PatternGame,
        Screen::TreasureHunt,
        Screen::MemoryGame,
        Screen::MissingSymbol,
        Screen::NumberHunter,
        Screen::DetectiveGame,
        Screen::ShadowMatch,
        Screen::AvatarCreator,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Tree,
    Sun,
    House,
    Balloon,
    Cloud,
    Star,
    Flower,
}

impl Shape {
    pub const ALL: [Shape; 7] = [
        Shape::Tree,
        Shape::Sun,
        Shape::House,
        Shape::Balloon,
        Shape::Cloud,
        Shape::Star,
        Shape::Flower,
    ];
}

/// Animal the child builds. Wire names are the Turkish labels the agent speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacterKind {
    #[serde(rename = "Kedi", alias = "cat")]
    Cat,
    #[serde(rename = "Köpek", alias = "dog")]
    Dog,
    #[serde(rename = "Kuş", alias = "bird")]
    Bird,
    #[serde(rename = "Balık", alias = "fish")]
    Fish,
    #[serde(rename = "Dinozor", alias = "dinosaur")]
    Dinosaur,
    #[serde(rename = "Fil", alias = "elephant")]
    Elephant,
    #[serde(rename = "Kaplumbağa", alias = "turtle")]
    Turtle,
    #[serde(rename = "Tavşan", alias = "rabbit")]
    Rabbit,
    #[serde(rename = "Aslan", alias = "lion")]
    Lion,
    #[serde(rename = "Panda", alias = "panda")]
    Panda,
}

impl CharacterKind {
    pub const ALL: [CharacterKind; 10] = [
        CharacterKind::Cat,
        CharacterKind::Dog,
        CharacterKind::Bird,
        CharacterKind::Fish,
        CharacterKind::Dinosaur,
        CharacterKind::Elephant,
        CharacterKind::Turtle,
        CharacterKind::Rabbit,
        CharacterKind::Lion,
        CharacterKind::Panda,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CharacterColor {
    #[serde(rename = "Kırmızı", alias = "red")]
    Red,
    #[serde(rename = "Mavi", alias = "blue")]
    Blue,
    #[serde(rename = "Sarı", alias = "yellow")]
    Yellow,
    #[serde(rename = "Yeşil", alias = "green")]
    Green,
    #[serde(rename = "Turuncu", alias = "orange")]
    Orange,
    #[serde(rename = "Mor", alias = "purple")]
    Purple,
    #[serde(rename = "Kahverengi", alias = "brown")]
    Brown,
    #[serde(rename = "Pembe", alias = "pink")]
    Pink,
    #[serde(rename = "Siyah", alias = "black")]
    Black,
}

impl CharacterColor {
    pub const ALL: [CharacterColor; 9] = [
        CharacterColor::Red,
        CharacterColor::Blue,
        CharacterColor::Yellow,
        CharacterColor::Green,
        CharacterColor::Orange,
        CharacterColor::Purple,
        CharacterColor::Brown,
        CharacterColor::Pink,
        CharacterColor::Black,
    ];
}

/// A validated remote action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    Navigate {
        screen: Screen,
    },
    UpdateCharacter {
        kind: Option<CharacterKind>,
        color: Option<CharacterColor>,
        accessory: Option<String>,
    },
    DrawShape {
        shape: Shape,
    },
    /// Digits only, whitespace removed.
    SubmitGuess {
        guess: String,
    },
    GenerateImage {
        confirm: bool,
    },
}

impl AppAction {
    pub fn name(&self) -> &'static str {
        match self {
            AppAction::Navigate { .. } => "navigate",
            AppAction::UpdateCharacter { .. } => "updateCharacter",
            AppAction::DrawShape { .. } => "drawShape",
            AppAction::SubmitGuess { .. } => "submitGuess",
            AppAction::GenerateImage { .. } => "generateImage",
        }
    }
}

impl TryFrom<&ActionCall> for AppAction {
    type Error = PlaymateError;

    fn try_from(call: &ActionCall) -> Result<Self> {
        match call.name.as_str() {
            "navigate" => {
                let screen = call.required_str("screen")?;
                Ok(AppAction::Navigate {
                    screen: call.parse_enum("screen", screen)?,
                })
            }
            "updateCharacter" => {
                let kind = call
                    .str_arg("type")
                    .map(|v| call.parse_enum("type", v))
                    .transpose()?;
                let color = call
                    .str_arg("color")
                    .map(|v| call.parse_enum("color", v))
                    .transpose()?;
                let accessory = call.str_arg("accessory").map(str::to_string);
                Ok(AppAction::UpdateCharacter {
                    kind,
                    color,
                    accessory,
                })
            }
            "drawShape" => {
                let shape = call.required_str("shape")?.to_ascii_lowercase();
                Ok(AppAction::DrawShape {
                    shape: call.parse_enum("shape", &shape)?,
                })
            }
            "submitGuess" => {
                // Agents sometimes send the number itself rather than a string.
                let raw = match call.arguments.get("guess") {
                    Some(Value::Number(n)) => n.to_string(),
                    _ => call.required_str("guess")?.to_string(),
                };
                let guess: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
                if guess.is_empty() || !guess.chars().all(|c| c.is_ascii_digit()) {
                    return Err(call.invalid(format!("guess '{raw}' is not a digit sequence")));
                }
                Ok(AppAction::SubmitGuess { guess })
            }
            "generateImage" => Ok(AppAction::GenerateImage {
                confirm: call
                    .arguments
                    .get("confirm")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            }),
            other => Err(PlaymateError::UnknownAction(other.to_string())),
        }
    }
}

/// Function declaration handed to the agent at connect time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

fn wire_names<T: Serialize>(values: &[T]) -> Vec<Value> {
    values
        .iter()
        .filter_map(|v| serde_json::to_value(v).ok())
        .collect()
}

fn declaration(name: &str, description: &str, parameters: Value) -> ToolDeclaration {
    ToolDeclaration {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

/// The five actions the agent may trigger.
pub fn tool_declarations() -> Vec<ToolDeclaration> {
    vec![
        declaration(
            "navigate",
            "Navigate to a specific screen in the application.",
            json!({
                "type": "object",
                "properties": {
                    "screen": {
                        "type": "string",
                        "enum": wire_names(&Screen::ALL),
                        "description": "The screen to navigate to."
                    }
                },
                "required": ["screen"]
            }),
        ),
        declaration(
            "updateCharacter",
            "Update the character being created. Use this when user says \"Make it red\", \"Add a hat\", \"Make a dog\".",
            json!({
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": wire_names(&CharacterKind::ALL),
                        "description": "The animal type"
                    },
                    "color": {
                        "type": "string",
                        "enum": wire_names(&CharacterColor::ALL),
                        "description": "The color of the character"
                    },
                    "accessory": {
                        "type": "string",
                        "description": "An accessory like hat, glasses, cape"
                    }
                }
            }),
        ),
        declaration(
            "submitGuess",
            "Submit a numerical guess for the cipher game.",
            json!({
                "type": "object",
                "properties": {
                    "guess": {
                        "type": "string",
                        "description": "The number sequence guessed by the child."
                    }
                },
                "required": ["guess"]
            }),
        ),
        declaration(
            "drawShape",
            "Draw a specific shape or object on the painting canvas. Use this when the user says \"Draw a tree\", \"Add a sun\", \"Draw a house\".",
            json!({
                "type": "object",
                "properties": {
                    "shape": {
                        "type": "string",
                        "enum": wire_names(&Shape::ALL),
                        "description": "The object to draw."
                    }
                },
                "required": ["shape"]
            }),
        ),
        declaration(
            "generateImage",
            "Trigger the final image generation for the character.",
            json!({
                "type": "object",
                "properties": {
                    "confirm": { "type": "boolean" }
                }
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str, args: Value) -> Result<AppAction> {
        AppAction::try_from(&ActionCall::new(name, args))
    }

    #[test]
    fn navigate_accepts_known_screens() {
        assert_eq!(
            parse("navigate", json!({"screen": "CIPHER_GAME"})).expect("valid"),
            AppAction::Navigate {
                screen: Screen::CipherGame
            }
        );
        assert!(matches!(
            parse("navigate", json!({"screen": "SPACESHIP"})),
            Err(PlaymateError::InvalidAction { .. })
        ));
        assert!(matches!(
            parse("navigate", json!({})),
            Err(PlaymateError::InvalidAction { .. })
        ));
    }

    #[test]
    fn draw_shape_is_case_insensitive() {
        assert_eq!(
            parse("drawShape", json!({"shape": "Tree"})).expect("valid"),
            AppAction::DrawShape { shape: Shape::Tree }
        );
    }

    #[test]
    fn update_character_fields_are_optional() {
        let action = parse(
            "updateCharacter",
            json!({"color": "Kırmızı", "accessory": "  şapka "}),
        )
        .expect("valid");
        assert_eq!(
            action,
            AppAction::UpdateCharacter {
                kind: None,
                color: Some(CharacterColor::Red),
                accessory: Some("şapka".into()),
            }
        );
        let action = parse("updateCharacter", json!({"type": "dog"})).expect("alias");
        assert!(matches!(
            action,
            AppAction::UpdateCharacter {
                kind: Some(CharacterKind::Dog),
                ..
            }
        ));
    }

    #[test]
    fn guesses_must_be_digits() {
        assert_eq!(
            parse("submitGuess", json!({"guess": "1 2 1"})).expect("valid"),
            AppAction::SubmitGuess {
                guess: "121".into()
            }
        );
        assert_eq!(
            parse("submitGuess", json!({"guess": 415})).expect("number"),
            AppAction::SubmitGuess {
                guess: "415".into()
            }
        );
        assert!(parse("submitGuess", json!({"guess": "abc"})).is_err());
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(matches!(
            parse("launchRocket", json!({})),
            Err(PlaymateError::UnknownAction(name)) if name == "launchRocket"
        ));
    }

    #[test]
    fn declarations_cover_every_action() {
        let decls = tool_declarations();
        let names: Vec<_> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "navigate",
                "updateCharacter",
                "submitGuess",
                "drawShape",
                "generateImage"
            ]
        );
        let screens = decls[0].parameters["properties"]["screen"]["enum"]
            .as_array()
            .expect("enum list");
        assert_eq!(screens.len(), 13);
        assert_eq!(screens[2], "CHARACTER_CREATOR");
        assert_eq!(decls[1].parameters["properties"]["type"]["enum"][0], "Kedi");
    }

    #[test]
    fn action_call_accepts_args_alias() {
        let call: ActionCall =
            serde_json::from_str(r#"{"name":"drawShape","args":{"shape":"sun"}}"#).expect("parse");
        assert_eq!(call.arguments["shape"], "sun");
    }
}
