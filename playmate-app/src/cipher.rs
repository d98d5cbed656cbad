//! Number-cipher mini-game: each level hides a word behind a digit code.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherLevel {
    pub id: u32,
    pub word: &'static str,
    pub code: &'static str,
    pub image_prompt: &'static str,
}

pub const CIPHER_LEVELS: [CipherLevel; 5] = [
    CipherLevel {
        id: 1,
        word: "ATA",
        code: "121",
        image_prompt: "A simple cartoon illustration of a father or ancestor figure",
    },
    CipherLevel {
        id: 2,
        word: "ECE",
        code: "232",
        image_prompt: "A cute cartoon girl named Ece",
    },
    CipherLevel {
        id: 3,
        word: "NAL",
        code: "415",
        image_prompt: "A horseshoe cartoon illustration",
    },
    CipherLevel {
        id: 4,
        word: "KALE",
        code: "6152",
        image_prompt: "A medieval stone castle cartoon",
    },
    CipherLevel {
        id: 5,
        word: "ÇİLEK",
        code: "78526",
        image_prompt: "A fresh red strawberry cartoon",
    },
];

/// Level by 1-based id. `None` once every level is solved.
pub fn level(id: u32) -> Option<&'static CipherLevel> {
    CIPHER_LEVELS.iter().find(|l| l.id == id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessOutcome {
    Correct,
    Wrong,
}

pub fn check_guess(level: &CipherLevel, guess: &str) -> GuessOutcome {
    if level.code == guess {
        GuessOutcome::Correct
    } else {
        GuessOutcome::Wrong
    }
}
