//! Character tables for derived passwords.
//!
//! The exact contents and order of every table are part of the derivation
//! output: changing a single character changes every password. Visually
//! ambiguous upper-case letters (I, O, S) are left out of `UPPERCASE`.

use crate::errors::{Result, SesamError};

pub const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";

/// Upper-case letters without `I`, `O` and `S`.
pub const UPPERCASE: &str = "ABCDEFGHJKLMNPQRTUVWXYZ";

pub const DIGITS: &str = "0123456789";

/// Special characters used by vault-mode passwords.
pub const EXTRA: &str = "#!\"$%&/()[]{}=-_+*<>;:.";

/// Special characters used by legacy-mode passwords (includes `§`).
pub const LEGACY_SPECIAL: &str = "#!\"§$%&/()[]{}=-_+*<>;:.";

/// Highest complexity ordinal.
pub const MAX_COMPLEXITY: u8 = 6;

/// Which character classes a password draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacterClasses {
    pub lowercase: bool,
    pub uppercase: bool,
    pub digits: bool,
    pub extra: bool,
}

/// Complexity ordinal -> character classes, from "digits only" up to
/// "all four classes".
const COMPLEXITY_LEVELS: [CharacterClasses; 7] = [
    CharacterClasses::new(false, false, true, false),
    CharacterClasses::new(true, false, false, false),
    CharacterClasses::new(false, true, false, false),
    CharacterClasses::new(true, false, true, false),
    CharacterClasses::new(true, true, false, false),
    CharacterClasses::new(true, true, true, false),
    CharacterClasses::new(true, true, true, true),
];

impl CharacterClasses {
    pub const ALL: Self = Self::new(true, true, true, true);

    pub const fn new(lowercase: bool, uppercase: bool, digits: bool, extra: bool) -> Self {
        Self {
            lowercase,
            uppercase,
            digits,
            extra,
        }
    }

    /// Build the legacy-mode selection from its three toggles.
    /// "Letters" enables both letter cases.
    pub const fn legacy(letters: bool, digits: bool, special: bool) -> Self {
        Self::new(letters, letters, digits, special)
    }

    /// Map a complexity ordinal (0–6) to its classes.
    pub fn from_complexity(complexity: u8) -> Result<Self> {
        COMPLEXITY_LEVELS
            .get(usize::from(complexity))
            .copied()
            .ok_or_else(|| {
                SesamError::InvalidPolicy(format!(
                    "complexity must be between 0 and {MAX_COMPLEXITY} (got {complexity})"
                ))
            })
    }

    pub fn is_empty(&self) -> bool {
        !(self.lowercase || self.uppercase || self.digits || self.extra)
    }

    /// Ordered vault-mode alphabet: lower, upper, digits, extra.
    pub fn alphabet(&self) -> Result<Vec<char>> {
        self.build(EXTRA)
    }

    /// Ordered legacy-mode alphabet: lower, upper, digits, special.
    pub fn legacy_alphabet(&self) -> Result<Vec<char>> {
        self.build(LEGACY_SPECIAL)
    }

    fn build(&self, special: &str) -> Result<Vec<char>> {
        if self.is_empty() {
            return Err(SesamError::InvalidPolicy(
                "at least one character class must be enabled".into(),
            ));
        }
        let mut chars = Vec::new();
        if self.lowercase {
            chars.extend(LOWERCASE.chars());
        }
        if self.uppercase {
            chars.extend(UPPERCASE.chars());
        }
        if self.digits {
            chars.extend(DIGITS.chars());
        }
        if self.extra {
            chars.extend(special.chars());
        }
        Ok(chars)
    }
}
