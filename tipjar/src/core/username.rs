//! Username rules shared by signup and the username-change endpoint.

use std::collections::BTreeSet;

use thiserror::Error;

/// Longest username accepted, in characters.
pub const USERNAME_MAX_SIZE: usize = 32;

/// Names that collide with top-level routes and can never be claimed.
const BUILTIN_RESTRICTED: &[&str] = &[
    "about",
    "assets",
    "bank-account",
    "bank-account.json",
    "credit-card",
    "credit-card.json",
    "discover",
    "favicon.ico",
    "for",
    "health",
    "index",
    "on",
    "robots.txt",
    "search",
    "sign-in",
    "sign-out",
    "version.txt",
];

/// Reasons a suggested username is rejected.
///
/// The display strings are shown to end users verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    #[error("You need to provide a username!")]
    Empty,
    #[error("The username '{0}' is too long.")]
    TooLong(String),
    #[error("The username '{0}' contains invalid characters.")]
    InvalidCharacters(String),
    #[error("The username '{0}' is restricted.")]
    Restricted(String),
    #[error("The username '{0}' is already taken.")]
    AlreadyTaken(String),
}

/// Lowercased set of names nobody may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestrictedUsernames {
    names: BTreeSet<String>,
}

impl Default for RestrictedUsernames {
    fn default() -> Self {
        Self::new(BUILTIN_RESTRICTED.iter().copied())
    }
}

impl RestrictedUsernames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect();
        Self { names }
    }

    /// Add more names on top of the current set.
    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.names.extend(
            names
                .into_iter()
                .map(|name| name.as_ref().trim().to_lowercase())
                .filter(|name| !name.is_empty()),
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | ',' | '-' | '_' | ':' | '@' | ' ')
}

/// Validate a suggested username, returning it with surrounding whitespace removed.
///
/// Uniqueness is not checked here; the database owns that rule.
pub fn validate_username(
    suggested: &str,
    restricted: &RestrictedUsernames,
) -> Result<String, UsernameError> {
    let suggested = suggested.trim();

    if suggested.is_empty() {
        return Err(UsernameError::Empty);
    }
    if suggested.chars().count() > USERNAME_MAX_SIZE {
        return Err(UsernameError::TooLong(suggested.to_string()));
    }
    if !suggested.chars().all(is_allowed_char) {
        return Err(UsernameError::InvalidCharacters(suggested.to_string()));
    }
    if restricted.contains(suggested) {
        return Err(UsernameError::Restricted(suggested.to_string()));
    }

    Ok(suggested.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str) -> Result<String, UsernameError> {
        validate_username(name, &RestrictedUsernames::default())
    }

    #[test]
    fn accepts_and_trims_plain_names() {
        assert_eq!(check("  bob  ").expect("valid"), "bob");
        assert_eq!(check("alice.b_c-d:e@f g").expect("valid"), "alice.b_c-d:e@f g");
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert_eq!(check("      "), Err(UsernameError::Empty));
        assert_eq!(
            UsernameError::Empty.to_string(),
            "You need to provide a username!"
        );
    }

    #[test]
    fn non_ascii_is_invalid() {
        let err = check("§").expect_err("invalid");
        assert_eq!(
            err.to_string(),
            "The username '§' contains invalid characters."
        );
    }

    #[test]
    fn restricted_names_are_case_insensitive() {
        let err = check("Assets").expect_err("restricted");
        assert_eq!(err.to_string(), "The username 'Assets' is restricted.");
    }

    #[test]
    fn length_is_checked_before_characters() {
        let name = "I am way too long, and you know it, and the American people know it.";
        let err = check(name).expect_err("too long");
        assert_eq!(err.to_string(), format!("The username '{name}' is too long."));

        let thirty_two = "a".repeat(USERNAME_MAX_SIZE);
        assert!(check(&thirty_two).is_ok());
    }

    #[test]
    fn extend_adds_lowercased_names() {
        let mut restricted = RestrictedUsernames::new(["one"]);
        restricted.extend(["Two", "  "]);
        assert!(restricted.contains("two"));
        assert!(restricted.contains("ONE"));
        assert_eq!(restricted.len(), 2);
    }
}
