//! Validation of usernames and passwords before they reach the hashing tool.
//!
//! The htpasswd line format cannot represent everything: the username ends at
//! the first `:`, and a newline in either value would split an entry. Inputs
//! are rejected here, up front, instead of producing a corrupt store line.

use snafu::{Snafu, ensure};

/// `htpasswd` refuses usernames longer than 255 bytes.
const USERNAME_MAX_LENGTH: usize = 255;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum Error {
    #[snafu(display("must not be empty"))]
    Empty,

    #[snafu(display("must not contain ':'"))]
    IllegalColon,

    #[snafu(display("must not contain control characters"))]
    IllegalControlCharacter,

    #[snafu(display("must not be longer than {USERNAME_MAX_LENGTH} bytes"))]
    TooLong,
}

pub fn validate_username(username: &str) -> Result<()> {
    ensure!(!username.is_empty(), EmptySnafu);
    ensure!(username.len() <= USERNAME_MAX_LENGTH, TooLongSnafu);
    ensure!(!username.contains(':'), IllegalColonSnafu);
    ensure!(
        !username.chars().any(char::is_control),
        IllegalControlCharacterSnafu
    );

    Ok(())
}

pub fn validate_password(password: &str) -> Result<()> {
    ensure!(!password.is_empty(), EmptySnafu);
    ensure!(
        !password.chars().any(char::is_control),
        IllegalControlCharacterSnafu
    );

    Ok(())
}
