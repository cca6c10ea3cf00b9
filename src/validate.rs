//! Input format rules for user names and passwords.

use crate::{Error, Result};

/// Minimum user name length.
pub const USERNAME_MIN_LEN: usize = 3;
/// Maximum user name length.
pub const USERNAME_MAX_LEN: usize = 20;
/// Minimum password length.
pub const PASSWORD_MIN_LEN: usize = 6;
/// Maximum password length.
pub const PASSWORD_MAX_LEN: usize = 32;

const PASSWORD_SYMBOLS: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?";

/// Checks a user name: 3 to 20 characters from `[A-Za-z0-9_]`.
pub fn validate_user_name(user_name: &str) -> Result<()> {
    if user_name.is_empty() {
        return Err(Error::InvalidUsername("user name cannot be empty".to_string()));
    }

    let len = user_name.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(Error::InvalidUsername(format!(
            "user name must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"
        )));
    }

    if !user_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::InvalidUsername(
            "user name may only contain letters, digits and underscores".to_string(),
        ));
    }

    Ok(())
}

/// Checks a password: 6 to 32 characters from letters, digits and a fixed set
/// of ASCII symbols.
pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(Error::InvalidPassword("password cannot be empty".to_string()));
    }

    let len = password.chars().count();
    if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&len) {
        return Err(Error::InvalidPassword(format!(
            "password must be {PASSWORD_MIN_LEN}-{PASSWORD_MAX_LEN} characters"
        )));
    }

    if !password
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SYMBOLS.contains(c))
    {
        return Err(Error::InvalidPassword(
            "password contains invalid characters".to_string(),
        ));
    }

    Ok(())
}
