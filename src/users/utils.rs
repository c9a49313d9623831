use lazy_static::lazy_static;
use regex::Regex;

use crate::types::ValidationError;

lazy_static! {
    static ref EMAIL_RE: Regex = {
        let pattern = r"\A[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\z";
        Regex::new(pattern).expect("email regex")
    };
}

pub fn validate_email_format(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_RE.is_match(email) {
        Err(ValidationError::from(
            "email",
            format!("invalid email: {}", email),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_username_format(username: &str) -> Result<(), ValidationError> {
    if username.trim().len() < 3 {
        Err(ValidationError::from(
            "username",
            format!("username too short: {}", username),
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(validate_email_format("ada@example.org").is_ok());
        assert!(validate_email_format("a.b+tag@mail.co").is_ok());
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert!(validate_email_format("not-an-email").is_err());
        assert!(validate_email_format("@example.org").is_err());
        assert!(validate_email_format("ada@").is_err());
    }

    #[test]
    fn usernames_need_three_characters() {
        assert!(validate_username_format("ab").is_err());
        assert!(validate_username_format("ada").is_ok());
    }
}
