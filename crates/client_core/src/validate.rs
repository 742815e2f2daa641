/// At least 8 characters with one uppercase, one lowercase and one digit.
pub fn password_is_valid(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Shape check only; deliverability is the server's problem.
pub fn email_is_valid(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || local.chars().any(char::is_whitespace) {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_rules() {
        assert!(password_is_valid("Str0ngpass"));
        assert!(!password_is_valid("short1A"));
        assert!(!password_is_valid("alllowercase1"));
        assert!(!password_is_valid("ALLUPPERCASE1"));
        assert!(!password_is_valid("NoDigitsHere"));
    }

    #[test]
    fn email_shapes() {
        assert!(email_is_valid("ada@example.com"));
        assert!(email_is_valid("ada.lovelace@mail.example.co"));
        assert!(!email_is_valid("ada"));
        assert!(!email_is_valid("@example.com"));
        assert!(!email_is_valid("ada@example"));
        assert!(!email_is_valid("ada@exa mple.com"));
        assert!(!email_is_valid("ada@.com"));
    }
}
