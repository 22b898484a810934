use crate::utils::sanitize::clean_text;

pub const USERNAME_MAX_CHARS: usize = 150;
pub const PASSWORD_MIN_CHARS: usize = 8;

const COMMON_PASSWORDS: &[&str] = &[
    "password",
    "password1",
    "password123",
    "12345678",
    "123456789",
    "1234567890",
    "qwerty123",
    "qwertyuiop",
    "iloveyou",
    "sunshine",
    "princess",
    "football",
    "baseball",
    "welcome1",
    "letmein1",
    "abc12345",
    "trustno1",
    "changeme",
    "passw0rd",
    "admin123",
];

/// Collects user-facing validation messages for a form.
#[derive(Debug, Default)]
pub struct FieldErrors {
    messages: Vec<String>,
}

impl FieldErrors {
    pub fn push(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn check(&mut self, result: Result<(), String>) {
        if let Err(message) = result {
            self.messages.push(message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required.".to_string());
    }
    if username.chars().count() > USERNAME_MAX_CHARS {
        return Err(format!(
            "Username must be at most {USERNAME_MAX_CHARS} characters."
        ));
    }
    let valid = username
        .chars()
        .all(|ch| ch.is_alphanumeric() || matches!(ch, '@' | '.' | '+' | '-' | '_'));
    if !valid {
        return Err(
            "Enter a valid username. It may contain only letters, numbers, and @/./+/-/_ characters."
                .to_string(),
        );
    }
    Ok(())
}

pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') || email.chars().any(char::is_whitespace) {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}

pub fn validate_email(email: &str, label: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err(format!("{label} is required."));
    }
    if !is_valid_email(email) {
        return Err(format!("Enter a valid {}.", label.to_lowercase()));
    }
    Ok(())
}

/// Applies the password rules to a new password and its confirmation.
pub fn validate_new_password(password1: &str, password2: &str, username: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if password1.is_empty() {
        errors.push("Password is required.".to_string());
        return errors;
    }
    if password1 != password2 {
        errors.push("The two password fields didn't match.".to_string());
        return errors;
    }
    if password1.chars().count() < PASSWORD_MIN_CHARS {
        errors.push(format!(
            "This password is too short. It must contain at least {PASSWORD_MIN_CHARS} characters."
        ));
    }
    if password1.chars().all(|ch| ch.is_ascii_digit()) {
        errors.push("This password is entirely numeric.".to_string());
    }
    if COMMON_PASSWORDS.contains(&password1.to_lowercase().as_str()) {
        errors.push("This password is too common.".to_string());
    }
    let lowered_password = password1.to_lowercase();
    let lowered_username = username.to_lowercase();
    if !lowered_username.is_empty()
        && (lowered_password == lowered_username
            || lowered_password.contains(&lowered_username)
            || lowered_username.contains(&lowered_password))
    {
        errors.push("The password is too similar to the username.".to_string());
    }

    errors
}

/// Sanitizes a required text field and checks its length.
pub fn required_text(raw: &str, label: &str, max_chars: usize) -> Result<String, String> {
    let value = clean_text(raw);
    if value.is_empty() {
        return Err(format!("{label} is required."));
    }
    check_length(value, label, max_chars)
}

/// Sanitizes an optional text field; `max_chars` of zero means unbounded.
pub fn optional_text(raw: &str, label: &str, max_chars: usize) -> Result<String, String> {
    check_length(clean_text(raw), label, max_chars)
}

fn check_length(value: String, label: &str, max_chars: usize) -> Result<String, String> {
    if max_chars > 0 && value.chars().count() > max_chars {
        return Err(format!("{label} must be at most {max_chars} characters."));
    }
    Ok(value)
}

pub fn parse_age(raw: &str) -> Result<i32, String> {
    let age: i32 = raw
        .trim()
        .parse()
        .map_err(|_| "Age must be a whole number.".to_string())?;
    if age < 1 {
        return Err("Age must be at least 1.".to_string());
    }
    Ok(age)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_follow_allowed_charset() {
        assert!(validate_username("jane.doe+1@school").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("with space").is_err());
        assert!(validate_username("<script>").is_err());
        assert!(validate_username(&"a".repeat(151)).is_err());
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a@@b.co"));
        assert!(!is_valid_email("a b@c.de"));
        assert!(!is_valid_email("a@b..c"));
        assert_eq!(
            validate_email("nope", "Guardian email").unwrap_err(),
            "Enter a valid guardian email."
        );
    }

    #[test]
    fn password_rules() {
        assert!(validate_new_password("Sturdy-Otter-42", "Sturdy-Otter-42", "jane").is_empty());
        assert_eq!(
            validate_new_password("abc", "abd", "jane"),
            vec!["The two password fields didn't match.".to_string()]
        );

        let numeric = validate_new_password("12345678", "12345678", "jane");
        assert!(numeric.iter().any(|e| e.contains("entirely numeric")));
        assert!(numeric.iter().any(|e| e.contains("too common")));

        let short = validate_new_password("Ab1!", "Ab1!", "jane");
        assert!(short.iter().any(|e| e.contains("too short")));

        let similar = validate_new_password("jane2024x", "jane2024x", "Jane");
        assert!(similar.iter().any(|e| e.contains("similar")));
    }

    #[test]
    fn text_fields_are_cleaned_and_bounded() {
        assert_eq!(
            required_text("  <b>Jane</b> Doe ", "Full name", 100).unwrap(),
            "Jane Doe"
        );
        assert!(required_text("<i></i>", "Full name", 100).is_err());
        assert!(optional_text(&"x".repeat(21), "Contact number", 20).is_err());
        assert_eq!(optional_text("", "Bio", 0).unwrap(), "");
    }

    #[test]
    fn age_must_be_positive_integer() {
        assert_eq!(parse_age(" 17 "), Ok(17));
        assert!(parse_age("0").is_err());
        assert!(parse_age("seventeen").is_err());
    }

    #[test]
    fn field_errors_collect_messages() {
        let mut errors = FieldErrors::default();
        errors.check(Ok(()));
        errors.check(Err("bad".into()));
        errors.push("worse");
        assert_eq!(errors.messages(), ["bad".to_string(), "worse".to_string()]);
    }
}
