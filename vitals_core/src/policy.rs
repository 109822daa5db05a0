//! Input policy for credentials and registration data.
//!
//! Each check returns every violation found so a form can show all of them
//! at once.

const LOGIN_PASSWORD_MIN: usize = 12;
const SPECIAL_CHARS: &[char] = &['!', '@', '#', '$', '%', '^', '&', '*'];

/// Email must have a non-empty local part and domain around one '@'
pub fn check_email(email: &str) -> Vec<String> {
    let trimmed = email.trim();
    match trimmed.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Vec::new()
        }
        _ => vec![format!("'{}' is not a valid email address", trimmed)],
    }
}

/// Checks applied before a login attempt is sent
pub fn check_login(email: &str, password: &str) -> Vec<String> {
    let mut errors = check_email(email);
    if password.chars().count() < LOGIN_PASSWORD_MIN {
        errors.push(format!(
            "password must be at least {} characters",
            LOGIN_PASSWORD_MIN
        ));
    }
    errors
}

/// Registration password rules: 12+ characters from letters, digits and
/// `!@#$%^&*`, with at least one digit and one special character
pub fn check_new_password(password: &str, confirmation: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if password.chars().count() < LOGIN_PASSWORD_MIN {
        errors.push(format!(
            "password must be at least {} characters",
            LOGIN_PASSWORD_MIN
        ));
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("password must contain a digit".to_string());
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(&c)) {
        errors.push("password must contain one of !@#$%^&*".to_string());
    }
    if password
        .chars()
        .any(|c| !c.is_ascii_alphanumeric() && !SPECIAL_CHARS.contains(&c))
    {
        errors.push("password may only use letters, digits and !@#$%^&*".to_string());
    }
    if password != confirmation {
        errors.push("passwords do not match".to_string());
    }

    errors
}

/// A one-time code is exactly `length` ASCII digits
pub fn check_one_time_code(code: &str, length: usize) -> Vec<String> {
    let code = code.trim();
    if code.len() == length && code.chars().all(|c| c.is_ascii_digit()) {
        Vec::new()
    } else {
        vec![format!("code must be {} digits", length)]
    }
}

/// Profile values collected during registration
pub fn check_profile(condition_id: u32, height_cm: u16, weight_kg: u16) -> Vec<String> {
    let mut errors = Vec::new();
    if condition_id == 0 {
        errors.push("select a primary condition".to_string());
    }
    if !(50..=250).contains(&height_cm) {
        errors.push(format!("height {} cm is out of range (50-250)", height_cm));
    }
    if !(20..=300).contains(&weight_kg) {
        errors.push(format!("weight {} kg is out of range (20-300)", weight_kg));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email() {
        assert!(check_email("anna@example.com").is_empty());
        assert_eq!(check_email("anna.example.com").len(), 1);
        assert_eq!(check_email("@example.com").len(), 1);
        assert_eq!(check_email("anna@").len(), 1);
        assert_eq!(check_email("a@b@c").len(), 1);
    }

    #[test]
    fn test_login_short_password() {
        assert!(check_login("anna@example.com", "long-enough-pw").is_empty());
        assert_eq!(check_login("anna@example.com", "short").len(), 1);
        assert_eq!(check_login("nope", "short").len(), 2);
    }

    #[test]
    fn test_new_password_valid() {
        assert!(check_new_password("Correct1horse!", "Correct1horse!").is_empty());
    }

    #[test]
    fn test_new_password_reports_all_violations() {
        // Too short, no digit, no special, mismatched
        let errors = check_new_password("short", "other");
        assert_eq!(errors.len(), 4, "{:?}", errors);
    }

    #[test]
    fn test_new_password_rejects_foreign_characters() {
        let errors = check_new_password("Correct1horse! ", "Correct1horse! ");
        assert_eq!(errors, vec!["password may only use letters, digits and !@#$%^&*"]);
    }

    #[test]
    fn test_one_time_code() {
        assert!(check_one_time_code("123456", 6).is_empty());
        assert!(check_one_time_code(" 1234 ", 4).is_empty());
        assert_eq!(check_one_time_code("12345", 6).len(), 1);
        assert_eq!(check_one_time_code("12a456", 6).len(), 1);
    }

    #[test]
    fn test_profile_ranges() {
        assert!(check_profile(3, 175, 70).is_empty());
        assert_eq!(check_profile(0, 30, 500).len(), 3);
    }
}
