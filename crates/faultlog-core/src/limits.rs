//! Maximum lengths for record text fields, in characters
//!
//! Normalization truncates to these bounds instead of rejecting a record.

pub const MESSAGE_MAX: usize = 4000;
pub const BACKTRACE_MAX: usize = 4000;
pub const ERROR_STACK_MAX: usize = 4000;
pub const CALL_STACK_MAX: usize = 4000;

pub const USERNAME_MAX: usize = 128;
pub const OS_USER_MAX: usize = 128;
pub const CLIENT_HOST_MAX: usize = 255;
pub const CLIENT_ADDRESS_MAX: usize = 45;
pub const PROGRAM_MAX: usize = 128;
pub const MODULE_MAX: usize = 128;
pub const SESSION_ID_MAX: usize = 64;

pub const DATABASE_NAME_MAX: usize = 128;
pub const OBJECT_NAME_MAX: usize = 128;
pub const EVENT_TYPE_MAX: usize = 50;

/// Bound for the large text fields (`statement_text`, `additional_info`)
pub const LARGE_TEXT_MAX: usize = 1024 * 1024;

/// Truncate a string to at most `max` characters, on a char boundary
pub fn truncate_chars(text: &mut String, max: usize) {
    if let Some((byte_idx, _)) = text.char_indices().nth(max) {
        text.truncate(byte_idx);
    }
}

/// Truncate an optional field in place
pub fn truncate_opt(field: &mut Option<String>, max: usize) {
    if let Some(text) = field.as_mut() {
        truncate_chars(text, max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_untouched() {
        let mut text = "short".to_string();
        truncate_chars(&mut text, 10);
        assert_eq!(text, "short");
    }

    #[test]
    fn test_truncate_counts_characters_not_bytes() {
        let mut text = "ééééé".to_string();
        truncate_chars(&mut text, 3);
        assert_eq!(text, "ééé");
        assert_eq!(text.chars().count(), 3);
    }

    #[test]
    fn test_truncate_opt_none() {
        let mut field: Option<String> = None;
        truncate_opt(&mut field, 1);
        assert!(field.is_none());
    }
}
