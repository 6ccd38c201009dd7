use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of a freshly generated lookup token.
pub const LOOKUP_TOKEN_LEN: usize = 24;

/// Generate a random lookup token over `[A-Za-z0-9]`.
///
/// Uniqueness is not guaranteed here; the record store enforces it.
pub fn generate_lookup_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(LOOKUP_TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_shape() {
        let token = generate_lookup_token();
        assert_eq!(token.len(), LOOKUP_TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_tokens_differ() {
        assert_ne!(generate_lookup_token(), generate_lookup_token());
    }
}
