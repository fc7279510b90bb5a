use std::{env, str::FromStr};

/// Parse a boolean flag from a string value, or return the given default value otherwise.
pub fn parse_boolean_flag(value: Option<String>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

/// Reads and parses the environment variable `name`. Returns `Ok(None)` if it is not set, and the parse error if it is
/// set but cannot be parsed.
pub fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>, T::Err> {
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().map(Some),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn boolean_flags() {
        assert!(parse_boolean_flag(Some("Yes".into()), false));
        assert!(!parse_boolean_flag(Some(" off ".into()), true));
        assert!(parse_boolean_flag(Some("maybe".into()), true));
        assert!(!parse_boolean_flag(None, false));
    }

    #[test]
    fn env_parsing() {
        env::set_var("SWITCH_COMMON_TEST_U32", " 42 ");
        assert_eq!(parse_env::<u32>("SWITCH_COMMON_TEST_U32"), Ok(Some(42)));
        env::set_var("SWITCH_COMMON_TEST_BAD", "forty-two");
        assert!(parse_env::<u32>("SWITCH_COMMON_TEST_BAD").is_err());
        assert_eq!(parse_env::<u32>("SWITCH_COMMON_TEST_UNSET"), Ok(None));
    }
}
