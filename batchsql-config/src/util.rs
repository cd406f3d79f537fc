use std::str::FromStr;

/// Parse a boolean value from a raw string, accepting common env-style forms.
///
/// Accepted truthy values (case-insensitive): `"1"`, `"true"`, `"yes"`, `"on"`.
/// Accepted falsy values: `"0"`, `"false"`, `"no"`, `"off"`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Non-empty value of `name`, trimmed.
pub fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Outcome of reading a typed environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue<T> {
    /// Not set, or blank.
    Unset,
    /// Set and parsed.
    Parsed(T),
    /// Set but not parseable; carries the raw text.
    Invalid(String),
}

impl<T> EnvValue<T> {
    /// The parsed value, if any.
    pub fn parsed(self) -> Option<T> {
        match self {
            EnvValue::Parsed(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the variable was set to something unparseable.
    pub fn is_invalid(&self) -> bool {
        matches!(self, EnvValue::Invalid(_))
    }
}

/// Read and parse `name`.
pub fn parse_var<T: FromStr>(name: &str) -> EnvValue<T> {
    match non_empty_var(name) {
        None => EnvValue::Unset,
        Some(raw) => match raw.parse() {
            Ok(value) => EnvValue::Parsed(value),
            Err(_) => EnvValue::Invalid(raw),
        },
    }
}

/// Read `name` as a boolean, see [`parse_bool`].
pub fn parse_bool_var(name: &str) -> EnvValue<bool> {
    match non_empty_var(name) {
        None => EnvValue::Unset,
        Some(raw) => match parse_bool(&raw) {
            Some(value) => EnvValue::Parsed(value),
            None => EnvValue::Invalid(raw),
        },
    }
}
