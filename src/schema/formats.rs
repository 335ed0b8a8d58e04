//! String format checkers used by the `format` keyword
//!
//! Every registered format `F` is also reachable as `F-or-empty`, which
//! additionally accepts the empty string. Unknown formats are not checked.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime};
use regex::Regex;

/// A format predicate over string values
pub type FormatChecker = Arc<dyn Fn(&str) -> bool + Send + Sync>;

const OR_EMPTY_SUFFIX: &str = "-or-empty";

const EMAIL_PATTERN: &str = r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}$";

/// Registry of named format checkers
#[derive(Clone)]
pub struct FormatRegistry {
    checkers: HashMap<String, FormatChecker>,
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.checkers.keys().collect();
        names.sort();
        f.debug_struct("FormatRegistry").field("formats", &names).finish()
    }
}

impl FormatRegistry {
    /// Creates an empty registry
    pub fn empty() -> Self {
        Self {
            checkers: HashMap::new(),
        }
    }

    /// Creates a registry with every built-in format
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();

        let email = builtin_regex(EMAIL_PATTERN);
        {
            let email = email.clone();
            registry.register("email", move |s| email.is_match(s));
        }
        registry.register("email-with-optional-name", move |s| {
            email_with_optional_name(&email, s)
        });

        registry.register_pattern("locale", r"^[a-z]{2}([-_][A-Z]{2})?$");
        registry.register_pattern("language-code", r"^[a-z]{2}$");
        registry.register_pattern("country-code", r"^[A-Z]{2}$");
        registry.register_pattern("currency", r"^[A-Z]{3}$");
        registry.register_pattern("constant-case", r"^[0-9A-Z_]+$");
        registry.register_pattern("money-string", r"^\d+(\.\d{1,2})?$");
        registry.register_pattern("extension", r"^\d{1,10}$");
        registry.register_pattern("website", r"^\S+\.\S+$");

        registry.register("phone-number", is_phone_number);
        registry.register("date", |s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok());
        registry.register("datetime", |s| DateTime::parse_from_rfc3339(s).is_ok());
        registry.register("local-time", is_local_time);
        registry.register("hour", is_hour);
        registry.register("timezone-utc-offset", is_utc_offset);
        registry.register("timezone-name", |s| chrono_tz::Tz::from_str(s).is_ok());
        registry.register("not-empty", |s| !s.trim().is_empty());
        registry.register("domain", is_hostname);
        registry.register("domain-from-or-to", is_hostname);

        registry
    }

    /// Registers or replaces a checker
    pub fn register<F>(&mut self, name: impl Into<String>, checker: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.checkers.insert(name.into(), Arc::new(checker));
    }

    fn register_pattern(&mut self, name: &str, pattern: &str) {
        let re = builtin_regex(pattern);
        self.register(name, move |s| re.is_match(s));
    }

    /// Whether a checker exists for `name`, directly or via `-or-empty`
    pub fn is_known(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Checks `value` against format `name`; `None` when the format is unknown
    pub fn check(&self, name: &str, value: &str) -> Option<bool> {
        if let Some(checker) = self.checkers.get(name) {
            return Some(checker(value));
        }
        let base = name.strip_suffix(OR_EMPTY_SUFFIX)?;
        let checker = self.checkers.get(base)?;
        Some(value.is_empty() || checker(value))
    }

    fn lookup(&self, name: &str) -> Option<&FormatChecker> {
        self.checkers.get(name).or_else(|| {
            name.strip_suffix(OR_EMPTY_SUFFIX)
                .and_then(|base| self.checkers.get(base))
        })
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Compiles a pattern literal owned by this module
fn builtin_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("built-in format pattern {pattern}: {e}"))
}

fn email_with_optional_name(email: &Regex, s: &str) -> bool {
    match s.strip_suffix('>').and_then(|rest| rest.rsplit_once(" <")) {
        Some((name, address)) => !name.trim().is_empty() && email.is_match(address),
        None => email.is_match(s),
    }
}

fn is_phone_number(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_digit() || c == ' ')
        && s.chars().filter(char::is_ascii_digit).count() >= 6
}

fn is_local_time(s: &str) -> bool {
    NaiveTime::parse_from_str(s, "%H:%M:%S").is_ok()
        || (s.len() == 5 && NaiveTime::parse_from_str(s, "%H:%M").is_ok())
}

fn is_hour(s: &str) -> bool {
    let (hours, minutes) = match s.split_once(':') {
        Some((h, m)) => (h, Some(m)),
        None => (s, None),
    };
    let two_digits = |part: &str, max: u32| {
        part.len() == 2
            && part.chars().all(|c| c.is_ascii_digit())
            && part.parse::<u32>().map_or(false, |n| n <= max)
    };
    two_digits(hours, 23) && minutes.map_or(true, |m| two_digits(m, 59))
}

fn is_utc_offset(s: &str) -> bool {
    let mut chars = s.chars();
    let sign = match chars.next() {
        Some('+') => 1,
        Some('-') => -1,
        _ => return false,
    };
    let rest = chars.as_str();
    let Some((h, m)) = rest.split_once(':') else {
        return false;
    };
    if h.len() != 2 || m.len() != 2 {
        return false;
    }
    let (Ok(hours), Ok(minutes)) = (h.parse::<i32>(), m.parse::<i32>()) else {
        return false;
    };
    if minutes > 59 {
        return false;
    }
    let total = sign * (hours * 60 + minutes);
    (-12 * 60..=14 * 60).contains(&total)
}

fn is_hostname(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = s.trim_end_matches('.').split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
