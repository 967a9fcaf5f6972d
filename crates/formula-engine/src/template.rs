//! `{Field}` placeholder substitution for display templates such as
//! `"{Name} - {Email}"`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use formula_registry::Value;
use regex::{Captures, Regex};

fn placeholder() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{([^}]+)\}").ok())
        .as_ref()
}

/// Replaces `{Field}` with the display form of `record[Field]`.
///
/// Null values become the empty string. Placeholders naming fields that are
/// absent from the record are left as written.
pub fn substitute(template: &str, record: &BTreeMap<String, Value>) -> String {
    let Some(re) = placeholder() else {
        return template.to_string();
    };

    re.replace_all(template, |caps: &Captures| match record.get(&caps[1]) {
        Some(Value::Null) => String::new(),
        Some(value) => value.to_string(),
        None => caps[0].to_string(),
    })
    .into_owned()
}
