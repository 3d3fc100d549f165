//! The subset of Kubernetes list options that affects classification.

use thiserror::Error;
use url::form_urlencoded;

const NAME_FIELD: &str = "metadata.name";

#[derive(Debug, Error, PartialEq, Eq)]
pub(super) enum ListOptionsError {
    #[error("invalid integer for {field}: {value:?}")]
    InvalidInteger { field: &'static str, value: String },
    #[error("invalid field selector term: {0:?}")]
    InvalidSelector(String),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct ListOptions {
    pub(super) watch: bool,
    field_selector: Vec<Requirement>,
}

#[derive(Debug, PartialEq, Eq)]
struct Requirement {
    field: String,
    operator: Operator,
    value: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Operator {
    Equals,
    NotEquals,
}

impl ListOptions {
    pub(super) fn parse(query: &str) -> Result<Self, ListOptionsError> {
        let mut options = Self::default();

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "watch" => options.watch = query_bool(&value),
                "limit" => parse_integer("limit", &value)?,
                "timeoutSeconds" => parse_integer("timeoutSeconds", &value)?,
                "fieldSelector" => options.field_selector = parse_field_selector(&value)?,
                _ => {}
            }
        }

        Ok(options)
    }

    /// Options built after a parse failure: only the `watch` flag is trusted.
    pub(super) fn watch_only(query: &str) -> Self {
        let watch = form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "watch")
            .is_some_and(|(_, value)| query_bool(&value));

        Self {
            watch,
            field_selector: Vec::new(),
        }
    }

    pub(super) fn label_selector(query: &str) -> Option<String> {
        form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "labelSelector")
            .map(|(_, value)| value.into_owned())
    }

    /// Name pinned by a `metadata.name=<name>` field selector, if it is a valid
    /// path segment.
    pub(super) fn exact_name(&self) -> Option<&str> {
        self.field_selector
            .iter()
            .find(|req| req.field == NAME_FIELD && req.operator == Operator::Equals)
            .map(|req| req.value.as_str())
            .filter(|name| valid_path_segment(name))
    }
}

// Any value except "false" and "0" enables a boolean query flag.
fn query_bool(value: &str) -> bool {
    !(value == "0" || value.eq_ignore_ascii_case("false"))
}

fn parse_integer(field: &'static str, value: &str) -> Result<(), ListOptionsError> {
    value
        .parse::<i64>()
        .map(|_| ())
        .map_err(|_| ListOptionsError::InvalidInteger {
            field,
            value: value.to_string(),
        })
}

fn parse_field_selector(selector: &str) -> Result<Vec<Requirement>, ListOptionsError> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            let (field, operator, value) = if let Some((field, value)) = term.split_once("!=") {
                (field, Operator::NotEquals, value)
            } else if let Some((field, value)) = term.split_once("==") {
                (field, Operator::Equals, value)
            } else if let Some((field, value)) = term.split_once('=') {
                (field, Operator::Equals, value)
            } else {
                return Err(ListOptionsError::InvalidSelector(term.to_string()));
            };

            if field.trim().is_empty() {
                return Err(ListOptionsError::InvalidSelector(term.to_string()));
            }

            Ok(Requirement {
                field: field.trim().to_string(),
                operator,
                value: value.trim().to_string(),
            })
        })
        .collect()
}

fn valid_path_segment(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '%'])
}
