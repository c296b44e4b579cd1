//! URL path parsing and query-parameter binding for the scan request
//! surface. The HTTP transport itself is out of scope here — these are
//! pure functions the coordinator's handlers call after receiving a path
//! and query string from whatever router is in front of them.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestParseError {
    MissingAt,
    MissingModule,
    MissingVersion,
    InvalidSyntax(String),
}

impl fmt::Display for RequestParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestParseError::MissingAt => write!(f, "missing '@'"),
            RequestParseError::MissingModule => write!(f, "missing module"),
            RequestParseError::MissingVersion => write!(f, "missing version"),
            RequestParseError::InvalidSyntax(field) => {
                write!(f, "invalid syntax for field {field}")
            }
        }
    }
}

impl std::error::Error for RequestParseError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedModulePath {
    pub module: String,
    pub version: String,
    pub suffix: Option<String>,
}

/// Parse a request path of either `<module>/@v/<version>[/<suffix>]` or
/// `<module>@<version>[/<suffix>]` (with or without a leading slash); the
/// caller is expected to have already stripped any route prefix.
pub fn parse_module_path(path: &str) -> Result<ParsedModulePath, RequestParseError> {
    let trimmed = path.trim_start_matches('/');

    let at_pos = trimmed.find('@').ok_or(RequestParseError::MissingAt)?;
    let (before, after_at) = trimmed.split_at(at_pos);
    let after_at = &after_at[1..]; // drop the '@' itself

    let module = before.trim_end_matches('/');
    if module.is_empty() {
        return Err(RequestParseError::MissingModule);
    }

    // `<module>/@v/<version>` form: the segment right after '@' is the
    // literal "v/" marker rather than the version itself.
    let version_and_suffix = after_at.strip_prefix("v/").unwrap_or(after_at);

    if version_and_suffix.is_empty() {
        return Err(RequestParseError::MissingVersion);
    }

    let (version, suffix) = match version_and_suffix.split_once('/') {
        Some((v, s)) => (v, Some(s.to_string())),
        None => (version_and_suffix, None),
    };

    Ok(ParsedModulePath {
        module: module.to_string(),
        version: version.to_string(),
        suffix,
    })
}

/// A single bound query parameter value, typed by what the schema expects.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl ParamValue {
    fn format(&self) -> String {
        match self {
            ParamValue::Str(s) => s.replace(' ', "+"),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Bool(b) => b.to_string(),
        }
    }
}

/// One field in a query-parameter binding schema: a lower-cased name and
/// its default value (which also fixes the field's expected type).
#[derive(Debug, Clone)]
pub struct ParamField {
    pub name: &'static str,
    pub default: ParamValue,
}

/// A small hand-written registry replacing runtime struct-field reflection:
/// each caller-provided struct gets a `ParamSchema` naming its fields and
/// defaults once, and binding/formatting walk the registry rather than the
/// struct itself.
#[derive(Debug, Clone)]
pub struct ParamSchema {
    pub fields: Vec<ParamField>,
}

impl ParamSchema {
    pub fn new(fields: Vec<ParamField>) -> Self {
        Self { fields }
    }

    /// Bind a query string (`"a=b&c=d"`, no leading `?`) against this
    /// schema. Field names are matched case-insensitively; a name with no
    /// matching field is ignored; an absent field keeps its default.
    pub fn bind(&self, query: &str) -> Result<HashMap<&'static str, ParamValue>, RequestParseError> {
        let mut bound: HashMap<&'static str, ParamValue> = self
            .fields
            .iter()
            .map(|f| (f.name, f.default.clone()))
            .collect();

        if query.is_empty() {
            return Ok(bound);
        }

        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
            let key_lower = key.to_ascii_lowercase();
            let Some(field) = self.fields.iter().find(|f| f.name == key_lower) else {
                continue;
            };
            let value = match field.default {
                ParamValue::Str(_) => ParamValue::Str(raw_value.replace('+', " ")),
                ParamValue::Int(_) => ParamValue::Int(
                    raw_value
                        .parse::<i64>()
                        .map_err(|_| RequestParseError::InvalidSyntax(key_lower.clone()))?,
                ),
                ParamValue::Bool(_) => ParamValue::Bool(
                    raw_value
                        .parse::<bool>()
                        .map_err(|_| RequestParseError::InvalidSyntax(key_lower.clone()))?,
                ),
            };
            bound.insert(field.name, value);
        }

        Ok(bound)
    }

    /// The inverse of `bind`: render bound values back into a query
    /// string, in schema field order.
    pub fn format(&self, bound: &HashMap<&'static str, ParamValue>) -> String {
        self.fields
            .iter()
            .filter_map(|f| bound.get(f.name).map(|v| format!("{}={}", f.name, v.format())))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_module_at_version_suffix() {
        let parsed = parse_module_path("/module@v1.2.3/a/b/c").unwrap();
        assert_eq!(
            parsed,
            ParsedModulePath {
                module: "module".to_string(),
                version: "v1.2.3".to_string(),
                suffix: Some("a/b/c".to_string()),
            }
        );
    }

    #[test]
    fn missing_version_after_at() {
        assert_eq!(
            parse_module_path("/module@"),
            Err(RequestParseError::MissingVersion)
        );
    }

    #[test]
    fn missing_module_before_at() {
        assert_eq!(
            parse_module_path("/@v/v1.0.0"),
            Err(RequestParseError::MissingModule)
        );
    }

    #[test]
    fn missing_at_entirely() {
        assert_eq!(parse_module_path("/"), Err(RequestParseError::MissingAt));
    }

    #[test]
    fn parses_the_at_v_form() {
        let parsed = parse_module_path("/module/@v/v1.2.3/a/b").unwrap();
        assert_eq!(parsed.module, "module");
        assert_eq!(parsed.version, "v1.2.3");
        assert_eq!(parsed.suffix, Some("a/b".to_string()));
    }

    fn example_schema() -> ParamSchema {
        ParamSchema::new(vec![
            ParamField {
                name: "str",
                default: ParamValue::Str("d".to_string()),
            },
            ParamField {
                name: "int",
                default: ParamValue::Int(17),
            },
            ParamField {
                name: "bool",
                default: ParamValue::Bool(false),
            },
        ])
    }

    #[test]
    fn binds_query_params_by_case_insensitive_name() {
        let bound = example_schema().bind("str=foo&int=1&bool=true").unwrap();
        assert_eq!(bound["str"], ParamValue::Str("foo".to_string()));
        assert_eq!(bound["int"], ParamValue::Int(1));
        assert_eq!(bound["bool"], ParamValue::Bool(true));
    }

    #[test]
    fn empty_query_preserves_defaults() {
        let bound = example_schema().bind("").unwrap();
        assert_eq!(bound["str"], ParamValue::Str("d".to_string()));
        assert_eq!(bound["int"], ParamValue::Int(17));
        assert_eq!(bound["bool"], ParamValue::Bool(false));
    }

    #[test]
    fn invalid_int_syntax_is_rejected() {
        assert_eq!(
            example_schema().bind("int=foo"),
            Err(RequestParseError::InvalidSyntax("int".to_string()))
        );
    }

    #[test]
    fn format_params_round_trips() {
        let schema = example_schema();
        let query = "str=foo&int=1&bool=true";
        let bound = schema.bind(query).unwrap();
        assert_eq!(schema.format(&bound), query);
    }
}
