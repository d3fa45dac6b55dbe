//! Display names of dynamic invocations.
use crate::{
    config::{keys, ConfigurationParameters},
    value::Arguments,
};
use regex::{Captures, Regex};
use std::sync::OnceLock;

pub const DEFAULT_PATTERN: &str = "[{index}] {argumentsWithNames}";
pub const DEFAULT_MAX_ARGUMENT_LENGTH: usize = 512;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{([A-Za-z]+|\d+)\}").expect("placeholder regex"))
}

/// Renders name patterns such as `[{index}] {argumentsWithNames}`.
///
/// Supported placeholders are `{index}` (1-based), `{displayName}` (the
/// template's own name), `{arguments}`, `{argumentsWithNames}` and the
/// positional `{0}`, `{1}`, .... Anything else is left verbatim.
#[derive(Debug, Clone)]
pub struct DisplayNameFormatter {
    pattern: String,
    display_name: String,
    max_length: usize,
}

impl DisplayNameFormatter {
    pub fn new(pattern: impl Into<String>, display_name: impl Into<String>, max_length: usize) -> Self {
        DisplayNameFormatter {
            pattern: pattern.into(),
            display_name: display_name.into(),
            max_length: max_length.max(1),
        }
    }

    /// A formatter for `pattern`, falling back to the configured default
    /// pattern and argument length limit.
    pub fn configured(
        pattern: Option<&str>,
        display_name: impl Into<String>,
        configuration: &dyn ConfigurationParameters,
    ) -> Self {
        let pattern = pattern
            .map(str::to_string)
            .or_else(|| configuration.get(keys::DEFAULT_DISPLAY_NAME))
            .unwrap_or_else(|| DEFAULT_PATTERN.to_string());
        let max_length = configuration
            .get_usize(keys::ARGUMENT_MAX_LENGTH)
            .unwrap_or(DEFAULT_MAX_ARGUMENT_LENGTH);
        Self::new(pattern, display_name, max_length)
    }

    /// Shorten `value` to at most `max_length` characters, marking the cut
    /// with a trailing ellipsis.
    pub fn truncate(&self, value: &str) -> String {
        if value.chars().count() <= self.max_length {
            return value.to_string();
        }
        let mut out: String = value.chars().take(self.max_length - 1).collect();
        out.push('…');
        out
    }

    fn render(&self, arguments: &Arguments, index: usize) -> Option<String> {
        arguments.get(index).map(|arg| match &arg.label {
            Some(label) => self.truncate(label),
            None => self.truncate(&arg.value.to_string()),
        })
    }

    /// The name of invocation `index` (1-based) with `arguments`.
    /// `parameter_names` supplies the names for `{argumentsWithNames}`.
    pub fn format(&self, index: usize, arguments: &Arguments, parameter_names: &[String]) -> String {
        placeholder()
            .replace_all(&self.pattern, |caps: &Captures| {
                let key = &caps[1];
                let rendered = match key {
                    "index" => Some(index.to_string()),
                    "displayName" => Some(self.display_name.clone()),
                    "arguments" => Some(
                        (0..arguments.len())
                            .filter_map(|i| self.render(arguments, i))
                            .collect::<Vec<_>>()
                            .join(", "),
                    ),
                    "argumentsWithNames" => Some(
                        (0..arguments.len())
                            .filter_map(|i| {
                                let value = self.render(arguments, i)?;
                                Some(match parameter_names.get(i) {
                                    Some(name) => format!("{}={}", name, value),
                                    None => value,
                                })
                            })
                            .collect::<Vec<_>>()
                            .join(", "),
                    ),
                    positional => positional
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| self.render(arguments, i)),
                };
                rendered.unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}
