use crate::RouterError;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;

pub type FlowArgs = Map<String, Value>;

#[derive(Clone, Debug, PartialEq)]
pub enum CommandSignature {
    Empty,
    General { text: String },
    Utility { command: String },
    Flow { command: String, args: FlowArgs },
    ParseError { message: String },
}

/// Classifies raw chat text against the routine names known at startup.
pub struct CommandParser {
    routines: HashSet<String>,
    flow_prefix: char,
    pair: Regex,
}

impl CommandParser {
    pub fn new<I, S>(routines: I, flow_prefix: char) -> Result<Self, RouterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let pair = Regex::new(r"^(\w+)\s*[:=]\s*(.*)$")
            .map_err(|err| RouterError::Configuration(format!("pair pattern failed: {err}")))?;
        Ok(Self {
            routines: routines.into_iter().map(Into::into).collect(),
            flow_prefix,
            pair,
        })
    }

    pub fn parse(&self, raw: &str) -> CommandSignature {
        let message = raw.trim();
        if message.is_empty() {
            CommandSignature::Empty
        } else if self.routines.contains(message) {
            CommandSignature::Utility {
                command: message.to_string(),
            }
        } else if message.starts_with(self.flow_prefix) {
            self.parse_flow(message)
        } else {
            CommandSignature::General {
                text: message.to_string(),
            }
        }
    }

    fn parse_flow(&self, message: &str) -> CommandSignature {
        let (command, content) = match message.split_once(char::is_whitespace) {
            Some((command, content)) => (command, content.trim()),
            None => (message, ""),
        };
        let parsed = if content.starts_with('{') {
            parse_object(content)
        } else {
            self.parse_pairs(content)
        };
        match parsed {
            Ok(args) => CommandSignature::Flow {
                command: command.to_string(),
                args,
            },
            Err(message) => CommandSignature::ParseError { message },
        }
    }

    fn parse_pairs(&self, content: &str) -> Result<FlowArgs, String> {
        let mut args = FlowArgs::new();
        for line in content.lines() {
            let captures = self
                .pair
                .captures(line.trim())
                .ok_or_else(|| format!("unable to decode pair: {line}"))?;
            let key = captures[1].to_string();
            let value = scalar_value(captures[2].trim());
            args.insert(key, value);
        }
        if args.is_empty() {
            return Err("unable to decode pairs".to_string());
        }
        Ok(args)
    }
}

fn parse_object(content: &str) -> Result<FlowArgs, String> {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(args)) => Ok(args),
        Ok(other) => Err(format!("flow arguments must be an object, got {other}")),
        Err(err) => Err(format!("invalid json arguments: {err}")),
    }
}

/// Reads `raw` wrapped in a JSON array and keeps the first element, so bare scalars
/// and lists both parse. Anything that is not JSON stays a string.
fn scalar_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(&format!("[{raw}]")) {
        Ok(Value::Array(items)) => items.into_iter().next(),
        _ => None,
    }
    .unwrap_or_else(|| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{CommandParser, CommandSignature};
    use serde_json::json;

    fn parser() -> CommandParser {
        CommandParser::new(["status", "time"], '!').expect("parser")
    }

    fn flow_args(signature: CommandSignature) -> serde_json::Value {
        match signature {
            CommandSignature::Flow { args, .. } => serde_json::Value::Object(args),
            other => panic!("expected flow, got {other:?}"),
        }
    }

    #[test]
    fn blank_and_plain_messages() {
        assert_eq!(parser().parse("   \n"), CommandSignature::Empty);
        assert_eq!(
            parser().parse(" hello "),
            CommandSignature::General {
                text: "hello".to_string()
            }
        );
    }

    #[test]
    fn configured_routine_names_are_utilities() {
        assert_eq!(
            parser().parse("status"),
            CommandSignature::Utility {
                command: "status".to_string()
            }
        );
        assert!(matches!(
            parser().parse("status please"),
            CommandSignature::General { .. }
        ));
    }

    #[test]
    fn json_object_arguments() {
        let signature =
            parser().parse(r#"!locate {"path":"/tmp","pattern":"a","domain":"title"}"#);
        match &signature {
            CommandSignature::Flow { command, .. } => assert_eq!(command, "!locate"),
            other => panic!("expected flow, got {other:?}"),
        }
        assert_eq!(
            flow_args(signature),
            json!({"path": "/tmp", "pattern": "a", "domain": "title"})
        );
    }

    #[test]
    fn key_value_lines_keep_bare_strings() {
        let args = flow_args(parser().parse("!locate path=/tmp\npattern=a"));
        assert_eq!(args, json!({"path": "/tmp", "pattern": "a"}));
    }

    #[test]
    fn key_value_lines_decode_json_scalars() {
        let args = flow_args(parser().parse(
            "!rse lang: \"PYTHON\"\ntime_limit = 2\npurge: true\nitems: [1, 2]\npair: 3, 4",
        ));
        assert_eq!(
            args,
            json!({"lang": "PYTHON", "time_limit": 2, "purge": true, "items": [1, 2], "pair": 3})
        );
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            parser().parse("!locate {bad json"),
            CommandSignature::ParseError { .. }
        ));
        assert!(matches!(
            parser().parse("!locate {\"a\": 1} trailing"),
            CommandSignature::ParseError { .. }
        ));
    }

    #[test]
    fn unmatched_line_or_missing_pairs_reject_whole_parse() {
        assert!(matches!(
            parser().parse("!locate path=/tmp\nnot a pair"),
            CommandSignature::ParseError { .. }
        ));
        assert!(matches!(
            parser().parse("!locate"),
            CommandSignature::ParseError { .. }
        ));
        assert!(matches!(
            parser().parse("!locate    "),
            CommandSignature::ParseError { .. }
        ));
    }
}
