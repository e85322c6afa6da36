use std::collections::VecDeque;

use tether::{ACK_VERB, CommandExecutor, Execution, ResultTags};

const MAX_OUTPUT_LINES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("argument {0:?} is not of the form key=value")]
    MissingValue(String),
    #[error("unterminated quoted value")]
    UnterminatedQuote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub verb: String,
    pub args: Vec<(String, String)>,
}

impl ParsedCommand {
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Splits `Verb key=value key="quoted \"value\""` into its parts.
pub fn parse_command(line: &str) -> Result<ParsedCommand, ParseError> {
    let line = line.trim();
    let split = line.find(char::is_whitespace).unwrap_or(line.len());
    let (verb, mut rest) = line.split_at(split);
    if verb.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut args = Vec::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }

        let token_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let Some(eq) = rest[..token_end].find('=').filter(|&eq| eq > 0) else {
            return Err(ParseError::MissingValue(rest[..token_end].to_string()));
        };
        let key = &rest[..eq];
        let after = &rest[eq + 1..];

        let (value, remaining) = match after.strip_prefix('"') {
            Some(quoted) => parse_quoted(quoted)?,
            None => {
                let end = after.find(char::is_whitespace).unwrap_or(after.len());
                (after[..end].to_string(), &after[end..])
            }
        };

        args.push((key.to_string(), value));
        rest = remaining;
    }

    Ok(ParsedCommand {
        verb: verb.to_string(),
        args,
    })
}

fn parse_quoted(input: &str) -> Result<(String, &str), ParseError> {
    let mut value = String::new();
    let mut chars = input.char_indices();
    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => return Err(ParseError::UnterminatedQuote),
            },
            '"' => return Ok((value, &input[i + 1..])),
            _ => value.push(ch),
        }
    }
    Err(ParseError::UnterminatedQuote)
}

/// Small executor used by the front-end: understands `Echo` and the
/// server's `Ack` replies and reports everything else as unknown.
#[derive(Debug, Default)]
pub struct ConsoleExecutor {
    output: VecDeque<String>,
}

impl ConsoleExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain_output(&mut self) -> impl Iterator<Item = String> + '_ {
        self.output.drain(..)
    }

    fn emit(&mut self, line: String) {
        log::info!("{}", line);
        if self.output.len() >= MAX_OUTPUT_LINES {
            self.output.pop_front();
        }
        self.output.push_back(line);
    }
}

impl CommandExecutor for ConsoleExecutor {
    fn execute(&mut self, command: &str) -> Execution {
        let parsed = match parse_command(command) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.emit(format!("Rejected {:?}: {}", command, e));
                return Execution::ignored(ResultTags::MALFORMED);
            }
        };

        if parsed.verb.eq_ignore_ascii_case("echo") {
            match parsed.arg("Message") {
                Some(message) => {
                    self.emit(format!("Echo: {}", message));
                    Execution::consumed(ResultTags::OK)
                }
                None => {
                    self.emit("Echo needs a Message argument".to_string());
                    Execution::consumed(ResultTags::FAILED | ResultTags::MALFORMED)
                }
            }
        } else if parsed.verb.eq_ignore_ascii_case(ACK_VERB) {
            let original = parsed.arg("Command").unwrap_or_default().to_string();
            let consumed = parsed.arg("Consumed") == Some("true");
            self.emit(format!(
                "Peer acknowledged {:?} (consumed: {})",
                original, consumed
            ));
            Execution::consumed(ResultTags::OK)
        } else {
            self.emit(format!("Unknown command {:?}", parsed.verb));
            Execution::ignored(ResultTags::UNKNOWN_COMMAND)
        }
    }
}
