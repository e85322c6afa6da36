use bitflags::bitflags;

pub const ACK_VERB: &str = "Ack";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResultTags: u32 {
        const OK = 1 << 0;
        const FAILED = 1 << 1;
        const UNKNOWN_COMMAND = 1 << 2;
        const MALFORMED = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Execution {
    pub consumed: bool,
    pub tags: ResultTags,
}

impl Execution {
    pub fn consumed(tags: ResultTags) -> Self {
        Self {
            consumed: true,
            tags,
        }
    }

    pub fn ignored(tags: ResultTags) -> Self {
        Self {
            consumed: false,
            tags,
        }
    }
}

/// Interprets decoded command text. Commands typed locally and commands
/// received from the remote peer go through the same call.
pub trait CommandExecutor {
    fn execute(&mut self, command: &str) -> Execution;
}

impl<F> CommandExecutor for F
where
    F: FnMut(&str) -> Execution,
{
    fn execute(&mut self, command: &str) -> Execution {
        self(command)
    }
}

/// Builds the reply the server sends after running a remote command, e.g.
/// `Ack Consumed=true Command="Echo Message=\"hi\""`.
pub fn acknowledgement(command: &str, execution: &Execution) -> String {
    let mut escaped = String::with_capacity(command.len() + 2);
    for ch in command.chars() {
        if matches!(ch, '"' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    format!(
        "{} Consumed={} Command=\"{}\"",
        ACK_VERB, execution.consumed, escaped
    )
}
