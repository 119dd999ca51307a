// Instruction parsing for the line protocol.
//
// A client line has the shape `name(arg1,arg2,...,argN,)`. The trailing comma
// before `)` is part of the grammar: the argument blob is split on `,` keeping
// empty segments, and exactly one trailing segment is dropped. Any other empty
// segment is an absent argument (`None`).
//
// The parser only tokenizes. It never validates argument counts or types.
// Handlers pull arguments through the `Instruction` cursor and turn any
// `ArgumentError` into a reply string themselves.
//
// Edge cases that follow directly from the grammar:
// - `name()` has zero arguments (the single empty segment is the dropped one).
// - `name(a)` also has zero arguments: without the trailing comma the only
//   segment is dropped.
// - `(1,)` parses with an empty command name; the registry lookup misses and
//   the session replies `Fail`.

use std::str::FromStr;

use thiserror::Error;

/// A line that does not match `name(...)`. Displays as the exact reply text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("Wrong format")]
pub struct FormatError;

/// A handler asked for an argument that is absent or cannot be interpreted.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("Missing argument {index}")]
    Missing { index: usize },
    #[error("Invalid argument {index}: expected {expected}, got {value:?}")]
    Invalid {
        index: usize,
        value: String,
        expected: &'static str,
    },
}

/// One parsed protocol line: a command name plus positional arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    command: String,
    arguments: Vec<Option<String>>,
    cursor: usize,
}

impl Instruction {
    pub fn new(command: impl Into<String>, arguments: Vec<Option<String>>) -> Self {
        Self {
            command: command.into(),
            arguments,
            cursor: 0,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn arguments(&self) -> &[Option<String>] {
        &self.arguments
    }

    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Take the next argument. Absent and out-of-range arguments are both
    /// reported as `Missing`; the cursor advances either way.
    pub fn next_argument(&mut self) -> Result<&str, ArgumentError> {
        let index = self.cursor;
        self.cursor += 1;
        match self.arguments.get(index) {
            Some(Some(value)) => Ok(value.as_str()),
            _ => Err(ArgumentError::Missing { index }),
        }
    }

    /// Take the next argument, treating an absent one as `None`.
    pub fn next_optional(&mut self) -> Option<&str> {
        let index = self.cursor;
        self.cursor += 1;
        self.arguments.get(index).and_then(|arg| arg.as_deref())
    }

    /// Take the next argument and parse it with `FromStr`. Surrounding
    /// whitespace is ignored.
    pub fn next_parsed<T: FromStr>(&mut self) -> Result<T, ArgumentError> {
        let index = self.cursor;
        let raw = self.next_argument()?;
        raw.trim()
            .parse::<T>()
            .map_err(|_| ArgumentError::Invalid {
                index,
                value: raw.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// The argument blob re-joined with `,`, absent arguments as empty
    /// strings. Used by handlers whose payload may itself contain commas.
    pub fn all_arguments(&self) -> String {
        self.arguments
            .iter()
            .map(|arg| arg.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Parse one protocol line into an `Instruction`.
///
/// The line is trimmed first. It is well-formed only if it contains `(` and
/// ends with `)`.
pub fn parse_line(line: &str) -> Result<Instruction, FormatError> {
    let line = line.trim();
    if !line.ends_with(')') {
        return Err(FormatError);
    }
    let open = line.find('(').ok_or(FormatError)?;

    let command = &line[..open];
    let blob = &line[open + 1..line.len() - 1];

    let mut arguments: Vec<Option<String>> = blob
        .split(',')
        .map(|segment| (!segment.is_empty()).then(|| segment.to_string()))
        .collect();
    // Drop the segment after the mandatory trailing comma.
    arguments.pop();

    Ok(Instruction::new(command, arguments))
}
