//! Parser for the HAProxy configuration file written by synapse
//!
//! The parser is deliberately naive: it understands the five section keywords,
//! `#` comments and blank lines, and otherwise treats every line as an opaque
//! directive. There is no quoting or escaping support. It is good enough to
//! assert on what synapse generated, and nothing more.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Section keywords that open a new block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Global,
    Defaults,
    Frontend,
    Backend,
    Listen,
}

impl Category {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "global" => Some(Category::Global),
            "defaults" => Some(Category::Defaults),
            "frontend" => Some(Category::Frontend),
            "backend" => Some(Category::Backend),
            "listen" => Some(Category::Listen),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Global => "global",
            Category::Defaults => "defaults",
            Category::Frontend => "frontend",
            Category::Backend => "backend",
            Category::Listen => "listen",
        }
    }
}

/// A `frontend` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FrontendEntry {
    /// Remainder of the most recent declaration line after the name
    pub address: Option<String>,
    pub config: Vec<String>,
}

/// A `listen` block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListenEntry {
    /// Remainder of the most recent declaration line after the name
    pub address: Option<String>,
    pub config: Vec<String>,
}

/// A `backend` block (backends are never bound to an address)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackendEntry {
    pub config: Vec<String>,
}

/// Parsed HAProxy configuration, grouped by category and block name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigDocument {
    pub global: Vec<String>,
    pub defaults: Vec<String>,
    pub frontend: BTreeMap<String, FrontendEntry>,
    pub backend: BTreeMap<String, BackendEntry>,
    pub listen: BTreeMap<String, ListenEntry>,
}

/// Where body lines currently go
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cursor {
    None,
    Global,
    Defaults,
    Named(Category, String),
}

impl ConfigDocument {
    /// Parse a configuration from its full text
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser::default();
        for (idx, line) in text.lines().enumerate() {
            parser.feed(idx + 1, line)?;
        }
        Ok(parser.finish())
    }

    /// Parse a configuration from any buffered line source
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut parser = Parser::default();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| match e.kind() {
                io::ErrorKind::InvalidData => Error::malformed(idx + 1, "line is not valid UTF-8"),
                _ => Error::Io(e),
            })?;
            parser.feed(idx + 1, &line)?;
        }
        Ok(parser.finish())
    }

    /// Open and parse the configuration file at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::FileNotFound {
            path: path.to_path_buf(),
            source,
        })?;
        let document = Self::from_reader(BufReader::new(file))?;
        debug!(
            path = %path.display(),
            frontends = document.frontend.len(),
            backends = document.backend.len(),
            listens = document.listen.len(),
            "Parsed haproxy config"
        );
        Ok(document)
    }
}

impl FromStr for ConfigDocument {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Single-pass state machine over configuration lines
#[derive(Debug)]
struct Parser {
    document: ConfigDocument,
    cursor: Cursor,
}

impl Default for Parser {
    fn default() -> Self {
        Self {
            document: ConfigDocument::default(),
            cursor: Cursor::None,
        }
    }
}

impl Parser {
    fn feed(&mut self, lineno: usize, raw: &str) -> Result<()> {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }

        let (first, second, rest) = split_fields(line)
            .ok_or_else(|| Error::malformed(lineno, "line could not be tokenized"))?;

        match Category::from_keyword(first) {
            Some(category) => self.open(lineno, category, second, rest),
            None => self.append(lineno, line),
        }
    }

    fn open(
        &mut self,
        lineno: usize,
        category: Category,
        name: Option<&str>,
        rest: Option<&str>,
    ) -> Result<()> {
        let address = rest.map(str::to_string);
        let doc = &mut self.document;

        let name = match (category, name) {
            (Category::Global, _) => {
                self.cursor = Cursor::Global;
                return Ok(());
            }
            (Category::Defaults, _) => {
                self.cursor = Cursor::Defaults;
                return Ok(());
            }
            (_, None) => {
                return Err(Error::malformed(
                    lineno,
                    format!("'{}' section requires a name", category.as_str()),
                ))
            }
            (Category::Frontend, Some(name)) => {
                doc.frontend.entry(name.to_string()).or_default().address = address;
                name
            }
            (Category::Listen, Some(name)) => {
                doc.listen.entry(name.to_string()).or_default().address = address;
                name
            }
            (Category::Backend, Some(name)) => {
                doc.backend.entry(name.to_string()).or_default();
                name
            }
        };

        self.cursor = Cursor::Named(category, name.to_string());
        Ok(())
    }

    fn append(&mut self, lineno: usize, line: &str) -> Result<()> {
        let doc = &mut self.document;
        let config = match &self.cursor {
            Cursor::None => {
                return Err(Error::malformed(
                    lineno,
                    "content line before any section header",
                ))
            }
            Cursor::Global => &mut doc.global,
            Cursor::Defaults => &mut doc.defaults,
            Cursor::Named(Category::Frontend, name) => {
                &mut doc.frontend.entry(name.clone()).or_default().config
            }
            Cursor::Named(Category::Listen, name) => {
                &mut doc.listen.entry(name.clone()).or_default().config
            }
            Cursor::Named(_, name) => &mut doc.backend.entry(name.clone()).or_default().config,
        };
        config.push(line.to_string());
        Ok(())
    }

    fn finish(self) -> ConfigDocument {
        self.document
    }
}

/// Split a trimmed line into `first`, `second` and the untouched remainder
fn split_fields(line: &str) -> Option<(&str, Option<&str>, Option<&str>)> {
    let (first, tail) = next_token(line)?;
    let Some((second, tail)) = next_token(tail) else {
        return Some((first, None, None));
    };
    let rest = tail.trim_start();
    let rest = (!rest.is_empty()).then_some(rest);
    Some((first, Some(second), rest))
}

fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(end) => Some((&s[..end], &s[end..])),
        None => Some((s, "")),
    }
}
