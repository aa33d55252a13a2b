use std::fmt;

use crate::error::{SoutError, SoutResult};

/// One `key[=value]` option of a chain element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOption {
    /// Option name
    pub key: String,
    /// Option value, `None` for a bare flag
    pub value: Option<String>,
}

/// A module reference with its options, e.g. `std{access=file,dst=out.wav}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainElement {
    name: String,
    options: Vec<ChainOption>,
}

/// Parsed `a{..}:b{..}` description, ordered closest-to-source first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChain {
    elements: Vec<ChainElement>,
}

impl ConfigChain {
    /// Parse a chain description; a leading `#` is accepted
    pub fn parse(description: &str) -> SoutResult<Self> {
        let mut parser = Parser::new(description);
        let elements = parser.chain()?;
        Ok(ConfigChain { elements })
    }

    /// Elements in source-to-sink order
    pub fn elements(&self) -> &[ChainElement] {
        &self.elements
    }

    /// Take the elements
    pub fn into_elements(self) -> Vec<ChainElement> {
        self.elements
    }
}

impl fmt::Display for ConfigChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{element}")?;
        }
        Ok(())
    }
}

impl ChainElement {
    /// Element without options
    pub fn new(name: impl Into<String>) -> Self {
        ChainElement {
            name: name.into(),
            options: Vec::new(),
        }
    }

    /// Parse exactly one element, such as a mux or access name with options
    pub fn parse(description: &str) -> SoutResult<Self> {
        let mut parser = Parser::new(description);
        parser.skip_ws();
        let element = parser.element()?;
        parser.skip_ws();
        if let Some(c) = parser.peek() {
            return Err(parser.error(&format!("unexpected '{c}' after {}", element.name)));
        }
        Ok(element)
    }

    /// Append an option
    pub fn with_option(mut self, key: impl Into<String>, value: Option<&str>) -> Self {
        self.options.push(ChainOption {
            key: key.into(),
            value: value.map(str::to_string),
        });
        self
    }

    /// Module name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All options in declaration order
    pub fn options(&self) -> &[ChainOption] {
        &self.options
    }

    /// Last value given for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .rev()
            .find(|opt| opt.key == key)
            .and_then(|opt| opt.value.as_deref())
    }

    /// Every value given for `key`, in order
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.options
            .iter()
            .filter(move |opt| opt.key == key)
            .filter_map(|opt| opt.value.as_deref())
    }

    /// Boolean option: `key` alone is true, `nokey`/`no-key` is false
    pub fn get_bool(&self, key: &str, default: bool) -> SoutResult<bool> {
        for opt in self.options.iter().rev() {
            if opt.key == key {
                return match opt.value.as_deref() {
                    None => Ok(true),
                    Some(v) => parse_bool(key, v),
                };
            }
            let negated = opt
                .key
                .strip_prefix("no-")
                .or_else(|| opt.key.strip_prefix("no"));
            if negated == Some(key) && opt.value.is_none() {
                return Ok(false);
            }
        }
        Ok(default)
    }

    /// Integer option
    pub fn get_int(&self, key: &str) -> SoutResult<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| SoutError::Config(format!("{}: {key}={v} is not an integer", self.name))),
        }
    }
}

impl fmt::Display for ChainElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.options.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, opt) in self.options.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(&opt.key)?;
            if let Some(value) = &opt.value {
                if value.contains(|c| matches!(c, ',' | '{' | '}' | ':' | '"' | '\'' | '\\')) {
                    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                    write!(f, "=\"{escaped}\"")?;
                } else {
                    write!(f, "={value}")?;
                }
            }
        }
        f.write_str("}")
    }
}

fn parse_bool(key: &str, value: &str) -> SoutResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SoutError::Config(format!("{key}={other} is not a boolean"))),
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Parser { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, what: &str) -> SoutError {
        SoutError::ChainSyntax(format!("{what} at offset {} in \"{}\"", self.pos, self.src))
    }

    fn chain(&mut self) -> SoutResult<Vec<ChainElement>> {
        self.skip_ws();
        if self.peek() == Some('#') {
            self.bump();
        }
        let mut elements = Vec::new();
        loop {
            self.skip_ws();
            elements.push(self.element()?);
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(':') => {
                    self.bump();
                }
                Some(c) => return Err(self.error(&format!("unexpected '{c}'"))),
            }
        }
        Ok(elements)
    }

    fn element(&mut self) -> SoutResult<ChainElement> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            self.bump();
        }
        let name = &self.src[start..self.pos];
        if name.is_empty() {
            return Err(self.error("expected module name"));
        }
        let mut element = ChainElement::new(name);
        self.skip_ws();
        if self.peek() == Some('{') {
            self.bump();
            element.options = self.options()?;
        }
        Ok(element)
    }

    fn options(&mut self) -> SoutResult<Vec<ChainOption>> {
        let mut options = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('}') => {
                    self.bump();
                    return Ok(options);
                }
                None => return Err(self.error("unterminated option list")),
                _ => {}
            }

            let start = self.pos;
            while self.peek().is_some_and(|c| !matches!(c, '=' | ',' | '}')) {
                self.bump();
            }
            let key = self.src[start..self.pos].trim();
            if key.is_empty() {
                return Err(self.error("expected option name"));
            }
            let key = key.to_string();

            let value = if self.peek() == Some('=') {
                self.bump();
                Some(self.value()?)
            } else {
                None
            };
            options.push(ChainOption { key, value });

            self.skip_ws();
            match self.bump() {
                Some(',') => {}
                Some('}') => return Ok(options),
                None => return Err(self.error("unterminated option list")),
                Some(c) => return Err(self.error(&format!("unexpected '{c}'"))),
            }
        }
    }

    fn value(&mut self) -> SoutResult<String> {
        self.skip_ws();
        if let Some(quote @ ('"' | '\'')) = self.peek() {
            self.bump();
            return self.quoted(quote, false);
        }

        let mut value = String::new();
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                ',' if depth == 0 => break,
                '}' if depth == 0 => break,
                '{' => depth += 1,
                '}' => depth -= 1,
                '"' | '\'' => {
                    self.bump();
                    value.push(c);
                    value.push_str(&self.quoted(c, true)?);
                    value.push(c);
                    continue;
                }
                _ => {}
            }
            value.push(c);
            self.bump();
        }
        if depth != 0 {
            return Err(self.error("unbalanced braces in value"));
        }
        Ok(value.trim_end().to_string())
    }

    /// Read up to the closing quote; `raw` keeps escapes for later re-parsing
    fn quoted(&mut self, quote: char, raw: bool) -> SoutResult<String> {
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated quoted value")),
                Some('\\') => {
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("unterminated quoted value"))?;
                    if raw {
                        value.push('\\');
                    }
                    value.push(escaped);
                }
                Some(c) if c == quote => return Ok(value),
                Some(c) => value.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_chain() {
        let chain = ConfigChain::parse("#delay{id=1,delay=200}:std{access=file,mux=wav,dst=out.wav}")
            .unwrap();
        let elements = chain.elements();
        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].name(), "delay");
        assert_eq!(elements[0].get_int("delay").unwrap(), Some(200));
        assert_eq!(elements[1].get("dst"), Some("out.wav"));
    }

    #[test]
    fn test_parse_nested_values() {
        let chain = ConfigChain::parse(
            "duplicate{dst=std{access=file,dst=a.wav},dst=dummy,select=\"es=1,audio\"}",
        )
        .unwrap();
        let dup = &chain.elements()[0];
        let dsts: Vec<_> = dup.get_all("dst").collect();
        assert_eq!(dsts, vec!["std{access=file,dst=a.wav}", "dummy"]);
        assert_eq!(dup.get("select"), Some("es=1,audio"));

        let inner = ConfigChain::parse(dsts[0]).unwrap();
        assert_eq!(inner.elements()[0].get("access"), Some("file"));
    }

    #[test]
    fn test_bool_options() {
        let element = ChainElement::parse("file{append,nooverwrite,sync=0}").unwrap();
        assert!(element.get_bool("append", false).unwrap());
        assert!(!element.get_bool("overwrite", true).unwrap());
        assert!(!element.get_bool("sync", true).unwrap());
        assert!(element.get_bool("format", true).unwrap());

        let element = ChainElement::parse("file{format=maybe}").unwrap();
        assert!(element.get_bool("format", false).is_err());
    }

    #[test]
    fn test_syntax_errors() {
        assert!(ConfigChain::parse("").is_err());
        assert!(ConfigChain::parse("std{dst=a").is_err());
        assert!(ConfigChain::parse("std{dst=\"a}").is_err());
        assert!(ConfigChain::parse("std:").is_err());
        assert!(ChainElement::parse("wav extra").is_err());
    }

    #[test]
    fn test_display_reparses() {
        let chain = ConfigChain::parse("duplicate{dst=std{dst=\"a,b.wav\"},dst=dummy}").unwrap();
        let again = ConfigChain::parse(&chain.to_string()).unwrap();
        assert_eq!(chain, again);
    }
}
