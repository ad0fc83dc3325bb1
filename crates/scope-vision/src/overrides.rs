//! Identifier → name / color overrides.
//!
//! The raw text accepts a small fixed grammar, one `key: value` entry per
//! comma or line, optionally wrapped in braces:
//!
//! ```text
//! {5: "forklift", 2: 'pallet'}
//! 7: worker
//! 5: (255, 128, 0)
//! 2: [0, 0, 255]
//! ```
//!
//! Keys are integers and match a detection's track id, or its class id when
//! it has none. The last duplicate key wins.

use scope_proto::{Color, PipelineConfig};
use std::collections::HashMap;
use thiserror::Error;

use crate::Detection;

pub type NameMap = HashMap<i64, String>;
pub type ColorMap = HashMap<i64, Color>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("at byte {offset}: expected {expected}")]
pub struct OverrideParseError {
    pub offset: usize,
    pub expected: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverrideKind {
    Names,
    Colors,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} override: {source}")]
pub struct OverrideError {
    pub kind: OverrideKind,
    #[source]
    pub source: OverrideParseError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideMaps {
    pub names: NameMap,
    pub colors: ColorMap,
}

impl OverrideMaps {
    /// Parses the maps whose override flag is on. A map that fails to parse
    /// comes back empty and its error is returned alongside.
    pub fn from_config(cfg: &PipelineConfig) -> (Self, Vec<OverrideError>) {
        let mut maps = OverrideMaps::default();
        let mut errors = Vec::new();

        if cfg.override_enabled {
            match parse_name_map(&cfg.override_text) {
                Ok(m) => maps.names = m,
                Err(source) => errors.push(OverrideError { kind: OverrideKind::Names, source }),
            }
        }
        if cfg.override_color_enabled {
            match parse_color_map(&cfg.override_color_text) {
                Ok(m) => maps.colors = m,
                Err(source) => errors.push(OverrideError { kind: OverrideKind::Colors, source }),
            }
        }
        (maps, errors)
    }
}

/// Display name and color for `det`. Missing keys keep the detection's own.
pub fn resolve<'a>(det: &'a Detection, maps: &'a OverrideMaps, cfg: &PipelineConfig) -> (&'a str, Color) {
    let key = det.override_key();
    let color = match maps.colors.get(&key) {
        Some(c) if cfg.override_color_enabled => *c,
        _ => det.color,
    };
    let name = match maps.names.get(&key) {
        Some(n) if cfg.override_enabled => n.as_str(),
        _ => det.class_name.as_str(),
    };
    (name, color)
}

pub fn parse_name_map(text: &str) -> Result<NameMap, OverrideParseError> {
    parse_map(text, Scanner::name)
}

pub fn parse_color_map(text: &str) -> Result<ColorMap, OverrideParseError> {
    parse_map(text, Scanner::color)
}

fn parse_map<'a, V>(
    text: &'a str,
    mut value: impl FnMut(&mut Scanner<'a>) -> Result<V, OverrideParseError>,
) -> Result<HashMap<i64, V>, OverrideParseError> {
    let mut sc = Scanner { src: text, pos: 0 };
    let mut map = HashMap::new();

    sc.skip_ws();
    let braced = sc.eat('{');
    loop {
        sc.skip_ws();
        match sc.peek() {
            None if braced => return Err(sc.error("'}'")),
            None => break,
            Some('}') if braced => {
                sc.bump();
                sc.skip_ws();
                if sc.peek().is_some() {
                    return Err(sc.error("end of text after '}'"));
                }
                break;
            }
            _ => {}
        }

        let key = sc.integer()?;
        sc.skip_inline_ws();
        sc.expect(':')?;
        sc.skip_inline_ws();
        let v = value(&mut sc)?;
        map.insert(key, v);

        sc.skip_inline_ws();
        match sc.peek() {
            Some(',') | Some('\n') => sc.bump(),
            Some('}') if braced => {}
            None => {}
            Some(_) => return Err(sc.error("',' or newline")),
        }
    }
    Ok(map)
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<(), OverrideParseError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(match c {
                ':' => "':'",
                ',' => "','",
                ')' => "')'",
                ']' => "']'",
                _ => "delimiter",
            }))
        }
    }

    fn error(&self, expected: &'static str) -> OverrideParseError {
        OverrideParseError { offset: self.pos, expected }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    // whitespace that does not end an entry
    fn skip_inline_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace() && c != '\n') {
            self.bump();
        }
    }

    fn digits(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn integer(&mut self) -> Result<i64, OverrideParseError> {
        let start = self.pos;
        if !self.eat('-') {
            self.eat('+');
        }
        if self.digits().is_empty() {
            self.pos = start;
            return Err(self.error("integer key"));
        }
        self.src[start..self.pos]
            .trim_start_matches('+')
            .parse()
            .map_err(|_| OverrideParseError { offset: start, expected: "integer in i64 range" })
    }

    fn byte(&mut self) -> Result<u8, OverrideParseError> {
        let start = self.pos;
        let d = self.digits();
        if d.is_empty() {
            return Err(self.error("color component 0..255"));
        }
        d.parse().map_err(|_| OverrideParseError { offset: start, expected: "color component 0..255" })
    }

    fn name(&mut self) -> Result<String, OverrideParseError> {
        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump();
                self.quoted(q)
            }
            _ => {
                let start = self.pos;
                while self.peek().is_some_and(|c| !matches!(c, ',' | '\n' | '{' | '}' | ':' | '"' | '\'')) {
                    self.bump();
                }
                let word = self.src[start..self.pos].trim_end();
                if word.is_empty() {
                    self.pos = start;
                    return Err(self.error("name"));
                }
                Ok(word.to_string())
            }
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String, OverrideParseError> {
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("closing quote")),
                Some(c) if c == quote => {
                    self.bump();
                    return Ok(out);
                }
                Some('\\') => {
                    self.bump();
                    match self.peek() {
                        Some(c @ ('\\' | '\'' | '"')) => {
                            out.push(c);
                            self.bump();
                        }
                        _ => return Err(self.error("escape \\\\, \\' or \\\"")),
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.bump();
                }
            }
        }
    }

    fn color(&mut self) -> Result<Color, OverrideParseError> {
        let close = match self.peek() {
            Some('(') => ')',
            Some('[') => ']',
            _ => return Err(self.error("'(' or '['")),
        };
        self.bump();
        let mut rgb = [0u8; 3];
        for (i, slot) in rgb.iter_mut().enumerate() {
            self.skip_ws();
            *slot = self.byte()?;
            self.skip_ws();
            if i < 2 {
                self.expect(',')?;
            }
        }
        self.eat(',');
        self.skip_ws();
        self.expect(close)?;
        Ok(rgb)
    }
}
