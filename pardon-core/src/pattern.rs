//! The pattern language (spec.md §4.1): `{{hint* name? ( '=' expr )?}}`
//! holes embedded in literal strings, rendered and matched bidirectionally.

use std::fmt::Write as _;

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::error::{self, PardonError};

/// The literal text a `@secret` hole renders as when secrets are not
/// revealed (spec.md §4.4, `redact`). Recognised symmetrically by
/// [`Pattern::match_literal`]: a secret hole that captures exactly this text
/// is treated as unmatched rather than letting a redacted echo launder as
/// real data.
pub const REDACTED: &str = "{{redacted}}";

/// Single-character (or `...`) hints recognised inside a hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hint(u8);

impl Hint {
    /// `@` — the bound value is a secret and must be redacted.
    pub const SECRET: Hint = Hint(0b0001);
    /// `?` — the hole is optional during render.
    pub const OPTIONAL: Hint = Hint(0b0010);
    /// `!` — the hole is required during match.
    pub const REQUIRED_ON_MATCH: Hint = Hint(0b0100);
    /// `*` — the captured value must be a non-empty string.
    pub const NON_EMPTY: Hint = Hint(0b1000);
    /// `...` — "rest of path/string"; greedy capture.
    pub const REST: Hint = Hint(0b1_0000);

    #[must_use]
    pub const fn empty() -> Self {
        Hint(0)
    }

    #[must_use]
    pub const fn contains(self, other: Hint) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Hint {
    type Output = Hint;
    fn bitor(self, rhs: Hint) -> Hint {
        Hint(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Hint {
    fn bitor_assign(&mut self, rhs: Hint) {
        self.0 |= rhs.0;
    }
}

/// A single `{{ ... }}` hole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hole {
    /// Dotted path (`a.b.c`), or `None` for an anonymous `{{}}`/`_` hole.
    pub name: Option<String>,
    pub hints: Hint,
    pub expression: Option<String>,
    pub redactor: Option<String>,
}

impl Hole {
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.name.is_none()
    }

    #[must_use]
    pub fn is_secret(&self) -> bool {
        self.hints.contains(Hint::SECRET)
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.hints.contains(Hint::OPTIONAL)
    }

    #[must_use]
    pub fn is_required_on_match(&self) -> bool {
        self.hints.contains(Hint::REQUIRED_ON_MATCH)
    }

    #[must_use]
    pub fn is_rest(&self) -> bool {
        self.hints.contains(Hint::REST)
    }
}

/// One piece of a parsed [`Pattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Hole(Hole),
}

/// A parsed string with literal segments and variable holes (spec.md §3,
/// "Pattern"). Patterns are immutable once parsed; rendering and matching
/// never mutate a `Pattern`.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
    regex: OnceCell<Regex>,
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

/// Anything capable of supplying bound values and evaluating expressions
/// during [`Pattern::render`]. Kept generic over the evaluation scope so
/// that this leaf module never depends on the scope/expression layer above
/// it (spec.md §4.1: "render(pattern, lookup)").
pub trait Lookup {
    /// Resolve a (possibly dotted) hole name to its bound string value.
    fn lookup(&self, name: &str) -> Option<String>;
    /// Evaluate a hole's inline expression to a string value. Returns `Ok(None)`
    /// if the expression evaluated to an explicit absence (e.g. `undefined`).
    fn evaluate(&self, expression: &str) -> Result<Option<String>, PardonError>;
}

impl Pattern {
    /// Parses a pattern string, recognizing `{{ ... }}` holes and the
    /// `{_{` escape for a literal `{{`.
    ///
    /// # Errors
    /// Returns [`PardonError::Parse`] on an unterminated hole or on two
    /// holes with no literal character between them (ambiguous match).
    pub fn parse(source: &str) -> Result<Self, PardonError> {
        use tap::TapFallible;

        let segments = lex(source).tap_err(|err| tracing::debug!(source, %err, "pattern failed to parse"))?;
        Ok(Self {
            source: source.to_string(),
            segments,
            regex: OnceCell::new(),
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// A pattern is "simple" when it is exactly one hole spanning the whole
    /// string (spec.md §3).
    #[must_use]
    pub fn is_simple(&self) -> bool {
        matches!(self.segments.as_slice(), [Segment::Hole(_)])
    }

    pub fn holes(&self) -> impl Iterator<Item = &Hole> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Hole(h) => Some(h),
            Segment::Literal(_) => None,
        })
    }

    /// Renders the pattern by concatenating literals with each hole's bound
    /// or evaluated value. Returns `Ok(None)` if a required hole has no
    /// value (a `?` hole is silently treated as empty in `preview` mode by
    /// the caller, not here — see [`crate::context::Mode::Preview`]).
    pub fn render(&self, lookup: &dyn Lookup) -> Result<Option<String>, PardonError> {
        self.render_with(lookup, true)
    }

    /// Like [`Pattern::render`], but substitutes [`REDACTED`] for any
    /// `@secret` hole's value when `reveal_secrets` is `false` (spec.md
    /// §4.4, `redact`; end-to-end scenario 4).
    pub fn render_with(&self, lookup: &dyn Lookup, reveal_secrets: bool) -> Result<Option<String>, PardonError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Hole(hole) => {
                    if hole.is_secret() && !reveal_secrets {
                        out.push_str(REDACTED);
                        continue;
                    }
                    let value = self.resolve_hole(hole, lookup)?;
                    match value {
                        Some(v) => out.push_str(&v),
                        None if hole.is_optional() => {}
                        None => return Ok(None),
                    }
                }
            }
        }
        Ok(Some(out))
    }

    /// Like [`Pattern::render`], but never fails: unbound holes fall back to
    /// their original `{{...}}` source text. Used by `Mode::Preview`.
    #[must_use]
    pub fn preview(&self, lookup: &dyn Lookup) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Hole(hole) => match self.resolve_hole(hole, lookup) {
                    Ok(Some(v)) => out.push_str(&v),
                    _ => {
                        let _ = write!(out, "{{{{{}}}}}", hole_source(hole));
                    }
                },
            }
        }
        out
    }

    fn resolve_hole(&self, hole: &Hole, lookup: &dyn Lookup) -> Result<Option<String>, PardonError> {
        if let Some(expr) = &hole.expression {
            return lookup.evaluate(expr);
        }
        match &hole.name {
            Some(name) => Ok(lookup.lookup(name)),
            None => Ok(None),
        }
    }

    /// Compiles the pattern to a regex with named capture groups, caching
    /// the result (patterns are immutable and are matched repeatedly during
    /// flows).
    fn regex(&self) -> Result<&Regex, PardonError> {
        self.regex.get_or_try_init(|| compile_regex(&self.segments))
    }

    /// Matches a concrete string, emitting `{name -> captured}` bindings. A
    /// `!` hole that failed to capture is a hard failure; a `?` hole that
    /// failed is silently skipped (spec.md §4.1).
    pub fn match_literal(&self, literal: &str) -> Result<Option<Vec<(String, String)>>, PardonError> {
        let regex = self.regex()?;
        let Some(captures) = regex.captures(literal) else {
            return Ok(None);
        };
        let mut bindings = Vec::new();
        for (index, hole) in self.holes().enumerate() {
            let group_name = format!("h{index}");
            let captured = captures.name(&group_name).map(|m| m.as_str().to_string());
            match captured {
                Some(value) if hole.is_secret() && value == REDACTED => return Ok(None),
                Some(value) => {
                    if hole.hints.contains(Hint::NON_EMPTY) && value.is_empty() {
                        if hole.is_required_on_match() {
                            return Err(error::MatchCtx {
                                loc: self.source.clone(),
                                message: format!(
                                    "hole `{}` requires a non-empty capture",
                                    hole.name.as_deref().unwrap_or("_")
                                ),
                            }
                            .build());
                        }
                        continue;
                    }
                    if let Some(name) = &hole.name {
                        bindings.push((name.clone(), value));
                    }
                }
                None if hole.is_required_on_match() => {
                    return Err(error::MatchCtx {
                        loc: self.source.clone(),
                        message: format!(
                            "required hole `{}` did not capture",
                            hole.name.as_deref().unwrap_or("_")
                        ),
                    }
                    .build());
                }
                None => {}
            }
        }
        Ok(Some(bindings))
    }

    /// Positional captures keyed by hole index, used by redaction (spec.md
    /// §4.1, `values`).
    pub fn values(&self, literal: &str) -> Result<Option<Vec<Option<String>>>, PardonError> {
        let regex = self.regex()?;
        let Some(captures) = regex.captures(literal) else {
            return Ok(None);
        };
        let values = (0..self.holes().count())
            .map(|index| captures.name(&format!("h{index}")).map(|m| m.as_str().to_string()))
            .collect();
        Ok(Some(values))
    }
}

fn hole_source(hole: &Hole) -> String {
    let mut out = String::new();
    if hole.hints.contains(Hint::SECRET) {
        out.push('@');
    }
    if hole.hints.contains(Hint::OPTIONAL) {
        out.push('?');
    }
    if hole.hints.contains(Hint::REQUIRED_ON_MATCH) {
        out.push('!');
    }
    if hole.hints.contains(Hint::NON_EMPTY) {
        out.push('*');
    }
    if hole.hints.contains(Hint::REST) {
        out.push_str("...");
    }
    if let Some(name) = &hole.name {
        out.push_str(name);
    }
    if let Some(expr) = &hole.expression {
        out.push_str(" = ");
        out.push_str(expr);
    }
    out
}

fn compile_regex(segments: &[Segment]) -> Result<Regex, PardonError> {
    let mut pattern = String::from("(?s)^");
    let mut hole_index = 0usize;
    for segment in segments {
        match segment {
            Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
            Segment::Hole(hole) => {
                let group = format!("h{hole_index}");
                hole_index += 1;
                if hole.is_rest() {
                    let _ = write!(pattern, "(?P<{group}>.*)");
                } else {
                    let _ = write!(pattern, "(?P<{group}>[^/]*?)");
                }
            }
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|source| {
        error::ParseCtx {
            loc: "pattern".to_string(),
            message: format!("failed to compile pattern regex: {source}"),
        }
        .build()
    })
}

/// Tokenises a pattern source into literal/hole segments.
fn lex(source: &str) -> Result<Vec<Segment>, PardonError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut last_was_hole = false;
    while i < chars.len() {
        if chars[i] == '{' && chars.get(i + 1) == Some(&'_') && chars.get(i + 2) == Some(&'{') {
            literal.push_str("{{");
            i += 3;
            last_was_hole = false;
            continue;
        }
        if chars[i] == '{' && chars.get(i + 1) == Some(&'{') {
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            } else if last_was_hole {
                return Err(error::ParseCtx {
                    loc: source.to_string(),
                    message: "ambiguous match: two holes with no literal between them".to_string(),
                }
                .build());
            }
            let start = i + 2;
            let Some(end) = find_close(&chars, start) else {
                return Err(error::ParseCtx {
                    loc: source.to_string(),
                    message: "unterminated `{{` hole".to_string(),
                }
                .build());
            };
            let body: String = chars[start..end].iter().collect();
            segments.push(Segment::Hole(parse_hole(&body, source)?));
            i = end + 2;
            last_was_hole = true;
            continue;
        }
        literal.push(chars[i]);
        i += 1;
        last_was_hole = false;
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    if segments.is_empty() {
        segments.push(Segment::Literal(String::new()));
    }
    Ok(segments)
}

fn find_close(chars: &[char], start: usize) -> Option<usize> {
    let mut i = start;
    let mut depth: i32 = 0;
    while i < chars.len() {
        if chars[i] == '{' && chars.get(i + 1) == Some(&'{') {
            depth += 1;
            i += 2;
            continue;
        }
        if chars[i] == '}' && chars.get(i + 1) == Some(&'}') {
            if depth == 0 {
                return Some(i);
            }
            depth -= 1;
            i += 2;
            continue;
        }
        i += 1;
    }
    None
}

fn parse_hole(body: &str, source: &str) -> Result<Hole, PardonError> {
    let mut rest = body.trim_start();
    let mut hints = Hint::empty();
    loop {
        if let Some(tail) = rest.strip_prefix("...") {
            hints |= Hint::REST;
            rest = tail;
            continue;
        }
        match rest.chars().next() {
            Some('@') => hints |= Hint::SECRET,
            Some('?') => hints |= Hint::OPTIONAL,
            Some('!') => hints |= Hint::REQUIRED_ON_MATCH,
            Some('*') => hints |= Hint::NON_EMPTY,
            _ => break,
        }
        rest = &rest[1..];
    }
    rest = rest.trim_start();

    let (name_and_redactor, expression) = match rest.split_once('=') {
        Some((name, expr)) => (name.trim(), Some(expr.trim().to_string())),
        None => (rest.trim(), None),
    };
    let (name_part, redactor) = match name_and_redactor.split_once('|') {
        Some((name, redactor)) => (name.trim(), Some(redactor.trim().to_string())),
        None => (name_and_redactor, None),
    };
    let name = if name_part.is_empty() || name_part == "_" {
        None
    } else {
        if !is_valid_path(name_part) {
            return Err(error::ParseCtx {
                loc: source.to_string(),
                message: format!("invalid hole name `{name_part}`"),
            }
            .build());
        }
        Some(name_part.to_string())
    };
    Ok(Hole {
        name,
        hints,
        expression,
        redactor,
    })
}

fn is_valid_path(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .enumerate()
                    .all(|(i, c)| if i == 0 { c.is_alphabetic() || c == '_' } else { c.is_alphanumeric() || c == '_' })
        })
}
