use std::collections::{HashMap, HashSet};

use winnow::ascii::{multispace0, multispace1};
use winnow::combinator::{alt, cut_err, delimited, eof, opt, preceded, repeat};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::{take_till, take_while};
use winnow::{ModalResult, Parser};

use capsflip_types::{CapsflipError, Fraction, Result};

use crate::ast::*;

fn make_cut_error(desc: &'static str) -> ErrMode<ContextError<StrContext>> {
    let mut e = ContextError::new();
    e.push(StrContext::Expected(StrContextValue::Description(desc)));
    ErrMode::Cut(e)
}

/// Whitespace consumer (including newlines).
fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

/// Factory names, property keys and caps field names: [A-Za-z_][A-Za-z0-9_-]*
fn name_token<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
    )
        .take()
        .parse_next(input)
}

/// Parse a double-quoted string with escape support.
fn quoted_string(input: &mut &str) -> ModalResult<String> {
    let _ = '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = winnow::token::any.parse_next(input)?;
        match c {
            '"' => break,
            '\\' => {
                let esc = winnow::token::any.parse_next(input)?;
                match esc {
                    '\\' => s.push('\\'),
                    '"' => s.push('"'),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            other => s.push(other),
        }
    }
    Ok(s)
}

/// An unquoted property value runs until whitespace or the next link.
fn bare_value<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| !c.is_whitespace() && c != '!' && c != '"').parse_next(input)
}

/// An unquoted caps field value additionally stops at the field separator.
fn bare_caps_value<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| {
        !c.is_whitespace() && c != '!' && c != ',' && c != '"'
    })
    .parse_next(input)
}

/// A value as written, before typing.
enum RawValue {
    Quoted(String),
    Bare(String),
}

fn raw_value(input: &mut &str) -> ModalResult<RawValue> {
    alt((
        quoted_string.map(RawValue::Quoted),
        bare_value.map(|s: &str| RawValue::Bare(s.to_string())),
    ))
    .parse_next(input)
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_fraction(s: &str) -> Option<Fraction> {
    if !s.contains('/') {
        return None;
    }
    s.parse().ok()
}

/// Type a caps field value, honouring an explicit `(type)` cast when present.
fn typed_caps_value(cast: Option<&str>, raw: RawValue) -> Option<CapsValue> {
    let (text, quoted) = match raw {
        RawValue::Quoted(s) => (s, true),
        RawValue::Bare(s) => (s, false),
    };
    match cast {
        Some("int" | "i") => text.parse().ok().map(CapsValue::Integer),
        Some("fraction") => text.parse().ok().map(CapsValue::Fraction),
        Some("string" | "s") => Some(CapsValue::String(text)),
        Some("boolean" | "bool" | "b") => parse_bool(&text).map(CapsValue::Boolean),
        Some(_) => None,
        None if quoted => Some(CapsValue::String(text)),
        None => Some(if let Some(b) = parse_bool(&text) {
            CapsValue::Boolean(b)
        } else if let Ok(i) = text.parse::<i64>() {
            CapsValue::Integer(i)
        } else if let Some(f) = parse_fraction(&text) {
            CapsValue::Fraction(f)
        } else {
            CapsValue::String(text)
        }),
    }
}

/// Parse one caps field: name '=' ('(' type ')')? value
fn caps_field(input: &mut &str) -> ModalResult<(String, CapsValue)> {
    let key = name_token.parse_next(input)?;
    let _ = (multispace0, '=', multispace0).parse_next(input)?;
    let cast = opt(delimited('(', name_token, ')')).parse_next(input)?;
    let raw = alt((
        quoted_string.map(RawValue::Quoted),
        bare_caps_value.map(|s: &str| RawValue::Bare(s.to_string())),
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "caps field value",
    )))
    .parse_next(input)?;
    let value = typed_caps_value(cast, raw)
        .ok_or_else(|| make_cut_error("caps field value matching its type"))?;
    Ok((key.to_string(), value))
}

/// Parse caps: media/type ('(' features ')')? (',' field)*
fn caps_body(input: &mut &str) -> ModalResult<Caps> {
    let media_type = (name_token, '/', name_token).take().parse_next(input)?;
    let features = opt(delimited('(', take_till(1.., ')'), ')')).parse_next(input)?;
    let fields: Vec<(String, CapsValue)> = repeat(
        0..,
        preceded(
            (multispace0, ',', multispace0),
            cut_err(caps_field.context(StrContext::Expected(
                StrContextValue::Description("caps field"),
            ))),
        ),
    )
    .parse_next(input)?;
    Ok(Caps {
        media_type: media_type.to_string(),
        features: features.map(str::to_string),
        fields,
    })
}

/// Caps that must span the whole input, as in a `caps=` property value.
fn caps_exact(input: &mut &str) -> ModalResult<Caps> {
    let _ = ws.parse_next(input)?;
    let caps = caps_body.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = eof.parse_next(input)?;
    Ok(caps)
}

/// Parse a single property: key '=' value.
fn property(input: &mut &str) -> ModalResult<(String, PropertyValue)> {
    let key = name_token.parse_next(input)?;
    let _ = '='.parse_next(input)?;
    let raw = cut_err(raw_value.context(StrContext::Expected(
        StrContextValue::Description("property value"),
    )))
    .parse_next(input)?;

    let value = match raw {
        RawValue::Quoted(s) | RawValue::Bare(s) if key == "caps" => {
            let caps = caps_exact
                .parse(s.as_str())
                .map_err(|_| make_cut_error("valid caps"))?;
            PropertyValue::Caps(caps)
        }
        RawValue::Quoted(s) => PropertyValue::String(s),
        RawValue::Bare(s) => {
            if let Some(b) = parse_bool(&s) {
                PropertyValue::Boolean(b)
            } else if let Ok(i) = s.parse::<i64>() {
                PropertyValue::Integer(i)
            } else if let Some(f) = parse_fraction(&s) {
                PropertyValue::Fraction(f)
            } else {
                PropertyValue::String(s)
            }
        }
    };
    Ok((key.to_string(), value))
}

/// One link of the chain before names are assigned.
enum Item {
    Element {
        factory: String,
        properties: HashMap<String, PropertyValue>,
    },
    Caps(Caps),
}

/// Parse an element: factory (whitespace property)*
fn element_item(input: &mut &str) -> ModalResult<Item> {
    let factory = name_token.parse_next(input)?;
    let properties: Vec<(String, PropertyValue)> =
        repeat(0.., preceded(multispace1, property)).parse_next(input)?;
    Ok(Item::Element {
        factory: factory.to_string(),
        properties: properties.into_iter().collect(),
    })
}

fn item(input: &mut &str) -> ModalResult<Item> {
    alt((caps_body.map(Item::Caps), element_item)).parse_next(input)
}

/// Top-level parser: item ( '!' item )*
fn description(input: &mut &str) -> ModalResult<Vec<Item>> {
    let _ = ws.parse_next(input)?;
    let first = item
        .context(StrContext::Expected(StrContextValue::Description(
            "element or caps",
        )))
        .parse_next(input)?;
    let mut items = vec![first];
    loop {
        let _ = ws.parse_next(input)?;
        if input.is_empty() {
            break;
        }
        let _ = cut_err('!'.context(StrContext::Expected(StrContextValue::CharLiteral('!'))))
            .parse_next(input)?;
        let _ = ws.parse_next(input)?;
        let next = cut_err(item.context(StrContext::Expected(
            StrContextValue::Description("element or caps after '!'"),
        )))
        .parse_next(input)?;
        items.push(next);
    }
    Ok(items)
}

/// Assign element names and reject duplicates.
fn build_topology(items: Vec<Item>) -> Result<Topology> {
    let mut counters: HashMap<String, usize> = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut elements = Vec::with_capacity(items.len());

    for item in items {
        let (factory, mut properties) = match item {
            Item::Element {
                factory,
                properties,
            } => (factory, properties),
            Item::Caps(caps) => (
                "capsfilter".to_string(),
                HashMap::from([("caps".to_string(), PropertyValue::Caps(caps))]),
            ),
        };
        let name = match properties.remove("name") {
            Some(PropertyValue::String(n)) => n,
            Some(other) => other.to_string(),
            None => {
                let n = counters.entry(factory.clone()).or_insert(0);
                let name = format!("{factory}{n}");
                *n += 1;
                name
            }
        };
        if !seen.insert(name.clone()) {
            return Err(CapsflipError::DuplicateName { name });
        }
        elements.push(ElementDecl {
            factory,
            name,
            properties,
        });
    }

    Ok(Topology { elements })
}

/// Compute (line, col) of the error position from the unconsumed remainder.
fn offset_to_line_col(original: &str, remaining_len: usize) -> (usize, usize) {
    let consumed = original.len() - remaining_len;
    let prefix = &original[..consumed];
    let line = prefix.matches('\n').count() + 1;
    let col = match prefix.rfind('\n') {
        Some(pos) => consumed - pos,
        None => consumed + 1,
    };
    (line, col)
}

/// Public entry point.
pub fn parse(input: &str) -> Result<Topology> {
    let mut remaining = input;

    let items = description.parse_next(&mut remaining).map_err(|e| {
        let (line, col) = offset_to_line_col(input, remaining.len());
        let message = format!("{}", e);

        let snippet = remaining.chars().take(40).collect::<String>();
        let source_snippet = if snippet.is_empty() {
            None
        } else {
            Some(snippet)
        };

        CapsflipError::ParseError {
            line,
            col,
            message,
            source_snippet,
        }
    })?;

    let topology = build_topology(items)?;
    tracing::debug!(elements = topology.elements.len(), "parsed launch description");
    Ok(topology)
}

/// Parse a standalone caps string such as `video/x-raw,format=RGBA,framerate=30/1`.
pub fn parse_caps(input: &str) -> Result<Caps> {
    caps_exact
        .parse(input)
        .map_err(|e| CapsflipError::InvalidCaps(format!("'{input}': {e}")))
}
