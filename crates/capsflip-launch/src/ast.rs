use std::collections::HashMap;
use std::fmt;

use capsflip_types::{CapsflipError, FormatDescriptor, Fraction, Result};
use serde::{Deserialize, Serialize};

/// A parsed launch description: elements linked in order, source first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub elements: Vec<ElementDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementDecl {
    pub factory: String,
    /// Either the explicit `name=` property or `<factory><n>`.
    pub name: String,
    pub properties: HashMap<String, PropertyValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Fraction(Fraction),
    Caps(Caps),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caps {
    pub media_type: String,
    /// Memory features such as `memory:NVMM`.
    pub features: Option<String>,
    pub fields: Vec<(String, CapsValue)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CapsValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Fraction(Fraction),
}

impl Topology {
    pub fn element(&self, name: &str) -> Option<&ElementDecl> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// The caps configured on the named element (a `caps` property).
    pub fn caps_of(&self, name: &str) -> Option<&Caps> {
        self.element(name).and_then(|e| match e.properties.get("caps") {
            Some(PropertyValue::Caps(caps)) => Some(caps),
            _ => None,
        })
    }

    pub fn source(&self) -> Option<&ElementDecl> {
        self.elements.first()
    }

    pub fn sink(&self) -> Option<&ElementDecl> {
        self.elements.last()
    }
}

impl ElementDecl {
    pub fn int_property(&self, key: &str) -> Option<i64> {
        match self.properties.get(key) {
            Some(PropertyValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn bool_property(&self, key: &str) -> Option<bool> {
        match self.properties.get(key) {
            Some(PropertyValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }
}

impl Caps {
    pub fn get(&self, field: &str) -> Option<&CapsValue> {
        self.fields.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    /// Extract a [`FormatDescriptor`] from fixed raw-video caps.
    pub fn to_format(&self) -> Result<FormatDescriptor> {
        let missing = |field: &str| {
            CapsflipError::InvalidCaps(format!("'{}' has no fixed '{}' field", self, field))
        };
        let format = match self.get("format") {
            Some(CapsValue::String(s)) => s.clone(),
            _ => return Err(missing("format")),
        };
        let dimension = |field: &str| -> Result<i32> {
            match self.get(field) {
                Some(CapsValue::Integer(i)) => i32::try_from(*i)
                    .map_err(|_| CapsflipError::InvalidCaps(format!("{field}={i} out of range"))),
                _ => Err(missing(field)),
            }
        };
        let width = dimension("width")?;
        let height = dimension("height")?;
        let framerate = match self.get("framerate") {
            Some(CapsValue::Fraction(f)) => *f,
            _ => return Err(missing("framerate")),
        };
        Ok(FormatDescriptor::new(
            self.media_type.clone(),
            format,
            width,
            height,
            framerate,
        ))
    }
}

impl From<&FormatDescriptor> for Caps {
    fn from(desc: &FormatDescriptor) -> Self {
        Caps {
            media_type: desc.media_type.clone(),
            features: None,
            fields: vec![
                ("format".into(), CapsValue::String(desc.format.clone())),
                ("width".into(), CapsValue::Integer(desc.width as i64)),
                ("height".into(), CapsValue::Integer(desc.height as i64)),
                ("framerate".into(), CapsValue::Fraction(desc.framerate)),
            ],
        }
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_type)?;
        if let Some(ref features) = self.features {
            write!(f, "({features})")?;
        }
        for (key, value) in &self.fields {
            write!(f, ",{key}={value}")?;
        }
        Ok(())
    }
}

impl fmt::Display for CapsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapsValue::String(s) if s.contains(|c: char| c.is_whitespace() || c == ',') => {
                write!(f, "\"{s}\"")
            }
            CapsValue::String(s) => f.write_str(s),
            CapsValue::Integer(i) => write!(f, "{i}"),
            CapsValue::Boolean(b) => write!(f, "{b}"),
            CapsValue::Fraction(fr) => write!(f, "{fr}"),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => f.write_str(s),
            PropertyValue::Integer(i) => write!(f, "{i}"),
            PropertyValue::Boolean(b) => write!(f, "{b}"),
            PropertyValue::Fraction(fr) => write!(f, "{fr}"),
            PropertyValue::Caps(caps) => write!(f, "{caps}"),
        }
    }
}
