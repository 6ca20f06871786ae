//! Caps descriptors rendered in the media runtime's serialized caps syntax.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapsValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Fraction(i32, i32),
}

/// Media type plus ordered fields, e.g.
/// `video/x-raw,format=(string)I420,width=(int)1280,framerate=(fraction)25/1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapsSpec {
    media_type: String,
    fields: Vec<(String, CapsValue)>,
}

impl CapsSpec {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, value: CapsValue) -> Self {
        self.fields.push((name.to_string(), value));
        self
    }

    pub fn str_field(self, name: &str, value: &str) -> Self {
        self.field(name, CapsValue::Str(value.to_string()))
    }

    pub fn int_field(self, name: &str, value: i64) -> Self {
        self.field(name, CapsValue::Int(value))
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn get(&self, name: &str) -> Option<&CapsValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }
}

/// Raw frame caps for the synthetic source.
pub fn raw_video(width: u32, height: u32, fps: u32) -> CapsSpec {
    CapsSpec::new("video/x-raw")
        .str_field("format", "I420")
        .int_field("width", i64::from(width))
        .int_field("height", i64::from(height))
        .field("framerate", CapsValue::Fraction(fps as i32, 1))
}

impl fmt::Display for CapsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(value) => write!(f, "(string){}", value),
            Self::Int(value) => write!(f, "(int){}", value),
            Self::Bool(value) => write!(f, "(boolean){}", value),
            Self::Fraction(num, den) => write!(f, "(fraction){}/{}", num, den),
        }
    }
}

impl fmt::Display for CapsSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.media_type)?;
        for (name, value) in &self.fields {
            write!(f, ",{}={}", name, value)?;
        }
        Ok(())
    }
}
