use std::fmt;
use std::net::SocketAddr;

use derive_more::From;

use crate::error::{OscError, Result};
use crate::osc::codec;
use crate::osc::timetag::TimeTag;

/// Opaque byte payload. On the wire it differs from a string only by its tag.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, From)]
pub struct Blob(Vec<u8>);

impl Blob {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Blob(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for Blob {
    fn from(bytes: &[u8]) -> Self {
        Blob(bytes.to_vec())
    }
}

/// Type tags a binding can declare in its typespec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int,
    Float,
    String,
    Blob,
}

impl TypeTag {
    pub fn from_char(c: char) -> Option<TypeTag> {
        match c {
            'i' => Some(TypeTag::Int),
            'f' => Some(TypeTag::Float),
            's' => Some(TypeTag::String),
            'b' => Some(TypeTag::Blob),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            TypeTag::Int => 'i',
            TypeTag::Float => 'f',
            TypeTag::String => 's',
            TypeTag::Blob => 'b',
        }
    }

    /// Parses a whole typespec such as `"fi"`.
    pub fn parse_typespec(typespec: &str) -> Result<Vec<TypeTag>> {
        typespec
            .chars()
            .map(|c| TypeTag::from_char(c).ok_or_else(|| OscError::InvalidTypespec(typespec.to_string())))
            .collect()
    }
}

/// A single message argument.
#[derive(Clone, Debug, PartialEq, From)]
pub enum Arg {
    Int(i32),
    Float(f32),
    String(String),
    Blob(Blob),
    TimeTag(TimeTag),
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::String(s.to_string())
    }
}

impl Arg {
    /// The OSC type tag character for this argument's runtime kind.
    pub fn type_tag(&self) -> char {
        match self {
            Arg::Int(_) => 'i',
            Arg::Float(_) => 'f',
            Arg::String(_) => 's',
            Arg::Blob(_) => 'b',
            Arg::TimeTag(_) => 't',
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Arg::Int(_) => "int32",
            Arg::Float(_) => "float32",
            Arg::String(_) => "string",
            Arg::Blob(_) => "blob",
            Arg::TimeTag(_) => "timetag",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Arg::Int(_) | Arg::Float(_))
    }

    pub fn is_string_like(&self) -> bool {
        matches!(self, Arg::String(_) | Arg::Blob(_))
    }

    /// Whether this argument can be coerced to `tag`: numbers to `i`/`f`,
    /// strings and blobs to `s`/`b`.
    pub fn accepts(&self, tag: TypeTag) -> bool {
        match tag {
            TypeTag::Int | TypeTag::Float => self.is_numeric(),
            TypeTag::String | TypeTag::Blob => self.is_string_like(),
        }
    }

    /// Converts this argument to the canonical type of `tag`. Floats are
    /// truncated towards zero for `i`, blobs are read as (lossy) UTF-8 for `s`.
    pub fn coerce(&self, tag: TypeTag) -> Result<Arg> {
        let coerced = match (tag, self) {
            (TypeTag::Int, Arg::Int(i)) => Arg::Int(*i),
            (TypeTag::Int, Arg::Float(f)) => Arg::Int(*f as i32),
            (TypeTag::Float, Arg::Int(i)) => Arg::Float(*i as f32),
            (TypeTag::Float, Arg::Float(f)) => Arg::Float(*f),
            (TypeTag::String, Arg::String(s)) => Arg::String(s.clone()),
            (TypeTag::String, Arg::Blob(b)) => {
                Arg::String(String::from_utf8_lossy(b.as_bytes()).into_owned())
            }
            (TypeTag::Blob, Arg::Blob(b)) => Arg::Blob(b.clone()),
            (TypeTag::Blob, Arg::String(s)) => Arg::Blob(Blob::new(s.as_bytes())),
            _ => {
                return Err(OscError::TypeCoercionMismatch {
                    tag: tag.as_char(),
                    found: self.kind_name(),
                });
            }
        };
        Ok(coerced)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Arg::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Arg::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Arg::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_timetag(&self) -> Option<TimeTag> {
        match self {
            Arg::TimeTag(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(i) => write!(f, "{i}"),
            Arg::Float(x) => write!(f, "{x}"),
            Arg::String(s) => write!(f, "{s}"),
            Arg::Blob(b) => write!(f, "{}", String::from_utf8_lossy(b.as_bytes())),
            Arg::TimeTag(t) => write!(f, "{t}"),
        }
    }
}

/// An addressed OSC message.
///
/// `source` is filled in by the receiving side only and is never encoded.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    address: String,
    args: Vec<Arg>,
    source: Option<SocketAddr>,
}

impl Message {
    pub fn new(address: impl Into<String>) -> Self {
        Message {
            address: address.into(),
            args: Vec::new(),
            source: None,
        }
    }

    /// Builds a message from an explicit type-tag string, coercing each
    /// argument to its declared tag.
    ///
    /// `Message::with_types("/foo", "fi", vec![Arg::Int(1), Arg::Float(2.5)])`
    /// yields `[Float(1.0), Int(2)]`.
    pub fn with_types(address: impl Into<String>, types: &str, args: Vec<Arg>) -> Result<Self> {
        let tags = TypeTag::parse_typespec(types)?;
        if tags.len() != args.len() {
            return Err(OscError::InvalidTypespec(format!(
                "{types} declares {} argument(s) but {} were given",
                tags.len(),
                args.len()
            )));
        }
        let args = args
            .iter()
            .zip(tags)
            .map(|(arg, tag)| arg.coerce(tag))
            .collect::<Result<Vec<_>>>()?;
        Ok(Message {
            address: address.into(),
            args,
            source: None,
        })
    }

    pub fn with_arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn push(&mut self, arg: impl Into<Arg>) {
        self.args.push(arg.into());
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    pub fn args_mut(&mut self) -> &mut Vec<Arg> {
        &mut self.args
    }

    pub fn arg(&self, idx: usize) -> Option<&Arg> {
        self.args.get(idx)
    }

    /// Type-tag string for the current arguments, without the leading comma.
    pub fn types(&self) -> String {
        self.args.iter().map(Arg::type_tag).collect()
    }

    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    pub fn set_source(&mut self, source: Option<SocketAddr>) {
        self.source = source;
    }

    /// Encodes the message as it is; see [`codec::validate`] for the checks
    /// applied before sending.
    pub fn encode(&self) -> Vec<u8> {
        codec::encode_message(self)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.address, self.types())?;
        for arg in &self.args {
            write!(f, ",{arg}")?;
        }
        Ok(())
    }
}

/// A time-tagged container of messages and nested bundles.
#[derive(Clone, Debug, PartialEq)]
pub struct Bundle {
    timetag: TimeTag,
    elements: Vec<Packet>,
    source: Option<SocketAddr>,
}

impl Bundle {
    pub fn new(timetag: TimeTag) -> Self {
        Bundle {
            timetag,
            elements: Vec::new(),
            source: None,
        }
    }

    pub fn immediate() -> Self {
        Bundle::new(TimeTag::IMMEDIATELY)
    }

    pub fn with_element(mut self, element: impl Into<Packet>) -> Self {
        self.elements.push(element.into());
        self
    }

    pub fn push(&mut self, element: impl Into<Packet>) {
        self.elements.push(element.into());
    }

    pub fn timetag(&self) -> TimeTag {
        self.timetag
    }

    pub fn elements(&self) -> &[Packet] {
        &self.elements
    }

    pub fn into_elements(self) -> Vec<Packet> {
        self.elements
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Packet> {
        self.elements.iter()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn source(&self) -> Option<SocketAddr> {
        self.source
    }

    pub fn set_source(&mut self, source: Option<SocketAddr>) {
        self.source = source;
    }

    pub fn encode(&self) -> Vec<u8> {
        codec::encode_bundle(self)
    }
}

impl<'a> IntoIterator for &'a Bundle {
    type Item = &'a Packet;
    type IntoIter = std::slice::Iter<'a, Packet>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

/// Either top-level shape of an OSC packet.
#[derive(Clone, Debug, PartialEq, From)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    pub fn source(&self) -> Option<SocketAddr> {
        match self {
            Packet::Message(m) => m.source(),
            Packet::Bundle(b) => b.source(),
        }
    }

    pub fn set_source(&mut self, source: Option<SocketAddr>) {
        match self {
            Packet::Message(m) => m.set_source(source),
            Packet::Bundle(b) => b.set_source(source),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        codec::encode(self)
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Packet::Message(m) => Some(m),
            Packet::Bundle(_) => None,
        }
    }

    pub fn as_bundle(&self) -> Option<&Bundle> {
        match self {
            Packet::Bundle(b) => Some(b),
            Packet::Message(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_types_follow_args() {
        let mut msg = Message::new("/foo")
            .with_arg(1)
            .with_arg(2.5f32)
            .with_arg("bar")
            .with_arg(Blob::new(vec![1, 2]))
            .with_arg(TimeTag::IMMEDIATELY);
        assert_eq!(msg.types(), "ifsbt");

        msg.args_mut().pop();
        msg.args_mut()[0] = Arg::String("x".into());
        assert_eq!(msg.types(), "sfsb");
    }

    #[test]
    fn test_with_types_coerces() {
        let msg = Message::with_types(
            "/foo",
            "fisb",
            vec![Arg::Int(3), Arg::Float(2.9), Arg::from("s"), Arg::from("blob")],
        )
        .unwrap();
        assert_eq!(msg.types(), "fisb");
        assert_eq!(msg.args()[0], Arg::Float(3.0));
        assert_eq!(msg.args()[1], Arg::Int(2));
        assert_eq!(msg.args()[3], Arg::Blob(Blob::new(b"blob".to_vec())));
    }

    #[test]
    fn test_with_types_arity_mismatch() {
        let err = Message::with_types("/foo", "ff", vec![Arg::Int(1)]).unwrap_err();
        assert!(matches!(err, OscError::InvalidTypespec(_)));
    }

    #[test]
    fn test_with_types_bad_tag_and_bad_coercion() {
        let err = Message::with_types("/foo", "x", vec![Arg::Int(1)]).unwrap_err();
        assert!(matches!(err, OscError::InvalidTypespec(_)));

        let err = Message::with_types("/foo", "i", vec![Arg::from("nope")]).unwrap_err();
        assert!(matches!(
            err,
            OscError::TypeCoercionMismatch {
                tag: 'i',
                found: "string"
            }
        ));
    }

    #[test]
    fn test_float_to_int_truncates() {
        assert_eq!(Arg::Float(-2.7).coerce(TypeTag::Int).unwrap(), Arg::Int(-2));
        assert_eq!(Arg::Float(2.7).coerce(TypeTag::Int).unwrap(), Arg::Int(2));
    }

    #[test]
    fn test_timetag_is_neither_numeric_nor_string() {
        let t = Arg::TimeTag(TimeTag::IMMEDIATELY);
        for tag in [TypeTag::Int, TypeTag::Float, TypeTag::String, TypeTag::Blob] {
            assert!(!t.accepts(tag));
        }
    }

    #[test]
    fn test_display() {
        let msg = Message::new("/foo").with_arg(1).with_arg("two");
        assert_eq!(msg.to_string(), "/foo,is,1,two");
        assert_eq!(Message::new("/").to_string(), "/,");
    }
}
