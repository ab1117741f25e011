//! The OPC UA `Variant`: a discriminated union over every builtin type,
//! scalar or array. The wire encoding is a byte holding the 6-bit type id,
//! bit 7 flagging an array and bit 6 flagging explicit array dimensions.

use std::{
    fmt,
    io::{Read, Write},
};

use crate::{
    byte_string::ByteString,
    data_value::DataValue,
    date_time::DateTime,
    diagnostic_info::DiagnosticInfo,
    encoding::{
        read_i32, read_u8, write_i32, write_u8, BinaryDecodable, BinaryEncodable, DecodingOptions,
        EncodingResult, Error,
    },
    expanded_node_id::ExpandedNodeId,
    extension_object::ExtensionObject,
    guid::Guid,
    localized_text::LocalizedText,
    node_id::NodeId,
    qualified_name::QualifiedName,
    status_code::StatusCode,
    string::UAString,
};

/// The 6-bit type ids of the builtin types a variant can hold.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum VariantScalarTypeId {
    /// Boolean
    Boolean = 1,
    /// Signed byte
    SByte = 2,
    /// Unsigned byte
    Byte = 3,
    /// Signed 16-bit integer
    Int16 = 4,
    /// Unsigned 16-bit integer
    UInt16 = 5,
    /// Signed 32-bit integer
    Int32 = 6,
    /// Unsigned 32-bit integer
    UInt32 = 7,
    /// Signed 64-bit integer
    Int64 = 8,
    /// Unsigned 64-bit integer
    UInt64 = 9,
    /// Single precision float
    Float = 10,
    /// Double precision float
    Double = 11,
    /// String
    String = 12,
    /// Date time
    DateTime = 13,
    /// GUID
    Guid = 14,
    /// Byte string
    ByteString = 15,
    /// XML element, carried as a string
    XmlElement = 16,
    /// Node id
    NodeId = 17,
    /// Expanded node id
    ExpandedNodeId = 18,
    /// Status code
    StatusCode = 19,
    /// Qualified name
    QualifiedName = 20,
    /// Localized text
    LocalizedText = 21,
    /// Extension object
    ExtensionObject = 22,
    /// Data value
    DataValue = 23,
    /// Nested variant (arrays only)
    Variant = 24,
    /// Diagnostic info
    DiagnosticInfo = 25,
}

impl TryFrom<u8> for VariantScalarTypeId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        use VariantScalarTypeId::*;
        Ok(match value {
            1 => Boolean,
            2 => SByte,
            3 => Byte,
            4 => Int16,
            5 => UInt16,
            6 => Int32,
            7 => UInt32,
            8 => Int64,
            9 => UInt64,
            10 => Float,
            11 => Double,
            12 => String,
            13 => DateTime,
            14 => Guid,
            15 => ByteString,
            16 => XmlElement,
            17 => NodeId,
            18 => ExpandedNodeId,
            19 => StatusCode,
            20 => QualifiedName,
            21 => LocalizedText,
            22 => ExtensionObject,
            23 => DataValue,
            24 => Variant,
            25 => DiagnosticInfo,
            r => return Err(Error::decoding(format!("Invalid variant type id {}", r))),
        })
    }
}

const ARRAY_VALUES_BIT: u8 = 0x80;
const ARRAY_DIMENSIONS_BIT: u8 = 0x40;

/// An array of variant values with optional multidimensional shape. All
/// elements must share the array's element type.
#[derive(PartialEq, Debug, Clone)]
pub struct Array {
    /// The type every element holds.
    pub value_type: VariantScalarTypeId,
    /// The flattened values.
    pub values: Vec<Variant>,
    /// Dimensions for multidimensional arrays. Empty means one dimension.
    pub dimensions: Option<Vec<u32>>,
}

impl Array {
    /// Create a single dimension array, verifying element types.
    pub fn new(
        value_type: VariantScalarTypeId,
        values: impl Into<Vec<Variant>>,
    ) -> Result<Array, Error> {
        let values = values.into();
        Self::validate(value_type, &values)?;
        Ok(Array {
            value_type,
            values,
            dimensions: None,
        })
    }

    /// Create a multidimensional array, verifying element types and that the
    /// dimensions multiply out to the element count.
    pub fn new_multi(
        value_type: VariantScalarTypeId,
        values: impl Into<Vec<Variant>>,
        dimensions: Vec<u32>,
    ) -> Result<Array, Error> {
        let values = values.into();
        Self::validate(value_type, &values)?;
        let expected: usize = dimensions.iter().map(|d| *d as usize).product();
        if expected != values.len() {
            return Err(Error::decoding(format!(
                "Array dimensions {:?} do not match element count {}",
                dimensions,
                values.len()
            )));
        }
        Ok(Array {
            value_type,
            values,
            dimensions: Some(dimensions),
        })
    }

    fn validate(value_type: VariantScalarTypeId, values: &[Variant]) -> Result<(), Error> {
        // A variant array holds scalars of any type, each with its own
        // encoding byte; every other array is homogeneous
        let bad = if value_type == VariantScalarTypeId::Variant {
            values.iter().find(|v| v.scalar_type_id().is_none())
        } else {
            values
                .iter()
                .find(|v| v.scalar_type_id() != Some(value_type))
        };
        if let Some(bad) = bad {
            return Err(Error::decoding(format!(
                "Array element {:?} does not match array type {:?}",
                bad, value_type
            )));
        }
        Ok(())
    }
}

/// A value of any builtin type.
#[derive(PartialEq, Debug, Clone, Default)]
pub enum Variant {
    /// An empty variant, encoded as type id 0.
    #[default]
    Empty,
    /// Boolean
    Boolean(bool),
    /// Signed byte
    SByte(i8),
    /// Unsigned byte
    Byte(u8),
    /// Signed 16-bit integer
    Int16(i16),
    /// Unsigned 16-bit integer
    UInt16(u16),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 32-bit integer
    UInt32(u32),
    /// Signed 64-bit integer
    Int64(i64),
    /// Unsigned 64-bit integer
    UInt64(u64),
    /// Single precision float
    Float(f32),
    /// Double precision float
    Double(f64),
    /// String
    String(UAString),
    /// Date time
    DateTime(Box<DateTime>),
    /// GUID
    Guid(Box<Guid>),
    /// Byte string
    ByteString(ByteString),
    /// XML element, carried as its string form
    XmlElement(UAString),
    /// Node id
    NodeId(Box<NodeId>),
    /// Expanded node id
    ExpandedNodeId(Box<ExpandedNodeId>),
    /// Status code
    StatusCode(StatusCode),
    /// Qualified name
    QualifiedName(Box<QualifiedName>),
    /// Localized text
    LocalizedText(Box<LocalizedText>),
    /// Extension object
    ExtensionObject(Box<ExtensionObject>),
    /// Data value
    DataValue(Box<DataValue>),
    /// Diagnostic info
    DiagnosticInfo(Box<DiagnosticInfo>),
    /// An array of values
    Array(Box<Array>),
}

macro_rules! variant_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Variant {
            fn from(value: $t) -> Self {
                Variant::$variant(value)
            }
        }
    };
    ($t:ty, $variant:ident, boxed) => {
        impl From<$t> for Variant {
            fn from(value: $t) -> Self {
                Variant::$variant(Box::new(value))
            }
        }
    };
}

variant_from!(bool, Boolean);
variant_from!(i8, SByte);
variant_from!(u8, Byte);
variant_from!(i16, Int16);
variant_from!(u16, UInt16);
variant_from!(i32, Int32);
variant_from!(u32, UInt32);
variant_from!(i64, Int64);
variant_from!(u64, UInt64);
variant_from!(f32, Float);
variant_from!(f64, Double);
variant_from!(UAString, String);
variant_from!(ByteString, ByteString);
variant_from!(StatusCode, StatusCode);
variant_from!(DateTime, DateTime, boxed);
variant_from!(Guid, Guid, boxed);
variant_from!(NodeId, NodeId, boxed);
variant_from!(ExpandedNodeId, ExpandedNodeId, boxed);
variant_from!(QualifiedName, QualifiedName, boxed);
variant_from!(LocalizedText, LocalizedText, boxed);
variant_from!(ExtensionObject, ExtensionObject, boxed);

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.into())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value.into())
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => write!(f, "[empty]"),
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::String(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            other => write!(f, "{:?}", other),
        }
    }
}

impl Variant {
    /// Test if this is the empty variant.
    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    /// The type id held by this variant; `None` for empty and arrays.
    pub fn scalar_type_id(&self) -> Option<VariantScalarTypeId> {
        use VariantScalarTypeId as T;
        Some(match self {
            Variant::Empty | Variant::Array(_) => return None,
            Variant::Boolean(_) => T::Boolean,
            Variant::SByte(_) => T::SByte,
            Variant::Byte(_) => T::Byte,
            Variant::Int16(_) => T::Int16,
            Variant::UInt16(_) => T::UInt16,
            Variant::Int32(_) => T::Int32,
            Variant::UInt32(_) => T::UInt32,
            Variant::Int64(_) => T::Int64,
            Variant::UInt64(_) => T::UInt64,
            Variant::Float(_) => T::Float,
            Variant::Double(_) => T::Double,
            Variant::String(_) => T::String,
            Variant::DateTime(_) => T::DateTime,
            Variant::Guid(_) => T::Guid,
            Variant::ByteString(_) => T::ByteString,
            Variant::XmlElement(_) => T::XmlElement,
            Variant::NodeId(_) => T::NodeId,
            Variant::ExpandedNodeId(_) => T::ExpandedNodeId,
            Variant::StatusCode(_) => T::StatusCode,
            Variant::QualifiedName(_) => T::QualifiedName,
            Variant::LocalizedText(_) => T::LocalizedText,
            Variant::ExtensionObject(_) => T::ExtensionObject,
            Variant::DataValue(_) => T::DataValue,
            Variant::DiagnosticInfo(_) => T::DiagnosticInfo,
        })
    }

    fn scalar_byte_len(&self) -> usize {
        match self {
            Variant::Empty => 0,
            Variant::Boolean(_) | Variant::SByte(_) | Variant::Byte(_) => 1,
            Variant::Int16(_) | Variant::UInt16(_) => 2,
            Variant::Int32(_) | Variant::UInt32(_) | Variant::Float(_) => 4,
            Variant::Int64(_) | Variant::UInt64(_) | Variant::Double(_) => 8,
            Variant::String(v) | Variant::XmlElement(v) => v.byte_len(),
            Variant::DateTime(_) => 8,
            Variant::Guid(v) => v.byte_len(),
            Variant::ByteString(v) => v.byte_len(),
            Variant::NodeId(v) => v.byte_len(),
            Variant::ExpandedNodeId(v) => v.byte_len(),
            Variant::StatusCode(v) => v.byte_len(),
            Variant::QualifiedName(v) => v.byte_len(),
            Variant::LocalizedText(v) => v.byte_len(),
            Variant::ExtensionObject(v) => v.byte_len(),
            Variant::DataValue(v) => v.byte_len(),
            Variant::DiagnosticInfo(v) => v.byte_len(),
            Variant::Array(_) => 0,
        }
    }

    fn encode_scalar<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        match self {
            Variant::Empty => Ok(()),
            Variant::Boolean(v) => v.encode(stream),
            Variant::SByte(v) => v.encode(stream),
            Variant::Byte(v) => v.encode(stream),
            Variant::Int16(v) => v.encode(stream),
            Variant::UInt16(v) => v.encode(stream),
            Variant::Int32(v) => v.encode(stream),
            Variant::UInt32(v) => v.encode(stream),
            Variant::Int64(v) => v.encode(stream),
            Variant::UInt64(v) => v.encode(stream),
            Variant::Float(v) => v.encode(stream),
            Variant::Double(v) => v.encode(stream),
            Variant::String(v) | Variant::XmlElement(v) => v.encode(stream),
            Variant::DateTime(v) => v.encode(stream),
            Variant::Guid(v) => v.encode(stream),
            Variant::ByteString(v) => v.encode(stream),
            Variant::NodeId(v) => v.encode(stream),
            Variant::ExpandedNodeId(v) => v.encode(stream),
            Variant::StatusCode(v) => v.encode(stream),
            Variant::QualifiedName(v) => v.encode(stream),
            Variant::LocalizedText(v) => v.encode(stream),
            Variant::ExtensionObject(v) => v.encode(stream),
            Variant::DataValue(v) => v.encode(stream),
            Variant::DiagnosticInfo(v) => v.encode(stream),
            Variant::Array(_) => Err(Error::encoding("Array is not a scalar")),
        }
    }

    fn decode_scalar<S: Read + ?Sized>(
        type_id: VariantScalarTypeId,
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Variant> {
        use VariantScalarTypeId as T;
        Ok(match type_id {
            T::Boolean => Variant::Boolean(bool::decode(stream, decoding_options)?),
            T::SByte => Variant::SByte(i8::decode(stream, decoding_options)?),
            T::Byte => Variant::Byte(u8::decode(stream, decoding_options)?),
            T::Int16 => Variant::Int16(i16::decode(stream, decoding_options)?),
            T::UInt16 => Variant::UInt16(u16::decode(stream, decoding_options)?),
            T::Int32 => Variant::Int32(i32::decode(stream, decoding_options)?),
            T::UInt32 => Variant::UInt32(u32::decode(stream, decoding_options)?),
            T::Int64 => Variant::Int64(i64::decode(stream, decoding_options)?),
            T::UInt64 => Variant::UInt64(u64::decode(stream, decoding_options)?),
            T::Float => Variant::Float(f32::decode(stream, decoding_options)?),
            T::Double => Variant::Double(f64::decode(stream, decoding_options)?),
            T::String => Variant::String(UAString::decode(stream, decoding_options)?),
            T::XmlElement => Variant::XmlElement(UAString::decode(stream, decoding_options)?),
            T::DateTime => {
                Variant::DateTime(Box::new(DateTime::decode(stream, decoding_options)?))
            }
            T::Guid => Variant::Guid(Box::new(Guid::decode(stream, decoding_options)?)),
            T::ByteString => Variant::ByteString(ByteString::decode(stream, decoding_options)?),
            T::NodeId => Variant::NodeId(Box::new(NodeId::decode(stream, decoding_options)?)),
            T::ExpandedNodeId => Variant::ExpandedNodeId(Box::new(ExpandedNodeId::decode(
                stream,
                decoding_options,
            )?)),
            T::StatusCode => Variant::StatusCode(StatusCode::decode(stream, decoding_options)?),
            T::QualifiedName => {
                Variant::QualifiedName(Box::new(QualifiedName::decode(stream, decoding_options)?))
            }
            T::LocalizedText => {
                Variant::LocalizedText(Box::new(LocalizedText::decode(stream, decoding_options)?))
            }
            T::ExtensionObject => Variant::ExtensionObject(Box::new(ExtensionObject::decode(
                stream,
                decoding_options,
            )?)),
            T::DataValue => {
                Variant::DataValue(Box::new(DataValue::decode(stream, decoding_options)?))
            }
            T::DiagnosticInfo => Variant::DiagnosticInfo(Box::new(DiagnosticInfo::decode(
                stream,
                decoding_options,
            )?)),
            T::Variant => {
                // A nested scalar variant as an array element
                Variant::decode(stream, decoding_options)?
            }
        })
    }

    fn encoding_byte(&self) -> u8 {
        match self {
            Variant::Empty => 0,
            Variant::Array(array) => {
                let mut b = array.value_type as u8 | ARRAY_VALUES_BIT;
                if array.dimensions.is_some() {
                    b |= ARRAY_DIMENSIONS_BIT;
                }
                b
            }
            scalar => scalar.scalar_type_id().map(|t| t as u8).unwrap_or(0),
        }
    }
}

impl BinaryEncodable for Variant {
    fn byte_len(&self) -> usize {
        let mut size = 1;
        match self {
            Variant::Array(array) => {
                size += 4;
                // Elements of a variant array carry their own encoding byte,
                // everything else encodes raw
                let nested = array.value_type == VariantScalarTypeId::Variant;
                size += array
                    .values
                    .iter()
                    .map(|v| if nested { v.byte_len() } else { v.scalar_byte_len() })
                    .sum::<usize>();
                if let Some(ref dimensions) = array.dimensions {
                    size += 4 + dimensions.len() * 4;
                }
            }
            scalar => size += scalar.scalar_byte_len(),
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u8(stream, self.encoding_byte())?;
        match self {
            Variant::Array(array) => {
                write_i32(stream, array.values.len() as i32)?;
                let nested = array.value_type == VariantScalarTypeId::Variant;
                for value in &array.values {
                    if nested {
                        value.encode(stream)?;
                    } else {
                        value.encode_scalar(stream)?;
                    }
                }
                if let Some(ref dimensions) = array.dimensions {
                    write_i32(stream, dimensions.len() as i32)?;
                    for d in dimensions {
                        d.encode(stream)?;
                    }
                }
                Ok(())
            }
            scalar => scalar.encode_scalar(stream),
        }
    }
}

impl BinaryDecodable for Variant {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        // Variants nest through arrays, extension objects and data values
        let _depth_lock = decoding_options.depth_lock()?;

        let encoding_byte = read_u8(stream)?;
        if encoding_byte == 0 {
            return Ok(Variant::Empty);
        }
        let type_id = VariantScalarTypeId::try_from(encoding_byte & 0x3f)?;

        if encoding_byte & ARRAY_VALUES_BIT == 0 {
            return Self::decode_scalar(type_id, stream, decoding_options);
        }

        let len = read_i32(stream)?;
        if len == -1 {
            return Ok(Variant::Array(Box::new(Array {
                value_type: type_id,
                values: Vec::new(),
                dimensions: None,
            })));
        }
        if len < -1 {
            return Err(Error::decoding("Variant array length is invalid"));
        }
        if len as usize > decoding_options.max_array_length {
            return Err(Error::decoding(format!(
                "Variant array length {} exceeds decoding limit {}",
                len, decoding_options.max_array_length
            )));
        }
        let mut values = Vec::with_capacity(len as usize);
        for _ in 0..len {
            values.push(Self::decode_scalar(type_id, stream, decoding_options)?);
        }

        let dimensions = if encoding_byte & ARRAY_DIMENSIONS_BIT != 0 {
            let num = read_i32(stream)?;
            if num <= 0 {
                None
            } else if num as usize > decoding_options.max_array_length {
                return Err(Error::decoding("Variant dimension count is invalid"));
            } else {
                let mut dimensions = Vec::with_capacity(num as usize);
                for _ in 0..num {
                    dimensions.push(u32::decode(stream, decoding_options)?);
                }
                let expected: usize = dimensions.iter().map(|d| *d as usize).product();
                if expected != values.len() {
                    return Err(Error::decoding(format!(
                        "Variant dimensions {:?} do not match element count {}",
                        dimensions,
                        values.len()
                    )));
                }
                Some(dimensions)
            }
        } else {
            None
        };

        Ok(Variant::Array(Box::new(Array {
            value_type: type_id,
            values,
            dimensions,
        })))
    }
}

impl From<Array> for Variant {
    fn from(value: Array) -> Self {
        Variant::Array(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::{Array, Variant, VariantScalarTypeId};
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use crate::{LocalizedText, NodeId, UAString};
    use std::io::Cursor;

    fn round_trip(v: &Variant) {
        let bytes = v.encode_to_vec();
        assert_eq!(bytes.len(), v.byte_len(), "byte_len mismatch for {:?}", v);
        let decoded = Variant::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(&decoded, v);
    }

    #[test]
    fn scalar_round_trips() {
        round_trip(&Variant::Empty);
        round_trip(&Variant::Boolean(true));
        round_trip(&Variant::Byte(255));
        round_trip(&Variant::Int32(-5));
        round_trip(&Variant::UInt64(u64::MAX));
        round_trip(&Variant::Double(1.5));
        round_trip(&Variant::from("a string"));
        round_trip(&Variant::from(NodeId::new(1, 1012u32)));
        round_trip(&Variant::from(LocalizedText::new("en", "hi")));
    }

    #[test]
    fn array_round_trip() {
        let array = Array::new(
            VariantScalarTypeId::Int32,
            vec![Variant::Int32(1), Variant::Int32(2), Variant::Int32(3)],
        )
        .unwrap();
        round_trip(&array.into());
    }

    #[test]
    fn multidimensional_array_round_trip() {
        let array = Array::new_multi(
            VariantScalarTypeId::Byte,
            (0u8..6).map(Variant::Byte).collect::<Vec<_>>(),
            vec![2, 3],
        )
        .unwrap();
        round_trip(&array.into());
    }

    #[test]
    fn array_type_mismatch_rejected() {
        assert!(Array::new(
            VariantScalarTypeId::Int32,
            vec![Variant::Int32(1), Variant::Boolean(false)],
        )
        .is_err());
    }

    #[test]
    fn mismatched_dimensions_rejected() {
        assert!(Array::new_multi(
            VariantScalarTypeId::Int32,
            vec![Variant::Int32(1)],
            vec![2, 2],
        )
        .is_err());
    }

    #[test]
    fn string_variant_wire_format() {
        let v = Variant::from(UAString::from("ab"));
        assert_eq!(v.encode_to_vec(), vec![12, 2, 0, 0, 0, b'a', b'b']);
    }
}
