//! The OPC UA `DataValue`: a value with status and timestamps, all optional
//! on the wire behind an encoding mask.

use std::io::{Read, Write};

use crate::{
    date_time::DateTime,
    encoding::{
        read_i16, read_u8, write_i16, write_u8, BinaryDecodable, BinaryEncodable, DecodingOptions,
        EncodingResult,
    },
    status_code::StatusCode,
    variant::Variant,
};

mod mask {
    pub const HAS_VALUE: u8 = 0x01;
    pub const HAS_STATUS: u8 = 0x02;
    pub const HAS_SOURCE_TIMESTAMP: u8 = 0x04;
    pub const HAS_SERVER_TIMESTAMP: u8 = 0x08;
    pub const HAS_SOURCE_PICOSECONDS: u8 = 0x10;
    pub const HAS_SERVER_PICOSECONDS: u8 = 0x20;
}

/// A value with quality and provenance. A missing status means `Good`, a
/// missing value means null.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct DataValue {
    /// The value itself.
    pub value: Option<Variant>,
    /// Quality of the value.
    pub status: Option<StatusCode>,
    /// Timestamp assigned by the data source.
    pub source_timestamp: Option<DateTime>,
    /// Sub-10-microsecond interval for the source timestamp, in 10 picosecond
    /// units.
    pub source_picoseconds: Option<i16>,
    /// Timestamp assigned by the server.
    pub server_timestamp: Option<DateTime>,
    /// Sub-10-microsecond interval for the server timestamp.
    pub server_picoseconds: Option<i16>,
}

impl BinaryEncodable for DataValue {
    fn byte_len(&self) -> usize {
        let mut size = 1;
        if let Some(ref value) = self.value {
            size += value.byte_len();
        }
        if self.status.is_some() {
            size += 4;
        }
        if self.source_timestamp.is_some() {
            size += 8;
            if self.source_picoseconds.is_some() {
                size += 2;
            }
        }
        if self.server_timestamp.is_some() {
            size += 8;
            if self.server_picoseconds.is_some() {
                size += 2;
            }
        }
        size
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u8(stream, self.encoding_mask())?;
        if let Some(ref value) = self.value {
            value.encode(stream)?;
        }
        if let Some(status) = self.status {
            status.encode(stream)?;
        }
        // Picoseconds are only written when their timestamp is present
        if let Some(source_timestamp) = self.source_timestamp {
            source_timestamp.encode(stream)?;
            if let Some(source_picoseconds) = self.source_picoseconds {
                write_i16(stream, source_picoseconds)?;
            }
        }
        if let Some(server_timestamp) = self.server_timestamp {
            server_timestamp.encode(stream)?;
            if let Some(server_picoseconds) = self.server_picoseconds {
                write_i16(stream, server_picoseconds)?;
            }
        }
        Ok(())
    }
}

impl BinaryDecodable for DataValue {
    fn decode<S: Read + ?Sized>(
        stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        let encoding_mask = read_u8(stream)?;
        let mut value = DataValue::default();
        if encoding_mask & mask::HAS_VALUE != 0 {
            value.value = Some(Variant::decode(stream, decoding_options)?);
        }
        if encoding_mask & mask::HAS_STATUS != 0 {
            value.status = Some(StatusCode::decode(stream, decoding_options)?);
        }
        if encoding_mask & mask::HAS_SOURCE_TIMESTAMP != 0 {
            value.source_timestamp = Some(DateTime::decode(stream, decoding_options)?);
            if encoding_mask & mask::HAS_SOURCE_PICOSECONDS != 0 {
                value.source_picoseconds = Some(read_i16(stream)?);
            }
        }
        if encoding_mask & mask::HAS_SERVER_TIMESTAMP != 0 {
            value.server_timestamp = Some(DateTime::decode(stream, decoding_options)?);
            if encoding_mask & mask::HAS_SERVER_PICOSECONDS != 0 {
                value.server_picoseconds = Some(read_i16(stream)?);
            }
        }
        Ok(value)
    }
}

impl From<Variant> for DataValue {
    fn from(value: Variant) -> Self {
        DataValue {
            value: Some(value),
            ..Default::default()
        }
    }
}

impl DataValue {
    /// A value captured now with a good status and both timestamps.
    pub fn new_now(value: impl Into<Variant>) -> DataValue {
        let now = DateTime::now();
        DataValue {
            value: Some(value.into()),
            status: Some(StatusCode::Good),
            source_timestamp: Some(now),
            server_timestamp: Some(now),
            ..Default::default()
        }
    }

    /// The effective status: a missing status field means `Good`.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::Good)
    }

    /// `true` when the effective status severity is good.
    pub fn is_valid(&self) -> bool {
        self.status().is_good()
    }

    fn encoding_mask(&self) -> u8 {
        let mut encoding_mask = 0;
        if self.value.is_some() {
            encoding_mask |= mask::HAS_VALUE;
        }
        if self.status.is_some() {
            encoding_mask |= mask::HAS_STATUS;
        }
        if self.source_timestamp.is_some() {
            encoding_mask |= mask::HAS_SOURCE_TIMESTAMP;
            if self.source_picoseconds.is_some() {
                encoding_mask |= mask::HAS_SOURCE_PICOSECONDS;
            }
        }
        if self.server_timestamp.is_some() {
            encoding_mask |= mask::HAS_SERVER_TIMESTAMP;
            if self.server_picoseconds.is_some() {
                encoding_mask |= mask::HAS_SERVER_PICOSECONDS;
            }
        }
        encoding_mask
    }
}

#[cfg(test)]
mod tests {
    use super::DataValue;
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use crate::{StatusCode, Variant};
    use std::io::Cursor;

    #[test]
    fn empty_is_single_byte() {
        assert_eq!(DataValue::default().encode_to_vec(), vec![0]);
    }

    #[test]
    fn round_trip() {
        let value = DataValue::new_now(Variant::Int32(42));
        let bytes = value.encode_to_vec();
        assert_eq!(bytes.len(), value.byte_len());
        let decoded =
            DataValue::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn missing_status_is_good() {
        let value = DataValue::from(Variant::Boolean(true));
        assert_eq!(value.status(), StatusCode::Good);
        assert!(value.is_valid());
    }
}
