//! Aliases and small enumerations used across the service types. OPC UA
//! enumerations encode as `Int32` on the wire.

use std::io::{Read, Write};

use crate::{
    date_time::DateTime,
    encoding::{
        read_i32, write_i32, BinaryDecodable, BinaryEncodable, DecodingOptions, EncodingResult,
        Error,
    },
};

/// This primitive data type is a UInt32 that identifies an element of an
/// array.
pub type Index = u32;

/// This primitive data type is a UInt32 that is used as an identifier, such
/// as a handle.
pub type IntegerId = u32;

/// UTC time in the request and response headers.
pub type UtcTime = DateTime;

/// An interval or timeout expressed in milliseconds.
pub type Duration = f64;

/// A monotonically increasing counter value.
pub type Counter = u32;

macro_rules! ua_enum {
    ($(#[$doc:meta])* $name:ident { $($(#[$vdoc:meta])* $variant:ident = $value:expr),*, }) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
        #[repr(i32)]
        pub enum $name {
            $(
                $(#[$vdoc])*
                $variant = $value,
            )*
        }

        impl BinaryEncodable for $name {
            fn byte_len(&self) -> usize {
                4
            }

            fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
                write_i32(stream, *self as i32)
            }
        }

        impl BinaryDecodable for $name {
            fn decode<S: Read + ?Sized>(
                stream: &mut S,
                _: &DecodingOptions,
            ) -> EncodingResult<Self> {
                let value = read_i32(stream)?;
                match value {
                    $( $value => Ok($name::$variant), )*
                    r => Err(Error::decoding(format!(
                        concat!("Invalid ", stringify!($name), " value {}"), r
                    ))),
                }
            }
        }
    };
}

ua_enum! {
    /// The security to apply to messages on a secure channel.
    MessageSecurityMode {
        /// Mode is unknown or not yet set.
        #[default]
        Invalid = 0,
        /// Messages are neither signed nor encrypted.
        None = 1,
        /// Messages are signed but not encrypted.
        Sign = 2,
        /// Messages are signed and encrypted.
        SignAndEncrypt = 3,
    }
}

ua_enum! {
    /// Whether an OpenSecureChannel request creates a token or renews one.
    SecurityTokenRequestType {
        /// Issue a token for a new channel.
        #[default]
        Issue = 0,
        /// Renew the token of an existing channel.
        Renew = 1,
    }
}

ua_enum! {
    /// The kind of OPC UA application.
    ApplicationType {
        /// The application is a server.
        #[default]
        Server = 0,
        /// The application is a client.
        Client = 1,
        /// The application is both.
        ClientAndServer = 2,
        /// The application is a discovery server.
        DiscoveryServer = 3,
    }
}

ua_enum! {
    /// The kind of user identity token an endpoint accepts.
    UserTokenType {
        /// No user information.
        #[default]
        Anonymous = 0,
        /// Username and password.
        UserName = 1,
        /// An X.509 v3 certificate.
        Certificate = 2,
        /// A token issued by an external authorization service.
        IssuedToken = 3,
    }
}

ua_enum! {
    /// Which timestamps to return on read and monitoring operations.
    TimestampsToReturn {
        /// Source timestamp only.
        #[default]
        Source = 0,
        /// Server timestamp only.
        Server = 1,
        /// Both timestamps.
        Both = 2,
        /// No timestamps.
        Neither = 3,
        /// Invalid placeholder.
        Invalid = 4,
    }
}

ua_enum! {
    /// Monitoring mode of a monitored item.
    MonitoringMode {
        /// Sampling and reporting are disabled.
        Disabled = 0,
        /// Sampling without reporting.
        Sampling = 1,
        /// Sampling and reporting.
        #[default]
        Reporting = 2,
    }
}

ua_enum! {
    /// Direction to follow references in a browse.
    BrowseDirection {
        /// Forward references only.
        #[default]
        Forward = 0,
        /// Inverse references only.
        Inverse = 1,
        /// Both directions.
        Both = 2,
        /// No value specified.
        Invalid = 3,
    }
}

ua_enum! {
    /// The class of a node in the address space.
    NodeClass {
        /// No class specified.
        #[default]
        Unspecified = 0,
        /// An object node.
        Object = 1,
        /// A variable node.
        Variable = 2,
        /// A method node.
        Method = 4,
        /// An object type node.
        ObjectType = 8,
        /// A variable type node.
        VariableType = 16,
        /// A reference type node.
        ReferenceType = 32,
        /// A data type node.
        DataType = 64,
        /// A view node.
        View = 128,
    }
}

/// The attributes a node may carry, identified in read and write operations
/// by their numeric id.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum AttributeId {
    /// The node id itself.
    NodeId = 1,
    /// The node class.
    NodeClass = 2,
    /// The browse name.
    BrowseName = 3,
    /// The display name.
    DisplayName = 4,
    /// The description.
    Description = 5,
    /// The write mask.
    WriteMask = 6,
    /// The user write mask.
    UserWriteMask = 7,
    /// The value of a variable.
    Value = 13,
    /// The data type of a variable value.
    DataType = 14,
    /// The value rank of a variable.
    ValueRank = 15,
    /// The array dimensions of a variable.
    ArrayDimensions = 16,
    /// The access level.
    AccessLevel = 17,
    /// The user access level.
    UserAccessLevel = 18,
    /// The sampling interval.
    MinimumSamplingInterval = 19,
    /// Whether the variable is historizing.
    Historizing = 20,
    /// Whether a method is executable.
    Executable = 21,
    /// Whether a method is executable by the current user.
    UserExecutable = 22,
}

impl TryFrom<u32> for AttributeId {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => AttributeId::NodeId,
            2 => AttributeId::NodeClass,
            3 => AttributeId::BrowseName,
            4 => AttributeId::DisplayName,
            5 => AttributeId::Description,
            6 => AttributeId::WriteMask,
            7 => AttributeId::UserWriteMask,
            13 => AttributeId::Value,
            14 => AttributeId::DataType,
            15 => AttributeId::ValueRank,
            16 => AttributeId::ArrayDimensions,
            17 => AttributeId::AccessLevel,
            18 => AttributeId::UserAccessLevel,
            19 => AttributeId::MinimumSamplingInterval,
            20 => AttributeId::Historizing,
            21 => AttributeId::Executable,
            22 => AttributeId::UserExecutable,
            r => {
                return Err(Error::new(
                    crate::StatusCode::BadAttributeIdInvalid,
                    format!("Invalid attribute id {}", r),
                ))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{MessageSecurityMode, SecurityTokenRequestType};
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use std::io::Cursor;

    #[test]
    fn enum_round_trip() {
        let bytes = MessageSecurityMode::SignAndEncrypt.encode_to_vec();
        assert_eq!(bytes, vec![3, 0, 0, 0]);
        assert_eq!(
            MessageSecurityMode::decode(&mut Cursor::new(bytes), &DecodingOptions::test())
                .unwrap(),
            MessageSecurityMode::SignAndEncrypt
        );
    }

    #[test]
    fn enum_invalid_value_rejected() {
        let mut stream = Cursor::new(vec![9, 0, 0, 0]);
        assert!(
            SecurityTokenRequestType::decode(&mut stream, &DecodingOptions::test()).is_err()
        );
    }
}
