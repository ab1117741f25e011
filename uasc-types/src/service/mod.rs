//! The service payload structures this stack encodes and routes. Business
//! logic for these services lives behind capability traits in the server
//! crate; here they are plain data with a binary codec.

mod attribute;
mod channel;
mod endpoints;
mod fault;
mod identity;
mod session;
mod subscription;
mod view;

pub use attribute::*;
pub use channel::*;
pub use endpoints::*;
pub use fault::*;
pub use identity::*;
pub use session::*;
pub use subscription::*;
pub use view::*;

use crate::object_id::ObjectId;

/// Implemented by every encodable message type to expose the node id of its
/// default binary encoding.
pub trait MessageInfo {
    /// The object id of the `*_Encoding_DefaultBinary` node for this type.
    fn type_id(&self) -> ObjectId;
}

/// Implements the binary codec for a struct by encoding each listed field in
/// order. This is the declarative stand-in for schema generated code.
macro_rules! ua_binary_codec {
    ($name:ident, $($field:ident),* $(,)?) => {
        impl crate::encoding::BinaryEncodable for $name {
            fn byte_len(&self) -> usize {
                let mut size = 0usize;
                $( size += crate::encoding::BinaryEncodable::byte_len(&self.$field); )*
                size
            }

            fn encode<S: std::io::Write + ?Sized>(
                &self,
                stream: &mut S,
            ) -> crate::encoding::EncodingResult<()> {
                $( crate::encoding::BinaryEncodable::encode(&self.$field, stream)?; )*
                Ok(())
            }
        }

        impl crate::encoding::BinaryDecodable for $name {
            fn decode<S: std::io::Read + ?Sized>(
                stream: &mut S,
                decoding_options: &crate::encoding::DecodingOptions,
            ) -> crate::encoding::EncodingResult<Self> {
                Ok(Self {
                    $(
                        $field: crate::encoding::BinaryDecodable::decode(
                            stream,
                            decoding_options,
                        )?,
                    )*
                })
            }
        }
    };
}

/// Implements [`MessageInfo`] for a type given the object id of its default
/// binary encoding node.
macro_rules! ua_message_info {
    ($name:ident, $object_id:ident) => {
        impl crate::service::MessageInfo for $name {
            fn type_id(&self) -> crate::object_id::ObjectId {
                crate::object_id::ObjectId::$object_id
            }
        }
    };
}

pub(crate) use ua_binary_codec;
pub(crate) use ua_message_info;
