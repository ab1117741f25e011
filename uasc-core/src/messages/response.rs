use std::io::{Read, Write};

use crate::comms::message_chunk::MessageChunkType;

use super::{Message, MessageType};
use uasc_types::*;

macro_rules! response_enum {
    ($($name:ident: $value:ident; $enc:ident),*,) => {
        /// Enum of all possible _response_ service messages.
        #[derive(Debug, PartialEq, Clone)]
        pub enum ResponseMessage {
            $(
                #[doc = stringify!($name)]
                $name(Box<$value>),
            )*
        }
        $(
            impl From<$value> for ResponseMessage {
                fn from(value: $value) -> Self {
                    Self::$name(Box::new(value))
                }
            }
        )*
        impl BinaryEncodable for ResponseMessage {
            fn byte_len(&self) -> usize {
                match self {
                    $( Self::$name(value) => value.byte_len(), )*
                }
            }

            fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
                match self {
                    $( Self::$name(value) => value.encode(stream), )*
                }
            }
        }

        impl ResponseMessage {
            /// Get the response header.
            pub fn response_header(&self) -> &ResponseHeader {
                match self {
                    $( Self::$name(value) => &value.response_header, )*
                }
            }
        }

        impl Message for ResponseMessage {
            fn request_handle(&self) -> u32 {
                self.response_header().request_handle
            }

            fn decode_by_object_id<S: Read>(
                stream: &mut S,
                object_id: ObjectId,
                decoding_options: &DecodingOptions,
            ) -> EncodingResult<Self> {
                match object_id {
                    $( ObjectId::$enc => {
                        Ok($value::decode(stream, decoding_options)?.into())
                    }, )*
                    _ => {
                        Err(Error::decoding(format!(
                            "decoding unsupported for object id {:?}",
                            object_id
                        )))
                    }
                }
            }

            fn type_id(&self) -> ObjectId {
                match self {
                    $( Self::$name(v) => v.type_id(), )*
                }
            }
        }
    };
}

impl MessageType for ResponseMessage {
    fn message_type(&self) -> MessageChunkType {
        match self {
            Self::OpenSecureChannel(_) => MessageChunkType::OpenSecureChannel,
            Self::CloseSecureChannel(_) => MessageChunkType::CloseSecureChannel,
            _ => MessageChunkType::Message,
        }
    }
}

impl ResponseMessage {
    /// The service result carried in the response header.
    pub fn service_result(&self) -> StatusCode {
        self.response_header().service_result
    }

    /// `true` if this is a service fault.
    pub fn is_service_fault(&self) -> bool {
        matches!(self, Self::ServiceFault(_))
    }

    /// Build a service fault response for `request_handle`.
    pub fn service_fault(request_handle: u32, service_result: StatusCode) -> ResponseMessage {
        ServiceFault::new(request_handle, service_result).into()
    }
}

response_enum! {
    ServiceFault: ServiceFault; ServiceFault_Encoding_DefaultBinary,
    OpenSecureChannel: OpenSecureChannelResponse; OpenSecureChannelResponse_Encoding_DefaultBinary,
    CloseSecureChannel: CloseSecureChannelResponse; CloseSecureChannelResponse_Encoding_DefaultBinary,
    GetEndpoints: GetEndpointsResponse; GetEndpointsResponse_Encoding_DefaultBinary,
    CreateSession: CreateSessionResponse; CreateSessionResponse_Encoding_DefaultBinary,
    ActivateSession: ActivateSessionResponse; ActivateSessionResponse_Encoding_DefaultBinary,
    CloseSession: CloseSessionResponse; CloseSessionResponse_Encoding_DefaultBinary,
    Browse: BrowseResponse; BrowseResponse_Encoding_DefaultBinary,
    Read: ReadResponse; ReadResponse_Encoding_DefaultBinary,
    Write: WriteResponse; WriteResponse_Encoding_DefaultBinary,
    CreateSubscription: CreateSubscriptionResponse; CreateSubscriptionResponse_Encoding_DefaultBinary,
    CreateMonitoredItems: CreateMonitoredItemsResponse; CreateMonitoredItemsResponse_Encoding_DefaultBinary,
    Publish: PublishResponse; PublishResponse_Encoding_DefaultBinary,
}

#[cfg(test)]
mod tests {
    use super::ResponseMessage;
    use uasc_types::StatusCode;

    #[test]
    fn service_fault_carries_handle_and_status() {
        let fault = ResponseMessage::service_fault(42, StatusCode::BadSessionIdInvalid);
        assert!(fault.is_service_fault());
        assert_eq!(fault.response_header().request_handle, 42);
        assert_eq!(fault.service_result(), StatusCode::BadSessionIdInvalid);
    }
}
