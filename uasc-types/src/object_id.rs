//! Numeric ids of the nodes this stack needs to recognize on the wire, all
//! `*_Encoding_DefaultBinary` objects from namespace 0.

use crate::{
    encoding::Error,
    node_id::{Identifier, NodeId},
};

macro_rules! object_ids {
    ($($name:ident = $value:expr),*,) => {
        /// Well-known object node ids in namespace 0. Only the encoding
        /// nodes of the supported message set are listed.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        #[allow(non_camel_case_types)]
        #[repr(u32)]
        pub enum ObjectId {
            $(
                #[doc = stringify!($name)]
                $name = $value,
            )*
        }

        impl TryFrom<u32> for ObjectId {
            type Error = Error;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok(ObjectId::$name), )*
                    r => Err(Error::decoding(format!("Unknown object id {}", r))),
                }
            }
        }
    };
}

object_ids! {
    AnonymousIdentityToken_Encoding_DefaultBinary = 321,
    UserNameIdentityToken_Encoding_DefaultBinary = 324,
    X509IdentityToken_Encoding_DefaultBinary = 327,
    ServiceFault_Encoding_DefaultBinary = 397,
    GetEndpointsRequest_Encoding_DefaultBinary = 428,
    GetEndpointsResponse_Encoding_DefaultBinary = 431,
    OpenSecureChannelRequest_Encoding_DefaultBinary = 446,
    OpenSecureChannelResponse_Encoding_DefaultBinary = 449,
    CloseSecureChannelRequest_Encoding_DefaultBinary = 452,
    CloseSecureChannelResponse_Encoding_DefaultBinary = 455,
    CreateSessionRequest_Encoding_DefaultBinary = 461,
    CreateSessionResponse_Encoding_DefaultBinary = 464,
    ActivateSessionRequest_Encoding_DefaultBinary = 467,
    ActivateSessionResponse_Encoding_DefaultBinary = 470,
    CloseSessionRequest_Encoding_DefaultBinary = 473,
    CloseSessionResponse_Encoding_DefaultBinary = 476,
    BrowseRequest_Encoding_DefaultBinary = 527,
    BrowseResponse_Encoding_DefaultBinary = 530,
    ReadRequest_Encoding_DefaultBinary = 631,
    ReadResponse_Encoding_DefaultBinary = 634,
    WriteRequest_Encoding_DefaultBinary = 673,
    WriteResponse_Encoding_DefaultBinary = 676,
    CreateMonitoredItemsRequest_Encoding_DefaultBinary = 751,
    CreateMonitoredItemsResponse_Encoding_DefaultBinary = 754,
    CreateSubscriptionRequest_Encoding_DefaultBinary = 787,
    CreateSubscriptionResponse_Encoding_DefaultBinary = 790,
    PublishRequest_Encoding_DefaultBinary = 826,
    PublishResponse_Encoding_DefaultBinary = 829,
    IssuedIdentityToken_Encoding_DefaultBinary = 940,
}

impl From<ObjectId> for NodeId {
    fn from(value: ObjectId) -> Self {
        NodeId::new(0, value as u32)
    }
}

impl TryFrom<&NodeId> for ObjectId {
    type Error = Error;

    fn try_from(value: &NodeId) -> Result<Self, Self::Error> {
        if value.namespace != 0 {
            return Err(Error::decoding(format!(
                "Node id {} is not in namespace 0",
                value
            )));
        }
        match value.identifier {
            Identifier::Numeric(id) => ObjectId::try_from(id),
            _ => Err(Error::decoding(format!(
                "Node id {} is not a numeric id",
                value
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectId;
    use crate::NodeId;

    #[test]
    fn node_id_conversions() {
        let node_id: NodeId = ObjectId::ReadRequest_Encoding_DefaultBinary.into();
        assert_eq!(node_id, NodeId::new(0, 631u32));
        assert_eq!(
            ObjectId::try_from(&node_id).unwrap(),
            ObjectId::ReadRequest_Encoding_DefaultBinary
        );
        assert!(ObjectId::try_from(&NodeId::new(1, 631u32)).is_err());
        assert!(ObjectId::try_from(&NodeId::new(0, 1u32)).is_err());
    }
}
