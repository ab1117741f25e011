//! Parsing of the user identity token carried in an ActivateSession request.

use uasc_types::{
    AnonymousIdentityToken, DecodingOptions, ExtensionObject, ObjectId, UserNameIdentityToken,
    X509IdentityToken,
};

/// Policy id of the anonymous token policy.
pub const POLICY_ID_ANONYMOUS: &str = "anonymous";
/// Policy id of the plain username token policy.
pub const POLICY_ID_USER_PASS_NONE: &str = "username";
/// Policy id of the X509 token policy.
pub const POLICY_ID_X509: &str = "x509";

/// The decoded user identity of an ActivateSession request.
#[derive(Debug)]
pub enum IdentityToken {
    /// An empty extension object counts as anonymous with no policy.
    None,
    /// An anonymous identity token.
    Anonymous(AnonymousIdentityToken),
    /// A username and password.
    UserName(UserNameIdentityToken),
    /// An X.509 certificate.
    X509(Box<X509IdentityToken>),
    /// A token kind this server does not understand.
    Invalid,
}

impl IdentityToken {
    /// Decode the identity token from the extension object in the request.
    pub fn new(object: &ExtensionObject, decoding_options: &DecodingOptions) -> IdentityToken {
        if object.is_empty() {
            // An omitted token in a request counts as anonymous
            return IdentityToken::None;
        }
        let Some(object_id) = object.object_id() else {
            return IdentityToken::Invalid;
        };
        match object_id {
            ObjectId::AnonymousIdentityToken_Encoding_DefaultBinary => object
                .decode_inner::<AnonymousIdentityToken>(decoding_options)
                .map(IdentityToken::Anonymous)
                .unwrap_or(IdentityToken::Invalid),
            ObjectId::UserNameIdentityToken_Encoding_DefaultBinary => object
                .decode_inner::<UserNameIdentityToken>(decoding_options)
                .map(IdentityToken::UserName)
                .unwrap_or(IdentityToken::Invalid),
            ObjectId::X509IdentityToken_Encoding_DefaultBinary => object
                .decode_inner::<X509IdentityToken>(decoding_options)
                .map(|t| IdentityToken::X509(Box::new(t)))
                .unwrap_or(IdentityToken::Invalid),
            _ => IdentityToken::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::IdentityToken;
    use uasc_types::{
        AnonymousIdentityToken, DecodingOptions, ExtensionObject, UAString,
    };

    #[test]
    fn decode_anonymous() {
        let token = AnonymousIdentityToken {
            policy_id: UAString::from("anonymous"),
        };
        let object = ExtensionObject::from_message(&token);
        let decoded = IdentityToken::new(&object, &DecodingOptions::test());
        match decoded {
            IdentityToken::Anonymous(t) => assert_eq!(t.policy_id.as_ref(), "anonymous"),
            other => panic!("expected anonymous, got {:?}", other),
        }
    }

    #[test]
    fn empty_is_none() {
        let decoded = IdentityToken::new(&ExtensionObject::null(), &DecodingOptions::test());
        assert!(matches!(decoded, IdentityToken::None));
    }
}
