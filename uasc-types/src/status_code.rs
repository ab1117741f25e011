//! OPC UA status codes. The full standard set is enormous, this module
//! carries the codes the stack itself raises or inspects, plus the severity
//! machinery. Unknown codes survive decode/encode untouched.

use std::fmt;
use std::io::{Read, Write};

use crate::encoding::{
    read_u32, write_u32, BinaryDecodable, BinaryEncodable, DecodingOptions, EncodingResult,
};

/// A 32-bit status code as defined by OPC UA part 4. The top two bits carry
/// the severity: `00` good, `01` uncertain, `10` bad.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct StatusCode(u32);

macro_rules! status_codes {
    ($($name:ident = $value:expr, $doc:expr);*;) => {
        impl StatusCode {
            $(
                #[doc = $doc]
                #[allow(non_upper_case_globals)]
                pub const $name: StatusCode = StatusCode($value);
            )*

            /// Get the symbolic name of the status code, if it is one the
            /// stack knows about.
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $( $value => Some(stringify!($name)), )*
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    Good = 0x0000_0000, "The operation succeeded.";
    BadUnexpectedError = 0x8001_0000, "An unexpected error occurred.";
    BadInternalError = 0x8002_0000, "An internal error occurred as a result of a programming or configuration error.";
    BadOutOfMemory = 0x8003_0000, "Not enough memory to complete the operation.";
    BadResourceUnavailable = 0x8004_0000, "An operating system resource is not available.";
    BadCommunicationError = 0x8005_0000, "A low level communication error occurred.";
    BadEncodingError = 0x8006_0000, "Encoding halted because of invalid data in the objects being serialized.";
    BadDecodingError = 0x8007_0000, "Decoding halted because of invalid data in the stream.";
    BadEncodingLimitsExceeded = 0x8008_0000, "The message encoding/decoding limits imposed by the stack have been exceeded.";
    BadUnknownResponse = 0x8009_0000, "An unrecognized response was received from the server.";
    BadTimeout = 0x800A_0000, "The operation timed out.";
    BadServiceUnsupported = 0x800B_0000, "The server does not support the requested service.";
    BadShutdown = 0x800C_0000, "The operation was cancelled because the application is shutting down.";
    BadServerNotConnected = 0x800D_0000, "The operation could not complete because the client is not connected to the server.";
    BadServerHalted = 0x800E_0000, "The server has stopped and cannot process any requests.";
    BadNothingToDo = 0x800F_0000, "No processing could be done because there was nothing to do.";
    BadTooManyOperations = 0x8010_0000, "The request could not be processed because it specified too many operations.";
    BadCertificateInvalid = 0x8012_0000, "The certificate provided as a parameter is not valid.";
    BadSecurityChecksFailed = 0x8013_0000, "An error occurred verifying security.";
    BadCertificateTimeInvalid = 0x8014_0000, "The certificate has expired or is not yet valid.";
    BadCertificateUriInvalid = 0x8017_0000, "The URI specified in the ApplicationDescription does not match the URI in the certificate.";
    BadCertificateUseNotAllowed = 0x8018_0000, "The certificate may not be used for the requested operation.";
    BadCertificateUntrusted = 0x801A_0000, "The certificate is not trusted.";
    BadCertificateRevoked = 0x801D_0000, "The certificate has been revoked.";
    BadUserAccessDenied = 0x801F_0000, "User does not have permission to perform the requested operation.";
    BadIdentityTokenInvalid = 0x8020_0000, "The user identity token is not valid.";
    BadIdentityTokenRejected = 0x8021_0000, "The user identity token is valid but the server has rejected it.";
    BadSecureChannelIdInvalid = 0x8022_0000, "The specified secure channel is no longer valid.";
    BadInvalidTimestamp = 0x8023_0000, "The timestamp is outside the range allowed by the server.";
    BadNonceInvalid = 0x8024_0000, "The nonce does appear to be not a random value or it is not the correct length.";
    BadSessionIdInvalid = 0x8025_0000, "The session id is not valid.";
    BadSessionClosed = 0x8026_0000, "The session was closed by the client.";
    BadSessionNotActivated = 0x8027_0000, "The session cannot be used because ActivateSession has not been called.";
    BadSubscriptionIdInvalid = 0x8028_0000, "The subscription id is not valid.";
    BadRequestHandleInvalid = 0x8029_0000, "The request handle duplicates one that is already pending.";
    BadRequestHeaderInvalid = 0x802A_0000, "The header for the request is missing or invalid.";
    BadTimestampsToReturnInvalid = 0x802B_0000, "The timestamps to return parameter is invalid.";
    BadRequestCancelledByClient = 0x802C_0000, "The request was cancelled by the client.";
    BadNoCommunication = 0x8031_0000, "Communication with the data source is defined, but not established, and there is no last known value available.";
    BadNodeIdInvalid = 0x8033_0000, "The syntax the node id is not valid.";
    BadNodeIdUnknown = 0x8034_0000, "The node id refers to a node that does not exist in the server address space.";
    BadAttributeIdInvalid = 0x8035_0000, "The attribute is not supported for the specified Node.";
    BadIndexRangeInvalid = 0x8036_0000, "The syntax of the index range parameter is invalid.";
    BadDataEncodingInvalid = 0x8038_0000, "The data encoding is invalid.";
    BadNotReadable = 0x803A_0000, "The access level does not allow reading or subscribing to the Node.";
    BadNotWritable = 0x803B_0000, "The access level does not allow writing to the Node.";
    BadOutOfRange = 0x803C_0000, "The value was out of range.";
    BadNotSupported = 0x803D_0000, "The requested operation is not supported.";
    BadNotFound = 0x803E_0000, "A requested item was not found or a search operation ended without success.";
    BadMonitoredItemIdInvalid = 0x8042_0000, "The monitoring item id does not refer to a valid monitored item.";
    BadTooManySessions = 0x8056_0000, "The server has reached its maximum number of sessions.";
    BadUserSignatureInvalid = 0x8057_0000, "The user token signature is missing or invalid.";
    BadApplicationSignatureInvalid = 0x8058_0000, "The signature generated with the client certificate is missing or invalid.";
    BadRequestCancelledByRequest = 0x805A_0000, "The request was cancelled by the client with the Cancel service.";
    BadNoValidCertificates = 0x8059_0000, "The client did not provide at least one software certificate that is valid and meets the profile requirements for the server.";
    BadSequenceNumberUnknown = 0x807A_0000, "The sequence number is unknown to the server.";
    BadTcpServerTooBusy = 0x807D_0000, "The server cannot process the request because it is too busy.";
    BadTcpMessageTypeInvalid = 0x807E_0000, "The type of the message specified in the header invalid.";
    BadTcpSecureChannelUnknown = 0x807F_0000, "The SecureChannelId and/or TokenId are not currently in use.";
    BadTcpMessageTooLarge = 0x8080_0000, "The size of the message chunk specified in the header is too large.";
    BadTcpNotEnoughResources = 0x8081_0000, "There are not enough resources to process the request.";
    BadTcpInternalError = 0x8082_0000, "An internal error occurred.";
    BadTcpEndpointUrlInvalid = 0x8083_0000, "The server does not recognize the QueryString specified.";
    BadRequestInterrupted = 0x8084_0000, "The request could not be sent because of a network interruption.";
    BadRequestTimeout = 0x8085_0000, "Timeout occurred while processing the request.";
    BadSecureChannelClosed = 0x8086_0000, "The secure channel has been closed.";
    BadSecureChannelTokenUnknown = 0x8087_0000, "The token has expired or is not recognized.";
    BadSequenceNumberInvalid = 0x8088_0000, "The sequence number is not valid.";
    BadNotConnected = 0x808A_0000, "The variable should receive its value from another variable, but has never been configured to do so.";
    BadSecurityModeRejected = 0x80E6_0000, "The security mode does not meet the requirements set by the server.";
    BadSecurityPolicyRejected = 0x80E7_0000, "The security policy does not meet the requirements set by the server.";
    BadConnectionRejected = 0x80AC_0000, "Could not establish a network connection to remote server.";
    BadDisconnect = 0x80AD_0000, "The server has disconnected from the client.";
    BadConnectionClosed = 0x80AE_0000, "The network connection has been closed.";
    BadInvalidState = 0x80AF_0000, "The operation cannot be completed because the object is closed, uninitialized or in some other invalid state.";
    BadEndOfStream = 0x80B0_0000, "Cannot move beyond end of the stream.";
    BadWouldBlock = 0x80B5_0000, "The operation would block and the stream is non blocking.";
    BadMaxConnectionsReached = 0x80B7_0000, "The operation could not be finished because all available connections are in use.";
    BadRequestTooLarge = 0x80B8_0000, "The request message size exceeds limits set by the server.";
    BadResponseTooLarge = 0x80B9_0000, "The response message size exceeds limits set by the client.";
    BadProtocolVersionUnsupported = 0x80BE_0000, "The applications do not have compatible protocol versions.";
}

impl StatusCode {
    /// Severity bit mask.
    const SEVERITY_MASK: u32 = 0xC000_0000;
    const SEVERITY_BAD: u32 = 0x8000_0000;
    const SEVERITY_UNCERTAIN: u32 = 0x4000_0000;

    /// Build a status code from its raw 32-bit value, preserving unknown codes.
    pub fn from_bits(bits: u32) -> Self {
        StatusCode(bits)
    }

    /// Get the raw 32-bit value.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// `true` if the severity is good.
    pub fn is_good(&self) -> bool {
        self.0 & Self::SEVERITY_MASK == 0
    }

    /// `true` if the severity is bad.
    pub fn is_bad(&self) -> bool {
        self.0 & Self::SEVERITY_BAD != 0
    }

    /// `true` if the severity is uncertain.
    pub fn is_uncertain(&self) -> bool {
        self.0 & Self::SEVERITY_MASK == Self::SEVERITY_UNCERTAIN
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "StatusCode({:#010X})", self.0),
        }
    }
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        StatusCode(value)
    }
}

impl From<StatusCode> for u32 {
    fn from(value: StatusCode) -> Self {
        value.0
    }
}

impl From<StatusCode> for std::io::Error {
    fn from(value: StatusCode) -> Self {
        std::io::Error::other(format!("StatusCode {}", value))
    }
}

impl std::error::Error for StatusCode {}

impl BinaryEncodable for StatusCode {
    fn byte_len(&self) -> usize {
        4
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        write_u32(stream, self.0)
    }
}

impl BinaryDecodable for StatusCode {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        Ok(StatusCode(read_u32(stream)?))
    }
}

#[cfg(test)]
mod tests {
    use super::StatusCode;

    #[test]
    fn severity() {
        assert!(StatusCode::Good.is_good());
        assert!(!StatusCode::Good.is_bad());
        assert!(StatusCode::BadTimeout.is_bad());
        assert!(!StatusCode::BadTimeout.is_good());
        assert!(StatusCode::from_bits(0x4000_0000).is_uncertain());
    }

    #[test]
    fn unknown_code_round_trip() {
        let code = StatusCode::from_bits(0x8123_4567);
        assert_eq!(code.name(), None);
        assert_eq!(code.bits(), 0x8123_4567);
        assert!(code.is_bad());
    }

    #[test]
    fn display() {
        assert_eq!(StatusCode::BadSecurityChecksFailed.to_string(), "BadSecurityChecksFailed");
        assert_eq!(StatusCode::from_bits(3).to_string(), "StatusCode(0x00000003)");
    }
}
