//! The ServiceFault message, returned when a service call fails as a whole.

use super::{ua_binary_codec, ua_message_info};
use crate::{response_header::ResponseHeader, status_code::StatusCode};

/// A response carrying only a header, whose `service_result` explains what
/// went wrong.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceFault {
    /// Common response header with the failing service result.
    pub response_header: ResponseHeader,
}

ua_binary_codec!(ServiceFault, response_header);
ua_message_info!(ServiceFault, ServiceFault_Encoding_DefaultBinary);

impl ServiceFault {
    /// Create a fault for the given request handle and status.
    pub fn new(request_handle: u32, service_result: StatusCode) -> ServiceFault {
        ServiceFault {
            response_header: ResponseHeader::new_service_result(request_handle, service_result),
        }
    }
}
