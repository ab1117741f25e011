//! Subscription shaped services. The stack routes these to the embedder's
//! service handler; it does not implement a subscription engine.

use super::{ua_binary_codec, ua_message_info, ReadValueId};
use crate::{
    data_types::{MonitoringMode, TimestampsToReturn},
    date_time::DateTime,
    diagnostic_info::DiagnosticInfo,
    extension_object::ExtensionObject,
    request_header::RequestHeader,
    response_header::ResponseHeader,
    status_code::StatusCode,
};

/// Creates a subscription.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateSubscriptionRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Requested publishing interval in milliseconds.
    pub requested_publishing_interval: f64,
    /// Publishing intervals the subscription survives without a publish.
    pub requested_lifetime_count: u32,
    /// Publishing intervals between keep alive notifications.
    pub requested_max_keep_alive_count: u32,
    /// Cap on notifications per publish response, 0 for no limit.
    pub max_notifications_per_publish: u32,
    /// Whether publishing starts enabled.
    pub publishing_enabled: bool,
    /// Relative priority against other subscriptions of the session.
    pub priority: u8,
}

ua_binary_codec!(
    CreateSubscriptionRequest,
    request_header,
    requested_publishing_interval,
    requested_lifetime_count,
    requested_max_keep_alive_count,
    max_notifications_per_publish,
    publishing_enabled,
    priority
);
ua_message_info!(
    CreateSubscriptionRequest,
    CreateSubscriptionRequest_Encoding_DefaultBinary
);

/// Response to a [`CreateSubscriptionRequest`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateSubscriptionResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// Server assigned subscription id.
    pub subscription_id: u32,
    /// Actual publishing interval granted.
    pub revised_publishing_interval: f64,
    /// Actual lifetime count granted.
    pub revised_lifetime_count: u32,
    /// Actual keep alive count granted.
    pub revised_max_keep_alive_count: u32,
}

ua_binary_codec!(
    CreateSubscriptionResponse,
    response_header,
    subscription_id,
    revised_publishing_interval,
    revised_lifetime_count,
    revised_max_keep_alive_count
);
ua_message_info!(
    CreateSubscriptionResponse,
    CreateSubscriptionResponse_Encoding_DefaultBinary
);

/// How a monitored item samples and queues values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitoringParameters {
    /// Client chosen handle echoed in notifications.
    pub client_handle: u32,
    /// Sampling interval in milliseconds, -1 for the publishing interval.
    pub sampling_interval: f64,
    /// Filter applied to sampled values.
    pub filter: ExtensionObject,
    /// Depth of the value queue.
    pub queue_size: u32,
    /// Whether the oldest value is dropped when the queue overflows.
    pub discard_oldest: bool,
}

ua_binary_codec!(
    MonitoringParameters,
    client_handle,
    sampling_interval,
    filter,
    queue_size,
    discard_oldest
);

/// One item to monitor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitoredItemCreateRequest {
    /// The attribute to monitor.
    pub item_to_monitor: ReadValueId,
    /// Initial monitoring mode.
    pub monitoring_mode: MonitoringMode,
    /// Sampling and queueing parameters.
    pub requested_parameters: MonitoringParameters,
}

ua_binary_codec!(
    MonitoredItemCreateRequest,
    item_to_monitor,
    monitoring_mode,
    requested_parameters
);

/// Result of creating one monitored item.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitoredItemCreateResult {
    /// Status of the create operation.
    pub status_code: StatusCode,
    /// Server assigned id of the monitored item.
    pub monitored_item_id: u32,
    /// Actual sampling interval granted.
    pub revised_sampling_interval: f64,
    /// Actual queue size granted.
    pub revised_queue_size: u32,
    /// Result of applying the filter.
    pub filter_result: ExtensionObject,
}

ua_binary_codec!(
    MonitoredItemCreateResult,
    status_code,
    monitored_item_id,
    revised_sampling_interval,
    revised_queue_size,
    filter_result
);

/// Creates monitored items on a subscription.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateMonitoredItemsRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// The subscription to add items to.
    pub subscription_id: u32,
    /// Which timestamps notifications carry.
    pub timestamps_to_return: TimestampsToReturn,
    /// The items to create.
    pub items_to_create: Option<Vec<MonitoredItemCreateRequest>>,
}

ua_binary_codec!(
    CreateMonitoredItemsRequest,
    request_header,
    subscription_id,
    timestamps_to_return,
    items_to_create
);
ua_message_info!(
    CreateMonitoredItemsRequest,
    CreateMonitoredItemsRequest_Encoding_DefaultBinary
);

/// Response to a [`CreateMonitoredItemsRequest`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CreateMonitoredItemsResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// One result per item, in request order.
    pub results: Option<Vec<MonitoredItemCreateResult>>,
    /// Per operation diagnostics when requested.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

ua_binary_codec!(
    CreateMonitoredItemsResponse,
    response_header,
    results,
    diagnostic_infos
);
ua_message_info!(
    CreateMonitoredItemsResponse,
    CreateMonitoredItemsResponse_Encoding_DefaultBinary
);

/// Acknowledges a notification message received earlier.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubscriptionAcknowledgement {
    /// The subscription the notification belonged to.
    pub subscription_id: u32,
    /// Sequence number of the acknowledged notification.
    pub sequence_number: u32,
}

ua_binary_codec!(SubscriptionAcknowledgement, subscription_id, sequence_number);

/// A batch of notifications published for a subscription.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotificationMessage {
    /// Sequence number of this message.
    pub sequence_number: u32,
    /// Time the message was published.
    pub publish_time: DateTime,
    /// The notification payloads.
    pub notification_data: Option<Vec<ExtensionObject>>,
}

ua_binary_codec!(
    NotificationMessage,
    sequence_number,
    publish_time,
    notification_data
);

/// Asks the server for the next notification message. The server may hold
/// the response until it has something to publish, so publish responses
/// complete out of request order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PublishRequest {
    /// Common request header.
    pub request_header: RequestHeader,
    /// Notifications received since the last publish.
    pub subscription_acknowledgements: Option<Vec<SubscriptionAcknowledgement>>,
}

ua_binary_codec!(
    PublishRequest,
    request_header,
    subscription_acknowledgements
);
ua_message_info!(PublishRequest, PublishRequest_Encoding_DefaultBinary);

/// Response to a [`PublishRequest`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PublishResponse {
    /// Common response header.
    pub response_header: ResponseHeader,
    /// The subscription this notification belongs to.
    pub subscription_id: u32,
    /// Sequence numbers of unacknowledged messages available for republish.
    pub available_sequence_numbers: Option<Vec<u32>>,
    /// Whether more notifications are queued.
    pub more_notifications: bool,
    /// The notification payload.
    pub notification_message: NotificationMessage,
    /// One status per acknowledgement, in request order.
    pub results: Option<Vec<StatusCode>>,
    /// Per operation diagnostics when requested.
    pub diagnostic_infos: Option<Vec<DiagnosticInfo>>,
}

ua_binary_codec!(
    PublishResponse,
    response_header,
    subscription_id,
    available_sequence_numbers,
    more_notifications,
    notification_message,
    results,
    diagnostic_infos
);
ua_message_info!(PublishResponse, PublishResponse_Encoding_DefaultBinary);

#[cfg(test)]
mod tests {
    use crate::encoding::{BinaryDecodable, BinaryEncodable, DecodingOptions};
    use crate::{
        DataValue, ReadRequest, ReadResponse, ReadValueId, RequestHeader, ResponseHeader,
        TimestampsToReturn, Variant,
    };
    use std::io::Cursor;

    #[test]
    fn read_request_round_trip() {
        let request = ReadRequest {
            request_header: RequestHeader::dummy(),
            max_age: 0.0,
            timestamps_to_return: TimestampsToReturn::Both,
            nodes_to_read: Some(vec![
                ReadValueId::value_of(crate::NodeId::new(1, 1012u32)),
                ReadValueId::value_of(crate::NodeId::new(2, "toggle")),
            ]),
        };
        let bytes = request.encode_to_vec();
        assert_eq!(bytes.len(), request.byte_len());
        let decoded =
            ReadRequest::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn read_response_round_trip() {
        let response = ReadResponse {
            response_header: ResponseHeader::new_service_result(9, crate::StatusCode::Good),
            results: Some(vec![DataValue::new_now(Variant::Int32(7))]),
            diagnostic_infos: None,
        };
        let bytes = response.encode_to_vec();
        assert_eq!(bytes.len(), response.byte_len());
        let decoded =
            ReadResponse::decode(&mut Cursor::new(bytes), &DecodingOptions::test()).unwrap();
        assert_eq!(decoded, response);
    }
}
