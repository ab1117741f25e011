//! Subscription shaped service calls. The stack routes them; the server's
//! service handler implements their semantics.

use uasc_core::ResponseMessage;
use uasc_types::{
    CreateMonitoredItemsRequest, CreateMonitoredItemsResponse, CreateSubscriptionRequest,
    CreateSubscriptionResponse, MonitoredItemCreateRequest, PublishRequest, PublishResponse,
    StatusCode, SubscriptionAcknowledgement, TimestampsToReturn,
};

use crate::session::{process_service_result, process_unexpected_response, Session};

impl Session {
    /// Create a subscription on the server.
    pub async fn create_subscription(
        &self,
        publishing_interval: f64,
        lifetime_count: u32,
        max_keep_alive_count: u32,
        max_notifications_per_publish: u32,
        publishing_enabled: bool,
        priority: u8,
    ) -> Result<CreateSubscriptionResponse, StatusCode> {
        let request = CreateSubscriptionRequest {
            request_header: self.channel.make_request_header(self.request_timeout),
            requested_publishing_interval: publishing_interval,
            requested_lifetime_count: lifetime_count,
            requested_max_keep_alive_count: max_keep_alive_count,
            max_notifications_per_publish,
            publishing_enabled,
            priority,
        };
        let response = self.send(request).await?;
        let ResponseMessage::CreateSubscription(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;
        Ok(*response)
    }

    /// Create monitored items on a subscription.
    pub async fn create_monitored_items(
        &self,
        subscription_id: u32,
        timestamps_to_return: TimestampsToReturn,
        items_to_create: &[MonitoredItemCreateRequest],
    ) -> Result<CreateMonitoredItemsResponse, StatusCode> {
        if items_to_create.is_empty() {
            return Err(StatusCode::BadNothingToDo);
        }
        let request = CreateMonitoredItemsRequest {
            request_header: self.channel.make_request_header(self.request_timeout),
            subscription_id,
            timestamps_to_return,
            items_to_create: Some(items_to_create.to_vec()),
        };
        let response = self.send(request).await?;
        let ResponseMessage::CreateMonitoredItems(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;
        Ok(*response)
    }

    /// Send a publish request acknowledging earlier notifications. The
    /// server may hold the response until it has something to say, so
    /// publish responses complete out of order with other requests.
    pub async fn publish(
        &self,
        acknowledgements: &[SubscriptionAcknowledgement],
    ) -> Result<PublishResponse, StatusCode> {
        let request = PublishRequest {
            request_header: self.channel.make_request_header(self.request_timeout),
            subscription_acknowledgements: if acknowledgements.is_empty() {
                None
            } else {
                Some(acknowledgements.to_vec())
            },
        };
        let response = self.send(request).await?;
        let ResponseMessage::Publish(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;
        Ok(*response)
    }
}
