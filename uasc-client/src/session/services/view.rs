//! View service calls: Browse.

use uasc_core::ResponseMessage;
use uasc_types::{BrowseDescription, BrowseRequest, BrowseResult, StatusCode, ViewDescription};

use crate::session::{process_service_result, process_unexpected_response, Session};

impl Session {
    /// Browse the references of one or more nodes.
    pub async fn browse(
        &self,
        nodes_to_browse: &[BrowseDescription],
        max_references_per_node: u32,
    ) -> Result<Vec<BrowseResult>, StatusCode> {
        if nodes_to_browse.is_empty() {
            return Err(StatusCode::BadNothingToDo);
        }
        let request = BrowseRequest {
            request_header: self.channel.make_request_header(self.request_timeout),
            view: ViewDescription::default(),
            requested_max_references_per_node: max_references_per_node,
            nodes_to_browse: Some(nodes_to_browse.to_vec()),
        };
        let response = self.send(request).await?;
        let ResponseMessage::Browse(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;
        Ok(response.results.unwrap_or_default())
    }
}
