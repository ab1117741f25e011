//! Attribute service calls: Read and Write.

use uasc_core::ResponseMessage;
use uasc_types::{
    DataValue, ReadRequest, ReadValueId, StatusCode, TimestampsToReturn, WriteRequest, WriteValue,
};

use crate::session::{process_service_result, process_unexpected_response, Session};

impl Session {
    /// Read attributes from one or more nodes. Results come back in request
    /// order, one per read value id.
    pub async fn read(
        &self,
        nodes_to_read: &[ReadValueId],
        timestamps_to_return: TimestampsToReturn,
        max_age: f64,
    ) -> Result<Vec<DataValue>, StatusCode> {
        if nodes_to_read.is_empty() {
            return Err(StatusCode::BadNothingToDo);
        }
        let request = ReadRequest {
            request_header: self.channel.make_request_header(self.request_timeout),
            max_age,
            timestamps_to_return,
            nodes_to_read: Some(nodes_to_read.to_vec()),
        };
        let response = self.send(request).await?;
        let ResponseMessage::Read(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;
        Ok(response.results.unwrap_or_default())
    }

    /// Write values to attributes of one or more nodes. One status per
    /// write, in request order.
    pub async fn write(&self, nodes_to_write: &[WriteValue]) -> Result<Vec<StatusCode>, StatusCode> {
        if nodes_to_write.is_empty() {
            return Err(StatusCode::BadNothingToDo);
        }
        let request = WriteRequest {
            request_header: self.channel.make_request_header(self.request_timeout),
            nodes_to_write: Some(nodes_to_write.to_vec()),
        };
        let response = self.send(request).await?;
        let ResponseMessage::Write(response) = response else {
            return Err(process_unexpected_response(response));
        };
        process_service_result(&response.response_header)?;
        Ok(response.results.unwrap_or_default())
    }
}
