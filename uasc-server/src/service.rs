//! The [`ServiceHandler`] capability: the embedder's implementation of every
//! service that is not session treatment or discovery. The stack decodes,
//! authenticates and routes; the handler owns the address space and the
//! service semantics.

use std::sync::Arc;

use async_trait::async_trait;

use uasc_core::{Message, RequestMessage, ResponseMessage};
use uasc_types::{NodeId, StatusCode};

use crate::{
    authenticator::UserToken,
    authorization::{AuthorizationManager, Operation},
};

/// An authenticated user together with the authorization manager bound to
/// it. The manager is shared and outlives every user it is attached to.
pub struct SessionUser {
    /// The authenticated user's token.
    pub token: UserToken,
    /// The access decision capability bound to this user.
    pub authorization: Arc<dyn AuthorizationManager>,
}

impl SessionUser {
    /// `true` when this user may perform `operation` on the attribute.
    pub async fn authorize_operation(
        &self,
        operation: Operation,
        node_id: &NodeId,
        attribute_id: u32,
    ) -> bool {
        self.authorization
            .authorize_operation(operation, node_id, attribute_id, &self.token)
            .await
    }
}

/// Handles service requests on behalf of the server. One call per request,
/// the response is sent back on whatever channel the request arrived on.
///
/// Requests arrive only after their session is validated and activated; the
/// handler never sees session treatment or discovery messages.
#[async_trait]
pub trait ServiceHandler: Send + Sync + 'static {
    /// Produce the response for `request`, issued by `user` on the session
    /// identified by `session_id`.
    ///
    /// Implementations consult [`SessionUser::authorize_operation`] for read
    /// and write operations and are free to complete publish-style requests
    /// out of order.
    async fn handle(
        &self,
        request: &RequestMessage,
        user: &SessionUser,
        session_id: &NodeId,
    ) -> ResponseMessage;
}

/// A service handler that faults every request with `BadServiceUnsupported`.
#[derive(Debug, Default)]
pub struct DefaultServiceHandler;

#[async_trait]
impl ServiceHandler for DefaultServiceHandler {
    async fn handle(
        &self,
        request: &RequestMessage,
        _user: &SessionUser,
        _session_id: &NodeId,
    ) -> ResponseMessage {
        ResponseMessage::service_fault(request.request_handle(), StatusCode::BadServiceUnsupported)
    }
}
