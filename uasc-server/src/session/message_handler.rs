//! Classification and dispatch of decoded requests: session treatment,
//! discovery, or session services through the embedder's handler. Responses
//! on a server channel are a protocol violation handled by the connection
//! driver before messages reach this point.

use std::sync::Arc;

use log::debug;

use uasc_core::{Message, RequestMessage, ResponseMessage};
use uasc_types::{GetEndpointsRequest, ResponseHeader, StatusCode};

use crate::{channel::ChannelContext, info::ServerInfo};

use super::manager::SessionManager;

/// What a decoded request turned out to be.
enum RequestClass {
    /// CreateSession, ActivateSession, CloseSession.
    SessionTreatment,
    /// GetEndpoints; needs no session.
    Discovery,
    /// Everything else; authenticated against a session, then handed to the
    /// service handler.
    SessionService,
}

fn classify(message: &RequestMessage) -> RequestClass {
    match message {
        RequestMessage::CreateSession(_)
        | RequestMessage::ActivateSession(_)
        | RequestMessage::CloseSession(_) => RequestClass::SessionTreatment,
        RequestMessage::GetEndpoints(_) => RequestClass::Discovery,
        _ => RequestClass::SessionService,
    }
}

/// Dispatches decoded requests to their treatment. One instance per server,
/// shared by every connection.
pub struct MessageHandler {
    info: Arc<ServerInfo>,
    session_manager: Arc<SessionManager>,
}

impl MessageHandler {
    /// Create a message handler over the server state and session arena.
    pub fn new(info: Arc<ServerInfo>, session_manager: Arc<SessionManager>) -> MessageHandler {
        MessageHandler {
            info,
            session_manager,
        }
    }

    /// The session arena.
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    /// Produce the response for `request` received on the channel described
    /// by `ctx`. Every request gets exactly one response; service-level
    /// failures become ServiceFault responses, never dropped messages.
    pub async fn handle(&self, ctx: &ChannelContext, request: RequestMessage) -> ResponseMessage {
        let request_handle = request.request_handle();
        match classify(&request) {
            RequestClass::SessionTreatment => self.handle_session_treatment(ctx, request).await,
            RequestClass::Discovery => {
                let RequestMessage::GetEndpoints(request) = request else {
                    unreachable!("classified as discovery");
                };
                self.handle_get_endpoints(*request)
            }
            RequestClass::SessionService => {
                // The auth token in the header names the session; the
                // session must exist, be activated, and not be timed out
                let auth_token = &request.request_header().authentication_token;
                let Some(session) = self.session_manager.find_by_token(auth_token) else {
                    return ResponseMessage::service_fault(
                        request_handle,
                        StatusCode::BadSessionIdInvalid,
                    );
                };

                let (session_id, user) = {
                    let mut session = session.write();
                    if session.validate_timed_out().is_err() {
                        return ResponseMessage::service_fault(
                            request_handle,
                            StatusCode::BadSessionIdInvalid,
                        );
                    }
                    if !session.is_activated() {
                        return ResponseMessage::service_fault(
                            request_handle,
                            StatusCode::BadSessionNotActivated,
                        );
                    }
                    session.touch();
                    let Some(user) = session.user_token().cloned() else {
                        return ResponseMessage::service_fault(
                            request_handle,
                            StatusCode::BadSessionNotActivated,
                        );
                    };
                    (session.session_id().clone(), user)
                };

                debug!(
                    "Dispatching {:?} for session {}",
                    request.type_id(),
                    session_id
                );
                let user = crate::service::SessionUser {
                    token: user,
                    authorization: self.info.authorization.clone(),
                };
                self.info
                    .service_handler
                    .handle(&request, &user, &session_id)
                    .await
            }
        }
    }

    async fn handle_session_treatment(
        &self,
        ctx: &ChannelContext,
        request: RequestMessage,
    ) -> ResponseMessage {
        let request_handle = request.request_handle();
        let result: Result<ResponseMessage, StatusCode> = match request {
            RequestMessage::CreateSession(request) => self
                .session_manager
                .create_session(ctx, &request)
                .map(|r| r.into()),
            RequestMessage::ActivateSession(request) => self
                .session_manager
                .activate_session(ctx, &request)
                .await
                .map(|r| r.into()),
            RequestMessage::CloseSession(request) => self
                .session_manager
                .close_session(ctx, &request)
                .map(|r| r.into()),
            _ => unreachable!("classified as session treatment"),
        };
        result.unwrap_or_else(|status| ResponseMessage::service_fault(request_handle, status))
    }

    fn handle_get_endpoints(&self, request: GetEndpointsRequest) -> ResponseMessage {
        let endpoints = self
            .info
            .endpoint_descriptions(request.endpoint_url.as_ref());
        uasc_types::GetEndpointsResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            endpoints,
        }
        .into()
    }
}
