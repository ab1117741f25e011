//! The authorization capability: per-operation access decisions for
//! authenticated users. The manager is shared behind an `Arc` and outlives
//! every user it is attached to.

use async_trait::async_trait;

use uasc_types::NodeId;

use crate::authenticator::UserToken;

/// The operations subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Reading an attribute.
    Read,
    /// Writing an attribute.
    Write,
}

/// Decides whether a user may perform an operation on an attribute of a
/// node.
#[async_trait]
pub trait AuthorizationManager: Send + Sync + 'static {
    /// `true` when `user` may perform `operation` on the attribute.
    async fn authorize_operation(
        &self,
        operation: Operation,
        node_id: &NodeId,
        attribute_id: u32,
        user: &UserToken,
    ) -> bool;
}

/// An authorization manager that allows everything.
#[derive(Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl AuthorizationManager for AllowAll {
    async fn authorize_operation(
        &self,
        _operation: Operation,
        _node_id: &NodeId,
        _attribute_id: u32,
        _user: &UserToken,
    ) -> bool {
        true
    }
}
