//! Service call implementations on [`super::Session`].

mod attributes;
mod session;
mod subscriptions;
mod view;
