//! Outbound REST integration driven by JSON templates
//!
//! A workflow trigger is routed by the [`ActionDispatcher`] to a configuration
//! section. The section names a request template whose placeholders the
//! [`TemplateEngine`] fills from the ticket before sending it, and optionally
//! a response template mapping the reply back into ticket fields.

pub mod action;
pub mod client;
pub mod digest;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod placeholder;
pub mod template;
pub mod trigger;

pub use action::{ActionConfig, Timing};
pub use client::{
    ExpectedStatusCodes, HttpMethod, HttpTransport, MockTransport, RawResponse, ReqwestTransport,
};
pub use dispatcher::ActionDispatcher;
pub use engine::{Phase, TemplateEngine};
pub use error::DispatchError;
pub use placeholder::{Placeholder, PlaceholderPattern};
pub use template::{DirTemplateStore, MemoryTemplateStore, TemplateError, TemplateStore};
pub use trigger::{Trigger, TriggerKind, TriggerPayload};
