//! Telephony call control.
//!
//! The [`CallAutomation`] trait is the narrow interface the webhooks and the
//! call plugin use to answer, inspect, transfer and end calls.
//! [`AcsCallAutomation`] implements it against the Azure Communication
//! Services REST API.

pub mod client;
pub mod events;

pub use client::{
    ACS_API_VERSION, AcsCallAutomation, AnswerCallRequest, CallAutomation, CallAutomationError,
    CallAutomationResult, CallConnectionProperties, CommunicationIdentifier,
    MediaStreamingOptions,
};
pub use events::{CallbackEvent, EventGridEvent, ValidationResponse};
