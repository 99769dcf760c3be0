pub mod credentials;
pub mod events;
pub mod frames;
pub mod prompt;
pub mod publisher;
pub mod realtime;
pub mod reconciler;
pub mod relay;
pub mod session;
pub mod transcript;

// Re-export commonly used types for convenience
pub use credentials::{Credential, CredentialProvider, StaticCredentialProvider};
pub use events::{EventCategory, EventView, ServiceEvent, classify};
pub use frames::{ClientChannel, ClientFrame, OutboundMessage};
pub use prompt::{DEFAULT_AGENT_NAME, PromptError, PromptTemplate};
pub use publisher::DeltaPublisher;
pub use realtime::{
    AudioSink, ModelConnection, ModelConnectionFactory, ModelSender, RealtimeError,
    RealtimeResult, SessionSettings, VoiceLiveConfig, VoiceLiveFactory,
};
pub use reconciler::{TEMPORARY_ISSUE_MESSAGE, TurnReconciler};
pub use relay::{TelephonyAudioSink, forward_inbound};
pub use session::{CallIdentity, ConversationSession, SessionGuard, SessionInfo, SessionRegistry};
pub use transcript::{FunctionCallRecord, Role, Transcript, TranscriptEntry};
