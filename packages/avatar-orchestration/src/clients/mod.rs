//! Backend collaborator clients
//!
//! Each backend is reached through a narrow async trait so the orchestrator
//! can be driven by HTTP gateways in production and by scripted fakes in
//! tests.

pub mod speech;
pub mod video;

pub use speech::{HttpSpeechSynthesizer, SpeechSynthesizer, SynthesisError};
pub use video::{
    build_prompt, DispatchReceipt, HttpVideoGenerator, ImageFormat, ImagePayload,
    OperationStatus, VideoCapabilities, VideoClientError, VideoGenerator, VideoRequest,
};
