pub mod capture;
pub mod image;
pub mod media;
pub mod playback;
pub mod realtime;
pub mod session;

// Re-export commonly used types for convenience
pub use capture::{AudioCaptureAdapter, AudioChunk, CaptureConfig, ChunkEncoding, MuteGate};

pub use self::image::{
    ImageCapture, ImageError, ImagePayload, OpenAIVision, OpenAIVisionConfig, VideoFrame,
    VisionDescriber, VisionRequestError,
};

pub use media::{CameraStream, MediaAccessError, MediaDevices, MicrophoneRequest, MicrophoneStream};

pub use playback::{AudioPlaybackQueue, DecodeError, PlaybackEvent, PlaybackSegment, PlaybackSink};

pub use realtime::{
    HumeEVIConfig, HumeEVIConnector, RealtimeError, RealtimeResult, RealtimeTransport,
    TransportConnector, TransportEvent,
};

pub use session::{
    ConversationTurn, SessionConfig, SessionError, SessionEvent, SessionOrchestrator,
    SessionState, StatusKind, StatusUpdate, TurnRole,
};
