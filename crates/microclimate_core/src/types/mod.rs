pub mod debug;
pub mod log;
pub mod notification;
pub mod project;
pub mod responses;

pub use debug::{AttachOutcome, AttachState, AttachTarget, DebugProtocol, Endpoint};
pub use log::{LogKind, LogStream, LogStreamHandle, WireLogInfo, WireLogs};
pub use notification::{now_millis, AppEvent, FieldChange, Notification, RegistryEvent, Timestamp};
pub use project::{
    AppSnapshot, BuildStatus, Capabilities, Language, ProjectInfo, ProjectKind, ProjectType,
    RunStatus,
};
pub use responses::ActionResponse;
