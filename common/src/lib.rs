pub mod attachment;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod response;
pub mod server;
pub mod types;

pub use attachment::{
    AttachOutcome, AttachmentMachine, NetworkAttachment, NetworkEvent, NotificationSource,
    StationControl, StationRequest, Transition,
};
pub use command::CommandToken;
pub use config::{NetworkConfig, OutputConfig, ServerConfig, SwitchConfig};
pub use dispatcher::{ActionDispatcher, BinaryOutput, MemoryOutput};
pub use error::{AttachError, ConfigError, OutputError, ServerError};
pub use response::ResponseTemplate;
pub use server::{serve_connection, CommandServer, ConnectionOutcome, RequestBuffer};
pub use types::{AttachmentState, DeviceAddress, OutputState};
