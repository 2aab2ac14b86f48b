// Remote gateway plumbing: REST backend and the realtime push socket.

pub mod backend;
pub mod channels;
pub mod error;
pub mod query;
pub mod realtime;
pub mod rest;
pub mod topics;

pub use backend::Backend;
pub use channels::{join_channel, leave_channel};
pub use error::NetError;
pub use query::Query;
pub use realtime::{spawn_realtime, RealtimeCommand, RealtimeConfig, RealtimeNotification};
pub use rest::RestBackend;
pub use topics::{TopicInfo, TopicState, TopicTracker};
