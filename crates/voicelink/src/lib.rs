mod connection;

pub use voicelink_protocol as protocol;
pub use connection::{
    connect, connect_with_config, BackoffPolicy, CloseKind, Config, ConfigBuilder,
    ConnectionError, ConnectionManager, ConnectionSession, ConnectionState, EventRx, Inbound,
    Stats,
};
