pub const BASE_URL: &str = "ws://localhost:8998";
pub const SOCKET_PATH: &str = "/api/chat";

pub const DEFAULT_CAPACITY: usize = 1024;

pub const BASE_RECONNECT_DELAY_MS: u64 = 1000;
pub const MAX_RECONNECT_DELAY_MS: u64 = 30000;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
