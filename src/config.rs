use clap::Parser;
use std::path::PathBuf;

/// Room signaling relay for browser video calls.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3000", env = "RELAY_BIND")]
    pub bind: String,

    /// Directory with the web client, served for any path not matched by the API
    #[arg(long, env = "RELAY_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Maximum display name length in characters
    #[arg(long, default_value_t = 64, env = "RELAY_MAX_DISPLAY_NAME_LEN")]
    pub max_display_name_len: usize,

    /// Maximum room id length in characters
    #[arg(long, default_value_t = 128, env = "RELAY_MAX_ROOM_ID_LEN")]
    pub max_room_id_len: usize,

    /// Maximum chat message length in characters
    #[arg(long, default_value_t = 4096, env = "RELAY_MAX_CHAT_LEN")]
    pub max_chat_len: usize,

    /// Maximum size of a single WebSocket frame
    #[arg(long, default_value_t = 64 * 1024, env = "RELAY_MAX_FRAME_BYTES")]
    pub max_frame_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            static_dir: None,
            max_display_name_len: 64,
            max_room_id_len: 128,
            max_chat_len: 4096,
            max_frame_bytes: 64 * 1024,
        }
    }
}

/// The subset of [`Config`] the relay checks inbound events against.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_display_name_len: usize,
    pub max_room_id_len: usize,
    pub max_chat_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Config::default().limits()
    }
}

impl Config {
    pub fn limits(&self) -> Limits {
        Limits {
            max_display_name_len: self.max_display_name_len,
            max_room_id_len: self.max_room_id_len,
            max_chat_len: self.max_chat_len,
        }
    }
}
