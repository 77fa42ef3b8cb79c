use serde::{Deserialize, Serialize};
use tw_core::config::ServerConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Address of a remote server. Without one the client runs its own world.
    pub server: Option<String>,
    /// Visible area in blocks.
    pub view_width: i32,
    pub view_height: i32,
    /// Block the view is centred on. Defaults to the middle of the world.
    pub view_center: Option<(i32, i32)>,
    /// Maximum number of chunk requests in flight.
    pub request_limit: usize,
    pub frame_ms: u16,
    /// Stop after this many frames. Runs forever when unset.
    pub frames: Option<u64>,
    pub log_level: String,
    /// World used in singleplayer.
    pub singleplayer: ServerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: None,
            view_width: 80,
            view_height: 45,
            view_center: None,
            request_limit: 5,
            frame_ms: 16,
            frames: None,
            log_level: "info".to_string(),
            singleplayer: ServerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_singleplayer_section() {
        let config: ClientConfig =
            serde_json::from_str(r#"{ "frames": 3, "singleplayer": { "width": 64 } }"#).unwrap();
        assert_eq!(config.frames, Some(3));
        assert_eq!(config.singleplayer.width, 64);
        assert_eq!(config.singleplayer.height, 1200);
        assert_eq!(config.request_limit, 5);
        assert!(config.server.is_none());
    }
}
