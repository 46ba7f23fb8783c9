use std::time::Duration;

use clap::Parser;

use crate::signaling::{AdmissionPolicy, DEFAULT_SIGNALING_PORT};

/// Room key admitted when none is configured.
pub const DEFAULT_ROOM_KEY: &str = "consultation";

/// Relay settings, parsed from the command line.
#[derive(Parser, Debug, Clone)]
#[clap(name = "vetrelay", about = "WebRTC signaling relay for video consultations")]
pub struct RelayConfig {
    /// Address to bind the listener to.
    #[clap(long, default_value = "0.0.0.0")]
    pub host: String,

    /// The port to listen on.
    #[clap(short, long, default_value_t = DEFAULT_SIGNALING_PORT)]
    pub port: u16,

    /// Room key clients may join. Repeat to admit several rooms.
    #[clap(long = "room", default_value = DEFAULT_ROOM_KEY)]
    pub rooms: Vec<String>,

    /// Seconds between keepalive pings.
    #[clap(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before dropping the connection.
    #[clap(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub pong_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_SIGNALING_PORT,
            rooms: vec![DEFAULT_ROOM_KEY.to_string()],
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy::allow_list(self.rooms.iter().map(String::as_str))
    }

    /// Never zero, even when the field was set directly.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }
}
