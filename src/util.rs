const VIGIL_BROKER: &str = "VIGIL_BROKER";

const DEFAULT_BROKER: &str = "127.0.0.1";

pub fn get_broker() -> String {
    std::env::var(VIGIL_BROKER).unwrap_or_else(|_| DEFAULT_BROKER.to_string())
}

const VIGIL_BROKER_PORT: &str = "VIGIL_BROKER_PORT";

const DEFAULT_BROKER_PORT: u16 = 6666;

pub fn get_broker_port() -> u16 {
    let port_from_env = std::env::var(VIGIL_BROKER_PORT);
    port_from_env.map_or(DEFAULT_BROKER_PORT, |res| {
        res.parse().unwrap_or(DEFAULT_BROKER_PORT)
    })
}

const VIGIL_LISTEN_PORT: &str = "VIGIL_LISTEN_PORT";

const DEFAULT_LISTEN_PORT: u16 = 5001;

pub fn get_listen_port() -> u16 {
    let port_from_env = std::env::var(VIGIL_LISTEN_PORT);
    port_from_env.map_or(DEFAULT_LISTEN_PORT, |res| {
        res.parse().unwrap_or(DEFAULT_LISTEN_PORT)
    })
}

/// Seconds between two unsolicited pushes of a monitor
pub const DEFAULT_PUSH_INTERVAL: u64 = 5;
