/// Log tags, one per subsystem
///
/// Each tag maps to a `--debug-<key>` command line flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Config,
    Broker,
    Channels,
    Heartbeat,
    Registry,
    Health,
    Client,
    Breaker,
    Webserver,
}

impl LogTag {
    /// Key used for `--debug-<key>` / `--verbose-<key>` flags
    pub fn to_debug_key(&self) -> String {
        match self {
            LogTag::System => "system",
            LogTag::Config => "config",
            LogTag::Broker => "broker",
            LogTag::Channels => "channels",
            LogTag::Heartbeat => "heartbeat",
            LogTag::Registry => "registry",
            LogTag::Health => "health",
            LogTag::Client => "client",
            LogTag::Breaker => "breaker",
            LogTag::Webserver => "webserver",
        }
        .to_string()
    }

    /// Uppercase label used in console and file output
    pub fn to_plain_string(&self) -> String {
        self.to_debug_key().to_uppercase()
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}
