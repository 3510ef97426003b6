//! Table of recognised client options.
//!
//! Which keys are known, how their values are validated and whether they
//! accumulate across rules is policy, so it lives here as data rather than
//! as branches in the parser.

/// How a value is checked before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Any non-empty value.
    Any,
    /// `yes` or `no` (case-insensitive).
    YesNo,
    /// Integer in 1..=65535.
    Port,
    /// Non-negative integer.
    Number,
    /// One of a fixed set of words (case-insensitive).
    Choice(&'static [&'static str]),
    /// RFC 1123 hostname or IP literal, `%h` tokens allowed.
    Hostname,
    /// A single token without whitespace.
    NoWhitespace,
}

impl Validator {
    /// Returns `true` when `value` is acceptable.
    pub fn accepts(self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        match self {
            Self::Any => true,
            Self::YesNo => matches!(value.to_ascii_lowercase().as_str(), "yes" | "no"),
            Self::Port => value.parse::<u16>().is_ok_and(|p| p > 0),
            Self::Number => value.parse::<u64>().is_ok(),
            Self::Choice(words) => {
                let lower = value.to_ascii_lowercase();
                words.iter().any(|w| *w == lower)
            }
            Self::Hostname => {
                // %h is substituted at resolution time
                let probe = value.replace("%h", "h").replace("%%", "");
                crate::host::is_valid_hostname(&probe)
            }
            Self::NoWhitespace => !value.chars().any(char::is_whitespace),
        }
    }
}

/// Metadata for one recognised option.
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    /// Canonical spelling, used as the key in parsed and resolved maps.
    pub name: &'static str,
    /// Whether values from every matching rule are collected.
    pub accumulate: bool,
    /// Value check applied at parse time.
    pub validator: Validator,
}

const fn single(name: &'static str, validator: Validator) -> OptionSpec {
    OptionSpec {
        name,
        accumulate: false,
        validator,
    }
}

const fn multi(name: &'static str) -> OptionSpec {
    OptionSpec {
        name,
        accumulate: true,
        validator: Validator::Any,
    }
}

const YES_NO_ASK: &[&str] = &["yes", "no", "ask", "confirm"];
const HOST_KEY_CHECKING: &[&str] = &["yes", "no", "accept-new", "off", "ask"];
const CONTROL_MASTER: &[&str] = &["yes", "no", "ask", "auto", "autoask"];
const REQUEST_TTY: &[&str] = &["yes", "no", "force", "auto"];
const LOG_LEVEL: &[&str] = &[
    "quiet", "fatal", "error", "info", "verbose", "debug", "debug1", "debug2", "debug3",
];

/// Every option the parser stores. Anything else is warned about and dropped.
pub static OPTIONS: &[OptionSpec] = &[
    single("HostName", Validator::Hostname),
    single("Port", Validator::Port),
    single("User", Validator::NoWhitespace),
    multi("IdentityFile"),
    single("IdentitiesOnly", Validator::YesNo),
    single("IdentityAgent", Validator::Any),
    multi("CertificateFile"),
    single("AddKeysToAgent", Validator::Any),
    single("ForwardAgent", Validator::Any),
    single("ProxyCommand", Validator::Any),
    single("ProxyJump", Validator::Any),
    single("StrictHostKeyChecking", Validator::Choice(HOST_KEY_CHECKING)),
    single("UserKnownHostsFile", Validator::Any),
    single("GlobalKnownHostsFile", Validator::Any),
    single("HostKeyAlias", Validator::NoWhitespace),
    single("HostKeyAlgorithms", Validator::NoWhitespace),
    single("PubkeyAcceptedAlgorithms", Validator::NoWhitespace),
    single("KexAlgorithms", Validator::NoWhitespace),
    single("Ciphers", Validator::NoWhitespace),
    single("MACs", Validator::NoWhitespace),
    single("BatchMode", Validator::YesNo),
    single("Compression", Validator::YesNo),
    single("ConnectTimeout", Validator::Number),
    single("ConnectionAttempts", Validator::Number),
    single("ServerAliveInterval", Validator::Number),
    single("ServerAliveCountMax", Validator::Number),
    single("TCPKeepAlive", Validator::YesNo),
    single("PreferredAuthentications", Validator::NoWhitespace),
    single("PubkeyAuthentication", Validator::YesNo),
    single("PasswordAuthentication", Validator::YesNo),
    single("KbdInteractiveAuthentication", Validator::YesNo),
    single("ControlMaster", Validator::Choice(CONTROL_MASTER)),
    single("ControlPath", Validator::Any),
    single("ControlPersist", Validator::Any),
    single("RequestTTY", Validator::Choice(REQUEST_TTY)),
    single("RemoteCommand", Validator::Any),
    single("LogLevel", Validator::Choice(LOG_LEVEL)),
    single("SetEnv", Validator::Any),
    single("UseKeychain", Validator::YesNo),
    single("VerifyHostKeyDNS", Validator::Choice(YES_NO_ASK)),
    multi("LocalForward"),
    multi("RemoteForward"),
    multi("DynamicForward"),
    multi("SendEnv"),
];

/// Looks up an option by name, ignoring case.
pub fn lookup(key: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|spec| spec.name.eq_ignore_ascii_case(key))
}
