// Line-oriented stdin control protocol: one `key?value\n` per message.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use crate::model::{HostSpinUpResult, MandelboxPorts};

/// A message written to the protocol's standard input.
#[derive(Clone)]
pub enum ControlMessage {
    Ports(MandelboxPorts),
    PrivateKey(SecretString),
    Ip(String),
    /// All connection arguments have been sent.
    Finished,
    /// Request a graceful shutdown.
    Kill,
    OpenUrl(String),
}

impl ControlMessage {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Ports(_) => "ports",
            Self::PrivateKey(_) => "private-key",
            Self::Ip(_) => "ip",
            Self::Finished => "finished",
            Self::Kill => "kill",
            Self::OpenUrl(_) => "open-url",
        }
    }

    /// The exact line to write, newline included.
    pub fn encode(&self) -> String {
        let value = match self {
            Self::Ports(ports) => serialize_ports(ports),
            Self::PrivateKey(secret) => secret.expose_secret().to_owned(),
            Self::Ip(ip) => ip.clone(),
            Self::Finished | Self::Kill => "0".to_owned(),
            Self::OpenUrl(url) => url.clone(),
        };
        format!("{}?{value}\n", self.key())
    }
}

impl fmt::Debug for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivateKey(_) => f.write_str("private-key?[REDACTED]"),
            other => f.write_str(other.encode().trim_end()),
        }
    }
}

/// `32262:<p>.32263:<p>.32273:<p>`
pub fn serialize_ports(ports: &MandelboxPorts) -> String {
    format!(
        "32262:{}.32263:{}.32273:{}",
        ports.port_32262, ports.port_32263, ports.port_32273
    )
}

/// Messages that hand a mandelbox to the protocol, in wire order.
pub fn connection_messages(info: &HostSpinUpResult) -> [ControlMessage; 4] {
    [
        ControlMessage::Ports(info.mandelbox_ports),
        ControlMessage::PrivateKey(info.mandelbox_secret.clone()),
        ControlMessage::Ip(info.mandelbox_ip.clone()),
        ControlMessage::Finished,
    ]
}
