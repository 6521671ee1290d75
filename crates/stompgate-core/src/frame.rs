//! STOMP frame model.

use std::fmt;

use crate::headers::HeaderList;

/// The STOMP verb of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Client verbs.
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // Server verbs.
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        use Command::*;
        match *self {
            Connect => "CONNECT",
            Stomp => "STOMP",
            Send => "SEND",
            Subscribe => "SUBSCRIBE",
            Unsubscribe => "UNSUBSCRIBE",
            Ack => "ACK",
            Nack => "NACK",
            Begin => "BEGIN",
            Commit => "COMMIT",
            Abort => "ABORT",
            Disconnect => "DISCONNECT",
            Connected => "CONNECTED",
            Message => "MESSAGE",
            Receipt => "RECEIPT",
            Error => "ERROR",
        }
    }

    /// Parse a wire command token.
    pub fn from_wire(token: &str) -> Option<Command> {
        use Command::*;
        let command = match token {
            "CONNECT" => Connect,
            "STOMP" => Stomp,
            "SEND" => Send,
            "SUBSCRIBE" => Subscribe,
            "UNSUBSCRIBE" => Unsubscribe,
            "ACK" => Ack,
            "NACK" => Nack,
            "BEGIN" => Begin,
            "COMMIT" => Commit,
            "ABORT" => Abort,
            "DISCONNECT" => Disconnect,
            "CONNECTED" => Connected,
            "MESSAGE" => Message,
            "RECEIPT" => Receipt,
            "ERROR" => Error,
            _ => return None,
        };
        Some(command)
    }

    /// CONNECT/CONNECTED (and the STOMP alias) carry headers verbatim; every
    /// other frame uses the 1.2 escape sequences.
    pub fn uses_header_escapes(&self) -> bool {
        !matches!(self, Command::Connect | Command::Connected | Command::Stomp)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP protocol unit: command, headers, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: HeaderList,
    pub body: Vec<u8>,
}

/// One unit on the wire: a complete frame, or a bare EOL heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmission {
    Heartbeat,
    Frame(Frame),
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: HeaderList::new(),
            body: Vec::new(),
        }
    }

    /// Builder-style header append.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(key, value);
        self
    }

    /// Builder-style body, stamping `content-length`.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.headers.set("content-length", self.body.len().to_string());
        self
    }

    /// Declared `content-length`, when present and well-formed.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }

    // Server frame constructors.

    pub fn connected(version: &str, session_id: &str, server: &str, heart_beat: &str) -> Frame {
        Frame::new(Command::Connected)
            .header("version", version)
            .header("session", session_id)
            .header("server", server)
            .header("heart-beat", heart_beat)
    }

    pub fn receipt(receipt_id: &str) -> Frame {
        Frame::new(Command::Receipt).header("receipt-id", receipt_id)
    }

    pub fn error(message: &str, detail: &str) -> Frame {
        Frame::new(Command::Error)
            .header("message", message)
            .header("content-type", "text/plain")
            .body(detail.as_bytes().to_vec())
    }

    // Client frame constructors, used by the gateway's own tests and by
    // embedders driving a gateway from Rust.

    pub fn connect(host: &str, heart_beat: &str) -> Frame {
        Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", heart_beat)
    }

    pub fn send(destination: &str, body: impl Into<Vec<u8>>) -> Frame {
        Frame::new(Command::Send)
            .header("destination", destination)
            .body(body)
    }

    pub fn subscribe(id: &str, destination: &str, ack_mode: &str) -> Frame {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", ack_mode)
    }

    pub fn unsubscribe(id: &str) -> Frame {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn ack(id: &str) -> Frame {
        Frame::new(Command::Ack).header("id", id)
    }

    pub fn nack(id: &str) -> Frame {
        Frame::new(Command::Nack).header("id", id)
    }

    pub fn disconnect(receipt_id: &str) -> Frame {
        Frame::new(Command::Disconnect).header("receipt", receipt_id)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        for (k, v) in self.headers.iter() {
            write!(f, " {k}:{v}")?;
        }
        write!(f, " ({} body bytes)", self.body.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_round_trip() {
        for token in [
            "CONNECT",
            "STOMP",
            "SEND",
            "SUBSCRIBE",
            "UNSUBSCRIBE",
            "ACK",
            "NACK",
            "BEGIN",
            "COMMIT",
            "ABORT",
            "DISCONNECT",
            "CONNECTED",
            "MESSAGE",
            "RECEIPT",
            "ERROR",
        ] {
            let command = Command::from_wire(token).unwrap();
            assert_eq!(command.as_str(), token);
        }
        assert_eq!(Command::from_wire("FLY"), None);
    }

    #[test]
    fn body_stamps_content_length() {
        let frame = Frame::send("/queue/orders", b"hello".to_vec());
        assert_eq!(frame.content_length(), Some(5));
    }

    #[test]
    fn connect_frames_skip_escaping() {
        assert!(!Command::Connect.uses_header_escapes());
        assert!(!Command::Connected.uses_header_escapes());
        assert!(Command::Send.uses_header_escapes());
    }
}
