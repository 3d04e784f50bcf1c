use cogex_core::{Eye, GazePoint, Timestamp, TrackerTime};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("tracker link disconnected")]
    Disconnected,
    #[error("tracker link i/o: {0}")]
    Io(String),
    #[error("malformed tracker packet: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawTrackerKind {
    Sample {
        eye: Eye,
        point: GazePoint,
    },
    FixationStart {
        eye: Eye,
        point: GazePoint,
    },
    FixationUpdate {
        eye: Eye,
        average: GazePoint,
        start: TrackerTime,
    },
    FixationEnd {
        eye: Eye,
        average: GazePoint,
        start: TrackerTime,
    },
    Saccade {
        eye: Eye,
        from: GazePoint,
        to: GazePoint,
    },
    Blink {
        eye: Eye,
    },
    /// Message text echoed back by the tracker.
    Message(String),
}

/// Packet as received from the tracker, stamped in tracker time.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrackerEvent {
    pub time: TrackerTime,
    pub kind: RawTrackerKind,
}

/// Non-blocking transport to the eyetracker.
pub trait TrackerLink: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Everything received since the previous call.
    fn receive(&mut self) -> Result<Vec<RawTrackerEvent>, LinkError>;
}

impl<L: TrackerLink + ?Sized> TrackerLink for Box<L> {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        (**self).send(bytes)
    }

    fn receive(&mut self) -> Result<Vec<RawTrackerEvent>, LinkError> {
        (**self).receive()
    }
}

/// `MSG <seq> <local_ns> <label>`
pub fn encode_marker(seq: u64, local: Timestamp, label: &str) -> String {
    format!("MSG {seq} {} {label}", local.as_nanos())
}

/// Parses an echoed marker back into `(seq, local, label)`.
pub fn decode_marker_echo(text: &str) -> Option<(u64, Timestamp, String)> {
    let mut parts = text.splitn(4, ' ');
    if parts.next()? != "MSG" {
        return None;
    }
    let seq = parts.next()?.parse().ok()?;
    let local = parts.next()?.parse().ok().map(Timestamp::from_nanos)?;
    let label = parts.next().unwrap_or_default().to_string();
    Some((seq, local, label))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_text_round_trips_labels_with_spaces() {
        let text = encode_marker(7, Timestamp::from_nanos(1_234), "trial 12 onset");
        assert_eq!(text, "MSG 7 1234 trial 12 onset");
        assert_eq!(
            decode_marker_echo(&text),
            Some((7, Timestamp::from_nanos(1_234), "trial 12 onset".into()))
        );
    }

    #[test]
    fn foreign_messages_are_ignored() {
        assert_eq!(decode_marker_echo("!V IAREA RECTANGLE 1 0 0 1 1 a"), None);
        assert_eq!(decode_marker_echo("MSG x 1 a"), None);
        assert_eq!(
            decode_marker_echo("MSG 1 2"),
            Some((1, Timestamp::from_nanos(2), String::new()))
        );
    }
}
