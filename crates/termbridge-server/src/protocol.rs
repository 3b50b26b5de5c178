//! Client-to-server wire protocol. One JSON object per text frame, tagged
//! by `event`. Fields are optional so missing values can be reported back
//! as validation errors instead of parse failures.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Connect,

    #[serde(rename_all = "camelCase")]
    Command {
        session_id: Option<String>,
        task_id: Option<String>,
        command: Option<String>,
        rows: Option<u16>,
        cols: Option<u16>,
    },

    #[serde(rename_all = "camelCase")]
    Input {
        session_id: Option<String>,
        task_id: Option<String>,
        #[serde(default)]
        data: String,
    },

    #[serde(rename_all = "camelCase")]
    Resize {
        session_id: Option<String>,
        task_id: Option<String>,
        rows: Option<u16>,
        cols: Option<u16>,
    },

    #[serde(rename_all = "camelCase")]
    Interrupt {
        session_id: Option<String>,
        task_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Disconnect { session_id: Option<String> },

    Health,

    #[serde(rename_all = "camelCase")]
    Tasks { session_id: Option<String> },
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Command { .. } => "command",
            Self::Input { .. } => "input",
            Self::Resize { .. } => "resize",
            Self::Interrupt { .. } => "interrupt",
            Self::Disconnect { .. } => "disconnect",
            Self::Health => "health",
            Self::Tasks { .. } => "tasks",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_camel_case_fields() {
        let event = ClientEvent::parse(
            r#"{"event":"command","sessionId":"S1","taskId":"T1","command":"echo hi","rows":24,"cols":80}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::Command {
                session_id: Some("S1".into()),
                task_id: Some("T1".into()),
                command: Some("echo hi".into()),
                rows: Some(24),
                cols: Some(80),
            }
        );
    }

    #[test]
    fn optional_fields_may_be_missing() {
        let event = ClientEvent::parse(r#"{"event":"command","sessionId":"S1"}"#).unwrap();
        assert!(matches!(
            event,
            ClientEvent::Command { task_id: None, command: None, rows: None, .. }
        ));

        let event = ClientEvent::parse(r#"{"event":"input","sessionId":"S1","taskId":"T1"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Input { ref data, .. } if data.is_empty()));
    }

    #[test]
    fn parses_unit_events() {
        assert_eq!(ClientEvent::parse(r#"{"event":"connect"}"#).unwrap(), ClientEvent::Connect);
        assert_eq!(ClientEvent::parse(r#"{"event":"health"}"#).unwrap().name(), "health");
    }

    #[test]
    fn rejects_unknown_event() {
        assert!(ClientEvent::parse(r#"{"event":"reboot"}"#).is_err());
        assert!(ClientEvent::parse("not json").is_err());
    }
}
