//! JSON shapes exchanged with external sources.

use serde::{Deserialize, Serialize};

use super::{Attachment, EventTime, MessageKind, Ticket};

fn is_empty(s: &str) -> bool {
    s.is_empty()
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// Inbound ticket request as submitted by a source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TicketRequest {
    pub source: String,
    pub customer_internal_id: String,
    pub id_channel_operator: String,
    pub description: String,
    pub start_time_string: String,
    pub start_time_ts: i64,
    pub event_time: String,
    pub event_time_timestamp: i64,
    pub problem_type: String,
    pub file_name: String,
    pub file: String,
    pub tt_number: String,
    pub status: String,
    pub comment: String,
    pub user: String,
}

impl TicketRequest {
    /// Builds the outbound event for this request.
    pub fn to_ticket(&self, kind: MessageKind, billing_channel: &str) -> Ticket {
        Ticket {
            kind,
            customer_id: self.customer_internal_id.clone(),
            operator_channel: self.id_channel_operator.clone(),
            billing_channel: billing_channel.to_string(),
            description: self.description.clone(),
            classification: self.problem_type.clone(),
            attachment: Attachment::from_parts(self.file_name.clone(), self.file.clone()),
            operator_ticket_id: self.tt_number.clone(),
            status: self.status.clone(),
            comment: self.comment.clone(),
            user: self.user.clone(),
            start: EventTime::new(self.start_time_ts, self.start_time_string.clone()),
            event: EventTime::new(self.event_time_timestamp, self.event_time.clone()),
        }
    }
}

/// Event forwarded to the source that originated a ticket.
///
/// Attachment payloads are never forwarded, only their names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketEventDto {
    #[serde(default, skip_serializing_if = "is_empty")]
    pub source: String,
    pub message_type: MessageKind,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub customer_internal_id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub tt_for_billing: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub id_channel_operator: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub start_time_string: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub start_time_ts: i64,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub event_time: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub event_time_timestamp: i64,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub problem_type: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub tt_number: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub comment: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub user: String,
}

impl TicketEventDto {
    pub fn from_ticket(ticket: &Ticket, source: &str) -> Self {
        Self {
            source: source.to_string(),
            message_type: ticket.kind,
            customer_internal_id: ticket.customer_id.clone(),
            tt_for_billing: ticket.billing_channel.clone(),
            id_channel_operator: ticket.operator_channel.clone(),
            description: ticket.description.clone(),
            start_time_string: ticket.start.display.clone(),
            start_time_ts: ticket.start.epoch,
            event_time: ticket.event.display.clone(),
            event_time_timestamp: ticket.event.epoch,
            problem_type: ticket.classification.clone(),
            file_name: ticket
                .attachment
                .as_ref()
                .map(|a| a.name.clone())
                .unwrap_or_default(),
            tt_number: ticket.operator_ticket_id.clone(),
            status: ticket.status.clone(),
            comment: ticket.comment.clone(),
            user: ticket.user.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserialize_partial() {
        let json = r#"{"customer_internal_id":"C1","id_channel_operator":"ABC1234-q"}"#;
        let request: TicketRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.customer_internal_id, "C1");
        assert!(request.description.is_empty());
        assert_eq!(request.start_time_ts, 0);
    }

    #[test]
    fn test_request_to_ticket() {
        let request = TicketRequest {
            customer_internal_id: "C1".to_string(),
            id_channel_operator: "ABC1234-q".to_string(),
            description: "down".to_string(),
            start_time_string: "today".to_string(),
            start_time_ts: 42,
            file_name: "trace.log".to_string(),
            file: "ZGF0YQ==".to_string(),
            ..Default::default()
        };
        let ticket = request.to_ticket(MessageKind::Create, "KRUS");
        assert_eq!(ticket.billing_channel, "KRUS");
        assert_eq!(ticket.start, EventTime::new(42, "today"));
        assert_eq!(ticket.attachment.unwrap().payload, "ZGF0YQ==");
    }

    #[test]
    fn test_event_dto_omits_empty_fields_and_payload() {
        let mut ticket = Ticket::new(MessageKind::Create, "C1");
        ticket.status = "error".to_string();
        ticket.attachment = Some(Attachment {
            name: "a.txt".to_string(),
            payload: "secret".to_string(),
        });

        let json = serde_json::to_value(TicketEventDto::from_ticket(&ticket, "sberapi")).unwrap();
        assert_eq!(json["message_type"], "create");
        assert_eq!(json["source"], "sberapi");
        assert_eq!(json["status"], "error");
        assert_eq!(json["file_name"], "a.txt");
        assert!(json.get("description").is_none());
        assert!(json.get("start_time_ts").is_none());
        assert!(!json.to_string().contains("secret"));
    }
}
