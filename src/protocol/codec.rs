//! Envelope text codec
//!
//! Wire layout (header fields joined with `;`, body separated by `[-O-]`):
//!
//! ```text
//! <action>;<id>;<fromId>;<toId>;<subject1>,<subject2>,...[-O-]<json-body>
//! ```
//!
//! Encoding is total: any well-formed [`Envelope`] value flattens to a
//! frame. Decoding is permissive everywhere except the header structure:
//! a body that is not valid JSON or a subject list that is empty degrade
//! the envelope (fields defaulted) instead of failing the parse, but a
//! header that does not split into its five fields is unusable and is
//! reported to the caller.

use super::envelope::{Action, Envelope, BODY_SEPARATOR};

/// Number of `;`-separated fields in an envelope header.
const HEADER_FIELDS: usize = 5;

/// Hard decode failure: the header is structurally unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Header did not split into the expected five fields
    MalformedHeader {
        /// Number of fields actually found
        fields: usize,
    },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::MalformedHeader { fields } => write!(
                f,
                "envelope header has {} fields, expected {}",
                fields, HEADER_FIELDS
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Outcome of a successful decode
///
/// `body_degraded` distinguishes "the sender attached a body we could not
/// parse" from "there was no body"; callers that care (logging, metrics)
/// can tell the difference without the parse failing.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// The decoded envelope, with degraded fields defaulted
    pub envelope: Envelope,

    /// Body text was present but was not valid JSON
    pub body_degraded: bool,
}

/// Flatten an envelope to its wire frame.
pub fn encode(envelope: &Envelope) -> String {
    let subjects = envelope.subjects.join(",");
    let header = [
        envelope.action.as_wire(),
        envelope.id.as_str(),
        envelope.from_id.as_str(),
        envelope.to_id.as_str(),
        subjects.as_str(),
    ]
    .join(";");

    let body = match &envelope.body {
        Some(value) => value.to_string(),
        None => String::new(),
    };

    format!("{header}{BODY_SEPARATOR}{body}")
}

/// Parse a wire frame back into an envelope.
///
/// A missing body separator means the envelope simply has no body; extra
/// header fields beyond the fifth are ignored.
pub fn decode(raw: &str) -> Result<Decoded, DecodeError> {
    let (header, body_text) = match raw.split_once(BODY_SEPARATOR) {
        Some((header, body)) => (header, Some(body)),
        None => (raw, None),
    };

    let fields: Vec<&str> = header.split(';').collect();
    if fields.len() < HEADER_FIELDS {
        return Err(DecodeError::MalformedHeader {
            fields: fields.len(),
        });
    }

    // Empty segments are dropped so "" decodes to no subjects rather than
    // one empty subject.
    let subjects: Vec<String> = fields[4]
        .split(',')
        .filter(|subject| !subject.is_empty())
        .map(str::to_owned)
        .collect();

    let (body, body_degraded) = match body_text {
        None | Some("") => (None, false),
        Some(text) => match serde_json::from_str(text) {
            Ok(value) => (Some(value), false),
            Err(_) => (None, true),
        },
    };

    Ok(Decoded {
        envelope: Envelope {
            id: fields[1].to_owned(),
            from_id: fields[2].to_owned(),
            to_id: fields[3].to_owned(),
            subjects,
            body,
            action: Action::from_wire(fields[0]),
        },
        body_degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::envelope::ACTION_REGISTER;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let envelope = Envelope::data(
            "peer-a",
            "peer-b",
            vec!["orders".into(), "alerts".into()],
            json!({"price": 42, "note": "hi"}),
        );

        let decoded = decode(&encode(&envelope)).expect("decode");

        assert!(!decoded.body_degraded);
        assert_eq!(decoded.envelope.action, envelope.action);
        assert_eq!(decoded.envelope.id, envelope.id);
        assert_eq!(decoded.envelope.from_id, envelope.from_id);
        assert_eq!(decoded.envelope.to_id, envelope.to_id);
        assert_eq!(decoded.envelope.subjects, envelope.subjects);
        assert_eq!(decoded.envelope.body, envelope.body);
    }

    #[test]
    fn test_round_trip_register() {
        let envelope = Envelope::register("peer-a", vec!["orders".into()]);
        let frame = encode(&envelope);

        assert!(frame.starts_with(ACTION_REGISTER));

        let decoded = decode(&frame).expect("decode");
        assert!(decoded.envelope.action.is_register());
        assert!(decoded.envelope.body.is_none());
        assert!(!decoded.body_degraded);
    }

    #[test]
    fn test_wire_layout_is_exact() {
        let envelope = Envelope {
            id: "id-1".into(),
            from_id: "from-1".into(),
            to_id: "to-1".into(),
            subjects: vec!["x".into(), "y".into()],
            body: Some(json!(true)),
            action: Action::Data,
        };

        assert_eq!(encode(&envelope), ";id-1;from-1;to-1;x,y[-O-]true");
    }

    #[test]
    fn test_malformed_body_degrades_instead_of_failing() {
        let decoded = decode(";id-1;from-1;to-1;x,y[-O-]not-json").expect("decode");

        assert!(decoded.body_degraded);
        assert!(decoded.envelope.body.is_none());
        assert_eq!(
            decoded.envelope.subjects,
            vec!["x".to_string(), "y".to_string()]
        );
    }

    #[test]
    fn test_missing_separator_means_no_body() {
        let decoded = decode(";id-1;from-1;to-1;x").expect("decode");

        assert!(!decoded.body_degraded);
        assert!(decoded.envelope.body.is_none());
        assert_eq!(decoded.envelope.subjects, vec!["x".to_string()]);
    }

    #[test]
    fn test_empty_subjects_decode_to_none() {
        let decoded = decode(";id-1;from-1;to-1;[-O-]{}").expect("decode");
        assert!(decoded.envelope.subjects.is_empty());

        // Stray commas don't produce empty subjects either
        let decoded = decode(";id-1;from-1;to-1;x,,y,[-O-]{}").expect("decode");
        assert_eq!(
            decoded.envelope.subjects,
            vec!["x".to_string(), "y".to_string()]
        );
    }

    #[test]
    fn test_short_header_is_a_hard_failure() {
        let err = decode("id-1;from-1[-O-]{}").expect_err("short header");
        assert_eq!(err, DecodeError::MalformedHeader { fields: 2 });

        let err = decode("garbage").expect_err("no structure at all");
        assert!(matches!(err, DecodeError::MalformedHeader { fields: 1 }));
    }

    #[test]
    fn test_extra_header_fields_are_ignored() {
        let decoded = decode(";id-1;from-1;to-1;x;leftover[-O-]{}").expect("decode");

        assert_eq!(decoded.envelope.id, "id-1");
        // The fifth field is still the subjects segment
        assert_eq!(decoded.envelope.subjects, vec!["x".to_string()]);
    }

    #[test]
    fn test_unknown_action_decodes_as_data() {
        let decoded = decode("ACTION_BOGUS;id-1;from-1;to-1;x[-O-]1").expect("decode");
        assert_eq!(decoded.envelope.action, Action::Data);
    }

    #[test]
    fn test_absent_body_round_trips() {
        let mut envelope = Envelope::data("peer-a", "", vec!["x".into()], json!(null));
        envelope.body = None;

        let decoded = decode(&encode(&envelope)).expect("decode");
        assert!(decoded.envelope.body.is_none());
        assert!(!decoded.body_degraded);
    }
}
