//! Wire messages exchanged with clients.
//!
//! Every frame is one JSON object. Client frames carry a `responseType`
//! discriminator and, depending on the type, a `response` payload:
//!
//! | responseType   | response                  |
//! |----------------|---------------------------|
//! | `request`      | list of environment names |
//! | `request_hash` | (none)                    |
//! | `submit_hash`  | hashcash proof            |
//! | `submit_work`  | solution value            |
//!
//! A `request` without environments asks for a challenge, the same as
//! `request_hash`.
//!
//! Server frames are one of:
//!
//! ```text
//! {"responseType": "file",        "response": [url, environment]}
//! {"responseType": "submit_hash", "response": [nonce, difficulty]}
//! {"responseType": "submit_work", "work": payload}
//! {"error": message}
//! ```

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Reply sent when a valid request finds nothing to hand out.
pub const NO_WORK_AVAILABLE: &str = "No work available";

/// Reply sent when none of the client's environments has a file.
pub const NO_MATCHING_ENVIRONMENT: &str = "No file available for the given environments";

/// Reply sent while the admission gate holds the connection.
pub const WAITING_FOR_USERS: &str = "Waiting for more users";

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Ask for the worker file for one of these environments
    Request { environments: Vec<String> },
    /// Ask for a hashcash challenge
    RequestHash,
    /// Answer the outstanding challenge
    SubmitHash { proof: String },
    /// Solution for the held work item
    SubmitWork { solution: Value },
}

/// Ways a client frame can break the protocol.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolViolation {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown responseType {0:?}")]
    UnknownType(String),

    #[error("{0} requires a response field")]
    MissingResponse(&'static str),

    #[error("{message} is not allowed while {state}")]
    WrongStage {
        message: &'static str,
        state: &'static str,
    },

    #[error("undecodable payload: {0}")]
    Undecodable(String),

    #[error("hashcash proof rejected")]
    VerificationFailed,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    response_type: String,
    #[serde(default)]
    response: Option<Value>,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolViolation> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;
        let response = envelope.response.filter(|r| !r.is_null());

        match envelope.response_type.as_str() {
            "request" => match response {
                None => Ok(ClientMessage::RequestHash),
                Some(Value::Array(items)) if items.is_empty() => Ok(ClientMessage::RequestHash),
                Some(Value::Array(items)) => {
                    let environments = items
                        .into_iter()
                        .map(|item| match item {
                            Value::String(s) => Ok(s),
                            other => Err(ProtocolViolation::Undecodable(format!(
                                "environment {} is not a string",
                                other
                            ))),
                        })
                        .collect::<Result<_, _>>()?;
                    Ok(ClientMessage::Request { environments })
                }
                Some(Value::String(environment)) => Ok(ClientMessage::Request {
                    environments: vec![environment],
                }),
                Some(other) => Err(ProtocolViolation::Undecodable(format!(
                    "environments must be a list, got {}",
                    other
                ))),
            },
            "request_hash" => Ok(ClientMessage::RequestHash),
            "submit_hash" => match response {
                Some(Value::String(proof)) => Ok(ClientMessage::SubmitHash { proof }),
                Some(Value::Number(n)) => Ok(ClientMessage::SubmitHash {
                    proof: n.to_string(),
                }),
                Some(other) => Err(ProtocolViolation::Undecodable(format!(
                    "proof must be a string, got {}",
                    other
                ))),
                None => Err(ProtocolViolation::MissingResponse("submit_hash")),
            },
            "submit_work" => match response {
                Some(solution) => Ok(ClientMessage::SubmitWork { solution }),
                None => Err(ProtocolViolation::MissingResponse("submit_work")),
            },
            other => Err(ProtocolViolation::UnknownType(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::Request { .. } => "request",
            ClientMessage::RequestHash => "request_hash",
            ClientMessage::SubmitHash { .. } => "submit_hash",
            ClientMessage::SubmitWork { .. } => "submit_work",
        }
    }

    pub fn to_text(&self) -> String {
        let value = match self {
            ClientMessage::Request { environments } => {
                json!({"responseType": "request", "response": environments})
            }
            ClientMessage::RequestHash => json!({"responseType": "request_hash"}),
            ClientMessage::SubmitHash { proof } => {
                json!({"responseType": "submit_hash", "response": proof})
            }
            ClientMessage::SubmitWork { solution } => {
                json!({"responseType": "submit_work", "response": solution})
            }
        };
        value.to_string()
    }
}

/// A server frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    File { url: String, environment: String },
    Challenge { nonce: String, difficulty: u32 },
    Work { payload: Value },
    Error { error: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            error: message.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ServerMessage::File { url, environment } => {
                json!({"responseType": "file", "response": [url, environment]})
            }
            ServerMessage::Challenge { nonce, difficulty } => {
                json!({"responseType": "submit_hash", "response": [nonce, difficulty]})
            }
            ServerMessage::Work { payload } => {
                json!({"responseType": "submit_work", "work": payload})
            }
            ServerMessage::Error { error } => json!({ "error": error }),
        }
    }

    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }
}

/// What the server asks a connection's transport to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Send(ServerMessage),
    Close { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        assert_eq!(
            ClientMessage::parse(r#"{"responseType":"request","response":["node","python"]}"#),
            Ok(ClientMessage::Request {
                environments: vec!["node".into(), "python".into()]
            })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"responseType":"request"}"#),
            Ok(ClientMessage::RequestHash)
        );
        assert_eq!(
            ClientMessage::parse(r#"{"responseType":"request_hash","response":null}"#),
            Ok(ClientMessage::RequestHash)
        );
    }

    #[test]
    fn test_parse_submissions() {
        assert_eq!(
            ClientMessage::parse(r#"{"responseType":"submit_hash","response":"1234"}"#),
            Ok(ClientMessage::SubmitHash {
                proof: "1234".into()
            })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"responseType":"submit_hash","response":99}"#),
            Ok(ClientMessage::SubmitHash { proof: "99".into() })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"responseType":"submit_work","response":{"steps":[1,2]}}"#),
            Ok(ClientMessage::SubmitWork {
                solution: json!({"steps": [1, 2]})
            })
        );
    }

    #[test]
    fn test_parse_violations() {
        assert!(matches!(
            ClientMessage::parse("not json"),
            Err(ProtocolViolation::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::parse("[1,2,3]"),
            Err(ProtocolViolation::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"response":1}"#),
            Err(ProtocolViolation::Malformed(_))
        ));
        assert_eq!(
            ClientMessage::parse(r#"{"responseType":"dance"}"#),
            Err(ProtocolViolation::UnknownType("dance".into()))
        );
        assert_eq!(
            ClientMessage::parse(r#"{"responseType":"submit_work"}"#),
            Err(ProtocolViolation::MissingResponse("submit_work"))
        );
        assert!(matches!(
            ClientMessage::parse(r#"{"responseType":"submit_hash","response":[1]}"#),
            Err(ProtocolViolation::Undecodable(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"responseType":"request","response":[1]}"#),
            Err(ProtocolViolation::Undecodable(_))
        ));
    }

    #[test]
    fn test_client_text_parses_back() {
        let messages = [
            ClientMessage::Request {
                environments: vec!["node".into()],
            },
            ClientMessage::RequestHash,
            ClientMessage::SubmitHash { proof: "7".into() },
            ClientMessage::SubmitWork {
                solution: json!([1, "two"]),
            },
        ];
        for message in messages {
            assert_eq!(ClientMessage::parse(&message.to_text()), Ok(message));
        }
    }

    #[test]
    fn test_server_shapes() {
        let file = ServerMessage::File {
            url: "https://example.com/w.js".into(),
            environment: "node".into(),
        };
        assert_eq!(
            file.to_value(),
            json!({"responseType": "file", "response": ["https://example.com/w.js", "node"]})
        );
        assert_eq!(
            ServerMessage::Challenge {
                nonce: "ab".into(),
                difficulty: 3
            }
            .to_value(),
            json!({"responseType": "submit_hash", "response": ["ab", 3]})
        );
        assert_eq!(
            ServerMessage::Work { payload: json!(5) }.to_value(),
            json!({"responseType": "submit_work", "work": 5})
        );
        assert_eq!(
            ServerMessage::error(NO_WORK_AVAILABLE).to_value(),
            json!({"error": "No work available"})
        );
    }
}
