//! Request decoding, dispatch and response serialization.
//!
//! Every request is a JSON object whose `action` string selects a [`Request`]
//! variant. Unknown or missing actions decode to `None` and are dropped
//! without a reply.

use crate::error::ServerError;
use serde::Serialize;
use serde_json::Value;

/// Request completed successfully.
pub const STATUS_OK: u16 = 200;
/// Request was refused.
pub const STATUS_FORBIDDEN: u16 = 403;

/// Decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `{"action": "login", "username": ..., "password": ...}`
    Login(LoginRequest),
}

impl Request {
    /// Decodes a request from a JSON value.
    ///
    /// Returns `None` when the value is not an object, has no string `action`,
    /// or names an action that is not known.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        let action = value.as_object()?.get("action")?.as_str()?;
        match action {
            LoginRequest::ACTION => Some(Self::Login(LoginRequest::from_json(value))),
            _ => None,
        }
    }

    /// The `action` discriminator of this request.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Login(_) => LoginRequest::ACTION,
        }
    }

    /// Executes the request and produces its response.
    #[must_use]
    pub fn handle(self) -> Response {
        match self {
            Self::Login(login) => login.handle(),
        }
    }
}

/// Stub login request. Any non-empty credentials are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginRequest {
    /// Supplied username, empty when absent.
    pub username: String,
    /// Supplied password, empty when absent.
    pub password: String,
}

impl LoginRequest {
    /// Action string for login requests.
    pub const ACTION: &'static str = "login";

    fn from_json(value: &Value) -> Self {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            username: field("username"),
            password: field("password"),
        }
    }

    fn handle(self) -> Response {
        if self.username.is_empty() || self.password.is_empty() {
            Response::error(Self::ACTION, STATUS_FORBIDDEN, "Invalid username or password")
        } else {
            Response::ok(Self::ACTION, "Login successful")
        }
    }
}

/// Response detail carried next to the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Detail {
    /// Success message, serialized as `msg`.
    Msg(String),
    /// Failure reason, serialized as `error`.
    Error(String),
}

/// Response to a dispatched request.
///
/// Serializes as `{"action": ..., "status": ..., "msg"|"error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    /// Action of the request being answered.
    pub action: &'static str,
    /// Numeric outcome.
    pub status: u16,
    /// Message or error text.
    #[serde(flatten)]
    pub detail: Detail,
}

impl Response {
    /// Successful response with a message.
    #[must_use]
    pub fn ok(action: &'static str, msg: impl Into<String>) -> Self {
        Self {
            action,
            status: STATUS_OK,
            detail: Detail::Msg(msg.into()),
        }
    }

    /// Failed response with an error reason.
    #[must_use]
    pub fn error(action: &'static str, status: u16, error: impl Into<String>) -> Self {
        Self {
            action,
            status,
            detail: Detail::Error(error.into()),
        }
    }

    /// Serializes the response to its wire bytes.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ServerError> {
        encode(self)
    }
}

/// Serializes an outbound message as compact JSON.
///
/// # Errors
/// Returns [`ServerError::Encode`] if the value cannot be represented as JSON.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ServerError> {
    Ok(serde_json::to_vec(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dispatch(value: Value) -> Option<Value> {
        Request::from_json(&value)
            .map(Request::handle)
            .map(|r| serde_json::to_value(r).expect("serializable"))
    }

    #[test]
    fn test_login_success() {
        let out = dispatch(json!({"action": "login", "username": "u", "password": "p"}));
        assert_eq!(
            out,
            Some(json!({"action": "login", "status": 200, "msg": "Login successful"}))
        );
    }

    #[test]
    fn test_login_missing_fields() {
        let out = dispatch(json!({"action": "login"}));
        assert_eq!(
            out,
            Some(json!({"action": "login", "status": 403, "error": "Invalid username or password"}))
        );
    }

    #[test]
    fn test_login_empty_password() {
        let out = dispatch(json!({"action": "login", "username": "u", "password": ""}))
            .expect("login decodes");
        assert_eq!(out["status"], 403);
        assert!(out.get("msg").is_none());
    }

    #[test]
    fn test_login_non_string_fields_are_empty() {
        let request = Request::from_json(&json!({"action": "login", "username": 5, "password": "p"}))
            .expect("login decodes");
        assert_eq!(
            request,
            Request::Login(LoginRequest {
                username: String::new(),
                password: "p".to_string(),
            })
        );
    }

    #[test]
    fn test_unknown_action_is_dropped() {
        assert!(dispatch(json!({"action": "ping"})).is_none());
    }

    #[test]
    fn test_missing_or_non_string_action_is_dropped() {
        assert!(dispatch(json!({"username": "u"})).is_none());
        assert!(dispatch(json!({"action": 1})).is_none());
        assert!(dispatch(json!(["login"])).is_none());
        assert!(dispatch(json!("login")).is_none());
    }

    #[test]
    fn test_action_discriminator() {
        let request = Request::Login(LoginRequest::default());
        assert_eq!(request.action(), "login");
    }

    #[test]
    fn test_response_field_order() {
        let bytes = Response::ok("login", "Login successful")
            .to_bytes()
            .expect("serializable");
        assert_eq!(
            String::from_utf8(bytes).expect("utf8"),
            r#"{"action":"login","status":200,"msg":"Login successful"}"#
        );
    }

    #[test]
    fn test_encode_failure_is_a_server_error() {
        let mut unencodable = std::collections::BTreeMap::new();
        unencodable.insert((1u8, 2u8), 3u8);
        assert!(matches!(encode(&unencodable), Err(ServerError::Encode(_))));
    }
}
