use std::fmt;

use crate::status_code::{self, status_code_t, StatusCode, StatusCodeType};

/// Error value returned by every remote collaborator: a numeric code plus an
/// optional message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct Status {
    code: status_code_t,
    message: Option<String>,
}

impl Status {
    pub fn new(code: status_code_t) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(code: status_code_t, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(msg.into()),
        }
    }

    pub fn code(&self) -> status_code_t {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::OK
    }

    pub fn kind(&self) -> StatusCodeType {
        status_code::type_of(self.code)
    }

    /// `"Namespace::NotFound(3000) no such entry"` style description.
    pub fn describe(&self) -> String {
        let name = status_code::to_string(self.code);
        match &self.message {
            Some(msg) => format!("{}({}) {}", name, self.code, msg),
            None => format!("{}({})", name, self.code),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for Status {}

impl From<status_code_t> for Status {
    fn from(code: status_code_t) -> Self {
        Self::new(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::{NamespaceCode, RPCCode};

    #[test]
    fn test_status_describe() {
        let s = Status::with_message(NamespaceCode::NOT_FOUND, "no such entry");
        assert_eq!(s.code(), 3000);
        assert_eq!(s.message(), Some("no such entry"));
        assert_eq!(s.describe(), "Namespace::NotFound(3000) no such entry");
        assert_eq!(Status::new(RPCCode::TIMEOUT).to_string(), "RPC::Timeout(2005)");
    }

    #[test]
    fn test_status_kind() {
        assert_eq!(Status::new(RPCCode::SEND_FAILED).kind(), StatusCodeType::RPC);
        assert!(Status::new(StatusCode::OK).is_ok());
    }

    #[test]
    fn test_status_as_error() {
        let s: Status = StatusCode::INVALID_ARG.into();
        let e: &dyn std::error::Error = &s;
        assert!(e.to_string().starts_with("InvalidArg"));
    }
}
