use crate::status::Status;
use crate::status_code::status_code_t;

/// Result type of every collaborator call, with [`Status`] as the error.
pub type Result<T> = std::result::Result<T, Status>;

pub type Void = ();

pub fn make_error<T>(code: status_code_t) -> Result<T> {
    Err(Status::new(code))
}

pub fn make_error_msg<T>(code: status_code_t, msg: impl Into<String>) -> Result<T> {
    Err(Status::with_message(code, msg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status_code::{NamespaceCode, StatusCode};

    #[test]
    fn test_make_error() {
        let r: Result<Void> = make_error(NamespaceCode::EXISTS);
        assert_eq!(r.unwrap_err().code(), NamespaceCode::EXISTS);
    }

    #[test]
    fn test_make_error_msg() {
        let err = make_error_msg::<u32>(StatusCode::INVALID_ARG, "bad mode").unwrap_err();
        assert_eq!(err.message(), Some("bad mode"));
    }
}
