/// Numeric status code carried by [`crate::Status`].
#[allow(non_camel_case_types)]
pub type status_code_t = u16;

/// Common status codes (0-999).
pub mod StatusCode {
    use super::status_code_t;

    pub const OK: status_code_t = 0;
    pub const NOT_IMPLEMENTED: status_code_t = 1;
    pub const DATA_CORRUPTION: status_code_t = 2;
    pub const INVALID_ARG: status_code_t = 3;
    pub const INVALID_CONFIG: status_code_t = 4;
    pub const CONFIG_PARSE_ERROR: status_code_t = 71;
    pub const IO_ERROR: status_code_t = 69;
    pub const FAULT_INJECTION: status_code_t = 70;
    pub const FOUND_BUG: status_code_t = 998;
    pub const UNKNOWN: status_code_t = 999;
}

/// RPC transport status codes (2xxx).
///
/// `CONNECT_FAILED` and `SEND_FAILED` mean the request never left the
/// client. `TIMEOUT` and `SOCKET_CLOSED` mean it may have been executed.
pub mod RPCCode {
    use super::status_code_t;

    pub const TIMEOUT: status_code_t = 2005;
    pub const INVALID_ADDR: status_code_t = 2006;
    pub const SEND_FAILED: status_code_t = 2007;
    pub const REQUEST_REFUSED: status_code_t = 2012;
    pub const SOCKET_CLOSED: status_code_t = 2013;
    pub const CONNECT_FAILED: status_code_t = 2014;
}

/// Namespace status codes (3xxx) returned by metadata targets.
pub mod NamespaceCode {
    use super::status_code_t;

    pub const NOT_FOUND: status_code_t = 3000;
    pub const NOT_EMPTY: status_code_t = 3001;
    pub const NOT_DIRECTORY: status_code_t = 3003;
    pub const IS_DIRECTORY: status_code_t = 3006;
    pub const EXISTS: status_code_t = 3007;
    pub const NO_PERMISSION: status_code_t = 3008;
    pub const INCONSISTENT: status_code_t = 3009;
    pub const STALE_MAPPING: status_code_t = 3010;
    pub const INVALID_LAYOUT: status_code_t = 3013;
    pub const NAME_TOO_LONG: status_code_t = 3017;
    pub const BUSY: status_code_t = 3019;
    pub const TARGET_UNAVAILABLE: status_code_t = 3020;
    pub const FOUND_BUG: status_code_t = 3999;
}

/// Distributed lock status codes (4xxx).
pub mod LockCode {
    use super::status_code_t;

    pub const CONFLICT: status_code_t = 4000;
    pub const TIMEOUT: status_code_t = 4001;
    pub const CANCELED: status_code_t = 4002;
    pub const UNKNOWN_OWNER: status_code_t = 4003;
    pub const UNKNOWN_LOCK: status_code_t = 4004;
}

/// Data-object store status codes (5xxx).
pub mod DataObjectCode {
    use super::status_code_t;

    pub const OBJECT_NOT_FOUND: status_code_t = 5000;
    pub const DESTROY_FAILED: status_code_t = 5001;
}

/// Broad category of a status code, derived from its numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCodeType {
    Common,
    RPC,
    Namespace,
    Lock,
    DataObject,
    Invalid,
}

pub fn type_of(code: status_code_t) -> StatusCodeType {
    match code {
        0..=999 => StatusCodeType::Common,
        2000..=2999 => StatusCodeType::RPC,
        3000..=3999 => StatusCodeType::Namespace,
        4000..=4999 => StatusCodeType::Lock,
        5000..=5999 => StatusCodeType::DataObject,
        _ => StatusCodeType::Invalid,
    }
}

/// Human-readable name of a status code, prefixed by its module.
pub fn to_string(code: status_code_t) -> &'static str {
    match code {
        StatusCode::OK => "OK",
        StatusCode::NOT_IMPLEMENTED => "NotImplemented",
        StatusCode::DATA_CORRUPTION => "DataCorruption",
        StatusCode::INVALID_ARG => "InvalidArg",
        StatusCode::INVALID_CONFIG => "InvalidConfig",
        StatusCode::CONFIG_PARSE_ERROR => "ConfigParseError",
        StatusCode::IO_ERROR => "IOError",
        StatusCode::FAULT_INJECTION => "FaultInjection",
        StatusCode::FOUND_BUG => "FoundBug",
        StatusCode::UNKNOWN => "Unknown",

        RPCCode::TIMEOUT => "RPC::Timeout",
        RPCCode::INVALID_ADDR => "RPC::InvalidAddr",
        RPCCode::SEND_FAILED => "RPC::SendFailed",
        RPCCode::REQUEST_REFUSED => "RPC::RequestRefused",
        RPCCode::SOCKET_CLOSED => "RPC::SocketClosed",
        RPCCode::CONNECT_FAILED => "RPC::ConnectFailed",

        NamespaceCode::NOT_FOUND => "Namespace::NotFound",
        NamespaceCode::NOT_EMPTY => "Namespace::NotEmpty",
        NamespaceCode::NOT_DIRECTORY => "Namespace::NotDirectory",
        NamespaceCode::IS_DIRECTORY => "Namespace::IsDirectory",
        NamespaceCode::EXISTS => "Namespace::Exists",
        NamespaceCode::NO_PERMISSION => "Namespace::NoPermission",
        NamespaceCode::INCONSISTENT => "Namespace::Inconsistent",
        NamespaceCode::STALE_MAPPING => "Namespace::StaleMapping",
        NamespaceCode::INVALID_LAYOUT => "Namespace::InvalidLayout",
        NamespaceCode::NAME_TOO_LONG => "Namespace::NameTooLong",
        NamespaceCode::BUSY => "Namespace::Busy",
        NamespaceCode::TARGET_UNAVAILABLE => "Namespace::TargetUnavailable",
        NamespaceCode::FOUND_BUG => "Namespace::FoundBug",

        LockCode::CONFLICT => "Lock::Conflict",
        LockCode::TIMEOUT => "Lock::Timeout",
        LockCode::CANCELED => "Lock::Canceled",
        LockCode::UNKNOWN_OWNER => "Lock::UnknownOwner",
        LockCode::UNKNOWN_LOCK => "Lock::UnknownLock",

        DataObjectCode::OBJECT_NOT_FOUND => "DataObject::ObjectNotFound",
        DataObjectCode::DESTROY_FAILED => "DataObject::DestroyFailed",

        _ => "UnknownStatusCode",
    }
}
