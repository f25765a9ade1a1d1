//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;

use cronvisor_core::error::AppError;

/// RPC Error Codes
pub mod code {
    pub const CONFIG_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const ALREADY_RUNNING: i32 = 4002;
    pub const INVALID_STATE: i32 = 4003;
    pub const LAUNCH_FAILURE: i32 = 4004;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SYSTEM_ERROR: i32 = 5002;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let (code, message) = match &err {
        AppError::Config(e) => (code::CONFIG_ERROR, e.to_string()),
        AppError::Domain(e) => (code::INVALID_STATE, e.to_string()),
        AppError::NotFound(name) => (code::NOT_FOUND, format!("job {} not found", name)),
        AppError::AlreadyRunning(name) => {
            (code::ALREADY_RUNNING, format!("job {} is already running", name))
        }
        AppError::InvalidState(msg) => (code::INVALID_STATE, msg.clone()),
        AppError::Launch(e) => (code::LAUNCH_FAILURE, e.to_string()),
        AppError::Io(e) => (code::SYSTEM_ERROR, e.to_string()),
        AppError::Serialization(e) => (code::INTERNAL_ERROR, e.to_string()),
        AppError::Stopped(name) => {
            (code::INVALID_STATE, format!("supervisor for {} has stopped", name))
        }
        AppError::Internal(msg) => (code::INTERNAL_ERROR, msg.clone()),
    };
    ErrorObjectOwned::owned(code, message, None::<()>)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_running_maps_to_conflict_code() {
        let err = to_rpc_error(AppError::AlreadyRunning("job".to_string()));
        assert_eq!(err.code(), code::ALREADY_RUNNING);
    }

    #[test]
    fn not_found_maps_to_not_found_code() {
        let err = to_rpc_error(AppError::NotFound("job".to_string()));
        assert_eq!(err.code(), code::NOT_FOUND);
    }
}
