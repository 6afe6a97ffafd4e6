pub mod access;
pub mod file;
pub mod link;
pub mod mime;
pub mod window;

pub use access::{
    AccessLogEntry, AccessType, MAX_CLIENT_ADDRESS_LEN, MAX_USER_AGENT_LEN,
    anonymize_client_address, truncate_user_agent,
};
pub use file::{BackendIndex, BackendLocators, FileRecord, NewFile};
pub use link::LinkRecord;
pub use mime::{Disposition, guess_mime_type, mime_extension};
pub use window::WindowKind;
