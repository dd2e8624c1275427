pub mod retry_event;
pub mod token;

pub use retry_event::{LoggedRequest, LoggedResponse, REDACTED_HEADER_VALUE, RetryEvent};
pub use token::{MetadataToken, TokenGrant};
