pub mod submission;

pub use submission::{
    MAX_ATTACHMENTS, MAX_CONTENT_CHARS, MessageSubmission, SendMessageRequest, content_type_for,
};
