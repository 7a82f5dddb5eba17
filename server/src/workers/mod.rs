pub mod email_send;
pub mod import;
pub mod template;

pub use email_send::{
    EmailSendHandler, EmailSendJobPayload, EmailTemplate, Recipient, SendService, Sender,
    EMAIL_JOB_NAME,
};
pub use import::{ImportHandler, ImportJobPayload, ImportRecord, ImportService, IMPORT_JOB_NAME};
