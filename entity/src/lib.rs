pub mod prelude;

pub mod api_key;
pub mod api_key_audit;
pub mod campaign_send;
pub mod contact_import;
pub mod email_delivery;
pub mod import_batch;
pub mod lead;
pub mod progress_record;
pub mod send_batch;
