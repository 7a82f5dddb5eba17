pub mod api_key;
pub mod import;
pub mod lead;
pub mod progress_record;
pub mod send;
