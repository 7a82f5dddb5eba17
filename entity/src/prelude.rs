pub use super::api_key::Entity as ApiKey;
pub use super::api_key_audit::Entity as ApiKeyAudit;
pub use super::campaign_send::Entity as CampaignSend;
pub use super::contact_import::Entity as ContactImport;
pub use super::email_delivery::Entity as EmailDelivery;
pub use super::import_batch::Entity as ImportBatch;
pub use super::lead::Entity as Lead;
pub use super::progress_record::Entity as ProgressRecord;
pub use super::send_batch::Entity as SendBatch;
