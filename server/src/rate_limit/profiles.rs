use strum::{Display, EnumIter, EnumString};

/// Closed set of rate-limit configurations. Every identifier is checked
/// against exactly one profile; an unrecognized name degrades to
/// [`RateLimitProfile::ApiStandard`] instead of failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitProfile {
    AuthStrict,
    AuthNormal,
    ApiStandard,
    ApiHeavy,
    ApiBurst,
    EmailSending,
    EmailBurst,
    CampaignCreation,
    CampaignSending,
    DataImport,
    DataExport,
    AnalyticsHeavy,
    PublicApiIp,
    WebhookProcessing,
}

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 3_600_000;

impl RateLimitProfile {
    /// Never fails; unknown names proceed under the standard API budget.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or(RateLimitProfile::ApiStandard)
    }

    pub fn window_ms(self) -> u64 {
        use RateLimitProfile::*;
        match self {
            AuthStrict | AuthNormal => 15 * MINUTE_MS,
            ApiStandard | ApiHeavy | EmailSending | CampaignCreation | CampaignSending
            | DataImport | DataExport | AnalyticsHeavy | PublicApiIp => HOUR_MS,
            ApiBurst | EmailBurst | WebhookProcessing => MINUTE_MS,
        }
    }

    pub fn max(self) -> u32 {
        use RateLimitProfile::*;
        match self {
            AuthStrict => 5,
            AuthNormal => 10,
            ApiStandard => 1_000,
            ApiHeavy => 200,
            ApiBurst => 100,
            EmailSending => 1_000,
            EmailBurst => 50,
            CampaignCreation => 100,
            CampaignSending => 10,
            DataImport => 5,
            DataExport => 10,
            AnalyticsHeavy => 100,
            PublicApiIp => 10_000,
            WebhookProcessing => 1_000,
        }
    }

    pub fn message(self) -> &'static str {
        use RateLimitProfile::*;
        match self {
            AuthStrict | AuthNormal => "Too many authentication attempts, please try again later",
            EmailSending | EmailBurst => "Email sending limit reached, please slow down",
            CampaignCreation => "Campaign creation limit reached for this hour",
            CampaignSending => "Campaign sending limit reached for this hour",
            DataImport => "Import limit reached, please try again later",
            DataExport => "Export limit reached, please try again later",
            AnalyticsHeavy => "Analytics query limit reached, please try again later",
            WebhookProcessing => "Webhook rate limit exceeded",
            _ => "Too many requests, please try again later",
        }
    }

    /// Key prefix inside the `rl:` namespace.
    pub fn prefix(self) -> &'static str {
        use RateLimitProfile::*;
        match self {
            AuthStrict => "auth_strict",
            AuthNormal => "auth_normal",
            ApiStandard => "api_standard",
            ApiHeavy => "api_heavy",
            ApiBurst => "api_burst",
            EmailSending => "email_sending",
            EmailBurst => "email_burst",
            CampaignCreation => "campaign_creation",
            CampaignSending => "campaign_sending",
            DataImport => "data_import",
            DataExport => "data_export",
            AnalyticsHeavy => "analytics_heavy",
            PublicApiIp => "public_api_ip",
            WebhookProcessing => "webhook_processing",
        }
    }
}
