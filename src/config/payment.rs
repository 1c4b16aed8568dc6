//! Payment provider configuration (Stripe)

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use super::error::ValidationError;

/// Payment configuration (Stripe)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentConfig {
    /// Stripe API key
    #[serde(default)]
    pub stripe_api_key: String,

    /// Stripe webhook signing secret
    #[serde(default)]
    pub stripe_webhook_secret: String,

    /// Price ids keyed `<tier>_<interval>`, e.g. `growth_year`.
    #[serde(default)]
    pub prices: HashMap<String, String>,

    /// Where checkout returns after payment
    #[serde(default)]
    pub checkout_success_url: String,

    /// Where checkout returns when abandoned
    #[serde(default)]
    pub checkout_cancel_url: String,

    /// Where the customer portal returns
    #[serde(default)]
    pub portal_return_url: String,

    /// Where the UI goes after a trial starts
    #[serde(default = "default_trial_redirect_url")]
    pub trial_redirect_url: String,

    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    /// Overrides the Stripe API host (stub servers)
    pub api_base_url: Option<String>,
}

impl PaymentConfig {
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_test_")
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Validate payment configuration. Production requires HTTPS redirects.
    pub fn validate(&self, production: bool) -> Result<(), ValidationError> {
        if self.stripe_api_key.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__STRIPE_API_KEY"));
        }
        if self.stripe_webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired(
                "PAYMENT__STRIPE_WEBHOOK_SECRET",
            ));
        }
        if !self.stripe_api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !self.stripe_webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }
        for key in self.prices.keys() {
            if key.rsplit_once('_').is_none() {
                return Err(ValidationError::InvalidPriceKey(key.clone()));
            }
        }
        for (name, url) in [
            ("PAYMENT__CHECKOUT_SUCCESS_URL", &self.checkout_success_url),
            ("PAYMENT__CHECKOUT_CANCEL_URL", &self.checkout_cancel_url),
            ("PAYMENT__PORTAL_RETURN_URL", &self.portal_return_url),
        ] {
            if url.is_empty() {
                return Err(ValidationError::MissingRequired(name));
            }
            if production && !url.starts_with("https://") {
                return Err(ValidationError::UrlMustBeHttps);
            }
        }
        if self.provider_timeout_secs == 0 || self.provider_timeout_secs > 60 {
            return Err(ValidationError::OutOfRange("provider_timeout_secs"));
        }
        Ok(())
    }
}

fn default_trial_redirect_url() -> String {
    "/dashboard".to_string()
}

fn default_provider_timeout() -> u64 {
    10
}
