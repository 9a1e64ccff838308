//! Plan catalog mapping
//!
//! Maps the payment provider's product identifiers onto local plan ids. The
//! catalog contents (pricing, features) live outside this core; only the
//! identifier mapping is needed here, for webhook reconciliation.

use std::collections::HashMap;

/// Plan granted to every new organization for the fixed trial window
pub const TRIAL_PLAN_ID: &str = "trial-30";

/// Fixed trial length in days
pub const TRIAL_DAYS: i64 = 30;

/// Static provider-product to plan-id lookup
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    products: HashMap<String, String>,
}

impl PlanCatalog {
    /// Build the catalog from environment variables, falling back to the
    /// well-known product ids used by the hosted deployment.
    ///
    /// - `PROVIDER_PRODUCT_STARTER` -> plan `starter`
    /// - `PROVIDER_PRODUCT_PROFESSIONAL` -> plan `professional`
    /// - `PROVIDER_PRODUCT_ENTERPRISE` -> plan `enterprise`
    pub fn from_env() -> Self {
        let mut products = HashMap::new();
        products.insert(
            std::env::var("PROVIDER_PRODUCT_STARTER")
                .unwrap_or_else(|_| "prod_starter".to_string()),
            "starter".to_string(),
        );
        products.insert(
            std::env::var("PROVIDER_PRODUCT_PROFESSIONAL")
                .unwrap_or_else(|_| "prod_professional".to_string()),
            "professional".to_string(),
        );
        products.insert(
            std::env::var("PROVIDER_PRODUCT_ENTERPRISE")
                .unwrap_or_else(|_| "prod_enterprise".to_string()),
            "enterprise".to_string(),
        );
        Self { products }
    }

    /// Build a catalog from an explicit product -> plan table (tests, custom
    /// deployments).
    pub fn new(products: HashMap<String, String>) -> Self {
        Self { products }
    }

    /// Resolve a provider product id to a local plan id
    pub fn plan_for_product(&self, product_id: &str) -> Option<&str> {
        self.products.get(product_id).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_catalog() -> PlanCatalog {
        let mut products = HashMap::new();
        products.insert("prod_starter".to_string(), "starter".to_string());
        products.insert("prod_professional".to_string(), "professional".to_string());
        PlanCatalog::new(products)
    }

    #[test]
    fn test_known_product_maps_to_plan() {
        let catalog = test_catalog();
        assert_eq!(
            catalog.plan_for_product("prod_professional"),
            Some("professional")
        );
        assert_eq!(catalog.plan_for_product("prod_starter"), Some("starter"));
    }

    #[test]
    fn test_unknown_product_is_none() {
        let catalog = test_catalog();
        assert_eq!(catalog.plan_for_product("prod_bogus"), None);
    }

    #[test]
    fn test_trial_constants() {
        assert_eq!(TRIAL_PLAN_ID, "trial-30");
        assert_eq!(TRIAL_DAYS, 30);
    }
}
