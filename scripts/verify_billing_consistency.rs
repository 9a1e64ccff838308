#!/usr/bin/env rust-script
//! Billing Consistency Verification Script
//!
//! Runs the billing invariant checks against a live database and prints a
//! report. Read-only; never writes.
//!
//! ## Usage
//! ```bash
//! cargo run --bin verify_billing_consistency
//! ```
//!
//! ## Environment Variables
//! - DATABASE_URL: PostgreSQL connection string
//!
//! ## Checks
//! - single_subscription_per_org: exactly one subscription row per organization
//! - trial_bounds_ordered: trial_end after trial_start when both are set
//! - trialing_has_trial_end: trialing rows always carry a trial_end
//! - reminder_dedupe: at most one reminder per (subscription, threshold)
//! - status_values_known: every stored status parses into the closed enum

use std::env;
use std::error::Error;

use swiftfacture_billing::InvariantChecker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    println!("SwiftFacture Billing Consistency Verification");
    println!("=============================================\n");

    // Load environment variables
    dotenvy::dotenv().ok();

    let database_url = env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set");

    // Initialize database connection
    let pool = sqlx::postgres::PgPool::connect(&database_url).await?;

    println!("✓ Connected to database\n");

    let checker = InvariantChecker::new(pool);
    let summary = checker.run_all_checks().await?;

    println!(
        "Checks run: {}  passed: {}  failed: {}",
        summary.checks_run, summary.checks_passed, summary.checks_failed
    );

    if summary.healthy {
        println!("\n✓ All billing invariants hold");
        return Ok(());
    }

    println!("\n⚠ Found {} violation(s):\n", summary.violations.len());
    for violation in &summary.violations {
        println!(
            "  [{}] {}: {}",
            violation.severity, violation.invariant, violation.description
        );
        for org_id in &violation.org_ids {
            println!("    - org {}", org_id);
        }
        println!("    context: {}", violation.context);
    }

    std::process::exit(1);
}
