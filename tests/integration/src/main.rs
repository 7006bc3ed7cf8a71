//! Integration Test Harness
//!
//! Runs every integration test target and prints a summary.
//!
//! # Usage
//!
//! Run all tests:
//! ```text
//! cargo run -p integration-tests
//! ```
//!
//! Run one category:
//! ```text
//! cargo test -p integration-tests --test samr_tests
//! cargo test -p integration-tests --test transport_tests
//! cargo test -p integration-tests --test fragmentation_tests
//! cargo test -p integration-tests --test stress_tests
//! ```
//!
//! Run with increased logging:
//! ```text
//! RUST_LOG=debug cargo run -p integration-tests
//! ```

use std::process::Command;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct TestCategory {
    name: &'static str,
    description: &'static str,
    test_name: &'static str,
}

const TEST_CATEGORIES: &[TestCategory] = &[
    TestCategory {
        name: "SAMR Tests",
        description: "End-to-end SAMR sessions against the demo store",
        test_name: "samr_tests",
    },
    TestCategory {
        name: "Transport Tests",
        description: "Bind, alter-context, unknown contexts and shutdown",
        test_name: "transport_tests",
    },
    TestCategory {
        name: "Fragmentation Tests",
        description: "SAMR calls spanning many fragments",
        test_name: "fragmentation_tests",
    },
    TestCategory {
        name: "Stress Tests",
        description: "Concurrent associations and connection churn",
        test_name: "stress_tests",
    },
];

struct CategoryResult {
    name: &'static str,
    success: bool,
    duration: Duration,
    summary: String,
}

fn print_test_categories() {
    println!("SAMR over DCE/RPC - integration suite");
    println!("{}", "-".repeat(80));
    for (i, cat) in TEST_CATEGORIES.iter().enumerate() {
        println!("  {}. {} - {}", i + 1, cat.name, cat.description);
    }
    println!("{}", "-".repeat(80));
    println!();
}

fn run_test_category(category: &TestCategory) -> CategoryResult {
    println!("\n{}", "=".repeat(80));
    println!("Running: {}", category.name);
    println!("{}", "=".repeat(80));

    let start = Instant::now();
    let output = Command::new("cargo")
        .args(["test", "-p", "integration-tests", "--test", category.test_name, "--", "--nocapture"])
        .output();
    let duration = start.elapsed();

    let (success, summary) = match output {
        Ok(output) => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stdout.is_empty() {
                println!("{}", stdout);
            }
            if !stderr.is_empty() {
                eprintln!("{}", stderr);
            }

            if output.status.success() {
                (true, "PASSED".to_string())
            } else {
                (false, format!("FAILED (exit code: {:?})", output.status.code()))
            }
        }
        Err(e) => (false, format!("Failed to execute: {}", e)),
    };

    CategoryResult {
        name: category.name,
        success,
        duration,
        summary,
    }
}

fn main() {
    print_test_categories();

    let total_start = Instant::now();
    let results: Vec<CategoryResult> = TEST_CATEGORIES.iter().map(run_test_category).collect();
    let total_duration = total_start.elapsed();

    println!("\n{}", "=".repeat(80));
    println!("FINAL SUMMARY");
    println!("{}", "=".repeat(80));

    let failed = results.iter().filter(|r| !r.success).count();
    println!(
        "\nCategories: {} | Passed: {} | Failed: {}",
        results.len(),
        results.len() - failed,
        failed
    );
    println!("Total Duration: {:?}", total_duration);
    println!();

    println!("{:<30} {:<10} {:<15} Details", "Category", "Status", "Duration");
    println!("{}", "-".repeat(80));
    for result in &results {
        let status = if result.success { "PASS" } else { "FAIL" };
        println!(
            "{:<30} {:<10} {:<15} {}",
            result.name,
            status,
            format!("{:.2?}", result.duration),
            result.summary
        );
    }
    println!("{}", "=".repeat(80));

    if failed > 0 {
        println!("\nSome tests failed!");
        std::process::exit(1);
    }
    println!("\nAll tests passed!");
}
