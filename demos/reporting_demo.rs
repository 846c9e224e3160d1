// End-to-end tour of the reporting client
//
// Demonstrates:
// - Loading options from SENTRY_DSN / ENVIRONMENT / APP_VERSION
// - User, tag and breadcrumb context
// - Capturing errors and messages with per-event context
// - Scoped context
// - Transactions with child spans
//
// Usage:
//   SENTRY_DSN=https://<key>@<host>/<project> cargo run --example reporting_demo
//
// Without a DSN the client runs disabled and the demo still completes.

use anyhow::Result;
use faultline::hooks;
use faultline::prelude::*;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Business logic error: {0}")]
    BusinessError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Expected outcome of normal business flow; filtered out by `default_before_send`.
#[derive(Debug, thiserror::Error)]
#[error("Expected business error: {0}")]
pub struct ExpectedBusinessError(pub String);

struct ExampleService {
    client: Arc<Client>,
}

impl ExampleService {
    fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    fn fetch_data(&self, id: &str) -> std::result::Result<String, AppError> {
        let mut data = Map::new();
        data.insert("id".to_string(), Value::from(id));
        self.client
            .add_breadcrumb(&format!("Fetching data for {}", id), "service", Level::Info, Some(data));

        match id {
            "error" => Err(AppError::DatabaseError("Failed to fetch data".to_string())),
            "" => Err(AppError::ValidationError("id must not be empty".to_string())),
            _ => Ok(format!("Data for {}", id)),
        }
    }

    fn process_batch(&self, items: &[&str]) -> usize {
        self.client.with_transaction("process_batch", "task", |transaction| {
            let mut processed = 0;
            for item in items {
                self.client
                    .with_span(transaction, "task.item", &format!("process_{}", item), |_span| {
                        simulate_work(50);
                        processed += 1;
                    });
            }
            processed
        })
    }

    async fn async_operation(&self, input: &str) -> std::result::Result<String, AppError> {
        self.client.add_breadcrumb(
            &format!("Processing async operation for {}", input),
            "async",
            Level::Info,
            None,
        );

        tokio::time::sleep(Duration::from_millis(100)).await;

        if input.is_empty() {
            return Err(AppError::ExternalServiceError("upstream rejected empty input".to_string()));
        }
        Ok(format!("Processed: {}", input))
    }
}

/// Stand-in for blocking work inside a span. Runs off the async worker so the
/// dispatch task keeps making progress.
fn simulate_work(millis: u64) {
    tokio::task::block_in_place(|| std::thread::sleep(Duration::from_millis(millis)));
}

fn print_section(title: &str) {
    println!("\n{}", title);
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut options = ClientOptions::from_env();
    faultline::logging::init(options.debug);

    options.before_send = Some(Arc::new(hooks::default_before_send));
    options.before_breadcrumb = Some(Arc::new(hooks::default_before_breadcrumb));

    println!("{}", "=".repeat(60));
    println!("Error Reporting Client Example");
    println!("{}", "=".repeat(60));

    let client = Arc::new(Client::init(options));
    if client.is_enabled() {
        println!(
            "Reporting enabled for environment: {}",
            client.options().environment.as_deref().unwrap_or("unknown")
        );
    } else {
        println!("DSN not configured, running without error tracking");
    }

    let mut user_data = Map::new();
    user_data.insert("subscription_tier".to_string(), Value::from("premium"));
    client.set_user_with_data(
        User::with_id("user-123")
            .with_email("developer@example.com")
            .with_username("developer")
            .with_ip_address("127.0.0.1"),
        user_data,
    );

    client.add_breadcrumb("Application started", "app", Level::Info, None);
    client.add_breadcrumb("User authenticated", "auth", Level::Info, None);

    print_section("1. Capturing handled exception...");
    let error = AppError::DatabaseError("Connection refused".to_string());
    let mut context = Map::new();
    context.insert("operation".to_string(), Value::from("database_connect"));
    context.insert("host".to_string(), Value::from("localhost:5432"));
    let event_id = client.capture_error_with_context(&error, context);
    println!("   Exception captured: {}", event_id);

    print_section("2. Capturing info message...");
    let mut msg_context = Map::new();
    msg_context.insert("steps_completed".to_string(), Value::from(5));
    msg_context.insert("time_taken_seconds".to_string(), Value::from(120));
    let event_id = client.capture_message_with_context("User completed onboarding flow", Level::Info, msg_context);
    println!("   Message captured: {}", event_id);

    print_section("3. Using example service...");
    let service = ExampleService::new(Arc::clone(&client));
    match service.fetch_data("123") {
        Ok(data) => println!("   Data fetched: {}", data),
        Err(e) => {
            client.capture_error(&e);
            println!("   Error handled");
        }
    }
    if let Err(e) = service.fetch_data("error") {
        let event_id = client.capture_error(&e);
        println!("   Error captured: {}", event_id);
    }
    match service.async_operation("payload").await {
        Ok(result) => println!("   {}", result),
        Err(e) => {
            client.capture_error(&e);
        }
    }

    let expected = ExpectedBusinessError("out of stock".to_string());
    let event_id = client.capture_error(&expected);
    println!("   Expected business error filtered (id {})", event_id);

    print_section("4. Processing batch with transaction...");
    let processed = service.process_batch(&["a", "b", "c"]);
    println!("   Processed {} items", processed);

    print_section("5. Using scoped context...");
    client.with_scope(
        |scope| {
            scope.set_tag("feature", "new_checkout");
            scope.set_extra("cart_items", 3);
            scope.set_extra("total_amount", 99.99);
        },
        || {
            client.capture_message("Checkout initiated", Level::Info);
        },
    );
    println!("   Scoped message captured");

    print_section("6. Creating transaction with spans...");
    client.with_transaction("order_processing", "task", |transaction| {
        client.with_span(transaction, "db.query", "Fetch order", |_| simulate_work(50));
        client.with_span(transaction, "http.client", "Payment API", |_| simulate_work(100));
        client.with_span(transaction, "db.query", "Update order status", |_| simulate_work(50));
    });
    println!("   Transaction with spans recorded");

    let checkout: std::result::Result<(), AppError> =
        client.try_with_transaction("checkout", "task", |transaction| {
            client.try_with_span(transaction, "validation", "Validate cart", |_| {
                Err(AppError::BusinessError("cart is empty".to_string()))
            })
        });
    if let Err(e) = checkout {
        println!("   Failed checkout traced: {}", e);
    }

    client.clear_user();

    if !client.close().await {
        println!("Some events could not be delivered before shutdown");
    }
    if let Some(stats) = client.stats() {
        println!(
            "Delivered {} envelopes ({} dropped, {} failed)",
            stats.sent, stats.dropped, stats.failed
        );
    }

    println!("\n{}", "=".repeat(60));
    println!("All examples completed!");
    println!("{}", "=".repeat(60));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_service_fetch_data() {
        let client = Arc::new(Client::init(ClientOptions::default()));
        let service = ExampleService::new(client);

        assert_eq!(service.fetch_data("123").unwrap(), "Data for 123");
        assert!(service.fetch_data("error").is_err());
    }

    #[test]
    fn test_example_service_process_batch() {
        let client = Arc::new(Client::init(ClientOptions::default()));
        let service = ExampleService::new(client);

        assert_eq!(service.process_batch(&["a", "b", "c"]), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_process_batch_inside_runtime() {
        let client = Arc::new(Client::init(ClientOptions::default()));
        let service = ExampleService::new(client);

        assert_eq!(service.process_batch(&["a", "b"]), 2);
    }
}
