//! Notifier Worker - Entry Point
//!
//! Background worker that redelivers failed and scheduled notifications.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    notifier_worker::run().await
}
