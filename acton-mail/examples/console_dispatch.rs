//! Dispatch a few messages through the console transport
//!
//! Run with `RUST_LOG=info` to see each message as it is "sent".

use std::sync::Arc;

use acton_mail::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    acton_mail::observability::init()?;

    let config = MailConfig::load_for_service("console-dispatch")?;
    let preferences = PreferenceStore::new(
        Preferences::new()
            .with("smtp_server", "localhost")
            .with("smtp_port", "1025")
            .with("smtp_encryption", "none")
            .with("smtp_from_email", "monitor@example.com")
            .with("smtp_from_name", "Monitor")
            .with("identifier", "console demo"),
    );

    let pipeline = MailPipeline::from_config(
        &config,
        Arc::new(ConsoleTransport::verbose()),
        preferences.clone(),
    )?;
    let dispatcher = Dispatcher::new(config.dispatch, pipeline).start();
    let mut events = dispatcher.subscribe();
    let queue = dispatcher.queue();

    let hosts = ["web-01", "web-02", "db-01"];
    for host in hosts {
        queue
            .submit(
                MailPayload::new()
                    .to("ops@example.com")
                    .additional_to("oncall@example.com")
                    .subject(&format!("{host} is down"))
                    .content(&format!("<p><strong>{host}</strong> stopped responding.</p>")),
            )
            .await?;
    }

    let mut finished = 0;
    while finished < hosts.len() {
        match events.recv().await? {
            DispatchEvent::JobSent { job, worker } => {
                tracing::info!(%job, worker, "Delivered");
                finished += 1;
            }
            DispatchEvent::JobAbandoned { job, reason, .. } => {
                tracing::warn!(%job, %reason, "Abandoned");
                finished += 1;
            }
            _ => {}
        }
    }

    dispatcher.shutdown().await;
    Ok(())
}
