//! Print every new group message the account receives.
//!
//! ```sh
//! GROUPME_ACCESS_TOKEN=... cargo run -p groupme-push --example listen -- [GROUP_ID ...]
//! ```
//!
//! Each `GROUP_ID` argument adds a group subscription on top of the
//! personal channel. Message text is printed to stdout.

use groupme_push::{Callbacks, PushClient, PushConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let groups: Vec<String> = std::env::args().skip(1).collect();
    let config = PushConfig::from_env()?.disregard_self(true);

    let callbacks = Callbacks::new()
        .on_message(|subject| {
            let name = subject.get("name").and_then(|v| v.as_str()).unwrap_or("-");
            let text = subject.get("text").and_then(|v| v.as_str()).unwrap_or("");
            println!("{name}: {text}");
        })
        .on_direct_message(|subject| {
            let text = subject.get("text").and_then(|v| v.as_str()).unwrap_or("");
            println!("[dm] {text}");
        })
        .on_other(|data| eprintln!("[other] {data}"))
        .on_error(|e| eprintln!("[error] {e}"));

    let mut client = PushClient::new(config, callbacks);
    client.start().await?;
    eprintln!(
        "listening as user {} ...",
        client.user_id().unwrap_or("-")
    );

    for group in &groups {
        if !client.subscribe_to_group(group).await {
            eprintln!("could not subscribe to group {group}");
        }
    }

    tokio::select! {
        _ = client.closed() => eprintln!("connection closed"),
        _ = tokio::signal::ctrl_c() => client.stop().await,
    }

    Ok(())
}
