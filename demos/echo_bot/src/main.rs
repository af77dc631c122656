//! Echo Bot Example
//!
//! Loads `onecat.toml`, attaches the same handlers to every configured
//! binding and runs until Ctrl+C.
//!
//! # Commands
//!
//! ```text
//! /echo <text>   repeat the text
//! /ping          Pong!
//! /help          list commands
//! /info          details of the triggering message
//! /group         group-only reply that mentions the sender
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-bot -- --config demos/echo_bot/onecat.toml
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use onecat::adapter::PostType;
use onecat::prelude::*;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(about = "Echo bot for OneBot v11 gateways")]
struct Args {
    /// Configuration file; searched in the usual places when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `production`.
    #[arg(short, long)]
    profile: Option<String>,

    /// Bot account id, used when the gateway cannot report it.
    #[arg(long)]
    self_id: Option<i64>,
}

const HELP_TEXT: &str = "\
Echo Bot - Commands
/echo <text> - Echo text
/ping        - Pong!
/help        - This help
/info        - Message info
/group       - Group only";

// ============================================================================
// Handlers
// ============================================================================

fn reply_target(event: &InboundEvent) -> Option<MessageTarget> {
    match (event.group_id(), event.user_id()) {
        (Some(group), _) if event.is_group_message() => Some(MessageTarget::Group(group)),
        (_, Some(user)) => Some(MessageTarget::Private(user)),
        _ => None,
    }
}

/// Logs every message.
async fn log_message(_client: OneBotClient, event: InboundEvent) {
    if event.post_type() != Some(PostType::Message) {
        return;
    }
    let text = get_message_text(event.raw());
    match event.group_id() {
        Some(group) => info!(group, user = ?event.user_id(), "[Group] {text}"),
        None => info!(user = ?event.user_id(), "[Private] {text}"),
    }
}

/// Answers the slash commands.
async fn commands(client: OneBotClient, event: InboundEvent) -> Result<()> {
    if event.post_type() != Some(PostType::Message) {
        return Ok(());
    }
    let Some(target) = reply_target(&event) else {
        return Ok(());
    };
    let text = get_message_text(event.raw());
    let text = text.trim();

    if let Some(content) = text.strip_prefix("/echo ") {
        client.send_text(target, content).await?;
    } else if text == "/ping" {
        client.send_text(target, "Pong!").await?;
    } else if text == "/help" {
        client.send_text(target, HELP_TEXT).await?;
    } else if text == "/info" {
        let info = format!(
            "Message Info\n- Type: {}\n- From: {}\n- Message ID: {}\n- Event: {}",
            target.message_type(),
            event.user_id().unwrap_or_default(),
            event.message_id().unwrap_or_default(),
            event.event_type(),
        );
        match event.message_id() {
            Some(id) => client.send_reply(target, id, info).await?,
            None => client.send_text(target, info).await?,
        };
    } else if text == "/group" {
        if let (MessageTarget::Group(group), Some(user)) = (target, event.user_id()) {
            client
                .send_at_message(group, user, "this is a group-only command!", None)
                .await?;
        }
    } else if client.is_at_me(&event).await {
        client.send_text(target, "Hi! Try /help").await?;
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = OnecatRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }
    let runtime = builder.build()?;

    if runtime.clients().is_empty() {
        error!("No enabled bindings configured, nothing to do");
        return Ok(());
    }

    for client in runtime.clients() {
        if let Some(id) = args.self_id {
            client.set_default_self_id(id);
        }
        client.on_all(log_message);
        client.on_all(commands);
        client.on(
            "meta_event.lifecycle.connect",
            |client: OneBotClient, _event: InboundEvent| async move {
                info!(name = %client.name(), "Gateway connected");
            },
        );
    }

    runtime.run().await?;
    Ok(())
}
