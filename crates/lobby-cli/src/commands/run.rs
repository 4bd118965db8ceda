//! Headless widget session driven from the terminal.
//!
//! Mounts the widget against a real backend with the in-process chat and
//! call platforms standing in for the browser SDKs, then maps stdin lines
//! to widget operations. Useful for poking at a backend without a
//! browser.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};

use lobby_application::{ChatViewEvent, EngagementWidget, WidgetDeps};
use lobby_core::config::{Theme, WidgetConfig};
use lobby_interaction::local::{LocalCallPlatform, LocalChatPlatform, StaticPermissions};

#[derive(Args)]
pub struct RunArgs {
    /// Embed token issued to the company
    #[arg(long)]
    pub token: String,
    /// Domain the widget claims to be embedded on
    #[arg(long)]
    pub domain: String,
    /// Backend base URL
    #[arg(long)]
    pub api_base: Option<String>,
    /// Visual theme (light, dark)
    #[arg(long)]
    pub theme: Option<Theme>,
}

const HELP: &str = "commands: /call /cancel /accept /decline /hangup /mic /video /hide /show /status /end /quit, anything else is sent as chat";

pub async fn run(args: RunArgs) -> Result<()> {
    let mut config = WidgetConfig::new(args.token, args.domain);
    if let Some(api_base) = args.api_base {
        config = config.with_api_base(api_base);
    }
    if let Some(theme) = args.theme {
        config = config.with_theme(theme);
    }

    let chat_platform = Arc::new(LocalChatPlatform::new());
    let call_platform = Arc::new(LocalCallPlatform::new());
    let deps = WidgetDeps::standard(
        &config,
        chat_platform,
        call_platform,
        Arc::new(StaticPermissions::granted()),
    )
    .context("building widget dependencies")?;

    let widget = EngagementWidget::mount(config, deps)
        .await
        .context("mounting the widget")?;

    println!("{}", "widget mounted".green());
    println!("{}", HELP.dimmed());

    spawn_call_printer(&widget);
    spawn_chat_printer(&widget);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/help" => println!("{}", HELP.dimmed()),
            "/call" => widget.call().start_call(),
            "/cancel" => widget.call().cancel_call(),
            "/accept" => widget.call().accept_invite().await,
            "/decline" => widget.call().decline_invite().await,
            "/hangup" => widget.call().hang_up(),
            "/mic" => {
                if let Err(e) = widget.call().toggle_mic().await {
                    eprintln!("{}", format!("mic toggle failed: {e}").red());
                }
            }
            "/video" => {
                if let Err(e) = widget.call().toggle_video().await {
                    eprintln!("{}", format!("video toggle failed: {e}").red());
                }
            }
            "/hide" => widget.visibility().on_visibility_changed(true),
            "/show" => widget.visibility().on_visibility_changed(false),
            "/status" => match widget.coordinator().refresh().await {
                Ok(_) => {
                    let s = widget.coordinator().snapshot();
                    println!(
                        "{}",
                        format!(
                            "[visit] active={} joined={} room={:?} ended={}",
                            s.active,
                            s.joined,
                            s.call_room_id,
                            s.is_ended()
                        )
                        .yellow()
                    );
                }
                Err(e) => eprintln!("{}", format!("status fetch failed: {e}").red()),
            },
            "/end" => widget.visibility().end_session(),
            text => {
                if !widget.chat().send(text).await? {
                    println!("{}", "message not sent (session ended?)".dimmed());
                }
            }
        }
    }

    // Leaving the terminal is leaving the page.
    widget.visibility().on_page_hide().await;
    widget.shutdown().await;
    Ok(())
}

fn spawn_call_printer(widget: &EngagementWidget) {
    let mut views = widget.call().view();
    tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            let agent = view
                .agent_name
                .map(|name| format!(" agent={name}"))
                .unwrap_or_default();
            let line = format!(
                "[call] {:?} mic={} video={}{agent}",
                view.state,
                if view.mic_enabled { "on" } else { "off" },
                if view.video_enabled { "on" } else { "off" },
            );
            println!("{}", line.yellow());
        }
    });
}

fn spawn_chat_printer(widget: &EngagementWidget) {
    let mut events = widget.chat().subscribe();
    let local_client = widget.chat().local_client_id().to_string();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ChatViewEvent::MessageReceived(msg) => {
                    if msg.client_id == local_client {
                        println!("{} {}", "you:".cyan().bold(), msg.text);
                    } else {
                        println!("{} {}", format!("{}:", msg.client_id).green().bold(), msg.text);
                    }
                }
                ChatViewEvent::TypingChanged { peers } => {
                    if !peers.is_empty() {
                        println!("{}", format!("{} typing...", peers.join(", ")).dimmed());
                    }
                }
                ChatViewEvent::AgentIdentified(agent) => {
                    if let Some(name) = agent.name {
                        println!("{}", format!("you are talking to {name}").dimmed());
                    }
                }
            }
        }
    });
}
