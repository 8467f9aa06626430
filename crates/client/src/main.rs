//! Chatsync - terminal client for the conversation sync core
//!
//! Every stdin line is sent to the open conversation. Commands:
//! `/open <id>`, `/close`, `/list`, `/quit`.

use std::sync::Arc;

use anyhow::{Context, Result};
use chatsync_client::ws::WebSocketTransport;
use chatsync_client::{logging, ApiClient, AuthSession, ChatSession, ClientConfig, CurrentUser};
use chatsync_shared::{ServerEvent, UserId};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    logging::init("chatsync_client=info");

    let config = ClientConfig::from_env();
    let user_id = std::env::var("CHATSYNC_USER_ID").context("CHATSYNC_USER_ID is not set")?;
    let token = std::env::var("CHATSYNC_TOKEN").context("CHATSYNC_TOKEN is not set")?;

    let api = ApiClient::new()
        .with_base_url(config.api_url.clone())
        .with_token(token.clone());
    let auth = AuthSession::new(CurrentUser::new(user_id), token);
    let session = ChatSession::start(auth, config, Arc::new(api), Arc::new(WebSocketTransport));

    let me = session.user().id.clone();
    let _printer = session
        .connection()
        .on_event(move |event| print_event(&me, event));
    let _status = session
        .connection()
        .on_state_change(|state| println!("* connection: {state:?}"));

    if let Some(id) = std::env::args().nth(1) {
        open(&session, Some(id)).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "" => {}
            "/quit" => break,
            "/list" => list(&session).await,
            "/close" => open(&session, None).await,
            "/open" if !arg.trim().is_empty() => open(&session, Some(arg.trim().to_string())).await,
            "/open" => eprintln!("usage: /open <conversation id>"),
            _ => match session.send_message(line).await {
                Ok(message) => println!("> sent {}", message.id),
                Err(e) => eprintln!("! {e}"),
            },
        }
    }

    session.shutdown();
    Ok(())
}

async fn open(session: &ChatSession, id: Option<String>) {
    let target = id.map(Into::into);
    if let Err(e) = session.switch_conversation(target).await {
        eprintln!("! {e}");
        return;
    }
    for message in session.messages().messages() {
        println!(
            "  {}: {} ({})",
            message.sender_id,
            message.content,
            message.status.as_str()
        );
    }
}

async fn list(session: &ChatSession) {
    if let Err(e) = session.refresh_conversations().await {
        eprintln!("! {e}");
    }
    let me = &session.user().id;
    for conversation in session.conversations().list() {
        let with = conversation
            .peer_of(me)
            .map(|peer| format!(" with {peer}"))
            .unwrap_or_default();
        println!(
            "  {}{with} ({} unread) {}",
            conversation.id,
            conversation.unread_count,
            conversation.last_message.as_deref().unwrap_or("")
        );
    }
}

fn print_event(me: &UserId, event: &ServerEvent) {
    match event {
        ServerEvent::ReceiveMessage(message) if &message.sender_id != me => {
            println!(
                "[{}] {}: {}",
                message.conversation_id, message.sender_id, message.content
            );
        }
        ServerEvent::UserTyping {
            conversation_id,
            user_id,
            is_typing: true,
        } if user_id != me => println!("* {user_id} is typing in {conversation_id}"),
        ServerEvent::Error { code, message, .. } => eprintln!("! server: {code}: {message}"),
        _ => {}
    }
}
