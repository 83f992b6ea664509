//! Interactive terminal client for Agora community chat.

use std::error::Error;
use std::io::{BufRead, Write};

use agora_sync::rest::DeleteScope;
use agora_sync::session::{ChatSession, SessionConfig, SessionUpdate};
use agora_sync::view::date_label;
use agora_sync::{ConnectionState, LocalUser, Message, MessageId, Role};
use chrono::Utc;
use clap::Parser;
use log::{error, warn};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "agora")]
#[command(about = "Community chat client")]
struct Args {
    /// REST endpoint
    #[arg(long, default_value = "http://localhost:4000")]
    api_url: String,

    /// WebSocket endpoint
    #[arg(long, default_value = "ws://localhost:4000/ws")]
    ws_url: String,

    /// Auth token
    #[arg(short, long)]
    token: String,

    /// Display name
    #[arg(short, long, default_value = "anonymous")]
    name: String,

    /// User id; generated when omitted
    #[arg(long)]
    user_id: Option<Uuid>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let local = LocalUser::new(
        args.user_id.unwrap_or_else(Uuid::new_v4),
        args.name,
        Role::Member,
    );

    let mut config = SessionConfig::default();
    config.api.base_url = args.api_url;
    config.api.token = args.token.clone();
    config.transport.url = args.ws_url;
    config.transport.token = args.token;

    let mut session = ChatSession::new(local, config)?;
    session.start().await?;
    println!("connected as {}", session.local_user().name);
    print_rooms(&session);
    print_help();

    // Stdin feeds the loop through a channel so the select below only
    // races cancel-safe futures.
    let (line_tx, mut line_rx) = mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    let mut current: Option<Uuid> = None;
    loop {
        prompt();
        tokio::select! {
            maybe_line = line_rx.recv() => {
                let Some(line) = maybe_line else { break };
                if !handle_command(&mut session, &mut current, line.trim()).await {
                    break;
                }
            }
            maybe_update = session.next_update() => {
                match maybe_update {
                    Some(update) => render_update(&session, current, update),
                    None => {
                        warn!("session ended");
                        break;
                    }
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn print_help() {
    println!("commands:");
    println!("  /rooms                 list rooms");
    println!("  /open <n>              open room n from the list");
    println!("  /close                 close the open room");
    println!("  /more                  load older messages");
    println!("  /read                  mark the open room read");
    println!("  /who                   online members of the open room");
    println!("  /react <n> <emoji>     toggle a reaction on message n");
    println!("  /edit <n> <text>       edit message n");
    println!("  /delete <n> [me|all]   delete message n");
    println!("  /join <uuid>           join a room by id");
    println!("  /leave                 leave the open room");
    println!("  /stats                 session counters");
    println!("  /quit                  exit");
    println!("anything else is sent to the open room");
}

fn print_rooms(session: &ChatSession) {
    let rooms = session.rooms();
    if rooms.is_empty() {
        println!("no rooms yet; /join <uuid> to get started");
        return;
    }
    for (index, entry) in rooms.iter().enumerate() {
        let unread = entry.membership.unread_count;
        let badge = if unread > 0 {
            format!(" ({unread} unread)")
        } else {
            String::new()
        };
        let preview = entry
            .room
            .last_message_preview
            .as_deref()
            .unwrap_or("no messages yet");
        println!(
            "  [{index}] {} — {} members{badge} · {preview}",
            entry.room.name, entry.room.member_count
        );
    }
}

fn print_timeline(session: &ChatSession, room: Uuid) {
    let today = Utc::now().date_naive();
    let mut index = 0;
    for bucket in session.timeline(room) {
        println!("── {} ──", date_label(bucket.date, today));
        for msg in bucket.messages {
            print_message(index, msg);
            index += 1;
        }
    }
}

fn print_message(index: usize, msg: &Message) {
    let time = msg.created_at.format("%H:%M");
    let mut flags = String::new();
    if msg.is_optimistic {
        flags.push_str(" ⏳");
    }
    if msg.is_edited {
        flags.push_str(" (edited)");
    }
    if msg.is_deleted {
        println!("  [{index}] {time} {} deleted this message", msg.sender.name);
        return;
    }
    let body = msg
        .content
        .text
        .clone()
        .unwrap_or_else(|| msg.preview_text());
    let reactions = if msg.reactions.is_empty() {
        String::new()
    } else {
        let emoji: Vec<&str> = msg.reactions.iter().map(|r| r.emoji.as_str()).collect();
        format!("  [{}]", emoji.join(" "))
    };
    println!("  [{index}] {time} {}: {body}{flags}{reactions}", msg.sender.name);
}

/// Message n of the open room's display order.
fn message_at(session: &ChatSession, room: Uuid, index: usize) -> Option<&Message> {
    session.messages(room).get(index)
}

fn render_update(session: &ChatSession, current: Option<Uuid>, update: SessionUpdate) {
    match update {
        SessionUpdate::MessagesChanged { room } => {
            if current == Some(room) {
                if let Some(msg) = session.messages(room).last() {
                    print_message(session.messages(room).len() - 1, msg);
                }
            }
        }
        SessionUpdate::RoomsChanged => {
            let total = session.total_unread();
            if total > 0 {
                println!("· {total} unread across rooms");
            }
        }
        SessionUpdate::MessageFailed { reason, .. } => {
            println!("! send failed: {reason}");
        }
        SessionUpdate::TypingChanged { room } => {
            if current == Some(room) {
                let names: Vec<&str> = session
                    .typing_users(room)
                    .into_iter()
                    .map(|(_, name)| name)
                    .collect();
                if !names.is_empty() {
                    println!("… {} typing", names.join(", "));
                }
            }
        }
        SessionUpdate::PresenceChanged => {}
        SessionUpdate::ConnectionChanged { state } => match state {
            ConnectionState::Connected => println!("· connected"),
            ConnectionState::Reconnecting => println!("· connection lost, retrying"),
            state => println!("· {state}"),
        },
        SessionUpdate::ConnectionLost => {
            println!("! gave up reconnecting; restart to resume");
        }
        SessionUpdate::RemovedFromRoom { room } => {
            println!("! you were removed from room {room}");
        }
    }
}

/// Returns false when the loop should exit.
async fn handle_command(
    session: &mut ChatSession,
    current: &mut Option<Uuid>,
    line: &str,
) -> bool {
    if line.is_empty() {
        return true;
    }
    let (command, rest) = match line.split_once(' ') {
        Some((head, tail)) => (head, tail.trim()),
        None => (line, ""),
    };

    match command {
        "/quit" => return false,
        "/help" => print_help(),
        "/rooms" => print_rooms(session),
        "/open" => {
            let Some(entry) = rest
                .parse::<usize>()
                .ok()
                .and_then(|n| session.rooms().get(n).map(|e| e.room.id))
            else {
                println!("usage: /open <n>");
                return true;
            };
            if let Err(e) = session.watch(entry) {
                println!("! {e}");
                return true;
            }
            *current = Some(entry);
            match session.load_history(entry).await {
                Ok(_) => print_timeline(session, entry),
                Err(e) => println!("! history failed: {e}"),
            }
            if let Err(e) = session.mark_read(entry).await {
                warn!("mark read failed: {e}");
            }
        }
        "/close" => {
            if let Some(room) = current.take() {
                session.unwatch(room);
            }
        }
        "/more" => {
            let Some(room) = *current else {
                println!("open a room first");
                return true;
            };
            match session.load_history(room).await {
                Ok(0) => println!("no older messages"),
                Ok(n) => {
                    println!("loaded {n} older messages");
                    print_timeline(session, room);
                }
                Err(e) => println!("! {e}"),
            }
        }
        "/read" => {
            let Some(room) = *current else {
                println!("open a room first");
                return true;
            };
            match session.mark_read(room).await {
                Ok(n) => println!("marked {n} read"),
                Err(e) => println!("! {e}"),
            }
        }
        "/who" => {
            let Some(room) = *current else {
                println!("open a room first");
                return true;
            };
            let online = session.room_presence(room);
            if online.is_empty() {
                println!("nobody else online");
            } else {
                for entry in online {
                    println!("  {} ({})", entry.name, entry.status);
                }
            }
        }
        "/react" => {
            let Some(room) = *current else {
                println!("open a room first");
                return true;
            };
            let Some((index, emoji)) = rest
                .split_once(' ')
                .and_then(|(n, e)| Some((n.parse::<usize>().ok()?, e.trim())))
            else {
                println!("usage: /react <n> <emoji>");
                return true;
            };
            let Some(id) = message_at(session, room, index).map(|m| m.id.clone()) else {
                println!("no message {index}");
                return true;
            };
            match session.react(&id, emoji) {
                Ok(action) => println!("reaction {action:?}"),
                Err(e) => println!("! {e}"),
            }
        }
        "/edit" => {
            let Some(room) = *current else {
                println!("open a room first");
                return true;
            };
            let Some((index, text)) = rest
                .split_once(' ')
                .and_then(|(n, t)| Some((n.parse::<usize>().ok()?, t.trim())))
            else {
                println!("usage: /edit <n> <text>");
                return true;
            };
            let Some(MessageId::Server(id)) = message_at(session, room, index).map(|m| m.id.clone())
            else {
                println!("message {index} has no server id yet");
                return true;
            };
            if let Err(e) = session.edit_message(id, text).await {
                println!("! {e}");
            }
        }
        "/delete" => {
            let Some(room) = *current else {
                println!("open a room first");
                return true;
            };
            let (index_str, scope_str) = match rest.split_once(' ') {
                Some((n, s)) => (n, s.trim()),
                None => (rest, "me"),
            };
            let scope = match scope_str {
                "all" | "everyone" => DeleteScope::Everyone,
                _ => DeleteScope::Me,
            };
            let Some(index) = index_str.parse::<usize>().ok() else {
                println!("usage: /delete <n> [me|all]");
                return true;
            };
            let Some(MessageId::Server(id)) = message_at(session, room, index).map(|m| m.id.clone())
            else {
                println!("message {index} has no server id yet");
                return true;
            };
            if let Err(e) = session.delete_message(id, scope).await {
                println!("! {e}");
            }
        }
        "/join" => {
            let Ok(room) = rest.parse::<Uuid>() else {
                println!("usage: /join <uuid>");
                return true;
            };
            match session.join_room(room).await {
                Ok(()) => print_rooms(session),
                Err(e) => println!("! {e}"),
            }
        }
        "/leave" => {
            let Some(room) = current.take() else {
                println!("open a room first");
                return true;
            };
            if let Err(e) = session.leave_room(room).await {
                error!("leave failed: {e}");
            }
        }
        "/stats" => {
            let stats = session.stats();
            println!(
                "store: {} appended, {} reconciled, {} duplicates dropped, {} rolled back",
                stats.store.appended,
                stats.store.reconciled,
                stats.store.duplicates_dropped,
                stats.store.rolled_back
            );
            println!(
                "transport: {} sent, {} received, {} decode failures, {} reconnects",
                stats.transport.events_sent,
                stats.transport.events_received,
                stats.transport.decode_failures,
                stats.transport.reconnects
            );
        }
        _ if command.starts_with('/') => println!("unknown command; /help"),
        _ => {
            let Some(room) = *current else {
                println!("open a room first");
                return true;
            };
            session.typing_input(room);
            if let Err(e) = session.send_text(room, line).await {
                println!("! {e}");
            }
        }
    }
    true
}
