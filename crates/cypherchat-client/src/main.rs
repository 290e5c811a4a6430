//! # cypherchat
//!
//! Line-oriented chat client for the CypherChat contract on Sepolia.
//!
//! Plain lines are sent to the open conversation. Commands start with `/`;
//! type `/help` for the list.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use cypherchat_client::{ChatClient, ChatEvent, ClientConfig};
use cypherchat_shared::{ChainAddress, MessageId};
use cypherchat_store::MessageFlag;

const HELP: &str = "\
/connect                 connect the wallet
/switch                  switch the wallet to Sepolia
/disconnect              drop the session
/register <name>         register the connected account
/whoami                  show the connected account
/add <address> [name]    save a contact
/contacts                list contacts
/open <name|address>     open a conversation
/more                    load older messages
/send <text>             send (or just type the text)
/resend <id>             resend a failed message
/pin <id> | /star <id>   toggle a flag
/delete <id>             hide a message locally
/pinned | /starred       list flagged messages
/search <text>           search the open conversation
/export                  print the conversation as JSON
/quit                    exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cypherchat_client::init_tracing();

    info!("Starting CypherChat v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    config.validate()?;
    info!(
        contract = ?config.contract_address,
        poll_ms = config.poll_interval.as_millis() as u64,
        page_size = config.page_size,
        "Loaded configuration"
    );

    let client = ChatClient::from_config(config).context("failed to start client")?;

    tokio::spawn(print_events(client.subscribe()));

    match client.reconnect().await {
        Ok(Some(session)) => info!(account = %session.account, "Restored previous session"),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Could not restore previous session"),
    }

    println!("Type /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = run_command(&client, line).await {
            println!("! {e}");
        }
    }

    client.disconnect()?;
    info!("Bye");
    Ok(())
}

async fn run_command(client: &ChatClient, line: &str) -> anyhow::Result<()> {
    let (command, rest) = match line.strip_prefix('/') {
        Some(cmd) => cmd.split_once(' ').unwrap_or((cmd, "")),
        None => ("send", line),
    };
    let rest = rest.trim();

    match command {
        "help" => println!("{HELP}"),
        "connect" => {
            let session = client.connect().await?;
            print_session(&session);
        }
        "switch" => {
            client.switch_network().await?;
            println!("Switched to Sepolia. Run /connect.");
        }
        "disconnect" => client.disconnect()?,
        "register" => {
            let registration = client.register(rest).await?;
            println!("Registered as {}", registration.name);
        }
        "whoami" => match client.whoami() {
            Some(session) => print_session(&session),
            None => println!("Not connected."),
        },
        "add" => {
            let (address, name) = rest.split_once(' ').unwrap_or((rest, ""));
            let contact = client.add_contact(Some(name), address).await?;
            println!("Saved {} ({})", contact.name, contact.address);
        }
        "contacts" => {
            for contact in client.contacts() {
                println!("{:<20} {}", contact.name, contact.address);
            }
        }
        "open" => {
            let peer = match client.resolve_contact(rest) {
                Some(contact) => contact.address,
                None => ChainAddress::parse(rest)?,
            };
            let conversation = client.open_conversation(peer)?;
            println!("Opened {conversation}");
        }
        "more" => {
            if !client.load_more().await? {
                println!("No older messages.");
            }
        }
        "send" => {
            if client.send(rest).is_none() && client.active_conversation().is_none() {
                println!("Open a conversation first.");
            }
        }
        "resend" => {
            client.resend(&parse_id(rest)?)?;
        }
        "pin" => {
            let on = client.pin(&parse_id(rest)?)?;
            println!("{}", if on { "Pinned" } else { "Unpinned" });
        }
        "star" => {
            let on = client.star(&parse_id(rest)?)?;
            println!("{}", if on { "Starred" } else { "Unstarred" });
        }
        "delete" => client.delete_local(&parse_id(rest)?)?,
        "pinned" => print_messages(&client.flagged(MessageFlag::Pinned)?),
        "starred" => print_messages(&client.flagged(MessageFlag::Starred)?),
        "search" => print_messages(&client.search(rest)?),
        "export" => println!("{}", client.export()?),
        other => println!("Unknown command /{other}. Type /help."),
    }
    Ok(())
}

fn parse_id(raw: &str) -> anyhow::Result<MessageId> {
    raw.parse::<MessageId>()
        .with_context(|| format!("not a message id: {raw:?}"))
}

fn print_session(session: &cypherchat_client::SessionInfo) {
    let name = if session.registration.exists {
        session.registration.name.as_str()
    } else {
        "(unregistered)"
    };
    println!("{} {} via {}", session.account, name, session.wallet);
}

fn print_messages(messages: &[cypherchat_shared::ChatMessage]) {
    for m in messages {
        let failure = m.failure.map(|f| format!(" {f:?}")).unwrap_or_default();
        println!(
            "[{}] {} {} {}: {}{}",
            m.id,
            m.timestamp.format("%H:%M:%S"),
            m.status,
            m.sender.short(),
            m.content,
            failure
        );
    }
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<ChatEvent>) {
    loop {
        match rx.recv().await {
            Ok(ChatEvent::ConversationUpdated { messages, .. }) => print_messages(&messages),
            Ok(ChatEvent::Notice { message }) => println!("* {message}"),
            Ok(ChatEvent::MessageReceived { message, .. }) => {
                println!("* New message from {}", message.sender.short())
            }
            Ok(ChatEvent::DraftRestored { content, .. }) => println!("* Draft restored: {content}"),
            Ok(ChatEvent::MessageStatusChanged { id, status, .. }) => println!("* {id} {status}"),
            Ok(ChatEvent::Connected { account, name, .. }) => {
                println!("* Connected {account} {}", name.unwrap_or_default())
            }
            Ok(ChatEvent::Registered { name, .. }) => println!("* Registered as {name}"),
            Ok(ChatEvent::Disconnected) => println!("* Disconnected"),
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "Event printer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
