use std::error::Error;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tablechat::config::{self, AppConfig};
use tablechat::storage::SqliteStore;
use tablechat::{
    ChatMessage, ChatService, Directory, NotificationDraft, NotificationKind, Notifications, Role,
    Session, UserProfile,
};
use tokio::signal;

#[derive(Parser)]
#[command(
    name = "tablechat",
    version,
    about = "Owner/admin chat for the restaurant guide"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or update a user profile
    Register {
        #[arg(long)]
        id: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        /// user, restaurant_owner or admin
        #[arg(long, default_value = "user")]
        role: Role,
    },
    /// Send a message as `--from` to `--to`
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        content: String,
    },
    /// Print the thread between two users as it changes, until Ctrl-C
    Watch {
        #[arg(long)]
        user: String,
        #[arg(long)]
        with: String,
    },
    /// List restaurant owners
    Owners,
    /// Show the support administrator
    Admin,
    /// Delete every chat message
    Clear,
    /// Notify a user
    Notify {
        #[arg(long)]
        user: String,
        /// payment_verification, request_status or message
        #[arg(long, default_value = "message")]
        kind: NotificationKind,
        #[arg(long)]
        title: String,
        message: String,
    },
    /// List a user's notifications, newest first
    Notifications {
        #[arg(long)]
        user: String,
    },
    /// Mark a notification as read
    MarkRead { id: String },
    /// Store a database path in the config file
    UseDb { path: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    if let Command::UseDb { path } = &cli.command {
        config::persist_database_path(&cli.config, path)?;
        println!("{} now uses {path}", cli.config);
        return Ok(());
    }
    let app_config = config::load_config(&cli.config);
    run(cli.command, app_config).await
}

async fn run(command: Command, app_config: AppConfig) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(
        SqliteStore::with_path(&app_config.database_path)?
            .with_poll_interval(app_config.poll_interval()),
    );
    let retry = app_config.retry.policy();
    let directory = Directory::new(Arc::clone(&store), retry);
    let chat = ChatService::new(Arc::clone(&store), retry);
    let notifications = Notifications::new(Arc::clone(&store), retry);

    match command {
        Command::Register {
            id,
            first_name,
            last_name,
            role,
        } => {
            let profile = UserProfile {
                id,
                first_name,
                last_name,
                role,
            };
            directory.upsert_profile(&profile).await?;
            println!("{} ({}) saved as {}", profile.display_name(), profile.id, profile.role);
        }
        Command::Send { from, to, content } => {
            let session = Session::start(&directory, &from).await?;
            let id = chat.send(&session, &to, &content).await?;
            println!("sent {id}");
            session.end();
        }
        Command::Watch { user, with } => {
            let session = Session::start(&directory, &user).await?;
            let local = session.user_id().to_string();
            let mut subscription = chat.open_thread(&session, &with, move |update| match update {
                Ok(thread) => print_thread(&local, &thread),
                Err(err) => eprintln!("thread unavailable: {err}"),
            })?;

            signal::ctrl_c().await?;
            log::info!("Received shutdown signal, closing thread...");
            subscription.unsubscribe();
            session.end();
        }
        Command::Owners => {
            for owner in directory.restaurant_owners().await? {
                println!("{}\t{}", owner.id, owner.display_name());
            }
        }
        Command::Admin => match directory.support_admin().await? {
            Some(admin) => println!("{}\t{}", admin.id, admin.display_name()),
            None => println!("no administrator registered"),
        },
        Command::Clear => {
            let deleted = chat.clear_messages().await?;
            println!("deleted {deleted} messages");
        }
        Command::Notify {
            user,
            kind,
            title,
            message,
        } => {
            let id = notifications
                .create(&NotificationDraft {
                    user_id: user,
                    kind,
                    title,
                    message,
                    data: Default::default(),
                })
                .await?;
            println!("notification {id}");
        }
        Command::Notifications { user } => {
            let unread = notifications.unread_count(&user).await?;
            println!("{unread} unread");
            for notification in notifications.for_user(&user).await? {
                let marker = if notification.read { " " } else { "*" };
                println!(
                    "{marker} {}\t{}\t{}: {}",
                    notification.id, notification.kind, notification.title, notification.message
                );
            }
        }
        Command::MarkRead { id } => {
            notifications.mark_read(&id).await?;
            println!("{id} marked as read");
        }
        Command::UseDb { .. } => {}
    }

    Ok(())
}

fn print_thread(local: &str, thread: &[ChatMessage]) {
    println!("---- {} messages ----", thread.len());
    for message in thread {
        let time = message
            .created_at_utc()
            .map(|at| at.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        let marker = if message.sender_id == local { ">" } else { "<" };
        let name = if message.sender_name.is_empty() {
            message.sender_id.as_str()
        } else {
            message.sender_name.as_str()
        };
        println!("{time} {marker} {name}: {}", message.content);
    }
}
