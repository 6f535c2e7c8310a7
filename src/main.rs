use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use campus_connect::api::{CollegeApi, HttpApi};
use campus_connect::config::ClientConfig;
use campus_connect::import::{self, AttendanceImporter, RowImporter, UserImporter};
use campus_connect::models::{Credentials, Role, ThreadMessage};
use campus_connect::thread::ThreadView;

#[derive(Parser)]
#[command(name = "campus-connect", about = "Bulk imports and thread messaging for the college portal")]
struct Cli {
    /// Base URL of the REST API
    #[arg(long, env = "API_URL", global = true)]
    api_url: Option<String>,

    /// URL of the realtime chat gateway
    #[arg(long, env = "SOCKET_URL", global = true)]
    socket_url: Option<String>,

    /// Bearer token for the REST API
    #[arg(long, env = "API_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a CSV or JSON file, one record per row
    Import {
        #[command(subcommand)]
        kind: ImportKind,
        /// Print the outcome as JSON
        #[arg(long, global = true)]
        json: bool,
    },
    /// Log in and print the issued token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        college: Option<String>,
    },
    /// List threads visible to the current token
    Threads,
    /// Open a thread and chat in it; `/close` closes it, `/quit` leaves
    Thread {
        thread_id: String,
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand)]
enum ImportKind {
    Attendance {
        file: PathBuf,
    },
    Users {
        #[arg(long)]
        role: Role,
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    let mut config = ClientConfig::new(cli.api_url, cli.socket_url);
    config.token = cli.token;

    match run(cli.command, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    command: Command,
    config: &ClientConfig,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let api = Arc::new(HttpApi::new(config)?);

    match command {
        Command::Import { kind, json } => {
            let (importer, file): (Box<dyn RowImporter>, PathBuf) = match kind {
                ImportKind::Attendance { file } => (Box::new(AttendanceImporter), file),
                ImportKind::Users { role, file } => (Box::new(UserImporter::new(role)), file),
            };

            let outcome = import::import_file(importer.as_ref(), api.as_ref(), &file).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                println!("Successfully processed: {} record(s)", outcome.success_count);
                if outcome.failure_count > 0 {
                    println!("Errors encountered: {} record(s)", outcome.failure_count);
                    for line in &outcome.errors {
                        println!("  {line}");
                    }
                }
            }

            Ok(if outcome.failure_count == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Login {
            email,
            password,
            college,
        } => {
            let login = api
                .login(&Credentials {
                    email: &email,
                    password: &password,
                    college: college.as_deref(),
                })
                .await?;
            info!("Logged in as {}", login.data.user.id);
            match login.token {
                Some(token) => println!("{token}"),
                None => eprintln!("Login succeeded but no token was issued"),
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Threads => {
            for thread in api.list_threads().await? {
                println!(
                    "{}  [{:?}]  {}  ({})",
                    thread.id, thread.status, thread.title, thread.topic
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Thread { thread_id, user } => {
            let api: Arc<dyn CollegeApi> = api;
            let view = ThreadView::open(config, api, &user, &thread_id).await?;
            chat(view).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_message(message: &ThreadMessage) {
    match message.created_at {
        Some(at) => println!("[{}] {}: {}", at.format("%Y-%m-%d %H:%M"), message.sender_id, message.body),
        None => println!("{}: {}", message.sender_id, message.body),
    }
}

async fn chat(mut view: ThreadView) -> Result<(), Box<dyn std::error::Error>> {
    println!("{} ({:?})", view.thread().title, view.thread().status);
    for message in view.messages().await {
        print_message(&message);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/close" => match view.close().await {
                        Ok(()) => println!("Thread closed"),
                        Err(e) => eprintln!("Thread close request failed: {e}"),
                    },
                    body => {
                        if let Err(e) = view.send(body).await {
                            eprintln!("Message not sent: {e}");
                        }
                    }
                }
            }
            incoming = view.next_incoming() => match incoming {
                Some(message) => print_message(&message),
                None => break,
            },
        }
    }

    view.unmount().await;
    Ok(())
}
