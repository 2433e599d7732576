#![cfg(not(tarpaulin_include))]

use clap::Parser;
use equipment_desk::config::{
    API_URL_ENV, DEFAULT_API_URL, DEFAULT_SESSION_FILE, REALTIME_URL_ENV, SESSION_FILE_ENV,
};
use equipment_desk::{
    ApiClient, Authenticator, ClientConfig, CommentCountBucket, CommentThread, EquipmentId,
    EquipmentListController, EquipmentRecord, EquipmentUpdate, FetchOutcome, RealtimeChannel,
    RegisterRequest, SessionStore, SpreadsheetTransfer, User, view,
};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Terminal front-end for the equipment inventory service
#[derive(Parser, Debug)]
#[command(name = "equipment-desk", version, about)]
struct Args {
    /// Base URL of the REST API
    #[arg(long, env = API_URL_ENV, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Socket.IO WebSocket URL; derived from the API URL when omitted
    #[arg(long, env = REALTIME_URL_ENV)]
    realtime_url: Option<String>,

    /// Where the session token is kept between runs
    #[arg(long, env = SESSION_FILE_ENV, default_value = DEFAULT_SESSION_FILE)]
    session_file: PathBuf,

    /// Directory for exports and the import template
    #[arg(long, default_value = ".")]
    download_dir: PathBuf,

    /// Show posted comments before their broadcast arrives
    #[arg(long)]
    optimistic_comments: bool,

    /// Rows per page; the server default when omitted
    #[arg(long)]
    per_page: Option<u32>,
}

struct Desk {
    api: ApiClient,
    auth: Authenticator,
    list: EquipmentListController,
    thread: CommentThread,
    transfer: SpreadsheetTransfer,
    download_dir: PathBuf,
    user: Option<User>,
    /// Row whose comment thread was opened last
    selected: Option<EquipmentRecord>,
}

fn print_help(desk: &Desk) {
    println!("Commands:");
    println!("  q: Quit");
    println!("  login <user-or-email> <password>");
    println!("  register <username> <email> <password> [full name]");
    println!("  logout | me");
    println!("  list: Reload the current page");
    let statuses = desk.list.snapshot().statuses;
    if statuses.is_empty() {
        println!("  search <text> | status <name> | category <name>");
    } else {
        println!(
            "  search <text> | status <{}> | category <name>",
            statuses.join("|")
        );
    }
    println!("  comments-filter <0|1|2|3+>   (no argument clears a filter)");
    println!("  filters: Show the status and comment filter choices");
    println!("  page <n> | next | prev | per-page [n]");
    println!("  info <equipment id>");
    println!("  open <equipment id> | close | show");
    println!("  add <comment text> | delete <comment id>");
    println!("  export | template");
    if desk.is_admin() {
        println!("  import <path.xlsx> [field=Header ...]");
        println!(
            "  edit <equipment id> <field=value ...>   (fields: {})",
            EquipmentUpdate::FIELDS.join(", ")
        );
        println!("  remove <equipment id>");
    }
}

impl Desk {
    fn is_admin(&self) -> bool {
        self.user.as_ref().is_some_and(User::is_admin)
    }

    fn show_table(&self) {
        let snapshot = self.list.snapshot();
        print!("{}", view::render_table(&snapshot));
        println!("{}", view::render_pagination(&snapshot));
    }

    fn show_thread(&self) {
        print!(
            "{}",
            view::render_thread(&self.thread.snapshot(), self.selected.as_ref())
        );
    }

    /// The row from the current page, or from the server when it is not listed.
    async fn lookup(&self, id: EquipmentId) -> equipment_desk::Result<EquipmentRecord> {
        let listed = self.list.snapshot().items.into_iter().find(|row| row.id == id);
        match listed {
            Some(row) => Ok(row),
            None => self.api.get_equipment(id).await,
        }
    }

    /// Run one list command and redraw unless a newer request took over.
    fn after_fetch(&self, outcome: equipment_desk::Result<FetchOutcome>) {
        match outcome {
            Ok(FetchOutcome::Applied) | Err(_) => self.show_table(),
            Ok(FetchOutcome::Superseded) => {}
        }
    }

    async fn handle(&mut self, command: &str, argument: &str) -> equipment_desk::Result<()> {
        match command {
            "login" => {
                let mut parts = argument.splitn(2, ' ');
                let login = parts.next().unwrap_or_default();
                let password = parts.next().unwrap_or_default();
                let user = self.auth.login(login, password).await?;
                println!("Welcome, {}", user.full_name.as_deref().unwrap_or(&user.username));
                self.user = Some(user);
                let outcome = self.list.refresh().await;
                self.after_fetch(outcome);
            }
            "register" => {
                let mut parts = argument.splitn(4, ' ');
                let form = RegisterRequest {
                    username: parts.next().unwrap_or_default().to_string(),
                    email: parts.next().unwrap_or_default().to_string(),
                    password: parts.next().unwrap_or_default().to_string(),
                    full_name: parts.next().unwrap_or_default().to_string(),
                };
                let message = self.auth.register(&form).await?;
                println!("{}", message);
                println!("You can log in now.");
            }
            _ if !self.auth.is_authenticated() => {
                println!("Please log in first.");
            }
            "logout" => {
                self.thread.close();
                self.auth.logout().await?;
                self.user = None;
            }
            "me" => {
                let user = self.auth.current_user().await?;
                println!("{} <{}> ({})", user.username, user.email, user.role);
                self.user = Some(user);
            }
            "list" => {
                let outcome = self.list.refresh().await;
                self.after_fetch(outcome);
            }
            "search" => {
                let outcome = self.list.set_query(argument).await;
                self.after_fetch(outcome);
            }
            "status" => {
                let statuses = self.list.snapshot().statuses;
                if !argument.is_empty()
                    && !statuses.is_empty()
                    && !statuses.iter().any(|s| s == argument)
                {
                    println!("Unknown status '{}'. Choose from: {}", argument, statuses.join(", "));
                    return Ok(());
                }
                let outcome = self.list.set_status(argument).await;
                self.after_fetch(outcome);
            }
            "filters" => print!("{}", view::render_filter_options(&self.list.snapshot())),
            "per-page" => {
                let per_page = if argument.is_empty() {
                    None
                } else {
                    match argument.parse::<u32>() {
                        Ok(n) => Some(n),
                        Err(_) => {
                            println!("Usage: per-page [n]");
                            return Ok(());
                        }
                    }
                };
                let outcome = self.list.set_per_page(per_page).await;
                self.after_fetch(outcome);
            }
            "category" => {
                let outcome = self.list.set_category(argument).await;
                self.after_fetch(outcome);
            }
            "comments-filter" => {
                let bucket = if argument.is_empty() {
                    None
                } else {
                    match argument.parse::<CommentCountBucket>() {
                        Ok(bucket) => Some(bucket),
                        Err(e) => {
                            println!("{}", e);
                            return Ok(());
                        }
                    }
                };
                let outcome = self.list.set_comment_count(bucket).await;
                self.after_fetch(outcome);
            }
            "page" => match argument.parse::<u32>() {
                Ok(page) => {
                    let outcome = self.list.set_page(page).await;
                    self.after_fetch(outcome);
                }
                Err(_) => println!("Usage: page <n>"),
            },
            "next" | "prev" => {
                let snapshot = self.list.snapshot();
                let current = snapshot.filters.page;
                let target = if command == "next" {
                    (current + 1).min(snapshot.total_pages.max(1))
                } else {
                    current.saturating_sub(1).max(1)
                };
                let outcome = self.list.set_page(target).await;
                self.after_fetch(outcome);
            }
            "info" => match argument.parse::<EquipmentId>() {
                Ok(id) => {
                    let record = self.api.get_equipment(id).await?;
                    print!("{}", view::render_record(&record));
                }
                Err(_) => println!("Usage: info <equipment id>"),
            },
            "open" => match argument.parse::<EquipmentId>() {
                Ok(id) => {
                    match self.lookup(id).await {
                        Ok(record) => self.selected = Some(record),
                        Err(e) => {
                            log::warn!("Equipment {} could not be loaded: {}", id, e);
                            self.selected = None;
                        }
                    }
                    let result = self.thread.open(id).await;
                    self.show_thread();
                    result?;
                }
                Err(_) => println!("Usage: open <equipment id>"),
            },
            "close" => self.thread.close(),
            "show" => self.show_thread(),
            "add" => {
                self.thread.add_comment(argument).await?;
                println!("Comment posted.");
            }
            "delete" => match argument.parse::<i64>() {
                Ok(id) => {
                    self.thread.delete_comment(id).await?;
                    println!("Delete requested.");
                }
                Err(_) => println!("Usage: delete <comment id>"),
            },
            "export" => {
                let path = self.transfer.export_to(&self.download_dir).await?;
                println!("Saved {}", path.display());
            }
            "template" => {
                let path = self.transfer.template_to(&self.download_dir).await?;
                println!("Saved {}", path.display());
            }
            "import" if self.is_admin() => {
                let mut parts = argument.split_whitespace();
                let path = parts.next().unwrap_or_default();
                let column_map: BTreeMap<String, String> = parts
                    .filter_map(|pair| pair.split_once('='))
                    .map(|(field, header)| (field.to_string(), header.to_string()))
                    .collect();
                let outcome = self
                    .transfer
                    .import_path(Path::new(path), Some(&column_map))
                    .await?;
                println!("{}", outcome.message);
                let outcome = self.list.refresh().await;
                self.after_fetch(outcome);
            }
            "edit" if self.is_admin() => {
                let mut parts = argument.split_whitespace();
                let Some(Ok(id)) = parts.next().map(str::parse::<EquipmentId>) else {
                    println!("Usage: edit <equipment id> <field=value ...>");
                    return Ok(());
                };
                let rest: Vec<&str> = parts.collect();
                let changes = match EquipmentUpdate::parse(&rest.join(" ")) {
                    Ok(changes) => changes,
                    Err(e) => {
                        println!("{}", e);
                        return Ok(());
                    }
                };
                if changes.is_empty() {
                    println!("Nothing to change.");
                    return Ok(());
                }
                let reply = self.api.update_equipment(id, &changes).await?;
                println!("{}", reply.message);
                if self.selected.as_ref().is_some_and(|r| r.id == id) {
                    self.selected = self.api.get_equipment(id).await.ok();
                }
                let outcome = self.list.refresh().await;
                self.after_fetch(outcome);
            }
            "remove" if self.is_admin() => match argument.parse::<EquipmentId>() {
                Ok(id) => {
                    let reply = self.api.delete_equipment(id).await?;
                    println!("{}", reply.message);
                    if self.thread.snapshot().equipment_id == Some(id) {
                        self.thread.close();
                        self.selected = None;
                    }
                    let outcome = self.list.refresh().await;
                    self.after_fetch(outcome);
                }
                Err(_) => println!("Usage: remove <equipment id>"),
            },
            _ => println!("invalid command, type 'help'"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ClientConfig {
        api_url: args.api_url.trim_end_matches('/').to_string(),
        realtime_url: args.realtime_url,
        session_file: args.session_file,
    };
    let session = SessionStore::file(&config.session_file);
    let api = ApiClient::new(&config, session)?;
    let channel = RealtimeChannel::connect_lazy(config.realtime_endpoint());

    let mut desk = Desk {
        api: api.clone(),
        auth: Authenticator::new(api.clone()),
        list: EquipmentListController::new(api.clone(), &channel).with_per_page(args.per_page),
        thread: CommentThread::new(api.clone(), channel.clone())
            .with_optimistic_insert(args.optimistic_comments),
        transfer: SpreadsheetTransfer::new(api),
        download_dir: args.download_dir,
        user: None,
        selected: None,
    };

    if desk.auth.is_authenticated() {
        match desk.auth.current_user().await {
            Ok(user) => {
                println!("Signed in as {}", user.username);
                desk.user = Some(user);
                let outcome = desk.list.refresh().await;
                desk.after_fetch(outcome);
            }
            Err(e) => log::warn!("Stored session could not be used: {}", e),
        }
    } else {
        println!("Not signed in. Use 'login' or 'register'.");
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "q" {
            break;
        }
        if line == "help" {
            print_help(&desk);
            continue;
        }

        let (command, argument) = line.split_once(' ').unwrap_or((line, ""));
        if let Err(e) = desk.handle(command, argument.trim()).await {
            println!("{}", e);
        }
    }

    desk.thread.close();
    Ok(())
}
