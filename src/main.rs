use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Password};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod chat;

use parley_core::{
    detect_sensitive_data, AdminConsole, AuthState, Backend, Config, ConfigArea, HttpBackend,
    ImageConfig, ImageEngine, LocalStore, ModelConfig, ModelRegistry, OnPremConfig, SessionId,
    SessionStore, VideoConfig,
};

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Command-line client for a multi-model chat backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and remember the session
    Signin {
        email: String,
        /// Prompted for when omitted
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Sign out and forget cached identity and models
    Signout,
    /// Show who is signed in
    Whoami,
    /// List available models
    Models {
        /// Fetch the list again from the backend
        #[arg(short, long)]
        refresh: bool,
        /// Make this model the default for new messages
        #[arg(short, long)]
        select: Option<String>,
    },
    /// List chat sessions
    Sessions,
    /// Interactive chat
    Chat {
        /// Session id to continue; a new session is started otherwise
        #[arg(short, long)]
        session: Option<String>,
        #[command(flatten)]
        send: SendArgs,
    },
    /// Send one message in the current session
    Send {
        message: String,
        /// Start a new session for this message
        #[arg(short, long)]
        new: bool,
        #[command(flatten)]
        send: SendArgs,
    },
    /// Delete a session
    Delete { session: String },
    /// Rename a session
    Rename { session: String, title: String },
    /// Pin or unpin a session
    Pin { session: String },
    /// Check text for sensitive data without sending it
    Scan { text: String },
    /// Upload a file and print its attachment id
    Upload { path: PathBuf },
    /// Update image, video or on-prem model configuration (admins only)
    Admin {
        #[command(subcommand)]
        area: AdminCommand,
    },
}

#[derive(Args, Clone, Default)]
pub struct SendArgs {
    /// Model to use instead of the selected one
    #[arg(short, long)]
    pub model: Option<String>,
    /// Attach files to the message
    #[arg(short, long = "file")]
    pub files: Vec<PathBuf>,
    /// Let the backend search the web
    #[arg(long)]
    pub web_search: bool,
    /// Let the backend generate images
    #[arg(long)]
    pub image_generation: bool,
    /// Let the backend run code
    #[arg(long)]
    pub code_interpreter: bool,
}

#[derive(Subcommand)]
enum AdminCommand {
    /// Image generation engine
    Image {
        /// openai, comfyui or automatic1111
        #[arg(long)]
        engine: String,
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: String,
        #[arg(long, default_value = "512x512")]
        size: String,
        #[arg(long, default_value = "50")]
        steps: u32,
        #[arg(long)]
        disable: bool,
    },
    /// Video generation engine
    Video {
        #[arg(long)]
        engine: String,
        #[arg(long)]
        model: String,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        disable: bool,
    },
    /// On-prem model endpoint
    Onprem {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        model_id: String,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        disable: bool,
    },
    /// Show the last configuration sent from this machine
    Show,
}

/// Everything a command needs, wired the same way for every command.
pub struct App {
    pub auth: Arc<AuthState>,
    pub models: Arc<ModelRegistry>,
    pub sessions: SessionStore,
    pub admin: AdminConsole,
}

impl App {
    fn open(config: &Config) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let store = LocalStore::open(&data_dir)
            .with_context(|| format!("opening data directory {}", data_dir.display()))?;
        let backend: Arc<dyn Backend> = Arc::new(HttpBackend::from_config(config)?);
        debug!(base_url = config.base_url(), data_dir = %data_dir.display(), "client configured");

        let auth = Arc::new(AuthState::new(backend.clone(), store.clone(), config));
        let models = Arc::new(ModelRegistry::new(
            backend.clone(),
            store.clone(),
            config.default_model.clone(),
        ));
        let sessions = SessionStore::open(backend.clone(), store.clone(), models.clone());
        let admin = AdminConsole::new(backend, store, auth.clone());

        Ok(Self {
            auth,
            models,
            sessions,
            admin,
        })
    }

    async fn resolve_session(&self, raw: &str) -> Result<SessionId> {
        if let Some(id) = self.sessions.find_id(raw).await {
            return Ok(id);
        }
        self.sessions.sync_sessions().await?;
        match self.sessions.find_id(raw).await {
            Some(id) => Ok(id),
            None => bail!("no session with id {}", raw),
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PARLEY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config = Config::load()?;
    let app = App::open(&config)?;

    match cli.command {
        Commands::Signin { email, password } => sign_in(&app, &email, password).await?,
        Commands::Signout => {
            app.auth.sign_out().await?;
            app.models.reset().await;
            app.sessions.clear().await;
            println!("{}", "Signed out".green());
        }
        Commands::Whoami => whoami(&app).await,
        Commands::Models { refresh, select } => list_models(&app, refresh, select).await?,
        Commands::Sessions => list_sessions(&app).await?,
        Commands::Chat { session, send } => {
            require_sign_in(&app).await?;
            chat::interactive(&app, session.as_deref(), &send).await?
        }
        Commands::Send { message, new, send } => {
            require_sign_in(&app).await?;
            app.sessions.initialize().await?;
            if new {
                app.sessions.create_new_session().await;
            }
            chat::send(&app, &message, &send).await?
        }
        Commands::Delete { session } => {
            let id = app.resolve_session(&session).await?;
            if app.sessions.delete_session(&id).await? {
                println!("🗑️  Deleted {}", id.to_string().dimmed());
            } else {
                println!("{}", "The backend refused the delete; the session was kept".yellow());
            }
        }
        Commands::Rename { session, title } => {
            let id = app.resolve_session(&session).await?;
            app.sessions.rename_session(&id, &title).await?;
            println!("Renamed {} to {}", id.to_string().dimmed(), title.bold());
        }
        Commands::Pin { session } => {
            let id = app.resolve_session(&session).await?;
            let pinned = app.sessions.toggle_pin(&id).await?;
            println!("{} {}", if pinned { "📌 Pinned" } else { "Unpinned" }, id.to_string().dimmed());
        }
        Commands::Scan { text } => chat::print_scan(&detect_sensitive_data(&text)),
        Commands::Upload { path } => {
            let attachment = app.sessions.upload_file(&path).await?;
            println!("📎 {} {}", attachment.name.bold(), attachment.id.dimmed());
        }
        Commands::Admin { area } => admin(&app, area).await?,
    }

    Ok(())
}

async fn require_sign_in(app: &App) -> Result<()> {
    if !app.auth.is_signed_in().await {
        bail!("not signed in; run `parley signin <email>` first");
    }
    Ok(())
}

async fn sign_in(app: &App, email: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => Password::with_theme(&ColorfulTheme::default())
            .with_prompt("Password")
            .interact()?,
    };

    let session = app.auth.sign_in(email, &password).await?;
    println!(
        "{} {} ({})",
        "Signed in as".green(),
        session.user.email.bold(),
        session.role.as_str()
    );
    if !session.verified {
        println!("{}", "Backend did not confirm this identity; signed in locally".yellow());
    }

    app.models.reset().await;
    app.sessions.initialize().await?;
    Ok(())
}

async fn whoami(app: &App) {
    match app.auth.current().await {
        Some(session) => {
            println!("{} <{}>", session.user.name.bold(), session.user.email);
            println!("  role: {}", session.role.as_str().cyan());
            println!("  verified by backend: {}", session.verified);
        }
        None => println!("{}", "Not signed in".yellow()),
    }
}

async fn list_models(app: &App, refresh: bool, select: Option<String>) -> Result<()> {
    let models = if refresh {
        app.models.refresh_models().await
    } else {
        app.models.ensure_models_loaded().await
    };

    if let Some(id) = select {
        app.models.select_model(&id).await?;
        Config::save_default_model(&id)?;
    }
    let selected = app.models.selected_model().await;

    println!("\n{}", "🤖 Available Models".bold().blue());
    println!("{}", "=".repeat(30).dimmed());
    for model in models {
        let marker = if selected.as_deref() == Some(model.id.as_str()) { "▶" } else { " " };
        let line = format!("{} {} ({})", marker, model.name, model.id);
        if model.enabled {
            println!("{}", line.green());
        } else {
            println!("{}  {}", line.dimmed(), "disabled".dimmed());
        }
        if !model.description.is_empty() {
            println!("    {}", model.description.dimmed());
        }
    }
    Ok(())
}

async fn list_sessions(app: &App) -> Result<()> {
    app.sessions.sync_sessions().await?;
    let sessions = app.sessions.sessions().await;
    let current = app.sessions.current_session_id().await;

    if sessions.is_empty() {
        println!("{}", "No sessions yet. Start one with: parley chat".yellow());
        return Ok(());
    }

    println!("\n{}", "💬 Sessions".bold().blue());
    println!("{}", "=".repeat(30).dimmed());
    for session in sessions {
        let marker = if current.as_ref() == Some(&session.id) { "▶" } else { " " };
        let pin = if session.pinned { "📌 " } else { "" };
        println!(
            "{} {}{}  {}",
            marker,
            pin,
            session.title.bold(),
            session.id.to_string().dimmed()
        );
        println!(
            "    {} · {} messages · {}",
            session.updated_at.format("%Y-%m-%d %H:%M"),
            session.messages.len(),
            if session.id.is_remote() { "synced" } else { "local" }
        );
    }
    Ok(())
}

async fn admin(app: &App, command: AdminCommand) -> Result<()> {
    let config = match command {
        AdminCommand::Show => {
            for area in [ConfigArea::Image, ConfigArea::Video, ConfigArea::OnPrem] {
                let cached = app.admin.cached(area)?;
                let text = match cached {
                    Some(value) => serde_json::to_string_pretty(&value)?,
                    None => "not configured from this machine".dimmed().to_string(),
                };
                println!("{}\n{}\n", area.as_str().bold(), text);
            }
            return Ok(());
        }
        AdminCommand::Image {
            engine,
            base_url,
            api_key,
            model,
            size,
            steps,
            disable,
        } => {
            let engine = match engine.to_lowercase().as_str() {
                "openai" => ImageEngine::OpenAi {
                    api_base_url: base_url,
                    api_key: api_key.unwrap_or_default(),
                },
                "comfyui" => ImageEngine::ComfyUi {
                    base_url,
                    workflow: serde_json::Value::Null,
                },
                "automatic1111" => ImageEngine::Automatic1111 { base_url, steps },
                other => bail!("unknown image engine {}", other),
            };
            ModelConfig::Image(ImageConfig {
                enabled: !disable,
                engine,
                model,
                image_size: size,
            })
        }
        AdminCommand::Video {
            engine,
            model,
            api_key,
            disable,
        } => ModelConfig::Video(VideoConfig {
            enabled: !disable,
            engine,
            model,
            api_key,
        }),
        AdminCommand::Onprem {
            endpoint,
            model_id,
            api_key,
            disable,
        } => ModelConfig::OnPrem(OnPremConfig {
            enabled: !disable,
            endpoint,
            model_id,
            api_key,
        }),
    };

    app.admin.apply(&config).await?;
    println!("{} {}", "Updated".green(), config.area().as_str().bold());
    Ok(())
}
