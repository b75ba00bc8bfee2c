use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;
use coachboard::backend::firebase::FirebaseBackend;
use coachboard::backend::memory::MemoryBackend;
use coachboard::backend::{Document, FederatedPrompt, FederatedProvider, IdentityBackend};
use coachboard::config::{AppConfig, BackendKind, ConfigError};
use coachboard::navigator::{NavigationError, Navigator};
use coachboard::{AuthError, AuthStore, Profile};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("auth: {0}")]
    Auth(#[from] AuthError),
    #[error("navigation: {0}")]
    Navigation(#[from] NavigationError),
    #[error("terminal io failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "coachboard", about = "Coach/athlete session shell")]
struct Cli {
    /// Identity backend; overrides COACHBOARD_BACKEND.
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Path to open once the session has hydrated.
    #[arg(long, default_value = "/")]
    start: String,

    /// Create demo coach and athlete accounts (memory backend only).
    #[arg(long)]
    seed_demo: bool,
}

const HELP: &str = "\
commands:
  login <email> <password>
  register <email> <password> <name...>
  google
  logout
  go <path>
  whoami
  help
  quit";

/// Reads the provider assertion from the terminal.
struct StdinPrompt {
    label: &'static str,
}

#[async_trait::async_trait]
impl FederatedPrompt for StdinPrompt {
    async fn assertion(&self, provider: FederatedProvider) -> Result<Option<String>, AuthError> {
        let line = read_line(format!("{provider} {} (blank to cancel): ", self.label))
            .await
            .map_err(|e| AuthError::BackendUnavailable(format!("prompt: {e}")))?;
        Ok(line.filter(|l| !l.is_empty()))
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, ".env could not be loaded");
        }
    }

    let cli = Cli::parse();
    let config = AppConfig::from_env_with(cli.backend)?;

    let backend = build_backend(&config, cli.seed_demo).await?;
    let store = AuthStore::with_collection(backend, config.profile_collection.clone());
    let _listener = store.init_auth_listener()?;

    let mut nav = Navigator::new(store.clone());
    match nav.mount(&cli.start).await {
        Ok(location) => println!("at {} ({})", location.path, location.route),
        Err(e) => println!("{e}"),
    }
    println!("{HELP}");

    while let Some(line) = read_line("> ".to_owned()).await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            continue;
        };

        let outcome = match (command, args) {
            ("login", [email, password]) => store.login(email, password).await,
            ("register", [email, password, name @ ..]) if !name.is_empty() => {
                store.register_athlete(&name.join(" "), email, password).await
            }
            ("google", []) => store.login_with_google().await,
            ("logout", []) => store.logout().await,
            ("go", [path]) => {
                report_navigation(nav.navigate(path));
                continue;
            }
            ("whoami", []) => {
                print_session(&store);
                continue;
            }
            ("help", _) => {
                println!("{HELP}");
                continue;
            }
            ("quit" | "exit", _) => break,
            _ => {
                println!("unrecognized command; type 'help'");
                continue;
            }
        };

        match outcome {
            Ok(()) => {
                store.settled().await;
                report_navigation(nav.navigate("/login"));
            }
            Err(e) => println!("error [{}]: {e}", e.error_code()),
        }
    }

    info!("shell exiting");
    Ok(())
}

async fn build_backend(config: &AppConfig, seed_demo: bool) -> Result<Arc<dyn IdentityBackend>, CliError> {
    match (config.backend, &config.firebase) {
        (BackendKind::Memory, _) => {
            let prompt = Arc::new(StdinPrompt { label: "account email" });
            let backend = MemoryBackend::new().with_prompt(prompt);
            if seed_demo {
                seed_demo_accounts(&backend, &config.profile_collection).await?;
            }
            Ok(Arc::new(backend))
        }
        (BackendKind::Firebase, Some(firebase)) => {
            if seed_demo {
                warn!("--seed-demo only applies to the memory backend");
            }
            let prompt = Arc::new(StdinPrompt { label: "ID token" });
            Ok(Arc::new(FirebaseBackend::new(firebase.clone(), prompt)?))
        }
        (BackendKind::Firebase, None) => Err(ConfigError::Missing { var: "FIREBASE_API_KEY" }.into()),
    }
}

async fn seed_demo_accounts(backend: &MemoryBackend, collection: &str) -> Result<(), CliError> {
    let coach = backend.add_account("coach@demo.test", "coach123").await?;
    let mut profile = Profile::athlete("Demo Coach", "coach@demo.test");
    profile.role = Some(coachboard::Role::Coach);
    backend.put_document(collection, &coach.uid, profile_document(&profile)).await;

    let athlete = backend.add_account("athlete@demo.test", "athlete123").await?;
    let profile = Profile::athlete("Demo Athlete", "athlete@demo.test");
    backend.put_document(collection, &athlete.uid, profile_document(&profile)).await;

    info!("seeded coach@demo.test and athlete@demo.test");
    Ok(())
}

fn profile_document(profile: &Profile) -> Document {
    profile.to_write().fields
}

fn report_navigation(result: Result<coachboard::routes::Location, NavigationError>) {
    match result {
        Ok(location) => println!("at {} ({})", location.path, location.route),
        Err(e) => println!("{e}"),
    }
}

fn print_session(store: &AuthStore) {
    let session = store.session();
    match (&session.user, &session.profile) {
        (None, _) => println!("signed out"),
        (Some(user), None) => println!("{} ({}) without profile", user.uid, user.email.as_deref().unwrap_or("-")),
        (Some(user), Some(profile)) => println!(
            "{} ({}) {} role={}",
            user.uid,
            profile.email,
            profile.name,
            profile.role.as_ref().map_or("-", |r| r.as_str())
        ),
    }
}

/// One line from stdin, trimmed; `None` at end of input.
async fn read_line(prompt: String) -> Result<Option<String>, io::Error> {
    tokio::task::spawn_blocking(move || {
        let mut stdout = io::stdout();
        stdout.write_all(prompt.as_bytes())?;
        stdout.flush()?;
        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        Ok((read > 0).then(|| line.trim().to_owned()))
    })
    .await
    .map_err(io::Error::other)?
}
