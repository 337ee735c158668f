use anyhow::Result;
use std::sync::Arc;

mod cache;
mod config;
mod error;
mod gateway;
mod guard;
mod session;

use config::{Command, Config};
use error::ApiError;
use session::SessionController;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(api_url = %config.api_url, store = %config.store_file.display(), "Starting");

    // Wire the session stack: the controller is the single writer of the
    // token cell and the store; the gateway only reads the cell
    let token = gateway::TokenCell::new();
    let response_cache = cache::ResponseCache::new(config.cache_ttl);
    let (invalidation_tx, invalidation_rx) = tokio::sync::mpsc::unbounded_channel();

    let request_gateway = Arc::new(gateway::RequestGateway::new(
        &config.api_url,
        token.clone(),
        invalidation_tx,
        response_cache.clone(),
        config.connect_timeout,
        config.request_timeout,
    )?);

    let store = session::CredentialStore::new(config.store_file.clone());
    let controller = SessionController::new(
        store,
        request_gateway,
        token,
        response_cache,
        config.session_ttl,
        config.refresh_threshold,
    );
    controller.listen_for_invalidation(invalidation_rx);

    match command {
        Command::Login { identifier } => run_login(&controller, identifier).await,
        Command::Status { path } => run_status(&controller, &path).await,
        Command::Watch => run_watch(&controller).await,
        Command::Logout { path } => run_logout(&controller, &path).await,
    }
}

async fn run_login(controller: &Arc<SessionController>, identifier: Option<String>) -> Result<()> {
    let identifier = match identifier {
        Some(identifier) => identifier,
        None => dialoguer::Input::<String>::new()
            .with_prompt("Identifier")
            .interact_text()?,
    };

    let secret: String = dialoguer::Password::new().with_prompt("Password").interact()?;

    match controller.login(&identifier, &secret, None).await {
        Ok(outcome) => {
            let user = outcome.session.user.as_ref();
            println!(
                "✅ Signed in as {}",
                user.and_then(|u| u.name.as_deref())
                    .or(user.and_then(|u| u.email.as_deref()))
                    .unwrap_or(&identifier)
            );
            println!("   Continue at: {}", outcome.redirect_to);
            Ok(())
        }
        Err(ApiError::Credentials(message)) => {
            // Shown inline next to the form in the web UI; the session
            // state is untouched and the user just retries
            eprintln!("❌ Login failed: {}", message);
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_status(controller: &Arc<SessionController>, path: &str) -> Result<()> {
    let session = controller.bootstrap().await;

    println!("Status:  {:?}", session.status);
    match &session.user {
        Some(user) => println!(
            "User:    {} ({}){}",
            user.name.as_deref().unwrap_or(&user.id),
            user.email.as_deref().unwrap_or("no email"),
            if user.is_admin { " [admin]" } else { "" }
        ),
        None => println!("User:    -"),
    }
    if let Some(error) = &session.last_error {
        println!("Error:   {}", error.message);
    }

    // Bootstrap has settled, so the grace window no longer applies
    match guard::decide(session.status, true, path) {
        guard::RouteDecision::Render => println!("Guard:   render {}", path),
        guard::RouteDecision::Loading => println!("Guard:   loading"),
        guard::RouteDecision::RedirectToLogin { target } => {
            println!("Guard:   redirect to {}", target)
        }
    }

    Ok(())
}

async fn run_watch(controller: &Arc<SessionController>) -> Result<()> {
    let mut events = controller.subscribe();

    let session = controller.bootstrap().await;
    println!("Session: {:?}", session.status);

    loop {
        tokio::select! {
            changed = events.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = events.borrow_and_update().clone();
                println!(
                    "Session: {:?}{}",
                    session.status,
                    session
                        .last_error
                        .as_ref()
                        .map(|e| format!(" ({})", e.message))
                        .unwrap_or_default()
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn run_logout(controller: &Arc<SessionController>, path: &str) -> Result<()> {
    match controller.logout(Some(path)).await {
        Some(target) => println!("👋 Signed out, continue at {}", target),
        None => println!("👋 Signed out"),
    }
    Ok(())
}
