//! Quick Basket CLI - Cart inspection and database migrations.
//!
//! # Usage
//!
//! ```bash
//! # Show the signed-in user's cart
//! qb-cli cart show
//!
//! # Add one unit of a product
//! qb-cli cart add <product-id>
//!
//! # Remove one unit of a product
//! qb-cli cart remove <product-id>
//!
//! # Empty the cart
//! qb-cli cart clear
//!
//! # Run cart database migrations
//! qb-cli migrate
//! ```
//!
//! # Backends
//!
//! - `supabase` (default) - PostgREST with the session in `SUPABASE_ACCESS_TOKEN`
//! - `postgres` - direct database access as the user given by `--user`

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand, ValueEnum};
use quick_basket_cart::config::database_url_from_env;
use quick_basket_cart::{
    CartSync, CartSyncConfig, PgCartStore, StaticIdentity, SupabaseCartClient, SupabaseIdentity,
    SyncConfig,
};
use quick_basket_core::{ProductId, UserId};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::cart::{CartAction, CartCommandError};

#[derive(Parser)]
#[command(name = "qb-cli")]
#[command(author, version, about = "Quick Basket CLI tools")]
struct Cli {
    /// Where cart rows are stored
    #[arg(long, value_enum, default_value_t = Backend::Supabase, global = true)]
    backend: Backend,

    /// User to act as (postgres backend only)
    #[arg(long, global = true)]
    user: Option<UserId>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Supabase,
    Postgres,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or change the cart
    Cart {
        #[command(subcommand)]
        action: CartCommand,
    },
    /// Run cart database migrations
    Migrate,
}

#[derive(Subcommand)]
enum CartCommand {
    /// Print the cart with totals
    Show,
    /// Add one unit of a product
    Add {
        /// Product ID
        product: ProductId,
    },
    /// Remove one unit of a product
    Remove {
        /// Product ID
        product: ProductId,
    },
    /// Remove every entry
    Clear,
}

impl From<CartCommand> for CartAction {
    fn from(command: CartCommand) -> Self {
        match command {
            CartCommand::Show => Self::Show,
            CartCommand::Add { product } => Self::Add(product),
            CartCommand::Remove { product } => Self::Remove(product),
            CartCommand::Clear => Self::Clear,
        }
    }
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok().filter(|v| !v.is_empty())?;
    let environment = std::env::var("SENTRY_ENVIRONMENT").ok();

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: environment.map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load .env before reading SENTRY_DSN
    let _ = dotenvy::dotenv();

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "quick_basket_cart=info,qb_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => {
            commands::migrate::run(database_url_from_env().as_ref()).await?;
        }
        Commands::Cart { action } => match cli.backend {
            Backend::Supabase => {
                let config = CartSyncConfig::from_env()?;
                let remote = SupabaseCartClient::new(&config.supabase);
                let identity = SupabaseIdentity::new(&config.supabase, &config.sync);
                let cart = CartSync::new(remote.clone(), identity, config.sync);
                commands::cart::run(&cart, &remote, action.into()).await?;
            }
            Backend::Postgres => {
                let user_id = cli.user.ok_or(CartCommandError::MissingUser)?;
                let database_url =
                    database_url_from_env().ok_or(CartCommandError::MissingDatabaseUrl)?;
                let store = PgCartStore::connect(&database_url)
                    .await
                    .map_err(CartCommandError::from)?;
                let cart = CartSync::new(
                    store.clone(),
                    StaticIdentity::signed_in(user_id),
                    SyncConfig::default(),
                );
                commands::cart::run(&cart, &store, action.into()).await?;
            }
        },
    }
    Ok(())
}
