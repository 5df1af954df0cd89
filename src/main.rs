use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use showcomposer::api;
use showcomposer::companion::CompanionLink;
use showcomposer::config::{Config, ServeArgs};

#[derive(Parser)]
#[command(name = "showcomposer")]
#[command(version, about = "Serves show composer content and moves projects between installations")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default)
    Serve(ServeArgs),
}

impl Cli {
    fn serve_args(self) -> ServeArgs {
        match self.command {
            Some(Commands::Serve(args)) => args,
            None => self.serve,
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "showcomposer=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::from_args(cli.serve_args())?;
    let port = config.http_port;

    tracing::info!("Serving show composer content");
    tracing::info!("  Data directory: {}", config.data_dir().display());
    tracing::info!("  Http Port: {}", port);
    tracing::info!("  WebSocket Address: {}", config.ws_address);
    tracing::info!("  WebSocket Port: {}", config.ws_port);

    let companion = config
        .auto_close
        .then(|| CompanionLink::new(config.companion_url(), config.endpoints.clone()));

    let state = api::AppState::open(config)?;
    let sweeper = api::spawn_session_sweeper(&state);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        match companion {
            Some(link) => {
                tracing::info!("Watching companion at {}", link.url());
                link.watch().await
            }
            None => std::future::pending().await,
        }
    })
    .await?;

    sweeper.abort();
    Ok(())
}
