use anyhow::Result;
use clap::Parser;
use reservation_service::api;
use reservation_service::config::{Args, Backend};
use reservation_service::db;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let engine = match args.backend {
        Backend::Memory => {
            info!("Using in-memory storage; reservations will not survive a restart");
            reservation_service::in_memory_engine()
        }
        Backend::Postgres => {
            db::run_migrations(args.database_url.clone()).await?;
            let pool = db::connect(&args.database_url, args.pool_size).await?;
            reservation_service::postgres_engine(pool)
        }
    };

    let app = api::create_router(api::AppState { engine }, args.request_timeout());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Reservation service web server started on port {}", args.port);
    info!("Ready to accept HTTP requests at http://0.0.0.0:{}/reservations", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
