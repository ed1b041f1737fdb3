use clap::Parser;
use cinevault::cli::{
    Args, build_config, handle_grant_admin, init_logging, load_token_secrets, open_database,
};
use cinevault::{create_app, init_cleanup, run_server};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // A missing .env file is fine; real deployments set the environment directly.
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_format);

    let secrets = match load_token_secrets(
        args.access_secret_file.as_deref(),
        args.refresh_secret_file.as_deref(),
    ) {
        Ok(secrets) => secrets,
        Err(e) => {
            error!(error = %e, "Invalid token secret configuration");
            std::process::exit(1);
        }
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(email) = args.grant_admin.as_deref() {
        handle_grant_admin(&db, email).await;
    }

    let config = build_config(&args, db, secrets);
    let app = match create_app(&config) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "Failed to build application");
            std::process::exit(1);
        }
    };

    init_cleanup(&config).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(e) => info!(address = %addr, error = %e, "Listening"),
    }

    if let Err(e) = run_server(app, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
