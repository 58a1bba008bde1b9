use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use commercium_user_service::auth::handlers;
use commercium_user_service::config::CorsConfig;
use commercium_user_service::{health_check, init_tracing, json_config, AppError, AppState, Settings};
use dotenv::dotenv;
use std::net::TcpListener;
use tracing::info;

fn cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        // Same-origin only.
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
    } else {
        config
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
            .allowed_headers(vec!["Authorization", "Content-Type"])
            .supports_credentials()
    };

    cors.max_age(config.max_age as usize)
}

#[actix_web::main]
async fn main() -> commercium_user_service::Result<()> {
    // Load environment variables
    dotenv().ok();

    let config = Settings::new()?;
    config.validate()?;

    init_tracing(&config.logging);
    info!(environment = %config.environment, "Configuration loaded successfully");

    let state = AppState::new(config.clone()).await?;
    let data = web::Data::new(state.clone());

    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;
    info!("Starting server at {}:{}", config.server.host, config.server.port);

    let cors_config = config.cors.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(cors(&cors_config))
            .app_data(data.clone())
            .app_data(json_config())
            .route("/health", web::get().to(health_check))
            .configure(handlers::configure)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    state.shutdown().await?;
    info!("Server stopped");
    Ok(())
}
