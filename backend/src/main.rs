use std::env;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};

use backend::analytics::AnalyticsService;
use backend::config::AppConfig;
use backend::inference::Predictor;
use backend::inference::registry::ModelRegistry;
use backend::routes::configure_routes;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    dotenv::dotenv().ok();

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config = AppConfig::from_env();

    let registry = ModelRegistry::load(&config);
    if registry.loaded_tasks() == 0 {
        log::warn!("No models could be loaded; every task will report unavailable");
    } else {
        log::info!("Loaded {}/{} task models", registry.loaded_tasks(), 4);
    }
    let predictor: Arc<dyn Predictor> = Arc::new(registry);

    let analytics = if config.enable_analytics {
        Some(AnalyticsService::new(config.analytics_table.clone()).await)
    } else {
        log::info!("Analytics disabled by configuration");
        None
    };

    let bind_address = format!("0.0.0.0:{}", config.port);
    log::info!("Starting server on {}", bind_address);

    let frontend_dir = config.frontend_dir.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(web::Data::from(predictor.clone()))
            .app_data(web::Data::new(analytics.clone()))
            .app_data(web::Data::new(config.clone()))
            .configure(|cfg| configure_routes(cfg, frontend_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
