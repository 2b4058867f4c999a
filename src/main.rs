use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use blog::auth::MIN_SECRET_LEN;
use blog::config::AppConfig;
use blog::openapi::ApiDoc;
use blog::repo::Repo;
use blog::storage::build_image_store;
use blog::{config, AppState, PostMutationService};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env automatically only in debug builds; production sets the environment externally.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    validate_env_vars();
    let cfg = AppConfig::from_env();
    info!("Bootstrapping blog server");
    info!("Data dir: {}", cfg.data_dir.display());
    info!("Image backend: {:?}, upload limit {} bytes", cfg.image_backend, cfg.max_upload_bytes);

    let repo: Arc<dyn Repo> = build_repo(&cfg).await?;
    let image_store = build_image_store(&cfg).await.map_err(|e| {
        error!("Failed to initialize image store: {e}");
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    let state = AppState {
        posts: PostMutationService::new(repo, image_store),
        max_upload_bytes: cfg.max_upload_bytes,
    };
    let openapi = ApiDoc::openapi();
    let frontend_url = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                // local dev frontends
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Some(front) = &frontend_url {
                c = c.allowed_origin(front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind((cfg.host.as_str(), cfg.port))?;

    info!("Listening on http://{}:{}", cfg.host, cfg.port);

    server.run().await
}

#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
async fn build_repo(cfg: &AppConfig) -> std::io::Result<Arc<dyn Repo>> {
    info!("Using in-memory repository backend");
    Ok(Arc::new(blog::repo::inmem::InMemRepo::new(&cfg.data_dir)))
}

#[cfg(feature = "postgres-store")]
async fn build_repo(_cfg: &AppConfig) -> std::io::Result<Arc<dyn Repo>> {
    use sqlx::postgres::PgPoolOptions;
    let to_io = |e: String| std::io::Error::new(std::io::ErrorKind::Other, e);
    let db_url = std::env::var("DATABASE_URL")
        .map_err(|_| to_io("DATABASE_URL must be set for postgres-store".into()))?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .map_err(|e| to_io(format!("failed to connect to Postgres: {e}")))?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| to_io(format!("migrations failed: {e}")))?;
    info!("Using Postgres repository backend");
    Ok(Arc::new(blog::repo::pg::PgRepo::new(pool)))
}

/// Exit early when required environment variables are missing or weak.
fn validate_env_vars() {
    match std::env::var("JWT_SECRET") {
        Err(_) => {
            error!("Missing required environment variable JWT_SECRET");
            error!("Please copy .env.example to .env and configure it");
            std::process::exit(1);
        }
        Ok(secret) if secret.len() < MIN_SECRET_LEN => {
            error!("JWT_SECRET must be at least {MIN_SECRET_LEN} characters long");
            std::process::exit(1);
        }
        Ok(_) => {}
    }
}
