use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use anime_embed_resolver::app_state::AppState;
use anime_embed_resolver::browser::ChromeLauncher;
use anime_embed_resolver::config::Config;
use anime_embed_resolver::db::SqliteStore;
use anime_embed_resolver::diagnostics::ScreenshotSink;
use anime_embed_resolver::pipeline::{Collaborators, ErrorKind, Pipeline, ResolveError, Settings};
use anime_embed_resolver::site_registry::ProfileRegistry;
use log::{error, info, LevelFilter};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct EmbedQuery {
    url: Option<String>,
    force: Option<String>,
    #[serde(rename = "continue")]
    continue_job: Option<String>,
}

fn flag(value: &Option<String>) -> bool {
    matches!(
        value.as_deref().map(|v| v.to_lowercase()).as_deref(),
        Some("true") | Some("1") | Some("yes")
    )
}

fn error_response(err: &ResolveError) -> HttpResponse {
    let kind = err.kind();
    let mut body = json!({ "error": err.to_string(), "kind": kind });

    match err {
        ResolveError::PersistenceFailed {
            partial: Some(result),
            ..
        } => {
            body["result"] = serde_json::to_value(result).unwrap_or(serde_json::Value::Null);
        }
        ResolveError::MainPageUnreachable {
            artifact: Some(path),
            ..
        } => {
            body["artifact"] = json!(path);
        }
        _ => {}
    }

    let mut builder = if kind.is_input_error() {
        HttpResponse::BadRequest()
    } else if kind == ErrorKind::MainPageUnreachable {
        HttpResponse::GatewayTimeout()
    } else {
        HttpResponse::InternalServerError()
    };
    builder.json(body)
}

#[get("/get-embed")]
async fn get_embed(data: web::Data<AppState>, query: web::Query<EmbedQuery>) -> impl Responder {
    let url = query.url.clone().unwrap_or_default();
    let force_refresh = flag(&query.force);
    let continue_job = flag(&query.continue_job);
    info!(
        "get-embed url={} force={} continue={}",
        url, force_refresh, continue_job
    );

    // Jobs sleep between episodes and retries; keep that off the async workers
    let pipeline = data.pipeline.clone();
    match web::block(move || pipeline.resolve(&url, force_refresh, continue_job)).await {
        Ok(Ok(resolution)) => HttpResponse::Ok().json(resolution),
        Ok(Err(e)) => {
            error!("get-embed failed: {}", e);
            error_response(&e)
        }
        Err(e) => {
            error!("Blocking task failed: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": format!("internal error: {}", e),
                "kind": ErrorKind::InternalAutomationError,
            }))
        }
    }
}

#[post("/reload-config")]
async fn reload_config(data: web::Data<AppState>) -> impl Responder {
    match data.pipeline.reload_profiles() {
        Ok(count) => HttpResponse::Ok().json(json!({
            "message": "Site profiles reloaded",
            "profiles": count,
            "path": data.config.profiles_path,
        })),
        Err(e) => HttpResponse::InternalServerError().json(json!({
            "error": format!("Failed to reload site profiles: {}", e),
        })),
    }
}

#[get("/metrics")]
async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    let all_metrics = data.pipeline.metrics().get_all_metrics();

    let metrics_json: Vec<serde_json::Value> = all_metrics
        .iter()
        .map(|m| {
            json!({
                "site": m.site,
                "success_rate": format!("{:.2}%", m.success_rate()),
                "episodes_resolved": m.episodes_resolved,
                "live_successes": m.live_successes,
                "snapshot_fallbacks": m.snapshot_fallbacks,
                "failures": m.failures,
                "retry_count": m.retry_count,
                "timeout_count": m.timeout_count,
                "last_success": m.last_success,
                "last_failure": m.last_failure,
                "last_error": m.last_error,
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "max_retries": data.config.extraction.max_retries,
        "sites": metrics_json,
    }))
}

fn init_logging() {
    if let Err(e) = log4rs::init_file("log4rs.yml", Default::default()) {
        use log4rs::append::console::ConsoleAppender;
        use log4rs::config::{Appender, Config as LogConfig, Root};

        let stdout = ConsoleAppender::builder().build();
        match LogConfig::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        {
            Ok(config) => {
                if log4rs::init_config(config).is_ok() {
                    log::warn!("log4rs.yml not usable ({}), logging to console", e);
                }
            }
            Err(build_err) => eprintln!("Logging disabled: {}", build_err),
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    init_logging();

    let cfg = Config::load();

    let profiles = ProfileRegistry::load(&cfg.profiles_path).map_err(|e| {
        error!("Cannot load site profiles from {}: {}", cfg.profiles_path, e);
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    })?;

    let store = Arc::new(SqliteStore::open(&cfg.database_path).map_err(|e| {
        error!("Cannot open database {}: {}", cfg.database_path, e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?);

    let launcher = Arc::new(ChromeLauncher::new(cfg.browser.browser_config()));

    log::info!("Extraction settings:");
    log::info!("  Max retries: {}", cfg.extraction.max_retries);
    log::info!("  Navigation timeout: {}s", cfg.extraction.navigation_timeout_secs);
    log::info!("  Headless: {}", cfg.browser.headless);

    let parts = Collaborators::new(launcher, store.clone(), store)
        .with_sink(Arc::new(ScreenshotSink::new(&cfg.screenshot_dir)));
    let pipeline = Arc::new(Pipeline::new(
        profiles,
        parts,
        Settings::from_config(&cfg.extraction),
    ));

    let host = cfg.bind_host.clone();
    let ports = cfg.ports();
    let data = web::Data::new(AppState {
        pipeline,
        config: cfg,
    });

    // Try to bind to an available port in the configured range
    let mut last_err: Option<std::io::Error> = None;
    for port in ports.clone() {
        let data_clone = data.clone();
        let addr = format!("{}:{}", host, port);
        match HttpServer::new(move || {
            App::new()
                .app_data(data_clone.clone())
                .service(get_embed)
                .service(reload_config)
                .service(get_metrics)
        })
        .bind(&addr)
        {
            Ok(server) => {
                info!("Listening on {}", addr);
                return server.run().await;
            }
            Err(e) => {
                last_err = Some(e);
                continue;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!("No available ports {}-{}", ports.start(), ports.end()),
        )
    }))
}
