mod http;
mod load;

use std::sync::Arc;

use argh::FromArgs;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use vpr_features::FastPatchExtractor;
use vpr_pipeline::remote::{FeatureService, RpcServer, SearchService, StageService};
use vpr_pipeline::{Pipeline, PipelineConfig};

/// What this process serves.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Role {
    /// The whole pipeline behind the HTTP endpoint.
    All,
    /// Only the features stage, for remote pipelines.
    Feature,
    /// Only retrieval, pose estimation and visibility, for remote pipelines.
    Search,
}

fn to_role(value: &str) -> Result<Role, String> {
    match value {
        "all" => Ok(Role::All),
        "feature" => Ok(Role::Feature),
        "search" => Ok(Role::Search),
        _ => Err(format!("Unsupported role {value}, expected all, feature or search")),
    }
}

/// Locates query images against recorded place databases
#[derive(Debug, FromArgs)]
struct Args {
    /// database files, or directories holding .vprdb files
    #[argh(positional)]
    databases: Vec<String>,

    /// json file with pipeline parameters
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// address to listen on
    #[argh(option, short = 'a', default = "String::from(\"0.0.0.0:3000\")")]
    addr: String,

    /// what to serve: all, feature or search
    #[argh(option, short = 'r', default = "Role::All", from_str_fn(to_role))]
    role: Role,

    /// address of a remote feature service
    #[argh(option)]
    feature_service: Option<String>,

    /// address of a remote search service
    #[argh(option)]
    search_service: Option<String>,

    /// per-call timeout of remote stages, in milliseconds
    #[argh(option)]
    remote_timeout_ms: Option<u64>,
}

fn usage() -> String {
    let cmd = std::env::args()
        .next()
        .unwrap_or_else(|| "vpr-serve".to_string());
    match Args::from_args(&[cmd.as_str()], &["--help"]) {
        Err(exit) => exit.output,
        Ok(_) => String::new(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Args = argh::from_env();
    if args.databases.is_empty() {
        eprintln!("{}", usage());
        std::process::exit(1);
    }

    env_logger::init();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(ms) = args.remote_timeout_ms {
        config.remote_timeout_ms = ms;
    }

    let listener = TcpListener::bind(&args.addr).await?;

    if args.role == Role::Feature {
        let service = Arc::new(FeatureService::new(Arc::new(FastPatchExtractor::new(
            config.extractor.clone(),
        ))));
        return serve_stage(listener, service).await;
    }

    let files = load::expand_paths(&args.databases);
    if files.is_empty() {
        log::error!("no database files found");
        std::process::exit(1);
    }
    log::info!("🚀 Loading {} database files", files.len());
    let catalog = Arc::new(load::load_catalog(&files)?);

    if args.role == Role::Search {
        let service = Arc::new(SearchService::new(catalog, &config));
        return serve_stage(listener, service).await;
    }

    let mut builder = Pipeline::builder(catalog).config(config);
    if let Some(addr) = args.feature_service {
        builder = builder.remote_features(addr);
    }
    if let Some(addr) = args.search_service {
        builder = builder.remote_search(addr);
    }
    let pipeline = Arc::new(builder.build()?);

    log::info!("🔥 Listening on: http://{}", listener.local_addr()?);
    log::info!("🔧 Press Ctrl+C to stop the server");

    let app = Router::new()
        .route("/", get(|| async { "Visual place recognition" }))
        .route("/api/v0/locate", post(http::locate))
        .with_state(Arc::clone(&pipeline));

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tokio::task::spawn_blocking(move || pipeline.shutdown()).await?;
    Ok(())
}

async fn serve_stage(
    listener: TcpListener,
    service: Arc<dyn StageService>,
) -> Result<(), Box<dyn std::error::Error>> {
    let server = RpcServer::new(listener, service);
    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => log::info!("stage service stopped"),
    }
    Ok(())
}
