mod runner;
mod task;

use actix_files::NamedFile;
use actix_web::{get, post, web, App, HttpRequest, HttpResponse, HttpServer};
use std::collections::HashMap;
use task::{AgentState, Target};
use uuid::Uuid;

fn forbidden() -> HttpResponse {
    HttpResponse::Forbidden().json(serde_json::json!({ "error": "task_id mismatch" }))
}

/// `GET /status` — plain liveness probe a runner polls before any task
/// exists, distinct from the per-task `/{task}/ready` (§4.5 "VM lifecycle").
/// Always 200 once the server is accepting connections.
#[get("/status")]
async fn status() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// `GET /new_task` — starts a fresh task, discarding whatever task was
/// previously active (§4.5 step 1).
#[get("/new_task")]
async fn new_task(state: web::Data<AgentState>) -> HttpResponse {
    match state.start_new_task().await {
        Ok(id) => HttpResponse::Ok().json(serde_json::json!({ "task_id": id })),
        Err(e) => HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() })),
    }
}

/// `POST /{task}/module_update` — uploads the module source file (§4.5
/// step 2). The body is the raw file content.
#[post("/{task}/module_update")]
async fn module_update(
    state: web::Data<AgentState>,
    path: web::Path<Uuid>,
    body: web::Bytes,
) -> HttpResponse {
    let id = path.into_inner();
    if !state.matches(id).await {
        return forbidden();
    }
    let dest = state
        .with_task(id, |t| t.scratch_dir.join("module_source"))
        .await
        .unwrap();
    if let Err(e) = tokio::fs::write(&dest, &body).await {
        return HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }));
    }
    state.with_task(id, |t| t.module_path = Some(dest)).await;
    HttpResponse::Ok().finish()
}

#[derive(serde::Deserialize)]
struct ModuleUpdateInfo {
    name: String,
    #[serde(default)]
    config: HashMap<String, serde_json::Value>,
}

/// `POST /{task}/module_update_info` — which class to instantiate, with
/// which configuration (§4.5 step 3).
#[post("/{task}/module_update_info")]
async fn module_update_info(
    state: web::Data<AgentState>,
    path: web::Path<Uuid>,
    body: web::Json<ModuleUpdateInfo>,
) -> HttpResponse {
    let id = path.into_inner();
    if !state.matches(id).await {
        return forbidden();
    }
    state
        .with_task(id, |t| {
            t.module_name = Some(body.name.clone());
            t.config = body.config.clone();
        })
        .await;
    HttpResponse::Ok().finish()
}

/// Minimal percent-decoder for the single `data=<url>` field the
/// `module_each` endpoint accepts for URL targets — the request shape is
/// one fixed field, not general form data, so a small hand-rolled decoder
/// covers it without a new dependency.
fn decode_data_field(body: &[u8]) -> Option<String> {
    let body = std::str::from_utf8(body).ok()?;
    let value = body.strip_prefix("data=")?;
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '+' => out.push(' '),
            '%' => {
                let hi = chars.next()?;
                let lo = chars.next()?;
                let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16).ok()?;
                out.push(byte as char);
            }
            c => out.push(c),
        }
    }
    Some(out)
}

/// `POST /{task}/module_each/{type}` — the file stream, or `data=url` for
/// URL targets (§4.5 step 4). Kicks off module execution in the
/// background and flips `ready` once it completes.
#[post("/{task}/module_each/{type}")]
async fn module_each(
    req: HttpRequest,
    state: web::Data<AgentState>,
    path: web::Path<(Uuid, String)>,
    body: web::Bytes,
) -> HttpResponse {
    let (id, target_type) = path.into_inner();
    if !state.matches(id).await {
        return forbidden();
    }

    let is_urlencoded = req
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);

    let target = if is_urlencoded {
        match decode_data_field(&body) {
            Some(url) => Target::Url(url),
            None => return HttpResponse::BadRequest().finish(),
        }
    } else {
        let dest = state
            .with_task(id, |t| t.scratch_dir.join(format!("target_{target_type}")))
            .await
            .unwrap();
        if let Err(e) = tokio::fs::write(&dest, &body).await {
            return HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }));
        }
        Target::File(dest)
    };

    let (module_path, module_name, config) = match state
        .with_task(id, |t| {
            t.ready = false;
            t.results = None;
            (t.module_path.clone(), t.module_name.clone(), t.config.clone())
        })
        .await
    {
        Some(v) => v,
        None => return forbidden(),
    };

    let (Some(module_path), Some(module_name)) = (module_path, module_name) else {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "module_update and module_update_info must precede module_each"
        }));
    };

    let state = state.into_inner();
    tokio::spawn(async move {
        let payload = runner::execute(&module_path, &module_name, &config, &target).await;
        state
            .with_task(id, |t| {
                t.results = Some(payload);
                t.ready = true;
            })
            .await;
    });

    HttpResponse::Ok().finish()
}

/// `GET /{task}/ready` — polled every 5 seconds until execution completes
/// (§4.5 step 4, §5).
#[get("/{task}/ready")]
async fn ready(state: web::Data<AgentState>, path: web::Path<Uuid>) -> HttpResponse {
    let id = path.into_inner();
    match state.with_task(id, |t| t.ready).await {
        Some(ready) => HttpResponse::Ok().json(serde_json::json!({ "ready": ready })),
        None => forbidden(),
    }
}

/// `GET /{task}/results` — the structured payload (§4.5 step 5).
#[get("/{task}/results")]
async fn results(state: web::Data<AgentState>, path: web::Path<Uuid>) -> HttpResponse {
    let id = path.into_inner();
    match state.with_task(id, |t| t.results.clone()).await {
        Some(Some(payload)) => HttpResponse::Ok().json(payload),
        Some(None) => HttpResponse::Conflict().json(serde_json::json!({ "error": "no results yet" })),
        None => forbidden(),
    }
}

#[derive(serde::Deserialize)]
struct GetFileQuery {
    filepath: String,
}

/// `POST /{task}/get_file` — downloads an artifact referenced in the
/// results payload (§4.5 step 6). `filepath` is resolved relative to the
/// task's scratch directory; Content-Disposition carries the original
/// filename.
#[post("/{task}/get_file")]
async fn get_file(
    state: web::Data<AgentState>,
    path: web::Path<Uuid>,
    query: web::Query<GetFileQuery>,
) -> Result<NamedFile, actix_web::Error> {
    let id = path.into_inner();
    if !state.matches(id).await {
        return Err(actix_web::error::ErrorForbidden("task_id mismatch"));
    }
    let scratch_dir = state
        .with_task(id, |t| t.scratch_dir.clone())
        .await
        .ok_or_else(|| actix_web::error::ErrorForbidden("task_id mismatch"))?;

    let requested = std::path::Path::new(&query.filepath);
    let filename = requested
        .file_name()
        .ok_or_else(|| actix_web::error::ErrorBadRequest("invalid filepath"))?;
    let resolved = scratch_dir.join(filename);

    NamedFile::open(resolved).map_err(actix_web::error::ErrorNotFound)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let scratch_root = std::env::var("AGENT_SCRATCH_PATH").unwrap_or_else(|_| "./agent_scratch".to_string());
    std::fs::create_dir_all(&scratch_root)?;
    let bind_addr = std::env::var("AGENT_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_string());

    let state = AgentState::new(std::path::PathBuf::from(scratch_root));

    println!("[AGENT] listening on {bind_addr}");
    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(web::Data::new(state.clone()))
            .service(status)
            .service(new_task)
            .service(module_update)
            .service(module_update_info)
            .service(module_each)
            .service(ready)
            .service(results)
            .service(get_file)
    })
    .bind(&bind_addr)?
    .run()
    .await
}
