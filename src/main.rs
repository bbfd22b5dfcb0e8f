use std::convert::Infallible;
use std::sync::Arc;

use log::info;
use warp::http::StatusCode;
use warp::Filter;

use coderoom::executor::ExecutionRequest;
use coderoom::languages;
use coderoom::room::RegistryError;
use coderoom::server::Server;

const DEFAULT_PORT: u16 = 2052;

#[tokio::main]
async fn main() {
    env_logger::init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let server = Arc::new(Server::new());

    let ws_server = Arc::clone(&server);
    let ws_route = warp::path("ws")
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let server = Arc::clone(&ws_server);
            ws.on_upgrade(move |socket| server.handle_connection(socket))
        });

    let create_server = Arc::clone(&server);
    let create_room = warp::path!("api" / "rooms")
        .and(warp::post())
        .and_then(move || {
            let server = Arc::clone(&create_server);
            async move {
                Ok::<_, Infallible>(warp::reply::json(&server.create_room().await))
            }
        });

    let lookup_server = Arc::clone(&server);
    let get_room = warp::path!("api" / "rooms" / String)
        .and(warp::get())
        .and_then(move |room_id: String| {
            let server = Arc::clone(&lookup_server);
            async move {
                Ok::<_, Infallible>(warp::reply::json(&server.room_summary(&room_id).await))
            }
        });

    let list_languages = warp::path!("api" / "languages")
        .and(warp::get())
        .map(|| warp::reply::json(&languages::list()));

    let exec_server = Arc::clone(&server);
    let execute = warp::path!("api" / "execute")
        .and(warp::post())
        .and(warp::body::json())
        .and_then(move |request: ExecutionRequest| {
            let server = Arc::clone(&exec_server);
            async move {
                let reply = match server.execute(&request).await {
                    Ok(result) => warp::reply::with_status(
                        warp::reply::json(&result),
                        StatusCode::OK,
                    ),
                    Err(e @ RegistryError::RoomNotFound(_)) => warp::reply::with_status(
                        warp::reply::json(&serde_json::json!({ "error": e.to_string() })),
                        StatusCode::NOT_FOUND,
                    ),
                };
                Ok::<_, Infallible>(reply)
            }
        });

    let routes = ws_route
        .or(create_room)
        .or(get_room)
        .or(list_languages)
        .or(execute)
        .with(warp::cors().allow_any_origin());

    info!("server listening on port {port}");
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
}
