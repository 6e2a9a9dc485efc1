//! HTTP chat front-end: `POST /chat` and `GET /health`, served with `warp`.
//!
//! Each chat call is wrapped in a 30s timeout so a stuck provider can never
//! hang a client indefinitely; tokio's async filters make this a plain
//! `tokio::time::timeout` rather than the background-thread-plus-channel
//! marshaling a single-threaded event loop would need for the same guarantee.

use std::convert::Infallible;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use warp::Filter;

use super::ChatContext;

const CHAT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
}

#[derive(Serialize)]
struct ChatResponse {
    reply: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn serve(context: ChatContext, port: u16) {
    let context = context.clone();

    let chat = warp::path("chat")
        .and(warp::post())
        .and(warp::body::json::<ChatRequest>())
        .and(warp::any().map(move || context.clone()))
        .and_then(handle_chat);

    let health = warp::path("health").and(warp::get()).map(|| warp::reply::json(&HealthResponse { status: "ok" }));

    let routes = chat.or(health);

    tracing::info!(port, "HTTP chat front-end listening");
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
}

async fn handle_chat(request: ChatRequest, context: ChatContext) -> Result<impl warp::Reply, Infallible> {
    let reply = match tokio::time::timeout(CHAT_TIMEOUT, context.handle_message(&request.message)).await {
        Ok(reply) => reply,
        Err(_) => "That took too long to think about — try again in a moment.".to_string(),
    };
    Ok(warp::reply::json(&ChatResponse { reply }))
}
