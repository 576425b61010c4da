use relay_web::{handler_fn, interceptor_fn, Chain, Response, Server, StatusCode};
use serde_json::json;
use std::time::Instant;
use tokio::net::TcpListener;

// curl 'http://127.0.0.1:8080/echo?page=2' -H 'Content-Type: application/json' -d '{"name":"tom"}'
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().init();

    let timing = interceptor_fn(|ctx, req, next| {
        Box::pin(async move {
            let started = Instant::now();
            let resp = next.run(ctx, req).await;
            tracing::info!(path = req.url().path(), elapsed = ?started.elapsed(), "handled");
            resp
        })
    });

    let chain = Chain::new().with(timing).with(handler_fn(|_, req| {
        match req.url().path_segment(0) {
            Some("echo") => Response::json(
                StatusCode::Ok,
                &json!({
                    "params": req.params(),
                    "body": req.body().map(String::from_utf8_lossy),
                    "files": req.files().iter().map(|f| f.filename()).collect::<Vec<_>>(),
                }),
            ),
            _ => Response::text(StatusCode::NotFound, "try /echo"),
        }
    }));

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .chain(chain)
        .build()
        .launch()
        .await;
}
