use relay_web::{
    basic_auth::{BasicAuth, BASIC_AUTH_USER},
    handler_fn, Chain, Response, Server, StatusCode,
};
use serde_json::json;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

// curl -u admin:secret 'http://127.0.0.1:8080/?tag[]=a,b' -H 'X-Trace-Id: 42'
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .init();

    let auth = BasicAuth::new([("admin", "secret"), ("viewer", "viewer")], "relay demo")
        .expect("credentials are not empty");

    let chain = Chain::new().with(auth).with(handler_fn(|ctx, req| {
        Response::json(
            StatusCode::Ok,
            &json!({
                "user": ctx.value(BASIC_AUTH_USER),
                "path": req.url().path(),
                "params": req.params(),
            }),
        )
    }));

    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .chain(chain)
        .build()
        .launch()
        .await;
}
