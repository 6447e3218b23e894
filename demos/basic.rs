//! Minimal tsu-rpc service: a few methods, one of them broken on purpose.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:8080/ping
//!   curl -d '{"method":"echo","data":{"hello":"world"}}' http://localhost:8080/api
//!   curl -d '{"method":"sum","data":{"a":1,"b":2}}'      http://localhost:8080/api
//!   curl -d '{"method":"sum","data":{"a":1}}'            http://localhost:8080/api
//!   curl -d '{"method":"quota"}'                         http://localhost:8080/api
//!   curl -d '{"method":"crash"}'                         http://localhost:8080/api
//!   curl -d '{"method":"nope"}'                          http://localhost:8080/api
//!
//! Configuration comes from HTTP_HOST, HTTP_PORT, TLS_* and TRUSTED_PROXIES.

use serde::Deserialize;
use serde_json::Value;
use tsu_rpc::config::ServerConfig;
use tsu_rpc::{BoxError, Dispatcher, Message, Methods, Request, Response, Router, Server};

#[derive(Deserialize)]
struct Sum {
    a: i64,
    b: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut dispatcher = Dispatcher::new();
    dispatcher.initialize(
        Methods::new()
            .method("echo", echo)
            .typed("sum", sum)
            .method("quota", quota)
            .method("crash", crash),
    );

    let router = Router::new()
        .get("/whoami", whoami)
        .layer(|req: Request, next: tsu_rpc::middleware::Next| async move {
            let path = req.path().to_owned();
            let res = next.run(req).await;
            tracing::debug!(path = %path, status = %res.status_code(), "served");
            res
        });

    Server::from_config(&ServerConfig::from_env()?)?
        .error_reporter(|fault| eprintln!("reported: {fault}"))
        .serve(router, dispatcher)
        .await?;
    Ok(())
}

async fn echo(data: Value) -> Result<Message, BoxError> {
    Ok(Message::success(data))
}

async fn sum(p: Sum) -> Result<Message, BoxError> {
    Ok(Message::success(p.a + p.b))
}

// Handler errors come back as error envelopes with status 500.
async fn quota(_data: Value) -> Result<Message, anyhow::Error> {
    anyhow::bail!("daily quota exceeded")
}

// The panic is contained: this request gets a 500, the next one is served.
async fn crash(_data: Value) -> Result<Message, BoxError> {
    panic!("crash requested")
}

async fn whoami(req: Request) -> Response {
    let ip = req.client_ip().map(|ip| ip.to_string()).unwrap_or_default();
    Response::message(&Message::success(ip))
}
