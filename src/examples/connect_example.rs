use kitty_tunnel::{ProxyConnectError, ProxyConnector};

use anyhow::Result;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::client::conn::http1::Builder;
use hyper::header::HOST;
use hyper::Request;
use hyper_util::rt::TokioIo;
use log::{error, info};

// HTTP_PROXY_HOST=127.0.0.1 HTTP_PROXY_PORT=8080 cargo run --example connect_example -- example.com 80
#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "example.com".to_string());
    let port = match args.next() {
        Some(port) => port.parse::<u16>()?,
        None => 80,
    };

    let connector = ProxyConnector::from_env()?;
    let stream = match connector.get_socket(&host, port).await {
        Ok(stream) => stream,
        Err(ProxyConnectError::Handshake(rejection)) => {
            error!("proxy refused tunnel: {}", rejection.response());
            return Err(rejection.into());
        }
        Err(e) => return Err(e.into()),
    };

    let (mut sender, conn) = Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .handshake(TokioIo::new(stream))
        .await?;
    tokio::task::spawn(async move {
        if let Err(err) = conn.await {
            error!("Connection failed: {:?}", err);
        }
    });

    let req = Request::builder()
        .uri("/")
        .header(HOST, host.as_str())
        .body(Empty::<Bytes>::new())?;
    let resp = sender.send_request(req).await?;
    info!("HTTP {} from {}:{}", resp.status(), host, port);

    let body = resp.into_body().collect().await?.to_bytes();
    println!("{}", String::from_utf8_lossy(&body));
    Ok(())
}
