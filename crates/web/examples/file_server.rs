//! Serves a directory and a few bundled resources.
//!
//! ```sh
//! cargo run --example file_server -- ./public [server.toml]
//! curl -v http://127.0.0.1:8080/files/index.html
//! curl -v --compressed http://127.0.0.1:8080/resources/readme.txt
//! ```

use std::env;
use std::error::Error;
use std::time::Duration;

use lightweight_web::{
    Content, FilesHandler, ResourceBundle, ResourcesHandler, Route, Router, Server, ServerConfig, build_runtime,
    handler_fn,
};
use tracing::info;

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let root = args.next().unwrap_or_else(|| ".".to_string());
    let config = match args.next() {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    let router = Router::builder()
        .route(Route::builder("/files/", FilesHandler::new(&root)).cache_control("max-age=60").build()?)
        .route(
            Route::builder(
                "/resources/",
                ResourcesHandler::new(ResourceBundle::new().with("readme.txt", b"bundled with the binary\n")),
            )
            .cache_control("max-age=86400")
            .content_md5(true)
            .build()?,
        )
        .route(
            Route::builder(
                "/hello",
                handler_fn(|req| {
                    let name = req.parameters().get("name").unwrap_or("world");
                    Ok(Content::bytes(format!("hello {name}\n")).with_content_type("text/plain; charset=utf-8"))
                }),
            )
            .build()?,
        )
        .build()?;

    let runtime = build_runtime(&config.pool)?;
    runtime.block_on(async move {
        let server = Server::builder(config).router(router).build()?;
        server.start().await?;
        info!(%root, "serving, press ctrl-c to stop");

        tokio::signal::ctrl_c().await?;
        server.stop(Some(Duration::from_secs(5))).await;
        Ok::<_, Box<dyn Error>>(())
    })
}
