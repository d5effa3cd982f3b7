#[macro_use]
extern crate log;

use std::process::exit;

use actix_web::{web, App, HttpServer};
use clap::Parser;

mod config;
mod error;
mod http;
mod lock;
mod message;
mod node;
mod path;
mod replication;
mod server;
mod status;
mod token;
mod validation;

use config::Config;
use server::MeshServer;

#[derive(Parser, Debug)]
#[command(name = "meshstored")]
struct Args {
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    config: String,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load config '{}': {}", args.config, e);
            exit(1);
        }
    };

    let bind_address = config.this.private_address.clone();
    let public_address = config.this.public_address.clone();

    let mesh = MeshServer::new(&config);

    if let Err(e) = mesh.listen(&bind_address).await {
        error!("Failed to start message hub (addr = {}): {}", bind_address, e);
        exit(1);
    }

    info!(
        "meshstore node '{}' up (private = {}, public = {})",
        config.this.name, bind_address, public_address
    );

    let http_bind = public_address
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .to_string();

    let mesh_data = web::Data::new(mesh);

    HttpServer::new(move || {
        App::new()
            .app_data(mesh_data.clone())
            .configure(http::configure)
    })
    .bind(http_bind)?
    .run()
    .await
}
