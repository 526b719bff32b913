use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use catdog::config::{Settings, DEFAULT_CONFIG_FILE};
use catdog::server::routes;
use catdog::service::Service;
use std::{env, io, process};

use tracing::{error, info};

const USAGE: &str = "usage: ./catdog [config file]";

fn get_args() -> String {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => DEFAULT_CONFIG_FILE.to_string(),
        2 if args[1] != "-h" && args[1] != "--help" => args[1].clone(),
        _ => {
            println!("{USAGE}");
            process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let config_file = get_args();
    let settings = Settings::load(&config_file).unwrap_or_else(|e| {
        eprintln!("invalid configuration in {config_file}: {e:#}");
        process::exit(1);
    });

    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", &settings.log);
    }
    tracing_subscriber::fmt::init();

    let service = web::Data::new(Service::init(&settings));
    let ui_dir = settings.server.ui_dir.clone();
    let addr = settings.bind_addr();

    info!(
        "listening on {addr} (model loaded: {})",
        service.model_loaded()
    );

    // Start the HTTP server
    let server = HttpServer::new({
        let service = service.clone();
        move || {
            App::new()
                .app_data(service.clone())
                .wrap(middleware::Logger::default())
                .wrap(Cors::permissive())
                .configure(routes::configure(ui_dir.clone()))
        }
    })
    .bind(&addr)?
    .run()
    .await;

    if let Err(e) = &server {
        error!("server stopped: {e}");
    }
    service.shutdown();
    server
}
