use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use digitd::service::PredictionService;
use digitd::settings::Settings;
use digitd::{server, torch, util};
use std::{env, process};
use tracing::info;

const USAGE: &str = "usage: ./digitd [config file]";

fn get_args() -> Option<String> {
    let args: Vec<String> = env::args().collect();
    match args.len() {
        1 => None,
        2 => Some(args[1].clone()),
        _ => {
            println!("{USAGE}");
            process::exit(1);
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load(get_args().as_deref()).context("loading settings")?;
    util::init_tracing(&settings.log.filter);

    // Loaded once, then only read by the request handlers
    let model = torch::load(&settings.model.path)?;
    info!(
        "loaded {} model from {}",
        model.kind(),
        settings.model.path.display()
    );
    let service = web::Data::new(PredictionService::new(model));

    let server_settings = settings.server.clone();
    let mut http = HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .configure(|cfg| server::configure(cfg, server_settings.json_limit))
            .configure(|cfg| server::configure_static(cfg, &server_settings.static_dir))
    });
    if settings.server.workers > 0 {
        http = http.workers(settings.server.workers);
    }

    info!(
        "listening on {}:{}",
        settings.server.host, settings.server.port
    );
    http.bind((settings.server.host.as_str(), settings.server.port))?
        .run()
        .await?;
    Ok(())
}
