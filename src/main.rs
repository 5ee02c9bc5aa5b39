use anyhow::Context;
use filedrop::config::Config;
use filedrop::console::{self, Console};
use filedrop::http::server::Server;
use filedrop::router::Router;
use filedrop::routes::RouteTable;
use std::io;
use std::sync::Arc;
use std::thread;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(config.verbose);

    let routes = Arc::new(RouteTable::new(config.serve_dir.clone()));
    let router = Router::new(Arc::clone(&routes), config.save_dir.clone());

    let server = Server::bind((config.ip, config.port), config.workers, config.timeout)?;
    let handle = server.shutdown_handle()?;

    let server_thread = thread::Builder::new()
        .name("accept".to_string())
        .spawn(move || server.run(Arc::new(router)))
        .context("Can't start server thread")?;

    println!("{}", console::bold("\nFiledrop is running."));

    let console = Console::new(routes, config);
    let mut stdout = io::stdout();
    console.run_line("options", &mut stdout)?;
    console.run_line("path show", &mut stdout)?;
    console.run(io::stdin().lock(), &mut stdout)?;

    info!("shutting down");
    handle.shutdown();

    match server_thread.join() {
        Ok(result) => result,
        Err(_) => {
            error!("server thread panicked");
            Ok(())
        }
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}
