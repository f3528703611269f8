use log::{error, info};
use reactor_httpd::{logging, ByteBuffer, Request, Server, ServerConfig, ServerResult};
use serde_json::json;
use std::env;
use std::net::TcpStream;
use std::path::Path;
use std::process;
use std::sync::atomic::Ordering;

fn main() {
    let args: Vec<String> = env::args().collect();

    let result = if args.len() > 2 && args[1] == "--write-config" {
        save_default_config(&args[2])
    } else {
        run(args.get(1).map(String::as_str))
    };

    if let Err(e) = result {
        error!("{}", e);
        logging::flush();
        eprintln!("reactor-httpd: {}", e);
        process::exit(1);
    }
}

fn run(config_path: Option<&str>) -> ServerResult<()> {
    let config = match config_path {
        Some(path) if Path::new(path).exists() => ServerConfig::from_json_file(path)?,
        _ => ServerConfig::new(),
    };

    logging::init(
        config.log_level,
        config.log_queue_capacity,
        config.log_file.as_deref(),
    )?;

    let mut server = Server::new(config);
    server
        .register_static_alias("/", "/index.html")
        .register_dynamic_handler("/action/echo", echo);

    let store = server.open_store(|store| {
        let stream = TcpStream::connect((store.host.as_str(), store.port))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    })?;
    if let Some(store) = store {
        server.register_dynamic_handler("/action/store", move |_: &Request, out: &mut ByteBuffer| {
            let reply = json!({ "capacity": store.capacity(), "available": store.available() });
            out.append(reply.to_string().as_bytes());
            true
        });
    }

    let mut reactor = server.bind()?;

    let shutdown = reactor.shutdown_handle();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::Release);
    })
    .map_err(|e| reactor_httpd::ServerError::Startup(format!("Error setting Ctrl-C handler: {}", e)))?;

    reactor.run()?;
    info!("Server stopped");
    logging::flush();
    Ok(())
}

/// Replies with the decoded JSON body, or `{"ok":true}` when there is none
fn echo(request: &Request, out: &mut ByteBuffer) -> bool {
    let reply = match &request.json {
        Some(body) => json!({ "ok": true, "echo": body }),
        None => json!({ "ok": true }),
    };

    match serde_json::to_vec(&reply) {
        Ok(bytes) => {
            out.append(&bytes);
            true
        }
        Err(_) => false,
    }
}

// Save default configuration to a file
fn save_default_config(path: &str) -> ServerResult<()> {
    let config = ServerConfig::new();
    config.save_to_json_file(path)?;
    println!("Default configuration saved to: {}", path);
    Ok(())
}
