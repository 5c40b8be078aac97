use clap::Parser;
use rivulet::{Server, ServerConfig};
use std::io;

#[derive(Parser)]
#[command(
    name = "rivulet-server",
    about = "Standalone RTSP streaming server"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:8554")]
    bind: String,

    /// Worker threads serving client connections
    #[arg(long, default_value_t = 16)]
    workers: usize,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = ServerConfig {
        worker_threads: args.workers,
        ..ServerConfig::default()
    };

    let mut server = match Server::with_config(&args.bind, config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to set up server: {}", e);
            return;
        }
    };

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return;
    }

    println!("RTSP server on {} — press Enter to stop", args.bind);
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    server.shutdown();
}
