use tracing::error;

#[tokio::main]
async fn main() {
    if let Err(e) = points::start_server().await {
        error!("Server exited with error: {e}");
        eprintln!("points: {e}");
        std::process::exit(1);
    }
}
