use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    println!("mock API listening on http://{addr}");
    println!("  config key:     {}", mock_server::CONFIG_KEY);
    println!("  ingest key:     {}", mock_server::INGEST_KEY);
    println!("  management key: {}", mock_server::MANAGEMENT_KEY);
    mock_server::run(listener).await
}
