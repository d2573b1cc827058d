#[tokio::main]
async fn main() {
    coursepay_observability::init();

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        tracing::warn!("JWT_SECRET not set; using insecure dev default");
        "dev-secret".to_string()
    });
    let webhook_secret = std::env::var("WEBHOOK_SECRET").unwrap_or_else(|_| {
        tracing::warn!("WEBHOOK_SECRET not set; using insecure dev default");
        "dev-webhook-secret".to_string()
    });

    let config = coursepay_api::app::AppConfig {
        jwt_secret,
        webhook_secret,
    };
    let app = coursepay_api::app::build_app(config);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .expect("failed to bind 0.0.0.0:8080");

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
